use std::path::Path;
use std::process::Stdio;

use anyhow::anyhow;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;

use crate::core::process;
use crate::models::media::AudioCodec;

pub async fn is_ffmpeg_available() -> bool {
    process::command("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

pub fn mux_args(video: &Path, audio: &Path, output: &Path) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        video.to_string_lossy().into_owned(),
        "-i".into(),
        audio.to_string_lossy().into_owned(),
        "-map".into(),
        "0:v".into(),
        "-map".into(),
        "1:a".into(),
        "-c".into(),
        "copy".into(),
        output.to_string_lossy().into_owned(),
    ]
}

pub fn convert_args(input: &Path, output: &Path, codec: AudioCodec, bitrate_kbps: u32) -> Vec<String> {
    vec![
        "-y".into(),
        "-i".into(),
        input.to_string_lossy().into_owned(),
        "-vn".into(),
        "-codec:a".into(),
        codec.encoder().into(),
        "-b:a".into(),
        format!("{}k", bitrate_kbps),
        output.to_string_lossy().into_owned(),
    ]
}

pub async fn mux_video_audio(
    video: &Path,
    audio: &Path,
    output: &Path,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    run(mux_args(video, audio, output), output, cancel).await
}

pub async fn convert_audio(
    input: &Path,
    output: &Path,
    codec: AudioCodec,
    bitrate_kbps: u32,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    run(convert_args(input, output, codec, bitrate_kbps), output, cancel).await
}

async fn run(args: Vec<String>, output: &Path, cancel: CancellationToken) -> anyhow::Result<()> {
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut child = process::command("ffmpeg")
        .args(&args)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("Failed to run ffmpeg: {}", e))?;

    let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("ffmpeg has no stderr"))?;
    let stderr_reader = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| anyhow!("ffmpeg process failed: {}", e))?,
        _ = cancel.cancelled() => {
            process::terminate(&mut child, "ffmpeg").await;
            stderr_reader.abort();
            anyhow::bail!("ffmpeg cancelled");
        }
    };

    let stderr = stderr_reader.await.unwrap_or_default();
    if !status.success() {
        return Err(anyhow!(
            "ffmpeg exited with {}: {}",
            status,
            crate::error::short_message(&stderr)
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mux_copies_both_streams() {
        let args = mux_args(Path::new("v.webm"), Path::new("a.m4a"), Path::new("out.mp4"));
        assert_eq!(
            args.join(" "),
            "-y -i v.webm -i a.m4a -map 0:v -map 1:a -c copy out.mp4"
        );
    }

    #[test]
    fn convert_targets_bitrate() {
        let args = convert_args(Path::new("a.webm"), Path::new("a.mp3"), AudioCodec::Mp3, 160);
        assert!(args.windows(2).any(|w| w[0] == "-b:a" && w[1] == "160k"));
        assert!(args.contains(&"libmp3lame".to_string()));
        assert_eq!(args.last().unwrap(), "a.mp3");
    }
}
