//! Normalizes raw stream descriptors into the client-facing format list.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::core::filename::format_filesize;
use crate::models::media::{AudioVariant, FormatCatalog, RawFormat, VideoVariant};

const MIN_VIDEO_HEIGHT: u32 = 144;
const MIN_AUDIO_KBPS: f64 = 48.0;
const STANDARD_BITRATES: [u32; 7] = [64, 96, 128, 160, 192, 256, 320];

pub fn normalize(formats: &[RawFormat]) -> FormatCatalog {
    FormatCatalog {
        video: normalize_video(formats),
        audio: normalize_audio(formats),
    }
}

fn normalize_video(formats: &[RawFormat]) -> Vec<VideoVariant> {
    let mut best_by_height: HashMap<u32, &RawFormat> = HashMap::new();

    for f in formats.iter().filter(|f| f.has_video()) {
        let height = match f.height {
            Some(h) if h >= MIN_VIDEO_HEIGHT => h,
            _ => continue,
        };
        let replace = match best_by_height.get(&height) {
            None => true,
            Some(existing) => video_rank(f) > video_rank(existing),
        };
        if replace {
            best_by_height.insert(height, f);
        }
    }

    let mut variants: Vec<VideoVariant> = best_by_height
        .into_iter()
        .map(|(height, f)| VideoVariant {
            format_id: f.format_id.clone(),
            height,
            resolution: format!("{}p", height),
            ext: f.ext.clone(),
            filesize: f.filesize,
            filesize_str: format_filesize(f.filesize),
            has_audio: f.has_audio(),
            vcodec: short_codec(f.vcodec.as_deref()),
            acodec: if f.has_audio() {
                short_codec(f.acodec.as_deref())
            } else {
                String::new()
            },
            fps: f.fps,
            tbr: f.tbr,
        })
        .collect();

    variants.sort_by(|a, b| b.height.cmp(&a.height));
    variants
}

/// Muxed audio wins, then size.
fn video_rank(f: &RawFormat) -> (bool, u64) {
    (f.has_audio(), f.filesize.unwrap_or(0))
}

fn normalize_audio(formats: &[RawFormat]) -> Vec<AudioVariant> {
    let mut best_by_key: HashMap<(String, u32), &RawFormat> = HashMap::new();

    for f in formats.iter().filter(|f| f.has_audio() && !f.has_video()) {
        let abr = match f.abr {
            Some(abr) if abr >= MIN_AUDIO_KBPS => abr,
            _ => continue,
        };
        let key = (f.ext.clone(), round_bitrate(abr));
        let replace = match best_by_key.get(&key) {
            None => true,
            Some(existing) => f.filesize.unwrap_or(0) > existing.filesize.unwrap_or(0),
        };
        if replace {
            best_by_key.insert(key, f);
        }
    }

    let mut variants: Vec<AudioVariant> = best_by_key
        .into_iter()
        .map(|((ext, rounded), f)| AudioVariant {
            format_id: f.format_id.clone(),
            ext,
            abr: f.abr.unwrap_or(0.0),
            abr_rounded: rounded,
            abr_str: format!("{} kbps", rounded),
            filesize: f.filesize,
            filesize_str: format_filesize(f.filesize),
            acodec: short_codec(f.acodec.as_deref()),
        })
        .collect();

    variants.sort_by(|a, b| {
        b.abr_rounded
            .cmp(&a.abr_rounded)
            .then_with(|| b.abr.partial_cmp(&a.abr).unwrap_or(Ordering::Equal))
            .then_with(|| a.ext.cmp(&b.ext))
    });
    variants
}

/// Snaps a measured bitrate to the nearest standard one; ties go low.
pub fn round_bitrate(abr: f64) -> u32 {
    let mut best = STANDARD_BITRATES[0];
    for candidate in STANDARD_BITRATES {
        if (candidate as f64 - abr).abs() < (best as f64 - abr).abs() {
            best = candidate;
        }
    }
    best
}

fn short_codec(codec: Option<&str>) -> String {
    codec
        .filter(|c| *c != "none")
        .and_then(|c| c.split('.').next())
        .unwrap_or("")
        .to_string()
}
