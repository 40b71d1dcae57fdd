use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_STEM_CHARS: usize = 150;

/// Turns a video title into a file stem that is safe on every platform.
pub fn sanitize_path_component(name: &str) -> String {
    let name: String = name.nfc().collect();
    let name = name.trim().replace(['\t', '\n', '\r'], " ");
    let name = WS_RE.replace_all(&name, " ");
    let name = name.replace(" | ", "｜");

    let forbidden: &[(char, char)] = &[
        ('<', '＜'),
        ('>', '＞'),
        (':', '꞉'),
        ('"', '＂'),
        ('/', '⧸'),
        ('\\', '＼'),
        ('|', '｜'),
        ('?', '？'),
        ('*', ' '),
    ];

    let mut result = name.to_string();
    for (from, to) in forbidden {
        result = result.replace(*from, &to.to_string());
    }

    let result: String = result.chars().take(MAX_STEM_CHARS).collect();
    let result = result.trim().trim_end_matches([' ', '-', '.', ';']).trim();
    if result.is_empty() {
        "download".to_string()
    } else {
        result.to_string()
    }
}

/// `None` for unknown or empty sizes, otherwise e.g. `"12.3 MB"`.
pub fn format_filesize(bytes: Option<u64>) -> Option<String> {
    let bytes = bytes.filter(|b| *b > 0)?;
    let mut size = bytes as f64;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return Some(format!("{:.1} {}", size, unit));
        }
        size /= 1024.0;
    }
    Some(format!("{:.1} TB", size))
}

/// Format seconds into H:MM:SS or M:SS.
pub fn format_duration(seconds: Option<f64>) -> String {
    let total = match seconds {
        Some(s) if s > 0.0 && s.is_finite() => s as u64,
        _ => return "Unknown".to_string(),
    };
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
