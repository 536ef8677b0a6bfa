//! Helper utility functions for CLI commands

use std::path::Path;

/// Heading underline used by every command
pub fn rule(width: usize) -> String {
    "\u{2550}".repeat(width)
}

/// Hide all but the first characters of a secret.
/// Counts characters, not bytes, so multi-byte input never splits.
pub fn mask_secret(secret: &str) -> String {
    const VISIBLE: usize = 4;
    if secret.chars().count() <= VISIBLE * 2 {
        return "***".to_string();
    }
    let shown: String = secret.chars().take(VISIBLE).collect();
    format!("{shown}***")
}

/// Seconds with millisecond precision, as shown in tables
pub fn format_secs(secs: f64) -> String {
    format!("{secs:.3}s")
}

/// Case-insensitive extension check
pub fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_secret_short() {
        assert_eq!(mask_secret("abc"), "***");
        assert_eq!(mask_secret("12345678"), "***");
    }

    #[test]
    fn test_mask_secret_long() {
        assert_eq!(mask_secret("sk-live-123456"), "sk-l***");
    }

    #[test]
    fn test_mask_secret_multibyte() {
        assert_eq!(mask_secret("\u{4f60}\u{597d}\u{4e16}\u{754c}abcdef"), "\u{4f60}\u{597d}\u{4e16}\u{754c}***");
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(1.5), "1.500s");
        assert_eq!(format_secs(0.0304), "0.030s");
    }

    #[test]
    fn test_has_extension() {
        assert!(has_extension(Path::new("take1.WAV"), "wav"));
        assert!(!has_extension(Path::new("take1.pcm"), "wav"));
        assert!(!has_extension(Path::new("wav"), "wav"));
    }
}
