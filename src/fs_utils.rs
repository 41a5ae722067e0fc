use crate::error::Result;
use regex::RegexSet;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

/// Number of leading bytes inspected when sniffing for binary content
pub const SNIFF_LEN: usize = 8000;

/// Case-insensitive file name patterns for files that likely hold secrets
pub const SENSITIVE_PATTERNS: &[&str] = &[
    r"(?i)^\.env",
    r"(?i)\.(pem|key|p12|pfx|jks|keystore|crt|cer|der|p8|ppk|asc|gpg)$",
    r"(?i)^id_(rsa|dsa|ecdsa|ed25519)$",
    r"(?i)(secret|password|passwd|credential|private_key)",
];

/// Decides whether a file should be treated as binary
pub trait BinaryClassifier: Send + Sync {
    fn is_binary(&self, path: &Path) -> bool;
}

/// Default classifier: looks for NUL bytes and control-character density in the
/// first [`SNIFF_LEN`] bytes. Unreadable files are reported as text so the
/// subsequent read surfaces the real error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentSniffer;

impl BinaryClassifier for ContentSniffer {
    fn is_binary(&self, path: &Path) -> bool {
        let Ok(file) = File::open(path) else {
            return false;
        };
        let mut head = Vec::with_capacity(SNIFF_LEN);
        if file.take(SNIFF_LEN as u64).read_to_end(&mut head).is_err() {
            return false;
        }
        looks_binary(&head)
    }
}

/// Byte-level heuristic behind [`ContentSniffer`]
pub fn looks_binary(bytes: &[u8]) -> bool {
    if bytes.is_empty() {
        return false;
    }
    if bytes.contains(&0) {
        return true;
    }
    let control = bytes
        .iter()
        .filter(|&&b| b < 0x20 && !matches!(b, b'\n' | b'\r' | b'\t' | 0x0c | 0x1b))
        .count();
    control * 10 > bytes.len()
}

/// Compiled form of [`SENSITIVE_PATTERNS`]
#[derive(Debug, Clone)]
pub struct SensitivePatterns {
    set: RegexSet,
}

impl SensitivePatterns {
    /// # Errors
    ///
    /// Returns `ShotgunError::Regex` if the pattern set fails to compile.
    pub fn new() -> Result<Self> {
        Ok(Self {
            set: RegexSet::new(SENSITIVE_PATTERNS)?,
        })
    }

    /// Matches against the final path component, whichever separator the path uses.
    pub fn is_match(&self, path: &str) -> bool {
        self.set.is_match(file_name(path))
    }
}

/// Convenience check that compiles the pattern set on every call
///
/// # Errors
///
/// Returns `ShotgunError::Regex` if the pattern set fails to compile.
pub fn is_sensitive_file(path: &str) -> Result<bool> {
    Ok(SensitivePatterns::new()?.is_match(path))
}

/// Last non-empty segment of a `/` or `\` separated path
pub fn file_name(path: &str) -> &str {
    path.rsplit(is_separator)
        .find(|segment| !segment.is_empty())
        .unwrap_or(path)
}

pub fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Splits a path into its meaningful segments, dropping empty and `.` parts
pub fn path_segments(path: &str) -> Vec<&str> {
    path.split(is_separator)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect()
}

/// Escapes text so it cannot be mistaken for markup inside a `<file>` block
pub fn escape_markup(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() + text.len() / 20);
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Reads a whole file, replacing invalid UTF-8 sequences
///
/// # Errors
///
/// `ShotgunError::Io` if the file cannot be opened or read.
pub fn read_file_contents(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Human-readable byte count
pub fn format_size(size: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    let bytes = size as f64;
    if bytes < KIB {
        format!("{size} B")
    } else if bytes < MIB {
        format!("{:.1} KiB", bytes / KIB)
    } else {
        format!("{:.2} MiB", bytes / MIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_sensitive_files() {
        assert!(is_sensitive_file(".env").unwrap());
        assert!(is_sensitive_file("id_rsa").unwrap());
        assert!(is_sensitive_file("certificate.pem").unwrap());
        assert!(!is_sensitive_file("README.md").unwrap());
    }

    #[test]
    fn test_sensitive_patterns_variants() {
        let patterns = SensitivePatterns::new().unwrap();
        assert!(patterns.is_match("config/.env.production"));
        assert!(patterns.is_match("deploy\\SERVER.KEY"));
        assert!(patterns.is_match("home/user/.ssh/id_ed25519"));
        assert!(patterns.is_match("app/db_password.txt"));
        assert!(patterns.is_match("Credentials.json"));
        assert!(patterns.is_match("keystore.jks"));

        assert!(!patterns.is_match("src/main.rs"));
        assert!(!patterns.is_match("environment.md"));
        assert!(!patterns.is_match("id_rsa.pub"));
        // Only the file name is matched, not the directories above it.
        assert!(!patterns.is_match("secrets/readme.txt"));
    }

    #[test]
    fn test_escape_markup() {
        let escaped = escape_markup(r#"if a < b && c > "d" { 'e' }"#);
        assert_eq!(
            escaped,
            "if a &lt; b &amp;&amp; c &gt; &quot;d&quot; { &#39;e&#39; }"
        );
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('>'));
    }

    #[test]
    fn test_escape_markup_closing_tag() {
        let escaped = escape_markup("</file><file path=\"x\">");
        assert!(!escaped.contains("</file>"));
        assert!(!escaped.contains("<file"));
    }

    #[test]
    fn test_looks_binary() {
        assert!(!looks_binary(b""));
        assert!(!looks_binary(b"plain text\nwith lines\r\n\tand tabs"));
        assert!(looks_binary(b"PK\x03\x04\x00\x00"));
        assert!(looks_binary(&[0x01, 0x02, 0x03, 0x04, b'a']));
    }

    #[test]
    fn test_content_sniffer() {
        let temp_dir = TempDir::new().unwrap();
        let text = temp_dir.path().join("notes.txt");
        let binary = temp_dir.path().join("image.png");
        fs::write(&text, "hello world").unwrap();
        fs::write(&binary, [0x89, b'P', b'N', b'G', 0x00, 0x00, 0x1a]).unwrap();

        assert!(!ContentSniffer.is_binary(&text));
        assert!(ContentSniffer.is_binary(&binary));
        assert!(!ContentSniffer.is_binary(&temp_dir.path().join("missing")));
    }

    #[test]
    fn test_read_file_contents() {
        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("test.txt");

        fs::write(&file_path, "test content").unwrap();
        assert_eq!(read_file_contents(&file_path).unwrap(), "test content");

        let unicode = temp_dir.path().join("unicode.txt");
        fs::write(&unicode, "Hello 世界 🌍").unwrap();
        assert_eq!(read_file_contents(&unicode).unwrap(), "Hello 世界 🌍");

        let invalid = temp_dir.path().join("latin1.txt");
        fs::write(&invalid, [b'c', b'a', b'f', 0xe9]).unwrap();
        assert_eq!(read_file_contents(&invalid).unwrap(), "caf\u{fffd}");

        assert!(read_file_contents(&temp_dir.path().join("missing.txt")).is_err());
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(path_segments("a/b\\c.txt"), vec!["a", "b", "c.txt"]);
        assert_eq!(path_segments("/abs//./x.rs"), vec!["abs", "x.rs"]);
        assert_eq!(file_name("a/b/c.txt"), "c.txt");
        assert_eq!(file_name("dir/"), "dir");
        assert_eq!(file_name("plain"), "plain");
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.00 MiB");
    }
}
