//! Frame capture to disk
//!
//! A capture pattern is a file name with at most one integer conversion,
//! filled in with the subscriber's frame count: `/tmp/cam-%05d.jpg`.

use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Widest accepted field width
const MAX_WIDTH: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversion {
    zero_pad: bool,
    width: usize,
}

/// Parsed capture file name pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePattern {
    source: String,
    prefix: String,
    conversion: Option<Conversion>,
    suffix: String,
}

impl CapturePattern {
    /// Parse a pattern supporting `%d`, `%Nd`, `%0Nd` and `%%`
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut prefix = String::new();
        let mut suffix = String::new();
        let mut conversion = None;
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            let out = if conversion.is_some() {
                &mut suffix
            } else {
                &mut prefix
            };
            if c != '%' {
                out.push(c);
                continue;
            }
            if chars.next_if_eq(&'%').is_some() {
                out.push('%');
                continue;
            }

            if conversion.is_some() {
                return Err(Error::Config(format!(
                    "capture pattern '{}' has more than one conversion",
                    pattern
                )));
            }

            let zero_pad = chars.next_if_eq(&'0').is_some();
            let mut width = 0usize;
            while let Some(d) = chars.next_if(char::is_ascii_digit) {
                width = width
                    .checked_mul(10)
                    .and_then(|w| w.checked_add(d.to_digit(10).unwrap_or(0) as usize))
                    .filter(|w| *w <= MAX_WIDTH)
                    .ok_or_else(|| {
                        Error::Config(format!(
                            "capture pattern '{}' has a field width over {}",
                            pattern, MAX_WIDTH
                        ))
                    })?;
            }
            while chars.next_if_eq(&'l').is_some() {}
            match chars.next() {
                Some('d' | 'i' | 'u') => conversion = Some(Conversion { zero_pad, width }),
                _ => {
                    return Err(Error::Config(format!(
                        "capture pattern '{}' has an unsupported conversion",
                        pattern
                    )))
                }
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            prefix,
            conversion,
            suffix,
        })
    }

    /// File name for the given frame count
    pub fn format(&self, count: u64) -> PathBuf {
        let mut name = self.prefix.clone();
        if let Some(conv) = self.conversion {
            let number = if conv.zero_pad {
                format!("{:0width$}", count, width = conv.width)
            } else {
                format!("{:>width$}", count, width = conv.width)
            };
            name.push_str(&number);
        }
        name.push_str(&self.suffix);
        PathBuf::from(name)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for CapturePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Write one frame to the file named by `pattern`
///
/// Failures are logged and otherwise ignored.
pub async fn write_frame(pattern: &CapturePattern, count: u64, data: &[u8]) {
    let path = pattern.format(count);
    if let Err(e) = tokio::fs::write(&path, data).await {
        tracing::warn!(path = %path.display(), error = %e, "Failed to write capture file");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_conversion() {
        let pattern = CapturePattern::parse("/tmp/frame-%d.jpg").unwrap();
        assert_eq!(pattern.format(42), PathBuf::from("/tmp/frame-42.jpg"));
    }

    #[test]
    fn test_zero_padded_conversion() {
        let pattern = CapturePattern::parse("cap%05d.jpg").unwrap();
        assert_eq!(pattern.format(7), PathBuf::from("cap00007.jpg"));
        assert_eq!(pattern.format(123456), PathBuf::from("cap123456.jpg"));
    }

    #[test]
    fn test_space_padded_conversion() {
        let pattern = CapturePattern::parse("%3ld").unwrap();
        assert_eq!(pattern.format(5), PathBuf::from("  5"));
    }

    #[test]
    fn test_literal_percent_and_no_conversion() {
        let pattern = CapturePattern::parse("100%%-%d").unwrap();
        assert_eq!(pattern.format(1), PathBuf::from("100%-1"));

        let pattern = CapturePattern::parse("latest.jpg").unwrap();
        assert_eq!(pattern.format(9), PathBuf::from("latest.jpg"));
    }

    #[test]
    fn test_rejects_bad_patterns() {
        assert!(CapturePattern::parse("%d-%d").is_err());
        assert!(CapturePattern::parse("%s.jpg").is_err());
        assert!(CapturePattern::parse("trailing%").is_err());
    }

    #[test]
    fn test_rejects_oversized_width() {
        assert!(matches!(
            CapturePattern::parse("%99999999999999999999d"),
            Err(Error::Config(_))
        ));
        assert!(matches!(CapturePattern::parse("%999d"), Err(Error::Config(_))));

        let pattern = CapturePattern::parse("%032d").unwrap();
        assert_eq!(pattern.format(1).as_os_str().len(), 32);
    }

    #[tokio::test]
    async fn test_write_frame() {
        let dir = tempfile::tempdir().unwrap();
        let pattern =
            CapturePattern::parse(&format!("{}/f%02d.jpg", dir.path().display())).unwrap();

        write_frame(&pattern, 3, b"jpeg").await;
        assert_eq!(std::fs::read(dir.path().join("f03.jpg")).unwrap(), b"jpeg");

        // Missing directory is not fatal
        let missing = CapturePattern::parse("/nonexistent-dir/x%d").unwrap();
        write_frame(&missing, 1, b"jpeg").await;
    }
}
