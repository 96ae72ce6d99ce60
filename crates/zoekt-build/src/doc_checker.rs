use std::collections::HashSet;
use std::fmt;

/// Reasons a document's content is not indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    TooSmall,
    Binary(usize),
    TooManyTrigrams(usize),
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::TooSmall => write!(f, "file size smaller than 3"),
            CheckError::Binary(off) => write!(f, "binary data at byte offset {}", off),
            CheckError::TooManyTrigrams(max) => write!(f, "number of trigrams exceeds {}", max),
        }
    }
}

impl std::error::Error for CheckError {}

/// Content heuristics applied to every document before it is buffered.
/// Reuses its trigram set between calls.
#[derive(Debug, Default)]
pub struct DocChecker {
    trigrams: HashSet<[char; 3]>,
}

impl DocChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(
        &mut self,
        content: &[u8],
        max_trigrams: usize,
        allow_large_file: bool,
    ) -> Result<(), CheckError> {
        if content.is_empty() {
            return Ok(());
        }
        if content.len() < 3 {
            return Err(CheckError::TooSmall);
        }
        // a NUL in the very first byte is not treated as binary
        if let Some(off) = content.iter().position(|&b| b == 0).filter(|&off| off > 0) {
            return Err(CheckError::Binary(off));
        }
        // every byte position starts at most one trigram
        if allow_large_file || content.len() - 2 <= max_trigrams {
            return Ok(());
        }

        self.trigrams.clear();
        let text = String::from_utf8_lossy(content);
        let mut window = ['\0'; 3];
        for (i, c) in text.chars().enumerate() {
            window = [window[1], window[2], c];
            if i < 2 {
                continue;
            }
            self.trigrams.insert(window);
            if self.trigrams.len() > max_trigrams {
                return Err(CheckError::TooManyTrigrams(max_trigrams));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_and_empty() {
        let mut c = DocChecker::new();
        assert!(c.check(b"", 10, false).is_ok());
        assert_eq!(c.check(b"ab", 10, false), Err(CheckError::TooSmall));
        assert!(c.check(b"abc", 10, false).is_ok());
    }

    #[test]
    fn binary_offset_is_reported() {
        let mut c = DocChecker::new();
        let err = c.check(b"abc\0def", 100, true).unwrap_err();
        assert_eq!(err.to_string(), "binary data at byte offset 3");
    }

    #[test]
    fn leading_nul_is_not_binary() {
        let mut c = DocChecker::new();
        assert!(c.check(b"\0abcdef", 100, false).is_ok());
        assert_eq!(c.check(b"\0ab\0cd", 100, false), Err(CheckError::Binary(3)));
    }

    #[test]
    fn trigram_limit() {
        let mut c = DocChecker::new();
        // 26 distinct trigrams
        let content = b"abcdefghijklmnopqrstuvwxyzab";
        assert_eq!(
            c.check(content, 10, false),
            Err(CheckError::TooManyTrigrams(10))
        );
        assert!(c.check(content, 10, true).is_ok());
        assert!(c.check(content, 26, false).is_ok());
        // long but repetitive content stays under the limit
        assert!(c.check(&b"ab".repeat(1000), 10, false).is_ok());
    }
}
