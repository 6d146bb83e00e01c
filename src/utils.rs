use std::fs::{self, DirBuilder};
use std::io::Write;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;
use rustc_hash::FxHashSet;
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;

lazy_static! {
    static ref NON_WORD: Regex = Regex::new(r"[^\w\s]").expect("static regex");
    static ref STOP_WORDS: FxHashSet<&'static str> = {
        let words = vec![
            "a", "an", "and", "are", "as", "at", "be", "by", "for", "from",
            "has", "he", "in", "is", "it", "its", "of", "on", "that", "the",
            "to", "was", "were", "will", "with", "what", "which", "who", "how",
            "do", "does", "i", "me", "my", "you", "your", "this", "there",
        ];
        words.into_iter().collect()
    };
}

/// Creates a directory if it doesn't exist
pub fn ensure_dir(path: impl AsRef<Path>) -> std::io::Result<()> {
    DirBuilder::new().recursive(true).create(path)
}

/// Serializes `value` as JSON to `path` via a temp file and rename, so readers
/// never observe a half-written file.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        serde_json::to_writer(&mut file, value).map_err(std::io::Error::other)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

/// NFC-normalizes, lowercases, strips punctuation and drops stop words.
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.nfc().collect::<String>().to_lowercase();
    let text = NON_WORD.replace_all(&text, " ");

    text.split_whitespace()
        .filter(|token| !STOP_WORDS.contains(token))
        .map(|token| token.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_tokenize_drops_punctuation_and_stop_words() {
        let tokens = tokenize("What is Breast-Cancer? It's a disease.");
        assert_eq!(tokens, vec!["breast", "cancer", "s", "disease"]);
    }

    #[test]
    fn test_tokenize_keeps_non_ascii_words() {
        let tokens = tokenize("Meme kanseri nedir? Belirtileri nelerdir?");
        assert_eq!(tokens, vec!["meme", "kanseri", "nedir", "belirtileri", "nelerdir"]);
    }

    #[test]
    fn test_write_json_atomic_replaces_file() -> std::io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("data.json");

        write_json_atomic(&path, &json!({"v": 1}))?;
        write_json_atomic(&path, &json!({"v": 2}))?;

        let raw = fs::read_to_string(&path)?;
        assert_eq!(raw, r#"{"v":2}"#);
        assert!(!path.with_extension("json.tmp").exists());
        Ok(())
    }

    #[test]
    fn test_ensure_dir_is_idempotent() -> std::io::Result<()> {
        let dir = tempdir()?;
        let nested = dir.path().join("a").join("b");
        ensure_dir(&nested)?;
        ensure_dir(&nested)?;
        assert!(nested.is_dir());
        Ok(())
    }
}
