//! Tokenizer capability used by the epoch driver.
//!
//! The driver only needs two things from a tokenizer: encoding the media
//! placeholder literal and knowing the padding id. [`HfTokenizer`] adapts a
//! HuggingFace `tokenizer.json`.

use std::path::Path;

use crate::error::TrainError;

/// Minimal tokenizer interface.
pub trait Tokenizer {
    /// Encode `text` to token ids.
    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>>;

    /// Id of the padding token.
    fn pad_token_id(&self) -> u32;
}

/// Resolve the media placeholder to a single token id.
///
/// Uses the last id of the encoding without special tokens, so tokenizers
/// that prepend a space marker still yield the placeholder itself.
pub fn media_token_id<T: Tokenizer + ?Sized>(tokenizer: &T, media_token: &str) -> Result<u32, TrainError> {
    let ids = tokenizer
        .encode(media_token, false)
        .map_err(TrainError::Tokenizer)?;
    ids.last()
        .copied()
        .ok_or_else(|| TrainError::MediaToken(media_token.to_string()))
}

/// Tokenizer backed by the HuggingFace `tokenizers` crate.
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
    pad_token_id: u32,
}

impl HfTokenizer {
    /// Load a tokenizer from a `tokenizer.json` file.
    ///
    /// The pad id comes from `pad_token` if given. Otherwise it comes from the
    /// tokenizer's padding params, and failing that from common pad/eos token
    /// names.
    pub fn from_file(path: &Path, pad_token: Option<&str>) -> anyhow::Result<Self> {
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer from {}: {e}", path.display()))?;

        let pad_token_id = match pad_token {
            Some(tok) => inner
                .token_to_id(tok)
                .ok_or_else(|| anyhow::anyhow!("Pad token {tok:?} not in vocabulary"))?,
            None => inner
                .get_padding()
                .map(|p| p.pad_id)
                .or_else(|| inner.token_to_id("<pad>"))
                .or_else(|| inner.token_to_id("[PAD]"))
                .or_else(|| inner.token_to_id("<|pad|>"))
                .or_else(|| inner.token_to_id("</s>"))
                .or_else(|| inner.token_to_id("<|endoftext|>"))
                .ok_or_else(|| anyhow::anyhow!("No pad token found in {}", path.display()))?,
        };

        tracing::debug!(path = %path.display(), pad_token_id, "Loaded tokenizer");
        Ok(Self { inner, pad_token_id })
    }

    /// Get the underlying tokenizer.
    pub fn inner(&self) -> &tokenizers::Tokenizer {
        &self.inner
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str, add_special_tokens: bool) -> anyhow::Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, add_special_tokens)
            .map_err(|e| anyhow::anyhow!("Failed to encode {text:?}: {e}"))?;
        Ok(encoding.get_ids().to_vec())
    }

    fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::MockTokenizer;

    #[test]
    fn test_media_token_id_takes_last() {
        let mut tok = MockTokenizer::new(0);
        tok.add_encoding("<image>", vec![29871, 32000]);
        assert_eq!(media_token_id(&tok, "<image>").unwrap(), 32000);
    }

    #[test]
    fn test_media_token_id_empty_encoding() {
        let mut tok = MockTokenizer::new(0);
        tok.add_encoding("<image>", vec![]);
        let err = media_token_id(&tok, "<image>").unwrap_err();
        assert!(matches!(err, TrainError::MediaToken(ref t) if t == "<image>"));
    }

    #[test]
    fn test_media_token_id_unknown_text() {
        let tok = MockTokenizer::new(0);
        let err = media_token_id(&tok, "<video>").unwrap_err();
        assert!(matches!(err, TrainError::Tokenizer(_)));
    }

    /// Whitespace-split word-level tokenizer over a tiny vocabulary.
    fn write_word_level(dir: &Path) -> std::path::PathBuf {
        let json = r#"{
  "version": "1.0",
  "truncation": null,
  "padding": null,
  "added_tokens": [],
  "normalizer": null,
  "pre_tokenizer": {"type": "WhitespaceSplit"},
  "post_processor": null,
  "decoder": null,
  "model": {
    "type": "WordLevel",
    "vocab": {"<pad>": 0, "<image>": 1, "a": 2, "cat": 3, "</s>": 4, "[UNK]": 5},
    "unk_token": "[UNK]"
  }
}"#;
        let path = dir.join("tokenizer.json");
        std::fs::write(&path, json).unwrap();
        path
    }

    #[test]
    fn test_hf_tokenizer_word_level() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = write_word_level(dir.path());

        let tok = HfTokenizer::from_file(&path, None).unwrap();
        assert_eq!(tok.pad_token_id(), 0);
        assert_eq!(tok.encode("<image> a cat", false).unwrap(), vec![1, 2, 3]);
        assert_eq!(tok.encode("a dog", false).unwrap(), vec![2, 5]);
        assert_eq!(media_token_id(&tok, "<image>").unwrap(), 1);

        let tok = HfTokenizer::from_file(&path, Some("</s>")).unwrap();
        assert_eq!(tok.pad_token_id(), 4);

        assert!(HfTokenizer::from_file(&path, Some("<nope>")).is_err());
    }

    #[test]
    fn test_hf_tokenizer_missing_file() {
        let result = HfTokenizer::from_file(Path::new("/nonexistent/tokenizer.json"), None);
        assert!(result.is_err());
    }
}
