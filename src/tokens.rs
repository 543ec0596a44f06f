//! Token estimation for the input-side metadata display.

/// Estimates how many model tokens a string occupies.
///
/// `None` means "no estimate"; callers show nothing rather than failing.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> Option<usize>;
}

/// Split text into words, punctuation and whitespace runs of length one.
pub fn tokenize(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;

    for (i, ch) in text.char_indices() {
        if ch.is_whitespace() || ch.is_ascii_punctuation() {
            if let Some(s) = start.take() {
                tokens.push(&text[s..i]);
            }
            tokens.push(&text[i..i + ch.len_utf8()]);
        } else if start.is_none() {
            start = Some(i);
        }
    }

    if let Some(s) = start {
        tokens.push(&text[s..]);
    }

    tokens
}

/// Word/punctuation heuristic: every punctuation mark is a token, every
/// word costs one token per `chars_per_token` characters (rounded up).
/// Whitespace is free.
#[derive(Debug, Clone)]
pub struct WordPieceEstimator {
    pub chars_per_token: usize,
}

impl Default for WordPieceEstimator {
    fn default() -> Self {
        WordPieceEstimator { chars_per_token: 4 }
    }
}

impl TokenEstimator for WordPieceEstimator {
    fn estimate(&self, text: &str) -> Option<usize> {
        if self.chars_per_token == 0 {
            return None;
        }
        let count = tokenize(text)
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .map(|t| t.chars().count().div_ceil(self.chars_per_token))
            .sum();
        Some(count)
    }
}
