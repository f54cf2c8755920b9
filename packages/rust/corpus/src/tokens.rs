//! Token estimation for chunk budgets.

use std::fmt;
#[cfg(feature = "hf-tokenizer")]
use std::sync::Arc;

use tracing::warn;

use schemalib_shared::CorpusConfig;

/// Characters per token for the heuristic estimate.
const CHARS_PER_TOKEN: usize = 4;

/// Counts tokens in a text. Every variant is deterministic.
#[derive(Clone, Default)]
pub enum TokenEstimator {
    /// `chars / 4`, rounded down.
    #[default]
    Heuristic,
    /// Exact count from a HuggingFace tokenizer definition.
    #[cfg(feature = "hf-tokenizer")]
    Exact(Arc<tokenizers::Tokenizer>),
}

impl TokenEstimator {
    /// The exact estimator when a tokenizer file is configured and loads,
    /// otherwise the heuristic.
    pub fn from_config(config: &CorpusConfig) -> Self {
        let Some(path) = &config.tokenizer_file else {
            return Self::Heuristic;
        };

        #[cfg(feature = "hf-tokenizer")]
        {
            match tokenizers::Tokenizer::from_file(path) {
                Ok(tokenizer) => return Self::Exact(Arc::new(tokenizer)),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "tokenizer failed to load, using heuristic");
                }
            }
        }
        #[cfg(not(feature = "hf-tokenizer"))]
        warn!(
            path = %path.display(),
            "tokenizer file configured but built without hf-tokenizer, using heuristic"
        );

        Self::Heuristic
    }

    pub fn estimate(&self, text: &str) -> usize {
        match self {
            Self::Heuristic => heuristic(text),
            #[cfg(feature = "hf-tokenizer")]
            Self::Exact(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(e) => {
                    warn!(error = %e, "tokenizer failed on input, using heuristic");
                    heuristic(text)
                }
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Heuristic => "heuristic",
            #[cfg(feature = "hf-tokenizer")]
            Self::Exact(_) => "exact",
        }
    }
}

impl fmt::Debug for TokenEstimator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenEstimator({})", self.name())
    }
}

fn heuristic(text: &str) -> usize {
    text.chars().count() / CHARS_PER_TOKEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_counts_chars_not_bytes() {
        let estimator = TokenEstimator::Heuristic;
        assert_eq!(estimator.estimate(""), 0);
        assert_eq!(estimator.estimate("abc"), 0);
        assert_eq!(estimator.estimate("abcdefgh"), 2);
        assert_eq!(estimator.estimate("éééé"), 1);
    }

    #[test]
    fn missing_tokenizer_falls_back() {
        let config = CorpusConfig {
            tokenizer_file: Some("/nonexistent/tokenizer.json".into()),
            ..CorpusConfig::default()
        };
        assert_eq!(TokenEstimator::from_config(&config).name(), "heuristic");
        assert_eq!(TokenEstimator::from_config(&CorpusConfig::default()).name(), "heuristic");
    }
}
