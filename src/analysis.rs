//! Text analysis strategies for index fields.
//!
//! Exact fields go through [`Analyzer::Keyword`], which keeps the whole value
//! as a single token. Fulltext fields are tokenized on whitespace, optionally
//! case-folded. Analyzers are resolved by name from per-index configuration;
//! an unknown name is a configuration error at first resolution.

use crate::error::{MuninnError, Result};

/// Configured analyzer name for the keyword strategy.
pub const KEYWORD: &str = "keyword";
/// Configured analyzer name for the whitespace strategy.
pub const WHITESPACE: &str = "whitespace";
/// Configured analyzer name for the case-folding whitespace strategy.
pub const LOWERCASE_WHITESPACE: &str = "lowercase-whitespace";

/// A tokenization strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Analyzer {
    /// The entire input is a single token, matched exactly as provided.
    Keyword,
    /// Split on whitespace, keeping the original case.
    Whitespace,
    /// Split on whitespace and lowercase every token.
    LowercaseWhitespace,
}

impl Analyzer {
    /// Resolve an analyzer from per-index configuration.
    ///
    /// `name` is the configured analyzer name, if any; without one the
    /// `to_lower_case` flag picks between the two whitespace strategies.
    pub fn resolve(name: Option<&str>, to_lower_case: bool) -> Result<Analyzer> {
        match name {
            Some(KEYWORD) => Ok(Analyzer::Keyword),
            Some(WHITESPACE) => Ok(Analyzer::Whitespace),
            Some(LOWERCASE_WHITESPACE) => Ok(Analyzer::LowercaseWhitespace),
            Some(other) => Err(MuninnError::configuration(format!(
                "unknown analyzer '{other}'"
            ))),
            None => Ok(if to_lower_case {
                Analyzer::LowercaseWhitespace
            } else {
                Analyzer::Whitespace
            }),
        }
    }

    /// Tokenize the given text.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        match self {
            Analyzer::Keyword => {
                if text.is_empty() {
                    Vec::new()
                } else {
                    vec![text.to_string()]
                }
            }
            Analyzer::Whitespace => text.split_whitespace().map(str::to_string).collect(),
            Analyzer::LowercaseWhitespace => text
                .split_whitespace()
                .map(|word| word.to_lowercase())
                .collect(),
        }
    }

    /// Normalize a single query term the way indexed tokens were normalized.
    pub fn normalize(&self, term: &str) -> String {
        match self {
            Analyzer::LowercaseWhitespace => term.to_lowercase(),
            _ => term.to_string(),
        }
    }

    /// Get the name of this analyzer (for configuration and debugging).
    pub fn name(&self) -> &'static str {
        match self {
            Analyzer::Keyword => KEYWORD,
            Analyzer::Whitespace => WHITESPACE,
            Analyzer::LowercaseWhitespace => LOWERCASE_WHITESPACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_analyzer() {
        let tokens = Analyzer::Keyword.analyze("Hello World Test");
        assert_eq!(tokens, vec!["Hello World Test"]);
        assert!(Analyzer::Keyword.analyze("").is_empty());
    }

    #[test]
    fn test_whitespace_analyzer() {
        let tokens = Analyzer::Whitespace.analyze("hello  World\ttest");
        assert_eq!(tokens, vec!["hello", "World", "test"]);
    }

    #[test]
    fn test_lowercase_whitespace_analyzer() {
        let tokens = Analyzer::LowercaseWhitespace.analyze("The Quick Brown FOX");
        assert_eq!(tokens, vec!["the", "quick", "brown", "fox"]);
    }

    #[test]
    fn test_resolution() {
        assert_eq!(
            Analyzer::resolve(Some("keyword"), true).unwrap(),
            Analyzer::Keyword
        );
        assert_eq!(
            Analyzer::resolve(None, true).unwrap(),
            Analyzer::LowercaseWhitespace
        );
        assert_eq!(
            Analyzer::resolve(None, false).unwrap(),
            Analyzer::Whitespace
        );
        assert!(Analyzer::resolve(Some("stemming"), true).is_err());
    }
}
