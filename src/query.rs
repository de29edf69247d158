//! Query model for exact and fulltext lookups.
//!
//! Queries are a closed tree of term and boolean nodes. The textual form
//! produced by `Display` parses back to a semantically identical query; the
//! write-ahead log relies on this to persist remove-by-query commands as
//! strings.
//!
//! Syntax: whitespace-separated clauses, `+` marks a required clause,
//! `field:term` qualifies a term, parentheses group, backslash escapes.
//! Unqualified clauses combine with OR semantics, matching what a Lucene
//! query parser does by default.

use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use ahash::{AHashMap, AHashSet};

use crate::analysis::Analyzer;
use crate::error::{MuninnError, Result};

/// The per-field term sets a query is evaluated against.
pub type TermSets = AHashMap<String, AHashSet<String>>;

/// Whether a boolean clause is required or optional.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occur {
    Must,
    Should,
}

/// A query over indexed documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Matches documents whose `field` contains the exact term.
    Term { field: String, term: String },
    /// Combines sub-queries: every `Must` clause has to match, and with no
    /// `Must` clauses at least one `Should` clause has to.
    Boolean { clauses: Vec<(Occur, Query)> },
}

impl Query {
    /// Create a term query.
    pub fn term<F, T>(field: F, term: T) -> Query
    where
        F: Into<String>,
        T: Into<String>,
    {
        Query::Term {
            field: field.into(),
            term: term.into(),
        }
    }

    /// Create a boolean query from explicit clauses.
    pub fn boolean(clauses: Vec<(Occur, Query)>) -> Query {
        Query::Boolean { clauses }
    }

    /// Create a boolean query requiring all of the given sub-queries.
    pub fn must_all(queries: Vec<Query>) -> Query {
        Query::Boolean {
            clauses: queries.into_iter().map(|q| (Occur::Must, q)).collect(),
        }
    }

    /// Create a boolean query matching any of the given sub-queries.
    pub fn any_of(queries: Vec<Query>) -> Query {
        Query::Boolean {
            clauses: queries.into_iter().map(|q| (Occur::Should, q)).collect(),
        }
    }

    /// Evaluate this query against one document's term sets.
    pub fn matches(&self, terms: &TermSets) -> bool {
        match self {
            Query::Term { field, term } => terms
                .get(field.as_str())
                .is_some_and(|set| set.contains(term.as_str())),
            Query::Boolean { clauses } => {
                if clauses.is_empty() {
                    return false;
                }
                let mut has_must = false;
                for (occur, query) in clauses {
                    if *occur == Occur::Must {
                        has_must = true;
                        if !query.matches(terms) {
                            return false;
                        }
                    }
                }
                if has_must {
                    return true;
                }
                clauses
                    .iter()
                    .any(|(occur, query)| *occur == Occur::Should && query.matches(terms))
            }
        }
    }

    /// Parse a query string. Bare terms are taken verbatim.
    pub fn parse(default_field: Option<&str>, input: &str) -> Result<Query> {
        Query::parse_with_analyzer(default_field, input, &Analyzer::Keyword)
    }

    /// Parse a query string, normalizing terms with the given analyzer so
    /// free text matches the tokens the analyzer produced at index time.
    pub fn parse_with_analyzer(
        default_field: Option<&str>,
        input: &str,
        analyzer: &Analyzer,
    ) -> Result<Query> {
        let mut parser = Parser {
            chars: input.chars().peekable(),
            default_field,
            analyzer,
        };
        let query = parser.parse_clauses(false)?;
        match query {
            Some(q) => Ok(q),
            None => Err(MuninnError::query(format!("empty query '{input}'"))),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Term { field, term } => {
                write!(f, "{}:{}", escape(field), escape(term))
            }
            Query::Boolean { clauses } => {
                write!(f, "(")?;
                for (i, (occur, query)) in clauses.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    if *occur == Occur::Must {
                        write!(f, "+")?;
                    }
                    write!(f, "{query}")?;
                }
                write!(f, ")")
            }
        }
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '+' | '(' | ')' | ':' | '\\') || c.is_whitespace() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    default_field: Option<&'a str>,
    analyzer: &'a Analyzer,
}

impl<'a> Parser<'a> {
    /// Parse clauses until end of input or, when `in_group`, a closing paren.
    /// Returns `None` when no clauses were found.
    fn parse_clauses(&mut self, in_group: bool) -> Result<Option<Query>> {
        let mut clauses: Vec<(Occur, Query)> = Vec::new();
        loop {
            self.skip_whitespace();
            match self.chars.peek() {
                None => {
                    if in_group {
                        return Err(MuninnError::query("unbalanced parentheses"));
                    }
                    break;
                }
                Some(')') => {
                    if !in_group {
                        return Err(MuninnError::query("unbalanced parentheses"));
                    }
                    self.chars.next();
                    break;
                }
                Some(_) => {
                    clauses.push(self.parse_clause()?);
                }
            }
        }

        match clauses.len() {
            0 => Ok(None),
            1 if clauses[0].0 == Occur::Should => Ok(Some(clauses.remove(0).1)),
            _ => Ok(Some(Query::Boolean { clauses })),
        }
    }

    fn parse_clause(&mut self) -> Result<(Occur, Query)> {
        let occur = if self.chars.peek() == Some(&'+') {
            self.chars.next();
            Occur::Must
        } else {
            Occur::Should
        };

        if self.chars.peek() == Some(&'(') {
            self.chars.next();
            let inner = self.parse_clauses(true)?;
            let query = inner.ok_or_else(|| MuninnError::query("empty group"))?;
            return Ok((occur, query));
        }

        let first = self.read_word()?;
        if self.chars.peek() == Some(&':') {
            self.chars.next();
            let term = self.read_word()?;
            let term = self.analyzer.normalize(&term);
            Ok((occur, Query::term(first, term)))
        } else {
            let field = self.default_field.ok_or_else(|| {
                MuninnError::query(format!("term '{first}' has no field and no default field"))
            })?;
            let term = self.analyzer.normalize(&first);
            Ok((occur, Query::term(field, term)))
        }
    }

    /// Read an escaped word up to the next unescaped meta character.
    fn read_word(&mut self) -> Result<String> {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            match c {
                '\\' => {
                    self.chars.next();
                    match self.chars.next() {
                        Some(escaped) => word.push(escaped),
                        None => return Err(MuninnError::query("dangling escape")),
                    }
                }
                '(' | ')' | ':' | '+' => break,
                _ if c.is_whitespace() => break,
                _ => {
                    self.chars.next();
                    word.push(c);
                }
            }
        }
        if word.is_empty() {
            return Err(MuninnError::query("empty term"));
        }
        Ok(word)
    }

    fn skip_whitespace(&mut self) {
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn terms_of(pairs: &[(&str, &[&str])]) -> TermSets {
        let mut map = TermSets::new();
        for (field, terms) in pairs {
            map.insert(
                field.to_string(),
                terms.iter().map(|t| t.to_string()).collect(),
            );
        }
        map
    }

    #[test]
    fn test_term_matching() {
        let terms = terms_of(&[("name", &["alice"])]);
        assert!(Query::term("name", "alice").matches(&terms));
        assert!(!Query::term("name", "bob").matches(&terms));
        assert!(!Query::term("title", "alice").matches(&terms));
    }

    #[test]
    fn test_boolean_must_and_should() {
        let terms = terms_of(&[("name", &["alice"]), ("city", &["lund"])]);

        let both = Query::must_all(vec![
            Query::term("name", "alice"),
            Query::term("city", "lund"),
        ]);
        assert!(both.matches(&terms));

        let one_wrong = Query::must_all(vec![
            Query::term("name", "alice"),
            Query::term("city", "malmo"),
        ]);
        assert!(!one_wrong.matches(&terms));

        let any = Query::any_of(vec![
            Query::term("name", "bob"),
            Query::term("city", "lund"),
        ]);
        assert!(any.matches(&terms));

        assert!(!Query::Boolean { clauses: vec![] }.matches(&terms));
    }

    #[test]
    fn test_parse_simple() {
        let q = Query::parse(Some("body"), "quick").unwrap();
        assert_eq!(q, Query::term("body", "quick"));

        let q = Query::parse(None, "name:alice").unwrap();
        assert_eq!(q, Query::term("name", "alice"));
    }

    #[test]
    fn test_parse_free_text_is_or() {
        let q = Query::parse(Some("body"), "quick brown").unwrap();
        assert_eq!(
            q,
            Query::any_of(vec![
                Query::term("body", "quick"),
                Query::term("body", "brown"),
            ])
        );
    }

    #[test]
    fn test_parse_must_clauses() {
        let q = Query::parse(None, "+name:alice +city:lund").unwrap();
        assert_eq!(
            q,
            Query::must_all(vec![
                Query::term("name", "alice"),
                Query::term("city", "lund"),
            ])
        );
    }

    #[test]
    fn test_parse_with_analyzer_normalizes() {
        let q =
            Query::parse_with_analyzer(Some("body"), "QUICK", &Analyzer::LowercaseWhitespace)
                .unwrap();
        assert_eq!(q, Query::term("body", "quick"));
    }

    #[test]
    fn test_display_parse_roundtrip() {
        let queries = vec![
            Query::term("name", "alice"),
            Query::term("name", "two words"),
            Query::must_all(vec![
                Query::term("_id_", "17"),
                Query::term("key_e", "a:b(c)"),
            ]),
            Query::any_of(vec![
                Query::term("body", "quick"),
                Query::must_all(vec![
                    Query::term("body", "brown"),
                    Query::term("body", "fox"),
                ]),
            ]),
        ];
        for query in queries {
            let text = query.to_string();
            let parsed = Query::parse(None, &text).unwrap();
            assert_eq!(parsed, query, "round-trip failed for '{text}'");
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(Query::parse(None, "").is_err());
        assert!(Query::parse(None, "(name:alice").is_err());
        assert!(Query::parse(None, "orphan").is_err());
        assert!(Query::parse(Some("f"), "term\\").is_err());
    }
}
