//! Replacement chain
//!
//! A [`Chain`] is the ordered list of replacement rules a filter applies.
//! It is built once from configuration, shared read-only by every request
//! and hands out pooled [`Replacer`]s that carry the per-request state.
//!
//! # Example
//!
//! ```
//! use replace_response_filter::chain::{Chain, Rule};
//!
//! let chain = Chain::new(vec![
//!     Rule::literal("http://", "https://"),
//!     Rule::regex(r"v(\d+)", "version $1").unwrap(),
//! ]);
//!
//! let result = chain.transform(b"see http://example.com/v2");
//! assert_eq!(result.body, b"see https://example.com/version 2");
//! assert_eq!(result.replacements, 2);
//! ```

use std::fmt;
use std::sync::Arc;

use regex::bytes::Regex;

use crate::config::{ConfigError, ReplacementConfig, DEFAULT_MAX_MATCH_SIZE};
use crate::pool::{Pool, Pooled};
use crate::streaming::{LiteralPattern, LiteralStage, RegexStage, Replacer, Stage};

/// What a rule searches for
#[derive(Clone, Debug)]
pub enum Pattern {
    /// Exact byte sequence
    Literal(Arc<LiteralPattern>),
    /// Compiled regular expression, matched against raw bytes
    Regex(Regex),
}

/// One search pattern and its replacement template
#[derive(Clone, Debug)]
pub struct Rule {
    pattern: Pattern,
    template: Arc<[u8]>,
}

impl Rule {
    /// Substring replacement; `replace` is inserted verbatim
    pub fn literal(search: &str, replace: &str) -> Self {
        Self {
            pattern: Pattern::Literal(Arc::new(LiteralPattern::from_string(search))),
            template: Arc::from(replace.as_bytes()),
        }
    }

    /// Regex replacement; `$1`, `${name}` in `replace` expand to groups
    pub fn regex(search_regexp: &str, replace: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Pattern::Regex(Regex::new(search_regexp)?),
            template: Arc::from(replace.as_bytes()),
        })
    }

    /// Validate and compile the replacement at position `index`
    pub fn from_config(index: usize, config: &ReplacementConfig) -> Result<Self, ConfigError> {
        match (config.search.is_empty(), config.search_regexp.is_empty()) {
            (true, true) => Err(ConfigError::MissingSearch { index }),
            (false, false) => Err(ConfigError::ConflictingSearch { index }),
            (false, true) => Ok(Self::literal(&config.search, &config.replace)),
            (true, false) => Self::regex(&config.search_regexp, &config.replace)
                .map_err(|source| ConfigError::InvalidRegex { index, source }),
        }
    }

    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    pub fn template(&self) -> &[u8] {
        &self.template
    }

    fn stage(&self, max_match: usize) -> Stage {
        match &self.pattern {
            Pattern::Literal(pattern) => {
                Stage::Literal(LiteralStage::new(Arc::clone(pattern), Arc::clone(&self.template)))
            }
            Pattern::Regex(regex) => Stage::Regex(RegexStage::new(
                regex.clone(),
                Arc::clone(&self.template),
                max_match,
            )),
        }
    }
}

/// Result of a one-shot transform
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transformed {
    pub body: Vec<u8>,
    pub replacements: usize,
}

impl Transformed {
    /// Whether any rule matched
    pub fn changed(&self) -> bool {
        self.replacements > 0
    }
}

/// Immutable, shareable, ordered list of replacement rules
#[derive(Clone)]
pub struct Chain {
    rules: Arc<[Rule]>,
    max_match_size: usize,
    replacers: Arc<Pool<Replacer>>,
}

impl Chain {
    /// Chain with the default regex lookahead bound
    pub fn new(rules: Vec<Rule>) -> Self {
        Self::build(rules.into(), DEFAULT_MAX_MATCH_SIZE)
    }

    /// Validate and compile configured replacements, in order
    pub fn from_config(replacements: &[ReplacementConfig]) -> Result<Self, ConfigError> {
        if replacements.is_empty() {
            return Err(ConfigError::NoReplacements);
        }

        let rules = replacements
            .iter()
            .enumerate()
            .map(|(index, config)| Rule::from_config(index, config))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self::new(rules))
    }

    /// Change the regex lookahead bound (bytes a regex rule may hold back)
    pub fn with_max_match_size(self, max_match_size: usize) -> Self {
        Self::build(self.rules, max_match_size.max(1))
    }

    fn build(rules: Arc<[Rule]>, max_match_size: usize) -> Self {
        let factory_rules = Arc::clone(&rules);
        let replacers = Pool::new(move || {
            Replacer::new(
                factory_rules
                    .iter()
                    .map(|rule| rule.stage(max_match_size))
                    .collect(),
            )
        });

        Self {
            rules,
            max_match_size,
            replacers: Arc::new(replacers),
        }
    }

    /// A reset transformer for one request; returned to the pool on drop
    pub fn replacer(&self) -> Pooled<Replacer> {
        self.replacers.acquire()
    }

    /// Apply every rule to a complete body
    pub fn transform(&self, input: &[u8]) -> Transformed {
        let mut body = Vec::with_capacity(input.len());
        let replacements = self.transform_into(input, &mut body);
        Transformed { body, replacements }
    }

    /// Apply every rule to a complete body, appending to `out`.
    /// Returns the number of replacements made.
    pub fn transform_into(&self, input: &[u8], out: &mut Vec<u8>) -> usize {
        let mut replacer = self.replacer();
        replacer.transform_all(input, out);
        replacer.replacements()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn max_match_size(&self) -> usize {
        self.max_match_size
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("rules", &self.rules)
            .field("max_match_size", &self.max_match_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_validates_each_rule() {
        let err = Chain::from_config(&[]).unwrap_err();
        assert!(matches!(err, ConfigError::NoReplacements));

        let err = Chain::from_config(&[
            ReplacementConfig::literal("a", "b"),
            ReplacementConfig::default(),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::MissingSearch { index: 1 }));

        let both = ReplacementConfig {
            search: "a".into(),
            search_regexp: "b".into(),
            replace: "c".into(),
        };
        let err = Chain::from_config(&[both]).unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingSearch { index: 0 }));
    }

    #[test]
    fn test_invalid_regex_names_rule() {
        let err = Chain::from_config(&[
            ReplacementConfig::literal("a", "b"),
            ReplacementConfig::literal("c", "d"),
            ReplacementConfig::regex("foo(", "x"),
        ])
        .unwrap_err();

        assert_eq!(err.rule_index(), Some(2));
        assert!(err.to_string().starts_with("replacement 2: "));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_rule_kinds() {
        let chain = Chain::from_config(&[
            ReplacementConfig::literal("a", "b"),
            ReplacementConfig::regex("c+", "d"),
        ])
        .unwrap();

        assert_eq!(chain.len(), 2);
        assert!(matches!(chain.rules()[0].pattern(), Pattern::Literal(_)));
        assert!(matches!(chain.rules()[1].pattern(), Pattern::Regex(_)));
        assert_eq!(chain.rules()[1].template(), b"d");
    }

    #[test]
    fn test_identity_without_matches() {
        let chain = Chain::new(vec![
            Rule::literal("absent", "x"),
            Rule::regex("z{3}", "y").unwrap(),
        ]);
        let input = "nothing to see here, \u{1F980} included".as_bytes();

        let result = chain.transform(input);
        assert_eq!(result.body, input);
        assert!(!result.changed());
    }

    #[test]
    fn test_order_sensitivity() {
        let forward = Chain::new(vec![Rule::literal("A", "B"), Rule::literal("B", "C")]);
        assert_eq!(forward.transform(b"A").body, b"C");

        let reversed = Chain::new(vec![Rule::literal("B", "C"), Rule::literal("A", "B")]);
        assert_eq!(reversed.transform(b"A").body, b"B");
    }

    #[test]
    fn test_regex_capture() {
        let chain = Chain::new(vec![Rule::regex(r"\s+foo(bar|baz)\s+", " foo $1 ").unwrap()]);
        let result = chain.transform(b" foobaz ");

        assert_eq!(result.body, b" foo baz ");
        assert_eq!(result.replacements, 1);
    }

    #[test]
    fn test_literal_template_not_expanded() {
        let chain = Chain::new(vec![Rule::literal("price", "$1")]);
        assert_eq!(chain.transform(b"price: 5").body, b"$1: 5");
    }

    #[test]
    fn test_one_shot_matches_replace_all() {
        let body = b"<p>one</p>\n<p></p>\n<P>three</P> <p>four</p>";
        let cases = [
            (r"<p>(.*?)</p>", "[$1]"),
            (r"(?i)<(/?)p>", "<${1}div>"),
            (r"\s*", "_"),
        ];
        for (pattern, template) in cases {
            let re = Regex::new(pattern).unwrap();
            let expected = re.replace_all(body, template.as_bytes()).into_owned();

            let chain = Chain::new(vec![Rule::regex(pattern, template).unwrap()]);
            assert_eq!(chain.transform(body).body, expected, "{pattern}");
        }
    }

    #[test]
    fn test_one_shot_match_longer_than_lookahead() {
        let chain = Chain::new(vec![Rule::regex("a+", "A").unwrap()]);
        let result = chain.transform(&[b'a'; 3000]);

        assert_eq!(result.body, b"A");
        assert_eq!(result.replacements, 1);
    }

    #[test]
    fn test_one_shot_long_match_after_held_literal_tail() {
        // the literal stage would hold "zz" back while streaming
        let chain = Chain::new(vec![
            Rule::literal("zzz", "q"),
            Rule::regex(r"(?s)<!--.*?-->", "").unwrap(),
        ])
        .with_max_match_size(64);
        let body = format!("<!--{}-->zz", "x".repeat(3000));

        let result = chain.transform(body.as_bytes());
        assert_eq!(result.body, b"zz");
        assert_eq!(result.replacements, 1);
    }

    #[test]
    fn test_non_utf8_body_passes_through() {
        let chain = Chain::new(vec![Rule::literal("ab", "AB")]);
        let body = [0xff, b'a', b'b', 0xc3, 0x28];

        assert_eq!(chain.transform(&body).body, vec![0xff, b'A', b'B', 0xc3, 0x28]);
    }

    #[test]
    fn test_replacers_are_pooled_and_reset() {
        let chain = Chain::new(vec![Rule::literal("hello", "bye")]);
        {
            let mut replacer = chain.replacer();
            let mut out = Vec::new();
            replacer.write(b"hel", &mut out);
            assert_eq!(replacer.pending_len(), 3);
        }

        let replacer = chain.replacer();
        assert_eq!(replacer.pending_len(), 0);
        assert_eq!(replacer.replacements(), 0);
    }

    #[test]
    fn test_shared_across_threads() {
        let chain = Chain::new(vec![
            Rule::literal("cat", "dog"),
            Rule::regex(r"\d+", "#").unwrap(),
        ]);

        std::thread::scope(|s| {
            for i in 0..8 {
                let chain = chain.clone();
                s.spawn(move || {
                    for j in 0..50 {
                        let input = format!("cat {i} cat {j}");
                        assert_eq!(chain.transform(input.as_bytes()).body, b"dog # dog #");
                    }
                });
            }
        });
    }

    #[test]
    fn test_max_match_size_is_at_least_one() {
        let chain = Chain::new(vec![Rule::literal("a", "b")]).with_max_match_size(0);
        assert_eq!(chain.max_match_size(), 1);
    }
}
