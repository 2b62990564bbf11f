//! Topic labels for chat transcripts
//!
//! Rules are evaluated top to bottom against the lowercased question; the
//! first rule with any matching pattern wins.

use regex::{Regex, RegexBuilder};

use crate::config::TopicRuleConfig;
use crate::error::{LexError, Result};

/// Built-in rules, most specific first
const DEFAULT_RULES: &[(&str, &[&str])] = &[
    ("fria", &["fria", "fundamental rights impact"]),
    (
        "prohibited",
        &[
            "prohibited",
            r"\bbann?ed\b",
            r"article 5\b",
            "social scoring",
            "subliminal",
            "emotion recognition",
        ],
    ),
    (
        "gpai",
        &[
            "gpai",
            r"general[- ]purpose",
            "foundation model",
            "systemic risk",
            r"article 5[1-5]\b",
        ],
    ),
    (
        "high-risk",
        &[r"high[- ]risk", r"annex iii\b", r"article 6\b", "conformity assessment"],
    ),
    (
        "transparency",
        &["transparen", "deepfake", "chatbot", r"article 50\b", "watermark"],
    ),
    ("literacy", &["ai literacy", r"article 4\b"]),
    (
        "penalties",
        &[r"penalt", r"\bfines?\b", "sanction", r"article 99\b"],
    ),
    ("sandbox", &["sandbox"]),
    (
        "timeline",
        &["deadline", "timeline", "enter into force", "entry into force", r"\b202[4-9]\b"],
    ),
    (
        "roles",
        &[
            "provider",
            "deployer",
            "importer",
            "distributor",
            "authori[sz]ed representative",
        ],
    ),
];

/// A label and the patterns that select it
#[derive(Debug, Clone)]
pub struct TopicRule {
    label: String,
    patterns: Vec<Regex>,
}

impl TopicRule {
    pub fn new<S: AsRef<str>>(label: &str, patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p.as_ref())
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        LexError::Config(format!("Invalid pattern for topic '{label}': {e}"))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            label: label.to_string(),
            patterns,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn matches(&self, text: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(text))
    }
}

/// Ordered first-match classifier
#[derive(Debug, Clone)]
pub struct TopicClassifier {
    rules: Vec<TopicRule>,
}

impl TopicClassifier {
    pub fn new(rules: Vec<TopicRule>) -> Self {
        Self { rules }
    }

    /// Built-in rules for questions about the regulation
    pub fn with_default_rules() -> Result<Self> {
        let rules = DEFAULT_RULES
            .iter()
            .map(|&(label, patterns)| TopicRule::new(label, patterns))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Configured rules, or the built-in ones when none are configured
    pub fn from_config(rules: &[TopicRuleConfig]) -> Result<Self> {
        if rules.is_empty() {
            return Self::with_default_rules();
        }
        let rules = rules
            .iter()
            .map(|rule| TopicRule::new(&rule.label, &rule.patterns))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Label of the first matching rule
    pub fn classify(&self, question: &str) -> Option<&str> {
        let lowered = question.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.matches(&lowered))
            .map(TopicRule::label)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classifier() -> TopicClassifier {
        TopicClassifier::with_default_rules().unwrap()
    }

    #[test]
    fn test_fria_question() {
        assert_eq!(
            classifier().classify("What are my FRIA obligations?"),
            Some("fria")
        );
    }

    #[test]
    fn test_default_labels() {
        let c = classifier();
        assert_eq!(c.classify("Is social scoring banned?"), Some("prohibited"));
        assert_eq!(c.classify("Which GPAI models have systemic risk?"), Some("gpai"));
        assert_eq!(c.classify("Is my CV screening tool high-risk?"), Some("high-risk"));
        assert_eq!(c.classify("Do I need to label a deepfake?"), Some("transparency"));
        assert_eq!(c.classify("How large are the fines?"), Some("penalties"));
        assert_eq!(c.classify("When does this apply, 2026?"), Some("timeline"));
        assert_eq!(c.classify("Am I a deployer?"), Some("roles"));
    }

    #[test]
    fn test_no_match() {
        assert_eq!(classifier().classify("Hello there"), None);
    }

    #[test]
    fn test_word_boundaries() {
        // "define" must not count as a fine
        assert_eq!(classifier().classify("How do you define AI?"), None);
    }

    #[test]
    fn test_first_rule_wins() {
        // Mentions both a FRIA and high-risk systems
        assert_eq!(
            classifier().classify("Does a high-risk deployer need a FRIA?"),
            Some("fria")
        );

        let c = TopicClassifier::new(vec![
            TopicRule::new("first", &["risk"]).unwrap(),
            TopicRule::new("second", &["high-risk"]).unwrap(),
        ]);
        assert_eq!(c.classify("high-risk"), Some("first"));
    }

    #[test]
    fn test_case_insensitive_patterns() {
        let c = TopicClassifier::new(vec![TopicRule::new("annex", &["ANNEX"]).unwrap()]);
        assert_eq!(c.classify("annex i"), Some("annex"));
    }

    #[test]
    fn test_from_config() {
        let rules = vec![TopicRuleConfig {
            label: "custom".to_string(),
            patterns: vec!["biometric".to_string()],
        }];
        let c = TopicClassifier::from_config(&rules).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(c.classify("Biometric categorisation?"), Some("custom"));

        let defaults = TopicClassifier::from_config(&[]).unwrap();
        assert_eq!(defaults.len(), DEFAULT_RULES.len());
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let result = TopicRule::new("broken", &["("]);
        assert!(matches!(result, Err(LexError::Config(_))));
    }
}
