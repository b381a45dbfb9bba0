use crate::error::ParseError;
use regex::Regex;
use std::collections::BTreeMap;

/// One candidate pattern with named capture groups
#[derive(Debug, Clone)]
pub struct CandidatePattern {
    name: String,
    regex: Regex,
}

impl CandidatePattern {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, ParseError> {
        let regex = Regex::new(pattern).map_err(|e| ParseError::RegexError {
            pattern: pattern.to_string(),
            error_message: e.to_string(),
        })?;

        if regex.capture_names().flatten().next().is_none() {
            return Err(ParseError::config(
                "patterns",
                format!("Pattern '{}' has no named capture groups", pattern),
            ));
        }

        Ok(Self {
            name: name.into(),
            regex,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Named captures that participated in the match, or `None` if the
    /// pattern did not match or captured nothing
    fn captures(&self, text: &str) -> Option<BTreeMap<String, String>> {
        let captures = self.regex.captures(text)?;
        let fields: BTreeMap<String, String> = self
            .regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                captures
                    .name(name)
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();

        if fields.is_empty() {
            None
        } else {
            Some(fields)
        }
    }
}

/// Self-reordering candidate list.
///
/// Candidates are tried in order and the winner moves to the front, so a
/// file dominated by one dialect variant settles on a single regex attempt
/// per line.
#[derive(Debug, Clone)]
pub struct PatternList {
    candidates: Vec<CandidatePattern>,
}

impl PatternList {
    pub fn new(candidates: Vec<CandidatePattern>) -> Result<Self, ParseError> {
        if candidates.is_empty() {
            return Err(ParseError::config("patterns", "At least one pattern must be specified"));
        }
        Ok(Self { candidates })
    }

    /// Build from raw patterns, naming them by their original position
    pub fn from_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ParseError> {
        let candidates = patterns
            .iter()
            .enumerate()
            .map(|(i, p)| CandidatePattern::new(format!("pattern_{}", i), p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(candidates)
    }

    /// Try every candidate in order; promote the winner to the front
    pub fn match_text(&mut self, text: &str) -> Option<BTreeMap<String, String>> {
        let (index, fields) = self
            .candidates
            .iter()
            .enumerate()
            .find_map(|(i, candidate)| candidate.captures(text).map(|fields| (i, fields)))?;

        if index > 0 {
            self.candidates[..=index].rotate_right(1);
        }

        Some(fields)
    }

    /// Current candidate order, front first
    pub fn order(&self) -> Vec<&str> {
        self.candidates.iter().map(CandidatePattern::name).collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}
