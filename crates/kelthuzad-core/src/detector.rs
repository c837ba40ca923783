use regex::Regex;

use crate::error::{Error, Result};
use crate::types::Classification;

#[derive(Debug, Clone)]
pub struct FailureDetector {
	regex: Regex,
}

impl FailureDetector {
	pub fn new(pattern: &str) -> Result<Self> {
		let regex = Regex::new(pattern).map_err(|source| Error::Pattern {
			pattern: pattern.to_string(),
			source,
		})?;
		Ok(Self { regex })
	}

	pub fn pattern(&self) -> &str {
		self.regex.as_str()
	}

	pub fn classify(&self, line: &str) -> Classification {
		if self.regex.is_match(line) {
			Classification::Match
		} else {
			Classification::NoMatch
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn classifies_by_regex_search() {
		let detector = FailureDetector::new("FATAL").unwrap();
		assert_eq!(detector.classify("FATAL: oops"), Classification::Match);
		assert_eq!(detector.classify("something FATAL happened"), Classification::Match);
		assert_eq!(detector.classify("info"), Classification::NoMatch);
		assert_eq!(detector.classify(""), Classification::NoMatch);
	}

	#[test]
	fn classification_is_stable() {
		let detector = FailureDetector::new(r"^ERROR \d+$").unwrap();
		for _ in 0..3 {
			assert_eq!(detector.classify("ERROR 500"), Classification::Match);
			assert_eq!(detector.classify("ERROR five"), Classification::NoMatch);
		}
	}

	#[test]
	fn empty_pattern_matches_everything() {
		let detector = FailureDetector::new("").unwrap();
		assert_eq!(detector.classify("info"), Classification::Match);
		assert_eq!(detector.classify(""), Classification::Match);
	}

	#[test]
	fn invalid_pattern_reports_source() {
		let err = FailureDetector::new("(unclosed").unwrap_err();
		assert!(matches!(err, Error::Pattern { .. }));
		assert!(err.to_string().contains("(unclosed"));
	}
}
