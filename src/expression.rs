//! The fixed vocabulary of facial expressions driving scene-item visibility.
//!
//! Labels arriving from the classifier are free-form strings; scene items in
//! OBS are named by the operator. Both sides are matched against this closed
//! set through [`Expression::parse`], which folds case and trims whitespace.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the seven expressions the classifier can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Expression {
    Neutral,
    Happy,
    Sad,
    Surprised,
    Fearful,
    Disgusted,
    Angry,
}

impl Expression {
    /// All expressions, in classifier output order.
    pub const ALL: [Expression; 7] = [
        Expression::Neutral,
        Expression::Happy,
        Expression::Sad,
        Expression::Surprised,
        Expression::Fearful,
        Expression::Disgusted,
        Expression::Angry,
    ];

    /// Canonicalize a label into an expression.
    ///
    /// Matching is a case-insensitive exact match on the trimmed label, so
    /// `"Happy"`, `" happy "` and `"HAPPY"` all resolve to [`Expression::Happy`].
    /// Anything outside the vocabulary returns `None`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "neutral" => Some(Expression::Neutral),
            "happy" => Some(Expression::Happy),
            "sad" => Some(Expression::Sad),
            "surprised" => Some(Expression::Surprised),
            "fearful" => Some(Expression::Fearful),
            "disgusted" => Some(Expression::Disgusted),
            "angry" => Some(Expression::Angry),
            _ => None,
        }
    }

    /// Lowercase canonical form, matching the classifier's label strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Expression::Neutral => "neutral",
            Expression::Happy => "happy",
            Expression::Sad => "sad",
            Expression::Surprised => "surprised",
            Expression::Fearful => "fearful",
            Expression::Disgusted => "disgusted",
            Expression::Angry => "angry",
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_labels() {
        assert_eq!(Expression::parse("happy"), Some(Expression::Happy));
        assert_eq!(Expression::parse("neutral"), Some(Expression::Neutral));
        assert_eq!(Expression::parse("angry"), Some(Expression::Angry));
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(Expression::parse("Happy"), Some(Expression::Happy));
        assert_eq!(Expression::parse("SURPRISED"), Some(Expression::Surprised));
        assert_eq!(Expression::parse("dIsGuStEd"), Some(Expression::Disgusted));
    }

    #[test]
    fn parse_trims_whitespace() {
        assert_eq!(Expression::parse("  sad \n"), Some(Expression::Sad));
    }

    #[test]
    fn unknown_labels_are_rejected() {
        assert_eq!(Expression::parse("grumpy"), None);
        assert_eq!(Expression::parse(""), None);
        assert_eq!(Expression::parse("happy!"), None);
    }

    #[test]
    fn all_round_trips_through_parse() {
        for expr in Expression::ALL {
            assert_eq!(Expression::parse(expr.as_str()), Some(expr));
        }
    }
}
