//! Relative reference paths.
//!
//! A reference path is written relative to the node that declares it:
//!
//! - `.value` reads `value` on the same node
//! - `..value` ascends one level, then reads `value` on the parent
//! - `...model.width` ascends two levels, then descends into `model.width`
//! - `.` is the declaring node itself
//!
//! An empty segment between two names (`.a..b`) is an ascent taken mid-path, so
//! `.a..b` is equivalent to `.b` when `a` is a child node.
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use crate::error::LatticeError;

pub const PATH_SEP: char = '.';

/// One navigation unit of a [RefPath].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Step {
    Ascend,
    Descend(String),
}

impl Display for Step {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Ascend => write!(f, "^"),
            Step::Descend(name) => write!(f, "{name}"),
        }
    }
}

/// A parsed relative path. Immutable once parsed; the original string is kept for
/// display and for cycle bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RefPath {
    raw: String,
    steps: Vec<Step>,
}

impl RefPath {
    pub fn parse(path: &str) -> Result<RefPath, LatticeError> {
        let invalid = |reason: &str| LatticeError::InvalidReference {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        let Some(rest) = path.strip_prefix(PATH_SEP) else {
            return Err(invalid("reference paths must start with '.'"));
        };

        let mut steps = Vec::new();
        let mut chars = rest;
        while let Some(stripped) = chars.strip_prefix(PATH_SEP) {
            steps.push(Step::Ascend);
            chars = stripped;
        }
        if chars.is_empty() {
            return Ok(RefPath {
                raw: path.to_string(),
                steps,
            });
        }

        let segments = chars.split(PATH_SEP).collect::<Vec<_>>();
        if segments.last().is_some_and(|s| s.is_empty()) {
            return Err(invalid("trailing '.' after a field name"));
        }
        for segment in segments {
            if segment.is_empty() {
                steps.push(Step::Ascend);
            } else if segment.chars().any(char::is_whitespace) {
                return Err(invalid("field names may not contain whitespace"));
            } else {
                steps.push(Step::Descend(segment.to_string()));
            }
        }
        tracing::trace!("RefPath::parse: turned '{}' into {:?}", path, steps);
        Ok(RefPath {
            raw: path.to_string(),
            steps,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of leading ascents before the first descent.
    pub fn leading_ascents(&self) -> usize {
        self.steps
            .iter()
            .take_while(|s| matches!(s, Step::Ascend))
            .count()
    }

    /// Field names descended through, in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match s {
            Step::Descend(name) => Some(name.as_str()),
            Step::Ascend => None,
        })
    }

    /// True for `.`, which resolves to the owning node.
    pub fn is_self(&self) -> bool {
        self.steps.is_empty()
    }
}

impl FromStr for RefPath {
    type Err = LatticeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RefPath::parse(s)
    }
}

impl TryFrom<String> for RefPath {
    type Error = LatticeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RefPath::parse(&value)
    }
}

impl From<RefPath> for String {
    fn from(path: RefPath) -> String {
        path.raw
    }
}

impl Display for RefPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}
