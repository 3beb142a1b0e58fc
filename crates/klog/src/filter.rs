//! Composable predicates over [`LogEvent`]s.
//!
//! A [`Filter`] decides whether a node's own sinks see an event. Filters are
//! plain data: they serialize, compare, and combine with `&`, `|` and `!`.

use std::ops::{BitAnd, BitOr, Not};

use serde::{Deserialize, Serialize};

use crate::types::{LevelMask, LogEvent, Priority, SourceMask};

/// A boolean predicate over a [`LogEvent`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Accepts everything.
    Always,
    /// Rejects everything.
    Never,
    /// Accepts events whose priority is at least the threshold.
    AtLeastPriority(Priority),
    /// Accepts events whose source bit is set in the mask.
    HasAnySource(SourceMask),
    /// Accepts events whose level bit is set in the mask.
    HasAnyLevel(LevelMask),
    /// Both operands accept.
    And(Box<Filter>, Box<Filter>),
    /// Either operand accepts.
    Or(Box<Filter>, Box<Filter>),
    /// The operand rejects.
    Not(Box<Filter>),
}

impl Filter {
    /// Builds the usual composite: priority threshold, source set, level set.
    #[must_use]
    pub fn standard(priority: Priority, sources: SourceMask, levels: LevelMask) -> Self {
        Self::AtLeastPriority(priority)
            .and(Self::HasAnySource(sources))
            .and(Self::HasAnyLevel(levels))
    }

    /// Evaluates the predicate. Pure and total.
    #[must_use]
    pub fn is_satisfied_by(&self, event: &LogEvent) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::AtLeastPriority(threshold) => event.priority() >= *threshold,
            Self::HasAnySource(mask) => mask.contains(event.source()),
            Self::HasAnyLevel(mask) => mask.contains(event.level()),
            Self::And(one, other) => one.is_satisfied_by(event) && other.is_satisfied_by(event),
            Self::Or(one, other) => one.is_satisfied_by(event) || other.is_satisfied_by(event),
            Self::Not(inner) => !inner.is_satisfied_by(event),
        }
    }

    /// Returns a filter accepting what both accept.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(Box::new(self), Box::new(other))
    }

    /// Returns a filter accepting what either accepts.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(Box::new(self), Box::new(other))
    }
}

impl Default for Filter {
    /// Lowest priority, every source, every level.
    fn default() -> Self {
        Self::standard(Priority::LOWEST, SourceMask::ALL, LevelMask::ALL)
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.and(rhs)
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

impl Not for Filter {
    type Output = Self;

    fn not(self) -> Self {
        Self::Not(Box::new(self))
    }
}

/// `filter == event` is shorthand for `filter.is_satisfied_by(&event)`.
impl PartialEq<LogEvent> for Filter {
    fn eq(&self, event: &LogEvent) -> bool {
        self.is_satisfied_by(event)
    }
}
