//! Outcomes of resolving a primitive's references.
//!
//! Dangling references and degenerate geometries are expected in real
//! snapshots. Resolvers report them as values instead of errors so the write
//! pass can apply its policy and keep going.

use std::fmt;

use crate::ElementRef;
use crate::element::ElementKind;

/// Deepest relation-in-relation nesting the resolver follows.
pub const MAX_RELATION_DEPTH: usize = 1;

/// Why a resolution lost data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Degradation {
    /// A referenced primitive is missing from the cache.
    DanglingReference { kind: ElementKind, id: u64 },
    /// Fewer than two coordinates remained for a path.
    TooFewPoints { resolved: usize },
    /// Boundary pieces did not close into a ring.
    UnclosedRing { pieces: usize },
    /// A nested relation exceeded [`MAX_RELATION_DEPTH`].
    NestingTooDeep { relation: u64 },
    /// A relation referenced itself or an ancestor.
    Cycle { relation: u64 },
    /// No outer ring could be assembled.
    NoOuterRing,
    /// An inner ring lies outside every outer ring.
    OrphanInnerRing,
}

impl fmt::Display for Degradation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingReference { kind, id } => write!(f, "missing {kind} {id}"),
            Self::TooFewPoints { resolved } => {
                write!(f, "only {resolved} point(s) resolved")
            }
            Self::UnclosedRing { pieces } => {
                write!(f, "{pieces} boundary piece(s) do not close")
            }
            Self::NestingTooDeep { relation } => {
                write!(f, "relation {relation} nested deeper than {MAX_RELATION_DEPTH}")
            }
            Self::Cycle { relation } => write!(f, "relation {relation} references itself"),
            Self::NoOuterRing => f.write_str("no outer ring"),
            Self::OrphanInnerRing => f.write_str("inner ring outside every outer ring"),
        }
    }
}

/// Tagged result of a resolution.
///
/// # Examples
/// ```
/// use geoport_core::{Degradation, Resolution};
///
/// let partial = Resolution::Partial {
///     value: 2,
///     reasons: vec![Degradation::TooFewPoints { resolved: 1 }],
/// };
/// assert_eq!(partial.value(), Some(&2));
/// assert!(!partial.is_full());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<T> {
    /// Every reference resolved.
    Full(T),
    /// A usable value was produced despite lost references.
    Partial { value: T, reasons: Vec<Degradation> },
    /// Nothing usable remained.
    Skipped { reasons: Vec<Degradation> },
}

impl<T> Resolution<T> {
    /// Build a full or partial outcome depending on collected reasons.
    pub fn from_parts(value: T, reasons: Vec<Degradation>) -> Self {
        if reasons.is_empty() {
            Self::Full(value)
        } else {
            Self::Partial { value, reasons }
        }
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Full(value) | Self::Partial { value, .. } => Some(value),
            Self::Skipped { .. } => None,
        }
    }

    /// Reasons recorded for partial and skipped outcomes.
    #[must_use]
    pub fn reasons(&self) -> &[Degradation] {
        match self {
            Self::Full(_) => &[],
            Self::Partial { reasons, .. } | Self::Skipped { reasons } => reasons,
        }
    }

    /// Consume the outcome, returning the usable value if any.
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Full(value) | Self::Partial { value, .. } => Some(value),
            Self::Skipped { .. } => None,
        }
    }

    /// Transform the carried value, keeping the recorded reasons.
    pub fn map<U, F>(self, f: F) -> Resolution<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Self::Full(value) => Resolution::Full(f(value)),
            Self::Partial { value, reasons } => Resolution::Partial {
                value: f(value),
                reasons,
            },
            Self::Skipped { reasons } => Resolution::Skipped { reasons },
        }
    }

    /// Log lost data for `element`, if any was lost.
    pub fn log_degradation(&self, element: ElementRef) {
        match self {
            Self::Full(_) => {}
            Self::Partial { reasons, .. } => {
                log::warn!("Emitting partial {element}: {}", join_reasons(reasons));
            }
            Self::Skipped { reasons } => {
                log::warn!("Skipped {element}: {}", join_reasons(reasons));
            }
        }
    }
}

fn join_reasons(reasons: &[Degradation]) -> String {
    reasons
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
