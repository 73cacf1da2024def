//! Typed engine failures.
//!
//! Every fallible engine operation surfaces one of these; there is no
//! ambient-exception control flow and no partial success. The caller decides
//! whether to surface, log, or retry with corrected input.

use chrono::NaiveDate;

use crate::calendar::DateInvalidReason;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("invalid trigger date: {0}")]
    InvalidTriggerDate(DateInvalidReason),

    #[error("missing required fields: {}", .0.join(", "))]
    MissingRequiredField(Vec<String>),

    #[error("party count for {role} out of bounds: got {actual}, expected {minimum}..={maximum:?}")]
    PartyCountOutOfBounds {
        role: String,
        minimum: usize,
        maximum: Option<usize>,
        actual: usize,
    },

    #[error("a representing party must be declared")]
    RepresentationRequired,

    #[error("could not resolve target reference {0}")]
    UnresolvedReference(String),

    #[error("no valid date reachable within {limit} days of {base}")]
    UnreachableValidDate { base: NaiveDate, limit: i64 },

    #[error("no valid day visited for backward adjustment from {0}")]
    BackwardAdjustmentImpossible(NaiveDate),

    #[error("deadline {0} has an unsupported type")]
    UnknownDeadlineType(String),

    #[error("unknown action kind")]
    UnknownActionKind,

    #[error("spawn conditions not met for {0}")]
    SpawnConditionUnmet(String),

    #[error("deadline {0} does not allow sub-processes")]
    SpawnNotEnabled(String),

    #[error("dependency cycle among deadlines: {}", .0.join(", "))]
    DependencyCycle(Vec<String>),

    #[error("date not allowed for {target}: {reason}")]
    DateNotAllowed {
        target: String,
        reason: DateInvalidReason,
    },

    #[error("invalid template: {0}")]
    InvalidTemplate(String),
}
