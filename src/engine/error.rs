use ulid::Ulid;

use crate::model::{Ms, Span};

use super::conflict::Conflict;

#[derive(Debug)]
pub enum EngineError {
    /// `end <= start`.
    InvalidInterval { start: Ms, end: Ms },
    /// Candidate window collides with a non-cancelled record on the same reactor.
    Overlap(Conflict),
    /// A Confirmed log already holds (or touches) the candidate window.
    ConfirmedExclusivity { existing: Ulid, span: Span },
    /// Maintenance must start strictly after now.
    PastScheduling { start: Ms, now: Ms },
    /// Confirmed commitments and cancelled/elapsed windows cannot change.
    Immutable { id: Ulid, reason: &'static str },
    /// Only Proposed and Confirmed commitments can be created.
    InvalidStatus(&'static str),
    NotFound(String),
    AlreadyExists(String),
    HasDependents(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// SQLSTATE the wire layer reports for this error.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. }
            | EngineError::PastScheduling { .. }
            | EngineError::InvalidStatus(_) => "22023",
            EngineError::Overlap(_) => "23P01",
            EngineError::ConfirmedExclusivity { .. } | EngineError::AlreadyExists(_) => "23505",
            EngineError::Immutable { .. } => "55000",
            EngineError::NotFound(_) => "P0002",
            EngineError::HasDependents(_) => "23503",
            EngineError::LimitExceeded(_) => "54000",
            EngineError::WalError(_) => "58030",
        }
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::Overlap(_) => "overlap",
            EngineError::ConfirmedExclusivity { .. } => "confirmed_exclusivity",
            EngineError::PastScheduling { .. } => "past_scheduling",
            EngineError::Immutable { .. } => "immutable",
            EngineError::InvalidStatus(_) => "invalid_status",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::HasDependents(_) => "has_dependents",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "end time must be after start time: [{start}, {end})")
            }
            EngineError::Overlap(conflict) => write!(f, "{conflict}"),
            EngineError::ConfirmedExclusivity { existing, span } => write!(
                f,
                "duplicate confirmed log: {existing} already covers [{}, {})",
                span.start, span.end
            ),
            EngineError::PastScheduling { start, now } => {
                write!(f, "maintenance must be scheduled in the future: start {start} <= now {now}")
            }
            EngineError::Immutable { id, reason } => write!(f, "record {id} is immutable: {reason}"),
            EngineError::InvalidStatus(s) => write!(f, "invalid status: {s}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::HasDependents(serial) => {
                write!(f, "cannot delete reactor {serial}: it still holds commitments or active maintenance")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<Conflict> for EngineError {
    fn from(conflict: Conflict) -> Self {
        match conflict {
            Conflict::InvalidInterval { start, end } => EngineError::InvalidInterval { start, end },
            Conflict::DuplicateConfirmed { id, span } => {
                EngineError::ConfirmedExclusivity { existing: id, span }
            }
            other => EngineError::Overlap(other),
        }
    }
}
