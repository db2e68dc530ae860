use ulid::Ulid;

use crate::model::*;
use crate::period::format_timestamp;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

/// Why a candidate window is not admissible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    InvalidInterval {
        start: Ms,
        end: Ms,
    },
    Commitment {
        id: Ulid,
        product_name: String,
        status: CommitmentStatus,
        span: Span,
    },
    Maintenance {
        id: Ulid,
        category: MaintenanceCategory,
        span: Span,
    },
    DuplicateConfirmed {
        id: Ulid,
        span: Span,
    },
}

impl Conflict {
    pub fn kind(&self) -> &'static str {
        match self {
            Conflict::InvalidInterval { .. } => "invalid_interval",
            Conflict::Commitment { .. } => "commitment_overlap",
            Conflict::Maintenance { .. } => "maintenance_overlap",
            Conflict::DuplicateConfirmed { .. } => "duplicate_confirmed",
        }
    }

    /// Id of the colliding record, if any.
    pub fn record_id(&self) -> Option<Ulid> {
        match self {
            Conflict::InvalidInterval { .. } => None,
            Conflict::Commitment { id, .. }
            | Conflict::Maintenance { id, .. }
            | Conflict::DuplicateConfirmed { id, .. } => Some(*id),
        }
    }
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::InvalidInterval { .. } => write!(f, "end time must be after start time"),
            Conflict::Commitment { product_name, status, span, .. } => write!(
                f,
                "reactor already booked for {product_name} ({}, {} - {})",
                status.as_str(),
                format_timestamp(span.start),
                format_timestamp(span.end)
            ),
            Conflict::Maintenance { category, span, .. } => write!(
                f,
                "reactor unavailable due to {} maintenance ({} - {})",
                category.as_str(),
                format_timestamp(span.start),
                format_timestamp(span.end)
            ),
            Conflict::DuplicateConfirmed { span, .. } => write!(
                f,
                "an actual work log already exists for this period ({} - {})",
                format_timestamp(span.start),
                format_timestamp(span.end)
            ),
        }
    }
}

/// General admissibility of `[start, end)` on `reactor`.
///
/// First failure wins: inverted window, then any non-cancelled commitment,
/// then any non-cancelled maintenance window. Collections may hold records
/// for every reactor; `exclude` skips the record being rescheduled.
pub fn check_conflict(
    reactor: &str,
    start: Ms,
    end: Ms,
    commitments: &[Commitment],
    windows: &[MaintenanceWindow],
    exclude: Option<Ulid>,
) -> Option<Conflict> {
    let Some(span) = Span::try_new(start, end) else {
        return Some(Conflict::InvalidInterval { start, end });
    };
    let excluded = |id: Ulid| exclude == Some(id);

    for c in commitments {
        if c.reactor != reactor || excluded(c.id) {
            continue;
        }
        let blocks = match c.status {
            CommitmentStatus::Proposed | CommitmentStatus::Confirmed => true,
            CommitmentStatus::Cancelled => false,
        };
        if blocks && c.span.overlaps(&span) {
            return Some(Conflict::Commitment {
                id: c.id,
                product_name: c.product_name.clone(),
                status: c.status,
                span: c.span,
            });
        }
    }

    windows
        .iter()
        .find(|w| w.reactor == reactor && !excluded(w.id) && !w.cancelled && w.span.overlaps(&span))
        .map(|w| Conflict::Maintenance {
            id: w.id,
            category: w.category.clone(),
            span: w.span,
        })
}

/// At most one Confirmed log per instant. Boundary-touching counts.
pub fn check_confirmed_exclusivity(
    reactor: &str,
    span: &Span,
    commitments: &[Commitment],
) -> Option<Conflict> {
    commitments
        .iter()
        .find(|c| {
            c.reactor == reactor
                && matches!(c.status, CommitmentStatus::Confirmed)
                && c.span.touches_or_overlaps(span)
        })
        .map(|c| Conflict::DuplicateConfirmed { id: c.id, span: c.span })
}

/// Full check for a commitment of the given status: the interval test, the
/// exclusivity rule for Confirmed candidates, then the general resolver.
pub fn check_commitment(
    reactor: &str,
    start: Ms,
    end: Ms,
    status: CommitmentStatus,
    commitments: &[Commitment],
    windows: &[MaintenanceWindow],
) -> Option<Conflict> {
    let Some(span) = Span::try_new(start, end) else {
        return Some(Conflict::InvalidInterval { start, end });
    };
    if status == CommitmentStatus::Confirmed
        && let Some(dup) = check_confirmed_exclusivity(reactor, &span, commitments)
    {
        return Some(dup);
    }
    check_conflict(reactor, start, end, commitments, windows, None)
}

/// Interval sanity plus range limits. Returns the validated span.
pub(crate) fn validate_window(start: Ms, end: Ms) -> Result<Span, EngineError> {
    use crate::limits::*;
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidInterval { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

pub(crate) fn validate_text(value: &str, what: &'static str) -> Result<(), EngineError> {
    if value.len() > crate::limits::MAX_TEXT_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}
