use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const HOUR_MS: Ms = 3_600_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// `None` unless `start < end`.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Shared instant test. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Closed-interval variant: also true when one span ends exactly where
    /// the other starts.
    pub fn touches_or_overlaps(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Intersect with a boundary. `None` when nothing is left.
    pub fn clip(&self, boundary: &Span) -> Option<Span> {
        Span::try_new(self.start.max(boundary.start), self.end.min(boundary.end))
    }

    /// Whole hours, truncated toward zero.
    pub fn whole_hours(&self) -> u64 {
        (self.duration_ms() / HOUR_MS) as u64
    }
}

/// Hours contributed by `span` inside `boundary`; 0 when disjoint.
pub fn clipped_hours(span: &Span, boundary: &Span) -> u64 {
    span.clip(boundary).map_or(0, |s| s.whole_hours())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitmentStatus {
    /// Forecast claim. Freely deletable.
    Proposed,
    /// Realized work log. Exclusive per instant and immutable.
    Confirmed,
    /// Withdrawn; ignored by conflict checks and occupancy.
    Cancelled,
}

impl CommitmentStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proposed" => Some(Self::Proposed),
            "confirmed" | "actual" => Some(Self::Confirmed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposed => "Proposed",
            Self::Confirmed => "Confirmed",
            Self::Cancelled => "Cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MaintenanceCategory {
    Maintenance,
    Cleaning,
    Calibration,
    Breakdown,
    Other(String),
}

impl MaintenanceCategory {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "maintenance" => Self::Maintenance,
            "cleaning" => Self::Cleaning,
            "calibration" => Self::Calibration,
            "breakdown" => Self::Breakdown,
            _ => Self::Other(s.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Maintenance => "Maintenance",
            Self::Cleaning => "Cleaning",
            Self::Calibration => "Calibration",
            Self::Breakdown => "Breakdown",
            Self::Other(s) => s,
        }
    }
}

/// Descriptive reactor attributes. None of these affect scheduling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactorSpec {
    pub max_capacity_liters: u32,
    pub capacity_range: String,
    pub moc: String,
    pub agitator_type: String,
    pub plant_name: String,
    pub block_name: String,
    pub commission_date: Option<Ms>,
    pub notes: Option<String>,
}

/// Partial reactor update; `None` leaves a field unchanged. The nullable
/// fields take `Some(None)` to clear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactorPatch {
    pub max_capacity_liters: Option<u32>,
    pub capacity_range: Option<String>,
    pub moc: Option<String>,
    pub agitator_type: Option<String>,
    pub plant_name: Option<String>,
    pub block_name: Option<String>,
    pub commission_date: Option<Option<Ms>>,
    pub notes: Option<Option<String>>,
}

impl ReactorPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(self, spec: &mut ReactorSpec) {
        if let Some(v) = self.max_capacity_liters {
            spec.max_capacity_liters = v;
        }
        if let Some(v) = self.capacity_range {
            spec.capacity_range = v;
        }
        if let Some(v) = self.moc {
            spec.moc = v;
        }
        if let Some(v) = self.agitator_type {
            spec.agitator_type = v;
        }
        if let Some(v) = self.plant_name {
            spec.plant_name = v;
        }
        if let Some(v) = self.block_name {
            spec.block_name = v;
        }
        if let Some(v) = self.commission_date {
            spec.commission_date = v;
        }
        if let Some(v) = self.notes {
            spec.notes = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commitment {
    pub id: Ulid,
    pub reactor: String,
    pub team: String,
    pub product_name: String,
    pub stage: String,
    pub batch_number: String,
    pub operation: String,
    pub span: Span,
    pub status: CommitmentStatus,
    pub requested_by: String,
    pub created_at: Ms,
    pub updated_at: Ms,
}

/// A commitment as submitted, before identity and timestamps are assigned.
/// `start`/`end` are raw so an inverted window can be reported, not panicked on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewCommitment {
    pub reactor: String,
    pub team: String,
    pub product_name: String,
    pub stage: String,
    pub batch_number: String,
    pub operation: String,
    pub start: Ms,
    pub end: Ms,
    pub requested_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Ulid,
    pub reactor: String,
    pub span: Span,
    pub category: MaintenanceCategory,
    pub reason: String,
    pub updated_by: String,
    pub updated_at: Ms,
    pub cancelled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMaintenanceWindow {
    pub reactor: String,
    pub category: MaintenanceCategory,
    pub reason: String,
    pub start: Ms,
    pub end: Ms,
    pub updated_by: String,
}

/// Derived lifecycle phase of a maintenance window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
}

impl WindowPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "Scheduled",
            Self::InProgress => "InProgress",
            Self::Completed => "Completed",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl MaintenanceWindow {
    pub fn phase(&self, now: Ms) -> WindowPhase {
        if self.cancelled {
            WindowPhase::Cancelled
        } else if self.span.end <= now {
            WindowPhase::Completed
        } else if self.span.contains_instant(now) {
            WindowPhase::InProgress
        } else {
            WindowPhase::Scheduled
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReactorState {
    pub serial_no: String,
    pub spec: ReactorSpec,
    /// Sorted by `span.start`.
    pub commitments: Vec<Commitment>,
    /// Sorted by `span.start`. Cancelled windows are kept.
    pub windows: Vec<MaintenanceWindow>,
}

impl ReactorState {
    pub fn new(serial_no: String, spec: ReactorSpec) -> Self {
        Self {
            serial_no,
            spec,
            commitments: Vec::new(),
            windows: Vec::new(),
        }
    }

    pub fn record_count(&self) -> usize {
        self.commitments.len() + self.windows.len()
    }

    /// Insert commitment maintaining sort order by span.start.
    pub fn insert_commitment(&mut self, commitment: Commitment) {
        let pos = self
            .commitments
            .binary_search_by_key(&commitment.span.start, |c| c.span.start)
            .unwrap_or_else(|e| e);
        self.commitments.insert(pos, commitment);
    }

    pub fn remove_commitment(&mut self, id: Ulid) -> Option<Commitment> {
        let pos = self.commitments.iter().position(|c| c.id == id)?;
        Some(self.commitments.remove(pos))
    }

    pub fn commitment(&self, id: Ulid) -> Option<&Commitment> {
        self.commitments.iter().find(|c| c.id == id)
    }

    pub fn insert_window(&mut self, window: MaintenanceWindow) {
        let pos = self
            .windows
            .binary_search_by_key(&window.span.start, |w| w.span.start)
            .unwrap_or_else(|e| e);
        self.windows.insert(pos, window);
    }

    pub fn remove_window(&mut self, id: Ulid) -> Option<MaintenanceWindow> {
        let pos = self.windows.iter().position(|w| w.id == id)?;
        Some(self.windows.remove(pos))
    }

    pub fn window(&self, id: Ulid) -> Option<&MaintenanceWindow> {
        self.windows.iter().find(|w| w.id == id)
    }

    /// Commitments whose span overlaps the query window.
    /// Uses binary search to skip commitments starting at or after `query.end`.
    pub fn overlapping_commitments(&self, query: &Span) -> impl Iterator<Item = &Commitment> {
        let right_bound = self
            .commitments
            .partition_point(|c| c.span.start < query.end);
        self.commitments[..right_bound]
            .iter()
            .filter(move |c| c.span.end > query.start)
    }

    /// Records that keep the reactor from being deleted.
    pub fn has_dependents(&self) -> bool {
        !self.commitments.is_empty() || self.windows.iter().any(|w| !w.cancelled)
    }
}

/// Applied changes, one per accepted mutation. Also the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ReactorCreated {
        serial_no: String,
        spec: ReactorSpec,
    },
    ReactorUpdated {
        serial_no: String,
        spec: ReactorSpec,
    },
    ReactorDeleted {
        serial_no: String,
    },
    CommitmentCreated {
        commitment: Commitment,
    },
    CommitmentDeleted {
        id: Ulid,
        reactor: String,
    },
    WindowScheduled {
        window: MaintenanceWindow,
    },
    WindowRescheduled {
        id: Ulid,
        reactor: String,
        span: Span,
        updated_by: String,
        updated_at: Ms,
    },
    WindowCancelled {
        id: Ulid,
        reactor: String,
        updated_by: String,
        updated_at: Ms,
    },
}

impl Event {
    /// Serial of the reactor this event belongs to.
    pub fn reactor(&self) -> &str {
        match self {
            Event::ReactorCreated { serial_no, .. }
            | Event::ReactorUpdated { serial_no, .. }
            | Event::ReactorDeleted { serial_no } => serial_no,
            Event::CommitmentCreated { commitment } => &commitment.reactor,
            Event::WindowScheduled { window } => &window.reactor,
            Event::CommitmentDeleted { reactor, .. }
            | Event::WindowRescheduled { reactor, .. }
            | Event::WindowCancelled { reactor, .. } => reactor,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactorInfo {
    pub serial_no: String,
    pub spec: ReactorSpec,
}

/// Utilization of one reactor over one reporting period. Never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct OccupancyMetric {
    pub reactor: String,
    pub plant_name: String,
    pub block_name: String,
    pub period: Span,
    pub available_hours: u64,
    pub proposed_hours: u64,
    pub actual_hours: u64,
    pub downtime_hours: u64,
    pub proposed_percent: f64,
    pub actual_percent: f64,
}
