use crate::model::*;

// ── Occupancy aggregation ─────────────────────────────────────────

/// One metric per input reactor, in input order.
///
/// Every figure is recomputed from the given collections; records of other
/// reactors are ignored, so callers may pass the whole store.
pub fn compute_occupancy(
    period: &Span,
    reactors: &[ReactorInfo],
    commitments: &[Commitment],
    windows: &[MaintenanceWindow],
) -> Vec<OccupancyMetric> {
    reactors
        .iter()
        .map(|r| reactor_occupancy(r, period, commitments, windows))
        .collect()
}

pub fn reactor_occupancy(
    reactor: &ReactorInfo,
    period: &Span,
    commitments: &[Commitment],
    windows: &[MaintenanceWindow],
) -> OccupancyMetric {
    let serial = reactor.serial_no.as_str();
    let total_hours = period.whole_hours();

    let downtime_hours: u64 = windows
        .iter()
        .filter(|w| w.reactor == serial && !w.cancelled)
        .map(|w| clipped_hours(&w.span, period))
        .sum();

    let available_hours = total_hours.saturating_sub(downtime_hours);

    let mut proposed_hours = 0u64;
    let mut actual_hours = 0u64;
    for c in commitments.iter().filter(|c| c.reactor == serial) {
        match c.status {
            CommitmentStatus::Proposed => proposed_hours += clipped_hours(&c.span, period),
            CommitmentStatus::Confirmed => actual_hours += clipped_hours(&c.span, period),
            CommitmentStatus::Cancelled => {}
        }
    }

    OccupancyMetric {
        reactor: reactor.serial_no.clone(),
        plant_name: reactor.spec.plant_name.clone(),
        block_name: reactor.spec.block_name.clone(),
        period: *period,
        available_hours,
        proposed_hours,
        actual_hours,
        downtime_hours,
        proposed_percent: percent(proposed_hours, available_hours),
        actual_percent: percent(actual_hours, available_hours),
    }
}

/// `part / whole * 100`, 0 when nothing is available. Not capped at 100.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
