use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_commitment, check_conflict};
use super::occupancy::reactor_occupancy;
use super::{Conflict, Engine, EngineError};

/// Narrows an occupancy report to one plant and/or block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactorFilter {
    pub plant_name: Option<String>,
    pub block_name: Option<String>,
}

impl ReactorFilter {
    pub fn matches(&self, spec: &ReactorSpec) -> bool {
        self.plant_name.as_ref().is_none_or(|p| *p == spec.plant_name)
            && self.block_name.as_ref().is_none_or(|b| *b == spec.block_name)
    }
}

impl Engine {
    /// Reactors ordered by serial number.
    pub async fn list_reactors(&self) -> Vec<ReactorInfo> {
        let mut out = Vec::with_capacity(self.store.reactor_count());
        for serial in self.store.reactor_serials() {
            if let Some(rs) = self.store.get_reactor(&serial) {
                let guard = rs.read().await;
                out.push(ReactorInfo {
                    serial_no: guard.serial_no.clone(),
                    spec: guard.spec.clone(),
                });
            }
        }
        out
    }

    pub async fn reactor_info(&self, serial: &str) -> Option<ReactorInfo> {
        let rs = self.store.get_reactor(serial)?;
        let guard = rs.read().await;
        Some(ReactorInfo {
            serial_no: guard.serial_no.clone(),
            spec: guard.spec.clone(),
        })
    }

    /// Commitments of one reactor, or of all, ordered by reactor then start.
    pub async fn list_commitments(&self, reactor: Option<&str>) -> Vec<Commitment> {
        let mut out = Vec::new();
        for serial in self.serials_for(reactor) {
            if let Some(rs) = self.store.get_reactor(&serial) {
                out.extend(rs.read().await.commitments.iter().cloned());
            }
        }
        out
    }

    /// Maintenance windows of one reactor, or of all, cancelled ones included.
    pub async fn list_maintenance_windows(&self, reactor: Option<&str>) -> Vec<MaintenanceWindow> {
        let mut out = Vec::new();
        for serial in self.serials_for(reactor) {
            if let Some(rs) = self.store.get_reactor(&serial) {
                out.extend(rs.read().await.windows.iter().cloned());
            }
        }
        out
    }

    fn serials_for(&self, reactor: Option<&str>) -> Vec<String> {
        match reactor {
            Some(serial) => vec![serial.to_string()],
            None => self.store.reactor_serials(),
        }
    }

    /// Advisory pre-check against a snapshot. Nothing is reserved: the write
    /// path re-runs the same checks under the reactor's write lock.
    ///
    /// With a `status` the candidate is judged as a new commitment (Confirmed
    /// adds exclusivity) and `exclude` is not used, since commitments are
    /// never edited. Without one it is judged as a maintenance window, and
    /// `exclude` names the window being rescheduled.
    pub async fn check_conflict(
        &self,
        reactor: &str,
        start: Ms,
        end: Ms,
        status: Option<CommitmentStatus>,
        exclude: Option<Ulid>,
    ) -> Result<Option<Conflict>, EngineError> {
        let rs = self
            .store
            .get_reactor(reactor)
            .ok_or_else(|| EngineError::NotFound(reactor.to_string()))?;
        let guard = rs.read().await;
        Ok(match status {
            Some(status) => {
                check_commitment(reactor, start, end, status, &guard.commitments, &guard.windows)
            }
            None => check_conflict(
                reactor,
                start,
                end,
                &guard.commitments,
                &guard.windows,
                exclude,
            ),
        })
    }

    /// One metric per matching reactor over `period`, ordered by serial.
    pub async fn compute_occupancy(
        &self,
        period: Span,
        filter: &ReactorFilter,
    ) -> Result<Vec<OccupancyMetric>, EngineError> {
        if period.end <= period.start {
            return Err(EngineError::InvalidInterval {
                start: period.start,
                end: period.end,
            });
        }
        if period.duration_ms() > MAX_REPORT_WINDOW_MS {
            return Err(EngineError::LimitExceeded("report period too wide"));
        }

        let mut out = Vec::new();
        for serial in self.store.reactor_serials() {
            let Some(rs) = self.store.get_reactor(&serial) else {
                continue;
            };
            let guard = rs.read().await;
            if !filter.matches(&guard.spec) {
                continue;
            }
            let info = ReactorInfo {
                serial_no: guard.serial_no.clone(),
                spec: guard.spec.clone(),
            };
            out.push(reactor_occupancy(
                &info,
                &period,
                &guard.commitments,
                &guard.windows,
            ));
        }
        Ok(out)
    }
}
