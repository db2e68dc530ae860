use tokio::sync::{oneshot, OwnedRwLockWriteGuard};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{REACTORS_ACTIVE, REJECTIONS_TOTAL};

use super::conflict::{check_commitment, check_conflict, now_ms, validate_text, validate_window};
use super::lifecycle::{check_commitment_deletable, check_future_start, check_window_mutable};
use super::{Engine, EngineError, WalCommand};

/// Count and log a rejected write, then hand the error back.
fn rejected(op: &'static str, e: EngineError) -> EngineError {
    metrics::counter!(REJECTIONS_TOTAL, "op" => op, "kind" => e.kind())
        .increment(1);
    debug!("{op} rejected: {e}");
    e
}

fn validate_serial(serial: &str) -> Result<(), EngineError> {
    if serial.trim().is_empty() {
        return Err(EngineError::LimitExceeded("empty serial number"));
    }
    if serial.len() > MAX_SERIAL_LEN {
        return Err(EngineError::LimitExceeded("serial number too long"));
    }
    Ok(())
}

fn validate_spec(spec: &ReactorSpec) -> Result<(), EngineError> {
    for field in [
        &spec.capacity_range,
        &spec.moc,
        &spec.agitator_type,
        &spec.plant_name,
        &spec.block_name,
    ] {
        validate_text(field, "reactor attribute too long")?;
    }
    if let Some(notes) = &spec.notes {
        validate_text(notes, "notes too long")?;
    }
    Ok(())
}

fn ensure_room(rs: &ReactorState) -> Result<(), EngineError> {
    if rs.record_count() >= MAX_RECORDS_PER_REACTOR {
        return Err(EngineError::LimitExceeded("too many records on reactor"));
    }
    Ok(())
}

impl Engine {
    // ── Reactors ─────────────────────────────────────────────

    pub async fn create_reactor(&self, serial_no: String, spec: ReactorSpec) -> Result<(), EngineError> {
        validate_serial(&serial_no)?;
        validate_spec(&spec)?;
        let _writes = self.wal_gate.read().await;
        let _catalog = self.catalog.lock().await;
        if self.store.reactor_count() >= MAX_REACTORS {
            return Err(EngineError::LimitExceeded("too many reactors"));
        }
        if self.store.contains_reactor(&serial_no) {
            return Err(EngineError::AlreadyExists(serial_no));
        }

        let event = Event::ReactorCreated {
            serial_no: serial_no.clone(),
            spec: spec.clone(),
        };
        self.wal_append(&event).await?;
        self.store.insert_reactor(serial_no.clone(), spec);
        metrics::gauge!(REACTORS_ACTIVE).set(self.store.reactor_count() as f64);
        self.notify.send(&serial_no, &event);
        info!("reactor {serial_no} created");
        Ok(())
    }

    /// Apply a partial update to a reactor's attributes. Returns the new spec.
    pub async fn update_reactor(&self, serial_no: &str, patch: ReactorPatch) -> Result<ReactorSpec, EngineError> {
        let _writes = self.wal_gate.read().await;
        let mut guard = self.reactor_write(serial_no).await?;
        let mut spec = guard.spec.clone();
        patch.apply(&mut spec);
        validate_spec(&spec)?;

        let event = Event::ReactorUpdated {
            serial_no: serial_no.to_string(),
            spec: spec.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("reactor {serial_no} updated");
        Ok(spec)
    }

    /// Blocked while the reactor still holds commitments or active maintenance.
    /// Cancelled windows go with it.
    pub async fn delete_reactor(&self, serial_no: &str) -> Result<(), EngineError> {
        let _writes = self.wal_gate.read().await;
        let _catalog = self.catalog.lock().await;
        let guard = self.reactor_write(serial_no).await?;
        if guard.has_dependents() {
            return Err(rejected(
                "delete_reactor",
                EngineError::HasDependents(serial_no.to_string()),
            ));
        }

        let event = Event::ReactorDeleted {
            serial_no: serial_no.to_string(),
        };
        self.wal_append(&event).await?;
        self.store.remove_reactor(serial_no);
        metrics::gauge!(REACTORS_ACTIVE).set(self.store.reactor_count() as f64);
        drop(guard);
        self.notify.send(serial_no, &event);
        self.notify.remove(serial_no);
        info!("reactor {serial_no} deleted");
        Ok(())
    }

    // ── Commitments ──────────────────────────────────────────

    /// Record a forecast. Rejected on any overlap with a non-cancelled
    /// commitment or maintenance window.
    pub async fn propose_commitment(&self, id: Ulid, new: NewCommitment) -> Result<Commitment, EngineError> {
        self.create_commitment(id, new, CommitmentStatus::Proposed).await
    }

    /// Record an actual work log. Additionally rejected when another
    /// Confirmed log overlaps or touches the window. Immutable afterwards.
    pub async fn confirm_commitment(&self, id: Ulid, new: NewCommitment) -> Result<Commitment, EngineError> {
        self.create_commitment(id, new, CommitmentStatus::Confirmed).await
    }

    pub async fn create_commitment(
        &self,
        id: Ulid,
        new: NewCommitment,
        status: CommitmentStatus,
    ) -> Result<Commitment, EngineError> {
        if status == CommitmentStatus::Cancelled {
            return Err(EngineError::InvalidStatus(
                "commitments are created Proposed or Confirmed",
            ));
        }
        let span = validate_window(new.start, new.end).map_err(|e| rejected("commitment", e))?;
        for field in [
            &new.team,
            &new.product_name,
            &new.stage,
            &new.batch_number,
            &new.operation,
            &new.requested_by,
        ] {
            validate_text(field, "commitment field too long")?;
        }
        if self.store.contains_record(&id) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }

        let _writes = self.wal_gate.read().await;
        let mut guard = self.reactor_write(&new.reactor).await?;
        ensure_room(&guard)?;

        // Authoritative re-check inside the reactor lock.
        if let Some(conflict) = check_commitment(
            &new.reactor,
            new.start,
            new.end,
            status,
            &guard.commitments,
            &guard.windows,
        ) {
            return Err(rejected("commitment", conflict.into()));
        }

        let now = now_ms();
        let commitment = Commitment {
            id,
            reactor: new.reactor,
            team: new.team,
            product_name: new.product_name,
            stage: new.stage,
            batch_number: new.batch_number,
            operation: new.operation,
            span,
            status,
            requested_by: new.requested_by,
            created_at: now,
            updated_at: now,
        };
        let event = Event::CommitmentCreated {
            commitment: commitment.clone(),
        };
        self.persist_new_record(&mut guard, id, &event).await?;
        info!(
            "{} commitment {id} on {} accepted",
            status.as_str(),
            commitment.reactor
        );
        Ok(commitment)
    }

    /// Remove a Proposed commitment. Confirmed logs are immutable.
    pub async fn delete_commitment(&self, id: Ulid) -> Result<Commitment, EngineError> {
        let _writes = self.wal_gate.read().await;
        let mut guard = self.resolve_record_write(&id).await?;
        let commitment = guard
            .commitment(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        check_commitment_deletable(&commitment).map_err(|e| rejected("delete_commitment", e))?;

        let event = Event::CommitmentDeleted {
            id,
            reactor: commitment.reactor.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("commitment {id} on {} deleted", commitment.reactor);
        Ok(commitment)
    }

    // ── Maintenance windows ──────────────────────────────────

    pub async fn schedule_maintenance(
        &self,
        id: Ulid,
        new: NewMaintenanceWindow,
    ) -> Result<MaintenanceWindow, EngineError> {
        self.schedule_maintenance_at(id, new, now_ms()).await
    }

    /// `schedule_maintenance` against an explicit clock.
    pub async fn schedule_maintenance_at(
        &self,
        id: Ulid,
        new: NewMaintenanceWindow,
        now: Ms,
    ) -> Result<MaintenanceWindow, EngineError> {
        check_future_start(new.start, now).map_err(|e| rejected("schedule", e))?;
        let span = validate_window(new.start, new.end).map_err(|e| rejected("schedule", e))?;
        validate_text(new.category.as_str(), "category too long")?;
        validate_text(&new.reason, "reason too long")?;
        validate_text(&new.updated_by, "updated_by too long")?;
        if self.store.contains_record(&id) {
            return Err(EngineError::AlreadyExists(id.to_string()));
        }

        let _writes = self.wal_gate.read().await;
        let mut guard = self.reactor_write(&new.reactor).await?;
        ensure_room(&guard)?;
        if let Some(conflict) = check_conflict(
            &new.reactor,
            new.start,
            new.end,
            &guard.commitments,
            &guard.windows,
            None,
        ) {
            return Err(rejected("schedule", conflict.into()));
        }

        let window = MaintenanceWindow {
            id,
            reactor: new.reactor,
            span,
            category: new.category,
            reason: new.reason,
            updated_by: new.updated_by,
            updated_at: now,
            cancelled: false,
        };
        let event = Event::WindowScheduled {
            window: window.clone(),
        };
        self.persist_new_record(&mut guard, id, &event).await?;
        info!(
            "{} window {id} on {} scheduled",
            window.category.as_str(),
            window.reactor
        );
        Ok(window)
    }

    pub async fn reschedule_maintenance(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
        updated_by: Option<String>,
    ) -> Result<MaintenanceWindow, EngineError> {
        self.reschedule_maintenance_at(id, start, end, updated_by, now_ms())
            .await
    }

    /// Move a window that is neither cancelled nor elapsed. Validated like a
    /// new window, ignoring the window itself when scanning for conflicts.
    pub async fn reschedule_maintenance_at(
        &self,
        id: Ulid,
        start: Ms,
        end: Ms,
        updated_by: Option<String>,
        now: Ms,
    ) -> Result<MaintenanceWindow, EngineError> {
        let _writes = self.wal_gate.read().await;
        let mut guard = self.resolve_record_write(&id).await?;
        let window = self.window_for_update(&guard, id, now, "reschedule")?;

        check_future_start(start, now).map_err(|e| rejected("reschedule", e))?;
        let span = validate_window(start, end).map_err(|e| rejected("reschedule", e))?;
        if let Some(conflict) = check_conflict(
            &window.reactor,
            start,
            end,
            &guard.commitments,
            &guard.windows,
            Some(id),
        ) {
            return Err(rejected("reschedule", conflict.into()));
        }

        let updated_by = updated_by.unwrap_or(window.updated_by);
        validate_text(&updated_by, "updated_by too long")?;
        let event = Event::WindowRescheduled {
            id,
            reactor: window.reactor.clone(),
            span,
            updated_by,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("window {id} on {} rescheduled", window.reactor);
        guard
            .window(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    pub async fn cancel_maintenance(
        &self,
        id: Ulid,
        updated_by: Option<String>,
    ) -> Result<MaintenanceWindow, EngineError> {
        self.cancel_maintenance_at(id, updated_by, now_ms()).await
    }

    /// Soft-cancel: the window stays in the record set but no longer blocks.
    pub async fn cancel_maintenance_at(
        &self,
        id: Ulid,
        updated_by: Option<String>,
        now: Ms,
    ) -> Result<MaintenanceWindow, EngineError> {
        let _writes = self.wal_gate.read().await;
        let mut guard = self.resolve_record_write(&id).await?;
        let window = self.window_for_update(&guard, id, now, "cancel")?;

        let updated_by = updated_by.unwrap_or(window.updated_by);
        validate_text(&updated_by, "updated_by too long")?;
        let event = Event::WindowCancelled {
            id,
            reactor: window.reactor.clone(),
            updated_by,
            updated_at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("window {id} on {} cancelled", window.reactor);
        guard
            .window(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    fn window_for_update(
        &self,
        guard: &OwnedRwLockWriteGuard<ReactorState>,
        id: Ulid,
        now: Ms,
        op: &'static str,
    ) -> Result<MaintenanceWindow, EngineError> {
        let window = guard
            .window(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        check_window_mutable(&window, now).map_err(|e| rejected(op, e))?;
        Ok(window)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event set that recreates current state.
    /// Writers are held off from the snapshot until the new file is in place.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.wal_gate.write().await;
        let mut events = Vec::new();
        for serial in self.store.reactor_serials() {
            let Some(rs) = self.store.get_reactor(&serial) else {
                continue;
            };
            let guard = rs.read().await;
            events.push(Event::ReactorCreated {
                serial_no: guard.serial_no.clone(),
                spec: guard.spec.clone(),
            });
            events.extend(guard.commitments.iter().map(|c| Event::CommitmentCreated {
                commitment: c.clone(),
            }));
            events.extend(guard.windows.iter().map(|w| Event::WindowScheduled {
                window: w.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
