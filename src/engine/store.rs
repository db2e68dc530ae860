use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::SharedReactorState;

/// Materialized record store: reactors by serial, each behind its own lock,
/// plus a record id → reactor serial index.
pub struct Store {
    reactors: DashMap<String, SharedReactorState>,
    record_to_reactor: DashMap<Ulid, String>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Self {
            reactors: DashMap::new(),
            record_to_reactor: DashMap::new(),
        }
    }

    // ── Reactors ─────────────────────────────────────────────

    pub fn reactor_count(&self) -> usize {
        self.reactors.len()
    }

    pub fn contains_reactor(&self, serial: &str) -> bool {
        self.reactors.contains_key(serial)
    }

    pub fn get_reactor(&self, serial: &str) -> Option<SharedReactorState> {
        self.reactors.get(serial).map(|e| e.value().clone())
    }

    pub fn insert_reactor(&self, serial: String, spec: ReactorSpec) {
        let rs = ReactorState::new(serial.clone(), spec);
        self.reactors.insert(serial, Arc::new(RwLock::new(rs)));
    }

    /// Drop a reactor and every index entry pointing at it.
    pub fn remove_reactor(&self, serial: &str) -> Option<SharedReactorState> {
        let (_, rs) = self.reactors.remove(serial)?;
        self.record_to_reactor.retain(|_, r| r != serial);
        Some(rs)
    }

    /// Serials in ascending order, so multi-reactor reads lock deterministically.
    pub fn reactor_serials(&self) -> Vec<String> {
        let mut serials: Vec<String> = self.reactors.iter().map(|e| e.key().clone()).collect();
        serials.sort();
        serials
    }

    // ── Record index ─────────────────────────────────────────

    pub fn reactor_for_record(&self, id: &Ulid) -> Option<String> {
        self.record_to_reactor.get(id).map(|e| e.value().clone())
    }

    pub fn contains_record(&self, id: &Ulid) -> bool {
        self.record_to_reactor.contains_key(id)
    }

    /// Claim `id` for `serial`. False if any reactor already holds it.
    pub fn reserve_record(&self, id: Ulid, serial: &str) -> bool {
        match self.record_to_reactor.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(serial.to_string());
                true
            }
        }
    }

    /// Undo a reservation whose write never made it to the WAL.
    pub fn release_record(&self, id: &Ulid) {
        self.record_to_reactor.remove(id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a record-level event to a reactor (caller holds the write lock).
    /// Reactor create/delete are handled at the map level, not here.
    pub fn apply_event(&self, rs: &mut ReactorState, event: &Event) {
        match event {
            Event::ReactorUpdated { spec, .. } => {
                rs.spec = spec.clone();
            }
            Event::CommitmentCreated { commitment } => {
                self.record_to_reactor
                    .insert(commitment.id, commitment.reactor.clone());
                rs.insert_commitment(commitment.clone());
            }
            Event::CommitmentDeleted { id, .. } => {
                rs.remove_commitment(*id);
                self.record_to_reactor.remove(id);
            }
            Event::WindowScheduled { window } => {
                self.record_to_reactor.insert(window.id, window.reactor.clone());
                rs.insert_window(window.clone());
            }
            Event::WindowRescheduled {
                id,
                span,
                updated_by,
                updated_at,
                ..
            } => {
                // Re-insert to keep the start ordering.
                if let Some(mut w) = rs.remove_window(*id) {
                    w.span = *span;
                    w.updated_by = updated_by.clone();
                    w.updated_at = *updated_at;
                    rs.insert_window(w);
                }
            }
            Event::WindowCancelled {
                id,
                updated_by,
                updated_at,
                ..
            } => {
                if let Some(w) = rs.windows.iter_mut().find(|w| w.id == *id) {
                    w.cancelled = true;
                    w.updated_by = updated_by.clone();
                    w.updated_at = *updated_at;
                }
            }
            Event::ReactorCreated { .. } | Event::ReactorDeleted { .. } => {}
        }
    }
}
