//! In-memory mirror of the device's content slots.
//!
//! The device is the durable store; this registry only changes after the
//! device confirmed an operation, with one exception: a slot is marked
//! [`SlotState::Uploading`] while an upload holds its [`SlotReservation`].

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use fluff_protocol::SlotOp;
use fluff_protocol::constants::{SLOT_STATUS_ACTIVE, SLOT_STATUS_EMPTY, SLOT_STATUS_UPLOADED};

use crate::TransferError;

/// Lifecycle state of one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    Uploading,
    Uploaded,
    Active,
}

impl SlotState {
    /// Maps a device slot status code.
    pub fn from_status_code(code: u8) -> Option<Self> {
        match code {
            SLOT_STATUS_EMPTY => Some(Self::Empty),
            SLOT_STATUS_UPLOADED => Some(Self::Uploaded),
            SLOT_STATUS_ACTIVE => Some(Self::Active),
            _ => None,
        }
    }

    /// Content is present on the device.
    pub fn has_content(self) -> bool {
        matches!(self, Self::Uploaded | Self::Active)
    }
}

/// Read-only view of the registry for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
    pub slots: BTreeMap<u8, SlotState>,
    pub active: Option<u8>,
    pub uploading: Option<u8>,
}

struct RegistryInner {
    slots: Vec<SlotState>,
    in_flight: Option<u8>,
}

/// Fixed set of content slots plus the single in-flight upload gate.
pub struct SlotRegistry {
    inner: Mutex<RegistryInner>,
}

impl SlotRegistry {
    /// Creates a registry with `slot_count` empty slots.
    pub fn new(slot_count: u8) -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                slots: vec![SlotState::Empty; slot_count as usize],
                in_flight: None,
            }),
        }
    }

    /// Creates a registry seeded from a device slot status report.
    pub fn from_status(slot_count: u8, codes: &[u8]) -> Self {
        let registry = Self::new(slot_count);
        {
            let mut inner = registry.lock();
            inner.slots = decode_status(slot_count, codes);
        }
        registry
    }

    /// Replaces all slot states with a device report.
    ///
    /// Refused while an upload is in flight.
    pub fn apply_status(&self, codes: &[u8]) -> Result<(), TransferError> {
        let mut inner = self.lock();
        if let Some(slot) = inner.in_flight {
            return Err(TransferError::SlotBusy { slot });
        }
        let count = inner.slots.len() as u8;
        inner.slots = decode_status(count, codes);
        debug!(slots = ?inner.slots, "registry refreshed from device");
        Ok(())
    }

    pub fn slot_count(&self) -> u8 {
        self.lock().slots.len() as u8
    }

    /// Current state of `slot`.
    pub fn state(&self, slot: u8) -> Result<SlotState, TransferError> {
        let inner = self.lock();
        state_of(&inner, slot)
    }

    /// Index of the active slot, if any.
    pub fn active(&self) -> Option<u8> {
        let inner = self.lock();
        find_active(&inner)
    }

    /// Slot held by the in-flight upload, if any.
    pub fn in_flight(&self) -> Option<u8> {
        self.lock().in_flight
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let inner = self.lock();
        RegistrySnapshot {
            slots: inner
                .slots
                .iter()
                .enumerate()
                .map(|(i, s)| (i as u8, *s))
                .collect(),
            active: find_active(&inner),
            uploading: inner.in_flight,
        }
    }

    /// Claims `slot` for an upload and marks it `Uploading`.
    ///
    /// Runs synchronously before any I/O so two uploads cannot both pass.
    pub(crate) fn reserve(self: &Arc<Self>, slot: u8) -> Result<SlotReservation, TransferError> {
        let mut inner = self.lock();
        let previous = state_of(&inner, slot)?;
        if let Some(busy) = inner.in_flight {
            return Err(TransferError::SlotBusy { slot: busy });
        }
        if previous == SlotState::Active {
            return Err(TransferError::SlotInUse { slot });
        }
        inner.slots[slot as usize] = SlotState::Uploading;
        inner.in_flight = Some(slot);
        debug!(slot, ?previous, "slot reserved for upload");

        Ok(SlotReservation {
            registry: Arc::clone(self),
            slot,
            previous,
            committed: false,
        })
    }

    /// Validates that `op` may be issued against `slot`.
    pub(crate) fn check_lifecycle(&self, slot: u8, op: SlotOp) -> Result<SlotState, TransferError> {
        let inner = self.lock();
        let state = state_of(&inner, slot)?;
        validate_lifecycle(slot, state, op)?;
        Ok(state)
    }

    /// Marks `slot` active and demotes the previous active slot in one step.
    ///
    /// Returns the demoted slot.
    pub(crate) fn mark_active(&self, slot: u8) -> Result<Option<u8>, TransferError> {
        let mut inner = self.lock();
        let state = state_of(&inner, slot)?;
        validate_lifecycle(slot, state, SlotOp::Activate)?;

        let demoted = find_active(&inner).filter(|&prev| prev != slot);
        if let Some(prev) = demoted {
            inner.slots[prev as usize] = SlotState::Uploaded;
        }
        inner.slots[slot as usize] = SlotState::Active;
        info!(slot, ?demoted, "slot active");
        Ok(demoted)
    }

    /// Demotes `slot` from `Active` to `Uploaded`.
    pub(crate) fn mark_deactivated(&self, slot: u8) -> Result<(), TransferError> {
        let mut inner = self.lock();
        if state_of(&inner, slot)? == SlotState::Active {
            inner.slots[slot as usize] = SlotState::Uploaded;
            info!(slot, "slot deactivated");
        }
        Ok(())
    }

    /// Marks `slot` empty after a confirmed delete.
    pub(crate) fn mark_empty(&self, slot: u8) -> Result<(), TransferError> {
        let mut inner = self.lock();
        let state = state_of(&inner, slot)?;
        validate_lifecycle(slot, state, SlotOp::Delete)?;
        inner.slots[slot as usize] = SlotState::Empty;
        info!(slot, "slot emptied");
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn state_of(inner: &RegistryInner, slot: u8) -> Result<SlotState, TransferError> {
    inner
        .slots
        .get(slot as usize)
        .copied()
        .ok_or(TransferError::InvalidSlot {
            slot,
            count: inner.slots.len() as u8,
        })
}

fn find_active(inner: &RegistryInner) -> Option<u8> {
    inner
        .slots
        .iter()
        .position(|s| *s == SlotState::Active)
        .map(|i| i as u8)
}

fn validate_lifecycle(slot: u8, state: SlotState, op: SlotOp) -> Result<(), TransferError> {
    match (op, state) {
        (_, SlotState::Uploading) => Err(TransferError::SlotBusy { slot }),
        (SlotOp::Delete, SlotState::Active) => Err(TransferError::SlotInUse { slot }),
        (SlotOp::Load | SlotOp::Activate, SlotState::Empty) => {
            Err(TransferError::SlotNotUploaded { slot, state })
        }
        _ => Ok(()),
    }
}

/// Decodes a status report, keeping at most one slot active.
fn decode_status(slot_count: u8, codes: &[u8]) -> Vec<SlotState> {
    let mut slots = vec![SlotState::Empty; slot_count as usize];
    let mut seen_active = false;
    for (i, &code) in codes.iter().take(slot_count as usize).enumerate() {
        let state = match SlotState::from_status_code(code) {
            Some(s) => s,
            None => {
                warn!(slot = i, code, "unknown slot status code, treating as empty");
                SlotState::Empty
            }
        };
        slots[i] = if state == SlotState::Active && seen_active {
            warn!(slot = i, "device reported more than one active slot");
            SlotState::Uploaded
        } else {
            state
        };
        seen_active |= state == SlotState::Active;
    }
    if codes.len() > slot_count as usize {
        warn!(
            reported = codes.len(),
            slot_count, "device reported more slots than configured"
        );
    }
    slots
}

/// Exclusive claim on a slot for one upload.
///
/// Dropping an uncommitted reservation restores the slot's pre-upload state
/// and opens the gate for the next upload.
pub(crate) struct SlotReservation {
    registry: Arc<SlotRegistry>,
    slot: u8,
    previous: SlotState,
    committed: bool,
}

impl SlotReservation {
    pub(crate) fn slot(&self) -> u8 {
        self.slot
    }

    pub(crate) fn previous(&self) -> SlotState {
        self.previous
    }

    /// Marks the slot `Uploaded`. The only path to that state from an upload.
    pub(crate) fn commit(mut self) {
        let mut inner = self.registry.lock();
        inner.slots[self.slot as usize] = SlotState::Uploaded;
        inner.in_flight = None;
        self.committed = true;
        info!(slot = self.slot, "upload committed");
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut inner = self.registry.lock();
        inner.slots[self.slot as usize] = self.previous;
        inner.in_flight = None;
        debug!(slot = self.slot, restored = ?self.previous, "upload reservation released");
    }
}
