//! Update sessions: one per (device, uid) installation attempt.

use std::fmt;

use fadeabe_core::{DeviceId, SessionState, UpdateId};
use fadeabe_store::{FailureRecord, SessionRecord};

use crate::error::{PipelineError, Result};

/// A live update session.
///
/// Wraps the persisted [`SessionRecord`] together with what must never be
/// persisted: the recovered symmetric key.
pub struct UpdateSession {
    record: SessionRecord,
    symmetric_key: Option<[u8; 32]>,
}

impl UpdateSession {
    /// A new session in `PURCHASED`.
    pub fn new(device: DeviceId, uid: UpdateId, now: i64) -> Self {
        Self::from_record(SessionRecord::new(device, uid, now))
    }

    /// Resume a session from its persisted record.
    pub fn from_record(record: SessionRecord) -> Self {
        Self {
            record,
            symmetric_key: None,
        }
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    pub fn into_record(self) -> SessionRecord {
        self.record
    }

    pub fn uid(&self) -> &UpdateId {
        &self.record.uid
    }

    pub fn state(&self) -> SessionState {
        self.record.state
    }

    pub fn symmetric_key(&self) -> Option<&[u8; 32]> {
        self.symmetric_key.as_ref()
    }

    pub(crate) fn set_symmetric_key(&mut self, key: [u8; 32]) {
        self.symmetric_key = Some(key);
    }

    pub(crate) fn set_artifact_path(&mut self, path: Option<String>) {
        self.record.artifact_path = path;
    }

    pub(crate) fn set_failure(&mut self, failure: FailureRecord) {
        self.record.failure = Some(failure);
    }

    pub(crate) fn set_refund_tx(&mut self, tx: String) {
        self.record.refund_tx = Some(tx);
    }

    pub(crate) fn set_confirm_tx(&mut self, tx: String) {
        self.record.confirm_tx = Some(tx);
    }

    /// Move to `next`, rejecting transitions the state machine does not have.
    pub fn advance(&mut self, next: SessionState, now: i64) -> Result<()> {
        if !can_advance(self.record.state, next) {
            return Err(PipelineError::InvalidTransition {
                from: self.record.state,
                to: next,
            });
        }
        self.record.state = next;
        self.record.updated_at = now;
        if next.is_terminal() {
            self.symmetric_key = None;
        }
        Ok(())
    }
}

impl fmt::Debug for UpdateSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateSession")
            .field("record", &self.record)
            .field("symmetric_key", &self.symmetric_key.map(|_| ".."))
            .finish()
    }
}

fn can_advance(from: SessionState, to: SessionState) -> bool {
    use SessionState::*;
    match to {
        // Also the restart point when a session is resumed.
        Downloading => from.is_refundable(),
        HashVerified | SignatureVerified | KeyRecovered | PayloadDecrypted | Installed
        | Confirmed => from.to_u8() + 1 == to.to_u8(),
        RefundPending => from.is_refundable(),
        Refunded | RefundFailed => from == RefundPending,
        InstallFailed => from == PayloadDecrypted,
        Purchased => false,
    }
}
