//! Session state machine states and the per-session context

use std::collections::BTreeSet;
use std::fmt;

use super::digest::SessionDigest;
use crate::sam::SessionKeys;
use crate::security::WriteAccessLevel;

/// State of the card transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No secure session
    Idle,
    Opening,
    /// Secure session open; commands may be prepared and flushed
    Open,
    Closing,
    /// Closed; card MAC verified (or unverified, see the close result)
    Closed,
    /// Abandoned without closing MAC exchange
    Cancelled,
    /// Failed; session data is untrusted
    Error,
}

impl SessionState {
    /// States from which a new session may be opened
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Idle | SessionState::Closed | SessionState::Cancelled | SessionState::Error
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Opening => "OPENING",
            SessionState::Open => "OPEN",
            SessionState::Closing => "CLOSING",
            SessionState::Closed => "CLOSED",
            SessionState::Cancelled => "CANCELLED",
            SessionState::Error => "ERROR",
        };
        f.write_str(name)
    }
}

/// Everything that lives between opening and closing
///
/// Dropping the context wipes the session keys.
#[derive(Debug)]
pub(crate) struct SessionContext {
    pub level: WriteAccessLevel,
    pub keys: SessionKeys,
    pub digest: SessionDigest,
    /// SV Reload/Debit/Undebit performed since `process_opening`
    pub sv_operations: usize,
    /// Card sessions closed and reopened to make room in the buffer
    pub split_count: usize,
    pub buffer_used: usize,
    /// The close command has been sent: the card session is no longer open
    pub closing: bool,
    pub touched_files: BTreeSet<u8>,
    pub sv_touched: bool,
}

impl SessionContext {
    pub fn new(level: WriteAccessLevel, keys: SessionKeys, digest: SessionDigest) -> Self {
        Self {
            level,
            keys,
            digest,
            sv_operations: 0,
            split_count: 0,
            buffer_used: 0,
            closing: false,
            touched_files: BTreeSet::new(),
            sv_touched: false,
        }
    }

    /// Carry the transaction-wide bookkeeping of the previous card session
    pub fn continue_from(&mut self, previous: SessionContext) {
        self.sv_operations = previous.sv_operations;
        self.split_count = previous.split_count + 1;
        self.touched_files = previous.touched_files;
        self.sv_touched = previous.sv_touched;
    }

    pub fn is_split(&self) -> bool {
        self.split_count > 0
    }
}
