//! Transaction errors
//!
//! Every engine operation returns [`Result`]. Each [`TransactionError`]
//! variant maps to one [`ErrorKind`], which is what callers should match on
//! to decide whether to retry, reconcile or give up.

use thiserror::Error;

use crate::apdu::SW;
use crate::channel::ChannelError;
use crate::sam::SamError;

/// Failure classes surfaced by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Card or SAM channel failure; retry with a fresh session
    Io,
    /// Well-formed but rejecting answer from the card or the SAM
    Anomaly,
    /// The card closed the session but its proof could not be checked
    AuthenticationNotVerified,
    /// Locked card credential or revoked SAM
    Revoked,
    /// Key refused by the security policy
    UnauthorizedKey,
    /// Decoded data violates an invariant
    Inconsistency,
    /// Command and response counts do not match
    DesynchronizedExchanges,
    /// Illegal argument, illegal state or missing setting, detected before I/O
    Configuration,
}

/// Errors of the transaction engine
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("card communication failed: {0}")]
    CardIo(#[from] ChannelError),

    #[error("SAM communication failed: {0}")]
    SamIo(String),

    #[error("card rejected {command} with status {sw:04X}")]
    CardAnomaly { command: &'static str, sw: u16 },

    #[error("malformed response to {command}: {reason}")]
    MalformedResponse { command: &'static str, reason: String },

    #[error("SAM rejected the operation: {0}")]
    SamAnomaly(String),

    #[error("session buffer overflow: {required} units needed, card accepts {capacity}")]
    SessionBufferOverflow { required: usize, capacity: usize },

    #[error("card rejected the session closing with status {sw:04X}")]
    CardCloseRejected { sw: u16 },

    #[error("card session MAC is invalid")]
    InvalidCardSignature,

    #[error("card SV response MAC is invalid")]
    SvAuthentication,

    #[error("card authentication not verified: {0}")]
    AuthenticationNotVerified(String),

    #[error("card credential blocked: {0}")]
    CardRevoked(String),

    #[error("SAM revoked: {0}")]
    SamRevoked(String),

    #[error("unauthorized key KIF={kif:02X}h KVC={kvc:02X}h")]
    UnauthorizedKey { kif: u8, kvc: u8 },

    #[error("inconsistent data: {0}")]
    Inconsistency(String),

    #[error("desynchronized exchanges: {commands} commands sent, {responses} responses received")]
    DesynchronizedExchanges { commands: usize, responses: usize },

    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl TransactionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransactionError::CardIo(_) | TransactionError::SamIo(_) => ErrorKind::Io,
            TransactionError::CardAnomaly { .. }
            | TransactionError::MalformedResponse { .. }
            | TransactionError::SamAnomaly(_)
            | TransactionError::SessionBufferOverflow { .. }
            | TransactionError::CardCloseRejected { .. }
            | TransactionError::InvalidCardSignature
            | TransactionError::SvAuthentication => ErrorKind::Anomaly,
            TransactionError::AuthenticationNotVerified(_) => ErrorKind::AuthenticationNotVerified,
            TransactionError::CardRevoked(_) | TransactionError::SamRevoked(_) => ErrorKind::Revoked,
            TransactionError::UnauthorizedKey { .. } => ErrorKind::UnauthorizedKey,
            TransactionError::Inconsistency(_) => ErrorKind::Inconsistency,
            TransactionError::DesynchronizedExchanges { .. } => ErrorKind::DesynchronizedExchanges,
            TransactionError::IllegalArgument(_)
            | TransactionError::IllegalState(_)
            | TransactionError::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Error for a card status word that is not 9000
    pub fn from_card_status(command: &'static str, sw: u16) -> Self {
        if SW::is_locked(sw) {
            TransactionError::CardRevoked(format!("{} answered {:04X}", command, sw))
        } else {
            TransactionError::CardAnomaly { command, sw }
        }
    }

    /// Only channel failures may be retried, and only with a new session
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Io
    }
}

impl From<SamError> for TransactionError {
    fn from(err: SamError) -> Self {
        match err {
            SamError::Io(reason) => TransactionError::SamIo(reason),
            SamError::Anomaly(reason) => TransactionError::SamAnomaly(reason),
            SamError::Revoked(reason) => TransactionError::SamRevoked(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, TransactionError>;
