//! Secure transaction engine
//!
//! [`CardTransactionManager`] queues card operations through `prepare_*`
//! calls and sends them through `process_*` calls, inside or outside a
//! Calypso secure session. Inside a session every exchange feeds the session
//! digest, and the closing MAC exchange with the SAM certifies the data read
//! and written.

pub mod audit;
pub mod command;
pub mod digest;
pub mod manager;
pub mod pin;
pub mod queue;
pub mod session;
pub mod sv;

pub use audit::{AuditEntry, AuditKind, AuditTrail};
pub use command::{CardCommand, SvAction, SvOperation};
pub use digest::SessionDigest;
pub use manager::CardTransactionManager;
pub use queue::CommandQueue;
pub use session::SessionState;
