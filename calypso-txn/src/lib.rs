//! Secure transaction engine for Calypso cards
//!
//! This crate drives a Calypso contactless ticketing card through an
//! authenticated session with the help of a SAM (Secure Access Module):
//!
//! - Open a secure session at a write-access level (personalization, load, debit)
//! - Queue reads, writes, counter and stored-value operations, then flush them
//! - Close the session with a MAC exchange that certifies every exchange
//!
//! The physical reader is abstracted by [`channel::CardChannel`] and the SAM by
//! [`sam::SamCoordinator`]. [`sam::SoftwareSam`] keeps 3DES keys in memory.

// Core modules
pub mod apdu;
pub mod card;
pub mod channel;
pub mod crypto;
pub mod error;
pub mod sam;
pub mod security;
pub mod transaction;

pub use card::{CalypsoCard, DataTrust};
pub use channel::{CardChannel, ChannelError};
pub use error::{ErrorKind, Result, TransactionError};
pub use sam::{CalypsoSam, SamCoordinator, SoftwareSam};
pub use security::{CardSecuritySetting, KeyReference, SecurityConfig, WriteAccessLevel};
pub use transaction::{AuditKind, CardTransactionManager, SessionState, SvAction, SvOperation};
