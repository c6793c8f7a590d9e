//! Card file-system model
//!
//! In-memory mirror of what the terminal knows about the card: identity,
//! elementary files, counters and the stored-value ledger. It is populated by
//! the selection step and then only updated by the transaction engine from
//! card responses.

pub mod calypso_card;
pub mod file;
pub mod sv;

pub use calypso_card::{CalypsoCard, ProductType};
pub use file::{DirectoryHeader, ElementaryFile, FileData, FileHeader, FileType};
pub use sv::{SvDebitLogRecord, SvLedger, SvLoadLogRecord};

use serde::Serialize;

/// How far data held in the model can be trusted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum DataTrust {
    /// Read or known outside of any secure session
    #[default]
    Unsecured,
    /// Exchanged inside a secure session that is still open
    Pending,
    /// Exchanged inside a session whose card MAC was verified
    Certified,
    /// The card closed the session but its MAC could not be checked
    Unverified,
    /// The session was cancelled or failed
    Untrusted,
}

/// Custom serde module for base64 encoding of byte vectors
pub(crate) mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::Serializer;

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if bytes.is_empty() {
            serializer.serialize_str("")
        } else {
            serializer.serialize_str(&STANDARD.encode(bytes))
        }
    }
}

/// Serde helper for `BTreeMap<u8, Vec<u8>>` record maps with base64 values
pub(crate) mod base64_records {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::ser::SerializeMap;
    use serde::Serializer;
    use std::collections::BTreeMap;

    pub fn serialize<S>(records: &BTreeMap<u8, Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(records.len()))?;
        for (number, content) in records {
            map.serialize_entry(number, &STANDARD.encode(content))?;
        }
        map.end()
    }
}
