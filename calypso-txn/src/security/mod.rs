//! Card security policy
//!
//! Declares which keys may open a session at each write-access level, which
//! keys may be used for stored-value operations and which optional protocol
//! behaviors are enabled. The policy is built with [`CardSecuritySetting`]
//! (directly or from a JSON [`SecurityConfig`]) and handed to the transaction
//! manager, which only reads it afterwards.

pub mod config;
pub mod setting;

pub use config::SecurityConfig;
pub use setting::{CardSecuritySetting, SamResource, SamRevocationService};

use std::fmt;

use serde::{Deserialize, Serialize};

/// Permission tier under which a secure session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WriteAccessLevel {
    Personalization,
    Load,
    Debit,
}

impl WriteAccessLevel {
    pub const ALL: [WriteAccessLevel; 3] = [
        WriteAccessLevel::Personalization,
        WriteAccessLevel::Load,
        WriteAccessLevel::Debit,
    ];

    /// Position in per-level tables
    pub fn index(self) -> usize {
        match self {
            WriteAccessLevel::Personalization => 0,
            WriteAccessLevel::Load => 1,
            WriteAccessLevel::Debit => 2,
        }
    }

    /// Key index sent in P1 of Open Secure Session
    pub fn key_index(self) -> u8 {
        self.index() as u8 + 1
    }
}

impl fmt::Display for WriteAccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteAccessLevel::Personalization => "PERSONALIZATION",
            WriteAccessLevel::Load => "LOAD",
            WriteAccessLevel::Debit => "DEBIT",
        };
        f.write_str(name)
    }
}

/// A (KIF, KVC) pair selecting one key on the SAM
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct KeyReference {
    pub kif: u8,
    pub kvc: u8,
}

impl KeyReference {
    pub fn new(kif: u8, kvc: u8) -> Self {
        Self { kif, kvc }
    }
}

impl fmt::Display for KeyReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KIF={:02X}h KVC={:02X}h", self.kif, self.kvc)
    }
}
