//! JSON-loadable security configuration

use serde::{Deserialize, Serialize};

use super::{KeyReference, WriteAccessLevel};
use crate::error::{Result, TransactionError};

/// Default key of one write-access level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelKey {
    pub level: WriteAccessLevel,
    pub kif: u8,
    pub kvc: u8,
}

/// KIF to use for a level when the card reports a given KVC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KifOverride {
    pub level: WriteAccessLevel,
    pub kvc: u8,
    pub kif: u8,
}

/// Serializable form of [`super::CardSecuritySetting`]
///
/// ```json
/// {
///   "default_keys": [{ "level": "DEBIT", "kif": 48, "kvc": 121 }],
///   "authorized_session_keys": [{ "kif": 48, "kvc": 121 }],
///   "multiple_session": true
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    pub default_keys: Vec<LevelKey>,
    pub kif_overrides: Vec<KifOverride>,
    pub authorized_session_keys: Vec<KeyReference>,
    pub authorized_sv_keys: Vec<KeyReference>,
    pub pin_verification_cipher_key: Option<KeyReference>,
    pub pin_modification_cipher_key: Option<KeyReference>,
    pub multiple_session: bool,
    pub ratification: bool,
    pub pin_plain_transmission: bool,
    pub sv_load_and_debit_log: bool,
    pub transaction_audit: bool,
    pub sv_negative_balance: bool,
}

impl SecurityConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| TransactionError::Configuration(format!("invalid security configuration: {}", e)))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| TransactionError::Configuration(format!("cannot serialize security configuration: {}", e)))
    }
}
