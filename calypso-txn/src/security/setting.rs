//! Security setting builder and session key resolution

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::debug;

use super::{KeyReference, SecurityConfig, WriteAccessLevel};
use crate::card::CalypsoCard;
use crate::error::{Result, TransactionError};
use crate::sam::CalypsoSam;

/// Tells whether a SAM found in the card's SV logs has been revoked
pub trait SamRevocationService {
    fn is_sam_revoked(&self, sam_id: &[u8], sam_tnum: u32) -> bool;
}

/// SAM bound to the setting: reader it sits in and its identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SamResource {
    pub reader_name: String,
    pub sam: CalypsoSam,
}

/// Security policy of a card transaction
///
/// Builder methods consume and return the setting. Once handed to a
/// transaction manager it is only read.
#[derive(Default)]
pub struct CardSecuritySetting {
    default_keys: BTreeMap<WriteAccessLevel, KeyReference>,
    kif_overrides: BTreeMap<(WriteAccessLevel, u8), u8>,
    authorized_session_keys: BTreeSet<KeyReference>,
    authorized_sv_keys: BTreeSet<KeyReference>,
    pin_verification_cipher_key: Option<KeyReference>,
    pin_modification_cipher_key: Option<KeyReference>,
    multiple_session: bool,
    ratification: bool,
    pin_plain_transmission: bool,
    sv_load_and_debit_log: bool,
    transaction_audit: bool,
    sv_negative_balance: bool,
    sam_resource: Option<SamResource>,
    sam_revocation_service: Option<Box<dyn SamRevocationService>>,
}

impl fmt::Debug for CardSecuritySetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CardSecuritySetting")
            .field("default_keys", &self.default_keys)
            .field("kif_overrides", &self.kif_overrides)
            .field("authorized_session_keys", &self.authorized_session_keys)
            .field("authorized_sv_keys", &self.authorized_sv_keys)
            .field("multiple_session", &self.multiple_session)
            .field("ratification", &self.ratification)
            .field("transaction_audit", &self.transaction_audit)
            .field("sam_resource", &self.sam_resource)
            .field("sam_revocation_service", &self.sam_revocation_service.is_some())
            .finish_non_exhaustive()
    }
}

impl CardSecuritySetting {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a setting from a deserialized configuration document.
    ///
    /// The SAM resource is not part of the document and must still be bound
    /// with [`CardSecuritySetting::set_sam_resource`].
    pub fn from_config(config: &SecurityConfig) -> Self {
        let mut setting = Self::new();
        for entry in &config.default_keys {
            setting = setting.assign_default_key_identifiers(entry.level, entry.kif, entry.kvc);
        }
        for entry in &config.kif_overrides {
            setting = setting.assign_key_identifiers(entry.level, entry.kvc, entry.kif);
        }
        for key in &config.authorized_session_keys {
            setting = setting.add_authorized_session_key(key.kif, key.kvc);
        }
        for key in &config.authorized_sv_keys {
            setting = setting.add_authorized_sv_key(key.kif, key.kvc);
        }
        setting.pin_verification_cipher_key = config.pin_verification_cipher_key;
        setting.pin_modification_cipher_key = config.pin_modification_cipher_key;
        setting.multiple_session = config.multiple_session;
        setting.ratification = config.ratification;
        setting.pin_plain_transmission = config.pin_plain_transmission;
        setting.sv_load_and_debit_log = config.sv_load_and_debit_log;
        setting.transaction_audit = config.transaction_audit;
        setting.sv_negative_balance = config.sv_negative_balance;
        setting
    }

    /// Key used for `level` when the card does not publish one
    pub fn assign_default_key_identifiers(mut self, level: WriteAccessLevel, kif: u8, kvc: u8) -> Self {
        self.default_keys.insert(level, KeyReference::new(kif, kvc));
        self
    }

    /// KIF to use for `level` when the card reports `kvc`
    pub fn assign_key_identifiers(mut self, level: WriteAccessLevel, kvc: u8, kif: u8) -> Self {
        self.kif_overrides.insert((level, kvc), kif);
        self
    }

    pub fn add_authorized_session_key(mut self, kif: u8, kvc: u8) -> Self {
        self.authorized_session_keys.insert(KeyReference::new(kif, kvc));
        self
    }

    pub fn add_authorized_sv_key(mut self, kif: u8, kvc: u8) -> Self {
        self.authorized_sv_keys.insert(KeyReference::new(kif, kvc));
        self
    }

    pub fn enable_multiple_session(mut self) -> Self {
        self.multiple_session = true;
        self
    }

    pub fn enable_ratification_mechanism(mut self) -> Self {
        self.ratification = true;
        self
    }

    pub fn enable_pin_plain_transmission(mut self) -> Self {
        self.pin_plain_transmission = true;
        self
    }

    pub fn enable_sv_load_and_debit_log(mut self) -> Self {
        self.sv_load_and_debit_log = true;
        self
    }

    pub fn enable_transaction_audit(mut self) -> Self {
        self.transaction_audit = true;
        self
    }

    pub fn authorize_sv_negative_balance(mut self) -> Self {
        self.sv_negative_balance = true;
        self
    }

    pub fn set_pin_verification_ciphering_key(mut self, kif: u8, kvc: u8) -> Self {
        self.pin_verification_cipher_key = Some(KeyReference::new(kif, kvc));
        self
    }

    pub fn set_pin_modification_ciphering_key(mut self, kif: u8, kvc: u8) -> Self {
        self.pin_modification_cipher_key = Some(KeyReference::new(kif, kvc));
        self
    }

    /// Bind the SAM used for every cryptographic operation
    pub fn set_sam_resource(mut self, reader_name: impl Into<String>, sam: CalypsoSam) -> Self {
        self.sam_resource = Some(SamResource { reader_name: reader_name.into(), sam });
        self
    }

    pub fn set_sam_revocation_service(mut self, service: Box<dyn SamRevocationService>) -> Self {
        self.sam_revocation_service = Some(service);
        self
    }

    pub fn sam_resource(&self) -> Option<&SamResource> {
        self.sam_resource.as_ref()
    }

    pub fn is_multiple_session_enabled(&self) -> bool {
        self.multiple_session
    }

    pub fn is_ratification_enabled(&self) -> bool {
        self.ratification
    }

    pub fn is_pin_plain_transmission_enabled(&self) -> bool {
        self.pin_plain_transmission
    }

    pub fn is_sv_load_and_debit_log_enabled(&self) -> bool {
        self.sv_load_and_debit_log
    }

    pub fn is_transaction_audit_enabled(&self) -> bool {
        self.transaction_audit
    }

    pub fn is_sv_negative_balance_authorized(&self) -> bool {
        self.sv_negative_balance
    }

    pub fn pin_verification_cipher_key(&self) -> Option<KeyReference> {
        self.pin_verification_cipher_key
    }

    pub fn pin_modification_cipher_key(&self) -> Option<KeyReference> {
        self.pin_modification_cipher_key
    }

    pub fn is_session_key_authorized(&self, key: KeyReference) -> bool {
        self.authorized_session_keys.contains(&key)
    }

    pub fn is_sv_key_authorized(&self, key: KeyReference) -> bool {
        self.authorized_sv_keys.contains(&key)
    }

    pub fn is_sam_revoked(&self, sam_id: &[u8], sam_tnum: u32) -> bool {
        self.sam_revocation_service
            .as_ref()
            .is_some_and(|service| service.is_sam_revoked(sam_id, sam_tnum))
    }

    /// Resolve the session key for `level` against what the card publishes.
    ///
    /// KVC: the card's, else the level default. KIF: the card's, else the
    /// override for (level, KVC), else the level default. The result must be
    /// in the authorized session key set.
    pub fn resolve_session_key(&self, level: WriteAccessLevel, card: &CalypsoCard) -> Result<KeyReference> {
        let header = card.directory_header.as_ref();
        let default = self.default_keys.get(&level);

        let kvc = header
            .and_then(|h| h.kvc(level))
            .or(default.map(|k| k.kvc))
            .ok_or_else(|| TransactionError::Configuration(format!("no KVC available for level {}", level)))?;

        let kif = header
            .and_then(|h| h.kif(level))
            .or_else(|| self.kif_overrides.get(&(level, kvc)).copied())
            .or(default.map(|k| k.kif))
            .ok_or_else(|| TransactionError::Configuration(format!("no KIF available for level {}", level)))?;

        let key = KeyReference::new(kif, kvc);
        if !self.is_session_key_authorized(key) {
            return Err(TransactionError::UnauthorizedKey { kif, kvc });
        }
        debug!("Session key for {} resolved to {}", level, key);
        Ok(key)
    }
}
