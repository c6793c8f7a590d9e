//! Secure Access Module interface
//!
//! The engine never computes a session key or a MAC itself. It drives a
//! [`SamCoordinator`], which owns the keys: session key derivation, session
//! MAC computation and verification, SV command signing and PIN ciphering.
//! [`SoftwareSam`] is a reference implementation holding its keys in memory.

pub mod soft;

pub use soft::{SamFault, SoftwareSam};

use std::fmt;

use thiserror::Error;
use zeroize::Zeroizing;

use crate::security::{KeyReference, WriteAccessLevel};
use crate::transaction::{SvAction, SvOperation};

/// SAM failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SamError {
    #[error("SAM channel failure: {0}")]
    Io(String),

    #[error("{0}")]
    Anomaly(String),

    #[error("{0}")]
    Revoked(String),
}

/// Identity of a SAM, as bound in the security setting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalypsoSam {
    pub serial_number: [u8; 4],
    pub product_name: String,
}

impl CalypsoSam {
    pub fn new(serial_number: [u8; 4], product_name: impl Into<String>) -> Self {
        Self { serial_number, product_name: product_name.into() }
    }
}

/// Key material of one card session
///
/// Not cloneable; wiped from memory when dropped.
pub struct SessionKeys {
    key: Zeroizing<Vec<u8>>,
    reference: KeyReference,
}

impl SessionKeys {
    pub fn new(key: Vec<u8>, reference: KeyReference) -> Self {
        Self { key: Zeroizing::new(key), reference }
    }

    pub fn material(&self) -> &[u8] {
        &self.key
    }

    /// Card key the session keys were derived from
    pub fn reference(&self) -> KeyReference {
        self.reference
    }
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys")
            .field("reference", &self.reference)
            .field("key", &"<redacted>")
            .finish()
    }
}

/// What the SAM needs to sign an SV Reload, Debit or Undebit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvSignatureRequest {
    pub operation: SvOperation,
    pub action: SvAction,
    /// SV key of the card, as reported by SV Get
    pub key: KeyReference,
    /// Data of the SV Get response the operation is based on
    pub sv_get_data: Vec<u8>,
    /// Instruction byte of the SV command
    pub ins: u8,
    /// Command data preceding the SAM identifier
    pub command_data: Vec<u8>,
}

/// SAM contribution to an SV command: appended to the command data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvSignature {
    pub sam_id: [u8; 4],
    pub sam_tnum: u32,
    pub signature: Vec<u8>,
}

impl SvSignature {
    /// SAM identifier, SAM transaction number (3 bytes) and signature
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7 + self.signature.len());
        out.extend_from_slice(&self.sam_id);
        out.extend_from_slice(&self.sam_tnum.to_be_bytes()[1..]);
        out.extend_from_slice(&self.signature);
        out
    }
}

/// Cryptographic companion of a card transaction
pub trait SamCoordinator {
    fn identity(&self) -> &CalypsoSam;

    /// Select the card whose serial number diversifies the card keys
    fn select_diversifier(&mut self, card_serial: &[u8]) -> Result<(), SamError>;

    /// Terminal challenge sent in Open Secure Session
    fn get_challenge(&mut self) -> Result<Vec<u8>, SamError>;

    /// Derive the session keys from the last terminal challenge and the card challenge
    fn derive_session_keys(
        &mut self,
        level: WriteAccessLevel,
        key: KeyReference,
        card_challenge: &[u8],
    ) -> Result<SessionKeys, SamError>;

    /// Terminal session MAC over the session digest
    fn compute_mac(&mut self, keys: &SessionKeys, digest: &[u8]) -> Result<Vec<u8>, SamError>;

    /// Check the card session MAC over the session digest
    fn verify_mac(&mut self, keys: &SessionKeys, digest: &[u8], candidate: &[u8]) -> Result<bool, SamError>;

    fn sign_sv_operation(&mut self, request: &SvSignatureRequest) -> Result<SvSignature, SamError>;

    /// Check the MAC returned by the card for the last signed SV operation
    fn check_sv_response(&mut self, card_mac: &[u8]) -> Result<bool, SamError>;

    /// Cipher a PIN with `key` for the given card challenge
    fn cipher_pin(&mut self, key: KeyReference, card_challenge: &[u8], pin: &[u8]) -> Result<Vec<u8>, SamError>;
}

impl<T: SamCoordinator + ?Sized> SamCoordinator for Box<T> {
    fn identity(&self) -> &CalypsoSam {
        (**self).identity()
    }

    fn select_diversifier(&mut self, card_serial: &[u8]) -> Result<(), SamError> {
        (**self).select_diversifier(card_serial)
    }

    fn get_challenge(&mut self) -> Result<Vec<u8>, SamError> {
        (**self).get_challenge()
    }

    fn derive_session_keys(
        &mut self,
        level: WriteAccessLevel,
        key: KeyReference,
        card_challenge: &[u8],
    ) -> Result<SessionKeys, SamError> {
        (**self).derive_session_keys(level, key, card_challenge)
    }

    fn compute_mac(&mut self, keys: &SessionKeys, digest: &[u8]) -> Result<Vec<u8>, SamError> {
        (**self).compute_mac(keys, digest)
    }

    fn verify_mac(&mut self, keys: &SessionKeys, digest: &[u8], candidate: &[u8]) -> Result<bool, SamError> {
        (**self).verify_mac(keys, digest, candidate)
    }

    fn sign_sv_operation(&mut self, request: &SvSignatureRequest) -> Result<SvSignature, SamError> {
        (**self).sign_sv_operation(request)
    }

    fn check_sv_response(&mut self, card_mac: &[u8]) -> Result<bool, SamError> {
        (**self).check_sv_response(card_mac)
    }

    fn cipher_pin(&mut self, key: KeyReference, card_challenge: &[u8], pin: &[u8]) -> Result<Vec<u8>, SamError> {
        (**self).cipher_pin(key, card_challenge, pin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_keys_debug_is_redacted() {
        let keys = SessionKeys::new(vec![0xAB; 24], KeyReference::new(0x30, 0x79));
        let text = format!("{:?}", keys);
        assert!(text.contains("redacted"));
        assert!(!text.contains("171"));
    }

    #[test]
    fn test_sv_signature_bytes() {
        let signature = SvSignature { sam_id: [1, 2, 3, 4], sam_tnum: 0x000A0B, signature: vec![9; 5] };
        assert_eq!(signature.to_bytes(), vec![1, 2, 3, 4, 0x00, 0x0A, 0x0B, 9, 9, 9, 9, 9]);
    }
}
