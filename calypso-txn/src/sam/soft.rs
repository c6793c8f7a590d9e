//! In-memory SAM
//!
//! Holds master keys in memory and implements the Calypso key hierarchy with
//! 3DES: card keys are the master keys diversified with the card serial
//! number, session keys are derived from the card key and both challenges,
//! and every MAC is a truncated 3DES CBC-MAC. The derivation helpers are
//! public so that card simulators can compute the card side of a session.

use std::collections::BTreeMap;

use log::{debug, warn};
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{CalypsoSam, SamCoordinator, SamError, SessionKeys, SvSignature, SvSignatureRequest};
use crate::apdu::commands::CHALLENGE_LENGTH;
use crate::crypto::{TDesError, TDesOperations};
use crate::security::{KeyReference, WriteAccessLevel};

/// Size of the session MACs exchanged at closing
pub const SESSION_MAC_SIZE: usize = 4;
/// Size of the SAM signature appended to SV commands
pub const SV_SIGNATURE_SIZE: usize = 5;
/// Size of the MAC returned by the card for an SV command outside a session
pub const SV_RESPONSE_MAC_SIZE: usize = 3;
/// Size of the card challenge returned by Open Secure Session
pub const CARD_CHALLENGE_SIZE: usize = 4;

fn serial_block(serial: &[u8]) -> [u8; 8] {
    let mut block = [0u8; 8];
    let take = serial.len().min(8);
    block[8 - take..].copy_from_slice(&serial[serial.len() - take..]);
    block
}

/// Card key for `serial`: master key diversified with the card serial number
pub fn diversify_key(master: &[u8], serial: &[u8]) -> Result<Vec<u8>, TDesError> {
    let s = serial_block(serial);
    let mut input = Vec::with_capacity(TDesOperations::KEY_SIZE);
    input.extend_from_slice(&s);
    input.extend(s.iter().map(|b| !b));
    input.extend(s.iter().rev());
    TDesOperations::encrypt_ecb(master, &input)
}

/// Session key from the card key, the terminal challenge and the card challenge
pub fn derive_session_key(
    card_key: &[u8],
    terminal_challenge: &[u8],
    card_challenge: &[u8],
) -> Result<Vec<u8>, TDesError> {
    if terminal_challenge.len() != CHALLENGE_LENGTH {
        return Err(TDesError::InvalidData(terminal_challenge.len()));
    }
    if card_challenge.len() != CARD_CHALLENGE_SIZE {
        return Err(TDesError::InvalidData(card_challenge.len()));
    }
    let mut input = Vec::with_capacity(TDesOperations::KEY_SIZE);
    input.extend_from_slice(card_challenge);
    input.extend_from_slice(&terminal_challenge[..4]);
    input.extend_from_slice(&terminal_challenge[4..]);
    input.extend_from_slice(card_challenge);
    input.extend(
        terminal_challenge
            .iter()
            .zip(card_challenge.iter().cycle())
            .map(|(t, c)| t ^ c),
    );
    TDesOperations::encrypt_ecb(card_key, &input)
}

/// Truncated session MAC over `data`
pub fn session_mac(session_key: &[u8], data: &[u8]) -> Result<Vec<u8>, TDesError> {
    Ok(TDesOperations::cbc_mac(session_key, data)?[..SESSION_MAC_SIZE].to_vec())
}

/// SAM signature of an SV command
pub fn sv_signature(
    card_key: &[u8],
    sv_get_data: &[u8],
    ins: u8,
    command_data: &[u8],
    sam_id: &[u8],
    sam_tnum: u32,
) -> Result<Vec<u8>, TDesError> {
    let mut input = Vec::with_capacity(sv_get_data.len() + command_data.len() + 8);
    input.extend_from_slice(sv_get_data);
    input.push(ins);
    input.extend_from_slice(command_data);
    input.extend_from_slice(sam_id);
    input.extend_from_slice(&sam_tnum.to_be_bytes()[1..]);
    Ok(TDesOperations::cbc_mac(card_key, &input)?[..SV_SIGNATURE_SIZE].to_vec())
}

/// MAC the card returns over the SAM signature it accepted
pub fn sv_response_mac(card_key: &[u8], signature: &[u8]) -> Result<Vec<u8>, TDesError> {
    Ok(TDesOperations::cbc_mac(card_key, signature)?[..SV_RESPONSE_MAC_SIZE].to_vec())
}

/// Ciphered form of a 4-digit PIN for a card challenge
pub fn pin_cryptogram(card_key: &[u8], card_challenge: &[u8], pin: &[u8]) -> Result<Vec<u8>, TDesError> {
    if pin.len() != 4 {
        return Err(TDesError::InvalidData(pin.len()));
    }
    if card_challenge.len() < 4 {
        return Err(TDesError::InvalidData(card_challenge.len()));
    }
    let mut block = [0u8; 8];
    block[..4].copy_from_slice(pin);
    block[4..].copy_from_slice(&card_challenge[..4]);
    Ok(TDesOperations::encrypt_block(card_key, &block)?.to_vec())
}

fn anomaly(err: TDesError) -> SamError {
    SamError::Anomaly(err.to_string())
}

/// Faults a [`SoftwareSam`] can be told to simulate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamFault {
    /// Every operation fails as if the SAM reader was unplugged
    Io,
    /// Every operation is refused because the SAM is revoked
    Revoked,
    /// Terminal MACs are corrupted
    CorruptMac,
}

/// Reference SAM keeping master keys in memory
pub struct SoftwareSam {
    identity: CalypsoSam,
    keys: BTreeMap<KeyReference, Zeroizing<Vec<u8>>>,
    diversifier: Option<Vec<u8>>,
    challenge: Option<Vec<u8>>,
    sam_tnum: u32,
    pending_sv: Option<(KeyReference, Vec<u8>)>,
    fault: Option<SamFault>,
}

impl SoftwareSam {
    pub fn new(identity: CalypsoSam) -> Self {
        Self {
            identity,
            keys: BTreeMap::new(),
            diversifier: None,
            challenge: None,
            sam_tnum: 0,
            pending_sv: None,
            fault: None,
        }
    }

    /// Load a 24-byte master key
    pub fn with_key(mut self, kif: u8, kvc: u8, master: Vec<u8>) -> Self {
        self.keys.insert(KeyReference::new(kif, kvc), Zeroizing::new(master));
        self
    }

    pub fn inject_fault(&mut self, fault: SamFault) {
        self.fault = Some(fault);
    }

    pub fn clear_fault(&mut self) {
        self.fault = None;
    }

    /// Number of SV signatures produced so far
    pub fn sam_tnum(&self) -> u32 {
        self.sam_tnum
    }

    fn check_fault(&self) -> Result<(), SamError> {
        match self.fault {
            Some(SamFault::Io) => Err(SamError::Io("SAM not responding".into())),
            Some(SamFault::Revoked) => Err(SamError::Revoked("SAM locked".into())),
            Some(SamFault::CorruptMac) | None => Ok(()),
        }
    }

    fn card_key(&self, key: KeyReference) -> Result<Zeroizing<Vec<u8>>, SamError> {
        let master = self
            .keys
            .get(&key)
            .ok_or_else(|| SamError::Anomaly(format!("key {} not found in SAM", key)))?;
        let serial = self
            .diversifier
            .as_ref()
            .ok_or_else(|| SamError::Anomaly("no card diversifier selected".into()))?;
        Ok(Zeroizing::new(diversify_key(master, serial).map_err(anomaly)?))
    }
}

impl SamCoordinator for SoftwareSam {
    fn identity(&self) -> &CalypsoSam {
        &self.identity
    }

    fn select_diversifier(&mut self, card_serial: &[u8]) -> Result<(), SamError> {
        self.check_fault()?;
        self.diversifier = Some(card_serial.to_vec());
        Ok(())
    }

    fn get_challenge(&mut self) -> Result<Vec<u8>, SamError> {
        self.check_fault()?;
        let mut challenge = vec![0u8; CHALLENGE_LENGTH];
        rand::thread_rng().fill_bytes(&mut challenge);
        self.challenge = Some(challenge.clone());
        Ok(challenge)
    }

    fn derive_session_keys(
        &mut self,
        level: WriteAccessLevel,
        key: KeyReference,
        card_challenge: &[u8],
    ) -> Result<SessionKeys, SamError> {
        self.check_fault()?;
        let terminal_challenge = self
            .challenge
            .take()
            .ok_or_else(|| SamError::Anomaly("no terminal challenge pending".into()))?;
        let card_key = self.card_key(key)?;
        let session_key = derive_session_key(&card_key, &terminal_challenge, card_challenge).map_err(anomaly)?;
        debug!("SAM derived {} session keys with {}", level, key);
        Ok(SessionKeys::new(session_key, key))
    }

    fn compute_mac(&mut self, keys: &SessionKeys, digest: &[u8]) -> Result<Vec<u8>, SamError> {
        self.check_fault()?;
        let mut mac = session_mac(keys.material(), digest).map_err(anomaly)?;
        if self.fault == Some(SamFault::CorruptMac) {
            warn!("SAM fault injection: corrupting terminal MAC");
            mac[0] ^= 0xFF;
        }
        Ok(mac)
    }

    fn verify_mac(&mut self, keys: &SessionKeys, digest: &[u8], candidate: &[u8]) -> Result<bool, SamError> {
        self.check_fault()?;
        let expected = session_mac(keys.material(), digest).map_err(anomaly)?;
        Ok(expected.as_slice().ct_eq(candidate).into())
    }

    fn sign_sv_operation(&mut self, request: &SvSignatureRequest) -> Result<SvSignature, SamError> {
        self.check_fault()?;
        let card_key = self.card_key(request.key)?;
        self.sam_tnum += 1;
        let signature = sv_signature(
            &card_key,
            &request.sv_get_data,
            request.ins,
            &request.command_data,
            &self.identity.serial_number,
            self.sam_tnum,
        )
        .map_err(anomaly)?;
        debug!(
            "SAM signed SV {:?}/{:?} with {}, SAM tnum {}",
            request.operation, request.action, request.key, self.sam_tnum
        );
        self.pending_sv = Some((request.key, signature.clone()));
        Ok(SvSignature { sam_id: self.identity.serial_number, sam_tnum: self.sam_tnum, signature })
    }

    fn check_sv_response(&mut self, card_mac: &[u8]) -> Result<bool, SamError> {
        self.check_fault()?;
        let (key, signature) = self
            .pending_sv
            .take()
            .ok_or_else(|| SamError::Anomaly("no SV operation pending".into()))?;
        let card_key = self.card_key(key)?;
        let expected = sv_response_mac(&card_key, &signature).map_err(anomaly)?;
        Ok(expected.as_slice().ct_eq(card_mac).into())
    }

    fn cipher_pin(&mut self, key: KeyReference, card_challenge: &[u8], pin: &[u8]) -> Result<Vec<u8>, SamError> {
        self.check_fault()?;
        let card_key = self.card_key(key)?;
        pin_cryptogram(&card_key, card_challenge, pin).map_err(anomaly)
    }
}
