//! In-memory Calypso card used by the integration tests
//!
//! Mirrors the card side of the protocol: secure sessions with the same key
//! hierarchy and MACs as `SoftwareSam`, record and binary files, counters,
//! stored value with its logs and a PIN.

#![allow(dead_code)]

use std::collections::BTreeMap;

use calypso_txn::apdu::{ins, parse_apdu, APDU, SW};
use calypso_txn::card::SvLedger;
use calypso_txn::channel::{CardChannel, ChannelError};
use calypso_txn::sam::soft::{
    derive_session_key, diversify_key, pin_cryptogram, session_mac, sv_response_mac, sv_signature,
};
use calypso_txn::{
    CalypsoCard, CalypsoSam, CardSecuritySetting, CardTransactionManager, SoftwareSam, WriteAccessLevel,
};

pub const CARD_SERIAL: [u8; 8] = [0x00, 0x00, 0x00, 0x00, 0x12, 0x34, 0x56, 0x78];
pub const SAM_SERIAL: [u8; 4] = [0xA1, 0xB2, 0xC3, 0xD4];
pub const FOREIGN_SAM: [u8; 4] = [0x0A, 0x0B, 0x0C, 0x0D];

pub const PERSO_KEY: (u8, u8) = (0x21, 0x79);
pub const LOAD_KEY: (u8, u8) = (0x27, 0x79);
pub const DEBIT_KEY: (u8, u8) = (0x30, 0x79);

pub const PERSO_MASTER: [u8; 24] = [
    0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18,
    0x21, 0x22, 0x23, 0x24, 0x25, 0x26, 0x27, 0x28,
];
pub const LOAD_MASTER: [u8; 24] = [
    0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x41, 0x42, 0x43, 0x44, 0x45, 0x46, 0x47, 0x48,
    0x51, 0x52, 0x53, 0x54, 0x55, 0x56, 0x57, 0x58,
];
pub const DEBIT_MASTER: [u8; 24] = [
    0x61, 0x62, 0x63, 0x64, 0x65, 0x66, 0x67, 0x68, 0x71, 0x72, 0x73, 0x74, 0x75, 0x76, 0x77, 0x78,
    0x81, 0x82, 0x83, 0x84, 0x85, 0x86, 0x87, 0x88,
];

pub const CARD_PIN: [u8; 4] = [0x31, 0x32, 0x33, 0x34];
pub const CARD_CHALLENGE: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];

pub const SW_SESSION_BUFFER_FULL: u16 = 0x6400;

const LOAD_LOG_SFI: u8 = 0x14;
const DEBIT_LOG_SFI: u8 = 0x15;

struct CardSession {
    key: Vec<u8>,
    transcript: Vec<u8>,
    modifications: usize,
}

/// Card side of the protocol, recording every APDU it receives
pub struct SimulatedCard {
    pub sent: Vec<Vec<u8>>,
    pub files: BTreeMap<u8, BTreeMap<u8, Vec<u8>>>,
    pub balance: i32,
    pub sv_tnum: u16,
    pub transaction_counter: u32,
    pub pin: Vec<u8>,
    pub pin_attempts: u8,
    pub invalidated: bool,
    pub released: bool,
    /// Modification buffer in bytes (data length + 6 per command)
    pub buffer_capacity: usize,
    /// Key reported in the Open Secure Session answer instead of the real one
    pub reported_key: Option<(u8, u8)>,
    pub corrupt_card_mac: bool,
    /// The card commits the close but its answer is lost
    pub drop_close_response: bool,
    pub ratification_status: u16,
    pub committed_sessions: usize,
    pub last_change_pin_data: Option<Vec<u8>>,
    /// Instruction answered with a fixed status word
    pub forced_status: Option<(u8, u16)>,
    /// Instruction on which the card leaves the field
    pub removed_on: Option<u8>,
    keys: Vec<(u8, u8, Vec<u8>)>,
    session: Option<CardSession>,
    last_sv_get: Option<Vec<u8>>,
    challenge: Option<Vec<u8>>,
}

fn card_key(master: &[u8]) -> Vec<u8> {
    diversify_key(master, &CARD_SERIAL).unwrap()
}

fn i24(value: i32) -> [u8; 3] {
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

impl SimulatedCard {
    pub fn new() -> Self {
        let mut card = Self {
            sent: Vec::new(),
            files: BTreeMap::new(),
            balance: 100,
            sv_tnum: 7,
            transaction_counter: 0x000120,
            pin: CARD_PIN.to_vec(),
            pin_attempts: 3,
            invalidated: false,
            released: false,
            buffer_capacity: 215,
            reported_key: None,
            corrupt_card_mac: false,
            drop_close_response: false,
            ratification_status: SW::SUCCESS,
            committed_sessions: 0,
            last_change_pin_data: None,
            forced_status: None,
            removed_on: None,
            keys: vec![
                (PERSO_KEY.0, PERSO_KEY.1, card_key(&PERSO_MASTER)),
                (LOAD_KEY.0, LOAD_KEY.1, card_key(&LOAD_MASTER)),
                (DEBIT_KEY.0, DEBIT_KEY.1, card_key(&DEBIT_MASTER)),
            ],
            session: None,
            last_sv_get: None,
            challenge: None,
        };
        let load_log = card.load_log(50, 100, FOREIGN_SAM, 0x000010, 6);
        card.files.entry(LOAD_LOG_SFI).or_default().insert(1, load_log);
        let debit_log = card.debit_log(-10, 100, FOREIGN_SAM, 0x000011, 5);
        card.files.entry(DEBIT_LOG_SFI).or_default().insert(1, debit_log);
        card
    }

    pub fn with_record(mut self, sfi: u8, record_number: u8, content: Vec<u8>) -> Self {
        self.files.entry(sfi).or_default().insert(record_number, content);
        self
    }

    pub fn record(&self, sfi: u8, record_number: u8) -> Option<&Vec<u8>> {
        self.files.get(&sfi)?.get(&record_number)
    }

    pub fn is_session_open(&self) -> bool {
        self.session.is_some()
    }

    /// APDUs received with the given instruction byte
    pub fn count_ins(&self, instruction: u8) -> usize {
        self.sent.iter().filter(|apdu| apdu.len() > 1 && apdu[1] == instruction).count()
    }

    fn key_by_index(&self, index: u8) -> Option<(u8, u8, Vec<u8>)> {
        self.keys.get(index.checked_sub(1)? as usize).cloned()
    }

    fn key_by_reference(&self, kif: u8, kvc: u8) -> Option<Vec<u8>> {
        self.keys.iter().find(|(f, v, _)| *f == kif && *v == kvc).map(|(_, _, k)| k.clone())
    }

    fn load_log(&self, amount: i32, balance: i32, sam_id: [u8; 4], sam_tnum: u32, sv_tnum: u16) -> Vec<u8> {
        let mut log = vec![0x00, 0x00, 0x00, LOAD_KEY.1, 0x00];
        log.extend_from_slice(&i24(balance));
        log.extend_from_slice(&i24(amount));
        log.extend_from_slice(&[0x00, 0x00]);
        log.extend_from_slice(&sam_id);
        log.extend_from_slice(&sam_tnum.to_be_bytes()[1..]);
        log.extend_from_slice(&sv_tnum.to_be_bytes());
        log
    }

    fn debit_log(&self, amount: i32, balance: i32, sam_id: [u8; 4], sam_tnum: u32, sv_tnum: u16) -> Vec<u8> {
        let mut log = (amount as i16).to_be_bytes().to_vec();
        log.extend_from_slice(&[0x00, 0x00, 0x00, 0x00, DEBIT_KEY.1]);
        log.extend_from_slice(&sam_id);
        log.extend_from_slice(&sam_tnum.to_be_bytes()[1..]);
        log.extend_from_slice(&i24(balance));
        log.extend_from_slice(&sv_tnum.to_be_bytes());
        log
    }

    fn handle(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        if self.consumes_buffer(command.ins) {
            if let Some(session) = self.session.as_mut() {
                let cost = command.data.len() + 6;
                if session.modifications + cost > self.buffer_capacity {
                    return (Vec::new(), SW_SESSION_BUFFER_FULL);
                }
                session.modifications += cost;
            }
        }
        match command.ins {
            ins::OPEN_SECURE_SESSION => self.open_session(command),
            ins::CLOSE_SECURE_SESSION => self.close_session(command),
            ins::READ_RECORDS if command.p1 == 0 => (Vec::new(), self.ratification_status),
            ins::READ_RECORDS => self.read_records(command),
            ins::READ_BINARY => self.read_binary(command),
            ins::UPDATE_RECORD => {
                self.files.entry(command.p2 >> 3).or_default().insert(command.p1, command.data.clone());
                (Vec::new(), SW::SUCCESS)
            }
            ins::WRITE_RECORD => {
                let record = self.files.entry(command.p2 >> 3).or_default().entry(command.p1).or_default();
                or_into(record, 0, &command.data);
                (Vec::new(), SW::SUCCESS)
            }
            ins::APPEND_RECORD => {
                let file = self.files.entry(command.p2 >> 3).or_default();
                let shifted: BTreeMap<u8, Vec<u8>> =
                    std::mem::take(file).into_iter().map(|(n, data)| (n + 1, data)).collect();
                *file = shifted;
                file.insert(1, command.data.clone());
                (Vec::new(), SW::SUCCESS)
            }
            ins::UPDATE_BINARY => {
                let record = self.files.entry(command.p1 & 0x1F).or_default().entry(1).or_default();
                let offset = command.p2 as usize;
                if record.len() < offset + command.data.len() {
                    record.resize(offset + command.data.len(), 0);
                }
                record[offset..offset + command.data.len()].copy_from_slice(&command.data);
                (Vec::new(), SW::SUCCESS)
            }
            ins::WRITE_BINARY => {
                let record = self.files.entry(command.p1 & 0x1F).or_default().entry(1).or_default();
                or_into(record, command.p2 as usize, &command.data);
                (Vec::new(), SW::SUCCESS)
            }
            ins::INCREASE | ins::DECREASE => self.update_counter(command),
            ins::INVALIDATE => {
                self.invalidated = true;
                (Vec::new(), SW::SUCCESS)
            }
            ins::REHABILITATE => {
                self.invalidated = false;
                (Vec::new(), SW::SUCCESS)
            }
            ins::SV_GET => self.sv_get(command),
            ins::SV_RELOAD => self.sv_reload(command),
            ins::SV_DEBIT | ins::SV_UNDEBIT => self.sv_debit(command),
            ins::GET_CHALLENGE => {
                self.challenge = Some(CARD_CHALLENGE.to_vec());
                (CARD_CHALLENGE.to_vec(), SW::SUCCESS)
            }
            ins::VERIFY_PIN => self.verify_pin(command),
            ins::CHANGE_PIN => {
                if command.data.len() == 4 {
                    self.pin = command.data.clone();
                }
                self.last_change_pin_data = Some(command.data.clone());
                self.pin_attempts = 3;
                (Vec::new(), SW::SUCCESS)
            }
            _ => (Vec::new(), SW::INS_NOT_SUPPORTED),
        }
    }

    fn consumes_buffer(&self, instruction: u8) -> bool {
        matches!(
            instruction,
            ins::UPDATE_RECORD
                | ins::WRITE_RECORD
                | ins::APPEND_RECORD
                | ins::UPDATE_BINARY
                | ins::WRITE_BINARY
                | ins::INCREASE
                | ins::DECREASE
                | ins::SV_RELOAD
                | ins::SV_DEBIT
                | ins::SV_UNDEBIT
        )
    }

    fn open_session(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        let (kif, kvc, card_key) = match self.key_by_index(command.p1) {
            Some(key) => key,
            None => return (Vec::new(), SW::INCORRECT_P1_P2),
        };
        self.transaction_counter += 1;
        let mut card_challenge = self.transaction_counter.to_be_bytes()[1..].to_vec();
        card_challenge.push(0x5A);
        let session_key = derive_session_key(&card_key, &command.data, &card_challenge).unwrap();

        let (kif, kvc) = self.reported_key.unwrap_or((kif, kvc));
        let mut data = card_challenge;
        data.extend_from_slice(&[0x00, kif, kvc, 0x00]);
        self.session = Some(CardSession { key: session_key, transcript: data.clone(), modifications: 0 });
        (data, SW::SUCCESS)
    }

    fn close_session(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        let session = match self.session.take() {
            Some(session) => session,
            None => return (Vec::new(), SW::CONDITIONS_NOT_SATISFIED),
        };
        if command.data.is_empty() {
            // Abort
            return (Vec::new(), SW::SUCCESS);
        }
        let expected = session_mac(&session.key, &session.transcript).unwrap();
        if expected != command.data {
            return (Vec::new(), SW::INCORRECT_SIGNATURE);
        }
        let mut signed = session.transcript.clone();
        signed.extend_from_slice(&command.data);
        let mut card_mac = session_mac(&session.key, &signed).unwrap();
        if self.corrupt_card_mac {
            card_mac[0] ^= 0xFF;
        }
        self.committed_sessions += 1;
        (card_mac, SW::SUCCESS)
    }

    fn read_records(&self, command: &APDU) -> (Vec<u8>, u16) {
        let sfi = command.p2 >> 3;
        let file = match self.files.get(&sfi) {
            Some(file) => file,
            None => return (Vec::new(), SW::FILE_NOT_FOUND),
        };
        if command.p2 & 0x07 == 0x05 {
            let mut data = Vec::new();
            for (number, content) in file.range(command.p1..) {
                data.push(*number);
                data.push(content.len() as u8);
                data.extend_from_slice(content);
            }
            if data.is_empty() {
                return (Vec::new(), SW::RECORD_NOT_FOUND);
            }
            (data, SW::SUCCESS)
        } else {
            match file.get(&command.p1) {
                Some(content) => (content.clone(), SW::SUCCESS),
                None => (Vec::new(), SW::RECORD_NOT_FOUND),
            }
        }
    }

    fn read_binary(&self, command: &APDU) -> (Vec<u8>, u16) {
        let content = match self.files.get(&(command.p1 & 0x1F)).and_then(|f| f.get(&1)) {
            Some(content) => content,
            None => return (Vec::new(), SW::FILE_NOT_FOUND),
        };
        let offset = command.p2 as usize;
        let end = (offset + command.le.unwrap_or(0) as usize).min(content.len());
        if offset >= end {
            return (Vec::new(), SW::WRONG_P1_P2);
        }
        (content[offset..end].to_vec(), SW::SUCCESS)
    }

    fn update_counter(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        let record = self.files.entry(command.p2 >> 3).or_default().entry(1).or_default();
        let start = (command.p1 as usize - 1) * 3;
        if record.len() < start + 3 {
            record.resize(start + 3, 0);
        }
        let current = ((record[start] as u32) << 16) | ((record[start + 1] as u32) << 8) | record[start + 2] as u32;
        let delta = ((command.data[0] as u32) << 16) | ((command.data[1] as u32) << 8) | command.data[2] as u32;
        let value = if command.ins == ins::INCREASE {
            current + delta
        } else {
            match current.checked_sub(delta) {
                Some(value) => value,
                None => return (Vec::new(), SW::CONDITIONS_NOT_SATISFIED),
            }
        };
        let bytes = value.to_be_bytes()[1..].to_vec();
        record[start..start + 3].copy_from_slice(&bytes);
        (bytes, SW::SUCCESS)
    }

    fn sv_get(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        let reload = command.p2 == 0x07;
        let (kif, kvc) = if reload { LOAD_KEY } else { DEBIT_KEY };
        let mut data = vec![kif, kvc];
        data.extend_from_slice(&self.sv_tnum.to_be_bytes());
        data.extend_from_slice(&i24(self.balance));
        let extended = command.p1 == 0x01;
        if extended || reload {
            data.extend_from_slice(&self.files[&LOAD_LOG_SFI][&1]);
        }
        if extended || !reload {
            data.extend_from_slice(&self.files[&DEBIT_LOG_SFI][&1]);
        }
        self.last_sv_get = Some(data.clone());
        (data, SW::SUCCESS)
    }

    /// Check the SAM signature closing an SV command; returns the card key
    fn check_sv_signature(&self, command: &APDU, prefix_length: usize, kif: u8, kvc: u8) -> Option<Vec<u8>> {
        let sv_get = self.last_sv_get.as_ref()?;
        let card_key = self.key_by_reference(kif, kvc)?;
        let data = &command.data;
        if data.len() != prefix_length + 12 {
            return None;
        }
        let sam_id = &data[prefix_length..prefix_length + 4];
        let sam_tnum = ((data[prefix_length + 4] as u32) << 16)
            | ((data[prefix_length + 5] as u32) << 8)
            | data[prefix_length + 6] as u32;
        let expected =
            sv_signature(&card_key, sv_get, command.ins, &data[..prefix_length], sam_id, sam_tnum).ok()?;
        if expected != data[prefix_length + 7..] {
            return None;
        }
        Some(card_key)
    }

    fn sv_answer(&self, card_key: &[u8], command: &APDU) -> Vec<u8> {
        if self.session.is_some() {
            Vec::new()
        } else {
            let signature = &command.data[command.data.len() - 5..];
            sv_response_mac(card_key, signature).unwrap()
        }
    }

    fn sv_reload(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        let card_key = match self.check_sv_signature(command, 10, LOAD_KEY.0, LOAD_KEY.1) {
            Some(key) => key,
            None => return (Vec::new(), SW::INCORRECT_SIGNATURE),
        };
        let data = &command.data;
        let raw = ((data[0] as i32) << 16) | ((data[1] as i32) << 8) | data[2] as i32;
        let amount = (raw << 8) >> 8;
        self.balance += amount;
        self.sv_tnum += 1;

        let mut log = vec![data[3], data[4], data[5], data[6], data[7]];
        log.extend_from_slice(&i24(self.balance));
        log.extend_from_slice(&data[..3]);
        log.extend_from_slice(&data[8..10]);
        log.extend_from_slice(&data[10..17]);
        log.extend_from_slice(&self.sv_tnum.to_be_bytes());
        self.files.entry(LOAD_LOG_SFI).or_default().insert(1, log);
        self.last_sv_get = None;
        (self.sv_answer(&card_key, command), SW::SUCCESS)
    }

    fn sv_debit(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        let card_key = match self.check_sv_signature(command, 7, DEBIT_KEY.0, DEBIT_KEY.1) {
            Some(key) => key,
            None => return (Vec::new(), SW::INCORRECT_SIGNATURE),
        };
        let data = &command.data;
        let amount = i16::from_be_bytes([data[0], data[1]]) as i32;
        let logged = if command.ins == ins::SV_DEBIT {
            self.balance -= amount;
            amount
        } else {
            self.balance += amount;
            -amount
        };
        self.sv_tnum += 1;

        let mut log = (logged as i16).to_be_bytes().to_vec();
        log.extend_from_slice(&data[2..7]);
        log.extend_from_slice(&data[7..14]);
        log.extend_from_slice(&i24(self.balance));
        log.extend_from_slice(&self.sv_tnum.to_be_bytes());
        let file = self.files.entry(DEBIT_LOG_SFI).or_default();
        let shifted: BTreeMap<u8, Vec<u8>> = std::mem::take(file)
            .into_iter()
            .filter(|(n, _)| *n < 3)
            .map(|(n, data)| (n + 1, data))
            .collect();
        *file = shifted;
        file.insert(1, log);
        self.last_sv_get = None;
        (self.sv_answer(&card_key, command), SW::SUCCESS)
    }

    fn verify_pin(&mut self, command: &APDU) -> (Vec<u8>, u16) {
        if self.pin_attempts == 0 {
            return (Vec::new(), SW::AUTH_METHOD_BLOCKED);
        }
        if command.data.is_empty() {
            return match self.pin_attempts {
                3 => (Vec::new(), SW::SUCCESS),
                left => (Vec::new(), SW::counter_warning(left)),
            };
        }
        let accepted = if command.data.len() == 4 {
            command.data == self.pin
        } else {
            let challenge = self.challenge.take().unwrap_or_default();
            let key = self.key_by_reference(DEBIT_KEY.0, DEBIT_KEY.1).unwrap();
            pin_cryptogram(&key, &challenge, &self.pin).map_or(false, |c| c == command.data)
        };
        if accepted {
            self.pin_attempts = 3;
            (Vec::new(), SW::SUCCESS)
        } else {
            self.pin_attempts -= 1;
            if self.pin_attempts == 0 {
                (Vec::new(), SW::AUTH_METHOD_BLOCKED)
            } else {
                (Vec::new(), SW::counter_warning(self.pin_attempts))
            }
        }
    }
}

fn or_into(record: &mut Vec<u8>, offset: usize, bytes: &[u8]) {
    if record.len() < offset + bytes.len() {
        record.resize(offset + bytes.len(), 0);
    }
    for (target, source) in record[offset..].iter_mut().zip(bytes) {
        *target |= *source;
    }
}

impl CardChannel for SimulatedCard {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, ChannelError> {
        self.sent.push(apdu.to_vec());
        let command = parse_apdu(apdu).map_err(|e| ChannelError::Transmission(e.to_string()))?;
        if self.removed_on == Some(command.ins) {
            return Err(ChannelError::CardRemoved);
        }
        if let Some((instruction, sw)) = self.forced_status {
            if instruction == command.ins {
                return Ok(sw.to_be_bytes().to_vec());
            }
        }
        let (mut raw, sw) = self.handle(&command);
        raw.extend_from_slice(&sw.to_be_bytes());

        if command.ins == ins::CLOSE_SECURE_SESSION && !command.data.is_empty() && self.drop_close_response {
            return Err(ChannelError::Timeout);
        }
        if command.ins != ins::OPEN_SECURE_SESSION && command.ins != ins::CLOSE_SECURE_SESSION {
            if let Some(session) = self.session.as_mut() {
                session.transcript.extend_from_slice(apdu);
                session.transcript.extend_from_slice(&raw);
            }
        }
        Ok(raw)
    }

    fn release(&mut self) -> Result<(), ChannelError> {
        self.released = true;
        Ok(())
    }
}

pub fn sam() -> SoftwareSam {
    SoftwareSam::new(CalypsoSam::new(SAM_SERIAL, "SAM C1"))
        .with_key(PERSO_KEY.0, PERSO_KEY.1, PERSO_MASTER.to_vec())
        .with_key(LOAD_KEY.0, LOAD_KEY.1, LOAD_MASTER.to_vec())
        .with_key(DEBIT_KEY.0, DEBIT_KEY.1, DEBIT_MASTER.to_vec())
}

/// Setting with every test key assigned and authorized, audit enabled
pub fn setting() -> CardSecuritySetting {
    CardSecuritySetting::new()
        .assign_default_key_identifiers(WriteAccessLevel::Personalization, PERSO_KEY.0, PERSO_KEY.1)
        .assign_default_key_identifiers(WriteAccessLevel::Load, LOAD_KEY.0, LOAD_KEY.1)
        .assign_default_key_identifiers(WriteAccessLevel::Debit, DEBIT_KEY.0, DEBIT_KEY.1)
        .add_authorized_session_key(PERSO_KEY.0, PERSO_KEY.1)
        .add_authorized_session_key(LOAD_KEY.0, LOAD_KEY.1)
        .add_authorized_session_key(DEBIT_KEY.0, DEBIT_KEY.1)
        .add_authorized_sv_key(LOAD_KEY.0, LOAD_KEY.1)
        .add_authorized_sv_key(DEBIT_KEY.0, DEBIT_KEY.1)
        .set_pin_verification_ciphering_key(DEBIT_KEY.0, DEBIT_KEY.1)
        .set_pin_modification_ciphering_key(DEBIT_KEY.0, DEBIT_KEY.1)
        .enable_transaction_audit()
        .set_sam_resource("SAM reader 1", CalypsoSam::new(SAM_SERIAL, "SAM C1"))
}

/// Card model as left by the selection step
pub fn card_model() -> CalypsoCard {
    CalypsoCard::new(CARD_SERIAL.to_vec())
        .with_session_modifications(215, true)
        .with_sv(SvLedger::default())
        .with_pin(3)
}

pub type Manager = CardTransactionManager<SimulatedCard, SoftwareSam>;

pub fn manager_with(sim: SimulatedCard, setting: CardSecuritySetting, card: CalypsoCard) -> Manager {
    CardTransactionManager::new(sim, sam(), card, setting).unwrap()
}

pub fn manager(sim: SimulatedCard, setting: CardSecuritySetting) -> Manager {
    manager_with(sim, setting, card_model())
}
