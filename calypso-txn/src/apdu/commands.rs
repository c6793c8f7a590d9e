//! Calypso card command builders
//!
//! Each function returns an [`APDU`] ready to be serialized and transmitted.
//! Files are addressed by short file identifier (SFI) in P1/P2 so no prior
//! SELECT FILE is needed.

use super::{ins, APDU};

/// Class byte used for every Calypso command
pub const CLA: u8 = 0x00;

/// Length of the terminal and card challenges exchanged at session opening
pub const CHALLENGE_LENGTH: usize = 8;

/// P1 of Close Secure Session requesting immediate ratification
pub const CLOSE_RATIFY_NOW: u8 = 0x80;

/// P1 of Close Secure Session leaving ratification to the next command
pub const CLOSE_RATIFICATION_ASKED: u8 = 0x00;

/// P2 of SV Get for a reload
pub const SV_GET_RELOAD: u8 = 0x07;

/// P2 of SV Get for a debit or undebit
pub const SV_GET_DEBIT: u8 = 0x09;

fn sfi_record_p2(sfi: u8, mode: u8) -> u8 {
    (sfi << 3) | mode
}

/// OPEN SECURE SESSION for the given key index (1, 2 or 3)
pub fn open_secure_session(key_index: u8, terminal_challenge: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::OPEN_SECURE_SESSION, key_index, 0x00, terminal_challenge.to_vec())
        .with_le(256)
}

/// CLOSE SECURE SESSION carrying the terminal session MAC
pub fn close_secure_session(terminal_mac: &[u8], ratification_asked: bool) -> APDU {
    let p1 = if ratification_asked { CLOSE_RATIFICATION_ASKED } else { CLOSE_RATIFY_NOW };
    APDU::with_data(CLA, ins::CLOSE_SECURE_SESSION, p1, 0x00, terminal_mac.to_vec()).with_le(256)
}

/// CLOSE SECURE SESSION without MAC: the card discards the session
pub fn abort_secure_session() -> APDU {
    APDU::new(CLA, ins::CLOSE_SECURE_SESSION, 0x00, 0x00)
}

/// Ratification command (READ RECORD of record 0, rejected by the card but
/// ratifying the previous session)
pub fn ratification() -> APDU {
    APDU::new(CLA, ins::READ_RECORDS, 0x00, 0x00).with_le(256)
}

/// READ RECORD of a single record
pub fn read_record(sfi: u8, record_number: u8) -> APDU {
    APDU::new(CLA, ins::READ_RECORDS, record_number, sfi_record_p2(sfi, 0x04)).with_le(256)
}

/// READ RECORD of the counter record, `count` 3-byte counters expected
pub fn read_counters(sfi: u8, count: u8) -> APDU {
    APDU::new(CLA, ins::READ_RECORDS, 0x01, sfi_record_p2(sfi, 0x04)).with_le(count as u32 * 3)
}

/// READ RECORDS from `first_record` to the end of the file, up to `expected_length` bytes
pub fn read_records(sfi: u8, first_record: u8, expected_length: u32) -> APDU {
    APDU::new(CLA, ins::READ_RECORDS, first_record, sfi_record_p2(sfi, 0x05))
        .with_le(expected_length.min(256))
}

/// READ BINARY at `offset` (0..=255) of the file designated by SFI
pub fn read_binary(sfi: u8, offset: u8, length: u8) -> APDU {
    APDU::new(CLA, ins::READ_BINARY, 0x80 | sfi, offset).with_le(length as u32)
}

/// UPDATE BINARY (replace bytes)
pub fn update_binary(sfi: u8, offset: u8, data: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::UPDATE_BINARY, 0x80 | sfi, offset, data.to_vec())
}

/// WRITE BINARY (bitwise OR with current bytes)
pub fn write_binary(sfi: u8, offset: u8, data: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::WRITE_BINARY, 0x80 | sfi, offset, data.to_vec())
}

/// UPDATE RECORD (replace record content)
pub fn update_record(sfi: u8, record_number: u8, data: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::UPDATE_RECORD, record_number, sfi_record_p2(sfi, 0x04), data.to_vec())
}

/// WRITE RECORD (bitwise OR with current record content)
pub fn write_record(sfi: u8, record_number: u8, data: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::WRITE_RECORD, record_number, sfi_record_p2(sfi, 0x04), data.to_vec())
}

/// APPEND RECORD (cyclic files: new record becomes record 1)
pub fn append_record(sfi: u8, data: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::APPEND_RECORD, 0x00, sfi_record_p2(sfi, 0x00), data.to_vec())
}

fn counter_value_bytes(value: u32) -> Vec<u8> {
    vec![(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

/// INCREASE a counter; the card answers with the new 3-byte value
pub fn increase(sfi: u8, counter_number: u8, value: u32) -> APDU {
    APDU::with_data(CLA, ins::INCREASE, counter_number, sfi << 3, counter_value_bytes(value)).with_le(3)
}

/// DECREASE a counter; the card answers with the new 3-byte value
pub fn decrease(sfi: u8, counter_number: u8, value: u32) -> APDU {
    APDU::with_data(CLA, ins::DECREASE, counter_number, sfi << 3, counter_value_bytes(value)).with_le(3)
}

/// SV GET; `extended` asks the card for both the load and the debit log
pub fn sv_get(p2: u8, extended: bool) -> APDU {
    APDU::new(CLA, ins::SV_GET, if extended { 0x01 } else { 0x00 }, p2).with_le(256)
}

/// SV RELOAD with the SAM-signed command data
pub fn sv_reload(data: Vec<u8>) -> APDU {
    APDU::with_data(CLA, ins::SV_RELOAD, 0x00, 0x00, data)
}

/// SV DEBIT with the SAM-signed command data
pub fn sv_debit(data: Vec<u8>) -> APDU {
    APDU::with_data(CLA, ins::SV_DEBIT, 0x00, 0x00, data)
}

/// SV UNDEBIT with the SAM-signed command data
pub fn sv_undebit(data: Vec<u8>) -> APDU {
    APDU::with_data(CLA, ins::SV_UNDEBIT, 0x00, 0x00, data)
}

/// INVALIDATE the current DF
pub fn invalidate() -> APDU {
    APDU::new(CLA, ins::INVALIDATE, 0x00, 0x00)
}

/// REHABILITATE the current DF
pub fn rehabilitate() -> APDU {
    APDU::new(CLA, ins::REHABILITATE, 0x00, 0x00)
}

/// VERIFY PIN with plain or ciphered PIN data; empty data only checks the status
pub fn verify_pin(pin_data: &[u8]) -> APDU {
    if pin_data.is_empty() {
        APDU::new(CLA, ins::VERIFY_PIN, 0x00, 0x00)
    } else {
        APDU::with_data(CLA, ins::VERIFY_PIN, 0x00, 0x00, pin_data.to_vec())
    }
}

/// CHANGE PIN with plain or ciphered new PIN data
pub fn change_pin(pin_data: &[u8]) -> APDU {
    APDU::with_data(CLA, ins::CHANGE_PIN, 0x00, 0xFF, pin_data.to_vec())
}

/// GET CHALLENGE (8 bytes)
pub fn get_challenge() -> APDU {
    APDU::new(CLA, ins::GET_CHALLENGE, 0x00, 0x00).with_le(CHALLENGE_LENGTH as u32)
}
