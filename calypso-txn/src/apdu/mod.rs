//! APDU (Application Protocol Data Unit) handling
//!
//! Plain structs for the ISO 7816-4 command/response pairs exchanged with a
//! Calypso card. The engine builds commands with [`commands`], serializes them
//! with [`APDU::to_bytes`] and decodes the card answer with
//! [`Response::from_bytes`].
//!
//! # Example
//! ```ignore
//! use calypso_txn::apdu::{commands, parse_apdu, Response};
//!
//! let raw = commands::read_record(0x07, 1).to_bytes();
//! let apdu = parse_apdu(&raw).unwrap();
//! assert_eq!(apdu.ins, 0xB2);
//!
//! let response = Response::from_bytes(&[0x01, 0x02, 0x90, 0x00]).unwrap();
//! assert!(response.is_okay());
//! ```

pub mod commands;
mod response;
mod status;

pub use response::Response;
pub use status::SW;

use thiserror::Error;

/// Errors that can occur while decoding raw APDU bytes
#[derive(Debug, Error, PartialEq, Eq)]
pub enum APDUError {
    #[error("APDU too short: expected at least 4 bytes, got {0}")]
    TooShort(usize),

    #[error("Invalid APDU length")]
    InvalidLength,

    #[error("Response too short: expected at least 2 bytes, got {0}")]
    ResponseTooShort(usize),
}

/// A card command
///
/// # Fields
/// - `cla`: Class byte
/// - `ins`: Instruction byte (the command to execute)
/// - `p1`, `p2`: Parameter bytes (command-specific)
/// - `data`: Command data (may be empty)
/// - `le`: Expected response length (None if not specified)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct APDU {
    /// Class byte (CLA)
    pub cla: u8,
    /// Instruction byte (INS)
    pub ins: u8,
    /// Parameter 1 (P1)
    pub p1: u8,
    /// Parameter 2 (P2)
    pub p2: u8,
    /// Command data (may be empty)
    pub data: Vec<u8>,
    /// Expected response length (Le), None if not specified
    pub le: Option<u32>,
}

impl APDU {
    /// Create a new APDU with just the header (CLA, INS, P1, P2)
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Vec::new(),
            le: None,
        }
    }

    /// Create a new APDU with data
    pub fn with_data(cla: u8, ins: u8, p1: u8, p2: u8, data: Vec<u8>) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data,
            le: None,
        }
    }

    /// Set the expected response length
    pub fn with_le(mut self, le: u32) -> Self {
        self.le = Some(le);
        self
    }

    /// Get P1-P2 combined as a u16
    pub fn p1p2(&self) -> u16 {
        ((self.p1 as u16) << 8) | (self.p2 as u16)
    }

    /// Serialize to short format bytes: CLA INS P1 P2 [Lc Data] [Le]
    ///
    /// Calypso commands never exceed 255 data bytes, so Le=256 is encoded as 0x00.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(6 + self.data.len());
        out.extend_from_slice(&[self.cla, self.ins, self.p1, self.p2]);
        if !self.data.is_empty() {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
        }
        if let Some(le) = self.le {
            out.push(if le >= 256 { 0x00 } else { le as u8 });
        }
        out
    }
}

/// Parse raw short-format bytes into an APDU: CLA INS P1 P2 [Lc Data] [Le]
///
/// Le=0 decodes as 256. Calypso cards only speak the short format.
pub fn parse_apdu(data: &[u8]) -> Result<APDU, APDUError> {
    if data.len() < 4 {
        return Err(APDUError::TooShort(data.len()));
    }
    let mut apdu = APDU::new(data[0], data[1], data[2], data[3]);
    let remaining = &data[4..];
    let decode_le = |byte: u8| if byte == 0 { 256 } else { byte as u32 };

    match remaining.len() {
        // Case 1
        0 => {}
        // Case 2: Le only
        1 => apdu.le = Some(decode_le(remaining[0])),
        len => {
            let lc = remaining[0] as usize;
            if lc == 0 || len < 1 + lc || len > 2 + lc {
                return Err(APDUError::InvalidLength);
            }
            apdu.data = remaining[1..1 + lc].to_vec();
            // Case 4: trailing Le
            if len == 2 + lc {
                apdu.le = Some(decode_le(remaining[1 + lc]));
            }
        }
    }
    Ok(apdu)
}

/// Calypso instruction bytes
pub mod ins {
    pub const INVALIDATE: u8 = 0x04;
    pub const VERIFY_PIN: u8 = 0x20;
    pub const DECREASE: u8 = 0x30;
    pub const INCREASE: u8 = 0x32;
    pub const REHABILITATE: u8 = 0x44;
    pub const SV_GET: u8 = 0x7C;
    pub const GET_CHALLENGE: u8 = 0x84;
    pub const OPEN_SECURE_SESSION: u8 = 0x8A;
    pub const CLOSE_SECURE_SESSION: u8 = 0x8E;
    pub const READ_BINARY: u8 = 0xB0;
    pub const READ_RECORDS: u8 = 0xB2;
    pub const SV_RELOAD: u8 = 0xB8;
    pub const SV_DEBIT: u8 = 0xBA;
    pub const SV_UNDEBIT: u8 = 0xBC;
    pub const WRITE_BINARY: u8 = 0xD0;
    pub const WRITE_RECORD: u8 = 0xD2;
    pub const UPDATE_BINARY: u8 = 0xD6;
    pub const CHANGE_PIN: u8 = 0xD8;
    pub const UPDATE_RECORD: u8 = 0xDC;
    pub const APPEND_RECORD: u8 = 0xE2;
}

/// Format bytes as spaced upper-case hex for logs
pub fn hexify(value: &[u8]) -> String {
    value.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}
