//! Stored-value ledger view and log records

use std::collections::VecDeque;

use serde::Serialize;

use super::{base64_bytes, DataTrust};

/// Smallest value representable by the 3-byte signed SV balance
pub const SV_BALANCE_MIN: i32 = -8_388_608;
/// Largest value representable by the 3-byte signed SV balance
pub const SV_BALANCE_MAX: i32 = 8_388_607;

/// Default number of load log records kept by a card
pub const DEFAULT_LOAD_LOG_DEPTH: usize = 1;
/// Default number of debit log records kept by a card
pub const DEFAULT_DEBIT_LOG_DEPTH: usize = 3;

pub(crate) fn i24_from_be(bytes: &[u8]) -> i32 {
    let raw = ((bytes[0] as i32) << 16) | ((bytes[1] as i32) << 8) | bytes[2] as i32;
    (raw << 8) >> 8
}

pub(crate) fn i24_to_be(value: i32) -> [u8; 3] {
    [(value >> 16) as u8, (value >> 8) as u8, value as u8]
}

pub(crate) fn u24_from_be(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

fn pair(bytes: &[u8]) -> [u8; 2] {
    [bytes[0], bytes[1]]
}

/// Last reload recorded by the card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvLoadLogRecord {
    pub date: [u8; 2],
    pub time: [u8; 2],
    pub free_data: [u8; 2],
    pub kvc: u8,
    pub balance: i32,
    pub amount: i32,
    pub sam_id: [u8; 4],
    pub sam_tnum: u32,
    pub sv_tnum: u16,
    #[serde(with = "base64_bytes")]
    pub raw: Vec<u8>,
}

impl SvLoadLogRecord {
    /// Encoded size of a load log record
    pub const SIZE: usize = 22;

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            date: pair(&raw[0..2]),
            free_data: [raw[2], raw[4]],
            kvc: raw[3],
            balance: i24_from_be(&raw[5..8]),
            amount: i24_from_be(&raw[8..11]),
            time: pair(&raw[11..13]),
            sam_id: [raw[13], raw[14], raw[15], raw[16]],
            sam_tnum: u24_from_be(&raw[17..20]),
            sv_tnum: u16::from_be_bytes(pair(&raw[20..22])),
            raw: raw[..Self::SIZE].to_vec(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        date: [u8; 2],
        time: [u8; 2],
        free_data: [u8; 2],
        kvc: u8,
        balance: i32,
        amount: i32,
        sam_id: [u8; 4],
        sam_tnum: u32,
        sv_tnum: u16,
    ) -> Self {
        let mut raw = Vec::with_capacity(Self::SIZE);
        raw.extend_from_slice(&date);
        raw.push(free_data[0]);
        raw.push(kvc);
        raw.push(free_data[1]);
        raw.extend_from_slice(&i24_to_be(balance));
        raw.extend_from_slice(&i24_to_be(amount));
        raw.extend_from_slice(&time);
        raw.extend_from_slice(&sam_id);
        raw.extend_from_slice(&sam_tnum.to_be_bytes()[1..]);
        raw.extend_from_slice(&sv_tnum.to_be_bytes());
        Self { date, time, free_data, kvc, balance, amount, sam_id, sam_tnum, sv_tnum, raw }
    }
}

/// A debit (or undebit) recorded by the card
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvDebitLogRecord {
    pub amount: i32,
    pub date: [u8; 2],
    pub time: [u8; 2],
    pub kvc: u8,
    pub sam_id: [u8; 4],
    pub sam_tnum: u32,
    pub balance: i32,
    pub sv_tnum: u16,
    #[serde(with = "base64_bytes")]
    pub raw: Vec<u8>,
}

impl SvDebitLogRecord {
    /// Encoded size of a debit log record
    pub const SIZE: usize = 19;

    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            amount: i16::from_be_bytes(pair(&raw[0..2])) as i32,
            date: pair(&raw[2..4]),
            time: pair(&raw[4..6]),
            kvc: raw[6],
            sam_id: [raw[7], raw[8], raw[9], raw[10]],
            sam_tnum: u24_from_be(&raw[11..14]),
            balance: i24_from_be(&raw[14..17]),
            sv_tnum: u16::from_be_bytes(pair(&raw[17..19])),
            raw: raw[..Self::SIZE].to_vec(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn build(
        amount: i32,
        date: [u8; 2],
        time: [u8; 2],
        kvc: u8,
        sam_id: [u8; 4],
        sam_tnum: u32,
        balance: i32,
        sv_tnum: u16,
    ) -> Self {
        let mut raw = Vec::with_capacity(Self::SIZE);
        raw.extend_from_slice(&(amount as i16).to_be_bytes());
        raw.extend_from_slice(&date);
        raw.extend_from_slice(&time);
        raw.push(kvc);
        raw.extend_from_slice(&sam_id);
        raw.extend_from_slice(&sam_tnum.to_be_bytes()[1..]);
        raw.extend_from_slice(&i24_to_be(balance));
        raw.extend_from_slice(&sv_tnum.to_be_bytes());
        Self { amount, date, time, kvc, sam_id, sam_tnum, balance, sv_tnum, raw }
    }
}

/// What the terminal knows about the card's stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SvLedger {
    pub balance: Option<i32>,
    pub last_tnum: Option<u16>,
    pub kif: Option<u8>,
    pub kvc: Option<u8>,
    pub trust: DataTrust,
    load_log_depth: usize,
    debit_log_depth: usize,
    load_logs: VecDeque<SvLoadLogRecord>,
    debit_logs: VecDeque<SvDebitLogRecord>,
}

impl Default for SvLedger {
    fn default() -> Self {
        Self::with_depths(DEFAULT_LOAD_LOG_DEPTH, DEFAULT_DEBIT_LOG_DEPTH)
    }
}

impl SvLedger {
    pub fn with_depths(load_log_depth: usize, debit_log_depth: usize) -> Self {
        Self {
            balance: None,
            last_tnum: None,
            kif: None,
            kvc: None,
            trust: DataTrust::Unsecured,
            load_log_depth: load_log_depth.max(1),
            debit_log_depth: debit_log_depth.max(1),
            load_logs: VecDeque::new(),
            debit_logs: VecDeque::new(),
        }
    }

    pub fn load_log_depth(&self) -> usize {
        self.load_log_depth
    }

    pub fn debit_log_depth(&self) -> usize {
        self.debit_log_depth
    }

    /// Load logs, oldest first
    pub fn load_logs(&self) -> impl Iterator<Item = &SvLoadLogRecord> {
        self.load_logs.iter()
    }

    /// Debit logs, oldest first
    pub fn debit_logs(&self) -> impl Iterator<Item = &SvDebitLogRecord> {
        self.debit_logs.iter()
    }

    pub fn last_load_log(&self) -> Option<&SvLoadLogRecord> {
        self.load_logs.back()
    }

    pub fn last_debit_log(&self) -> Option<&SvDebitLogRecord> {
        self.debit_logs.back()
    }

    /// Append a load log unless it is already the most recent one
    pub(crate) fn append_load_log(&mut self, record: SvLoadLogRecord) {
        if self.load_logs.iter().any(|known| known.raw == record.raw) {
            return;
        }
        self.load_logs.push_back(record);
        while self.load_logs.len() > self.load_log_depth {
            self.load_logs.pop_front();
        }
    }

    /// Append a debit log unless it is already known
    pub(crate) fn append_debit_log(&mut self, record: SvDebitLogRecord) {
        if self.debit_logs.iter().any(|known| known.raw == record.raw) {
            return;
        }
        self.debit_logs.push_back(record);
        while self.debit_logs.len() > self.debit_log_depth {
            self.debit_logs.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i24_sign_extension() {
        assert_eq!(i24_from_be(&[0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(i24_from_be(&[0x80, 0x00, 0x00]), SV_BALANCE_MIN);
        assert_eq!(i24_from_be(&[0x7F, 0xFF, 0xFF]), SV_BALANCE_MAX);
        assert_eq!(i24_to_be(-2), [0xFF, 0xFF, 0xFE]);
    }

    #[test]
    fn test_load_log_layout() {
        let record = SvLoadLogRecord::build(
            [0x12, 0x34], [0x08, 0x30], [0xF1, 0xF2], 0x79, 150, 100,
            [0xA0, 0xA1, 0xA2, 0xA3], 0x000102, 7,
        );
        assert_eq!(record.raw.len(), SvLoadLogRecord::SIZE);
        let parsed = SvLoadLogRecord::from_bytes(&record.raw).unwrap();
        assert_eq!(parsed, record);
        assert_eq!(&record.raw[0..5], &[0x12, 0x34, 0xF1, 0x79, 0xF2]);
    }

    #[test]
    fn test_debit_log_negative_balance() {
        let record = SvDebitLogRecord::build(
            20, [0, 1], [0, 2], 0x79, [1, 2, 3, 4], 9, -5, 3,
        );
        let parsed = SvDebitLogRecord::from_bytes(&record.raw).unwrap();
        assert_eq!(parsed.balance, -5);
        assert_eq!(parsed.amount, 20);
        assert_eq!(parsed.sam_tnum, 9);
    }

    #[test]
    fn test_short_records_rejected() {
        assert!(SvLoadLogRecord::from_bytes(&[0u8; 21]).is_none());
        assert!(SvDebitLogRecord::from_bytes(&[0u8; 18]).is_none());
    }

    #[test]
    fn test_debit_logs_capped_oldest_evicted() {
        let mut ledger = SvLedger::with_depths(1, 2);
        for tnum in 1..=3u16 {
            ledger.append_debit_log(SvDebitLogRecord::build(1, [0, 0], [0, 0], 0, [0; 4], 0, 10, tnum));
        }
        let tnums: Vec<u16> = ledger.debit_logs().map(|r| r.sv_tnum).collect();
        assert_eq!(tnums, vec![2, 3]);
        assert_eq!(ledger.last_debit_log().map(|r| r.sv_tnum), Some(3));
    }

    #[test]
    fn test_duplicate_log_not_appended() {
        let mut ledger = SvLedger::default();
        let record = SvLoadLogRecord::build([0; 2], [0; 2], [0; 2], 0, 5, 5, [0; 4], 1, 1);
        ledger.append_load_log(record.clone());
        ledger.append_load_log(record);
        assert_eq!(ledger.load_logs().count(), 1);
    }
}
