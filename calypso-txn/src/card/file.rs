//! Elementary files, headers and file content

use std::collections::BTreeMap;

use serde::Serialize;

use super::{base64_bytes, base64_records, DataTrust};
use crate::security::WriteAccessLevel;

/// Size in bytes of one counter in a counters file
pub const COUNTER_SIZE: usize = 3;

/// Elementary file structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FileType {
    Linear,
    Binary,
    Cyclic,
    Counters,
    SimulatedCounters,
}

/// Header of an elementary file as returned by a Select File
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileHeader {
    pub lid: u16,
    pub file_type: FileType,
    pub record_size: usize,
    pub records_number: usize,
    /// One access condition byte per operation group
    #[serde(with = "base64_bytes")]
    pub access_conditions: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub key_indexes: Vec<u8>,
    pub df_status: u8,
    pub shared_reference: Option<u16>,
}

impl FileHeader {
    pub fn new(lid: u16, file_type: FileType, record_size: usize, records_number: usize) -> Self {
        Self {
            lid,
            file_type,
            record_size,
            records_number,
            access_conditions: vec![0x1F; 4],
            key_indexes: vec![0x00; 4],
            df_status: 0x00,
            shared_reference: None,
        }
    }
}

/// Header of the current DF, carrying the session keys published per level
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryHeader {
    pub lid: u16,
    #[serde(with = "base64_bytes")]
    pub access_conditions: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub key_indexes: Vec<u8>,
    pub df_status: u8,
    kifs: [Option<u8>; 3],
    kvcs: [Option<u8>; 3],
}

impl DirectoryHeader {
    pub fn new(lid: u16) -> Self {
        Self { lid, ..Self::default() }
    }

    /// Declare the key the card uses for a level
    pub fn with_key(mut self, level: WriteAccessLevel, kif: Option<u8>, kvc: Option<u8>) -> Self {
        self.kifs[level.index()] = kif;
        self.kvcs[level.index()] = kvc;
        self
    }

    pub fn kif(&self, level: WriteAccessLevel) -> Option<u8> {
        self.kifs[level.index()]
    }

    pub fn kvc(&self, level: WriteAccessLevel) -> Option<u8> {
        self.kvcs[level.index()]
    }
}

/// Known content of a file, indexed by record number (binary files use record 1)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileData {
    #[serde(with = "base64_records")]
    records: BTreeMap<u8, Vec<u8>>,
}

impl FileData {
    pub fn content(&self, record_number: u8) -> Option<&[u8]> {
        self.records.get(&record_number).map(Vec::as_slice)
    }

    pub fn all_records(&self) -> &BTreeMap<u8, Vec<u8>> {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn set_content(&mut self, record_number: u8, content: Vec<u8>) {
        self.records.insert(record_number, content);
    }

    /// Replace bytes starting at `offset`, growing the record with zeros if needed
    pub(crate) fn set_content_at(&mut self, record_number: u8, offset: usize, bytes: &[u8]) {
        let record = self.records.entry(record_number).or_default();
        if record.len() < offset + bytes.len() {
            record.resize(offset + bytes.len(), 0);
        }
        record[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    /// OR bytes into the record starting at `offset` (Write Record / Write Binary)
    pub(crate) fn fill_content(&mut self, record_number: u8, offset: usize, bytes: &[u8]) {
        let record = self.records.entry(record_number).or_default();
        if record.len() < offset + bytes.len() {
            record.resize(offset + bytes.len(), 0);
        }
        for (target, source) in record[offset..].iter_mut().zip(bytes) {
            *target |= *source;
        }
    }

    /// Insert a record at position 1 of a cyclic file, shifting the others
    pub(crate) fn add_cyclic_content(&mut self, content: Vec<u8>, capacity: Option<usize>) {
        let shifted: BTreeMap<u8, Vec<u8>> = std::mem::take(&mut self.records)
            .into_iter()
            .filter_map(|(number, data)| {
                let next = number.checked_add(1)?;
                match capacity {
                    Some(cap) if next as usize > cap => None,
                    _ => Some((next, data)),
                }
            })
            .collect();
        self.records = shifted;
        self.records.insert(1, content);
    }

    /// Value of counter `counter_number` (1-based), stored in record 1
    pub fn counter_value(&self, counter_number: u8) -> Option<u32> {
        if counter_number == 0 {
            return None;
        }
        let record = self.records.get(&1)?;
        let start = (counter_number as usize - 1) * COUNTER_SIZE;
        let bytes = record.get(start..start + COUNTER_SIZE)?;
        Some(((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32)
    }

    pub(crate) fn set_counter(&mut self, counter_number: u8, value: u32) {
        let offset = (counter_number as usize - 1) * COUNTER_SIZE;
        self.set_content_at(1, offset, &[(value >> 16) as u8, (value >> 8) as u8, value as u8]);
    }

    /// All counters decodable from record 1
    pub fn all_counters(&self) -> BTreeMap<u8, u32> {
        let count = self.records.get(&1).map_or(0, |r| r.len() / COUNTER_SIZE);
        (1..=count as u8)
            .filter_map(|n| self.counter_value(n).map(|v| (n, v)))
            .collect()
    }
}

/// An elementary file of the current DF
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ElementaryFile {
    pub sfi: u8,
    pub header: Option<FileHeader>,
    pub data: FileData,
    pub trust: DataTrust,
}

impl ElementaryFile {
    pub fn new(sfi: u8) -> Self {
        Self {
            sfi,
            header: None,
            data: FileData::default(),
            trust: DataTrust::Unsecured,
        }
    }

    pub fn with_header(mut self, header: FileHeader) -> Self {
        self.header = Some(header);
        self
    }

    pub fn with_record(mut self, record_number: u8, content: Vec<u8>) -> Self {
        self.data.set_content(record_number, content);
        self
    }

    pub fn file_type(&self) -> Option<FileType> {
        self.header.as_ref().map(|h| h.file_type)
    }
}
