//! Queued card operations

use crate::apdu::{commands, APDU};
use crate::card::SvDebitLogRecord;
use crate::error::{Result, TransactionError};

/// SFI of the SV load log file
pub const SV_LOAD_LOG_SFI: u8 = 0x14;
/// SFI of the SV debit log file
pub const SV_DEBIT_LOG_SFI: u8 = 0x15;
/// Records held by the SV debit log file
pub const SV_DEBIT_LOG_RECORDS: u8 = 3;

/// Data length of an SV Reload command, signature included
pub const SV_RELOAD_DATA_LENGTH: usize = 22;
/// Data length of an SV Debit or Undebit command, signature included
pub const SV_DEBIT_DATA_LENGTH: usize = 19;

/// Overhead counted per modifying command when the buffer is counted in bytes
pub const MODIFICATION_OVERHEAD: usize = 6;

/// Stored-value operation selected by SV Get
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvOperation {
    Reload,
    Debit,
}

/// Whether the SV operation applies or reverts an amount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SvAction {
    Do,
    Undo,
}

/// One pending card operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardCommand {
    ReadRecords { sfi: u8, first_record: u8, last_record: u8, record_size: usize },
    ReadBinary { sfi: u8, offset: u8, length: u8 },
    ReadCounters { sfi: u8, count: u8 },
    AppendRecord { sfi: u8, data: Vec<u8> },
    UpdateRecord { sfi: u8, record_number: u8, data: Vec<u8> },
    WriteRecord { sfi: u8, record_number: u8, data: Vec<u8> },
    UpdateBinary { sfi: u8, offset: u8, data: Vec<u8> },
    WriteBinary { sfi: u8, offset: u8, data: Vec<u8> },
    Increase { sfi: u8, counter_number: u8, value: u32 },
    Decrease { sfi: u8, counter_number: u8, value: u32 },
    Invalidate,
    Rehabilitate,
    CheckPinStatus,
    SvGet { operation: SvOperation, action: SvAction, extended: bool },
    SvReload { amount: i32, date: [u8; 2], time: [u8; 2], free_data: [u8; 2], action: SvAction },
    SvDebit { amount: i32, date: [u8; 2], time: [u8; 2], action: SvAction },
    SvReadLog { debit: bool },
}

impl CardCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CardCommand::ReadRecords { first_record, last_record, .. } if first_record == last_record => "READ RECORD",
            CardCommand::ReadRecords { .. } => "READ RECORDS",
            CardCommand::ReadBinary { .. } => "READ BINARY",
            CardCommand::ReadCounters { .. } => "READ COUNTERS",
            CardCommand::AppendRecord { .. } => "APPEND RECORD",
            CardCommand::UpdateRecord { .. } => "UPDATE RECORD",
            CardCommand::WriteRecord { .. } => "WRITE RECORD",
            CardCommand::UpdateBinary { .. } => "UPDATE BINARY",
            CardCommand::WriteBinary { .. } => "WRITE BINARY",
            CardCommand::Increase { .. } => "INCREASE",
            CardCommand::Decrease { .. } => "DECREASE",
            CardCommand::Invalidate => "INVALIDATE",
            CardCommand::Rehabilitate => "REHABILITATE",
            CardCommand::CheckPinStatus => "VERIFY PIN",
            CardCommand::SvGet { .. } => "SV GET",
            CardCommand::SvReload { .. } => "SV RELOAD",
            CardCommand::SvDebit { action: SvAction::Do, .. } => "SV DEBIT",
            CardCommand::SvDebit { action: SvAction::Undo, .. } => "SV UNDEBIT",
            CardCommand::SvReadLog { .. } => "READ RECORDS",
        }
    }

    /// File the command targets, if any
    pub fn sfi(&self) -> Option<u8> {
        match self {
            CardCommand::ReadRecords { sfi, .. }
            | CardCommand::ReadBinary { sfi, .. }
            | CardCommand::ReadCounters { sfi, .. }
            | CardCommand::AppendRecord { sfi, .. }
            | CardCommand::UpdateRecord { sfi, .. }
            | CardCommand::WriteRecord { sfi, .. }
            | CardCommand::UpdateBinary { sfi, .. }
            | CardCommand::WriteBinary { sfi, .. }
            | CardCommand::Increase { sfi, .. }
            | CardCommand::Decrease { sfi, .. } => Some(*sfi),
            CardCommand::SvReadLog { debit: false } => Some(SV_LOAD_LOG_SFI),
            CardCommand::SvReadLog { debit: true } => Some(SV_DEBIT_LOG_SFI),
            _ => None,
        }
    }

    /// Whether the command consumes the card modification buffer
    pub fn is_modifying(&self) -> bool {
        matches!(
            self,
            CardCommand::AppendRecord { .. }
                | CardCommand::UpdateRecord { .. }
                | CardCommand::WriteRecord { .. }
                | CardCommand::UpdateBinary { .. }
                | CardCommand::WriteBinary { .. }
                | CardCommand::Increase { .. }
                | CardCommand::Decrease { .. }
                | CardCommand::Invalidate
                | CardCommand::Rehabilitate
                | CardCommand::SvReload { .. }
                | CardCommand::SvDebit { .. }
        )
    }

    pub fn is_sv_action(&self) -> bool {
        matches!(self, CardCommand::SvReload { .. } | CardCommand::SvDebit { .. })
    }

    pub fn sv_action(&self) -> Option<SvAction> {
        match self {
            CardCommand::SvReload { action, .. } | CardCommand::SvDebit { action, .. } => Some(*action),
            _ => None,
        }
    }

    /// Commands whose answer must be processed before anything else is sent
    pub(crate) fn ends_batch(&self) -> bool {
        matches!(self, CardCommand::SvGet { .. } | CardCommand::CheckPinStatus)
    }

    fn data_length(&self) -> usize {
        match self {
            CardCommand::AppendRecord { data, .. }
            | CardCommand::UpdateRecord { data, .. }
            | CardCommand::WriteRecord { data, .. }
            | CardCommand::UpdateBinary { data, .. }
            | CardCommand::WriteBinary { data, .. } => data.len(),
            CardCommand::Increase { .. } | CardCommand::Decrease { .. } => 3,
            CardCommand::SvReload { .. } => SV_RELOAD_DATA_LENGTH,
            CardCommand::SvDebit { .. } => SV_DEBIT_DATA_LENGTH,
            _ => 0,
        }
    }

    /// Modification buffer units consumed by the command
    pub fn cost(&self, counted_in_bytes: bool) -> usize {
        if !self.is_modifying() {
            0
        } else if counted_in_bytes {
            self.data_length() + MODIFICATION_OVERHEAD
        } else {
            1
        }
    }

    /// APDU of the command; SV Reload and Debit need a SAM signature first
    pub(crate) fn apdu(&self) -> Option<APDU> {
        let apdu = match self {
            CardCommand::ReadRecords { sfi, first_record, last_record, record_size } => {
                if first_record == last_record {
                    commands::read_record(*sfi, *first_record)
                } else {
                    let count = (*last_record - *first_record) as u32 + 1;
                    commands::read_records(*sfi, *first_record, count * (*record_size as u32 + 2))
                }
            }
            CardCommand::ReadBinary { sfi, offset, length } => commands::read_binary(*sfi, *offset, *length),
            CardCommand::ReadCounters { sfi, count } => commands::read_counters(*sfi, *count),
            CardCommand::AppendRecord { sfi, data } => commands::append_record(*sfi, data),
            CardCommand::UpdateRecord { sfi, record_number, data } => commands::update_record(*sfi, *record_number, data),
            CardCommand::WriteRecord { sfi, record_number, data } => commands::write_record(*sfi, *record_number, data),
            CardCommand::UpdateBinary { sfi, offset, data } => commands::update_binary(*sfi, *offset, data),
            CardCommand::WriteBinary { sfi, offset, data } => commands::write_binary(*sfi, *offset, data),
            CardCommand::Increase { sfi, counter_number, value } => commands::increase(*sfi, *counter_number, *value),
            CardCommand::Decrease { sfi, counter_number, value } => commands::decrease(*sfi, *counter_number, *value),
            CardCommand::Invalidate => commands::invalidate(),
            CardCommand::Rehabilitate => commands::rehabilitate(),
            CardCommand::CheckPinStatus => commands::verify_pin(&[]),
            CardCommand::SvGet { operation, extended, .. } => {
                let p2 = match operation {
                    SvOperation::Reload => commands::SV_GET_RELOAD,
                    SvOperation::Debit => commands::SV_GET_DEBIT,
                };
                commands::sv_get(p2, *extended)
            }
            CardCommand::SvReadLog { debit: false } => commands::read_record(SV_LOAD_LOG_SFI, 1),
            CardCommand::SvReadLog { debit: true } => commands::read_records(
                SV_DEBIT_LOG_SFI,
                1,
                SV_DEBIT_LOG_RECORDS as u32 * (SvDebitLogRecord::SIZE as u32 + 2),
            ),
            CardCommand::SvReload { .. } | CardCommand::SvDebit { .. } => return None,
        };
        Some(apdu)
    }
}

/// Split a READ RECORDS answer (record number, length, content)* into records
pub(crate) fn parse_records(command: &'static str, data: &[u8]) -> Result<Vec<(u8, Vec<u8>)>> {
    let mut records = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 2 || rest.len() < 2 + rest[1] as usize {
            return Err(TransactionError::MalformedResponse {
                command,
                reason: format!("truncated record list ({} bytes left)", rest.len()),
            });
        }
        let length = rest[1] as usize;
        records.push((rest[0], rest[2..2 + length].to_vec()));
        rest = &rest[2 + length..];
    }
    Ok(records)
}
