//! Stored-value operations
//!
//! An SV Reload, Debit or Undebit is always the command right after an SV
//! Get for the same operation and action: the SAM signs the action over the
//! SV Get answer, so the action is only built once that answer is known.

use log::{debug, info, warn};

use super::command::{parse_records, CardCommand, SvAction, SvOperation, SV_DEBIT_LOG_SFI, SV_LOAD_LOG_SFI};
use super::manager::CardTransactionManager;
use crate::apdu::{commands, hexify, ins, APDU};
use crate::card::sv::{i24_from_be, i24_to_be, SV_BALANCE_MAX, SV_BALANCE_MIN};
use crate::card::{DataTrust, SvDebitLogRecord, SvLoadLogRecord};
use crate::channel::CardChannel;
use crate::error::{Result, TransactionError};
use crate::sam::{SamCoordinator, SvSignature, SvSignatureRequest};
use crate::security::KeyReference;

/// Largest amount of a single debit (2-byte signed field)
pub const MAX_SV_DEBIT_AMOUNT: i32 = 32_767;

/// KIF, KVC, SV transaction number (2) and balance (3)
const SV_GET_HEADER_LENGTH: usize = 7;

/// What an SV Get answered, kept until the SV action is built
#[derive(Debug, Clone)]
pub(crate) struct SvGetOutcome {
    pub operation: SvOperation,
    pub action: SvAction,
    pub key: KeyReference,
    pub balance: i32,
    pub tnum: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub(crate) enum SvLog {
    Load(SvLoadLogRecord),
    Debit(SvDebitLogRecord),
}

/// Ledger update applied once the card accepts the SV action
#[derive(Debug, Clone)]
pub(crate) struct PendingSvAction {
    pub new_balance: i32,
    pub new_tnum: u16,
    pub log: SvLog,
}

impl<C: CardChannel, S: SamCoordinator> CardTransactionManager<C, S> {
    /// Read the SV balance in view of a reload or a debit
    pub fn prepare_sv_get(&mut self, operation: SvOperation, action: SvAction) -> Result<()> {
        self.check_sv_feature()?;
        if action == SvAction::Undo && self.session.as_ref().is_some_and(|ctx| ctx.is_split()) {
            return Err(TransactionError::IllegalState(
                "SV undo cannot target an operation of a previous card session".into(),
            ));
        }
        let extended = self.setting.is_sv_load_and_debit_log_enabled();
        self.queue.push(CardCommand::SvGet { operation, action, extended });
        Ok(())
    }

    /// Reload `amount` with zero date, time and free data
    pub fn prepare_sv_reload(&mut self, amount: i32) -> Result<()> {
        self.prepare_sv_reload_with(amount, [0; 2], [0; 2], [0; 2])
    }

    pub fn prepare_sv_reload_with(
        &mut self,
        amount: i32,
        date: [u8; 2],
        time: [u8; 2],
        free_data: [u8; 2],
    ) -> Result<()> {
        self.check_sv_feature()?;
        if !(SV_BALANCE_MIN..=SV_BALANCE_MAX).contains(&amount) {
            return Err(TransactionError::IllegalArgument(format!("reload amount {} out of range", amount)));
        }
        let action = self.expect_sv_get(SvOperation::Reload)?;
        if action == SvAction::Undo && !(SV_BALANCE_MIN..=SV_BALANCE_MAX).contains(&-amount) {
            return Err(TransactionError::IllegalArgument(format!("reload amount {} cannot be undone", amount)));
        }
        self.check_single_sv_operation()?;
        self.queue.push(CardCommand::SvReload { amount, date, time, free_data, action });
        Ok(())
    }

    /// Debit `amount` with zero date and time
    pub fn prepare_sv_debit(&mut self, amount: i32) -> Result<()> {
        self.prepare_sv_debit_with(amount, [0; 2], [0; 2])
    }

    pub fn prepare_sv_debit_with(&mut self, amount: i32, date: [u8; 2], time: [u8; 2]) -> Result<()> {
        self.check_sv_feature()?;
        if !(0..=MAX_SV_DEBIT_AMOUNT).contains(&amount) {
            return Err(TransactionError::IllegalArgument(format!("debit amount {} out of range", amount)));
        }
        let action = self.expect_sv_get(SvOperation::Debit)?;
        self.check_single_sv_operation()?;
        if action == SvAction::Do {
            if let Some(balance) = self.card.sv.balance {
                self.check_debit(balance, amount)?;
            }
        }
        self.queue.push(CardCommand::SvDebit { amount, date, time, action });
        Ok(())
    }

    /// Read the load log file and the debit log file
    pub fn prepare_sv_read_all_logs(&mut self) -> Result<()> {
        self.check_sv_feature()?;
        self.queue.push(CardCommand::SvReadLog { debit: false });
        self.queue.push(CardCommand::SvReadLog { debit: true });
        Ok(())
    }

    fn check_sv_feature(&self) -> Result<()> {
        if !self.card.sv_feature {
            return Err(TransactionError::IllegalState("card has no stored-value application".into()));
        }
        Ok(())
    }

    fn expect_sv_get(&self, operation: SvOperation) -> Result<SvAction> {
        match self.queue.back() {
            Some(CardCommand::SvGet { operation: prepared, action, .. }) if *prepared == operation => Ok(*action),
            Some(CardCommand::SvGet { operation: prepared, .. }) => Err(TransactionError::IllegalState(format!(
                "SV Get prepared for {:?}, not {:?}",
                prepared, operation
            ))),
            _ => Err(TransactionError::IllegalState(format!(
                "SV {:?} must directly follow an SV Get",
                operation
            ))),
        }
    }

    /// One SV Reload/Debit/Undebit per secure session
    fn check_single_sv_operation(&self) -> Result<()> {
        if let Some(ctx) = self.session.as_ref() {
            let queued = self.queue.iter().filter(|c| c.is_sv_action()).count();
            if ctx.sv_operations + queued > 0 {
                return Err(TransactionError::IllegalState(
                    "only one SV operation is allowed per secure session".into(),
                ));
            }
        }
        Ok(())
    }

    fn check_debit(&self, balance: i32, amount: i32) -> Result<()> {
        if balance - amount < 0 && !self.setting.is_sv_negative_balance_authorized() {
            return Err(TransactionError::IllegalState(format!(
                "SV balance {} cannot cover a debit of {}",
                balance, amount
            )));
        }
        Ok(())
    }

    /// Decode an SV Get answer into the ledger
    pub(super) fn apply_sv_get(
        &mut self,
        operation: SvOperation,
        action: SvAction,
        extended: bool,
        data: &[u8],
    ) -> Result<()> {
        let malformed = |reason: String| TransactionError::MalformedResponse { command: "SV GET", reason };
        if data.len() < SV_GET_HEADER_LENGTH {
            return Err(malformed(format!("{} bytes of data", data.len())));
        }
        let key = KeyReference::new(data[0], data[1]);
        let tnum = u16::from_be_bytes([data[2], data[3]]);
        let balance = i24_from_be(&data[4..7]);

        let mut rest = &data[SV_GET_HEADER_LENGTH..];
        let mut load_log = None;
        let mut debit_log = None;
        if extended || operation == SvOperation::Reload {
            let record = SvLoadLogRecord::from_bytes(rest).ok_or_else(|| malformed("truncated load log".into()))?;
            rest = &rest[SvLoadLogRecord::SIZE..];
            load_log = Some(record);
        }
        if extended || operation == SvOperation::Debit {
            let record = SvDebitLogRecord::from_bytes(rest).ok_or_else(|| malformed("truncated debit log".into()))?;
            debit_log = Some(record);
        }

        let signers = load_log
            .iter()
            .map(|r| (r.sam_id, r.sam_tnum))
            .chain(debit_log.iter().map(|r| (r.sam_id, r.sam_tnum)));
        for (sam_id, sam_tnum) in signers {
            if self.setting.is_sam_revoked(&sam_id, sam_tnum) {
                warn!("SV log signed by revoked SAM {}", hexify(&sam_id));
                return Err(TransactionError::SamRevoked(format!(
                    "SAM {} (transaction {}) found in the SV logs",
                    hexify(&sam_id),
                    sam_tnum
                )));
            }
        }
        if !self.setting.is_sv_key_authorized(key) {
            return Err(TransactionError::UnauthorizedKey { kif: key.kif, kvc: key.kvc });
        }

        let ledger = &mut self.card.sv;
        ledger.balance = Some(balance);
        ledger.last_tnum = Some(tnum);
        ledger.kif = Some(key.kif);
        ledger.kvc = Some(key.kvc);
        if let Some(record) = load_log {
            ledger.append_load_log(record);
        }
        if let Some(record) = debit_log {
            ledger.append_debit_log(record);
        }
        self.touch_sv();
        debug!("SV Get: balance {}, SV transaction {}, {}", balance, tnum, key);

        self.sv_get = Some(SvGetOutcome { operation, action, key, balance, tnum, data: data.to_vec() });
        Ok(())
    }

    /// Build the signed SV Reload/Debit/Undebit from the last SV Get answer
    pub(super) fn build_sv_action(&mut self, command: &CardCommand) -> Result<APDU> {
        let get = self.sv_get.take().ok_or_else(|| {
            TransactionError::Inconsistency(format!("{} without a preceding SV Get answer", command.name()))
        })?;
        let (operation, action) = match command {
            CardCommand::SvReload { action, .. } => (SvOperation::Reload, *action),
            CardCommand::SvDebit { action, .. } => (SvOperation::Debit, *action),
            _ => {
                return Err(TransactionError::Inconsistency(format!("{} is not an SV operation", command.name())))
            }
        };
        if get.operation != operation || get.action != action {
            return Err(TransactionError::Inconsistency(format!(
                "SV Get for {:?}/{:?} cannot back {}",
                get.operation,
                get.action,
                command.name()
            )));
        }
        if action == SvAction::Undo && self.session.as_ref().is_some_and(|ctx| ctx.is_split()) {
            return Err(TransactionError::IllegalState(
                "SV undo cannot target an operation of a previous card session".into(),
            ));
        }
        let new_tnum = get.tnum.wrapping_add(1);

        match command {
            CardCommand::SvReload { amount, date, time, free_data, .. } => {
                let signed = if action == SvAction::Undo { -amount } else { *amount };
                if !(SV_BALANCE_MIN..=SV_BALANCE_MAX).contains(&signed) {
                    return Err(TransactionError::Inconsistency(format!("SV reload amount {} out of range", signed)));
                }
                let new_balance = get.balance + signed;
                if !(SV_BALANCE_MIN..=SV_BALANCE_MAX).contains(&new_balance) {
                    return Err(TransactionError::Inconsistency(format!(
                        "SV balance {} out of range after reload",
                        new_balance
                    )));
                }
                let mut data = Vec::with_capacity(10);
                data.extend_from_slice(&i24_to_be(signed));
                data.extend_from_slice(date);
                data.push(free_data[0]);
                data.push(get.key.kvc);
                data.push(free_data[1]);
                data.extend_from_slice(time);

                let signature = self.sign_sv(&get, action, ins::SV_RELOAD, &data)?;
                let log = SvLoadLogRecord::build(
                    *date,
                    *time,
                    *free_data,
                    get.key.kvc,
                    new_balance,
                    signed,
                    signature.sam_id,
                    signature.sam_tnum,
                    new_tnum,
                );
                data.extend(signature.to_bytes());
                self.pending_sv = Some(PendingSvAction { new_balance, new_tnum, log: SvLog::Load(log) });
                Ok(commands::sv_reload(data))
            }
            CardCommand::SvDebit { amount, date, time, .. } => {
                let (new_balance, logged_amount, instruction) = match action {
                    SvAction::Do => {
                        self.check_debit(get.balance, *amount)?;
                        (get.balance - amount, *amount, ins::SV_DEBIT)
                    }
                    SvAction::Undo => (get.balance + amount, -amount, ins::SV_UNDEBIT),
                };
                let mut data = Vec::with_capacity(7);
                data.extend_from_slice(&(*amount as i16).to_be_bytes());
                data.extend_from_slice(date);
                data.extend_from_slice(time);
                data.push(get.key.kvc);

                let signature = self.sign_sv(&get, action, instruction, &data)?;
                let log = SvDebitLogRecord::build(
                    logged_amount,
                    *date,
                    *time,
                    get.key.kvc,
                    signature.sam_id,
                    signature.sam_tnum,
                    new_balance,
                    new_tnum,
                );
                data.extend(signature.to_bytes());
                self.pending_sv = Some(PendingSvAction { new_balance, new_tnum, log: SvLog::Debit(log) });
                Ok(match action {
                    SvAction::Do => commands::sv_debit(data),
                    SvAction::Undo => commands::sv_undebit(data),
                })
            }
            _ => Err(TransactionError::Inconsistency(format!("{} is not an SV operation", command.name()))),
        }
    }

    fn sign_sv(&mut self, get: &SvGetOutcome, action: SvAction, instruction: u8, data: &[u8]) -> Result<SvSignature> {
        self.sam.select_diversifier(&self.card.serial_number)?;
        let request = SvSignatureRequest {
            operation: get.operation,
            action,
            key: get.key,
            sv_get_data: get.data.clone(),
            ins: instruction,
            command_data: data.to_vec(),
        };
        Ok(self.sam.sign_sv_operation(&request)?)
    }

    /// Card accepted the SV action: commit the pending ledger update
    pub(super) fn apply_sv_action(&mut self, data: &[u8]) -> Result<()> {
        let pending = self
            .pending_sv
            .take()
            .ok_or_else(|| TransactionError::Inconsistency("SV answer without a pending SV operation".into()))?;
        // Inside a session the session MAC covers the operation
        if self.session.is_none() && !self.sam.check_sv_response(data)? {
            return Err(TransactionError::SvAuthentication);
        }

        let ledger = &mut self.card.sv;
        ledger.balance = Some(pending.new_balance);
        ledger.last_tnum = Some(pending.new_tnum);
        match pending.log {
            SvLog::Load(record) => ledger.append_load_log(record),
            SvLog::Debit(record) => ledger.append_debit_log(record),
        }
        if let Some(ctx) = self.session.as_mut() {
            ctx.sv_operations += 1;
        }
        self.touch_sv();
        info!("SV operation accepted, balance now {}", pending.new_balance);
        Ok(())
    }

    /// Decode the load log record or the debit log records
    pub(super) fn apply_sv_logs(&mut self, debit: bool, data: &[u8]) -> Result<()> {
        if debit {
            let records = parse_records("READ RECORDS", data)?;
            // Record 1 is the most recent one
            for (number, content) in records.into_iter().rev() {
                let record = SvDebitLogRecord::from_bytes(&content).ok_or_else(|| {
                    TransactionError::MalformedResponse {
                        command: "READ RECORDS",
                        reason: format!("debit log record {} is {} bytes", number, content.len()),
                    }
                })?;
                self.card.sv.append_debit_log(record);
                self.card.file_entry(SV_DEBIT_LOG_SFI).data.set_content(number, content);
            }
        } else {
            let record = SvLoadLogRecord::from_bytes(data).ok_or_else(|| TransactionError::MalformedResponse {
                command: "READ RECORD",
                reason: format!("load log record is {} bytes", data.len()),
            })?;
            self.card.sv.append_load_log(record);
            self.card.file_entry(SV_LOAD_LOG_SFI).data.set_content(1, data.to_vec());
        }
        self.touch_sv();
        Ok(())
    }

    pub(super) fn touch_sv(&mut self) {
        self.card.sv.trust = match self.session.as_mut() {
            Some(ctx) => {
                ctx.sv_touched = true;
                DataTrust::Pending
            }
            None => DataTrust::Unsecured,
        };
    }
}
