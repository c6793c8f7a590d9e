//! Card transaction manager
//!
//! Drives one card through `prepare_*` / `process_*` calls:
//!
//! ```text
//! IDLE -> OPENING -> OPEN -> CLOSING -> CLOSED
//!                      |                 CANCELLED
//!                      +---------------> ERROR
//! ```
//!
//! Prepared commands are only sent by a `process_*` call. When a flush would
//! overflow the card modification buffer and multiple sessions are enabled,
//! the current card session is closed and a new one is opened at the same
//! level before the flush goes on.

use log::{debug, error, info, warn};

use super::audit::{AuditKind, AuditTrail};
use super::command::{parse_records, CardCommand, SvAction};
use super::digest::SessionDigest;
use super::queue::CommandQueue;
use super::session::{SessionContext, SessionState};
use super::sv::{PendingSvAction, SvGetOutcome};
use crate::apdu::{commands, hexify, Response, APDU, SW};
use crate::card::sv::u24_from_be;
use crate::card::{CalypsoCard, DataTrust};
use crate::channel::{CardChannel, ChannelError};
use crate::error::{ErrorKind, Result, TransactionError};
use crate::sam::soft::CARD_CHALLENGE_SIZE;
use crate::sam::SamCoordinator;
use crate::security::{CardSecuritySetting, KeyReference, WriteAccessLevel};

/// Highest SFI addressable by the file commands
pub const MAX_SFI: u8 = 30;
/// Highest record number
pub const MAX_RECORD_NUMBER: u8 = 250;
/// Highest counter number of a counters file
pub const MAX_COUNTER_NUMBER: u8 = 83;
/// Highest value of a 3-byte counter
pub const MAX_COUNTER_VALUE: u32 = 0xFF_FFFF;
/// Longest data accepted by a single write command
pub const MAX_DATA_LENGTH: usize = 250;

/// Card challenge (4) + ratification flag + KIF + KVC
const OPEN_RESPONSE_MIN_LENGTH: usize = CARD_CHALLENGE_SIZE + 3;

fn check_sfi(sfi: u8) -> Result<()> {
    if sfi == 0 || sfi > MAX_SFI {
        return Err(TransactionError::IllegalArgument(format!("SFI {:02X}h out of range", sfi)));
    }
    Ok(())
}

fn check_record_number(record_number: u8) -> Result<()> {
    if record_number == 0 || record_number > MAX_RECORD_NUMBER {
        return Err(TransactionError::IllegalArgument(format!(
            "record number {} out of range",
            record_number
        )));
    }
    Ok(())
}

fn check_counter_number(counter_number: u8) -> Result<()> {
    if counter_number == 0 || counter_number > MAX_COUNTER_NUMBER {
        return Err(TransactionError::IllegalArgument(format!(
            "counter number {} out of range",
            counter_number
        )));
    }
    Ok(())
}

fn check_data(data: &[u8]) -> Result<()> {
    if data.is_empty() || data.len() > MAX_DATA_LENGTH {
        return Err(TransactionError::IllegalArgument(format!("data length {} out of range", data.len())));
    }
    Ok(())
}

/// Cost of `commands[0]`, plus the SV action that follows an SV Get: both
/// must land in the same card session.
fn group_cost(commands: &[CardCommand], in_bytes: bool) -> usize {
    match commands {
        [CardCommand::SvGet { .. }, next, ..] if next.is_sv_action() => next.cost(in_bytes),
        [first, ..] => first.cost(in_bytes),
        [] => 0,
    }
}

/// Secure transaction engine for one card and one SAM
pub struct CardTransactionManager<C: CardChannel, S: SamCoordinator> {
    pub(super) channel: C,
    pub(super) sam: S,
    pub(super) card: CalypsoCard,
    pub(super) setting: CardSecuritySetting,
    pub(super) queue: CommandQueue,
    pub(super) state: SessionState,
    pub(super) session: Option<SessionContext>,
    pub(super) audit: AuditTrail,
    /// Answer of the last SV Get, consumed by the SV action that follows it
    pub(super) sv_get: Option<SvGetOutcome>,
    /// SV action sent to the card and waiting for its answer
    pub(super) pending_sv: Option<PendingSvAction>,
    pub(super) release_requested: bool,
}

impl<C: CardChannel, S: SamCoordinator> CardTransactionManager<C, S> {
    /// Bind a card, its channel and a SAM under a security setting.
    ///
    /// The setting must carry a SAM resource whose serial number matches the
    /// SAM given here.
    pub fn new(channel: C, sam: S, card: CalypsoCard, setting: CardSecuritySetting) -> Result<Self> {
        let resource = setting.sam_resource().ok_or_else(|| {
            TransactionError::Configuration("no SAM resource bound to the security setting".into())
        })?;
        if resource.sam.serial_number != sam.identity().serial_number {
            return Err(TransactionError::Configuration(format!(
                "SAM {} does not match the bound resource {}",
                hexify(&sam.identity().serial_number),
                hexify(&resource.sam.serial_number)
            )));
        }
        info!(
            "Transaction manager ready: card {} with SAM {} on '{}'",
            hexify(&card.serial_number),
            hexify(&resource.sam.serial_number),
            resource.reader_name
        );
        Ok(Self {
            channel,
            sam,
            card,
            setting,
            queue: CommandQueue::new(),
            state: SessionState::Idle,
            session: None,
            audit: AuditTrail::new(),
            sv_get: None,
            pending_sv: None,
            release_requested: false,
        })
    }

    /// Card model as updated by the exchanges so far
    pub fn card(&self) -> &CalypsoCard {
        &self.card
    }

    pub fn audit_trail(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn setting(&self) -> &CardSecuritySetting {
        &self.setting
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn channel_mut(&mut self) -> &mut C {
        &mut self.channel
    }

    pub fn sam_mut(&mut self) -> &mut S {
        &mut self.sam
    }

    /// Commands prepared and not sent yet
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Give the card and SAM back
    pub fn into_parts(self) -> (C, S, CalypsoCard) {
        (self.channel, self.sam, self.card)
    }

    // ---------------------------------------------------------------
    // Command preparation
    // ---------------------------------------------------------------

    /// Read records `first_record..=last_record` of `sfi`
    pub fn prepare_read_records(
        &mut self,
        sfi: u8,
        first_record: u8,
        last_record: u8,
        record_size: usize,
    ) -> Result<()> {
        check_sfi(sfi)?;
        check_record_number(first_record)?;
        check_record_number(last_record)?;
        if first_record > last_record {
            return Err(TransactionError::IllegalArgument(format!(
                "first record {} after last record {}",
                first_record, last_record
            )));
        }
        if record_size == 0 || record_size > MAX_DATA_LENGTH {
            return Err(TransactionError::IllegalArgument(format!("record size {} out of range", record_size)));
        }
        self.queue.push(CardCommand::ReadRecords { sfi, first_record, last_record, record_size });
        Ok(())
    }

    pub fn prepare_read_record(&mut self, sfi: u8, record_number: u8) -> Result<()> {
        check_sfi(sfi)?;
        check_record_number(record_number)?;
        let record_size = self
            .card
            .file(sfi)
            .and_then(|f| f.header.as_ref())
            .map_or(MAX_DATA_LENGTH, |h| h.record_size);
        self.queue.push(CardCommand::ReadRecords {
            sfi,
            first_record: record_number,
            last_record: record_number,
            record_size,
        });
        Ok(())
    }

    pub fn prepare_read_binary(&mut self, sfi: u8, offset: u8, length: u8) -> Result<()> {
        check_sfi(sfi)?;
        if length == 0 {
            return Err(TransactionError::IllegalArgument("empty binary read".into()));
        }
        self.queue.push(CardCommand::ReadBinary { sfi, offset, length });
        Ok(())
    }

    /// Read the first `count` counters of a counters file
    pub fn prepare_read_counters(&mut self, sfi: u8, count: u8) -> Result<()> {
        check_sfi(sfi)?;
        check_counter_number(count)?;
        self.queue.push(CardCommand::ReadCounters { sfi, count });
        Ok(())
    }

    pub fn prepare_append_record(&mut self, sfi: u8, data: &[u8]) -> Result<()> {
        check_sfi(sfi)?;
        check_data(data)?;
        self.queue.push(CardCommand::AppendRecord { sfi, data: data.to_vec() });
        Ok(())
    }

    pub fn prepare_update_record(&mut self, sfi: u8, record_number: u8, data: &[u8]) -> Result<()> {
        check_sfi(sfi)?;
        check_record_number(record_number)?;
        check_data(data)?;
        self.queue.push(CardCommand::UpdateRecord { sfi, record_number, data: data.to_vec() });
        Ok(())
    }

    /// Write a record; the card ORs the data into the current content
    pub fn prepare_write_record(&mut self, sfi: u8, record_number: u8, data: &[u8]) -> Result<()> {
        check_sfi(sfi)?;
        check_record_number(record_number)?;
        check_data(data)?;
        self.queue.push(CardCommand::WriteRecord { sfi, record_number, data: data.to_vec() });
        Ok(())
    }

    pub fn prepare_update_binary(&mut self, sfi: u8, offset: u8, data: &[u8]) -> Result<()> {
        check_sfi(sfi)?;
        check_data(data)?;
        self.queue.push(CardCommand::UpdateBinary { sfi, offset, data: data.to_vec() });
        Ok(())
    }

    pub fn prepare_write_binary(&mut self, sfi: u8, offset: u8, data: &[u8]) -> Result<()> {
        check_sfi(sfi)?;
        check_data(data)?;
        self.queue.push(CardCommand::WriteBinary { sfi, offset, data: data.to_vec() });
        Ok(())
    }

    pub fn prepare_increase_counter(&mut self, sfi: u8, counter_number: u8, value: u32) -> Result<()> {
        self.check_counter_operation(sfi, counter_number, value)?;
        self.queue.push(CardCommand::Increase { sfi, counter_number, value });
        Ok(())
    }

    pub fn prepare_decrease_counter(&mut self, sfi: u8, counter_number: u8, value: u32) -> Result<()> {
        self.check_counter_operation(sfi, counter_number, value)?;
        self.queue.push(CardCommand::Decrease { sfi, counter_number, value });
        Ok(())
    }

    fn check_counter_operation(&self, sfi: u8, counter_number: u8, value: u32) -> Result<()> {
        check_sfi(sfi)?;
        check_counter_number(counter_number)?;
        if value > MAX_COUNTER_VALUE {
            return Err(TransactionError::IllegalArgument(format!("counter value {} out of range", value)));
        }
        Ok(())
    }

    pub fn prepare_invalidate(&mut self) -> Result<()> {
        if self.card.df_invalidated {
            return Err(TransactionError::IllegalState("DF already invalidated".into()));
        }
        self.queue.push(CardCommand::Invalidate);
        Ok(())
    }

    pub fn prepare_rehabilitate(&mut self) -> Result<()> {
        if !self.card.df_invalidated {
            return Err(TransactionError::IllegalState("DF is not invalidated".into()));
        }
        self.queue.push(CardCommand::Rehabilitate);
        Ok(())
    }

    /// Release the card channel at the end of the next closing or cancel
    pub fn prepare_release_card_channel(&mut self) {
        self.release_requested = true;
    }

    // ---------------------------------------------------------------
    // Processing
    // ---------------------------------------------------------------

    /// Open a secure session at `level` and send the prepared commands in it
    pub fn process_opening(&mut self, level: WriteAccessLevel) -> Result<()> {
        if !self.state.is_terminal() {
            return Err(TransactionError::IllegalState(format!(
                "cannot open a session in state {}",
                self.state
            )));
        }
        // Rejected keys never reach the card
        let key = self.setting.resolve_session_key(level, &self.card)?;
        self.sv_get = None;
        if let Err(err) = self.open_session(level, key) {
            return Err(self.fail(err));
        }
        self.process_queue()
    }

    /// Send the prepared commands, inside the open session if there is one
    pub fn process_card_commands(&mut self) -> Result<()> {
        if matches!(self.state, SessionState::Opening | SessionState::Closing) {
            return Err(TransactionError::IllegalState(format!(
                "cannot send commands in state {}",
                self.state
            )));
        }
        self.process_queue()
    }

    /// Send the remaining commands and close the session with the MAC exchange
    pub fn process_closing(&mut self) -> Result<()> {
        if self.state != SessionState::Open {
            return Err(TransactionError::IllegalState(format!("no open session to close (state {})", self.state)));
        }
        self.process_queue()?;
        self.state = SessionState::Closing;

        match self.close_session(true) {
            Ok(()) => {
                if let Some(ctx) = self.session.take() {
                    self.card.mark_trust(&ctx.touched_files, ctx.sv_touched, DataTrust::Certified);
                    info!(
                        "Session closed and certified ({} exchanges, digest {})",
                        ctx.digest.exchanges(),
                        ctx.digest.fingerprint()
                    );
                }
                self.state = SessionState::Closed;
                if self.setting.is_ratification_enabled() {
                    self.ratify();
                }
                self.release_if_requested()
            }
            Err(err) if err.kind() == ErrorKind::AuthenticationNotVerified => {
                warn!("Session closed without a verified card MAC: {}", err);
                if let Some(ctx) = self.session.take() {
                    self.card.mark_trust(&ctx.touched_files, ctx.sv_touched, DataTrust::Unverified);
                }
                self.state = SessionState::Closed;
                if let Err(release) = self.release_if_requested() {
                    warn!("Channel release failed: {}", release);
                }
                Err(err)
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Abandon the session without the closing MAC exchange
    ///
    /// Commands already sent stay applied on the card; their data is marked
    /// untrusted.
    pub fn process_cancel(&mut self) -> Result<()> {
        self.queue.clear();
        self.sv_get = None;
        self.pending_sv = None;
        let mut result = Ok(());
        if let Some(ctx) = self.session.take() {
            let apdu = commands::abort_secure_session().to_bytes();
            match self.channel.transmit(&apdu) {
                Ok(raw) => {
                    debug!("ABORT -> {}", hexify(&raw));
                    self.record_exchange(AuditKind::Abort, &apdu, &raw);
                }
                Err(e) => {
                    warn!("Session abort not delivered: {}", e);
                    result = Err(e.into());
                }
            }
            self.card.mark_trust(&ctx.touched_files, ctx.sv_touched, DataTrust::Untrusted);
            self.state = SessionState::Cancelled;
            info!("Session cancelled");
        }
        let released = self.release_if_requested();
        result.and(released)
    }

    /// Check the plan, then flush; failures once I/O may have started end the
    /// transaction
    fn process_queue(&mut self) -> Result<()> {
        if let Err(err) = self.check_flush_plan() {
            return Err(if err.kind() == ErrorKind::Configuration { err } else { self.fail(err) });
        }
        match self.flush() {
            Ok(()) => Ok(()),
            Err(err) => Err(self.fail(err)),
        }
    }

    /// Replay the buffer accounting of the flush without sending anything
    fn check_flush_plan(&self) -> Result<()> {
        let ctx = match self.session.as_ref() {
            Some(ctx) => ctx,
            None => return Ok(()),
        };
        let commands: Vec<CardCommand> = self.queue.iter().cloned().collect();
        let in_bytes = self.card.modification_counter_in_bytes;
        let capacity = self.card.session_modifications;
        let mut used = ctx.buffer_used;
        let mut split = ctx.is_split();

        for (index, command) in commands.iter().enumerate() {
            let own = command.cost(in_bytes);
            if own > capacity {
                return Err(TransactionError::SessionBufferOverflow { required: own, capacity });
            }
            let group = group_cost(&commands[index..], in_bytes);
            if group > 0 && used + group > capacity {
                if !self.setting.is_multiple_session_enabled() {
                    return Err(TransactionError::SessionBufferOverflow { required: used + group, capacity });
                }
                split = true;
                used = 0;
            }
            used += own;
            if split && command.sv_action() == Some(SvAction::Undo) {
                return Err(TransactionError::IllegalState(
                    "SV undo cannot target an operation of a previous card session".into(),
                ));
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let commands = self.queue.take_all();
        if commands.is_empty() {
            return Ok(());
        }
        debug!("Flushing {} card commands", commands.len());
        let in_bytes = self.card.modification_counter_in_bytes;
        let capacity = self.card.session_modifications;
        let mut batch: Vec<(CardCommand, Vec<u8>)> = Vec::new();

        for (index, command) in commands.iter().enumerate() {
            let needs_split = self.session.as_ref().is_some_and(|ctx| {
                let cost = group_cost(&commands[index..], in_bytes);
                cost > 0 && ctx.buffer_used + cost > capacity
            });
            if needs_split {
                self.send_batch(std::mem::take(&mut batch))?;
                self.split_session()?;
            }
            if let Some(ctx) = self.session.as_mut() {
                ctx.buffer_used += command.cost(in_bytes);
            }

            let apdu = match command.apdu() {
                Some(apdu) => apdu,
                None => {
                    // SV actions are signed from the SV Get answer
                    self.send_batch(std::mem::take(&mut batch))?;
                    self.build_sv_action(command)?
                }
            };
            batch.push((command.clone(), apdu.to_bytes()));
            if command.ends_batch() || command.is_sv_action() {
                self.send_batch(std::mem::take(&mut batch))?;
            }
        }
        self.send_batch(batch)
    }

    fn send_batch(&mut self, batch: Vec<(CardCommand, Vec<u8>)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let apdus: Vec<Vec<u8>> = batch.iter().map(|(_, apdu)| apdu.clone()).collect();
        for apdu in &apdus {
            debug!("<- {}", hexify(apdu));
        }
        let responses = self.channel.transmit_batch(&apdus)?;
        for raw in &responses {
            debug!("-> {}", hexify(raw));
        }

        // A short answer list is only legal when the last answer is an error
        let stopped_on_error = responses
            .last()
            .is_some_and(|raw| Response::from_bytes(raw).map_or(true, |r| !r.is_okay()));
        if responses.len() > apdus.len() || (responses.len() < apdus.len() && !stopped_on_error) {
            return Err(TransactionError::DesynchronizedExchanges {
                commands: apdus.len(),
                responses: responses.len(),
            });
        }

        for ((command, apdu), raw) in batch.iter().zip(responses.iter()) {
            self.record_exchange(AuditKind::Command, apdu, raw);
            let response = Response::from_bytes(raw).map_err(|e| TransactionError::MalformedResponse {
                command: command.name(),
                reason: e.to_string(),
            })?;
            self.apply_response(command, &response)?;
        }
        Ok(())
    }

    /// Single exchange outside the batched flush
    pub(super) fn exchange(&mut self, kind: AuditKind, name: &'static str, apdu: &APDU) -> Result<Response> {
        let command = apdu.to_bytes();
        debug!("{} <- {}", name, hexify(&command));
        let raw = self.channel.transmit(&command)?;
        debug!("{} -> {}", name, hexify(&raw));
        self.record_exchange(kind, &command, &raw);
        Response::from_bytes(&raw)
            .map_err(|e| TransactionError::MalformedResponse { command: name, reason: e.to_string() })
    }

    fn record_exchange(&mut self, kind: AuditKind, command: &[u8], response: &[u8]) {
        if self.setting.is_transaction_audit_enabled() {
            self.audit.record(kind, command, response);
        }
        if kind == AuditKind::Command {
            if let Some(ctx) = self.session.as_mut().filter(|ctx| !ctx.closing) {
                ctx.digest.push(command, response);
            }
        }
    }

    // ---------------------------------------------------------------
    // Response decoding
    // ---------------------------------------------------------------

    fn apply_response(&mut self, command: &CardCommand, response: &Response) -> Result<()> {
        if let CardCommand::CheckPinStatus = command {
            return self.apply_pin_status(response.sw());
        }
        if !response.is_okay() {
            return Err(TransactionError::from_card_status(command.name(), response.sw()));
        }
        let data = &response.data;

        match command {
            CardCommand::ReadRecords { sfi, first_record, last_record, .. } => {
                if first_record == last_record {
                    self.card.file_entry(*sfi).data.set_content(*first_record, data.clone());
                } else {
                    for (number, content) in parse_records(command.name(), data)? {
                        self.card.file_entry(*sfi).data.set_content(number, content);
                    }
                }
            }
            CardCommand::ReadBinary { sfi, offset, .. } => {
                self.card.file_entry(*sfi).data.set_content_at(1, *offset as usize, data);
            }
            CardCommand::ReadCounters { sfi, count } => {
                if data.len() < *count as usize * 3 {
                    return Err(TransactionError::MalformedResponse {
                        command: command.name(),
                        reason: format!("{} counters expected, got {} bytes", count, data.len()),
                    });
                }
                self.card.file_entry(*sfi).data.set_content(1, data.clone());
            }
            CardCommand::AppendRecord { sfi, data: content } => {
                let capacity = self.card.records_number(*sfi);
                self.card.file_entry(*sfi).data.add_cyclic_content(content.clone(), capacity);
            }
            CardCommand::UpdateRecord { sfi, record_number, data: content } => {
                self.card.file_entry(*sfi).data.set_content(*record_number, content.clone());
            }
            CardCommand::WriteRecord { sfi, record_number, data: content } => {
                self.card.file_entry(*sfi).data.fill_content(*record_number, 0, content);
            }
            CardCommand::UpdateBinary { sfi, offset, data: content } => {
                self.card.file_entry(*sfi).data.set_content_at(1, *offset as usize, content);
            }
            CardCommand::WriteBinary { sfi, offset, data: content } => {
                self.card.file_entry(*sfi).data.fill_content(1, *offset as usize, content);
            }
            CardCommand::Increase { sfi, counter_number, .. }
            | CardCommand::Decrease { sfi, counter_number, .. } => {
                if data.len() != 3 {
                    return Err(TransactionError::MalformedResponse {
                        command: command.name(),
                        reason: format!("expected a 3-byte counter value, got {} bytes", data.len()),
                    });
                }
                self.card.file_entry(*sfi).data.set_counter(*counter_number, u24_from_be(data));
            }
            CardCommand::Invalidate => self.card.df_invalidated = true,
            CardCommand::Rehabilitate => self.card.df_invalidated = false,
            CardCommand::SvGet { operation, action, extended } => {
                self.apply_sv_get(*operation, *action, *extended, data)?;
            }
            CardCommand::SvReload { .. } | CardCommand::SvDebit { .. } => self.apply_sv_action(data)?,
            CardCommand::SvReadLog { debit } => self.apply_sv_logs(*debit, data)?,
            CardCommand::CheckPinStatus => {}
        }

        if let Some(sfi) = command.sfi() {
            self.touch_file(sfi);
        }
        Ok(())
    }

    fn touch_file(&mut self, sfi: u8) {
        let trust = match self.session.as_mut() {
            Some(ctx) => {
                ctx.touched_files.insert(sfi);
                DataTrust::Pending
            }
            None => DataTrust::Unsecured,
        };
        self.card.file_entry(sfi).trust = trust;
    }

    // ---------------------------------------------------------------
    // Card sessions
    // ---------------------------------------------------------------

    fn open_session(&mut self, level: WriteAccessLevel, key: KeyReference) -> Result<()> {
        self.state = SessionState::Opening;
        info!("Opening {} session with {}", level, key);

        self.sam.select_diversifier(&self.card.serial_number)?;
        let challenge = self.sam.get_challenge()?;
        let apdu = commands::open_secure_session(level.key_index(), &challenge);
        let response = self.exchange(AuditKind::Open, "OPEN SECURE SESSION", &apdu)?;
        if !response.is_okay() {
            return Err(TransactionError::from_card_status("OPEN SECURE SESSION", response.sw()));
        }

        let data = &response.data;
        if data.len() < OPEN_RESPONSE_MIN_LENGTH {
            return Err(TransactionError::MalformedResponse {
                command: "OPEN SECURE SESSION",
                reason: format!("{} bytes of data", data.len()),
            });
        }
        let card_challenge = &data[..CARD_CHALLENGE_SIZE];
        let used = KeyReference::new(data[5], data[6]);
        if !self.setting.is_session_key_authorized(used) {
            warn!("Card opened the session with unauthorized {}", used);
            self.abort_card_session();
            return Err(TransactionError::UnauthorizedKey { kif: used.kif, kvc: used.kvc });
        }
        if used != key {
            debug!("Card opened the session with {} instead of {}", used, key);
        }

        let keys = self.sam.derive_session_keys(level, used, card_challenge)?;
        self.card.transaction_counter = Some(u24_from_be(&data[..3]));
        self.card.df_ratified = data[4] == 0x00;

        let mut context = SessionContext::new(level, keys, SessionDigest::new(data));
        if let Some(previous) = self.session.take() {
            context.continue_from(previous);
        }
        self.session = Some(context);
        self.state = SessionState::Open;
        info!("{} session open, card transaction counter {}", level, u24_from_be(&data[..3]));
        Ok(())
    }

    /// Close the current card session and open a new one at the same level
    fn split_session(&mut self) -> Result<()> {
        let level = self
            .session
            .as_ref()
            .map(|ctx| ctx.level)
            .ok_or_else(|| TransactionError::IllegalState("no session to split".into()))?;
        info!("Modification buffer full, splitting the {} session", level);
        self.close_session(false)?;
        let key = self.setting.resolve_session_key(level, &self.card)?;
        self.open_session(level, key)
    }

    /// MAC exchange with the card; `final_close` is false when splitting
    fn close_session(&mut self, final_close: bool) -> Result<()> {
        let ratification_asked = final_close && self.setting.is_ratification_enabled();
        let ctx = self
            .session
            .as_mut()
            .ok_or_else(|| TransactionError::IllegalState("no session context".into()))?;
        let terminal_mac = self.sam.compute_mac(&ctx.keys, ctx.digest.as_bytes())?;
        let card_mac_data = ctx.digest.with_terminal_mac(&terminal_mac);
        ctx.closing = true;
        debug!("Closing card session, digest {} over {} exchanges", ctx.digest.fingerprint(), ctx.digest.exchanges());

        let apdu = commands::close_secure_session(&terminal_mac, ratification_asked).to_bytes();
        debug!("CLOSE SECURE SESSION <- {}", hexify(&apdu));
        let raw = match self.channel.transmit(&apdu) {
            Ok(raw) => raw,
            Err(e) if final_close => return self.resolve_lost_close(e),
            Err(e) => return Err(e.into()),
        };
        debug!("CLOSE SECURE SESSION -> {}", hexify(&raw));
        self.record_exchange(AuditKind::Close, &apdu, &raw);

        let response = Response::from_bytes(&raw).map_err(|e| TransactionError::MalformedResponse {
            command: "CLOSE SECURE SESSION",
            reason: e.to_string(),
        })?;
        if SW::is_locked(response.sw()) {
            return Err(TransactionError::from_card_status("CLOSE SECURE SESSION", response.sw()));
        }
        if !response.is_okay() {
            return Err(TransactionError::CardCloseRejected { sw: response.sw() });
        }
        let ctx = self
            .session
            .as_ref()
            .ok_or_else(|| TransactionError::IllegalState("no session context".into()))?;
        if !self.sam.verify_mac(&ctx.keys, &card_mac_data, &response.data)? {
            return Err(TransactionError::InvalidCardSignature);
        }
        Ok(())
    }

    /// The close command got no answer: find out whether the card committed
    fn resolve_lost_close(&mut self, cause: ChannelError) -> Result<()> {
        warn!("Close Secure Session answer lost: {}", cause);
        if !self.setting.is_ratification_enabled() {
            return Err(TransactionError::AuthenticationNotVerified(format!("close answer lost ({})", cause)));
        }
        let apdu = commands::ratification().to_bytes();
        match self.channel.transmit(&apdu) {
            Ok(raw) => {
                debug!("RATIFICATION -> {}", hexify(&raw));
                self.record_exchange(AuditKind::Ratification, &apdu, &raw);
                match Response::from_bytes(&raw) {
                    Ok(response) if response.is_okay() => Err(TransactionError::AuthenticationNotVerified(
                        "card ratified the session but its MAC was lost".into(),
                    )),
                    Ok(response) => Err(TransactionError::CardCloseRejected { sw: response.sw() }),
                    Err(e) => Err(TransactionError::AuthenticationNotVerified(format!(
                        "unreadable ratification answer ({})",
                        e
                    ))),
                }
            }
            Err(check) => Err(TransactionError::AuthenticationNotVerified(format!(
                "close answer lost ({}), ratification failed ({})",
                cause, check
            ))),
        }
    }

    fn ratify(&mut self) {
        let apdu = commands::ratification().to_bytes();
        match self.channel.transmit(&apdu) {
            Ok(raw) => {
                debug!("RATIFICATION -> {}", hexify(&raw));
                self.record_exchange(AuditKind::Ratification, &apdu, &raw);
            }
            Err(e) => debug!("Ratification command not answered: {}", e),
        }
    }

    /// Best-effort abort of the card session
    fn abort_card_session(&mut self) {
        let apdu = commands::abort_secure_session().to_bytes();
        match self.channel.transmit(&apdu) {
            Ok(raw) => {
                debug!("ABORT -> {}", hexify(&raw));
                self.record_exchange(AuditKind::Abort, &apdu, &raw);
            }
            Err(e) => warn!("Session abort not delivered: {}", e),
        }
    }

    fn release_if_requested(&mut self) -> Result<()> {
        if std::mem::take(&mut self.release_requested) {
            debug!("Releasing the card channel");
            self.channel.release()?;
        }
        Ok(())
    }

    /// End the transaction after a failure: the session data is untrusted
    pub(super) fn fail(&mut self, err: TransactionError) -> TransactionError {
        error!("Card transaction failed in state {}: {}", self.state, err);
        self.queue.clear();
        self.sv_get = None;
        self.pending_sv = None;
        if let Some(ctx) = self.session.take() {
            // Nothing reaches a card whose channel is broken
            if !ctx.closing && err.kind() != ErrorKind::Io {
                self.abort_card_session();
            }
            self.card.mark_trust(&ctx.touched_files, ctx.sv_touched, DataTrust::Untrusted);
        }
        self.state = SessionState::Error;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::command::SvOperation;

    fn update(size: usize) -> CardCommand {
        CardCommand::UpdateRecord { sfi: 0x08, record_number: 1, data: vec![0; size] }
    }

    #[test]
    fn test_argument_checks() {
        assert!(check_sfi(0).is_err());
        assert!(check_sfi(31).is_err());
        assert!(check_sfi(30).is_ok());
        assert!(check_record_number(251).is_err());
        assert!(check_counter_number(84).is_err());
        assert!(check_counter_number(83).is_ok());
        assert!(check_data(&[]).is_err());
        assert!(check_data(&[0; 251]).is_err());
    }

    #[test]
    fn test_group_cost_binds_sv_get_to_its_action() {
        let commands = vec![
            CardCommand::SvGet { operation: SvOperation::Debit, action: SvAction::Do, extended: false },
            CardCommand::SvDebit { amount: 5, date: [0; 2], time: [0; 2], action: SvAction::Do },
        ];
        assert_eq!(group_cost(&commands, true), commands[1].cost(true));
        assert_eq!(group_cost(&commands[1..], true), commands[1].cost(true));
        assert_eq!(group_cost(&[update(10)], true), 16);
        assert_eq!(group_cost(&[], true), 0);
    }
}
