//! PIN verification and modification
//!
//! The PIN goes to the card in plain text only when the security setting
//! allows it. Otherwise the engine fetches a card challenge and the SAM
//! ciphers the PIN with the PIN ciphering key.

use log::{debug, info, warn};

use super::audit::AuditKind;
use super::command::CardCommand;
use super::manager::CardTransactionManager;
use super::session::SessionState;
use crate::apdu::{commands, Response, SW};
use crate::channel::CardChannel;
use crate::error::{Result, TransactionError};
use crate::sam::SamCoordinator;
use crate::security::KeyReference;

/// Length of a Calypso PIN
pub const PIN_LENGTH: usize = 4;
/// Presentation attempts of a fresh PIN
pub const PIN_MAX_ATTEMPTS: u8 = 3;

fn check_pin(pin: &[u8]) -> Result<()> {
    if pin.len() != PIN_LENGTH {
        return Err(TransactionError::IllegalArgument(format!(
            "PIN must be {} bytes, got {}",
            PIN_LENGTH,
            pin.len()
        )));
    }
    Ok(())
}

impl<C: CardChannel, S: SamCoordinator> CardTransactionManager<C, S> {
    /// Read the remaining PIN attempts with the next flush
    pub fn prepare_check_pin_status(&mut self) -> Result<()> {
        self.check_pin_feature()?;
        self.queue.push(CardCommand::CheckPinStatus);
        Ok(())
    }

    /// Present the PIN; prepared commands are sent first
    pub fn process_verify_pin(&mut self, pin: &[u8]) -> Result<()> {
        self.check_pin_feature()?;
        check_pin(pin)?;
        self.process_card_commands()?;

        let key = self.setting.pin_verification_cipher_key();
        let data = match self.pin_data(pin, key, "verification") {
            Ok(data) => data,
            Err(err) => return Err(self.fail_unless_configuration(err)),
        };
        let response = match self.exchange(AuditKind::Command, "VERIFY PIN", &commands::verify_pin(&data)) {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err)),
        };
        let result = self.apply_pin_status(response.sw()).and_then(|()| match response.sw() {
            SW::SUCCESS => {
                info!("PIN verified");
                Ok(())
            }
            sw if SW::is_blocked(sw) || sw == SW::counter_warning(0) => {
                Err(TransactionError::CardRevoked("PIN blocked".into()))
            }
            sw => {
                warn!("Wrong PIN, {} attempts left", SW::get_retry_count(sw).unwrap_or(0));
                Err(TransactionError::CardAnomaly { command: "VERIFY PIN", sw })
            }
        });
        match result {
            // A rejected presentation ends an open secure session
            Err(err) if self.session.is_some() => Err(self.fail(err)),
            other => other,
        }
    }

    /// Replace the PIN; not allowed inside a secure session
    pub fn process_change_pin(&mut self, new_pin: &[u8]) -> Result<()> {
        self.check_pin_feature()?;
        check_pin(new_pin)?;
        if self.state == SessionState::Open {
            return Err(TransactionError::IllegalState("PIN cannot be changed inside a secure session".into()));
        }
        self.process_card_commands()?;

        let key = self.setting.pin_modification_cipher_key();
        let data = match self.pin_data(new_pin, key, "modification") {
            Ok(data) => data,
            Err(err) => return Err(self.fail_unless_configuration(err)),
        };
        let response = match self.exchange(AuditKind::Command, "CHANGE PIN", &commands::change_pin(&data)) {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err)),
        };
        if !response.is_okay() {
            return Err(TransactionError::from_card_status("CHANGE PIN", response.sw()));
        }
        self.card.pin_attempts_remaining = Some(PIN_MAX_ATTEMPTS);
        info!("PIN changed");
        Ok(())
    }

    fn check_pin_feature(&self) -> Result<()> {
        if !self.card.pin_feature {
            return Err(TransactionError::IllegalState("card has no PIN".into()));
        }
        Ok(())
    }

    /// Plain PIN, or its cryptogram for a fresh card challenge
    fn pin_data(&mut self, pin: &[u8], key: Option<KeyReference>, usage: &str) -> Result<Vec<u8>> {
        if self.setting.is_pin_plain_transmission_enabled() {
            return Ok(pin.to_vec());
        }
        let key = key.ok_or_else(|| TransactionError::Configuration(format!("no PIN {} ciphering key", usage)))?;
        let response: Response = self.exchange(AuditKind::Command, "GET CHALLENGE", &commands::get_challenge())?;
        if !response.is_okay() {
            return Err(TransactionError::from_card_status("GET CHALLENGE", response.sw()));
        }
        self.sam.select_diversifier(&self.card.serial_number)?;
        debug!("Ciphering PIN for {} with {}", usage, key);
        Ok(self.sam.cipher_pin(key, &response.data, pin)?)
    }

    fn fail_unless_configuration(&mut self, err: TransactionError) -> TransactionError {
        if matches!(err, TransactionError::Configuration(_)) {
            err
        } else {
            self.fail(err)
        }
    }

    /// Record the PIN attempts reported by a status word
    pub(super) fn apply_pin_status(&mut self, sw: u16) -> Result<()> {
        let attempts = if sw == SW::SUCCESS {
            PIN_MAX_ATTEMPTS
        } else if let Some(left) = SW::get_retry_count(sw) {
            left
        } else if SW::is_blocked(sw) {
            0
        } else {
            return Err(TransactionError::from_card_status("VERIFY PIN", sw));
        };
        debug!("PIN attempts remaining: {}", attempts);
        self.card.pin_attempts_remaining = Some(attempts);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_length() {
        assert!(check_pin(&[1, 2, 3, 4]).is_ok());
        assert!(check_pin(&[1, 2, 3]).is_err());
        assert!(check_pin(&[1, 2, 3, 4, 5]).is_err());
    }
}
