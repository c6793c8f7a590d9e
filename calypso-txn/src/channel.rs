//! Card channel abstraction
//!
//! The engine never talks to a reader directly: the physical transport (PC/SC,
//! NFC front-end, simulator) implements [`CardChannel`]. The channel must be
//! reserved for the whole session by its owner before the first opening.

use thiserror::Error;

use crate::apdu::SW;

/// Failures of the physical card channel
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("card removed from the field")]
    CardRemoved,

    #[error("channel timeout")]
    Timeout,

    #[error("transmission failed: {0}")]
    Transmission(String),
}

/// Synchronous command/response channel to a card
pub trait CardChannel {
    /// Send one raw command and return the raw response (data + SW1 SW2)
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, ChannelError>;

    /// Send commands in order, one response consumed per command.
    ///
    /// Stops after the first response whose status word is not 9000, so the
    /// returned list may be shorter than `apdus`.
    fn transmit_batch(&mut self, apdus: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, ChannelError> {
        let mut responses = Vec::with_capacity(apdus.len());
        for apdu in apdus {
            let raw = self.transmit(apdu)?;
            let stop = raw.len() < 2 || status_word(&raw) != SW::SUCCESS;
            responses.push(raw);
            if stop {
                break;
            }
        }
        Ok(responses)
    }

    /// Hand the channel back to its owner at the end of a transaction
    fn release(&mut self) -> Result<(), ChannelError> {
        Ok(())
    }
}

impl<T: CardChannel + ?Sized> CardChannel for Box<T> {
    fn transmit(&mut self, apdu: &[u8]) -> Result<Vec<u8>, ChannelError> {
        (**self).transmit(apdu)
    }

    fn transmit_batch(&mut self, apdus: &[Vec<u8>]) -> Result<Vec<Vec<u8>>, ChannelError> {
        (**self).transmit_batch(apdus)
    }

    fn release(&mut self) -> Result<(), ChannelError> {
        (**self).release()
    }
}

fn status_word(raw: &[u8]) -> u16 {
    let n = raw.len();
    ((raw[n - 2] as u16) << 8) | raw[n - 1] as u16
}
