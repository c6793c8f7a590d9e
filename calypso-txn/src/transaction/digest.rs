//! Running session digest

use crate::crypto::HashOperations;

/// Transcript of a secure session, from the opening response onwards
///
/// The SAM computes the terminal MAC over the transcript; the card MAC covers
/// the transcript followed by the terminal MAC.
#[derive(Debug, Clone, Default)]
pub struct SessionDigest {
    transcript: Vec<u8>,
    exchanges: usize,
}

impl SessionDigest {
    /// Seed the digest with the Open Secure Session response data
    pub fn new(open_response: &[u8]) -> Self {
        Self { transcript: open_response.to_vec(), exchanges: 0 }
    }

    /// Add one command and its raw response (status word included)
    pub fn push(&mut self, command: &[u8], response: &[u8]) {
        self.transcript.extend_from_slice(command);
        self.transcript.extend_from_slice(response);
        self.exchanges += 1;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.transcript
    }

    /// Data covered by the card MAC
    pub fn with_terminal_mac(&self, terminal_mac: &[u8]) -> Vec<u8> {
        let mut data = self.transcript.clone();
        data.extend_from_slice(terminal_mac);
        data
    }

    /// Number of exchanges added since the opening
    pub fn exchanges(&self) -> usize {
        self.exchanges
    }

    /// Loggable fingerprint of the transcript
    pub fn fingerprint(&self) -> String {
        HashOperations::fingerprint(&self.transcript)
    }
}
