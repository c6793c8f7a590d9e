//! Transaction audit trail
//!
//! Raw command/response pairs kept for dispute resolution. The engine only
//! appends to the trail; it never reads it back.

use serde::Serialize;

use crate::card::base64_bytes;

/// Role of an exchange in the transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditKind {
    Open,
    Command,
    Close,
    Ratification,
    Abort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditEntry {
    pub kind: AuditKind,
    #[serde(with = "base64_bytes")]
    pub command: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub response: Vec<u8>,
}

/// Append-only list of exchanged APDUs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditTrail {
    entries: Vec<AuditEntry>,
}

impl AuditTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&mut self, kind: AuditKind, command: &[u8], response: &[u8]) {
        self.entries.push(AuditEntry { kind, command: command.to_vec(), response: response.to_vec() });
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries of one kind
    pub fn count(&self, kind: AuditKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Export the trail as JSON with base64 APDUs
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_count() {
        let mut trail = AuditTrail::new();
        trail.record(AuditKind::Open, &[0x00, 0x8A], &[0x90, 0x00]);
        trail.record(AuditKind::Command, &[0x00, 0xB2], &[0x90, 0x00]);
        trail.record(AuditKind::Close, &[0x00, 0x8E], &[0x90, 0x00]);
        assert_eq!(trail.len(), 3);
        assert_eq!(trail.count(AuditKind::Command), 1);
        assert_eq!(trail.entries()[0].kind, AuditKind::Open);
    }

    #[test]
    fn test_json_export() {
        let mut trail = AuditTrail::new();
        trail.record(AuditKind::Command, &[0x00, 0xB2, 0x01, 0x3C, 0x00], &[0x90, 0x00]);
        let json = trail.to_json().unwrap();
        assert!(json.contains("\"kind\": \"Command\""));
        assert!(json.contains("\"response\": \"kAA=\""));
    }
}
