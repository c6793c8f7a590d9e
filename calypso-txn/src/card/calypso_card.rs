//! Calypso card identity and file-system snapshot

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use super::{base64_bytes, DataTrust, DirectoryHeader, ElementaryFile, SvLedger};

/// Default size of the modification buffer of a revision 3 card, in bytes
pub const DEFAULT_SESSION_MODIFICATIONS: usize = 215;

/// Card family as reported at selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProductType {
    PrimeRevision1,
    PrimeRevision2,
    PrimeRevision3,
    Light,
    Basic,
    Unknown,
}

/// Everything the terminal knows about the selected card
///
/// Populated by the selection step, then updated by the transaction engine
/// only. The file map never shrinks during a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalypsoCard {
    #[serde(with = "base64_bytes")]
    pub serial_number: Vec<u8>,
    pub product_type: ProductType,
    #[serde(with = "base64_bytes")]
    pub df_name: Vec<u8>,
    pub software_version: u8,
    pub software_revision: u8,
    pub platform: u8,
    /// Capacity of the modification buffer, in bytes or in commands
    pub session_modifications: usize,
    pub modification_counter_in_bytes: bool,
    pub sv_feature: bool,
    pub pin_feature: bool,
    pub df_invalidated: bool,
    /// False when the previous session was left unratified
    pub df_ratified: bool,
    pub pin_attempts_remaining: Option<u8>,
    pub transaction_counter: Option<u32>,
    pub directory_header: Option<DirectoryHeader>,
    files: BTreeMap<u8, ElementaryFile>,
    pub sv: SvLedger,
}

impl CalypsoCard {
    pub fn new(serial_number: Vec<u8>) -> Self {
        Self {
            serial_number,
            product_type: ProductType::PrimeRevision3,
            df_name: Vec::new(),
            software_version: 0,
            software_revision: 0,
            platform: 0,
            session_modifications: DEFAULT_SESSION_MODIFICATIONS,
            modification_counter_in_bytes: true,
            sv_feature: false,
            pin_feature: false,
            df_invalidated: false,
            df_ratified: true,
            pin_attempts_remaining: None,
            transaction_counter: None,
            directory_header: None,
            files: BTreeMap::new(),
            sv: SvLedger::default(),
        }
    }

    pub fn with_product_type(mut self, product_type: ProductType) -> Self {
        self.product_type = product_type;
        self
    }

    pub fn with_df_name(mut self, df_name: Vec<u8>) -> Self {
        self.df_name = df_name;
        self
    }

    pub fn with_software(mut self, version: u8, revision: u8, platform: u8) -> Self {
        self.software_version = version;
        self.software_revision = revision;
        self.platform = platform;
        self
    }

    /// Declare the modification buffer, counted in bytes or in commands
    pub fn with_session_modifications(mut self, capacity: usize, in_bytes: bool) -> Self {
        self.session_modifications = capacity;
        self.modification_counter_in_bytes = in_bytes;
        self
    }

    pub fn with_directory_header(mut self, header: DirectoryHeader) -> Self {
        self.directory_header = Some(header);
        self
    }

    pub fn with_file(mut self, file: ElementaryFile) -> Self {
        self.files.insert(file.sfi, file);
        self
    }

    pub fn with_sv(mut self, ledger: SvLedger) -> Self {
        self.sv_feature = true;
        self.sv = ledger;
        self
    }

    pub fn with_pin(mut self, attempts_remaining: u8) -> Self {
        self.pin_feature = true;
        self.pin_attempts_remaining = Some(attempts_remaining);
        self
    }

    pub fn file(&self, sfi: u8) -> Option<&ElementaryFile> {
        self.files.get(&sfi)
    }

    pub fn files(&self) -> impl Iterator<Item = &ElementaryFile> {
        self.files.values()
    }

    /// Get or create the snapshot entry for `sfi`
    pub(crate) fn file_entry(&mut self, sfi: u8) -> &mut ElementaryFile {
        self.files.entry(sfi).or_insert_with(|| ElementaryFile::new(sfi))
    }

    pub fn is_pin_blocked(&self) -> bool {
        self.pin_attempts_remaining == Some(0)
    }

    /// Records per file, used to size reads when no header is known
    pub(crate) fn records_number(&self, sfi: u8) -> Option<usize> {
        self.file(sfi)?.header.as_ref().map(|h| h.records_number)
    }

    /// Set the trust level of the files touched by a session (and of the SV
    /// ledger when it was touched)
    pub(crate) fn mark_trust(&mut self, sfis: &BTreeSet<u8>, sv_touched: bool, trust: DataTrust) {
        for sfi in sfis {
            if let Some(file) = self.files.get_mut(sfi) {
                file.trust = trust;
            }
        }
        if sv_touched {
            self.sv.trust = trust;
        }
    }
}
