//! Status Word (SW) constants for card responses
//!
//! ISO 7816-4 status words plus the meanings Calypso cards give them.

/// Status Word constants
pub struct SW;

impl SW {
    // Success
    pub const SUCCESS: u16 = 0x9000;

    // Warnings
    pub const WARNING_SELECTED_FILE_INVALIDATED: u16 = 0x6283;

    // Execution errors
    pub const MEMORY_FAILURE: u16 = 0x6581;

    // Checking errors
    pub const WRONG_LENGTH: u16 = 0x6700;
    pub const COMMAND_NOT_ALLOWED: u16 = 0x6900;
    pub const COMMAND_INCOMPATIBLE: u16 = 0x6981;
    pub const SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
    /// PIN blocked, or card key blocked
    pub const AUTH_METHOD_BLOCKED: u16 = 0x6983;
    pub const REFERENCE_DATA_NOT_USABLE: u16 = 0x6984;
    /// Also returned by Close Secure Session when the terminal MAC is wrong
    pub const CONDITIONS_NOT_SATISFIED: u16 = 0x6985;
    pub const COMMAND_NOT_ALLOWED_NO_EF: u16 = 0x6986;
    /// Calypso: incorrect signature (SV or session)
    pub const INCORRECT_SIGNATURE: u16 = 0x6988;

    pub const WRONG_DATA: u16 = 0x6A80;
    pub const FUNCTION_NOT_SUPPORTED: u16 = 0x6A81;
    pub const FILE_NOT_FOUND: u16 = 0x6A82;
    pub const RECORD_NOT_FOUND: u16 = 0x6A83;
    pub const INCORRECT_P1_P2: u16 = 0x6A86;
    pub const REFERENCED_DATA_NOT_FOUND: u16 = 0x6A88;

    pub const WRONG_P1_P2: u16 = 0x6B00;
    pub const INS_NOT_SUPPORTED: u16 = 0x6D00;
    pub const CLA_NOT_SUPPORTED: u16 = 0x6E00;

    /// Create a warning with counter (63Cx)
    /// Used to indicate PIN attempts remaining
    #[inline]
    pub fn counter_warning(retries: u8) -> u16 {
        0x63C0 | ((retries & 0x0F) as u16)
    }

    /// Check if a status word is a counter warning (63Cx)
    #[inline]
    pub fn is_counter_warning(sw: u16) -> bool {
        (sw & 0xFFF0) == 0x63C0
    }

    /// Extract retry count from counter warning (63Cx)
    #[inline]
    pub fn get_retry_count(sw: u16) -> Option<u8> {
        if Self::is_counter_warning(sw) {
            Some((sw & 0x0F) as u8)
        } else {
            None
        }
    }

    /// Check if a status word reports a blocked credential
    #[inline]
    pub fn is_blocked(sw: u16) -> bool {
        sw == Self::AUTH_METHOD_BLOCKED
    }

    /// Blocked credential or key reference the card will no longer use
    #[inline]
    pub fn is_locked(sw: u16) -> bool {
        sw == Self::AUTH_METHOD_BLOCKED || sw == Self::REFERENCE_DATA_NOT_USABLE
    }
}
