//! Cryptographic Operations
//!
//! 3DES primitives and the CBC-MAC used by the software SAM, plus SHA-256
//! fingerprints used to log session digests without exposing their content.

pub mod hash;
pub mod tdes;

pub use self::hash::HashOperations;
pub use self::tdes::{TDesError, TDesOperations};
