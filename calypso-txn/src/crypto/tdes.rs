//! Triple DES Operations
//!
//! 3DES-ECB block encryption and the ISO 9797-1 CBC-MAC (padding method 2)
//! used for key diversification, session key derivation and session MACs.

use des::cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::TdesEde3;
use log::debug;
use thiserror::Error;

/// 3DES operation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TDesError {
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKey { expected: usize, actual: usize },

    #[error("Invalid data length {0}: not a multiple of the block size")]
    InvalidData(usize),
}

/// Triple DES Operations
pub struct TDesOperations;

impl TDesOperations {
    /// Block size for 3DES
    pub const BLOCK_SIZE: usize = 8;

    /// Key size for 3DES (24 bytes = 192 bits)
    pub const KEY_SIZE: usize = 24;

    fn cipher(key: &[u8]) -> Result<TdesEde3, TDesError> {
        if key.len() != Self::KEY_SIZE {
            return Err(TDesError::InvalidKey { expected: Self::KEY_SIZE, actual: key.len() });
        }
        Ok(TdesEde3::new(GenericArray::from_slice(key)))
    }

    /// Encrypt a single block with 3DES-ECB
    pub fn encrypt_block(key: &[u8], plaintext: &[u8]) -> Result<[u8; 8], TDesError> {
        if plaintext.len() != Self::BLOCK_SIZE {
            return Err(TDesError::InvalidData(plaintext.len()));
        }
        let cipher = Self::cipher(key)?;
        let mut block = GenericArray::clone_from_slice(plaintext);
        cipher.encrypt_block(&mut block);

        let mut out = [0u8; 8];
        out.copy_from_slice(&block);
        Ok(out)
    }

    /// Encrypt multiple blocks with 3DES-ECB
    pub fn encrypt_ecb(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, TDesError> {
        if plaintext.len() % Self::BLOCK_SIZE != 0 {
            return Err(TDesError::InvalidData(plaintext.len()));
        }
        let cipher = Self::cipher(key)?;
        let mut result = Vec::with_capacity(plaintext.len());

        for chunk in plaintext.chunks(Self::BLOCK_SIZE) {
            let mut block = GenericArray::clone_from_slice(chunk);
            cipher.encrypt_block(&mut block);
            result.extend_from_slice(&block);
        }

        Ok(result)
    }

    /// CBC-MAC over `data` with a zero IV, padded with 0x80 00..
    pub fn cbc_mac(key: &[u8], data: &[u8]) -> Result<[u8; 8], TDesError> {
        let cipher = Self::cipher(key)?;

        let mut padded = data.to_vec();
        padded.push(0x80);
        while padded.len() % Self::BLOCK_SIZE != 0 {
            padded.push(0x00);
        }

        debug!("3DES CBC-MAC over {} bytes", data.len());

        let mut chain = GenericArray::clone_from_slice(&[0u8; 8]);
        for chunk in padded.chunks(Self::BLOCK_SIZE) {
            for (c, p) in chain.iter_mut().zip(chunk) {
                *c ^= *p;
            }
            cipher.encrypt_block(&mut chain);
        }

        let mut mac = [0u8; 8];
        mac.copy_from_slice(&chain);
        Ok(mac)
    }
}
