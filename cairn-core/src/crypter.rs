//! Crypter - per-stack encryption of configuration secrets

use std::sync::Arc;

use thiserror::Error;

use crate::reference::StackReference;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrypterError {
    #[error("failed to encrypt value: {0}")]
    Encrypt(String),

    #[error("failed to decrypt value: {0}")]
    Decrypt(String),

    #[error("no secrets material for stack {0}")]
    Unavailable(String),
}

/// Encrypts and decrypts secret configuration values for one stack
pub trait Crypter: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<String, CrypterError>;

    fn decrypt(&self, ciphertext: &str) -> Result<String, CrypterError>;
}

/// Hands out the crypter bound to a stack's secrets material
pub trait CrypterProvider: Send + Sync {
    fn crypter_for(&self, reference: &StackReference) -> Result<Arc<dyn Crypter>, CrypterError>;
}

/// Leaves values untouched in both directions
#[derive(Debug, Default, Clone, Copy)]
pub struct NopCrypter;

impl Crypter for NopCrypter {
    fn encrypt(&self, plaintext: &str) -> Result<String, CrypterError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, ciphertext: &str) -> Result<String, CrypterError> {
        Ok(ciphertext.to_string())
    }
}

/// Decrypts every secret to a fixed placeholder
///
/// For display paths that must never reveal secret values.
#[derive(Debug, Default, Clone, Copy)]
pub struct BlindingCrypter;

impl BlindingCrypter {
    pub const PLACEHOLDER: &'static str = "[secret]";
}

impl Crypter for BlindingCrypter {
    fn encrypt(&self, plaintext: &str) -> Result<String, CrypterError> {
        Ok(plaintext.to_string())
    }

    fn decrypt(&self, _ciphertext: &str) -> Result<String, CrypterError> {
        Ok(Self::PLACEHOLDER.to_string())
    }
}

/// Gives every stack the same crypter
pub struct SharedCrypterProvider {
    crypter: Arc<dyn Crypter>,
}

impl SharedCrypterProvider {
    pub fn new(crypter: Arc<dyn Crypter>) -> Self {
        Self { crypter }
    }
}

impl CrypterProvider for SharedCrypterProvider {
    fn crypter_for(&self, _reference: &StackReference) -> Result<Arc<dyn Crypter>, CrypterError> {
        Ok(Arc::clone(&self.crypter))
    }
}
