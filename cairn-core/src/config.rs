//! Stack configuration values

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::crypter::{Crypter, CrypterError};

/// A single configuration value, plaintext or encrypted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub value: String,
    /// Whether `value` is ciphertext produced by the stack's crypter
    #[serde(default)]
    pub secure: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secure: false,
        }
    }

    /// Encrypt `plaintext` into a secure value
    pub fn secret(plaintext: &str, crypter: &dyn Crypter) -> Result<Self, CrypterError> {
        Ok(Self {
            value: crypter.encrypt(plaintext)?,
            secure: true,
        })
    }

    pub fn reveal(&self, crypter: &dyn Crypter) -> Result<String, CrypterError> {
        if self.secure {
            crypter.decrypt(&self.value)
        } else {
            Ok(self.value.clone())
        }
    }
}

/// Configuration keys and values for a stack, ordered by key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigMap(BTreeMap<String, ConfigValue>);

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: ConfigValue) {
        self.0.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ConfigValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn has_secure_values(&self) -> bool {
        self.0.values().any(|v| v.secure)
    }

    /// Plaintext view of every value
    pub fn decrypt(&self, crypter: &dyn Crypter) -> Result<BTreeMap<String, String>, CrypterError> {
        self.0
            .iter()
            .map(|(k, v)| Ok((k.clone(), v.reveal(crypter)?)))
            .collect()
    }
}

/// Configuration handed to log providers and engines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackConfiguration {
    pub config: ConfigMap,
}

impl StackConfiguration {
    pub fn new(config: ConfigMap) -> Self {
        Self { config }
    }
}
