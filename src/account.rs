//! Accounts derived from secret keys
//!
//! Keys arrive as `0x` + 64 hex digits and live only for the duration of the
//! pipeline that uses them. They are never logged or serialized.

use crate::error::{DeployError, DeployResult};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use ethers::utils::to_checksum;
use std::fmt;

/// Raw 32-byte secp256k1 secret
pub struct SecretKey([u8; 32]);

impl SecretKey {
    /// Parse a `0x`-prefixed 64 hex digit key
    pub fn from_hex(input: &str) -> DeployResult<Self> {
        let input = input.trim();
        let digits = input
            .strip_prefix("0x")
            .ok_or_else(|| DeployError::InvalidKey("missing 0x prefix".to_string()))?;

        if digits.len() != 64 {
            return Err(DeployError::InvalidKey(format!(
                "expected 64 hex digits, got {}",
                digits.len()
            )));
        }

        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| DeployError::InvalidKey(format!("not hex: {}", e)))?;

        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Build a signing wallet; fails if the bytes are not a valid curve scalar
    pub fn wallet(&self) -> DeployResult<LocalWallet> {
        LocalWallet::from_bytes(&self.0)
            .map_err(|e| DeployError::InvalidKey(format!("not a valid secp256k1 scalar: {}", e)))
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.0.fill(0);
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

/// Overwrite the bytes of secret text in place, then empty it
pub fn scrub(text: &mut String) {
    let len = text.len();
    text.clear();
    text.extend(std::iter::repeat('\0').take(len));
    text.clear();
}

/// A secret key with its derived address
#[derive(Debug)]
pub struct Account {
    secret: SecretKey,
    address: Address,
}

impl Account {
    pub fn new(secret: SecretKey) -> DeployResult<Self> {
        let address = secret.wallet()?.address();
        Ok(Self { secret, address })
    }

    pub fn from_hex(input: &str) -> DeployResult<Self> {
        Self::new(SecretKey::from_hex(input)?)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// EIP-55 checksummed address
    pub fn checksummed(&self) -> String {
        to_checksum(&self.address, None)
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }
}
