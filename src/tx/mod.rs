//! Transaction assembly: intents, gas, nonces and signing

mod builder;
mod gas;
mod nonce;
mod signer;

pub use builder::{Intent, TxBuilder, TxEnvelope};
pub use gas::{GasEstimator, GasLimit, GasPolicy};
pub use nonce::NonceManager;
pub use signer::{SignedTx, TxSigner};
