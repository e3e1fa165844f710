//! Transaction signing

use super::TxEnvelope;
use crate::account::SecretKey;
use crate::error::{DeployError, DeployResult};

use ethers::signers::Signer;
use ethers::types::{Address, Bytes, Signature, H256};

/// Envelope plus signature; immutable once created
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTx {
    envelope: TxEnvelope,
    signature: Signature,
    raw: Bytes,
    hash: H256,
}

impl SignedTx {
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// RLP-encoded signed transaction as broadcast to the chain
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Transaction hash, keccak256 of the raw bytes
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Address that produced the signature
    pub fn recover(&self) -> DeployResult<Address> {
        let sighash = self.envelope.to_typed().sighash();
        self.signature
            .recover(sighash)
            .map_err(|e| DeployError::Internal(format!("signature recovery failed: {}", e)))
    }
}

/// Stateless signer using the chain's legacy EIP-155 encoding
pub struct TxSigner;

impl TxSigner {
    pub fn sign(envelope: &TxEnvelope, secret: &SecretKey) -> DeployResult<SignedTx> {
        let wallet = secret.wallet()?.with_chain_id(envelope.chain_id);
        let tx = envelope.to_typed();

        let signature = wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| DeployError::InvalidKey(format!("signing failed: {}", e)))?;

        Ok(SignedTx {
            envelope: envelope.clone(),
            raw: tx.rlp_signed(&signature),
            hash: tx.hash(&signature),
            signature,
        })
    }
}
