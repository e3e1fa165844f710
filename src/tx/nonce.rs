//! Nonce management for reliable transaction submission
//!
//! Handles:
//! - Local allocation so back-to-back envelopes never repeat a nonce
//! - Release of slots that never reached the chain
//! - Tainting slots whose transaction outcome is unknown

use crate::chain::ChainClient;
use crate::error::{DeployError, DeployResult};

use dashmap::DashMap;
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Per-account nonce state
#[derive(Debug, Default)]
struct AccountNonceState {
    /// Next nonce to hand out locally
    next: u64,
    /// Submitted transactions: nonce -> tx_hash
    pending: HashMap<u64, H256>,
    /// Slot whose transaction timed out and may still land
    tainted: Option<u64>,
}

/// Manages nonces across all accounts of a run
#[derive(Default)]
pub struct NonceManager {
    accounts: DashMap<Address, Arc<Mutex<AccountNonceState>>>,
}

impl NonceManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, address: Address) -> Arc<Mutex<AccountNonceState>> {
        self.accounts.entry(address).or_default().value().clone()
    }

    /// Allocate the next nonce for `address`.
    ///
    /// The chain is queried on every allocation and the larger of the chain
    /// and local counters wins. A tainted slot blocks allocation until the
    /// chain nonce has moved past it.
    pub async fn allocate(&self, client: &dyn ChainClient, address: Address) -> DeployResult<u64> {
        let slot = self.slot(address);
        let mut state = slot.lock().await;

        let on_chain = client.nonce(address).await?;

        if let Some(tainted) = state.tainted {
            if on_chain > tainted {
                info!(
                    "Nonce {} for {:?} resolved on chain (chain nonce {})",
                    tainted, address, on_chain
                );
                state.tainted = None;
                state.pending.retain(|nonce, _| *nonce >= on_chain);
            } else {
                return Err(DeployError::NonceTainted {
                    address,
                    nonce: tainted,
                });
            }
        }

        if on_chain > state.next && state.next > 0 {
            warn!(
                "Chain nonce for {:?} ahead of local counter: {} > {}",
                address, on_chain, state.next
            );
        }

        let nonce = state.next.max(on_chain);
        state.next = nonce + 1;

        debug!("Allocated nonce {} for {:?}", nonce, address);
        Ok(nonce)
    }

    /// Mark a nonce as pending with transaction hash
    pub async fn mark_pending(&self, address: Address, nonce: u64, tx_hash: H256) {
        let slot = self.slot(address);
        let mut state = slot.lock().await;
        state.pending.insert(nonce, tx_hash);
    }

    /// Confirm a nonce (transaction mined, whatever its status)
    pub async fn confirm(&self, address: Address, nonce: u64) {
        let slot = self.slot(address);
        let mut state = slot.lock().await;
        state.pending.remove(&nonce);
    }

    /// Release a nonce that never reached the chain
    pub async fn release(&self, address: Address, nonce: u64) {
        let slot = self.slot(address);
        let mut state = slot.lock().await;
        state.pending.remove(&nonce);

        // Only the most recent slot can be handed back without leaving a gap
        if nonce + 1 == state.next {
            state.next = nonce;
            debug!("Released nonce {} for {:?}", nonce, address);
        }
    }

    /// Taint a nonce whose transaction outcome is unknown
    pub async fn taint(&self, address: Address, nonce: u64) {
        let slot = self.slot(address);
        let mut state = slot.lock().await;
        match state.pending.get(&nonce) {
            Some(hash) => warn!(
                "Nonce {} for {:?} tainted until {:?} resolves",
                nonce, address, hash
            ),
            None => warn!("Nonce {} for {:?} tainted until resolved", nonce, address),
        }
        state.tainted = Some(state.tainted.map_or(nonce, |t| t.max(nonce)));
    }

    /// Reset the local counter to the chain's view, e.g. after "nonce too low"
    pub async fn sync(&self, client: &dyn ChainClient, address: Address) -> DeployResult<()> {
        let slot = self.slot(address);
        let mut state = slot.lock().await;
        let on_chain = client.nonce(address).await?;

        if on_chain > state.next {
            warn!(
                "Nonce gap detected for {:?}: expected {}, got {}",
                address, state.next, on_chain
            );
        }

        state.pending.retain(|nonce, _| *nonce >= on_chain);
        state.next = on_chain;
        Ok(())
    }
}
