use std::collections::HashMap;
use std::sync::Arc;

use alloy_primitives::{Address, B256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::error::DelegationError;

#[derive(Debug, Default)]
struct SlotState {
    next: Option<u64>,
    unsettled: Option<Unsettled>,
}

/// Latest reservation whose payload the node has not yet acknowledged.
///
/// Survives the submission that made it, so a timed-out or dropped
/// broadcast is reconciled before the next nonce is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unsettled {
    pub nonce: u64,
    /// Set once a signed payload exists.
    pub tx_hash: Option<B256>,
}

/// Per-address nonce issuance.
///
/// Holding a [`NonceSlot`] serializes reservation, signing and the first
/// broadcast for one address; other addresses proceed independently.
#[derive(Debug, Default)]
pub struct NonceManager {
    slots: std::sync::Mutex<HashMap<Address, Arc<Mutex<SlotState>>>>,
}

impl NonceManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, address: Address) -> NonceSlot {
        let slot = {
            let mut slots = match self.slots.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(slots.entry(address).or_default())
        };
        NonceSlot {
            address,
            state: slot.lock_owned().await,
        }
    }
}

/// Exclusive access to one address's nonce sequence.
pub struct NonceSlot {
    address: Address,
    state: OwnedMutexGuard<SlotState>,
}

impl NonceSlot {
    /// Issues `max(locally tracked next, chain pending nonce)`.
    pub fn reserve(&mut self, chain_pending: u64) -> u64 {
        let nonce = match self.state.next {
            Some(next) => next.max(chain_pending),
            None => chain_pending,
        };
        self.state.next = Some(nonce + 1);
        self.state.unsettled = Some(Unsettled {
            nonce,
            tx_hash: None,
        });
        debug!(address = %self.address, nonce, "reserved nonce");
        nonce
    }

    /// Records the hash of the payload signed for `nonce`.
    pub fn mark_signed(&mut self, nonce: u64, tx_hash: B256) {
        if let Some(unsettled) = self.state.unsettled.as_mut().filter(|u| u.nonce == nonce) {
            unsettled.tx_hash = Some(tx_hash);
        }
    }

    /// The node holds the payload for `nonce`; it counts as consumed.
    pub fn settle(&mut self, nonce: u64) {
        if self.state.unsettled.is_some_and(|u| u.nonce == nonce) {
            self.state.unsettled = None;
        }
    }

    #[must_use]
    pub fn unsettled(&self) -> Option<Unsettled> {
        self.state.unsettled
    }

    /// Returns a reservation whose payload was never produced.
    ///
    /// Only the most recent reservation can be returned; anything else would
    /// let a later nonce be issued twice.
    pub fn release(&mut self, nonce: u64) -> bool {
        if self.state.next == Some(nonce + 1) {
            self.state.next = Some(nonce);
            self.state.unsettled = None;
            debug!(address = %self.address, nonce, "released unsigned nonce");
            true
        } else {
            warn!(address = %self.address, nonce, "nonce not released; later reservation exists");
            false
        }
    }

    /// Gives up a broadcast nonce once the chain reports it unconsumed.
    pub fn abandon(&mut self, nonce: u64, chain_pending: u64) -> Result<(), DelegationError> {
        if chain_pending > nonce {
            return Err(DelegationError::NonceInUse {
                nonce,
                reason: format!("chain already counts {chain_pending} transactions"),
            });
        }
        if self.state.next != Some(nonce + 1) {
            return Err(DelegationError::NonceInUse {
                nonce,
                reason: "a later nonce has already been issued".to_string(),
            });
        }
        self.state.next = Some(nonce);
        self.state.unsettled = None;
        warn!(address = %self.address, nonce, "abandoned nonce");
        Ok(())
    }

    #[must_use]
    pub fn address(&self) -> Address {
        self.address
    }

    #[must_use]
    pub fn peek_next(&self) -> Option<u64> {
        self.state.next
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{Address, B256};

    use super::{NonceManager, Unsettled};

    #[tokio::test]
    async fn reserve_takes_max_of_local_and_chain() {
        let manager = NonceManager::new();
        let mut slot = manager.lock(Address::repeat_byte(1)).await;

        assert_eq!(slot.reserve(5), 5);
        assert_eq!(slot.reserve(5), 6);
        assert_eq!(slot.reserve(10), 10);
    }

    #[tokio::test]
    async fn release_only_rewinds_the_latest_reservation() {
        let manager = NonceManager::new();
        let mut slot = manager.lock(Address::repeat_byte(1)).await;
        let first = slot.reserve(0);
        let second = slot.reserve(0);

        assert!(!slot.release(first));
        assert!(slot.release(second));
        assert_eq!(slot.reserve(0), second);
    }

    #[tokio::test]
    async fn abandon_requires_chain_confirmation() {
        let manager = NonceManager::new();
        let mut slot = manager.lock(Address::repeat_byte(1)).await;
        let nonce = slot.reserve(3);

        assert!(slot.abandon(nonce, 4).is_err());
        slot.abandon(nonce, 3).expect("chain never saw nonce 3");
        assert_eq!(slot.peek_next(), Some(3));
    }

    #[tokio::test]
    async fn unsettled_reservation_outlives_the_slot_guard() {
        let manager = NonceManager::new();
        let address = Address::repeat_byte(2);
        {
            let mut slot = manager.lock(address).await;
            let nonce = slot.reserve(0);
            slot.mark_signed(nonce, B256::repeat_byte(9));
        }

        let mut slot = manager.lock(address).await;
        assert_eq!(
            slot.unsettled(),
            Some(Unsettled {
                nonce: 0,
                tx_hash: Some(B256::repeat_byte(9)),
            })
        );
        slot.settle(0);
        assert_eq!(slot.unsettled(), None);
        assert_eq!(slot.reserve(0), 1);
    }
}
