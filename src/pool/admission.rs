//! Admission: pick an account able to absorb a pending write.
//!
//! Candidates come from the cached quota columns. Concurrent selections may
//! pick the same account; the safety buffer and optimistic post-write
//! accounting absorb that instead of a per-account reservation.

use crate::core::error::PoolError;
use crate::google::AccessToken;
use crate::pool::accounts::{AccountRegistry, StorageAccount};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::Mutex;

/// What the caller needs to transfer bytes directly with the provider.
#[derive(Debug, Clone, Serialize)]
pub struct WriteGrant {
    pub account_id: String,
    pub access_token: AccessToken,
}

pub struct AdmissionSelector {
    registry: AccountRegistry,
    safety_buffer_bytes: u64,
    rng: Mutex<StdRng>,
}

impl AdmissionSelector {
    pub fn new(registry: AccountRegistry, safety_buffer_bytes: u64, rng: StdRng) -> Self {
        Self {
            registry,
            safety_buffer_bytes,
            rng: Mutex::new(rng),
        }
    }

    pub fn from_entropy(registry: AccountRegistry, safety_buffer_bytes: u64) -> Self {
        Self::new(registry, safety_buffer_bytes, StdRng::from_entropy())
    }

    pub fn safety_buffer_bytes(&self) -> u64 {
        self.safety_buffer_bytes
    }

    fn pick<'a>(&self, candidates: &'a [StorageAccount]) -> Result<&'a StorageAccount, PoolError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| PoolError::Validation("Admission RNG lock poisoned".to_string()))?;
        let index = rng.gen_range(0..candidates.len());
        Ok(&candidates[index])
    }

    /// Choose an account for a write of `size_bytes` and mint a token for it.
    ///
    /// Fails with `NoCapacityAvailable` when no enabled automated account has
    /// more than `size_bytes + safety buffer` cached, or when the chosen one
    /// fails the `limit - usage > size_bytes` re-check. A failed re-check does
    /// not fall back to another candidate.
    pub fn select_account_for_write(&self, owner: &str, size_bytes: u64) -> Result<WriteGrant, PoolError> {
        let no_capacity = || PoolError::NoCapacityAvailable {
            owner: owner.to_string(),
            size_bytes,
        };
        let threshold = size_bytes.saturating_add(self.safety_buffer_bytes);
        let candidates = self.registry.admission_candidates(owner, threshold)?;
        if candidates.is_empty() {
            tracing::info!(owner, size_bytes, "no account with sufficient capacity");
            return Err(no_capacity());
        }

        let chosen = self.pick(&candidates)?;
        if !chosen.has_room_for(size_bytes) {
            tracing::warn!(
                owner,
                account = %chosen.id,
                limit = chosen.limit_bytes,
                usage = chosen.usage_bytes,
                size_bytes,
                "stale cache: chosen account failed capacity re-check"
            );
            return Err(no_capacity());
        }

        let access_token = self
            .registry
            .storage()
            .mint_access_token(chosen.credential()?)
            .map_err(PoolError::TokenMintFailed)?;
        tracing::debug!(
            owner,
            account = %chosen.id,
            candidates = candidates.len(),
            size_bytes,
            "write admitted"
        );
        Ok(WriteGrant {
            account_id: chosen.id.clone(),
            access_token,
        })
    }

    /// Caller-reported completion of a write; see [`AccountRegistry::record_write`].
    pub fn record_write(&self, account_id: &str, size_bytes: u64) -> Result<StorageAccount, PoolError> {
        self.registry.record_write(account_id, size_bytes)
    }
}
