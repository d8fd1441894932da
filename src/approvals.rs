//! Spending allowances per (token, spender).
//!
//! Grants are cached for the process lifetime. Concurrent requests for the
//! same key serialize on a per-key lock so one approval is in flight at most.

use crate::chain::{ApproveCall, ChainClient};
use crate::errors::{Result, SwapError};
use crate::models::{ApprovalRecord, TokenDescriptor, TxRequest};
use crate::retry::{RetryPolicy, retry_async};
use crate::utils::format_units;
use ethers::abi::AbiEncode;
use ethers::types::{Address, U256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

type Key = (Address, Address);

pub struct ApprovalManager {
    chain: Arc<dyn ChainClient>,
    /// Approvals grant `required * multiplier`, never an unbounded amount.
    multiplier: u32,
    gas_limit: U256,
    poll: RetryPolicy,
    cache: Mutex<HashMap<Key, ApprovalRecord>>,
    in_flight: Mutex<HashMap<Key, Arc<tokio::sync::Mutex<()>>>>,
}

impl ApprovalManager {
    pub fn new(chain: Arc<dyn ChainClient>, multiplier: u32, gas_limit: U256) -> Self {
        Self {
            chain,
            multiplier: multiplier.max(1),
            gas_limit,
            poll: RetryPolicy::fixed(5, Duration::from_secs(2)),
            cache: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_poll_policy(mut self, poll: RetryPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Make sure `spender` may pull at least `required` of `token`.
    pub async fn ensure_allowance(
        &self,
        token: &TokenDescriptor,
        spender: Address,
        required: U256,
    ) -> Result<()> {
        if token.is_native() || required.is_zero() {
            return Ok(());
        }
        let key = (token.address, spender);
        if self.cached_covers(key, required) {
            debug!(token = %token.symbol, ?spender, "[APPROVE] cached allowance sufficient");
            return Ok(());
        }

        let gate = self.gate(key);
        let _guard = gate.lock().await;

        // Another caller may have granted while we waited.
        if self.cached_covers(key, required) {
            return Ok(());
        }

        let current = self.chain.allowance(token.address, spender).await?;
        if current >= required {
            debug!(
                token = %token.symbol,
                allowance = %format_units(current, token.decimals),
                "[APPROVE] on-chain allowance sufficient"
            );
            self.remember(key, current);
            return Ok(());
        }

        let amount = required.saturating_mul(U256::from(self.multiplier));
        info!(
            token = %token.symbol,
            ?spender,
            amount = %format_units(amount, token.decimals),
            "[APPROVE] submitting approval"
        );
        let receipt = self
            .chain
            .send_transaction(TxRequest {
                to: token.address,
                data: ApproveCall { spender, amount }.encode().into(),
                value: U256::zero(),
                gas_limit: self.gas_limit,
            })
            .await
            .map_err(|e| SwapError::ApprovalFailed {
                token: token.address,
                spender,
                reason: e.to_string(),
            })?;
        if !receipt.success {
            return Err(SwapError::ApprovalFailed {
                token: token.address,
                spender,
                reason: format!("transaction {:?} reverted", receipt.hash),
            });
        }
        info!(hash = ?receipt.hash, token = %token.symbol, "[APPROVE] confirmed");

        let visible = self.await_visible(token.address, spender, required).await;
        match visible {
            Ok(allowance) => self.remember(key, allowance),
            Err(e) => {
                warn!(error = %e, "[APPROVE] allowance not yet visible, trusting receipt");
                self.remember(key, amount);
            }
        }
        Ok(())
    }

    /// Deduct a confirmed swap's spend from the cached grant.
    pub fn record_spend(&self, token: Address, spender: Address, spent: U256) {
        if let Some(record) = self.lock_cache().get_mut(&(token, spender)) {
            record.granted = record.granted.saturating_sub(spent);
            record.checked_at = SystemTime::now();
        }
    }

    pub fn cached(&self, token: Address, spender: Address) -> Option<ApprovalRecord> {
        self.lock_cache().get(&(token, spender)).cloned()
    }

    /// Re-read the allowance until the node reports the new grant.
    async fn await_visible(&self, token: Address, spender: Address, required: U256) -> Result<U256> {
        retry_async(
            &self.poll,
            |_| async move {
                let allowance = self.chain.allowance(token, spender).await?;
                if allowance >= required {
                    Ok(allowance)
                } else {
                    Err(SwapError::Timeout(format!(
                        "allowance {allowance} still below {required}"
                    )))
                }
            },
            |e: &SwapError| e.is_transport(),
        )
        .await
    }

    fn cached_covers(&self, key: Key, required: U256) -> bool {
        self.lock_cache()
            .get(&key)
            .is_some_and(|r| r.granted >= required)
    }

    fn remember(&self, key: Key, granted: U256) {
        self.lock_cache().insert(
            key,
            ApprovalRecord {
                token: key.0,
                spender: key.1,
                granted,
                checked_at: SystemTime::now(),
            },
        );
    }

    fn gate(&self, key: Key) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(key).or_default().clone()
    }

    fn lock_cache(&self) -> MutexGuard<'_, HashMap<Key, ApprovalRecord>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}
