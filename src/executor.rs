use crate::chain::ChainClient;
use crate::errors::{Result, SwapError};
use crate::models::{BalanceSnapshot, Quote, TokenDescriptor, TxReceipt, TxRequest};
use crate::utils::{apply_bps, format_units};
use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Used when a quote carries no gas hint.
    pub default_gas_units: U256,
    /// Headroom applied to a quote's gas hint.
    pub gas_multiplier: f64,
    pub gas_ceiling: U256,
    pub settle_delay: Duration,
}

/// Result of the post-swap balance check. Informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Confirmed { sold: U256, bought: U256 },
    /// The buy-side balance did not increase.
    Unchanged { after: BalanceSnapshot },
    /// Balances could not be read back.
    Skipped(String),
}

impl Verification {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Verification::Confirmed { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub receipt: TxReceipt,
    pub verification: Verification,
}

/// Submits a winning quote and checks its effect on balances.
pub struct SwapExecutor {
    chain: Arc<dyn ChainClient>,
    config: ExecutorConfig,
}

impl SwapExecutor {
    pub fn new(chain: Arc<dyn ChainClient>, config: ExecutorConfig) -> Self {
        Self { chain, config }
    }

    pub fn gas_limit(&self, quote: &Quote) -> U256 {
        let limit = match quote.gas_hint {
            Some(hint) if !hint.is_zero() => {
                let bps = (self.config.gas_multiplier.max(1.0) * 10_000.0).round() as u32;
                apply_bps(hint, bps)
            }
            _ => self.config.default_gas_units,
        };
        limit.min(self.config.gas_ceiling)
    }

    pub async fn snapshot(&self, sell: &TokenDescriptor, buy: &TokenDescriptor) -> Result<BalanceSnapshot> {
        let (sell, buy) = futures::try_join!(
            self.chain.token_balance(sell.address),
            self.chain.token_balance(buy.address),
        )?;
        Ok(BalanceSnapshot { sell, buy })
    }

    /// Submit `quote`, wait for one confirmation, then verify balances moved
    /// relative to `before`. Only a failed receipt is an error.
    pub async fn execute(
        &self,
        quote: &Quote,
        legs: (&TokenDescriptor, &TokenDescriptor),
        before: BalanceSnapshot,
    ) -> Result<ExecutionOutcome> {
        let (sell, buy) = legs;
        let receipt = self.submit(quote, sell).await?;
        let verification = self.verify(sell, buy, before).await;
        Ok(ExecutionOutcome {
            receipt,
            verification,
        })
    }

    /// Send the quote's transaction and wait for its receipt.
    pub async fn submit(&self, quote: &Quote, sell: &TokenDescriptor) -> Result<TxReceipt> {
        let tx = TxRequest {
            to: quote.target,
            data: quote.calldata.clone(),
            value: quote.value,
            gas_limit: self.gas_limit(quote),
        };
        info!(
            source = %quote.source,
            to = ?tx.to,
            gas_limit = %tx.gas_limit,
            sell = %format_units(quote.sell_amount, sell.decimals),
            "[SWAP] submitting"
        );
        let receipt = self.chain.send_transaction(tx).await?;
        if !receipt.success {
            warn!(hash = ?receipt.hash, "[SWAP] transaction reverted");
            return Err(SwapError::TransactionReverted { hash: receipt.hash });
        }
        info!(
            hash = ?receipt.hash,
            block = ?receipt.block_number,
            gas_used = ?receipt.gas_used,
            "[SWAP] confirmed"
        );
        Ok(receipt)
    }

    /// Re-read balances after the settle delay. Never fails.
    pub async fn verify(
        &self,
        sell: &TokenDescriptor,
        buy: &TokenDescriptor,
        before: BalanceSnapshot,
    ) -> Verification {
        tokio::time::sleep(self.config.settle_delay).await;
        let after = match self.snapshot(sell, buy).await {
            Ok(after) => after,
            Err(e) => {
                warn!(error = %e, "[VERIFY] could not read balances");
                return Verification::Skipped(e.to_string());
            }
        };
        if after.buy > before.buy {
            let bought = after.buy - before.buy;
            let sold = before.sell.saturating_sub(after.sell);
            info!(
                sold = %format_units(sold, sell.decimals),
                sell_symbol = %sell.symbol,
                bought = %format_units(bought, buy.decimals),
                buy_symbol = %buy.symbol,
                "[VERIFY] balances moved"
            );
            Verification::Confirmed { sold, bought }
        } else {
            warn!(%before, %after, buy_symbol = %buy.symbol, "[VERIFY] buy balance did not increase");
            Verification::Unchanged { after }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockChain, ROUTER, swap_calldata, usdc, usdt};

    fn config() -> ExecutorConfig {
        ExecutorConfig {
            default_gas_units: U256::from(300_000u64),
            gas_multiplier: 1.2,
            gas_ceiling: U256::from(1_000_000u64),
            settle_delay: Duration::from_secs(5),
        }
    }

    fn quote(sell_amount: u64, buy_amount: u64) -> Quote {
        let (sell_amount, buy_amount) = (U256::from(sell_amount), U256::from(buy_amount));
        Quote {
            source: "test".into(),
            sell_token: usdt().address,
            buy_token: usdc().address,
            sell_amount,
            buy_amount,
            target: ROUTER,
            calldata: swap_calldata(usdt().address, usdc().address, sell_amount, buy_amount),
            value: U256::zero(),
            gas_hint: Some(U256::from(150_000u64)),
            gas_cost_usd: None,
            spender: Some(ROUTER),
        }
    }

    fn funded() -> Arc<MockChain> {
        Arc::new(MockChain::new().with_balance(usdt().address, U256::from(200_000_000u64)))
    }

    #[test]
    fn gas_limit_from_hint_default_and_ceiling() {
        let exec = SwapExecutor::new(funded(), config());
        let mut q = quote(1, 1);
        q.gas_hint = Some(U256::from(200_000u64));
        assert_eq!(exec.gas_limit(&q), U256::from(240_000u64));
        q.gas_hint = None;
        assert_eq!(exec.gas_limit(&q), U256::from(300_000u64));
        q.gas_hint = Some(U256::from(5_000_000u64));
        assert_eq!(exec.gas_limit(&q), U256::from(1_000_000u64));
    }

    #[tokio::test(start_paused = true)]
    async fn successful_swap_is_verified() {
        let chain = funded();
        let exec = SwapExecutor::new(chain.clone(), config());
        let (sell, buy) = (usdt(), usdc());
        let before = exec.snapshot(&sell, &buy).await.unwrap();
        let out = exec
            .execute(&quote(100_000_000, 99_900_000), (&sell, &buy), before)
            .await
            .unwrap();
        assert!(out.receipt.success);
        assert_eq!(
            out.verification,
            Verification::Confirmed {
                sold: U256::from(100_000_000u64),
                bought: U256::from(99_900_000u64),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn revert_is_fatal() {
        let chain = funded();
        chain.revert_swaps(true);
        let exec = SwapExecutor::new(chain.clone(), config());
        let (sell, buy) = (usdt(), usdc());
        let before = exec.snapshot(&sell, &buy).await.unwrap();
        let err = exec
            .execute(&quote(100_000_000, 99_900_000), (&sell, &buy), before)
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::TransactionReverted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_verification_keeps_success() {
        let chain = funded();
        chain.freeze_balances(true);
        let exec = SwapExecutor::new(chain.clone(), config());
        let (sell, buy) = (usdt(), usdc());
        let before = exec.snapshot(&sell, &buy).await.unwrap();
        let out = exec
            .execute(&quote(100_000_000, 99_900_000), (&sell, &buy), before)
            .await
            .unwrap();
        assert!(out.receipt.success);
        assert!(matches!(out.verification, Verification::Unchanged { .. }));

        chain.fail_balance_reads(true);
        let out = exec
            .execute(&quote(100_000_000, 99_900_000), (&sell, &buy), before)
            .await
            .unwrap();
        assert!(matches!(out.verification, Verification::Skipped(_)));
    }
}
