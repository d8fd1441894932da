use crate::aggregator::QuoteAggregator;
use crate::approvals::ApprovalManager;
use crate::chain::ChainClient;
use crate::errors::{Result, SwapError};
use crate::executor::{SwapExecutor, Verification};
use crate::models::{
    BalanceSnapshot, QuoteRequest, SwapCycleState, SwapDirection, TokenDescriptor, TokenPair,
    TxReceipt,
};
use crate::utils::{apply_bps, format_units, parse_units};
use bigdecimal::BigDecimal;
use ethers::types::{Address, U256};
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// Where a cycle currently is. Every cycle starts and ends in `Idle`
/// unless it aborts, which leaves it in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    ComputingAmount,
    Quoting,
    Approving,
    Executing,
    Verifying,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::ComputingAmount => "computing-amount",
            CyclePhase::Quoting => "quoting",
            CyclePhase::Approving => "approving",
            CyclePhase::Executing => "executing",
            CyclePhase::Verifying => "verifying",
            CyclePhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How much of the sell asset one cycle offers.
#[derive(Debug, Clone, PartialEq)]
pub enum AmountPolicy {
    /// A share of the current sell-side balance.
    BalanceFraction { bps: u32 },
    /// A fixed human-unit amount.
    Fixed(BigDecimal),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub pair: TokenPair,
    pub amount: AmountPolicy,
    /// Human units; smaller amounts abort the cycle.
    pub min_amount: BigDecimal,
    pub slippage_bps: u32,
}

/// What a completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub swap_number: u64,
    pub direction: SwapDirection,
    pub source: String,
    pub sell_amount: U256,
    pub quoted_buy_amount: U256,
    pub receipt: TxReceipt,
    pub verification: Verification,
}

#[derive(Debug, Clone)]
pub struct SwapStats {
    pub swap_count: u64,
    pub base: TokenDescriptor,
    pub base_balance: U256,
    pub quote: TokenDescriptor,
    pub quote_balance: U256,
    pub next_direction: SwapDirection,
    next_label: String,
}

impl fmt::Display for SwapStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "swaps={} {}={} {}={} next={}",
            self.swap_count,
            self.base.symbol,
            format_units(self.base_balance, self.base.decimals),
            self.quote.symbol,
            format_units(self.quote_balance, self.quote.decimals),
            self.next_label
        )
    }
}

/// Drives one full swap cycle: amount, quotes, approval, execution,
/// verification, then direction flip.
pub struct SwapOrchestrator {
    chain: Arc<dyn ChainClient>,
    aggregator: QuoteAggregator,
    approvals: ApprovalManager,
    executor: SwapExecutor,
    config: OrchestratorConfig,
    phase: Mutex<CyclePhase>,
}

impl SwapOrchestrator {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        aggregator: QuoteAggregator,
        approvals: ApprovalManager,
        executor: SwapExecutor,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            chain,
            aggregator,
            approvals,
            executor,
            config,
            phase: Mutex::new(CyclePhase::Idle),
        }
    }

    pub fn phase(&self) -> CyclePhase {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn pair(&self) -> &TokenPair {
        &self.config.pair
    }

    /// Run one cycle. `state` is only touched once the swap is confirmed, so
    /// a failed cycle leaves the direction and count as they were.
    pub async fn run_cycle(&self, state: &mut SwapCycleState) -> Result<CycleReport> {
        let direction = state.direction;
        info!(
            cycle = state.swap_count + 1,
            direction = %direction.describe(&self.config.pair),
            "[CYCLE] starting"
        );
        match self.drive(direction).await {
            Ok(done) => {
                if let Some(spender) = done.spender {
                    let (sell, _) = direction.legs(&self.config.pair);
                    self.approvals
                        .record_spend(sell.address, spender, done.report.sell_amount);
                }
                state.commit(done.gas_price);
                self.enter(CyclePhase::Idle);
                let report = CycleReport {
                    swap_number: state.swap_count,
                    ..done.report
                };
                info!(
                    swap = report.swap_number,
                    source = %report.source,
                    hash = ?report.receipt.hash,
                    next = %state.direction.describe(&self.config.pair),
                    "[CYCLE] complete"
                );
                Ok(report)
            }
            Err(e) => {
                let at = self.phase();
                self.enter(CyclePhase::Failed);
                warn!(phase = %at, error = %e, "[CYCLE] aborted");
                Err(e)
            }
        }
    }

    /// Balances of both assets plus the cycle bookkeeping.
    pub async fn stats(&self, state: &SwapCycleState) -> Result<SwapStats> {
        let pair = &self.config.pair;
        let BalanceSnapshot { sell, buy } = self.executor.snapshot(&pair.base, &pair.quote).await?;
        Ok(SwapStats {
            swap_count: state.swap_count,
            base: pair.base.clone(),
            base_balance: sell,
            quote: pair.quote.clone(),
            quote_balance: buy,
            next_direction: state.direction,
            next_label: state.direction.describe(pair),
        })
    }

    /// Sell amount for the given balance under the configured policy.
    pub fn compute_amount(&self, sell: &TokenDescriptor, balance: U256) -> Result<U256> {
        let amount = match &self.config.amount {
            AmountPolicy::BalanceFraction { bps } => apply_bps(balance, *bps),
            AmountPolicy::Fixed(human) => {
                let amount = parse_units(human, sell.decimals)?;
                if balance < amount {
                    return Err(SwapError::insufficient(&sell.symbol, balance, amount));
                }
                amount
            }
        };
        let min = parse_units(&self.config.min_amount, sell.decimals)?;
        if amount.is_zero() || amount < min {
            return Err(SwapError::insufficient(&sell.symbol, balance, min.max(U256::one())));
        }
        Ok(amount)
    }

    async fn drive(&self, direction: SwapDirection) -> Result<Completed> {
        let (sell, buy) = direction.legs(&self.config.pair);

        self.enter(CyclePhase::ComputingAmount);
        let before = self.executor.snapshot(sell, buy).await?;
        let sell_amount = self.compute_amount(sell, before.sell)?;
        let gas_price = self.chain.gas_price().await?;
        info!(
            amount = %format_units(sell_amount, sell.decimals),
            symbol = %sell.symbol,
            balance = %format_units(before.sell, sell.decimals),
            gas_gwei = %format_units(gas_price, 9),
            "[CYCLE] amount"
        );

        self.enter(CyclePhase::Quoting);
        let request = QuoteRequest {
            sell: sell.clone(),
            buy: buy.clone(),
            sell_amount,
            taker: self.chain.address(),
            slippage_bps: self.config.slippage_bps,
        };
        let quote = self.aggregator.best_quote(&request, gas_price).await?;

        if let Some(spender) = quote.spender {
            self.enter(CyclePhase::Approving);
            self.approvals
                .ensure_allowance(sell, spender, quote.sell_amount)
                .await?;
        }

        self.enter(CyclePhase::Executing);
        let receipt = self.executor.submit(&quote, sell).await?;

        self.enter(CyclePhase::Verifying);
        let verification = self.executor.verify(sell, buy, before).await;

        Ok(Completed {
            gas_price,
            spender: quote.spender,
            report: CycleReport {
                swap_number: 0,
                direction,
                source: quote.source,
                sell_amount,
                quoted_buy_amount: quote.buy_amount,
                receipt,
                verification,
            },
        })
    }

    fn enter(&self, phase: CyclePhase) {
        *self.phase.lock().unwrap_or_else(|p| p.into_inner()) = phase;
    }
}

struct Completed {
    gas_price: U256,
    spender: Option<Address>,
    report: CycleReport,
}
