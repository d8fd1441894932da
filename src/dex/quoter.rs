use super::{
    ExactInputSingleCall, ExactInputSingleParams, MulticallCall, QuoteExactInputSingleCall,
    QuoteExactInputSingleParams,
};
use crate::aggregator::QuoteSource;
use crate::chain::ChainClient;
use crate::errors::{Result, SwapError};
use crate::models::{Quote, QuoteRequest};
use crate::utils::{apply_bps, format_units, parse_units, rescale};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use ethers::{
    abi::{AbiEncode, ParamType},
    types::{Address, Bytes, U256},
};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Router work on top of the pool swap itself.
const ROUTER_GAS_OVERHEAD: u64 = 60_000;

#[derive(Debug, Clone)]
pub struct UniswapQuoterConfig {
    pub quoter: Address,
    pub router: Address,
    /// Pool fees in hundredths of a bip, e.g. 500 = 0.05%.
    pub fee_tiers: Vec<u32>,
    /// Smallest sell amount (human units) worth quoting on-chain.
    pub min_notional: BigDecimal,
    pub min_output_bps: u32,
    pub deadline: Duration,
}

/// Quotes single-pool V3 swaps through QuoterV2, trying each fee tier and
/// keeping the best output.
pub struct UniswapQuoter {
    chain: Arc<dyn ChainClient>,
    config: UniswapQuoterConfig,
}

struct TierQuote {
    fee: u32,
    amount_out: U256,
    gas_estimate: U256,
}

impl UniswapQuoter {
    pub fn new(chain: Arc<dyn ChainClient>, config: UniswapQuoterConfig) -> Self {
        Self { chain, config }
    }

    async fn quote_tier(&self, request: &QuoteRequest, fee: u32) -> Result<TierQuote> {
        let data = QuoteExactInputSingleCall {
            params: QuoteExactInputSingleParams {
                token_in: request.sell.address,
                token_out: request.buy.address,
                amount_in: request.sell_amount,
                fee,
                sqrt_price_limit_x96: U256::zero(),
            },
        }
        .encode();
        let out = self.chain.call(self.config.quoter, data.into()).await?;
        let tokens = ethers::abi::decode(
            &[
                ParamType::Uint(256),
                ParamType::Uint(160),
                ParamType::Uint(32),
                ParamType::Uint(256),
            ],
            &out,
        )?;
        let amount_out = tokens[0].clone().into_uint().unwrap_or_default();
        let gas_estimate = tokens[3].clone().into_uint().unwrap_or_default();
        Ok(TierQuote {
            fee,
            amount_out,
            gas_estimate,
        })
    }

    fn encode_swap(&self, request: &QuoteRequest, best: &TierQuote) -> Bytes {
        let amount_out_minimum =
            apply_bps(best.amount_out, 10_000u32.saturating_sub(request.slippage_bps));
        let swap = ExactInputSingleCall {
            params: ExactInputSingleParams {
                token_in: request.sell.address,
                token_out: request.buy.address,
                fee: best.fee,
                recipient: request.taker,
                amount_in: request.sell_amount,
                amount_out_minimum,
                sqrt_price_limit_x96: U256::zero(),
            },
        }
        .encode();
        let deadline = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            + self.config.deadline;
        MulticallCall {
            deadline: U256::from(deadline.as_secs()),
            data: vec![Bytes::from(swap)],
        }
        .encode()
        .into()
    }
}

#[async_trait]
impl QuoteSource for UniswapQuoter {
    fn name(&self) -> &str {
        "uniswap-v3"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let min_notional = parse_units(&self.config.min_notional, request.sell.decimals)?;
        if request.sell_amount < min_notional {
            return Err(SwapError::rejected(
                self.name(),
                format!("amount below minimum notional {}", self.config.min_notional),
            ));
        }

        let mut best: Option<TierQuote> = None;
        let mut last_transport = None;
        for &fee in &self.config.fee_tiers {
            match self.quote_tier(request, fee).await {
                Ok(tier) => {
                    debug!(fee, out = %tier.amount_out, "[QUOTE] uniswap tier");
                    if !tier.amount_out.is_zero()
                        && best.as_ref().is_none_or(|b| tier.amount_out > b.amount_out)
                    {
                        best = Some(tier);
                    }
                }
                Err(e) => {
                    debug!(fee, error = %e, "[QUOTE] uniswap tier failed");
                    if e.is_transport() {
                        last_transport = Some(e);
                    }
                }
            }
        }

        let best = match (best, last_transport) {
            (Some(b), _) => b,
            (None, Some(e)) => return Err(e),
            (None, None) => {
                return Err(SwapError::rejected(self.name(), "no pool for any fee tier"));
            }
        };

        let naive = rescale(request.sell_amount, request.sell.decimals, request.buy.decimals);
        let floor = apply_bps(naive, self.config.min_output_bps);
        if best.amount_out < floor {
            return Err(SwapError::rejected(
                self.name(),
                format!("output {} below floor {}", best.amount_out, floor),
            ));
        }

        info!(
            fee = best.fee,
            out = %format_units(best.amount_out, request.buy.decimals),
            symbol = %request.buy.symbol,
            "[QUOTE] uniswap"
        );

        Ok(Quote {
            source: self.name().to_string(),
            sell_token: request.sell.address,
            buy_token: request.buy.address,
            sell_amount: request.sell_amount,
            buy_amount: best.amount_out,
            target: self.config.router,
            calldata: self.encode_swap(request, &best),
            value: U256::zero(),
            gas_hint: Some(best.gas_estimate + U256::from(ROUTER_GAS_OVERHEAD)),
            gas_cost_usd: None,
            spender: Some(self.config.router),
        })
    }
}
