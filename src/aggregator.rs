//! Quote aggregation across independent price sources.

use crate::{
    errors::{Result, SwapError},
    models::{Quote, QuoteRequest},
    oracle::PriceOracle,
    retry::{RetryPolicy, retry_async},
    utils::{apply_bps, format_units, rescale, units_to_f64},
};
use async_trait::async_trait;
use ethers::types::U256;
use futures::future::join_all;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A price source able to produce an executable swap for a token pair.
#[async_trait]
pub trait QuoteSource: Send + Sync {
    fn name(&self) -> &str;

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote>;
}

/// How sources are consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// In priority order; the first viable quote wins.
    SequentialPriority,
    /// All at once; highest net value wins, ties go to priority order.
    ParallelBest,
}

impl FromStr for FanOut {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "sequential-priority" => Ok(FanOut::SequentialPriority),
            "parallel" | "parallel-best" => Ok(FanOut::ParallelBest),
            other => Err(SwapError::Config(format!("unknown fan-out discipline: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub fan_out: FanOut,
    /// Bound on a single source call.
    pub source_timeout: Duration,
    /// Retries per source, transport failures only.
    pub retry: RetryPolicy,
    /// Minimum output as a fraction of a 1:1 estimate, in bps.
    pub min_output_bps: u32,
    /// Gas units assumed for quotes without a hint.
    pub default_gas_units: u64,
    pub gas_multiplier: f64,
}

/// Calculate gas cost in USD
pub fn calculate_gas_cost_usd(
    gas_gwei: f64,
    gas_units: f64,
    gas_multiplier: f64,
    native_usd: f64,
) -> f64 {
    gas_gwei * 1e-9 * gas_units * gas_multiplier * native_usd
}

pub struct QuoteAggregator {
    sources: Vec<Arc<dyn QuoteSource>>,
    oracle: Arc<dyn PriceOracle>,
    config: AggregatorConfig,
}

impl QuoteAggregator {
    /// `sources` is in priority order.
    pub fn new(
        sources: Vec<Arc<dyn QuoteSource>>,
        oracle: Arc<dyn PriceOracle>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            sources,
            oracle,
            config,
        }
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    /// Best quote for `request`. Individual source failures are logged and
    /// skipped; only exhaustion of every source is an error.
    pub async fn best_quote(&self, request: &QuoteRequest, gas_price: U256) -> Result<Quote> {
        match self.config.fan_out {
            FanOut::SequentialPriority => self.first_viable(request, gas_price).await,
            FanOut::ParallelBest => self.best_net_value(request, gas_price).await,
        }
    }

    async fn first_viable(&self, request: &QuoteRequest, gas_price: U256) -> Result<Quote> {
        let floor = self.min_viable_output(request);
        for source in &self.sources {
            match self.fetch(source.as_ref(), request).await {
                Ok(quote) if quote.buy_amount >= floor => {
                    info!(
                        source = %quote.source,
                        out = %format_units(quote.buy_amount, request.buy.decimals),
                        "[QUOTE] accepted first viable quote"
                    );
                    let gas = match self.oracle.native_usd_price().await {
                        Ok(native_usd) => self.gas_cost_usd(&quote, gas_price, native_usd),
                        Err(e) => {
                            warn!(error = %e, "[QUOTE] gas cost unavailable");
                            return Ok(quote);
                        }
                    };
                    return Ok(quote.with_gas_cost(gas));
                }
                Ok(quote) => warn!(
                    source = %quote.source,
                    out = %quote.buy_amount,
                    floor = %floor,
                    "[QUOTE] below minimum viable output"
                ),
                Err(e) => warn!(source = source.name(), error = %e, "[QUOTE] source failed"),
            }
        }
        Err(SwapError::NoQuotesAvailable)
    }

    async fn best_net_value(&self, request: &QuoteRequest, gas_price: U256) -> Result<Quote> {
        // Without prices every quote is scored on raw output alone.
        let prices = futures::try_join!(
            self.oracle.usd_price(&request.buy),
            self.oracle.native_usd_price()
        );
        let (buy_usd, native_usd) = prices.unwrap_or_else(|e| {
            warn!(error = %e, "[QUOTE] price oracle unavailable; ignoring gas");
            (1.0, 0.0)
        });

        let results = join_all(
            self.sources
                .iter()
                .map(|source| self.fetch(source.as_ref(), request)),
        )
        .await;

        let mut best: Option<(f64, Quote)> = None;
        for (source, result) in self.sources.iter().zip(results) {
            let quote = match result {
                Ok(q) => q,
                Err(e) => {
                    warn!(source = source.name(), error = %e, "[QUOTE] source failed");
                    continue;
                }
            };
            let gas = self.gas_cost_usd(&quote, gas_price, native_usd);
            let net = net_value(&quote, request.buy.decimals, buy_usd, gas);
            info!(
                source = %quote.source,
                out = %format_units(quote.buy_amount, request.buy.decimals),
                gas_usd = gas,
                net_usd = net,
                "[QUOTE] candidate"
            );
            if best.as_ref().is_none_or(|(top, _)| net > *top) {
                best = Some((net, quote.with_gas_cost(gas)));
            }
        }

        let (net, quote) = best.ok_or(SwapError::NoQuotesAvailable)?;
        info!(source = %quote.source, net_usd = net, "[QUOTE] best");
        Ok(quote)
    }

    async fn fetch(&self, source: &dyn QuoteSource, request: &QuoteRequest) -> Result<Quote> {
        let timeout = self.config.source_timeout;
        let quote = retry_async(
            &self.config.retry,
            |_| async move {
                tokio::time::timeout(timeout, source.quote(request))
                    .await
                    .map_err(|_| SwapError::Timeout(format!("{} quote", source.name())))?
            },
            SwapError::is_transport,
        )
        .await?;
        validate(source.name(), request, quote)
    }

    fn min_viable_output(&self, request: &QuoteRequest) -> U256 {
        let naive = rescale(
            request.sell_amount,
            request.sell.decimals,
            request.buy.decimals,
        );
        apply_bps(naive, self.config.min_output_bps)
    }

    fn gas_cost_usd(&self, quote: &Quote, gas_price: U256, native_usd: f64) -> f64 {
        let units = quote
            .gas_hint
            .map(|g| g.low_u64())
            .unwrap_or(self.config.default_gas_units);
        let gas_gwei = units_to_f64(gas_price, 9);
        calculate_gas_cost_usd(
            gas_gwei,
            units as f64,
            self.config.gas_multiplier,
            native_usd,
        )
    }
}

/// Buy amount in USD minus gas cost in USD.
pub fn net_value(quote: &Quote, buy_decimals: u8, buy_usd: f64, gas_cost_usd: f64) -> f64 {
    units_to_f64(quote.buy_amount, buy_decimals) * buy_usd - gas_cost_usd
}

/// Checks every quote must pass regardless of source.
fn validate(source: &str, request: &QuoteRequest, quote: Quote) -> Result<Quote> {
    if quote.buy_amount.is_zero() {
        return Err(SwapError::rejected(source, "zero output"));
    }
    if quote.sell_token != request.sell.address || quote.buy_token != request.buy.address {
        return Err(SwapError::rejected(
            source,
            format!(
                "quoted {:?} -> {:?} for a {} -> {} request",
                quote.sell_token, quote.buy_token, request.sell.symbol, request.buy.symbol
            ),
        ));
    }
    if quote.sell_amount != request.sell_amount {
        return Err(SwapError::rejected(
            source,
            format!(
                "quoted {} but {} was requested",
                quote.sell_amount, request.sell_amount
            ),
        ));
    }
    if quote.target.is_zero() || quote.calldata.is_empty() {
        return Err(SwapError::rejected(source, "no executable transaction"));
    }
    Ok(quote)
}
