//! Configuration loader and application settings.
//!
//! Everything comes from the environment (after `.env` is loaded by the
//! binary). Defaults target Base mainnet alternating USDT and USDC.

use crate::aggregator::{AggregatorConfig, FanOut};
use crate::api::relay::RelayConfig;
use crate::api::zerox::ZeroXConfig;
use crate::dex::quoter::UniswapQuoterConfig;
use crate::engine::{AmountPolicy, OrchestratorConfig, SchedulerConfig};
use crate::errors::{Result, SwapError};
use crate::executor::ExecutorConfig;
use crate::models::{TokenDescriptor, TokenPair};
use crate::oracle::StaticPriceOracle;
use crate::retry::RetryPolicy;
use bigdecimal::BigDecimal;
use ethers::types::{Address, U256};
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

const DEFAULT_RPC_URLS: &str = "https://1rpc.io/base,https://base.meowrpc.com,https://base.drpc.org,https://endpoints.omniatech.io/v1/base/mainnet/public";
const DEFAULT_TOKEN_A: &str = "USDT:0xfde4C96c8593536E31F229EA8f37b2ADa2699bb2:6";
const DEFAULT_TOKEN_B: &str = "USDC:0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913:6";
const DEFAULT_QUOTER: &str = "0x3d4e44Eb1374240CE5F1B871ab261CD16335B76a";
const DEFAULT_ROUTER: &str = "0x2626664c2603336E57B271c5C0b26F421741e481";

/// Optional pool used to price the native gas asset.
#[derive(Debug, Clone)]
pub struct PricePoolConfig {
    pub address: Address,
    pub native_is_token0: bool,
    pub token0_decimals: u8,
    pub token1_decimals: u8,
}

/// Consolidated application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<Url>,
    pub rpc_retry: RetryPolicy,
    pub receipt_timeout: Duration,
    pub orchestrator: OrchestratorConfig,
    pub scheduler: SchedulerConfig,
    pub aggregator: AggregatorConfig,
    pub executor: ExecutorConfig,
    pub approval_multiplier: u32,
    pub uniswap: UniswapQuoterConfig,
    pub relay: RelayConfig,
    /// Present only when an API key is configured.
    pub zerox: Option<ZeroXConfig>,
    pub prices: StaticPriceOracle,
    pub price_pool: Option<PricePoolConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let chain_id: u64 = env.parse("CHAIN_ID", 8453)?;
        let rpc_urls = env
            .get("RPC_URLS")
            .unwrap_or_else(|| DEFAULT_RPC_URLS.to_string())
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Url::parse)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if rpc_urls.is_empty() {
            return Err(SwapError::Config("RPC_URLS is empty".into()));
        }
        let rpc_attempts: usize = env.parse("RPC_MAX_ATTEMPTS", rpc_urls.len().max(2))?;

        let base = parse_token(&env.get_or("TOKEN_A", DEFAULT_TOKEN_A))?;
        let quote = parse_token(&env.get_or("TOKEN_B", DEFAULT_TOKEN_B))?;
        if base.address == quote.address {
            return Err(SwapError::Config("TOKEN_A and TOKEN_B must differ".into()));
        }

        let slippage_bps: u32 = env.parse("SLIPPAGE_BPS", 100)?;
        let fraction_bps: u32 = env.parse("BALANCE_FRACTION_BPS", 9_900)?;
        if fraction_bps == 0 || fraction_bps > 10_000 {
            return Err(SwapError::Config(format!(
                "BALANCE_FRACTION_BPS must be in 1..=10000, got {fraction_bps}"
            )));
        }
        let amount = match env.get("SWAP_AMOUNT") {
            Some(raw) => AmountPolicy::Fixed(parse_decimal("SWAP_AMOUNT", &raw)?),
            None => AmountPolicy::BalanceFraction { bps: fraction_bps },
        };
        let min_amount = parse_decimal("MIN_SWAP_AMOUNT", &env.get_or("MIN_SWAP_AMOUNT", "0.1"))?;

        let gas_units: u64 = env.parse("GAS_UNITS", 300_000)?;
        let gas_multiplier: f64 = env.parse("GAS_MULTIPLIER", 1.2)?;
        let gas_ceiling: u64 = env.parse("GAS_CEILING", 1_000_000)?;

        let aggregator = AggregatorConfig {
            fan_out: env.parse("FANOUT", FanOut::SequentialPriority)?,
            source_timeout: Duration::from_secs(env.parse("QUOTE_TIMEOUT_SECS", 15)?),
            retry: RetryPolicy::exponential(
                env.parse("QUOTE_ATTEMPTS", 2)?,
                Duration::from_millis(500),
                Duration::from_secs(4),
            ),
            min_output_bps: env.parse("MIN_OUTPUT_BPS", 9_500)?,
            default_gas_units: gas_units,
            gas_multiplier,
        };

        let fee_tiers = env
            .get_or("UNISWAP_FEE_TIERS", "100,500,3000")
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<u32>()
                    .map_err(|e| SwapError::Config(format!("UNISWAP_FEE_TIERS: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let uniswap = UniswapQuoterConfig {
            quoter: env.parse_address("UNISWAP_QUOTER", DEFAULT_QUOTER)?,
            router: env.parse_address("UNISWAP_ROUTER", DEFAULT_ROUTER)?,
            fee_tiers,
            min_notional: parse_decimal(
                "UNISWAP_MIN_NOTIONAL",
                &env.get_or("UNISWAP_MIN_NOTIONAL", "1"),
            )?,
            min_output_bps: env.parse("UNISWAP_MIN_OUTPUT_BPS", 9_800)?,
            deadline: Duration::from_secs(3600),
        };

        let relay = RelayConfig {
            base_url: env.get_or("RELAY_BASE_URL", "https://api.relay.link"),
            chain_id,
            min_output_bps: env.parse("RELAY_MIN_OUTPUT_BPS", 9_500)?,
        };

        let zerox = match env.get("ZEROX_API_KEY") {
            Some(api_key) => Some(ZeroXConfig {
                base_url: env.get_or("ZEROX_BASE_URL", "https://api.0x.org"),
                api_key,
                chain_id,
                min_output_bps: env.parse("ZEROX_MIN_OUTPUT_BPS", 9_500)?,
            }),
            None => None,
        };

        let prices = StaticPriceOracle::new(env.parse("NATIVE_USD_PRICE", 3_000.0)?)
            .with_price(base.address, env.parse("TOKEN_A_USD_PRICE", 1.0)?)
            .with_price(quote.address, env.parse("TOKEN_B_USD_PRICE", 1.0)?);

        let price_pool = match env.get("PRICE_POOL_ADDRESS") {
            Some(raw) => {
                let (d0, d1) = parse_decimals_pair(&env.get_or("PRICE_POOL_DECIMALS", "18,6"))?;
                Some(PricePoolConfig {
                    address: parse_address("PRICE_POOL_ADDRESS", &raw)?,
                    native_is_token0: env.parse("PRICE_POOL_NATIVE_IS_TOKEN0", true)?,
                    token0_decimals: d0,
                    token1_decimals: d1,
                })
            }
            None => None,
        };

        Ok(Self {
            chain_id,
            rpc_urls,
            rpc_retry: RetryPolicy::exponential(
                rpc_attempts,
                Duration::from_secs(1),
                Duration::from_secs(8),
            ),
            receipt_timeout: Duration::from_secs(env.parse("RECEIPT_TIMEOUT_SECS", 120)?),
            orchestrator: OrchestratorConfig {
                pair: TokenPair { base, quote },
                amount,
                min_amount,
                slippage_bps,
            },
            scheduler: SchedulerConfig {
                interval: Duration::from_secs(env.parse("SWAP_INTERVAL_SECS", 30)?),
                error_delay: Duration::from_secs(env.parse("ERROR_DELAY_SECS", 10)?),
                max_consecutive_failures: env.parse("MAX_CONSECUTIVE_FAILURES", 5)?,
            },
            aggregator,
            executor: ExecutorConfig {
                default_gas_units: U256::from(gas_units),
                gas_multiplier,
                gas_ceiling: U256::from(gas_ceiling),
                settle_delay: Duration::from_secs(env.parse("SETTLE_DELAY_SECS", 5)?),
            },
            approval_multiplier: env.parse("APPROVAL_MULTIPLIER", 2)?,
            uniswap,
            relay,
            zerox,
            prices,
            price_pool,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Unset and blank values both count as missing.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e| SwapError::Config(format!("{key}={raw}: {e}"))),
            None => Ok(default),
        }
    }

    fn parse_address(&self, key: &str, default: &str) -> Result<Address> {
        parse_address(key, &self.get_or(key, default))
    }
}

fn parse_address(key: &str, raw: &str) -> Result<Address> {
    Address::from_str(raw).map_err(|e| SwapError::Config(format!("{key}={raw}: {e}")))
}

fn parse_decimal(key: &str, raw: &str) -> Result<BigDecimal> {
    BigDecimal::from_str(raw.trim()).map_err(|e| SwapError::Config(format!("{key}={raw}: {e}")))
}

/// `SYMBOL:ADDRESS:DECIMALS`
fn parse_token(raw: &str) -> Result<TokenDescriptor> {
    let parts: Vec<&str> = raw.split(':').map(str::trim).collect();
    let [symbol, address, decimals] = parts.as_slice() else {
        return Err(SwapError::Config(format!(
            "token must be SYMBOL:ADDRESS:DECIMALS, got {raw}"
        )));
    };
    let decimals = decimals
        .parse::<u8>()
        .map_err(|e| SwapError::Config(format!("token decimals in {raw}: {e}")))?;
    Ok(TokenDescriptor::new(
        *symbol,
        parse_address("token", address)?,
        decimals,
    ))
}

fn parse_decimals_pair(raw: &str) -> Result<(u8, u8)> {
    let parsed: Vec<u8> = raw
        .split(',')
        .map(|s| s.trim().parse::<u8>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| SwapError::Config(format!("PRICE_POOL_DECIMALS={raw}: {e}")))?;
    match parsed.as_slice() {
        [d0, d1] => Ok((*d0, *d1)),
        _ => Err(SwapError::Config(format!(
            "PRICE_POOL_DECIMALS must be two numbers, got {raw}"
        ))),
    }
}
