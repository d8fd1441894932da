use super::Slot0Call;
use crate::chain::ChainClient;
use crate::errors::{Result, SwapError};
use crate::models::TokenDescriptor;
use crate::oracle::{PriceOracle, StaticPriceOracle};
use async_trait::async_trait;
use ethers::{
    abi::AbiEncode,
    types::{Address, U256},
};
use std::sync::Arc;
use tracing::debug;

/// Prices the native asset from a Uniswap V3 native/stable pool's `slot0`;
/// token prices come from the static table.
pub struct PoolPriceOracle {
    chain: Arc<dyn ChainClient>,
    pool: Address,
    /// Whether the native asset (wrapped) is the pool's token0.
    native_is_token0: bool,
    token0_decimals: u8,
    token1_decimals: u8,
    tokens: StaticPriceOracle,
}

impl PoolPriceOracle {
    pub fn new(
        chain: Arc<dyn ChainClient>,
        pool: Address,
        native_is_token0: bool,
        token0_decimals: u8,
        token1_decimals: u8,
        tokens: StaticPriceOracle,
    ) -> Self {
        Self {
            chain,
            pool,
            native_is_token0,
            token0_decimals,
            token1_decimals,
            tokens,
        }
    }

    async fn sqrt_price_x96(&self) -> Result<U256> {
        let out = self.chain.call(self.pool, Slot0Call.encode().into()).await?;
        if out.len() < 32 {
            return Err(SwapError::Abi("short slot0 response".into()));
        }
        Ok(U256::from_big_endian(&out[..32]))
    }
}

#[async_trait]
impl PriceOracle for PoolPriceOracle {
    async fn usd_price(&self, token: &TokenDescriptor) -> Result<f64> {
        self.tokens.usd_price(token).await
    }

    async fn native_usd_price(&self) -> Result<f64> {
        let sqrt = self.sqrt_price_x96().await?;
        let token0_in_token1 =
            price_token0_in_token1(sqrt, self.token0_decimals, self.token1_decimals);
        let price = if self.native_is_token0 {
            token0_in_token1
        } else if token0_in_token1 > 0.0 {
            1.0 / token0_in_token1
        } else {
            0.0
        };
        debug!(price, pool = ?self.pool, "[QUOTE] native price from pool");
        if price > 0.0 && price.is_finite() {
            Ok(price)
        } else {
            Err(SwapError::PriceUnavailable(format!("pool {:?} returned no usable price", self.pool)))
        }
    }
}

/// Human price of one token0 in token1 from `sqrtPriceX96`.
fn price_token0_in_token1(sqrt_price_x96: U256, token0_decimals: u8, token1_decimals: u8) -> f64 {
    // sqrtPriceX96 = sqrt(token1_raw / token0_raw) * 2^96
    let s = sqrt_price_x96.to_string();
    let sqrt_q96 = s.parse::<f64>().unwrap_or(0.0) / 2.0_f64.powi(96);
    if sqrt_q96 <= 0.0 {
        return 0.0;
    }
    let ratio_raw = sqrt_q96 * sqrt_q96;
    ratio_raw * 10_f64.powi(i32::from(token0_decimals) - i32::from(token1_decimals))
}
