//! USD prices used to compare quotes net of gas.

use crate::errors::{Result, SwapError};
use crate::models::TokenDescriptor;
use async_trait::async_trait;
use ethers::types::Address;
use std::collections::HashMap;

/// Converts assets into the common unit (USD) for net-value scoring.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    async fn usd_price(&self, token: &TokenDescriptor) -> Result<f64>;

    /// Price of the chain's native gas asset.
    async fn native_usd_price(&self) -> Result<f64>;
}

/// Fixed prices from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticPriceOracle {
    prices: HashMap<Address, f64>,
    native_usd: f64,
}

impl StaticPriceOracle {
    pub fn new(native_usd: f64) -> Self {
        Self {
            prices: HashMap::new(),
            native_usd,
        }
    }

    pub fn with_price(mut self, token: Address, usd: f64) -> Self {
        self.prices.insert(token, usd);
        self
    }
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn usd_price(&self, token: &TokenDescriptor) -> Result<f64> {
        self.prices
            .get(&token.address)
            .copied()
            .ok_or_else(|| SwapError::PriceUnavailable(format!("no USD price for {}", token.symbol)))
    }

    async fn native_usd_price(&self) -> Result<f64> {
        if self.native_usd > 0.0 {
            Ok(self.native_usd)
        } else {
            Err(SwapError::PriceUnavailable("native USD price not set".into()))
        }
    }
}
