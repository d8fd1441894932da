//! Shared data structures used throughout the application.

use ethers::types::{Address, Bytes, H256, U256};
use std::fmt;
use std::time::SystemTime;

/// Sentinel used by aggregator APIs for the chain's native asset.
pub const NATIVE_TOKEN: Address = Address::repeat_byte(0xee);

/// Static description of a tradable asset. Loaded once, read everywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDescriptor {
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl TokenDescriptor {
    pub fn new(symbol: impl Into<String>, address: Address, decimals: u8) -> Self {
        Self {
            symbol: symbol.into(),
            address,
            decimals,
        }
    }

    pub fn is_native(&self) -> bool {
        self.address == NATIVE_TOKEN
    }
}

/// The two assets the engine alternates between.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub base: TokenDescriptor,
    pub quote: TokenDescriptor,
}

/// Which asset is sold in the next cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// Sell `base`, buy `quote`.
    BaseToQuote,
    /// Sell `quote`, buy `base`.
    QuoteToBase,
}

impl SwapDirection {
    pub fn flipped(self) -> Self {
        match self {
            SwapDirection::BaseToQuote => SwapDirection::QuoteToBase,
            SwapDirection::QuoteToBase => SwapDirection::BaseToQuote,
        }
    }

    /// (sell, buy) legs for this direction.
    pub fn legs(self, pair: &TokenPair) -> (&TokenDescriptor, &TokenDescriptor) {
        match self {
            SwapDirection::BaseToQuote => (&pair.base, &pair.quote),
            SwapDirection::QuoteToBase => (&pair.quote, &pair.base),
        }
    }

    pub fn describe(self, pair: &TokenPair) -> String {
        let (sell, buy) = self.legs(pair);
        format!("{} → {}", sell.symbol, buy.symbol)
    }
}

/// Inputs shared verbatim by every quote source in one aggregation round.
#[derive(Debug, Clone)]
pub struct QuoteRequest {
    pub sell: TokenDescriptor,
    pub buy: TokenDescriptor,
    /// Smallest units. Fixed before any source is invoked.
    pub sell_amount: U256,
    /// Address that will send the swap and receive the output.
    pub taker: Address,
    pub slippage_bps: u32,
}

/// A candidate swap produced by one source.
#[derive(Debug, Clone)]
pub struct Quote {
    pub source: String,
    pub sell_token: Address,
    pub buy_token: Address,
    pub sell_amount: U256,
    pub buy_amount: U256,
    /// Contract the transaction is sent to.
    pub target: Address,
    pub calldata: Bytes,
    /// Native value attached to the transaction.
    pub value: U256,
    pub gas_hint: Option<U256>,
    /// Estimated gas cost in USD, attached by the aggregator.
    pub gas_cost_usd: Option<f64>,
    /// Contract that must hold an allowance on the sell token, if any.
    pub spender: Option<Address>,
}

impl Quote {
    pub fn with_gas_cost(mut self, gas_cost_usd: f64) -> Self {
        self.gas_cost_usd = Some(gas_cost_usd);
        self
    }
}

/// A confirmed allowance grant remembered for the process lifetime.
#[derive(Debug, Clone)]
pub struct ApprovalRecord {
    pub token: Address,
    pub spender: Address,
    pub granted: U256,
    pub checked_at: SystemTime,
}

/// Unsigned transaction as built by the engine.
#[derive(Debug, Clone, Default)]
pub struct TxRequest {
    pub to: Address,
    pub data: Bytes,
    pub value: U256,
    pub gas_limit: U256,
}

/// The parts of a mined receipt the engine cares about.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    pub hash: H256,
    pub success: bool,
    pub block_number: Option<u64>,
    pub gas_used: Option<U256>,
}

/// Sell and buy side balances at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub sell: U256,
    pub buy: U256,
}

impl fmt::Display for BalanceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sell={} buy={}", self.sell, self.buy)
    }
}

/// Process-local cycle bookkeeping. Owned by the orchestrator's caller and
/// only mutated after a cycle has fully completed.
#[derive(Debug, Clone)]
pub struct SwapCycleState {
    pub swap_count: u64,
    pub direction: SwapDirection,
    pub last_gas_price: Option<U256>,
}

impl SwapCycleState {
    pub fn new(direction: SwapDirection) -> Self {
        Self {
            swap_count: 0,
            direction,
            last_gas_price: None,
        }
    }

    /// Record a confirmed swap and alternate the direction.
    pub fn commit(&mut self, gas_price: U256) {
        self.swap_count += 1;
        self.direction = self.direction.flipped();
        self.last_gas_price = Some(gas_price);
    }
}

impl Default for SwapCycleState {
    fn default() -> Self {
        Self::new(SwapDirection::BaseToQuote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> TokenPair {
        TokenPair {
            base: TokenDescriptor::new("USDT", Address::from_low_u64_be(1), 6),
            quote: TokenDescriptor::new("USDC", Address::from_low_u64_be(2), 6),
        }
    }

    #[test]
    fn direction_legs_alternate() {
        let pair = pair();
        let (sell, buy) = SwapDirection::BaseToQuote.legs(&pair);
        assert_eq!((sell.symbol.as_str(), buy.symbol.as_str()), ("USDT", "USDC"));
        let (sell, buy) = SwapDirection::QuoteToBase.legs(&pair);
        assert_eq!((sell.symbol.as_str(), buy.symbol.as_str()), ("USDC", "USDT"));
        assert_eq!(SwapDirection::BaseToQuote.describe(&pair), "USDT → USDC");
    }

    #[test]
    fn commit_flips_and_counts() {
        let mut state = SwapCycleState::default();
        state.commit(U256::from(7u64));
        assert_eq!(state.swap_count, 1);
        assert_eq!(state.direction, SwapDirection::QuoteToBase);
        assert_eq!(state.last_gas_price, Some(U256::from(7u64)));
        state.commit(U256::from(8u64));
        assert_eq!(state.swap_count, 2);
        assert_eq!(state.direction, SwapDirection::BaseToQuote);
    }

    #[test]
    fn native_sentinel() {
        let eth = TokenDescriptor::new("ETH", NATIVE_TOKEN, 18);
        assert!(eth.is_native());
        assert!(!pair().base.is_native());
    }
}
