//! In-memory chain and scripted sources for unit tests.

use crate::aggregator::QuoteSource;
use crate::chain::{ApproveCall, ChainClient};
use crate::errors::{Result, SwapError};
use crate::models::{Quote, QuoteRequest, TokenDescriptor, TokenPair, TxReceipt, TxRequest};
use crate::oracle::StaticPriceOracle;
use async_trait::async_trait;
use ethers::abi::{AbiDecode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const ROUTER: Address = Address::repeat_byte(0x77);

pub fn usdt() -> TokenDescriptor {
    TokenDescriptor::new("USDT", Address::repeat_byte(0x01), 6)
}

pub fn usdc() -> TokenDescriptor {
    TokenDescriptor::new("USDC", Address::repeat_byte(0x02), 6)
}

pub fn pair() -> TokenPair {
    TokenPair {
        base: usdt(),
        quote: usdc(),
    }
}

pub fn wallet() -> Address {
    Address::repeat_byte(0xaa)
}

/// Both tokens at $1, native asset at $1000.
pub fn test_oracle() -> StaticPriceOracle {
    StaticPriceOracle::new(1000.0)
        .with_price(usdt().address, 1.0)
        .with_price(usdc().address, 1.0)
}

pub fn quote_request(sell_amount: U256) -> QuoteRequest {
    QuoteRequest {
        sell: usdt(),
        buy: usdc(),
        sell_amount,
        taker: wallet(),
        slippage_bps: 100,
    }
}

/// Calldata the mock chain understands as a swap.
pub fn swap_calldata(sell: Address, buy: Address, sell_amount: U256, buy_amount: U256) -> Bytes {
    ethers::abi::encode(&[
        Token::Address(sell),
        Token::Address(buy),
        Token::Uint(sell_amount),
        Token::Uint(buy_amount),
    ])
    .into()
}

pub struct MockSource {
    name: String,
    buy_amount: U256,
    gas: u64,
    delay: Duration,
    sell_override: Option<U256>,
    buy_token_override: Option<Address>,
    fail: bool,
    fail_first: usize,
    pub calls: AtomicUsize,
}

impl MockSource {
    pub fn ok(name: &str, buy_amount: U256, gas: u64) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            buy_amount,
            gas,
            delay: Duration::ZERO,
            sell_override: None,
            buy_token_override: None,
            fail: false,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(name: &str) -> Arc<Self> {
        Self::ok(name, U256::zero(), 0).tweak(|s| s.fail = true)
    }

    pub fn delayed(self: Arc<Self>, delay: Duration) -> Arc<Self> {
        self.tweak(|s| s.delay = delay)
    }

    pub fn with_sell_amount(self: Arc<Self>, amount: U256) -> Arc<Self> {
        self.tweak(|s| s.sell_override = Some(amount))
    }

    pub fn with_buy_token(self: Arc<Self>, token: Address) -> Arc<Self> {
        self.tweak(|s| s.buy_token_override = Some(token))
    }

    /// Transport failures on the first `n` calls.
    pub fn failing_first(self: Arc<Self>, n: usize) -> Arc<Self> {
        self.tweak(|s| s.fail_first = n)
    }

    fn tweak(self: Arc<Self>, f: impl FnOnce(&mut Self)) -> Arc<Self> {
        let mut inner = Arc::into_inner(self).expect("mock source already shared");
        f(&mut inner);
        Arc::new(inner)
    }
}

#[async_trait]
impl QuoteSource for MockSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(SwapError::rejected(&self.name, "scripted failure"));
        }
        if call <= self.fail_first {
            return Err(SwapError::Transport("scripted outage".into()));
        }
        let sell_amount = self.sell_override.unwrap_or(request.sell_amount);
        let buy_token = self.buy_token_override.unwrap_or(request.buy.address);
        Ok(Quote {
            source: self.name.clone(),
            sell_token: request.sell.address,
            buy_token,
            sell_amount,
            buy_amount: self.buy_amount,
            target: ROUTER,
            calldata: swap_calldata(
                request.sell.address,
                buy_token,
                sell_amount,
                self.buy_amount,
            ),
            value: U256::zero(),
            gas_hint: Some(U256::from(self.gas)),
            gas_cost_usd: None,
            spender: Some(ROUTER),
        })
    }
}

type CallHandler = Box<dyn Fn(Address, &[u8]) -> Result<Bytes> + Send + Sync>;

#[derive(Default)]
struct ChainState {
    balances: HashMap<Address, U256>,
    allowances: HashMap<(Address, Address), U256>,
    sent: Vec<TxRequest>,
    revert_swaps: bool,
    revert_approvals: bool,
    freeze_balances: bool,
    fail_balance_reads: bool,
}

/// Chain double: balances and allowances in memory, swaps applied from
/// [`swap_calldata`], approvals from ERC-20 `approve` calldata.
pub struct MockChain {
    state: Mutex<ChainState>,
    gas_price: U256,
    approval_delay: Duration,
    call_handler: Option<CallHandler>,
    pub approvals: AtomicUsize,
    pub allowance_reads: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChainState::default()),
            gas_price: U256::from(1_000_000_000u64),
            approval_delay: Duration::from_millis(100),
            call_handler: None,
            approvals: AtomicUsize::new(0),
            allowance_reads: AtomicUsize::new(0),
        }
    }

    pub fn with_balance(self, token: Address, amount: U256) -> Self {
        self.lock().balances.insert(token, amount);
        self
    }

    pub fn with_allowance(self, token: Address, spender: Address, amount: U256) -> Self {
        self.lock().allowances.insert((token, spender), amount);
        self
    }

    pub fn with_call_handler(
        mut self,
        handler: impl Fn(Address, &[u8]) -> Result<Bytes> + Send + Sync + 'static,
    ) -> Self {
        self.call_handler = Some(Box::new(handler));
        self
    }

    pub fn revert_swaps(&self, on: bool) {
        self.lock().revert_swaps = on;
    }

    pub fn revert_approvals(&self, on: bool) {
        self.lock().revert_approvals = on;
    }

    /// Swaps succeed but leave balances untouched.
    pub fn freeze_balances(&self, on: bool) {
        self.lock().freeze_balances = on;
    }

    pub fn fail_balance_reads(&self, on: bool) {
        self.lock().fail_balance_reads = on;
    }

    pub fn balance(&self, token: Address) -> U256 {
        self.lock().balances.get(&token).copied().unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<TxRequest> {
        self.lock().sent.clone()
    }

    pub fn swaps_sent(&self) -> usize {
        self.sent().iter().filter(|tx| tx.to == ROUTER).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ChainState> {
        self.state.lock().unwrap()
    }

    fn receipt(&self, n: usize, success: bool) -> TxReceipt {
        TxReceipt {
            hash: H256::from_low_u64_be(n as u64),
            success,
            block_number: Some(n as u64),
            gas_used: Some(U256::from(100_000u64)),
        }
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn address(&self) -> Address {
        wallet()
    }

    async fn token_balance(&self, token: Address) -> Result<U256> {
        let state = self.lock();
        if state.fail_balance_reads {
            return Err(SwapError::Transport("balance read failed".into()));
        }
        Ok(state.balances.get(&token).copied().unwrap_or_default())
    }

    async fn allowance(&self, token: Address, spender: Address) -> Result<U256> {
        self.allowance_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .lock()
            .allowances
            .get(&(token, spender))
            .copied()
            .unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<U256> {
        Ok(self.gas_price)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        match &self.call_handler {
            Some(handler) => handler(to, &data),
            None => Err(SwapError::CallReverted("no handler".into())),
        }
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt> {
        if let Ok(approve) = ApproveCall::decode(&tx.data) {
            self.approvals.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.approval_delay).await;
            let mut state = self.lock();
            state.sent.push(tx.clone());
            let n = state.sent.len();
            if state.revert_approvals {
                return Ok(self.receipt(n, false));
            }
            state
                .allowances
                .insert((tx.to, approve.spender), approve.amount);
            return Ok(self.receipt(n, true));
        }

        let mut state = self.lock();
        state.sent.push(tx.clone());
        let n = state.sent.len();
        if state.revert_swaps {
            return Ok(self.receipt(n, false));
        }
        let decoded = ethers::abi::decode(
            &[
                ParamType::Address,
                ParamType::Address,
                ParamType::Uint(256),
                ParamType::Uint(256),
            ],
            &tx.data,
        )?;
        let (Some(sell), Some(buy), Some(sell_amount), Some(buy_amount)) = (
            decoded[0].clone().into_address(),
            decoded[1].clone().into_address(),
            decoded[2].clone().into_uint(),
            decoded[3].clone().into_uint(),
        ) else {
            return Err(SwapError::Abi("bad swap calldata".into()));
        };
        if !state.freeze_balances {
            let sell_balance = state.balances.entry(sell).or_default();
            *sell_balance = sell_balance.saturating_sub(sell_amount);
            let buy_balance = state.balances.entry(buy).or_default();
            *buy_balance = buy_balance.saturating_add(buy_amount);
        }
        Ok(self.receipt(n, true))
    }
}
