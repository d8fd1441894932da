//! Chain access: the signing/submission and balance-reading capabilities the
//! engine consumes, plus the endpoint pool backing them.

use crate::errors::Result;
use crate::models::{TxReceipt, TxRequest};
use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::types::{Address, Bytes, U256};

pub mod client;
pub mod pool;

pub use client::EvmClient;
pub use pool::{EndpointHealth, RpcEndpoint, RpcPool};

abigen!(
    IERC20,
    r#"[
        function approve(address spender, uint256 amount) external returns (bool)
        function allowance(address owner, address spender) external view returns (uint256)
        function balanceOf(address account) external view returns (uint256)
    ]"#,
);

/// Everything the engine needs from a chain node and the signing identity.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Address of the signing identity.
    fn address(&self) -> Address;

    /// ERC-20 balance of the signing identity, or the native balance for the
    /// native sentinel address.
    async fn token_balance(&self, token: Address) -> Result<U256>;

    /// ERC-20 allowance granted by the signing identity to `spender`.
    async fn allowance(&self, token: Address, spender: Address) -> Result<U256>;

    /// Current gas price in wei.
    async fn gas_price(&self) -> Result<U256>;

    /// Read-only call simulation.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    /// Sign, submit, and block until one confirmation.
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxReceipt>;
}
