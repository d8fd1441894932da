//! Off-chain aggregator APIs.
//!
//! Responsibilities:
//! • Build quote requests with explicit slippage and taker.
//! • Pull an executable transaction out of loosely shaped JSON replies.
//! • Reject degenerate outputs before they reach the aggregator.

use crate::errors::{Result, SwapError};
use crate::models::QuoteRequest;
use crate::utils::{apply_bps, rescale};
use ethers::types::{Address, Bytes, U256};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

pub mod relay;
pub mod zerox;

pub use relay::RelayClient;
pub use zerox::ZeroXClient;

/// Shared HTTP client for aggregator APIs.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("swap-alternator/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Amounts arrive as decimal strings, hex strings, or bare numbers.
pub(crate) fn parse_u256(value: &Value) -> Option<U256> {
    match value {
        Value::String(s) if s.starts_with("0x") => U256::from_str_radix(&s[2..], 16).ok(),
        Value::String(s) => U256::from_dec_str(s).ok(),
        Value::Number(n) => n.as_u64().map(U256::from),
        _ => None,
    }
}

pub(crate) fn parse_address(value: Option<&str>) -> Option<Address> {
    value
        .and_then(|s| Address::from_str(s).ok())
        .filter(|a| !a.is_zero())
}

pub(crate) fn parse_calldata(value: Option<&str>) -> Option<Bytes> {
    value
        .and_then(|s| Bytes::from_str(s).ok())
        .filter(|b| !b.is_empty())
}

/// Reject outputs below `min_output_bps` of a 1:1 estimate.
pub(crate) fn check_min_output(
    source: &str,
    request: &QuoteRequest,
    buy_amount: U256,
    min_output_bps: u32,
) -> Result<()> {
    if buy_amount.is_zero() {
        return Err(SwapError::rejected(source, "zero output"));
    }
    let naive = rescale(request.sell_amount, request.sell.decimals, request.buy.decimals);
    let floor = apply_bps(naive, min_output_bps);
    if buy_amount < floor {
        return Err(SwapError::rejected(
            source,
            format!("output {buy_amount} below floor {floor}"),
        ));
    }
    Ok(())
}

/// Turn a non-2xx reply into an error, keeping a bounded slice of the body.
pub(crate) async fn error_for_status(source: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let body: String = body.chars().take(300).collect();
    if status.is_server_error() || status.as_u16() == 429 {
        Err(SwapError::Transport(format!("{source} {status}: {body}")))
    } else {
        Err(SwapError::rejected(source, format!("{status}: {body}")))
    }
}
