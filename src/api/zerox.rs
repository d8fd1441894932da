use super::{check_min_output, error_for_status, parse_address, parse_calldata, parse_u256};
use crate::aggregator::QuoteSource;
use crate::errors::{Result, SwapError};
use crate::models::{Quote, QuoteRequest};
use crate::utils::format_units;
use async_trait::async_trait;
use ethers::types::U256;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct ZeroXConfig {
    pub base_url: String,
    pub api_key: String,
    pub chain_id: u64,
    pub min_output_bps: u32,
}

/// 0x Swap API (allowance-holder flow).
pub struct ZeroXClient {
    http: reqwest::Client,
    config: ZeroXConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    buy_amount: Option<Value>,
    liquidity_available: Option<bool>,
    transaction: Option<TransactionFields>,
    // Older response shape carries the transaction at top level.
    to: Option<String>,
    data: Option<String>,
    value: Option<Value>,
    gas: Option<Value>,
    allowance_target: Option<String>,
    issues: Option<Issues>,
    validation: Option<Validation>,
}

#[derive(Debug, Deserialize)]
struct TransactionFields {
    to: Option<String>,
    data: Option<String>,
    value: Option<Value>,
    gas: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Issues {
    allowance: Option<AllowanceIssue>,
}

#[derive(Debug, Deserialize)]
struct AllowanceIssue {
    spender: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Validation {
    errors: Option<Value>,
}

impl ZeroXClient {
    pub fn new(http: reqwest::Client, config: ZeroXConfig) -> Self {
        Self { http, config }
    }

    fn quote_url(&self) -> String {
        format!(
            "{}/swap/allowance-holder/quote",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

impl QuoteResponse {
    fn into_quote(self, source: &str, request: &QuoteRequest, min_output_bps: u32) -> Result<Quote> {
        if let Some(errors) = self.validation.and_then(|v| v.errors) {
            let has_errors = match &errors {
                Value::Array(a) => !a.is_empty(),
                Value::Object(o) => !o.is_empty(),
                Value::Null => false,
                _ => true,
            };
            if has_errors {
                return Err(SwapError::rejected(source, format!("validation errors: {errors}")));
            }
        }
        if self.liquidity_available == Some(false) {
            return Err(SwapError::rejected(source, "no liquidity"));
        }

        let (to, data, value, gas) = match self.transaction {
            Some(tx) => (tx.to, tx.data, tx.value, tx.gas),
            None => (self.to, self.data, self.value, self.gas),
        };
        let target = parse_address(to.as_deref())
            .ok_or_else(|| SwapError::rejected(source, "missing transaction target"))?;
        let calldata = parse_calldata(data.as_deref())
            .ok_or_else(|| SwapError::rejected(source, "missing transaction data"))?;
        let buy_amount = self
            .buy_amount
            .as_ref()
            .and_then(parse_u256)
            .unwrap_or_default();
        check_min_output(source, request, buy_amount, min_output_bps)?;

        let spender = if request.sell.is_native() {
            None
        } else {
            parse_address(self.allowance_target.as_deref())
                .or_else(|| {
                    self.issues
                        .and_then(|i| i.allowance)
                        .and_then(|a| parse_address(a.spender.as_deref()))
                })
                .or(Some(target))
        };

        Ok(Quote {
            source: source.to_string(),
            sell_token: request.sell.address,
            buy_token: request.buy.address,
            sell_amount: request.sell_amount,
            buy_amount,
            target,
            calldata,
            value: value.as_ref().and_then(parse_u256).unwrap_or_default(),
            gas_hint: gas.as_ref().and_then(parse_u256).filter(|g| !g.is_zero()),
            gas_cost_usd: None,
            spender,
        })
    }
}

#[async_trait]
impl QuoteSource for ZeroXClient {
    fn name(&self) -> &str {
        "0x"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let url = self.quote_url();
        debug!(%url, "[QUOTE] 0x request");
        let resp = self
            .http
            .get(&url)
            .header("0x-api-key", &self.config.api_key)
            .header("0x-version", "v2")
            .query(&[
                ("chainId", self.config.chain_id.to_string()),
                ("sellToken", format!("{:?}", request.sell.address)),
                ("buyToken", format!("{:?}", request.buy.address)),
                ("sellAmount", request.sell_amount.to_string()),
                ("taker", format!("{:?}", request.taker)),
                ("slippageBps", request.slippage_bps.to_string()),
            ])
            .send()
            .await?;
        let body: QuoteResponse = error_for_status(self.name(), resp).await?.json().await?;
        let quote = body.into_quote(self.name(), request, self.config.min_output_bps)?;
        info!(
            out = %format_units(quote.buy_amount, request.buy.decimals),
            symbol = %request.buy.symbol,
            "[QUOTE] 0x"
        );
        Ok(quote)
    }
}

#[cfg(test)]
fn parse(raw: &str, request: &QuoteRequest) -> Result<Quote> {
    let resp: QuoteResponse = serde_json::from_str(raw)?;
    resp.into_quote("0x", request, 9_500)
}
