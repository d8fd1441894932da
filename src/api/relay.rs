use super::{check_min_output, error_for_status, parse_address, parse_calldata, parse_u256};
use crate::aggregator::QuoteSource;
use crate::chain::ApproveCall;
use crate::errors::{Result, SwapError};
use crate::models::{Quote, QuoteRequest};
use crate::utils::format_units;
use async_trait::async_trait;
use ethers::abi::AbiDecode;
use ethers::types::{Address, Bytes, U256};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub base_url: String,
    pub chain_id: u64,
    pub min_output_bps: u32,
}

/// Relay same-chain swap quotes.
pub struct RelayClient {
    http: reqwest::Client,
    config: RelayConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    #[serde(default)]
    steps: Vec<Step>,
    details: Option<Details>,
    buy_amount: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Step {
    id: Option<String>,
    kind: Option<String>,
    #[serde(default)]
    items: Vec<StepItem>,
}

#[derive(Debug, Deserialize)]
struct StepItem {
    data: Option<StepData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StepData {
    to: Option<String>,
    data: Option<String>,
    value: Option<Value>,
    #[serde(alias = "gas")]
    gas_limit: Option<Value>,
    min_out: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Details {
    currency_out: Option<CurrencyAmount>,
    output_amount: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct CurrencyAmount {
    amount: Option<Value>,
}

struct Executable {
    target: Address,
    calldata: Bytes,
    value: U256,
    gas: Option<U256>,
}

impl Step {
    fn is_transaction(&self) -> bool {
        self.kind.as_deref() == Some("transaction")
    }

    fn first_data(&self) -> Option<&StepData> {
        self.items.first().and_then(|i| i.data.as_ref())
    }
}

impl QuoteResponse {
    /// An approval step shows up as a transaction too; its calldata names the
    /// spender and it must not be mistaken for the swap itself.
    fn approval_spender(&self) -> Option<Address> {
        self.steps
            .iter()
            .filter(|s| s.is_transaction())
            .filter_map(|s| s.first_data())
            .filter_map(|d| parse_calldata(d.data.as_deref()))
            .find_map(|data| ApproveCall::decode(&data).ok())
            .map(|call| call.spender)
    }

    fn executable(&self) -> Option<Executable> {
        self.steps
            .iter()
            .filter(|s| s.is_transaction() && s.id.as_deref() != Some("approve"))
            .filter_map(|s| s.first_data())
            .find_map(|d| {
                let target = parse_address(d.to.as_deref())?;
                let calldata = parse_calldata(d.data.as_deref())?;
                if ApproveCall::decode(&calldata).is_ok() {
                    return None;
                }
                Some(Executable {
                    target,
                    calldata,
                    value: d.value.as_ref().and_then(parse_u256).unwrap_or_default(),
                    gas: d.gas_limit.as_ref().and_then(parse_u256).filter(|g| !g.is_zero()),
                })
            })
    }

    fn buy_amount(&self) -> U256 {
        let details = self.details.as_ref();
        details
            .and_then(|d| d.currency_out.as_ref())
            .and_then(|c| c.amount.as_ref())
            .and_then(parse_u256)
            .or_else(|| details.and_then(|d| d.output_amount.as_ref()).and_then(parse_u256))
            .or_else(|| self.buy_amount.as_ref().and_then(parse_u256))
            .or_else(|| {
                self.steps
                    .iter()
                    .find(|s| s.id.as_deref() == Some("swap"))
                    .and_then(Step::first_data)
                    .and_then(|d| d.min_out.as_ref())
                    .and_then(parse_u256)
            })
            .unwrap_or_default()
    }

    fn into_quote(self, source: &str, request: &QuoteRequest, min_output_bps: u32) -> Result<Quote> {
        let steps: Vec<String> = self
            .steps
            .iter()
            .map(|s| {
                format!(
                    "{}({})",
                    s.id.as_deref().unwrap_or("?"),
                    s.kind.as_deref().unwrap_or("?")
                )
            })
            .collect();
        debug!(steps = %steps.join(", "), "[QUOTE] relay steps");

        let tx = self
            .executable()
            .ok_or_else(|| SwapError::rejected(source, "no executable transaction step"))?;
        let buy_amount = self.buy_amount();
        check_min_output(source, request, buy_amount, min_output_bps)?;

        let spender = if request.sell.is_native() {
            None
        } else {
            Some(self.approval_spender().unwrap_or(tx.target))
        };

        Ok(Quote {
            source: source.to_string(),
            sell_token: request.sell.address,
            buy_token: request.buy.address,
            sell_amount: request.sell_amount,
            buy_amount,
            target: tx.target,
            calldata: tx.calldata,
            value: tx.value,
            gas_hint: tx.gas,
            gas_cost_usd: None,
            spender,
        })
    }
}

impl RelayClient {
    pub fn new(http: reqwest::Client, config: RelayConfig) -> Self {
        Self { http, config }
    }

    fn request_body(&self, request: &QuoteRequest) -> Value {
        let taker = format!("{:?}", request.taker);
        json!({
            "user": taker,
            "recipient": taker,
            "originChainId": self.config.chain_id,
            "destinationChainId": self.config.chain_id,
            "originCurrency": format!("{:?}", request.sell.address),
            "destinationCurrency": format!("{:?}", request.buy.address),
            "amount": request.sell_amount.to_string(),
            "tradeType": "EXACT_INPUT",
            "slippageTolerance": request.slippage_bps.to_string(),
            "enableTrueExactOutput": false,
            "explicitDeposit": false,
            "useExternalLiquidity": true,
            "useFallbacks": true,
            "disableOriginSwaps": false,
        })
    }
}

#[async_trait]
impl QuoteSource for RelayClient {
    fn name(&self) -> &str {
        "relay"
    }

    async fn quote(&self, request: &QuoteRequest) -> Result<Quote> {
        let url = format!("{}/quote", self.config.base_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .json(&self.request_body(request))
            .send()
            .await?;
        let body: QuoteResponse = error_for_status(self.name(), resp).await?.json().await?;
        let quote = body.into_quote(self.name(), request, self.config.min_output_bps)?;
        info!(
            out = %format_units(quote.buy_amount, request.buy.decimals),
            symbol = %request.buy.symbol,
            "[QUOTE] relay"
        );
        Ok(quote)
    }
}
