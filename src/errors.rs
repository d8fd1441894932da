use ethers::providers::{ProviderError, RpcError};
use ethers::types::{H256, U256};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SwapError>;

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("Configuration error: {0}")]
    Config(String),

    /// Node or network unreachable. The RPC pool fails over on this.
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("No healthy RPC endpoint available")]
    NoHealthyEndpoint,

    /// A single source produced nothing usable. Never fatal to a cycle on its own.
    #[error("Quote rejected by {source_name}: {reason}")]
    QuoteRejected { source_name: String, reason: String },

    #[error("No quotes available from any source")]
    NoQuotesAvailable,

    #[error("Insufficient {symbol} balance. Have: {available}, need: {required}")]
    InsufficientBalance {
        symbol: String,
        available: String,
        required: String,
    },

    #[error("Approval of {token:?} for spender {spender:?} failed: {reason}")]
    ApprovalFailed {
        token: ethers::types::Address,
        spender: ethers::types::Address,
        reason: String,
    },

    #[error("Transaction {hash:?} reverted")]
    TransactionReverted { hash: H256 },

    #[error("Execution reverted: {0}")]
    CallReverted(String),

    /// No usable USD price at scoring time.
    #[error("Price unavailable: {0}")]
    PriceUnavailable(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Signing error: {0}")]
    Signing(#[from] ethers::signers::WalletError),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Amount {0} does not fit the token's units")]
    Amount(String),
}

impl SwapError {
    /// Errors worth retrying against the same or another backend.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SwapError::Transport(_) | SwapError::Http(_) | SwapError::Timeout(_)
        )
    }

    pub fn rejected(source_name: impl Into<String>, reason: impl Into<String>) -> Self {
        SwapError::QuoteRejected {
            source_name: source_name.into(),
            reason: reason.into(),
        }
    }

    pub fn insufficient(symbol: &str, available: U256, required: U256) -> Self {
        SwapError::InsufficientBalance {
            symbol: symbol.to_string(),
            available: available.to_string(),
            required: required.to_string(),
        }
    }
}

impl From<ProviderError> for SwapError {
    // Rate limits, malformed replies and dropped connections all count as the
    // endpoint's fault. Only an execution revert is the call's fault.
    fn from(err: ProviderError) -> Self {
        match err.as_error_response() {
            Some(resp) if resp.message.to_lowercase().contains("revert") => {
                SwapError::CallReverted(resp.message.clone())
            }
            _ => SwapError::Transport(err.to_string()),
        }
    }
}

impl From<ethers::abi::AbiError> for SwapError {
    fn from(err: ethers::abi::AbiError) -> Self {
        SwapError::Abi(err.to_string())
    }
}

impl From<ethers::abi::Error> for SwapError {
    fn from(err: ethers::abi::Error) -> Self {
        SwapError::Abi(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::{HttpClientError, JsonRpcError};

    #[test]
    fn transport_classification() {
        assert!(SwapError::Transport("down".into()).is_transport());
        assert!(SwapError::Timeout("slow".into()).is_transport());
        assert!(!SwapError::NoQuotesAvailable.is_transport());
        assert!(!SwapError::CallReverted("boom".into()).is_transport());
        assert!(!SwapError::NoHealthyEndpoint.is_transport());
    }

    fn rpc_error(code: i64, message: &str) -> ProviderError {
        ProviderError::JsonRpcClientError(Box::new(HttpClientError::JsonRpcError(
            JsonRpcError {
                code,
                message: message.to_string(),
                data: None,
            },
        )))
    }

    #[test]
    fn provider_errors_split_into_revert_and_transport() {
        let reverted = SwapError::from(rpc_error(3, "execution reverted: STF"));
        assert!(matches!(reverted, SwapError::CallReverted(ref m) if m.contains("STF")));
        assert!(!reverted.is_transport());

        let limited = SwapError::from(rpc_error(-32005, "rate limit exceeded"));
        assert!(matches!(limited, SwapError::Transport(_)));

        let dropped = SwapError::from(ProviderError::CustomError("connection reset".into()));
        assert!(dropped.is_transport());
    }

    #[test]
    fn insufficient_balance_message() {
        let err = SwapError::insufficient("USDC", U256::from(5u64), U256::from(10u64));
        assert_eq!(
            err.to_string(),
            "Insufficient USDC balance. Have: 5, need: 10"
        );
    }
}
