use super::{AllowanceCall, BalanceOfCall, ChainClient, RpcPool};
use crate::errors::{Result, SwapError};
use crate::models::{NATIVE_TOKEN, TxReceipt, TxRequest};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use ethers::{
    abi::{AbiDecode, AbiEncode},
    providers::{Http, Middleware, Provider, ProviderError},
    signers::{LocalWallet, Signer},
    types::{
        Address, BlockNumber, Bytes, Eip1559TransactionRequest, H256, TransactionReceipt,
        TransactionRequest, U64, U256, transaction::eip2718::TypedTransaction,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// JSON-RPC chain client: one ethers HTTP provider per endpoint behind an
/// [`RpcPool`], signing locally with a single wallet.
pub struct EvmClient {
    pool: RpcPool<Arc<Provider<Http>>>,
    wallet: LocalWallet,
    chain_id: u64,
    receipt_timeout: Duration,
}

impl EvmClient {
    pub fn new(
        rpc_urls: &[Url],
        wallet: LocalWallet,
        chain_id: u64,
        policy: RetryPolicy,
        receipt_timeout: Duration,
    ) -> Result<Self> {
        let pool = RpcPool::connect(rpc_urls, policy, |url| {
            Provider::<Http>::try_from(url.as_str()).map(Arc::new)
        });
        if pool.is_empty() {
            return Err(SwapError::Config("no usable RPC endpoints".into()));
        }
        info!(endpoints = pool.len(), chain_id, "[INIT] rpc pool ready");
        Ok(Self {
            pool,
            wallet: wallet.with_chain_id(chain_id),
            chain_id,
            receipt_timeout,
        })
    }

    fn attempts(&self) -> usize {
        self.pool.policy().max_attempts
    }

    fn call_request(&self, to: Address, data: Bytes) -> TypedTransaction {
        TransactionRequest::new()
            .from(self.address())
            .to(to)
            .data(data)
            .into()
    }

    /// Single-word view call. The reply is decoded per endpoint so a node
    /// answering garbage is failed over like an unreachable one.
    async fn read_u256(&self, to: Address, data: Vec<u8>) -> Result<U256> {
        let tx = self.call_request(to, Bytes::from(data));
        self.pool
            .with_failover(
                |p| {
                    let tx = tx.clone();
                    async move { decode_word(p.call(&tx, None).await?) }
                },
                self.attempts(),
            )
            .await
    }

    async fn broadcast(&self, raw: Bytes, hash: H256) -> Result<H256> {
        let mut sends = 0usize;
        self.pool
            .with_failover(
                |p| {
                    sends += 1;
                    let resend = sends > 1;
                    let raw = raw.clone();
                    async move {
                        match p.send_raw_transaction(raw).await {
                            Ok(pending) => Ok(pending.tx_hash()),
                            Err(e) if already_broadcast(&e, resend) => {
                                debug!(?hash, error = %e, "[SWAP] node already has transaction");
                                Ok(hash)
                            }
                            Err(e) => Err(e.into()),
                        }
                    }
                },
                self.attempts(),
            )
            .await
    }

    async fn await_receipt(&self, hash: H256) -> Result<TransactionReceipt> {
        loop {
            let receipt = self
                .pool
                .with_failover(
                    |p| async move { Ok(p.get_transaction_receipt(hash).await?) },
                    self.attempts(),
                )
                .await?;
            match receipt {
                Some(r) => return Ok(r),
                None => tokio::time::sleep(RECEIPT_POLL_INTERVAL).await,
            }
        }
    }
}

fn decode_word(out: Bytes) -> Result<U256> {
    U256::decode(&out).map_err(|e| SwapError::Transport(format!("malformed eth_call reply {out}: {e}")))
}

/// A resend of identical signed bytes is reported differently by each client.
fn already_broadcast(err: &ProviderError, resend: bool) -> bool {
    let msg = err.to_string().to_lowercase();
    msg.contains("already known")
        || msg.contains("known transaction")
        || msg.contains("already imported")
        || (resend && msg.contains("nonce too low"))
}

#[async_trait]
impl ChainClient for EvmClient {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn token_balance(&self, token: Address) -> Result<U256> {
        let owner = self.address();
        if token == NATIVE_TOKEN {
            return self
                .pool
                .with_failover(
                    |p| async move { Ok(p.get_balance(owner, None).await?) },
                    self.attempts(),
                )
                .await;
        }
        self.read_u256(token, BalanceOfCall { account: owner }.encode())
            .await
    }

    async fn allowance(&self, token: Address, spender: Address) -> Result<U256> {
        let owner = self.address();
        self.read_u256(token, AllowanceCall { owner, spender }.encode())
            .await
    }

    async fn gas_price(&self) -> Result<U256> {
        self.pool
            .with_failover(
                |p| async move { Ok(p.get_gas_price().await?) },
                self.attempts(),
            )
            .await
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx = self.call_request(to, data);
        self.pool
            .with_failover(
                |p| {
                    let tx = tx.clone();
                    async move { Ok(p.call(&tx, None).await?) }
                },
                self.attempts(),
            )
            .await
    }

    async fn send_transaction(&self, req: TxRequest) -> Result<TxReceipt> {
        let from = self.address();
        let nonce = self
            .pool
            .with_failover(
                |p| async move {
                    Ok(p
                        .get_transaction_count(from, Some(BlockNumber::Pending.into()))
                        .await?)
                },
                self.attempts(),
            )
            .await?;
        let (max_fee, priority_fee) = self
            .pool
            .with_failover(
                |p| async move { Ok(p.estimate_eip1559_fees(None).await?) },
                self.attempts(),
            )
            .await?;

        let tx: TypedTransaction = Eip1559TransactionRequest::new()
            .from(from)
            .to(req.to)
            .data(req.data)
            .value(req.value)
            .gas(req.gas_limit)
            .nonce(nonce)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(priority_fee)
            .chain_id(self.chain_id)
            .into();

        // Signed once so every failover attempt rebroadcasts the same bytes.
        let signature = self.wallet.sign_transaction(&tx).await?;
        let raw = tx.rlp_signed(&signature);
        let hash = tx.hash(&signature);

        let sent = self.broadcast(raw, hash).await?;
        info!(hash = ?sent, %nonce, "[SWAP] transaction sent");

        let receipt = tokio::time::timeout(self.receipt_timeout, self.await_receipt(sent))
            .await
            .map_err(|_| SwapError::Timeout(format!("receipt for {sent:?}")))??;

        let success = receipt.status == Some(U64::from(1));
        info!(hash = ?sent, success, block = ?receipt.block_number, "[SWAP] transaction mined");
        Ok(TxReceipt {
            hash: receipt.transaction_hash,
            success,
            block_number: receipt.block_number.map(|b| b.as_u64()),
            gas_used: receipt.gas_used,
        })
    }
}
