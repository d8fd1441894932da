use anyhow::{Context, Result};
use ethers::signers::LocalWallet;
use std::sync::Arc;
use swap_alternator::{
    aggregator::{QuoteAggregator, QuoteSource},
    api::{self, RelayClient, ZeroXClient},
    approvals::ApprovalManager,
    chain::{ChainClient, EvmClient},
    config::AppConfig,
    dex::{PoolPriceOracle, UniswapQuoter},
    engine::{Scheduler, SchedulerExit, SwapOrchestrator},
    executor::SwapExecutor,
    models::SwapCycleState,
    oracle::PriceOracle,
    utils,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    utils::init_logging();

    let config = AppConfig::from_env().context("loading configuration")?;
    let wallet: LocalWallet = std::env::var("PRIVATE_KEY")
        .context("Set PRIVATE_KEY to the signing key of the trading wallet")?
        .trim()
        .parse()
        .context("PRIVATE_KEY is not a valid secp256k1 key")?;

    let chain: Arc<dyn ChainClient> = Arc::new(EvmClient::new(
        &config.rpc_urls,
        wallet,
        config.chain_id,
        config.rpc_retry,
        config.receipt_timeout,
    )?);
    tracing::info!(
        wallet = ?chain.address(),
        chain_id = config.chain_id,
        pair = %format!("{}/{}", config.orchestrator.pair.base.symbol, config.orchestrator.pair.quote.symbol),
        "[INIT] swap-alternator starting"
    );

    // Priority order: on-chain pool, Relay, then 0x when a key is present.
    let http = api::http_client(config.aggregator.source_timeout)?;
    let mut sources: Vec<Arc<dyn QuoteSource>> = vec![
        Arc::new(UniswapQuoter::new(chain.clone(), config.uniswap.clone())),
        Arc::new(RelayClient::new(http.clone(), config.relay.clone())),
    ];
    match &config.zerox {
        Some(zerox) => sources.push(Arc::new(ZeroXClient::new(http.clone(), zerox.clone()))),
        None => tracing::info!("[INIT] ZEROX_API_KEY not set, 0x source disabled"),
    }

    let oracle: Arc<dyn PriceOracle> = match &config.price_pool {
        Some(pool) => Arc::new(PoolPriceOracle::new(
            chain.clone(),
            pool.address,
            pool.native_is_token0,
            pool.token0_decimals,
            pool.token1_decimals,
            config.prices.clone(),
        )),
        None => Arc::new(config.prices.clone()),
    };

    let aggregator = QuoteAggregator::new(sources, oracle, config.aggregator.clone());
    tracing::info!(
        sources = ?aggregator.source_names(),
        fan_out = ?config.aggregator.fan_out,
        "[INIT] quote sources ready"
    );

    let orchestrator = Arc::new(SwapOrchestrator::new(
        chain.clone(),
        aggregator,
        ApprovalManager::new(
            chain.clone(),
            config.approval_multiplier,
            config.executor.default_gas_units,
        ),
        SwapExecutor::new(chain.clone(), config.executor.clone()),
        config.orchestrator.clone(),
    ));

    let state = SwapCycleState::default();
    match orchestrator.stats(&state).await {
        Ok(stats) => tracing::info!(%stats, "[INIT] starting balances"),
        Err(e) => tracing::warn!(error = %e, "[INIT] could not read starting balances"),
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[SCHED] Ctrl-C received, stopping after the current cycle");
            let _ = stop_tx.send(true);
        }
    });

    let mut scheduler = Scheduler::new(orchestrator, config.scheduler.clone(), state);
    match scheduler.run(stop_rx).await {
        SchedulerExit::Shutdown { swaps } => {
            tracing::info!(swaps, "[SCHED] shut down cleanly");
            Ok(())
        }
        SchedulerExit::TooManyFailures {
            consecutive,
            last_error,
        } => anyhow::bail!("halted after {consecutive} consecutive failures: {last_error}"),
    }
}
