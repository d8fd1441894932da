use super::orchestrator::SwapOrchestrator;
use crate::models::SwapCycleState;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause after a successful cycle.
    pub interval: Duration,
    /// Pause after a failed cycle.
    pub error_delay: Duration,
    pub max_consecutive_failures: u32,
}

/// Why the scheduler stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerExit {
    Shutdown { swaps: u64 },
    TooManyFailures { consecutive: u32, last_error: String },
}

/// Runs cycles back to back, never two at once. Owns the cycle state.
pub struct Scheduler {
    orchestrator: Arc<SwapOrchestrator>,
    config: SchedulerConfig,
    state: SwapCycleState,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<SwapOrchestrator>,
        config: SchedulerConfig,
        state: SwapCycleState,
    ) -> Self {
        Self {
            orchestrator,
            config,
            state,
        }
    }

    pub fn state(&self) -> &SwapCycleState {
        &self.state
    }

    /// Loop until `shutdown` flips to true or failures pile up. A running
    /// cycle is always allowed to finish.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> SchedulerExit {
        let mut consecutive = 0u32;
        info!(
            interval = ?self.config.interval,
            max_failures = self.config.max_consecutive_failures,
            "[SCHED] started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let delay = match self.orchestrator.run_cycle(&mut self.state).await {
                Ok(report) => {
                    consecutive = 0;
                    match self.orchestrator.stats(&self.state).await {
                        Ok(stats) => info!(%stats, "[SCHED] swap #{} done", report.swap_number),
                        Err(e) => warn!(error = %e, "[SCHED] stats unavailable"),
                    }
                    self.config.interval
                }
                Err(e) => {
                    consecutive += 1;
                    warn!(
                        consecutive,
                        max = self.config.max_consecutive_failures,
                        error = %e,
                        "[SCHED] cycle failed"
                    );
                    if consecutive >= self.config.max_consecutive_failures {
                        error!(consecutive, "[SCHED] too many consecutive failures, halting");
                        return SchedulerExit::TooManyFailures {
                            consecutive,
                            last_error: e.to_string(),
                        };
                    }
                    self.config.error_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    // A dropped sender also means stop.
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(swaps = self.state.swap_count, "[SCHED] stopped");
        SchedulerExit::Shutdown {
            swaps: self.state.swap_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{AggregatorConfig, FanOut, QuoteAggregator, QuoteSource};
    use crate::approvals::ApprovalManager;
    use crate::engine::{AmountPolicy, OrchestratorConfig};
    use crate::executor::{ExecutorConfig, SwapExecutor};
    use crate::models::SwapDirection;
    use crate::retry::RetryPolicy;
    use crate::testing::{MockChain, MockSource, pair, test_oracle, usdc, usdt};
    use bigdecimal::BigDecimal;
    use ethers::types::U256;
    use std::str::FromStr;

    fn orchestrator(source: Arc<MockSource>) -> Arc<SwapOrchestrator> {
        let chain = Arc::new(
            MockChain::new()
                .with_balance(usdt().address, U256::from(101_010_102u64))
                .with_balance(usdc().address, U256::from(5_000_000u64)),
        );
        let aggregator = QuoteAggregator::new(
            vec![source as Arc<dyn QuoteSource>],
            Arc::new(test_oracle()),
            AggregatorConfig {
                fan_out: FanOut::SequentialPriority,
                source_timeout: Duration::from_secs(5),
                retry: RetryPolicy::fixed(1, Duration::from_millis(10)),
                min_output_bps: 9_000,
                default_gas_units: 300_000,
                gas_multiplier: 1.0,
            },
        );
        Arc::new(SwapOrchestrator::new(
            chain.clone(),
            aggregator,
            ApprovalManager::new(chain.clone(), 2, U256::from(100_000u64)),
            SwapExecutor::new(
                chain.clone(),
                ExecutorConfig {
                    default_gas_units: U256::from(300_000u64),
                    gas_multiplier: 1.2,
                    gas_ceiling: U256::from(1_000_000u64),
                    settle_delay: Duration::from_secs(5),
                },
            ),
            OrchestratorConfig {
                pair: pair(),
                amount: AmountPolicy::BalanceFraction { bps: 9_900 },
                min_amount: BigDecimal::from_str("0.1").unwrap(),
                slippage_bps: 100,
            },
        ))
    }

    fn config(max_consecutive_failures: u32) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(30),
            error_delay: Duration::from_secs(10),
            max_consecutive_failures,
        }
    }

    fn stop_after(delay: Duration) -> watch::Receiver<bool> {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(true);
            // Keep the sender alive until the scheduler has seen the flag.
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn halts_after_consecutive_failures() {
        let mut scheduler = Scheduler::new(
            orchestrator(MockSource::failing("down")),
            config(3),
            SwapCycleState::default(),
        );
        let exit = scheduler.run(stop_after(Duration::from_secs(3600))).await;
        assert!(matches!(
            exit,
            SchedulerExit::TooManyFailures { consecutive: 3, .. }
        ));
        assert_eq!(scheduler.state().swap_count, 0);
        assert_eq!(scheduler.state().direction, SwapDirection::BaseToQuote);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_between_cycles_on_shutdown() {
        let source = MockSource::ok("src", U256::from(99_500_000u64), 150_000);
        let mut scheduler = Scheduler::new(orchestrator(source), config(5), SwapCycleState::default());
        let exit = scheduler.run(stop_after(Duration::from_secs(45))).await;
        assert_eq!(exit, SchedulerExit::Shutdown { swaps: 2 });
        assert_eq!(scheduler.state().direction, SwapDirection::BaseToQuote);
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_streak() {
        // Two outages, then healthy; a limit of three is never reached.
        let source = MockSource::ok("src", U256::from(99_500_000u64), 150_000).failing_first(2);
        let mut scheduler = Scheduler::new(orchestrator(source), config(3), SwapCycleState::default());
        let exit = scheduler.run(stop_after(Duration::from_secs(60))).await;
        assert!(matches!(exit, SchedulerExit::Shutdown { swaps } if swaps >= 1));
    }

    #[tokio::test(start_paused = true)]
    async fn already_signalled_runs_nothing() {
        let (tx, rx) = watch::channel(true);
        let source = MockSource::ok("src", U256::from(99_500_000u64), 150_000);
        let mut scheduler = Scheduler::new(orchestrator(source.clone()), config(5), SwapCycleState::default());
        let exit = scheduler.run(rx).await;
        drop(tx);
        assert_eq!(exit, SchedulerExit::Shutdown { swaps: 0 });
        assert_eq!(source.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
