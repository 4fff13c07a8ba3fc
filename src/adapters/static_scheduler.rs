//! Static-list scheduler: discovery from configuration, round-robin or
//! random balancing, optional TCP connect health checking, per-backend
//! counters.
//!
//! This is the in-crate implementation of the [`Scheduler`] port used by the
//! binary. Backends come from `discovery.static_list`; `healthcheck.kind =
//! "ping"` enables periodic connect probes with pass/fail thresholds.

use std::{
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicU8, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use eyre::Result;
use rand::Rng;
use tokio::{net::TcpStream, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::models::{BalanceStrategy, DiscoveryConfig, HealthcheckConfig},
    core::context::TcpContext,
    metrics,
    ports::{Backend, Scheduler, SchedulerError, SchedulerResult},
    utils::duration,
};

const HEALTH_STATUS_UNHEALTHY: u8 = 0;
const HEALTH_STATUS_HEALTHY: u8 = 1;

/// Trait defining the interface for balancing strategies.
///
/// A strategy is stateless or internally synchronized and can be shared
/// across threads; `select` runs once per admitted connection.
pub trait BalancingStrategy: Send + Sync + 'static {
    /// Select one backend from the eligible set
    fn select<'a>(&self, backends: &'a [Backend]) -> Option<&'a Backend>;
}

/// Round-robin balancing: an atomic counter cycling the index space.
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl BalancingStrategy for RoundRobinStrategy {
    fn select<'a>(&self, backends: &'a [Backend]) -> Option<&'a Backend> {
        if backends.is_empty() {
            return None;
        }
        let count = self.counter.fetch_add(1, Ordering::SeqCst);
        backends.get(count % backends.len())
    }
}

/// Uniform random selection.
pub struct RandomStrategy;

impl BalancingStrategy for RandomStrategy {
    fn select<'a>(&self, backends: &'a [Backend]) -> Option<&'a Backend> {
        if backends.is_empty() {
            return None;
        }
        let index = rand::rng().random_range(0..backends.len());
        backends.get(index)
    }
}

/// Create a balancing strategy from its configuration value
pub fn strategy_for(strategy: BalanceStrategy) -> Box<dyn BalancingStrategy> {
    match strategy {
        BalanceStrategy::RoundRobin => Box::new(RoundRobinStrategy::default()),
        BalanceStrategy::Random => Box::new(RandomStrategy),
    }
}

/// Runtime state tracked per backend
struct BackendState {
    active: AtomicU64,
    health: AtomicU8,
    consecutive_passes: AtomicU32,
    consecutive_fails: AtomicU32,
}

impl BackendState {
    fn new() -> Self {
        Self {
            active: AtomicU64::new(0),
            // Backends start healthy; probes demote them.
            health: AtomicU8::new(HEALTH_STATUS_HEALTHY),
            consecutive_passes: AtomicU32::new(0),
            consecutive_fails: AtomicU32::new(0),
        }
    }

    fn is_healthy(&self) -> bool {
        self.health.load(Ordering::Acquire) == HEALTH_STATUS_HEALTHY
    }
}

/// Scheduler over a fixed backend list.
pub struct StaticScheduler {
    name: String,
    backends: Vec<Backend>,
    states: Arc<scc::HashMap<String, Arc<BackendState>>>,
    strategy: Box<dyn BalancingStrategy>,
    healthcheck: HealthcheckConfig,
    shutdown: CancellationToken,
}

impl StaticScheduler {
    /// Build a scheduler from the listener's discovery / healthcheck /
    /// balance sections.
    pub fn new(
        name: impl Into<String>,
        discovery: &DiscoveryConfig,
        healthcheck: &HealthcheckConfig,
        balance: BalanceStrategy,
    ) -> SchedulerResult<Self> {
        if discovery.kind != "static" {
            return Err(SchedulerError::Internal(format!(
                "unsupported discovery kind '{}'",
                discovery.kind
            )));
        }

        let backends: Vec<Backend> = discovery
            .static_list
            .iter()
            .map(|endpoint| endpoint.parse())
            .collect::<Result<_, _>>()?;

        let states = Arc::new(scc::HashMap::new());
        for backend in &backends {
            let _ = states.insert_sync(backend.address(), Arc::new(BackendState::new()));
        }

        Ok(Self {
            name: name.into(),
            backends,
            states,
            strategy: strategy_for(balance),
            healthcheck: healthcheck.clone(),
            shutdown: CancellationToken::new(),
        })
    }

    fn state_of(&self, backend: &Backend) -> Option<Arc<BackendState>> {
        self.states
            .read_sync(&backend.address(), |_, state| Arc::clone(state))
    }

    fn healthy_backends(&self) -> Vec<Backend> {
        self.backends
            .iter()
            .filter(|backend| {
                self.state_of(backend)
                    .map(|state| state.is_healthy())
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }

    /// Periodic TCP connect probing with pass/fail thresholds.
    async fn probe_loop(
        name: String,
        backends: Vec<Backend>,
        states: Arc<scc::HashMap<String, Arc<BackendState>>>,
        cfg: HealthcheckConfig,
        shutdown: CancellationToken,
    ) {
        let interval = duration::parse_or(&cfg.interval, Duration::from_secs(10));
        let probe_timeout = duration::parse_or(&cfg.timeout, Duration::from_secs(2));

        info!(
            scheduler = %name,
            interval = ?interval,
            timeout = ?probe_timeout,
            "Health checker started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.cancelled() => {
                    debug!(scheduler = %name, "Health checker stopped");
                    return;
                }
            }

            for backend in &backends {
                let address = backend.address();
                let Some(state) = states.read_sync(&address, |_, s| Arc::clone(s)) else {
                    continue;
                };

                let reachable =
                    matches!(timeout(probe_timeout, TcpStream::connect(&address)).await, Ok(Ok(_)));

                if reachable {
                    state.consecutive_fails.store(0, Ordering::Release);
                    let passes = state.consecutive_passes.fetch_add(1, Ordering::AcqRel) + 1;
                    if !state.is_healthy() && passes >= cfg.passes {
                        state.health.store(HEALTH_STATUS_HEALTHY, Ordering::Release);
                        metrics::set_backend_health_status(&address, true);
                        info!(scheduler = %name, backend = %address, "Backend healthy");
                    }
                } else {
                    state.consecutive_passes.store(0, Ordering::Release);
                    let fails = state.consecutive_fails.fetch_add(1, Ordering::AcqRel) + 1;
                    if state.is_healthy() && fails >= cfg.fails {
                        state
                            .health
                            .store(HEALTH_STATUS_UNHEALTHY, Ordering::Release);
                        metrics::set_backend_health_status(&address, false);
                        warn!(scheduler = %name, backend = %address, "Backend unhealthy");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Scheduler for StaticScheduler {
    async fn start(&self) -> Result<()> {
        info!(
            scheduler = %self.name,
            backends = self.backends.len(),
            healthcheck = %self.healthcheck.kind,
            "Scheduler started"
        );

        match self.healthcheck.kind.as_str() {
            "none" => {}
            "ping" => {
                tokio::spawn(Self::probe_loop(
                    self.name.clone(),
                    self.backends.clone(),
                    Arc::clone(&self.states),
                    self.healthcheck.clone(),
                    self.shutdown.clone(),
                ));
            }
            other => {
                warn!(scheduler = %self.name, kind = %other, "Unknown healthcheck kind, probing disabled");
            }
        }
        Ok(())
    }

    fn stop(&self) {
        self.shutdown.cancel();
        debug!(scheduler = %self.name, "Scheduler stopped");
    }

    async fn take_backend(&self, ctx: &TcpContext) -> SchedulerResult<Backend> {
        let eligible = self.healthy_backends();
        self.strategy
            .select(&eligible)
            .cloned()
            .ok_or_else(|| SchedulerError::NoBackend {
                hostname: ctx.hostname.clone(),
            })
    }

    fn increment_connection(&self, backend: &Backend) {
        if let Some(state) = self.state_of(backend) {
            let active = state.active.fetch_add(1, Ordering::AcqRel) + 1;
            metrics::set_backend_connections(&backend.address(), active);
        }
    }

    fn decrement_connection(&self, backend: &Backend) {
        if let Some(state) = self.state_of(backend) {
            let previous = state.active.fetch_sub(1, Ordering::AcqRel);
            metrics::set_backend_connections(&backend.address(), previous.saturating_sub(1));
        }
    }

    fn increment_refused(&self, backend: &Backend) {
        metrics::increment_backend_refused(&backend.address());
    }

    fn increment_rx(&self, backend: &Backend, bytes: u64) {
        metrics::increment_backend_rx(&backend.address(), bytes);
    }

    fn increment_tx(&self, backend: &Backend, bytes: u64) {
        metrics::increment_backend_tx(&backend.address(), bytes);
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::TcpListener;

    use super::*;
    use crate::core::context::ClientConn;

    fn discovery(endpoints: &[&str]) -> DiscoveryConfig {
        DiscoveryConfig {
            kind: "static".to_string(),
            static_list: endpoints.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn ctx() -> TcpContext {
        let (io, _peer) = tokio::io::duplex(8);
        TcpContext {
            hostname: None,
            peer_addr: "127.0.0.1:50000".parse().unwrap(),
            conn: ClientConn::Plain(Box::new(io)),
        }
    }

    #[test]
    fn test_round_robin_strategy_cycles() {
        let strategy = RoundRobinStrategy::default();
        let backends = vec![
            Backend::new("10.0.0.1", 80),
            Backend::new("10.0.0.2", 80),
            Backend::new("10.0.0.3", 80),
        ];

        assert_eq!(strategy.select(&backends), Some(&backends[0]));
        assert_eq!(strategy.select(&backends), Some(&backends[1]));
        assert_eq!(strategy.select(&backends), Some(&backends[2]));
        assert_eq!(strategy.select(&backends), Some(&backends[0]));
    }

    #[test]
    fn test_strategies_handle_empty_set() {
        let backends: Vec<Backend> = vec![];
        assert!(RoundRobinStrategy::default().select(&backends).is_none());
        assert!(RandomStrategy.select(&backends).is_none());
    }

    #[test]
    fn test_random_strategy_picks_member() {
        let backends = vec![Backend::new("10.0.0.1", 80), Backend::new("10.0.0.2", 80)];
        let picked = RandomStrategy.select(&backends).expect("member");
        assert!(backends.contains(picked));
    }

    #[test]
    fn test_rejects_unknown_discovery_kind() {
        let mut cfg = discovery(&["127.0.0.1:9000"]);
        cfg.kind = "consul".to_string();
        assert!(StaticScheduler::new(
            "test",
            &cfg,
            &HealthcheckConfig::default(),
            BalanceStrategy::RoundRobin
        )
        .is_err());
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        assert!(StaticScheduler::new(
            "test",
            &discovery(&["no-port"]),
            &HealthcheckConfig::default(),
            BalanceStrategy::RoundRobin
        )
        .is_err());
    }

    #[tokio::test]
    async fn test_take_backend_round_robin() {
        let scheduler = StaticScheduler::new(
            "test",
            &discovery(&["127.0.0.1:9000", "127.0.0.1:9001"]),
            &HealthcheckConfig::default(),
            BalanceStrategy::RoundRobin,
        )
        .unwrap();

        let first = scheduler.take_backend(&ctx()).await.unwrap();
        let second = scheduler.take_backend(&ctx()).await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn test_ping_healthcheck_demotes_dead_backend() {
        // A listener we immediately drop: the port is closed afterwards.
        let dead = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_addr: SocketAddr = dead.local_addr().unwrap();
        drop(dead);

        let live = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live_addr = live.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = live.accept().await;
            }
        });

        let healthcheck = HealthcheckConfig {
            kind: "ping".to_string(),
            interval: "20ms".to_string(),
            timeout: "100ms".to_string(),
            fails: 1,
            passes: 1,
        };

        let scheduler = StaticScheduler::new(
            "test",
            &discovery(&[&dead_addr.to_string(), &live_addr.to_string()]),
            &healthcheck,
            BalanceStrategy::RoundRobin,
        )
        .unwrap();
        scheduler.start().await.unwrap();

        // Wait for the probe to demote the dead backend.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let eligible = scheduler.healthy_backends();
            if eligible.len() == 1 {
                assert_eq!(eligible[0].address(), live_addr.to_string());
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "dead backend was never demoted"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Selection only ever returns the live backend now.
        for _ in 0..4 {
            let backend = scheduler.take_backend(&ctx()).await.unwrap();
            assert_eq!(backend.address(), live_addr.to_string());
        }

        scheduler.stop();
    }

    #[tokio::test]
    async fn test_connection_counters_balance() {
        let scheduler = StaticScheduler::new(
            "test",
            &discovery(&["127.0.0.1:9000"]),
            &HealthcheckConfig::default(),
            BalanceStrategy::RoundRobin,
        )
        .unwrap();

        let backend = Backend::new("127.0.0.1", 9000);
        scheduler.increment_connection(&backend);
        scheduler.increment_connection(&backend);
        scheduler.decrement_connection(&backend);

        let state = scheduler.state_of(&backend).unwrap();
        assert_eq!(state.active.load(Ordering::Acquire), 1);
    }
}
