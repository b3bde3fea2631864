//! Follower refresh loop
//!
//! A follower zone periodically pulls the leader's full rule dump and swaps
//! its live store in one step. A failed cycle leaves the previous rules in
//! place and is retried on the next tick.

use super::dump::AclDump;
use super::manager::AclManager;
use crate::error::{Result, RustAclError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Where a follower reads the leader's dump from
#[async_trait]
pub trait DumpSource: Send + Sync {
    async fn fetch_dump(&self) -> Result<String>;
}

/// Dump published by the leader as a file on shared storage
#[derive(Debug, Clone)]
pub struct FileDumpSource {
    path: PathBuf,
}

impl FileDumpSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DumpSource for FileDumpSource {
    async fn fetch_dump(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            RustAclError::Refresh(format!("cannot read dump {}: {}", self.path.display(), e))
        })
    }
}

/// Outcome of recent refresh cycles
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshHealth {
    /// Cycles run, successful or not
    pub cycles: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    /// Rules installed by the last successful cycle
    pub rules: usize,
    /// Start of the cycle currently fetching, if any
    pub in_flight_since: Option<DateTime<Utc>>,
    /// Refresh period the loop runs at
    pub period: Duration,
}

impl RefreshHealth {
    fn new(period: Duration) -> Self {
        Self {
            period,
            ..Default::default()
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.last_success.is_some() && self.consecutive_failures == 0 && !self.is_stalled()
    }

    /// A cycle has been in flight for longer than one period
    pub fn is_stalled(&self) -> bool {
        self.in_flight_since
            .and_then(|started| (Utc::now() - started).to_std().ok())
            .map_or(false, |elapsed| elapsed > self.period)
    }

    fn record_start(&mut self) {
        self.in_flight_since = Some(Utc::now());
    }

    fn record_success(&mut self, rules: usize) {
        self.in_flight_since = None;
        self.cycles += 1;
        self.last_success = Some(Utc::now());
        self.last_error = None;
        self.consecutive_failures = 0;
        self.rules = rules;
    }

    fn record_failure(&mut self, error: &RustAclError) -> u32 {
        self.in_flight_since = None;
        self.cycles += 1;
        self.last_failure = Some(Utc::now());
        self.last_error = Some(error.to_string());
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_failures
    }
}

/// One fetch, parse, validate and swap cycle
pub async fn refresh_once(manager: &AclManager, source: &dyn DumpSource) -> Result<usize> {
    let content = source.fetch_dump().await?;
    let dump = AclDump::from_json(&content)?;
    let rules = dump.to_rules()?;
    manager
        .replace_rules(rules)
        .map_err(|e| RustAclError::Refresh(format!("dump from zone {} rejected: {}", dump.zone_id, e)))
}

/// Background task refreshing a follower's rules
pub struct AclRefresher {
    health: Arc<RwLock<RefreshHealth>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl AclRefresher {
    /// Start refreshing every `period`. The first cycle runs immediately.
    pub fn spawn(manager: Arc<AclManager>, source: Arc<dyn DumpSource>, period: Duration) -> Self {
        let health = Arc::new(RwLock::new(RefreshHealth::new(period)));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let handle = tokio::spawn(Self::refresh_task(
            manager,
            source,
            period,
            health.clone(),
            shutdown_rx,
        ));

        Self {
            health,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn health(&self) -> RefreshHealth {
        self.health.read().clone()
    }

    /// Stop the loop and wait for it. An in-flight fetch is abandoned.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("ACL refresh task ended abnormally: {}", e);
            }
        }
    }

    async fn refresh_task(
        manager: Arc<AclManager>,
        source: Arc<dyn DumpSource>,
        period: Duration,
        health: Arc<RwLock<RefreshHealth>>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("ACL refresh started for zone {} every {:?}", manager.zone_id(), period);

        'refresh: loop {
            tokio::select! {
                _ = &mut shutdown_rx => break,
                _ = ticker.tick() => {
                    let started = Instant::now();
                    health.write().record_start();

                    let cycle = refresh_once(&manager, source.as_ref());
                    tokio::pin!(cycle);
                    let mut watchdog = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

                    let result = loop {
                        tokio::select! {
                            result = &mut cycle => break result,
                            _ = watchdog.tick() => {
                                warn!(
                                    "ACL refresh still in flight after {:?}, longer than its {:?} period",
                                    started.elapsed(),
                                    period
                                );
                            }
                            _ = &mut shutdown_rx => break 'refresh,
                        }
                    };

                    let elapsed = started.elapsed();
                    match result {
                        Ok(count) => {
                            manager.metrics().refresh_success.inc();
                            health.write().record_success(count);
                            debug!("ACL refresh installed {} rules in {:?}", count, elapsed);
                        }
                        Err(e) => {
                            manager.metrics().refresh_failure.inc();
                            let failures = health.write().record_failure(&e);
                            warn!(
                                "ACL refresh failed ({} in a row), keeping previous rules: {}",
                                failures, e
                            );
                        }
                    }

                    if elapsed > period {
                        warn!("ACL refresh took {:?}, longer than its {:?} period", elapsed, period);
                    }
                }
            }
        }

        info!("ACL refresh stopped for zone {}", manager.zone_id());
    }
}
