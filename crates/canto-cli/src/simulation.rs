//! In-process simulation harness.

use async_trait::async_trait;
use canto_core::events::RECONNECTED;
use canto_core::ports::{ArtifactBuilder, DataSource};
use canto_core::{Address, Error, Event, Payload, Result, Scope};
use canto_engine::{EngineConfig, Level2, Presenter, Session, SessionStats};
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Systems per page in the simulated score.
const SYSTEMS_PER_PAGE: u32 = 8;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    pub addresses: u32,
    pub events: u32,
    pub viewport: u32,
    pub failure_rate: f64,
    pub latency_ms: u64,
    pub reconnect: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub elapsed_ms: u64,
    pub fetch_calls: u64,
    pub repaints: u64,
    pub settled: bool,
    pub stats: SessionStats,
}

/// Data source that answers after a fixed latency and fails at random.
pub struct SimulatedSource {
    failure_rate: f64,
    latency: Duration,
    calls: AtomicU64,
}

impl SimulatedSource {
    pub fn new(failure_rate: f64, latency: Duration) -> Self {
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DataSource for SimulatedSource {
    async fn fetch(&self, address: &Address) -> Result<Payload> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let fail = rand::thread_rng().gen_bool(self.failure_rate);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if fail {
            return Err(Error::Network(format!("simulated failure for {}", address)));
        }
        Ok(Payload::from(format!("engraving of {}", address).as_str()))
    }
}

/// Builds a display string from the payload.
pub struct TextBuilder;

impl ArtifactBuilder for TextBuilder {
    type Artifact = String;

    fn build(&self, _address: &Address, payload: &Payload) -> Result<String> {
        Ok(String::from_utf8_lossy(payload).into_owned())
    }
}

/// Presenter that rebuilds on every repaint and counts them.
#[derive(Clone, Default)]
pub struct CountingPresenter {
    repaints: Arc<AtomicU64>,
}

impl CountingPresenter {
    pub fn repaints(&self) -> u64 {
        self.repaints.load(Ordering::Relaxed)
    }
}

impl Presenter<String> for CountingPresenter {
    fn repaint(&mut self, address: &Address, level2: &mut Level2<'_, String>) {
        self.repaints.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = level2.lookup_or_build(address) {
            debug!(%address, error = %e, "Repaint without artifact");
        }
    }
}

fn address_for(index: u32) -> Result<Address> {
    Address::root(0)
        .child(index / SYSTEMS_PER_PAGE)?
        .child(index % SYSTEMS_PER_PAGE)
}

/// Run one simulated session to completion.
pub async fn run(config: EngineConfig, options: SimulationOptions) -> Result<SimulationReport> {
    let started = Instant::now();
    let source = Arc::new(SimulatedSource::new(
        options.failure_rate,
        Duration::from_millis(options.latency_ms),
    ));
    let presenter = CountingPresenter::default();
    let notifier = canto_notify::create_notifier(&config.notifiers);
    let session = Session::start(
        config,
        source.clone(),
        TextBuilder,
        presenter.clone(),
        notifier,
    )
    .await?;

    let count = options.addresses.max(1);
    let viewport: Vec<Address> = (0..options.viewport.min(count))
        .map(address_for)
        .collect::<Result<_>>()?;
    session.set_viewport(viewport.iter().cloned());
    for address in &viewport {
        session.reference(address);
    }

    info!(events = options.events, addresses = count, "Pushing events");
    for n in 0..options.events {
        let address = address_for(rand::thread_rng().gen_range(0..count))?;
        let event = if n % 5 == 4 {
            Event::new("cursor.moved", Some(Scope::single(address)))
        } else {
            Event::invalidated(address)
        };
        session.submit(event).await?;

        if options.reconnect && n == options.events / 2 {
            session.submit(Event::new(RECONNECTED, None)).await?;
        }
        if n % 10 == 9 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    let settled = settle(&session).await?;
    let stats = session.stats().await?;
    session.close().await;

    Ok(SimulationReport {
        elapsed_ms: started.elapsed().as_millis() as u64,
        fetch_calls: source.calls(),
        repaints: presenter.repaints(),
        settled,
        stats,
    })
}

/// Wait for open windows to flush and for all fetch work to finish.
async fn settle(session: &Session<String>) -> Result<bool> {
    tokio::time::sleep(Duration::from_millis(150)).await;
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while Instant::now() < deadline {
        let stats = session.stats().await?;
        if stats.pending_fetches == 0 && stats.level1.fetching == 0 {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_config() -> EngineConfig {
        EngineConfig {
            backoff_base_ms: 1,
            backoff_cap_ms: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_address_layout() {
        assert_eq!(address_for(0).unwrap().to_string(), "layout:0/page:0/system:0");
        assert_eq!(address_for(17).unwrap().to_string(), "layout:0/page:2/system:1");
    }

    #[tokio::test]
    async fn test_simulation_without_failures_settles() {
        let report = run(
            fast_config(),
            SimulationOptions {
                addresses: 16,
                events: 40,
                viewport: 4,
                failure_rate: 0.0,
                latency_ms: 0,
                reconnect: true,
            },
        )
        .await
        .unwrap();

        assert!(report.settled);
        assert_eq!(report.stats.level1.error, 0);
        assert_eq!(report.stats.scheduler.exhausted, 0);
        assert!(report.stats.scheduler.succeeded > 0);
        assert!(report.stats.bus.batches_published > 0);
        assert!(report.fetch_calls >= report.stats.scheduler.started);
    }

    #[tokio::test]
    async fn test_simulated_source_always_failing() {
        let source = SimulatedSource::new(1.0, Duration::ZERO);
        let result = source.fetch(&Address::root(0)).await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(source.calls(), 1);
    }
}
