//! Interface monitor: keeps the engine's interface view current.
//!
//! Re-reads the inventory on a fixed interval and pushes it to the engine
//! when it changed. In observer mode it also owns one observer process per
//! enabled interface. On shutdown it stops those, then the engine.

use std::collections::{BTreeSet, HashMap};
use std::future::pending;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::{interval, interval_at, Instant, Interval, MissedTickBehavior};

use fabric_core::config::{FabricConfig, ObserverConfig, ReceiveMode};
use fabric_core::interface::{enabled_interfaces, Interfaces};
use fabric_core::wire::BeaconType;
use fabric_services::{EngineHandle, ObserverProcess};

use crate::inventory::InterfaceSource;

pub struct InterfaceMonitor<S> {
    source: S,
    engine: EngineHandle,
    receive_mode: ReceiveMode,
    observer: ObserverConfig,
    rescan_interval: Duration,
    solicit_interval: Option<Duration>,
    current: Option<Interfaces>,
    observers: HashMap<String, ObserverProcess>,
    shutdown: broadcast::Receiver<()>,
}

impl<S: InterfaceSource> InterfaceMonitor<S> {
    pub fn new(
        source: S,
        config: &FabricConfig,
        engine: EngineHandle,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        let solicit = config.beaconing.solicit_interval_secs;
        Self {
            source,
            engine,
            receive_mode: config.network.receive_mode,
            observer: config.observer.clone(),
            rescan_interval: Duration::from_secs(config.beaconing.rescan_interval_secs.max(1)),
            solicit_interval: (solicit > 0).then(|| Duration::from_secs(solicit)),
            current: None,
            observers: HashMap::new(),
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!(
            rescan_secs = self.rescan_interval.as_secs(),
            solicit_secs = self.solicit_interval.map(|d| d.as_secs()),
            mode = ?self.receive_mode,
            "interface monitor starting"
        );

        let mut rescan = interval(self.rescan_interval);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut solicit = self
            .solicit_interval
            .map(|period| interval_at(Instant::now() + period, period));

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("interface monitor shutting down");
                    break;
                }

                _ = rescan.tick() => {
                    if let Err(e) = self.scan().await {
                        tracing::info!(error = %e, "engine gone, interface monitor exiting");
                        break;
                    }
                }

                _ = tick(&mut solicit) => {
                    if self.engine.request_broadcast(BeaconType::Solicitation).await.is_err() {
                        break;
                    }
                }
            }
        }

        self.stop_observers().await;
        if self.engine.update_interfaces(Interfaces::new()).await.is_ok() {
            let _ = self.engine.stop().await;
        }
    }

    /// Read the inventory once and push it if it changed.
    ///
    /// Errors only when the engine is gone. A failed read is logged and the
    /// previous view kept.
    pub async fn scan(&mut self) -> Result<()> {
        let interfaces = match self.source.discover() {
            Ok(i) => i,
            Err(e) => {
                tracing::warn!(error = %e, "interface discovery failed");
                return Ok(());
            }
        };
        if self.current.as_ref() == Some(&interfaces) {
            return Ok(());
        }

        tracing::info!(
            count = interfaces.len(),
            enabled = enabled_interfaces(&interfaces).count(),
            "interfaces changed"
        );
        self.engine.update_interfaces(interfaces.clone()).await?;
        if self.receive_mode == ReceiveMode::Observer {
            self.sync_observers(&interfaces).await;
        }
        self.current = Some(interfaces);
        Ok(())
    }

    async fn sync_observers(&mut self, interfaces: &Interfaces) {
        let wanted: BTreeSet<String> = enabled_interfaces(interfaces)
            .map(|i| i.name.clone())
            .collect();

        let gone: Vec<String> = self
            .observers
            .keys()
            .filter(|name| !wanted.contains(*name))
            .cloned()
            .collect();
        for name in gone {
            if let Some(observer) = self.observers.remove(&name) {
                observer.stop().await;
            }
        }

        let restart = Duration::from_secs(self.observer.restart_interval_secs);
        for name in wanted {
            if !self.observers.contains_key(&name) {
                let observer = ObserverProcess::spawn(
                    self.observer.command.clone(),
                    name.clone(),
                    self.engine.clone(),
                    restart,
                );
                self.observers.insert(name, observer);
            }
        }
    }

    async fn stop_observers(&mut self) {
        for (_, observer) in self.observers.drain() {
            observer.stop().await;
        }
    }
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(t) => {
            t.tick().await;
        }
        None => pending().await,
    }
}
