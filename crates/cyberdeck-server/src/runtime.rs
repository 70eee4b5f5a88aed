//! Background tasks around a loaded [`Registry`].
//!
//! Every task observes one `watch` shutdown flag. [`Runtime::shutdown`]
//! flips it, stops running pipelines and waits for the tasks to finish.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::{BusError, MappingSink, Proxy, ProxyHandle, Subscriber};
use crate::registry::Registry;
use crate::sink::PersistenceSink;
use crate::snapshot::SnapshotPublisher;
use crate::subsystem::application::ApplicationKind;
use crate::subsystem::{DeviceKind, Subsystem};

/// How often exited pipelines are reaped.
pub const SUPERVISOR_PERIOD: Duration = Duration::from_secs(1);

pub struct Runtime {
    registry: Arc<Registry>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    proxy: Option<ProxyHandle>,
}

impl Runtime {
    /// Apply startup actions and spawn every background task.
    pub async fn start(
        registry: Arc<Registry>,
        sink: Arc<dyn PersistenceSink>,
    ) -> Result<Self, BusError> {
        let (shutdown, _) = watch::channel(false);
        let mut runtime = Self {
            registry: Arc::clone(&registry),
            shutdown,
            tasks: Vec::new(),
            proxy: None,
        };

        // Populate device status before anything reads it (RF readiness).
        let polled = Arc::clone(&registry);
        spawn_blocking_logged(move || {
            for subsystem in polled.subsystems() {
                poll_once(subsystem);
            }
        })
        .await;

        let booted = Arc::clone(&registry);
        spawn_blocking_logged(move || booted.apply_startup()).await;

        for subsystem in registry.subsystems() {
            let period = subsystem
                .as_device()
                .and_then(|d| d.polling_period(&subsystem.config()));
            if let Some(period) = period {
                runtime.spawn_poller(Arc::clone(subsystem), period, Arc::clone(&sink));
            }
        }

        if let Some(device) = registry.devices(DeviceKind::Proxy).next() {
            let ctx = registry.context();
            let proxy = Proxy::bind(
                SocketAddr::from((Ipv4Addr::LOCALHOST, ctx.inbound_port())),
                SocketAddr::from((Ipv4Addr::LOCALHOST, ctx.outbound_port())),
            )
            .await?;
            runtime.proxy = Some(proxy.handle());
            device.status_cell().update(|s| s.set("running", true));
            let rx = runtime.shutdown.subscribe();
            runtime.tasks.push(tokio::spawn(proxy.run(rx)));
        }

        for subsystem in registry.applications(ApplicationKind::Subscriber) {
            let mapping = MappingSink::bind(&subsystem.config()).await?;
            let subscriber = Subscriber::new(
                Arc::clone(subsystem),
                registry.routes(),
                registry.context().outbound_url(),
                mapping,
                Arc::clone(&sink),
            );
            let rx = runtime.shutdown.subscribe();
            runtime.tasks.push(tokio::spawn(subscriber.run(rx)));
        }

        for subsystem in registry.devices(DeviceKind::Publisher) {
            let publisher =
                SnapshotPublisher::bind(Arc::clone(subsystem), Arc::clone(&registry)).await?;
            let rx = runtime.shutdown.subscribe();
            runtime.tasks.push(tokio::spawn(publisher.run(rx)));
        }

        runtime.spawn_supervisor();
        info!("Runtime started with {} tasks", runtime.tasks.len());
        Ok(runtime)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The running Proxy, if a `proxy` device is configured.
    pub fn proxy(&self) -> Option<&ProxyHandle> {
        self.proxy.as_ref()
    }

    fn spawn_poller(&mut self, subsystem: Arc<Subsystem>, period: Duration, sink: Arc<dyn PersistenceSink>) {
        let mut shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.changed() => break,
                }
                let polled = Arc::clone(&subsystem);
                match tokio::task::spawn_blocking(move || poll_once(&polled)).await {
                    Ok(true) => sink.dump_data(subsystem.id(), &subsystem.status()),
                    Ok(false) => {}
                    Err(e) => warn!("Poller for {} failed: {}", subsystem.id(), e),
                }
            }
            debug!("Poller for {} stopped", subsystem.id());
        }));
    }

    fn spawn_supervisor(&mut self) {
        let registry = Arc::clone(&self.registry);
        let mut shutdown = self.shutdown.subscribe();
        self.tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SUPERVISOR_PERIOD);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let registry = Arc::clone(&registry);
                        match tokio::task::spawn_blocking(move || registry.reap_exited()).await {
                            Ok(0) => {}
                            Ok(reaped) => debug!("Reaped {} exited pipelines", reaped),
                            Err(e) => warn!("Supervisor tick failed: {}", e),
                        }
                    }
                    _ = shutdown.changed() => break,
                }
            }
        }));
    }

    /// Stop every task and every running pipeline.
    pub async fn shutdown(self) {
        info!("Shutting down runtime");
        let _ = self.shutdown.send(true);

        let registry = Arc::clone(&self.registry);
        spawn_blocking_logged(move || registry.stop_all()).await;

        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("Runtime task failed: {}", e);
            }
        }
        info!("Runtime stopped");
    }
}

/// Replace a pollable device's status with a fresh sample.
fn poll_once(subsystem: &Subsystem) -> bool {
    let Some(device) = subsystem.as_device() else {
        return false;
    };
    match device.poll(&subsystem.config()) {
        Some(status) => {
            subsystem.status_cell().replace(status);
            true
        }
        None => false,
    }
}

async fn spawn_blocking_logged<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    if let Err(e) = tokio::task::spawn_blocking(f).await {
        warn!("Blocking task failed: {}", e);
    }
}
