use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::catalog::RuleCatalog;
use crate::config::{GuardConfig, MonitorStrategy};
use crate::error::{GuardError, Result};
use crate::executor::{CommandExecutor, ProcessExecutor};
use crate::monitor::{
    AdapterProbe, Connectivity, ConnectivityMonitor, ConnectivityProbe, MonitorHandle,
    ProcessProbe, Trigger,
};
use crate::platform;
use crate::reconciler::Reconciler;
use crate::state::{EnforcementMachine, EnforcementState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    StartPending,
    Running,
    StopPending,
    Stopped,
}

fn report(state: ServiceState) {
    info!(?state, "service status");
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// How often an unconfirmed enforcement state is re-applied.
    pub retry_interval: Duration,
    pub queue_depth: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_secs(5),
            queue_depth: 64,
        }
    }
}

/// Running kill switch: a monitor thread feeding a single enforcement worker.
pub struct GuardEngine<E> {
    monitor: Option<MonitorHandle>,
    shutdown: Option<oneshot::Sender<()>>,
    worker: JoinHandle<EnforcementMachine<E>>,
    state: watch::Receiver<EnforcementState>,
}

impl GuardEngine<ProcessExecutor> {
    /// Builds the catalog, executor, probe and trigger described by `config`
    /// and starts the engine.
    pub async fn from_config(config: &GuardConfig) -> Result<Self> {
        let catalog = RuleCatalog::build(&config.catalog)?;
        info!(
            style = %catalog.style(),
            rules = catalog.len(),
            "rule catalog built"
        );

        let executor = ProcessExecutor::new(config.firewall.timeout());
        let reconciler = Reconciler::new(catalog, executor, config.firewall.command.clone());

        let (probe, trigger): (Box<dyn ConnectivityProbe>, Trigger) = match config.monitor.strategy
        {
            MonitorStrategy::Process => (
                Box::new(ProcessProbe::new(config.tunnel.process_name.clone())),
                Trigger::Poll(config.monitor.poll_interval()),
            ),
            MonitorStrategy::Adapter => {
                let trigger = match platform::change_notifier() {
                    Ok(notifier) => Trigger::Events {
                        notifier,
                        recheck: config.monitor.event_fallback(),
                    },
                    Err(e) => {
                        warn!(error = %e, "adapter notifications unavailable, polling instead");
                        Trigger::Poll(config.monitor.event_fallback())
                    }
                };
                (
                    Box::new(AdapterProbe::new(config.tunnel.adapter_name.clone())),
                    trigger,
                )
            }
        };

        let settings = EngineSettings {
            retry_interval: config.firewall.retry_interval(),
            ..EngineSettings::default()
        };
        Self::start(reconciler, probe, trigger, settings).await
    }
}

impl<E: CommandExecutor + 'static> GuardEngine<E> {
    /// Enforces, takes the first observation, reconciles for it, then hands
    /// further signals to the worker. Failures before the worker starts are
    /// logged and left to the retry timer; only a monitor that cannot start
    /// is an error.
    pub async fn start<P>(
        reconciler: Reconciler<E>,
        probe: P,
        trigger: Trigger,
        settings: EngineSettings,
    ) -> Result<Self>
    where
        P: ConnectivityProbe + 'static,
    {
        report(ServiceState::StartPending);

        let mut machine = EnforcementMachine::new(reconciler);
        if let Err(e) = machine.establish_baseline().await {
            error!(error = %e, "baseline enforcement failed");
        }

        let (signal_tx, signal_rx) = mpsc::channel(settings.queue_depth.max(1));
        let (monitor, first) = tokio::task::spawn_blocking(move || {
            ConnectivityMonitor::start(probe, trigger, signal_tx)
        })
        .await
        .map_err(|e| GuardError::Monitor(e.to_string()))??;
        if let Err(e) = machine.on_signal(first).await {
            error!(signal = %first, error = %e, "initial enforcement failed");
        }

        let (state_tx, state_rx) = watch::channel(machine.state());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let worker = tokio::spawn(run_worker(
            machine,
            signal_rx,
            shutdown_rx,
            state_tx,
            settings.retry_interval,
        ));

        report(ServiceState::Running);
        Ok(Self {
            monitor: Some(monitor),
            shutdown: Some(shutdown_tx),
            worker,
            state: state_rx,
        })
    }

    pub fn state(&self) -> EnforcementState {
        *self.state.borrow()
    }

    pub async fn wait_for_state<F>(&mut self, f: F) -> Result<EnforcementState>
    where
        F: FnMut(&EnforcementState) -> bool,
    {
        self.state
            .wait_for(f)
            .await
            .map(|s| *s)
            .map_err(|_| GuardError::Worker("enforcement worker exited".to_string()))
    }

    /// Stops the worker and the monitor, lets any in-flight reconcile finish,
    /// then enforces one last time regardless of the current mode.
    pub async fn stop(mut self) -> Result<EnforcementState> {
        report(ServiceState::StopPending);

        // Shutdown first: the worker must not mistake the closing signal
        // channel for a lost monitor.
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(monitor) = self.monitor.take() {
            match tokio::task::spawn_blocking(move || monitor.stop()).await {
                Ok(Ok(())) => debug!("connectivity monitor stopped"),
                Ok(Err(e)) => error!(error = %e, "connectivity monitor did not stop cleanly"),
                Err(e) => error!(error = %e, "connectivity monitor did not stop cleanly"),
            }
        }

        let mut machine = (&mut self.worker)
            .await
            .map_err(|e| GuardError::Worker(e.to_string()))?;

        let result = machine.shutdown().await;
        report(ServiceState::Stopped);
        result.map(|_| machine.state())
    }
}

async fn run_worker<E: CommandExecutor>(
    mut machine: EnforcementMachine<E>,
    mut signals: mpsc::Receiver<Connectivity>,
    mut shutdown: oneshot::Receiver<()>,
    state: watch::Sender<EnforcementState>,
    retry_interval: Duration,
) -> EnforcementMachine<E> {
    let mut retry = tokio::time::interval(retry_interval);
    retry.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retry.reset();
    let mut signals_open = true;

    loop {
        tokio::select! {
            biased;

            _ = &mut shutdown => break,

            signal = signals.recv(), if signals_open => match signal {
                Some(signal) => {
                    if let Err(e) = machine.on_signal(signal).await {
                        error!(%signal, error = %e, "enforcement transition failed");
                    }
                }
                None => {
                    // Without a monitor nothing can confirm the tunnel.
                    error!("connectivity monitor stopped unexpectedly, enforcing");
                    signals_open = false;
                    if let Err(e) = machine.on_signal(Connectivity::Unknown).await {
                        error!(error = %e, "enforcement transition failed");
                    }
                }
            },

            _ = retry.tick(), if machine.needs_retry() => {
                if let Err(e) = machine.retry().await {
                    warn!(error = %e, "retry did not confirm enforcement state");
                }
            }
        }
        state.send_replace(machine.state());
    }

    debug!("enforcement worker exiting");
    machine
}
