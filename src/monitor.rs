use std::fmt;
use std::io;
use std::sync::mpsc::{self as std_mpsc, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::{ProcessRefreshKind, System};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{GuardError, Result};
use crate::platform;

/// Upper bound on how long the monitor thread takes to notice a stop request
/// while waiting for adapter notifications.
const STOP_CHECK: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
    /// The adapter or process could not be looked up.
    Unknown,
}

impl Connectivity {
    pub fn from_up(up: bool) -> Self {
        if up {
            Connectivity::Connected
        } else {
            Connectivity::Disconnected
        }
    }

    /// Only `Connected` counts; `Unknown` is treated as down.
    pub fn is_connected(self) -> bool {
        self == Connectivity::Connected
    }
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Connected => f.write_str("connected"),
            Connectivity::Disconnected => f.write_str("disconnected"),
            Connectivity::Unknown => f.write_str("unknown"),
        }
    }
}

#[cfg_attr(test, mockall::automock)]
pub trait ConnectivityProbe: Send {
    fn observe(&mut self) -> Connectivity;
}

impl<P: ConnectivityProbe + ?Sized> ConnectivityProbe for Box<P> {
    fn observe(&mut self) -> Connectivity {
        (**self).observe()
    }
}

/// Tunnel is up while a process with the configured name is running.
pub struct ProcessProbe {
    process_name: String,
    system: System,
}

impl ProcessProbe {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            system: System::new(),
        }
    }
}

impl ConnectivityProbe for ProcessProbe {
    fn observe(&mut self) -> Connectivity {
        self.system.refresh_processes_specifics(ProcessRefreshKind::new());
        let running = self
            .system
            .processes()
            .values()
            .any(|p| p.name().eq_ignore_ascii_case(&self.process_name));
        Connectivity::from_up(running)
    }
}

type AdapterLookup = fn(&str) -> io::Result<Option<bool>>;

pub struct AdapterProbe {
    adapter_name: String,
    lookup: AdapterLookup,
    missing_reported: bool,
}

impl AdapterProbe {
    pub fn new(adapter_name: impl Into<String>) -> Self {
        Self::with_lookup(adapter_name, platform::adapter_state)
    }

    pub fn with_lookup(adapter_name: impl Into<String>, lookup: AdapterLookup) -> Self {
        Self {
            adapter_name: adapter_name.into(),
            lookup,
            missing_reported: false,
        }
    }
}

impl ConnectivityProbe for AdapterProbe {
    fn observe(&mut self) -> Connectivity {
        match (self.lookup)(&self.adapter_name) {
            Ok(Some(up)) => {
                self.missing_reported = false;
                Connectivity::from_up(up)
            }
            Ok(None) => {
                if !self.missing_reported {
                    warn!(adapter = %self.adapter_name, "tunnel adapter could not be found");
                    self.missing_reported = true;
                }
                Connectivity::Unknown
            }
            Err(e) => {
                if !self.missing_reported {
                    warn!(adapter = %self.adapter_name, error = %e, "tunnel adapter lookup failed");
                    self.missing_reported = true;
                }
                Connectivity::Unknown
            }
        }
    }
}

/// Drops observations whose connected/not-connected value matches the last
/// one emitted. The first observation is always emitted.
#[derive(Debug, Default, Clone)]
pub struct Debouncer {
    last: Option<bool>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(first: Connectivity) -> Self {
        Self {
            last: Some(first.is_connected()),
        }
    }

    pub fn observe(&mut self, observed: Connectivity) -> Option<Connectivity> {
        let up = observed.is_connected();
        if self.last == Some(up) {
            return None;
        }
        self.last = Some(up);
        Some(observed)
    }
}

/// Blocking source of "something about the network adapters changed".
pub trait ChangeNotifier: Send {
    /// Waits up to `timeout`; `Ok(true)` if a change was reported.
    fn wait_for_change(&mut self, timeout: Duration) -> io::Result<bool>;
}

/// What wakes the monitor thread up to take another observation.
pub enum Trigger {
    Poll(Duration),
    /// Observe on every adapter notification, and at least every `recheck`.
    Events {
        notifier: Box<dyn ChangeNotifier>,
        recheck: Duration,
    },
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Poll(interval) => f.debug_tuple("Poll").field(interval).finish(),
            Trigger::Events { recheck, .. } => {
                f.debug_struct("Events").field("recheck", recheck).finish()
            }
        }
    }
}

enum Wake {
    Check,
    Stop,
}

impl Trigger {
    fn wait(&mut self, stop: &std_mpsc::Receiver<()>, last_check: Instant) -> Wake {
        match self {
            Trigger::Poll(interval) => match stop.recv_timeout(*interval) {
                Err(RecvTimeoutError::Timeout) => Wake::Check,
                _ => Wake::Stop,
            },
            Trigger::Events { notifier, recheck } => loop {
                match stop.try_recv() {
                    Err(TryRecvError::Empty) => {}
                    _ => return Wake::Stop,
                }
                match notifier.wait_for_change(STOP_CHECK.min(*recheck)) {
                    Ok(true) => return Wake::Check,
                    Ok(false) if last_check.elapsed() >= *recheck => return Wake::Check,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(error = %e, "adapter change notification failed");
                        return match stop.recv_timeout(*recheck) {
                            Err(RecvTimeoutError::Timeout) => Wake::Check,
                            _ => Wake::Stop,
                        };
                    }
                }
            },
        }
    }
}

pub struct ConnectivityMonitor;

impl ConnectivityMonitor {
    /// Takes the first observation on the calling thread and returns it, then
    /// keeps observing on a dedicated thread. Later signals never repeat the
    /// connected value of the previous one.
    pub fn start<P>(
        mut probe: P,
        trigger: Trigger,
        signals: mpsc::Sender<Connectivity>,
    ) -> Result<(MonitorHandle, Connectivity)>
    where
        P: ConnectivityProbe + 'static,
    {
        let first = probe.observe();
        info!(signal = %first, ?trigger, "connectivity monitor started");

        let (stop_tx, stop_rx) = std_mpsc::channel();
        let debouncer = Debouncer::seeded(first);
        let thread = thread::Builder::new()
            .name("connectivity-monitor".to_string())
            .spawn(move || run(probe, trigger, stop_rx, signals, debouncer))?;

        Ok((
            MonitorHandle {
                stop_tx: Some(stop_tx),
                thread: Some(thread),
            },
            first,
        ))
    }
}

fn run<P: ConnectivityProbe>(
    mut probe: P,
    mut trigger: Trigger,
    stop: std_mpsc::Receiver<()>,
    signals: mpsc::Sender<Connectivity>,
    mut debouncer: Debouncer,
) {
    let mut last_check = Instant::now();
    while let Wake::Check = trigger.wait(&stop, last_check) {
        let observed = probe.observe();
        last_check = Instant::now();

        if let Some(signal) = debouncer.observe(observed) {
            debug!(%signal, "connectivity signal");
            if signals.blocking_send(signal).is_err() {
                debug!("signal receiver gone");
                break;
            }
        }
    }
    debug!("connectivity monitor thread exiting");
}

pub struct MonitorHandle {
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stops the monitor thread and waits for it to exit. Blocks for at most
    /// one wake interval plus the probe call in flight.
    pub fn stop(mut self) -> Result<()> {
        self.signal_stop();
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| GuardError::Monitor("monitor thread panicked".to_string())),
            None => Ok(()),
        }
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
