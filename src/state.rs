use std::fmt;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::monitor::Connectivity;
use crate::reconciler::{ReconcileResult, Reconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Disabled,
    Enforced,
}

impl Mode {
    pub fn from_enforced(enforced: bool) -> Self {
        if enforced {
            Mode::Enforced
        } else {
            Mode::Disabled
        }
    }

    pub fn is_enforced(self) -> bool {
        self == Mode::Enforced
    }

    /// Mode a connectivity signal asks for. Unknown is treated as down.
    pub fn for_signal(signal: Connectivity) -> Self {
        Mode::from_enforced(!signal.is_connected())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Disabled => f.write_str("disabled"),
            Mode::Enforced => f.write_str("enforced"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EnforcementState {
    pub mode: Mode,
    pub last_observed: Option<Connectivity>,
    /// Whether the firewall is known to match `mode`.
    pub confirmed: bool,
}

impl Default for EnforcementState {
    fn default() -> Self {
        Self {
            mode: Mode::Enforced,
            last_observed: None,
            confirmed: false,
        }
    }
}

pub struct EnforcementMachine<E> {
    reconciler: Reconciler<E>,
    state: EnforcementState,
}

impl<E: CommandExecutor> EnforcementMachine<E> {
    pub fn new(reconciler: Reconciler<E>) -> Self {
        Self {
            reconciler,
            state: EnforcementState::default(),
        }
    }

    pub fn state(&self) -> EnforcementState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn reconciler(&self) -> &Reconciler<E> {
        &self.reconciler
    }

    /// Unconditionally enforces. Run once at startup before any signal.
    pub async fn establish_baseline(&mut self) -> Result<Mode> {
        info!("applying fail-closed baseline");
        self.apply(Mode::Enforced).await
    }

    /// Handles one connectivity signal. Returns `Ok(None)` when nothing had to
    /// change, `Ok(Some(mode))` after a confirmed transition.
    pub async fn on_signal(&mut self, signal: Connectivity) -> Result<Option<Mode>> {
        let previous = self.state.last_observed.replace(signal);
        let target = Mode::for_signal(signal);

        if self.state.confirmed && self.state.mode == target {
            debug!(%signal, ?previous, mode = %self.state.mode, "signal needs no change");
            return Ok(None);
        }

        info!(%signal, from = %self.state.mode, to = %target, "connectivity changed");
        self.apply(target).await.map(Some)
    }

    /// Re-drives the last observation if the current mode is unconfirmed.
    pub async fn retry(&mut self) -> Result<Option<Mode>> {
        match self.state.last_observed {
            Some(signal) if !self.state.confirmed => {
                info!(%signal, "retrying unconfirmed enforcement state");
                self.on_signal(signal).await
            }
            None if !self.state.confirmed => self.establish_baseline().await.map(Some),
            _ => Ok(None),
        }
    }

    pub fn needs_retry(&self) -> bool {
        !self.state.confirmed
    }

    /// Final forced enforce before shutdown, regardless of the current mode.
    pub async fn shutdown(&mut self) -> Result<Mode> {
        info!(mode = %self.state.mode, "enforcing kill switch for shutdown");
        self.apply(Mode::Enforced).await
    }

    async fn apply(&mut self, target: Mode) -> Result<Mode> {
        let result: ReconcileResult = self.reconciler.reconcile(target.is_enforced()).await;

        if result.is_success() {
            self.state.mode = target;
            self.state.confirmed = true;
            info!(mode = %target, "kill switch {}", describe(target));
            return Ok(target);
        }

        self.state.confirmed = false;
        for report in result.failures() {
            warn!(
                rule = %report.name,
                delete = %report.delete,
                add = ?report.add.as_ref().map(ToString::to_string),
                "rule not applied"
            );
        }
        error!(
            mode = %self.state.mode,
            wanted = %target,
            "reconcile failed, keeping previous mode"
        );
        result.into_result().map(|_| target)
    }
}

fn describe(mode: Mode) -> &'static str {
    match mode {
        Mode::Enforced => "engaged",
        Mode::Disabled => "released",
    }
}
