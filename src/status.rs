use colored::Colorize;
use serde::Serialize;

use crate::config::{GuardConfig, MonitorStrategy};
use crate::monitor::{AdapterProbe, Connectivity, ConnectivityProbe, ProcessProbe};
use crate::state::Mode;

#[derive(Debug, Serialize)]
pub struct TunnelStatus {
    pub strategy: MonitorStrategy,
    /// Process or adapter name that was checked.
    pub watched: String,
    pub connectivity: Connectivity,
    /// Mode the kill switch would be in for this observation.
    pub mode: Mode,
}

impl TunnelStatus {
    /// Takes a single observation with the configured strategy.
    pub fn check(config: &GuardConfig) -> Self {
        let (watched, connectivity) = match config.monitor.strategy {
            MonitorStrategy::Process => {
                let name = config.tunnel.process_name.clone();
                let observed = ProcessProbe::new(name.clone()).observe();
                (name, observed)
            }
            MonitorStrategy::Adapter => {
                let name = config.tunnel.adapter_name.clone();
                let observed = AdapterProbe::new(name.clone()).observe();
                (name, observed)
            }
        };
        Self::from_observation(config.monitor.strategy, watched, connectivity)
    }

    pub fn from_observation(
        strategy: MonitorStrategy,
        watched: String,
        connectivity: Connectivity,
    ) -> Self {
        Self {
            strategy,
            watched,
            connectivity,
            mode: Mode::for_signal(connectivity),
        }
    }

    pub fn display(&self) {
        println!("\n{}", "━".repeat(60).bright_blue());
        println!(
            "{}",
            "              TUNNEL GUARD STATUS              "
                .bright_blue()
                .bold()
        );
        println!("{}", "━".repeat(60).bright_blue());
        println!();

        let kind = match self.strategy {
            MonitorStrategy::Process => "Process:",
            MonitorStrategy::Adapter => "Adapter:",
        };
        println!("  {} {}", kind.bold(), self.watched.bright_cyan());

        match self.connectivity {
            Connectivity::Connected => {
                println!(
                    "  {} {}",
                    "Tunnel:".bold(),
                    "🟢 CONNECTED".bright_green().bold()
                );
                println!(
                    "  {} {}",
                    "Kill switch:".bold(),
                    "Released (traffic flows)".bright_green()
                );
            }
            Connectivity::Disconnected => {
                println!(
                    "  {} {}",
                    "Tunnel:".bold(),
                    "🔴 DISCONNECTED".bright_red().bold()
                );
                println!(
                    "  {} {}",
                    "Kill switch:".bold(),
                    "Enforced (traffic blocked)".bright_red()
                );
            }
            Connectivity::Unknown => {
                println!(
                    "  {} {}",
                    "Tunnel:".bold(),
                    "🟡 UNKNOWN (not found)".bright_yellow().bold()
                );
                println!(
                    "  {} {}",
                    "Kill switch:".bold(),
                    "Enforced (traffic blocked)".bright_red()
                );
            }
        }

        println!();
        println!("{}", "━".repeat(60).bright_blue());
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_reports_enforced() {
        let status = TunnelStatus::from_observation(
            MonitorStrategy::Adapter,
            "PIA".to_string(),
            Connectivity::Unknown,
        );
        assert_eq!(status.mode, Mode::Enforced);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["connectivity"], "unknown");
        assert_eq!(json["mode"], "enforced");
        assert_eq!(json["strategy"], "adapter");
    }

    #[test]
    fn connected_reports_disabled() {
        let status = TunnelStatus::from_observation(
            MonitorStrategy::Process,
            "pia-client.exe".to_string(),
            Connectivity::Connected,
        );
        assert_eq!(status.mode, Mode::Disabled);
    }
}
