use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::{info, warn};

use tunnel_guard::catalog::{Activation, RuleCatalog};
use tunnel_guard::config::GuardConfig;
use tunnel_guard::engine::GuardEngine;
use tunnel_guard::executor::ProcessExecutor;
use tunnel_guard::platform;
use tunnel_guard::reconciler::Reconciler;
use tunnel_guard::status::TunnelStatus;
use tunnel_guard::GuardError;

#[derive(Parser)]
#[command(name = "tunnel-guard")]
#[command(version, about = "Block outbound traffic whenever the VPN tunnel is down", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Do not refuse to run without administrator/root privileges
    #[arg(long, global = true)]
    skip_elevation_check: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the kill switch in the foreground until Ctrl-C
    Run,
    /// Check the tunnel once and show what the kill switch would do
    Status {
        #[arg(long)]
        json: bool,
    },
    /// List the firewall rules the kill switch manages
    Rules {
        #[arg(long)]
        json: bool,
    },
    /// Print the firewall commands a reconcile would run
    Plan {
        #[arg(short, long, value_enum, default_value_t = PlanState::Enforced)]
        state: PlanState,
    },
    /// Remove every managed rule from the firewall
    Clean,
    /// Show current configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum PlanState {
    Enforced,
    Disabled,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match GuardConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_none() => {
            warn!(error = %e, "could not load configuration, using defaults");
            GuardConfig::default()
        }
        Err(e) => return Err(e),
    };

    match cli.command {
        Commands::Run => {
            ensure_elevated(&config, cli.skip_elevation_check)?;

            println!("{}", "━".repeat(50).bright_blue());
            println!("{}", "  Starting Tunnel Guard...".bright_blue().bold());
            println!("{}", "━".repeat(50).bright_blue());

            let engine = match GuardEngine::from_config(&config).await {
                Ok(engine) => engine,
                Err(e) => {
                    eprintln!("{} {}", "[✗] Failed to start:".bright_red(), e);
                    std::process::exit(1);
                }
            };

            let state = engine.state();
            println!(
                "{} {}",
                "[✓] Kill switch armed, current mode:".green(),
                state.mode.to_string().bold()
            );
            println!("{}", "    Press Ctrl-C to stop".bright_black());

            let (stop_tx, mut stop_rx) = tokio::sync::watch::channel(false);
            ctrlc::set_handler(move || {
                let _ = stop_tx.send(true);
            })?;
            let _ = stop_rx.changed().await;

            println!("{}", "━".repeat(50).bright_yellow());
            println!("{}", "  Stopping Tunnel Guard...".bright_yellow().bold());
            println!("{}", "━".repeat(50).bright_yellow());

            match engine.stop().await {
                Ok(state) => {
                    println!(
                        "{} {}",
                        "[✓] Stopped, kill switch left".yellow(),
                        state.mode.to_string().bold()
                    );
                }
                Err(e) => {
                    eprintln!("{} {}", "[✗] Final enforcement failed:".bright_red(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Status { json } => {
            info!("Checking tunnel status...");
            let probe_config = config.clone();
            let status =
                tokio::task::spawn_blocking(move || TunnelStatus::check(&probe_config)).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                status.display();
            }
        }

        Commands::Rules { json } => {
            let catalog = RuleCatalog::build(&config.catalog).map_err(GuardError::from)?;
            if json {
                println!("{}", serde_json::to_string_pretty(catalog.rules())?);
            } else {
                print_rules(&catalog);
            }
        }

        Commands::Plan { state } => {
            let enforced = matches!(state, PlanState::Enforced);
            let reconciler = build_reconciler(&config)?;
            for command in reconciler.plan(enforced) {
                println!("{}", command);
            }
        }

        Commands::Clean => {
            ensure_elevated(&config, cli.skip_elevation_check)?;
            println!("{}", "[+] Removing managed firewall rules...".cyan());

            let reconciler = build_reconciler(&config)?;
            let failed = reconciler.remove_all().await;
            if failed.is_empty() {
                println!("{}", "[✓] All managed rules removed".green());
            } else {
                for (name, outcome) in &failed {
                    eprintln!("{} {} ({})", "[✗] Could not remove".bright_red(), name, outcome);
                }
                std::process::exit(1);
            }
        }

        Commands::Config => {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            let _ = writeln!(stdout, "{}", "Current Configuration:".bright_blue().bold());
            let _ = writeln!(stdout, "{}", "━".repeat(50).bright_blue());
            let _ = writeln!(stdout, "{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn build_reconciler(config: &GuardConfig) -> Result<Reconciler<ProcessExecutor>> {
    let catalog = RuleCatalog::build(&config.catalog).map_err(GuardError::from)?;
    let executor = ProcessExecutor::new(config.firewall.timeout());
    Ok(Reconciler::new(
        catalog,
        executor,
        config.firewall.command.clone(),
    ))
}

fn ensure_elevated(config: &GuardConfig, skip: bool) -> Result<()> {
    if skip || !config.service.require_elevation || platform::is_elevated() {
        return Ok(());
    }
    eprintln!(
        "{}",
        "Error: Tunnel Guard must run as administrator/root"
            .bright_red()
            .bold()
    );
    Err(GuardError::NotElevated.into())
}

fn print_rules(catalog: &RuleCatalog) {
    println!(
        "{} {}",
        "Rule catalog:".bright_blue().bold(),
        catalog.style().to_string().bright_cyan()
    );
    println!("{}", "━".repeat(50).bright_blue());
    for (i, rule) in catalog.rules().iter().enumerate() {
        let when = match rule.activation {
            Activation::Always => "always".green(),
            Activation::WhileEnforced => "while enforced".yellow(),
            Activation::WhileDisabled => "while tunnel up".cyan(),
        };
        println!(
            "  {}. {} {} {} {} local={} remote={} [{}]",
            i + 1,
            rule.name.bold(),
            rule.action,
            rule.direction,
            rule.protocol,
            rule.local_ports,
            rule.remote_ports,
            when
        );
    }
}
