#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tunnel_guard::catalog::{CatalogStyle, RuleCatalog};
use tunnel_guard::config::CatalogConfig;
use tunnel_guard::executor::{CommandExecutor, CommandOutput};
use tunnel_guard::monitor::{Connectivity, ConnectivityProbe};
use tunnel_guard::reconciler::Reconciler;
use tunnel_guard::Result;

pub const CLIENT: &str = "#PIA Client";
pub const BLOCK: &str = "#All Blocked";

/// A rule as the fake firewall stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveRule {
    pub name: String,
    pub enabled: bool,
    pub args: String,
}

#[derive(Default)]
struct Inner {
    rules: Vec<LiveRule>,
    failing_adds: HashSet<String>,
    commands: Vec<String>,
}

/// In-memory firewall that understands the `netsh advfirewall` delete/add
/// subset. Clones share state.
#[derive(Clone, Default)]
pub struct FakeFirewall {
    inner: Arc<Mutex<Inner>>,
}

impl FakeFirewall {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rules(&self) -> Vec<LiveRule> {
        self.inner.lock().unwrap().rules.clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .rules
            .iter()
            .filter(|r| r.name == name)
            .count()
    }

    pub fn enabled(&self, name: &str) -> Option<bool> {
        self.inner
            .lock()
            .unwrap()
            .rules
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.enabled)
    }

    /// Makes every add for `name` fail with an access error.
    pub fn fail_adds_for(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .failing_adds
            .insert(name.to_string());
    }

    pub fn heal(&self) {
        self.inner.lock().unwrap().failing_adds.clear();
    }

    pub fn commands(&self) -> Vec<String> {
        self.inner.lock().unwrap().commands.clone()
    }

    /// Pre-existing rule, as left behind by an earlier run.
    pub fn insert(&self, name: &str, enabled: bool) {
        self.inner.lock().unwrap().rules.push(LiveRule {
            name: name.to_string(),
            enabled,
            args: String::new(),
        });
    }
}

fn output(exit_code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        exit_code,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

fn rule_name(args: &str) -> Option<&str> {
    let start = args.find("name=\"")? + "name=\"".len();
    let rest = &args[start..];
    let end = rest.find('"')?;
    Some(&rest[..end])
}

impl CommandExecutor for FakeFirewall {
    async fn execute(&self, program: &str, args: &str) -> Result<CommandOutput> {
        let mut inner = self.inner.lock().unwrap();
        inner.commands.push(format!("{} {}", program, args));
        let name = rule_name(args).unwrap_or_default().to_string();

        if args.contains(" delete rule ") {
            let before = inner.rules.len();
            inner.rules.retain(|r| r.name != name);
            let deleted = before - inner.rules.len();
            if deleted == 0 {
                return Ok(output(1, "\nNo rules match the specified criteria.\n"));
            }
            Ok(output(0, &format!("\nDeleted {} rule(s).\nOk.\n", deleted)))
        } else if args.contains(" add rule ") {
            if inner.failing_adds.contains(&name) {
                return Ok(output(
                    1,
                    "The requested operation requires elevation (Run as administrator).",
                ));
            }
            let enabled = args.contains(" enable=yes ");
            inner.rules.push(LiveRule {
                name,
                enabled,
                args: args.to_string(),
            });
            Ok(output(0, "Ok.\n"))
        } else {
            Ok(output(1, "The following command was not found."))
        }
    }
}

/// Tunnel whose connectivity the test flips by hand.
#[derive(Clone)]
pub struct Tunnel(Arc<Mutex<Connectivity>>);

impl Tunnel {
    pub fn new(initial: Connectivity) -> Self {
        Self(Arc::new(Mutex::new(initial)))
    }

    pub fn set(&self, connectivity: Connectivity) {
        *self.0.lock().unwrap() = connectivity;
    }
}

impl ConnectivityProbe for Tunnel {
    fn observe(&mut self) -> Connectivity {
        *self.0.lock().unwrap()
    }
}

pub fn catalog(style: CatalogStyle) -> RuleCatalog {
    RuleCatalog::build(&CatalogConfig {
        style,
        ..CatalogConfig::default()
    })
    .unwrap()
}

pub fn reconciler(style: CatalogStyle, firewall: &FakeFirewall) -> Reconciler<FakeFirewall> {
    Reconciler::new(catalog(style), firewall.clone(), "netsh")
}

pub const POLL: Duration = Duration::from_millis(5);
pub const WAIT: Duration = Duration::from_secs(5);
