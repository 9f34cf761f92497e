use std::fmt;

use tracing::{debug, info, warn};

use crate::catalog::RuleCatalog;
use crate::error::{GuardError, Result};
use crate::executor::{CommandExecutor, CommandOutput};
use crate::netsh;
use crate::state::Mode;

/// Result of a single delete or add.
#[derive(Debug)]
pub enum CommandOutcome {
    Ok(CommandOutput),
    NotFound(CommandOutput),
    /// Non-zero exit (other than "not found" on delete).
    Rejected(CommandOutput),
    Error(GuardError),
}

impl CommandOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, CommandOutcome::Ok(_) | CommandOutcome::NotFound(_))
    }

    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            CommandOutcome::Ok(o) | CommandOutcome::NotFound(o) | CommandOutcome::Rejected(o) => {
                Some(o)
            }
            CommandOutcome::Error(_) => None,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Ok(_) => f.write_str("ok"),
            CommandOutcome::NotFound(_) => f.write_str("not found"),
            CommandOutcome::Rejected(o) => {
                write!(f, "exit code {}: {}", o.exit_code, o.detail())
            }
            CommandOutcome::Error(e) => write!(f, "{}", e),
        }
    }
}

#[derive(Debug)]
pub struct RuleReport {
    pub name: String,
    pub enabled: bool,
    pub delete: CommandOutcome,
    /// `None` when the add was skipped because the delete failed.
    pub add: Option<CommandOutcome>,
}

impl RuleReport {
    pub fn succeeded(&self) -> bool {
        self.delete.is_ok() && matches!(self.add, Some(CommandOutcome::Ok(_)))
    }
}

#[derive(Debug)]
pub struct ReconcileResult {
    pub enforced: bool,
    pub rules: Vec<RuleReport>,
}

impl ReconcileResult {
    pub fn target(&self) -> Mode {
        Mode::from_enforced(self.enforced)
    }

    pub fn is_success(&self) -> bool {
        self.rules.iter().all(RuleReport::succeeded)
    }

    pub fn failures(&self) -> impl Iterator<Item = &RuleReport> {
        self.rules.iter().filter(|r| !r.succeeded())
    }

    /// `Ok(())` only if every rule was applied.
    pub fn into_result(self) -> Result<()> {
        let failed = self.failures().count();
        if failed == 0 {
            Ok(())
        } else {
            Err(GuardError::ReconcileFailed {
                target: self.target(),
                failed,
                total: self.rules.len(),
            })
        }
    }
}

pub struct Reconciler<E> {
    catalog: RuleCatalog,
    executor: E,
    program: String,
}

impl<E: CommandExecutor> Reconciler<E> {
    pub fn new(catalog: RuleCatalog, executor: E, program: impl Into<String>) -> Self {
        Self {
            catalog,
            executor,
            program: program.into(),
        }
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Re-applies every catalog rule with `enabled` resolved for `enforced`.
    /// Never stops early; per-rule outcomes are collected in the result.
    pub async fn reconcile(&mut self, enforced: bool) -> ReconcileResult {
        info!(
            target_mode = %Mode::from_enforced(enforced),
            rules = self.catalog.len(),
            "reconciling firewall rules"
        );

        let mut reports = Vec::with_capacity(self.catalog.len());
        for rule in self.catalog.rules_mut() {
            let delete = run(
                &self.executor,
                &self.program,
                &netsh::delete_rule_args(&rule.name),
                true,
            )
            .await;

            let add = if delete.is_ok() {
                rule.enabled = rule.activation.resolve(enforced);
                Some(
                    run(
                        &self.executor,
                        &self.program,
                        &netsh::add_rule_args(rule),
                        false,
                    )
                    .await,
                )
            } else {
                warn!(rule = %rule.name, outcome = %delete, "delete failed, not re-adding rule");
                None
            };

            let report = RuleReport {
                name: rule.name.clone(),
                enabled: rule.enabled,
                delete,
                add,
            };
            if report.succeeded() {
                debug!(rule = %report.name, enabled = report.enabled, "rule applied");
            } else if let Some(add) = &report.add {
                warn!(rule = %report.name, outcome = %add, "failed to add rule");
            }
            reports.push(report);
        }

        let result = ReconcileResult {
            enforced,
            rules: reports,
        };
        if result.is_success() {
            info!(target_mode = %result.target(), "firewall reconciled");
        } else {
            warn!(
                target_mode = %result.target(),
                failed = result.failures().count(),
                "firewall reconcile incomplete"
            );
        }
        result
    }

    /// Deletes every catalog rule from the firewall. Returns the names whose
    /// delete failed.
    pub async fn remove_all(&self) -> Vec<(String, CommandOutcome)> {
        let mut failed = Vec::new();
        for rule in self.catalog.rules() {
            let outcome = run(
                &self.executor,
                &self.program,
                &netsh::delete_rule_args(&rule.name),
                true,
            )
            .await;
            if outcome.is_ok() {
                info!(rule = %rule.name, outcome = %outcome, "rule removed");
            } else {
                warn!(rule = %rule.name, outcome = %outcome, "failed to remove rule");
                failed.push((rule.name.clone(), outcome));
            }
        }
        failed
    }

    pub fn plan(&self, enforced: bool) -> Vec<String> {
        let mut commands = Vec::with_capacity(self.catalog.len() * 2);
        for rule in self.catalog.rules() {
            let mut planned = rule.clone();
            planned.enabled = planned.activation.resolve(enforced);
            commands.push(format!(
                "{} {}",
                self.program,
                netsh::delete_rule_args(&planned.name)
            ));
            commands.push(format!(
                "{} {}",
                self.program,
                netsh::add_rule_args(&planned)
            ));
        }
        commands
    }
}

async fn run<E: CommandExecutor>(
    executor: &E,
    program: &str,
    args: &str,
    is_delete: bool,
) -> CommandOutcome {
    match executor.execute(program, args).await {
        Ok(output) => {
            debug!(
                args,
                exit_code = output.exit_code,
                stdout = output.stdout.trim(),
                stderr = output.stderr.trim(),
                "firewall command finished"
            );
            if output.success() {
                CommandOutcome::Ok(output)
            } else if is_delete && netsh::is_rule_not_found(&output) {
                CommandOutcome::NotFound(output)
            } else {
                CommandOutcome::Rejected(output)
            }
        }
        Err(e) => CommandOutcome::Error(e),
    }
}
