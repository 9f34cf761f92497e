use crate::catalog::{FirewallRule, Protocol};
use crate::executor::CommandOutput;

/// Printed by netsh when a delete finds nothing to remove.
const NO_RULES_MATCH: &str = "No rules match the specified criteria";

pub fn delete_rule_args(name: &str) -> String {
    format!("advfirewall firewall delete rule name=\"{}\"", name)
}

/// Port fields are left out for protocol `any`; netsh rejects them there.
pub fn add_rule_args(rule: &FirewallRule) -> String {
    let mut args = format!(
        "advfirewall firewall add rule name=\"{}\" dir={} action={} enable={} protocol={}",
        rule.name,
        rule.direction,
        rule.action,
        if rule.enabled { "yes" } else { "no" },
        rule.protocol,
    );

    if rule.protocol != Protocol::Any {
        args.push_str(&format!(
            " localport={} remoteport={}",
            rule.local_ports, rule.remote_ports
        ));
    }

    args.push_str(&format!(
        " profile={} interfacetype={}",
        rule.profile, rule.interface_type
    ));

    if rule.has_program() {
        args.push_str(&format!(" program=\"{}\"", rule.program));
    }

    args
}

pub fn is_rule_not_found(output: &CommandOutput) -> bool {
    output.stdout.contains(NO_RULES_MATCH) || output.stderr.contains(NO_RULES_MATCH)
}

/// Splits an argument string on whitespace, keeping double-quoted sections
/// together and dropping the quotes (`name="#PIA Client"` becomes
/// `name=#PIA Client`).
pub fn split_args(args: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_token = false;

    for c in args.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                has_token = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_token {
                    out.push(std::mem::take(&mut current));
                    has_token = false;
                }
            }
            c => {
                current.push(c);
                has_token = true;
            }
        }
    }
    if has_token {
        out.push(current);
    }
    out
}
