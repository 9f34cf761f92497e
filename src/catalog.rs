use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::CatalogConfig;
use crate::error::CatalogError;

/// Value of `program` meaning the rule applies to every executable.
pub const ANY_PROGRAM: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Block,
    Bypass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Any,
    Icmpv4,
    Icmpv6,
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Public,
    Private,
    Domain,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    Any,
    Wireless,
    Lan,
    Ras,
}

macro_rules! lowercase_display {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $text),+
                })
            }
        }
    };
}

lowercase_display!(Direction { In => "in", Out => "out" });
lowercase_display!(Action { Allow => "allow", Block => "block", Bypass => "bypass" });
lowercase_display!(Protocol {
    Any => "any",
    Icmpv4 => "icmpv4",
    Icmpv6 => "icmpv6",
    Tcp => "tcp",
    Udp => "udp",
});
lowercase_display!(Profile {
    Public => "public",
    Private => "private",
    Domain => "domain",
    Any => "any",
});
lowercase_display!(InterfaceType {
    Any => "any",
    Wireless => "wireless",
    Lan => "lan",
    Ras => "ras",
});

/// Port scope of a rule. `all` and `all ports` are accepted as spellings of
/// [`PortSpec::Any`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PortSpec {
    Any,
    List(Vec<u16>),
}

impl PortSpec {
    pub fn is_any(&self) -> bool {
        matches!(self, PortSpec::Any)
    }
}

impl Default for PortSpec {
    fn default() -> Self {
        PortSpec::Any
    }
}

impl fmt::Display for PortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSpec::Any => f.write_str("any"),
            PortSpec::List(ports) => {
                let joined: Vec<String> = ports.iter().map(u16::to_string).collect();
                f.write_str(&joined.join(","))
            }
        }
    }
}

impl FromStr for PortSpec {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "any" | "all" | "all ports" => return Ok(PortSpec::Any),
            "" => return Err(CatalogError::InvalidPorts(s.to_string())),
            _ => {}
        }

        let mut ports = Vec::new();
        for part in trimmed.split(',') {
            let port: u16 = part
                .trim()
                .parse()
                .map_err(|_| CatalogError::InvalidPorts(s.to_string()))?;
            if port == 0 {
                return Err(CatalogError::InvalidPorts(s.to_string()));
            }
            ports.push(port);
        }
        Ok(PortSpec::List(ports))
    }
}

impl TryFrom<String> for PortSpec {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortSpec> for String {
    fn from(value: PortSpec) -> Self {
        value.to_string()
    }
}

/// When a rule is switched on, relative to the enforcement mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Activation {
    /// Enabled in both modes, e.g. the tunnel's own control traffic.
    Always,
    /// Enabled only while the kill switch is enforced (catch-all block).
    WhileEnforced,
    /// Enabled only while the tunnel is confirmed up.
    WhileDisabled,
}

impl Activation {
    pub fn resolve(self, enforced: bool) -> bool {
        match self {
            Activation::Always => true,
            Activation::WhileEnforced => enforced,
            Activation::WhileDisabled => !enforced,
        }
    }
}

impl Default for Activation {
    fn default() -> Self {
        Activation::Always
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub name: String,
    pub direction: Direction,
    pub action: Action,
    pub protocol: Protocol,
    #[serde(default)]
    pub local_ports: PortSpec,
    #[serde(default)]
    pub remote_ports: PortSpec,
    #[serde(default = "any_profile")]
    pub profile: Profile,
    #[serde(default = "any_interface")]
    pub interface_type: InterfaceType,
    #[serde(default = "any_program")]
    pub program: String,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default)]
    pub enabled: bool,
}

fn any_profile() -> Profile {
    Profile::Any
}

fn any_interface() -> InterfaceType {
    InterfaceType::Any
}

fn any_program() -> String {
    ANY_PROGRAM.to_string()
}

impl FirewallRule {
    /// Outbound allow rule for the tunnel client's control ports.
    pub fn tunnel_client(name: &str, remote_ports: PortSpec) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::Out,
            action: Action::Allow,
            protocol: Protocol::Tcp,
            local_ports: PortSpec::Any,
            remote_ports,
            profile: Profile::Any,
            interface_type: InterfaceType::Any,
            program: any_program(),
            activation: Activation::Always,
            enabled: false,
        }
    }

    /// Outbound catch-all block rule, active only while enforced.
    pub fn block_all(name: &str) -> Self {
        Self {
            name: name.to_string(),
            direction: Direction::Out,
            action: Action::Block,
            protocol: Protocol::Any,
            local_ports: PortSpec::Any,
            remote_ports: PortSpec::Any,
            profile: Profile::Any,
            interface_type: InterfaceType::Any,
            program: any_program(),
            activation: Activation::WhileEnforced,
            enabled: false,
        }
    }

    pub fn has_program(&self) -> bool {
        !self.program.is_empty() && !self.program.eq_ignore_ascii_case(ANY_PROGRAM)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        if self.name.trim().is_empty() {
            return Err(CatalogError::EmptyName);
        }
        if self.name.contains('"') {
            return Err(CatalogError::QuotedName(self.name.clone()));
        }
        if self.protocol == Protocol::Any
            && !(self.local_ports.is_any() && self.remote_ports.is_any())
        {
            return Err(CatalogError::PortsOnAnyProtocol(self.name.clone()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatalogStyle {
    AllowList,
    BlockEverything,
}

impl fmt::Display for CatalogStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogStyle::AllowList => f.write_str("allow-list"),
            CatalogStyle::BlockEverything => f.write_str("block-everything"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleCatalog {
    style: CatalogStyle,
    rules: Vec<FirewallRule>,
}

impl RuleCatalog {
    /// Builds the ordered rule list for the configured style. Deterministic:
    /// the same configuration always yields the same catalog.
    pub fn build(config: &CatalogConfig) -> Result<Self, CatalogError> {
        let mut rules = Vec::with_capacity(config.extra_rules.len() + 2);

        if config.style == CatalogStyle::AllowList {
            let ports: PortSpec = config.tunnel_ports.parse()?;
            rules.push(FirewallRule::tunnel_client(&config.client_rule_name, ports));
        }
        rules.extend(config.extra_rules.iter().cloned());
        rules.push(FirewallRule::block_all(&config.block_rule_name));

        Self::from_rules(config.style, rules)
    }

    pub fn from_rules(
        style: CatalogStyle,
        mut rules: Vec<FirewallRule>,
    ) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for rule in &mut rules {
            rule.validate()?;
            if !seen.insert(rule.name.clone()) {
                return Err(CatalogError::DuplicateName(rule.name.clone()));
            }
            rule.enabled = false;
        }
        Ok(Self { style, rules })
    }

    pub fn style(&self) -> CatalogStyle {
        self.style
    }

    pub fn rules(&self) -> &[FirewallRule] {
        &self.rules
    }

    pub(crate) fn rules_mut(&mut self) -> &mut [FirewallRule] {
        &mut self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&FirewallRule> {
        self.rules.iter().find(|r| r.name == name)
    }
}
