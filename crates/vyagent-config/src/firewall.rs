//! Firewall ruleset helpers on top of [`ConfigTree`].
//!
//! Every interface/direction pair owns one ruleset named
//! `<interface>.<direction>`, e.g. `eth0.local`. Rules are keyed by
//! number; the agent identifies its own rules by their `description`
//! attribute so that re-applying a feature rewrites the same rule instead
//! of stacking duplicates.

use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::interfaces::interface_path;
use crate::path::ConfigPath;
use crate::tree::{ConfigNode, ConfigTree};

/// Rule numbers kept free for operator-owned rules.
pub const RESERVED_RULE_NUMBERS: RangeInclusive<u32> = 9990..=9999;

/// Traffic direction a ruleset applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Forwarded traffic entering the interface.
    In,
    /// Forwarded traffic leaving the interface.
    Out,
    /// Traffic addressed to the appliance itself.
    Local,
}

impl Direction {
    /// The keyword used in configuration paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
            Direction::Local => "local",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            "local" => Ok(Direction::Local),
            other => Err(ConfigError::invalid_path(
                other,
                "firewall direction must be in, out or local",
            )),
        }
    }
}

/// How free rule numbers are chosen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleNumbering {
    /// Lowest number handed out.
    pub floor: u32,
    /// Highest number handed out.
    pub max: u32,
    /// Numbers never handed out.
    pub reserved: RangeInclusive<u32>,
}

impl Default for RuleNumbering {
    fn default() -> Self {
        Self {
            floor: 1,
            max: 9999,
            reserved: RESERVED_RULE_NUMBERS,
        }
    }
}

impl RuleNumbering {
    /// Sets the lowest number handed out.
    pub fn with_floor(mut self, floor: u32) -> Self {
        self.floor = floor;
        self
    }

    /// Returns true if `number` may be allocated.
    pub fn is_allocatable(&self, number: u32) -> bool {
        number >= self.floor && number <= self.max && !self.reserved.contains(&number)
    }
}

/// Name of the ruleset for an interface and direction.
pub fn ruleset_name(interface: &str, direction: Direction) -> String {
    format!("{}.{}", interface, direction)
}

fn ruleset_path(ruleset: &str) -> ConfigPath {
    ConfigPath::root("firewall").child("name").child(ruleset)
}

fn rule_path(ruleset: &str, number: u32) -> ConfigPath {
    ruleset_path(ruleset).child("rule").child(number.to_string())
}

// `description a b` is one free-text value, not a nested key.
fn single_word_description(attribute: ConfigPath) -> ConfigPath {
    match attribute.tokens() {
        [key, words @ ..] if key == "description" && words.len() > 1 => {
            ConfigPath::root("description").child(words.join(" "))
        }
        _ => attribute,
    }
}

/// One numbered rule read back from the tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FirewallRule {
    /// Interface owning the ruleset.
    pub interface: String,
    /// Direction of the ruleset.
    pub direction: Direction,
    /// Rule number.
    pub number: u32,
    /// `description` attribute, if any.
    pub description: Option<String>,
    /// `action` attribute, if any.
    pub action: Option<String>,
    /// `protocol` attribute, if any.
    pub protocol: Option<String>,
    /// Every attribute line relative to the rule.
    pub attributes: Vec<ConfigPath>,
}

impl FirewallRule {
    fn from_node(interface: &str, direction: Direction, number: u32, node: ConfigNode<'_>) -> Self {
        let base = node.path();
        let value_of = |key: &str| node.child(key).and_then(|c| c.value()).map(str::to_string);
        Self {
            interface: interface.to_string(),
            direction,
            number,
            description: value_of("description"),
            action: value_of("action"),
            protocol: value_of("protocol"),
            attributes: node
                .leaf_paths()
                .iter()
                .filter_map(|p| p.strip_prefix(&base))
                .collect(),
        }
    }

    /// Name of the ruleset this rule lives in.
    pub fn ruleset(&self) -> String {
        ruleset_name(&self.interface, self.direction)
    }

    /// Full configuration path of the rule.
    pub fn path(&self) -> ConfigPath {
        rule_path(&self.ruleset(), self.number)
    }
}

impl ConfigTree {
    /// All numbered rules of a ruleset, in ascending number order.
    pub fn firewall_rules(&self, interface: &str, direction: Direction) -> Vec<FirewallRule> {
        let ruleset = ruleset_name(interface, direction);
        let Some(rules) = self.get(&ruleset_path(&ruleset).child("rule")) else {
            return Vec::new();
        };
        let mut numbered: Vec<(u32, ConfigNode<'_>)> = rules
            .children()
            .filter_map(|c| c.token().parse::<u32>().ok().map(|n| (n, c)))
            .collect();
        numbered.sort_by_key(|(n, _)| *n);
        numbered
            .into_iter()
            .map(|(n, node)| FirewallRule::from_node(interface, direction, n, node))
            .collect()
    }

    /// Finds the lowest-numbered rule whose description equals `description`.
    pub fn find_firewall_rule_by_description(
        &self,
        interface: &str,
        direction: Direction,
        description: &str,
    ) -> Option<FirewallRule> {
        self.firewall_rules(interface, direction)
            .into_iter()
            .find(|r| r.description.as_deref() == Some(description))
    }

    /// Lowest allocatable rule number not used in the ruleset.
    pub fn next_free_rule_number(&self, interface: &str, direction: Direction) -> ConfigResult<u32> {
        let used: Vec<u32> = self
            .firewall_rules(interface, direction)
            .iter()
            .map(|r| r.number)
            .collect();
        let numbering = self.rule_numbering();
        (numbering.floor..=numbering.max)
            .find(|n| numbering.is_allocatable(*n) && !used.contains(n))
            .ok_or_else(|| ConfigError::RuleNumbersExhausted {
                ruleset: ruleset_name(interface, direction),
                floor: numbering.floor,
                max: numbering.max,
            })
    }

    /// Writes a rule into the interface's ruleset and returns its number.
    ///
    /// `attributes` are paths relative to the rule, e.g.
    /// `destination port 53`. A rule carrying the same `description` is
    /// replaced in place; otherwise a fresh number is allocated.
    pub fn set_firewall_on_interface(
        &mut self,
        interface: &str,
        direction: Direction,
        attributes: &[&str],
    ) -> ConfigResult<u32> {
        let attributes = attributes
            .iter()
            .map(|a| ConfigPath::parse(a).map(single_word_description))
            .collect::<ConfigResult<Vec<_>>>()?;
        let description = attributes
            .iter()
            .find(|a| a.len() == 2 && a.tokens()[0] == "description")
            .map(|a| a.last().to_string());

        let existing = description
            .as_deref()
            .and_then(|d| self.find_firewall_rule_by_description(interface, direction, d));
        let number = match existing {
            Some(rule) => {
                debug!(
                    ruleset = %rule.ruleset(),
                    number = rule.number,
                    "Rewriting firewall rule with matching description"
                );
                self.delete(rule.path());
                rule.number
            }
            None => self.next_free_rule_number(interface, direction)?,
        };

        let base = rule_path(&ruleset_name(interface, direction), number);
        for attribute in &attributes {
            self.set(base.join(attribute));
        }
        info!(
            interface,
            direction = %direction,
            number,
            "Firewall rule staged"
        );
        Ok(number)
    }

    /// Binds the interface's ruleset to the interface.
    pub fn attach_firewall_to_interface(
        &mut self,
        interface: &str,
        direction: Direction,
    ) -> ConfigResult<bool> {
        let path = interface_path(interface)?
            .child("firewall")
            .child(direction.as_str())
            .child("name")
            .child(ruleset_name(interface, direction));
        Ok(self.set(path))
    }

    /// Deletes a rule previously read with [`ConfigTree::firewall_rules`].
    pub fn delete_firewall_rule(&mut self, rule: &FirewallRule) -> bool {
        self.delete(rule.path())
    }
}
