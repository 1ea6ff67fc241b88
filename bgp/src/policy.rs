// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ingress/egress prefix filtering. A rule matches every prefix contained
//! in its own; among matching rules the highest priority wins, deny
//! winning ties. A set with no matching rule falls back to its default
//! action.

use rib::{Prefix4, Prefix6, RibPrefix};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(
    Debug, Serialize, Deserialize, Copy, Clone, Eq, PartialEq, JsonSchema,
)]
pub enum PolicyAction {
    Allow,
    Deny,
}

impl FromStr for PolicyAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allow" | "Allow" => Ok(Self::Allow),
            "deny" | "Deny" => Ok(Self::Deny),
            _ => Err("policy action must be allow or deny".into()),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Copy, Clone, JsonSchema)]
pub struct Rule<P> {
    pub prefix: P,
    pub action: PolicyAction,
    pub priority: u16,
}

impl<P: RibPrefix> Rule<P> {
    fn matches(&self, prefix: &P) -> bool {
        prefix.within(&self.prefix)
    }
}

pub type Rule4 = Rule<Prefix4>;
pub type Rule6 = Rule<Prefix6>;

#[derive(Debug, Serialize, Deserialize, Clone, JsonSchema)]
pub struct FilterSet<P> {
    pub default: PolicyAction,
    pub rules: Vec<Rule<P>>,
}

impl<P> Default for FilterSet<P> {
    fn default() -> Self {
        Self {
            default: PolicyAction::Allow,
            rules: Vec::new(),
        }
    }
}

pub type FilterSet4 = FilterSet<Prefix4>;
pub type FilterSet6 = FilterSet<Prefix6>;

impl<P: RibPrefix> FilterSet<P> {
    pub fn new(default: PolicyAction) -> Self {
        Self {
            default,
            rules: Vec::new(),
        }
    }

    pub fn add_rule(&mut self, prefix: P, action: PolicyAction, priority: u16) {
        self.rules.push(Rule {
            prefix,
            action,
            priority,
        });
    }

    pub fn allows(&self, prefix: &P) -> bool {
        let mut allow: Option<u16> = None;
        let mut deny: Option<u16> = None;
        for rule in self.rules.iter().filter(|r| r.matches(prefix)) {
            let slot = match rule.action {
                PolicyAction::Allow => &mut allow,
                PolicyAction::Deny => &mut deny,
            };
            *slot = Some(slot.map_or(rule.priority, |p| p.max(rule.priority)));
        }
        match (allow, deny) {
            (None, None) => self.default == PolicyAction::Allow,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a > d,
        }
    }
}
