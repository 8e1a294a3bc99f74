//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

// Result of applying a policy to a route.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PolicyResult<T> {
    Accept(T),
    Reject,
}

// Default action applied when no statement of a policy matches, or when no
// policy is configured at all.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DefaultPolicy {
    #[default]
    AcceptRoute,
    RejectRoute,
}

// Named routing policy: an ordered list of statements evaluated first-match.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Policy {
    pub name: String,
    pub stmts: Vec<PolicyStmt>,
}

// Single policy statement.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PolicyStmt {
    pub prefix: IpNetwork,
    // Minimum prefix length the route must have to match, inclusive.
    #[serde(default)]
    pub ge: Option<u8>,
    // Maximum prefix length the route must have to match, inclusive.
    #[serde(default)]
    pub le: Option<u8>,
    pub action: PolicyAction,
    // Attribute rewrites applied on accept.
    #[serde(default)]
    pub set_local_pref: Option<u32>,
    #[serde(default)]
    pub set_med: Option<u32>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyAction {
    Accept,
    Reject,
}

// ===== impl PolicyResult =====

impl<T> PolicyResult<T> {
    pub fn is_accept(&self) -> bool {
        matches!(self, PolicyResult::Accept(_))
    }
}

// ===== impl Policy =====

impl Policy {
    /// Returns the action of the first statement matching the prefix, if any.
    pub fn find_match(&self, prefix: &IpNetwork) -> Option<&PolicyStmt> {
        self.stmts.iter().find(|stmt| stmt.matches(prefix))
    }
}

// ===== impl PolicyStmt =====

impl PolicyStmt {
    fn matches(&self, prefix: &IpNetwork) -> bool {
        if !self.prefix.contains(prefix.ip()) {
            return false;
        }
        if prefix.prefix() < self.ge.unwrap_or(self.prefix.prefix()) {
            return false;
        }
        if let Some(le) = self.le
            && prefix.prefix() > le
        {
            return false;
        }
        // Without le/ge bounds only an exact match counts.
        if self.ge.is_none()
            && self.le.is_none()
            && prefix.prefix() != self.prefix.prefix()
        {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(prefix: &str, ge: Option<u8>, le: Option<u8>) -> PolicyStmt {
        PolicyStmt {
            prefix: prefix.parse().unwrap(),
            ge,
            le,
            action: PolicyAction::Accept,
            set_local_pref: None,
            set_med: None,
        }
    }

    #[test]
    fn exact_match_only_without_bounds() {
        let stmt = stmt("10.0.0.0/8", None, None);
        assert!(stmt.matches(&"10.0.0.0/8".parse().unwrap()));
        assert!(!stmt.matches(&"10.1.0.0/16".parse().unwrap()));
    }

    #[test]
    fn le_ge_bounds() {
        let stmt = stmt("10.0.0.0/8", Some(16), Some(24));
        assert!(stmt.matches(&"10.1.0.0/16".parse().unwrap()));
        assert!(stmt.matches(&"10.1.2.0/24".parse().unwrap()));
        assert!(!stmt.matches(&"10.0.0.0/8".parse().unwrap()));
        assert!(!stmt.matches(&"10.1.2.0/25".parse().unwrap()));
        assert!(!stmt.matches(&"192.0.2.0/24".parse().unwrap()));
    }
}
