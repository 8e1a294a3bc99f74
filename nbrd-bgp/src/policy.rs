//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use ipnetwork::IpNetwork;
use nbrd_utils::policy::{DefaultPolicy, Policy, PolicyAction, PolicyResult};

use crate::neighbor::Neighbor;
use crate::rib::Route;

// Applies the neighbor's import policy to the given route.
pub(crate) fn apply_import(
    nbr: &Neighbor,
    prefix: IpNetwork,
    route: Route,
) -> PolicyResult<Route> {
    apply(
        nbr.config.import_policy.as_ref(),
        nbr.config.default_import_policy,
        prefix,
        route,
    )
}

// Applies the neighbor's export policy to the given route.
pub(crate) fn apply_export(
    nbr: &Neighbor,
    prefix: IpNetwork,
    route: Route,
) -> PolicyResult<Route> {
    apply(
        nbr.config.export_policy.as_ref(),
        nbr.config.default_export_policy,
        prefix,
        route,
    )
}

// ===== helper functions =====

// Evaluates a policy statement-by-statement, first match wins. Accepted
// routes have their attribute rewrites applied.
fn apply(
    policy: Option<&Policy>,
    default_policy: DefaultPolicy,
    prefix: IpNetwork,
    mut route: Route,
) -> PolicyResult<Route> {
    if let Some(policy) = policy
        && let Some(stmt) = policy.find_match(&prefix)
    {
        return match stmt.action {
            PolicyAction::Accept => {
                if let Some(local_pref) = stmt.set_local_pref {
                    route.attrs.base.local_pref = Some(local_pref);
                }
                if let Some(med) = stmt.set_med {
                    route.attrs.base.med = Some(med);
                }
                PolicyResult::Accept(route)
            }
            PolicyAction::Reject => PolicyResult::Reject,
        };
    }

    match default_policy {
        DefaultPolicy::AcceptRoute => PolicyResult::Accept(route),
        DefaultPolicy::RejectRoute => PolicyResult::Reject,
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;
    use std::net::Ipv4Addr;

    use nbrd_utils::policy::PolicyStmt;

    use super::*;
    use crate::packet::attribute::{AsPath, Attrs, BaseAttrs};
    use crate::packet::consts::Origin;
    use crate::rib::{RouteOrigin, RouteType};

    fn test_route() -> Route {
        Route::new(
            RouteOrigin::Neighbor {
                identifier: Ipv4Addr::new(2, 2, 2, 2),
                remote_addr: IpAddr::from([10, 0, 0, 2]),
            },
            Attrs {
                base: BaseAttrs {
                    origin: Origin::Igp,
                    as_path: AsPath::default(),
                    as4_path: None,
                    nexthop: Some(IpAddr::from([10, 0, 0, 2])),
                    ll_nexthop: None,
                    med: None,
                    local_pref: None,
                    aggregator: None,
                    as4_aggregator: None,
                    atomic_aggregate: false,
                },
                comm: None,
                unknown: vec![],
            },
            RouteType::External,
        )
    }

    #[test]
    fn default_accept() {
        let route = test_route();
        let result = apply(
            None,
            DefaultPolicy::AcceptRoute,
            "10.1.0.0/16".parse().unwrap(),
            route,
        );
        assert!(result.is_accept());
    }

    #[test]
    fn first_match_wins() {
        let policy = Policy {
            name: "import".to_owned(),
            stmts: vec![
                PolicyStmt {
                    prefix: "10.0.0.0/8".parse().unwrap(),
                    ge: Some(8),
                    le: Some(32),
                    action: PolicyAction::Reject,
                    set_local_pref: None,
                    set_med: None,
                },
                PolicyStmt {
                    prefix: "0.0.0.0/0".parse().unwrap(),
                    ge: Some(0),
                    le: Some(32),
                    action: PolicyAction::Accept,
                    set_local_pref: None,
                    set_med: None,
                },
            ],
        };

        let result = apply(
            Some(&policy),
            DefaultPolicy::AcceptRoute,
            "10.1.0.0/16".parse().unwrap(),
            test_route(),
        );
        assert_eq!(result, PolicyResult::Reject);

        let result = apply(
            Some(&policy),
            DefaultPolicy::AcceptRoute,
            "192.0.2.0/24".parse().unwrap(),
            test_route(),
        );
        assert!(result.is_accept());
    }

    #[test]
    fn attribute_rewrite() {
        let policy = Policy {
            name: "import".to_owned(),
            stmts: vec![PolicyStmt {
                prefix: "10.0.0.0/8".parse().unwrap(),
                ge: Some(8),
                le: Some(32),
                action: PolicyAction::Accept,
                set_local_pref: Some(200),
                set_med: None,
            }],
        };

        let result = apply(
            Some(&policy),
            DefaultPolicy::RejectRoute,
            "10.1.0.0/16".parse().unwrap(),
            test_route(),
        );
        let PolicyResult::Accept(route) = result else {
            panic!("expected the route to be accepted");
        };
        assert_eq!(route.attrs.base.local_pref, Some(200));
    }
}
