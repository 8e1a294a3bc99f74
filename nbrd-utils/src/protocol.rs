//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::str::FromStr;

use serde::{Deserialize, Serialize};

// The routing protocols nbrd speaks or imports routes from.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    BGP,
    DIRECT,
    OSPFV2,
    STATIC,
}

// ===== impl Protocol =====

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::BGP => write!(f, "bgp"),
            Protocol::DIRECT => write!(f, "direct"),
            Protocol::OSPFV2 => write!(f, "ospfv2"),
            Protocol::STATIC => write!(f, "static"),
        }
    }
}

impl FromStr for Protocol {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_ref() {
            "bgp" => Ok(Protocol::BGP),
            "direct" => Ok(Protocol::DIRECT),
            "ospfv2" => Ok(Protocol::OSPFV2),
            "static" => Ok(Protocol::STATIC),
            _ => Err(()),
        }
    }
}
