//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr};

use ipnetwork::IpNetwork;
use nbrd_utils::gre::GreHdr;
use nbrd_utils::policy::{DefaultPolicy, Policy};
use serde::Deserialize;

// Daemon configuration file schema.
//
// Addressing of the container interfaces is the deployment controller's
// business; the interface sections here describe the expectations the
// speakers are configured against (prefixes, MTU, tunnel endpoints).
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub router: RouterCfg,
    pub logging: LoggingCfg,
    pub interface: BTreeMap<String, InterfaceCfg>,
    pub ospf: OspfCfg,
    pub bgp: BgpCfg,
    pub policy: Vec<Policy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterCfg {
    // 32-bit Router ID, used by both OSPF and BGP.
    pub id: Option<Ipv4Addr>,
    // BGP local autonomous system number.
    pub local_as: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingCfg {
    // Tracing env-filter directive.
    pub level: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub addresses: Vec<IpNetwork>,
    pub mtu: Option<u16>,
    pub tunnel: Option<TunnelCfg>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelCfg {
    pub src: IpAddr,
    pub dst: IpAddr,
    pub key: Option<u32>,
    pub keepalive: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OspfCfg {
    // SPF coalescing window, in milliseconds.
    pub spf_hold: Option<u64>,
    pub area: BTreeMap<String, OspfAreaCfg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OspfAreaCfg {
    pub interface: BTreeMap<String, OspfInterfaceCfg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OspfInterfaceCfg {
    pub cost: Option<u16>,
    pub hello: Option<u16>,
    pub dead: Option<u16>,
    pub priority: Option<u8>,
    pub network_type: Option<NetworkType>,
    pub passive: Option<bool>,
    pub auth_password: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    P2p,
    Broadcast,
    Loopback,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BgpCfg {
    pub peer: BTreeMap<IpAddr, BgpPeerCfg>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BgpPeerCfg {
    pub remote_as: u32,
    pub hold: Option<u16>,
    pub keepalive: Option<u16>,
    pub connect_retry: Option<u16>,
    pub mrai: Option<u16>,
    pub capabilities: Vec<BgpCapabilityCfg>,
    pub import: Option<String>,
    pub export: Option<String>,
    pub default_import: Option<DefaultPolicy>,
    pub default_export: Option<DefaultPolicy>,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
pub enum BgpCapabilityCfg {
    #[serde(rename = "MP_IPV6_UNICAST")]
    MpIpv6Unicast,
    #[serde(rename = "ROUTE_REFRESH")]
    RouteRefresh,
    #[serde(rename = "ASN4")]
    Asn4,
}

// ===== impl Config =====

impl Config {
    const DFLT_FILEPATH: &'static str = "/etc/nbrd.toml";

    // Loads and validates the configuration file. Errors abort startup
    // with a line-precise message.
    pub(crate) fn load(config_file: Option<&str>) -> Result<Config, String> {
        let config_file = config_file.unwrap_or(Config::DFLT_FILEPATH);

        let contents = std::fs::read_to_string(config_file)
            .map_err(|error| format!("{}: {}", config_file, error))?;
        let config: Config = toml::from_str(&contents)
            .map_err(|error| format!("{}: {}", config_file, error))?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        // Validate the Router ID.
        if let Some(router_id) = self.router.id
            && router_id.is_unspecified()
        {
            return Err("router.id must be non-zero".to_owned());
        }

        // Validate the local AS number.
        if self.router.local_as == Some(0) {
            return Err("router.local_as must be in 1..4294967295".to_owned());
        }

        // Only the backbone area is supported.
        for area_id in self.ospf.area.keys() {
            if area_id != "0.0.0.0" && area_id != "0" {
                return Err(format!(
                    "ospf.area.{}: only the backbone area is supported",
                    area_id
                ));
            }
        }

        // Validate the per-interface OSPF timers.
        for (area_id, area) in &self.ospf.area {
            for (ifname, iface) in &area.interface {
                if !self.interface.contains_key(ifname) {
                    return Err(format!(
                        "ospf.area.{}.interface.{}: unknown interface",
                        area_id, ifname
                    ));
                }

                let hello = iface.hello.unwrap_or(10);
                let dead = iface.dead.unwrap_or(40);
                if hello == 0 || hello >= dead {
                    return Err(format!(
                        "ospf.area.{}.interface.{}: \
                         hello interval must be non-zero and smaller than \
                         the dead interval",
                        area_id, ifname
                    ));
                }

                if let Some(password) = &iface.auth_password
                    && password.len() > 8
                {
                    return Err(format!(
                        "ospf.area.{}.interface.{}: \
                         simple passwords are limited to 8 octets",
                        area_id, ifname
                    ));
                }
            }
        }

        // Validate the BGP peers.
        for (addr, peer) in &self.bgp.peer {
            if self.router.local_as.is_none() {
                return Err(format!(
                    "bgp.peer.{}: router.local_as is not configured",
                    addr
                ));
            }
            if peer.remote_as == 0 {
                return Err(format!(
                    "bgp.peer.{}: remote_as must be in 1..4294967295",
                    addr
                ));
            }

            // The negotiated hold time must be 0 or >= 3.
            if let Some(hold) = peer.hold
                && hold != 0
                && hold < 3
            {
                return Err(format!(
                    "bgp.peer.{}: hold must be 0 or at least 3 seconds",
                    addr
                ));
            }

            // Validate policy references.
            for policy in [&peer.import, &peer.export].into_iter().flatten()
            {
                if !self.policy.iter().any(|p| p.name == *policy) {
                    return Err(format!(
                        "bgp.peer.{}: unknown policy {:?}",
                        addr, policy
                    ));
                }
            }
        }

        // Validate tunnel MTU accounting.
        for (ifname, iface) in &self.interface {
            if let (Some(tunnel), Some(mtu)) = (&iface.tunnel, iface.mtu) {
                let hdr = GreHdr {
                    protocol_type: 0x0800,
                    key: tunnel.key,
                    seqno: None,
                };
                if mtu <= hdr.overhead() {
                    return Err(format!(
                        "interface.{}: MTU too small for the GRE overhead \
                         of {} octets",
                        ifname,
                        hdr.overhead()
                    ));
                }
            }
        }

        Ok(())
    }

    // Builds the OSPF instance configuration.
    pub(crate) fn ospf_instance_config(
        &self,
    ) -> nbrd_ospf::instance::InstanceCfg {
        use nbrd_ospf::interface::InterfaceType;

        let mut instance_cfg = nbrd_ospf::instance::InstanceCfg {
            router_id: self.router.id,
            ..Default::default()
        };
        if let Some(spf_hold) = self.ospf.spf_hold {
            instance_cfg.spf_hold = spf_hold;
        }

        for area in self.ospf.area.values() {
            for (ifname, iface) in &area.interface {
                let mut iface_cfg =
                    nbrd_ospf::interface::InterfaceCfg::default();
                if let Some(cost) = iface.cost {
                    iface_cfg.cost = cost;
                }
                if let Some(hello) = iface.hello {
                    iface_cfg.hello_interval = hello;
                }
                if let Some(dead) = iface.dead {
                    iface_cfg.dead_interval = dead;
                }
                if let Some(priority) = iface.priority {
                    iface_cfg.priority = priority;
                }
                if let Some(passive) = iface.passive {
                    iface_cfg.passive = passive;
                }
                iface_cfg.if_type = match iface.network_type {
                    Some(NetworkType::P2p) => InterfaceType::PointToPoint,
                    Some(NetworkType::Broadcast) | None => {
                        InterfaceType::Broadcast
                    }
                    Some(NetworkType::Loopback) => InterfaceType::Loopback,
                };
                if let Some(password) = &iface.auth_password {
                    let mut key = [0; 8];
                    let len = password.len().min(8);
                    key[..len]
                        .copy_from_slice(&password.as_bytes()[..len]);
                    iface_cfg.auth =
                        Some(nbrd_ospf::packet::AuthCtx { password: key });
                }

                instance_cfg.interfaces.insert(ifname.clone(), iface_cfg);
            }
        }

        instance_cfg
    }

    // Builds the BGP instance configuration.
    pub(crate) fn bgp_instance_config(
        &self,
    ) -> Option<nbrd_bgp::instance::InstanceCfg> {
        let local_as = self.router.local_as?;

        let mut instance_cfg = nbrd_bgp::instance::InstanceCfg {
            asn: local_as,
            identifier: self.router.id,
            ..Default::default()
        };

        for (addr, peer) in &self.bgp.peer {
            let mut nbr_cfg = nbrd_bgp::neighbor::NeighborCfg {
                peer_as: peer.remote_as,
                ..Default::default()
            };
            if let Some(hold) = peer.hold {
                nbr_cfg.holdtime = hold;
            }
            nbr_cfg.keepalive = peer.keepalive;
            if let Some(connect_retry) = peer.connect_retry {
                nbr_cfg.connect_retry_interval = connect_retry;
            }
            nbr_cfg.min_route_adv_interval = peer.mrai;
            if !peer.capabilities.is_empty() {
                nbr_cfg.afi_safi_ipv6 = peer
                    .capabilities
                    .contains(&BgpCapabilityCfg::MpIpv6Unicast);
                nbr_cfg.route_refresh = peer
                    .capabilities
                    .contains(&BgpCapabilityCfg::RouteRefresh);
                nbr_cfg.asn4 =
                    peer.capabilities.contains(&BgpCapabilityCfg::Asn4);
            }
            nbr_cfg.import_policy = peer.import.as_ref().and_then(|name| {
                self.policy.iter().find(|p| p.name == *name).cloned()
            });
            nbr_cfg.export_policy = peer.export.as_ref().and_then(|name| {
                self.policy.iter().find(|p| p.name == *name).cloned()
            });
            if let Some(default_import) = peer.default_import {
                nbr_cfg.default_import_policy = default_import;
            }
            if let Some(default_export) = peer.default_export {
                nbr_cfg.default_export_policy = default_export;
            }

            instance_cfg.neighbors.insert(*addr, nbr_cfg);
        }

        Some(instance_cfg)
    }
}

// ===== impl LoggingCfg =====

impl Default for LoggingCfg {
    fn default() -> LoggingCfg {
        LoggingCfg {
            level: "info".to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config() {
        let config: Config = toml::from_str(
            r#"
            [router]
            id = "1.1.1.1"
            local_as = 65001

            [interface.eth0]
            addresses = ["10.0.0.1/30"]

            [ospf.area."0.0.0.0".interface.eth0]
            network_type = "p2p"
            cost = 10

            [bgp.peer."10.0.0.2"]
            remote_as = 65002
            capabilities = ["MP_IPV6_UNICAST", "ROUTE_REFRESH", "ASN4"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();

        let ospf_cfg = config.ospf_instance_config();
        assert_eq!(ospf_cfg.router_id, Some("1.1.1.1".parse().unwrap()));
        assert_eq!(ospf_cfg.interfaces.len(), 1);

        let bgp_cfg = config.bgp_instance_config().unwrap();
        assert_eq!(bgp_cfg.asn, 65001);
        let nbr_cfg = &bgp_cfg.neighbors[&"10.0.0.2".parse().unwrap()];
        assert_eq!(nbr_cfg.peer_as, 65002);
        assert!(nbr_cfg.afi_safi_ipv6);
    }

    #[test]
    fn reject_non_backbone_area() {
        let config: Config = toml::from_str(
            r#"
            [router]
            id = "1.1.1.1"

            [interface.eth0]

            [ospf.area."0.0.0.1".interface.eth0]
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_short_hold_time() {
        let config: Config = toml::from_str(
            r#"
            [router]
            id = "1.1.1.1"
            local_as = 65001

            [bgp.peer."10.0.0.2"]
            remote_as = 65002
            hold = 2
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }
}
