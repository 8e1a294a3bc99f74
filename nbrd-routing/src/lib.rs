//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

pub mod interface;
pub mod netlink;
pub mod rib;

use nbrd_utils::ibus::{IbusChannelsTx, IbusMsg, IbusReceiver};
use nbrd_utils::task::Task;
use tracing::{Instrument, debug_span};

use crate::rib::Rib;

// The routing component: owns the global RIB and the netlink handle, and
// consumes the single southbound queue fed by both protocol speakers. The
// order of enqueue defines the order of visibility to the kernel.
pub struct Master {
    // Internal bus channels.
    pub ibus_tx: IbusChannelsTx,
    pub ibus_rx: IbusReceiver,
    // Netlink handle.
    pub netlink_handle: rtnetlink::Handle,
    // Global RIB.
    pub rib: Rib,
}

// ===== impl Master =====

impl Master {
    async fn run(&mut self) {
        // Enumerate the system interfaces and derive the Router ID.
        interface::startup_dump(&self.netlink_handle, &self.ibus_tx).await;

        // Process southbound requests in arrival order.
        while let Some(msg) = self.ibus_rx.recv().await {
            self.process_ibus_msg(msg).await;
        }
    }

    async fn process_ibus_msg(&mut self, msg: IbusMsg) {
        match msg {
            IbusMsg::RouteAdd(msg) => {
                self.rib
                    .route_add(msg, &self.netlink_handle, &self.ibus_tx)
                    .await;
            }
            IbusMsg::RouteDel(msg) => {
                self.rib
                    .route_del(msg, &self.netlink_handle, &self.ibus_tx)
                    .await;
            }
            IbusMsg::NexthopTrack(addr) => {
                self.rib.nexthop_track(addr, &self.ibus_tx);
            }
            IbusMsg::NexthopUntrack(addr) => {
                self.rib.nexthop_untrack(addr);
            }
            // Ignore other events.
            _ => {}
        }
    }
}

// ===== global functions =====

// Spawns the routing component on its own task.
pub fn spawn_routing_task(
    ibus_tx: IbusChannelsTx,
    ibus_rx: IbusReceiver,
) -> Task<()> {
    let span = debug_span!("routing");

    Task::spawn(
        async move {
            let netlink_handle = netlink::init();
            let mut master = Master {
                ibus_tx,
                ibus_rx,
                netlink_handle,
                rib: Default::default(),
            };
            master.run().await;
        }
        .instrument(span),
    )
}
