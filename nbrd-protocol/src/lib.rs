//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

use std::future::Future;

use nbrd_utils::ibus::{IbusChannelsTx, IbusMsg, IbusReceiver};
use nbrd_utils::protocol::Protocol;
use nbrd_utils::task::Task;
use tokio::sync::mpsc;
use tokio::sync::mpsc::{Receiver, Sender};
use tracing::{Instrument, debug_span};

/// A trait for protocol speaker instances.
///
/// Each instance owns all of its protocol state and runs on a dedicated
/// task. I/O, timers and worker tasks communicate with the instance
/// exclusively through the protocol input channels, so every state mutation
/// happens serialized on the instance task.
pub trait ProtocolInstance
where
    Self: Send + Sized + 'static,
{
    /// Protocol type.
    const PROTOCOL: Protocol;

    /// Configuration handed to the instance at spawn time. Configuration is
    /// a plain value, not a process-wide singleton.
    type Config: Send + 'static;
    type ProtocolInputMsg: Send + std::fmt::Debug;
    type ProtocolInputChannelsTx: Clone + Send + Sync + 'static;
    type ProtocolInputChannelsRx: MessageReceiver<Self::ProtocolInputMsg>;

    /// Create protocol instance.
    fn new(
        name: String,
        config: Self::Config,
        tx: InstanceChannelsTx<Self>,
    ) -> Self;

    /// Optional instance initialization routine, called once before the
    /// event loop starts.
    fn init(&mut self) {}

    /// Optional instance shutdown routine, called after the event loop
    /// returns. This is where protocol-level draining happens.
    fn shutdown(self) {}

    /// Process a message received over the internal bus.
    fn process_ibus_msg(&mut self, msg: IbusMsg);

    /// Process a protocol input message.
    fn process_protocol_msg(&mut self, msg: Self::ProtocolInputMsg);

    /// Create channels for all protocol input events.
    fn protocol_input_channels()
    -> (Self::ProtocolInputChannelsTx, Self::ProtocolInputChannelsRx);
}

/// Transmit channels available to an instance and its child tasks.
#[derive(Debug)]
pub struct InstanceChannelsTx<P: ProtocolInstance> {
    pub ibus: IbusChannelsTx,
    pub protocol_input: P::ProtocolInputChannelsTx,
}

/// Receiver abstraction multiplexing all protocol input channels of an
/// instance.
pub trait MessageReceiver<T: Send>
where
    Self: Send,
{
    fn recv(&mut self) -> impl Future<Output = Option<T>> + Send;
}

/// Handle used by the supervisor to stop a running instance.
#[derive(Debug)]
pub struct InstanceHandle {
    shutdown_tx: Sender<()>,
    task: Task<()>,
}

// ===== impl InstanceChannelsTx =====

impl<P: ProtocolInstance> Clone for InstanceChannelsTx<P> {
    fn clone(&self) -> Self {
        InstanceChannelsTx {
            ibus: self.ibus.clone(),
            protocol_input: self.protocol_input.clone(),
        }
    }
}

// ===== impl InstanceHandle =====

impl InstanceHandle {
    /// Requests the instance to shut down and waits for its task to finish.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

// ===== helper functions =====

async fn event_loop<P>(
    instance: &mut P,
    mut ibus_rx: IbusReceiver,
    mut protocol_input_rx: P::ProtocolInputChannelsRx,
    mut shutdown_rx: Receiver<()>,
) where
    P: ProtocolInstance,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => {
                return;
            }
            Some(msg) = ibus_rx.recv() => {
                instance.process_ibus_msg(msg);
            }
            Some(msg) = protocol_input_rx.recv() => {
                instance.process_protocol_msg(msg);
            }
        }
    }
}

async fn run<P>(
    name: String,
    config: P::Config,
    ibus_tx: IbusChannelsTx,
    ibus_rx: IbusReceiver,
    shutdown_rx: Receiver<()>,
) where
    P: ProtocolInstance,
{
    // Start protocol input channels.
    let (proto_input_tx, proto_input_rx) = P::protocol_input_channels();

    let instance_channels_tx = InstanceChannelsTx {
        ibus: ibus_tx,
        protocol_input: proto_input_tx,
    };

    // Create and initialize protocol instance.
    let mut instance = P::new(name, config, instance_channels_tx);
    instance.init();

    // Run event loop until the supervisor requests shutdown.
    event_loop(&mut instance, ibus_rx, proto_input_rx, shutdown_rx).await;

    // Drain protocol sessions before exiting.
    instance.shutdown();
}

// ===== global functions =====

/// Spawns a protocol instance on its own task and returns a handle for
/// stopping it.
pub fn spawn_protocol_task<P>(
    name: String,
    config: P::Config,
    ibus_tx: IbusChannelsTx,
    ibus_rx: IbusReceiver,
) -> InstanceHandle
where
    P: ProtocolInstance,
{
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let span = debug_span!("instance", protocol = %P::PROTOCOL, %name);
    let task = Task::spawn(
        run::<P>(name, config, ibus_tx, ibus_rx, shutdown_rx).instrument(span),
    );

    InstanceHandle { shutdown_tx, task }
}
