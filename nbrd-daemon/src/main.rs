//
// Copyright (c) The nbrd authors
//
// SPDX-License-Identifier: MIT
//

mod config;

use std::time::Duration;

use clap::Parser;
use nbrd_protocol::spawn_protocol_task;
use nbrd_utils::ibus;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

// Bounded time to wait for the speakers to drain their sessions.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Parser)]
#[command(name = "nbrd", about = "Network neighbour daemon")]
struct CliArgs {
    /// Path to the configuration file
    #[arg(short = 'f', long = "config")]
    config: Option<String>,
}

fn init_tracing(config: &config::LoggingCfg) {
    let env_filter =
        EnvFilter::builder().parse_lossy(format!("nbrd={}", config.level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .init();
}

async fn run(config: Config) {
    // Create the internal bus connecting the daemon components.
    let (ibus_tx, ibus_rx) = ibus::ibus_channels();

    // Start the routing component.
    let _routing = nbrd_routing::spawn_routing_task(
        ibus_tx.clone(),
        ibus_rx.routing,
    );

    // Start the OSPF speaker.
    let ospf = spawn_protocol_task::<nbrd_ospf::instance::Instance>(
        "main".to_owned(),
        config.ospf_instance_config(),
        ibus_tx.clone(),
        ibus_rx.ospf,
    );

    // Start the BGP speaker, when a local AS is configured.
    let bgp = config.bgp_instance_config().map(|bgp_config| {
        spawn_protocol_task::<nbrd_bgp::instance::Instance>(
            "main".to_owned(),
            bgp_config,
            ibus_tx.clone(),
            ibus_rx.bgp,
        )
    });

    info!("nbrd is up");

    // Wait for a shutdown signal.
    let mut sigterm = tokio::signal::unix::signal(
        tokio::signal::unix::SignalKind::terminate(),
    )
    .expect("failed to register the SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => (),
        _ = sigterm.recv() => (),
    }

    info!("shutting down");

    // Drain the speakers: BGP sends a Cease NOTIFICATION to each
    // established peer, OSPF floods its self-originated LSAs at MaxAge.
    let shutdown = async {
        if let Some(bgp) = bgp {
            bgp.stop().await;
        }
        ospf.stop().await;
    };
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, shutdown).await.is_err() {
        error!("shutdown timed out");
    }

    // The final NOTIFICATION and MaxAge LSU messages are delivered by
    // detached Tx tasks; give them a moment before the runtime goes away.
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn main() {
    // Parse command-line parameters.
    let args = CliArgs::parse();

    // Read configuration file.
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            eprintln!("failed to load configuration: {}", error);
            std::process::exit(1);
        }
    };

    // Initialize tracing.
    init_tracing(&config.logging);

    // Start the async runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to create async runtime")
        .block_on(run(config));
}
