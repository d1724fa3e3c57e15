//! Echo server: every frame received is broadcast back to all clients.
//!
//! Clients send frames xored with 0xFF and then base64 encoded (see `put`).
//! Run with `cargo run --example echo_server -- --listen 127.0.0.1:27010`
//! and stop with Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use chunkwire::filter::{Base64DecodeFilter, FilterPipeline, FrameExtractor, XorFilter};
use chunkwire::handler::handler_fn;
use chunkwire::manager::AllInOnePolicy;
use chunkwire::protocol::Frame;
use chunkwire::{ConnectionGroup, ConnectionManager, Dispatcher, ServerConfig};

#[derive(Debug, Parser)]
#[command(name = "echo_server", about = "Broadcast every received frame to all clients")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides the configuration file)
    #[arg(short, long)]
    listen: Option<String>,

    /// Maximum concurrent handlers (overrides the configuration file)
    #[arg(long)]
    concurrency: Option<usize>,

    /// XOR mask byte applied after base64 decoding
    #[arg(long, default_value_t = 0xFF)]
    mask: u8,

    /// Expect raw frames instead of the base64 + xor stream
    #[arg(long)]
    plain: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config = config.with_listen_addr(listen);
    }
    if let Some(limit) = args.concurrency {
        config = config.with_dispatcher_concurrency(limit);
    }
    config.validate()?;

    let group = ConnectionGroup::with_capacity("echo", config.connections_pool_init_size);
    let echo_group = group.clone();
    let dispatcher = Dispatcher::new(
        "echo",
        config.dispatcher_concurrency,
        handler_fn(move |frame: Frame| {
            let group = echo_group.clone();
            async move {
                info!(%frame, "received");
                let delivered = group.broadcast(frame.encode()).await;
                info!(delivered, "echoed");
                Ok(())
            }
        }),
    );
    dispatcher.start()?;
    group.set_handler(Arc::new(dispatcher.clone()));

    let mask = args.mask;
    let plain = args.plain;
    let manager = Arc::new(
        ConnectionManager::new(config.clone())
            .with_policy(AllInOnePolicy::new(group))
            .with_pipeline_factory(move || {
                let mut pipeline = FilterPipeline::new();
                if !plain {
                    pipeline.append(Base64DecodeFilter::new());
                    if let Ok(xor) = XorFilter::new([mask]) {
                        pipeline.append(xor);
                    }
                }
                pipeline.append(FrameExtractor::new());
                pipeline
            }),
    );

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.listen_addr))?;

    let server = tokio::spawn({
        let manager = manager.clone();
        async move { manager.start(listener).await }
    });

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
    }
    info!("shutting down");

    manager.stop()?;
    server.await.context("server task panicked")??;
    dispatcher.shutdown().await?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
