#![warn(missing_docs)]

//! Loopback ping-pong over the simulated transport.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use bytes::{Bytes, BytesMut};
use clap::Parser;
use tagfab_provider::{
    CompletionQueue, CompletionStatus, Domain, Endpoint, MessagingEndpoint, OpContext,
    ProviderConfig, SimFabric,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Command-line options.
#[derive(Debug, Parser)]
#[command(name = "tagfab-loopback", about = "Ping-pong messages between two simulated domains")]
struct Cli {
    /// Round trips to run.
    #[arg(long, default_value_t = 1000)]
    messages: u64,
    /// Payload size in bytes.
    #[arg(long, default_value_t = 64)]
    size: usize,
    /// Provider configuration file (.toml or .json).
    #[arg(long, env = "TAGFAB_CONFIG")]
    config: Option<PathBuf>,
}

struct Side {
    domain: Arc<Domain>,
    endpoint: Endpoint,
    cq: Arc<CompletionQueue>,
}

impl Side {
    /// Progress the domain until the next completion arrives, failing on an
    /// error completion.
    async fn wait_one(&self) -> Result<tagfab_provider::CompletionEvent> {
        loop {
            self.domain.progress(16);
            if let Some(event) = self.cq.poll() {
                if let CompletionStatus::Error(status) = event.status {
                    bail!("operation {} failed: {}", event.user_data, status);
                }
                return Ok(event);
            }
            tokio::task::yield_now().await;
        }
    }
}

fn open_side(fabric: &SimFabric, config: &ProviderConfig) -> Result<(Side, Arc<tagfab_provider::SimTransport>)> {
    let transport = fabric.transport();
    let domain = Domain::open(transport.clone(), config.clone())?;
    let mut endpoint = domain.endpoint()?;
    let cq = Arc::new(CompletionQueue::new(config.request_pool_size * 2));
    endpoint.bind_cq(cq.clone(), false)?;
    Ok((Side { domain, endpoint, cq }, transport))
}

/// Receive `count` messages and echo each one back.
async fn echo(side: Side, count: u64, size: usize) -> Result<Side> {
    let mut recv_ctx = OpContext::new(0);
    let mut send_ctx = OpContext::new(0);
    for i in 0..count {
        recv_ctx.user_data = i;
        side.endpoint.recv(BytesMut::zeroed(size), Some(&mut recv_ctx))?;
        let received = side.wait_one().await?;
        let payload = received.buf.map(BytesMut::freeze).unwrap_or_default();

        send_ctx.user_data = i;
        side.endpoint.send(payload, Some(&mut send_ctx))?;
        side.wait_one().await?;
    }
    Ok(side)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProviderConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ProviderConfig::default(),
    };
    if !config.use_context {
        bail!("the loopback demo correlates completions and needs use_context = true");
    }

    let fabric = SimFabric::default();
    let (mut ping, ping_transport) = open_side(&fabric, &config)?;
    let (mut pong, pong_transport) = open_side(&fabric, &config)?;
    ping.endpoint.connect(ping_transport.insert_peer(pong.domain.local_id()))?;
    pong.endpoint.connect(pong_transport.insert_peer(ping.domain.local_id()))?;

    tracing::info!("Running {} round trips of {} bytes", cli.messages, cli.size);

    let responder = tokio::spawn(echo(pong, cli.messages, cli.size));

    let payload = Bytes::from(vec![0xA5u8; cli.size]);
    let mut send_ctx = OpContext::new(0);
    let mut recv_ctx = OpContext::new(0);
    for i in 0..cli.messages {
        recv_ctx.user_data = i;
        ping.endpoint.recv(BytesMut::zeroed(cli.size), Some(&mut recv_ctx))?;
        send_ctx.user_data = i;
        ping.endpoint.send(payload.clone(), Some(&mut send_ctx))?;

        // One send and one receive completion per round trip, in any order.
        for _ in 0..2 {
            let event = ping.wait_one().await?;
            if event.buf.as_deref().is_some_and(|b| b != &payload[..]) {
                bail!("round trip {} returned a corrupted payload", i);
            }
        }
    }

    let mut pong = responder.await??;
    ping.endpoint.close()?;
    pong.endpoint.close()?;

    let report = serde_json::json!({
        "ping": ping.domain.metrics().snapshot(),
        "pong": pong.domain.metrics().snapshot(),
        "fabric": fabric.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
