//! Loopback echo demo
//!
//! Usage:
//!   p2p-echo --message "hello"
//!   p2p-echo --config config/bridge.toml --json-logs
//!
//! Starts two hosts on the in-memory library, echoes one message over a
//! stream between them, then round-trips it through a pubsub topic.

use actor_runtime::{Process, Runtime, Term};
use anyhow::{anyhow, bail, Context, Result};
use bridge_config::{init_logging, BridgeConfig, LogFormat};
use clap::Parser;
use libp2p_bridge::{Libp2p, LoopbackLibrary, PERMANENT_ADDR_TTL};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};

const ECHO_PROTOCOL: &str = "/echo/1.0.0";
const SERVER_ADDR: &str = "/ip4/127.0.0.1/tcp/4001";
const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "p2p-echo")]
#[command(about = "Echo a message between two loopback libp2p hosts")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Message to echo
    #[arg(short, long, default_value = "hello from the bridge")]
    message: String,

    /// Pubsub topic for the round-trip
    #[arg(short, long, default_value = "echo")]
    topic: String,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = BridgeConfig::load(args.config.as_deref())?;
    if let Some(level) = &args.log_level {
        config.log_level = level.clone();
    }
    if args.json_logs {
        config.log_format = LogFormat::Json;
    }
    init_logging(&config)?;

    let runtime = Runtime::new()?;
    let bridge = Libp2p::new(Arc::new(LoopbackLibrary::without_release_ledger()), runtime.clone(), config);

    let (ready_tx, ready_rx) = oneshot::channel();
    let server = bridge.clone();
    let server_pid = runtime.spawn(|process| async move {
        if let Err(e) = serve(server, process, ready_tx).await {
            error!(error = %e, "Echo server failed");
        }
    });
    info!(pid = %server_pid, "Echo server spawned");

    let (server_id, server_addrs) = tokio::time::timeout(TIMEOUT, ready_rx)
        .await
        .context("echo server did not start in time")?
        .context("echo server exited before it was ready")?;

    let (done_tx, done_rx) = oneshot::channel();
    let client = bridge.clone();
    let message = args.message.clone();
    let topic = args.topic.clone();
    runtime.spawn(|process| async move {
        let outcome = run_client(client, process, server_id, server_addrs, message, topic).await;
        done_tx.send(outcome).ok();
    });

    let (echoed, published) = tokio::time::timeout(TIMEOUT, done_rx)
        .await
        .context("client did not finish in time")?
        .map_err(|_| anyhow!("client exited without a result"))??;

    println!("stream echo: {}", String::from_utf8_lossy(&echoed));
    println!("pubsub echo: {}", String::from_utf8_lossy(&published));

    runtime.exit(&server_pid);
    let stats = bridge.registry().metrics();
    info!(live_handles = stats.live(), "Demo finished");
    Ok(())
}

/// Echo server: answers every inbound stream with what it read
async fn serve(bridge: Libp2p, mut process: Process, ready: oneshot::Sender<(Term, Term)>) -> Result<()> {
    let option = bridge.listen_addr(&Term::binary(SERVER_ADDR))?;
    let host = bridge.host_new(&Term::list(vec![option.to_term()]))?.to_term();
    bridge.host_set_stream_handler(&host, &Term::binary(ECHO_PROTOCOL))?;

    let id = bridge.host_id(&host)?.to_term();
    let addrs = bridge.host_addrs(&host)?.to_term();
    ready
        .send((id, addrs))
        .map_err(|_| anyhow!("demo stopped waiting for the server"))?;

    while let Some(msg) = process.recv().await {
        let stream = match msg.as_tuple() {
            Some([tag, stream]) if tag.is_atom("request") => stream,
            _ => continue,
        };

        let mut received = Vec::new();
        loop {
            let chunk = bridge.stream_read(stream).await?;
            if chunk.is_empty() {
                break;
            }
            received.extend_from_slice(&chunk);
        }
        bridge.stream_write(stream, &Term::binary(received)).await?;
        bridge.stream_close(stream)?;
    }
    Ok(())
}

async fn run_client(
    bridge: Libp2p,
    mut process: Process,
    server_id: Term,
    server_addrs: Term,
    message: String,
    topic: String,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let host = bridge.host_new(&Term::list(Vec::new()))?.to_term();
    let peerstore = bridge.peerstore_of(&host)?.to_term();
    bridge.peerstore_add_addrs(
        &peerstore,
        &server_id,
        &server_addrs,
        &Term::Int(PERMANENT_ADDR_TTL as i64),
    )?;

    let stream = bridge
        .host_new_stream(&host, &server_id, &Term::binary(ECHO_PROTOCOL))
        .await?
        .to_term();
    bridge.stream_write(&stream, &Term::binary(message.clone())).await?;
    bridge.stream_close_write(&stream)?;

    let mut echoed = Vec::new();
    loop {
        let chunk = bridge.stream_read(&stream).await?;
        if chunk.is_empty() {
            break;
        }
        echoed.extend_from_slice(&chunk);
    }
    bridge.stream_close(&stream)?;

    let pubsub = bridge.new_pubsub(&host)?.to_term();
    let topic = bridge.pubsub_join(&pubsub, &Term::binary(topic))?.to_term();
    let subscription = bridge.topic_subscribe(&topic)?.to_term();
    bridge.topic_publish(&topic, &Term::binary(message))?;

    let published = match process.recv_timeout(TIMEOUT).await {
        Some(msg) => received_message(&bridge, &msg)?,
        None => bail!("no pubsub message within {TIMEOUT:?}"),
    };

    bridge.subscription_cancel(&subscription)?;
    bridge.host_close(&host)?;
    Ok((echoed, published))
}

fn received_message(bridge: &Libp2p, msg: &Term) -> Result<Vec<u8>> {
    match msg.as_tuple() {
        Some([tag, payload]) if tag.is_atom("sub") => Ok(bridge.message_data(payload)?.to_vec()),
        _ => bail!("unexpected mailbox message {msg}"),
    }
}
