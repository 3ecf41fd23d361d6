//! Lightwit CLI
//!
//! Command-line interface for running the light witness worker locally.

use clap::{Parser, Subcommand};
use lightwit_core::memory::{MemoryChain, RecordingPeerLink, ScriptedMath};
use lightwit_core::{
    BigNum, BlockHeight, Denomination, PeerHandle, RequestId, WitnessFilter, WitnessRequest,
};
use lightwit_worker::config::LoggingConfig;
use lightwit_worker::{WitnessWorker, WorkerConfig, WorkerEvent, WorkerMetrics};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "lightwit")]
#[command(version)]
#[command(about = "Accumulator witness worker for light peers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, env = "LIGHTWIT_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a worker against an in-memory chain and print the replies
    Simulate {
        /// Chain tip height
        #[arg(long, default_value = "1000")]
        tip: BlockHeight,

        /// Number of requests to submit
        #[arg(short, long, default_value = "3")]
        requests: u32,

        /// Starting height of every request
        #[arg(long, default_value = "500")]
        height: BlockHeight,

        /// Coin denomination
        #[arg(short, long, default_value = "10")]
        denomination: u32,

        /// NOT_ENOUGH_MINTS outcomes to play before witnesses succeed
        #[arg(long, default_value = "0")]
        short_mints: usize,

        /// Seconds to wait for every request to finish
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Print the summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

fn init_logging(logging: &LoggingConfig, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let registry = tracing_subscriber::registry().with(env_filter);
    if logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = WorkerConfig::load(cli.config.as_deref())?;
    init_logging(&config.logging, cli.verbose);

    match cli.command {
        Commands::Simulate {
            tip,
            requests,
            height,
            denomination,
            short_mints,
            timeout,
            json,
        } => {
            let denomination = Denomination::from_value(denomination)?;
            simulate(
                config,
                Simulation {
                    tip,
                    requests,
                    height,
                    denomination,
                    short_mints,
                    timeout: Duration::from_secs(timeout),
                    json,
                },
            )
            .await?;
        }

        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}

struct Simulation {
    tip: BlockHeight,
    requests: u32,
    height: BlockHeight,
    denomination: Denomination,
    short_mints: usize,
    timeout: Duration,
    json: bool,
}

async fn simulate(config: WorkerConfig, sim: Simulation) -> anyhow::Result<()> {
    let chain = Arc::new(MemoryChain::new(sim.tip));
    let math = Arc::new(ScriptedMath::new());
    math.push_not_enough_mints(sim.short_mints);
    let peers = Arc::new(RecordingPeerLink::new());

    let mut builder = WitnessWorker::builder(config.clone())
        .chain(chain)
        .math(math.clone())
        .peers(peers.clone());
    if config.metrics.enabled {
        builder = builder.metrics(WorkerMetrics::new()?);
    }
    let worker = builder.build()?;

    let mut events = worker.subscribe();
    worker.start()?;

    for i in 0..sim.requests {
        let request = WitnessRequest::new(
            RequestId(i + 1),
            sim.height,
            sim.denomination,
            WitnessFilter::match_all(),
            BigNum::from_u64(u64::from(i) + 1),
            PeerHandle::new(u64::from(i % 4) + 1, format!("127.0.0.1:{}", 12700 + i % 4)),
        )?;
        worker.submit(request);
    }
    tracing::info!(
        requests = sim.requests,
        tip = sim.tip,
        height = sim.height,
        "requests submitted"
    );

    let mut finished = 0;
    let deadline = tokio::time::sleep(sim.timeout);
    tokio::pin!(deadline);
    while finished < sim.requests {
        tokio::select! {
            _ = &mut deadline => {
                tracing::warn!(finished, "simulation timed out");
                break;
            }
            event = events.recv() => match event {
                Ok(WorkerEvent::Replied { .. }) | Ok(WorkerEvent::Rejected { .. }) => finished += 1,
                Ok(WorkerEvent::Faulted { error }) => {
                    tracing::error!(%error, "worker faulted");
                    break;
                }
                Ok(WorkerEvent::Stopped) => break,
                Ok(WorkerEvent::Requeued { .. }) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "event stream interrupted");
                    break;
                }
            },
        }
    }
    worker.stop().await;

    let stats = worker.stats();
    let sent = peers.sent();
    if sim.json {
        let replies: Vec<_> = sent
            .iter()
            .map(|m| {
                serde_json::json!({
                    "peer": m.peer.addr,
                    "command": m.command,
                    "payload": hex::encode(&m.payload),
                })
            })
            .collect();
        let summary = serde_json::json!({
            "processed": stats.processed,
            "replies": stats.replies,
            "rejections": stats.rejections,
            "requeues": stats.requeues,
            "delivery_failures": stats.delivery_failures,
            "computations": math.call_count(),
            "fault": stats.last_fault,
            "messages": replies,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("Simulation finished");
        println!("  Processed:   {}", stats.processed);
        println!("  Replies:     {}", stats.replies);
        println!("  Rejections:  {}", stats.rejections);
        println!("  Requeues:    {}", stats.requeues);
        println!("  Computations: {}", math.call_count());
        if let Some(fault) = &stats.last_fault {
            println!("  Fault:       {}", fault);
        }
        println!();
        for message in &sent {
            println!(
                "{} {} {}",
                message.peer.addr,
                message.command,
                hex::encode(&message.payload)
            );
        }
        if let Some(metrics) = worker.metrics() {
            println!();
            print!("{}", metrics.render()?);
        }
    }

    Ok(())
}
