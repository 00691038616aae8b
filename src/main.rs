use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use courier::agent::{tag_reply, Agent, AgentDeps, EventRouter};
use courier::config::Config;
use courier::error::TransportError;
use courier::llm::OpenAiProvider;
use courier::retrieval::{HttpEmbeddings, MessageIndex};
use courier::scheduler::{Dispatch, Scheduler, TaskStore};
use courier::transport::{BridgeClient, BridgePort};

#[derive(Parser)]
#[command(name = "courier", about = "Autonomous messaging assistant", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "courier.toml")]
    config: PathBuf,
}

/// Scheduler delivery through the bridge. Scheduled payloads are
/// bot-authored, so they carry the reply marker like any other output.
struct BridgeDispatch {
    bridge: Arc<BridgeClient>,
}

#[async_trait]
impl Dispatch for BridgeDispatch {
    async fn deliver(&self, recipient: &str, payload: &str) -> Result<(), TransportError> {
        self.bridge
            .send_message(recipient, &tag_reply(payload), None)
            .await
            .map(|_| ())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    let timezone = config.parsed_timezone()?;

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    let bridge = Arc::new(BridgeClient::spawn(&config.bridge).await?);
    info!("waiting for bridge session");
    bridge.wait_ready().await;
    info!("bridge ready");

    let embeddings = Arc::new(HttpEmbeddings::new(&config.embedding));
    let index = Arc::new(MessageIndex::open(
        &config.data_dir.join("messages.db"),
        embeddings,
    )?);

    let store = Arc::new(TaskStore::open(&config.data_dir.join("scheduler.db"))?);
    let scheduler = Arc::new(Scheduler::new(
        store,
        Arc::new(BridgeDispatch {
            bridge: Arc::clone(&bridge),
        }),
    ));
    scheduler.recover()?;
    let scheduler_handle = Arc::clone(&scheduler).spawn();

    let llm = Arc::new(OpenAiProvider::new(&config.llm));

    let agent = Agent::new(
        AgentDeps {
            bridge: Arc::clone(&bridge) as Arc<dyn BridgePort>,
            llm,
            index,
            scheduler: Arc::clone(&scheduler),
        },
        &config.agent,
        timezone,
    );
    bridge.set_event_handler(EventRouter::new(agent)).await;

    info!("courier is running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    scheduler.shutdown();
    let _ = scheduler_handle.await;
    bridge.shutdown().await;

    Ok(())
}
