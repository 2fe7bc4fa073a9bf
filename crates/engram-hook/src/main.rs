//! Prompt augmentation hook
//!
//! Reads the raw user prompt from stdin, runs it through the memory
//! pipeline, and writes the augmented prompt to stdout: the curated
//! context block prepended when anything relevant was found, the prompt
//! unchanged otherwise. Logs go to stderr so stdout stays clean.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use engram_core::{Config, Gateway, OpenAiCompatChat, Pipeline, Store, VoyageEmbed};

#[derive(Parser, Debug)]
#[command(name = "engram-hook", about = "Augment a prompt with relevant long-term memory")]
struct Args {
    /// Database path (overrides ENGRAM_STORE_PATH)
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Directory for trace dumps (overrides ENGRAM_DEBUG_DIR)
    #[arg(long)]
    debug_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Optional dotfile fallback for secrets, then the environment
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    if args.store_path.is_some() {
        config.store_path = args.store_path;
    }
    if args.debug_dir.is_some() {
        config.debug_dir = args.debug_dir;
    }

    let mut prompt = String::new();
    tokio::io::stdin()
        .read_to_string(&mut prompt)
        .await
        .context("reading prompt from stdin")?;

    let store = Arc::new(Store::new(config.store_path.clone()).context("opening store")?);
    let gateway = Arc::new(
        Gateway::new(
            Arc::new(OpenAiCompatChat::new(&config.chat_base_url, &config.chat_api_key)),
            Arc::new(
                VoyageEmbed::new(&config.embed_api_key, &config.embedding_model)
                    .with_dimension(config.embedding_dimension),
            ),
        )
        .with_dimension(config.embedding_dimension),
    );
    let debug_dir = config.debug_dir.clone();
    let pipeline = Pipeline::new(store, gateway, config);

    // Fresh token counters for this run
    pipeline.gateway().reset_usage();
    let outcome = pipeline.process_prompt(&prompt).await;

    if let Some(debug_dir) = debug_dir {
        if let Err(err) = dump_trace(&debug_dir, &outcome.trace) {
            tracing::warn!(error = %err, "trace dump failed");
        }
    }

    let augmented = if outcome.context.is_empty() {
        prompt
    } else {
        format!("Relevant memory:\n{}\n\n{}", outcome.context, prompt)
    };

    let mut stdout = tokio::io::stdout();
    stdout.write_all(augmented.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

fn dump_trace(debug_dir: &PathBuf, trace: &engram_core::Trace) -> Result<()> {
    std::fs::create_dir_all(debug_dir)?;
    let path = debug_dir.join(format!(
        "trace-{}.json",
        chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f")
    ));
    std::fs::write(&path, serde_json::to_vec_pretty(trace)?)?;
    tracing::debug!(path = %path.display(), "trace written");
    Ok(())
}
