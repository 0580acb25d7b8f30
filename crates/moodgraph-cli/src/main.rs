mod config;
mod display;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use moodgraph_ai::{LifecycleManager, OnnxBackend, pipeline};
use moodgraph_server::AppContext;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::ModelArgs;

#[derive(Parser)]
#[command(name = "moodgraph", version, about = "Multi-label emotion classification")]
struct Cli {
    #[command(flatten)]
    model: ModelArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP prediction API.
    Serve {
        #[arg(long, env = "MOODGRAPH_BIND", default_value = "0.0.0.0:7860")]
        bind: SocketAddr,
    },
    /// Classify one text and print the result.
    Predict {
        text: String,
        /// Print the raw JSON response.
        #[arg(long)]
        json: bool,
    },
    /// Show labels, thresholds and metrics without loading weights.
    Inspect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    info!("moodgraph v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.model.to_config();
    info!(
        model_dir = %config.model_dir.display(),
        strategy = ?config.strategy,
        startup = ?config.startup,
        quantize = config.quantize,
        "model configuration"
    );
    let manager = LifecycleManager::from_config(config, Arc::new(OnnxBackend));

    match cli.command {
        Command::Serve { bind } => {
            let ctx = AppContext::new(manager);
            let warm = Arc::clone(&ctx.manager);
            tokio::task::spawn_blocking(move || warm.warm_up())
                .await
                .context("startup task panicked")?;
            moodgraph_server::serve(ctx, bind)
                .await
                .with_context(|| format!("serving on {bind}"))?;
        }
        Command::Predict { text, json } => {
            let (text, response) = tokio::task::spawn_blocking(move || {
                let response = pipeline::predict(&manager, &text);
                (text, response)
            })
            .await
            .context("prediction task panicked")?;
            let response = response.context("prediction failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                display::print_prediction(&text, &response);
            }
        }
        Command::Inspect => {
            let meta = tokio::task::spawn_blocking(move || manager.ensure_metadata_loaded())
                .await
                .context("inspect task panicked")?
                .context("loading checkpoint metadata")?;
            display::print_metadata(&meta);
        }
    }

    Ok(())
}
