//! Demo binary: serve a completion endpoint backed by an upstream provider,
//! or stream a completion from such an endpoint to the terminal.

mod complete;
mod serve;

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokenwire_core::ProviderFormat;
use tokenwire_core::observability::init_observability;

#[derive(Debug, Parser)]
#[command(name = "tokenwire", version, about = "Stream model output over HTTP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve POST /api/completion, proxying to an upstream provider.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: SocketAddr,
        /// openai, anthropic, cohere, huggingface, ollama or replicate.
        #[arg(long, default_value = "openai")]
        provider: ProviderFormat,
        #[arg(long, default_value = "gpt-4o-mini")]
        model: String,
        /// Multiplex a data side channel into the response.
        #[arg(long)]
        with_data: bool,
        /// Abort upstream streams after this many seconds.
        #[arg(long)]
        deadline_secs: Option<u64>,
    },
    /// Stream one completion from a served endpoint.
    Complete {
        #[arg(long, default_value = "http://127.0.0.1:3000/api/completion")]
        endpoint: String,
        /// Decode the tagged text+data protocol.
        #[arg(long)]
        data: bool,
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    init_observability();

    match Cli::parse().command {
        Command::Serve {
            addr,
            provider,
            model,
            with_data,
            deadline_secs,
        } => {
            let options = serve::ServeOptions {
                addr,
                provider,
                model,
                with_data,
                deadline: deadline_secs.map(Duration::from_secs),
            };
            serve::run(options).await?;
        }
        Command::Complete {
            endpoint,
            data,
            prompt,
        } => complete::run(&endpoint, data, &prompt).await?,
    }
    Ok(())
}
