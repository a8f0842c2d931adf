use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use flowgate_core::{
    config::Config,
    model::{ChatMessage, Role, RunRequest},
    provider::FlowProvider,
    providers::langflow::Langflow,
    telemetry::TracingSink,
};
use futures_util::StreamExt;

#[derive(Parser)]
#[command(author, version, about = "flowgate CLI smoke tool", long_about = None)]
struct Cli {
    /// Path to a JSON or TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a flow to completion and print the final text
    Run {
        #[arg(long)]
        flow: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Run a flow with streaming (prints deltas live)
    Stream {
        #[arg(long)]
        flow: String,
        #[arg(short, long, help = "Message from the user")]
        message: String,
    },
    /// Print the id of the flow's history component
    History {
        #[arg(long)]
        flow: String,
    },
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new("flowgate_core=info,flowgate_bin=info")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn user_message(flow: String, message: String) -> RunRequest {
    RunRequest {
        flow,
        messages: vec![ChatMessage {
            role: Role::User,
            content: message,
        }],
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    let _ = flowgate_core::telemetry::set_telemetry_sink(Arc::new(TracingSink));

    let cli = Cli::parse();

    let mut cfg = match &cli.config {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };
    if let Ok(base) = std::env::var("LANGFLOW_BASE_URL") {
        cfg.langflow.base_url = base;
    }
    let provider = Langflow::from_config(&cfg)?;

    match cli.command {
        Commands::Run { flow, message } => {
            let done = provider.acompletion(user_message(flow, message)).await?;
            println!("{} -> {}", done.provider, done.text);
        }
        Commands::Stream { flow, message } => {
            let mut stream = provider.astreaming(user_message(flow, message)).await?;
            use std::io::{self, Write};
            let mut saw_delta = false;
            while let Some(item) = stream.next().await {
                match item {
                    Ok(chunk) if chunk.is_finished => {
                        if saw_delta {
                            println!();
                        } else {
                            // Agentic runs without snapshots deliver all text here.
                            println!("{}", chunk.text);
                        }
                        if !chunk.finish_reason.is_empty() {
                            eprintln!("[finish: {}]", chunk.finish_reason);
                        }
                    }
                    Ok(chunk) => {
                        if !chunk.text.is_empty() {
                            saw_delta = true;
                            print!("{}", chunk.text);
                            io::stdout().flush().ok();
                        }
                    }
                    Err(err) => {
                        eprintln!("[error: {err}]");
                        break;
                    }
                }
            }
        }
        Commands::History { flow } => {
            match provider.history_component(&flow).await? {
                Some(id) => println!("{id}"),
                None => println!("none"),
            }
        }
    }

    Ok(())
}
