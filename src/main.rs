mod cmd;

use clap::{Parser, Subcommand};
use std::process;

#[derive(Parser)]
#[command(name = "diffstudio")]
#[command(version)]
#[command(about = "Run Stable Diffusion and LLM inference through compiled pipelines", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate images from a text prompt
    #[command(alias = "txt2img")]
    Generate(cmd::GenerateArgs),
    /// Chat with a compiled language model
    Chat {
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Start the HTTP API server
    Serve,
    /// Download a compiled pipeline artifact
    Pull {
        name: String,
    },
    /// List local artifacts
    #[command(alias = "ls")]
    List,
    /// Remove a local artifact
    #[command(alias = "rm")]
    Delete {
        name: String,
    },
    /// List available schedulers
    Schedulers,
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    diffstudio::app::events::subscribe(diffstudio::app::events::LoggingHandler);

    let result = match cli.command {
        Commands::Generate(args) => cmd::generate(args).await,
        Commands::Chat { prompt } => cmd::chat(prompt).await,
        Commands::Serve => cmd::serve().await,
        Commands::Pull { name } => cmd::pull(&name).await,
        Commands::List => cmd::list().await,
        Commands::Delete { name } => cmd::rm(&name).await,
        Commands::Schedulers => cmd::schedulers().await,
        Commands::Version => cmd::version().await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
