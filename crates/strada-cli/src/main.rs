//! Strada CLI - drive the audio pipeline runtime from the command line.

mod run;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "strada")]
#[command(author, version, about = "Strada audio pipeline runtime CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a TOML-described pipeline over WAV files
    Run(run::RunArgs),

    /// List the available module types
    Modules,
}

fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run::run(args),
        Commands::Modules => run::list_modules(),
    }
}
