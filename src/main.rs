use clap::Parser;
use logshark::cli::{Cli, Commands};
use logshark::commands::{run_dialects, run_parse, run_stats};
use tracing_subscriber::EnvFilter;

fn main() {
    // stdout carries records; diagnostics go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logshark=info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse(args) => run_parse(args, cli.parallel),
        Commands::Stats(args) => run_stats(args, cli.parallel),
        Commands::Dialects(args) => run_dialects(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
