use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "occupancy-cli", version, about = "Occupancy evidence learning CLI")]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Record sensor history
    Ingest {
        #[command(subcommand)]
        action: commands::ingest::IngestAction,
    },
    /// Run learning cycles
    Learn {
        #[command(subcommand)]
        action: commands::learn::LearnAction,
    },
    /// Inspect learned priors
    Prior {
        #[command(subcommand)]
        action: commands::prior::PriorAction,
    },
    /// Inspect learned correlations and likelihoods
    Correlation {
        #[command(subcommand)]
        action: commands::correlation::CorrelationAction,
    },
    /// Occupied-interval cache
    Occupied {
        #[command(subcommand)]
        action: commands::occupied::OccupiedAction,
    },
}

fn init_tracing(quiet: bool, verbose: bool) {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("OCCUPANCY_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    // Already initialised is fine.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    let result = match cli.command {
        Commands::Config { action } => commands::config::run(action),
        Commands::Ingest { action } => commands::ingest::run(action),
        Commands::Learn { action } => commands::learn::run(action),
        Commands::Prior { action } => commands::prior::run(action),
        Commands::Correlation { action } => commands::correlation::run(action),
        Commands::Occupied { action } => commands::occupied::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
