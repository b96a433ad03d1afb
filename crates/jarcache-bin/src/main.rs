use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::{filter::LevelFilter, util::SubscriberInitExt, EnvFilter};

mod commands;

/// Incremental build output cache for JVM compilation
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Bring the archives in line with a directory of compiler outputs
    Sync(commands::sync::Opt),

    /// List the entries of an archive
    Inspect(commands::inspect::Opt),

    /// Print the dependency graph node of a class in an ABI archive
    Lookup(commands::lookup::Opt),
}

/// Entry point of the `jarcache` cli.
fn main() -> miette::Result<()> {
    // Parse the command line arguments
    let cli = Cli::parse();

    // Setup default logging level
    let default_filter = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    let env_filter = EnvFilter::builder()
        .with_default_directive(default_filter.into())
        .from_env()
        .into_diagnostic()?;

    // Setup the tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .finish()
        .try_init()
        .into_diagnostic()?;

    // Dispatch the selected command
    match cli.command {
        Commands::Sync(opt) => commands::sync::sync(opt),
        Commands::Inspect(opt) => commands::inspect::inspect(opt),
        Commands::Lookup(opt) => commands::lookup::lookup(opt),
    }
}
