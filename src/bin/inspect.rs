//! chainstream Inspector
//!
//! Read-only inspection of a container file.

use std::fs::File;
use std::io::{self, Write};

use chainstream::{ChainError, Config, StreamContainer};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// chainstream inspector
#[derive(Parser, Debug)]
#[command(name = "chainstream-inspect")]
#[command(about = "Inspect a chainstream container file")]
#[command(version)]
struct Args {
    /// Container file
    path: String,

    /// Skip traversal and back-reference checks
    #[arg(long)]
    no_integrity_checks: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the decoded header
    Header,

    /// List every stream with its size and boundary clusters
    List,

    /// Walk every chain and report the result
    Verify,

    /// Write the content of one stream to stdout
    Dump {
        /// Stream index
        index: u64,
    },
}

fn main() {
    // Logs go to stderr so `dump` output stays clean
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,chainstream=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    tracing::info!("chainstream inspector v{}", chainstream::VERSION);
    tracing::info!("Container file: {}", args.path);

    if let Err(e) = run(&args) {
        tracing::error!("{}", e);
        std::process::exit(if e.is_corruption() { 2 } else { 1 });
    }
}

fn run(args: &Args) -> Result<(), ChainError> {
    let file = File::open(&args.path)?;
    let config = Config::builder()
        .integrity_checks(!args.no_integrity_checks)
        .build();
    let container = StreamContainer::load(file, config)?;

    match &args.command {
        Commands::Header => {
            println!("{:#?}", container.header());
        }

        Commands::List => {
            println!("{:>8}  {:>14}  {:>10}  {:>10}", "index", "size", "start", "end");
            for index in 0..container.count() {
                let d = container.descriptor(index)?;
                println!(
                    "{:>8}  {:>14}  {:>10}  {:>10}",
                    index,
                    d.size,
                    fmt_cluster(d.start_cluster),
                    fmt_cluster(d.end_cluster)
                );
            }
        }

        Commands::Verify => {
            let report = container.verify()?;
            println!("OK");
            println!("  streams:            {}", report.streams);
            println!("  non-empty streams:  {}", report.non_empty_streams);
            println!("  clusters:           {}", report.total_clusters);
            println!("  directory clusters: {}", report.directory_clusters);
            println!("  stream clusters:    {}", report.stream_clusters);
            println!("  stream bytes:       {}", report.stream_bytes);
        }

        Commands::Dump { index } => {
            let buf = container.open_stream(*index)?.read_to_vec()?;
            io::stdout().write_all(&buf)?;
        }
    }

    Ok(())
}

fn fmt_cluster(cluster: Option<u64>) -> String {
    cluster.map_or_else(|| "-".to_string(), |c| c.to_string())
}
