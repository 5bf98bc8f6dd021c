use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use noteref_cli::cli::{
    build_resolver, cache_key, relay_urls, render_reports, run_resolve, to_json, CliConfig,
};
use noteref_cli::tracing_setup::init_tracing;

#[derive(Parser)]
#[command(name = "noteref")]
#[command(about = "Resolve nostr references into embed metadata")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short, global = true)]
    pretty: bool,

    /// Path to JSON config file (relays, cache tuning, dataDir)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Relay to query; repeat to give several. Replaces the configured list.
    #[arg(long = "relay", short = 'r', global = true)]
    relays: Vec<String>,

    /// Directory of the local event store
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve references and print one JSON object per reference
    Resolve {
        /// note1, nevent1, naddr1, npub1 or nprofile1 references, with or without `nostr:`
        #[arg(required = true)]
        refs: Vec<String>,

        /// Confirm references found in the local store against relays
        #[arg(long)]
        confirm_online: bool,

        /// Do not open the local event store
        #[arg(long)]
        no_store: bool,

        /// Print resolver counters to stderr when done
        #[arg(long)]
        stats: bool,
    },

    /// Print the canonical cache key of a reference
    Key {
        reference: String,
    },

    /// Print the relays a fetch for a reference would ask, in order
    Relays {
        reference: String,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = match cli.config {
        Some(ref path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    config.apply_relays(cli.relays);
    if cli.data_dir.is_some() {
        config.data_dir = cli.data_dir;
    }

    match cli.command {
        Commands::Resolve {
            refs,
            confirm_online,
            no_store,
            stats,
        } => {
            config.resolver.confirm_local_online |= confirm_online;
            let (reports, counters) = run_resolve(&config, &refs, !no_store).await?;
            println!("{}", render_reports(&reports, cli.pretty)?);
            if stats {
                eprintln!("{}", to_json(&counters, cli.pretty)?);
            }
        }
        Commands::Key { reference } => {
            let resolver = build_resolver(&config, false)?;
            println!("{}", cache_key(&resolver, &reference)?);
        }
        Commands::Relays { reference } => {
            let resolver = build_resolver(&config, false)?;
            for url in relay_urls(&resolver, &reference)? {
                println!("{}", url);
            }
        }
    }

    Ok(())
}
