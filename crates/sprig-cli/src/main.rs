#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod logging;

use clap::Parser;
use miette::Result;

#[derive(Parser, Debug)]
#[command(name = "sprig")]
#[command(author, version, about = "npm dependency tree resolution service", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted logs (machine-readable, stderr)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the HTTP resolution service
    Serve {
        /// Port to listen on
        #[arg(short, long, env = "PORT", default_value_t = 3003)]
        port: u16,

        /// Registry base URL (defaults to SPRIG_NPM_REGISTRY or npmjs.org)
        #[arg(long)]
        registry: Option<String>,
    },

    /// Resolve one package and print the tree as JSON
    Resolve {
        /// Package name
        name: String,

        /// Version range expression (e.g. "^1.2.0")
        range: String,

        /// Use the single-task depth-first resolver (no dedup)
        #[arg(long)]
        sequential: bool,

        /// Print the flattened name-to-version map instead of the tree
        #[arg(long)]
        flat: bool,

        /// Registry base URL (defaults to SPRIG_NPM_REGISTRY or npmjs.org)
        #[arg(long)]
        registry: Option<String>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    match cli.command {
        Commands::Serve { port, registry } => commands::serve::run(port, registry.as_deref()),
        Commands::Resolve {
            name,
            range,
            sequential,
            flat,
            registry,
        } => commands::resolve::run(&name, &range, sequential, flat, registry.as_deref()),
    }
}
