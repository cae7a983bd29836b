use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod handlers;
mod types;

pub use handlers::*;
pub use types::*;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fuzzy search vehicles by brand, model, engine or nickname
    Search {
        /// Free text, e.g. "gol um ponto zero"
        #[clap(required = true, trailing_var_arg = true)]
        query: Vec<String>,

        /// Maximum number of results (defaults to `search.limit`)
        #[clap(short, long)]
        limit: Option<usize>,

        /// Read the catalog from a local JSON file instead of the origin
        #[clap(long)]
        catalog: Option<PathBuf>,

        /// Print the count
        #[clap(short = 'c', long, default_value = "false")]
        count: bool,
    },

    /// Open a record by deep link (`#/<id>`, or a full url carrying it) or by id
    Open {
        link: String,

        #[clap(long)]
        catalog: Option<PathBuf>,
    },

    /// Recently selected records, most recent first
    Recent {
        #[clap(long)]
        catalog: Option<PathBuf>,
    },

    /// Offline cache management
    Cache {
        #[clap(subcommand)]
        action: CacheAction,
    },

    /// Start oilcap as a service.
    Serve {
        /// Address to listen on (defaults to `listen_addr`)
        #[clap(long)]
        listen: Option<String>,
    },
}
