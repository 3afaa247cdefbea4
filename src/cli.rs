use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "monad-galaxy", version, about = "Live Monad block and transaction feed")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect to the node and serve the live state over HTTP
    Serve {
        /// Override bind address, e.g. 0.0.0.0:8080
        #[arg(long)]
        addr: Option<String>,
    },
    /// Check that the RPC endpoint answers eth_blockNumber
    Probe,
    /// Connect and log every block and transaction for a while
    Watch {
        #[arg(long, default_value_t = 30)]
        duration_secs: u64,
        /// Also subscribe to pending transaction hashes
        #[arg(long)]
        pending: bool,
    },
}
