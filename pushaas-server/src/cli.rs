use clap::{Parser, Subcommand};

/// Pushaas - push service broker
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Broker API used by the client commands
    #[arg(long, global = true, env = "PUSHAAS_API_URL", default_value = "http://localhost:8080")]
    pub api_url: String,

    #[command(subcommand)]
    pub mode: Mode,
}

#[derive(Subcommand, Debug)]
pub enum Mode {
    /// Run as standalone server (API + Workers)
    Standalone {
        /// API port (default: SERVER_PORT)
        #[arg(short, long)]
        port: Option<u16>,

        /// Number of concurrent workers (default: PUSHAAS_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Run as API server only (no workers, needs DATABASE_URL)
    Api {
        /// API port (default: SERVER_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Run as worker only (no API, needs DATABASE_URL)
    Worker {
        /// Number of concurrent workers (default: PUSHAAS_WORKERS)
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Request a new push service instance
    Create {
        /// Instance name
        name: String,

        #[arg(long, default_value = "small")]
        plan: String,

        #[arg(long, default_value = "")]
        team: String,

        #[arg(long, default_value = "")]
        user: String,
    },

    /// Request deletion of an instance
    Delete {
        name: String,
    },

    /// Show the provisioning status of an instance
    Status {
        name: String,
    },

    /// List all instances
    List {
        /// Output format
        #[arg(short, long, default_value = "table")]
        output: String,
    },
}
