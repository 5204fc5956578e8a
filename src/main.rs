use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use zettelbox::commands::{
    CreateOptions, cmd_create, cmd_delete, cmd_get, cmd_query, cmd_serve, cmd_stats,
};
use zettelbox::config::Config;

#[derive(Parser)]
#[command(name = "zettelbox")]
#[command(about = "Zettel storage over directories and memory boxes")]
#[command(version)]
struct Cli {
    /// Configuration file (default: zettelbox.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Box URI; repeat for more boxes. Replaces the configured boxes.
    #[arg(long = "box", value_name = "URI", global = true)]
    boxes: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the boxes and log changes until interrupted
    Serve,

    /// List zettel matching a query
    #[command(visible_alias = "q")]
    Query {
        /// Query, e.g. `role:task tags:#rust OR title~draft`
        #[arg(required = true)]
        query: Vec<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a zettel
    Get {
        /// Zettel identifier (14 digits)
        zid: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create a zettel in box 1
    #[command(visible_alias = "c")]
    Create {
        /// Zettel title
        title: String,

        /// Content text
        #[arg(default_value = "")]
        content: String,

        #[arg(short, long)]
        role: Option<String>,

        /// Tag; may be repeated
        #[arg(short, long = "tag")]
        tags: Vec<String>,

        /// Content syntax (default: derived from the file extension)
        #[arg(short, long)]
        syntax: Option<String>,
    },

    /// Delete a zettel from the first box holding it
    Delete {
        /// Zettel identifier (14 digits)
        zid: String,
    },

    /// Show box and index statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let path = cli.config.unwrap_or_else(Config::default_path);
    let mut config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if !cli.boxes.is_empty() {
        config.boxes = cli.boxes;
    }

    let result = match cli.command {
        Commands::Serve => cmd_serve(&config).await,
        Commands::Query { query, json } => cmd_query(&config, &query.join(" "), json).await,
        Commands::Get { zid, json } => cmd_get(&config, &zid, json).await,
        Commands::Create {
            title,
            content,
            role,
            tags,
            syntax,
        } => {
            cmd_create(
                &config,
                CreateOptions {
                    title,
                    role,
                    tags,
                    syntax,
                    content,
                },
            )
            .await
        }
        Commands::Delete { zid } => cmd_delete(&config, &zid).await,
        Commands::Stats { json } => cmd_stats(&config, json).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
