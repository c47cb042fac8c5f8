use anyhow::Result;
use clap::{ArgGroup, CommandFactory, Parser};
use color_eyre::config::HookBuilder;
use s3pilot_core::{load_config_or_default, LoggingConfig, UploadOptions};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod cors;
mod handlers;
mod wizard;

/// s3pilot - manage one S3 bucket from your terminal
#[derive(Parser, Debug)]
#[command(name = "s3pilot")]
#[command(version)]
#[command(about = "Deploy, remove and fill a single S3 bucket", long_about = None)]
struct Cli {
    /// State file recording the managed bucket
    #[arg(
        long,
        global = true,
        env = "S3PILOT_STATE",
        default_value = ".s3pilot/state.json"
    )]
    state: PathBuf,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Initial setup (interactive wizard)
    Init,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Create or update the bucket
    Deploy {
        /// Bucket name (defaults to the one in state)
        #[arg(short, long)]
        name: Option<String>,
        /// Region (defaults to the configured region)
        #[arg(short, long)]
        region: Option<String>,
        /// Enable transfer acceleration (defaults to the configured value)
        #[arg(long)]
        accelerated: Option<bool>,
        /// JSON file holding the CORS rules
        #[arg(long)]
        cors: Option<PathBuf>,
    },

    /// Empty and delete the bucket
    Remove {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Upload a directory or file into the bucket
    #[command(group(ArgGroup::new("source").required(true).args(["dir", "file"])))]
    Upload {
        /// Directory to upload
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Single file to upload
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Pack the directory into one .zip object
        #[arg(short, long, requires = "dir")]
        zip: bool,
        /// Object key (defaults to the file name or a random archive name)
        #[arg(short, long)]
        key: Option<String>,
        /// Target bucket (defaults to the one in state)
        #[arg(short, long)]
        name: Option<String>,
        /// Target region (defaults to the one in state)
        #[arg(short, long)]
        region: Option<String>,
    },

    /// Inspect the persisted state
    State {
        #[command(subcommand)]
        action: StateAction,
    },

    /// Shell completion
    Completion {
        /// Shell type (bash, zsh, fish, elvish, powershell)
        shell: String,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Show the current configuration
    Show,
    /// Validate the configuration file
    Validate,
}

#[derive(clap::Subcommand, Debug)]
enum StateAction {
    /// Show the managed bucket
    Show {
        /// Output format (table, json)
        #[arg(short, long, default_value = "table")]
        output: String,
    },
}

/// Install the tracing subscriber. `RUST_LOG` wins over the config file.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("s3pilot={0},s3pilot_core={0}", logging.level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.pretty().init();
    }
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight requests...");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    // Parse CLI arguments
    let cli = Cli::parse();

    // A broken config file must not keep `init` from repairing it
    let logging = load_config_or_default()
        .map(|c| c.logging())
        .unwrap_or_default();
    init_logging(&logging);

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let store = s3pilot_core::StateStore::new(cli.state);

    // Execute command
    match cli.command {
        Commands::Init => handlers::handle_init().await,
        Commands::Config { action } => {
            let action_str = match action {
                ConfigAction::Show => "show",
                ConfigAction::Validate => "validate",
            };
            handlers::handle_config(action_str).await
        }
        Commands::Deploy {
            name,
            region,
            accelerated,
            cors,
        } => {
            handlers::handle_deploy(&store, cancel, name, region, accelerated, cors.as_deref())
                .await
        }
        Commands::Remove { yes } => handlers::handle_remove(&store, cancel, yes).await,
        Commands::Upload {
            dir,
            file,
            zip,
            key,
            name,
            region,
        } => {
            let options = UploadOptions {
                dir,
                file,
                zip,
                key,
                name,
                region,
            };
            handlers::handle_upload(&store, cancel, &options).await
        }
        Commands::State { action } => match action {
            StateAction::Show { output } => handlers::handle_state_show(&store, &output),
        },
        Commands::Completion { shell } => {
            handlers::handle_completion(&shell, &mut Cli::command()).await
        }
    }
}
