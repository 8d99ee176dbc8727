use clap::{Args, Parser, Subcommand};
use logpush::cli::run::StdinOptions;
use logpush::config::types::DEFAULT_BUFFER_DURATION_MS;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "logpush")]
#[command(about = "Tails log files and pushes their events to a log ingestion service", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Push configured files, or standard input when a log group is given
    Push(PushArgs),
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct PushArgs {
    /// Print events instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Read standard input and push it to this log group
    #[arg(long, requires = "log_stream_name")]
    log_group_name: Option<String>,

    #[arg(long, requires = "log_group_name")]
    log_stream_name: Option<String>,

    /// Milliseconds to buffer events before publishing
    #[arg(long, default_value_t = DEFAULT_BUFFER_DURATION_MS as i64)]
    buffer_duration: i64,

    #[arg(long)]
    datetime_format: Option<String>,

    /// UTC or LOCAL
    #[arg(long)]
    time_zone: Option<String>,

    #[arg(long)]
    encoding: Option<String>,

    #[arg(long)]
    endpoint: Option<String>,

    #[arg(long)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a starter configuration
    Init {
        #[arg(long)]
        stdout: bool,
    },
    /// Load and check a configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "logpush=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = logpush::config::resolve_config_path(cli.config.as_deref());

    match cli.command {
        None => logpush::cli::run::push_files(config_path, false).await?,
        Some(Commands::Push(args)) => match (args.log_group_name, args.log_stream_name) {
            (Some(log_group_name), Some(log_stream_name)) => {
                logpush::cli::run::push_stdin(StdinOptions {
                    log_group_name,
                    log_stream_name,
                    buffer_duration: args.buffer_duration,
                    datetime_format: args.datetime_format,
                    time_zone: args.time_zone,
                    encoding: args.encoding,
                    endpoint: args.endpoint,
                    api_key: args.api_key,
                    dry_run: args.dry_run,
                })
                .await?
            }
            _ => logpush::cli::run::push_files(config_path, args.dry_run).await?,
        },
        Some(Commands::Config { action }) => match action {
            ConfigAction::Init { stdout } => logpush::cli::config::init(stdout)?,
            ConfigAction::Validate => logpush::cli::config::validate(config_path)?,
        },
    }

    Ok(())
}
