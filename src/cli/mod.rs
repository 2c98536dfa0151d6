//! Command line interface for posting forms.

pub mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::client::AggregateClient;
use crate::config::ServerConfig;
use crate::error::Result;

use commands::post::PostArgs;

/// Scriptable communication with an ODK Aggregate server.
#[derive(Parser)]
#[command(name = "odk-pusher")]
#[command(version)]
#[command(about = "Scriptable submission of XForms to an ODK Aggregate server")]
pub struct Cli {
    /// Show debug output.
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Username for login.
    #[arg(short, long, global = true)]
    pub username: Option<String>,

    /// Password for login.
    #[arg(short, long, global = true)]
    pub password: Option<String>,

    /// Complete server URL in the form http[s]://server[:port]/ODKAggregate;
    /// the port defaults to 80 for http and 443 for https.
    #[arg(short, long)]
    pub server: String,

    /// Device identifier reported with every submission.
    #[arg(long, value_name = "ID")]
    pub device_id: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Post one filled-in form, or many from a CSV file.
    Post(PostArgs),
}

/// CLI entry point: parse arguments, connect, dispatch.
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .init();

    let mut config = ServerConfig::from_url(&cli.server)?;
    config.username = cli.username;
    config.password = cli.password;
    config.device_id = cli.device_id;

    let mut client = AggregateClient::new(config)?;
    client.connect()?;

    match cli.command {
        Commands::Post(args) => commands::post::execute(&mut client, &args),
    }
}
