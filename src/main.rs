use clap::{Parser, Subcommand};
use linkly_auth::platform::Platform;
use log::error;
use service::config::Config;
use service::logging::Logger;

mod callback;
mod commands;

#[derive(Parser)]
#[command(author, version, about = "Connect social accounts to Linkly", long_about = None)]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store a Linkly access/refresh token pair for API calls
    Login {
        access_token: String,
        refresh_token: String,
    },
    /// Connect a social account through the OAuth authorization flow
    Connect { platform: Platform },
    /// Complete connections that were deferred until after login
    CompletePending,
    /// List connected accounts
    Accounts,
    /// Disconnect an account by id
    Disconnect { account_id: String },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    Logger::init_logger(&cli.config);

    if let Err(e) = commands::run(cli.config, cli.command).await {
        error!("{e}");
        std::process::exit(1);
    }
}
