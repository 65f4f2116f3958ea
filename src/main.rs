use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsString;

mod args;
mod arm;
mod auth;
mod browse;
mod config;
mod env;
mod http;
mod invocations;
mod kql;
mod logging;
mod logs;
mod portal;
mod session;
mod ui;
mod utils;

use crate::args::BaseArgs;

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "+dev");
const CLI_VERSION: &str = match option_env!("AIV_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

#[derive(Debug, Parser)]
#[command(
    name = "aiv",
    about = "Browse Azure Application Insights invocations from the terminal",
    version = CLI_VERSION
)]
struct Cli {
    #[command(flatten)]
    base: BaseArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Open the interactive portal (default)
    View(portal::ViewArgs),
    /// Sign in with a browser and make the account active
    Login,
    /// Forget the active account and its cached tokens
    Logout,
    /// Show the active account
    Whoami,
    /// List directories the account can access
    Tenants,
    /// List subscriptions in a directory
    Subscriptions,
    /// List Application Insights resources in a subscription
    Apps(browse::AppsArgs),
    /// List recent invocations of an app
    Invocations(invocations::InvocationsArgs),
    /// Show traces, exceptions and dependencies of one invocation
    Details(invocations::DetailsArgs),
    /// Print generated queries without running them
    Kql(invocations::KqlArgs),
    /// Read and change saved selections
    Config(config::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);
    let base = cli.base;

    let command = cli
        .command
        .unwrap_or_else(|| Commands::View(portal::ViewArgs::default()));
    if !matches!(command, Commands::View(_)) {
        logging::init_stderr();
    }

    match command {
        Commands::View(args) => portal::run(base, args).await?,
        Commands::Login => auth::run_login(base).await?,
        Commands::Logout => auth::run_logout(base)?,
        Commands::Whoami => auth::run_whoami(base)?,
        Commands::Tenants => browse::run_tenants(base).await?,
        Commands::Subscriptions => browse::run_subscriptions(base).await?,
        Commands::Apps(args) => browse::run_apps(base, args).await?,
        Commands::Invocations(args) => invocations::run_invocations(base, args).await?,
        Commands::Details(args) => invocations::run_details(base, args).await?,
        Commands::Kql(args) => invocations::run_kql(args)?,
        Commands::Config(args) => config::run(base, args)?,
    }

    Ok(())
}
