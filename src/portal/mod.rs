//! Interactive browser: directories, subscriptions, apps, invocations and
//! the telemetry behind one invocation, in a full-screen terminal UI.

use std::io::IsTerminal;

use anyhow::{bail, Result};
use clap::Args;

use crate::args::BaseArgs;
use crate::auth::{self, AuthSettings};
use crate::config;
use crate::http;
use crate::kql::TimeRange;
use crate::logging;
use crate::session::Session;

mod runtime;
mod state;
mod timer;
mod tui;

use runtime::PortalRuntime;

#[derive(Debug, Clone, Default, Args)]
pub struct ViewArgs {
    /// Start with this time range instead of the saved one
    #[arg(long, value_enum)]
    pub time_range: Option<TimeRange>,
}

pub async fn run(base: BaseArgs, args: ViewArgs) -> Result<()> {
    if !std::io::stdout().is_terminal() || !std::io::stdin().is_terminal() {
        bail!("the portal needs an interactive terminal; try `aiv invocations` instead");
    }

    let log_path = config::log_path()?;
    logging::init_file(&log_path)?;
    tracing::info!(log = %log_path.display(), "starting portal");

    let mut session = Session::open(&base, false)?;
    let account = match session.tokens.account().await {
        Some(account) => account,
        None => {
            eprintln!("No active account. Opening the browser to sign in...");
            let account = auth::sign_in(
                &http::build_client()?,
                &AuthSettings::from_args(&base)?,
                &config::accounts_path()?,
                base.tenant.as_deref(),
                true,
            )
            .await?;
            // the provider only reads the account store when it is built
            session = Session::open(&base, false)?;
            account
        }
    };

    let prefs_path = config::prefs_path()?;
    let mut prefs_file = config::load_file(&prefs_path);
    if let Some(range) = args.time_range {
        prefs_file.time_range = Some(range.code().to_string());
    }
    if let Some(tenant) = &base.tenant {
        prefs_file.tenant = Some(tenant.clone());
    }

    let runtime = PortalRuntime::new(
        session,
        tokio::runtime::Handle::current(),
        prefs_path,
        prefs_file,
        Some(account.home_tenant_id),
    );
    tokio::task::block_in_place(|| tui::run_blocking(runtime, account.username))
}
