use std::path::PathBuf;

use clap::Args;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long, global = true)]
    pub json: bool,

    /// Application (client) ID of the app registration used to sign in (or via AIV_CLIENT_ID)
    #[arg(long, env = "AIV_CLIENT_ID", hide_env_values = true, global = true)]
    pub client_id: Option<String>,

    /// Sign-in authority URL (or via AIV_AUTHORITY)
    #[arg(
        long,
        env = "AIV_AUTHORITY",
        default_value = DEFAULT_AUTHORITY,
        global = true
    )]
    pub authority: String,

    /// Redirect URI registered for the app, must point at localhost (or via AIV_REDIRECT_URI)
    #[arg(long, env = "AIV_REDIRECT_URI", global = true)]
    pub redirect_uri: Option<String>,

    /// Override the active directory (tenant) ID (or via AIV_TENANT)
    #[arg(long, env = "AIV_TENANT", global = true)]
    pub tenant: Option<String>,

    /// Echo generated queries to stderr before sending them
    #[arg(long, global = true)]
    pub print_queries: bool,

    /// Path to a .env file to load before running commands.
    #[arg(long, env = "AIV_ENV_FILE", hide_env_values = true, global = true)]
    pub env_file: Option<PathBuf>,
}
