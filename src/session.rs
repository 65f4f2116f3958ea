use anyhow::Result;

use crate::args::BaseArgs;
use crate::arm::ArmClient;
use crate::auth::{AuthSettings, TokenProvider, ARM_SCOPES, LOGS_SCOPES};
use crate::config;
use crate::logs::LogsClient;

/// Clients and credentials shared by every command that talks to Azure.
#[derive(Clone)]
pub struct Session {
    pub tokens: TokenProvider,
    pub arm: ArmClient,
    pub logs: LogsClient,
}

impl Session {
    /// `announce` lets an interactive sign-in print instructions to stderr.
    pub fn open(base: &BaseArgs, announce: bool) -> Result<Self> {
        let settings = AuthSettings::from_args(base)?;
        let http = crate::http::build_client()?;
        let tokens = TokenProvider::new(http.clone(), settings, config::accounts_path()?, announce)?;
        Ok(Self {
            tokens,
            arm: ArmClient::new(http.clone()),
            logs: LogsClient::new(http),
        })
    }

    pub async fn arm_token(&self, tenant: Option<&str>) -> Result<String> {
        self.tokens.get_access_token(ARM_SCOPES, tenant).await
    }

    pub async fn logs_token(&self, tenant: Option<&str>) -> Result<String> {
        self.tokens.get_access_token(LOGS_SCOPES, tenant).await
    }
}

pub fn maybe_print_query(enabled: bool, label: &str, query: &str) {
    if enabled {
        eprintln!("-- {label}\n{query}\n");
    }
}
