use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::Utc;
use reqwest::Client;
use thiserror::Error;

use crate::args::BaseArgs;
use crate::config;
use crate::http;
use crate::ui::{print_command_status, CommandStatus};

mod oauth;
mod provider;
mod store;

pub use oauth::AuthSettings;
pub use provider::{AccountSummary, TokenProvider, ARM_SCOPES, LOGS_SCOPES};

use store::{Account, AccountStore};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("No active account. Please sign in again.")]
    NoActiveAccount,
    #[error("no client ID configured; pass --client-id or set AIV_CLIENT_ID")]
    MissingClientId,
    #[error("sign-in required: {0}")]
    ConsentRequired(String),
    #[error("sign-in callback failed: {0}")]
    CallbackFailed(String),
    #[error("token endpoint returned {status}: {body}")]
    TokenEndpoint { status: u16, body: String },
}

/// Browser sign-in that makes the resulting account the active one.
pub async fn sign_in(
    http: &Client,
    settings: &AuthSettings,
    store_path: &Path,
    tenant: Option<&str>,
    announce: bool,
) -> Result<AccountSummary> {
    let response = oauth::acquire_interactive(http, settings, ARM_SCOPES, tenant, announce).await?;
    let id_token = response
        .id_token
        .as_deref()
        .ok_or_else(|| anyhow!("sign-in returned no id token"))?;
    let claims = oauth::decode_id_token(id_token)?;
    let (id, mut account) = Account::from_claims(&claims)
        .ok_or_else(|| anyhow!("id token is missing the oid or tid claim"))?;

    let token_tenant = tenant.unwrap_or(account.home_tenant_id.as_str()).to_string();
    account.record(&token_tenant, ARM_SCOPES, &response, Utc::now());

    let summary = AccountSummary {
        username: account.username.clone(),
        home_tenant_id: account.home_tenant_id.clone(),
    };
    let mut store = AccountStore::load(store_path)?;
    store.sign_in(id, account);
    store.save(store_path)?;
    tracing::info!(username = %summary.username, "signed in");
    Ok(summary)
}

pub async fn run_login(base: BaseArgs) -> Result<()> {
    let settings = AuthSettings::from_args(&base)?;
    let http = http::build_client()?;
    let summary = sign_in(
        &http,
        &settings,
        &config::accounts_path()?,
        base.tenant.as_deref(),
        true,
    )
    .await?;

    print_command_status(
        CommandStatus::Success,
        &format!(
            "Signed in as {} (directory {})",
            summary.username, summary.home_tenant_id
        ),
    );
    Ok(())
}

pub fn run_logout(_base: BaseArgs) -> Result<()> {
    let path = config::accounts_path()?;
    let mut store = AccountStore::load(&path)?;
    match store.sign_out() {
        Some(username) => {
            store.save(&path)?;
            print_command_status(CommandStatus::Success, &format!("Signed out {username}"));
        }
        None => print_command_status(CommandStatus::Warning, "Not signed in"),
    }
    Ok(())
}

pub fn run_whoami(base: BaseArgs) -> Result<()> {
    let store = AccountStore::load(&config::accounts_path()?)?;
    let (_, account) = store.active_account().ok_or(AuthError::NoActiveAccount)?;
    let now = Utc::now();
    let live_tokens = account
        .tokens
        .iter()
        .filter(|token| token.expires_at > now)
        .count();

    if base.json {
        let output = serde_json::json!({
            "username": account.username,
            "name": account.name,
            "homeTenantId": account.home_tenant_id,
            "cachedTokens": live_tokens,
            "canRefresh": account.refresh_token.is_some(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("Account: {}", account.username);
        if let Some(name) = &account.name {
            println!("Name: {name}");
        }
        println!("Home directory: {}", account.home_tenant_id);
        println!("Cached tokens: {live_tokens}");
        for token in account.tokens.iter().filter(|token| token.expires_at > now) {
            println!(
                "  {} [{}] {} (expires in {}s)",
                token.tenant,
                token.scopes,
                oauth::mask_token(&token.access_token),
                (token.expires_at - now).num_seconds()
            );
        }
    }
    Ok(())
}
