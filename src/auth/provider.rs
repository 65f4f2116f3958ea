use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::Mutex;

use super::oauth::{self, AuthSettings, TokenResponse};
use super::store::AccountStore;
use super::AuthError;

pub const ARM_SCOPES: &[&str] = &["https://management.azure.com/user_impersonation"];
pub const LOGS_SCOPES: &[&str] = &["https://api.loganalytics.io/.default"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSummary {
    pub username: String,
    pub home_tenant_id: String,
}

/// Hands out bearer tokens for the active account: cache first, then the
/// refresh token, then a browser sign-in.
#[derive(Clone)]
pub struct TokenProvider {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    settings: AuthSettings,
    store_path: PathBuf,
    store: Mutex<AccountStore>,
    interactive: Mutex<()>,
    announce: bool,
}

impl TokenProvider {
    pub fn new(
        http: Client,
        settings: AuthSettings,
        store_path: PathBuf,
        announce: bool,
    ) -> Result<Self> {
        let store = AccountStore::load(&store_path)?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                settings,
                store_path,
                store: Mutex::new(store),
                interactive: Mutex::new(()),
                announce,
            }),
        })
    }

    pub async fn account(&self) -> Option<AccountSummary> {
        let store = self.inner.store.lock().await;
        store.active_account().map(|(_, account)| AccountSummary {
            username: account.username.clone(),
            home_tenant_id: account.home_tenant_id.clone(),
        })
    }

    pub async fn get_access_token(&self, scopes: &[&str], tenant: Option<&str>) -> Result<String> {
        let (tenant, refresh_token) = {
            let store = self.inner.store.lock().await;
            let (_, account) = store.active_account().ok_or(AuthError::NoActiveAccount)?;
            let tenant = tenant.unwrap_or(account.home_tenant_id.as_str()).to_string();
            if let Some(token) = account.cached_token(&tenant, scopes, Utc::now()) {
                tracing::debug!(%tenant, "using cached token");
                return Ok(token.to_string());
            }
            (tenant, account.refresh_token.clone())
        };

        if let Some(refresh_token) = refresh_token {
            let authority = self.inner.settings.authority_for(Some(&tenant));
            match oauth::refresh_access_token(
                &self.inner.http,
                &authority,
                &self.inner.settings.client_id,
                &refresh_token,
                scopes,
            )
            .await
            {
                Ok(response) => {
                    tracing::debug!(%tenant, "refreshed token silently");
                    return self.remember(&tenant, scopes, &response).await;
                }
                Err(err) => {
                    tracing::warn!(%tenant, error = %format!("{err:#}"), "silent token acquisition failed");
                }
            }
        }

        self.acquire_interactive(scopes, &tenant).await
    }

    async fn acquire_interactive(&self, scopes: &[&str], tenant: &str) -> Result<String> {
        let _guard = self.inner.interactive.lock().await;

        // a flow that finished while we waited may already cover this request
        {
            let store = self.inner.store.lock().await;
            let (_, account) = store.active_account().ok_or(AuthError::NoActiveAccount)?;
            if let Some(token) = account.cached_token(tenant, scopes, Utc::now()) {
                return Ok(token.to_string());
            }
        }

        tracing::info!(%tenant, "acquiring token interactively");
        let response = oauth::acquire_interactive(
            &self.inner.http,
            &self.inner.settings,
            scopes,
            Some(tenant),
            self.inner.announce,
        )
        .await?;
        self.remember(tenant, scopes, &response).await
    }

    async fn remember(&self, tenant: &str, scopes: &[&str], response: &TokenResponse) -> Result<String> {
        let mut store = self.inner.store.lock().await;
        let account = store
            .active_account_mut()
            .ok_or(AuthError::NoActiveAccount)?;
        account.record(tenant, scopes, response, Utc::now());
        if let Err(err) = store.save(&self.inner.store_path) {
            tracing::warn!(error = %format!("{err:#}"), "failed to persist token cache");
        }
        Ok(response.access_token.clone())
    }
}
