use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::oauth::{IdTokenClaims, TokenResponse};
use crate::config::write_json_atomic;

/// Cached tokens this close to expiry are treated as expired.
const EXPIRY_SKEW_SECONDS: i64 = 60;
/// Used when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedToken {
    pub tenant: String,
    pub scopes: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    pub home_tenant_id: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub tokens: Vec<CachedToken>,
}

impl Account {
    pub fn from_claims(claims: &IdTokenClaims) -> Option<(String, Account)> {
        let oid = claims.oid.clone()?;
        let tid = claims.tid.clone()?;
        let account = Account {
            username: claims
                .preferred_username
                .clone()
                .unwrap_or_else(|| oid.clone()),
            name: claims.name.clone(),
            home_tenant_id: tid.clone(),
            refresh_token: None,
            tokens: Vec::new(),
        };
        Some((format!("{oid}.{tid}"), account))
    }

    pub fn cached_token(&self, tenant: &str, scopes: &[&str], now: DateTime<Utc>) -> Option<&str> {
        let key = scope_key(scopes);
        self.tokens
            .iter()
            .find(|t| {
                t.tenant == tenant
                    && t.scopes == key
                    && t.expires_at - Duration::seconds(EXPIRY_SKEW_SECONDS) > now
            })
            .map(|t| t.access_token.as_str())
    }

    /// Stores the access token and rotates the refresh token when a new one
    /// was issued.
    pub fn record(
        &mut self,
        tenant: &str,
        scopes: &[&str],
        response: &TokenResponse,
        now: DateTime<Utc>,
    ) {
        let key = scope_key(scopes);
        let expires_at =
            now + Duration::seconds(response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN));
        self.tokens
            .retain(|t| !(t.tenant == tenant && t.scopes == key) && t.expires_at > now);
        self.tokens.push(CachedToken {
            tenant: tenant.to_string(),
            scopes: key,
            access_token: response.access_token.clone(),
            expires_at,
        });
        if let Some(refresh) = &response.refresh_token {
            self.refresh_token = Some(refresh.clone());
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountStore {
    pub active: Option<String>,
    pub accounts: BTreeMap<String, Account>,
}

impl AccountStore {
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .with_context(|| format!("failed to parse {}", path.display())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    pub fn active_account(&self) -> Option<(&str, &Account)> {
        let id = self.active.as_deref()?;
        self.accounts.get(id).map(|account| (id, account))
    }

    pub fn active_account_mut(&mut self) -> Option<&mut Account> {
        let id = self.active.as_deref()?;
        self.accounts.get_mut(id)
    }

    /// Adds or replaces the account and makes it the active one.
    pub fn sign_in(&mut self, id: String, account: Account) {
        self.accounts.insert(id.clone(), account);
        self.active = Some(id);
    }

    /// Forgets the active account. Returns its username when there was one.
    pub fn sign_out(&mut self) -> Option<String> {
        let id = self.active.take()?;
        self.accounts.remove(&id).map(|account| account.username)
    }
}

/// Order-insensitive key for a scope set.
pub fn scope_key(scopes: &[&str]) -> String {
    let mut sorted: Vec<&str> = scopes.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn response(token: &str, expires_in: i64, refresh: Option<&str>) -> TokenResponse {
        TokenResponse {
            access_token: token.into(),
            refresh_token: refresh.map(str::to_string),
            expires_in: Some(expires_in),
            id_token: None,
        }
    }

    fn account() -> Account {
        Account {
            username: "dev@contoso.com".into(),
            name: None,
            home_tenant_id: "home".into(),
            refresh_token: Some("rt-0".into()),
            tokens: Vec::new(),
        }
    }

    #[test]
    fn scope_key_ignores_order() {
        assert_eq!(scope_key(&["b", "a"]), scope_key(&["a", "b", "a"]));
    }

    #[test]
    fn cached_token_honours_tenant_scopes_and_skew() {
        let now = Utc::now();
        let mut account = account();
        account.record("t1", &["s1"], &response("at", 3600, None), now);

        assert_eq!(account.cached_token("t1", &["s1"], now), Some("at"));
        assert_eq!(account.cached_token("t2", &["s1"], now), None);
        assert_eq!(account.cached_token("t1", &["s2"], now), None);
        assert_eq!(
            account.cached_token("t1", &["s1"], now + Duration::seconds(3600 - 30)),
            None
        );
    }

    #[test]
    fn record_replaces_token_and_rotates_refresh() {
        let now = Utc::now();
        let mut account = account();
        account.record("t1", &["s1"], &response("old", 3600, None), now);
        account.record("t1", &["s1"], &response("new", 3600, Some("rt-1")), now);

        assert_eq!(account.tokens.len(), 1);
        assert_eq!(account.cached_token("t1", &["s1"], now), Some("new"));
        assert_eq!(account.refresh_token.as_deref(), Some("rt-1"));
    }

    #[test]
    fn record_keeps_refresh_token_when_none_issued() {
        let mut account = account();
        account.record("t1", &["s1"], &response("at", 60, None), Utc::now());
        assert_eq!(account.refresh_token.as_deref(), Some("rt-0"));
    }

    #[test]
    fn from_claims_requires_object_and_tenant_ids() {
        let claims = IdTokenClaims {
            oid: Some("o".into()),
            tid: Some("t".into()),
            preferred_username: Some("u@x".into()),
            name: None,
        };
        let (id, account) = Account::from_claims(&claims).unwrap();
        assert_eq!(id, "o.t");
        assert_eq!(account.home_tenant_id, "t");
        assert_eq!(account.username, "u@x");

        assert!(Account::from_claims(&IdTokenClaims::default()).is_none());
    }

    #[test]
    fn sign_in_out_roundtrip_through_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accounts.json");

        let mut store = AccountStore::load(&path).unwrap();
        assert!(store.active_account().is_none());

        store.sign_in("o.t".into(), account());
        store.save(&path).unwrap();

        let mut loaded = AccountStore::load(&path).unwrap();
        assert_eq!(loaded, store);
        assert_eq!(loaded.active_account().map(|(id, _)| id), Some("o.t"));

        assert_eq!(loaded.sign_out().as_deref(), Some("dev@contoso.com"));
        assert!(loaded.accounts.is_empty());
        assert_eq!(loaded.sign_out(), None);
    }

    #[test]
    fn corrupt_store_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accounts.json");
        fs::write(&path, "{not json").unwrap();
        assert!(AccountStore::load(&path).is_err());
    }
}
