use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

use anyhow::Result;
use tokio::runtime::Handle;

use super::state::{Effect, Event, FetchResult, PortalState};
use super::timer::RefreshTimer;
use crate::arm::{AppInsightsComponent, ArmSubscription, ArmTenant};
use crate::config::{self, Preferences, PrefsFile};
use crate::http;
use crate::kql;
use crate::logs::{detail_rows, invocation_rows, DetailRow, InvocationRow};
use crate::session::Session;

/// Drives a [`PortalState`]: starts the fetches it asks for, feeds their
/// results back in, keeps the refresh timer in step and writes preference
/// changes to disk.
pub struct PortalRuntime {
    pub state: PortalState,
    session: Session,
    handle: Handle,
    tx: Sender<Event>,
    rx: Receiver<Event>,
    timer: RefreshTimer,
    prefs_path: PathBuf,
    prefs_file: PrefsFile,
    saved: Preferences,
}

impl PortalRuntime {
    pub fn new(
        session: Session,
        handle: Handle,
        prefs_path: PathBuf,
        prefs_file: PrefsFile,
        default_tenant_id: Option<String>,
    ) -> Self {
        let saved = Preferences::from(&prefs_file);
        let state = PortalState::new(&saved, default_tenant_id);
        let (tx, rx) = mpsc::channel();
        Self {
            state,
            session,
            handle,
            tx,
            rx,
            timer: RefreshTimer::default(),
            prefs_path,
            prefs_file,
            saved,
        }
    }

    pub fn dispatch(&mut self, event: Event) {
        for effect in self.state.apply(event) {
            self.spawn(effect);
        }
        self.timer
            .sync(self.state.refresh_schedule(), &self.handle, &self.tx);
        self.persist();
    }

    /// Applies every event that arrived since the last call. Returns whether
    /// anything was applied.
    pub fn poll(&mut self) -> bool {
        let mut applied = false;
        while let Ok(event) = self.rx.try_recv() {
            self.dispatch(event);
            applied = true;
        }
        applied
    }

    pub fn auto_refresh_armed(&self) -> bool {
        self.timer.is_armed()
    }

    fn spawn(&self, effect: Effect) {
        let session = self.session.clone();
        let tx = self.tx.clone();
        self.handle.spawn(async move {
            let event = run_effect(&session, effect).await;
            let _ = tx.send(event);
        });
    }

    fn persist(&mut self) {
        let current = self.state.preferences();
        if current == self.saved {
            return;
        }
        self.prefs_file.apply(&current);
        if let Err(err) = config::save_file(&self.prefs_path, &self.prefs_file) {
            tracing::warn!(error = %format!("{err:#}"), "failed to save preferences");
        }
        self.saved = current;
    }
}

pub async fn run_effect(session: &Session, effect: Effect) -> Event {
    match effect {
        Effect::FetchTenants { generation } => Event::TenantsLoaded {
            generation,
            result: reduce(fetch_tenants(session).await),
        },
        Effect::FetchSubscriptions {
            generation,
            tenant_id,
        } => Event::SubscriptionsLoaded {
            generation,
            result: reduce(fetch_subscriptions(session, &tenant_id).await),
        },
        Effect::FetchApps {
            generation,
            tenant_id,
            subscription_id,
        } => Event::AppsLoaded {
            generation,
            result: reduce(fetch_apps(session, &tenant_id, &subscription_id).await),
        },
        Effect::FetchInvocations {
            generation,
            tenant_id,
            app_id,
            request,
        } => {
            let query = request.query();
            let result = fetch_invocations(session, tenant_id.as_deref(), &app_id, &query).await;
            Event::InvocationsLoaded {
                generation,
                request,
                result: reduce(result),
            }
        }
        Effect::FetchDetails {
            generation,
            tenant_id,
            app_id,
            operation_id,
            time_range,
        } => {
            let query = kql::invocation_details_query(&operation_id, time_range);
            Event::DetailsLoaded {
                generation,
                result: reduce(fetch_details(session, tenant_id.as_deref(), &app_id, &query).await),
            }
        }
    }
}

fn reduce<T>(result: Result<T>) -> FetchResult<T> {
    result.map_err(|err| {
        tracing::warn!(error = %format!("{err:#}"), "fetch failed");
        http::root_error_message(&err)
    })
}

async fn fetch_tenants(session: &Session) -> Result<Vec<ArmTenant>> {
    let token = session.arm_token(None).await?;
    session.arm.list_tenants(&token).await
}

async fn fetch_subscriptions(session: &Session, tenant_id: &str) -> Result<Vec<ArmSubscription>> {
    let token = session.arm_token(Some(tenant_id)).await?;
    session.arm.list_subscriptions(&token).await
}

async fn fetch_apps(
    session: &Session,
    tenant_id: &str,
    subscription_id: &str,
) -> Result<Vec<AppInsightsComponent>> {
    let token = session.arm_token(Some(tenant_id)).await?;
    session
        .arm
        .list_app_insights_components(subscription_id, &token)
        .await
}

async fn fetch_invocations(
    session: &Session,
    tenant_id: Option<&str>,
    app_id: &str,
    query: &str,
) -> Result<Vec<InvocationRow>> {
    tracing::debug!(%app_id, %query, "invocations query");
    let token = session.logs_token(tenant_id).await?;
    let result = session.logs.query(app_id, query, &token).await?;
    Ok(invocation_rows(result.primary()))
}

async fn fetch_details(
    session: &Session,
    tenant_id: Option<&str>,
    app_id: &str,
    query: &str,
) -> Result<Vec<DetailRow>> {
    tracing::debug!(%app_id, %query, "details query");
    let token = session.logs_token(tenant_id).await?;
    let result = session.logs.query(app_id, query, &token).await?;
    Ok(detail_rows(result.primary()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSettings, TokenProvider};
    use crate::kql::TimeRange;
    use tempfile::TempDir;

    fn session(dir: &TempDir) -> Session {
        let http = http::build_client().unwrap();
        let settings = AuthSettings {
            client_id: "client-1".into(),
            authority: "https://login.microsoftonline.com/common".into(),
            redirect_uri: None,
        };
        let tokens =
            TokenProvider::new(http.clone(), settings, dir.path().join("accounts.json"), false)
                .unwrap();
        Session {
            tokens,
            arm: crate::arm::ArmClient::new(http.clone()),
            logs: crate::logs::LogsClient::new(http),
        }
    }

    #[tokio::test]
    async fn fetch_without_account_reports_sign_in_message() {
        let dir = TempDir::new().unwrap();
        let event = run_effect(&session(&dir), Effect::FetchTenants { generation: 4 }).await;
        assert_eq!(
            event,
            Event::TenantsLoaded {
                generation: 4,
                result: Err("No active account. Please sign in again.".into()),
            }
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_persists_changed_preferences_only() {
        let dir = TempDir::new().unwrap();
        let prefs_path = dir.path().join("prefs.json");
        let mut file = PrefsFile::default();
        file.extra
            .insert("editor".into(), serde_json::json!("vim"));
        let mut runtime = PortalRuntime::new(
            session(&dir),
            Handle::current(),
            prefs_path.clone(),
            file,
            None,
        );

        runtime.dispatch(Event::SetSearchInput("abc".into()));
        assert!(!prefs_path.exists());

        runtime.dispatch(Event::SetTimeRange(TimeRange::Last7Days));
        let saved = config::load_file(&prefs_path);
        assert_eq!(saved.time_range.as_deref(), Some("P7D"));
        assert_eq!(saved.extra.get("editor"), Some(&serde_json::json!("vim")));
        assert!(!runtime.auto_refresh_armed());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_start_surfaces_error_after_poll() {
        let dir = TempDir::new().unwrap();
        let mut runtime = PortalRuntime::new(
            session(&dir),
            Handle::current(),
            dir.path().join("prefs.json"),
            PrefsFile::default(),
            None,
        );
        runtime.dispatch(Event::Start);
        assert!(runtime.state.loading.tenants);

        let mut polled = false;
        for _ in 0..50 {
            if runtime.poll() {
                polled = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(polled);
        assert!(!runtime.state.loading.tenants);
        assert_eq!(
            runtime.state.error.as_deref(),
            Some("No active account. Please sign in again.")
        );
    }
}
