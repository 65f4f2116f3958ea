//! Selection state for the portal.
//!
//! [`PortalState::apply`] is the only way to change anything. It returns the
//! fetches the runtime should start; their results come back as `*Loaded`
//! events carrying the generation they were issued with. A result whose
//! generation no longer matches its panel is dropped without touching rows,
//! loading flags or the error slot.

use crate::arm::{sort_components, AppInsightsComponent, ArmSubscription, ArmTenant};
use crate::config::Preferences;
use crate::kql::{self, InvocationsPage, TimeRange, PAGE_SIZE};
use crate::logs::{DetailRow, InvocationRow};

pub const AUTO_REFRESH_CHOICES: [u64; 4] = [10, 30, 60, 120];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    List,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Panel {
    Tenants,
    Subscriptions,
    Apps,
    Invocations,
    Details,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Loading {
    pub tenants: bool,
    pub subscriptions: bool,
    pub apps: bool,
    pub invocations: bool,
    pub details: bool,
}

impl Loading {
    fn flag(&mut self, panel: Panel) -> &mut bool {
        match panel {
            Panel::Tenants => &mut self.tenants,
            Panel::Subscriptions => &mut self.subscriptions,
            Panel::Apps => &mut self.apps,
            Panel::Invocations => &mut self.invocations,
            Panel::Details => &mut self.details,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Generations([u64; 5]);

impl Generations {
    fn index(panel: Panel) -> usize {
        match panel {
            Panel::Tenants => 0,
            Panel::Subscriptions => 1,
            Panel::Apps => 2,
            Panel::Invocations => 3,
            Panel::Details => 4,
        }
    }

    fn bump(&mut self, panel: Panel) -> u64 {
        let slot = &mut self.0[Self::index(panel)];
        *slot += 1;
        *slot
    }

    fn current(&self, panel: Panel) -> u64 {
        self.0[Self::index(panel)]
    }
}

/// Parameters of one invocation fetch, kept so the result can be merged
/// the same way it was requested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationsRequest {
    pub time_range: TimeRange,
    pub mode: Mode,
    pub keyword: String,
    pub offset: usize,
    pub append: bool,
}

impl InvocationsRequest {
    pub fn query(&self) -> String {
        match self.mode {
            Mode::Search => kql::search_invocations_query(&self.keyword, self.time_range, PAGE_SIZE),
            Mode::List => kql::invocations_query(&InvocationsPage {
                time_range: self.time_range,
                offset: self.offset,
                limit: PAGE_SIZE,
            }),
        }
    }

    /// List pages advance by the page size; search advances by what came back.
    pub fn next_offset(&self, returned: usize) -> usize {
        match self.mode {
            Mode::List => self.offset.saturating_add(PAGE_SIZE),
            Mode::Search => self.offset.saturating_add(returned),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    FetchTenants {
        generation: u64,
    },
    FetchSubscriptions {
        generation: u64,
        tenant_id: String,
    },
    FetchApps {
        generation: u64,
        tenant_id: String,
        subscription_id: String,
    },
    FetchInvocations {
        generation: u64,
        tenant_id: Option<String>,
        app_id: String,
        request: InvocationsRequest,
    },
    FetchDetails {
        generation: u64,
        tenant_id: Option<String>,
        app_id: String,
        operation_id: String,
        time_range: TimeRange,
    },
}

/// Fetch failures arrive as display strings for the error slot.
pub type FetchResult<T> = Result<T, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Start,
    RefreshTenants,
    TenantsLoaded {
        generation: u64,
        result: FetchResult<Vec<ArmTenant>>,
    },
    SelectTenant(String),
    RefreshSubscriptions,
    SubscriptionsLoaded {
        generation: u64,
        result: FetchResult<Vec<ArmSubscription>>,
    },
    SelectSubscription(String),
    RefreshApps,
    AppsLoaded {
        generation: u64,
        result: FetchResult<Vec<AppInsightsComponent>>,
    },
    SelectApp(String),
    SetTimeRange(TimeRange),
    SetSearchInput(String),
    ConfirmSearch,
    ResetSearch,
    RefreshInvocations,
    LoadMore,
    AutoRefreshTick,
    InvocationsLoaded {
        generation: u64,
        request: InvocationsRequest,
        result: FetchResult<Vec<InvocationRow>>,
    },
    /// `key` is [`InvocationRow::key`]; the operation id drives the fetch.
    SelectInvocation {
        key: String,
        operation_id: String,
    },
    RefreshDetails,
    DetailsLoaded {
        generation: u64,
        result: FetchResult<Vec<DetailRow>>,
    },
    SetAutoRefresh(bool),
    SetAutoRefreshSeconds(u64),
}

/// Everything the refresh timer depends on. The timer is re-armed whenever
/// this changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSchedule {
    pub app_id: String,
    pub tenant_id: Option<String>,
    pub time_range: TimeRange,
    pub mode: Mode,
    pub keyword: String,
    pub seconds: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortalState {
    pub default_tenant_id: Option<String>,
    pub tenants: Vec<ArmTenant>,
    pub subscriptions: Vec<ArmSubscription>,
    pub apps: Vec<AppInsightsComponent>,
    pub tenant_id: Option<String>,
    pub subscription_id: Option<String>,
    pub app_resource_id: Option<String>,
    preferred_subscription_id: Option<String>,
    preferred_app_resource_id: Option<String>,
    pub time_range: TimeRange,
    pub mode: Mode,
    pub search_input: String,
    pub search_keyword: String,
    pub auto_refresh: bool,
    pub auto_refresh_seconds: u64,
    pub invocations: Vec<InvocationRow>,
    pub invocation_offset: usize,
    pub selected_operation_id: Option<String>,
    pub selected_invocation_key: Option<String>,
    pub details: Vec<DetailRow>,
    pub loading: Loading,
    pub error: Option<String>,
    generations: Generations,
}

impl PortalState {
    /// `default_tenant_id` is the signed-in account's home directory.
    pub fn new(prefs: &Preferences, default_tenant_id: Option<String>) -> Self {
        Self {
            tenant_id: prefs.tenant_id.clone(),
            default_tenant_id,
            tenants: Vec::new(),
            subscriptions: Vec::new(),
            apps: Vec::new(),
            subscription_id: None,
            app_resource_id: None,
            preferred_subscription_id: prefs.subscription_id.clone(),
            preferred_app_resource_id: prefs.app_resource_id.clone(),
            time_range: prefs.time_range,
            mode: Mode::List,
            search_input: String::new(),
            search_keyword: String::new(),
            auto_refresh: prefs.auto_refresh,
            auto_refresh_seconds: prefs.auto_refresh_seconds.max(1),
            invocations: Vec::new(),
            invocation_offset: 0,
            selected_operation_id: None,
            selected_invocation_key: None,
            details: Vec::new(),
            loading: Loading::default(),
            error: None,
            generations: Generations::default(),
        }
    }

    #[cfg(test)]
    pub fn generation(&self, panel: Panel) -> u64 {
        self.generations.current(panel)
    }

    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        match event {
            Event::Start => {
                let mut effects = vec![self.issue_tenants()];
                if let Some(tenant) = self.tenant_id.clone() {
                    effects.extend(self.enter_tenant(tenant));
                }
                effects
            }
            Event::RefreshTenants => vec![self.issue_tenants()],
            Event::TenantsLoaded { generation, result } => {
                if !self.accept(Panel::Tenants, generation) {
                    return Vec::new();
                }
                match result {
                    Ok(tenants) => {
                        self.tenants = tenants;
                        self.error = None;
                        if self.tenant_id.is_some() {
                            return Vec::new();
                        }
                        match self.pick_default_tenant() {
                            Some(tenant) => self.enter_tenant(tenant),
                            None => Vec::new(),
                        }
                    }
                    Err(message) => {
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }
            Event::SelectTenant(tenant) => {
                if self.tenant_id.as_deref() == Some(tenant.as_str()) {
                    return Vec::new();
                }
                self.preferred_subscription_id = None;
                self.preferred_app_resource_id = None;
                self.enter_tenant(tenant)
            }
            Event::RefreshSubscriptions => {
                self.preferred_subscription_id = self.subscription_id.clone();
                self.issue_subscriptions().into_iter().collect()
            }
            Event::SubscriptionsLoaded { generation, result } => {
                if !self.accept(Panel::Subscriptions, generation) {
                    return Vec::new();
                }
                match result {
                    Ok(subscriptions) => {
                        self.subscriptions = subscriptions;
                        self.error = None;
                        let preferred = self
                            .preferred_subscription_id
                            .take()
                            .or_else(|| self.subscription_id.clone());
                        let chosen = choose(
                            preferred,
                            self.subscriptions.iter().map(|s| &s.subscription_id),
                        );
                        match chosen {
                            Some(id) if self.subscription_id.as_ref() != Some(&id) => {
                                self.enter_subscription(id)
                            }
                            _ => Vec::new(),
                        }
                    }
                    Err(message) => {
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }
            Event::SelectSubscription(subscription) => {
                if self.subscription_id.as_deref() == Some(subscription.as_str()) {
                    return Vec::new();
                }
                self.preferred_app_resource_id = None;
                self.enter_subscription(subscription)
            }
            Event::RefreshApps => {
                self.preferred_app_resource_id = self.app_resource_id.clone();
                self.issue_apps().into_iter().collect()
            }
            Event::AppsLoaded { generation, result } => {
                if !self.accept(Panel::Apps, generation) {
                    return Vec::new();
                }
                match result {
                    Ok(mut apps) => {
                        sort_components(&mut apps);
                        self.apps = apps;
                        self.error = None;
                        let preferred = self
                            .preferred_app_resource_id
                            .take()
                            .or_else(|| self.app_resource_id.clone());
                        let chosen = choose(preferred, self.apps.iter().map(|a| &a.id));
                        match chosen {
                            Some(id) if self.app_resource_id.as_ref() != Some(&id) => {
                                self.enter_app(id)
                            }
                            _ => Vec::new(),
                        }
                    }
                    Err(message) => {
                        self.error = Some(message);
                        Vec::new()
                    }
                }
            }
            Event::SelectApp(resource_id) => {
                if self.app_resource_id.as_deref() == Some(resource_id.as_str()) {
                    return Vec::new();
                }
                self.enter_app(resource_id)
            }
            Event::SetTimeRange(range) => {
                if range == self.time_range {
                    return Vec::new();
                }
                self.time_range = range;
                self.restart_invocations()
            }
            Event::SetSearchInput(input) => {
                self.search_input = input;
                Vec::new()
            }
            Event::ConfirmSearch => {
                let keyword = self.search_input.trim().to_string();
                self.mode = if keyword.is_empty() {
                    Mode::List
                } else {
                    Mode::Search
                };
                self.search_keyword = keyword;
                self.restart_invocations()
            }
            Event::ResetSearch => {
                self.search_input.clear();
                self.search_keyword.clear();
                self.mode = Mode::List;
                self.restart_invocations()
            }
            Event::RefreshInvocations | Event::AutoRefreshTick => {
                self.issue_invocations(false).into_iter().collect()
            }
            Event::LoadMore => {
                if !self.can_load_more() {
                    return Vec::new();
                }
                self.issue_invocations(true).into_iter().collect()
            }
            Event::InvocationsLoaded {
                generation,
                request,
                result,
            } => {
                if !self.accept(Panel::Invocations, generation) {
                    return Vec::new();
                }
                match result {
                    Ok(rows) => {
                        self.invocation_offset = request.next_offset(rows.len());
                        if request.append {
                            self.invocations.extend(rows);
                        } else {
                            self.invocations = rows;
                        }
                        self.error = None;
                    }
                    Err(message) => self.error = Some(message),
                }
                Vec::new()
            }
            Event::SelectInvocation { key, operation_id } => {
                self.selected_operation_id = Some(operation_id);
                self.selected_invocation_key = Some(key);
                self.details.clear();
                self.issue_details().into_iter().collect()
            }
            Event::RefreshDetails => self.issue_details().into_iter().collect(),
            Event::DetailsLoaded { generation, result } => {
                if !self.accept(Panel::Details, generation) {
                    return Vec::new();
                }
                match result {
                    Ok(rows) => {
                        self.details = rows;
                        self.error = None;
                    }
                    Err(message) => self.error = Some(message),
                }
                Vec::new()
            }
            Event::SetAutoRefresh(enabled) => {
                self.auto_refresh = enabled;
                Vec::new()
            }
            Event::SetAutoRefreshSeconds(seconds) => {
                if seconds > 0 {
                    self.auto_refresh_seconds = seconds;
                }
                Vec::new()
            }
        }
    }

    /// Marks the panel idle when `generation` is current.
    fn accept(&mut self, panel: Panel, generation: u64) -> bool {
        if generation != self.generations.current(panel) {
            tracing::debug!(?panel, generation, "discarding stale response");
            return false;
        }
        *self.loading.flag(panel) = false;
        true
    }

    /// Drops any in-flight fetch for `panel`.
    fn invalidate(&mut self, panel: Panel) {
        self.generations.bump(panel);
        *self.loading.flag(panel) = false;
    }

    fn begin(&mut self, panel: Panel) -> u64 {
        *self.loading.flag(panel) = true;
        self.generations.bump(panel)
    }

    fn pick_default_tenant(&self) -> Option<String> {
        let ids = || self.tenants.iter().map(|t| &t.tenant_id);
        self.default_tenant_id
            .as_ref()
            .filter(|id| ids().any(|t| t == *id))
            .cloned()
            .or_else(|| ids().next().cloned())
    }

    fn issue_tenants(&mut self) -> Effect {
        Effect::FetchTenants {
            generation: self.begin(Panel::Tenants),
        }
    }

    fn issue_subscriptions(&mut self) -> Option<Effect> {
        let tenant_id = self.tenant_id.clone()?;
        Some(Effect::FetchSubscriptions {
            generation: self.begin(Panel::Subscriptions),
            tenant_id,
        })
    }

    fn issue_apps(&mut self) -> Option<Effect> {
        let tenant_id = self.tenant_id.clone()?;
        let subscription_id = self.subscription_id.clone()?;
        Some(Effect::FetchApps {
            generation: self.begin(Panel::Apps),
            tenant_id,
            subscription_id,
        })
    }

    fn enter_tenant(&mut self, tenant: String) -> Vec<Effect> {
        self.tenant_id = Some(tenant);
        self.subscriptions.clear();
        self.subscription_id = None;
        self.invalidate(Panel::Subscriptions);
        self.clear_apps();
        self.issue_subscriptions().into_iter().collect()
    }

    fn enter_subscription(&mut self, subscription: String) -> Vec<Effect> {
        self.subscription_id = Some(subscription);
        self.clear_apps();
        self.issue_apps().into_iter().collect()
    }

    fn enter_app(&mut self, resource_id: String) -> Vec<Effect> {
        self.app_resource_id = Some(resource_id);
        self.restart_invocations()
    }

    fn clear_apps(&mut self) {
        self.apps.clear();
        self.app_resource_id = None;
        self.invalidate(Panel::Apps);
        self.clear_invocations();
    }

    fn clear_invocations(&mut self) {
        self.invocations.clear();
        self.invocation_offset = 0;
        self.invalidate(Panel::Invocations);
        self.clear_selection();
    }

    fn clear_selection(&mut self) {
        self.selected_operation_id = None;
        self.selected_invocation_key = None;
        self.details.clear();
        self.invalidate(Panel::Details);
    }

    /// Empties the list and fetches the first page again.
    fn restart_invocations(&mut self) -> Vec<Effect> {
        self.clear_invocations();
        self.issue_invocations(false).into_iter().collect()
    }

    fn issue_invocations(&mut self, append: bool) -> Option<Effect> {
        let app_id = self.active_app_id()?.to_string();
        if !append {
            self.clear_selection();
        }
        let request = InvocationsRequest {
            time_range: self.time_range,
            mode: self.mode,
            keyword: self.search_keyword.clone(),
            offset: if append { self.invocation_offset } else { 0 },
            append,
        };
        Some(Effect::FetchInvocations {
            generation: self.begin(Panel::Invocations),
            tenant_id: self.tenant_id.clone(),
            app_id,
            request,
        })
    }

    fn issue_details(&mut self) -> Option<Effect> {
        let operation_id = self.selected_operation_id.clone()?;
        let app_id = self.active_app_id()?.to_string();
        Some(Effect::FetchDetails {
            generation: self.begin(Panel::Details),
            tenant_id: self.tenant_id.clone(),
            app_id,
            operation_id,
            time_range: self.time_range,
        })
    }

    pub fn active_app(&self) -> Option<&AppInsightsComponent> {
        let id = self.app_resource_id.as_deref()?;
        self.apps.iter().find(|app| app.id == id)
    }

    pub fn active_app_id(&self) -> Option<&str> {
        self.active_app()?.query_app_id()
    }

    pub fn selected_invocation(&self) -> Option<&InvocationRow> {
        let key = self.selected_invocation_key.as_deref()?;
        self.invocations.iter().find(|row| row.key() == key)
    }

    pub fn success_count(&self) -> usize {
        self.invocations.iter().filter(|row| row.success).count()
    }

    pub fn error_count(&self) -> usize {
        self.invocations.len() - self.success_count()
    }

    pub fn can_load_more(&self) -> bool {
        self.mode == Mode::List && self.active_app_id().is_some() && !self.loading.invocations
    }

    pub fn refresh_schedule(&self) -> Option<RefreshSchedule> {
        if !self.auto_refresh {
            return None;
        }
        Some(RefreshSchedule {
            app_id: self.active_app_id()?.to_string(),
            tenant_id: self.tenant_id.clone(),
            time_range: self.time_range,
            mode: self.mode,
            keyword: self.search_keyword.clone(),
            seconds: self.auto_refresh_seconds,
        })
    }

    /// Selections to persist. While a list is still loading the restored
    /// preference stands in for the not-yet-made selection.
    pub fn preferences(&self) -> Preferences {
        Preferences {
            tenant_id: self.tenant_id.clone(),
            subscription_id: self
                .subscription_id
                .clone()
                .or_else(|| self.preferred_subscription_id.clone()),
            app_resource_id: self
                .app_resource_id
                .clone()
                .or_else(|| self.preferred_app_resource_id.clone()),
            time_range: self.time_range,
            auto_refresh: self.auto_refresh,
            auto_refresh_seconds: self.auto_refresh_seconds,
        }
    }
}

/// `preferred` when it is in `ids`, otherwise the first id.
fn choose<'a>(preferred: Option<String>, ids: impl Iterator<Item = &'a String> + Clone) -> Option<String> {
    preferred
        .filter(|p| ids.clone().any(|id| id == p))
        .or_else(|| ids.clone().next().cloned())
}

/// Next auto-refresh interval in the offered list, wrapping in either direction.
pub fn step_interval(current: u64, forward: bool) -> u64 {
    let idx = AUTO_REFRESH_CHOICES.iter().position(|s| *s == current);
    let len = AUTO_REFRESH_CHOICES.len();
    let next = match (idx, forward) {
        (Some(i), true) => (i + 1) % len,
        (Some(i), false) => (i + len - 1) % len,
        (None, _) => 1,
    };
    AUTO_REFRESH_CHOICES[next]
}
