use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::http;

pub const ARM_URL: &str = "https://management.azure.com";

const TENANTS_API_VERSION: &str = "2020-01-01";
const SUBSCRIPTIONS_API_VERSION: &str = "2020-01-01";
const COMPONENTS_API_VERSION: &str = "2015-05-01";

static RESOURCE_GROUP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/resourceGroups/([^/]+)/").unwrap());
static SUBSCRIPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)/subscriptions/([^/]+)/").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmTenant {
    pub tenant_id: String,
    pub display_name: Option<String>,
    pub country_code: Option<String>,
    pub domains: Option<Vec<String>>,
}

impl ArmTenant {
    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => format!("{name} ({})", self.tenant_id),
            _ => self.tenant_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArmSubscription {
    pub subscription_id: String,
    pub display_name: String,
    pub state: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInsightsComponent {
    /// Full ARM resource id.
    pub id: String,
    pub name: String,
    pub location: Option<String>,
    pub resource_group: Option<String>,
    pub subscription_id: Option<String>,
    /// Identifier accepted by the log-query endpoint.
    pub app_id: Option<String>,
    pub application_id: Option<String>,
    pub ingestion_mode: Option<String>,
}

impl AppInsightsComponent {
    pub fn query_app_id(&self) -> Option<&str> {
        self.app_id.as_deref().filter(|id| !id.is_empty())
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new", deserialize_with = "http::null_as_empty")]
    value: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawTenant {
    tenant_id: Option<String>,
    display_name: Option<String>,
    country_code: Option<String>,
    domains: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawSubscription {
    subscription_id: Option<String>,
    display_name: Option<String>,
    state: Option<String>,
    tenant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawComponent {
    id: Option<String>,
    name: Option<String>,
    location: Option<String>,
    properties: Map<String, Value>,
}

impl From<RawComponent> for AppInsightsComponent {
    fn from(raw: RawComponent) -> Self {
        let id = raw.id.unwrap_or_default();
        Self {
            resource_group: resource_group_from_id(&id),
            subscription_id: subscription_from_id(&id),
            name: raw.name.unwrap_or_default(),
            location: raw.location,
            app_id: property(&raw.properties, "AppId", "appId"),
            application_id: property(&raw.properties, "ApplicationId", "applicationId"),
            ingestion_mode: property(&raw.properties, "IngestionMode", "ingestionMode"),
            id,
        }
    }
}

/// The property name casing differs between API versions.
fn property(props: &Map<String, Value>, pascal: &str, camel: &str) -> Option<String> {
    [pascal, camel]
        .iter()
        .find_map(|key| props.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

pub fn resource_group_from_id(id: &str) -> Option<String> {
    RESOURCE_GROUP_RE
        .captures(id)
        .map(|caps| caps[1].to_string())
}

pub fn subscription_from_id(id: &str) -> Option<String> {
    SUBSCRIPTION_RE.captures(id).map(|caps| caps[1].to_string())
}

/// Case-insensitive ordering by display name.
pub fn sort_components(components: &mut [AppInsightsComponent]) {
    components.sort_by_cached_key(|c| c.name.to_lowercase());
}

#[derive(Debug, Clone)]
pub struct ArmClient {
    http: Client,
    base_url: String,
}

impl ArmClient {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, ARM_URL)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn get_list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<Vec<T>> {
        let url = format!("{}{path}", self.base_url);
        let envelope: ListEnvelope<T> =
            http::get_json(&self.http, &format!("ARM GET {path}"), &url, token).await?;
        Ok(envelope.value)
    }

    pub async fn list_tenants(&self, token: &str) -> Result<Vec<ArmTenant>> {
        let path = format!("/tenants?api-version={TENANTS_API_VERSION}");
        let raw: Vec<RawTenant> = self.get_list(&path, token).await?;
        Ok(raw
            .into_iter()
            .filter_map(|t| {
                Some(ArmTenant {
                    tenant_id: t.tenant_id.filter(|id| !id.is_empty())?,
                    display_name: t.display_name,
                    country_code: t.country_code,
                    domains: t.domains,
                })
            })
            .collect())
    }

    pub async fn list_subscriptions(&self, token: &str) -> Result<Vec<ArmSubscription>> {
        let path = format!("/subscriptions?api-version={SUBSCRIPTIONS_API_VERSION}");
        let raw: Vec<RawSubscription> = self.get_list(&path, token).await?;
        Ok(raw
            .into_iter()
            .filter_map(|s| {
                let subscription_id = s.subscription_id.filter(|id| !id.is_empty())?;
                Some(ArmSubscription {
                    display_name: s.display_name.unwrap_or_else(|| subscription_id.clone()),
                    subscription_id,
                    state: s.state,
                    tenant_id: s.tenant_id,
                })
            })
            .collect())
    }

    pub async fn list_app_insights_components(
        &self,
        subscription_id: &str,
        token: &str,
    ) -> Result<Vec<AppInsightsComponent>> {
        let path = format!(
            "/subscriptions/{subscription_id}/providers/Microsoft.Insights/components?api-version={COMPONENTS_API_VERSION}"
        );
        let raw: Vec<RawComponent> = self.get_list(&path, token).await?;
        Ok(raw
            .into_iter()
            .map(AppInsightsComponent::from)
            .filter(|c| !c.id.is_empty())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::serve_once;

    fn client(base: String) -> ArmClient {
        ArmClient::with_base_url(http::build_client().expect("client"), base)
    }

    #[test]
    fn resource_id_parts_are_extracted_case_insensitively() {
        let id = "/subscriptions/sub-1/resourcegroups/rg-web/providers/microsoft.insights/components/web";
        assert_eq!(resource_group_from_id(id).as_deref(), Some("rg-web"));
        assert_eq!(subscription_from_id(id).as_deref(), Some("sub-1"));
        assert_eq!(resource_group_from_id("/subscriptions/sub-1"), None);
    }

    #[test]
    fn component_reads_either_property_casing() {
        let pascal: RawComponent = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Insights/components/a",
            "name": "a",
            "properties": {"AppId": "pascal-id", "IngestionMode": "LogAnalytics"}
        }))
        .expect("raw");
        let camel: RawComponent = serde_json::from_value(serde_json::json!({
            "id": "/subscriptions/s/resourceGroups/rg/providers/Microsoft.Insights/components/b",
            "name": "b",
            "properties": {"appId": "camel-id", "applicationId": "b"}
        }))
        .expect("raw");

        let pascal = AppInsightsComponent::from(pascal);
        let camel = AppInsightsComponent::from(camel);
        assert_eq!(pascal.app_id.as_deref(), Some("pascal-id"));
        assert_eq!(pascal.ingestion_mode.as_deref(), Some("LogAnalytics"));
        assert_eq!(camel.app_id.as_deref(), Some("camel-id"));
        assert_eq!(camel.application_id.as_deref(), Some("b"));
        assert_eq!(camel.resource_group.as_deref(), Some("rg"));
    }

    #[test]
    fn components_sort_by_name_ignoring_case() {
        let mut components: Vec<AppInsightsComponent> = ["beta", "Alpha", "gamma"]
            .into_iter()
            .map(|name| AppInsightsComponent {
                id: format!("/x/{name}"),
                name: name.to_string(),
                location: None,
                resource_group: None,
                subscription_id: None,
                app_id: None,
                application_id: None,
                ingestion_mode: None,
            })
            .collect();
        sort_components(&mut components);
        let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn list_tenants_maps_optional_fields() {
        let body = r#"{"value":[{"tenantId":"t1","displayName":"Contoso","domains":["contoso.com"]},{"tenantId":"t2"},{"displayName":"no id"}]}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let tenants = client(base).list_tenants("tok").await.expect("tenants");

        assert_eq!(tenants.len(), 2);
        assert_eq!(tenants[0].display_name.as_deref(), Some("Contoso"));
        assert_eq!(tenants[0].domains, Some(vec!["contoso.com".to_string()]));
        assert_eq!(tenants[1].country_code, None);

        let request = server.await.expect("server");
        assert!(request.starts_with("GET /tenants?api-version=2020-01-01 "));
    }

    #[tokio::test]
    async fn null_value_lists_nothing() {
        let (base, _server) = serve_once("200 OK", r#"{"value":null}"#).await;
        let subscriptions = client(base)
            .list_subscriptions("tok")
            .await
            .expect("subscriptions");
        assert!(subscriptions.is_empty());
    }

    #[tokio::test]
    async fn list_components_uses_subscription_path() {
        let body = r#"{"value":[{"id":"/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Insights/components/api","name":"api","location":"westeurope","properties":{"AppId":"app-guid"}}]}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let components = client(base)
            .list_app_insights_components("s1", "tok")
            .await
            .expect("components");

        assert_eq!(components.len(), 1);
        assert_eq!(components[0].query_app_id(), Some("app-guid"));
        assert_eq!(components[0].subscription_id.as_deref(), Some("s1"));
        assert_eq!(components[0].location.as_deref(), Some("westeurope"));

        let request = server.await.expect("server");
        assert!(request.starts_with(
            "GET /subscriptions/s1/providers/Microsoft.Insights/components?api-version=2015-05-01 "
        ));
    }

    #[tokio::test]
    async fn empty_value_yields_empty_list() {
        let (base, _server) = serve_once("200 OK", "{}").await;
        let subs = client(base).list_subscriptions("tok").await.expect("subs");
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn forbidden_reports_path_and_status() {
        let (base, _server) = serve_once("403 Forbidden", "nope").await;
        let err = client(base)
            .list_subscriptions("tok")
            .await
            .expect_err("should fail");
        assert_eq!(
            err.to_string(),
            "ARM GET /subscriptions?api-version=2020-01-01 failed: 403 Forbidden nope"
        );
    }
}
