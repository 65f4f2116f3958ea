use std::collections::HashMap;

use anyhow::Result;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::http;

mod rows;

pub use rows::{
    approximate_entry_duration_ms, derive_success, detail_rows, invocation_rows, DetailRow,
    InvocationRow,
};

pub const LOGS_API_URL: &str = "https://api.loganalytics.io";
pub const PRIMARY_TABLE: &str = "PrimaryResult";

/// One result row keyed by column name.
pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsColumn {
    pub name: String,
    #[serde(default, rename = "type")]
    pub column_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsTable {
    pub name: String,
    #[serde(default, deserialize_with = "http::null_as_empty")]
    pub columns: Vec<LogsColumn>,
    #[serde(default, deserialize_with = "http::null_as_empty")]
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct LogsQueryResponse {
    #[serde(default, deserialize_with = "http::null_as_empty")]
    tables: Vec<LogsTable>,
}

#[derive(Debug, Clone)]
pub struct LogsQueryResult {
    pub tables: Vec<LogsTable>,
    pub records_by_table: HashMap<String, Vec<Record>>,
}

impl LogsQueryResult {
    fn from_tables(tables: Vec<LogsTable>) -> Self {
        let records_by_table = tables
            .iter()
            .map(|table| (table.name.clone(), table_to_records(table)))
            .collect();
        Self {
            tables,
            records_by_table,
        }
    }

    /// Records of the primary result table, empty when the reply has none.
    pub fn primary(&self) -> &[Record] {
        self.records_by_table
            .get(PRIMARY_TABLE)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Zips each row positionally with the column names. Cells missing from a
/// short row come back as null.
pub fn table_to_records(table: &LogsTable) -> Vec<Record> {
    table
        .rows
        .iter()
        .map(|row| {
            table
                .columns
                .iter()
                .enumerate()
                .map(|(idx, column)| {
                    (
                        column.name.clone(),
                        row.get(idx).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect()
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct LogsClient {
    http: Client,
    base_url: String,
}

impl LogsClient {
    pub fn new(http: Client) -> Self {
        Self::with_base_url(http, LOGS_API_URL)
    }

    pub fn with_base_url(http: Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn query(&self, app_id: &str, kql: &str, token: &str) -> Result<LogsQueryResult> {
        let url = format!(
            "{}/v1/apps/{}/query",
            self.base_url,
            urlencoding::encode(app_id)
        );
        tracing::debug!(app_id, "running logs query");
        let response: LogsQueryResponse =
            http::post_json(&self.http, "Logs query", &url, token, &json!({ "query": kql }))
                .await?;
        Ok(LogsQueryResult::from_tables(response.tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_server::serve_once;

    fn table(columns: &[&str], rows: Vec<Vec<Value>>) -> LogsTable {
        LogsTable {
            name: PRIMARY_TABLE.to_string(),
            columns: columns
                .iter()
                .map(|name| LogsColumn {
                    name: name.to_string(),
                    column_type: "string".to_string(),
                })
                .collect(),
            rows,
        }
    }

    #[test]
    fn records_zip_columns_with_cells() {
        let records = table_to_records(&table(
            &["name", "success"],
            vec![vec![json!("GET /"), json!(true)]],
        ));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get("name"), Some(&json!("GET /")));
        assert_eq!(records[0].get("success"), Some(&json!(true)));
    }

    #[test]
    fn short_rows_fill_missing_cells_with_null() {
        let records = table_to_records(&table(&["a", "b"], vec![vec![json!(1)]]));
        assert_eq!(records[0].get("b"), Some(&Value::Null));
    }

    #[test]
    fn empty_table_has_no_records() {
        assert!(table_to_records(&table(&["a"], Vec::new())).is_empty());
    }

    #[tokio::test]
    async fn query_posts_kql_and_indexes_tables() {
        let body = r#"{"tables":[{"name":"PrimaryResult","columns":[{"name":"operation_Id","type":"string"}],"rows":[["op-1"],["op-2"]]}]}"#;
        let (base, server) = serve_once("200 OK", body).await;
        let client = LogsClient::with_base_url(http::build_client().expect("client"), base);

        let result = client
            .query("app id/1", "requests | take 2", "tok")
            .await
            .expect("query");

        assert_eq!(result.tables.len(), 1);
        assert_eq!(result.primary().len(), 2);
        assert_eq!(result.primary()[1].get("operation_Id"), Some(&json!("op-2")));

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /v1/apps/app%20id%2F1/query "));
        assert!(request.contains(r#"{"query":"requests | take 2"}"#));
    }

    #[tokio::test]
    async fn missing_tables_yield_empty_primary() {
        let (base, _server) = serve_once("200 OK", "{}").await;
        let client = LogsClient::with_base_url(http::build_client().expect("client"), base);
        let result = client.query("app", "requests", "tok").await.expect("query");
        assert!(result.primary().is_empty());
    }

    #[tokio::test]
    async fn null_tables_yield_empty_primary() {
        let (base, _server) = serve_once("200 OK", r#"{"tables":null}"#).await;
        let client = LogsClient::with_base_url(http::build_client().expect("client"), base);
        let result = client.query("app", "requests", "tok").await.expect("query");
        assert!(result.tables.is_empty());
        assert!(result.primary().is_empty());
    }

    #[test]
    fn null_rows_and_columns_read_as_empty() {
        let table: LogsTable =
            serde_json::from_str(r#"{"name":"PrimaryResult","columns":null,"rows":null}"#)
                .expect("table");
        assert!(table.columns.is_empty());
        assert!(table_to_records(&table).is_empty());
    }

    #[tokio::test]
    async fn failed_query_reports_status() {
        let (base, _server) =
            serve_once("400 Bad Request", r#"{"error":{"code":"BadArgumentError"}}"#).await;
        let client = LogsClient::with_base_url(http::build_client().expect("client"), base);
        let err = client
            .query("app", "bogus", "tok")
            .await
            .expect_err("should fail");
        let message = err.to_string();
        assert!(message.starts_with("Logs query failed: 400 Bad Request"));
        assert!(message.contains("BadArgumentError"));
    }
}
