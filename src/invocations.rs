use std::fmt::Write as _;

use anyhow::{anyhow, bail, Result};
use clap::{Args, Subcommand};
use dialoguer::console;

use crate::args::BaseArgs;
use crate::arm::{subscription_from_id, AppInsightsComponent};
use crate::browse::resolve_tenant;
use crate::config::{self, Preferences};
use crate::kql::{self, InvocationsPage, TimeRange, PAGE_SIZE};
use crate::logs::{
    approximate_entry_duration_ms, detail_rows, invocation_rows, DetailRow, InvocationRow,
};
use crate::session::{maybe_print_query, Session};
use crate::ui::{apply_column_padding, header, print_with_pager, styled_table, truncate, with_spinner};
use crate::utils::count_label;

/// Which Application Insights resource to query.
#[derive(Debug, Clone, Default, Args)]
pub struct AppSelector {
    /// Application id used by the query endpoint (skips the resource lookup)
    #[arg(long, env = "AIV_APP_ID", conflicts_with = "app")]
    pub app_id: Option<String>,

    /// Resource name or full resource id (defaults to the saved app)
    #[arg(long)]
    pub app: Option<String>,

    /// Subscription holding the app when --app is a bare name
    #[arg(long, short = 's', env = "AIV_SUBSCRIPTION")]
    pub subscription: Option<String>,

    /// Time range (defaults to the saved one)
    #[arg(long, short = 't', value_enum)]
    pub time_range: Option<TimeRange>,
}

#[derive(Debug, Clone, Args)]
pub struct InvocationsArgs {
    #[command(flatten)]
    pub target: AppSelector,

    /// Rows to skip (newest first); search results are not paged
    #[arg(long, default_value_t = 0, conflicts_with = "search")]
    pub offset: usize,

    /// Rows to return
    #[arg(long, short = 'n', default_value_t = PAGE_SIZE)]
    pub limit: usize,

    /// Only requests whose traces or exceptions contain this keyword
    #[arg(long)]
    pub search: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct DetailsArgs {
    /// Operation id of the invocation
    pub operation_id: String,

    #[command(flatten)]
    pub target: AppSelector,

    /// Print every entry with its full message instead of a table
    #[arg(long)]
    pub full: bool,
}

#[derive(Debug, Clone, Args)]
pub struct KqlArgs {
    #[command(subcommand)]
    command: KqlCommand,
}

#[derive(Debug, Clone, Subcommand)]
enum KqlCommand {
    /// Query for one page of invocations
    Invocations {
        #[arg(long, short = 't', value_enum, default_value_t = TimeRange::default())]
        time_range: TimeRange,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, short = 'n', default_value_t = PAGE_SIZE)]
        limit: usize,
    },
    /// Query for the telemetry correlated to one operation
    Details {
        operation_id: String,
        #[arg(long, short = 't', value_enum, default_value_t = TimeRange::default())]
        time_range: TimeRange,
    },
    /// Query for invocations whose messages contain a keyword
    Search {
        keyword: String,
        #[arg(long, short = 't', value_enum, default_value_t = TimeRange::default())]
        time_range: TimeRange,
        #[arg(long, short = 'n', default_value_t = PAGE_SIZE)]
        limit: usize,
    },
}

/// Prints the generated query text. Never touches the network.
pub fn run_kql(args: KqlArgs) -> Result<()> {
    let query = match args.command {
        KqlCommand::Invocations {
            time_range,
            offset,
            limit,
        } => kql::invocations_query(&InvocationsPage {
            time_range,
            offset,
            limit: page_limit(offset, limit)?,
        }),
        KqlCommand::Details {
            operation_id,
            time_range,
        } => kql::invocation_details_query(&operation_id, time_range),
        KqlCommand::Search {
            keyword,
            time_range,
            limit,
        } => kql::search_invocations_query(&keyword, time_range, positive_limit(limit)?),
    };
    println!("{query}");
    Ok(())
}

fn positive_limit(limit: usize) -> Result<usize> {
    if limit == 0 {
        bail!("--limit must be at least 1");
    }
    Ok(limit)
}

/// Like [`positive_limit`], and the last row of the page must be addressable.
fn page_limit(offset: usize, limit: usize) -> Result<usize> {
    let limit = positive_limit(limit)?;
    if offset.checked_add(limit).is_none() {
        bail!("--offset {offset} with --limit {limit} is past the last addressable row");
    }
    Ok(limit)
}

/// The query-endpoint id of the selected app plus a label for output.
struct ResolvedApp {
    app_id: String,
    label: String,
}

pub fn find_component<'a>(
    components: &'a [AppInsightsComponent],
    reference: &str,
) -> Option<&'a AppInsightsComponent> {
    components
        .iter()
        .find(|c| c.id.eq_ignore_ascii_case(reference))
        .or_else(|| {
            components
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(reference))
        })
}

async fn resolve_app(
    session: &Session,
    target: &AppSelector,
    prefs: &Preferences,
    tenant: Option<&str>,
) -> Result<ResolvedApp> {
    if let Some(app_id) = &target.app_id {
        return Ok(ResolvedApp {
            app_id: app_id.clone(),
            label: app_id.clone(),
        });
    }

    let reference = target
        .app
        .clone()
        .or_else(|| prefs.app_resource_id.clone())
        .ok_or_else(|| {
            anyhow!("no app selected; pass --app-id or --app, or save one with `aiv config set app <resource id>`")
        })?;
    let subscription = subscription_from_id(&reference)
        .or_else(|| target.subscription.clone())
        .or_else(|| prefs.subscription_id.clone())
        .ok_or_else(|| anyhow!("cannot find '{reference}' without a subscription; pass --subscription"))?;

    let token = session.arm_token(tenant).await?;
    let components = session
        .arm
        .list_app_insights_components(&subscription, &token)
        .await?;
    let component = find_component(&components, &reference)
        .ok_or_else(|| anyhow!("no Application Insights resource '{reference}' in subscription {subscription}"))?;
    let app_id = component
        .query_app_id()
        .ok_or_else(|| anyhow!("{} has no application id to query", component.name))?;
    Ok(ResolvedApp {
        app_id: app_id.to_string(),
        label: component.name.clone(),
    })
}

pub async fn run_invocations(base: BaseArgs, args: InvocationsArgs) -> Result<()> {
    let limit = page_limit(args.offset, args.limit)?;
    let prefs = config::load_preferences(&config::prefs_path()?);
    let tenant = resolve_tenant(&base, &prefs);
    let time_range = args.target.time_range.unwrap_or(prefs.time_range);
    let keyword = args
        .search
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty());

    let query = match keyword {
        Some(keyword) => kql::search_invocations_query(keyword, time_range, limit),
        None => kql::invocations_query(&InvocationsPage {
            time_range,
            offset: args.offset,
            limit,
        }),
    };
    maybe_print_query(base.print_queries, "invocations", &query);

    let session = Session::open(&base, true)?;
    let (app, rows) = with_spinner("Loading invocations...", async {
        let app = resolve_app(&session, &args.target, &prefs, tenant.as_deref()).await?;
        let token = session.logs_token(tenant.as_deref()).await?;
        let result = session.logs.query(&app.app_id, &query, &token).await?;
        anyhow::Ok((app, invocation_rows(result.primary())))
    })
    .await?;

    if base.json {
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    let failed = rows.iter().filter(|row| !row.success).count();
    let mut output = String::new();
    writeln!(
        output,
        "{} in {} ({}), {} failed\n",
        console::style(count_label(rows.len(), "invocation", None)),
        console::style(&app.label).bold(),
        time_range.label(),
        console::style(failed).red()
    )?;
    write!(output, "{}", invocations_table(&rows, keyword.is_some()))?;
    print_with_pager(&output)?;
    Ok(())
}

pub async fn run_details(base: BaseArgs, args: DetailsArgs) -> Result<()> {
    let prefs = config::load_preferences(&config::prefs_path()?);
    let tenant = resolve_tenant(&base, &prefs);
    let time_range = args.target.time_range.unwrap_or(prefs.time_range);
    let query = kql::invocation_details_query(&args.operation_id, time_range);
    maybe_print_query(base.print_queries, "details", &query);

    let session = Session::open(&base, true)?;
    let rows = with_spinner("Loading invocation details...", async {
        let app = resolve_app(&session, &args.target, &prefs, tenant.as_deref()).await?;
        let token = session.logs_token(tenant.as_deref()).await?;
        let result = session.logs.query(&app.app_id, &query, &token).await?;
        anyhow::Ok(detail_rows(result.primary()))
    })
    .await?;

    if base.json {
        println!("{}", serde_json::to_string(&rows)?);
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} for operation {}\n",
        console::style(count_label(rows.len(), "entry", Some("entries"))),
        console::style(&args.operation_id).bold()
    )?;
    if args.full {
        write!(output, "{}", details_full(&rows))?;
    } else {
        write!(output, "{}", details_table(&rows))?;
    }
    print_with_pager(&output)?;
    Ok(())
}

fn invocations_table(rows: &[InvocationRow], with_matches: bool) -> comfy_table::Table {
    let mut table = styled_table();
    let mut headers = vec![
        header("Started"),
        header("Name"),
        header("Result"),
        header("Duration"),
        header("Operation"),
    ];
    if with_matches {
        headers.push(header("Matches"));
    }
    table.set_header(headers);
    apply_column_padding(&mut table, (0, 3));

    for row in rows {
        let result = if row.success {
            console::style(format!("ok {}", row.result_code)).green()
        } else {
            console::style(format!("failed {}", row.result_code)).red()
        };
        let mut cells = vec![
            row.timestamp.clone(),
            truncate(&row.name, 48),
            result.to_string(),
            format!("{:.0} ms", row.duration_ms),
            row.operation_id.clone(),
        ];
        if with_matches {
            cells.push(row.match_count.map(|n| n.to_string()).unwrap_or_default());
        }
        table.add_row(cells);
    }
    table
}

fn details_table(rows: &[DetailRow]) -> comfy_table::Table {
    let mut table = styled_table();
    table.set_header(vec![
        header("Time"),
        header("Type"),
        header("Level"),
        header("Took"),
        header("Message"),
    ]);
    apply_column_padding(&mut table, (0, 3));

    for (idx, row) in rows.iter().enumerate() {
        let first_line = row.message.lines().next().unwrap_or_default();
        table.add_row(vec![
            row.timestamp.clone(),
            row.item_type.clone(),
            row.log_level.clone(),
            approx_label(approximate_entry_duration_ms(rows, idx, None)),
            truncate(first_line, 100),
        ]);
    }
    table
}

fn details_full(rows: &[DetailRow]) -> String {
    let mut out = String::new();
    for (idx, row) in rows.iter().enumerate() {
        let level = if row.log_level.is_empty() {
            String::new()
        } else {
            format!(" [{}]", row.log_level)
        };
        let _ = writeln!(
            out,
            "{} {}{level}  ~{}",
            console::style(&row.timestamp).dim(),
            console::style(&row.item_type).bold(),
            approx_label(approximate_entry_duration_ms(rows, idx, None))
        );
        let _ = writeln!(out, "{}\n", row.message.trim_end());
    }
    out
}

fn approx_label(ms: Option<f64>) -> String {
    ms.map(|ms| format!("{ms:.0} ms"))
        .unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(name: &str) -> AppInsightsComponent {
        AppInsightsComponent {
            id: format!("/subscriptions/s1/resourceGroups/rg/providers/microsoft.insights/components/{name}"),
            name: name.into(),
            location: None,
            resource_group: Some("rg".into()),
            subscription_id: Some("s1".into()),
            app_id: Some(format!("id-{name}")),
            application_id: None,
            ingestion_mode: None,
        }
    }

    #[test]
    fn find_component_matches_id_then_name_case_insensitively() {
        let components = vec![component("Orders"), component("billing")];
        let by_id = find_component(
            &components,
            "/SUBSCRIPTIONS/s1/resourceGroups/rg/providers/Microsoft.Insights/components/billing",
        );
        assert_eq!(by_id.map(|c| c.name.as_str()), Some("billing"));
        assert_eq!(
            find_component(&components, "orders").map(|c| c.name.as_str()),
            Some("Orders")
        );
        assert!(find_component(&components, "missing").is_none());
    }

    #[test]
    fn zero_limit_is_rejected() {
        assert!(positive_limit(0).is_err());
        assert_eq!(positive_limit(5).unwrap(), 5);
    }

    #[test]
    fn page_past_last_row_is_rejected() {
        assert_eq!(page_limit(usize::MAX - 100, 100).unwrap(), 100);
        let err = page_limit(usize::MAX - 5, 100).unwrap_err();
        assert!(err.to_string().contains("past the last addressable row"));
        assert!(page_limit(0, 0).is_err());
    }

    #[test]
    fn details_table_shows_gaps_between_entries() {
        let row = |ts: &str, message: &str| DetailRow {
            timestamp: ts.into(),
            item_type: "trace".into(),
            log_level: "Information".into(),
            message: message.into(),
            severity_level: Some(1),
            result_code: String::new(),
            success: None,
            duration_ms: None,
            kind: String::new(),
            role_name: String::new(),
        };
        let rows = vec![
            row("2024-05-01T10:00:00.000Z", "starting\nsecond line"),
            row("2024-05-01T10:00:00.250Z", "done"),
        ];
        let rendered = details_table(&rows).to_string();
        assert!(rendered.contains("250 ms"));
        assert!(rendered.contains("starting"));
        assert!(!rendered.contains("second line"));

        let full = details_full(&rows);
        assert!(full.contains("second line"));
    }
}
