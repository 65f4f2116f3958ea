use std::fmt::Write as _;

use anyhow::{bail, Result};
use clap::Args;
use comfy_table::Table;
use dialoguer::console;

use crate::args::BaseArgs;
use crate::arm::{sort_components, AppInsightsComponent, ArmSubscription, ArmTenant};
use crate::config::{self, Preferences};
use crate::session::Session;
use crate::ui::{
    apply_column_padding, fuzzy_select, header, print_with_pager, styled_table, truncate,
    with_spinner,
};
use crate::utils::count_label;

#[derive(Debug, Clone, Args)]
pub struct AppsArgs {
    /// Subscription to list apps from (defaults to the saved one, else prompts)
    #[arg(long, short = 's', env = "AIV_SUBSCRIPTION")]
    pub subscription: Option<String>,
}

/// `--tenant`, else the saved directory. `None` means the account's home.
pub fn resolve_tenant(base: &BaseArgs, prefs: &Preferences) -> Option<String> {
    base.tenant.clone().or_else(|| prefs.tenant_id.clone())
}

pub async fn run_tenants(base: BaseArgs) -> Result<()> {
    let session = Session::open(&base, true)?;
    let tenants = with_spinner("Loading directories...", async {
        let token = session.arm_token(None).await?;
        session.arm.list_tenants(&token).await
    })
    .await?;

    if base.json {
        println!("{}", serde_json::to_string(&tenants)?);
        return Ok(());
    }

    let prefs = config::load_preferences(&config::prefs_path()?);
    let mut output = String::new();
    writeln!(
        output,
        "{} found\n",
        console::style(count_label(tenants.len(), "directory", Some("directories")))
    )?;
    write!(output, "{}", tenants_table(&tenants, prefs.tenant_id.as_deref()))?;
    print_with_pager(&output)?;
    Ok(())
}

pub async fn run_subscriptions(base: BaseArgs) -> Result<()> {
    let prefs = config::load_preferences(&config::prefs_path()?);
    let tenant = resolve_tenant(&base, &prefs);
    let session = Session::open(&base, true)?;
    let subscriptions = with_spinner(
        "Loading subscriptions...",
        list_subscriptions(&session, tenant.as_deref()),
    )
    .await?;

    if base.json {
        println!("{}", serde_json::to_string(&subscriptions)?);
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} found in {}\n",
        console::style(count_label(subscriptions.len(), "subscription", None)),
        console::style(tenant.as_deref().unwrap_or("home directory")).bold()
    )?;
    write!(
        output,
        "{}",
        subscriptions_table(&subscriptions, prefs.subscription_id.as_deref())
    )?;
    print_with_pager(&output)?;
    Ok(())
}

pub async fn run_apps(base: BaseArgs, args: AppsArgs) -> Result<()> {
    let prefs = config::load_preferences(&config::prefs_path()?);
    let tenant = resolve_tenant(&base, &prefs);
    let session = Session::open(&base, true)?;

    let subscription = match args.subscription.or_else(|| prefs.subscription_id.clone()) {
        Some(subscription) => subscription,
        None => pick_subscription(&session, tenant.as_deref()).await?,
    };

    let mut apps = with_spinner("Loading Application Insights resources...", async {
        let token = session.arm_token(tenant.as_deref()).await?;
        session
            .arm
            .list_app_insights_components(&subscription, &token)
            .await
    })
    .await?;
    sort_components(&mut apps);

    if base.json {
        println!("{}", serde_json::to_string(&apps)?);
        return Ok(());
    }

    let mut output = String::new();
    writeln!(
        output,
        "{} found in {}\n",
        console::style(count_label(apps.len(), "app", None)),
        console::style(&subscription).bold()
    )?;
    write!(output, "{}", apps_table(&apps, prefs.app_resource_id.as_deref()))?;
    print_with_pager(&output)?;
    Ok(())
}

pub async fn list_subscriptions(
    session: &Session,
    tenant: Option<&str>,
) -> Result<Vec<ArmSubscription>> {
    let token = session.arm_token(tenant).await?;
    session.arm.list_subscriptions(&token).await
}

async fn pick_subscription(session: &Session, tenant: Option<&str>) -> Result<String> {
    let subscriptions =
        with_spinner("Loading subscriptions...", list_subscriptions(session, tenant)).await?;
    if subscriptions.is_empty() {
        bail!("no subscriptions visible in this directory");
    }
    if subscriptions.len() == 1 {
        return Ok(subscriptions[0].subscription_id.clone());
    }
    let labels: Vec<String> = subscriptions
        .iter()
        .map(|s| format!("{} ({})", s.display_name, s.subscription_id))
        .collect();
    let idx = fuzzy_select("Select subscription", &labels, 0)?;
    Ok(subscriptions[idx].subscription_id.clone())
}

fn marker(active: bool) -> &'static str {
    if active {
        "*"
    } else {
        ""
    }
}

fn tenants_table(tenants: &[ArmTenant], active: Option<&str>) -> Table {
    let mut table = styled_table();
    table.set_header(vec![
        header(""),
        header("Name"),
        header("Directory ID"),
        header("Domain"),
        header("Country"),
    ]);
    apply_column_padding(&mut table, (0, 3));
    for tenant in tenants {
        let domain = tenant
            .domains
            .as_ref()
            .and_then(|domains| domains.first())
            .cloned()
            .unwrap_or_else(|| "-".into());
        table.add_row(vec![
            marker(active == Some(tenant.tenant_id.as_str())),
            tenant.display_name.as_deref().unwrap_or("-"),
            tenant.tenant_id.as_str(),
            domain.as_str(),
            tenant.country_code.as_deref().unwrap_or("-"),
        ]);
    }
    table
}

fn subscriptions_table(subscriptions: &[ArmSubscription], active: Option<&str>) -> Table {
    let mut table = styled_table();
    table.set_header(vec![
        header(""),
        header("Name"),
        header("Subscription ID"),
        header("State"),
    ]);
    apply_column_padding(&mut table, (0, 3));
    for subscription in subscriptions {
        table.add_row(vec![
            marker(active == Some(subscription.subscription_id.as_str())),
            truncate(&subscription.display_name, 60).as_str(),
            subscription.subscription_id.as_str(),
            subscription.state.as_deref().unwrap_or("-"),
        ]);
    }
    table
}

fn apps_table(apps: &[AppInsightsComponent], active: Option<&str>) -> Table {
    let mut table = styled_table();
    table.set_header(vec![
        header(""),
        header("Name"),
        header("Resource group"),
        header("Location"),
        header("App ID"),
    ]);
    apply_column_padding(&mut table, (0, 3));
    for app in apps {
        let is_active = active.is_some_and(|id| id.eq_ignore_ascii_case(&app.id));
        table.add_row(vec![
            marker(is_active),
            app.name.as_str(),
            app.resource_group.as_deref().unwrap_or("-"),
            app.location.as_deref().unwrap_or("-"),
            app.query_app_id().unwrap_or("-"),
        ]);
    }
    table
}
