//! `graphwarden status`: list worker heartbeats.

use chrono::{Local, Utc};
use console::style;

use graphwarden::status::Monitor;

use super::context::AppContext;

pub async fn cmd_status(ctx: &AppContext, json: bool) -> anyhow::Result<()> {
    let statuses = Monitor::new(ctx.store.clone(), ctx.keys.clone())
        .list()
        .await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    let separator = "─".repeat(90);
    println!();
    println!(
        "{:<60} Last updated: {}",
        style("graphwarden workers").bold(),
        Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    println!("{}", separator);

    if statuses.is_empty() {
        println!("{} No live workers", style("!").yellow());
        return Ok(());
    }

    // Anything older than two heartbeats is about to expire.
    let stale_after = ctx.config.status.heartbeat_secs as i64 * 2;
    for status in &statuses {
        let health = if status.is_stale(stale_after) {
            style("stale").dim().to_string()
        } else if status.is_healthy {
            style("healthy").green().to_string()
        } else {
            style("unhealthy").red().to_string()
        };
        let uptime = (Utc::now() - status.started_at).num_minutes();
        println!(
            "{:<12} {:<8} {:>3}%  {:<10} {}",
            style(status.worker_type.as_str()).bold(),
            &status.worker_id[..8.min(status.worker_id.len())],
            status.progress,
            health,
            status.current_task
        );
        println!(
            "             {} up {}m",
            style(status.host.as_deref().unwrap_or("unknown host")).dim(),
            uptime
        );
    }
    println!("{}", separator);
    println!("{} worker(s)", statuses.len());

    let depths = ctx.queue().depths().await?;
    println!(
        "Queue: {} high, {} normal, {} low",
        depths.high, depths.normal, depths.low
    );
    Ok(())
}
