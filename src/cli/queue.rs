//! `graphwarden queue ...`: manual queue operations.

use console::style;

use graphwarden::models::{Priority, QueueItem, QueueStatus};

use super::context::AppContext;

pub async fn cmd_queue_add(
    ctx: &AppContext,
    user_id: u64,
    priority: Priority,
    check_exists: bool,
) -> anyhow::Result<()> {
    let queue = ctx.queue();
    let item = QueueItem::new(user_id, priority).with_check_exists(check_exists);
    let position = queue.enqueue(&item).await?;
    println!(
        "{} Queued user {} in {} lane (position {})",
        style("✓").green(),
        user_id,
        priority.as_str(),
        position
    );
    Ok(())
}

pub async fn cmd_queue_abort(ctx: &AppContext, user_id: u64) -> anyhow::Result<()> {
    ctx.queue().abort(user_id).await?;
    println!(
        "{} Abort requested for user {}",
        style("✓").green(),
        user_id
    );
    Ok(())
}

pub async fn cmd_queue_info(ctx: &AppContext, user_id: u64) -> anyhow::Result<()> {
    let queue = ctx.queue();
    let Some(info) = queue.info(user_id).await? else {
        println!("{} No queue record for user {}", style("!").yellow(), user_id);
        return Ok(());
    };

    let status = match info.status {
        QueueStatus::Pending => style(info.status.as_str()).yellow(),
        QueueStatus::Processing => style(info.status.as_str()).cyan(),
        QueueStatus::Complete => style(info.status.as_str()).green(),
        QueueStatus::Skipped => style(info.status.as_str()).dim(),
    };
    println!("User:     {}", info.user_id);
    println!("Status:   {}", status);
    println!("Priority: {}", info.priority.as_str());
    if let Some(position) = info.queue_position {
        println!("Position: {}", position);
    }
    println!(
        "Updated:  {}",
        info.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if queue.is_aborted(user_id).await? {
        println!("{}", style("Abort requested").red());
    }
    Ok(())
}

pub async fn cmd_queue_depth(ctx: &AppContext) -> anyhow::Result<()> {
    let depths = ctx.queue().depths().await?;
    println!("{}", style("Queue depth").bold());
    println!("{}", "-".repeat(24));
    for priority in Priority::ALL {
        println!("{:<10} {:>12}", priority.as_str(), depths.get(priority));
    }
    println!("{:<10} {:>12}", style("total").bold(), depths.total());
    Ok(())
}
