//! `graphwarden seed ...`: register crawl starting points.

use console::style;

use super::context::AppContext;

pub async fn cmd_seed_user(ctx: &AppContext, user_ids: &[u64]) -> anyhow::Result<()> {
    let repository = ctx.repository();
    for &user_id in user_ids {
        repository.add_seed_user(user_id).await?;
    }
    println!(
        "{} Added {} seed user(s)",
        style("✓").green(),
        user_ids.len()
    );
    Ok(())
}

pub async fn cmd_seed_group(ctx: &AppContext, group_ids: &[u64]) -> anyhow::Result<()> {
    let repository = ctx.repository();
    for &group_id in group_ids {
        repository.add_candidate_group(group_id).await?;
    }
    println!(
        "{} Added {} candidate group(s)",
        style("✓").green(),
        group_ids.len()
    );
    Ok(())
}
