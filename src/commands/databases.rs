use crate::commands::CommandContext;
use anyhow::Result;
use dbmt::config::Config;
use dbmt::progress::Reporter;

pub async fn cmd_databases(
    config: Config,
    reporter: Reporter,
    patterns: &[String],
    json: bool,
) -> Result<()> {
    let ctx = CommandContext::new(config, reporter)?;
    let infos = ctx.manager.discover(patterns).await;
    ctx.manager.close_all().await;
    let infos = infos?;

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
    } else {
        ctx.reporter.databases(&infos);
    }
    Ok(())
}
