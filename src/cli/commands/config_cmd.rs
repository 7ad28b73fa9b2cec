//! Configuration display command.

use console::style;

use slop_scraper::config::Config;

/// Print the effective config as TOML.
pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    let source = config
        .source_path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "defaults (no config file found)".to_string());

    eprintln!("{} Source: {}", style("→").dim(), source);
    println!("{}", config.effective().to_toml()?);
    Ok(())
}
