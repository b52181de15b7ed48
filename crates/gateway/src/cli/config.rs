use tl_domain::config::{Config, ConfigSeverity};

/// Validate the config, printing any issues.
///
/// Returns false when errors (not just warnings) are found.
pub fn validate(config: &Config, source: &str) -> bool {
    let issues = config.validate();

    if issues.is_empty() {
        println!("Config OK ({source})");
        return true;
    }

    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();
    let warning_count = issues.len() - error_count;

    for issue in &issues {
        println!("{issue}");
    }

    println!("\n{error_count} error(s), {warning_count} warning(s) in {source}");

    error_count == 0
}

/// Dump the resolved config (with all defaults filled in) as TOML.
pub fn show(config: &Config) -> anyhow::Result<()> {
    let output = toml::to_string_pretty(config)
        .map_err(|e| anyhow::anyhow!("serializing config: {e}"))?;
    print!("{output}");
    Ok(())
}
