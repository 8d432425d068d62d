//! CLI command handlers.

use crate::simulation::{self, SimulationOptions, SimulationReport};
use anyhow::Context;
use canto_engine::EngineConfig;
use std::path::Path;

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

/// Run a simulated session.
pub async fn simulate(
    config_path: Option<&Path>,
    options: SimulationOptions,
    json: bool,
) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let report = simulation::run(config, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    if !report.settled {
        anyhow::bail!("simulation did not settle before the timeout");
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    let stats = &report.stats;
    println!("Simulation finished in {} ms", report.elapsed_ms);
    println!();
    println!("Events");
    println!("  accepted:          {}", stats.bus.events_accepted);
    println!("  dropped:           {}", stats.bus.events_dropped);
    println!("  batches published: {}", stats.bus.batches_published);
    println!("  deliveries:        {}", stats.bus.deliveries);
    println!();
    println!("Fetches");
    println!("  calls:             {}", report.fetch_calls);
    println!("  succeeded:         {}", stats.scheduler.succeeded);
    println!("  retried:           {}", stats.scheduler.retried);
    println!("  exhausted:         {}", stats.scheduler.exhausted);
    println!("  superseded:        {}", stats.scheduler.superseded);
    println!("  skipped:           {}", stats.scheduler.skipped);
    println!("  dropped:           {}", stats.scheduler.dropped);
    println!();
    println!("Level 1");
    println!("  entries:           {}", stats.level1.entries);
    println!("  fresh:             {}", stats.level1.fresh);
    println!("  stale:             {}", stats.level1.stale);
    println!("  error:             {}", stats.level1.error);
    println!();
    println!("Level 2");
    println!("  artifacts:         {}", stats.level2.entries);
    println!("  builds:            {}", stats.level2.builds);
    println!("  repaints:          {}", report.repaints);
}

/// Print the default configuration as YAML.
pub fn show_config() -> anyhow::Result<()> {
    print!("{}", EngineConfig::default().to_yaml()?);
    Ok(())
}

/// Check a configuration file.
pub fn validate_config(path: &Path) -> anyhow::Result<()> {
    let config = load_config(Some(path))?;
    println!("✓ {} is valid", path.display());
    println!("  workers: {}", config.effective_workers());
    println!("  max_attempts: {}", config.max_attempts);
    println!("  notifiers: {}", config.notifiers.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_validate_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "workers: 5\nmax_attempts: 3").unwrap();
        assert!(validate_config(file.path()).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "backoff_jitter: 4.0").unwrap();
        let error = validate_config(file.path()).unwrap_err();
        assert!(format!("{error:#}").contains("backoff_jitter"));
    }
}
