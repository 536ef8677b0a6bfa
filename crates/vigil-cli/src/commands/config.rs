/// Configuration display command handler
use anyhow::{Context, Result};
use std::path::Path;
use vigil_core::Config;

use super::helpers::{mask_secret, rule};

/// Copy of `config` safe to print: credentials masked
pub fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    shown.reporter.bearer_token = shown.reporter.bearer_token.as_deref().map(mask_secret);
    shown.reporter.signing_secret = shown.reporter.signing_secret.as_deref().map(mask_secret);
    shown
}

pub fn show_config(path: Option<&Path>) -> Result<()> {
    let config = Config::load(path)?;

    println!("Configuration:");
    println!("{}", rule(14));
    let text = toml::to_string_pretty(&redacted(&config)).context("Failed to render config")?;
    println!("{text}");

    match &config.reporter.base_url {
        Some(url) => println!("Violations are reported to {url}"),
        None => println!("No reporter configured: violations are only logged"),
    }
    Ok(())
}
