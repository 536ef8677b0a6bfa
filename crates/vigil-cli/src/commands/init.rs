//! Write a starting config file

use anyhow::{bail, Result};
use std::path::Path;
use vigil_core::config::default_config_path;
use vigil_core::Config;

use super::helpers::rule;

/// Write the default configuration to `path` (or the user config directory)
///
/// # Errors
///
/// Returns an error if the file exists and `force` is not set, or if writing fails
pub fn init_command(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    println!("Initializing Vigil...\n");

    if path.exists() && !force {
        bail!(
            "Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }

    let config = Config::default();
    config.save(&path)?;
    log::debug!("Wrote default config to {}", path.display());

    println!("Config written to: {}", path.display());
    println!("\n{}", rule(40));
    println!("  Setup Complete!");
    println!("{}", rule(40));
    println!("\nSet [reporter] base_url to deliver violations to your backend.");
    println!("Until then violations are only logged. Check with: vigil notify-test");

    Ok(())
}
