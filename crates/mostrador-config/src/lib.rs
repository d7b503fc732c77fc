// SPDX-FileCopyrightText: 2026 Mostrador Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Mostrador control-plane.
//!
//! TOML files merged over compiled defaults, `MOSTRADOR_` environment
//! overrides, strict unknown-key rejection and miette diagnostics with typo
//! suggestions.
//!
//! ```no_run
//! use mostrador_config::load_and_validate;
//!
//! let config = load_and_validate().expect("config errors");
//! println!("listening on {}:{}", config.gateway.host, config.gateway.port);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::{Path, PathBuf};

pub use diagnostic::{render_errors, ConfigError};
pub use loader::{load_config, load_config_from_path, load_config_from_str};
pub use model::MostradorConfig;

/// Validate a successful load, or turn the figment error into diagnostics
/// pointing into `sources` (file name, content) lazily read on failure.
fn checked(
    loaded: Result<MostradorConfig, figment::Error>,
    sources: impl FnOnce() -> Vec<(String, String)>,
) -> Result<MostradorConfig, Vec<ConfigError>> {
    let config = loaded.map_err(|err| diagnostic::figment_to_config_errors(err, &sources()))?;
    validation::validate_config(&config)?;
    Ok(config)
}

/// Load from the standard hierarchy and validate.
pub fn load_and_validate() -> Result<MostradorConfig, Vec<ConfigError>> {
    checked(loader::load_config(), search_path_sources)
}

/// Load one explicit file (plus env overrides) and validate.
pub fn load_and_validate_path(path: &Path) -> Result<MostradorConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_path(path), || {
        read_sources([path.to_path_buf()])
    })
}

/// Load a TOML string over the defaults and validate.
pub fn load_and_validate_str(toml_content: &str) -> Result<MostradorConfig, Vec<ConfigError>> {
    checked(loader::load_config_from_str(toml_content), || {
        vec![("<inline>".to_string(), toml_content.to_string())]
    })
}

fn read_sources(paths: impl IntoIterator<Item = PathBuf>) -> Vec<(String, String)> {
    paths
        .into_iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            Some((path.display().to_string(), content))
        })
        .collect()
}

/// The files `load_config` merges, as figment names them.
fn search_path_sources() -> Vec<(String, String)> {
    let local = std::env::current_dir()
        .map(|dir| dir.join("mostrador.toml"))
        .unwrap_or_else(|_| PathBuf::from("mostrador.toml"));
    let user = dirs::config_dir().map(|dir| dir.join("mostrador/mostrador.toml"));
    read_sources(
        [Some(local), user, Some(PathBuf::from("/etc/mostrador/mostrador.toml"))]
            .into_iter()
            .flatten(),
    )
}
