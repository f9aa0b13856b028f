//! Workspace config files under `config/`

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, File, FileFormat};
use std::path::{Path, PathBuf};

const DEFAULT_ENV: &str = "development";

/// Files layered from the workspace, lowest precedence first.
pub fn candidate_files(workspace_root: &Path) -> Vec<PathBuf> {
    let env_name =
        std::env::var(crate::config::ENV_NAME_VAR).unwrap_or_else(|_| DEFAULT_ENV.to_string());
    let config_dir = workspace_root.join("config");
    vec![
        config_dir.join("config.toml"),
        config_dir.join(format!("{}.toml", env_name)),
    ]
}

pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    workspace_root: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Ok(candidate_files(workspace_root)
        .into_iter()
        .filter(|path| path.is_file())
        .fold(builder, |builder, path| {
            builder.add_source(File::from(path).format(FileFormat::Toml).required(false))
        }))
}
