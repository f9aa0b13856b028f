//! Merge rules: defaults, override order, conflict handling.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
///
/// Struct-level serde defaults fill anything not listed here; these are the
/// values other layers most often override.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("heal.max_attempts", 3_i64)?
        .set_default("heal.entry_path", "src/App.tsx")?
        .set_default("sandbox.shadow_timeout_ms", 5000_i64)?
        .set_default("sandbox.preview_soft_timeout_ms", 3000_i64)?
        .set_default("store.path", ".shadowheal/store")
}
