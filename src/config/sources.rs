//! Config sources, in precedence order.

pub mod global_file;
pub mod workspace_file;

use config::Environment;

/// `SHADOWHEAL__HEAL__MAX_ATTEMPTS=5` sets `heal.max_attempts`.
pub fn environment() -> Environment {
    Environment::with_prefix(super::ENV_PREFIX)
        .prefix_separator("__")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("sandbox.runner_args")
        .with_list_parse_key("sandbox.runtime_scripts")
}
