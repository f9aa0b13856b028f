//! CLI domain: parse, route and output only.
//! Pipeline behavior lives in the library modules; routes wire them together.

mod output;
mod parse;
mod route;

pub use output::{map_error, CommandOutput};
pub use parse::{Cli, Commands, OutputFormat};
pub use route::RunContext;
