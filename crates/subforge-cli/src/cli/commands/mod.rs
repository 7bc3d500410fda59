//! CLI command handlers, one file per subcommand.

mod add;
mod cancel;
mod cleanup;
mod config;
mod run;
mod status;

pub use add::{run_add, AddArgs};
pub use cancel::run_cancel;
pub use cleanup::run_cleanup;
pub use config::run_config;
pub use run::run_workers;
pub use status::run_status;
