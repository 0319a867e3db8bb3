pub mod config;
pub mod logging;
pub mod paths;
pub mod task_config;
pub mod test_helpers;
