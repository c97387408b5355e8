pub mod bootstrap;
pub mod check_config;
pub mod cli;
pub mod output;
pub mod queue;
pub mod sync;
