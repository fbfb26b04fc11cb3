pub mod active_timer;
pub mod bootstrap;
pub mod commands;
pub mod console;
pub mod notices;
pub mod orchestrator;
pub mod reconcile;
pub mod regular_timer;
pub mod session_store;
pub mod tick_driver;
