pub mod alarm;
pub mod config;
pub mod error;
pub mod logging;
pub mod session_repository;
pub mod storage;
pub mod time_entry_client;
