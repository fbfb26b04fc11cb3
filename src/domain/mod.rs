pub mod elapsed;
pub mod models;
