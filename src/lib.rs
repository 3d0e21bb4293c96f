pub mod config;
pub mod core;
pub mod database;
pub mod logging;
pub mod report;
pub mod services;
