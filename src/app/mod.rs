pub mod adb;
pub mod capture;
pub mod commands;
pub mod config;
pub mod error;
pub mod flash;
pub mod history;
pub mod logging;
pub mod models;
pub mod scheduler;
pub mod state;
