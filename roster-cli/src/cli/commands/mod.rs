pub mod assign;
pub mod auth;
pub mod config;
pub mod records;
