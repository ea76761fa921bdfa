pub mod clients;
pub mod config;
pub mod drainer;
pub mod error;
pub mod feed;
pub mod models;
pub mod redriver;
pub mod worker;
