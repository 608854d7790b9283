pub mod bootstrap;
pub mod config;
pub mod db;
pub mod files;
pub mod llm;
pub mod models;
pub mod server;
pub mod signals;
pub mod vectordb;

#[cfg(test)]
mod test_support;

pub use config::Settings;
pub use server::run_server;
