pub mod config;
pub mod connection_manager;
pub mod notices;
pub mod page;
pub mod query_runner;
pub mod schema_lister;

#[cfg(test)]
mod testing;
