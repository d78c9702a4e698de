pub mod config;
pub mod error;
pub mod judge;
pub mod language;
pub mod models;
pub mod queue;
pub mod sandbox;
pub mod scoring;
pub mod store;
pub mod verdict;
pub mod worker;
