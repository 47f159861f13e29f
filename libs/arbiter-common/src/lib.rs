pub mod blob;
pub mod config;
pub mod grade;
pub mod languages;
pub mod queue;
pub mod redis;
pub mod store;
pub mod submission;
pub mod types;
