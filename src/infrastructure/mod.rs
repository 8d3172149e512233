pub mod config;
pub mod error;
pub mod span_cache;
pub mod span_mapper;
pub mod worklog_client;
