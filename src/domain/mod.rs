pub mod aggregate;
pub mod merge;
pub mod models;
pub mod time;
