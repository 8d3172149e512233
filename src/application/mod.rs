pub mod commands;
pub mod editor;
pub mod mutation;
pub mod session;
