pub mod commands;
pub mod context;
pub mod error;
pub mod package;
pub mod release;
pub mod resolve;
pub mod runtime;
pub mod wrapper;
