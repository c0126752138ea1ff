pub mod error;
pub mod executor;
pub mod job_manager;
pub mod parser;
mod readline;
mod shell;
pub mod signals;

pub use shell::Shell;
