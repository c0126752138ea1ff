pub mod builtins;
#[allow(clippy::module_inception)]
mod executor;
pub mod process;
pub mod variable;

pub use executor::Executor;
