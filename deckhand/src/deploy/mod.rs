//! Deployment lifecycle: records, scripts, sources, builds and retention

pub mod build;
pub mod command;
pub mod executor;
pub mod fsm;
pub mod owner;
pub mod retention;
pub mod source;

pub use executor::DeploymentExecutor;
pub use owner::{DatabaseOwner, DeployOwner};
