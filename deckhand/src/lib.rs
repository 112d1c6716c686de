//! Deckhand Library
//!
//! Control plane of a self-hosted deployment platform: the deployment lifecycle
//! manager and the Traefik routing reconciler.

pub mod deploy;
pub mod errors;
pub mod exec;
pub mod filesys;
pub mod logs;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod routing;
pub mod storage;
pub mod utils;
