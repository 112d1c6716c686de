//! Persistent storage: layout, settings and deployment records

pub mod layout;
pub mod repository;
pub mod settings;
