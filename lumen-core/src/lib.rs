//! Lumen core - logging, configuration, events and input shared by every crate.

pub mod cli;
pub mod collections;
pub mod config;
pub mod event;
pub mod input;
pub mod log;
pub mod profile;
