//! # Pipes Sync Library
//!
//! Synchronizes users, clients, projects, tasks, todo lists and time entries
//! between the time-tracking platform and third-party services, per workspace.

pub mod alerting;
pub mod auth;
pub mod authorization;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod integrations;
pub mod locks;
pub mod models;
pub mod oauth;
pub mod pipes;
pub mod platform;
pub mod repositories;
pub mod scheduler;
pub mod server;
pub mod service;
pub mod sync;
pub mod telemetry;
pub use migration;
