#[macro_use]
extern crate tracing;

pub mod cluster;
pub mod config;
pub mod context;
pub mod delegation;
pub mod dns;
pub mod dns_check;
pub mod endpoint;
pub mod health;
pub mod metrics;
pub mod reconcile;
pub mod resources;
pub mod services;
pub mod strategy;
pub mod targets;
