//! Telewatch kernel : génération de télémétrie simulée, diffusion temps réel
//! vers les observateurs et vue live fusionnée avec le Registry Service.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod generator;
pub mod health;
pub mod http;
pub mod hub;
pub mod kernel;
pub mod models;
pub mod registry;

pub use kernel::Kernel;
