// src/infra/mod.rs

pub mod config;
pub mod crypto;
pub mod errors;
pub mod logger;
pub mod paths;
