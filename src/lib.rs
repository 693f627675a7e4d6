// src/lib.rs — Library root for counseldesk

pub mod analysis;
pub mod api;
pub mod app;
pub mod auth;
pub mod authz;
pub mod cli;
pub mod db;
pub mod domain;
pub mod infra;
pub mod pipeline;
pub mod provider;
pub mod service;
pub mod speech;
pub mod storage;
