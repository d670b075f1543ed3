// src/lib.rs
// Library interface for ct-sentinel
pub mod cli;
pub mod config;
pub mod ct_log;
pub mod database;
pub mod export;
pub mod leaf_parser;
pub mod matcher;
pub mod types;
pub mod worker;
