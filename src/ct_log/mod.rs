// src/ct_log/mod.rs
pub mod client;
pub mod types;

pub use client::{HttpLogClient, LogClient};
pub use types::{RawEntry, SignedTreeHead};
