//! HTTP read API handlers

pub mod articles;
pub mod cache;
pub mod sources;
pub mod tasks;
