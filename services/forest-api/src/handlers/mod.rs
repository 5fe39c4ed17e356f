//! HTTP request handlers.

pub mod analysis;
pub mod common;
pub mod download;
pub mod health;
pub mod tile;
