//! News Portal - A per-user news feed page
//!
//! This crate serves a news page for authenticated portal users. Each user
//! is subscribed to feeds through their roles, picks one active feed, and
//! the page fetches and shows that feed through a pluggable adapter.

pub mod adapter;
pub mod aggregator;
pub mod bootstrap;
pub mod config;
pub mod context;
pub mod db;
pub mod routes;
pub mod session;
pub mod store;
pub mod toggler;
