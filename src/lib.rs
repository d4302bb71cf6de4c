//! Marketplace authentication service
//!
//! Wallet challenge-response and OAuth ID-token login for the marketplace,
//! issuing stateless session tokens.

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
