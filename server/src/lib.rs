//! Feedgate Server - Authenticated dashboard for a live webhook event feed.
//!
//! This crate provides the server component of Feedgate, responsible for:
//! - Authenticating dashboard operators (session cookies) and scripts (API key)
//! - Receiving webhook events and storing them per user
//! - Streaming events to connected dashboards over WebSocket
//!
//! # Architecture
//!
//! Requests pass through the [`gateway`], which consults the route
//! [`policy`], the [`session`] store, and the [`auth`] credential verifier.
//! Accepted webhook events go to the [`broadcast`] distributor, which hands
//! them to the [`store`] for persistence and fans them out to live
//! subscribers. [`routes`] wires everything into an axum router.

pub mod auth;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod gateway;
pub mod policy;
pub mod routes;
pub mod session;
pub mod store;
pub mod types;
