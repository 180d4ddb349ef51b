//! Issues access/refresh credential pairs and rotates them on refresh.
//!
//! Every refresh artifact is single-use: the store keeps only a digest of
//! the active one, and a successful refresh replaces it. A refresh from a
//! different network address than the one the artifact was minted for
//! triggers a best-effort alert to the user's contact address.

pub mod auth;
pub mod config;
pub mod gateway;
pub mod notify;
pub mod store;
