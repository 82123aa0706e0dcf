//! Audit Mirror
//!
//! Shadow-table auditing for PostgreSQL. Every attached table gets an
//! `aud_<table>` companion holding one row per captured write; sensitive
//! columns are sealed with an AEAD cipher before they reach the database
//! and decrypted field by field when the trail is viewed.

pub mod audit;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod mirror;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod store;
