//! Crypto Module
//!
//! Column-level authenticated encryption:
//! - `frame`: stable storage encoding of one encrypted value
//! - `engine`: AEAD encrypt/decrypt bound to associated data

pub mod engine;
pub mod frame;

pub use engine::{AssociatedData, CipherEngine, KeyMaterial, KEY_LEN};
pub use frame::{Algorithm, CipherFrame};
