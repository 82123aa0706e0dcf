//! Audit Module
//!
//! Write path ([`AuditRecorder`]) and the decrypting read path
//! ([`AuditReader`]) over shadow tables.

pub mod event;
pub mod reader;
pub mod recorder;

pub use event::{AuditAction, AuditEvent, AuditEventView, EventFilter, FieldView, RowId};
pub use reader::{AuditReader, EventListing};
pub use recorder::AuditRecorder;
