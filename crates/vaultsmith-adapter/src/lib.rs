//! Service bootstrap adapter
//!
//! The only genuinely service-specific logic in the system, expressed as
//! data: each service family declares its credential fields, its
//! certificate file layout, and its environment mapping. `prepare`
//! renders a fetched secret record (and, when TLS is on, a materialized
//! certificate directory) into a validated [`RuntimeConfig`] for an
//! external launcher.

pub mod catalog;
pub mod family;
pub mod files;
pub mod prepare;

pub use catalog::{default_catalog, group_members, ServiceSpec};
pub use family::{CertLayout, ServiceFamily};
pub use files::{materialize_layout, write_atomic, MODE_PRIVATE, MODE_PUBLIC};
pub use prepare::{prepare, AdapterError, RuntimeConfig, TlsSettings};
