//! Secure persistence for FleetMind.
//!
//! Two concerns live here:
//!
//! - [`CredentialStore`] — fleet API secrets, encrypted at rest with
//!   AES-256-GCM under a PBKDF2-derived key, in a per-user directory
//!   with restrictive permissions
//! - [`backup`] — timestamped config backups with bounded retention

pub mod backup;
pub mod credentials;
pub mod crypto;

pub use credentials::CredentialStore;
pub use crypto::CredentialCipher;
