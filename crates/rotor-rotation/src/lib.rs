//! Provider/model rotation for rotor.
//!
//! This crate owns the catalogue of `(provider, model)` pairs, the single
//! "current model" pointer, and the per-model usage and blacklist records
//! that let transient provider outages heal on their own.
//!
//! ## Modules
//!
//! - [`catalogue`] -- Categories, model and provider descriptors, built-in table.
//! - [`manager`] -- The [`RotationManager`] service (selection, blacklisting, usage).
//! - [`state`] -- Provider state, usage records, and the atomic state file.
//! - [`error`] -- Rotation error types.

pub mod catalogue;
pub mod error;
pub mod manager;
pub mod state;

pub use catalogue::{Catalogue, Category, ModelDescriptor, ProviderConfig};
pub use error::{Result, RotationError};
pub use manager::{ModelStatus, RotationManager};
pub use state::{PersistedState, ProviderState, StateFile, UsageRecord};
