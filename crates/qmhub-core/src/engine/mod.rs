//! # Engine Module
//!
//! Energy evaluation on top of the core models.
//!
//! - [`backends`]: the [`EnergyBackend`](backends::EnergyBackend) interface, QM/MM
//!   adapters and reference backends.
//! - [`composite`]: [`Engine`](composite::Engine), a flat weighted sum of backends.
//! - [`model`]: [`Model`](model::Model), which builds the per-step embedding frame
//!   and projects engine gradients back onto the full system.
//! - [`error`]: the [`QmmmError`](error::QmmmError) taxonomy.
//! - [`progress`]: progress callbacks for long runs.

pub mod backends;
pub mod composite;
pub mod error;
pub mod model;
pub mod progress;
