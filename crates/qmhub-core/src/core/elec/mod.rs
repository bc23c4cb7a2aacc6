//! # Electrostatics Module
//!
//! Pure functions used by the embedding model.
//!
//! ## Key Components
//!
//! - [`units`] - Internal units (kcal/mol, Angstrom) and conversions from atomic units
//! - [`potentials`] - Point-charge Coulomb energy and gradient kernels
//! - [`switching`] - Distance-based switching functions that scale MM charges near the cutoff

pub mod potentials;
pub mod switching;
pub mod units;
