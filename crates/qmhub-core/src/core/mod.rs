//! # Core Module
//!
//! Fundamental building blocks for QM/MM coupling: the atom containers and the
//! periodic system, plus the electrostatic primitives used by the embedding model.
//!
//! ## Architecture
//!
//! - **Molecular Representation** ([`models`]) - Atoms, elements, regions and the periodic system
//! - **Electrostatics** ([`elec`]) - Unit constants, Coulomb kernels and switching functions
//!
//! Nothing in this module calls an external backend; every operation is a pure
//! function of its inputs.

pub mod elec;
pub mod models;
