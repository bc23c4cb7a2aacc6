//! # Core Models Module
//!
//! Data structures describing the atoms of a QM/MM calculation and the periodic
//! system that owns them.
//!
//! ## Key Components
//!
//! - [`element`] - Periodic-table symbols with atomic numbers
//! - [`atoms`] - Index-aligned container of positions, charges and elements
//! - [`system`] - The full atom set, region tags, periodic cell and QM charge state
//! - [`error`] - Validation errors for atom and system construction
//!
//! ## Usage
//!
//! ```ignore
//! use qmhub::core::models::system::{Region, SystemBuilder};
//!
//! let system = SystemBuilder::new()
//!     .atom(Point3::origin(), 0.0, Element::O, Region::Qm)
//!     .atom(Point3::new(3.0, 0.0, 0.0), -0.8, Element::O, Region::Mm)
//!     .qm_charge(0, 1)
//!     .build()?;
//! ```

pub mod atoms;
pub mod element;
pub mod error;
pub mod system;
