//! # QMHub Core Library
//!
//! A library for coupling quantum-mechanical (QM) and molecular-mechanics (MM) energy
//! engines into a single QM/MM potential, with switched electrostatic embedding,
//! periodic minimum-image handling and multiple-time-step (RESPA) driving.
//!
//! ## Architectural Philosophy
//!
//! The library follows a three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Atoms`, `System`), unit
//!   constants, Coulomb kernels and switching functions.
//!
//! - **[`engine`]: The Coupling Core.** Backend interfaces and adapters, weighted
//!   `Engine` composition, the `Model` that builds the embedding frame for each
//!   evaluation, and the shared error taxonomy.
//!
//! - **[`workflows`]: The Public API.** The `Simulation` driver, which schedules engine
//!   calls across RESPA groups with an explicit `SimulationState`, and the `Qmmm`
//!   facade that ties a system, a model and a simulation together.

pub mod core;
pub mod engine;
pub mod workflows;
