//! # Workflows Module
//!
//! The public entry points of the library.
//!
//! - [`simulation`]: [`Simulation`](simulation::Simulation), the engine registry
//!   and multiple-time-step driver, with its explicit
//!   [`SimulationState`](simulation::SimulationState).
//! - [`qmmm`]: [`Qmmm`](qmmm::Qmmm), a facade that owns a system, remembers the
//!   model configuration and steps the simulation.

pub mod qmmm;
pub mod simulation;
