//! `laserpic`: a relativistic electromagnetic particle-in-cell engine for
//! laser-plasma interaction, decomposed into patches and distributed across
//! processes along a space-filling curve.
//!
//! The orchestration layer ([`vector_patch`], [`driver`]) is the part this
//! crate owns outright. The field solver, particle pusher, current
//! depositor, QED processes, antenna profiles, and diagnostic sinks are
//! modeled as traits in [`kernels`] with one illustrative reference
//! implementation each — the production-grade numerics behind each of
//! those are an external-collaborator concern (§1 of the originating
//! specification) and out of scope here.

pub mod boundary;
pub mod checkpoint;
pub mod config;
pub mod decomposition;
pub mod driver;
pub mod error;
pub mod grid;
pub mod kernels;
pub mod load_balance;
pub mod mirror_domain;
pub mod moving_window;
pub mod patch;
pub mod profile;
pub mod species;
pub mod transport;
pub mod util;
pub mod vector_patch;

pub use config::Parameters;
pub use driver::{Driver, DriverConfig};
pub use error::{Result, SimulationError};
