//! The deserialized input-deck parameter record (§6) and its validation.
//!
//! The real system delegates deck parsing to an external scripting host; the
//! core only ever sees a fully populated [`Parameters`] value. This rewrite
//! stands in the external deck language with a plain JSON document carrying
//! the same recognized fields, deserialized with `serde`.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::error::{Result, SimulationError};

/// Which of the four supported geometries a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Geometry {
    #[serde(rename = "1d3v")]
    OneD3V,
    #[serde(rename = "2d3v")]
    TwoD3V,
    #[serde(rename = "3d3v")]
    ThreeD3V,
    #[serde(rename = "3drz")]
    ThreeDRz,
}

impl Geometry {
    /// `nDim_field`: dimensionality of the field grid.
    pub fn n_dim_field(self) -> usize {
        match self {
            Geometry::OneD3V => 1,
            Geometry::TwoD3V => 2,
            Geometry::ThreeD3V => 3,
            Geometry::ThreeDRz => 2,
        }
    }

    /// `nDim_particle`: dimensionality of particle position coordinates.
    pub fn n_dim_particle(self) -> usize {
        match self {
            Geometry::ThreeDRz => 3,
            other => other.n_dim_field(),
        }
    }

    pub fn is_axisymmetric(self) -> bool {
        matches!(self, Geometry::ThreeDRz)
    }
}

/// Which face of the global domain an axis/side pair refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Min,
    Max,
}

/// The electromagnetic-field boundary-condition family on one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmBoundaryKind {
    Periodic,
    /// Stand-in for the solver-specific absorbing families (silver-muller,
    /// PML, ...); the concrete absorbing stencil is an external collaborator
    /// (§1) and is not distinguished further by the core.
    Absorbing,
    Reflective,
}

/// The particle boundary-condition policy on one face (§4.2), exactly the
/// six admissible values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticleBoundaryKind {
    Reflective,
    Remove,
    Stop,
    Thermalize,
    Periodic,
    /// Only admissible at the inner radial face of axisymmetric geometry.
    None,
}

/// Per-axis, per-side table of length `2 * n_dim`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryTable<T> {
    entries: Vec<(usize, Side, T)>,
}

impl<T: Copy> BoundaryTable<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn set(&mut self, axis: usize, side: Side, value: T) {
        if let Some(entry) = self.entries.iter_mut().find(|(a, s, _)| *a == axis && *s == side) {
            entry.2 = value;
        } else {
            self.entries.push((axis, side, value));
        }
    }

    pub fn get(&self, axis: usize, side: Side) -> Option<T> {
        self.entries
            .iter()
            .find(|(a, s, _)| *a == axis && *s == side)
            .map(|(_, _, v)| *v)
    }
}

impl<T: Copy> Default for BoundaryTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Species-level configuration (a subset of the parameter record's
/// `species[*]` table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    /// Zero flags a photon species.
    pub mass: f64,
    pub charge: f64,
    pub boundary_conditions: BoundaryTable<ParticleBoundaryKind>,
    /// Thermal velocity used by the `thermalize` boundary policy's
    /// Maxwell-Jüttner resampling, in units of `c`.
    pub thermal_velocity: f64,
}

impl SpeciesConfig {
    pub fn is_photon(&self) -> bool {
        self.mass == 0.0
    }
}

/// Schedule for periodic events (load balancing, checkpoint dumps): either a
/// fixed interval or an explicit list of trigger steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSelection {
    Every { period: u64 },
    Steps { steps: Vec<u64> },
    Never,
}

impl TimeSelection {
    pub fn is_now(&self, step: u64) -> bool {
        match self {
            TimeSelection::Every { period } => *period > 0 && step % *period == 0,
            TimeSelection::Steps { steps } => steps.contains(&step),
            TimeSelection::Never => false,
        }
    }
}

/// Moving-window configuration (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovingWindowConfig {
    pub enabled: bool,
    pub t_start: f64,
    /// The window advances by one cell every `period_steps` steps.
    pub period_steps: u64,
}

impl Default for MovingWindowConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            t_start: f64::INFINITY,
            period_steps: 1,
        }
    }
}

/// The fully populated parameter record received by the core (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Parameters {
    pub geometry: Geometry,
    pub cell_length: Vec<f64>,
    pub n_space_global: Vec<u64>,
    pub n_space_per_patch: Vec<u64>,
    pub timestep: f64,
    pub n_time: u64,
    pub em_bcs: BoundaryTable<EmBoundaryKind>,
    pub species: Vec<SpeciesConfig>,
    pub solve_poisson: bool,
    pub time_fields_frozen: f64,
    pub has_load_balancing: bool,
    pub load_balancing_time_selection: TimeSelection,
    pub has_window: bool,
    pub moving_window: MovingWindowConfig,
    /// Mirror-domain tile alignment factor, one per field axis.
    pub global_factor: Vec<u64>,
    pub checkpoint_time_selection: TimeSelection,
    pub ghost_cells: usize,
}

impl Parameters {
    /// Validates configuration-time invariants, returning the precise
    /// [`SimulationError::Configuration`] message on failure (§7.1).
    pub fn validate(&self) -> Result<()> {
        let n_dim = self.geometry.n_dim_field();

        if self.cell_length.len() != n_dim || self.n_space_global.len() != n_dim {
            return Err(SimulationError::Configuration(format!(
                "cell_length/n_space_global must have {} entries for geometry {:?}",
                n_dim, self.geometry
            )));
        }
        if self.n_space_per_patch.len() != n_dim {
            return Err(SimulationError::Configuration(
                "n_space_per_patch must have one entry per field axis".into(),
            ));
        }
        for (axis, (&n, &per_patch)) in self
            .n_space_global
            .iter()
            .zip(self.n_space_per_patch.iter())
            .enumerate()
        {
            if per_patch == 0 || n % per_patch != 0 {
                return Err(SimulationError::Configuration(format!(
                    "axis {axis}: n_space_global ({n}) must be an exact multiple of n_space_per_patch ({per_patch})"
                )));
            }
        }
        if self.global_factor.len() != n_dim {
            return Err(SimulationError::Configuration(
                "global_factor must have one entry per field axis".into(),
            ));
        }
        for (axis, &factor) in self.global_factor.iter().enumerate() {
            let n_patches_axis = self.n_space_global[axis] / self.n_space_per_patch[axis];
            if factor == 0 || n_patches_axis % factor != 0 {
                return Err(SimulationError::Configuration(format!(
                    "axis {axis}: global_factor ({factor}) does not divide the patch-grid extent ({n_patches_axis})"
                )));
            }
        }

        for axis in 0..n_dim {
            for side in [Side::Min, Side::Max] {
                let em = self.em_bcs.get(axis, side).ok_or_else(|| {
                    SimulationError::Configuration(format!(
                        "missing EM boundary condition for axis {axis} side {side:?}"
                    ))
                })?;
                for species in &self.species {
                    let particle_bc = species.boundary_conditions.get(axis, side).ok_or_else(|| {
                        SimulationError::Configuration(format!(
                            "species {}: missing boundary condition for axis {axis} side {side:?}",
                            species.name
                        ))
                    })?;

                    if em == EmBoundaryKind::Periodic && particle_bc != ParticleBoundaryKind::Periodic {
                        return Err(SimulationError::Configuration(format!(
                            "species {}: axis {axis} side {side:?} EM boundary is periodic but the particle boundary is not",
                            species.name
                        )));
                    }
                    if em != EmBoundaryKind::Periodic && particle_bc == ParticleBoundaryKind::Periodic {
                        return Err(SimulationError::Configuration(format!(
                            "species {}: axis {axis} side {side:?} particle boundary is periodic but the EM boundary is not",
                            species.name
                        )));
                    }
                }
            }
        }

        if self.geometry.is_axisymmetric() {
            // Axis 1 is taken as the radial axis in 3drz geometry.
            let radial_axis = 1;
            for species in &self.species {
                let outer = species.boundary_conditions.get(radial_axis, Side::Max);
                if outer.is_none() {
                    return Err(SimulationError::Configuration(format!(
                        "species {}: 3drz requires a boundary condition at the outer radial face",
                        species.name
                    )));
                }
                if outer != Some(ParticleBoundaryKind::Remove) {
                    return Err(SimulationError::Configuration(format!(
                        "species {}: only `remove` is admissible at the outer radial face in 3drz geometry, got {:?}",
                        species.name, outer
                    )));
                }
                let inner = species.boundary_conditions.get(radial_axis, Side::Min);
                if inner != Some(ParticleBoundaryKind::None) {
                    return Err(SimulationError::Configuration(format!(
                        "species {}: the inner radial face (r=0) requires the `none` boundary policy, got {:?}",
                        species.name, inner
                    )));
                }
            }
        }

        Ok(())
    }

    /// A digest of the canonicalized parameter record, used by the
    /// checkpoint-restart compatibility check (§4.8, §7.1).
    pub fn digest(&self) -> Result<Digest> {
        let canonical = serde_json::to_string(self)?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Ok(Digest(hasher.finish()))
    }
}

/// Opaque digest of a [`Parameters`] record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest(pub u64);
