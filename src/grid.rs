//! Grid geometry: global Cartesian extent, cell size, and the primal/dual
//! staggering used by Yee-type field storage.
//!
//! Field arrays are always stored as dense 3-axis [`ndarray::Array3`]
//! blocks, with trailing axes fixed at extent 1 when `nDim_field < 3`. This
//! lets every downstream kernel (interpolation, deposition, ghost exchange,
//! the mirror-domain gather/scatter) be written once, for three axes,
//! instead of branching on dimensionality throughout the hot path. See
//! DESIGN.md for the corresponding Open Question resolution.

use crate::config::Parameters;

/// A grid cell/node index in global coordinates. May be negative: the
/// moving window shifts the active domain without renumbering cells, so
/// trailing, already-retired cells carry indices below zero relative to the
/// window's current origin.
pub type GridIndex = i64;

/// Global Cartesian grid geometry, shared read-only by every patch.
#[derive(Debug, Clone)]
pub struct GlobalGrid {
    pub n_dim_field: usize,
    /// Cell size per axis; axes beyond `n_dim_field` are unused (fixed 1.0).
    pub cell_length: [f64; 3],
    /// Global cell count per axis; axes beyond `n_dim_field` are fixed 1.
    pub n_space_global: [GridIndex; 3],
    /// Ghost layer thickness, uniform across axes and fields.
    pub ghost_cells: usize,
}

impl GlobalGrid {
    pub fn from_parameters(params: &Parameters) -> Self {
        let n_dim = params.geometry.n_dim_field();
        let mut cell_length = [1.0; 3];
        let mut n_space_global = [1; 3];
        for axis in 0..n_dim {
            cell_length[axis] = params.cell_length[axis];
            n_space_global[axis] = params.n_space_global[axis] as GridIndex;
        }
        Self {
            n_dim_field: n_dim,
            cell_length,
            n_space_global,
            ghost_cells: params.ghost_cells,
        }
    }

    pub fn cell_volume(&self) -> f64 {
        self.cell_length[..self.n_dim_field].iter().product()
    }

    /// Number of patches per axis given `n_space_per_patch`.
    pub fn patch_grid_dims(&self, n_space_per_patch: &[u64]) -> [GridIndex; 3] {
        let mut dims = [1; 3];
        for axis in 0..self.n_dim_field {
            dims[axis] = self.n_space_global[axis] / n_space_per_patch[axis] as GridIndex;
        }
        dims
    }

    /// Whether `axis` is an active (simulated) axis.
    pub fn axis_active(&self, axis: usize) -> bool {
        axis < self.n_dim_field
    }
}

/// Which nodal set (Yee staggering) a field component lives on, per axis:
/// primal nodes sit at cell boundaries, dual nodes are offset by `Δ/2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stagger {
    Primal,
    Dual,
}

/// The per-axis staggering of a field's three components, following Yee's
/// scheme: `E` components are dual along their own axis and primal along
/// the others; `B` components are primal along their own axis and dual
/// along the others; `J` and `ρ` live fully on the primal grid.
pub fn yee_stagger(field: FieldKind, component_axis: usize) -> [Stagger; 3] {
    let mut stagger = [Stagger::Primal; 3];
    match field {
        FieldKind::E => stagger[component_axis] = Stagger::Dual,
        FieldKind::B => {
            for axis in 0..3 {
                if axis != component_axis {
                    stagger[axis] = Stagger::Dual;
                }
            }
        }
        FieldKind::J | FieldKind::Rho => {}
    }
    stagger
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    E,
    B,
    J,
    Rho,
}
