//! Moving Window (C6): periodically retires the trailing slab of patches
//! and instantiates a fresh leading slab, so a laser-plasma interaction
//! propagating faster than the window can be simulated without paying for
//! the plasma it has already left behind (§4.6).

use crate::config::{MovingWindowConfig, SpeciesConfig};
use crate::decomposition::DomainDecomposition;
use crate::grid::GlobalGrid;
use crate::patch::{Patch, PatchExtent, PatchFaceFlags};

/// Supplies the injected particle population for a freshly instantiated
/// leading patch (§4.6 "instantiate leading patches via species injection
/// profiles"). The reference implementation injects nothing; a real run
/// would plug in a density profile here, which is an external-collaborator
/// concern (§1) exactly like the field solver and deposition kernels.
pub trait InjectionProfile: Send + Sync {
    fn inject(&self, patch: &mut Patch, species_configs: &[SpeciesConfig]);
}

/// No particles injected into newly uncovered leading patches.
pub struct NoInjection;

impl InjectionProfile for NoInjection {
    fn inject(&self, _patch: &mut Patch, _species_configs: &[SpeciesConfig]) {}
}

/// Tracks how many cells the window has shifted and performs the
/// retire/instantiate step.
#[derive(Debug, Clone)]
pub struct MovingWindow {
    pub config: MovingWindowConfig,
    pub n_moved: u64,
}

/// Particles and charge lost because they were carried off by a retired
/// trailing patch, accounted the same way a `remove` boundary outcome is
/// (§4.2, §4.6).
#[derive(Debug, Clone, Copy, Default)]
pub struct RetirementLoss {
    pub particle_count: u64,
    pub energy: f64,
}

impl MovingWindow {
    pub fn new(config: MovingWindowConfig) -> Self {
        Self { config, n_moved: 0 }
    }

    /// Whether the window should advance at global time `t`, step `step`.
    pub fn should_advance(&self, t: f64, step: u64) -> bool {
        self.config.enabled && t >= self.config.t_start && self.config.period_steps > 0 && step % self.config.period_steps == 0
    }

    /// Retires the patches whose owned extent now lies entirely behind the
    /// window's new leading edge, and instantiates fresh leading patches to
    /// replace them, preserving the total patch count. Species masses are
    /// needed to convert retired particles' momenta into the `RetirementLoss`
    /// energy tally.
    pub fn operate(
        &mut self,
        patches: &mut Vec<Patch>,
        grid: &GlobalGrid,
        decomposition: &DomainDecomposition,
        species_configs: &[SpeciesConfig],
        injection: &dyn InjectionProfile,
    ) -> RetirementLoss {
        self.n_moved += 1;
        let shift = self.n_moved as i64;
        let window_axis = 0;
        let window_width = grid.n_space_global[window_axis];

        let mut loss = RetirementLoss::default();
        let mut retired_indices = Vec::new();
        for (i, patch) in patches.iter().enumerate() {
            if patch.extent.hi[window_axis] <= shift - window_width {
                retired_indices.push(i);
            }
        }

        retired_indices.sort_unstable_by(|a, b| b.cmp(a));
        let mut retired_coords = Vec::with_capacity(retired_indices.len());
        for &i in &retired_indices {
            let retired = patches.remove(i);
            retired_coords.push(decomposition.curve.coords(retired.global_index));
            for species in &retired.species {
                for particle_index in 0..species.particles.len() {
                    loss.particle_count += 1;
                    loss.energy += species.particles.kinetic_energy(particle_index, species.config.mass);
                }
            }
        }

        let columns = decomposition.curve.grid.dims[window_axis];
        for coords in retired_coords {
            let global_index = decomposition.curve.linear_index(patch_coords_after_shift(coords, window_axis, columns));
            let extent = leading_extent(grid, decomposition, shift);
            let mut fresh = Patch::create(global_index, extent, PatchFaceFlags::empty(), grid, species_configs);
            injection.inject(&mut fresh, species_configs);
            patches.push(fresh);
        }

        loss
    }
}

/// Re-keys a retired patch's own space-filling-curve coordinates into the
/// coordinates of the leading patch replacing it: advance one full lap of
/// the patch grid along the window axis, keeping the other axes fixed, so
/// the new global index never collides with one still in use (§4.6).
fn patch_coords_after_shift(original_coords: [crate::grid::GridIndex; 3], axis: usize, columns: crate::grid::GridIndex) -> [crate::grid::GridIndex; 3] {
    let mut coords = original_coords;
    coords[axis] += columns.max(1);
    coords
}

fn leading_extent(grid: &GlobalGrid, decomposition: &DomainDecomposition, shift: i64) -> PatchExtent {
    let per_patch_0 = decomposition.curve.grid.dims[0].max(1);
    let width = grid.n_space_global[0] / per_patch_0.max(1);
    let lo0 = shift;
    PatchExtent {
        lo: [lo0, 0, 0],
        hi: [lo0 + width.max(1), grid.n_space_global[1].max(1), grid.n_space_global[2].max(1)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Geometry, MovingWindowConfig};

    #[test]
    fn should_advance_respects_start_time_and_period() {
        let window = MovingWindow::new(MovingWindowConfig {
            enabled: true,
            t_start: 5.0,
            period_steps: 2,
        });
        assert!(!window.should_advance(4.0, 10));
        assert!(window.should_advance(6.0, 10));
        assert!(!window.should_advance(6.0, 11));
    }

    #[test]
    fn disabled_window_never_advances() {
        let window = MovingWindow::new(MovingWindowConfig {
            enabled: false,
            t_start: 0.0,
            period_steps: 1,
        });
        assert!(!window.should_advance(100.0, 4));
    }

    #[test]
    fn n_moved_increments_each_operate_call() {
        let params_geometry = Geometry::OneD3V;
        let _ = params_geometry;
        let mut window = MovingWindow::new(MovingWindowConfig {
            enabled: true,
            t_start: 0.0,
            period_steps: 1,
        });
        let grid = GlobalGrid {
            n_dim_field: 1,
            cell_length: [1.0, 1.0, 1.0],
            n_space_global: [8, 1, 1],
            ghost_cells: 1,
        };
        let patch_grid = crate::decomposition::PatchGrid { dims: [2, 1, 1], n_dim: 1 };
        let curve = crate::decomposition::SpaceFillingCurve::new(patch_grid);
        let decomposition = DomainDecomposition::even_split(curve, 1);
        let mut patches = vec![];
        window.operate(&mut patches, &grid, &decomposition, &[], &NoInjection);
        assert_eq!(window.n_moved, 1);
        window.operate(&mut patches, &grid, &decomposition, &[], &NoInjection);
        assert_eq!(window.n_moved, 2);
    }
}
