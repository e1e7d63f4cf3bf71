//! Simulation Driver (C9): owns the per-rank [`VectorPatch`] and runs the
//! main time-step loop in the order `apply_collisions` → `compute_charge` →
//! `dynamics` → `sum_densities` → `apply_antennas` → (while `t >
//! time_fields_frozen`) `solve_maxwell` over the Cartesian Mirror Domain →
//! `finalize_and_sort_parts` → `finalize_sync_and_bc_fields` →
//! diagnostics → moving window / load balance / checkpoint, matching the
//! orchestration sequence of §4.9.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::info;

use crate::checkpoint;
use crate::config::Parameters;
use crate::decomposition::{DomainDecomposition, PatchGrid, SpaceFillingCurve};
use crate::error::Result;
use crate::grid::GlobalGrid;
use crate::kernels::{AntennaProfile, CurrentDepositor, DiagnosticWriter, FieldInterpolator, MaxwellSolver, ParticlePusher};
use crate::load_balance::{self, CostModel};
use crate::moving_window::{InjectionProfile, MovingWindow};
use crate::patch::{Patch, PatchExtent, PatchFaceFlags};
use crate::profile;
use crate::transport::Transport;
use crate::vector_patch::VectorPatch;

/// Everything the driver needs beyond the orchestrator: the out-of-core
/// kernels (§9 A6) it calls in sequence, plus where to write checkpoints
/// and diagnostics.
pub struct DriverConfig<'a> {
    pub interpolator: &'a (dyn FieldInterpolator + Sync),
    pub pusher: &'a (dyn ParticlePusher + Sync),
    pub depositor: &'a (dyn CurrentDepositor + Sync),
    pub solver: &'a (dyn MaxwellSolver + Sync),
    pub antenna: &'a (dyn AntennaProfile + Sync),
    pub injection: &'a (dyn InjectionProfile + Sync),
    pub diagnostics: &'a mut dyn DiagnosticWriter,
    pub checkpoint_dir: Option<PathBuf>,
    pub cost_model: CostModel,
}

/// The main simulation loop, running `params.n_time` steps on this rank.
pub struct Driver {
    pub params: Parameters,
    pub grid: GlobalGrid,
    pub vector_patch: VectorPatch,
    pub moving_window: MovingWindow,
    pub transport: Arc<dyn Transport>,
    pub exit_asap: Arc<AtomicBool>,
    patch_grid: PatchGrid,
}

impl Driver {
    /// Builds a fresh driver owning every patch in `decomposition.local_range`
    /// for this rank, with no restart.
    pub fn new(params: Parameters, transport: Arc<dyn Transport>) -> Result<Self> {
        params.validate()?;
        let grid = GlobalGrid::from_parameters(&params);
        let patch_grid = PatchGrid {
            dims: grid.patch_grid_dims(&params.n_space_per_patch),
            n_dim: grid.n_dim_field,
        };
        let curve = SpaceFillingCurve::new(patch_grid);
        let decomposition = DomainDecomposition::even_split(curve, transport.world_size().0);

        let rank = transport.rank();
        let mut patches = Vec::new();
        for global_index in decomposition.local_range(rank.0) {
            let extent = Self::patch_extent(&grid, &patch_grid, &params, global_index);
            let face_flags = Self::face_flags(&grid, &patch_grid, global_index);
            patches.push(Patch::create(global_index, extent, face_flags, &grid, &params.species));
        }

        let vector_patch = VectorPatch::new(patches, grid.clone(), decomposition, &params, rank);
        let moving_window = MovingWindow::new(params.moving_window.clone());

        Ok(Self {
            params,
            grid,
            vector_patch,
            moving_window,
            transport,
            exit_asap: Arc::new(AtomicBool::new(false)),
            patch_grid,
        })
    }

    fn patch_extent(grid: &GlobalGrid, patch_grid: &PatchGrid, params: &Parameters, global_index: u64) -> PatchExtent {
        let curve = SpaceFillingCurve::new(*patch_grid);
        let coords = curve.coords(global_index);
        let mut lo = [0i64; 3];
        let mut hi = [1i64; 3];
        for axis in 0..grid.n_dim_field {
            let width = params.n_space_per_patch[axis] as i64;
            lo[axis] = coords[axis] * width;
            hi[axis] = lo[axis] + width;
        }
        PatchExtent { lo, hi }
    }

    fn face_flags(grid: &GlobalGrid, patch_grid: &PatchGrid, global_index: u64) -> PatchFaceFlags {
        let curve = SpaceFillingCurve::new(*patch_grid);
        let coords = curve.coords(global_index);
        let mut flags = PatchFaceFlags::empty();
        let table = [
            (0, crate::config::Side::Min, PatchFaceFlags::XMIN),
            (0, crate::config::Side::Max, PatchFaceFlags::XMAX),
            (1, crate::config::Side::Min, PatchFaceFlags::YMIN),
            (1, crate::config::Side::Max, PatchFaceFlags::YMAX),
            (2, crate::config::Side::Min, PatchFaceFlags::ZMIN),
            (2, crate::config::Side::Max, PatchFaceFlags::ZMAX),
        ];
        for (axis, side, bit) in table {
            if axis >= grid.n_dim_field {
                continue;
            }
            let at_boundary = match side {
                crate::config::Side::Min => coords[axis] == 0,
                crate::config::Side::Max => coords[axis] == patch_grid.dims[axis] - 1,
            };
            if at_boundary {
                flags |= bit;
            }
        }
        flags
    }

    /// Runs the configured number of timesteps, or until `exit_asap` is set
    /// (e.g. by a signal handler the caller installs), whichever comes
    /// first (§4.9).
    pub fn run(&mut self, config: &mut DriverConfig) -> Result<()> {
        let dt = self.params.timestep;
        for step in 0..self.params.n_time {
            if self.exit_asap.load(Ordering::Relaxed) {
                info!("exit_asap set, stopping at step {step}");
                break;
            }
            let t = step as f64 * dt;
            self.step(step, t, dt, config)?;
        }
        Ok(())
    }

    fn step(&mut self, step: u64, t: f64, dt: f64, config: &mut DriverConfig) -> Result<()> {
        profile!("driver::step");
        self.vector_patch.apply_collisions();
        self.vector_patch.compute_charge();
        self.vector_patch.dynamics(dt, config.interpolator, config.pusher, config.depositor);
        self.vector_patch.sum_densities(self.transport.as_ref());
        self.vector_patch.apply_antennas(config.antenna, t, dt);
        self.vector_patch
            .solve_maxwell(self.transport.as_ref(), config.solver, dt, t, self.params.time_fields_frozen);
        self.vector_patch.finalize_and_sort_parts(self.transport.as_ref());
        self.vector_patch.finalize_sync_and_bc_fields(self.transport.as_ref());

        if step == 0 && self.params.solve_poisson {
            self.vector_patch.solve_poisson(50);
        }

        if self.moving_window.should_advance(t, step) {
            self.moving_window.operate(
                &mut self.vector_patch.patches,
                &self.grid,
                &self.vector_patch.decomposition,
                &self.params.species,
                config.injection,
            );
        }

        if self.params.has_load_balancing && self.params.load_balancing_time_selection.is_now(step) {
            self.rebalance(config.cost_model);
        }

        if self.params.checkpoint_time_selection.is_now(step) {
            if let Some(dir) = &config.checkpoint_dir {
                let path = dir.join(format!("checkpoint_{step:010}.bin"));
                checkpoint::dump(&path, &self.params, step, t, self.transport.world_size().0, &self.vector_patch.patches)?;
            }
        }

        self.vector_patch.run_all_diags(config.diagnostics, step, t)?;
        Ok(())
    }

    fn rebalance(&mut self, cost_model: CostModel) {
        let costs: Vec<f64> = self.vector_patch.patches.iter().map(|p| cost_model.cost(p)).collect();
        let world_size = self.transport.world_size().0;
        let new_counts = load_balance::rebalance_patch_counts(&costs, world_size);
        let gathered = self.transport.allgather_u64(new_counts[self.transport.rank().0]);

        let curve = self.vector_patch.decomposition.curve;
        let new_decomposition = DomainDecomposition::from_counts(curve, gathered);
        let old_decomposition = std::mem::replace(&mut self.vector_patch.decomposition, new_decomposition.clone());

        let grid = self.grid.clone();
        let patch_grid = self.patch_grid;
        let params = self.params.clone();
        let patches = std::mem::take(&mut self.vector_patch.patches);
        let migrated = load_balance::migrate(
            patches,
            &old_decomposition,
            &new_decomposition,
            &grid,
            &params.species,
            self.transport.as_ref(),
            |gi| Self::patch_extent(&grid, &patch_grid, &params, gi),
            |gi| Self::face_flags(&grid, &patch_grid, gi),
        );

        self.vector_patch = VectorPatch::new(migrated, grid, new_decomposition, &params, self.transport.rank());
    }
}

/// A handle for installing an external shutdown request (e.g. a signal
/// handler set up by the CLI), threaded into [`Driver::exit_asap`].
pub fn exit_flag(driver: &Driver) -> Arc<AtomicBool> {
    driver.exit_asap.clone()
}
