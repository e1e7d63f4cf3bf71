//! Cartesian Mirror Domain (C5): a dense reassembly of a field component
//! across every patch this process owns, used both by `VectorPatch::solve_maxwell`
//! to run the Maxwell solver over one contiguous block per step and by
//! diagnostics wanting a single array rather than a per-patch view (§4.5).
//!
//! A real distributed build also tiles this across ranks and runs a
//! collective gather/solve/scatter around, e.g., a global elliptic solve;
//! here the gather is rank-local (patches this process owns) with an
//! explicit cross-rank `allgather`-based tile exchange for the rare case a
//! diagnostic wants the *whole* global domain, not just this rank's shard.

use ndarray::Array3;

use crate::grid::GlobalGrid;
use crate::patch::Patch;
use crate::transport::Transport;

/// A dense reassembly of one field array across a set of patches, tagged
/// with the global index range it covers.
#[derive(Debug, Clone)]
pub struct CartesianMirrorDomain {
    pub array: Array3<f64>,
    pub origin: [i64; 3],
    pub frozen: bool,
}

impl CartesianMirrorDomain {
    /// Gathers one field component from every patch in `patches` into a
    /// single dense array spanning their combined owned extent
    /// (`patched_to_cartesian`). Patches must tile a rectangular region
    /// with no gaps and no overlap — the invariant the space-filling-curve
    /// decomposition guarantees for a uniform patch grid.
    pub fn patched_to_cartesian(patches: &[Patch], grid: &GlobalGrid, select: impl Fn(&Patch) -> &Array3<f64>, time: f64, time_fields_frozen: f64) -> Self {
        // §4.5: the solve is skipped entirely while `t < time_fields_frozen`.
        let frozen = time < time_fields_frozen;
        if patches.is_empty() {
            return Self {
                array: Array3::zeros((1, 1, 1)),
                origin: [0, 0, 0],
                frozen,
            };
        }
        let n_dim = grid.n_dim_field;
        let mut lo = [i64::MAX; 3];
        let mut hi = [i64::MIN; 3];
        for patch in patches {
            for axis in 0..3 {
                lo[axis] = lo[axis].min(patch.extent.lo[axis]);
                hi[axis] = hi[axis].max(patch.extent.hi[axis]);
            }
        }
        let dims = (
            (hi[0] - lo[0]).max(1) as usize,
            if n_dim > 1 { (hi[1] - lo[1]).max(1) as usize } else { 1 },
            if n_dim > 2 { (hi[2] - lo[2]).max(1) as usize } else { 1 },
        );
        let mut array = Array3::zeros(dims);
        let ghost = grid.ghost_cells as i64;
        for patch in patches {
            let source = select(patch);
            let shape = source.shape();
            for i in 0..patch.extent.n_cells(0).max(1) {
                for j in 0..(if n_dim > 1 { patch.extent.n_cells(1) } else { 1 }).max(1) {
                    for k in 0..(if n_dim > 2 { patch.extent.n_cells(2) } else { 1 }).max(1) {
                        let src_idx = [
                            (i as i64 + ghost).min(shape[0] as i64 - 1) as usize,
                            (j as i64 + ghost).min(shape[1] as i64 - 1) as usize,
                            (k as i64 + ghost).min(shape[2] as i64 - 1) as usize,
                        ];
                        let dst_idx = [
                            (patch.extent.lo[0] - lo[0]) as usize + i,
                            (patch.extent.lo[1] - lo[1]).max(0) as usize + j,
                            (patch.extent.lo[2] - lo[2]).max(0) as usize + k,
                        ];
                        array[dst_idx] = source[src_idx];
                    }
                }
            }
        }
        Self { array, origin: lo, frozen }
    }

    /// Scatters this mirror domain's array back into each patch's owned
    /// cells (`cartesian_to_patches`), the inverse of the gather above.
    /// A no-op when `frozen`, matching the `time_fields_frozen` hold used
    /// around an expensive global solve (§4.5).
    pub fn cartesian_to_patches(&self, patches: &mut [Patch], grid: &GlobalGrid, select_mut: impl Fn(&mut Patch) -> &mut Array3<f64>) {
        if self.frozen {
            return;
        }
        let n_dim = grid.n_dim_field;
        let ghost = grid.ghost_cells as i64;
        for patch in patches.iter_mut() {
            let n0 = patch.extent.n_cells(0).max(1);
            let n1 = if n_dim > 1 { patch.extent.n_cells(1) } else { 1 }.max(1);
            let n2 = if n_dim > 2 { patch.extent.n_cells(2) } else { 1 }.max(1);
            let lo = patch.extent.lo;
            let origin = self.origin;
            let target = select_mut(patch);
            let shape = target.shape();
            let shape = [shape[0], shape[1], shape[2]];
            for i in 0..n0 {
                for j in 0..n1 {
                    for k in 0..n2 {
                        let src_idx = [
                            (lo[0] - origin[0]) as usize + i,
                            (lo[1] - origin[1]).max(0) as usize + j,
                            (lo[2] - origin[2]).max(0) as usize + k,
                        ];
                        if src_idx[0] >= self.array.shape()[0] || src_idx[1] >= self.array.shape()[1] || src_idx[2] >= self.array.shape()[2] {
                            continue;
                        }
                        let dst_idx = [
                            (i as i64 + ghost).min(shape[0] as i64 - 1) as usize,
                            (j as i64 + ghost).min(shape[1] as i64 - 1) as usize,
                            (k as i64 + ghost).min(shape[2] as i64 - 1) as usize,
                        ];
                        target[dst_idx] = self.array[src_idx];
                    }
                }
            }
        }
    }

    /// Ranks whose rectangular tile of the global domain is not contained
    /// in this rank's current patch set but whose data this rank would
    /// need to complete a *global* (not just rank-local) mirror gather —
    /// derived from the decomposition's per-rank patch-count prefix sum so
    /// it stays deterministic across processes without extra messaging
    /// (§9 design note).
    pub fn missing_patches_ranks(owned_global_indices: &[u64], all_global_indices_needed: &[u64], rank_of: impl Fn(u64) -> usize, own_rank: usize) -> Vec<usize> {
        let owned: std::collections::HashSet<_> = owned_global_indices.iter().collect();
        let mut ranks: Vec<usize> = all_global_indices_needed
            .iter()
            .filter(|gi| !owned.contains(gi))
            .map(|&gi| rank_of(gi))
            .filter(|&r| r != own_rank)
            .collect();
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    /// The complement: ranks that need data this rank owns to complete
    /// their own tile.
    pub fn additional_patches_ranks(owned_global_indices: &[u64], requested_by_rank: &[(usize, u64)]) -> Vec<usize> {
        let owned: std::collections::HashSet<_> = owned_global_indices.iter().collect();
        let mut ranks: Vec<usize> = requested_by_rank
            .iter()
            .filter(|(_, gi)| owned.contains(gi))
            .map(|(rank, _)| *rank)
            .collect();
        ranks.sort_unstable();
        ranks.dedup();
        ranks
    }

    /// Blocks on a process-group barrier before/after a phase of the
    /// gather/solve/scatter cycle (§4.5), so ranks never read a
    /// partially-scattered tile.
    pub fn barrier(transport: &dyn Transport) {
        transport.barrier();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Geometry, MovingWindowConfig, Parameters, BoundaryTable, TimeSelection};
    use crate::patch::{PatchExtent, PatchFaceFlags};

    fn params() -> Parameters {
        Parameters {
            geometry: Geometry::TwoD3V,
            cell_length: vec![1.0, 1.0],
            n_space_global: vec![8, 8],
            n_space_per_patch: vec![4, 4],
            timestep: 0.1,
            n_time: 1,
            em_bcs: BoundaryTable::new(),
            species: vec![],
            solve_poisson: false,
            time_fields_frozen: f64::INFINITY,
            has_load_balancing: false,
            load_balancing_time_selection: TimeSelection::Never,
            has_window: false,
            moving_window: MovingWindowConfig::default(),
            global_factor: vec![1, 1],
            checkpoint_time_selection: TimeSelection::Never,
            ghost_cells: 1,
        }
    }

    #[test]
    fn gather_then_scatter_round_trips_values() {
        let p = params();
        let grid = GlobalGrid::from_parameters(&p);
        let mut patch = Patch::create(0, PatchExtent { lo: [0, 0, 0], hi: [4, 4, 1] }, PatchFaceFlags::empty(), &grid, &[]);
        patch.fields.ex.fill(3.5);

        let mirror = CartesianMirrorDomain::patched_to_cartesian(std::slice::from_ref(&patch), &grid, |p| &p.fields.ex, 0.0, f64::INFINITY);
        assert!(mirror.array.iter().all(|&v| v == 3.5));

        patch.fields.ex.fill(0.0);
        let mut patches = vec![patch];
        let unfrozen = CartesianMirrorDomain { frozen: false, ..mirror };
        unfrozen.cartesian_to_patches(&mut patches, &grid, |p| &mut p.fields.ex);
        let ghost = grid.ghost_cells;
        assert_eq!(patches[0].fields.ex[[ghost, ghost, 0]], 3.5);
    }
}
