//! Dynamic Load Balancing (C7): periodically re-estimates each patch's
//! cost, re-partitions the SFC-ordered patch range across processes, and
//! migrates patches whose owning rank changed (§4.7).

use crate::config::SpeciesConfig;
use crate::decomposition::DomainDecomposition;
use crate::grid::GlobalGrid;
use crate::patch::{Patch, PatchExtent, PatchFaceFlags};
use crate::transport::{Rank, Transport};

/// Per-patch cost weights: `α · n_particles + β · n_cells` (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct CostModel {
    pub alpha: f64,
    pub beta: f64,
}

impl CostModel {
    pub fn cost(&self, patch: &Patch) -> f64 {
        let n_particles: usize = patch.species.iter().map(|s| s.particles.len()).sum();
        let n_cells = patch.fields.rho.len();
        self.alpha * n_particles as f64 + self.beta * n_cells as f64
    }
}

/// Splits the SFC-ordered, cost-weighted patch range into `n_ranks`
/// contiguous groups of as-equal-as-possible total cost, returning the new
/// `patch_count` per rank (the prefix-sum equal-partition of §4.7).
pub fn rebalance_patch_counts(costs_in_sfc_order: &[f64], n_ranks: usize) -> Vec<u64> {
    let total_cost: f64 = costs_in_sfc_order.iter().sum();
    if total_cost <= 0.0 || costs_in_sfc_order.is_empty() {
        let base = costs_in_sfc_order.len() as u64 / n_ranks.max(1) as u64;
        let remainder = costs_in_sfc_order.len() as u64 % n_ranks.max(1) as u64;
        let mut counts = vec![base; n_ranks];
        for c in counts.iter_mut().take(remainder as usize) {
            *c += 1;
        }
        return counts;
    }
    let target = total_cost / n_ranks as f64;
    let mut counts = vec![0u64; n_ranks];
    let mut rank = 0usize;
    let mut accumulated = 0.0;
    for &cost in costs_in_sfc_order {
        if rank < n_ranks - 1 && accumulated >= target * (rank as f64 + 1.0) {
            rank += 1;
        }
        counts[rank] += 1;
        accumulated += cost;
    }
    let assigned: u64 = counts.iter().sum();
    let expected = costs_in_sfc_order.len() as u64;
    if assigned < expected {
        *counts.last_mut().unwrap() += expected - assigned;
    }
    counts
}

/// Migrates patches out of / into this rank to go from `old_decomposition`
/// to `new_decomposition`, returning the patches this rank owns afterward
/// in SFC order. `species_configs` is the simulation-wide species table
/// (identical for every patch), `patch_extent_of`/`face_flags_of` rebuild a
/// patch's owned extent and global-boundary flags from its global index —
/// both already known to the caller from the global grid and patch-grid
/// dimensions, since every patch has the same size. Preserves total
/// particle count across the whole process group (the conservation
/// invariant of §4.7): every patch that leaves one rank arrives,
/// unmodified, on exactly one other rank.
pub fn migrate(
    mut owned: Vec<Patch>,
    old_decomposition: &DomainDecomposition,
    new_decomposition: &DomainDecomposition,
    grid: &GlobalGrid,
    species_configs: &[SpeciesConfig],
    transport: &dyn Transport,
    patch_extent_of: impl Fn(u64) -> PatchExtent,
    face_flags_of: impl Fn(u64) -> PatchFaceFlags,
) -> Vec<Patch> {
    let my_rank = transport.rank();
    let my_new_range = new_decomposition.local_range(my_rank.0);

    let mut keep = Vec::new();
    for patch in owned.drain(..) {
        if my_new_range.contains(&patch.global_index) {
            keep.push(patch);
        } else {
            let destination = new_decomposition.rank_of(patch.global_index);
            send_patch(transport, Rank(destination), patch);
        }
    }

    transport.barrier();

    let already_owned: std::collections::HashSet<u64> = keep.iter().map(|p| p.global_index).collect();
    for global_index in my_new_range.clone() {
        if already_owned.contains(&global_index) {
            continue;
        }
        let source_rank = Rank(old_decomposition.rank_of(global_index));
        let patch = recv_patch(
            transport,
            source_rank,
            global_index,
            grid,
            species_configs,
            patch_extent_of(global_index),
            face_flags_of(global_index),
        );
        keep.push(patch);
    }

    keep.sort_unstable_by_key(|p| p.global_index);
    keep
}

fn flatten_fields(patch: &Patch) -> Vec<f64> {
    [
        &patch.fields.ex,
        &patch.fields.ey,
        &patch.fields.ez,
        &patch.fields.bx,
        &patch.fields.by,
        &patch.fields.bz,
        &patch.fields.jx,
        &patch.fields.jy,
        &patch.fields.jz,
        &patch.fields.rho,
    ]
    .into_iter()
    .flat_map(|a| a.iter().copied())
    .collect()
}

/// Per-species particle tag so a receiver's `recv_particles` calls line up
/// with the sender's, independent of message arrival order.
fn particle_tag(global_index: u64, species_index: usize) -> u64 {
    global_index.wrapping_mul(997) + species_index as u64
}

fn field_tag(global_index: u64) -> u64 {
    global_index.wrapping_mul(31) + 1
}

fn send_patch(transport: &dyn Transport, to: Rank, patch: Patch) {
    for (species_index, species) in patch.species.iter().enumerate() {
        let particles = species
            .particles
            .position
            .iter()
            .zip(&species.particles.momentum)
            .zip(&species.particles.weight)
            .zip(&species.particles.id)
            .map(|(((&position, &momentum), &weight), &id)| crate::patch::PackedParticle { position, momentum, weight, id })
            .collect();
        transport.send_particles(to, particle_tag(patch.global_index, species_index), particles);
    }
    transport.send_f64(to, field_tag(patch.global_index), flatten_fields(&patch));
}

fn recv_patch(
    transport: &dyn Transport,
    from: Rank,
    global_index: u64,
    grid: &GlobalGrid,
    species_configs: &[SpeciesConfig],
    extent: PatchExtent,
    face_flags: PatchFaceFlags,
) -> Patch {
    let mut patch = Patch::create(global_index, extent, face_flags, grid, species_configs);
    for species_index in 0..species_configs.len() {
        let particles = transport.recv_particles(from, particle_tag(global_index, species_index));
        let species = &mut patch.species[species_index];
        for p in particles {
            species.particles.push(p.position, p.momentum, p.weight, p.id);
        }
    }
    let flat = transport.recv_f64(from, field_tag(global_index));
    unflatten_fields(&mut patch, &flat);
    patch
}

fn unflatten_fields(patch: &mut Patch, flat: &[f64]) {
    let arrays = [
        &mut patch.fields.ex,
        &mut patch.fields.ey,
        &mut patch.fields.ez,
        &mut patch.fields.bx,
        &mut patch.fields.by,
        &mut patch.fields.bz,
        &mut patch.fields.jx,
        &mut patch.fields.jy,
        &mut patch.fields.jz,
        &mut patch.fields.rho,
    ];
    let mut offset = 0;
    for array in arrays {
        let len = array.len();
        for (dst, &src) in array.iter_mut().zip(&flat[offset..offset + len]) {
            *dst = src;
        }
        offset += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebalance_counts_sum_to_total_patch_count() {
        let costs = vec![1.0; 17];
        let counts = rebalance_patch_counts(&costs, 4);
        assert_eq!(counts.iter().sum::<u64>(), 17);
    }

    #[test]
    fn rebalance_handles_zero_cost_uniformly() {
        let costs = vec![0.0; 10];
        let counts = rebalance_patch_counts(&costs, 3);
        assert_eq!(counts.iter().sum::<u64>(), 10);
    }

    #[test]
    fn rebalance_favors_rank_with_fewer_heavy_patches() {
        let mut costs = vec![1.0; 8];
        costs[0] = 100.0;
        let counts = rebalance_patch_counts(&costs, 2);
        assert_eq!(counts.iter().sum::<u64>(), 8);
        assert!(counts[0] <= counts[1]);
    }
}
