use std::thread;

use nalgebra::Vector3;

use laserpic::config::{BoundaryTable, SpeciesConfig};
use laserpic::decomposition::{DomainDecomposition, PatchGrid, SpaceFillingCurve};
use laserpic::grid::GlobalGrid;
use laserpic::load_balance::migrate;
use laserpic::patch::{Patch, PatchExtent, PatchFaceFlags};
use laserpic::transport::LocalWorld;

fn grid() -> GlobalGrid {
    GlobalGrid {
        n_dim_field: 1,
        cell_length: [1.0, 1.0, 1.0],
        n_space_global: [4, 1, 1],
        ghost_cells: 1,
    }
}

fn species() -> Vec<SpeciesConfig> {
    vec![SpeciesConfig {
        name: "electron".into(),
        mass: 1.0,
        charge: -1.0,
        boundary_conditions: BoundaryTable::new(),
        thermal_velocity: 0.0,
    }]
}

fn extent_of(global_index: u64) -> PatchExtent {
    PatchExtent {
        lo: [global_index as i64, 0, 0],
        hi: [global_index as i64 + 1, 1, 1],
    }
}

/// Migrating from a lopsided decomposition (all four patches on rank 0) to
/// an even split (two per rank) must neither drop nor duplicate a patch or
/// a particle (§4.7's conservation invariant).
#[test]
fn migration_conserves_patch_and_particle_counts_across_ranks() {
    let grid = grid();
    let species = species();
    let patch_grid = PatchGrid { dims: [4, 1, 1], n_dim: 1 };
    let curve = SpaceFillingCurve::new(patch_grid);

    let old_decomposition = DomainDecomposition::from_counts(curve, vec![4, 0]);
    let new_decomposition = DomainDecomposition::from_counts(curve, vec![2, 2]);

    let mut rank0_patches = Vec::new();
    for global_index in 0..4u64 {
        let mut patch = Patch::create(global_index, extent_of(global_index), PatchFaceFlags::empty(), &grid, &species);
        for i in 0..=global_index {
            patch.species[0].particles.push(Vector3::new(i as f64, 0.0, 0.0), Vector3::zeros(), 1.0, None);
        }
        rank0_patches.push(patch);
    }
    let total_particles_before: usize = rank0_patches.iter().map(|p| p.species[0].particles.len()).sum();

    let world = LocalWorld::new_world(2);
    let mut ranks = world.into_iter();
    let local0 = ranks.next().unwrap();
    let local1 = ranks.next().unwrap();

    let old_for_1 = old_decomposition.clone();
    let new_for_1 = new_decomposition.clone();
    let grid_for_1 = grid.clone();
    let species_for_1 = species.clone();

    let handle1 = thread::spawn(move || {
        migrate(Vec::new(), &old_for_1, &new_for_1, &grid_for_1, &species_for_1, &local1, extent_of, |_| PatchFaceFlags::empty())
    });

    let handle0 = thread::spawn(move || {
        migrate(
            rank0_patches,
            &old_decomposition,
            &new_decomposition,
            &grid,
            &species,
            &local0,
            extent_of,
            |_| PatchFaceFlags::empty(),
        )
    });

    let owned0 = handle0.join().unwrap();
    let owned1 = handle1.join().unwrap();

    assert_eq!(owned0.len(), 2);
    assert_eq!(owned1.len(), 2);

    let mut all_indices: Vec<u64> = owned0.iter().chain(owned1.iter()).map(|p| p.global_index).collect();
    all_indices.sort_unstable();
    assert_eq!(all_indices, vec![0, 1, 2, 3]);

    let total_particles_after: usize = owned0.iter().chain(owned1.iter()).map(|p| p.species[0].particles.len()).sum();
    assert_eq!(total_particles_after, total_particles_before);
}
