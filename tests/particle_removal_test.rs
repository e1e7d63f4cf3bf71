use nalgebra::Vector3;

use laserpic::config::{BoundaryTable, ParticleBoundaryKind, Side, SpeciesConfig};
use laserpic::grid::GlobalGrid;
use laserpic::kernels::{BorisPusher, FieldInterpolator, LinearDepositor, LinearInterpolator, ParticlePusher};
use laserpic::patch::{Patch, PatchExtent, PatchFaceFlags};

fn electron_config() -> SpeciesConfig {
    let mut particle_bcs = BoundaryTable::new();
    particle_bcs.set(0, Side::Min, ParticleBoundaryKind::Remove);
    particle_bcs.set(0, Side::Max, ParticleBoundaryKind::Remove);
    SpeciesConfig {
        name: "electron".into(),
        mass: 1.0,
        charge: -1.0,
        boundary_conditions: particle_bcs,
        thermal_velocity: 0.01,
    }
}

fn grid() -> GlobalGrid {
    GlobalGrid {
        n_dim_field: 1,
        cell_length: [1.0, 1.0, 1.0],
        n_space_global: [8, 1, 1],
        ghost_cells: 1,
    }
}

#[test]
fn particle_crossing_global_boundary_is_removed_and_tallied() {
    let grid = grid();
    let species = vec![electron_config()];
    let extent = PatchExtent { lo: [0, 0, 0], hi: [8, 1, 1] };
    let face_flags = PatchFaceFlags::XMIN | PatchFaceFlags::XMAX;
    let mut patch = Patch::create(0, extent, face_flags, &grid, &species);

    patch.species[0].particles.push(Vector3::new(7.9, 0.0, 0.0), Vector3::new(0.5, 0.0, 0.0), 1.0, None);
    assert_eq!(patch.species[0].particles.len(), 1);

    let interpolator = LinearInterpolator;
    let pusher = BorisPusher;
    let depositor = LinearDepositor;
    let leaving = patch.push_and_deposit(0, 0.5, &grid.cell_length, &interpolator, &pusher, &depositor);
    assert_eq!(leaving.len(), 1);

    let mut rng = rand::thread_rng();
    for item in leaving.into_iter().rev() {
        let removed = patch.apply_boundary(item, &grid.cell_length, &mut rng);
        assert!(removed);
        patch.species[item.species_index].particles.swap_remove(item.particle_index);
    }

    assert_eq!(patch.species[0].particles.len(), 0);
    let lost_energy: f64 = patch.species[0].lost.energy.iter().sum();
    assert!(lost_energy > 0.0, "a removed massive particle must carry positive tallied energy");
    let lost_count: u64 = patch.species[0].lost.count.iter().sum();
    assert_eq!(lost_count, 1);
}
