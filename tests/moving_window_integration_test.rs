use nalgebra::Vector3;

use laserpic::config::MovingWindowConfig;
use laserpic::decomposition::{DomainDecomposition, PatchGrid, SpaceFillingCurve};
use laserpic::grid::GlobalGrid;
use laserpic::moving_window::{MovingWindow, NoInjection};
use laserpic::patch::{Patch, PatchExtent, PatchFaceFlags};

fn grid() -> GlobalGrid {
    GlobalGrid {
        n_dim_field: 1,
        cell_length: [1.0, 1.0, 1.0],
        n_space_global: [2, 1, 1],
        ghost_cells: 1,
    }
}

#[test]
fn retiring_a_trailing_patch_preserves_total_patch_count_and_tallies_lost_energy() {
    let grid = grid();
    let patch_grid = PatchGrid { dims: [2, 1, 1], n_dim: 1 };
    let curve = SpaceFillingCurve::new(patch_grid);
    let decomposition = DomainDecomposition::even_split(curve, 1);

    let species = vec![laserpic::config::SpeciesConfig {
        name: "electron".into(),
        mass: 1.0,
        charge: -1.0,
        boundary_conditions: laserpic::config::BoundaryTable::new(),
        thermal_velocity: 0.0,
    }];

    let mut patches = vec![
        Patch::create(0, PatchExtent { lo: [0, 0, 0], hi: [1, 1, 1] }, PatchFaceFlags::XMIN, &grid, &species),
        Patch::create(1, PatchExtent { lo: [1, 0, 0], hi: [2, 1, 1] }, PatchFaceFlags::XMAX, &grid, &species),
    ];
    patches[0].species[0].particles.push(Vector3::new(0.5, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0), 1.0, None);

    let n_before = patches.len();

    let mut window = MovingWindow::new(MovingWindowConfig {
        enabled: true,
        t_start: 0.0,
        period_steps: 1,
    });

    // With a window width of 2 cells and patch 0 occupying [0, 1), its
    // trailing edge falls behind the leading edge once the window has
    // advanced 3 cells (hi=1 <= shift-2 at shift=3).
    window.operate(&mut patches, &grid, &decomposition, &species, &NoInjection);
    window.operate(&mut patches, &grid, &decomposition, &species, &NoInjection);
    let loss = window.operate(&mut patches, &grid, &decomposition, &species, &NoInjection);

    assert_eq!(patches.len(), n_before, "a retired patch is replaced one-for-one by a leading patch");
    assert_eq!(loss.particle_count, 1);
    assert!(loss.energy > 0.0);
    assert_eq!(window.n_moved, 3);
}
