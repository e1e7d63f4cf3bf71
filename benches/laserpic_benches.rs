use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand::rngs::StdRng;

use laserpic::config::{
    BoundaryTable, EmBoundaryKind, Geometry, MovingWindowConfig, Parameters, ParticleBoundaryKind, Side, SpeciesConfig, TimeSelection,
};
use laserpic::decomposition::{DomainDecomposition, PatchGrid, SpaceFillingCurve};
use laserpic::grid::GlobalGrid;
use laserpic::kernels::{BorisPusher, LinearDepositor, LinearInterpolator, MaxwellSolver, YeeFdtdSolver};
use laserpic::load_balance;
use laserpic::patch::{Patch, PatchFaceFlags};
use laserpic::transport::LocalWorld;
use laserpic::vector_patch::VectorPatch;

fn two_stream_params(n_space_per_patch: u64, n_patches_per_axis: u64) -> Parameters {
    let n_space = n_space_per_patch * n_patches_per_axis;
    let mut em_bcs = BoundaryTable::new();
    let mut particle_bcs = BoundaryTable::new();
    for side in [Side::Min, Side::Max] {
        em_bcs.set(0, side, EmBoundaryKind::Periodic);
        em_bcs.set(1, side, EmBoundaryKind::Periodic);
        particle_bcs.set(0, side, ParticleBoundaryKind::Periodic);
        particle_bcs.set(1, side, ParticleBoundaryKind::Periodic);
    }

    Parameters {
        geometry: Geometry::TwoD3V,
        cell_length: vec![1.0, 1.0],
        n_space_global: vec![n_space, n_space],
        n_space_per_patch: vec![n_space_per_patch, n_space_per_patch],
        timestep: 0.05,
        n_time: 1,
        em_bcs,
        species: vec![SpeciesConfig {
            name: "electron".into(),
            mass: 1.0,
            charge: -1.0,
            boundary_conditions: particle_bcs,
            thermal_velocity: 0.01,
        }],
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

fn build_vector_patch(n_space_per_patch: u64, n_patches_per_axis: u64, particles_per_patch: usize) -> (VectorPatch, LocalWorld) {
    let params = two_stream_params(n_space_per_patch, n_patches_per_axis);
    let grid = GlobalGrid::from_parameters(&params);
    let patch_grid = PatchGrid {
        dims: grid.patch_grid_dims(&params.n_space_per_patch),
        n_dim: grid.n_dim_field,
    };
    let curve = SpaceFillingCurve::new(patch_grid);
    let decomposition = DomainDecomposition::even_split(curve, 1);

    let world = LocalWorld::new_world(1);
    let local = world.into_iter().next().unwrap();
    let rank = local.rank();

    let mut rng = StdRng::seed_from_u64(42);
    let mut patches = Vec::new();
    for global_index in decomposition.local_range(0) {
        let coords = curve.coords(global_index);
        let mut lo = [0i64; 3];
        let mut hi = [1i64; 3];
        for axis in 0..grid.n_dim_field {
            let width = params.n_space_per_patch[axis] as i64;
            lo[axis] = coords[axis] * width;
            hi[axis] = lo[axis] + width;
        }
        let extent = laserpic::patch::PatchExtent { lo, hi };
        let mut patch = Patch::create(global_index, extent, PatchFaceFlags::empty(), &grid, &params.species);

        for species in &mut patch.species {
            for _ in 0..particles_per_patch {
                let x = lo[0] as f64 + rng.gen::<f64>() * (hi[0] - lo[0]) as f64;
                let y = lo[1] as f64 + rng.gen::<f64>() * (hi[1] - lo[1]) as f64;
                let position = Vector3::new(x * params.cell_length[0], y * params.cell_length[1], 0.0);
                let momentum = Vector3::new(rng.gen::<f64>() - 0.5, rng.gen::<f64>() - 0.5, 0.0) * 0.1;
                species.particles.push(position, momentum, 1.0, None);
            }
        }
        patches.push(patch);
    }

    let vector_patch = VectorPatch::new(patches, grid, decomposition, &params, rank);
    (vector_patch, local)
}

fn dynamics_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("dynamics_throughput");
    group.sample_size(20);

    for &particles_per_patch in &[200usize, 2_000, 20_000] {
        group.bench_function(format!("push_and_deposit_{particles_per_patch}"), |b| {
            b.iter_batched(
                || build_vector_patch(16, 4, particles_per_patch),
                |(mut vector_patch, _local)| {
                    let interpolator = LinearInterpolator;
                    let pusher = BorisPusher;
                    let depositor = LinearDepositor;
                    vector_patch.compute_charge();
                    vector_patch.dynamics(0.05, &interpolator, &pusher, &depositor);
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn ghost_exchange_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("ghost_exchange_throughput");
    group.sample_size(20);

    for &n_patches_per_axis in &[2u64, 4, 8] {
        group.bench_function(format!("sync_em_ghosts_{n_patches_per_axis}x{n_patches_per_axis}"), |b| {
            b.iter_batched(
                || build_vector_patch(16, n_patches_per_axis, 0),
                |(mut vector_patch, local)| {
                    vector_patch.finalize_sync_and_bc_fields(&local);
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn solver_advance(c: &mut Criterion) {
    let mut group = c.benchmark_group("solver_advance");
    for &n_space_per_patch in &[16u64, 32, 64] {
        group.bench_function(format!("yee_advance_{n_space_per_patch}"), |b| {
            b.iter_batched(
                || build_vector_patch(n_space_per_patch, 1, 0),
                |(vector_patch, _local)| {
                    let solver = YeeFdtdSolver;
                    let mut patch = vector_patch.patches[0].clone();
                    solver.advance(&mut patch.fields, &vector_patch.grid.cell_length, 0.05, patch.n_dim);
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

fn rebalance_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("rebalance_patch_counts");
    for &n_patches in &[64usize, 512, 4096] {
        let costs: Vec<f64> = (0..n_patches).map(|i| 1.0 + (i % 7) as f64).collect();
        group.bench_function(format!("n_patches_{n_patches}"), |b| {
            b.iter(|| load_balance::rebalance_patch_counts(&costs, 16))
        });
    }
    group.finish();
}

criterion_group!(laserpic_benches, dynamics_throughput, ghost_exchange_throughput, solver_advance, rebalance_cost);
criterion_main!(laserpic_benches);
