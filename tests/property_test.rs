//! Property tests for the two invariants §8.1 calls out as naturally
//! expressed as "for all generated inputs": boundary-policy idempotence and
//! SFC-partition conservation.

use nalgebra::Vector3;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

use laserpic::boundary::{apply_face_policy, BoundaryOutcome};
use laserpic::config::{ParticleBoundaryKind, Side};
use laserpic::decomposition::{DomainDecomposition, PatchGrid, SpaceFillingCurve};

proptest! {
    /// Applying `reflective` twice to any particle state restores the
    /// original position and momentum (§8's boundary policy idempotence
    /// invariant), for any face coordinate and any starting state.
    #[test]
    fn reflective_twice_is_identity(
        face_coord in -10.0f64..10.0,
        px in -10.0f64..10.0,
        py in -10.0f64..10.0,
        pz in -10.0f64..10.0,
        mx in -5.0f64..5.0,
        my in -5.0f64..5.0,
        mz in -5.0f64..5.0,
    ) {
        let original_position = Vector3::new(px, py, pz);
        let original_momentum = Vector3::new(mx, my, mz);
        let mut position = original_position;
        let mut momentum = original_momentum;
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..2 {
            let outcome = apply_face_policy(
                ParticleBoundaryKind::Reflective,
                0,
                Side::Max,
                face_coord,
                false,
                1.0,
                -1.0,
                1.0,
                0.01,
                &mut position,
                &mut momentum,
                &mut rng,
            );
            prop_assert!(matches!(outcome, BoundaryOutcome::Kept));
        }

        prop_assert!((position - original_position).norm() < 1e-9);
        prop_assert!((momentum - original_momentum).norm() < 1e-9);
    }

    /// A decomposition's cost-weighted prefix-sum partition covers every
    /// patch in the grid exactly once, for any grid shape and rank count
    /// (§8's load-balance conservation invariant, patch-count half).
    #[test]
    fn partition_covers_every_patch_exactly_once(
        dim_x in 1u32..9,
        dim_y in 1u32..9,
        n_ranks in 1usize..6,
    ) {
        let grid = PatchGrid {
            dims: [dim_x as i64, dim_y as i64, 1],
            n_dim: 2,
        };
        let curve = SpaceFillingCurve::new(grid);
        let decomposition = DomainDecomposition::even_split(curve, n_ranks);

        let total_from_counts: u64 = decomposition.patch_count.iter().sum();
        prop_assert_eq!(total_from_counts, grid.total_patches());

        for global_index in 0..total_from_counts {
            let rank = decomposition.rank_of(global_index);
            let range = decomposition.local_range(rank);
            prop_assert!(range.contains(&global_index));
        }
    }
}
