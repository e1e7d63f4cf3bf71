//! Particle Boundary Dispatcher (C2): per-face, per-species policy table
//! applied to particles exiting a patch domain.
//!
//! Each policy is modeled as a tagged variant rather than a function
//! pointer (§9's "Function-pointer dispatch" design note), so `apply` stays
//! a single branch-free match on a value already resolved once per
//! (species, face) at patch-creation time.

use nalgebra::Vector3;
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::config::{ParticleBoundaryKind, Side};

/// What happened to a particle after a boundary policy was applied.
#[derive(Debug, Clone, Copy)]
pub enum BoundaryOutcome {
    /// The particle survives, with its position/momentum updated in place.
    Kept,
    /// The particle is deleted; caller should record the carried energy and
    /// charge into the face accumulators (§4.2).
    Removed { energy: f64, charge: f64 },
}

/// Applies a resolved boundary policy to one particle crossing `axis` at
/// `side`, where `face_coord` is the global coordinate of that face.
///
/// `position`/`momentum` are mutated in place for the policies that keep
/// the particle (`reflective`, `stop`, `thermalize`); `periodic` is a no-op
/// here because it is handled by inter-patch exchange (§4.2), not locally.
#[allow(clippy::too_many_arguments)]
pub fn apply_face_policy<R: Rng>(
    policy: ParticleBoundaryKind,
    axis: usize,
    side: Side,
    face_coord: f64,
    is_photon: bool,
    mass: f64,
    charge: f64,
    weight: f64,
    thermal_velocity: f64,
    position: &mut Vector3<f64>,
    momentum: &mut Vector3<f64>,
    rng: &mut R,
) -> BoundaryOutcome {
    match policy {
        ParticleBoundaryKind::Reflective => {
            position[axis] = 2.0 * face_coord - position[axis];
            momentum[axis] = -momentum[axis];
            BoundaryOutcome::Kept
        }
        ParticleBoundaryKind::Stop => {
            position[axis] = face_coord;
            *momentum = Vector3::zeros();
            BoundaryOutcome::Kept
        }
        ParticleBoundaryKind::Thermalize => {
            position[axis] = face_coord;
            *momentum = sample_maxwell_juttner(mass, thermal_velocity, rng);
            BoundaryOutcome::Kept
        }
        ParticleBoundaryKind::Periodic => BoundaryOutcome::Kept,
        ParticleBoundaryKind::None => BoundaryOutcome::Kept,
        ParticleBoundaryKind::Remove => {
            let energy = if is_photon {
                momentum.norm() * weight
            } else {
                let p2 = momentum.norm_squared();
                let gamma = (1.0 + p2 / (mass * mass)).sqrt();
                mass * (gamma - 1.0) * weight
            };
            BoundaryOutcome::Removed {
                energy,
                charge: charge * weight,
            }
        }
    }
}

/// Samples a momentum from a (non-relativistic-limit) Maxwell-Jüttner
/// distribution approximation: independent Gaussian components with
/// standard deviation `mass * thermal_velocity * c` (c = 1 in code units).
/// Massless species fall back to `thermal_velocity` directly, since there
/// is no rest mass to scale by.
fn sample_maxwell_juttner<R: Rng>(mass: f64, thermal_velocity: f64, rng: &mut R) -> Vector3<f64> {
    let sigma = if mass > 0.0 {
        mass * thermal_velocity
    } else {
        thermal_velocity
    };
    let normal = Normal::new(0.0, sigma.max(1e-300)).expect("finite positive sigma");
    Vector3::new(normal.sample(rng), normal.sample(rng), normal.sample(rng))
}

/// Enforces the "only `remove` at the axisymmetric outer radial face"
/// admissibility rule (§4.2), used by [`Parameters::validate`] and
/// available standalone for patch-creation-time assertions.
///
/// [`Parameters::validate`]: crate::config::Parameters::validate
pub fn radial_policy_is_admissible(side: Side, policy: ParticleBoundaryKind) -> bool {
    match side {
        Side::Max => policy == ParticleBoundaryKind::Remove,
        Side::Min => policy == ParticleBoundaryKind::None,
    }
}
