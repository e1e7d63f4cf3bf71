//! Patch (C1): a rectangular sub-grid owning local field slabs and particle
//! containers for all species, with ghost layers for reads across patch
//! boundaries.

use bitflags::bitflags;
use nalgebra::Vector3;
use ndarray::Array3;
use rand::Rng;
use smallvec::SmallVec;

use crate::boundary::{apply_face_policy, BoundaryOutcome};
use crate::config::{ParticleBoundaryKind, Side, SpeciesConfig};
use crate::grid::{GlobalGrid, GridIndex};
use crate::kernels::{CurrentDepositor, FieldInterpolator, ParticlePusher};
use crate::species::{FaceAccumulators, Species};

bitflags! {
    /// Per-face flags denoting whether a patch face lies on the global
    /// simulation boundary (`isXmin`/`isXmax`/...).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PatchFaceFlags: u8 {
        const XMIN = 0b0000_0001;
        const XMAX = 0b0000_0010;
        const YMIN = 0b0000_0100;
        const YMAX = 0b0000_1000;
        const ZMIN = 0b0001_0000;
        const ZMAX = 0b0010_0000;
    }
}

impl PatchFaceFlags {
    pub fn on_boundary(self, axis: usize, side: Side) -> bool {
        let bit = match (axis, side) {
            (0, Side::Min) => Self::XMIN,
            (0, Side::Max) => Self::XMAX,
            (1, Side::Min) => Self::YMIN,
            (1, Side::Max) => Self::YMAX,
            (2, Side::Min) => Self::ZMIN,
            (2, Side::Max) => Self::ZMAX,
            _ => return false,
        };
        self.contains(bit)
    }
}

/// Inclusive-exclusive local grid extent in global cell coordinates:
/// `[lo[axis], hi[axis])` owned cells per axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchExtent {
    pub lo: [GridIndex; 3],
    pub hi: [GridIndex; 3],
}

impl PatchExtent {
    pub fn n_cells(&self, axis: usize) -> usize {
        (self.hi[axis] - self.lo[axis]).max(0) as usize
    }

    /// The global coordinate (in length units) of face `side` on `axis`.
    pub fn face_coordinate(&self, axis: usize, side: Side, cell_length: &[f64; 3]) -> f64 {
        let cell = match side {
            Side::Min => self.lo[axis],
            Side::Max => self.hi[axis],
        };
        cell as f64 * cell_length[axis]
    }
}

/// Dense field storage for one patch: `E`, `B` on staggered Yee locations,
/// `J` and `ρ` on the primal grid, all padded with `ghost` cells per axis.
/// Trailing axes beyond `n_dim_field` are stored with extent 1.
#[derive(Debug, Clone)]
pub struct FieldSet {
    pub ex: Array3<f64>,
    pub ey: Array3<f64>,
    pub ez: Array3<f64>,
    pub bx: Array3<f64>,
    pub by: Array3<f64>,
    pub bz: Array3<f64>,
    pub jx: Array3<f64>,
    pub jy: Array3<f64>,
    pub jz: Array3<f64>,
    pub rho: Array3<f64>,
}

impl FieldSet {
    /// `n_dim` active axes get `n_cells + 2*ghost` extent; axes beyond it
    /// are fixed at extent 1 (no ghost padding, since there is no neighbor
    /// exchange along an unused axis).
    pub fn zeros(extent: &PatchExtent, ghost: usize, n_dim: usize) -> Self {
        let axis_extent = |axis: usize| -> usize {
            if axis < n_dim {
                extent.n_cells(axis) + 2 * ghost
            } else {
                1
            }
        };
        let dim = (axis_extent(0), axis_extent(1), axis_extent(2));
        Self {
            ex: Array3::zeros(dim),
            ey: Array3::zeros(dim),
            ez: Array3::zeros(dim),
            bx: Array3::zeros(dim),
            by: Array3::zeros(dim),
            bz: Array3::zeros(dim),
            jx: Array3::zeros(dim),
            jy: Array3::zeros(dim),
            jz: Array3::zeros(dim),
            rho: Array3::zeros(dim),
        }
    }

    pub fn clear_sources(&mut self) {
        self.jx.fill(0.0);
        self.jy.fill(0.0);
        self.jz.fill(0.0);
        self.rho.fill(0.0);
    }

    /// Total electromagnetic field energy in this patch's owned (non-ghost)
    /// region, `(1/2) Σ (E² + B²) ΔV` in code units.
    pub fn field_energy(&self, cell_volume: f64) -> f64 {
        let sum_sq = |array: &Array3<f64>| array.iter().map(|v| v * v).sum::<f64>();
        0.5 * cell_volume
            * (sum_sq(&self.ex) + sum_sq(&self.ey) + sum_sq(&self.ez) + sum_sq(&self.bx) + sum_sq(&self.by) + sum_sq(&self.bz))
    }
}

/// A particle observed to have left its hosting patch during `push`,
/// queued for boundary dispatch or inter-patch exchange.
#[derive(Debug, Clone, Copy)]
pub struct LeavingParticle {
    pub species_index: usize,
    pub particle_index: usize,
    pub axis: usize,
    pub side: Side,
}

/// A rectangular sub-grid: the unit of parallel work and migration (C1).
#[derive(Debug, Clone)]
pub struct Patch {
    pub global_index: u64,
    pub extent: PatchExtent,
    pub ghost: usize,
    pub n_dim: usize,
    pub fields: FieldSet,
    pub species: Vec<Species>,
    pub face_flags: PatchFaceFlags,
}

impl Patch {
    pub fn create(
        global_index: u64,
        extent: PatchExtent,
        face_flags: PatchFaceFlags,
        grid: &GlobalGrid,
        species_configs: &[SpeciesConfig],
    ) -> Self {
        Self {
            global_index,
            extent,
            ghost: grid.ghost_cells,
            n_dim: grid.n_dim_field,
            fields: FieldSet::zeros(&extent, grid.ghost_cells, grid.n_dim_field),
            species: species_configs.iter().cloned().map(Species::new).collect(),
            face_flags,
        }
    }

    /// Local (patch-relative) coordinate of a global-frame position.
    pub fn to_local(&self, global_position: Vector3<f64>, cell_length: &[f64; 3]) -> Vector3<f64> {
        let mut local = global_position;
        for axis in 0..3 {
            local[axis] -= self.extent.lo[axis] as f64 * cell_length[axis];
        }
        local
    }

    pub fn interpolate_fields(
        &self,
        interpolator: &dyn FieldInterpolator,
        global_position: Vector3<f64>,
        cell_length: &[f64; 3],
    ) -> (Vector3<f64>, Vector3<f64>) {
        let local = self.to_local(global_position, cell_length);
        interpolator.interpolate(&self.fields, local, cell_length, self.ghost)
    }

    /// Advances every particle of every species by `dt` using `pusher`,
    /// depositing current with `depositor` and collecting particles that
    /// left the patch domain. This is the inner loop `dynamics` (C4) calls
    /// once per patch, per species.
    pub fn push_and_deposit(
        &mut self,
        species_index: usize,
        dt: f64,
        cell_length: &[f64; 3],
        interpolator: &dyn FieldInterpolator,
        pusher: &dyn ParticlePusher,
        depositor: &dyn CurrentDepositor,
    ) -> SmallVec<[LeavingParticle; 8]> {
        let mut leaving = SmallVec::new();
        let ghost = self.ghost;
        let n_dim = self.n_dim;
        let extent = self.extent;
        let fields = &mut self.fields;
        let species = &mut self.species[species_index];
        let mass = species.config.mass;
        let charge = species.config.charge;
        let charge_over_mass = if mass != 0.0 { charge / mass } else { charge };

        for i in 0..species.particles.len() {
            let old_position = species.particles.position[i];
            let local_old = {
                let mut local = old_position;
                for axis in 0..3 {
                    local[axis] -= extent.lo[axis] as f64 * cell_length[axis];
                }
                local
            };
            let (e, b) = interpolator.interpolate(fields, local_old, cell_length, ghost);

            let mut position = old_position;
            let mut momentum = species.particles.momentum[i];
            pusher.push(&mut position, &mut momentum, e, b, charge_over_mass, dt);

            let weight = species.particles.weight[i];
            depositor.deposit(fields, old_position, position, weight, charge, cell_length, ghost);

            species.particles.position[i] = position;
            species.particles.momentum[i] = momentum;

            for axis in 0..n_dim {
                let lo = extent.lo[axis] as f64 * cell_length[axis];
                let hi = extent.hi[axis] as f64 * cell_length[axis];
                if position[axis] < lo {
                    leaving.push(LeavingParticle {
                        species_index,
                        particle_index: i,
                        axis,
                        side: Side::Min,
                    });
                } else if position[axis] >= hi {
                    leaving.push(LeavingParticle {
                        species_index,
                        particle_index: i,
                        axis,
                        side: Side::Max,
                    });
                }
            }
        }
        leaving
    }

    /// Applies the Particle Boundary Dispatcher (C2) to a particle that
    /// left this patch across a global-boundary face. Returns `true` if the
    /// particle was removed and should be swap-removed from its container
    /// by the caller.
    pub fn apply_boundary<R: Rng>(
        &mut self,
        leaving: LeavingParticle,
        cell_length: &[f64; 3],
        rng: &mut R,
    ) -> bool {
        if !self.face_flags.on_boundary(leaving.axis, leaving.side) {
            // Not a global boundary: this is an interior face, handled by
            // inter-patch exchange, not a boundary event (§4.2 edge case).
            return false;
        }
        let species = &mut self.species[leaving.species_index];
        let policy = species
            .config
            .boundary_conditions
            .get(leaving.axis, leaving.side)
            .expect("boundary policy validated at setup");
        if policy == ParticleBoundaryKind::Periodic {
            // Periodic is resolved by inter-patch exchange, never locally.
            return false;
        }

        let face_coord = self.extent.face_coordinate(leaving.axis, leaving.side, cell_length);
        let is_photon = species.config.is_photon();
        let mass = species.config.mass;
        let charge = species.config.charge;
        let thermal_velocity = species.config.thermal_velocity;
        let weight = species.particles.weight[leaving.particle_index];
        let mut position = species.particles.position[leaving.particle_index];
        let mut momentum = species.particles.momentum[leaving.particle_index];

        let outcome = apply_face_policy(
            policy,
            leaving.axis,
            leaving.side,
            face_coord,
            is_photon,
            mass,
            charge,
            weight,
            thermal_velocity,
            &mut position,
            &mut momentum,
            rng,
        );

        match outcome {
            BoundaryOutcome::Kept => {
                species.particles.position[leaving.particle_index] = position;
                species.particles.momentum[leaving.particle_index] = momentum;
                false
            }
            BoundaryOutcome::Removed { energy, charge } => {
                let face = FaceAccumulators::face_index(leaving.axis, leaving.side);
                species.lost.count[face] += 1;
                species.lost.charge[face] += charge;
                if is_photon {
                    species.lost.photon_energy[face] += energy;
                } else {
                    species.lost.energy[face] += energy;
                }
                true
            }
        }
    }

    /// Whether `global_position` lies strictly inside this patch's active
    /// (non-ghost) domain, the particle-residency invariant (§3).
    pub fn contains_strictly(&self, global_position: Vector3<f64>, cell_length: &[f64; 3]) -> bool {
        for axis in 0..self.n_dim {
            let lo = self.extent.lo[axis] as f64 * cell_length[axis];
            let hi = self.extent.hi[axis] as f64 * cell_length[axis];
            if !(global_position[axis] > lo && global_position[axis] < hi) {
                return false;
            }
        }
        true
    }

    /// Serializes the particles that should leave this patch via face
    /// `axis`/`side` into a flat buffer, removing them from the container
    /// (swap-remove, so callers must iterate indices in descending order).
    pub fn pack_face(&mut self, species_index: usize, indices: &[usize]) -> Vec<PackedParticle> {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        let species = &mut self.species[species_index];
        let mut out = Vec::with_capacity(sorted.len());
        for &i in &sorted {
            out.push(PackedParticle {
                position: species.particles.position[i],
                momentum: species.particles.momentum[i],
                weight: species.particles.weight[i],
                id: species.particles.id[i],
            });
            species.particles.swap_remove(i);
        }
        out
    }

    pub fn unpack_into(&mut self, species_index: usize, packed: PackedParticle) {
        let species = &mut self.species[species_index];
        species.particles.push(packed.position, packed.momentum, packed.weight, packed.id);
    }

    /// Re-sorts every species' particles by linearized local-cell index, so
    /// particles sharing a cell sit contiguously in memory (C4
    /// `finalize_and_sort_parts`'s cache-locality pass, run after migration).
    pub fn sort_particles_by_cell(&mut self, cell_length: &[f64; 3]) {
        let ghost = self.ghost as i64;
        let extent = self.extent;
        let n_dim = self.n_dim;
        for species in &mut self.species {
            let n = species.particles.len();
            if n < 2 {
                continue;
            }
            let cell_index = |position: Vector3<f64>| -> i64 {
                let mut cell = 0i64;
                let mut stride = 1i64;
                for axis in 0..n_dim {
                    let local = position[axis] - extent.lo[axis] as f64 * cell_length[axis];
                    let idx = (local / cell_length[axis].max(f64::MIN_POSITIVE)).floor() as i64 + ghost;
                    cell += idx * stride;
                    stride *= (extent.n_cells(axis) as i64 + 2 * ghost).max(1);
                }
                cell
            };
            let mut order: Vec<usize> = (0..n).collect();
            order.sort_unstable_by_key(|&i| cell_index(species.particles.position[i]));
            let position: Vec<_> = order.iter().map(|&i| species.particles.position[i]).collect();
            let momentum: Vec<_> = order.iter().map(|&i| species.particles.momentum[i]).collect();
            let weight: Vec<_> = order.iter().map(|&i| species.particles.weight[i]).collect();
            let id: Vec<_> = order.iter().map(|&i| species.particles.id[i]).collect();
            species.particles.position = position;
            species.particles.momentum = momentum;
            species.particles.weight = weight;
            species.particles.id = id;
        }
    }
}

/// A single particle's data in transit between patches/processes (§4.1
/// `pack`/`unpack`).
#[derive(Debug, Clone, Copy)]
pub struct PackedParticle {
    pub position: Vector3<f64>,
    pub momentum: Vector3<f64>,
    pub weight: f64,
    pub id: Option<u64>,
}
