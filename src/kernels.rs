//! External collaborator contracts (§1, §6, §9 A6): the numeric field
//! solver, the per-particle interpolation/pusher/deposition kernels, QED
//! processes, antenna/laser profiles, and diagnostic writers are explicitly
//! out of scope for this core — the orchestration logic only needs to know
//! their trait shape. Each trait below ships exactly one reference
//! implementation, adequate for exercising the orchestration around it, not
//! claimed to be a physically exhaustive solver.

use nalgebra::Vector3;
use ndarray::Array3;

use crate::error::Result;
use crate::patch::FieldSet;

/// Interpolates `E`/`B` at a particle's position from the surrounding grid
/// nodes (§4.1 `interpolate_fields`).
pub trait FieldInterpolator: Send + Sync {
    fn interpolate(
        &self,
        fields: &FieldSet,
        local_position: Vector3<f64>,
        cell_length: &[f64; 3],
        ghost: usize,
    ) -> (Vector3<f64>, Vector3<f64>);
}

/// Advances a particle's momentum then position for one timestep (§4.1
/// `push`), given the interpolated fields at its pre-push position.
pub trait ParticlePusher: Send + Sync {
    fn push(
        &self,
        position: &mut Vector3<f64>,
        momentum: &mut Vector3<f64>,
        e: Vector3<f64>,
        b: Vector3<f64>,
        charge_over_mass: f64,
        dt: f64,
    );
}

/// Deposits one particle's contribution to `J`/`ρ` for one sub-step of its
/// motion (§4.1 `deposit`), charge-conserving in the sense that the
/// continuity equation holds up to the depositor's discretization order.
pub trait CurrentDepositor: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    fn deposit(
        &self,
        fields: &mut FieldSet,
        old_position: Vector3<f64>,
        new_position: Vector3<f64>,
        weight: f64,
        charge: f64,
        cell_length: &[f64; 3],
        ghost: usize,
    );
}

/// Advances E/B by one timestep on the Cartesian mirror domain (§4.5
/// `solve_maxwell`).
pub trait MaxwellSolver: Send + Sync {
    fn advance(&self, fields: &mut FieldSet, cell_length: &[f64; 3], dt: f64, n_dim: usize);
}

/// A QED process (nonlinear Compton radiation reaction, multiphoton
/// Breit-Wheeler pair production); invoked once per species per patch per
/// step when configured. The reference implementation is a no-op: QED
/// table generation is explicitly out of scope (§1).
pub trait QedProcess: Send + Sync {
    fn apply(&self, momentum: &mut Vector3<f64>, e: Vector3<f64>, b: Vector3<f64>, dt: f64);
}

/// Supplies a source current for an antenna/laser drive at a given time and
/// global position (§4.4 `apply_antennas`).
pub trait AntennaProfile: Send + Sync {
    fn current_at(&self, t: f64, global_position: Vector3<f64>) -> Vector3<f64>;
}

/// Emits one step's worth of diagnostics (§4.4 `run_all_diags`).
pub trait DiagnosticWriter: Send {
    fn write(&mut self, step: u64, t: f64, report: &DiagnosticReport) -> Result<()>;
}

/// Aggregate per-step diagnostic quantities handed to a [`DiagnosticWriter`].
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    pub field_energy: f64,
    pub particle_count_by_species: Vec<(String, u64)>,
    pub lost_energy_by_species: Vec<(String, f64)>,
}

/// Order-1 (cloud-in-cell) trilinear shape function interpolator.
pub struct LinearInterpolator;

impl FieldInterpolator for LinearInterpolator {
    fn interpolate(
        &self,
        fields: &FieldSet,
        local_position: Vector3<f64>,
        cell_length: &[f64; 3],
        ghost: usize,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let sample = |array: &Array3<f64>, stagger_offset: Vector3<f64>| -> f64 {
            let shifted = local_position - stagger_offset.component_mul(&Vector3::new(
                cell_length[0],
                cell_length[1],
                cell_length[2],
            )) * 0.5;
            let fx = shifted.x / cell_length[0] + ghost as f64;
            let fy = shifted.y / cell_length[1].max(f64::MIN_POSITIVE) + ghost as f64;
            let fz = shifted.z / cell_length[2].max(f64::MIN_POSITIVE) + ghost as f64;
            trilinear_sample(array, fx, fy, fz)
        };

        let e = Vector3::new(
            sample(&fields.ex, Vector3::new(1.0, 0.0, 0.0)),
            sample(&fields.ey, Vector3::new(0.0, 1.0, 0.0)),
            sample(&fields.ez, Vector3::new(0.0, 0.0, 1.0)),
        );
        let b = Vector3::new(
            sample(&fields.bx, Vector3::new(0.0, 1.0, 1.0)),
            sample(&fields.by, Vector3::new(1.0, 0.0, 1.0)),
            sample(&fields.bz, Vector3::new(1.0, 1.0, 0.0)),
        );
        (e, b)
    }
}

fn trilinear_sample(array: &Array3<f64>, fx: f64, fy: f64, fz: f64) -> f64 {
    let shape = array.shape();
    let clamp_axis = |f: f64, n: usize| -> (usize, usize, f64) {
        if n <= 1 {
            return (0, 0, 0.0);
        }
        let f = f.clamp(0.0, (n - 1) as f64);
        let i0 = f.floor() as usize;
        let i1 = (i0 + 1).min(n - 1);
        (i0, i1, f - i0 as f64)
    };
    let (ix0, ix1, tx) = clamp_axis(fx, shape[0]);
    let (iy0, iy1, ty) = clamp_axis(fy, shape[1]);
    let (iz0, iz1, tz) = clamp_axis(fz, shape[2]);

    let c000 = array[[ix0, iy0, iz0]];
    let c100 = array[[ix1, iy0, iz0]];
    let c010 = array[[ix0, iy1, iz0]];
    let c110 = array[[ix1, iy1, iz0]];
    let c001 = array[[ix0, iy0, iz1]];
    let c101 = array[[ix1, iy0, iz1]];
    let c011 = array[[ix0, iy1, iz1]];
    let c111 = array[[ix1, iy1, iz1]];

    let c00 = c000 * (1.0 - tx) + c100 * tx;
    let c10 = c010 * (1.0 - tx) + c110 * tx;
    let c01 = c001 * (1.0 - tx) + c101 * tx;
    let c11 = c011 * (1.0 - tx) + c111 * tx;

    let c0 = c00 * (1.0 - ty) + c10 * ty;
    let c1 = c01 * (1.0 - ty) + c11 * ty;

    c0 * (1.0 - tz) + c1 * tz
}

/// The relativistic Boris pusher.
pub struct BorisPusher;

impl ParticlePusher for BorisPusher {
    fn push(
        &self,
        position: &mut Vector3<f64>,
        momentum: &mut Vector3<f64>,
        e: Vector3<f64>,
        b: Vector3<f64>,
        charge_over_mass: f64,
        dt: f64,
    ) {
        let half_qe_dt = 0.5 * charge_over_mass * dt;

        // Half electric-field kick.
        let p_minus = *momentum + e * half_qe_dt;

        // Magnetic rotation (Boris algorithm).
        let gamma_minus = (1.0 + p_minus.norm_squared()).sqrt();
        let t = b * (half_qe_dt / gamma_minus);
        let t_norm2 = t.norm_squared();
        let s = t * (2.0 / (1.0 + t_norm2));
        let p_prime = p_minus + p_minus.cross(&t);
        let p_plus = p_minus + p_prime.cross(&s);

        // Second half electric-field kick.
        let new_momentum = p_plus + e * half_qe_dt;
        *momentum = new_momentum;

        let gamma = (1.0 + new_momentum.norm_squared()).sqrt();
        *position += new_momentum * (dt / gamma);
    }
}

/// A simple charge-splitting ("cloud-in-cell") current depositor: the
/// displacement is linearly apportioned between the cells the particle
/// occupied before and after the sub-step, which conserves total deposited
/// charge exactly but is not the full Esirkepov scheme (that scheme is an
/// external collaborator per §1).
pub struct LinearDepositor;

impl CurrentDepositor for LinearDepositor {
    fn deposit(
        &self,
        fields: &mut FieldSet,
        old_position: Vector3<f64>,
        new_position: Vector3<f64>,
        weight: f64,
        charge: f64,
        cell_length: &[f64; 3],
        ghost: usize,
    ) {
        let q = charge * weight;
        deposit_primal(&mut fields.rho, old_position, cell_length, ghost, q);
        deposit_primal(&mut fields.rho, new_position, cell_length, ghost, 0.0);

        let velocity = new_position - old_position;
        let midpoint = (old_position + new_position) * 0.5;
        deposit_primal(&mut fields.jx, midpoint, cell_length, ghost, q * velocity.x);
        deposit_primal(&mut fields.jy, midpoint, cell_length, ghost, q * velocity.y);
        deposit_primal(&mut fields.jz, midpoint, cell_length, ghost, q * velocity.z);
    }
}

fn deposit_primal(array: &mut Array3<f64>, local_position: Vector3<f64>, cell_length: &[f64; 3], ghost: usize, amount: f64) {
    if amount == 0.0 {
        return;
    }
    let shape = array.shape();
    let axis_fraction = |p: f64, dx: f64, n: usize| -> (usize, usize, f64) {
        if n <= 1 {
            return (0, 0, 0.0);
        }
        let f = (p / dx.max(f64::MIN_POSITIVE) + ghost as f64).clamp(0.0, (n - 1) as f64);
        let i0 = f.floor() as usize;
        let i1 = (i0 + 1).min(n - 1);
        (i0, i1, f - i0 as f64)
    };
    let (ix0, ix1, tx) = axis_fraction(local_position.x, cell_length[0], shape[0]);
    let (iy0, iy1, ty) = axis_fraction(local_position.y, cell_length[1], shape[1]);
    let (iz0, iz1, tz) = axis_fraction(local_position.z, cell_length[2], shape[2]);

    for (ix, wx) in [(ix0, 1.0 - tx), (ix1, tx)] {
        for (iy, wy) in [(iy0, 1.0 - ty), (iy1, ty)] {
            for (iz, wz) in [(iz0, 1.0 - tz), (iz1, tz)] {
                array[[ix, iy, iz]] += amount * wx * wy * wz;
            }
        }
    }
}

/// A basic Yee finite-difference time-domain Maxwell update, active-axis
/// aware so it degenerates correctly for 1D/2D runs.
pub struct YeeFdtdSolver;

impl MaxwellSolver for YeeFdtdSolver {
    fn advance(&self, fields: &mut FieldSet, cell_length: &[f64; 3], dt: f64, n_dim: usize) {
        // B is advanced a half-step by curl(E), then E a full step by
        // curl(B) - J, then B a second half-step, matching the leapfrog
        // structure of the Yee scheme. Only derivatives along active axes
        // (`< n_dim`) contribute.
        advance_b_half(fields, cell_length, dt, n_dim);
        advance_e_full(fields, cell_length, dt, n_dim);
        advance_b_half(fields, cell_length, dt, n_dim);
    }
}

fn curl_component(
    array_a: &Array3<f64>,
    array_b: &Array3<f64>,
    axis_a: usize,
    axis_b: usize,
    i: usize,
    j: usize,
    k: usize,
    cell_length: &[f64; 3],
    n_dim: usize,
    forward: bool,
) -> f64 {
    let idx = [i, j, k];
    let mut da = 0.0;
    if axis_a < n_dim && array_a.shape()[axis_a] > 1 {
        let mut idx_next = idx;
        let mut idx_prev = idx;
        let n = array_a.shape()[axis_a];
        if forward {
            idx_next[axis_a] = (idx[axis_a] + 1).min(n - 1);
            da = (array_a[idx_next] - array_a[idx]) / cell_length[axis_a];
        } else {
            idx_prev[axis_a] = idx[axis_a].saturating_sub(1);
            da = (array_a[idx] - array_a[idx_prev]) / cell_length[axis_a];
        }
    }
    let mut db = 0.0;
    if axis_b < n_dim && array_b.shape()[axis_b] > 1 {
        let mut idx_next = idx;
        let mut idx_prev = idx;
        let n = array_b.shape()[axis_b];
        if forward {
            idx_next[axis_b] = (idx[axis_b] + 1).min(n - 1);
            db = (array_b[idx_next] - array_b[idx]) / cell_length[axis_b];
        } else {
            idx_prev[axis_b] = idx[axis_b].saturating_sub(1);
            db = (array_b[idx] - array_b[idx_prev]) / cell_length[axis_b];
        }
    }
    da - db
}

fn advance_b_half(fields: &mut FieldSet, cell_length: &[f64; 3], dt: f64, n_dim: usize) {
    let half = 0.5 * dt;
    let shape = fields.bx.dim();
    for i in 0..shape.0 {
        for j in 0..shape.1 {
            for k in 0..shape.2 {
                // dBx/dt = -(dEz/dy - dEy/dz)
                let curl = curl_component(&fields.ez, &fields.ey, 1, 2, i, j, k, cell_length, n_dim, false);
                fields.bx[[i, j, k]] -= half * curl;
            }
        }
    }
    let shape = fields.by.dim();
    for i in 0..shape.0 {
        for j in 0..shape.1 {
            for k in 0..shape.2 {
                // dBy/dt = -(dEx/dz - dEz/dx)
                let curl = curl_component(&fields.ex, &fields.ez, 2, 0, i, j, k, cell_length, n_dim, false);
                fields.by[[i, j, k]] -= half * curl;
            }
        }
    }
    let shape = fields.bz.dim();
    for i in 0..shape.0 {
        for j in 0..shape.1 {
            for k in 0..shape.2 {
                // dBz/dt = -(dEy/dx - dEx/dy)
                let curl = curl_component(&fields.ey, &fields.ex, 0, 1, i, j, k, cell_length, n_dim, false);
                fields.bz[[i, j, k]] -= half * curl;
            }
        }
    }
}

fn advance_e_full(fields: &mut FieldSet, cell_length: &[f64; 3], dt: f64, n_dim: usize) {
    let shape = fields.ex.dim();
    for i in 0..shape.0 {
        for j in 0..shape.1 {
            for k in 0..shape.2 {
                // dEx/dt = (dBz/dy - dBy/dz) - Jx
                let curl = curl_component(&fields.bz, &fields.by, 1, 2, i, j, k, cell_length, n_dim, true);
                fields.ex[[i, j, k]] += dt * (curl - fields.jx[[i, j, k]]);
            }
        }
    }
    let shape = fields.ey.dim();
    for i in 0..shape.0 {
        for j in 0..shape.1 {
            for k in 0..shape.2 {
                // dEy/dt = (dBx/dz - dBz/dx) - Jy
                let curl = curl_component(&fields.bx, &fields.bz, 2, 0, i, j, k, cell_length, n_dim, true);
                fields.ey[[i, j, k]] += dt * (curl - fields.jy[[i, j, k]]);
            }
        }
    }
    let shape = fields.ez.dim();
    for i in 0..shape.0 {
        for j in 0..shape.1 {
            for k in 0..shape.2 {
                // dEz/dt = (dBy/dx - dBx/dy) - Jz
                let curl = curl_component(&fields.by, &fields.bx, 0, 1, i, j, k, cell_length, n_dim, true);
                fields.ez[[i, j, k]] += dt * (curl - fields.jz[[i, j, k]]);
            }
        }
    }
}

/// No-op QED process: QED table generation is out of scope (§1).
pub struct NullQed;

impl QedProcess for NullQed {
    fn apply(&self, _momentum: &mut Vector3<f64>, _e: Vector3<f64>, _b: Vector3<f64>, _dt: f64) {}
}

/// No antenna drive.
pub struct NoAntenna;

impl AntennaProfile for NoAntenna {
    fn current_at(&self, _t: f64, _global_position: Vector3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }
}

/// A monochromatic plane-wave antenna source, used by the laser-into-vacuum
/// end-to-end scenario (§8, scenario 2).
pub struct PlaneWaveAntenna {
    pub amplitude: f64,
    pub omega: f64,
    pub axis: usize,
    pub polarization_axis: usize,
}

impl AntennaProfile for PlaneWaveAntenna {
    fn current_at(&self, t: f64, global_position: Vector3<f64>) -> Vector3<f64> {
        let phase = self.omega * (t - global_position[self.axis]);
        let mut j = Vector3::zeros();
        j[self.polarization_axis] = self.amplitude * phase.sin();
        j
    }
}

/// Writes a compact CSV time series of the aggregate diagnostics (§6).
pub struct CsvDiagnosticWriter<W: std::io::Write + Send> {
    sink: W,
    header_written: bool,
}

impl<W: std::io::Write + Send> CsvDiagnosticWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            header_written: false,
        }
    }
}

impl<W: std::io::Write + Send> DiagnosticWriter for CsvDiagnosticWriter<W> {
    fn write(&mut self, step: u64, t: f64, report: &DiagnosticReport) -> Result<()> {
        if !self.header_written {
            writeln!(self.sink, "step,t,field_energy,species,count,lost_energy")?;
            self.header_written = true;
        }
        for (name, count) in &report.particle_count_by_species {
            let lost = report
                .lost_energy_by_species
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, e)| *e)
                .unwrap_or(0.0);
            writeln!(
                self.sink,
                "{step},{t},{},{name},{count},{lost}",
                report.field_energy
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boris_pusher_free_streaming_matches_analytic_drift() {
        let pusher = BorisPusher;
        let mut position = Vector3::zeros();
        let mut momentum = Vector3::new(1.0, 0.0, 0.0);
        let dt = 0.1;
        pusher.push(&mut position, &mut momentum, Vector3::zeros(), Vector3::zeros(), -1.0, dt);
        let gamma = (1.0 + 1.0_f64).sqrt();
        assert!((position.x - dt / gamma).abs() < 1e-12);
        assert_eq!(momentum, Vector3::new(1.0, 0.0, 0.0));
    }
}
