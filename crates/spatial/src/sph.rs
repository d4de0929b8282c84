//! Reference SPH physics callbacks.
//!
//! These are the external collaborators handed to
//! `BodySystem::apply_in_smoothing_length`: a cubic-spline smoothing kernel
//! with compact support `h` and a density / pressure / sound-speed update.
//! The partitioning core never interprets the fields they write.

use std::f64::consts::PI;

use crate::eos::{ideal_gas_pressure, ideal_gas_sound_speed, MONATOMIC_GAMMA};
use crate::particle::Particle;

/// Normalisation of the cubic spline with support radius `h`, per dimension.
fn cubic_spline_norm(dimension: usize) -> f64 {
    match dimension {
        1 => 4.0 / 3.0,
        2 => 40.0 / (7.0 * PI),
        _ => 8.0 / PI,
    }
}

/// Cubic spline (M4) smoothing kernel in `D` dimensions with support `h`.
///
/// ```text
/// q = r / h
/// W = sigma_D / h^D * (1 - 6 q^2 + 6 q^3)   for 0   <= q <= 1/2
/// W = sigma_D / h^D * 2 (1 - q)^3           for 1/2 <  q <= 1
/// W = 0                                     for q > 1
/// ```
pub fn cubic_spline<const D: usize>(r: f64, h: f64) -> f64 {
    if h <= 0.0 {
        return 0.0;
    }
    let q = r / h;
    if q > 1.0 {
        return 0.0;
    }
    let norm = cubic_spline_norm(D) / h.powi(D as i32);
    if q <= 0.5 {
        norm * (1.0 - 6.0 * q * q + 6.0 * q * q * q)
    } else {
        let t = 1.0 - q;
        norm * 2.0 * t * t * t
    }
}

/// SPH density summation over the neighbour set (self included).
///
/// ```text
/// rho_i = sum_j m_j W(|r_i - r_j|, h_i)
/// ```
pub fn density_summation<const D: usize>(particle: &Particle<D>, neighbors: &[&Particle<D>]) -> f64 {
    neighbors
        .iter()
        .map(|n| n.mass * cubic_spline::<D>(particle.distance_sq(n).sqrt(), particle.smoothing_length))
        .sum()
}

/// Update density, ideal-gas pressure and sound speed of `particle`.
pub fn compute_density_pressure_soundspeed<const D: usize>(
    particle: &mut Particle<D>,
    neighbors: &[&Particle<D>],
) {
    particle.density = density_summation(particle, neighbors);
    particle.pressure = ideal_gas_pressure(particle.density, particle.internal_energy, MONATOMIC_GAMMA);
    particle.sound_speed = ideal_gas_sound_speed(particle.pressure, particle.density, MONATOMIC_GAMMA);
}
