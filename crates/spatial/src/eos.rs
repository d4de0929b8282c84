//! Ideal-gas equation of state used by the reference physics callbacks.

/// Adiabatic index of a monatomic ideal gas.
pub const MONATOMIC_GAMMA: f64 = 5.0 / 3.0;

/// Ideal-gas pressure.
///
/// ```text
/// P = (gamma - 1) * rho * u
/// ```
pub fn ideal_gas_pressure(density: f64, internal_energy: f64, gamma: f64) -> f64 {
    (gamma - 1.0) * density * internal_energy
}

/// Adiabatic sound speed `c = sqrt(gamma * P / rho)`, zero for vacuum.
pub fn ideal_gas_sound_speed(pressure: f64, density: f64, gamma: f64) -> f64 {
    if density <= 0.0 || pressure <= 0.0 {
        return 0.0;
    }
    (gamma * pressure / density).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pressure_proportional_to_density() {
        let p1 = ideal_gas_pressure(1.0, 2.0, MONATOMIC_GAMMA);
        let p2 = ideal_gas_pressure(2.0, 2.0, MONATOMIC_GAMMA);
        assert!((p2 - 2.0 * p1).abs() < 1e-12);
    }

    #[test]
    fn pressure_of_cold_gas_is_zero() {
        assert_eq!(ideal_gas_pressure(3.0, 0.0, MONATOMIC_GAMMA), 0.0);
    }

    #[test]
    fn sound_speed_matches_definition() {
        let rho = 1.5;
        let p = ideal_gas_pressure(rho, 1.0, MONATOMIC_GAMMA);
        let c = ideal_gas_sound_speed(p, rho, MONATOMIC_GAMMA);
        assert!((c * c - MONATOMIC_GAMMA * p / rho).abs() < 1e-12);
        assert_eq!(ideal_gas_sound_speed(p, 0.0, MONATOMIC_GAMMA), 0.0);
    }
}
