use super::units::COULOMB_CONSTANT;
use nalgebra::Vector3;

const MIN_DISTANCE: f64 = 1e-6;

/// Coulomb energy of two point charges at distance `dist`, in kcal/mol.
#[inline]
pub fn coulomb(dist: f64, q1: f64, q2: f64) -> f64 {
    if dist < MIN_DISTANCE {
        return q1.signum() * q2.signum() * 1e10;
    }
    COULOMB_CONSTANT * q1 * q2 / dist
}

/// Gradient of the Coulomb energy with respect to the position of charge `q1`,
/// where `rij = r2 - r1`. The gradient on `q2` is the negative of this.
#[inline]
pub fn coulomb_gradient(rij: &Vector3<f64>, q1: f64, q2: f64) -> Vector3<f64> {
    let dist = rij.norm();
    if dist < MIN_DISTANCE {
        return Vector3::zeros();
    }
    // dE/dr1 = -dE/dd * rij / d, with dE/dd = -k q1 q2 / d²
    rij * (COULOMB_CONSTANT * q1 * q2 / (dist * dist * dist))
}

/// Electrostatic potential of charge `q` at distance `dist`, in kcal/(mol·e).
#[inline]
pub fn potential(dist: f64, q: f64) -> f64 {
    if dist < MIN_DISTANCE {
        return 0.0;
    }
    COULOMB_CONSTANT * q / dist
}

/// Gradient of the potential of a charge `q` at `r_source`, evaluated at the site
/// `r_site`, where `rij = r_site - r_source`.
#[inline]
pub fn potential_gradient(rij: &Vector3<f64>, q: f64) -> Vector3<f64> {
    let dist = rij.norm();
    if dist < MIN_DISTANCE {
        return Vector3::zeros();
    }
    -rij * (COULOMB_CONSTANT * q / (dist * dist * dist))
}
