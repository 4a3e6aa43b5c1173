use nalgebra::{matrix, Matrix3};

use crate::error::{LaminaError, Result};

/// Calculates the constitutive matrix of an isotropic planar continuum
///
/// The matrix is `E/((1+v)(1-2v)) * [[1-v, v, 0], [v, 1-v, 0], [0, 0, 0.5-v]]`,
/// mapping engineering strain `[exx, eyy, gxy]` to stress `[sxx, syy, txy]`.
///
/// # Arguments
/// * `youngs_modulus` - The modulus of elasticity of the model
/// * `poisson_ratio` - The poisson ratio for the model
///
/// # Returns
/// A symmetric 3x3 stress-strain matrix, or `InvalidMaterial` when the
/// parameters are outside `E > 0`, `-1 < v < 0.5`
pub fn plane_stress_matrix(youngs_modulus: f64, poisson_ratio: f64) -> Result<Matrix3<f64>> {
    if !youngs_modulus.is_finite() || youngs_modulus <= 0.0 {
        return Err(LaminaError::InvalidMaterial(format!(
            "young's modulus must be positive, got {youngs_modulus}"
        )));
    }
    if !poisson_ratio.is_finite() || poisson_ratio <= -1.0 || poisson_ratio >= 0.5 {
        return Err(LaminaError::InvalidMaterial(format!(
            "poisson ratio must lie in (-1, 0.5), got {poisson_ratio}"
        )));
    }

    let nu = poisson_ratio;
    let mut stress_strain_mat: Matrix3<f64> = matrix![
        1.0 - nu, nu, 0.0;
        nu, 1.0 - nu, 0.0;
        0.0, 0.0, 0.5 - nu;
    ];

    stress_strain_mat *= youngs_modulus / ((1.0 + nu) * (1.0 - 2.0 * nu));

    Ok(stress_strain_mat)
}
