use nalgebra::Vector3;
use std::{f64::consts::PI, sync::LazyLock};

/// The count of spherical harmonics coefficients
pub const SH_COUNT_MAX: usize = (SH_DEGREE_MAX as usize + 1).pow(2);

/// The maximum degree of spherical harmonics
pub const SH_DEGREE_MAX: u32 = 3;

/// The real coefficients of orthonormalized spherical harmonics from degree 0 to 3
///
/// ## Examples
///
/// ```rust
/// use negsplat_renderer::spherical_harmonics::SH_COEF;
///
/// assert_eq!(SH_COEF.0[0], 0.28209479177387814);
/// assert_eq!(SH_COEF.3[3 + 2], 1.445305721320277);
/// ```
#[allow(clippy::type_complexity)]
pub static SH_COEF: LazyLock<([f64; 1], [f64; 3], [f64; 5], [f64; 7])> =
    LazyLock::new(|| {
        (
            [(1.0 / 4.0 / PI).sqrt()],
            [
                -(3.0 / 4.0 / PI).sqrt(),
                (3.0 / 4.0 / PI).sqrt(),
                -(3.0 / 4.0 / PI).sqrt(),
            ],
            [
                (15.0 / 4.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (5.0 / 16.0 / PI).sqrt(),
                -(15.0 / 4.0 / PI).sqrt(),
                (15.0 / 16.0 / PI).sqrt(),
            ],
            [
                -(35.0 / 32.0 / PI).sqrt(),
                (105.0 / 4.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (7.0 / 16.0 / PI).sqrt(),
                -(21.0 / 32.0 / PI).sqrt(),
                (105.0 / 16.0 / PI).sqrt(),
                -(35.0 / 32.0 / PI).sqrt(),
            ],
        )
    });

/// Evaluating the spherical harmonics at the unit direction `D`.
///
/// The degrees above `degree_max` are ignored. The caller clamps and
/// offsets the result into RGB space.
pub fn evaluate(
    degree_max: u32,
    direction: Vector3<f32>,
    coefficients: &[[f32; 3]; SH_COUNT_MAX],
) -> Vector3<f32> {
    let sh = |index: usize| Vector3::from(coefficients[index]);
    let sh_coef = &*SH_COEF;

    // (D = 0)
    let mut color = sh(0) * sh_coef.0[0] as f32;
    if degree_max < 1 {
        return color;
    }

    let x = direction.x;
    let y = direction.y;
    let z = direction.z;

    // (D = 1)
    color += sh(1) * (sh_coef.1[0] as f32 * y)
        + sh(2) * (sh_coef.1[1] as f32 * z)
        + sh(3) * (sh_coef.1[2] as f32 * x);
    if degree_max < 2 {
        return color;
    }

    let xx = x * x;
    let yy = y * y;
    let zz = z * z;
    let xy = x * y;
    let xz = x * z;
    let yz = y * z;

    // (D = 2)
    color += sh(4) * (sh_coef.2[0] as f32 * xy)
        + sh(5) * (sh_coef.2[1] as f32 * yz)
        + sh(6) * (sh_coef.2[2] as f32 * (3.0 * zz - 1.0))
        + sh(7) * (sh_coef.2[3] as f32 * xz)
        + sh(8) * (sh_coef.2[4] as f32 * (xx - yy));
    if degree_max < 3 {
        return color;
    }

    // (D = 3)
    color += sh(9) * (sh_coef.3[0] as f32 * y * (3.0 * xx - yy))
        + sh(10) * (sh_coef.3[1] as f32 * z * xy)
        + sh(11) * (sh_coef.3[2] as f32 * y * (5.0 * zz - 1.0))
        + sh(12) * (sh_coef.3[3] as f32 * z * (5.0 * zz - 3.0))
        + sh(13) * (sh_coef.3[4] as f32 * x * (5.0 * zz - 1.0))
        + sh(14) * (sh_coef.3[5] as f32 * z * (xx - yy))
        + sh(15) * (sh_coef.3[6] as f32 * x * (xx - 3.0 * yy));

    color
}

#[cfg(test)]
mod tests {
    #[test]
    fn evaluate_degree_0() {
        use super::*;
        use approx::assert_relative_eq;

        let mut coefficients = [[0.0; 3]; SH_COUNT_MAX];
        coefficients[0] = [1.0, 2.0, -1.0];

        let output =
            evaluate(0, Vector3::new(0.0, 0.0, 1.0), &coefficients);

        assert_relative_eq!(output.x, 0.28209479, epsilon = 1e-6);
        assert_relative_eq!(output.y, 0.56418958, epsilon = 1e-6);
        assert_relative_eq!(output.z, -0.28209479, epsilon = 1e-6);
    }

    #[test]
    fn evaluate_ignores_higher_degrees() {
        use super::*;

        let mut coefficients = [[0.0; 3]; SH_COUNT_MAX];
        coefficients[0] = [0.5, 0.5, 0.5];
        coefficients[4] = [9.0, 9.0, 9.0];
        coefficients[9] = [9.0, 9.0, 9.0];

        let direction = Vector3::new(0.6, 0.48, 0.64).normalize();
        let output = evaluate(1, direction, &coefficients);
        let target = evaluate(0, direction, &coefficients);

        assert_eq!(output, target);
    }

    #[test]
    fn evaluate_degree_1_flips_with_direction() {
        use super::*;
        use approx::assert_relative_eq;

        let mut coefficients = [[0.0; 3]; SH_COUNT_MAX];
        coefficients[3] = [1.0, 0.0, 0.0];

        let positive =
            evaluate(1, Vector3::new(1.0, 0.0, 0.0), &coefficients);
        let negative =
            evaluate(1, Vector3::new(-1.0, 0.0, 0.0), &coefficients);

        assert_relative_eq!(positive.x, -negative.x, epsilon = 1e-6);
        assert_relative_eq!(positive.x, -0.48860251, epsilon = 1e-6);
    }
}
