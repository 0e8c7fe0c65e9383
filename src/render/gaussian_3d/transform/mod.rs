//! Projecting the points.

pub use crate::render::view::{CameraModel, View};

use nalgebra::{Matrix3, Vector2, Vector3};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// `C`
    pub camera_count: u32,
    /// `P`
    pub point_count: u32,
    /// `I_x`
    pub image_size_x: u32,
    /// `I_y`
    pub image_size_y: u32,
    /// The low-pass filter added to the screen-plane block
    /// of the projected covariance.
    pub eps2d: f32,
    /// Near clipping plane.
    pub near_plane: f32,
    /// Far clipping plane.
    pub far_plane: f32,
    /// Whether to compute the low-pass filter compensations.
    pub calc_compensations: bool,
}

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[P]`
    pub covariances_3d: &'a [Matrix3<f32>],
    /// `[P]`
    pub positions_3d: &'a [Vector3<f32>],
    /// `[C]`
    pub views: &'a [View],
}

/// Outputs.
#[derive(Clone, Debug)]
pub struct Outputs {
    /// `[C, P]`
    pub projections: Vec<ProjectedGaussian>,
}

/// A point projected onto one view's screen.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectedGaussian {
    /// The low-pass filter compensation
    /// `sqrt(det_before / det_after)`. It is `1.0` when not requested.
    pub compensation: f32,
    /// Inverse of the regularized projected covariance.
    pub conic: Matrix3<f32>,
    /// The regularized projected covariance.
    pub covariance: Matrix3<f32>,
    /// View-space z.
    pub depth: f32,
    /// Euclidean view-space distance.
    /// It is the view-space z for orthographic views.
    pub depth_radial: f32,
    /// Screen position in pixels.
    pub position_2d: Vector2<f32>,
    /// Bounding radius in pixels. `0` marks a culled point.
    pub radius: u32,
}

/// `C_f`
pub const FILTER_LOW_PASS: f32 = 0.3;

/// Floor of the regularized determinant in divisions.
const DET_MIN: f32 = 1e-10;
/// Floor of the eigenvalue discriminant.
const EXTENT_DISC_MIN: f32 = 0.01;
/// Guard of the fisheye `r -> 0` singularity.
const FISHEYE_EPS: f32 = 1e-7;

impl ProjectedGaussian {
    /// Returns whether the point survived culling.
    #[inline]
    pub fn is_visible(&self) -> bool {
        self.radius > 0
    }
}

impl Default for ProjectedGaussian {
    fn default() -> Self {
        Self {
            compensation: 1.0,
            conic: Matrix3::zeros(),
            covariance: Matrix3::zeros(),
            depth: 0.0,
            depth_radial: 0.0,
            position_2d: Vector2::zeros(),
            radius: 0,
        }
    }
}

/// Projecting the points.
///
/// For each one of the `C * P` view-point pairs, do the following steps:
///
/// 1. Transform the position and covariance from world space to view space:
///    `P_v = R_v P + T_v`, `Σ_v = R_v Σ R_v^T`.
/// 2. Perform near and far plane culling on `P_v.z`.
/// 3. Project onto screen space under the view's camera model,
///    obtaining the screen position, the projection Jacobian extended
///    with a depth row, and the radial depth.
/// 4. Regularize the screen-plane block of `J Σ_v J^T` with
///    [`eps2d`](Arguments::eps2d), then invert through the symmetric
///    adjugate to obtain the conic.
/// 5. Estimate the bounding radius from the larger screen-plane
///    eigenvalue as a 3-sigma footprint.
/// 6. Cull the points whose screen disc misses the image rectangle.
///
/// Culled points come out with radius `0` and take no part in any later
/// stage. Degenerate covariances are culled, never reported as errors.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
) -> Outputs {
    // Specifying the parameters

    let camera_count = arguments.camera_count as usize;
    let point_count = arguments.point_count as usize;

    debug_assert_eq!(inputs.views.len(), camera_count);
    debug_assert_eq!(inputs.positions_3d.len(), point_count);
    debug_assert_eq!(inputs.covariances_3d.len(), point_count);

    // [C]
    let cameras = inputs.views.iter().map(Camera::new).collect::<Vec<_>>();

    // [C, P]
    let projections = (0..camera_count * point_count)
        .into_par_iter()
        .map(|index| {
            let camera = &cameras[index / point_count];
            let point = index % point_count;
            camera.project(
                &arguments,
                inputs.positions_3d[point],
                &inputs.covariances_3d[point],
            )
        })
        .collect();

    Outputs { projections }
}

/// Per-view values reused across the points.
#[derive(Clone, Copy, Debug)]
struct Camera {
    focal_length_x: f32,
    focal_length_y: f32,
    model: CameraModel,
    principal_point_x: f32,
    principal_point_y: f32,
    rotation: Matrix3<f32>,
    translation: Vector3<f32>,
    view_bound_x_neg: f32,
    view_bound_x_pos: f32,
    view_bound_y_neg: f32,
    view_bound_y_pos: f32,
}

impl Camera {
    fn new(view: &View) -> Self {
        let focal_length_x = view.focal_length_x as f32;
        let focal_length_y = view.focal_length_y as f32;
        let principal_point_x = view.principal_point_x as f32;
        let principal_point_y = view.principal_point_y as f32;
        let image_size_x = view.image_width as f32;
        let image_size_y = view.image_height as f32;

        // tan(Fov / 2) per axis
        let field_of_view_x_half_tan = 0.5 * image_size_x / focal_length_x;
        let field_of_view_y_half_tan = 0.5 * image_size_y / focal_length_y;

        Self {
            focal_length_x,
            focal_length_y,
            model: view.camera_model,
            principal_point_x,
            principal_point_y,
            rotation: view.rotation(),
            translation: view.translation(),
            view_bound_x_neg: principal_point_x / focal_length_x
                + FILTER_LOW_PASS * field_of_view_x_half_tan,
            view_bound_x_pos: (image_size_x - principal_point_x)
                / focal_length_x
                + FILTER_LOW_PASS * field_of_view_x_half_tan,
            view_bound_y_neg: principal_point_y / focal_length_y
                + FILTER_LOW_PASS * field_of_view_y_half_tan,
            view_bound_y_pos: (image_size_y - principal_point_y)
                / focal_length_y
                + FILTER_LOW_PASS * field_of_view_y_half_tan,
        }
    }

    fn project(
        &self,
        arguments: &Arguments,
        position: Vector3<f32>,
        covariance: &Matrix3<f32>,
    ) -> ProjectedGaussian {
        // World space to view space

        let position = self.rotation * position + self.translation;
        let depth = position.z;
        if depth <= arguments.near_plane || depth >= arguments.far_plane {
            return ProjectedGaussian::default();
        }
        let covariance = self.rotation * covariance * self.rotation.transpose();

        // View space to screen space

        let (position_2d, jacobian, depth_radial) = match self.model {
            CameraModel::Pinhole => self.project_pinhole(position),
            CameraModel::Orthographic => self.project_orthographic(position),
            CameraModel::Fisheye => self.project_fisheye(position),
        };

        let mut covariance = jacobian * covariance * jacobian.transpose();
        let det_before = covariance.determinant();

        covariance[(0, 0)] += arguments.eps2d;
        covariance[(1, 1)] += arguments.eps2d;
        let det_after = covariance.determinant();
        if det_after <= 0.0 {
            return ProjectedGaussian::default();
        }
        let det = det_after.max(DET_MIN);

        let compensation = if arguments.calc_compensations {
            (det_before / det).max(0.0).sqrt()
        } else {
            1.0
        };
        let conic = invert_symmetric_3d(&covariance, det);

        // Bounding radius from the larger screen-plane eigenvalue

        let det_2d = covariance[(0, 0)] * covariance[(1, 1)]
            - covariance[(0, 1)] * covariance[(1, 0)];
        let middle = (covariance[(0, 0)] + covariance[(1, 1)]) / 2.0;
        let extent_max =
            middle + (middle * middle - det_2d).max(EXTENT_DISC_MIN).sqrt();
        let radius = (3.0 * extent_max.sqrt()).ceil();

        // The screen disc must intersect the image rectangle

        let is_inside = position_2d.x + radius > 0.0
            && position_2d.x - radius < arguments.image_size_x as f32
            && position_2d.y + radius > 0.0
            && position_2d.y - radius < arguments.image_size_y as f32;
        if !is_inside {
            return ProjectedGaussian::default();
        }

        ProjectedGaussian {
            compensation,
            conic,
            covariance,
            depth,
            depth_radial,
            position_2d,
            radius: radius as u32,
        }
    }

    fn project_pinhole(
        &self,
        position: Vector3<f32>,
    ) -> (Vector2<f32>, Matrix3<f32>, f32) {
        let z = position.z;
        let z2 = z * z;

        // Clip to the view bound before differentiating
        let x = z * (position.x / z)
            .clamp(-self.view_bound_x_neg, self.view_bound_x_pos);
        let y = z * (position.y / z)
            .clamp(-self.view_bound_y_neg, self.view_bound_y_pos);
        let depth_radial = (x * x + y * y + z2).sqrt();

        let fx = self.focal_length_x;
        let fy = self.focal_length_y;
        let jacobian = Matrix3::new(
            fx / z,
            0.0,
            -fx * x / z2,
            0.0,
            fy / z,
            -fy * y / z2,
            x / depth_radial,
            y / depth_radial,
            z / depth_radial,
        );

        // The screen position uses the unclipped point
        let position_2d = Vector2::new(
            fx * position.x / z + self.principal_point_x,
            fy * position.y / z + self.principal_point_y,
        );

        (position_2d, jacobian, depth_radial)
    }

    fn project_orthographic(
        &self,
        position: Vector3<f32>,
    ) -> (Vector2<f32>, Matrix3<f32>, f32) {
        let fx = self.focal_length_x;
        let fy = self.focal_length_y;
        let jacobian =
            Matrix3::new(fx, 0.0, 0.0, 0.0, fy, 0.0, 0.0, 0.0, 1.0);

        let position_2d = Vector2::new(
            fx * position.x + self.principal_point_x,
            fy * position.y + self.principal_point_y,
        );

        (position_2d, jacobian, position.z)
    }

    fn project_fisheye(
        &self,
        position: Vector3<f32>,
    ) -> (Vector2<f32>, Matrix3<f32>, f32) {
        let x = position.x;
        let y = position.y;
        let z = position.z;
        let fx = self.focal_length_x;
        let fy = self.focal_length_y;

        let xy_len = (x * x + y * y).sqrt() + FISHEYE_EPS;
        let theta = xy_len.atan2(z + FISHEYE_EPS);
        let position_2d = Vector2::new(
            x * fx * theta / xy_len + self.principal_point_x,
            y * fy * theta / xy_len + self.principal_point_y,
        );

        let x2 = x * x + FISHEYE_EPS;
        let y2 = y * y;
        let xy = x * y;
        let x2y2 = x2 + y2;
        let x2y2z2_inv = 1.0 / (x2y2 + z * z);
        let b = xy_len.atan2(z) / xy_len / x2y2;
        let a = z * x2y2z2_inv / x2y2;
        let depth_radial = (x * x + y * y + z * z).sqrt();
        let jacobian = Matrix3::new(
            fx * (x2 * a + y2 * b),
            fx * xy * (a - b),
            -fx * x * x2y2z2_inv,
            fy * xy * (a - b),
            fy * (y2 * a + x2 * b),
            -fy * y * x2y2z2_inv,
            x / depth_radial,
            y / depth_radial,
            z / depth_radial,
        );

        (position_2d, jacobian, depth_radial)
    }
}

/// Closed-form inverse of a symmetric 3x3 matrix through its adjugate.
fn invert_symmetric_3d(
    m: &Matrix3<f32>,
    det: f32,
) -> Matrix3<f32> {
    let a = m[(0, 0)];
    let b = m[(0, 1)];
    let c = m[(0, 2)];
    let d = m[(1, 1)];
    let e = m[(1, 2)];
    let f = m[(2, 2)];

    let cof_00 = d * f - e * e;
    let cof_01 = c * e - b * f;
    let cof_02 = b * e - c * d;
    let cof_11 = a * f - c * c;
    let cof_12 = b * c - a * e;
    let cof_22 = a * d - b * b;

    Matrix3::new(
        cof_00, cof_01, cof_02, cof_01, cof_11, cof_12, cof_02, cof_12,
        cof_22,
    ) / det
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arguments(camera_count: u32, point_count: u32) -> Arguments {
        Arguments {
            camera_count,
            point_count,
            image_size_x: 100,
            image_size_y: 100,
            eps2d: FILTER_LOW_PASS,
            near_plane: 0.01,
            far_plane: 1e10,
            calc_compensations: false,
        }
    }

    fn view(camera_model: CameraModel) -> View {
        View {
            camera_model,
            focal_length_x: 100.0,
            focal_length_y: 100.0,
            image_height: 100,
            image_width: 100,
            principal_point_x: 50.0,
            principal_point_y: 50.0,
            ..Default::default()
        }
    }

    #[test]
    fn project_pinhole() {
        use approx::assert_relative_eq;

        let positions = [Vector3::new(1.0, 0.0, 2.0)];
        let covariances = [Matrix3::identity() * 0.01];
        let views = [view(CameraModel::Pinhole)];

        let Outputs { projections } = main(
            arguments(1, 1),
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        let output = &projections[0];
        assert!(output.is_visible());
        assert_relative_eq!(output.position_2d.x, 100.0, epsilon = 1e-4);
        assert_relative_eq!(output.position_2d.y, 50.0, epsilon = 1e-4);
        assert_relative_eq!(output.depth, 2.0, epsilon = 1e-6);
        assert_relative_eq!(
            output.depth_radial,
            5.0_f32.sqrt(),
            epsilon = 1e-5
        );
    }

    #[test]
    fn project_culls_near_and_far() {
        let positions = [
            Vector3::new(0.0, 0.0, 0.005),
            Vector3::new(0.0, 0.0, -1.0),
            Vector3::new(0.0, 0.0, 2e10),
            Vector3::new(0.0, 0.0, 2.0),
        ];
        let covariances = [Matrix3::identity() * 0.01; 4];
        let views = [view(CameraModel::Pinhole)];

        let Outputs { projections } = main(
            arguments(1, 4),
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        assert_eq!(projections[0].radius, 0);
        assert_eq!(projections[1].radius, 0);
        assert_eq!(projections[2].radius, 0);
        assert!(projections[3].is_visible());
    }

    #[test]
    fn project_culls_outside_image() {
        let positions = [Vector3::new(1000.0, 0.0, 1.0)];
        let covariances = [Matrix3::identity() * 0.01];
        let views = [view(CameraModel::Pinhole)];

        let Outputs { projections } = main(
            arguments(1, 1),
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        assert_eq!(projections[0].radius, 0);
    }

    #[test]
    fn project_orthographic_depth_independence() {
        let positions = [
            Vector3::new(1.0, -0.5, 2.0),
            Vector3::new(1.0, -0.5, 9.0),
        ];
        let covariances = [Matrix3::identity() * 0.01; 2];
        let views = [View {
            focal_length_x: 2.0,
            focal_length_y: 2.0,
            principal_point_x: 10.0,
            principal_point_y: 10.0,
            ..view(CameraModel::Orthographic)
        }];

        let Outputs { projections } = main(
            arguments(1, 2),
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        assert!(projections[0].is_visible());
        assert!(projections[1].is_visible());
        assert_eq!(projections[0].position_2d, projections[1].position_2d);
        assert_eq!(projections[0].position_2d, Vector2::new(12.0, 9.0));
        assert_eq!(projections[0].covariance, projections[1].covariance);
    }

    #[test]
    fn project_fisheye_center() {
        use approx::assert_relative_eq;

        let positions = [Vector3::new(0.0, 0.0, 2.0)];
        let covariances = [Matrix3::identity() * 0.01];
        let views = [view(CameraModel::Fisheye)];

        let Outputs { projections } = main(
            arguments(1, 1),
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        let output = &projections[0];
        assert!(output.is_visible());
        assert_relative_eq!(output.position_2d.x, 50.0, epsilon = 1e-4);
        assert_relative_eq!(output.position_2d.y, 50.0, epsilon = 1e-4);
        assert_relative_eq!(output.depth_radial, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn compensation_range_and_limit() {
        use approx::assert_relative_eq;

        let positions = [Vector3::new(0.0, 0.0, 2.0)];
        let covariances = [Matrix3::identity()];
        let views = [View {
            focal_length_x: 1.0,
            focal_length_y: 1.0,
            ..view(CameraModel::Orthographic)
        }];
        let inputs = Inputs {
            covariances_3d: &covariances,
            positions_3d: &positions,
            views: &views,
        };

        let mut arguments = Arguments {
            calc_compensations: true,
            ..arguments(1, 1)
        };
        let Outputs { projections } = main(arguments, inputs);
        let compensation = projections[0].compensation;
        assert!(compensation > 0.0 && compensation <= 1.0);
        assert_relative_eq!(compensation, 1.0 / 1.3, epsilon = 1e-5);

        // The compensation approaches one as the filter vanishes.
        arguments.eps2d = 1e-7;
        let Outputs { projections } = main(arguments, inputs);
        assert_relative_eq!(projections[0].compensation, 1.0, epsilon = 1e-4);
    }

    #[test]
    fn conic_inverts_covariance() {
        use approx::assert_relative_eq;

        let positions = [Vector3::new(0.2, -0.1, 3.0)];
        let covariances = [Matrix3::new(
            0.5, 0.1, 0.0, 0.1, 0.3, 0.05, 0.0, 0.05, 0.4,
        )];
        let views = [view(CameraModel::Pinhole)];

        let Outputs { projections } = main(
            arguments(1, 1),
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        let output = &projections[0];
        assert!(output.is_visible());
        let identity = output.covariance * output.conic;
        for row in 0..3 {
            for col in 0..3 {
                let target = if row == col { 1.0 } else { 0.0 };
                assert_relative_eq!(
                    identity[(row, col)],
                    target,
                    epsilon = 1e-2,
                    max_relative = 1e-2
                );
            }
        }
    }

    #[test]
    fn radius_recovers_three_sigma_extent() {
        let variance = 4.0;
        let positions = [Vector3::new(0.0, 0.0, 2.0)];
        let covariances = [Matrix3::identity() * variance];
        let views = [View {
            focal_length_x: 1.0,
            focal_length_y: 1.0,
            ..view(CameraModel::Orthographic)
        }];

        let arguments = arguments(1, 1);
        let Outputs { projections } = main(
            arguments,
            Inputs {
                covariances_3d: &covariances,
                positions_3d: &positions,
                views: &views,
            },
        );

        // The bound is conservative: at least 3 sigma, and no wider than
        // the filter bias, the discriminant floor and the ceil allow.
        let radius = projections[0].radius as f32;
        let sigma = variance.sqrt();
        let sigma_biased =
            (variance + arguments.eps2d + EXTENT_DISC_MIN.sqrt()).sqrt();
        assert!(radius >= 3.0 * sigma);
        assert!(radius <= 3.0 * sigma_biased + 1.0);
    }
}
