use nalgebra::{Matrix3, Vector3};

/// Camera projection models.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum CameraModel {
    /// Perspective projection.
    #[default]
    Pinhole,
    /// Depth-independent affine projection.
    Orthographic,
    /// Equidistant wide-angle projection.
    Fisheye,
}

/// A view in 3D space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct View {
    /// Camera projection model.
    pub camera_model: CameraModel,
    /// The horizontal focal length in pixels.
    pub focal_length_x: f64,
    /// The vertical focal length in pixels.
    pub focal_length_y: f64,
    /// Image height.
    pub image_height: u32,
    /// Image width.
    pub image_width: u32,
    /// The horizontal principal point in pixels.
    pub principal_point_x: f64,
    /// The vertical principal point in pixels.
    pub principal_point_y: f64,
    /// View ID.
    pub view_id: u32,
    /// Affine transformation from world space to view space.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    ///
    /// # Format
    ///
    /// ```plaintext
    /// [R_v   | T_v]
    /// [...   | ...]
    /// [0 0 0 | 1  ]
    /// ```
    pub view_transform: [[f64; 4]; 4],
}

/// Linear transformations.
impl View {
    /// Returns the affine transformation matrix.
    ///
    /// It is in **column-major order**, i.e., `M[col][row]`.
    #[inline]
    pub const fn transform(
        rotation: &[[f64; 3]; 3],
        translation: &[f64; 3],
    ) -> [[f64; 4]; 4] {
        let r = rotation;
        let t = [translation];
        [
            [r[0][0], r[0][1], r[0][2], 0.0],
            [r[1][0], r[1][1], r[1][2], 0.0],
            [r[2][0], r[2][1], r[2][2], 0.0],
            [t[0][0], t[0][1], t[0][2], 1.0],
        ]
    }

    /// Returns the rotation `R_v` from world space to view space.
    pub fn rotation(&self) -> Matrix3<f32> {
        let m = &self.view_transform;
        Matrix3::new(
            m[0][0] as f32,
            m[1][0] as f32,
            m[2][0] as f32,
            m[0][1] as f32,
            m[1][1] as f32,
            m[2][1] as f32,
            m[0][2] as f32,
            m[1][2] as f32,
            m[2][2] as f32,
        )
    }

    /// Returns the translation `T_v` from world space to view space.
    pub fn translation(&self) -> Vector3<f32> {
        let m = &self.view_transform;
        Vector3::new(m[3][0] as f32, m[3][1] as f32, m[3][2] as f32)
    }

    /// Returns the view position in world space, i.e., `-R_v^T T_v`.
    pub fn position(&self) -> Vector3<f32> {
        -self.rotation().transpose() * self.translation()
    }
}

impl Default for View {
    fn default() -> Self {
        Self {
            camera_model: Default::default(),
            focal_length_x: 1.0,
            focal_length_y: 1.0,
            image_height: 0,
            image_width: 0,
            principal_point_x: 0.0,
            principal_point_y: 0.0,
            view_id: 0,
            view_transform: Self::transform(
                &[[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                &[0.0, 0.0, 0.0],
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn transform() {
        use super::*;

        let target = [
            [
                0.9870946659543874,
                0.011754269038001336,
                0.1597058471183149,
                0.0000000000000000,
            ],
            [
                -0.000481623211642526,
                0.9975159094549839,
                -0.07043989227191047,
                0.0000000000000000,
            ],
            [
                -0.1601370927782764,
                0.0694539238889973,
                0.9846482945564589,
                0.0000000000000000,
            ],
            [
                0.129242027423,
                0.0000000000000000,
                -0.3424233862,
                1.0000000000000000,
            ],
        ];
        let output = View::transform(
            &[
                [0.9870946659543874, 0.011754269038001336, 0.1597058471183149],
                [
                    -0.000481623211642526,
                    0.9975159094549839,
                    -0.07043989227191047,
                ],
                [-0.1601370927782764, 0.0694539238889973, 0.9846482945564589],
            ],
            &[0.129242027423, 0.0, -0.3424233862],
        );
        assert_eq!(output, target);
    }

    #[test]
    fn position() {
        use super::*;
        use approx::assert_relative_eq;

        let view = View {
            view_transform: View::transform(
                &[[0.0, 1.0, 0.0], [-1.0, 0.0, 0.0], [0.0, 0.0, 1.0]],
                &[1.0, -2.0, 3.0],
            ),
            ..Default::default()
        };

        // p_v = R p + t recovers the origin at the view position.
        let position = view.position();
        let output = view.rotation() * position + view.translation();

        assert_relative_eq!(output.norm(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(position.x, 2.0, epsilon = 1e-6);
        assert_relative_eq!(position.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(position.z, -3.0, epsilon = 1e-6);
    }
}
