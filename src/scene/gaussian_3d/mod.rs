pub mod config;

pub use config::*;

use crate::{
    error::Error,
    render::gaussian_3d::{
        render_gaussian_3d, RenderInput, RenderOptions, RenderOutput, View,
    },
    spherical_harmonics::SH_COUNT_MAX,
};
use nalgebra::{Matrix3, Quaternion, Unit, Vector3};
use std::fmt;

/// A scene of signed 3D Gaussians.
#[derive(Clone, PartialEq)]
pub struct Gaussian3dScene {
    /// `[P, M, 3]`
    pub colors_sh: Vec<[[f32; 3]; SH_COUNT_MAX]>,
    /// `[P]` — signed; negative points erase nearby positive ones.
    pub opacities: Vec<f32>,
    /// `[P]`
    pub positions: Vec<Vector3<f32>>,
    /// `[P]` — normalized Hamilton quaternions in scalar-last order,
    /// i.e., `[x, y, z, w]`.
    pub rotations: Vec<[f32; 4]>,
    /// `[P]`
    pub scalings: Vec<Vector3<f32>>,
}

impl Gaussian3dScene {
    /// `P`
    #[inline]
    pub fn point_count(&self) -> usize {
        self.positions.len()
    }

    /// The 3D covariances from the rotations and scalings:
    /// `Σ = (R_s S_s)(R_s S_s)^T`.
    pub fn covariances(&self) -> Vec<Matrix3<f32>> {
        self.rotations
            .iter()
            .zip(&self.scalings)
            .map(|(&[x, y, z, w], scaling)| {
                let rotation =
                    Unit::new_normalize(Quaternion::new(w, x, y, z))
                        .to_rotation_matrix()
                        .into_inner();
                let transform = rotation * Matrix3::from_diagonal(scaling);
                transform * transform.transpose()
            })
            .collect()
    }

    /// Rendering the scene onto every view.
    pub fn render(
        &self,
        views: &[View],
        options: &RenderOptions,
    ) -> Result<RenderOutput, Error> {
        render_gaussian_3d(&self.to_render_input(), views, options)
    }

    /// Bundling the scene into the inputs of one render call.
    pub fn to_render_input(&self) -> RenderInput {
        RenderInput {
            colors_sh: self.colors_sh.to_owned(),
            opacities: self.opacities.to_owned(),
            positions: self.positions.to_owned(),
            covariances: self.covariances(),
        }
    }
}

impl fmt::Debug for Gaussian3dScene {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Gaussian3dScene")
            .field("colors_sh.len()", &self.colors_sh.len())
            .field("opacities.len()", &self.opacities.len())
            .field("positions.len()", &self.positions.len())
            .field("rotations.len()", &self.rotations.len())
            .field("scalings.len()", &self.scalings.len())
            .finish()
    }
}

impl Default for Gaussian3dScene {
    fn default() -> Self {
        Gaussian3dSceneConfig::default().into()
    }
}
