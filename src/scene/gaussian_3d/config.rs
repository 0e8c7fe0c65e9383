pub use super::Gaussian3dScene;

use crate::spherical_harmonics::{SH_COEF, SH_COUNT_MAX};
use nalgebra::Vector3;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::Distribution;
use std::fmt;

/// A colored point seeding one Gaussian.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point {
    /// RGB in `[0.0, 1.0]`.
    pub color_rgb: [f64; 3],
    /// Position in world space.
    pub position: [f64; 3],
}

/// The configuration seeding a scene from sparse points.
#[derive(Clone, PartialEq)]
pub struct Gaussian3dSceneConfig {
    pub points: Vec<Point>,
}

impl fmt::Debug for Gaussian3dSceneConfig {
    fn fmt(
        &self,
        f: &mut fmt::Formatter,
    ) -> fmt::Result {
        f.debug_struct("Gaussian3dSceneConfig")
            .field("points.len()", &self.points.len())
            .finish()
    }
}

impl Default for Gaussian3dSceneConfig {
    fn default() -> Self {
        Self {
            points: vec![Default::default()],
        }
    }
}

impl From<Gaussian3dSceneConfig> for Gaussian3dScene {
    fn from(config: Gaussian3dSceneConfig) -> Self {
        // P
        let point_count = config.points.len();
        let rng = rand_distr::LogNormal::new(0.0, std::f32::consts::E)
            .expect("The standard deviation is finite");

        // [P, 16, 3]
        let colors_sh = config
            .points
            .iter()
            .map(|point| {
                let mut colors_sh = [[0.0; 3]; SH_COUNT_MAX];
                for channel in 0..3 {
                    colors_sh[0][channel] = (point.color_rgb[channel] as f32
                        - 0.5)
                        / SH_COEF.0[0] as f32;
                }
                colors_sh
            })
            .collect();

        // [P]
        let opacities = vec![0.1; point_count];

        // [P]
        let positions = config
            .points
            .iter()
            .map(|point| {
                Vector3::new(
                    point.position[0] as f32,
                    point.position[1] as f32,
                    point.position[2] as f32,
                )
            })
            .collect();

        // [P] (x, y, z, w)
        let rotations = vec![[0.0, 0.0, 0.0, 1.0]; point_count];

        // [P]
        let scalings = {
            let mut sample_max = f32::EPSILON;
            let samples = rng
                .sample_iter(&mut StdRng::seed_from_u64(0x3D65))
                .take(point_count)
                .map(|sample: f32| {
                    let sample = sample.max(f32::EPSILON);
                    sample_max = sample_max.max(sample);
                    sample
                })
                .collect::<Vec<_>>();

            samples
                .into_iter()
                .map(|sample| {
                    let scaling =
                        (sample / sample_max).sqrt().max(f32::EPSILON);
                    Vector3::from_element(scaling)
                })
                .collect()
        };

        Self {
            colors_sh,
            opacities,
            positions,
            rotations,
            scalings,
        }
    }
}
