pub mod rank;
pub mod rasterize;
pub mod segment;
pub mod transform;

pub use crate::{
    error::Error,
    render::view::{CameraModel, View},
};
pub use rank::TILE_COUNT_MAX;
pub use rasterize::{TILE_SIZE_X, TILE_SIZE_Y};
pub use transform::{ProjectedGaussian, FILTER_LOW_PASS};

use crate::spherical_harmonics::{self, SH_COUNT_MAX, SH_DEGREE_MAX};
use nalgebra::{Matrix3, Vector3};
use rayon::iter::{IntoParallelIterator, ParallelIterator};

/// The inputs of one render call.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderInput {
    /// `[P, M, 3]`
    pub colors_sh: Vec<[[f32; 3]; SH_COUNT_MAX]>,
    /// `[P]` — signed; the sign selects additive or subtractive points
    /// and holds across every view of one call.
    pub opacities: Vec<f32>,
    /// `[P]`
    pub positions: Vec<Vector3<f32>>,
    /// `[P]` — positive semi-definite by caller contract.
    pub covariances: Vec<Matrix3<f32>>,
}

/// The options of one render call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderOptions {
    /// Blended into the remaining transmittance when configured.
    pub background: Option<Vector3<f32>>,
    /// Points per compositing batch, in units of `T_x * T_y` records.
    /// It bounds peak memory and cannot change the output.
    pub batch_per_iter: u32,
    /// Whether to fold the low-pass filter compensations into the
    /// opacities.
    pub calc_compensations: bool,
    /// It should be no more than [`SH_DEGREE_MAX`].
    pub colors_sh_degree_max: u32,
    /// The low-pass filter added to the projected covariances.
    pub eps2d: f32,
    /// Far clipping plane.
    pub far_plane: f32,
    /// Near clipping plane.
    pub near_plane: f32,
}

/// The outputs of one render call.
#[derive(Clone, Debug)]
pub struct RenderOutput {
    /// `[C, I_y, I_x]`
    pub alphas_2d: Vec<f32>,
    /// `[C, I_y, I_x]`
    pub colors_rgb_2d: Vec<Vector3<f32>>,
    /// `[C, P]` — present when compensations were requested.
    pub compensations: Option<Vec<f32>>,
    /// `[C, P]` — zero marks a culled pair.
    pub radii: Vec<u32>,
}

/// Rendering the signed points onto every view.
///
/// The stages run in a fixed order: project, rank, segment, rasterize.
/// All failures are caller contract violations caught up front; the
/// stages themselves cull degenerate points instead of failing.
pub fn render_gaussian_3d(
    input: &RenderInput,
    views: &[View],
    options: &RenderOptions,
) -> Result<RenderOutput, Error> {
    validate(input, views, options)?;

    #[cfg(debug_assertions)]
    log::debug!(target: "negsplat::renderer::gaussian_3d", "start");

    // C
    let camera_count = views.len();
    // P
    let point_count = input.positions.len();

    if camera_count == 0 {
        return Ok(RenderOutput {
            alphas_2d: vec![],
            colors_rgb_2d: vec![],
            compensations: options.calc_compensations.then(Vec::new),
            radii: vec![],
        });
    }

    // I_x
    let image_size_x = views[0].image_width;
    // I_y
    let image_size_y = views[0].image_height;
    // I_x / T_x
    let tile_count_x = image_size_x.div_ceil(TILE_SIZE_X);
    // I_y / T_y
    let tile_count_y = image_size_y.div_ceil(TILE_SIZE_Y);

    // Projecting the points onto every view

    let transform::Outputs { projections } = transform::main(
        transform::Arguments {
            camera_count: camera_count as u32,
            point_count: point_count as u32,
            image_size_x,
            image_size_y,
            eps2d: options.eps2d,
            near_plane: options.near_plane,
            far_plane: options.far_plane,
            calc_compensations: options.calc_compensations,
        },
        transform::Inputs {
            covariances_3d: &input.covariances,
            positions_3d: &input.positions,
            views,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "negsplat::renderer::gaussian_3d", "transform");

    // [C] — view positions in world space
    let view_positions =
        views.iter().map(View::position).collect::<Vec<_>>();

    // [C, P] — colors from the spherical harmonics per view direction
    let colors_rgb_3d = (0..camera_count * point_count)
        .into_par_iter()
        .map(|index| {
            let point = index % point_count;
            let direction = (input.positions[point]
                - view_positions[index / point_count])
                .normalize();
            spherical_harmonics::evaluate(
                options.colors_sh_degree_max,
                direction,
                &input.colors_sh[point],
            )
            .add_scalar(0.5)
            .sup(&Vector3::zeros())
        })
        .collect::<Vec<_>>();

    // [C, P] — opacities with the compensations folded in
    let opacities_2d = (0..camera_count * point_count)
        .map(|index| {
            input.opacities[index % point_count]
                * projections[index].compensation
        })
        .collect::<Vec<_>>();

    // Ranking and sorting the tile records

    let rank::Outputs {
        point_indices,
        point_orders,
    } = rank::main(
        rank::Arguments {
            camera_count: camera_count as u32,
            point_count: point_count as u32,
            tile_count_x,
            tile_count_y,
            tile_size_x: TILE_SIZE_X,
            tile_size_y: TILE_SIZE_Y,
        },
        rank::Inputs {
            projections: &projections,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "negsplat::renderer::gaussian_3d", "rank");

    // Segmenting the records into tile ranges

    let segment_outputs = segment::main(
        segment::Arguments {
            camera_count: camera_count as u32,
            tile_count_x,
            tile_count_y,
        },
        segment::Inputs {
            point_orders: &point_orders,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "negsplat::renderer::gaussian_3d", "segment");

    // Rasterizing the records to the images

    let rasterize::Outputs {
        alphas_2d,
        colors_rgb_2d,
    } = rasterize::main(
        rasterize::Arguments {
            camera_count: camera_count as u32,
            image_size_x,
            image_size_y,
            tile_count_x,
            tile_count_y,
            batch_per_iter: options.batch_per_iter,
            background: options.background,
        },
        rasterize::Inputs {
            colors_rgb_3d: &colors_rgb_3d,
            opacities_2d: &opacities_2d,
            point_indices: &point_indices,
            projections: &projections,
            tile_point_offsets: &segment_outputs.tile_point_offsets,
        },
    );
    #[cfg(debug_assertions)]
    log::debug!(target: "negsplat::renderer::gaussian_3d", "rasterize");

    let compensations = options.calc_compensations.then(|| {
        projections
            .iter()
            .map(|projection| projection.compensation)
            .collect()
    });
    let radii = projections
        .iter()
        .map(|projection| projection.radius)
        .collect();

    Ok(RenderOutput {
        alphas_2d,
        colors_rgb_2d,
        compensations,
        radii,
    })
}

fn validate(
    input: &RenderInput,
    views: &[View],
    options: &RenderOptions,
) -> Result<(), Error> {
    let point_count = input.positions.len();
    let validate_len = |name: &str, len: usize| {
        if len != point_count {
            return Err(Error::Validation(
                format!("{name}.len()"),
                format!("the point count {point_count}, not {len}"),
            ));
        }
        Ok(())
    };
    validate_len("colors_sh", input.colors_sh.len())?;
    validate_len("opacities", input.opacities.len())?;
    validate_len("covariances", input.covariances.len())?;

    let is_finite = input.positions.iter().all(|value| {
        value.iter().all(|component| component.is_finite())
    }) && input.covariances.iter().all(|value| {
        value.iter().all(|component| component.is_finite())
    }) && input.opacities.iter().all(|value| value.is_finite())
        && input.colors_sh.iter().flatten().flatten().all(|value| {
            value.is_finite()
        });
    if !is_finite {
        return Err(Error::Validation(
            "the render input".into(),
            "finite".into(),
        ));
    }

    if options.colors_sh_degree_max > SH_DEGREE_MAX {
        return Err(Error::Validation(
            "colors_sh_degree_max".into(),
            format!("no more than {SH_DEGREE_MAX}"),
        ));
    }
    if options.batch_per_iter == 0 {
        return Err(Error::Validation(
            "batch_per_iter".into(),
            "more than 0".into(),
        ));
    }

    let Some(view) = views.first() else {
        return Ok(());
    };
    if view.image_width == 0 || view.image_height == 0 {
        return Err(Error::Validation(
            "the image size".into(),
            "more than 0 on both axes".into(),
        ));
    }
    if views.iter().any(|other| {
        other.image_width != view.image_width
            || other.image_height != view.image_height
    }) {
        return Err(Error::Validation(
            "views".into(),
            "sharing one image size per call".into(),
        ));
    }
    if views.iter().any(|view| {
        let transform_is_finite = view
            .view_transform
            .iter()
            .flatten()
            .all(|value| value.is_finite());
        !transform_is_finite
            || !view.focal_length_x.is_finite()
            || !view.focal_length_y.is_finite()
            || !view.principal_point_x.is_finite()
            || !view.principal_point_y.is_finite()
    }) {
        return Err(Error::Validation("views".into(), "finite".into()));
    }

    let tile_count_x = view.image_width.div_ceil(TILE_SIZE_X);
    let tile_count_y = view.image_height.div_ceil(TILE_SIZE_Y);
    if tile_count_x * tile_count_y > TILE_COUNT_MAX {
        return Err(Error::Validation(
            "the tile count".into(),
            format!("no more than {TILE_COUNT_MAX}"),
        ));
    }
    let camera_count_max =
        u32::MAX >> rank::tile_bits(tile_count_x, tile_count_y);
    if views.len() > camera_count_max as usize {
        return Err(Error::Validation(
            "views.len()".into(),
            format!("no more than {camera_count_max}"),
        ));
    }

    Ok(())
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            background: None,
            batch_per_iter: 100,
            calc_compensations: false,
            colors_sh_degree_max: SH_DEGREE_MAX,
            eps2d: FILTER_LOW_PASS,
            far_plane: 1e10,
            near_plane: 0.01,
        }
    }
}
