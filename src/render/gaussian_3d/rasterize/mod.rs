//! Rasterizing the points to the images.

pub use super::transform::ProjectedGaussian;

use nalgebra::{Vector2, Vector3};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::ops::Range;

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// `C`
    pub camera_count: u32,
    /// `I_x`
    pub image_size_x: u32,
    /// `I_y`
    pub image_size_y: u32,
    /// `I_x / T_x`
    pub tile_count_x: u32,
    /// `I_y / T_y`
    pub tile_count_y: u32,
    /// Points per compositing batch, in units of `T_x * T_y` records.
    /// It bounds peak memory and cannot change the output.
    pub batch_per_iter: u32,
    /// Blended into the remaining transmittance when configured.
    pub background: Option<Vector3<f32>>,
}

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[C, P]`
    pub colors_rgb_3d: &'a [Vector3<f32>],
    /// `[C, P]` — compensation-scaled, signed.
    pub opacities_2d: &'a [f32],
    /// `[T]`
    pub point_indices: &'a [u32],
    /// `[C, P]`
    pub projections: &'a [ProjectedGaussian],
    /// `[C * (I_y / T_y) * (I_x / T_x) + 1]`
    pub tile_point_offsets: &'a [u32],
}

/// Outputs.
#[derive(Clone, Debug)]
pub struct Outputs {
    /// `[C, I_y, I_x]`
    pub alphas_2d: Vec<f32>,
    /// `[C, I_y, I_x]`
    pub colors_rgb_2d: Vec<Vector3<f32>>,
}

/// `T_x`
pub const TILE_SIZE_X: u32 = 16;
/// `T_y`
pub const TILE_SIZE_Y: u32 = 16;

/// Ceiling of one blending weight.
const ALPHA_MAX: f32 = 0.999;
/// Floor below which a point does not touch a pixel.
const ALPHA_MIN: f32 = 1.0 / 255.0;
/// Transmittance at which a ray terminates.
const TRANSMITTANCE_MIN: f32 = 1e-4;

/// One pixel-point intersection inside a batch.
#[derive(Clone, Copy, Debug)]
struct Intersection {
    alpha: f32,
    pixel: u32,
    point: u32,
}

/// The accumulator one ray threads through the batches.
#[derive(Clone, Copy, Debug)]
struct Pixel {
    alpha: f32,
    color_rgb: Vector3<f32>,
    transmittance: f32,
}

/// Rasterizing the points to the images.
///
/// Each `(camera, tile)` bucket walks its record range front to back in
/// batches of [`batch_per_iter`](Arguments::batch_per_iter) blocks. A
/// batch runs in three phases:
///
/// 1. Collect the positive pixel-point intersections and their weights
///    `alpha = min(opacity * exp(-sigma), 0.999)`.
/// 2. Let every negative point of the tile within one standard
///    deviation of depth erode the collected weights, clamped at zero.
/// 3. Blend the weights along each ray, attenuating its transmittance.
///
/// Tiles own their pixel blocks exclusively, so the buckets blend in
/// parallel.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
) -> Outputs {
    // Specifying the parameters

    let camera_count = arguments.camera_count as usize;
    let image_size_x = arguments.image_size_x as usize;
    let tile_count =
        (arguments.tile_count_x * arguments.tile_count_y) as usize;
    let bucket_count = camera_count * tile_count;
    let pixel_count = image_size_x * arguments.image_size_y as usize;

    debug_assert_eq!(inputs.tile_point_offsets.len(), bucket_count + 1);

    // [C * (I_y / T_y) * (I_x / T_x)]
    let tiles = (0..bucket_count)
        .into_par_iter()
        .map(|bucket| blend_tile(&arguments, &inputs, bucket))
        .collect::<Vec<_>>();

    // Scattering the tiles into the images

    let mut alphas_2d = vec![0.0; camera_count * pixel_count];
    let mut colors_rgb_2d =
        vec![Vector3::zeros(); camera_count * pixel_count];

    for (bucket, pixels) in tiles.into_iter().enumerate() {
        let camera = bucket / tile_count;
        let (x_min, x_max, y_min, _) =
            tile_pixel_bounds(&arguments, bucket % tile_count);
        let tile_size_x = x_max - x_min;

        for (pixel_index, pixel) in pixels.into_iter().enumerate() {
            let x = x_min + pixel_index % tile_size_x;
            let y = y_min + pixel_index / tile_size_x;
            let index = camera * pixel_count + y * image_size_x + x;
            alphas_2d[index] = pixel.alpha;
            colors_rgb_2d[index] = pixel.color_rgb;
        }
    }

    Outputs {
        alphas_2d,
        colors_rgb_2d,
    }
}

fn blend_tile(
    arguments: &Arguments,
    inputs: &Inputs,
    bucket: usize,
) -> Vec<Pixel> {
    let tile_count =
        (arguments.tile_count_x * arguments.tile_count_y) as usize;
    let (x_min, x_max, y_min, y_max) =
        tile_pixel_bounds(arguments, bucket % tile_count);
    let tile_size_x = x_max - x_min;

    let mut pixels = vec![
        Pixel {
            alpha: 0.0,
            color_rgb: Vector3::zeros(),
            transmittance: 1.0,
        };
        tile_size_x * (y_max - y_min)
    ];

    let range = inputs.tile_point_offsets[bucket] as usize
        ..inputs.tile_point_offsets[bucket + 1] as usize;

    // The negative points of the whole tile. They are shared by every
    // batch, so the batch size cannot change the output.
    let point_negatives = range
        .to_owned()
        .map(|record| inputs.point_indices[record])
        .filter(|&point| inputs.opacities_2d[point as usize] < 0.0)
        .collect::<Vec<_>>();

    let origin = Vector2::new(x_min as f32, y_min as f32);
    let batch_size =
        (arguments.batch_per_iter * TILE_SIZE_X * TILE_SIZE_Y) as usize;

    let mut start = range.start;
    while start < range.end {
        if pixels
            .iter()
            .all(|pixel| pixel.transmittance <= TRANSMITTANCE_MIN)
        {
            break;
        }

        let end = (start + batch_size).min(range.end);
        pixels = blend_batch(
            inputs,
            &point_negatives,
            origin,
            tile_size_x,
            pixels,
            start..end,
        );
        start = end;
    }

    if let Some(background) = arguments.background {
        for pixel in &mut pixels {
            pixel.color_rgb += background * (1.0 - pixel.alpha);
        }
    }

    pixels
}

/// Blending one batch of records into the tile's rays.
///
/// The accumulators come in and go out by value. Nothing outside the
/// returned pixels carries state across the batches.
fn blend_batch(
    inputs: &Inputs,
    point_negatives: &[u32],
    origin: Vector2<f32>,
    tile_size_x: usize,
    mut pixels: Vec<Pixel>,
    window: Range<usize>,
) -> Vec<Pixel> {
    let pixel_position = |pixel: usize| {
        origin
            + Vector2::new(
                (pixel % tile_size_x) as f32 + 0.5,
                (pixel / tile_size_x) as f32 + 0.5,
            )
    };

    // Collecting the positive intersections

    let mut intersections = Vec::new();
    for (pixel_index, pixel) in pixels.iter().enumerate() {
        if pixel.transmittance <= TRANSMITTANCE_MIN {
            continue;
        }
        let position = pixel_position(pixel_index);

        for record in window.to_owned() {
            let point = inputs.point_indices[record] as usize;
            let opacity = inputs.opacities_2d[point];
            if opacity <= 0.0 {
                continue;
            }

            let projection = &inputs.projections[point];
            let conic = &projection.conic;
            let d = position - projection.position_2d;
            let sigma = 0.5
                * (conic[(0, 0)] * d.x * d.x + conic[(1, 1)] * d.y * d.y)
                + conic[(0, 1)] * d.x * d.y;
            if sigma < 0.0 {
                continue;
            }
            let alpha = opacity * (-sigma).exp();
            if alpha < ALPHA_MIN {
                continue;
            }

            intersections.push(Intersection {
                alpha: alpha.min(ALPHA_MAX),
                pixel: pixel_index as u32,
                point: point as u32,
            });
        }
    }

    // Correcting the weights with the tile's negative points

    if !point_negatives.is_empty() {
        for intersection in &mut intersections {
            let positive =
                &inputs.projections[intersection.point as usize];
            let position = pixel_position(intersection.pixel as usize);

            for &point in point_negatives {
                let negative = &inputs.projections[point as usize];

                // One standard deviation of the negative point in depth
                let depth_delta =
                    positive.depth_radial - negative.depth_radial;
                let depth_reach =
                    negative.covariance[(2, 2)].max(0.0).sqrt();
                if depth_delta.abs() > depth_reach {
                    continue;
                }

                let d = position - negative.position_2d;
                let delta = Vector3::new(d.x, d.y, depth_delta);
                let sigma = (negative.conic * delta).dot(&delta);
                intersection.alpha += inputs.opacities_2d[point as usize]
                    * (-0.5 * sigma).exp();
            }

            intersection.alpha = intersection.alpha.max(0.0);
        }
    }

    // Blending front to back along each ray

    for intersection in intersections {
        let pixel = &mut pixels[intersection.pixel as usize];
        if pixel.transmittance <= TRANSMITTANCE_MIN {
            continue;
        }

        let weight = intersection.alpha * pixel.transmittance;
        pixel.color_rgb +=
            inputs.colors_rgb_3d[intersection.point as usize] * weight;
        pixel.alpha += weight;
        pixel.transmittance *= 1.0 - intersection.alpha;
    }

    pixels
}

fn tile_pixel_bounds(
    arguments: &Arguments,
    tile: usize,
) -> (usize, usize, usize, usize) {
    let tile_x = tile % arguments.tile_count_x as usize;
    let tile_y = tile / arguments.tile_count_x as usize;
    let x_min = tile_x * TILE_SIZE_X as usize;
    let y_min = tile_y * TILE_SIZE_Y as usize;
    let x_max =
        (x_min + TILE_SIZE_X as usize).min(arguments.image_size_x as usize);
    let y_max =
        (y_min + TILE_SIZE_Y as usize).min(arguments.image_size_y as usize);
    (x_min, x_max, y_min, y_max)
}
