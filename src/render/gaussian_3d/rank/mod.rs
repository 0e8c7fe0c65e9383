//! Ranking the points.

pub use super::transform::ProjectedGaussian;

use rayon::slice::ParallelSliceMut;

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// `C`
    pub camera_count: u32,
    /// `P`
    pub point_count: u32,
    /// `I_x / T_x`
    pub tile_count_x: u32,
    /// `I_y / T_y`
    pub tile_count_y: u32,
    /// `T_x`
    pub tile_size_x: u32,
    /// `T_y`
    pub tile_size_y: u32,
}

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[C, P]`
    pub projections: &'a [ProjectedGaussian],
}

/// Outputs.
#[derive(Clone, Debug)]
pub struct Outputs {
    /// `[T]` — flattened `(camera, point)` index of each record.
    pub point_indices: Vec<u32>,
    /// `[T]` — sorted composite keys. The high word is
    /// `camera << tile_bits | tile`, the low word is the depth bit
    /// pattern, so one sort groups by camera, then by tile, then orders
    /// by depth inside the tile.
    pub point_orders: Vec<[u32; 2]>,
}

/// Maximum of `(I_y / T_y) * (I_x / T_x)`
pub const TILE_COUNT_MAX: u32 = 1 << 16;

/// One record per tile touched by a point.
#[repr(C)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Point {
    key: [u32; 2],
    index: u32,
}

impl Ord for Point {
    fn cmp(
        &self,
        other: &Self,
    ) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

impl PartialOrd for Point {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Returns the bit length of the flattened tile count.
#[inline]
pub const fn tile_bits(
    tile_count_x: u32,
    tile_count_y: u32,
) -> u32 {
    u32::BITS - (tile_count_x * tile_count_y).leading_zeros()
}

/// Ranking the points.
///
/// Each visible point emits one record per tile its bounding disc
/// covers. After the sort, records sharing `(camera, tile)` are
/// contiguous and depth is non-decreasing inside each run, which the
/// rasterization stage relies on.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
) -> Outputs {
    // Specifying the parameters

    let point_count = arguments.point_count as usize;
    let pair_count =
        arguments.camera_count as usize * point_count;
    let tile_count_x = arguments.tile_count_x;
    let tile_count_y = arguments.tile_count_y;
    let tile_bits = tile_bits(tile_count_x, tile_count_y);

    debug_assert_eq!(inputs.projections.len(), pair_count);
    debug_assert!(tile_count_x * tile_count_y <= TILE_COUNT_MAX);

    // [C, P] — the tile bounds `[x_min, x_max, y_min, y_max]` per pair

    let tile_bounds = inputs
        .projections
        .iter()
        .map(|projection| {
            tile_bounds(
                projection,
                tile_count_x,
                tile_count_y,
                arguments.tile_size_x,
                arguments.tile_size_y,
            )
        })
        .collect::<Vec<_>>();

    // [C, P] — exclusive record offsets per pair

    let tile_touched_offsets = tile_bounds
        .iter()
        .map(|&[x_min, x_max, y_min, y_max]| {
            (x_max - x_min) * (y_max - y_min)
        })
        .scan(0, |state, count| {
            let offset = *state;
            *state += count;
            Some(offset)
        })
        .collect::<Vec<u32>>();

    // T
    let tile_touched_count = match pair_count {
        0 => 0,
        _ => {
            let &[x_min, x_max, y_min, y_max] = tile_bounds.last().unwrap();
            (tile_touched_offsets.last().unwrap()
                + (x_max - x_min) * (y_max - y_min)) as usize
        },
    };

    // [C, P] (f32 -> u32)
    let depth_orders = bytemuck::cast_vec::<f32, u32>(
        inputs
            .projections
            .iter()
            .map(|projection| {
                // Visible depths lie past the near plane, so the raw bit
                // pattern sorts ascending.
                debug_assert!(
                    !projection.is_visible() || projection.depth >= 0.0
                );
                projection.depth
            })
            .collect(),
    );

    // [T]
    let mut points = (0..pair_count).fold(
        vec![
            Point {
                key: [0, 0],
                index: 0,
            };
            tile_touched_count
        ],
        |mut points, index| {
            let [x_min, x_max, y_min, y_max] = tile_bounds[index];
            let camera = (index / point_count) as u32;
            let mut offset = tile_touched_offsets[index] as usize;

            for tile_y in y_min..y_max {
                for tile_x in x_min..x_max {
                    let tile = tile_y * tile_count_x + tile_x;
                    points[offset] = Point {
                        key: [
                            camera << tile_bits | tile,
                            depth_orders[index],
                        ],
                        index: index as u32,
                    };
                    offset += 1;
                }
            }

            points
        },
    );

    // Sorting the records by camera, tile, and depth at once

    points.par_sort_unstable();

    let (point_orders, point_indices) = points
        .into_iter()
        .map(|point| (point.key, point.index))
        .unzip::<_, _, Vec<_>, Vec<_>>();

    Outputs {
        point_indices,
        point_orders,
    }
}

/// Returns the clamped tile bounds `[x_min, x_max, y_min, y_max]`
/// covered by the point's bounding disc. Culled points cover no tile.
fn tile_bounds(
    projection: &ProjectedGaussian,
    tile_count_x: u32,
    tile_count_y: u32,
    tile_size_x: u32,
    tile_size_y: u32,
) -> [u32; 4] {
    if !projection.is_visible() {
        return [0, 0, 0, 0];
    }

    let radius = projection.radius as f32;
    let clamp = |value: f32, count: u32| {
        (value.max(0.0) as u32).min(count)
    };

    [
        clamp(
            ((projection.position_2d.x - radius) / tile_size_x as f32)
                .floor(),
            tile_count_x,
        ),
        clamp(
            ((projection.position_2d.x + radius) / tile_size_x as f32)
                .ceil(),
            tile_count_x,
        ),
        clamp(
            ((projection.position_2d.y - radius) / tile_size_y as f32)
                .floor(),
            tile_count_y,
        ),
        clamp(
            ((projection.position_2d.y + radius) / tile_size_y as f32)
                .ceil(),
            tile_count_y,
        ),
    ]
}
