//! Segmenting the points into tiles.

use super::rank::tile_bits;
use std::ops::Range;

/// Arguments.
#[derive(Clone, Copy, Debug)]
pub struct Arguments {
    /// `C`
    pub camera_count: u32,
    /// `I_x / T_x`
    pub tile_count_x: u32,
    /// `I_y / T_y`
    pub tile_count_y: u32,
}

/// Inputs.
#[derive(Clone, Copy, Debug)]
pub struct Inputs<'a> {
    /// `[T]`
    pub point_orders: &'a [[u32; 2]],
}

/// Outputs.
#[derive(Clone, Debug)]
pub struct Outputs {
    /// `[C * (I_y / T_y) * (I_x / T_x) + 1]` — exclusive start offsets
    /// into the sorted records, closed by the total record count.
    pub tile_point_offsets: Vec<u32>,
}

impl Outputs {
    /// Returns the record range of the flattened `(camera, tile)` bucket.
    #[inline]
    pub fn tile_point_range(
        &self,
        bucket: usize,
    ) -> Range<usize> {
        self.tile_point_offsets[bucket] as usize
            ..self.tile_point_offsets[bucket + 1] as usize
    }
}

/// Segmenting the points into tiles.
///
/// The record stream is already grouped by its sorted keys, so the
/// bucket counts come from one run-length pass over the high key words.
/// An exclusive prefix sum then turns the counts into range boundaries:
/// the bucket `i` owns `offsets[i]..offsets[i + 1]`, and the ranges
/// partition the stream with empty tiles holding empty ranges.
pub fn main(
    arguments: Arguments,
    inputs: Inputs,
) -> Outputs {
    // Specifying the parameters

    let tile_count =
        (arguments.tile_count_x * arguments.tile_count_y) as usize;
    let bucket_count = arguments.camera_count as usize * tile_count;
    let tile_bits =
        tile_bits(arguments.tile_count_x, arguments.tile_count_y);
    let tile_mask = (1 << tile_bits) - 1;
    let point_orders = inputs.point_orders;

    // [C * (I_y / T_y) * (I_x / T_x)]
    let mut tile_point_counts = vec![0_u32; bucket_count];

    // Scanning the runs of equal high key words

    let mut run_start = 0;
    for index in 1..=point_orders.len() {
        if index != point_orders.len()
            && point_orders[index][0] == point_orders[run_start][0]
        {
            continue;
        }

        let key = point_orders[run_start][0];
        let camera = (key >> tile_bits) as usize;
        let tile = (key & tile_mask) as usize;
        tile_point_counts[camera * tile_count + tile] =
            (index - run_start) as u32;
        run_start = index;
    }

    // [C * (I_y / T_y) * (I_x / T_x) + 1]
    let mut tile_point_offsets = Vec::with_capacity(bucket_count + 1);
    let mut total = 0;
    for &count in &tile_point_counts {
        tile_point_offsets.push(total);
        total += count;
    }
    tile_point_offsets.push(total);

    Outputs { tile_point_offsets }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_partition_the_stream() {
        let arguments = Arguments {
            camera_count: 2,
            tile_count_x: 2,
            tile_count_y: 2,
        };
        let tile_bits = tile_bits(2, 2);

        // Camera 0: tiles 0, 0, 2. Camera 1: tiles 1, 3, 3, 3.
        let point_orders = [
            [0, 10],
            [0, 20],
            [2, 5],
            [1 << tile_bits | 1, 7],
            [1 << tile_bits | 3, 1],
            [1 << tile_bits | 3, 2],
            [1 << tile_bits | 3, 3],
        ];

        let output = main(
            arguments,
            Inputs {
                point_orders: &point_orders,
            },
        );

        assert_eq!(
            output.tile_point_offsets,
            vec![0, 2, 2, 3, 3, 3, 4, 4, 7]
        );
        assert_eq!(output.tile_point_range(0), 0..2);
        assert_eq!(output.tile_point_range(1), 2..2);
        assert_eq!(output.tile_point_range(2), 2..3);
        assert_eq!(output.tile_point_range(3), 3..3);
        assert_eq!(output.tile_point_range(4 + 3), 4..7);

        // The range lengths sum to the record count.
        let total: usize = (0..8)
            .map(|bucket| output.tile_point_range(bucket).len())
            .sum();
        assert_eq!(total, point_orders.len());
    }

    #[test]
    fn empty_stream_yields_empty_ranges() {
        let output = main(
            Arguments {
                camera_count: 1,
                tile_count_x: 2,
                tile_count_y: 1,
            },
            Inputs { point_orders: &[] },
        );

        assert_eq!(output.tile_point_offsets, vec![0, 0, 0]);
        assert_eq!(output.tile_point_range(0), 0..0);
        assert_eq!(output.tile_point_range(1), 0..0);
    }
}
