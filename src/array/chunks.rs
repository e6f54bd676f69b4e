//! Chunk grid arithmetic.

use super::Region;

/// Target number of elements per chunk when no chunk shape is given.
const DEFAULT_CHUNK_ELEMENTS: usize = 1 << 20;

/// Picks a chunk shape for `shape`: the trailing two dimensions are tiled,
/// leading dimensions are chunked one plane at a time.
pub fn default_chunk_shape(shape: &[usize]) -> Vec<usize> {
    let n = shape.len();
    let side = (DEFAULT_CHUNK_ELEMENTS as f64).sqrt() as usize;
    shape
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            if i + 2 >= n {
                len.clamp(1, side)
            } else {
                1
            }
        })
        .collect()
}

/// Number of chunks along each dimension.
pub fn grid_shape(shape: &[usize], chunks: &[usize]) -> Vec<usize> {
    shape
        .iter()
        .zip(chunks)
        .map(|(&len, &c)| len.div_ceil(c.max(1)))
        .collect()
}

/// Index region covered by the chunk at grid position `coord`, clipped to
/// the array bounds.
pub fn chunk_region(coord: &[usize], chunks: &[usize], shape: &[usize]) -> Region {
    Region::new(
        coord
            .iter()
            .zip(chunks)
            .zip(shape)
            .map(|((&i, &c), &len)| {
                let start = i * c;
                start..(start + c).min(len)
            })
            .collect(),
    )
}

/// Grid positions of every chunk overlapping `region`, in C order.
pub fn chunks_intersecting(region: &Region, chunks: &[usize]) -> Vec<Vec<usize>> {
    if region.is_empty() {
        return Vec::new();
    }
    let spans: Vec<(usize, usize)> = region
        .ranges
        .iter()
        .zip(chunks)
        .map(|(r, &c)| (r.start / c, (r.end - 1) / c + 1))
        .collect();
    let mut out = Vec::new();
    let mut cursor: Vec<usize> = spans.iter().map(|s| s.0).collect();
    loop {
        out.push(cursor.clone());
        let mut dim = cursor.len();
        loop {
            if dim == 0 {
                return out;
            }
            dim -= 1;
            cursor[dim] += 1;
            if cursor[dim] < spans[dim].1 {
                break;
            }
            cursor[dim] = spans[dim].0;
        }
    }
}

/// Key of a chunk relative to its array in the default zarr v3 encoding,
/// e.g. `"c/0/3/1"`.
pub fn chunk_key(coord: &[usize]) -> String {
    coord.iter().fold(String::from("c"), |mut key, i| {
        key.push('/');
        key.push_str(&i.to_string());
        key
    })
}
