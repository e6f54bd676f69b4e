//! Chunked N-dimensional raster arrays.
//!
//! The crate does not do array math itself. It only needs shape, dtype and
//! chunk-aligned region reads, which is what [`ChunkedArray`] exposes. Two
//! implementations ship with the crate: [`InMemoryArray`] for data built in
//! process and `store::StoredArray` for data backed by a zarr array in a store.

mod chunks;

pub use chunks::{chunk_key, chunk_region, chunks_intersecting, default_chunk_shape, grid_shape};

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use crate::error::{Result, SpatialDataError};
use crate::model::LoadState;

/// Element type of a raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Returns true for integer dtypes (required for label rasters).
    pub fn is_integer(&self) -> bool {
        !matches!(self, DType::F32 | DType::F64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::U8 => "u8",
            DType::U16 => "u16",
            DType::U32 => "u32",
            DType::U64 => "u64",
            DType::I32 => "i32",
            DType::I64 => "i64",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", name)
    }
}

/// A flat, typed element buffer.
#[derive(Clone, Debug, PartialEq)]
pub enum ArrayBuffer {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
    U64(Vec<u64>),
    I32(Vec<i32>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! each_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            ArrayBuffer::U8($v) => $body,
            ArrayBuffer::U16($v) => $body,
            ArrayBuffer::U32($v) => $body,
            ArrayBuffer::U64($v) => $body,
            ArrayBuffer::I32($v) => $body,
            ArrayBuffer::I64($v) => $body,
            ArrayBuffer::F32($v) => $body,
            ArrayBuffer::F64($v) => $body,
        }
    };
}

macro_rules! map_buffer {
    ($buf:expr, $v:ident => $body:expr) => {
        match $buf {
            ArrayBuffer::U8($v) => ArrayBuffer::U8($body),
            ArrayBuffer::U16($v) => ArrayBuffer::U16($body),
            ArrayBuffer::U32($v) => ArrayBuffer::U32($body),
            ArrayBuffer::U64($v) => ArrayBuffer::U64($body),
            ArrayBuffer::I32($v) => ArrayBuffer::I32($body),
            ArrayBuffer::I64($v) => ArrayBuffer::I64($body),
            ArrayBuffer::F32($v) => ArrayBuffer::F32($body),
            ArrayBuffer::F64($v) => ArrayBuffer::F64($body),
        }
    };
}

impl ArrayBuffer {
    /// Creates a zero-filled buffer.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::U8 => ArrayBuffer::U8(vec![0; len]),
            DType::U16 => ArrayBuffer::U16(vec![0; len]),
            DType::U32 => ArrayBuffer::U32(vec![0; len]),
            DType::U64 => ArrayBuffer::U64(vec![0; len]),
            DType::I32 => ArrayBuffer::I32(vec![0; len]),
            DType::I64 => ArrayBuffer::I64(vec![0; len]),
            DType::F32 => ArrayBuffer::F32(vec![0.0; len]),
            DType::F64 => ArrayBuffer::F64(vec![0.0; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            ArrayBuffer::U8(_) => DType::U8,
            ArrayBuffer::U16(_) => DType::U16,
            ArrayBuffer::U32(_) => DType::U32,
            ArrayBuffer::U64(_) => DType::U64,
            ArrayBuffer::I32(_) => DType::I32,
            ArrayBuffer::I64(_) => DType::I64,
            ArrayBuffer::F32(_) => DType::F32,
            ArrayBuffer::F64(_) => DType::F64,
        }
    }

    pub fn len(&self) -> usize {
        each_buffer!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Picks the elements at `indices`, in order.
    pub fn gather(&self, indices: &[usize]) -> ArrayBuffer {
        map_buffer!(self, v => indices.iter().map(|&i| v[i]).collect())
    }

    /// Copies `src[src_indices[k]]` into `self[dst_indices[k]]` for every `k`.
    pub fn scatter_from(
        &mut self,
        dst_indices: &[usize],
        src: &ArrayBuffer,
        src_indices: &[usize],
    ) -> Result<()> {
        macro_rules! copy {
            ($($variant:ident),*) => {
                match (self, src) {
                    $((ArrayBuffer::$variant(d), ArrayBuffer::$variant(s)) => {
                        for (&di, &si) in dst_indices.iter().zip(src_indices) {
                            d[di] = s[si];
                        }
                        Ok(())
                    })*
                    (d, s) => Err(SpatialDataError::invalid_element(
                        "<array>",
                        format!("cannot copy {} data into a {} buffer", s.dtype(), d.dtype()),
                    )),
                }
            };
        }
        copy!(U8, U16, U32, U64, I32, I64, F32, F64)
    }

    /// Reads one element as `f64`.
    pub fn get_f64(&self, index: usize) -> f64 {
        each_buffer!(self, v => v[index] as f64)
    }

    /// Reads one element as `i64`, truncating floats.
    pub fn get_i64(&self, index: usize) -> i64 {
        each_buffer!(self, v => v[index] as i64)
    }
}

/// A hyper-rectangular, half-open index region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub ranges: Vec<Range<usize>>,
}

impl Region {
    pub fn new(ranges: Vec<Range<usize>>) -> Self {
        Self { ranges }
    }

    /// The region covering a whole array of `shape`.
    pub fn full(shape: &[usize]) -> Self {
        Self {
            ranges: shape.iter().map(|&n| 0..n).collect(),
        }
    }

    /// Extent along each dimension.
    pub fn shape(&self) -> Vec<usize> {
        self.ranges.iter().map(|r| r.end.saturating_sub(r.start)).collect()
    }

    pub fn ndim(&self) -> usize {
        self.ranges.len()
    }

    /// Number of elements inside the region.
    pub fn num_elements(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.num_elements() == 0
    }

    /// Returns true if the region lies within an array of `shape`.
    pub fn fits(&self, shape: &[usize]) -> bool {
        self.ranges.len() == shape.len()
            && self
                .ranges
                .iter()
                .zip(shape)
                .all(|(r, &n)| r.start <= r.end && r.end <= n)
    }

    /// Intersection of two regions of equal rank.
    pub fn intersect(&self, other: &Region) -> Region {
        Region {
            ranges: self
                .ranges
                .iter()
                .zip(&other.ranges)
                .map(|(a, b)| {
                    let start = a.start.max(b.start);
                    let end = a.end.min(b.end).max(start);
                    start..end
                })
                .collect(),
        }
    }

    /// Flat C-order indices of every element of the region inside an array
    /// of `shape`.
    pub fn flat_indices(&self, shape: &[usize]) -> Vec<usize> {
        let n = self.num_elements();
        if n == 0 {
            return Vec::new();
        }
        let strides = strides(shape);
        let mut out = Vec::with_capacity(n);
        let mut cursor: Vec<usize> = self.ranges.iter().map(|r| r.start).collect();
        loop {
            out.push(cursor.iter().zip(&strides).map(|(i, s)| i * s).sum());
            let mut dim = cursor.len();
            loop {
                if dim == 0 {
                    return out;
                }
                dim -= 1;
                cursor[dim] += 1;
                if cursor[dim] < self.ranges[dim].end {
                    break;
                }
                cursor[dim] = self.ranges[dim].start;
            }
        }
    }

    /// Shifts the region so it is expressed relative to `origin`.
    pub fn relative_to(&self, origin: &[usize]) -> Region {
        Region {
            ranges: self
                .ranges
                .iter()
                .zip(origin)
                .map(|(r, &o)| r.start - o..r.end - o)
                .collect(),
        }
    }
}

/// C-order strides for `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

/// A dense array held in memory, in C order.
#[derive(Clone, Debug, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayBuffer,
}

impl NdArray {
    /// Wraps a buffer, checking its length against `shape`.
    pub fn new(shape: Vec<usize>, data: ArrayBuffer) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(SpatialDataError::invalid_element(
                "<array>",
                format!(
                    "shape {:?} needs {} elements, buffer has {}",
                    shape,
                    expected,
                    data.len()
                ),
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: Vec<usize>, dtype: DType) -> Self {
        let n = shape.iter().product();
        Self {
            shape,
            data: ArrayBuffer::zeros(dtype, n),
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    pub fn data(&self) -> &ArrayBuffer {
        &self.data
    }

    pub fn into_data(self) -> ArrayBuffer {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Flat index of a multi-dimensional index.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        index
            .iter()
            .zip(strides(&self.shape))
            .map(|(i, s)| i * s)
            .sum()
    }

    /// Copies out a sub-region.
    pub fn crop(&self, region: &Region) -> Result<NdArray> {
        if !region.fits(&self.shape) {
            return Err(SpatialDataError::InvalidQuery {
                reason: format!("region {:?} outside array of shape {:?}", region.ranges, self.shape),
            });
        }
        let indices = region.flat_indices(&self.shape);
        Ok(NdArray {
            shape: region.shape(),
            data: self.data.gather(&indices),
        })
    }

    /// Distinct values of an integer array.
    pub fn unique_i64(&self) -> BTreeSet<i64> {
        (0..self.data.len()).map(|i| self.data.get_i64(i)).collect()
    }

    /// Mutable access for assembling arrays chunk by chunk.
    pub(crate) fn data_mut(&mut self) -> &mut ArrayBuffer {
        &mut self.data
    }
}

/// Read access to a chunked N-dimensional array.
///
/// Region reads may be served from any number of chunks in any order; the
/// caller only sees the assembled result.
pub trait ChunkedArray: fmt::Debug + Send + Sync {
    fn shape(&self) -> &[usize];

    fn dtype(&self) -> DType;

    fn chunk_shape(&self) -> &[usize];

    /// Reads the elements of `region`, touching only the chunks it overlaps.
    fn read_region(&self, region: &Region) -> Result<NdArray>;

    /// Whether bulk data is resident. Never triggers a load.
    fn load_state(&self) -> LoadState {
        LoadState::Loaded
    }

    /// Reads the whole array.
    fn read_all(&self) -> Result<NdArray> {
        self.read_region(&Region::full(self.shape()))
    }
}

/// A [`ChunkedArray`] over data held in memory.
#[derive(Clone, Debug, PartialEq)]
pub struct InMemoryArray {
    array: NdArray,
    chunks: Vec<usize>,
}

impl InMemoryArray {
    /// Wraps an array using the default chunk shape.
    pub fn new(array: NdArray) -> Self {
        let chunks = default_chunk_shape(array.shape());
        Self { array, chunks }
    }

    /// Wraps an array with an explicit chunk shape.
    pub fn with_chunks(array: NdArray, chunks: Vec<usize>) -> Result<Self> {
        if chunks.len() != array.shape().len() || chunks.iter().any(|&c| c == 0) {
            return Err(SpatialDataError::invalid_element(
                "<array>",
                format!("invalid chunk shape {:?} for shape {:?}", chunks, array.shape()),
            ));
        }
        Ok(Self { array, chunks })
    }

    pub fn array(&self) -> &NdArray {
        &self.array
    }
}

impl ChunkedArray for InMemoryArray {
    fn shape(&self) -> &[usize] {
        self.array.shape()
    }

    fn dtype(&self) -> DType {
        self.array.dtype()
    }

    fn chunk_shape(&self) -> &[usize] {
        &self.chunks
    }

    fn read_region(&self, region: &Region) -> Result<NdArray> {
        self.array.crop(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: Vec<usize>) -> NdArray {
        let n: usize = shape.iter().product();
        NdArray::new(shape, ArrayBuffer::U16((0..n as u16).collect())).unwrap()
    }

    #[test]
    fn test_shape_must_match_buffer() {
        assert!(NdArray::new(vec![2, 3], ArrayBuffer::U8(vec![0; 5])).is_err());
    }

    #[test]
    fn test_crop() {
        let a = ramp(vec![3, 4]);
        let c = a.crop(&Region::new(vec![1..3, 1..3])).unwrap();
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &ArrayBuffer::U16(vec![5, 6, 9, 10]));
    }

    #[test]
    fn test_crop_out_of_bounds_fails() {
        let a = ramp(vec![3, 4]);
        assert!(a.crop(&Region::new(vec![0..4, 0..1])).is_err());
    }

    #[test]
    fn test_empty_region() {
        let a = ramp(vec![3, 4]);
        let c = a.crop(&Region::new(vec![1..1, 0..4])).unwrap();
        assert!(c.is_empty());
        assert_eq!(c.shape(), &[0, 4]);
    }

    #[test]
    fn test_unique_values() {
        let a = NdArray::new(vec![2, 2], ArrayBuffer::U32(vec![0, 3, 3, 7])).unwrap();
        assert_eq!(a.unique_i64().into_iter().collect::<Vec<_>>(), vec![0, 3, 7]);
    }

    #[test]
    fn test_scatter_rejects_dtype_mismatch() {
        let mut dst = ArrayBuffer::zeros(DType::U8, 2);
        let src = ArrayBuffer::F32(vec![1.0, 2.0]);
        assert!(dst.scatter_from(&[0, 1], &src, &[0, 1]).is_err());
    }
}
