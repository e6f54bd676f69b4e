//! Element payloads as zarr arrays.
//!
//! Rasters, point coordinates and instance ids are numeric arrays written
//! chunk by chunk. A table is one 1-d array per column; categorical columns
//! store their `u32` codes and keep the categories in the element record.
//! Every array checksums its chunks with the crc32c codec, so a damaged
//! chunk fails to decode instead of yielding wrong values.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

use tracing::trace;
use zarrs::array::chunk_grid::ChunkGrid;
use zarrs::array::codec::{BytesToBytesCodecTraits, Crc32cCodec};
use zarrs::array::{Array, ArrayBuilder, ArrayError, DataType, FillValue};
use zarrs::array_subset::ArraySubset;
use zarrs::storage::ReadableWritableListableStorageTraits;

use super::backend::{join, node_path, HierarchicalStore};
use super::metadata::ColumnRecord;
use crate::array::{chunk_key, chunk_region, chunks_intersecting, ArrayBuffer, ChunkedArray, DType, NdArray, Region};
use crate::error::{Result, SpatialDataError};
use crate::model::{Column, ColumnType, ColumnarTable, Lazy, LoadState};

type ZarrArray = Array<dyn ReadableWritableListableStorageTraits>;

fn zarr_data_type(dtype: DType) -> (DataType, FillValue) {
    match dtype {
        DType::U8 => (DataType::UInt8, FillValue::from(0u8)),
        DType::U16 => (DataType::UInt16, FillValue::from(0u16)),
        DType::U32 => (DataType::UInt32, FillValue::from(0u32)),
        DType::U64 => (DataType::UInt64, FillValue::from(0u64)),
        DType::I32 => (DataType::Int32, FillValue::from(0i32)),
        DType::I64 => (DataType::Int64, FillValue::from(0i64)),
        DType::F32 => (DataType::Float32, FillValue::from(0.0f32)),
        DType::F64 => (DataType::Float64, FillValue::from(0.0f64)),
    }
}

fn dtype_of(data_type: &DataType, location: &str) -> Result<DType> {
    Ok(match data_type {
        DataType::UInt8 => DType::U8,
        DataType::UInt16 => DType::U16,
        DataType::UInt32 => DType::U32,
        DataType::UInt64 => DType::U64,
        DataType::Int32 => DType::I32,
        DataType::Int64 => DType::I64,
        DataType::Float32 => DType::F32,
        DataType::Float64 => DType::F64,
        other => {
            return Err(SpatialDataError::incompatible(
                location,
                format!("unsupported array data type {:?}", other),
            ))
        }
    })
}

/// Creates the array at `path` and stores its metadata.
fn create_array(
    store: &dyn HierarchicalStore,
    path: &str,
    shape: &[usize],
    chunks: &[usize],
    data_type: DataType,
    fill_value: FillValue,
) -> Result<ZarrArray> {
    if chunks.len() != shape.len() {
        return Err(SpatialDataError::incompatible(
            path,
            format!("chunk shape {:?} does not fit array shape {:?}", chunks, shape),
        ));
    }
    let grid: Vec<NonZeroU64> = chunks
        .iter()
        .map(|&c| NonZeroU64::new(c as u64))
        .collect::<Option<_>>()
        .ok_or_else(|| SpatialDataError::incompatible(path, format!("chunk shape {:?} has a zero extent", chunks)))?;
    let checksum: Arc<dyn BytesToBytesCodecTraits> = Arc::new(Crc32cCodec::new());
    let array = ArrayBuilder::new(
        shape.iter().map(|&n| n as u64).collect(),
        data_type,
        ChunkGrid::from(grid),
        fill_value,
    )
    .bytes_to_bytes_codecs(vec![checksum])
    .build(store.storage(), &node_path(path))
    .map_err(|e| SpatialDataError::zarr(path, e))?;
    array.store_metadata().map_err(|e| SpatialDataError::zarr(path, e))?;
    Ok(array)
}

fn subset_of(region: &Region) -> ArraySubset {
    let ranges: Vec<_> = region.ranges.iter().map(|r| r.start as u64..r.end as u64).collect();
    ArraySubset::new_with_ranges(&ranges)
}

fn store_subset(array: &ZarrArray, subset: &ArraySubset, data: &ArrayBuffer) -> std::result::Result<(), ArrayError> {
    match data {
        ArrayBuffer::U8(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::U16(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::U32(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::U64(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::I32(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::I64(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::F32(v) => array.store_array_subset_elements(subset, v.as_slice()),
        ArrayBuffer::F64(v) => array.store_array_subset_elements(subset, v.as_slice()),
    }
}

/// Decodes one whole chunk. Edge chunks come back at full chunk size.
fn retrieve_chunk(array: &ZarrArray, dtype: DType, indices: &[u64]) -> std::result::Result<ArrayBuffer, ArrayError> {
    Ok(match dtype {
        DType::U8 => ArrayBuffer::U8(array.retrieve_chunk_elements(indices)?),
        DType::U16 => ArrayBuffer::U16(array.retrieve_chunk_elements(indices)?),
        DType::U32 => ArrayBuffer::U32(array.retrieve_chunk_elements(indices)?),
        DType::U64 => ArrayBuffer::U64(array.retrieve_chunk_elements(indices)?),
        DType::I32 => ArrayBuffer::I32(array.retrieve_chunk_elements(indices)?),
        DType::I64 => ArrayBuffer::I64(array.retrieve_chunk_elements(indices)?),
        DType::F32 => ArrayBuffer::F32(array.retrieve_chunk_elements(indices)?),
        DType::F64 => ArrayBuffer::F64(array.retrieve_chunk_elements(indices)?),
    })
}

/// Writes `source` as a zarr array at `path`, one chunk at a time, keeping
/// the source's chunk shape.
pub fn write_array(store: &dyn HierarchicalStore, path: &str, source: &dyn ChunkedArray) -> Result<()> {
    let shape = source.shape();
    let chunks = source.chunk_shape();
    let (data_type, fill_value) = zarr_data_type(source.dtype());
    let array = create_array(store, path, shape, chunks, data_type, fill_value)?;
    let grid = chunks_intersecting(&Region::full(shape), chunks);
    for coord in &grid {
        let region = chunk_region(coord, chunks, shape);
        let chunk = source.read_region(&region)?;
        store_subset(&array, &subset_of(&region), chunk.data())
            .map_err(|e| SpatialDataError::zarr(join(path, &chunk_key(coord)), e))?;
    }
    trace!(path, chunks = grid.len(), "wrote array");
    Ok(())
}

#[derive(Clone, Debug)]
struct ArrayLayout {
    shape: Vec<usize>,
    chunks: Vec<usize>,
    dtype: DType,
}

/// Reads `region` of a stored array, decoding only the chunks it overlaps.
fn read_chunks(array: &ZarrArray, path: &str, layout: &ArrayLayout, region: &Region) -> Result<NdArray> {
    let mut out = NdArray::zeros(region.shape(), layout.dtype);
    let origin: Vec<usize> = region.ranges.iter().map(|r| r.start).collect();
    for coord in chunks_intersecting(region, &layout.chunks) {
        let indices: Vec<u64> = coord.iter().map(|&i| i as u64).collect();
        let data = retrieve_chunk(array, layout.dtype, &indices)
            .map_err(|e| SpatialDataError::zarr(join(path, &chunk_key(&coord)), e))?;
        let bounds = chunk_region(&coord, &layout.chunks, &layout.shape);
        let overlap = region.intersect(&bounds);
        let chunk_origin: Vec<usize> = bounds.ranges.iter().map(|r| r.start).collect();
        let src = overlap.relative_to(&chunk_origin).flat_indices(&layout.chunks);
        let dst = overlap.relative_to(&origin).flat_indices(&region.shape());
        out.data_mut().scatter_from(&dst, &data, &src)?;
    }
    Ok(out)
}

/// A chunked array backed by a zarr array in a store.
///
/// Region reads decode chunks on demand. A whole-array read loads the array
/// once and later reads are served from memory.
#[derive(Clone)]
pub struct StoredArray {
    array: Arc<ZarrArray>,
    path: String,
    layout: ArrayLayout,
    cache: Lazy<NdArray>,
}

impl StoredArray {
    /// Opens the array at `path`. Only its metadata is read.
    ///
    /// # Errors
    /// `Zarr` if there is no readable array at `path`, `IncompatibleFormat`
    /// for data types the crate does not model.
    pub fn open(store: &dyn HierarchicalStore, path: &str) -> Result<Self> {
        let array = Array::open(store.storage(), &node_path(path)).map_err(|e| SpatialDataError::zarr(path, e))?;
        let dtype = dtype_of(array.data_type(), path)?;
        let shape: Vec<usize> = array.shape().iter().map(|&n| n as usize).collect();
        // An empty array has no chunk to ask for; any chunk shape reads it.
        let chunks: Vec<usize> = if shape.iter().any(|&n| n == 0) {
            vec![1; shape.len()]
        } else {
            array
                .chunk_shape(&vec![0; shape.len()])
                .map_err(|e| SpatialDataError::zarr(path, e))?
                .iter()
                .map(|c| c.get() as usize)
                .collect()
        };
        let layout = ArrayLayout { shape, chunks, dtype };
        let array = Arc::new(array);
        let cache = {
            let array = Arc::clone(&array);
            let path = path.to_string();
            let layout = layout.clone();
            Lazy::deferred(move || read_chunks(&array, &path, &layout, &Region::full(&layout.shape)))
        };
        Ok(Self {
            array,
            path: path.to_string(),
            layout,
            cache,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Debug for StoredArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredArray")
            .field("path", &self.path)
            .field("shape", &self.layout.shape)
            .field("chunks", &self.layout.chunks)
            .field("dtype", &self.layout.dtype)
            .field("state", &self.cache.state())
            .finish()
    }
}

impl ChunkedArray for StoredArray {
    fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    fn dtype(&self) -> DType {
        self.layout.dtype
    }

    fn chunk_shape(&self) -> &[usize] {
        &self.layout.chunks
    }

    fn read_region(&self, region: &Region) -> Result<NdArray> {
        if !region.fits(&self.layout.shape) {
            return Err(SpatialDataError::InvalidQuery {
                reason: format!(
                    "region {:?} outside array of shape {:?}",
                    region.ranges, self.layout.shape
                ),
            });
        }
        if self.cache.is_loaded() {
            return self.cache.get()?.crop(region);
        }
        read_chunks(&self.array, &self.path, &self.layout, region)
    }

    fn load_state(&self) -> LoadState {
        self.cache.state()
    }

    fn read_all(&self) -> Result<NdArray> {
        Ok((*self.cache.get()?).clone())
    }
}

fn write_column(store: &dyn HierarchicalStore, path: &str, column: &Column, chunk_len: usize) -> Result<()> {
    let shape = [column.len()];
    let chunks = [chunk_len.max(1)];
    let subset = ArraySubset::new_with_ranges(&[0..column.len() as u64]);
    let stored = match column {
        Column::Int(values) => create_array(store, path, &shape, &chunks, DataType::Int64, FillValue::from(0i64))?
            .store_array_subset_elements(&subset, values.as_slice()),
        Column::Float(values) => {
            create_array(store, path, &shape, &chunks, DataType::Float64, FillValue::from(0.0f64))?
                .store_array_subset_elements(&subset, values.as_slice())
        }
        Column::Str(values) => create_array(store, path, &shape, &chunks, DataType::String, FillValue::from(""))?
            .store_array_subset_elements::<String>(&subset, values.as_slice()),
        Column::Categorical { codes, .. } => {
            create_array(store, path, &shape, &chunks, DataType::UInt32, FillValue::from(0u32))?
                .store_array_subset_elements(&subset, codes.as_slice())
        }
    };
    stored.map_err(|e| SpatialDataError::zarr(path, e))
}

/// Writes every column of `table` as an array below `path`, returning the
/// schema needed to read them back.
pub fn write_table(
    store: &dyn HierarchicalStore,
    path: &str,
    table: &ColumnarTable,
    chunk_len: usize,
) -> Result<Vec<ColumnRecord>> {
    let mut schema = Vec::with_capacity(table.n_columns());
    for (i, (name, column)) in table.columns().enumerate() {
        write_column(store, &join(path, &i.to_string()), column, chunk_len)?;
        schema.push(ColumnRecord {
            name: name.to_string(),
            column_type: column.column_type(),
            categories: match column {
                Column::Categorical { categories, .. } => categories.clone(),
                _ => Vec::new(),
            },
        });
    }
    trace!(path, columns = schema.len(), rows = table.n_rows(), "wrote table");
    Ok(schema)
}

/// Reads a table written by [`write_table`].
///
/// # Errors
/// `Zarr` for missing columns or columns whose stored type disagrees with
/// the schema, `IncompatibleFormat` for out-of-range category codes or
/// ragged columns.
pub fn read_table(store: &dyn HierarchicalStore, path: &str, schema: &[ColumnRecord]) -> Result<ColumnarTable> {
    let mut table = ColumnarTable::new();
    for (i, record) in schema.iter().enumerate() {
        let column_path = join(path, &i.to_string());
        let zarr_err = |e: ArrayError| SpatialDataError::zarr(&column_path, e);
        let array = Array::open(store.storage(), &node_path(&column_path))
            .map_err(|e| SpatialDataError::zarr(&column_path, e))?;
        if array.shape().len() != 1 {
            return Err(SpatialDataError::incompatible(
                &column_path,
                format!("column '{}' is stored with shape {:?}", record.name, array.shape()),
            ));
        }
        let all = array.subset_all();
        let column = match record.column_type {
            ColumnType::Int => Column::Int(array.retrieve_array_subset_elements(&all).map_err(zarr_err)?),
            ColumnType::Float => Column::Float(array.retrieve_array_subset_elements(&all).map_err(zarr_err)?),
            ColumnType::Str => Column::Str(array.retrieve_array_subset_elements(&all).map_err(zarr_err)?),
            ColumnType::Categorical => {
                let codes: Vec<u32> = array.retrieve_array_subset_elements(&all).map_err(zarr_err)?;
                if let Some(bad) = codes.iter().find(|&&c| c as usize >= record.categories.len()) {
                    return Err(SpatialDataError::incompatible(
                        &column_path,
                        format!(
                            "column '{}' holds code {} but has {} categories",
                            record.name,
                            bad,
                            record.categories.len()
                        ),
                    ));
                }
                Column::Categorical {
                    categories: record.categories.clone(),
                    codes,
                }
            }
        };
        table = table
            .with_column(record.name.clone(), column)
            .map_err(|e| SpatialDataError::incompatible(path, e.to_string()))?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::InMemoryArray;
    use crate::error::ErrorKind;
    use crate::store::MemoryStore;

    fn ramp(shape: Vec<usize>) -> NdArray {
        let n: usize = shape.iter().product();
        NdArray::new(shape, ArrayBuffer::U16((0..n as u16).collect())).unwrap()
    }

    #[test]
    fn test_region_reads_touch_only_overlapping_chunks() {
        let store = MemoryStore::new();
        let source = InMemoryArray::with_chunks(ramp(vec![10, 10]), vec![4, 4]).unwrap();
        write_array(&store, "a", &source).unwrap();

        let stored = StoredArray::open(&store, "a").unwrap();
        assert_eq!(stored.shape(), &[10, 10]);
        assert_eq!(stored.chunk_shape(), &[4, 4]);
        assert_eq!(stored.dtype(), DType::U16);
        assert_eq!(stored.load_state(), LoadState::Unloaded);
        store.reset_reads();

        let region = Region::new(vec![1..3, 5..7]);
        let part = stored.read_region(&region).unwrap();
        assert_eq!(part, source.array().crop(&region).unwrap());
        assert_eq!(store.reads(), 1);
        assert_eq!(stored.load_state(), LoadState::Unloaded);

        let edge = Region::new(vec![3..9, 7..10]);
        assert_eq!(stored.read_region(&edge).unwrap(), source.array().crop(&edge).unwrap());

        assert_eq!(stored.read_all().unwrap(), *source.array());
        assert_eq!(stored.load_state(), LoadState::Loaded);
        store.reset_reads();
        stored.read_region(&region).unwrap();
        assert_eq!(store.reads(), 0);
    }

    #[test]
    fn test_arrays_are_checksummed() {
        let store = MemoryStore::new();
        let source = InMemoryArray::with_chunks(ramp(vec![4, 4]), vec![2, 2]).unwrap();
        write_array(&store, "a", &source).unwrap();
        let metadata = store.read_blob("a", "zarr.json").unwrap().unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&metadata).unwrap();
        assert_eq!(doc["node_type"], "array");
        assert!(doc["codecs"].to_string().contains("crc32c"));
    }

    #[test]
    fn test_corrupt_chunk_surfaces_on_read() {
        let store = MemoryStore::new();
        let source = InMemoryArray::with_chunks(ramp(vec![4, 4]), vec![2, 2]).unwrap();
        write_array(&store, "a", &source).unwrap();
        let mut chunk = store.read_blob("a", "c/1/1").unwrap().unwrap();
        chunk[0] ^= 0xff;
        store.write_blob("a", "c/1/1", &chunk).unwrap();

        let stored = StoredArray::open(&store, "a").unwrap();
        assert!(stored.read_region(&Region::new(vec![0..2, 0..2])).is_ok());
        let err = stored.read_all().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleFormat);
        assert!(err.to_string().contains("a/c/1/1"));
        assert_eq!(stored.load_state(), LoadState::Unloaded);
    }

    #[test]
    fn test_unsupported_dtype_is_incompatible() {
        let store = MemoryStore::new();
        let table = ColumnarTable::new()
            .with_column("note", Column::Str(vec!["a".into()]))
            .unwrap();
        write_table(&store, "t", &table, 8).unwrap();
        let err = StoredArray::open(&store, "t/0").unwrap_err();
        assert!(matches!(err, SpatialDataError::IncompatibleFormat { .. }));
    }

    #[test]
    fn test_table_round_trip() {
        let store = MemoryStore::new();
        let table = ColumnarTable::new()
            .with_column("region", Column::categorical(&["cells", "nuclei", "cells"]))
            .unwrap()
            .with_column("id", Column::Int(vec![1, 2, 3]))
            .unwrap()
            .with_column("area", Column::Float(vec![0.5, f64::NAN, 1e-7]))
            .unwrap()
            .with_column("note", Column::Str(vec!["a,b".into(), "".into(), "\"q\"".into()]))
            .unwrap();
        let schema = write_table(&store, "t", &table, 2).unwrap();
        assert_eq!(schema[0].categories, vec!["cells", "nuclei"]);

        let back = read_table(&store, "t", &schema).unwrap();
        assert_eq!(back.schema(), table.schema());
        assert_eq!(back.column("region"), table.column("region"));
        assert_eq!(back.column("id"), table.column("id"));
        assert_eq!(back.column("note"), table.column("note"));
        let Some(Column::Float(area)) = back.column("area") else {
            panic!("expected float column");
        };
        assert!(area[1].is_nan());
        assert_eq!(area[2], 1e-7);
    }

    #[test]
    fn test_empty_table_keeps_schema() {
        let store = MemoryStore::new();
        let table = ColumnarTable::new()
            .with_column("id", Column::Int(Vec::new()))
            .unwrap();
        let schema = write_table(&store, "t", &table, 16).unwrap();
        let back = read_table(&store, "t", &schema).unwrap();
        assert_eq!(back.n_rows(), 0);
        assert_eq!(back.schema(), table.schema());
    }

    #[test]
    fn test_schema_type_mismatch_is_incompatible() {
        let store = MemoryStore::new();
        let table = ColumnarTable::new().with_column("id", Column::Int(vec![1])).unwrap();
        let mut schema = write_table(&store, "t", &table, 16).unwrap();
        schema[0].column_type = ColumnType::Float;
        let err = read_table(&store, "t", &schema).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IncompatibleFormat);
    }

    #[test]
    fn test_out_of_range_category_code_is_incompatible() {
        let store = MemoryStore::new();
        let table = ColumnarTable::new()
            .with_column("region", Column::categorical(&["a", "b"]))
            .unwrap();
        let mut schema = write_table(&store, "t", &table, 16).unwrap();
        schema[0].categories.truncate(1);
        assert!(matches!(
            read_table(&store, "t", &schema),
            Err(SpatialDataError::IncompatibleFormat { .. })
        ));
    }
}
