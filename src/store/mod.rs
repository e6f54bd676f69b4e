//! Persistence of whole containers in a zarr v3 hierarchy.
//!
//! Layout, relative to the store root:
//!
//! ```text
//! zarr.json                          root group; its record is written last
//! images/<name>/zarr.json            element group and record
//! images/<name>/<level>/             one zarr array per pyramid level
//! points/<name>/coords/              f64 array of shape [n, ndim]
//! points/<name>/instance_ids/        i64 array of shape [n]
//! points/<name>/attributes/<i>/      optional per-point columns
//! shapes/<name>/geometries.json      serialized geometries
//! shapes/<name>/instance_ids/        i64 array of shape [n]
//! tables/<name>/columns/<i>/         one array per table column
//! ```
//!
//! Reading parses every metadata record eagerly and leaves payloads behind
//! [`Lazy`] cells, so a store with bad metadata fails before anything is
//! exposed while element data is only read on demand.

mod backend;
mod codec;
mod metadata;

pub use backend::{join, DirectoryStore, HierarchicalStore, MemoryStore, ATTRS_KEY, METADATA_KEY};
pub use codec::{read_table, write_array, write_table, StoredArray};
pub use metadata::{
    ColumnRecord, CoordinateSystemRecord, ElementAttrs, ElementEntry, LevelRecord, RootAttrs,
    TransformationRecord, FORMAT_VERSION,
};

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, trace};

use metadata::{decode, decode_transformations, encode, encode_transformations};

use crate::array::{ArrayBuffer, ChunkedArray, InMemoryArray, NdArray};
use crate::container::{check_element_name, NamePolicy, SpatialData};
use crate::error::{ErrorKind, Result, SpatialDataError};
use crate::model::{
    ColumnarTable, ElementKind, InstanceId, Lazy, LoadState, PointData, Points, Raster, RasterKind, RasterLevel, Shape,
    ShapeData, Shapes, SpatialElement, Table,
};
use crate::transform::Coords;
use crate::validation::ValidateOptions;

const COORDS: &str = "coords";
const INSTANCE_IDS: &str = "instance_ids";
const ATTRIBUTES: &str = "attributes";
const GEOMETRIES_BLOB: &str = "geometries.json";
const TABLE_COLUMNS: &str = "columns";

/// Options for [`write_spatialdata`].
#[derive(Clone, Debug)]
pub struct SaveOptions {
    /// Rows per chunk of point coordinates, instance ids and table columns.
    pub chunk_len: usize,
    /// Write elements on scoped worker threads.
    pub parallel: bool,
    /// Replace an existing container at the destination.
    pub overwrite: bool,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            chunk_len: 65_536,
            parallel: false,
            overwrite: false,
        }
    }
}

/// Options for [`read_spatialdata`].
#[derive(Clone, Debug)]
pub struct ReadOptions {
    /// Run structural validation on the loaded container.
    pub validate: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

fn element_group(kind: ElementKind, name: &str) -> String {
    format!("{}/{}", kind.collection(), name)
}

/// Writes a container to `store`.
///
/// Elements are written first and the root record last, with the store
/// synced before and after it, so a reader never sees a half-written
/// container as complete. With [`SaveOptions::overwrite`] an existing
/// container is removed first; every payload of `sd` is loaded into memory
/// beforehand, so a container lazily backed by the destination itself can
/// be written back over it.
///
/// # Errors
/// An `Io` error of kind `AlreadyExists` if a container is present and
/// overwriting is off; `InvalidElement` for names that cannot be stored.
pub fn write_spatialdata(store: &dyn HierarchicalStore, sd: &SpatialData, opts: &SaveOptions) -> Result<()> {
    let elements: Vec<(ElementKind, &str, &SpatialElement)> = sd.elements().collect();
    for (_, name, _) in &elements {
        check_element_name(name)?;
    }

    if store.read_attrs("")?.is_some() {
        if !opts.overwrite {
            return Err(SpatialDataError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "a container already exists at the destination",
            )));
        }
        load_payloads(sd)?;
        debug!("removing existing container");
    }
    store.remove_attrs("")?;
    for kind in ElementKind::ALL {
        store.remove(kind.collection())?;
    }

    if opts.parallel && elements.len() > 1 {
        std::thread::scope(|scope| {
            let handles: Vec<_> = elements
                .iter()
                .map(|&(kind, name, element)| scope.spawn(move || write_element(store, kind, name, element, opts)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join().unwrap_or_else(|_| {
                        Err(SpatialDataError::Io(std::io::Error::other("element writer thread panicked")))
                    })
                })
                .collect::<Result<Vec<()>>>()
        })?;
    } else {
        for &(kind, name, element) in &elements {
            write_element(store, kind, name, element, opts)?;
        }
    }

    let root = RootAttrs {
        format_version: FORMAT_VERSION.to_string(),
        elements: elements
            .iter()
            .map(|(kind, name, _)| ElementEntry {
                kind: *kind,
                name: name.to_string(),
            })
            .collect(),
        coordinate_systems: sd.declared_coordinate_systems().iter().map(Into::into).collect(),
        allow_cross_kind_names: sd.name_policy() == NamePolicy::AllowCrossKind,
    };
    store.sync()?;
    store.write_attrs("", &encode(&root, "<root>")?)?;
    store.sync()?;
    info!(elements = elements.len(), "wrote container");
    Ok(())
}

/// Pulls every lazily loaded payload of `sd` into memory.
fn load_payloads(sd: &SpatialData) -> Result<()> {
    for (kind, name, element) in sd.elements() {
        match element {
            SpatialElement::Image(raster) | SpatialElement::Labels(raster) => {
                for level in raster.levels() {
                    if level.data().load_state() != LoadState::Loaded {
                        level.data().read_all()?;
                    }
                }
            }
            SpatialElement::Points(points) => {
                points.data()?;
            }
            SpatialElement::Shapes(shapes) => {
                shapes.data()?;
            }
            SpatialElement::Table(table) => {
                table.data()?;
            }
        }
        trace!(kind = %kind, name, "loaded payload before overwrite");
    }
    Ok(())
}

fn write_element(
    store: &dyn HierarchicalStore,
    kind: ElementKind,
    name: &str,
    element: &SpatialElement,
    opts: &SaveOptions,
) -> Result<()> {
    let group = element_group(kind, name);
    let transformations = match element.transformations() {
        Some(map) => encode_transformations(map)?,
        None => Vec::new(),
    };
    let mut attrs = ElementAttrs {
        element_kind: kind,
        native_coordinate_system: element.native_coordinate_system().map(String::from),
        axes: element.axes().map(<[String]>::to_vec).unwrap_or_default(),
        transformations,
        multiscale_levels: None,
        annotation: None,
        columns: None,
    };

    match element {
        SpatialElement::Image(raster) | SpatialElement::Labels(raster) => {
            let mut levels = Vec::with_capacity(raster.levels().len());
            for (i, level) in raster.levels().iter().enumerate() {
                let path = i.to_string();
                write_array(store, &join(&group, &path), level.data().as_ref())?;
                levels.push(LevelRecord {
                    path,
                    transformations: encode_transformations(level.transformations())?,
                });
            }
            attrs.multiscale_levels = Some(levels);
        }
        SpatialElement::Points(points) => {
            let data = points.data()?;
            let ndim = points.axes().len();
            let flat: Vec<f64> = data.coords.iter().flat_map(|c| c.iter().copied()).collect();
            let coords = NdArray::new(vec![data.len(), ndim], ArrayBuffer::F64(flat))?;
            let chunks = vec![opts.chunk_len.max(1), ndim.max(1)];
            write_array(store, &join(&group, COORDS), &InMemoryArray::with_chunks(coords, chunks)?)?;
            write_ids(store, &group, &data.instance_ids, opts)?;
            attrs.columns = write_attributes(store, &group, data.attributes.as_ref(), opts)?;
        }
        SpatialElement::Shapes(shapes) => {
            let data = shapes.data()?;
            let bytes = serde_json::to_vec(&data.geometries).map_err(|source| SpatialDataError::MetadataWrite {
                path: join(&group, GEOMETRIES_BLOB),
                source,
            })?;
            store.write_blob(&group, GEOMETRIES_BLOB, &bytes)?;
            write_ids(store, &group, &data.instance_ids, opts)?;
            attrs.columns = write_attributes(store, &group, data.attributes.as_ref(), opts)?;
        }
        SpatialElement::Table(table) => {
            let data = table.data()?;
            attrs.columns = Some(write_table(store, &join(&group, TABLE_COLUMNS), &data, opts.chunk_len)?);
            attrs.annotation = table.annotation().cloned();
        }
    }

    store.write_attrs(&group, &encode(&attrs, &group)?)?;
    debug!(kind = %kind, name, "wrote element");
    Ok(())
}

fn write_ids(store: &dyn HierarchicalStore, group: &str, ids: &[InstanceId], opts: &SaveOptions) -> Result<()> {
    let values: Vec<i64> = ids.iter().map(InstanceId::as_i64).collect();
    let array = NdArray::new(vec![values.len()], ArrayBuffer::I64(values))?;
    let source = InMemoryArray::with_chunks(array, vec![opts.chunk_len.max(1)])?;
    write_array(store, &join(group, INSTANCE_IDS), &source)
}

fn write_attributes(
    store: &dyn HierarchicalStore,
    group: &str,
    attributes: Option<&ColumnarTable>,
    opts: &SaveOptions,
) -> Result<Option<Vec<ColumnRecord>>> {
    attributes
        .map(|table| write_table(store, &join(group, ATTRIBUTES), table, opts.chunk_len))
        .transpose()
}

/// Reads a container from `store`.
///
/// Metadata is parsed and checked up front; element payloads load on first
/// access.
///
/// # Errors
/// `IncompatibleFormat` for a missing or unreadable root descriptor, an
/// unsupported format version, or any malformed element record.
/// `Validation` if [`ReadOptions::validate`] is set and the container has
/// structural errors.
pub fn read_spatialdata(store: Arc<dyn HierarchicalStore>, opts: &ReadOptions) -> Result<SpatialData> {
    let root_value = store
        .read_attrs("")
        .map_err(as_incompatible("<root>"))?
        .ok_or_else(|| SpatialDataError::incompatible("<root>", "no container descriptor"))?;
    let root: RootAttrs = decode(root_value, "<root>").map_err(as_incompatible("<root>"))?;
    if root.format_version != FORMAT_VERSION {
        return Err(SpatialDataError::incompatible(
            "<root>",
            format!(
                "unsupported format version '{}' (supported: {})",
                root.format_version, FORMAT_VERSION
            ),
        ));
    }

    let mut sd = SpatialData::with_name_policy(root.name_policy());
    for record in &root.coordinate_systems {
        let cs = record.to_coordinate_system().map_err(as_incompatible("<root>"))?;
        sd.declare_coordinate_system(cs).map_err(as_incompatible("<root>"))?;
    }
    for entry in &root.elements {
        let group = element_group(entry.kind, &entry.name);
        let element = check_element_name(&entry.name)
            .and_then(|_| read_element(&store, entry.kind, &entry.name))
            .map_err(as_incompatible(&group))?;
        sd.add(&entry.name, element).map_err(as_incompatible(&group))?;
    }
    info!(elements = sd.len(), "read container");

    if opts.validate {
        sd.validate(&ValidateOptions::structural())?;
    }
    Ok(sd)
}

fn as_incompatible(location: &str) -> impl Fn(SpatialDataError) -> SpatialDataError + '_ {
    move |e| {
        if e.kind() == ErrorKind::IncompatibleFormat {
            e
        } else {
            SpatialDataError::incompatible(location, e.to_string())
        }
    }
}

fn read_element(store: &Arc<dyn HierarchicalStore>, kind: ElementKind, name: &str) -> Result<SpatialElement> {
    let group = element_group(kind, name);
    let value = store
        .read_attrs(&group)?
        .ok_or_else(|| SpatialDataError::incompatible(&group, "missing element record"))?;
    let attrs: ElementAttrs = decode(value, &group)?;
    if attrs.element_kind != kind {
        return Err(SpatialDataError::incompatible(
            &group,
            format!("record describes a {} element", attrs.element_kind),
        ));
    }
    let transformations = decode_transformations(&attrs.transformations, &group)?;

    let element = match kind {
        ElementKind::Image | ElementKind::Labels => {
            let records = attrs
                .multiscale_levels
                .as_deref()
                .filter(|levels| !levels.is_empty())
                .ok_or_else(|| SpatialDataError::incompatible(&group, "raster has no levels"))?;
            let mut levels = Vec::with_capacity(records.len());
            for (i, record) in records.iter().enumerate() {
                check_element_name(&record.path)?;
                let array = StoredArray::open(store.as_ref(), &join(&group, &record.path))?;
                let map = if i == 0 {
                    transformations.clone()
                } else {
                    decode_transformations(&record.transformations, &group)?
                };
                levels.push(RasterLevel::with_transformations(Arc::new(array), map));
            }
            let raster_kind = if kind == ElementKind::Image {
                RasterKind::Image
            } else {
                RasterKind::Labels
            };
            SpatialElement::raster(Raster::from_levels(
                raster_kind,
                attrs.native(&group)?,
                attrs.axes.clone(),
                levels,
            )?)
        }
        ElementKind::Points => {
            let ndim = attrs.axes.len();
            let coords = StoredArray::open(store.as_ref(), &join(&group, COORDS))?;
            if coords.shape().len() != 2 || coords.shape()[1] != ndim {
                return Err(SpatialDataError::incompatible(
                    &group,
                    format!("coordinate array of shape {:?} does not match {} axes", coords.shape(), ndim),
                ));
            }
            let ids = StoredArray::open(store.as_ref(), &join(&group, INSTANCE_IDS))?;
            let loader = {
                let store = Arc::clone(store);
                let group = group.clone();
                let columns = attrs.columns.clone();
                Lazy::deferred(move || load_points(store.as_ref(), &group, &coords, &ids, columns.as_deref()))
            };
            Points::lazy(attrs.native(&group)?, attrs.axes.clone(), transformations, loader)?.into()
        }
        ElementKind::Shapes => {
            let ids = StoredArray::open(store.as_ref(), &join(&group, INSTANCE_IDS))?;
            let loader = {
                let store = Arc::clone(store);
                let group = group.clone();
                let columns = attrs.columns.clone();
                Lazy::deferred(move || load_shapes(store.as_ref(), &group, &ids, columns.as_deref()))
            };
            Shapes::lazy(attrs.native(&group)?, transformations, loader)?.into()
        }
        ElementKind::Table => {
            let schema = attrs
                .columns
                .clone()
                .ok_or_else(|| SpatialDataError::incompatible(&group, "table record has no columns"))?;
            let loader = {
                let store = Arc::clone(store);
                let columns = join(&group, TABLE_COLUMNS);
                Lazy::deferred(move || read_table(store.as_ref(), &columns, &schema))
            };
            Table::lazy(loader, attrs.annotation.clone()).into()
        }
    };
    debug!(kind = %kind, name, "read element record");
    Ok(element)
}

fn read_ids(ids: &StoredArray, group: &str) -> Result<Vec<InstanceId>> {
    match ids.read_all()?.data() {
        ArrayBuffer::I64(values) => Ok(values.iter().copied().map(InstanceId::new).collect()),
        other => Err(SpatialDataError::incompatible(
            group,
            format!("instance ids stored as {}", other.dtype()),
        )),
    }
}

fn read_attributes(
    store: &dyn HierarchicalStore,
    group: &str,
    columns: Option<&[ColumnRecord]>,
) -> Result<Option<ColumnarTable>> {
    columns
        .map(|schema| read_table(store, &join(group, ATTRIBUTES), schema))
        .transpose()
}

fn load_points(
    store: &dyn HierarchicalStore,
    group: &str,
    coords: &StoredArray,
    ids: &StoredArray,
    columns: Option<&[ColumnRecord]>,
) -> Result<PointData> {
    let array = coords.read_all()?;
    let ndim = array.shape()[1];
    let ArrayBuffer::F64(flat) = array.data() else {
        return Err(SpatialDataError::incompatible(
            group,
            format!("coordinates stored as {}", array.dtype()),
        ));
    };
    let rows: Vec<Coords> = if ndim == 0 {
        Vec::new()
    } else {
        flat.chunks(ndim).map(Coords::from_slice).collect()
    };
    let mut data = PointData::new(rows).with_ids(read_ids(ids, group)?);
    if let Some(attributes) = read_attributes(store, group, columns)? {
        data = data.with_attributes(attributes);
    }
    data.check(ndim)
        .map_err(|e| SpatialDataError::incompatible(group, e.to_string()))?;
    Ok(data)
}

fn load_shapes(
    store: &dyn HierarchicalStore,
    group: &str,
    ids: &StoredArray,
    columns: Option<&[ColumnRecord]>,
) -> Result<ShapeData> {
    let bytes = store
        .read_blob(group, GEOMETRIES_BLOB)?
        .ok_or_else(|| SpatialDataError::incompatible(group, "missing geometry payload"))?;
    let geometries: Vec<Shape> = serde_json::from_slice(&bytes).map_err(|source| SpatialDataError::MetadataParse {
        path: join(group, GEOMETRIES_BLOB),
        source,
    })?;
    let mut data = ShapeData::new(geometries).with_ids(read_ids(ids, group)?);
    if let Some(attributes) = read_attributes(store, group, columns)? {
        data = data.with_attributes(attributes);
    }
    data.check()
        .map_err(|e| SpatialDataError::incompatible(group, e.to_string()))?;
    Ok(data)
}

/// Rewrites only the transformation records of one stored element.
///
/// The element's payload is untouched. For rasters, per-level mappings are
/// rewritten too.
///
/// # Errors
/// `ElementNotFound` if the store has no such element, `NotSpatial` for
/// tables, `IncompatibleFormat` if the stored level count differs.
pub fn write_transformations(store: &dyn HierarchicalStore, name: &str, element: &SpatialElement) -> Result<()> {
    let kind = element.kind();
    let map = element.transformations().ok_or_else(|| SpatialDataError::NotSpatial {
        name: name.to_string(),
    })?;
    let group = element_group(kind, name);
    let value = store
        .read_attrs(&group)?
        .ok_or_else(|| SpatialDataError::ElementNotFound {
            kind: Some(kind),
            name: name.to_string(),
        })?;
    let mut attrs: ElementAttrs = decode(value, &group)?;
    attrs.transformations = encode_transformations(map)?;
    if let (Some(records), Some(raster)) = (attrs.multiscale_levels.as_mut(), element.as_raster()) {
        if records.len() != raster.levels().len() {
            return Err(SpatialDataError::incompatible(
                &group,
                format!(
                    "stored raster has {} levels, element has {}",
                    records.len(),
                    raster.levels().len()
                ),
            ));
        }
        for (record, level) in records.iter_mut().zip(raster.levels()) {
            record.transformations = encode_transformations(level.transformations())?;
        }
    }
    store.write_attrs(&group, &encode(&attrs, &group)?)?;
    debug!(kind = %kind, name, "rewrote transformations");
    Ok(())
}

/// Writes a container into a directory, creating it if needed.
pub fn write_to_directory(path: &Path, sd: &SpatialData, opts: &SaveOptions) -> Result<()> {
    let store = DirectoryStore::create(path)?;
    write_spatialdata(&store, sd, opts)
}

/// Reads a container from a directory.
///
/// # Errors
/// `StoreNotFound` if `path` is not a directory.
pub fn read_from_directory(path: &Path, opts: &ReadOptions) -> Result<SpatialData> {
    let store: Arc<dyn HierarchicalStore> = Arc::new(DirectoryStore::open(path)?);
    read_spatialdata(store, opts)
}

/// Fuzz-only entrypoint for element record parsing.
#[cfg(feature = "fuzzing")]
pub fn fuzz_parse_element_attrs(bytes: &[u8]) -> Result<()> {
    let location = "<fuzz>";
    let value = serde_json::from_slice(bytes).map_err(|source| SpatialDataError::MetadataParse {
        path: location.to_string(),
        source,
    })?;
    let attrs: ElementAttrs = decode(value, location)?;
    decode_transformations(&attrs.transformations, location)?;
    for level in attrs.multiscale_levels.iter().flatten() {
        check_element_name(&level.path)?;
        decode_transformations(&level.transformations, location)?;
    }
    Ok(())
}

/// Fuzz-only entrypoint for opening a stored array from its metadata
/// document.
#[cfg(feature = "fuzzing")]
pub fn fuzz_open_array_metadata(bytes: &[u8]) -> Result<()> {
    let store = MemoryStore::new();
    store.write_blob("a", METADATA_KEY, bytes)?;
    StoredArray::open(&store, "a").map(|_| ())
}
