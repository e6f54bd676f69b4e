//! Merging containers and tables.

use tracing::debug;

use super::SpatialData;
use crate::error::{Result, SpatialDataError};
use crate::model::{ElementKind, SpatialElement, Table};

/// Concatenates annotation tables row-wise.
///
/// All tables must agree on annotation keys (or all be unannotated). The
/// merged table annotates the union of their regions, in first-seen order.
pub fn concatenate_tables(tables: &[&Table]) -> Result<Table> {
    let Some((first, rest)) = tables.split_first() else {
        return Err(SpatialDataError::invalid_element("<table>", "no tables to concatenate"));
    };
    let mut data = (*first.data()?).clone();
    let mut annotation = first.annotation().cloned();

    for table in rest {
        match (&mut annotation, table.annotation()) {
            (None, None) => {}
            (Some(merged), Some(next)) => {
                if merged.region_key != next.region_key || merged.instance_key != next.instance_key {
                    return Err(SpatialDataError::invalid_element(
                        "<table>",
                        format!(
                            "annotation keys differ: ({}, {}) vs ({}, {})",
                            merged.region_key, merged.instance_key, next.region_key, next.instance_key
                        ),
                    ));
                }
                for region in &next.regions {
                    if !merged.regions.contains(region) {
                        merged.regions.push(region.clone());
                    }
                }
            }
            _ => {
                return Err(SpatialDataError::invalid_element(
                    "<table>",
                    "cannot concatenate annotated and unannotated tables",
                ))
            }
        }
        data = data.concat(table.data()?.as_ref())?;
    }

    Ok(match annotation {
        Some(a) => Table::annotating(data, a),
        None => Table::new(data),
    })
}

/// Merges containers into one.
///
/// Element names must be unique across the inputs. With `merge_tables`,
/// tables sharing a name are concatenated instead of colliding.
pub fn concatenate(containers: Vec<SpatialData>, merge_tables: bool) -> Result<SpatialData> {
    let mut iter = containers.into_iter();
    let Some(mut out) = iter.next() else {
        return Ok(SpatialData::new());
    };
    for mut next in iter {
        if merge_tables {
            let shared: Vec<String> = next
                .names(ElementKind::Table)
                .into_iter()
                .filter(|n| out.get_kind(ElementKind::Table, n).is_some())
                .map(String::from)
                .collect();
            let mut merged = Vec::with_capacity(shared.len());
            for name in &shared {
                let (Some(a), Some(b)) = (
                    out.get_kind(ElementKind::Table, name).and_then(SpatialElement::as_table),
                    next.get_kind(ElementKind::Table, name).and_then(SpatialElement::as_table),
                ) else {
                    continue;
                };
                merged.push((name.clone(), concatenate_tables(&[a, b])?));
            }
            for (name, table) in merged {
                next.remove(ElementKind::Table, &name)?;
                out.replace(&name, table)?;
                debug!(name = %name, "merged tables");
            }
        }
        out.absorb(next)?;
    }
    Ok(out)
}
