//! Coordinate system graph and path search.
//!
//! Nodes are coordinate system names. Each declared element transformation
//! is a forward edge from the element's native system to its target; each
//! invertible one also contributes an inverse edge. Forward edges come
//! first, in declaration order, so breadth-first search returns the
//! shortest path by edge count with ties broken by declaration order.

use std::collections::{HashMap, HashSet, VecDeque};
use tracing::trace;

use crate::container::SpatialData;
use crate::error::{Result, SpatialDataError};
use crate::model::ElementKind;
use crate::transform::{compose, invert, Transformation};

/// One directed edge of the graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Edge {
    pub source: String,
    pub target: String,
    pub transformation: Transformation,
    /// Element that declared the transformation.
    pub element: (ElementKind, String),
    /// True for edges derived by inverting a declared transformation.
    pub inverse: bool,
}

/// The transformation graph of a container.
#[derive(Clone, Debug, Default)]
pub struct TransformGraph {
    edges: Vec<Edge>,
}

impl TransformGraph {
    /// Builds the graph from every spatial element of `sd`.
    pub fn build(sd: &SpatialData) -> Self {
        let mut edges = Vec::new();
        for (kind, name, element) in sd.elements() {
            let (Some(native), Some(map)) = (element.native_coordinate_system(), element.transformations())
            else {
                continue;
            };
            for (target, t) in map.iter() {
                edges.push(Edge {
                    source: native.to_string(),
                    target: target.to_string(),
                    transformation: t.clone(),
                    element: (kind, name.to_string()),
                    inverse: false,
                });
            }
        }
        let inverses: Vec<Edge> = edges
            .iter()
            .filter(|e| e.source != e.target)
            .filter_map(|e| {
                invert(&e.transformation).ok().map(|inv| Edge {
                    source: e.target.clone(),
                    target: e.source.clone(),
                    transformation: inv,
                    element: e.element.clone(),
                    inverse: true,
                })
            })
            .collect();
        edges.extend(inverses);
        Self { edges }
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Every node name, in first-seen order.
    pub fn nodes(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut nodes = Vec::new();
        for e in &self.edges {
            for n in [e.source.as_str(), e.target.as_str()] {
                if seen.insert(n) {
                    nodes.push(n);
                }
            }
        }
        nodes
    }

    /// Shortest path from `source` to `target`. An empty path means the
    /// systems are the same.
    pub fn find_path(&self, source: &str, target: &str) -> Option<Vec<&Edge>> {
        if source == target {
            return Some(Vec::new());
        }
        let mut came_from: HashMap<&str, usize> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([source]);
        let mut queue = VecDeque::from([source]);

        while let Some(node) = queue.pop_front() {
            for (i, edge) in self.edges.iter().enumerate() {
                if edge.source != node || !visited.insert(edge.target.as_str()) {
                    continue;
                }
                came_from.insert(edge.target.as_str(), i);
                if edge.target == target {
                    return Some(self.unwind(&came_from, source, target));
                }
                queue.push_back(edge.target.as_str());
            }
        }
        None
    }

    /// Every path from `source` to `target` that visits no system twice,
    /// in depth-first order over the edge list.
    pub fn simple_paths<'a>(&'a self, source: &'a str, target: &str) -> Vec<Vec<&'a Edge>> {
        let mut paths = Vec::new();
        let mut stack = Vec::new();
        let mut on_path = HashSet::from([source]);
        self.extend_paths(source, target, &mut on_path, &mut stack, &mut paths);
        paths
    }

    fn extend_paths<'a>(
        &'a self,
        node: &str,
        target: &str,
        on_path: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a Edge>,
        paths: &mut Vec<Vec<&'a Edge>>,
    ) {
        for edge in self.edges.iter().filter(|e| e.source == node) {
            if edge.target == target {
                let mut path = stack.clone();
                path.push(edge);
                paths.push(path);
                continue;
            }
            if !on_path.insert(edge.target.as_str()) {
                continue;
            }
            stack.push(edge);
            self.extend_paths(&edge.target, target, on_path, stack, paths);
            stack.pop();
            on_path.remove(edge.target.as_str());
        }
    }

    fn unwind(&self, came_from: &HashMap<&str, usize>, source: &str, target: &str) -> Vec<&Edge> {
        let mut path = Vec::new();
        let mut node = target;
        while node != source {
            let Some(&i) = came_from.get(node) else {
                break;
            };
            let edge = &self.edges[i];
            path.push(edge);
            node = edge.source.as_str();
        }
        path.reverse();
        path
    }

    /// Composes the transformations along the path from `source` to
    /// `target`.
    ///
    /// # Errors
    /// `NoTransformationPath` naming both systems if none exists.
    pub fn path_transformation(&self, source: &str, target: &str) -> Result<Transformation> {
        let path = self
            .find_path(source, target)
            .ok_or_else(|| SpatialDataError::NoTransformationPath {
                source_system: source.to_string(),
                target_system: target.to_string(),
            })?;
        trace!(source, target, hops = path.len(), "resolved path");
        compose_path(&path)
    }
}

/// Renders a path as `a -> b -> c`, naming the element behind each edge.
pub fn describe_path(path: &[&Edge]) -> String {
    let mut out = String::new();
    for (i, e) in path.iter().enumerate() {
        if i == 0 {
            out.push_str(&e.source);
        }
        let via = if e.inverse { "inverse of " } else { "" };
        out.push_str(&format!(" -[{}{} '{}']-> {}", via, e.element.0, e.element.1, e.target));
    }
    out
}

/// Folds a path into one transformation.
pub fn compose_path(path: &[&Edge]) -> Result<Transformation> {
    path.iter()
        .try_fold(Transformation::Identity, |acc, e| compose(&acc, &e.transformation))
}
