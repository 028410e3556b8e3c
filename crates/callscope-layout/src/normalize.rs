//! Component-wise layout, grid-size normalization, stacking, and viewport fit
//!
//! Every connected component is laid out on its own. Raw coordinates are
//! rescaled so adjacent rows and columns sit one grid step apart, the
//! components are stacked tallest first, and the union is mapped into
//! `[inset, 1 - inset]` on both axes. The graph is only written once every
//! component succeeded.

use crate::oracle::{LayoutError, LayoutOracle, LayoutRequest};
use callscope_core::{CancelFlag, Component, FunctionHandle, Graph, NodeId, Point};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

/// Tunable constants of the normalization pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutSettings {
    /// Target spacing between adjacent distinct coordinates.
    pub grid_size: f64,
    /// Border left free on every side of the unit square.
    pub inset: f64,
    /// Coordinates closer than `1 / precision` count as the same row or column.
    pub precision: f64,
}

impl Default for LayoutSettings {
    fn default() -> Self {
        LayoutSettings {
            grid_size: 0.1,
            inset: 0.1,
            precision: 1000.0,
        }
    }
}

/// Ordered node positions of one component.
type Blueprint = Vec<(NodeId, Point)>;

pub struct LayoutNormalizer<'a, O: ?Sized> {
    oracle: &'a O,
    settings: LayoutSettings,
    cancel: CancelFlag,
    parallel: bool,
}

impl<'a, O: LayoutOracle + ?Sized> LayoutNormalizer<'a, O> {
    pub fn new(oracle: &'a O, settings: LayoutSettings) -> Self {
        LayoutNormalizer {
            oracle,
            settings,
            cancel: CancelFlag::new(),
            parallel: true,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Send independent components to the oracle concurrently.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Lay out `graph`, setting both the live and the raw point of every node.
    pub fn layout<F: FunctionHandle>(&self, graph: &mut Graph<F>) -> Result<(), LayoutError> {
        if graph.is_empty() {
            return Ok(());
        }
        let points = self.compute(graph)?;
        graph.apply_layout(&points);
        Ok(())
    }

    /// Normalized coordinates for every node of `graph`, without touching it.
    pub fn compute<F: FunctionHandle>(&self, graph: &Graph<F>) -> Result<HashMap<NodeId, Point>, LayoutError> {
        let components = graph.connected_components();
        info!("Laying out {} nodes in {} components", graph.node_count(), components.len());

        let blueprints: Vec<Blueprint> = if self.parallel {
            components
                .par_iter()
                .map(|component| self.layout_component(graph, component))
                .collect::<Result<_, _>>()?
        } else {
            components
                .iter()
                .map(|component| self.layout_component(graph, component))
                .collect::<Result<_, _>>()?
        };

        let merged = stack(blueprints, self.settings.grid_size);
        Ok(fit_points(&merged, self.settings.inset).into_iter().collect())
    }

    fn layout_component<F: FunctionHandle>(
        &self,
        graph: &Graph<F>,
        component: &Component,
    ) -> Result<Blueprint, LayoutError> {
        if self.cancel.is_cancelled() {
            return Err(LayoutError::Cancelled);
        }
        if component.len() == 1 {
            return Ok(component.nodes.iter().map(|&id| (id, Point::new(0.5, 0.5))).collect());
        }

        let (order, request) = layout_request(graph, component);
        let raw = self.oracle.layout(&request)?;

        let mut blueprint = Vec::with_capacity(order.len());
        for (id, name) in order.into_iter().zip(&request.nodes) {
            let point = raw
                .positions
                .get(name)
                .copied()
                .ok_or_else(|| LayoutError::Malformed(format!("no position for node {}", name)))?;
            if !point.is_finite() {
                return Err(LayoutError::Malformed(format!("non-finite position for node {}", name)));
            }
            blueprint.push((id, point));
        }
        Ok(normalize_grid(blueprint, self.settings.grid_size, self.settings.precision))
    }
}

/// Nodes sorted by display name (ties by id), each node's links sorted by target name.
fn layout_request<F: FunctionHandle>(graph: &Graph<F>, component: &Component) -> (Vec<NodeId>, LayoutRequest) {
    let sort_key = |id: NodeId| {
        let name = graph
            .node(id)
            .map(|node| node.function.display_name().to_string())
            .unwrap_or_default();
        (name, id)
    };

    let mut order: Vec<(String, NodeId)> = component.nodes.iter().map(|&id| sort_key(id)).collect();
    order.sort();

    let mut request = LayoutRequest::default();
    for (_, id) in &order {
        request.nodes.push(id.to_string());
        let mut targets: Vec<(String, NodeId)> = graph.outgoing(*id).map(|edge| sort_key(edge.target)).collect();
        targets.sort();
        for (_, target) in targets {
            request.edges.push((id.to_string(), target.to_string()));
        }
    }
    (order.into_iter().map(|(_, id)| id).collect(), request)
}

/// Average gap between distinct values, after rounding to `1 / precision`.
fn grid_spacing(values: impl Iterator<Item = f64>, precision: f64) -> f64 {
    let distinct: BTreeSet<i64> = values.map(|v| (v * precision).round() as i64).collect();
    match (distinct.first(), distinct.last()) {
        (Some(min), Some(max)) if distinct.len() >= 2 => {
            (max - min) as f64 / (distinct.len() - 1) as f64 / precision
        }
        _ => 0.0,
    }
}

/// Rescale each axis so the spacing between distinct values becomes `grid_size`.
pub(crate) fn normalize_grid(blueprint: Blueprint, grid_size: f64, precision: f64) -> Blueprint {
    if blueprint.len() < 2 {
        return blueprint;
    }
    let spacing_x = grid_spacing(blueprint.iter().map(|(_, p)| p.x), precision);
    let spacing_y = grid_spacing(blueprint.iter().map(|(_, p)| p.y), precision);
    let factor_x = if spacing_x == 0.0 { 1.0 } else { grid_size / spacing_x };
    let factor_y = if spacing_y == 0.0 { 1.0 } else { grid_size / spacing_y };

    blueprint
        .into_iter()
        .map(|(id, p)| (id, Point::new(p.x * factor_x, p.y * factor_y)))
        .collect()
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

fn bounds<'p>(points: impl Iterator<Item = &'p Point>) -> Option<Bounds> {
    points.fold(None, |acc, p| {
        Some(match acc {
            None => Bounds {
                min_x: p.x,
                min_y: p.y,
                max_x: p.x,
                max_y: p.y,
            },
            Some(b) => Bounds {
                min_x: b.min_x.min(p.x),
                min_y: b.min_y.min(p.y),
                max_x: b.max_x.max(p.x),
                max_y: b.max_y.max(p.y),
            },
        })
    })
}

/// Stack components tallest first, each one grid step below the previous.
///
/// Every component is left-aligned. The minimum-x point of the first
/// component (smallest y on ties) defines the centre line at y = 0.5.
pub(crate) fn stack(blueprints: Vec<Blueprint>, grid_size: f64) -> Blueprint {
    let mut sized: Vec<(Blueprint, Bounds, f64, f64)> = blueprints
        .into_iter()
        .filter_map(|blueprint| {
            let b = bounds(blueprint.iter().map(|(_, p)| p))?;
            let height = b.max_y - b.min_y + grid_size;
            let width = b.max_x - b.min_x + grid_size;
            Some((blueprint, b, height, width))
        })
        .collect();
    sized.sort_by(|a, b| b.2.total_cmp(&a.2).then(b.3.total_cmp(&a.3)));

    let central_line = sized
        .first()
        .and_then(|(blueprint, b, _, _)| {
            blueprint
                .iter()
                .map(|(_, p)| p)
                .min_by(|p, q| p.x.total_cmp(&q.x).then(p.y.total_cmp(&q.y)))
                .map(|anchor| anchor.y - b.min_y)
        })
        .unwrap_or(0.0);

    let mut merged = Vec::new();
    let mut offset = 0.0;
    for (blueprint, b, height, _) in sized {
        for (id, p) in blueprint {
            merged.push((
                id,
                Point::new(p.x - b.min_x + 0.5, p.y - b.min_y + offset - central_line + 0.5),
            ));
        }
        offset += height;
    }
    debug!("Stacked components into {} points, total height {}", merged.len(), offset);
    merged
}

/// Map points affinely into `[inset, 1 - inset]` per axis. A zero-extent axis maps to 0.5.
pub fn fit_points(points: &[(NodeId, Point)], inset: f64) -> Vec<(NodeId, Point)> {
    let Some(b) = bounds(points.iter().map(|(_, p)| p)) else {
        return Vec::new();
    };
    let span = 1.0 - 2.0 * inset;
    let fit = |value: f64, min: f64, max: f64| {
        if max > min {
            (value - min) / (max - min) * span + inset
        } else {
            0.5
        }
    };
    points
        .iter()
        .map(|&(id, p)| (id, Point::new(fit(p.x, b.min_x, b.max_x), fit(p.y, b.min_y, b.max_y))))
        .collect()
}

/// Reset every live point to a fresh viewport fit of the raw layout points.
pub fn fit_to_view<F: FunctionHandle>(graph: &mut Graph<F>, inset: f64) {
    let raw: Vec<(NodeId, Point)> = graph.nodes().map(|node| (node.id, node.raw_layout_point)).collect();
    let fitted: HashMap<NodeId, Point> = fit_points(&raw, inset).into_iter().collect();
    graph.apply_points(&fitted);
}
