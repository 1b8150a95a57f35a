//! Point quad-tree over projected coordinates.
//!
//! Leaves split into four quadrants once they hold more than
//! `NODE_CAPACITY` items, down to `MAX_DEPTH`. Points outside the root bounds
//! are kept in an overflow list so insertion never fails.

use crate::core::bounds::ProjectedRect;
use crate::core::geo::{ProjectedPoint, ProjectedSize};
use crate::prelude::HashMap;

const NODE_CAPACITY: usize = 8;
const MAX_DEPTH: usize = 24;

#[derive(Debug, Clone, PartialEq)]
pub struct QuadItem<T> {
    pub id: u64,
    pub point: ProjectedPoint,
    pub data: T,
}

/// A group of items produced by [`QuadTree::clusters`]
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub center: ProjectedPoint,
    pub ids: Vec<u64>,
}

#[derive(Debug, Clone)]
struct Node<T> {
    bounds: ProjectedRect,
    depth: usize,
    items: Vec<QuadItem<T>>,
    children: Option<Box<[Node<T>; 4]>>,
}

impl<T: Clone> Node<T> {
    fn new(bounds: ProjectedRect, depth: usize) -> Self {
        Self {
            bounds,
            depth,
            items: Vec::new(),
            children: None,
        }
    }

    fn quadrant_bounds(&self) -> [ProjectedRect; 4] {
        let half = ProjectedSize::new(self.bounds.width() / 2.0, self.bounds.height() / 2.0);
        let (x, y) = (self.bounds.min_x(), self.bounds.min_y());
        [
            ProjectedRect::new(ProjectedPoint::new(x, y + half.height), half),
            ProjectedRect::new(ProjectedPoint::new(x + half.width, y + half.height), half),
            ProjectedRect::new(ProjectedPoint::new(x, y), half),
            ProjectedRect::new(ProjectedPoint::new(x + half.width, y), half),
        ]
    }

    /// Quadrant index for a point, matching `quadrant_bounds` order
    fn quadrant_of(&self, point: &ProjectedPoint) -> usize {
        let center = self.bounds.center();
        let east = point.x >= center.x;
        let north = point.y >= center.y;
        match (north, east) {
            (true, false) => 0,
            (true, true) => 1,
            (false, false) => 2,
            (false, true) => 3,
        }
    }

    fn insert(&mut self, item: QuadItem<T>) {
        let idx = self.quadrant_of(&item.point);
        if let Some(children) = self.children.as_mut() {
            children[idx].insert(item);
            return;
        }

        self.items.push(item);
        if self.items.len() > NODE_CAPACITY && self.depth < MAX_DEPTH {
            self.split();
        }
    }

    fn split(&mut self) {
        let [nw, ne, sw, se] = self.quadrant_bounds();
        let depth = self.depth + 1;
        let mut children = Box::new([
            Node::new(nw, depth),
            Node::new(ne, depth),
            Node::new(sw, depth),
            Node::new(se, depth),
        ]);
        for item in std::mem::take(&mut self.items) {
            let idx = self.quadrant_of(&item.point);
            children[idx].insert(item);
        }
        self.children = Some(children);
    }

    fn remove(&mut self, id: u64, point: &ProjectedPoint) -> Option<QuadItem<T>> {
        let idx = self.quadrant_of(point);
        if let Some(children) = self.children.as_mut() {
            let removed = children[idx].remove(id, point);
            if removed.is_some() {
                self.try_merge();
            }
            return removed;
        }
        let pos = self.items.iter().position(|item| item.id == id)?;
        Some(self.items.swap_remove(pos))
    }

    /// Collapse children back into this node once they fit
    fn try_merge(&mut self) {
        let Some(children) = self.children.as_ref() else {
            return;
        };
        if children.iter().any(|child| child.children.is_some()) {
            return;
        }
        let total: usize = children.iter().map(|child| child.items.len()).sum();
        if total <= NODE_CAPACITY {
            if let Some(children) = self.children.take() {
                let children = *children;
                for child in children {
                    self.items.extend(child.items);
                }
            }
        }
    }

    fn query<'a>(&'a self, rect: &ProjectedRect, out: &mut Vec<&'a QuadItem<T>>) {
        if !self.bounds.intersects(rect) {
            return;
        }
        out.extend(self.items.iter().filter(|item| rect.contains(&item.point)));
        if let Some(children) = self.children.as_ref() {
            for child in children.iter() {
                child.query(rect, out);
            }
        }
    }
}

/// Spatial index of items positioned in projected space
#[derive(Debug, Clone)]
pub struct QuadTree<T> {
    root: Node<T>,
    overflow: Vec<QuadItem<T>>,
    positions: HashMap<u64, ProjectedPoint>,
}

impl<T: Clone> QuadTree<T> {
    pub fn new(bounds: ProjectedRect) -> Self {
        Self {
            root: Node::new(bounds, 0),
            overflow: Vec::new(),
            positions: HashMap::default(),
        }
    }

    pub fn bounds(&self) -> ProjectedRect {
        self.root.bounds
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.positions.contains_key(&id)
    }

    /// Insert an item, replacing any previous item with the same id
    pub fn insert(&mut self, id: u64, point: ProjectedPoint, data: T) {
        self.remove(id);
        self.positions.insert(id, point);
        let item = QuadItem { id, point, data };
        if self.root.bounds.contains(&point) {
            self.root.insert(item);
        } else {
            self.overflow.push(item);
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<QuadItem<T>> {
        let point = self.positions.remove(&id)?;
        if let Some(pos) = self.overflow.iter().position(|item| item.id == id) {
            return Some(self.overflow.swap_remove(pos));
        }
        self.root.remove(id, &point)
    }

    pub fn clear(&mut self) {
        self.root = Node::new(self.root.bounds, 0);
        self.overflow.clear();
        self.positions.clear();
    }

    /// Items inside `rect` (edges inclusive)
    pub fn query(&self, rect: &ProjectedRect) -> Vec<&QuadItem<T>> {
        let mut out = Vec::new();
        self.root.query(rect, &mut out);
        out.extend(self.overflow.iter().filter(|item| rect.contains(&item.point)));
        out
    }

    /// Grid clustering of the items inside `rect`.
    ///
    /// Items are bucketed into square cells of `cell_size` projected units
    /// anchored at the world origin so clusters stay stable while panning.
    /// Items for which `can_cluster` is false always form their own cluster.
    /// With `gravity_center` a cluster sits at the mean of its members,
    /// otherwise at the centre of its cell.
    pub fn clusters<F>(
        &self,
        rect: &ProjectedRect,
        cell_size: f64,
        gravity_center: bool,
        can_cluster: F,
    ) -> Vec<Cluster>
    where
        F: Fn(&T) -> bool,
    {
        let mut items = self.query(rect);
        items.sort_by_key(|item| item.id);

        let mut clusters = Vec::new();
        let mut cells: HashMap<(i64, i64), Vec<&QuadItem<T>>> = HashMap::default();
        let mut cell_order: Vec<(i64, i64)> = Vec::new();

        for item in items {
            if !can_cluster(&item.data) || !(cell_size > 0.0) {
                clusters.push(Cluster {
                    center: item.point,
                    ids: vec![item.id],
                });
                continue;
            }
            let cell = (
                (item.point.x / cell_size).floor() as i64,
                (item.point.y / cell_size).floor() as i64,
            );
            let members = cells.entry(cell).or_insert_with(|| {
                cell_order.push(cell);
                Vec::new()
            });
            members.push(item);
        }

        for cell in cell_order {
            let Some(members) = cells.remove(&cell) else {
                continue;
            };
            let center = if members.len() == 1 {
                members[0].point
            } else if gravity_center {
                let n = members.len() as f64;
                let (sx, sy) = members
                    .iter()
                    .fold((0.0, 0.0), |(sx, sy), item| (sx + item.point.x, sy + item.point.y));
                ProjectedPoint::new(sx / n, sy / n)
            } else {
                ProjectedPoint::new(
                    (cell.0 as f64 + 0.5) * cell_size,
                    (cell.1 as f64 + 0.5) * cell_size,
                )
            };
            clusters.push(Cluster {
                center,
                ids: members.iter().map(|item| item.id).collect(),
            });
        }
        clusters
    }
}
