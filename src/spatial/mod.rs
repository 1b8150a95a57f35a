pub mod quadtree;

pub use quadtree::{Cluster, QuadItem, QuadTree};
