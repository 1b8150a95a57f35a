use std::sync::Arc;

use crate::core::constants::{MAX_TILE_ZOOM, TILE_SIZE};
use crate::tiles::source::{SourceId, TileSource};
use crate::{MapError, Result};

/// A source in the container together with its visibility
#[derive(Clone)]
pub struct TileSourceEntry {
    source: Arc<dyn TileSource>,
    hidden: bool,
}

impl TileSourceEntry {
    pub fn source(&self) -> &Arc<dyn TileSource> {
        &self.source
    }

    pub fn id(&self) -> SourceId {
        self.source.unique_tile_source_id()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }
}

impl std::fmt::Debug for TileSourceEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileSourceEntry")
            .field("id", &self.id())
            .field("min_zoom", &self.source.min_zoom())
            .field("max_zoom", &self.source.max_zoom())
            .field("hidden", &self.hidden)
            .finish()
    }
}

/// Ordered stack of tile sources; index 0 is composited first (bottom)
#[derive(Debug, Clone, Default)]
pub struct TileSourcesContainer {
    entries: Vec<TileSourceEntry>,
}

impl TileSourcesContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index_of(id).is_some()
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|entry| &*entry.id() == id)
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn TileSource>> {
        self.index_of(id).map(|idx| &self.entries[idx].source)
    }

    pub fn get_at(&self, index: usize) -> Option<&Arc<dyn TileSource>> {
        self.entries.get(index).map(|entry| &entry.source)
    }

    pub fn entries(&self) -> &[TileSourceEntry] {
        &self.entries
    }

    /// All sources in z-order, hidden ones included
    pub fn sources(&self) -> impl Iterator<Item = &Arc<dyn TileSource>> {
        self.entries.iter().map(|entry| &entry.source)
    }

    /// Sources that take part in compositing, bottom first
    pub fn visible_sources(&self) -> impl Iterator<Item = &Arc<dyn TileSource>> {
        self.entries
            .iter()
            .filter(|entry| !entry.hidden)
            .map(|entry| &entry.source)
    }

    /// Append a source on top of the stack
    pub fn add(&mut self, source: Arc<dyn TileSource>) -> Result<()> {
        let index = self.entries.len();
        self.insert_at(source, index)
    }

    pub fn insert_at(&mut self, source: Arc<dyn TileSource>, index: usize) -> Result<()> {
        let id = source.unique_tile_source_id();
        if self.contains(&id) {
            return Err(MapError::TileSource(format!(
                "tile source '{}' is already in the container",
                id
            )));
        }
        if index > self.entries.len() {
            return Err(MapError::TileSource(format!(
                "index {} out of range for {} tile sources",
                index,
                self.entries.len()
            )));
        }
        let (min, max) = (source.min_zoom(), source.max_zoom());
        if min > max || min >= MAX_TILE_ZOOM {
            return Err(MapError::TileSource(format!(
                "tile source '{}' has an unusable zoom range [{}, {}]",
                id, min, max
            )));
        }
        if max >= MAX_TILE_ZOOM {
            log::warn!(
                "tile source '{}' serves zoom up to {}; tiles stop at {}",
                id,
                max,
                MAX_TILE_ZOOM - 1
            );
        }
        self.entries.insert(
            index,
            TileSourceEntry {
                source,
                hidden: false,
            },
        );
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Result<Arc<dyn TileSource>> {
        let index = self
            .index_of(id)
            .ok_or_else(|| MapError::TileSource(format!("unknown tile source '{}'", id)))?;
        Ok(self.entries.remove(index).source)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Arc<dyn TileSource>> {
        if index >= self.entries.len() {
            return Err(MapError::TileSource(format!(
                "index {} out of range for {} tile sources",
                index,
                self.entries.len()
            )));
        }
        Ok(self.entries.remove(index).source)
    }

    /// Move the source at `from` so that it ends up at index `to`
    pub fn move_source(&mut self, from: usize, to: usize) -> Result<()> {
        let len = self.entries.len();
        if from >= len || to >= len {
            return Err(MapError::TileSource(format!(
                "cannot move tile source {} -> {} among {}",
                from, to, len
            )));
        }
        let entry = self.entries.remove(from);
        self.entries.insert(to, entry);
        Ok(())
    }

    /// Exclude a source from compositing while keeping its place and cache
    pub fn set_hidden(&mut self, id: &str, hidden: bool) -> Result<()> {
        let index = self
            .index_of(id)
            .ok_or_else(|| MapError::TileSource(format!("unknown tile source '{}'", id)))?;
        self.entries[index].hidden = hidden;
        Ok(())
    }

    pub fn is_hidden(&self, id: &str) -> Option<bool> {
        self.index_of(id).map(|idx| self.entries[idx].hidden)
    }

    /// Zoom range usable by every visible source: `[max of mins, min of maxes]`.
    ///
    /// No visible sources gives `[0, 0]`; disjoint ranges collapse to the
    /// largest minimum.
    pub fn zoom_range(&self) -> (u8, u8) {
        let mut visible = self.visible_sources().peekable();
        if visible.peek().is_none() {
            return (0, 0);
        }
        let (min, max) = visible.fold((u8::MIN, u8::MAX), |(min, max), source| {
            let (source_min, source_max) = source.zoom_range();
            (min.max(source_min), max.min(source_max))
        });
        if min > max {
            (min, min)
        } else {
            (min, max)
        }
    }

    /// Tile side of the bottom visible source
    pub fn tile_side_length(&self) -> u32 {
        self.visible_sources()
            .next()
            .map(|source| source.tile_side_length())
            .unwrap_or(TILE_SIZE)
    }
}
