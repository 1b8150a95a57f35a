//! Notifications from the map core to the presentation layer.
//!
//! Consumers subscribe to the event kinds they care about and receive events
//! on a crossbeam channel. A subscriber whose receiver has been dropped is
//! pruned the next time an event of its kinds is published.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::annotation::{AnnotationId, UserLocation, UserTrackingMode};
use crate::core::bounds::ProjectedRect;
use crate::core::controller::InteractionState;
use crate::core::geo::{LatLng, PixelPoint, TileAddress};
use crate::tiles::source::{FetchError, SourceId, TileImage};

#[derive(Debug, Clone)]
pub enum MapEvent {
    /// Projected bounds or zoom changed
    BoundsChanged { bounds: ProjectedRect, zoom: f64 },
    TileReady {
        tile: TileAddress,
        source_id: SourceId,
        image: TileImage,
        /// Ancestor the image was cropped from, when the tile itself was unavailable
        fallback_from: Option<TileAddress>,
        /// `"z/x/y"` label when debug tiles are enabled
        debug_label: Option<String>,
    },
    TileFailed {
        tile: TileAddress,
        source_id: SourceId,
        error: FetchError,
    },
    AnnotationTapped { id: AnnotationId, position: PixelPoint },
    MapTapped { position: PixelPoint, coordinate: LatLng },
    AnnotationsHidden { ids: Vec<AnnotationId> },
    AnnotationsShown { ids: Vec<AnnotationId> },
    UserLocationUpdated { location: UserLocation },
    UserTrackingModeChanged { mode: UserTrackingMode },
    InteractionStateChanged {
        from: InteractionState,
        to: InteractionState,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    BoundsChanged,
    TileReady,
    TileFailed,
    AnnotationTapped,
    MapTapped,
    AnnotationsHidden,
    AnnotationsShown,
    UserLocationUpdated,
    UserTrackingModeChanged,
    InteractionStateChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::BoundsChanged,
        EventKind::TileReady,
        EventKind::TileFailed,
        EventKind::AnnotationTapped,
        EventKind::MapTapped,
        EventKind::AnnotationsHidden,
        EventKind::AnnotationsShown,
        EventKind::UserLocationUpdated,
        EventKind::UserTrackingModeChanged,
        EventKind::InteractionStateChanged,
    ];
}

impl MapEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            MapEvent::BoundsChanged { .. } => EventKind::BoundsChanged,
            MapEvent::TileReady { .. } => EventKind::TileReady,
            MapEvent::TileFailed { .. } => EventKind::TileFailed,
            MapEvent::AnnotationTapped { .. } => EventKind::AnnotationTapped,
            MapEvent::MapTapped { .. } => EventKind::MapTapped,
            MapEvent::AnnotationsHidden { .. } => EventKind::AnnotationsHidden,
            MapEvent::AnnotationsShown { .. } => EventKind::AnnotationsShown,
            MapEvent::UserLocationUpdated { .. } => EventKind::UserLocationUpdated,
            MapEvent::UserTrackingModeChanged { .. } => EventKind::UserTrackingModeChanged,
            MapEvent::InteractionStateChanged { .. } => EventKind::InteractionStateChanged,
        }
    }
}

struct Subscriber {
    kinds: Vec<EventKind>,
    tx: Sender<MapEvent>,
}

#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive every event whose kind is in `kinds`
    pub fn subscribe(&mut self, kinds: &[EventKind]) -> Receiver<MapEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(Subscriber {
            kinds: kinds.to_vec(),
            tx,
        });
        rx
    }

    pub fn subscribe_all(&mut self) -> Receiver<MapEvent> {
        self.subscribe(&EventKind::ALL)
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.subscribers.iter().any(|s| s.kinds.contains(&kind))
    }

    pub fn publish(&mut self, event: MapEvent) {
        let kind = event.kind();
        self.subscribers.retain(|subscriber| {
            !subscriber.kinds.contains(&kind) || subscriber.tx.send(event.clone()).is_ok()
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribers_only_get_their_kinds() {
        let mut bus = EventBus::new();
        let bounds_rx = bus.subscribe(&[EventKind::BoundsChanged]);
        let all_rx = bus.subscribe_all();

        bus.publish(MapEvent::BoundsChanged {
            bounds: ProjectedRect::default(),
            zoom: 3.0,
        });
        bus.publish(MapEvent::AnnotationsShown { ids: vec![1, 2] });

        assert_eq!(bounds_rx.try_iter().count(), 1);
        let kinds: Vec<EventKind> = all_rx.try_iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, [EventKind::BoundsChanged, EventKind::AnnotationsShown]);
    }

    #[test]
    fn test_dropped_receivers_are_pruned() {
        let mut bus = EventBus::new();
        let rx = bus.subscribe(&[EventKind::MapTapped]);
        drop(rx);
        let _kept = bus.subscribe(&[EventKind::TileReady]);

        bus.publish(MapEvent::AnnotationsHidden { ids: vec![] });
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(MapEvent::MapTapped {
            position: PixelPoint::new(1.0, 1.0),
            coordinate: LatLng::new(0.0, 0.0),
        });
        assert_eq!(bus.subscriber_count(), 1);
        assert!(bus.has_subscribers(EventKind::TileReady));
    }
}
