use serde::{Deserialize, Serialize};

use crate::core::geo::{LatLng, ProjectedPoint};

pub type AnnotationId = u64;

/// A point of interest placed on the map.
///
/// The core only tracks position and identity; how an annotation is drawn is
/// up to the presentation layer, which can key its views on `id` or carry
/// arbitrary data in `user_info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: AnnotationId,
    pub coordinate: LatLng,
    /// Filled in by the map when the annotation is added
    pub projected: ProjectedPoint,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub annotation_type: Option<String>,
    pub user_info: Option<serde_json::Value>,
    /// Whether this annotation may be merged into a cluster
    pub clustering_enabled: bool,
}

impl Annotation {
    pub fn new(coordinate: LatLng) -> Self {
        Self {
            id: 0,
            coordinate,
            projected: ProjectedPoint::default(),
            title: None,
            subtitle: None,
            annotation_type: None,
            user_info: None,
            clustering_enabled: true,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }

    pub fn with_type(mut self, annotation_type: impl Into<String>) -> Self {
        self.annotation_type = Some(annotation_type.into());
        self
    }

    pub fn with_user_info(mut self, user_info: serde_json::Value) -> Self {
        self.user_info = Some(user_info);
        self
    }

    pub fn with_clustering(mut self, enabled: bool) -> Self {
        self.clustering_enabled = enabled;
        self
    }
}

/// Annotations merged because they fall in the same screen cell
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationCluster {
    /// Gravity centre of the members, or the cell centre
    pub position: ProjectedPoint,
    pub members: Vec<AnnotationId>,
}

impl AnnotationCluster {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A fix reported by the platform location service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLocation {
    pub coordinate: LatLng,
    /// Radius of uncertainty in meters
    pub horizontal_accuracy: f64,
    /// Degrees clockwise from true north
    pub heading: Option<f64>,
}

impl UserLocation {
    pub fn new(coordinate: LatLng, horizontal_accuracy: f64) -> Self {
        Self {
            coordinate,
            horizontal_accuracy: horizontal_accuracy.max(0.0),
            heading: None,
        }
    }

    pub fn with_heading(mut self, heading: f64) -> Self {
        self.heading = Some(heading.rem_euclid(360.0));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UserTrackingMode {
    #[default]
    None,
    /// Keep the map centred on the user
    Follow,
    /// Follow and report heading with each update
    FollowWithHeading,
}

impl UserTrackingMode {
    pub fn follows(&self) -> bool {
        !matches!(self, UserTrackingMode::None)
    }
}
