//! Easing curves and time-driven view transitions.
//!
//! Animations advance by explicit time steps (`advance(dt)`) so the
//! coordinating context controls the clock, whether it is a display link, a
//! test or a headless export.

use serde::{Deserialize, Serialize};

use crate::core::geo::ProjectedPoint;
use crate::prelude::Duration;

pub fn ease_out_cubic(t: f64) -> f64 {
    EasingType::EaseOut.apply(t)
}

pub fn lerp(start: f64, end: f64, t: f64) -> f64 {
    start + (end - start) * t
}

/// Easing curve applied to animation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EasingType {
    Linear,
    EaseIn,
    #[default]
    EaseOut,
    EaseInOut,
    Smooth,
    UltraSmooth,
}

impl EasingType {
    /// Apply easing function to a normalized time value (0.0 to 1.0)
    pub fn apply(self, t: f64) -> f64 {
        let t = t.clamp(0.0, 1.0);
        match self {
            EasingType::Linear => t,
            EasingType::EaseIn => t * t * t,
            EasingType::EaseOut => {
                let t = t - 1.0;
                t * t * t + 1.0
            }
            EasingType::EaseInOut => {
                if t < 0.5 {
                    4.0 * t * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(3) / 2.0
                }
            }
            // 3t^2 - 2t^3
            EasingType::Smooth => t * t * (3.0 - 2.0 * t),
            // 6t^5 - 15t^4 + 10t^3
            EasingType::UltraSmooth => t * t * t * (t * (t * 6.0 - 15.0) + 10.0),
        }
    }
}

/// One frame of an in-progress view animation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewFrame {
    pub center: ProjectedPoint,
    pub zoom: f64,
    pub progress: f64,
}

/// Interpolates the view centre and zoom between two states.
///
/// Zoom is interpolated linearly in level space, which is geometric in scale,
/// so a zoom-out/in reads as a constant-rate change.
#[derive(Debug, Clone)]
pub struct ViewAnimation {
    from_center: ProjectedPoint,
    to_center: ProjectedPoint,
    from_zoom: f64,
    to_zoom: f64,
    duration: Duration,
    elapsed: Duration,
    easing: EasingType,
}

impl ViewAnimation {
    pub fn new(
        from_center: ProjectedPoint,
        to_center: ProjectedPoint,
        from_zoom: f64,
        to_zoom: f64,
        duration: Duration,
        easing: EasingType,
    ) -> Self {
        Self {
            from_center,
            to_center,
            from_zoom,
            to_zoom,
            duration,
            elapsed: Duration::ZERO,
            easing,
        }
    }

    pub fn target_center(&self) -> ProjectedPoint {
        self.to_center
    }

    pub fn target_zoom(&self) -> f64 {
        self.to_zoom
    }

    pub fn is_finished(&self) -> bool {
        self.elapsed >= self.duration
    }

    /// Advances the clock and returns the frame to display
    pub fn advance(&mut self, dt: Duration) -> ViewFrame {
        self.elapsed = (self.elapsed + dt).min(self.duration);
        self.frame()
    }

    pub fn frame(&self) -> ViewFrame {
        let raw = if self.duration.is_zero() {
            1.0
        } else {
            self.elapsed.as_secs_f64() / self.duration.as_secs_f64()
        };
        let t = self.easing.apply(raw);
        if raw >= 1.0 {
            return ViewFrame {
                center: self.to_center,
                zoom: self.to_zoom,
                progress: 1.0,
            };
        }
        ViewFrame {
            center: ProjectedPoint::new(
                lerp(self.from_center.x, self.to_center.x, t),
                lerp(self.from_center.y, self.to_center.y, t),
            ),
            zoom: lerp(self.from_zoom, self.to_zoom, t),
            progress: raw,
        }
    }
}
