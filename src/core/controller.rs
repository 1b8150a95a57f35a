//! Interaction state machine driving pans, zooms, inertia and animations.
//!
//! The controller never touches the viewport itself. Each [`tick`] yields a
//! [`ControllerStep`] that the map applies, and every state change comes back
//! as a [`Transition`] so it can be published as an event.
//!
//! [`tick`]: InteractionController::tick

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::animation::{ViewAnimation, ViewFrame};
use crate::core::config::DecelerationMode;
use crate::core::constants::DECELERATION_STOP_VELOCITY;
use crate::core::geo::PixelPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InteractionState {
    #[default]
    Idle,
    Panning,
    Zooming,
    Decelerating,
    AnimatingToTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: InteractionState,
    pub to: InteractionState,
}

/// What the map should do with the viewport for this tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControllerStep {
    None,
    /// Drag the content by this many pixels
    Move(PixelPoint),
    /// Jump to an animation frame
    Frame(ViewFrame),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutcome {
    pub step: ControllerStep,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone)]
pub struct InteractionController {
    state: InteractionState,
    deceleration_mode: DecelerationMode,
    /// Pixels per second
    velocity: PixelPoint,
    animation: Option<ViewAnimation>,
}

impl InteractionController {
    pub fn new(deceleration_mode: DecelerationMode) -> Self {
        Self {
            state: InteractionState::Idle,
            deceleration_mode,
            velocity: PixelPoint::default(),
            animation: None,
        }
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn deceleration_mode(&self) -> DecelerationMode {
        self.deceleration_mode
    }

    pub fn set_deceleration_mode(&mut self, mode: DecelerationMode) {
        self.deceleration_mode = mode;
    }

    pub fn velocity(&self) -> PixelPoint {
        self.velocity
    }

    pub fn animation(&self) -> Option<&ViewAnimation> {
        self.animation.as_ref()
    }

    pub fn is_idle(&self) -> bool {
        self.state == InteractionState::Idle
    }

    fn enter(&mut self, to: InteractionState) -> Option<Transition> {
        let from = self.state;
        if from == to {
            return None;
        }
        log::debug!("interaction {:?} -> {:?}", from, to);
        self.state = to;
        if to != InteractionState::Decelerating {
            self.velocity = PixelPoint::default();
        }
        if to != InteractionState::AnimatingToTarget {
            self.animation = None;
        }
        Some(Transition { from, to })
    }

    /// A drag started; cancels inertia and animations
    pub fn begin_pan(&mut self) -> Option<Transition> {
        self.enter(InteractionState::Panning)
    }

    /// The drag ended with `velocity` pixels per second
    pub fn pan_released(&mut self, velocity: PixelPoint) -> Option<Transition> {
        if self.state != InteractionState::Panning {
            return None;
        }
        let speed = velocity.x.hypot(velocity.y);
        let coasting = self.deceleration_mode.friction().is_some()
            && speed.is_finite()
            && speed >= DECELERATION_STOP_VELOCITY;
        if coasting {
            let transition = self.enter(InteractionState::Decelerating);
            self.velocity = velocity;
            transition
        } else {
            self.enter(InteractionState::Idle)
        }
    }

    /// Pinch, double tap or programmatic zoom started
    pub fn begin_zoom(&mut self) -> Option<Transition> {
        self.enter(InteractionState::Zooming)
    }

    pub fn end_zoom(&mut self) -> Option<Transition> {
        if self.state == InteractionState::Zooming {
            self.enter(InteractionState::Idle)
        } else {
            None
        }
    }

    pub fn start_animation(&mut self, animation: ViewAnimation) -> Option<Transition> {
        let transition = self.enter(InteractionState::AnimatingToTarget);
        self.animation = Some(animation);
        transition
    }

    /// Return to idle from any state, e.g. when inertia runs into a bound
    pub fn stop(&mut self) -> Option<Transition> {
        self.enter(InteractionState::Idle)
    }

    /// Advance inertia or the running animation by `dt`
    pub fn tick(&mut self, dt: Duration) -> TickOutcome {
        match self.state {
            InteractionState::Decelerating => self.tick_deceleration(dt),
            InteractionState::AnimatingToTarget => self.tick_animation(dt),
            _ => TickOutcome {
                step: ControllerStep::None,
                transition: None,
            },
        }
    }

    fn tick_deceleration(&mut self, dt: Duration) -> TickOutcome {
        let Some(friction) = self.deceleration_mode.friction() else {
            return TickOutcome {
                step: ControllerStep::None,
                transition: self.stop(),
            };
        };
        let secs = dt.as_secs_f64();
        // v(t) = v0 * friction^t, so the distance covered is v0 * (friction^dt - 1) / ln(friction)
        let decay = friction.powf(secs);
        let travel = (decay - 1.0) / friction.ln();
        let step = PixelPoint::new(self.velocity.x * travel, self.velocity.y * travel);
        self.velocity = PixelPoint::new(self.velocity.x * decay, self.velocity.y * decay);

        let transition = if self.velocity.x.hypot(self.velocity.y) < DECELERATION_STOP_VELOCITY {
            self.stop()
        } else {
            None
        };
        TickOutcome {
            step: ControllerStep::Move(step),
            transition,
        }
    }

    fn tick_animation(&mut self, dt: Duration) -> TickOutcome {
        let Some(animation) = self.animation.as_mut() else {
            return TickOutcome {
                step: ControllerStep::None,
                transition: self.stop(),
            };
        };
        let frame = animation.advance(dt);
        let transition = if animation.is_finished() {
            self.stop()
        } else {
            None
        };
        TickOutcome {
            step: ControllerStep::Frame(frame),
            transition,
        }
    }
}

impl Default for InteractionController {
    fn default() -> Self {
        Self::new(DecelerationMode::Normal)
    }
}
