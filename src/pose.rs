//! Animated poses.
//!
//! A [`Pose`] keeps the value a source is currently rendered at, the value it is
//! moving toward, and the transition between the two. Transitions use a
//! quarter-sine ease so movement starts quickly and settles gently, which hides
//! the hard stop when a remote user stops walking.

use crate::math::{PoseState, Vec3, lerp_bounded};
use std::f64::consts::FRAC_PI_2;

#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    current: PoseState,
    start: PoseState,
    target: PoseState,
    offset: Vec3,
    start_time: f64,
    duration: f64,
    animating: bool,
}

impl Pose {
    pub fn new() -> Self {
        Self::from_state(PoseState::identity())
    }

    pub fn from_state(state: PoseState) -> Self {
        Self {
            current: state,
            start: state,
            target: state,
            offset: Vec3::ZERO,
            start_time: 0.0,
            duration: 0.0,
            animating: false,
        }
    }

    /// The interpolated pose, without the comfort offset.
    pub fn current(&self) -> &PoseState {
        &self.current
    }

    pub fn target(&self) -> &PoseState {
        &self.target
    }

    pub fn offset(&self) -> Vec3 {
        self.offset
    }

    pub fn is_animating(&self) -> bool {
        self.animating
    }

    /// Current position with the comfort offset applied.
    pub fn rendered_position(&self) -> Vec3 {
        self.current.position + self.offset
    }

    /// The pose handed to spatializers.
    pub fn rendered(&self) -> PoseState {
        PoseState {
            position: self.rendered_position(),
            ..self.current
        }
    }

    /// Sets the comfort offset. Takes effect immediately.
    pub fn set_offset(&mut self, offset: Vec3) {
        self.offset = offset;
    }

    pub fn set_target_position(&mut self, position: Vec3, now: f64, duration: f64) {
        let target = PoseState {
            position,
            ..self.target
        };
        self.begin(target, now, duration);
    }

    pub fn set_target_orientation(&mut self, forward: Vec3, up: Vec3, now: f64, duration: f64) {
        let target = PoseState {
            forward,
            up,
            ..self.target
        };
        self.begin(target, now, duration);
    }

    pub fn set_target(
        &mut self,
        position: Vec3,
        forward: Vec3,
        up: Vec3,
        now: f64,
        duration: f64,
    ) {
        self.begin(PoseState::new(position, forward, up), now, duration);
    }

    fn begin(&mut self, target: PoseState, now: f64, duration: f64) {
        self.start = self.current;
        self.target = target;
        self.start_time = now;
        self.duration = duration;
        self.animating = true;
    }

    /// Advances the interpolation to time `t`.
    pub fn update(&mut self, t: f64) {
        if !self.animating {
            return;
        }

        let progress = if self.duration > 0.0 {
            ((t - self.start_time) / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if progress >= 1.0 {
            self.current = self.target;
            self.animating = false;
            return;
        }

        let s = (progress * FRAC_PI_2).sin() as f32;
        self.current = PoseState {
            position: lerp_bounded(self.start.position, self.target.position, s),
            forward: lerp_bounded(self.start.forward, self.target.forward, s),
            up: lerp_bounded(self.start.up, self.target.up, s),
        };
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn between(value: f32, a: f32, b: f32) -> bool {
        value >= a.min(b) && value <= a.max(b)
    }

    #[test]
    fn test_snaps_to_target_after_duration() {
        let mut pose = Pose::new();
        let target = Vec3::new(3.7, -1.25, 9.001);
        pose.set_target_position(target, 2.0, 0.75);

        for t in [2.75, 2.750001, 3.0, 100.0] {
            pose.update(t);
            assert_eq!(pose.current().position, target);
            assert_eq!(pose.current(), pose.target());
        }
        assert!(!pose.is_animating());
    }

    #[test]
    fn test_zero_duration_snaps_immediately() {
        let mut pose = Pose::new();
        pose.set_target_position(Vec3::new(1.0, 2.0, 3.0), 5.0, 0.0);
        pose.update(5.0);
        assert_eq!(pose.current().position, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_interpolation_stays_between_endpoints() {
        let mut pose = Pose::from_state(PoseState::from_position(Vec3::new(-2.0, 0.5, 4.0)));
        let start = pose.current().position;
        let target = Vec3::new(6.0, 0.5, -3.5);
        pose.set_target_position(target, 1.0, 2.0);

        let mut previous = start;
        for i in 0..=200 {
            let t = 1.0 + 2.0 * i as f64 / 200.0;
            pose.update(t);
            let p = pose.current().position;
            for k in 0..3 {
                assert!(between(p[k], start[k], target[k]), "component {k} at t={t}");
            }
            // monotone progress toward the target
            assert!(p.distance(target) <= previous.distance(target) + 1e-5);
            previous = p;
        }
    }

    #[test]
    fn test_ease_is_front_loaded() {
        let mut pose = Pose::new();
        pose.set_target_position(Vec3::new(10.0, 0.0, 0.0), 0.0, 1.0);
        pose.update(0.5);
        // sin(pi/4) ~= 0.707, well ahead of linear
        assert!(pose.current().position.x > 7.0 && pose.current().position.x < 7.1);
    }

    #[test]
    fn test_retarget_starts_from_current_value() {
        let mut pose = Pose::new();
        pose.set_target_position(Vec3::new(10.0, 0.0, 0.0), 0.0, 1.0);
        pose.update(0.5);
        let midway = pose.current().position;

        pose.set_target_position(Vec3::new(0.0, 0.0, 0.0), 0.5, 1.0);
        pose.update(0.5);
        assert_eq!(pose.current().position, midway);
        pose.update(1.5);
        assert_eq!(pose.current().position, Vec3::ZERO);
    }

    #[test]
    fn test_orientation_target_keeps_position_target() {
        let mut pose = Pose::new();
        pose.set_target_position(Vec3::new(1.0, 1.0, 1.0), 0.0, 1.0);
        pose.set_target_orientation(Vec3::X, Vec3::Y, 0.0, 1.0);
        pose.update(2.0);
        assert_eq!(pose.current().position, Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(pose.current().forward, Vec3::X);
    }

    #[test]
    fn test_offset_applies_to_rendered_position_only() {
        let mut pose = Pose::from_state(PoseState::from_position(Vec3::new(1.0, 0.0, 0.0)));
        pose.set_offset(Vec3::new(0.5, 0.0, -0.5));
        assert_eq!(pose.current().position, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(pose.rendered_position(), Vec3::new(1.5, 0.0, -0.5));
    }
}
