//! Math types for voicefield

pub use glam::Vec3;

/// A position plus an orientation given as forward and up vectors.
///
/// Forward and up are expected to be unit length and orthogonal. They are
/// stored exactly as supplied and never renormalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseState {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl PoseState {
    pub fn new(position: Vec3, forward: Vec3, up: Vec3) -> Self {
        Self {
            position,
            forward,
            up,
        }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::identity()
        }
    }

    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up)
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.position.distance(other.position)
    }

    /// Expresses a world-space point in this pose's frame as
    /// `(right, up, forward)` components.
    pub fn to_local(&self, point: Vec3) -> Vec3 {
        let relative = point - self.position;
        Vec3::new(
            relative.dot(self.right()),
            relative.dot(self.up),
            relative.dot(self.forward),
        )
    }
}

impl Default for PoseState {
    fn default() -> Self {
        Self::identity()
    }
}

/// Interpolates from `start` toward `target` by `s` in `[0, 1]`, clamping each
/// component into the closed range spanned by the two endpoints.
pub(crate) fn lerp_bounded(start: Vec3, target: Vec3, s: f32) -> Vec3 {
    start
        .lerp(target, s)
        .clamp(start.min(target), start.max(target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_right_vector_of_identity() {
        let pose = PoseState::identity();
        assert_eq!(pose.right(), Vec3::X);
    }

    #[test]
    fn test_to_local() {
        let pose = PoseState::from_position(Vec3::new(1.0, 0.0, 0.0));
        let local = pose.to_local(Vec3::new(1.0, 0.0, -3.0));
        assert!((local - Vec3::new(0.0, 0.0, 3.0)).length() < 1e-6);
    }

    #[test]
    fn test_lerp_bounded_never_overshoots() {
        let a = Vec3::new(0.1, -7.3, 1e-3);
        let b = Vec3::new(0.3, 2.9, -4.0);
        for i in 0..=100 {
            let v = lerp_bounded(a, b, i as f32 / 100.0);
            for k in 0..3 {
                assert!(v[k] >= a[k].min(b[k]) && v[k] <= a[k].max(b[k]));
            }
        }
    }
}
