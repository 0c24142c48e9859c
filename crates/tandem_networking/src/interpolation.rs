//! # Pose Interpolation
//!
//! Non-owners never snap a mirror to a received pose. Each new target
//! starts a blend from wherever the mirror currently is, completed over a
//! short fixed window so that jitter between sends is hidden.
//!
//! ```ignore
//! let mut pose = PoseInterpolator::new(0.15);
//!
//! // On receipt:
//! pose.set_target(current, received);
//!
//! // Each frame:
//! if let Some(sample) = pose.update(dt) {
//!     scene.set_world_position(node, sample.position);
//! }
//! ```

use tandem_shared::{Quaternion, Vec3};

/// Blend curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Jump to the target on the next update.
    HardSnap,
    /// Constant speed.
    Linear,
    /// Fast start, slow end: `1 - (1-t)^2`.
    #[default]
    EaseOut,
    /// S-curve: `3t^2 - 2t^3`.
    SmoothStep,
}

impl InterpolationMode {
    /// Maps linear progress to blend weight.
    #[must_use]
    pub fn weight(self, progress: f32) -> f32 {
        let t = progress.clamp(0.0, 1.0);
        match self {
            Self::HardSnap => 1.0,
            Self::Linear => t,
            Self::EaseOut => {
                let inv = 1.0 - t;
                1.0 - inv * inv
            }
            Self::SmoothStep => t * t * (3.0 - 2.0 * t),
        }
    }
}

/// World-space position and rotation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    /// Scene-space position
    pub position: Vec3,
    /// Scene-space rotation
    pub rotation: Quaternion,
}

impl Pose {
    /// Creates a pose.
    #[must_use]
    pub const fn new(position: Vec3, rotation: Quaternion) -> Self {
        Self { position, rotation }
    }

    /// Returns true if `other` differs by more than either threshold.
    #[must_use]
    pub fn moved_from(&self, other: &Self, position_threshold: f32, rotation_threshold: f32) -> bool {
        self.position.distance(other.position) > position_threshold
            || self.rotation.angle_to(other.rotation) > rotation_threshold
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::new(Vec3::ZERO, Quaternion::IDENTITY)
    }
}

/// Eases a mirror toward the last received pose.
#[derive(Clone, Debug)]
pub struct PoseInterpolator {
    /// Blend window in seconds.
    pub blend_seconds: f32,
    mode: InterpolationMode,
    from: Pose,
    target: Option<Pose>,
    /// 0 at the start of a blend, 1 once the target is reached.
    progress: f32,
    /// Targets received since creation.
    pub total_targets: u32,
}

impl PoseInterpolator {
    /// Creates an idle interpolator.
    #[must_use]
    pub fn new(blend_seconds: f32) -> Self {
        Self {
            blend_seconds,
            mode: InterpolationMode::default(),
            from: Pose::default(),
            target: None,
            progress: 1.0,
            total_targets: 0,
        }
    }

    /// Sets the blend curve.
    pub fn set_mode(&mut self, mode: InterpolationMode) {
        self.mode = mode;
    }

    /// Current blend curve
    #[must_use]
    pub const fn mode(&self) -> InterpolationMode {
        self.mode
    }

    /// Starts a blend from `current` toward `target`.
    pub fn set_target(&mut self, current: Pose, target: Pose) {
        self.from = current;
        self.target = Some(target);
        self.total_targets += 1;
        self.progress = if self.blend_seconds > 0.0 && self.mode != InterpolationMode::HardSnap {
            0.0
        } else {
            1.0
        };
    }

    /// Drops the target. The mirror stays where it is.
    pub fn clear(&mut self) {
        self.target = None;
        self.progress = 1.0;
    }

    /// Last received pose
    #[must_use]
    pub const fn target(&self) -> Option<Pose> {
        self.target
    }

    /// Returns true while a blend is running.
    #[must_use]
    pub fn is_blending(&self) -> bool {
        self.target.is_some() && self.progress < 1.0
    }

    /// Linear progress of the running blend, from 0 to 1.
    #[must_use]
    pub const fn progress(&self) -> f32 {
        self.progress
    }

    /// Advances the blend by `dt` seconds and returns the pose to apply, or
    /// `None` once the target has been reached and applied.
    pub fn update(&mut self, dt: f32) -> Option<Pose> {
        let target = self.target?;
        if self.progress >= 1.0 {
            // Applied once after the blend ends, then idle
            self.target = None;
            return Some(target);
        }
        self.progress = (self.progress + dt / self.blend_seconds).min(1.0);
        Some(self.sample(target))
    }

    fn sample(&self, target: Pose) -> Pose {
        let w = self.mode.weight(self.progress);
        Pose {
            position: self.from.position.lerp(target.position, w),
            rotation: self.from.rotation.slerp(target.rotation, w),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(x: f32) -> Pose {
        Pose::new(Vec3::new(x, 0.0, 0.0), Quaternion::IDENTITY)
    }

    #[test]
    fn test_hard_snap() {
        let mut interp = PoseInterpolator::new(0.1);
        interp.set_mode(InterpolationMode::HardSnap);
        interp.set_target(at(0.0), at(10.0));
        let pose = interp.update(0.0).unwrap();
        assert!((pose.position.x - 10.0).abs() < 1e-4);
        assert!(interp.update(0.016).is_none());
    }

    #[test]
    fn test_linear_blend() {
        let mut interp = PoseInterpolator::new(0.1);
        interp.set_mode(InterpolationMode::Linear);
        interp.set_target(at(0.0), at(10.0));

        let pose = interp.update(0.05).unwrap();
        assert!((pose.position.x - 5.0).abs() < 0.01);
        assert!(interp.is_blending());

        let pose = interp.update(0.05).unwrap();
        assert!((pose.position.x - 10.0).abs() < 1e-3);
        assert!(!interp.is_blending());
    }

    #[test]
    fn test_ease_out_leads_linear() {
        let mut interp = PoseInterpolator::new(0.1);
        interp.set_target(at(0.0), at(10.0));
        let pose = interp.update(0.05).unwrap();
        assert!(pose.position.x > 5.0, "ease-out should be past halfway at 50%");
    }

    #[test]
    fn test_smoothstep_midpoint() {
        let mut interp = PoseInterpolator::new(0.1);
        interp.set_mode(InterpolationMode::SmoothStep);
        interp.set_target(at(0.0), at(10.0));
        let pose = interp.update(0.05).unwrap();
        assert!((pose.position.x - 5.0).abs() < 0.01);
    }

    #[test]
    fn test_retarget_starts_from_current() {
        let mut interp = PoseInterpolator::new(0.1);
        interp.set_mode(InterpolationMode::Linear);
        interp.set_target(at(0.0), at(10.0));
        let midway = interp.update(0.05).unwrap();

        interp.set_target(midway, at(20.0));
        assert!((interp.progress()).abs() < f32::EPSILON);
        let pose = interp.update(0.05).unwrap();
        assert!((pose.position.x - 12.5).abs() < 0.01);
        assert_eq!(interp.total_targets, 2);
    }

    #[test]
    fn test_moved_thresholds() {
        let a = at(0.0);
        assert!(!a.moved_from(&at(0.0005), 0.001, 0.01));
        assert!(a.moved_from(&at(0.01), 0.001, 0.01));
        let turned = Pose::new(Vec3::ZERO, Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), 0.5));
        assert!(a.moved_from(&turned, 0.001, 0.01));
    }
}
