//! Animated camera moves with lock and revert.
//!
//! A forward move always wins: while one is running, further moves are dropped rather
//! than queued. A locked move remembers the pose from before the lock began so that
//! [`CameraTransitionController::revert_last`] can return there after any chain of
//! locked moves.

use crate::camera::Camera3D;
use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub position: Vec3,
    pub target: Vec3,
}

impl CameraPose {
    pub fn of(camera: &Camera3D) -> Self {
        Self { position: camera.position, target: camera.target }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraState {
    Idle,
    Animating,
    AnimatingLocked,
    /// A locked move finished; the camera holds until reverted.
    Locked,
    Reverting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionKind {
    Forward { lock: bool },
    Revert,
}

/// Position and target interpolate together from one start time so they can only be
/// started or stopped as a pair.
#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CameraPose,
    to: CameraPose,
    started_at: f32,
    duration: f32,
    kind: TransitionKind,
}

impl Transition {
    fn progress(&self, now: f32) -> f32 {
        if self.duration <= f32::EPSILON {
            return 1.0;
        }
        ((now - self.started_at) / self.duration).clamp(0.0, 1.0)
    }

    fn sample(&self, t: f32) -> CameraPose {
        if t >= 1.0 {
            return self.to;
        }
        let eased = ease_out_quad(t);
        CameraPose {
            position: self.from.position.lerp(self.to.position, eased),
            target: self.from.target.lerp(self.to.target, eased),
        }
    }
}

pub fn ease_out_quad(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    1.0 - (1.0 - t) * (1.0 - t)
}

#[derive(Debug, Default)]
pub struct CameraTransitionController {
    now: f32,
    active: Option<Transition>,
    locked: bool,
    last: Option<CameraPose>,
}

impl CameraTransitionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// A forward move is in flight.
    pub fn animating(&self) -> bool {
        matches!(self.active, Some(Transition { kind: TransitionKind::Forward { .. }, .. }))
    }

    pub fn reverting(&self) -> bool {
        matches!(self.active, Some(Transition { kind: TransitionKind::Revert, .. }))
    }

    pub fn locked(&self) -> bool {
        self.locked
    }

    /// The per-frame orbit update must not run while this is true.
    pub fn owns_camera(&self) -> bool {
        self.locked || self.active.is_some()
    }

    pub fn last_pose(&self) -> Option<CameraPose> {
        self.last
    }

    pub fn state(&self) -> CameraState {
        match (self.active.map(|t| t.kind), self.locked) {
            (Some(TransitionKind::Forward { .. }), true) => CameraState::AnimatingLocked,
            (Some(TransitionKind::Forward { .. }), false) => CameraState::Animating,
            (Some(TransitionKind::Revert), _) => CameraState::Reverting,
            (None, true) => CameraState::Locked,
            (None, false) => CameraState::Idle,
        }
    }

    /// Starts an eased move towards the given pose. Missing components keep the current
    /// value. Returns false when a forward move is already running.
    pub fn move_to(
        &mut self,
        camera: &Camera3D,
        position: Option<Vec3>,
        target: Option<Vec3>,
        duration_ms: f32,
        lock: bool,
    ) -> bool {
        if self.animating() {
            tracing::debug!(target: "camera", "move ignored: transition already running");
            return false;
        }
        if self.reverting() {
            tracing::debug!(target: "camera", "cancelling revert in flight");
            self.active = None;
        }
        let from = CameraPose::of(camera);
        if !self.locked {
            self.last = Some(from);
        }
        let to = CameraPose { position: position.unwrap_or(from.position), target: target.unwrap_or(from.target) };
        self.active = Some(Transition {
            from,
            to,
            started_at: self.now,
            duration: duration_ms.max(0.0) / 1000.0,
            kind: TransitionKind::Forward { lock },
        });
        self.locked = lock;
        true
    }

    /// Eases back to the pose saved before the lock began. Only valid while locked and
    /// not moving forward.
    pub fn revert_last(&mut self, camera: &Camera3D, duration_ms: f32) -> bool {
        if !self.locked || self.animating() {
            return false;
        }
        let Some(last) = self.last else {
            return false;
        };
        self.active = Some(Transition {
            from: CameraPose::of(camera),
            to: last,
            started_at: self.now,
            duration: duration_ms.max(0.0) / 1000.0,
            kind: TransitionKind::Revert,
        });
        true
    }

    /// Advances the shared clock to `now` seconds and writes the interpolated pose.
    pub fn update(&mut self, now: f32, camera: &mut Camera3D) {
        self.now = now;
        let Some(transition) = self.active else {
            return;
        };
        let t = transition.progress(now);
        let pose = transition.sample(t);
        camera.position = pose.position;
        camera.target = pose.target;
        if t >= 1.0 {
            self.active = None;
            match transition.kind {
                TransitionKind::Forward { lock } => self.locked = lock,
                TransitionKind::Revert => {
                    self.locked = false;
                    self.last = None;
                }
            }
            tracing::debug!(target: "camera", state = ?self.state(), "transition complete");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera3D {
        Camera3D::new(Vec3::new(0.0, 2.0, 10.0), Vec3::ZERO, 1.0, 0.1, 100.0)
    }

    #[test]
    fn easing_is_monotonic_and_bounded() {
        assert_eq!(ease_out_quad(0.0), 0.0);
        assert_eq!(ease_out_quad(1.0), 1.0);
        assert!(ease_out_quad(0.5) > 0.5);
    }

    #[test]
    fn unlocked_move_returns_to_idle() {
        let mut controller = CameraTransitionController::new();
        let mut cam = camera();
        assert!(controller.move_to(&cam, Some(Vec3::new(5.0, 5.0, 5.0)), None, 200.0, false));
        assert_eq!(controller.state(), CameraState::Animating);
        controller.update(0.1, &mut cam);
        assert!(cam.position != Vec3::new(5.0, 5.0, 5.0));
        controller.update(0.25, &mut cam);
        assert_eq!(cam.position, Vec3::new(5.0, 5.0, 5.0));
        assert_eq!(cam.target, Vec3::ZERO);
        assert_eq!(controller.state(), CameraState::Idle);
        assert!(!controller.revert_last(&cam, 100.0));
    }

    #[test]
    fn chained_locked_moves_remember_pre_lock_pose() {
        let mut controller = CameraTransitionController::new();
        let mut cam = camera();
        let original = CameraPose::of(&cam);
        controller.move_to(&cam, Some(Vec3::X * 4.0), None, 100.0, true);
        controller.update(0.2, &mut cam);
        assert_eq!(controller.state(), CameraState::Locked);
        controller.move_to(&cam, Some(Vec3::Y * 4.0), None, 100.0, true);
        controller.update(0.4, &mut cam);
        assert_eq!(controller.last_pose(), Some(original));
        assert!(controller.revert_last(&cam, 100.0));
        assert_eq!(controller.state(), CameraState::Reverting);
        controller.update(0.6, &mut cam);
        assert_eq!(CameraPose::of(&cam), original);
        assert_eq!(controller.state(), CameraState::Idle);
    }

    #[test]
    fn zero_duration_completes_on_next_update() {
        let mut controller = CameraTransitionController::new();
        let mut cam = camera();
        controller.move_to(&cam, None, Some(Vec3::ONE), 0.0, false);
        controller.update(0.0, &mut cam);
        assert_eq!(cam.target, Vec3::ONE);
        assert!(!controller.owns_camera());
    }
}
