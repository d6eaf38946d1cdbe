use crate::error::{StageError, StageResult};
use crate::scene_graph::Transform3D;
use bevy_ecs::prelude::Entity;
use glam::Vec3;

pub(crate) const SCALE_MIN_RATIO: f32 = 0.05;
pub(crate) const SCALE_MAX_RATIO: f32 = 20.0;
pub(crate) const SCALE_SNAP_STEP: f32 = 0.1;
pub(crate) const TRANSLATE_SNAP_STEP: f32 = 0.05;
pub(crate) const ROTATE_SNAP_STEP_RADIANS: f32 = 15.0_f32.to_radians();

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum GizmoMode {
    #[default]
    Translate,
    Scale,
    Rotate,
}

impl GizmoMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "translate" | "move" => Some(GizmoMode::Translate),
            "rotate" => Some(GizmoMode::Rotate),
            "scale" => Some(GizmoMode::Scale),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            GizmoMode::Translate => "translate",
            GizmoMode::Scale => "scale",
            GizmoMode::Rotate => "rotate",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ToolKind {
    #[default]
    Orbit,
    Select,
}

impl ToolKind {
    pub fn parse(name: &str) -> StageResult<Self> {
        match name.to_ascii_lowercase().as_str() {
            "orbit" | "camera" => Ok(ToolKind::Orbit),
            "select" | "selection" => Ok(ToolKind::Select),
            _ => Err(StageError::UnknownTool(name.to_string())),
        }
    }
}

/// Interactive transform handle; bound to at most one node at a time.
#[derive(Debug, Default)]
pub struct Gizmo {
    mode: GizmoMode,
    attached: Option<Entity>,
}

impl Gizmo {
    pub fn mode(&self) -> GizmoMode {
        self.mode
    }

    pub fn attached(&self) -> Option<Entity> {
        self.attached
    }

    pub fn attach(&mut self, entity: Entity) {
        self.attached = Some(entity);
    }

    pub fn detach(&mut self) -> Option<Entity> {
        self.attached.take()
    }

    /// Applies a drag in the current mode. `delta` is a world offset for translate,
    /// euler radians for rotate and a per-axis ratio offset (1 + delta) for scale.
    pub fn apply_drag(&self, start: &Transform3D, delta: Vec3, snap: bool) -> Transform3D {
        let mut next = *start;
        match self.mode {
            GizmoMode::Translate => {
                let mut translation = start.translation + delta;
                if snap {
                    translation = (translation / TRANSLATE_SNAP_STEP).round() * TRANSLATE_SNAP_STEP;
                }
                next.translation = translation;
            }
            GizmoMode::Rotate => {
                let mut euler = start.euler() + delta;
                if snap {
                    euler = (euler / ROTATE_SNAP_STEP_RADIANS).round() * ROTATE_SNAP_STEP_RADIANS;
                }
                next.set_euler(euler);
            }
            GizmoMode::Scale => {
                let ratio = Vec3::new(
                    apply_scale_ratio(1.0 + delta.x, snap),
                    apply_scale_ratio(1.0 + delta.y, snap),
                    apply_scale_ratio(1.0 + delta.z, snap),
                );
                next.scale = start.scale * ratio;
            }
        }
        next
    }
}

pub(crate) fn apply_scale_ratio(ratio: f32, snap: bool) -> f32 {
    let clamped = ratio.clamp(SCALE_MIN_RATIO, SCALE_MAX_RATIO);
    if snap {
        let snapped = (clamped / SCALE_SNAP_STEP).round() * SCALE_SNAP_STEP;
        snapped.clamp(SCALE_MIN_RATIO, SCALE_MAX_RATIO)
    } else {
        clamped
    }
}

/// Active tool plus the gizmo the selection tool drives.
#[derive(Debug, Default)]
pub struct ToolHost {
    active: ToolKind,
    selected: Option<Entity>,
    gizmo: Gizmo,
}

impl ToolHost {
    pub fn active_tool(&self) -> ToolKind {
        self.active
    }

    pub fn use_tool(&mut self, tool: ToolKind) {
        if self.active != tool {
            tracing::debug!(target: "stage", ?tool, "switching tool");
            if tool != ToolKind::Select {
                self.deselect();
            }
            self.active = tool;
        }
    }

    /// Selects `entity` with the active tool, moving the gizmo onto it.
    pub fn select(&mut self, entity: Entity) {
        if self.active != ToolKind::Select {
            return;
        }
        self.selected = Some(entity);
        self.gizmo.attach(entity);
    }

    pub fn deselect(&mut self) -> Option<Entity> {
        self.gizmo.detach();
        self.selected.take()
    }

    pub fn selected(&self) -> Option<Entity> {
        self.selected
    }

    pub fn gizmo(&self) -> &Gizmo {
        &self.gizmo
    }

    pub fn set_gizmo_mode(&mut self, mode: GizmoMode) {
        self.gizmo.mode = mode;
    }

    /// Releases the gizmo and selection if they are bound to any node in `nodes`.
    pub fn release_nodes(&mut self, nodes: &[Entity]) -> bool {
        let bound = self.gizmo.attached().is_some_and(|entity| nodes.contains(&entity));
        if bound {
            self.gizmo.detach();
        }
        if self.selected.is_some_and(|entity| nodes.contains(&entity)) {
            self.selected = None;
        }
        bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scale_ratio_clamps_and_snaps() {
        assert_eq!(apply_scale_ratio(100.0, false), SCALE_MAX_RATIO);
        assert_eq!(apply_scale_ratio(-3.0, false), SCALE_MIN_RATIO);
        assert!((apply_scale_ratio(1.23, true) - 1.2).abs() < 1e-5);
    }

    #[test]
    fn translate_drag_snaps_to_grid() {
        let gizmo = Gizmo::default();
        let moved = gizmo.apply_drag(&Transform3D::default(), Vec3::new(0.12, 0.0, -0.26), true);
        assert!((moved.translation.x - 0.1).abs() < 1e-5);
        assert!((moved.translation.z + 0.25).abs() < 1e-5);
    }

    #[test]
    fn unknown_tool_is_fatal() {
        let err = ToolKind::parse("lasso").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(ToolKind::parse("Select").unwrap(), ToolKind::Select);
    }

    #[test]
    fn releasing_bound_node_detaches_gizmo() {
        let mut world = bevy_ecs::world::World::new();
        let node = world.spawn_empty().id();
        let other = world.spawn_empty().id();
        let mut tools = ToolHost::default();
        tools.use_tool(ToolKind::Select);
        tools.select(node);
        assert!(!tools.release_nodes(&[other]));
        assert_eq!(tools.gizmo().attached(), Some(node));
        assert!(tools.release_nodes(&[node]));
        assert_eq!(tools.gizmo().attached(), None);
        assert_eq!(tools.selected(), None);
    }
}
