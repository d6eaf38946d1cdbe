//! Vertical placement of movable nodes onto the surfaces below them.
//!
//! Both operations return the node's corrected local position, or `None` when the node
//! is already where it would be put. Callers push the result back into the registry.

use crate::error::{StageError, StageResult};
use crate::scene_graph::{LocalBounds, Movable, SceneGraph};
use bevy_ecs::prelude::Entity;
use glam::Vec3;

fn require_movable(graph: &SceneGraph, entity: Entity) -> StageResult<()> {
    let label = || graph.entity_id(entity).unwrap_or("<untagged>").to_string();
    if !graph.contains(entity) || !graph.is_attached(entity) {
        return Err(StageError::NotFound(label()));
    }
    if !graph.has::<Movable>(entity) {
        return Err(StageError::unsupported("placement target", label()));
    }
    Ok(())
}

/// Drops `entity` straight down until its bounding-box bottom rests on the nearest
/// placeable surface under its bottom centre. X and Z are left alone. A miss is a no-op.
///
/// The no-op check uses exact equality on the resulting local Y.
pub fn drop_it(graph: &mut SceneGraph, entity: Entity) -> StageResult<Option<Vec3>> {
    require_movable(graph, entity)?;
    let bounds = graph.world_bounds(entity);
    if bounds.is_empty() {
        tracing::debug!(target: "placement", ?entity, "nothing to drop: node has no geometry yet");
        return Ok(None);
    }
    let bottom = bounds.bottom_center();
    let own_subtree = graph.subtree(entity);
    let hit = graph.raycast_surfaces(bottom, Vec3::NEG_Y, |candidate| own_subtree.contains(&candidate));
    let Some((surface, distance)) = hit else {
        tracing::debug!(target: "placement", ?entity, "no surface below node");
        return Ok(None);
    };
    let Some(surface_bounds) = graph.get::<LocalBounds>(surface).map(|b| b.0) else {
        return Ok(None);
    };
    let surface_top = surface_bounds.transformed(&graph.world_matrix(surface)).max.y;
    let lift = surface_top - bottom.y;

    let world_translation = graph.world_matrix(entity).w_axis.truncate();
    let target_world = world_translation + Vec3::Y * lift;
    let parent_world = graph.parent(entity).map(|parent| graph.world_matrix(parent)).unwrap_or_default();
    let target_local = parent_world.inverse().transform_point3(target_world);

    let Some(current) = graph.transform(entity) else {
        return Ok(None);
    };
    let next = Vec3::new(current.translation.x, target_local.y, current.translation.z);
    tracing::trace!(target: "placement", ?entity, ?surface, distance, surface_top, "drop resolved");
    if next.y == current.translation.y {
        return Ok(None);
    }
    Ok(Some(next))
}

/// Rests `entity` on the ground plane at world Y = 0 using its own bounds and scale. No
/// surfaces are consulted.
pub fn place_on_floor(graph: &SceneGraph, entity: Entity) -> StageResult<Option<Vec3>> {
    require_movable(graph, entity)?;
    let bounds = graph.subtree_bounds(entity);
    let Some(current) = graph.transform(entity) else {
        return Ok(None);
    };
    if bounds.is_empty() {
        return Ok(None);
    }
    let y = -bounds.min.y * current.scale.y;
    if y == current.translation.y {
        return Ok(None);
    }
    Ok(Some(Vec3::new(current.translation.x, y, current.translation.z)))
}
