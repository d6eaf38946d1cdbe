use crate::bounds::{ray_hit_obb, Aabb};
use bevy_ecs::prelude::*;
use bitflags::bitflags;
use glam::{EulerRot, Mat4, Quat, Vec3};
use smallvec::SmallVec;
use std::collections::HashMap;

bitflags! {
    /// Visibility layers. The camera renders a node only when their masks intersect.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct LayerMask: u32 {
        const PRODUCT = 1 << 0;
        const EDITOR = 1 << 1;
    }
}

impl LayerMask {
    pub fn editor_view() -> Self {
        LayerMask::PRODUCT | LayerMask::EDITOR
    }

    pub fn product_view() -> Self {
        LayerMask::PRODUCT
    }

    /// Parses a camera view name (`editor`/`all` or `product`).
    pub fn from_view_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "editor" | "all" => Some(Self::editor_view()),
            "product" => Some(Self::product_view()),
            _ => None,
        }
    }
}

// ---------- components ----------

/// Registry id mirrored by this node.
#[derive(Component, Clone, Debug)]
pub struct EntityTag {
    pub id: String,
}

#[derive(Component, Clone, Debug, Default)]
pub struct NodeName(pub String);

#[derive(Component, Clone, Copy, Debug, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform3D {
    fn default() -> Self {
        Self { translation: Vec3::ZERO, rotation: Quat::IDENTITY, scale: Vec3::ONE }
    }
}

impl Transform3D {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    pub fn euler(&self) -> Vec3 {
        let (x, y, z) = self.rotation.to_euler(EulerRot::XYZ);
        Vec3::new(x, y, z)
    }

    pub fn set_euler(&mut self, euler: Vec3) {
        self.rotation = Quat::from_euler(EulerRot::XYZ, euler.x, euler.y, euler.z);
    }
}

/// Geometry bounds in the node's own space. Containers have none.
#[derive(Component, Clone, Copy, Debug)]
pub struct LocalBounds(pub Aabb);

#[derive(Component, Clone, Copy, Debug)]
pub struct Visibility(pub bool);

#[derive(Component, Clone, Copy, Debug)]
pub struct RenderLayers(pub LayerMask);

/// Flat shading colour used by preview rendering.
#[derive(Component, Clone, Copy, Debug)]
pub struct ShadeColor(pub Vec3);

#[derive(Component, Clone, Copy, Debug)]
pub struct Parent(pub Entity);

#[derive(Component, Default, Debug)]
pub struct Children(pub SmallVec<[Entity; 4]>);

/// Capability: direct manipulation and placement may move this node.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Movable;

/// Capability: the selection tool may bind a gizmo to this node.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct Selectable;

/// Capability: drop-to-surface rays may land on this node.
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct PlaceableSurface;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LightKind {
    Ambient,
    Point,
    Scene,
}

impl LightKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "ambient" => Some(LightKind::Ambient),
            "point" => Some(LightKind::Point),
            "scene" | "hemisphere" | "directional" => Some(LightKind::Scene),
            _ => None,
        }
    }
}

#[derive(Component, Clone, Copy, Debug)]
pub struct LightNode {
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
}

#[derive(Component, Clone, Debug)]
pub struct ModelContainer {
    pub uri: String,
}

/// Loaded geometry parented under a [`ModelContainer`].
#[derive(Component, Clone, Copy, Debug, Default)]
pub struct ModelContent;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Geometry {
    Box { width: f32, height: f32, depth: f32 },
    Sphere { radius: f32 },
    Plane { width: f32, depth: f32 },
    Cylinder { radius: f32, height: f32 },
}

impl Geometry {
    pub fn bounds(&self) -> Aabb {
        match *self {
            Geometry::Box { width, height, depth } => {
                Aabb::from_half_extents(Vec3::new(width, height, depth) * 0.5)
            }
            Geometry::Sphere { radius } => Aabb::from_half_extents(Vec3::splat(radius)),
            Geometry::Plane { width, depth } => Aabb::from_half_extents(Vec3::new(width * 0.5, 0.0, depth * 0.5)),
            Geometry::Cylinder { radius, height } => Aabb::from_half_extents(Vec3::new(radius, height * 0.5, radius)),
        }
    }
}

#[derive(Component, Clone, Copy, Debug)]
pub struct PrimitiveNode {
    pub geometry: Geometry,
}

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct GroupNode {
    pub bounding_box_visible: bool,
}

#[derive(Component, Clone, Debug)]
pub struct MaterialOverride(pub serde_json::Value);

#[derive(Component, Clone, Copy, Debug, Default)]
pub struct FloorNode;

const FLOOR_HALF_EXTENT: f32 = 50.0;
const FLOOR_THICKNESS: f32 = 0.1;

// ---------- graph ----------

/// Live scene nodes stored in an ECS world, plus an id index enforcing one node per
/// registry id.
pub struct SceneGraph {
    world: World,
    root: Entity,
    floor: Entity,
    index: HashMap<String, Entity>,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        let mut world = World::new();
        let root = world
            .spawn((
                NodeName("root".to_string()),
                Transform3D::default(),
                Visibility(true),
                RenderLayers(LayerMask::all()),
                Children::default(),
            ))
            .id();
        let mut graph = Self { world, root, floor: root, index: HashMap::new() };
        let floor = graph.spawn_child(
            root,
            "floor",
            (
                FloorNode,
                PlaceableSurface,
                LocalBounds(Aabb::new(
                    Vec3::new(-FLOOR_HALF_EXTENT, -FLOOR_THICKNESS, -FLOOR_HALF_EXTENT),
                    Vec3::new(FLOOR_HALF_EXTENT, 0.0, FLOOR_HALF_EXTENT),
                )),
                ShadeColor(Vec3::splat(0.8)),
            ),
        );
        graph.set_layers(floor, LayerMask::EDITOR);
        graph.floor = floor;
        graph
    }

    pub fn root(&self) -> Entity {
        self.root
    }

    pub fn floor(&self) -> Entity {
        self.floor
    }

    /// Spawns a node under `parent` with the default transform, visible, on the product layer.
    pub fn spawn_child<B: Bundle>(&mut self, parent: Entity, name: &str, bundle: B) -> Entity {
        let entity = self
            .world
            .spawn((
                NodeName(name.to_string()),
                Transform3D::default(),
                Visibility(true),
                RenderLayers(LayerMask::PRODUCT),
                Children::default(),
            ))
            .id();
        self.world.entity_mut(entity).insert(bundle);
        self.attach(entity, parent);
        entity
    }

    /// Binds `id` to `entity`. Refuses when another live node already carries the id.
    pub fn tag(&mut self, entity: Entity, id: &str) -> bool {
        if let Some(existing) = self.index.get(id) {
            if *existing != entity && self.contains(*existing) {
                tracing::warn!(target: "mirror", id, "a scene node already carries this id");
                return false;
            }
        }
        self.world.entity_mut(entity).insert(EntityTag { id: id.to_string() });
        self.index.insert(id.to_string(), entity);
        true
    }

    pub fn node(&self, id: &str) -> Option<Entity> {
        self.index.get(id).copied().filter(|entity| self.contains(*entity))
    }

    pub fn entity_id(&self, entity: Entity) -> Option<&str> {
        self.world.get::<EntityTag>(entity).map(|tag| tag.id.as_str())
    }

    pub fn contains(&self, entity: Entity) -> bool {
        self.world.get::<Transform3D>(entity).is_some()
    }

    pub fn has<C: Component>(&self, entity: Entity) -> bool {
        self.world.get::<C>(entity).is_some()
    }

    pub fn get<C: Component>(&self, entity: Entity) -> Option<&C> {
        self.world.get::<C>(entity)
    }

    pub fn insert<B: Bundle>(&mut self, entity: Entity, bundle: B) {
        if self.contains(entity) {
            self.world.entity_mut(entity).insert(bundle);
        }
    }

    pub fn parent(&self, entity: Entity) -> Option<Entity> {
        self.world.get::<Parent>(entity).map(|parent| parent.0)
    }

    pub fn children(&self, entity: Entity) -> Vec<Entity> {
        self.world.get::<Children>(entity).map(|children| children.0.to_vec()).unwrap_or_default()
    }

    /// Moves `child` under `parent`, unlinking it from any previous parent.
    pub fn attach(&mut self, child: Entity, parent: Entity) {
        self.detach(child);
        if let Some(mut children) = self.world.get_mut::<Children>(parent) {
            children.0.push(child);
        }
        self.world.entity_mut(child).insert(Parent(parent));
    }

    /// Unlinks `entity` from its parent without despawning it.
    pub fn detach(&mut self, entity: Entity) {
        let Some(parent) = self.parent(entity) else {
            return;
        };
        if let Some(mut children) = self.world.get_mut::<Children>(parent) {
            children.0.retain(|child| *child != entity);
        }
        self.world.entity_mut(entity).remove::<Parent>();
    }

    /// `entity` followed by all of its descendants, depth first.
    pub fn subtree(&self, entity: Entity) -> Vec<Entity> {
        let mut out = Vec::new();
        let mut stack = vec![entity];
        while let Some(current) = stack.pop() {
            if !self.contains(current) {
                continue;
            }
            out.push(current);
            stack.extend(self.children(current).into_iter().rev());
        }
        out
    }

    /// Detaches and despawns `entity` with its whole subtree.
    pub fn despawn_recursive(&mut self, entity: Entity) {
        if !self.contains(entity) || entity == self.root {
            return;
        }
        self.detach(entity);
        for node in self.subtree(entity) {
            if let Some(tag) = self.world.get::<EntityTag>(node) {
                if self.index.get(&tag.id) == Some(&node) {
                    let id = tag.id.clone();
                    self.index.remove(&id);
                }
            }
            self.world.despawn(node);
        }
    }

    /// True when walking parents from `entity` reaches the root.
    pub fn is_attached(&self, entity: Entity) -> bool {
        self.is_ancestor_or_self(self.root, entity)
    }

    pub fn is_ancestor_or_self(&self, ancestor: Entity, entity: Entity) -> bool {
        let mut current = Some(entity);
        while let Some(node) = current {
            if node == ancestor {
                return true;
            }
            current = self.parent(node);
        }
        false
    }

    pub fn transform(&self, entity: Entity) -> Option<Transform3D> {
        self.world.get::<Transform3D>(entity).copied()
    }

    pub fn set_transform(&mut self, entity: Entity, transform: Transform3D) {
        if let Some(mut current) = self.world.get_mut::<Transform3D>(entity) {
            *current = transform;
        }
    }

    pub fn set_visible(&mut self, entity: Entity, visible: bool) {
        self.insert(entity, Visibility(visible));
    }

    pub fn set_layers(&mut self, entity: Entity, layers: LayerMask) {
        self.insert(entity, RenderLayers(layers));
    }

    /// Visible itself and through every ancestor.
    pub fn is_visible(&self, entity: Entity) -> bool {
        let mut current = Some(entity);
        while let Some(node) = current {
            if !self.world.get::<Visibility>(node).map(|v| v.0).unwrap_or(false) {
                return false;
            }
            current = self.parent(node);
        }
        true
    }

    pub fn layers(&self, entity: Entity) -> LayerMask {
        self.world.get::<RenderLayers>(entity).map(|layers| layers.0).unwrap_or(LayerMask::PRODUCT)
    }

    pub fn local_matrix(&self, entity: Entity) -> Mat4 {
        self.transform(entity).map(|tx| tx.matrix()).unwrap_or(Mat4::IDENTITY)
    }

    pub fn world_matrix(&self, entity: Entity) -> Mat4 {
        self.relative_matrix(None, entity)
    }

    /// Matrix taking `entity`'s local space into `ancestor`'s local space (world when `None`).
    fn relative_matrix(&self, ancestor: Option<Entity>, entity: Entity) -> Mat4 {
        let mut matrix = Mat4::IDENTITY;
        let mut current = Some(entity);
        while let Some(node) = current {
            if Some(node) == ancestor {
                break;
            }
            matrix = self.local_matrix(node) * matrix;
            current = self.parent(node);
        }
        matrix
    }

    /// World-space box around the geometry of `entity` and its descendants.
    pub fn world_bounds(&self, entity: Entity) -> Aabb {
        self.subtree(entity).into_iter().fold(Aabb::EMPTY, |acc, node| match self.get::<LocalBounds>(node) {
            Some(bounds) => acc.union(bounds.0.transformed(&self.world_matrix(node))),
            None => acc,
        })
    }

    /// Box around the subtree geometry expressed in `entity`'s own space, so its own
    /// transform is not applied.
    pub fn subtree_bounds(&self, entity: Entity) -> Aabb {
        self.subtree(entity).into_iter().fold(Aabb::EMPTY, |acc, node| match self.get::<LocalBounds>(node) {
            Some(bounds) => {
                let relative = if node == entity {
                    Mat4::IDENTITY
                } else {
                    self.relative_matrix(Some(entity), node)
                };
                acc.union(bounds.0.transformed(&relative))
            }
            None => acc,
        })
    }

    /// Nearest visible [`PlaceableSurface`] hit by the ray, skipping nodes rejected by `skip`.
    pub fn raycast_surfaces(
        &mut self,
        origin: Vec3,
        dir: Vec3,
        skip: impl Fn(Entity) -> bool,
    ) -> Option<(Entity, f32)> {
        let mut query = self.world.query_filtered::<(Entity, &LocalBounds), With<PlaceableSurface>>();
        let candidates: Vec<(Entity, Aabb)> =
            query.iter(&self.world).map(|(entity, bounds)| (entity, bounds.0)).collect();
        candidates
            .into_iter()
            .filter(|(entity, _)| !skip(*entity) && self.is_attached(*entity) && self.is_visible(*entity))
            .filter_map(|(entity, bounds)| {
                ray_hit_obb(origin, dir, &self.world_matrix(entity), &bounds).map(|distance| (entity, distance))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
    }

    /// Visible nodes on `layers` that carry geometry, with their world bounds and shade.
    pub fn renderables(&self, layers: LayerMask) -> Vec<(Entity, Aabb, Vec3)> {
        self.subtree(self.root)
            .into_iter()
            .filter(|entity| self.layers(*entity).intersects(layers) && self.is_visible(*entity))
            .filter_map(|entity| {
                let bounds = self.get::<LocalBounds>(entity)?;
                let shade = self.get::<ShadeColor>(entity).map(|c| c.0).unwrap_or(Vec3::splat(0.6));
                Some((entity, bounds.0.transformed(&self.world_matrix(entity)), shade))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn world_bounds_compose_parent_transforms() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let parent = graph.spawn_child(root, "container", ());
        graph.set_transform(
            parent,
            Transform3D { translation: Vec3::new(0.0, 2.0, 0.0), scale: Vec3::splat(2.0), ..Default::default() },
        );
        graph.spawn_child(parent, "content", LocalBounds(Aabb::from_half_extents(Vec3::splat(0.5))));
        let bounds = graph.world_bounds(parent);
        assert!((bounds.min.y - 1.0).abs() < 1e-6);
        assert!((bounds.max.y - 3.0).abs() < 1e-6);
        let local = graph.subtree_bounds(parent);
        assert!((local.min.y + 0.5).abs() < 1e-6);
    }

    #[test]
    fn despawn_clears_index_and_children() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let node = graph.spawn_child(root, "a", ());
        assert!(graph.tag(node, "a"));
        let child = graph.spawn_child(node, "a/child", ());
        graph.despawn_recursive(node);
        assert!(graph.node("a").is_none());
        assert!(!graph.contains(child));
        assert!(!graph.children(root).contains(&node));
    }

    #[test]
    fn second_node_with_same_id_is_rejected() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let first = graph.spawn_child(root, "a", ());
        let second = graph.spawn_child(root, "a", ());
        assert!(graph.tag(first, "a"));
        assert!(!graph.tag(second, "a"));
        assert_eq!(graph.node("a"), Some(first));
    }

    #[test]
    fn detached_nodes_are_not_attached() {
        let mut graph = SceneGraph::new();
        let root = graph.root();
        let node = graph.spawn_child(root, "n", ());
        assert!(graph.is_attached(node));
        graph.detach(node);
        assert!(!graph.is_attached(node));
    }

    #[test]
    fn view_names_map_to_layer_masks() {
        assert_eq!(LayerMask::from_view_name("Editor"), Some(LayerMask::PRODUCT | LayerMask::EDITOR));
        assert_eq!(LayerMask::from_view_name("product"), Some(LayerMask::PRODUCT));
        assert_eq!(LayerMask::from_view_name("xray"), None);
    }

    #[test]
    fn raycast_finds_floor_below_origin() {
        let mut graph = SceneGraph::new();
        let floor = graph.floor();
        let hit = graph.raycast_surfaces(Vec3::new(1.0, 4.0, 1.0), Vec3::NEG_Y, |_| false);
        let (entity, distance) = hit.expect("floor hit");
        assert_eq!(entity, floor);
        assert!((distance - 4.0).abs() < 1e-5);
    }
}
