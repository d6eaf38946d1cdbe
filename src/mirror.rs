//! Projects entity records onto live scene nodes.
//!
//! Each entity kind has its own sub-mirror with a factory from the record's type tag to
//! a node layout. Updates touch only the fields a record actually carries.

use crate::error::{StageError, StageResult};
use crate::gizmo::ToolHost;
use crate::loader::{AssetLoader, CancelToken, LoadResult, ModelContent};
use crate::record::{ColorData, EntityBody, EntityRecord, GroupData, LightData, ModelData, PrimitiveData};
use crate::scene_graph::{
    EntityTag, Geometry, GroupNode, LightKind, LightNode, LocalBounds, MaterialOverride, ModelContainer,
    ModelContent as ModelContentNode, Movable, NodeName, PlaceableSurface, PrimitiveNode, SceneGraph,
    Selectable, ShadeColor,
};
use bevy_ecs::prelude::Entity;
use glam::Vec3;
use serde_json::Value;
use std::sync::mpsc;

const DEFAULT_MODEL_SHADE: Vec3 = Vec3::new(0.7, 0.7, 0.72);
const DEFAULT_PRIMITIVE_SHADE: Vec3 = Vec3::new(0.55, 0.6, 0.7);

pub struct SceneMirror {
    graph: SceneGraph,
    lights: LightMirror,
    models: ModelMirror,
    shapes: ShapeMirror,
}

impl SceneMirror {
    pub fn new(loader: Box<dyn AssetLoader>) -> Self {
        Self { graph: SceneGraph::new(), lights: LightMirror, models: ModelMirror::new(loader), shapes: ShapeMirror }
    }

    pub fn graph(&self) -> &SceneGraph {
        &self.graph
    }

    pub fn graph_mut(&mut self) -> &mut SceneGraph {
        &mut self.graph
    }

    pub fn get(&self, id: &str) -> Option<Entity> {
        self.graph.node(id)
    }

    /// Creates or refreshes the node for `record`. Point-of-view records have no node.
    pub fn upsert(&mut self, record: &EntityRecord) -> StageResult<Option<Entity>> {
        let existing = self.graph.node(&record.id);
        let entity = match (&record.body, existing) {
            (EntityBody::Pov(_), _) => return Ok(None),
            (_, Some(entity)) => entity,
            (EntityBody::Light(light), None) => self.lights.create(&mut self.graph, light)?,
            (EntityBody::Model(model), None) => self.models.create(&mut self.graph, &record.id, model),
            (EntityBody::Primitive(primitive), None) => self.shapes.create_primitive(&mut self.graph, primitive)?,
            (EntityBody::Group(_), None) => self.shapes.create_group(&mut self.graph),
        };
        if existing.is_none() && !self.graph.tag(entity, &record.id) {
            self.graph.despawn_recursive(entity);
            return Err(StageError::Duplicate { id: record.id.clone() });
        }
        self.apply_common(entity, record);
        self.reparent(entity, record.parent_id());
        match &record.body {
            EntityBody::Light(light) => self.lights.apply(&mut self.graph, entity, light),
            EntityBody::Model(model) => self.models.apply(&mut self.graph, &record.id, entity, model),
            EntityBody::Primitive(primitive) => self.shapes.apply_primitive(&mut self.graph, entity, primitive),
            EntityBody::Group(group) => self.shapes.apply_group(&mut self.graph, entity, group),
            EntityBody::Pov(_) => {}
        }
        Ok(Some(entity))
    }

    /// Removes the node for `id`, releasing the gizmo first if it is bound anywhere in
    /// the removed subtree. Pending content loads for the id are cancelled.
    ///
    /// Parent references are weak: nodes of other records nested under this one move
    /// back under the root and survive. Only untagged content goes with the node.
    pub fn remove(&mut self, id: &str, tools: &mut ToolHost) -> bool {
        self.models.cancel(id);
        let Some(entity) = self.graph.node(id) else {
            return false;
        };
        let root = self.graph.root();
        for child in self.graph.children(entity) {
            if self.graph.has::<EntityTag>(child) {
                tracing::debug!(target: "mirror", id, "orphaned child returns to the scene root");
                self.graph.attach(child, root);
            }
        }
        let subtree = self.graph.subtree(entity);
        if tools.release_nodes(&subtree) {
            tracing::debug!(target: "mirror", id, "detached gizmo before removal");
        }
        self.graph.despawn_recursive(entity);
        true
    }

    /// Attaches finished model content. Returns ids whose content arrived this call.
    pub fn drain_loads(&mut self) -> Vec<String> {
        self.models.drain(&mut self.graph)
    }

    pub fn pending_loads(&self) -> usize {
        self.models.pending.len()
    }

    pub fn load_progress(&self) -> f32 {
        self.models.loader.poll_progress()
    }

    /// Places the node under its referenced parent's node, or back under the root when
    /// the reference is missing or does not resolve. Moves that would create a cycle are
    /// ignored.
    fn reparent(&mut self, entity: Entity, parent_id: Option<&str>) {
        let target = parent_id.and_then(|id| self.graph.node(id)).unwrap_or(self.graph.root());
        if self.graph.parent(entity) == Some(target) {
            return;
        }
        if self.graph.is_ancestor_or_self(entity, target) {
            tracing::warn!(target: "mirror", ?parent_id, "ignoring parent that would create a cycle");
            return;
        }
        self.graph.attach(entity, target);
    }

    fn apply_common(&mut self, entity: Entity, record: &EntityRecord) {
        if !record.name.is_empty() {
            self.graph.insert(entity, NodeName(record.name.clone()));
        }
        self.graph.set_visible(entity, record.visible);
        let fields = record.transform();
        let Some(mut transform) = self.graph.transform(entity) else {
            return;
        };
        if let Some(position) = fields.position {
            transform.translation = position;
        }
        if let Some(rotation) = fields.rotation {
            transform.set_euler(rotation);
        }
        if let Some(scale) = fields.scale {
            transform.scale = scale;
        }
        self.graph.set_transform(entity, transform);
    }
}

fn shade_from_material(material: Option<&Value>) -> Option<Vec3> {
    let color = material?.get("color")?;
    let color: ColorData = serde_json::from_value(color.clone()).ok()?;
    color.linear()
}

// ---------- lights ----------

struct LightMirror;

impl LightMirror {
    fn create(&self, graph: &mut SceneGraph, light: &LightData) -> StageResult<Entity> {
        let kind = LightKind::parse(&light.light_type)
            .ok_or_else(|| StageError::unsupported("light type", &light.light_type))?;
        let node = LightNode { kind, color: Vec3::ONE, intensity: 1.0, enabled: true };
        let root = graph.root();
        let entity = match kind {
            LightKind::Point => graph.spawn_child(root, "point light", (node, Movable)),
            LightKind::Ambient => graph.spawn_child(root, "ambient light", node),
            LightKind::Scene => graph.spawn_child(root, "scene light", node),
        };
        Ok(entity)
    }

    fn apply(&self, graph: &mut SceneGraph, entity: Entity, light: &LightData) {
        let Some(mut node) = graph.get::<LightNode>(entity).copied() else {
            return;
        };
        if let Some(kind) = LightKind::parse(&light.light_type) {
            node.kind = kind;
        }
        if let Some(color) = &light.color {
            match color.linear() {
                Some(linear) => node.color = linear,
                None => tracing::warn!(target: "mirror", %color, "ignoring unparseable light colour"),
            }
        }
        if let Some(intensity) = light.intensity {
            node.intensity = intensity;
        }
        if let Some(enabled) = light.enabled {
            node.enabled = enabled;
        }
        graph.insert(entity, node);
    }
}

// ---------- models ----------

struct PendingLoad {
    id: String,
    container: Entity,
    uri: String,
    cancel: CancelToken,
    rx: mpsc::Receiver<LoadResult>,
}

struct ModelMirror {
    loader: Box<dyn AssetLoader>,
    pending: Vec<PendingLoad>,
}

impl ModelMirror {
    fn new(loader: Box<dyn AssetLoader>) -> Self {
        Self { loader, pending: Vec::new() }
    }

    /// Spawns the empty placeholder container and requests its content.
    fn create(&mut self, graph: &mut SceneGraph, id: &str, model: &ModelData) -> Entity {
        let root = graph.root();
        let container = graph.spawn_child(
            root,
            "model",
            (ModelContainer { uri: model.uri.clone() }, Movable, Selectable, ShadeColor(DEFAULT_MODEL_SHADE)),
        );
        self.request(id, container, &model.uri);
        container
    }

    fn request(&mut self, id: &str, container: Entity, uri: &str) {
        let cancel = CancelToken::new();
        let rx = self.loader.load(uri, cancel.clone());
        tracing::debug!(target: "loader", id, uri, "requested model content");
        self.pending.push(PendingLoad { id: id.to_string(), container, uri: uri.to_string(), cancel, rx });
    }

    fn apply(&mut self, graph: &mut SceneGraph, id: &str, entity: Entity, model: &ModelData) {
        if let Some(material) = &model.material {
            graph.insert(entity, MaterialOverride(material.clone()));
            if let Some(shade) = shade_from_material(Some(material)) {
                for node in graph.subtree(entity) {
                    graph.insert(node, ShadeColor(shade));
                }
            }
        }
        let current_uri = graph.get::<ModelContainer>(entity).map(|container| container.uri.clone());
        if current_uri.as_deref().is_some_and(|uri| uri != model.uri) {
            tracing::info!(target: "mirror", id, uri = %model.uri, "model uri changed; reloading content");
            self.cancel(id);
            for child in graph.children(entity) {
                if graph.has::<ModelContentNode>(child) {
                    graph.despawn_recursive(child);
                }
            }
            graph.insert(entity, ModelContainer { uri: model.uri.clone() });
            self.request(id, entity, &model.uri);
        }
    }

    fn cancel(&mut self, id: &str) {
        self.pending.retain(|load| {
            if load.id == id {
                load.cancel.cancel();
                tracing::debug!(target: "loader", id, uri = %load.uri, "cancelled pending load");
                false
            } else {
                true
            }
        });
    }

    fn drain(&mut self, graph: &mut SceneGraph) -> Vec<String> {
        let mut loaded = Vec::new();
        let mut still_pending = Vec::with_capacity(self.pending.len());
        for load in self.pending.drain(..) {
            match load.rx.try_recv() {
                Ok(Ok(content)) => {
                    if load.cancel.is_cancelled() || !graph.contains(load.container) {
                        tracing::debug!(target: "loader", id = %load.id, "discarding late content");
                        continue;
                    }
                    attach_content(graph, load.container, &content);
                    loaded.push(load.id);
                }
                Ok(Err(err)) => {
                    let err = StageError::Load { uri: load.uri.clone(), reason: format!("{err:#}") };
                    tracing::warn!(target: "loader", id = %load.id, "{err}");
                }
                Err(mpsc::TryRecvError::Empty) => still_pending.push(load),
                Err(mpsc::TryRecvError::Disconnected) => {
                    tracing::debug!(target: "loader", id = %load.id, "loader dropped request");
                }
            }
        }
        self.pending = still_pending;
        loaded
    }
}

fn attach_content(graph: &mut SceneGraph, container: Entity, content: &ModelContent) {
    let shade = graph.get::<ShadeColor>(container).map(|c| c.0).unwrap_or(DEFAULT_MODEL_SHADE);
    let layers = graph.layers(container);
    for mesh in &content.meshes {
        let node = graph.spawn_child(
            container,
            &mesh.name,
            (ModelContentNode, LocalBounds(mesh.bounds), PlaceableSurface, ShadeColor(shade)),
        );
        graph.set_layers(node, layers);
    }
}

// ---------- primitives and groups ----------

struct ShapeMirror;

/// Reads a geometry descriptor such as `{"type": "box", "width": 1, "height": 2, "depth": 1}`.
pub fn parse_geometry(descriptor: &Value) -> StageResult<Geometry> {
    let kind = descriptor
        .get("type")
        .or_else(|| descriptor.get("kind"))
        .and_then(Value::as_str)
        .ok_or_else(|| StageError::malformed("geometry descriptor without type"))?;
    let dim = |key: &str, default: f32| {
        descriptor.get(key).and_then(Value::as_f64).map(|v| v as f32).unwrap_or(default)
    };
    match kind.to_ascii_lowercase().as_str() {
        "box" | "cube" => {
            Ok(Geometry::Box { width: dim("width", 1.0), height: dim("height", 1.0), depth: dim("depth", 1.0) })
        }
        "sphere" => Ok(Geometry::Sphere { radius: dim("radius", 0.5) }),
        "plane" => Ok(Geometry::Plane { width: dim("width", 1.0), depth: dim("depth", 1.0) }),
        "cylinder" => Ok(Geometry::Cylinder { radius: dim("radius", 0.5), height: dim("height", 1.0) }),
        other => Err(StageError::unsupported("geometry", other)),
    }
}

impl ShapeMirror {
    fn create_primitive(&self, graph: &mut SceneGraph, primitive: &PrimitiveData) -> StageResult<Entity> {
        let geometry = match &primitive.geometry {
            Some(descriptor) => parse_geometry(descriptor)?,
            None => Geometry::Box { width: 1.0, height: 1.0, depth: 1.0 },
        };
        let root = graph.root();
        Ok(graph.spawn_child(
            root,
            "primitive",
            (
                PrimitiveNode { geometry },
                LocalBounds(geometry.bounds()),
                Movable,
                Selectable,
                PlaceableSurface,
                ShadeColor(DEFAULT_PRIMITIVE_SHADE),
            ),
        ))
    }

    fn apply_primitive(&self, graph: &mut SceneGraph, entity: Entity, primitive: &PrimitiveData) {
        if let Some(descriptor) = &primitive.geometry {
            match parse_geometry(descriptor) {
                Ok(geometry) => graph.insert(entity, (PrimitiveNode { geometry }, LocalBounds(geometry.bounds()))),
                Err(err) => tracing::warn!(target: "mirror", "keeping previous geometry: {err}"),
            }
        }
        if let Some(material) = &primitive.material {
            graph.insert(entity, MaterialOverride(material.clone()));
            if let Some(shade) = shade_from_material(Some(material)) {
                graph.insert(entity, ShadeColor(shade));
            }
        }
    }

    fn create_group(&self, graph: &mut SceneGraph) -> Entity {
        let root = graph.root();
        graph.spawn_child(root, "group", (GroupNode::default(), Movable, Selectable))
    }

    fn apply_group(&self, graph: &mut SceneGraph, entity: Entity, group: &GroupData) {
        if let Some(visible) = group.bounding_box_visible {
            graph.insert(entity, GroupNode { bounding_box_visible: visible });
        }
    }
}
