//! The command surface of a live scene.
//!
//! [`Stage::perform`] is the single entry point. Handlers mutate the registry first,
//! which pushes into the scene mirror, and subscribers for the action are notified last.
//! Subscribers are notified after every call, successful or not, including calls for
//! action names no handler knows.

use crate::camera::{Camera3D, OrbitControls};
use crate::camera_transition::CameraTransitionController;
use crate::commands::{Action, Subscribers, Subscription};
use crate::config::{CameraConfig, SceneConfig, StageConfig};
use crate::diff;
use crate::error::{StageError, StageResult};
use crate::gizmo::{GizmoMode, ToolHost, ToolKind};
use crate::loader::{AssetLoader, GltfAssetLoader, ManualAssetLoader, ManualLoadQueue};
use crate::media::{MediaGenerator, MediaRequest, PreviewRenderer};
use crate::mirror::SceneMirror;
use crate::placement;
use crate::record::{write_into, ColorData, EntityKind, EntityRecord, Vec3Data};
use crate::registry::EntityRegistry;
use crate::scene_graph::{LayerMask, SceneGraph, Selectable, ShadeColor};
use crate::time::FrameClock;
use anyhow::{Context, Result};
use bevy_ecs::prelude::Entity;
use glam::{Vec2, Vec3};
use serde_json::{json, Map, Value};

pub struct Stage {
    registry: EntityRegistry,
    subscribers: Subscribers,
    tools: ToolHost,
    camera: Camera3D,
    orbit: OrbitControls,
    transitions: CameraTransitionController,
    clock: FrameClock,
    scene: SceneConfig,
    config: StageConfig,
    media: Box<dyn MediaGenerator>,
}

impl Stage {
    pub fn new(config: StageConfig, loader: Box<dyn AssetLoader>, media: Box<dyn MediaGenerator>) -> Self {
        let camera = camera_from_config(&config.camera);
        let orbit = orbit_from_config(&config.camera);
        let mut stage = Self {
            registry: EntityRegistry::new(SceneMirror::new(loader)),
            subscribers: Subscribers::default(),
            tools: ToolHost::default(),
            camera,
            orbit,
            transitions: CameraTransitionController::new(),
            clock: FrameClock::new(),
            scene: config.scene.clone(),
            config,
            media,
        };
        stage.apply_scene_settings();
        stage
    }

    /// Stage backed by worker-thread glTF loading from the configured asset root.
    pub fn from_config(config: StageConfig) -> Result<Self> {
        let loader = GltfAssetLoader::new(config.loader.asset_root.clone(), config.loader.worker_count)
            .context("starting model loader")?;
        Ok(Self::new(config, Box::new(loader), Box::new(PreviewRenderer::default())))
    }

    /// Stage whose model loads are resolved by hand through the returned queue.
    pub fn with_manual_loader(config: StageConfig) -> (Self, ManualLoadQueue) {
        let (loader, queue) = ManualAssetLoader::new();
        (Self::new(config, Box::new(loader), Box::new(PreviewRenderer::default())), queue)
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn graph(&self) -> &SceneGraph {
        self.registry.mirror().graph()
    }

    pub fn camera(&self) -> &Camera3D {
        &self.camera
    }

    pub fn transitions(&self) -> &CameraTransitionController {
        &self.transitions
    }

    pub fn tools(&self) -> &ToolHost {
        &self.tools
    }

    pub fn scene(&self) -> &SceneConfig {
        &self.scene
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    pub fn subscribe(&self, action: &str, listener: impl FnMut(&Value) + 'static) -> Subscription {
        self.subscribers.subscribe(action, listener)
    }

    /// Runs the handler for `action` against `payload`, which it may read and fill in.
    pub fn perform(&mut self, action: &str, payload: &mut Value) -> bool {
        let outcome = match Action::from_name(action) {
            Some(known) => self.dispatch(known, payload),
            None => Err(StageError::UnknownAction(action.to_string())),
        };
        let ok = match outcome {
            Ok(ok) => ok,
            Err(err) => {
                let id = payload.get("id").and_then(Value::as_str).unwrap_or("-");
                tracing::warn!(target: "stage", action, id, "{err}");
                false
            }
        };
        self.subscribers.notify(action, payload);
        ok
    }

    /// Advances the frame clock by `dt` seconds, steps camera motion and attaches any
    /// model content that finished loading. Returns the ids marked loaded this frame.
    pub fn tick(&mut self, dt: f32) -> Vec<String> {
        self.clock.advance(dt);
        self.frame()
    }

    /// Same as [`Stage::tick`] but measured from the wall clock.
    pub fn tick_realtime(&mut self) -> Vec<String> {
        self.clock.tick();
        self.frame()
    }

    fn frame(&mut self) -> Vec<String> {
        self.transitions.update(self.clock.elapsed_seconds(), &mut self.camera);
        if !self.transitions.owns_camera() {
            self.orbit.update(&mut self.camera);
        }
        let loaded = self.registry.mirror_mut().drain_loads();
        for id in &loaded {
            let mut payload = json!({ "id": id });
            self.perform(Action::ModelLoaded.name(), &mut payload);
        }
        loaded
    }

    /// Queues an orbit impulse. Ignored while a transition or lock owns the camera.
    pub fn orbit(&mut self, delta: Vec2) {
        if self.transitions.owns_camera() {
            tracing::debug!(target: "camera", "orbit ignored while camera is owned by a transition");
            return;
        }
        self.orbit.orbit(delta);
    }

    /// Switches the active interaction tool. An unknown name is the one fault that is
    /// returned to the caller instead of being absorbed.
    pub fn use_tool(&mut self, name: &str) -> StageResult<()> {
        let tool = ToolKind::parse(name)?;
        self.tools.use_tool(tool);
        Ok(())
    }

    /// Applies a gizmo drag to the selected node and commits it through UPDATE_OBJECT.
    pub fn drag_selected(&mut self, delta: Vec3, snap: bool) -> bool {
        let Some(entity) = self.tools.gizmo().attached() else {
            return false;
        };
        let graph = self.registry.mirror().graph();
        let (Some(id), Some(start)) = (graph.entity_id(entity), graph.transform(entity)) else {
            return false;
        };
        let id = id.to_string();
        let next = self.tools.gizmo().apply_drag(&start, delta, snap);
        let mut payload = json!({ "id": id });
        let field = match self.tools.gizmo().mode() {
            GizmoMode::Translate => ("position", Vec3Data::from(next.translation)),
            GizmoMode::Rotate => ("rotation", Vec3Data::from(next.euler())),
            GizmoMode::Scale => ("scale", Vec3Data::from(next.scale)),
        };
        payload[field.0] = json!(field.1);
        self.perform(Action::UpdateObject.name(), &mut payload)
    }

    /// Adopts `next` as the active settings, rebuilding only the subsystems whose
    /// section changed. Returns the applied patch.
    pub fn apply_config(&mut self, next: StageConfig) -> Result<Value> {
        let before = serde_json::to_value(&self.config).context("serializing current config")?;
        let after = serde_json::to_value(&next).context("serializing new config")?;
        let patch = diff::diff(&before, &after);
        if diff::is_empty(&patch) {
            return Ok(patch);
        }
        if patch.get("camera").is_some_and(|section| !diff::is_empty(section)) {
            let rebuilt = camera_from_config(&next.camera);
            self.camera.fov_y_radians = rebuilt.fov_y_radians;
            self.camera.near = rebuilt.near;
            self.camera.far = rebuilt.far;
            self.orbit = orbit_from_config(&next.camera);
            tracing::info!(target: "config", "camera settings rebuilt");
        }
        if patch.get("scene").is_some_and(|section| !diff::is_empty(section)) {
            self.scene = next.scene.clone();
            self.apply_scene_settings();
            tracing::info!(target: "config", "scene settings re-applied");
        }
        if patch.get("loader").is_some() {
            tracing::warn!(target: "config", "loader settings take effect on the next start");
        }
        self.config = next;
        Ok(patch)
    }

    fn dispatch(&mut self, action: Action, payload: &mut Value) -> StageResult<bool> {
        tracing::trace!(target: "stage", %action, "dispatch");
        match action {
            Action::GetAllSceneData => {
                let snapshot = self.scene_snapshot();
                write_into(payload, snapshot);
                Ok(true)
            }
            Action::GetAllObjects => {
                let objects: Vec<Value> = self.registry.query(None).into_iter().map(EntityRecord::to_value).collect();
                write_into(payload, json!({ "objects": objects }));
                Ok(true)
            }
            Action::GetObjects => self.get_objects(payload),
            Action::AddObject => {
                let record = EntityRecord::from_payload(payload)?;
                let stored = record.to_value();
                self.registry.add(record)?;
                write_into(payload, stored);
                Ok(true)
            }
            Action::UpdateObject => {
                let partial = payload.as_object().ok_or_else(|| StageError::malformed("payload is not an object"))?;
                let merged = self.registry.update(partial)?;
                write_into(payload, merged.to_value());
                Ok(true)
            }
            Action::DeleteObject => {
                let id = str_field(payload, "id")?.to_string();
                let removed = self.registry.delete(&id, &mut self.tools)?;
                write_into(payload, removed.to_value());
                Ok(true)
            }
            Action::SelectObject => {
                let entity = self.node_for(payload)?;
                if !self.graph().has::<Selectable>(entity) {
                    return Err(StageError::unsupported("selection target", str_field(payload, "id")?));
                }
                self.tools.use_tool(ToolKind::Select);
                self.tools.select(entity);
                Ok(true)
            }
            Action::SetBackground => {
                let color = match color_field(payload, "color")? {
                    Some(color) => color,
                    None => color_field(payload, "backgroundColor")?
                        .ok_or_else(|| StageError::malformed("missing color"))?,
                };
                self.scene.background_color = color;
                Ok(true)
            }
            Action::DropIt => {
                let entity = self.node_for(payload)?;
                let moved = placement::drop_it(self.registry.mirror_mut().graph_mut(), entity)?;
                self.commit_position(payload, moved)
            }
            Action::PlaceOnFloor => {
                let entity = self.node_for(payload)?;
                let moved = placement::place_on_floor(self.graph(), entity)?;
                self.commit_position(payload, moved)
            }
            Action::SetCameraTransform => {
                let position = vec3_field(payload, "position")?;
                let target = vec3_field(payload, "target")?;
                if position.is_none() && target.is_none() {
                    return Err(StageError::malformed("camera transform needs position or target"));
                }
                if let Some(position) = position {
                    self.camera.position = position;
                }
                if let Some(target) = target {
                    self.camera.target = target;
                }
                Ok(true)
            }
            Action::GetCameraTransform => {
                write_into(payload, self.camera_snapshot());
                Ok(true)
            }
            Action::MoveCamera => self.move_camera(payload),
            Action::ResetCamera => {
                let duration = f32_field(payload, "duration").unwrap_or(self.config.camera.transition_ms);
                Ok(self.transitions.revert_last(&self.camera, duration))
            }
            Action::SetCameraLayer => {
                let name = str_field(payload, "layer")?;
                let layers = LayerMask::from_view_name(name)
                    .ok_or_else(|| StageError::unsupported("camera layer", name))?;
                self.camera.layers = layers;
                Ok(true)
            }
            Action::ZoomCamera => {
                let by = f32_field(payload, "by").ok_or_else(|| StageError::malformed("missing zoom distance"))?;
                if by >= 0.0 {
                    self.orbit.zoom_in(&mut self.camera, by);
                } else {
                    self.orbit.zoom_out(&mut self.camera, -by);
                }
                write_into(payload, json!({ "distance": self.camera.distance() }));
                Ok(true)
            }
            Action::SetGizmoMode => {
                let name = str_field(payload, "mode")?;
                let mode = GizmoMode::parse(name).ok_or_else(|| StageError::unsupported("gizmo mode", name))?;
                self.tools.set_gizmo_mode(mode);
                Ok(true)
            }
            Action::ModelLoaded => {
                let id = str_field(payload, "id")?.to_string();
                let record = self.registry.get(&id).ok_or_else(|| StageError::NotFound(id.clone()))?;
                if record.kind() != EntityKind::Model {
                    return Err(StageError::unsupported("loaded entity", record.kind().as_str()));
                }
                let mut partial = Map::new();
                partial.insert("id".to_string(), Value::String(id));
                partial.insert("loaded".to_string(), Value::Bool(true));
                let merged = self.registry.update(&partial)?;
                write_into(payload, merged.to_value());
                Ok(true)
            }
            Action::UpdateScene => self.update_scene(payload),
            Action::GenerateMedia => self.generate_media(payload),
            Action::GetLoadProgress => {
                let mirror = self.registry.mirror();
                write_into(payload, json!({ "progress": mirror.load_progress(), "pending": mirror.pending_loads() }));
                Ok(true)
            }
        }
    }

    fn node_for(&self, payload: &Value) -> StageResult<Entity> {
        let id = str_field(payload, "id")?;
        self.registry.mirror().get(id).ok_or_else(|| StageError::NotFound(id.to_string()))
    }

    /// Pushes a placement result back into the registry so the record stays authoritative.
    fn commit_position(&mut self, payload: &mut Value, moved: Option<Vec3>) -> StageResult<bool> {
        let Some(position) = moved else {
            write_into(payload, json!({ "moved": false }));
            return Ok(true);
        };
        let id = str_field(payload, "id")?.to_string();
        let mut update = json!({ "id": id, "position": Vec3Data::from(position) });
        let committed = self.perform(Action::UpdateObject.name(), &mut update);
        write_into(payload, json!({ "moved": committed, "position": Vec3Data::from(position) }));
        Ok(committed)
    }

    fn get_objects(&mut self, payload: &mut Value) -> StageResult<bool> {
        let ids: Option<Vec<String>> = match payload.get("ids") {
            None | Some(Value::Null) => None,
            Some(Value::Array(items)) => Some(items.iter().filter_map(Value::as_str).map(str::to_string).collect()),
            Some(_) => return Err(StageError::malformed("ids must be an array")),
        };
        let found: Map<String, Value> = self
            .registry
            .query(ids.as_deref())
            .into_iter()
            .map(|record| (record.id.clone(), record.to_value()))
            .collect();
        if !payload.is_object() {
            *payload = Value::Object(Map::new());
        }
        if let Some(Value::Object(map)) = payload.get_mut("map") {
            map.extend(found);
        } else {
            payload["map"] = Value::Object(found);
        }
        Ok(true)
    }

    fn move_camera(&mut self, payload: &mut Value) -> StageResult<bool> {
        let explicit_lock = payload.get("lock").and_then(Value::as_bool);
        let (position, target, lock) = match payload.get("id").and_then(Value::as_str) {
            Some(id) => {
                let record = self.registry.get(id).ok_or_else(|| StageError::NotFound(id.to_string()))?;
                let (position, target, locked) =
                    record.pose().ok_or_else(|| StageError::unsupported("camera pose source", record.kind().as_str()))?;
                (Some(position), Some(target), explicit_lock.or(locked).unwrap_or(false))
            }
            None => {
                let position = vec3_field(payload, "position")?;
                let target = vec3_field(payload, "target")?;
                if position.is_none() && target.is_none() {
                    return Err(StageError::malformed("camera move needs an id, position or target"));
                }
                (position, target, explicit_lock.unwrap_or(false))
            }
        };
        let duration = f32_field(payload, "duration").unwrap_or(self.config.camera.transition_ms);
        let started = self.transitions.move_to(&self.camera, position, target, duration, lock);
        write_into(payload, json!({ "started": started }));
        Ok(started)
    }

    fn update_scene(&mut self, payload: &mut Value) -> StageResult<bool> {
        if let Some(name) = payload.get("name").and_then(Value::as_str) {
            self.scene.name = name.to_string();
        }
        if let Some(color) = color_field(payload, "backgroundColor")? {
            self.scene.background_color = color;
        }
        if let Some(enabled) = payload.get("floorEnabled").and_then(Value::as_bool) {
            self.scene.floor_enabled = enabled;
        }
        if let Some(color) = color_field(payload, "floorColor")? {
            self.scene.floor_color = color;
        }
        self.apply_scene_settings();
        write_into(payload, self.scene_settings_value());
        Ok(true)
    }

    fn apply_scene_settings(&mut self) {
        let graph = self.registry.mirror_mut().graph_mut();
        let floor = graph.floor();
        graph.set_visible(floor, self.scene.floor_enabled);
        if let Some(shade) = self.scene.floor_color.linear() {
            graph.insert(floor, ShadeColor(shade));
        }
    }

    fn generate_media(&mut self, payload: &mut Value) -> StageResult<bool> {
        let (position, target) = match payload.get("id").and_then(Value::as_str) {
            Some(id) => {
                let record = self.registry.get(id).ok_or_else(|| StageError::NotFound(id.to_string()))?;
                let (position, target, _) =
                    record.pose().ok_or_else(|| StageError::unsupported("media pose source", record.kind().as_str()))?;
                (position, target)
            }
            None => (
                vec3_field(payload, "position")?.unwrap_or(self.camera.position),
                vec3_field(payload, "target")?.unwrap_or(self.camera.target),
            ),
        };
        let background = self.config.media.background.as_ref().unwrap_or(&self.scene.background_color);
        let request = MediaRequest {
            position,
            target,
            width: u32_field(payload, "width")?.unwrap_or(self.config.media.width),
            height: u32_field(payload, "height")?.unwrap_or(self.config.media.height),
            layers: LayerMask::product_view(),
            background: background.rgb().unwrap_or([255, 255, 255]),
        };
        let uri = self
            .media
            .generate(self.registry.mirror().graph(), &request)
            .map_err(|err| StageError::Media(format!("{err:#}")))?;
        write_into(payload, json!({ "dataUri": uri }));
        Ok(true)
    }

    fn camera_snapshot(&self) -> Value {
        json!({
            "position": Vec3Data::from(self.camera.position),
            "target": Vec3Data::from(self.camera.target),
            "locked": self.transitions.locked(),
        })
    }

    fn scene_settings_value(&self) -> Value {
        json!({
            "name": self.scene.name,
            "backgroundColor": self.scene.background_color.to_string(),
            "floorEnabled": self.scene.floor_enabled,
            "floorColor": self.scene.floor_color.to_string(),
        })
    }

    fn scene_snapshot(&self) -> Value {
        let mut snapshot = self.scene_settings_value();
        snapshot["camera"] = self.camera_snapshot();
        for (key, kind) in [
            ("lights", EntityKind::Light),
            ("models", EntityKind::Model),
            ("povs", EntityKind::Pov),
            ("primitives", EntityKind::Primitive),
            ("groups", EntityKind::Group),
        ] {
            let records: Vec<Value> = self.registry.by_kind(kind).into_iter().map(EntityRecord::to_value).collect();
            snapshot[key] = Value::Array(records);
        }
        snapshot
    }
}

fn camera_from_config(config: &CameraConfig) -> Camera3D {
    Camera3D::new(
        config.position.into(),
        config.target.into(),
        config.fov_degrees.to_radians(),
        config.near,
        config.far,
    )
}

fn orbit_from_config(config: &CameraConfig) -> OrbitControls {
    OrbitControls::new(config.min_distance, config.max_distance, config.damping_factor)
}

fn str_field<'a>(payload: &'a Value, key: &str) -> StageResult<&'a str> {
    match payload.get(key) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value),
        _ => Err(StageError::malformed(format!("missing {key}"))),
    }
}

fn f32_field(payload: &Value, key: &str) -> Option<f32> {
    payload.get(key).and_then(Value::as_f64).map(|value| value as f32)
}

fn u32_field(payload: &Value, key: &str) -> StageResult<Option<u32>> {
    match payload.get(key).and_then(Value::as_u64) {
        Some(value) => u32::try_from(value)
            .map(Some)
            .map_err(|_| StageError::malformed(format!("{key} out of range: {value}"))),
        None => Ok(None),
    }
}

fn vec3_field(payload: &Value, key: &str) -> StageResult<Option<Vec3>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value::<Vec3Data>(value.clone())
            .map(|v| Some(v.into()))
            .map_err(|err| StageError::malformed(format!("{key}: {err}"))),
    }
}

fn color_field(payload: &Value, key: &str) -> StageResult<Option<ColorData>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => {
            let color: ColorData =
                serde_json::from_value(value.clone()).map_err(|err| StageError::malformed(format!("{key}: {err}")))?;
            if color.rgb().is_none() {
                return Err(StageError::malformed(format!("{key}: '{color}' is not a colour")));
            }
            Ok(Some(color))
        }
    }
}
