use crate::error::{StageError, StageResult};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3Data {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3Data {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

impl From<Vec3> for Vec3Data {
    fn from(value: Vec3) -> Self {
        Self { x: value.x, y: value.y, z: value.z }
    }
}

impl From<Vec3Data> for Vec3 {
    fn from(value: Vec3Data) -> Self {
        Vec3::new(value.x, value.y, value.z)
    }
}

/// Colour as it travels on the wire: `"#rrggbb"` or a numeric `0xrrggbb`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColorData {
    Numeric(u32),
    Hex(String),
}

impl ColorData {
    pub fn rgb(&self) -> Option<[u8; 3]> {
        let packed = match self {
            ColorData::Numeric(value) => *value,
            ColorData::Hex(text) => {
                let digits = text.trim().trim_start_matches('#').trim_start_matches("0x");
                if digits.len() != 6 {
                    return None;
                }
                u32::from_str_radix(digits, 16).ok()?
            }
        };
        if packed > 0xFF_FF_FF {
            return None;
        }
        Some([(packed >> 16) as u8, (packed >> 8) as u8, packed as u8])
    }

    pub fn linear(&self) -> Option<Vec3> {
        let [r, g, b] = self.rgb()?;
        Some(Vec3::new(r as f32, g as f32, b as f32) / 255.0)
    }
}

impl fmt::Display for ColorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rgb() {
            Some([r, g, b]) => write!(f, "#{r:02x}{g:02x}{b:02x}"),
            None => match self {
                ColorData::Numeric(value) => write!(f, "{value:#x}"),
                ColorData::Hex(text) => f.write_str(text),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Pov,
    Light,
    Model,
    Primitive,
    Group,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Pov => "pov",
            EntityKind::Light => "light",
            EntityKind::Model => "model",
            EntityKind::Primitive => "primitive",
            EntityKind::Group => "group",
        }
    }
}

/// Weak reference to another record. Only the id matters for resolution; the rest is
/// whatever partial snapshot the sender attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParentRef {
    pub id: String,
    #[serde(flatten)]
    pub snapshot: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PovData {
    pub position: Vec3Data,
    pub target: Vec3Data,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LightData {
    #[serde(rename = "type")]
    pub light_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColorData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3Data>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelData {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3Data>,
    #[serde(default)]
    pub loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimitiveData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub material: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3Data>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounding_box_visible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entityType", rename_all = "lowercase")]
pub enum EntityBody {
    Pov(PovData),
    Light(LightData),
    Model(ModelData),
    Primitive(PrimitiveData),
    Group(GroupData),
}

const fn default_visible() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_visible")]
    pub visible: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<ParentRef>,
    #[serde(flatten)]
    pub body: EntityBody,
}

/// Transform fields a record carries. Each is independent so partial records never
/// overwrite what they leave out.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TransformFields {
    pub position: Option<Vec3>,
    pub rotation: Option<Vec3>,
    pub scale: Option<Vec3>,
}

impl EntityRecord {
    /// Parses an add payload. The id and entity type must be present; everything else
    /// falls back to serde defaults.
    pub fn from_payload(payload: &Value) -> StageResult<Self> {
        let object = payload.as_object().ok_or_else(|| StageError::malformed("payload is not an object"))?;
        match object.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {}
            _ => return Err(StageError::malformed("missing id")),
        }
        if !object.contains_key("entityType") {
            return Err(StageError::malformed("missing entityType"));
        }
        serde_json::from_value(payload.clone()).map_err(|err| StageError::malformed(err.to_string()))
    }

    pub fn kind(&self) -> EntityKind {
        match self.body {
            EntityBody::Pov(_) => EntityKind::Pov,
            EntityBody::Light(_) => EntityKind::Light,
            EntityBody::Model(_) => EntityKind::Model,
            EntityBody::Primitive(_) => EntityKind::Primitive,
            EntityBody::Group(_) => EntityKind::Group,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Shallow merge: every non-null key in `partial` replaces the stored value, all
    /// other keys stay as they are. `id` and `entityType` are immutable. A model whose
    /// `uri` changes is no longer loaded.
    pub fn merged(&self, partial: &Map<String, Value>) -> StageResult<Self> {
        let mut merged = match self.to_value() {
            Value::Object(map) => map,
            _ => return Err(StageError::malformed("record did not serialize to an object")),
        };
        for (key, value) in partial {
            if value.is_null() || key == "id" {
                continue;
            }
            if key == "entityType" {
                if value.as_str() != Some(self.kind().as_str()) {
                    tracing::warn!(target: "registry", id = %self.id, "ignoring entityType change to {value}");
                }
                continue;
            }
            merged.insert(key.clone(), value.clone());
        }
        let mut next: Self =
            serde_json::from_value(Value::Object(merged)).map_err(|err| StageError::malformed(err.to_string()))?;
        if let (EntityBody::Model(before), EntityBody::Model(after)) = (&self.body, &mut next.body) {
            if before.uri != after.uri {
                after.loaded = false;
            }
        }
        Ok(next)
    }

    pub fn transform(&self) -> TransformFields {
        let pick = |v: &Option<Vec3Data>| v.map(Vec3::from);
        match &self.body {
            EntityBody::Pov(pov) => TransformFields { position: Some(pov.position.into()), ..Default::default() },
            EntityBody::Light(light) => TransformFields { position: pick(&light.position), ..Default::default() },
            EntityBody::Model(model) => TransformFields {
                position: pick(&model.position),
                rotation: pick(&model.rotation),
                scale: pick(&model.scale),
            },
            EntityBody::Primitive(primitive) => TransformFields {
                position: pick(&primitive.position),
                rotation: pick(&primitive.rotation),
                scale: pick(&primitive.scale),
            },
            EntityBody::Group(group) => TransformFields {
                position: pick(&group.position),
                rotation: pick(&group.rotation),
                scale: pick(&group.scale),
            },
        }
    }

    /// Stored camera pose of a point-of-view record.
    pub fn pose(&self) -> Option<(Vec3, Vec3, Option<bool>)> {
        match &self.body {
            EntityBody::Pov(pov) => Some((pov.position.into(), pov.target.into(), pov.locked)),
            _ => None,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent.as_ref().map(|parent| parent.id.as_str())
    }
}

/// Writes every key of `source` into `payload`, turning a non-object payload into one.
pub(crate) fn write_into(payload: &mut Value, source: Value) {
    if !payload.is_object() {
        *payload = Value::Object(Map::new());
    }
    if let (Value::Object(target), Value::Object(fields)) = (payload, source) {
        for (key, value) in fields {
            target.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_minimal_model_payload_with_defaults() {
        let payload = json!({"id": "m1", "entityType": "model", "uri": "x.glb", "position": {"x": 0, "y": 0, "z": 0}});
        let record = EntityRecord::from_payload(&payload).expect("model parses");
        assert_eq!(record.kind(), EntityKind::Model);
        assert!(record.visible);
        assert_eq!(record.name, "");
        match &record.body {
            EntityBody::Model(model) => {
                assert!(!model.loaded);
                assert_eq!(model.uri, "x.glb");
                assert!(model.rotation.is_none());
            }
            other => panic!("unexpected body {other:?}"),
        }
        let value = record.to_value();
        assert_eq!(value["entityType"], "model");
        assert_eq!(value["loaded"], false);
    }

    #[test]
    fn missing_id_is_malformed() {
        let err = EntityRecord::from_payload(&json!({"entityType": "group"})).unwrap_err();
        assert!(matches!(err, StageError::Malformed(_)));
    }

    #[test]
    fn merge_keeps_unspecified_fields_and_type() {
        let record = EntityRecord::from_payload(&json!({
            "id": "p1", "name": "crate", "entityType": "primitive",
            "position": {"x": 1, "y": 2, "z": 3},
            "rotation": {"x": 0.5, "y": 0, "z": 0},
            "scale": {"x": 2, "y": 2, "z": 2}
        }))
        .unwrap();
        let partial = json!({"id": "p1", "entityType": "light", "position": {"x": 9, "y": 9, "z": 9}, "name": null});
        let merged = record.merged(partial.as_object().unwrap()).expect("merge");
        assert_eq!(merged.kind(), EntityKind::Primitive);
        assert_eq!(merged.name, "crate");
        let fields = merged.transform();
        assert_eq!(fields.position, Some(Vec3::splat(9.0)));
        assert_eq!(fields.rotation, Some(Vec3::new(0.5, 0.0, 0.0)));
        assert_eq!(fields.scale, Some(Vec3::splat(2.0)));
    }

    #[test]
    fn new_model_uri_clears_loaded_flag() {
        let payload = json!({"id": "m1", "entityType": "model", "uri": "a.glb"});
        let mut record = EntityRecord::from_payload(&payload).unwrap();
        record = record.merged(json!({"id": "m1", "loaded": true}).as_object().unwrap()).unwrap();
        let loaded = |record: &EntityRecord| record.to_value()["loaded"].as_bool();
        assert_eq!(loaded(&record), Some(true));
        let same_uri = record.merged(json!({"id": "m1", "uri": "a.glb"}).as_object().unwrap()).unwrap();
        assert_eq!(loaded(&same_uri), Some(true));
        let moved = record.merged(json!({"id": "m1", "uri": "b.glb"}).as_object().unwrap()).unwrap();
        assert_eq!(loaded(&moved), Some(false));
    }

    #[test]
    fn colors_accept_hex_and_numeric() {
        assert_eq!(ColorData::Hex("#ff8000".into()).rgb(), Some([255, 128, 0]));
        assert_eq!(ColorData::Numeric(0x00ff00).rgb(), Some([0, 255, 0]));
        assert_eq!(ColorData::Hex("nope".into()).rgb(), None);
        assert_eq!(ColorData::Numeric(0x123456).to_string(), "#123456");
    }

    #[test]
    fn parent_reference_keeps_partial_snapshot() {
        let record = EntityRecord::from_payload(&json!({
            "id": "g2", "entityType": "group", "parent": {"id": "g1", "name": "root group"}
        }))
        .unwrap();
        let parent = record.parent.as_ref().expect("parent ref");
        assert_eq!(parent.id, "g1");
        assert_eq!(parent.snapshot.get("name"), Some(&json!("root group")));
    }
}
