use crate::record::{ColorData, Vec3Data};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config/stage.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneConfig {
    #[serde(default = "SceneConfig::default_name")]
    pub name: String,
    #[serde(default = "SceneConfig::default_background")]
    pub background_color: ColorData,
    #[serde(default = "SceneConfig::default_floor_enabled")]
    pub floor_enabled: bool,
    #[serde(default = "SceneConfig::default_floor_color")]
    pub floor_color: ColorData,
}

impl SceneConfig {
    fn default_name() -> String {
        "Untitled scene".to_string()
    }

    fn default_background() -> ColorData {
        ColorData::Hex("#f0f0f0".to_string())
    }

    const fn default_floor_enabled() -> bool {
        true
    }

    fn default_floor_color() -> ColorData {
        ColorData::Hex("#cccccc".to_string())
    }
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            background_color: Self::default_background(),
            floor_enabled: Self::default_floor_enabled(),
            floor_color: Self::default_floor_color(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraConfig {
    #[serde(default = "CameraConfig::default_fov_degrees")]
    pub fov_degrees: f32,
    #[serde(default = "CameraConfig::default_near")]
    pub near: f32,
    #[serde(default = "CameraConfig::default_far")]
    pub far: f32,
    #[serde(default = "CameraConfig::default_min_distance")]
    pub min_distance: f32,
    #[serde(default = "CameraConfig::default_max_distance")]
    pub max_distance: f32,
    #[serde(default = "CameraConfig::default_damping")]
    pub damping_factor: f32,
    #[serde(default = "CameraConfig::default_position")]
    pub position: Vec3Data,
    #[serde(default)]
    pub target: Vec3Data,
    #[serde(default = "CameraConfig::default_transition_ms")]
    pub transition_ms: f32,
}

impl CameraConfig {
    const fn default_fov_degrees() -> f32 {
        50.0
    }

    const fn default_near() -> f32 {
        0.1
    }

    const fn default_far() -> f32 {
        1000.0
    }

    const fn default_min_distance() -> f32 {
        1.0
    }

    const fn default_max_distance() -> f32 {
        50.0
    }

    const fn default_damping() -> f32 {
        0.1
    }

    const fn default_position() -> Vec3Data {
        Vec3Data::new(0.0, 2.0, 8.0)
    }

    const fn default_transition_ms() -> f32 {
        500.0
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            fov_degrees: Self::default_fov_degrees(),
            near: Self::default_near(),
            far: Self::default_far(),
            min_distance: Self::default_min_distance(),
            max_distance: Self::default_max_distance(),
            damping_factor: Self::default_damping(),
            position: Self::default_position(),
            target: Vec3Data::default(),
            transition_ms: Self::default_transition_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConfig {
    #[serde(default = "MediaConfig::default_width")]
    pub width: u32,
    #[serde(default = "MediaConfig::default_height")]
    pub height: u32,
    /// Replaces the scene background in generated media when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<ColorData>,
}

impl MediaConfig {
    const fn default_width() -> u32 {
        512
    }

    const fn default_height() -> u32 {
        512
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self { width: Self::default_width(), height: Self::default_height(), background: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderConfig {
    #[serde(default = "LoaderConfig::default_workers")]
    pub worker_count: usize,
    #[serde(default = "LoaderConfig::default_asset_root")]
    pub asset_root: PathBuf,
}

impl LoaderConfig {
    const fn default_workers() -> usize {
        2
    }

    fn default_asset_root() -> PathBuf {
        PathBuf::from("assets")
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self { worker_count: Self::default_workers(), asset_root: Self::default_asset_root() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageConfig {
    #[serde(default)]
    pub scene: SceneConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
}

#[derive(Debug, Clone, Default)]
pub struct StageConfigOverrides {
    pub media_width: Option<u32>,
    pub media_height: Option<u32>,
}

impl StageConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(target: "config", "Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &StageConfigOverrides) {
        if let Some(width) = overrides.media_width {
            self.media.width = width;
        }
        if let Some(height) = overrides.media_height {
            self.media.height = height;
        }
    }
}

impl StageConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.media_width.is_none() && self.media_height.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.media_width.is_some() {
            fields.push("media_width");
        }
        if self.media_height.is_some() {
            fields.push("media_height");
        }
        fields
    }
}
