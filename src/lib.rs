pub mod bounds;
pub mod camera;
pub mod camera_transition;
pub mod cli;
pub mod commands;
pub mod config;
pub mod diff;
pub mod error;
pub mod gizmo;
pub mod loader;
pub mod media;
pub mod mirror;
pub mod placement;
pub mod record;
pub mod registry;
pub mod scene_graph;
pub mod stage;
pub mod time;

pub use commands::{Action, Subscription};
pub use config::StageConfig;
pub use error::{StageError, StageResult};
pub use record::EntityRecord;
pub use stage::Stage;
