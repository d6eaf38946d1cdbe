use kestrel_stage::config::{StageConfig, StageConfigOverrides};
use kestrel_stage::Stage;
use std::io::Write;

#[test]
fn loads_camel_case_document_from_disk() {
    let mut file = tempfile::NamedTempFile::new().expect("temp config");
    write!(
        file,
        r##"{{
            "scene": {{"name": "Showroom", "backgroundColor": "#202020", "floorEnabled": false}},
            "camera": {{"fovDegrees": 40, "position": {{"x": 1, "y": 2, "z": 3}}, "transitionMs": 250}},
            "loader": {{"workerCount": 4}}
        }}"##
    )
    .expect("write config");

    let cfg = StageConfig::load(file.path()).expect("config loads");
    assert_eq!(cfg.scene.name, "Showroom");
    assert_eq!(cfg.scene.background_color.to_string(), "#202020");
    assert!(!cfg.scene.floor_enabled);
    assert_eq!(cfg.scene.floor_color.to_string(), "#cccccc");
    assert_eq!(cfg.camera.fov_degrees, 40.0);
    assert_eq!(cfg.camera.transition_ms, 250.0);
    assert_eq!(cfg.loader.worker_count, 4);

    let (stage, _) = Stage::with_manual_loader(cfg);
    assert_eq!(stage.camera().position, glam::Vec3::new(1.0, 2.0, 3.0));
    assert!(!stage.graph().is_visible(stage.graph().floor()));
}

#[test]
fn missing_or_broken_files_fall_back_to_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let missing = dir.path().join("absent.json");
    assert!(StageConfig::load(&missing).is_err());
    assert_eq!(StageConfig::load_or_default(&missing), StageConfig::default());

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").expect("write broken config");
    let err = StageConfig::load(&broken).unwrap_err();
    assert!(err.to_string().contains("Failed to parse"));
    assert_eq!(StageConfig::load_or_default(&broken), StageConfig::default());
}

#[test]
fn command_line_overrides_apply_after_loading() {
    let mut cfg = StageConfig::default();
    let overrides = StageConfigOverrides { media_width: Some(1920), media_height: Some(1080) };
    cfg.apply_overrides(&overrides);
    assert_eq!((cfg.media.width, cfg.media.height), (1920, 1080));
    assert_eq!(overrides.applied_fields(), vec!["media_width", "media_height"]);
}

#[test]
fn bundled_default_config_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/stage.json");
    let cfg = StageConfig::load(path).expect("bundled config parses");
    assert_eq!(cfg.media.width, 512);
    assert_eq!(cfg.camera.max_distance, 50.0);
}
