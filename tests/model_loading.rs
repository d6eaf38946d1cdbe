use kestrel_stage::bounds::Aabb;
use kestrel_stage::loader::ModelContent;
use kestrel_stage::{Stage, StageConfig};
use glam::Vec3;
use serde_json::json;
use std::cell::Cell;
use std::rc::Rc;

fn unit_content(name: &str) -> ModelContent {
    ModelContent::single(name, Aabb::from_half_extents(Vec3::splat(0.5)))
}

#[test]
fn deleting_mid_load_cancels_and_discards_late_content() {
    let (mut stage, queue) = Stage::with_manual_loader(StageConfig::default());
    assert!(stage.perform("ADD_OBJECT", &mut json!({"id": "m1", "entityType": "model", "uri": "x.glb"})));
    let loaded = Rc::new(Cell::new(0));
    let counter = Rc::clone(&loaded);
    let _sub = stage.subscribe("MODEL_LOADED", move |_| counter.set(counter.get() + 1));

    assert!(stage.perform("DELETE_OBJECT", &mut json!({"id": "m1"})));
    assert!(queue.is_cancelled("x.glb"));
    queue.resolve("x.glb", unit_content("late"));
    assert!(stage.tick(0.016).is_empty());
    assert_eq!(loaded.get(), 0);
    assert!(stage.registry().mirror().get("m1").is_none());

    let mut progress = json!({});
    assert!(stage.perform("GET_LOAD_PROGRESS", &mut progress));
    assert_eq!(progress["pending"], 0);
}

#[test]
fn failed_load_leaves_registered_but_empty_container() {
    let (mut stage, queue) = Stage::with_manual_loader(StageConfig::default());
    assert!(stage.perform("ADD_OBJECT", &mut json!({"id": "m1", "entityType": "model", "uri": "broken.glb"})));
    assert!(queue.fail("broken.glb", "unexpected end of file"));
    assert!(stage.tick(0.016).is_empty());

    let record = stage.registry().get("m1").expect("still registered").to_value();
    assert_eq!(record["loaded"], false);
    let container = stage.registry().mirror().get("m1").expect("container");
    assert!(stage.graph().children(container).is_empty());
    assert!(stage.graph().world_bounds(container).is_empty());
}

#[test]
fn transform_updates_during_load_carry_over_to_content() {
    let (mut stage, queue) = Stage::with_manual_loader(StageConfig::default());
    assert!(stage.perform("ADD_OBJECT", &mut json!({"id": "m1", "entityType": "model", "uri": "x.glb"})));
    let mut update = json!({"id": "m1", "position": {"x": 3, "y": 1, "z": 0}, "scale": {"x": 2, "y": 2, "z": 2}});
    assert!(stage.perform("UPDATE_OBJECT", &mut update));
    assert_eq!(update["loaded"], false);

    queue.resolve("x.glb", unit_content("body"));
    assert_eq!(stage.tick(0.016), vec!["m1".to_string()]);
    let container = stage.registry().mirror().get("m1").expect("container");
    let bounds = stage.graph().world_bounds(container);
    assert_eq!(bounds.center(), Vec3::new(3.0, 1.0, 0.0));
    assert_eq!(bounds.size(), Vec3::splat(2.0));
}

#[test]
fn progress_tracks_outstanding_loads() {
    let (mut stage, queue) = Stage::with_manual_loader(StageConfig::default());
    for (id, uri) in [("a", "a.glb"), ("b", "b.glb")] {
        assert!(stage.perform("ADD_OBJECT", &mut json!({"id": id, "entityType": "model", "uri": uri})));
    }
    let mut progress = json!({});
    assert!(stage.perform("GET_LOAD_PROGRESS", &mut progress));
    assert_eq!(progress["pending"], 2);
    assert_eq!(progress["progress"], 0.0);

    queue.resolve("a.glb", unit_content("a"));
    stage.tick(0.016);
    let mut progress = json!({});
    assert!(stage.perform("GET_LOAD_PROGRESS", &mut progress));
    assert_eq!(progress["pending"], 1);
    assert_eq!(progress["progress"], 0.5);
}

#[test]
fn changing_uri_requests_new_content() {
    let (mut stage, queue) = Stage::with_manual_loader(StageConfig::default());
    assert!(stage.perform("ADD_OBJECT", &mut json!({"id": "m1", "entityType": "model", "uri": "old.glb"})));
    queue.resolve("old.glb", unit_content("old"));
    stage.tick(0.016);
    assert_eq!(stage.registry().get("m1").expect("record").to_value()["loaded"], true);
    let mut update = json!({"id": "m1", "uri": "new.glb"});
    assert!(stage.perform("UPDATE_OBJECT", &mut update));
    assert_eq!(update["loaded"], false);
    assert_eq!(queue.pending(), vec!["new.glb".to_string()]);
    let container = stage.registry().mirror().get("m1").expect("container");
    assert!(stage.graph().children(container).is_empty());
    queue.resolve("new.glb", unit_content("new"));
    assert_eq!(stage.tick(0.016), vec!["m1".to_string()]);
    assert_eq!(stage.graph().children(container).len(), 1);
    assert_eq!(stage.registry().get("m1").expect("record").to_value()["loaded"], true);
}
