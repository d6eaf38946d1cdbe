use crate::error::{StageError, StageResult};
use crate::gizmo::ToolHost;
use crate::mirror::SceneMirror;
use crate::record::{EntityKind, EntityRecord};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Authoritative id -> record mapping. Enumeration follows insertion order.
///
/// The registry owns the [`SceneMirror`] and pushes every structural change into it after
/// the record itself has been stored.
pub struct EntityRegistry {
    order: Vec<String>,
    records: HashMap<String, EntityRecord>,
    mirror: SceneMirror,
}

impl EntityRegistry {
    pub fn new(mirror: SceneMirror) -> Self {
        Self { order: Vec::new(), records: HashMap::new(), mirror }
    }

    pub fn mirror(&self) -> &SceneMirror {
        &self.mirror
    }

    pub fn mirror_mut(&mut self) -> &mut SceneMirror {
        &mut self.mirror
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&EntityRecord> {
        self.records.get(id)
    }

    /// Stores a new record and materialises its node. A reused id is rejected without
    /// touching the existing record. Records already waiting on this id as their parent
    /// are re-mirrored so they nest under the new node.
    pub fn add(&mut self, record: EntityRecord) -> StageResult<()> {
        if self.records.contains_key(&record.id) {
            return Err(StageError::Duplicate { id: record.id });
        }
        let id = record.id.clone();
        self.order.push(id.clone());
        self.records.insert(id.clone(), record);
        if let Some(stored) = self.records.get(&id) {
            if let Err(err) = self.mirror.upsert(stored) {
                tracing::warn!(target: "registry", id = %id, "record stored without scene node: {err}");
            }
        }
        self.adopt_waiting_children(&id);
        tracing::debug!(target: "registry", id = %id, count = self.order.len(), "added record");
        Ok(())
    }

    /// Shallow-merges `partial` into the stored record with the same id and returns the
    /// merged record.
    pub fn update(&mut self, partial: &Map<String, Value>) -> StageResult<EntityRecord> {
        let id = match partial.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.as_str(),
            _ => return Err(StageError::malformed("update without id")),
        };
        let current = self.records.get(id).ok_or_else(|| StageError::NotFound(id.to_string()))?;
        let merged = current.merged(partial)?;
        self.records.insert(merged.id.clone(), merged.clone());
        if let Err(err) = self.mirror.upsert(&merged) {
            tracing::warn!(target: "registry", id = %merged.id, "scene node not refreshed: {err}");
        }
        Ok(merged)
    }

    /// Removes the record and tears down its node. Returns the removed record.
    pub fn delete(&mut self, id: &str, tools: &mut ToolHost) -> StageResult<EntityRecord> {
        let removed = self.records.remove(id).ok_or_else(|| StageError::NotFound(id.to_string()))?;
        self.order.retain(|existing| existing != id);
        if !self.mirror.remove(id, tools) {
            tracing::debug!(target: "registry", id, "record had no scene node");
        }
        Ok(removed)
    }

    /// Records in insertion order, restricted to `ids` when given.
    pub fn query(&self, ids: Option<&[String]>) -> Vec<&EntityRecord> {
        self.order
            .iter()
            .filter(|id| ids.map_or(true, |filter| filter.iter().any(|wanted| wanted == *id)))
            .filter_map(|id| self.records.get(id))
            .collect()
    }

    pub fn by_kind(&self, kind: EntityKind) -> Vec<&EntityRecord> {
        self.order.iter().filter_map(|id| self.records.get(id)).filter(|record| record.kind() == kind).collect()
    }

    fn adopt_waiting_children(&mut self, parent_id: &str) {
        for id in &self.order {
            let Some(child) = self.records.get(id).filter(|record| record.parent_id() == Some(parent_id)) else {
                continue;
            };
            if let Err(err) = self.mirror.upsert(child) {
                tracing::warn!(target: "registry", id = %child.id, "child not re-parented: {err}");
            }
        }
    }

    /// Follows the weak parent reference of `id`. Dangling references resolve to `None`.
    pub fn resolve_parent(&self, id: &str) -> Option<&EntityRecord> {
        let parent_id = self.records.get(id)?.parent_id()?;
        self.records.get(parent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ManualAssetLoader;
    use serde_json::json;

    fn registry() -> EntityRegistry {
        let (loader, _queue) = ManualAssetLoader::new();
        EntityRegistry::new(SceneMirror::new(Box::new(loader)))
    }

    fn record(value: Value) -> EntityRecord {
        EntityRecord::from_payload(&value).expect("record parses")
    }

    #[test]
    fn duplicate_add_leaves_original_untouched() {
        let mut registry = registry();
        registry.add(record(json!({"id": "a", "entityType": "group", "name": "first"}))).unwrap();
        let err = registry.add(record(json!({"id": "a", "entityType": "group", "name": "second"}))).unwrap_err();
        assert!(matches!(err, StageError::Duplicate { .. }));
        assert_eq!(registry.get("a").unwrap().name, "first");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn query_preserves_insertion_order() {
        let mut registry = registry();
        for id in ["c", "a", "b"] {
            registry.add(record(json!({"id": id, "entityType": "group"}))).unwrap();
        }
        let ids: Vec<&str> = registry.query(None).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        let filter = vec!["b".to_string(), "c".to_string()];
        let ids: Vec<&str> = registry.query(Some(&filter)).iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "b"]);
    }

    #[test]
    fn unsupported_light_is_still_registered() {
        let mut registry = registry();
        registry.add(record(json!({"id": "l", "entityType": "light", "type": "laser"}))).unwrap();
        assert!(registry.contains("l"));
        assert!(registry.mirror().get("l").is_none());
    }

    #[test]
    fn update_and_delete_report_missing_ids() {
        let mut registry = registry();
        let partial = json!({"id": "ghost", "visible": false});
        assert!(matches!(registry.update(partial.as_object().unwrap()), Err(StageError::NotFound(_))));
        assert!(matches!(registry.delete("ghost", &mut ToolHost::default()), Err(StageError::NotFound(_))));
    }

    #[test]
    fn dangling_parent_resolves_to_none() {
        let mut registry = registry();
        registry.add(record(json!({"id": "g1", "entityType": "group"}))).unwrap();
        registry.add(record(json!({"id": "g2", "entityType": "group", "parent": {"id": "g1"}}))).unwrap();
        registry.add(record(json!({"id": "g3", "entityType": "group", "parent": {"id": "gone"}}))).unwrap();
        assert_eq!(registry.resolve_parent("g2").map(|r| r.id.as_str()), Some("g1"));
        assert!(registry.resolve_parent("g3").is_none());
    }

    #[test]
    fn child_added_before_parent_nests_once_parent_arrives() {
        let mut registry = registry();
        let child = json!({"id": "p1", "entityType": "primitive", "parent": {"id": "g1"}});
        registry.add(record(child)).unwrap();
        let child_node = registry.mirror().get("p1").expect("child node");
        assert_eq!(registry.mirror().graph().parent(child_node), Some(registry.mirror().graph().root()));

        let group = json!({"id": "g1", "entityType": "group", "position": {"x": 0, "y": 2, "z": 0}});
        registry.add(record(group)).unwrap();
        let group_node = registry.mirror().get("g1").expect("group node");
        assert_eq!(registry.mirror().graph().parent(child_node), Some(group_node));
        let bounds = registry.mirror().graph().world_bounds(child_node);
        assert_eq!(bounds.center(), glam::Vec3::new(0.0, 2.0, 0.0));
    }
}
