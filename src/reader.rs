use serde_json::Value;

use crate::error::{PlanError, PlanResult};
use crate::types::{EntitySchema, GraphSnapshot, Payload};

/// Read a nested entity document (a root row with its declared relations
/// loaded alongside) into a snapshot.
///
/// Keys naming a declared relation are split off into that relation's list:
/// an array becomes the list, a lone object a one-element list, and null an
/// empty one. Every other key stays on the root, nested values included.
/// The document is deep-copied; the snapshot shares nothing with it.
pub fn read_snapshot(document: &Value, schema: &EntitySchema) -> PlanResult<GraphSnapshot> {
    let object = document.as_object().ok_or_else(|| {
        PlanError::invalid_document(format!(
            "{} document must be an object, got {}",
            schema.type_name,
            json_kind(document)
        ))
    })?;

    let mut root = Payload::new();
    let mut relations: Vec<(String, Vec<Payload>)> = Vec::new();

    for (key, value) in object {
        if schema.relations.contains_key(key) {
            relations.push((key.clone(), read_relation(key, value)?));
        } else {
            root.insert(key.clone(), value.clone());
        }
    }

    // Keep declared relation order regardless of document key order
    relations.sort_by_key(|(name, _)| schema.relations.get_index_of(name));

    let snapshot = relations
        .into_iter()
        .fold(GraphSnapshot::new(root), |snapshot, (name, entities)| {
            snapshot.with_relation(name, entities)
        });
    Ok(snapshot)
}

/// Parse a JSON string and read it as a snapshot.
pub fn read_snapshot_str(json: &str, schema: &EntitySchema) -> PlanResult<GraphSnapshot> {
    let document: Value = serde_json::from_str(json)
        .map_err(|e| PlanError::invalid_document(format!("malformed JSON: {e}")))?;
    read_snapshot(&document, schema)
}

fn read_relation(name: &str, value: &Value) -> PlanResult<Vec<Payload>> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Object(entity) => Ok(vec![entity.clone()]),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(slot, item)| {
                item.as_object().cloned().ok_or_else(|| {
                    PlanError::invalid_document(format!(
                        "relation {} slot {} must be an object, got {}",
                        name,
                        slot,
                        json_kind(item)
                    ))
                })
            })
            .collect(),
        other => Err(PlanError::invalid_document(format!(
            "relation {} must be an array, object or null, got {}",
            name,
            json_kind(other)
        ))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JoinSpec, RelationMapping};
    use serde_json::json;

    fn schema() -> EntitySchema {
        EntitySchema::new("person")
            .with_relation("pets", RelationMapping::owned_collection("animal", "owner_id"))
            .with_relation(
                "movies",
                RelationMapping::many_to_many(
                    "movie",
                    JoinSpec::new("person_movie", "person_id", "movie_id"),
                ),
            )
            .with_relation("parent", RelationMapping::reference("person"))
    }

    #[test]
    fn test_read_splits_relations_from_root() {
        let doc = json!({
            "id": "p1",
            "name": "Ada",
            "nicknames": ["a", "b"],
            "movies": [{"id": "m1"}, {"id": "m2"}],
            "pets": [{"id": "a1", "name": "Rex"}],
            "parent": {"id": "p0"}
        });
        let snapshot = read_snapshot(&doc, &schema()).unwrap();

        assert_eq!(snapshot.root().get("name"), Some(&json!("Ada")));
        // Undeclared arrays are plain column values
        assert_eq!(snapshot.root().get("nicknames"), Some(&json!(["a", "b"])));
        assert!(!snapshot.root().contains_key("pets"));
        assert_eq!(snapshot.relation("pets").len(), 1);
        assert_eq!(snapshot.relation("movies").len(), 2);
        assert_eq!(snapshot.relation("parent")[0].get("id"), Some(&json!("p0")));

        let names: Vec<&str> = snapshot.relation_names().collect();
        assert_eq!(names, vec!["pets", "movies", "parent"]);
    }

    #[test]
    fn test_null_relation_reads_as_empty() {
        let doc = json!({"id": "p1", "pets": null});
        let snapshot = read_snapshot(&doc, &schema()).unwrap();
        assert!(snapshot.relation("pets").is_empty());
        assert!(snapshot.relation("movies").is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_document() {
        let mut doc = json!({"id": "p1", "pets": [{"id": "a1"}]});
        let snapshot = read_snapshot(&doc, &schema()).unwrap();
        doc["pets"][0]["id"] = json!("changed");
        doc["id"] = json!("changed");
        assert_eq!(snapshot.relation("pets")[0].get("id"), Some(&json!("a1")));
        assert_eq!(snapshot.root().get("id"), Some(&json!("p1")));
    }

    #[test]
    fn test_rejects_malformed_documents() {
        assert!(matches!(
            read_snapshot(&json!([1, 2]), &schema()),
            Err(PlanError::InvalidDocument { .. })
        ));
        assert!(read_snapshot(&json!({"pets": "nope"}), &schema()).is_err());
        assert!(read_snapshot(&json!({"pets": [1]}), &schema()).is_err());
        assert!(read_snapshot_str("{not json", &schema()).is_err());
    }
}
