//! Path-keyed accumulation of attribute writes into one output record.
//!
//! Every fired statement for a `(type, id)` writes its resolved values into a
//! [`RecordBuilder`] in document order. The builder is turned into JSON once
//! the row is done.

use indexmap::IndexMap;
use serde_json::{Map, Value as Json};

use crate::types::Attribute;

/// Largest explicit list index a path may carry. Empty slots up to the index
/// are padded, so the position bounds the list's allocation.
pub const MAX_LIST_INDEX: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    /// Padding created by an explicit index, or a slot not yet written.
    Empty,
    Leaf(Json),
    Object(IndexMap<String, Node>),
    List(Vec<Node>),
}

impl Node {
    fn object(&mut self) -> &mut IndexMap<String, Node> {
        if !matches!(self, Node::Object(_)) {
            *self = Node::Object(IndexMap::new());
        }
        match self {
            Node::Object(map) => map,
            _ => unreachable!("node was just made an object"),
        }
    }

    fn list(&mut self) -> &mut Vec<Node> {
        if !matches!(self, Node::List(_)) {
            *self = Node::List(Vec::new());
        }
        match self {
            Node::List(items) => items,
            _ => unreachable!("node was just made a list"),
        }
    }

    fn into_json(self, prune: bool) -> Option<Json> {
        match self {
            Node::Empty => None,
            Node::Leaf(v) => Some(v),
            Node::Object(map) => {
                let obj: Map<String, Json> = map
                    .into_iter()
                    .filter_map(|(k, v)| v.into_json(prune).map(|j| (k, j)))
                    .collect();
                (!obj.is_empty()).then_some(Json::Object(obj))
            }
            Node::List(items) => {
                let items: Vec<Json> = if prune {
                    items.into_iter().filter_map(|n| n.into_json(true)).collect()
                } else {
                    items
                        .into_iter()
                        .map(|n| n.into_json(false).unwrap_or(Json::Null))
                        .collect()
                };
                (!items.is_empty()).then_some(Json::Array(items))
            }
        }
    }
}

/// The in-progress record for one `(type, id)` in one row, or once for a
/// shared record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordBuilder {
    resource_type: String,
    id: String,
    root: IndexMap<String, Node>,
}

impl RecordBuilder {
    #[must_use]
    pub fn new(resource_type: &str, id: &str) -> Self {
        Self {
            resource_type: resource_type.to_owned(),
            id: id.to_owned(),
            root: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// True when nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Write `value` at `path`.
    ///
    /// - an intermediate list segment without an index uses the first element
    /// - an explicit index pads the list and selects that slot
    /// - a list leaf without an index appends
    /// - anything else overwrites
    ///
    /// Returns `false` without writing anything when an index in `path` is
    /// above [`MAX_LIST_INDEX`].
    pub fn write(&mut self, path: &[Attribute], value: Json) -> bool {
        if path.iter().any(|a| a.index.is_some_and(|i| i > MAX_LIST_INDEX)) {
            return false;
        }
        if !path.is_empty() {
            write_into(&mut self.root, path, value);
        }
        true
    }

    /// `{"resourceType": .., "id": .., ...attributes}`.
    #[must_use]
    pub fn into_json(self, prune_empty_list_entries: bool) -> Json {
        let mut obj = Map::new();
        obj.insert("resourceType".to_owned(), Json::String(self.resource_type));
        obj.insert("id".to_owned(), Json::String(self.id));
        for (name, node) in self.root {
            if let Some(v) = node.into_json(prune_empty_list_entries) {
                obj.insert(name, v);
            }
        }
        Json::Object(obj)
    }
}

fn write_into(map: &mut IndexMap<String, Node>, path: &[Attribute], value: Json) {
    let Some((attr, rest)) = path.split_first() else {
        return;
    };
    let entry = map.entry(attr.name.clone()).or_insert(Node::Empty);
    let slot = if attr.is_list || attr.index.is_some() {
        let items = entry.list();
        match attr.index {
            Some(i) => {
                let Some(len) = i.checked_add(1) else {
                    return;
                };
                if items.len() < len {
                    items.resize(len, Node::Empty);
                }
                &mut items[i]
            }
            None if rest.is_empty() => {
                items.push(Node::Empty);
                let last = items.len() - 1;
                &mut items[last]
            }
            None => {
                if items.is_empty() {
                    items.push(Node::Empty);
                }
                &mut items[0]
            }
        }
    } else {
        entry
    };
    place(slot, attr, rest, value);
}

fn place(slot: &mut Node, attr: &Attribute, rest: &[Attribute], value: Json) {
    if rest.is_empty() {
        *slot = Node::Leaf(value);
        return;
    }
    let obj = slot.object();
    if let Some(url) = &attr.extension_url {
        obj.entry("url".to_owned())
            .or_insert_with(|| Node::Leaf(Json::String(url.clone())));
    }
    write_into(obj, rest, value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::path;
    use serde_json::json;

    fn list(name: &str) -> Attribute {
        Attribute::new(name).with_list(true)
    }

    #[test]
    fn singular_leaf_overwrites() {
        let mut b = RecordBuilder::new("Patient", "p-1");
        b.write(&path("gender"), json!("male"));
        b.write(&path("gender"), json!("female"));
        assert_eq!(
            b.into_json(true),
            json!({"resourceType": "Patient", "id": "p-1", "gender": "female"})
        );
    }

    #[test]
    fn nested_objects_merge() {
        let mut b = RecordBuilder::new("Observation", "o");
        b.write(&path("valueQuantity.value"), json!(3));
        b.write(&path("valueQuantity.unit"), json!("mg"));
        assert_eq!(
            b.into_json(true)["valueQuantity"],
            json!({"value": 3, "unit": "mg"})
        );
    }

    #[test]
    fn list_leaf_without_index_appends() {
        let mut b = RecordBuilder::new("Patient", "p");
        b.write(&[list("alias")], json!("a"));
        b.write(&[list("alias")], json!("b"));
        assert_eq!(b.into_json(true)["alias"], json!(["a", "b"]));
    }

    #[test]
    fn intermediate_list_uses_first_element() {
        let mut b = RecordBuilder::new("Condition", "c");
        b.write(&[Attribute::new("code"), list("coding"), Attribute::new("code")], json!("x"));
        b.write(
            &[Attribute::new("code"), list("coding"), Attribute::new("system")],
            json!("http://snomed.info/sct"),
        );
        assert_eq!(
            b.into_json(true)["code"],
            json!({"coding": [{"code": "x", "system": "http://snomed.info/sct"}]})
        );
    }

    #[test]
    fn explicit_index_pads_and_overwrites() {
        let mut b = RecordBuilder::new("Patient", "p");
        b.write(&[Attribute::indexed("identifier", 2), Attribute::new("value")], json!("a"));
        b.write(&[Attribute::indexed("identifier", 2), Attribute::new("value")], json!("b"));
        b.write(&[Attribute::indexed("identifier", 0), Attribute::new("system")], json!("s"));
        let pruned = b.clone().into_json(true);
        assert_eq!(pruned["identifier"], json!([{"system": "s"}, {"value": "b"}]));
        let padded = b.into_json(false);
        assert_eq!(
            padded["identifier"],
            json!([{"system": "s"}, null, {"value": "b"}])
        );
    }

    #[test]
    fn leaf_index_on_list_overwrites_slot() {
        let mut b = RecordBuilder::new("Patient", "p");
        b.write(&[Attribute::indexed("alias", 0)], json!("a"));
        b.write(&[list("alias")], json!("b"));
        b.write(&[Attribute::indexed("alias", 0)], json!("c"));
        assert_eq!(b.into_json(true)["alias"], json!(["c", "b"]));
    }

    #[test]
    fn index_above_cap_is_refused() {
        let mut b = RecordBuilder::new("Patient", "p");
        assert!(b.write(&[Attribute::indexed("identifier", MAX_LIST_INDEX), Attribute::new("value")], json!("a")));
        assert!(!b.write(&[Attribute::indexed("alias", MAX_LIST_INDEX + 1)], json!("b")));
        assert!(!b.write(
            &[Attribute::new("name"), Attribute::indexed("given", usize::MAX)],
            json!("c")
        ));
        let out = b.into_json(true);
        assert_eq!(out["identifier"], json!([{"value": "a"}]));
        assert!(out.get("alias").is_none());
        assert!(out.get("name").is_none());
    }

    #[test]
    fn extension_url_is_written_once() {
        let mut ext = list("extension");
        ext.extension_url = Some("http://example.org/ext".into());
        let mut b = RecordBuilder::new("Patient", "p");
        b.write(&[ext.clone(), Attribute::new("valueCode")], json!("x"));
        assert_eq!(
            b.into_json(true)["extension"],
            json!([{"url": "http://example.org/ext", "valueCode": "x"}])
        );
    }

    #[test]
    fn empty_builder() {
        let b = RecordBuilder::new("Patient", "p");
        assert!(b.is_empty());
        assert_eq!(b.id(), "p");
        assert_eq!(b.into_json(true), json!({"resourceType": "Patient", "id": "p"}));
    }
}
