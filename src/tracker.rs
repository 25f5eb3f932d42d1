//! Structural duplicate detection for object and enum shapes
//!
//! Every object and enum node built into a schema is registered here. A node
//! whose shape matches an earlier one becomes a duplicate of it; the earlier
//! (canonical) node collects the references. Descriptions, examples and
//! defaults take no part in the comparison.

use crate::schema::{JsonId, JsonKind, JsonNode};

/// Outcome of registering a node that matched an existing shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Duplicate {
    pub canonical: JsonId,
    pub duplicate: JsonId,
    /// Either side came from a `$ref`, so the sharing is intentional.
    pub referenced: bool,
}

/// Registry of canonical shapes of one kind.
#[derive(Debug, Default)]
pub struct Tracker {
    canonical: Vec<JsonId>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.canonical.len()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical.is_empty()
    }

    pub fn reset(&mut self) {
        self.canonical.clear();
    }

    /// Registers `id`, linking it to an equal canonical node if there is one.
    pub fn register(&mut self, nodes: &mut [JsonNode], id: JsonId) -> Option<Duplicate> {
        let Some(position) = self
            .canonical
            .iter()
            .position(|&c| same_structure(nodes, c, id))
        else {
            if let Some(tracking) = nodes[id].kind.tracking_mut() {
                tracking.refs = vec![id];
                tracking.is_duplicate = false;
                tracking.ref_destination = None;
            }
            self.canonical.push(id);
            return None;
        };

        let previous = self.canonical[position];
        let referenced = nodes[previous].ref_origin.is_some() || nodes[id].ref_origin.is_some();
        let mut refs = nodes[previous]
            .kind
            .tracking_mut()
            .map(|t| std::mem::take(&mut t.refs))
            .unwrap_or_default();
        refs.push(id);

        // the node that knows its C++ type is the better canonical
        let swap = nodes[id].original_type.is_some() && nodes[previous].original_type.is_none();
        let (canonical, duplicate) = if swap { (id, previous) } else { (previous, id) };
        if swap {
            log::debug!("Node {} replaces node {} as canonical shape", id, previous);
            self.canonical[position] = id;
            refs.retain(|&r| r != id);
            refs.insert(0, id);
        }

        for &r in &refs {
            if let Some(tracking) = nodes[r].kind.tracking_mut() {
                tracking.is_duplicate = r != canonical;
                tracking.ref_destination = (r != canonical).then_some(canonical);
            }
        }
        if let Some(tracking) = nodes[canonical].kind.tracking_mut() {
            tracking.refs = refs;
        }

        Some(Duplicate {
            canonical,
            duplicate,
            referenced,
        })
    }
}

/// The two registries used while building one schema document.
#[derive(Debug, Default)]
pub struct TrackerContext {
    pub objects: Tracker,
    pub enums: Tracker,
}

impl TrackerContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forgets every shape; called before each document is built.
    pub fn begin_document(&mut self) {
        self.objects.reset();
        self.enums.reset();
    }
}

/// Structural equality of two nodes, ignoring descriptive fields.
pub fn same_structure(nodes: &[JsonNode], a: JsonId, b: JsonId) -> bool {
    if a == b {
        return true;
    }
    let (x, y) = (&nodes[a], &nodes[b]);
    match (&x.kind, &y.kind) {
        (JsonKind::Object(p), JsonKind::Object(q)) => {
            p.properties.len() == q.properties.len()
                && p.properties.iter().all(|&pa| {
                    let name = &nodes[pa].name;
                    q.properties
                        .iter()
                        .find(|&&qb| &nodes[qb].name == name)
                        .is_some_and(|&qb| same_structure(nodes, pa, qb))
                })
        }
        (JsonKind::Enum(p), JsonKind::Enum(q)) => {
            p.values == q.values
                && p.enumvalues == q.enumvalues
                && p.enumids == q.enumids
                && p.size == q.size
                && p.signed == q.signed
        }
        (JsonKind::Array { items: p, bitmask: m }, JsonKind::Array { items: q, bitmask: n }) => {
            m == n
                && match (p, q) {
                    (Some(p), Some(q)) => same_structure(nodes, *p, *q),
                    (None, None) => true,
                    _ => false,
                }
        }
        (JsonKind::Integer { size: s, signed: t }, JsonKind::Integer { size: u, signed: v }) => {
            s == u && t == v
        }
        (JsonKind::String { encode: p }, JsonKind::String { encode: q }) => p == q,
        (p, q) => std::mem::discriminant(p) == std::mem::discriminant(q),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{EnumShape, ObjectShape, RefTracking};

    struct Arena {
        nodes: Vec<JsonNode>,
    }

    impl Arena {
        fn push(&mut self, name: &str, parent: Option<JsonId>, kind: JsonKind) -> JsonId {
            let mut node = JsonNode::new(name, parent, kind);
            node.description = Some(format!("{} description {}", name, self.nodes.len()));
            self.nodes.push(node);
            self.nodes.len() - 1
        }

        fn object(&mut self, fields: &[(&str, u32)]) -> JsonId {
            let id = self.push("obj", None, JsonKind::Null);
            let properties = fields
                .iter()
                .map(|(name, size)| {
                    self.push(name, Some(id), JsonKind::Integer { size: *size, signed: false })
                })
                .collect();
            self.nodes[id].kind = JsonKind::Object(ObjectShape {
                properties,
                required: Vec::new(),
                tracking: RefTracking::default(),
            });
            id
        }

        fn enumeration(&mut self, values: &[&str], enumvalues: &[i64]) -> JsonId {
            self.push(
                "mode",
                None,
                JsonKind::Enum(EnumShape {
                    values: values.iter().map(|v| v.to_string()).collect(),
                    enumvalues: enumvalues.to_vec(),
                    enumids: values.iter().map(|v| v.to_string()).collect(),
                    size: 32,
                    signed: true,
                    tracking: RefTracking::default(),
                }),
            )
        }
    }

    fn tracking(nodes: &[JsonNode], id: JsonId) -> &RefTracking {
        nodes[id].kind.tracking().unwrap()
    }

    #[test]
    fn test_objects_with_equal_fields_are_duplicates() {
        let mut arena = Arena { nodes: Vec::new() };
        let first = arena.object(&[("x", 32), ("y", 32)]);
        let second = arena.object(&[("y", 32), ("x", 32)]);
        let mut tracker = Tracker::new();
        assert_eq!(tracker.register(&mut arena.nodes, first), None);
        let duplicate = tracker.register(&mut arena.nodes, second).unwrap();
        assert_eq!(duplicate.canonical, first);
        assert!(!duplicate.referenced);
        assert!(tracking(&arena.nodes, second).is_duplicate);
        assert_eq!(tracking(&arena.nodes, second).ref_destination, Some(first));
        assert_eq!(tracking(&arena.nodes, first).refs, vec![first, second]);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_different_field_types_are_distinct() {
        let mut arena = Arena { nodes: Vec::new() };
        let first = arena.object(&[("x", 32)]);
        let second = arena.object(&[("x", 16)]);
        let third = arena.object(&[("z", 32)]);
        let mut tracker = Tracker::new();
        for id in [first, second, third] {
            assert_eq!(tracker.register(&mut arena.nodes, id), None);
        }
        assert_eq!(tracker.len(), 3);
    }

    #[test]
    fn test_enum_order_and_values_matter() {
        let mut arena = Arena { nodes: Vec::new() };
        let a = arena.enumeration(&["on", "off"], &[0, 1]);
        let b = arena.enumeration(&["on", "off"], &[0, 1]);
        let reordered = arena.enumeration(&["off", "on"], &[0, 1]);
        let renumbered = arena.enumeration(&["on", "off"], &[0, 2]);
        let mut tracker = Tracker::new();
        assert_eq!(tracker.register(&mut arena.nodes, a), None);
        assert!(tracker.register(&mut arena.nodes, b).is_some());
        assert_eq!(tracker.register(&mut arena.nodes, reordered), None);
        assert_eq!(tracker.register(&mut arena.nodes, renumbered), None);
        assert_eq!(tracking(&arena.nodes, a).refs.len(), 2);
    }

    #[test]
    fn test_node_with_original_type_becomes_canonical() {
        let mut arena = Arena { nodes: Vec::new() };
        let plain = arena.object(&[("x", 32)]);
        let typed = arena.object(&[("x", 32)]);
        let third = arena.object(&[("x", 32)]);
        arena.nodes[typed].original_type = Some("Exchange::Point".to_string());
        let mut tracker = Tracker::new();
        tracker.register(&mut arena.nodes, plain);
        let swapped = tracker.register(&mut arena.nodes, typed).unwrap();
        assert_eq!(swapped.canonical, typed);
        assert_eq!(swapped.duplicate, plain);
        assert_eq!(tracking(&arena.nodes, plain).ref_destination, Some(typed));
        assert!(!tracking(&arena.nodes, typed).is_duplicate);

        let later = tracker.register(&mut arena.nodes, third).unwrap();
        assert_eq!(later.canonical, typed);
        assert_eq!(tracking(&arena.nodes, typed).refs, vec![typed, plain, third]);
        assert!(tracking(&arena.nodes, plain).refs.is_empty());
    }

    #[test]
    fn test_reset_forgets_shapes() {
        let mut arena = Arena { nodes: Vec::new() };
        let first = arena.object(&[("x", 32)]);
        let mut context = TrackerContext::new();
        context.objects.register(&mut arena.nodes, first);
        context.begin_document();
        assert!(context.objects.is_empty());
        assert!(context.enums.is_empty());
    }
}
