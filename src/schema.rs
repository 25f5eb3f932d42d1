//! Typed model of a resolved JSON-RPC schema
//!
//! Nodes live in an arena owned by [`JsonRpcSchema`] and refer to each other
//! by index: parents, children, and the canonical node of a duplicate.

use crate::error::{GeneratorError, Result};
use crate::types::{pascal_case, short_name, RpcFormat};
use crate::FileContext;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

pub type JsonId = usize;

/// Duplicate bookkeeping embedded in object and enum shapes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefTracking {
    /// Nodes sharing this shape, the canonical node first. Empty on
    /// duplicates.
    pub refs: Vec<JsonId>,
    pub is_duplicate: bool,
    pub ref_destination: Option<JsonId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumShape {
    pub values: Vec<String>,
    pub enumvalues: Vec<i64>,
    pub enumids: Vec<String>,
    pub size: u32,
    pub signed: bool,
    pub tracking: RefTracking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectShape {
    pub properties: Vec<JsonId>,
    pub required: Vec<String>,
    pub tracking: RefTracking,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEntry {
    pub message: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JsonKind {
    Null,
    Boolean,
    Number,
    Integer { size: u32, signed: bool },
    Float,
    Double,
    String { encode: Option<String> },
    Enum(EnumShape),
    Object(ObjectShape),
    Array { items: Option<JsonId>, bitmask: bool },
    Method {
        params: Option<JsonId>,
        result: Option<JsonId>,
        errors: Vec<ErrorEntry>,
    },
    Property {
        index: Option<JsonId>,
        params: Option<JsonId>,
        result: Option<JsonId>,
        readonly: bool,
        writeonly: bool,
    },
    Notification {
        id: Option<JsonId>,
        params: Option<JsonId>,
        statuslistener: bool,
    },
}

impl JsonKind {
    pub fn tracking(&self) -> Option<&RefTracking> {
        match self {
            JsonKind::Enum(shape) => Some(&shape.tracking),
            JsonKind::Object(shape) => Some(&shape.tracking),
            _ => None,
        }
    }

    pub fn tracking_mut(&mut self) -> Option<&mut RefTracking> {
        match self {
            JsonKind::Enum(shape) => Some(&mut shape.tracking),
            JsonKind::Object(shape) => Some(&mut shape.tracking),
            _ => None,
        }
    }

    /// The JSON `type` this kind is written as.
    pub fn type_name(&self) -> &'static str {
        match self {
            JsonKind::Null => "null",
            JsonKind::Boolean => "boolean",
            JsonKind::Number | JsonKind::Float | JsonKind::Double => "number",
            JsonKind::Integer { .. } => "integer",
            JsonKind::String { .. } | JsonKind::Enum(_) => "string",
            JsonKind::Object(_) => "object",
            JsonKind::Array { .. } => "array",
            JsonKind::Method { .. } => "method",
            JsonKind::Property { .. } => "property",
            JsonKind::Notification { .. } => "notification",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct JsonNode {
    /// JSON name: the key this node is stored under.
    pub name: String,
    pub parent: Option<JsonId>,
    pub kind: JsonKind,
    /// Full C++ name of the declaration this shape was converted from.
    pub original_type: Option<String>,
    /// The `$ref` this node was resolved from.
    pub ref_origin: Option<String>,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub optional: bool,
    pub deprecated: bool,
    pub obsolete: bool,
    pub alt: Option<String>,
}

impl JsonNode {
    pub fn new(name: impl Into<String>, parent: Option<JsonId>, kind: JsonKind) -> Self {
        Self {
            name: name.into(),
            parent,
            kind,
            original_type: None,
            ref_origin: None,
            summary: None,
            description: None,
            optional: false,
            deprecated: false,
            obsolete: false,
            alt: None,
        }
    }
}

/// Root of a resolved document.
#[derive(Debug, Clone)]
pub struct JsonRpcSchema {
    nodes: Vec<JsonNode>,
    pub info: Map<String, Value>,
    pub source: PathBuf,
    pub format: RpcFormat,
    pub methods: Vec<JsonId>,
    pub properties: Vec<JsonId>,
    pub events: Vec<JsonId>,
}

#[derive(Clone, Copy)]
enum Section {
    Methods,
    Properties,
    Events,
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-zA-Z0-9]*$").expect("valid name pattern"))
}

impl JsonRpcSchema {
    /// Builds the model of a resolved and normalized document. Object and
    /// enum shapes are registered with the trackers of `ctx`, which are reset
    /// first.
    pub fn build(document: &Value, source: &Path, ctx: &mut FileContext) -> Result<Self> {
        let root = document
            .as_object()
            .ok_or_else(|| GeneratorError::json("schema document is not an object"))?;
        let info = root.get("info").and_then(Value::as_object).cloned().unwrap_or_default();
        let format = info
            .get("format")
            .and_then(Value::as_str)
            .and_then(RpcFormat::from_name)
            .unwrap_or_default();

        ctx.trackers.begin_document();
        let mut schema = Self {
            nodes: Vec::new(),
            info,
            source: source.to_path_buf(),
            format,
            methods: Vec::new(),
            properties: Vec::new(),
            events: Vec::new(),
        };
        for (key, section) in [
            ("methods", Section::Methods),
            ("properties", Section::Properties),
            ("events", Section::Events),
        ] {
            let Some(entries) = root.get(key) else {
                continue;
            };
            let entries = entries
                .as_object()
                .ok_or_else(|| GeneratorError::json(format!("'{}' is not an object", key)))?;
            for (name, value) in entries {
                let id = schema.build_entry(name, value, section, ctx)?;
                match section {
                    Section::Methods => schema.methods.push(id),
                    Section::Properties => schema.properties.push(id),
                    Section::Events => schema.events.push(id),
                }
            }
        }
        log::debug!(
            "Built schema of {}: {} methods, {} properties, {} events, {} nodes",
            source.display(),
            schema.methods.len(),
            schema.properties.len(),
            schema.events.len(),
            schema.nodes.len()
        );
        Ok(schema)
    }

    pub fn node(&self, id: JsonId) -> &JsonNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> &[JsonNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn find_method(&self, name: &str) -> Option<JsonId> {
        self.methods.iter().copied().find(|&id| self.nodes[id].name == name)
    }

    pub fn find_property(&self, name: &str) -> Option<JsonId> {
        self.properties.iter().copied().find(|&id| self.nodes[id].name == name)
    }

    pub fn find_event(&self, name: &str) -> Option<JsonId> {
        self.events.iter().copied().find(|&id| self.nodes[id].name == name)
    }

    /// `params` of a method, property or notification.
    pub fn params(&self, id: JsonId) -> Option<JsonId> {
        match &self.nodes[id].kind {
            JsonKind::Method { params, .. }
            | JsonKind::Property { params, .. }
            | JsonKind::Notification { params, .. } => *params,
            _ => None,
        }
    }

    /// `result` of a method or property.
    pub fn result(&self, id: JsonId) -> Option<JsonId> {
        match &self.nodes[id].kind {
            JsonKind::Method { result, .. } | JsonKind::Property { result, .. } => *result,
            _ => None,
        }
    }

    /// Child of an object node by JSON name.
    pub fn property(&self, object: JsonId, name: &str) -> Option<JsonId> {
        match &self.nodes[object].kind {
            JsonKind::Object(shape) => shape
                .properties
                .iter()
                .copied()
                .find(|&p| self.nodes[p].name == name),
            _ => None,
        }
    }

    pub fn tracking(&self, id: JsonId) -> Option<&RefTracking> {
        self.nodes[id].kind.tracking()
    }

    /// Number of nodes sharing the shape of `id`'s canonical node.
    pub fn ref_count(&self, id: JsonId) -> usize {
        let canonical = self.canonical(id);
        self.tracking(canonical).map(|t| t.refs.len()).unwrap_or(0)
    }

    /// The canonical node of `id` (itself unless it is a duplicate).
    pub fn canonical(&self, id: JsonId) -> JsonId {
        self.tracking(id).and_then(|t| t.ref_destination).unwrap_or(id)
    }

    /// Canonical object and enum nodes shared by more than one place.
    pub fn common_types(&self) -> Vec<JsonId> {
        (0..self.nodes.len())
            .filter(|&id| self.tracking(id).is_some_and(|t| !t.is_duplicate && t.refs.len() > 1))
            .collect()
    }

    /// Name of the generated code type for `id`.
    pub fn generated_name(&self, id: JsonId) -> String {
        let id = self.canonical(id);
        let node = &self.nodes[id];
        match &node.kind {
            JsonKind::Object(_) | JsonKind::Enum(_) => {
                if let Some(original) = &node.original_type {
                    return short_name(original).to_string();
                }
                let owner = node.parent.map(|p| &self.nodes[p]);
                let owned_by_rpc = owner.is_some_and(|o| {
                    matches!(
                        o.kind,
                        JsonKind::Method { .. }
                            | JsonKind::Property { .. }
                            | JsonKind::Notification { .. }
                    )
                });
                match (&node.kind, owner) {
                    (JsonKind::Object(_), Some(owner)) if owned_by_rpc && node.name == "params" => {
                        format!("{}Params", pascal_case(&owner.name))
                    }
                    (JsonKind::Object(_), Some(owner)) if owned_by_rpc && node.name == "result" => {
                        format!("{}Result", pascal_case(&owner.name))
                    }
                    (JsonKind::Object(_), _) => format!("{}Data", pascal_case(&node.name)),
                    _ => format!("{}Type", pascal_case(&node.name)),
                }
            }
            JsonKind::Null => "void".to_string(),
            JsonKind::Boolean => "Core::JSON::Boolean".to_string(),
            JsonKind::Integer { size, signed } => {
                format!("Core::JSON::Dec{}Int{}", if *signed { "S" } else { "U" }, size)
            }
            JsonKind::Float => "Core::JSON::Float".to_string(),
            JsonKind::Number | JsonKind::Double => "Core::JSON::Double".to_string(),
            JsonKind::String { .. } => "Core::JSON::String".to_string(),
            JsonKind::Array { items, .. } => match items {
                Some(items) => format!("Core::JSON::ArrayType<{}>", self.generated_name(*items)),
                None => "Core::JSON::ArrayType<Core::JSON::VariantContainer>".to_string(),
            },
            JsonKind::Method { .. } | JsonKind::Property { .. } | JsonKind::Notification { .. } => {
                pascal_case(&node.name)
            }
        }
    }

    /// Summary of the model for `--dump` and debugging.
    pub fn to_value(&self) -> Value {
        let section = |ids: &[JsonId]| -> Value {
            let mut map = Map::new();
            for &id in ids {
                map.insert(self.nodes[id].name.clone(), self.node_value(id));
            }
            Value::Object(map)
        };
        let common: Vec<Value> = self
            .common_types()
            .into_iter()
            .map(|id| json!({ "name": self.generated_name(id), "refs": self.ref_count(id) }))
            .collect();
        json!({
            "source": self.source.display().to_string(),
            "format": self.format.as_str(),
            "info": self.info,
            "methods": section(&self.methods),
            "properties": section(&self.properties),
            "events": section(&self.events),
            "common": common,
        })
    }

    fn node_value(&self, id: JsonId) -> Value {
        let node = &self.nodes[id];
        let mut map = Map::new();
        map.insert("type".into(), json!(node.kind.type_name()));
        map.insert("class".into(), json!(self.generated_name(id)));
        if let Some(original) = &node.original_type {
            map.insert("@originaltype".into(), json!(original));
        }
        if node.optional {
            map.insert("optional".into(), json!(true));
        }
        if let Some(tracking) = node.kind.tracking() {
            if let Some(destination) = tracking.ref_destination {
                map.insert("duplicateOf".into(), json!(self.generated_name(destination)));
            } else if tracking.refs.len() > 1 {
                map.insert("refs".into(), json!(tracking.refs.len()));
            }
        }
        let children: Vec<(&str, JsonId)> = match &node.kind {
            JsonKind::Array { items, .. } => vec![("items", *items)],
            JsonKind::Method { params, result, .. } => {
                vec![("params", *params), ("result", *result)]
            }
            JsonKind::Property { index, params, result, .. } => {
                vec![("index", *index), ("params", *params), ("result", *result)]
            }
            JsonKind::Notification { id, params, .. } => vec![("id", *id), ("params", *params)],
            _ => Vec::new(),
        }
        .into_iter()
        .filter_map(|(key, child)| child.map(|c| (key, c)))
        .collect();
        for (key, child) in children {
            map.insert(key.into(), self.node_value(child));
        }
        match &node.kind {
            JsonKind::Object(shape) => {
                let properties: Map<String, Value> = shape
                    .properties
                    .iter()
                    .map(|&p| (self.nodes[p].name.clone(), self.node_value(p)))
                    .collect();
                map.insert("properties".into(), Value::Object(properties));
            }
            JsonKind::Enum(shape) => {
                map.insert("enum".into(), json!(shape.values));
            }
            _ => {}
        }
        Value::Object(map)
    }

    fn push(&mut self, node: JsonNode) -> JsonId {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn build_entry(
        &mut self,
        name: &str,
        value: &Value,
        section: Section,
        ctx: &mut FileContext,
    ) -> Result<JsonId> {
        let entry = value
            .as_object()
            .ok_or_else(|| GeneratorError::json(format!("'{}' is not an object", name)))?;
        if !name_pattern().is_match(name) {
            ctx.warn(format!("'{}' is not a camelCase name", name));
        }

        let kind_name = match section {
            Section::Methods => "method",
            Section::Properties => "property",
            Section::Events => "event",
        };
        let id = self.push(JsonNode::new(name, None, JsonKind::Null));
        self.describe(id, entry);
        if self.nodes[id].summary.is_none() && self.nodes[id].description.is_none() {
            ctx.doc_issue(format!("{} '{}' is not documented", kind_name, name));
        }

        let child =
            |schema: &mut Self, key: &str, ctx: &mut FileContext| -> Result<Option<JsonId>> {
                entry
                    .get(key)
                    .map(|value| schema.build_value(key, value, Some(id), ctx))
                    .transpose()
            };
        let kind = match section {
            Section::Methods => {
                let params = child(self, "params", ctx)?;
                let result = child(self, "result", ctx)?;
                let errors = entry
                    .get("errors")
                    .and_then(Value::as_array)
                    .map(|errors| {
                        errors
                            .iter()
                            .map(|e| ErrorEntry {
                                message: e
                                    .get("message")
                                    .and_then(Value::as_str)
                                    .unwrap_or_default()
                                    .to_string(),
                                description: e
                                    .get("description")
                                    .and_then(Value::as_str)
                                    .map(str::to_string),
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                JsonKind::Method { params, result, errors }
            }
            Section::Properties => {
                let index = child(self, "index", ctx)?;
                if let Some(index) = index {
                    if !matches!(
                        self.nodes[index].kind,
                        JsonKind::Integer { .. } | JsonKind::String { .. } | JsonKind::Enum(_)
                    ) {
                        return Err(GeneratorError::json(format!(
                            "index of property '{}' must be integer, enum or string type",
                            name
                        )));
                    }
                }
                let params = child(self, "params", ctx)?;
                let result = child(self, "result", ctx)?;
                JsonKind::Property {
                    index,
                    params,
                    result,
                    readonly: flag(entry, "readonly"),
                    writeonly: flag(entry, "writeonly"),
                }
            }
            Section::Events => {
                let filter = child(self, "id", ctx)?;
                let params = child(self, "params", ctx)?;
                JsonKind::Notification {
                    id: filter,
                    params,
                    statuslistener: flag(entry, "statuslistener"),
                }
            }
        };
        self.nodes[id].kind = kind;
        Ok(id)
    }

    fn describe(&mut self, id: JsonId, value: &Map<String, Value>) {
        let text = |key: &str| value.get(key).and_then(Value::as_str).map(str::to_string);
        let node = &mut self.nodes[id];
        node.summary = text("summary");
        node.description = text("description");
        node.original_type = text("@originaltype");
        node.ref_origin = text("@ref");
        node.alt = text("alt");
        node.optional = flag(value, "optional");
        node.deprecated = flag(value, "deprecated");
        node.obsolete = flag(value, "obsolete");
    }

    fn build_value(
        &mut self,
        name: &str,
        value: &Value,
        parent: Option<JsonId>,
        ctx: &mut FileContext,
    ) -> Result<JsonId> {
        let map = value
            .as_object()
            .ok_or_else(|| GeneratorError::json(format!("schema of '{}' is not an object", name)))?;
        let ty = map
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                GeneratorError::json(format!("missing 'type' in schema of '{}'", name))
            })?;

        let id = self.push(JsonNode::new(name, parent, JsonKind::Null));
        self.describe(id, map);
        let kind = match ty {
            "null" => JsonKind::Null,
            "boolean" => JsonKind::Boolean,
            "integer" => {
                let size = size_of(map, name)?;
                JsonKind::Integer {
                    size,
                    signed: map.get("signed").and_then(Value::as_bool).unwrap_or(true),
                }
            }
            "number" if flag(map, "float") => match map.get("size").and_then(Value::as_u64) {
                Some(64) => JsonKind::Double,
                _ => JsonKind::Float,
            },
            "number" => JsonKind::Number,
            "float" => JsonKind::Float,
            "double" => JsonKind::Double,
            "string" if map.contains_key("enum") => JsonKind::Enum(enum_shape(map, name)?),
            "string" => JsonKind::String {
                encode: map.get("encode").and_then(Value::as_str).map(str::to_string),
            },
            "array" => {
                let items = match map.get("items") {
                    Some(items) => Some(self.build_value(name, items, Some(id), ctx)?),
                    None => None,
                };
                JsonKind::Array {
                    items,
                    bitmask: flag(map, "bitmask"),
                }
            }
            "object" => {
                let mut properties = Vec::new();
                if let Some(members) = map.get("properties") {
                    let members = members
                        .as_object()
                        .ok_or_else(|| {
                            GeneratorError::json(format!(
                                "properties of '{}' is not an object",
                                name
                            ))
                        })?;
                    for (member, schema) in members {
                        properties.push(self.build_value(member, schema, Some(id), ctx)?);
                    }
                }
                let required = map
                    .get("required")
                    .and_then(Value::as_array)
                    .map(|r| r.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                JsonKind::Object(ObjectShape {
                    properties,
                    required,
                    tracking: RefTracking::default(),
                })
            }
            other => {
                return Err(GeneratorError::json(format!(
                    "unknown type '{}' in schema of '{}'",
                    other, name
                )))
            }
        };
        self.nodes[id].kind = kind;
        self.track(id, ctx);
        Ok(id)
    }

    fn track(&mut self, id: JsonId, ctx: &mut FileContext) {
        let object =
            matches!(&self.nodes[id].kind, JsonKind::Object(shape) if !shape.properties.is_empty());
        let enumeration = matches!(self.nodes[id].kind, JsonKind::Enum(_));
        let duplicate = if object {
            ctx.trackers.objects.register(&mut self.nodes, id)
        } else if enumeration {
            ctx.trackers.enums.register(&mut self.nodes, id)
        } else {
            None
        };
        let Some(duplicate) = duplicate else {
            return;
        };
        let path = |schema: &Self, id: JsonId| {
            let mut parts = vec![schema.nodes[id].name.clone()];
            let mut current = schema.nodes[id].parent;
            while let Some(parent) = current {
                parts.push(schema.nodes[parent].name.clone());
                current = schema.nodes[parent].parent;
            }
            parts.reverse();
            parts.join("/")
        };
        if duplicate.referenced {
            log::debug!(
                "{} shares the shape of {} through $ref",
                path(self, duplicate.duplicate),
                path(self, duplicate.canonical)
            );
        } else {
            let message = format!(
                "{} duplicates {}; consider a common definition",
                path(self, duplicate.duplicate),
                path(self, duplicate.canonical)
            );
            ctx.warn(message);
        }
    }
}

fn flag(map: &Map<String, Value>, key: &str) -> bool {
    map.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn size_of(map: &Map<String, Value>, name: &str) -> Result<u32> {
    match map.get("size").and_then(Value::as_u64) {
        None => Ok(32),
        Some(size @ (8 | 16 | 32 | 64)) => Ok(size as u32),
        Some(size) => Err(GeneratorError::json(format!(
            "invalid size {} in schema of '{}'",
            size, name
        ))),
    }
}

fn enum_shape(map: &Map<String, Value>, name: &str) -> Result<EnumShape> {
    let values: Vec<String> = map
        .get("enum")
        .and_then(Value::as_array)
        .ok_or_else(|| GeneratorError::json(format!("enum of '{}' is not an array", name)))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    GeneratorError::json(format!("enum of '{}' has a non-string value", name))
                })
        })
        .collect::<Result<_>>()?;

    let enumvalues = match map.get("enumvalues").and_then(Value::as_array) {
        Some(list) => list
            .iter()
            .map(|v| {
                v.as_i64().ok_or_else(|| {
                    GeneratorError::json(format!("enumvalues of '{}' must be integers", name))
                })
            })
            .collect::<Result<Vec<_>>>()?,
        None => (0..values.len() as i64).collect(),
    };
    if enumvalues.len() != values.len() {
        return Err(GeneratorError::json(format!(
            "enumvalues of '{}' do not match its {} enumerators",
            name,
            values.len()
        )));
    }

    let enumids = match map.get("enumids").and_then(Value::as_array) {
        Some(list) => list.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>(),
        None => values.clone(),
    };
    if enumids.len() != values.len() {
        return Err(GeneratorError::json(format!(
            "enumids of '{}' do not match its {} enumerators",
            name,
            values.len()
        )));
    }

    let size = size_of(map, name).map_err(|_| {
        GeneratorError::json(format!("invalid enum size in schema of '{}'", name))
    })?;
    Ok(EnumShape {
        values,
        enumvalues,
        enumids,
        size,
        signed: map.get("signed").and_then(Value::as_bool).unwrap_or(true),
        tracking: RefTracking::default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(document: Value) -> Result<(JsonRpcSchema, FileContext)> {
        let mut ctx = FileContext::new("test.json");
        let schema = JsonRpcSchema::build(&document, Path::new("test.json"), &mut ctx)?;
        Ok((schema, ctx))
    }

    fn point(description: &str) -> Value {
        json!({
            "type": "object",
            "description": description,
            "properties": {
                "x": { "type": "integer", "size": 32, "signed": true, "description": description },
                "y": { "type": "integer", "size": 32, "signed": true }
            },
            "required": ["x", "y"]
        })
    }

    #[test]
    fn test_objects_differing_in_description_are_merged() {
        let (schema, ctx) = build(json!({
            "info": { "class": "Canvas" },
            "methods": {
                "move": { "summary": "Moves", "params": point("Target position") },
                "draw": { "summary": "Draws", "params": point("Point to draw at") }
            }
        }))
        .unwrap();
        let first = schema.params(schema.find_method("move").unwrap()).unwrap();
        let second = schema.params(schema.find_method("draw").unwrap()).unwrap();
        let tracking = schema.tracking(second).unwrap();
        assert!(tracking.is_duplicate);
        assert_eq!(tracking.ref_destination, Some(first));
        assert_eq!(schema.ref_count(first), 2);
        assert_eq!(schema.common_types(), vec![first]);
        assert_eq!(schema.generated_name(second), "MoveParams");
        assert!(ctx.warnings.iter().any(|w| w.contains("duplicates")));
    }

    #[test]
    fn test_enum_merging() {
        let mode = |values: Value| json!({ "type": "string", "enum": values });
        let (schema, _) = build(json!({
            "properties": {
                "mode": { "summary": "Mode", "params": mode(json!(["on", "off"])) },
                "fallback": { "summary": "Fallback", "params": mode(json!(["on", "off"])) },
                "other": { "summary": "Other", "params": mode(json!(["off", "on"])) }
            }
        }))
        .unwrap();
        let get = |name: &str| schema.params(schema.find_property(name).unwrap()).unwrap();
        assert_eq!(schema.canonical(get("fallback")), get("mode"));
        assert_eq!(schema.canonical(get("other")), get("other"));
        assert_eq!(schema.ref_count(get("mode")), 2);
    }

    #[test]
    fn test_schema_violations() {
        let err = build(json!({ "methods": { "a": { "params": { "description": "untyped" } } } })).unwrap_err();
        assert_eq!(err.kind(), "json");
        assert!(err.to_string().contains("missing 'type'"));

        let err = build(json!({
            "methods": { "a": { "result": { "type": "string", "enum": ["x"], "size": 12 } } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("invalid enum size"));

        let err = build(json!({
            "methods": { "a": { "result": { "type": "string", "enum": ["x", "y"], "enumvalues": [1] } } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("enumvalues"));

        let err = build(json!({
            "properties": { "a": { "index": { "type": "boolean" }, "result": { "type": "null" } } }
        }))
        .unwrap_err();
        assert!(err.to_string().contains("index of property"));
    }

    #[test]
    fn test_generated_names() {
        let (schema, _) = build(json!({
            "methods": {
                "getInfo": {
                    "summary": "Info",
                    "result": {
                        "type": "object",
                        "properties": {
                            "state": { "type": "string", "enum": ["idle"], "@originaltype": "Exchange::IFoo::State" },
                            "level": { "type": "integer", "size": 16, "signed": false },
                            "names": { "type": "array", "items": { "type": "string" } },
                            "details": { "type": "object", "properties": { "x": { "type": "boolean" } } }
                        }
                    }
                }
            }
        }))
        .unwrap();
        let result = schema.result(schema.find_method("getInfo").unwrap()).unwrap();
        let name = |member: &str| schema.generated_name(schema.property(result, member).unwrap());
        assert_eq!(schema.generated_name(result), "GetInfoResult");
        assert_eq!(name("state"), "State");
        assert_eq!(name("level"), "Core::JSON::DecUInt16");
        assert_eq!(name("names"), "Core::JSON::ArrayType<Core::JSON::String>");
        assert_eq!(name("details"), "DetailsData");
    }

    #[test]
    fn test_naming_and_documentation_warnings() {
        let (_, ctx) = build(json!({ "methods": { "Bad_Name": { "result": { "type": "null" } } } })).unwrap();
        assert!(ctx.warnings.iter().any(|w| w.contains("not a camelCase name")));
        assert!(ctx.warnings.iter().any(|w| w.contains("not documented")));
    }

    #[test]
    fn test_dump_lists_common_types() {
        let (schema, _) = build(json!({
            "methods": {
                "a": { "summary": "A", "params": point("one") },
                "b": { "summary": "B", "params": point("two") }
            }
        }))
        .unwrap();
        let dump = schema.to_value();
        assert_eq!(dump["common"][0]["refs"], 2);
        assert_eq!(dump["methods"]["b"]["params"]["duplicateOf"], "AParams");
    }
}
