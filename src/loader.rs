//! Reference resolution and normalization of schema documents
//!
//! `$ref` targets may be local pointers (`#/definitions/x`), other JSON
//! files, or C++ headers (`file.h#Name`). Headers are converted into a
//! `{"definitions": ...}` fragment once per run and kept in a temporary
//! directory until the [`FragmentCache`] is dropped.

use crate::error::{GeneratorError, Result};
use crate::extractor::Extractor;
use crate::interface::names_match;
use crate::parser::parse_files;
use crate::types::{
    RpcFormat, CPP_INTERFACE_DIR_PLACEHOLDER, INTERFACE_DIR_PLACEHOLDER, MAX_REF_DEPTH,
};
use crate::GeneratorOptions;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::TempDir;

const REFERENCE_KEYS: [&str; 3] = ["$ref", "$cppref", "@dataref"];

/// Header fragments converted during one run.
pub struct FragmentCache {
    dir: TempDir,
    files: HashMap<PathBuf, PathBuf>,
}

impl FragmentCache {
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new().prefix("jsongen-").tempdir()?;
        log::debug!("Header fragments are written to {}", dir.path().display());
        Ok(Self {
            dir,
            files: HashMap::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Path of the fragment of `header`, converting it on first use.
    pub fn fragment(&mut self, header: &Path, options: &GeneratorOptions) -> Result<PathBuf> {
        if let Some(path) = self.files.get(header) {
            return Ok(path.clone());
        }

        let mut files = options.extra_headers.clone();
        files.push(header.to_path_buf());
        let ast = parse_files(&files, &options.cpp_include_dirs)?;
        let name = header.to_string_lossy().to_string();
        let fragment = Extractor::new(&ast, options).definitions(Some(&name));

        let stem = header.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
        let digest = md5::compute(name.as_bytes());
        let path = self.dir.path().join(format!("{}_{}.json", stem, hex::encode(&digest.0[..4])));
        let text = serde_json::to_string_pretty(&fragment)
            .map_err(|e| GeneratorError::json(e.to_string()))?;
        fs::write(&path, text)?;
        log::info!("Converted {} into {}", header.display(), path.display());

        self.files.insert(header.to_path_buf(), path.clone());
        Ok(path)
    }
}

struct Document {
    path: PathBuf,
    root: Value,
}

/// Resolves the documents of one input file.
pub struct Loader<'g> {
    options: &'g GeneratorOptions,
    fragments: &'g mut FragmentCache,
    documents: HashMap<PathBuf, Rc<Document>>,
    in_flight: Vec<(PathBuf, String)>,
}

impl<'g> Loader<'g> {
    pub fn new(options: &'g GeneratorOptions, fragments: &'g mut FragmentCache) -> Self {
        Self {
            options,
            fragments,
            documents: HashMap::new(),
            in_flight: Vec::new(),
        }
    }

    /// Reads, resolves and normalizes the JSON document at `path`.
    pub fn load(&mut self, path: &Path) -> Result<Value> {
        let document = self.open(path)?;
        self.finish(document)
    }

    /// Resolves and normalizes a document that was not read from disk.
    /// Relative references are looked up next to `path`.
    pub fn resolve(&mut self, document: Value, path: &Path) -> Result<Value> {
        let document = Rc::new(Document {
            path: path.to_path_buf(),
            root: document,
        });
        self.finish(document)
    }

    fn finish(&mut self, document: Rc<Document>) -> Result<Value> {
        let mut resolved = self.resolve_value(document.root.clone(), &document)?;
        merge_includes(&mut resolved);

        let format = resolved
            .pointer("/info/format")
            .and_then(Value::as_str)
            .and_then(RpcFormat::from_name)
            .unwrap_or(self.options.format);
        if let Some(info) = resolved
            .as_object_mut()
            .map(|root| root.entry("info").or_insert_with(|| json!({})))
        {
            if let Some(info) = info.as_object_mut() {
                info.insert("format".into(), json!(format.as_str()));
            }
        }
        normalize(&mut resolved, format);
        Ok(resolved)
    }

    fn open(&mut self, path: &Path) -> Result<Rc<Document>> {
        if let Some(document) = self.documents.get(path) {
            return Ok(Rc::clone(document));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| GeneratorError::loader(path.display().to_string(), e.to_string()))?;
        let root: Value = serde_json::from_str(&text)
            .map_err(|e| GeneratorError::json(format!("{}: {}", path.display(), e)))?;
        log::debug!("Loaded {}", path.display());
        let document = Rc::new(Document {
            path: path.to_path_buf(),
            root,
        });
        self.documents.insert(path.to_path_buf(), Rc::clone(&document));
        Ok(document)
    }

    fn resolve_value(&mut self, value: Value, document: &Rc<Document>) -> Result<Value> {
        match value {
            Value::Object(map) => {
                let reference = REFERENCE_KEYS
                    .iter()
                    .find_map(|key| {
                        map.get(*key)
                            .and_then(Value::as_str)
                            .map(|r| (*key, r.to_string()))
                    });
                let Some((key, reference)) = reference else {
                    let mut resolved = Map::new();
                    for (name, child) in map {
                        resolved.insert(name, self.resolve_value(child, document)?);
                    }
                    return Ok(Value::Object(resolved));
                };

                let mut target = if key == "@dataref" || is_scoped_name(&reference) {
                    self.dereference_data(&reference, document)?
                } else {
                    self.dereference(&reference, document)?
                };
                // siblings of the reference override the target
                if let Value::Object(target_map) = &mut target {
                    for (name, child) in map {
                        if REFERENCE_KEYS.contains(&name.as_str()) {
                            continue;
                        }
                        target_map.insert(name, self.resolve_value(child, document)?);
                    }
                    target_map.insert("@ref".into(), json!(reference));
                }
                Ok(target)
            }
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.resolve_value(item, document))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            other => Ok(other),
        }
    }

    fn dereference(&mut self, reference: &str, document: &Rc<Document>) -> Result<Value> {
        let (file, pointer) = reference.split_once('#').unwrap_or((reference, ""));
        let target = if file.is_empty() {
            Rc::clone(document)
        } else {
            let path = self.locate(file, document)?;
            if is_header(&path) {
                let fragment = self.fragments.fragment(&path, self.options)?;
                self.open(&fragment)?
            } else {
                self.open(&path)?
            }
        };
        let value = lookup(&target.root, pointer)
            .cloned()
            .ok_or_else(|| {
                GeneratorError::loader(
                    target.path.display().to_string(),
                    format!("path not found: '{}'", reference),
                )
            })?;
        self.descend(target, pointer.to_string(), reference, value)
    }

    /// Finds the schema converted from the C++ declaration `name` anywhere in
    /// the documents loaded so far.
    fn dereference_data(&mut self, name: &str, document: &Rc<Document>) -> Result<Value> {
        let mut candidates = vec![Rc::clone(document)];
        candidates.extend(self.documents.values().filter(|d| !Rc::ptr_eq(d, document)).cloned());
        for candidate in candidates {
            if let Some(value) = find_original_type(&candidate.root, name).cloned() {
                return self.descend(candidate, format!("@{}", name), name, value);
            }
        }
        Err(GeneratorError::loader(
            document.path.display().to_string(),
            format!("path not found: '{}'", name),
        ))
    }

    fn descend(
        &mut self,
        target: Rc<Document>,
        pointer: String,
        reference: &str,
        value: Value,
    ) -> Result<Value> {
        let key = (target.path.clone(), pointer);
        if self.in_flight.contains(&key) {
            return Err(GeneratorError::loader(
                target.path.display().to_string(),
                format!("path not found: '{}' (circular reference)", reference),
            ));
        }
        if self.in_flight.len() >= MAX_REF_DEPTH {
            return Err(GeneratorError::loader(
                target.path.display().to_string(),
                format!("reference depth exceeded at '{}'", reference),
            ));
        }
        self.in_flight.push(key);
        let resolved = self.resolve_value(value, &target);
        self.in_flight.pop();
        resolved
    }

    fn locate(&self, file: &str, document: &Document) -> Result<PathBuf> {
        let (relative, dirs) = if let Some(rest) = file.strip_prefix(CPP_INTERFACE_DIR_PLACEHOLDER)
        {
            (rest, &self.options.cpp_include_dirs)
        } else if let Some(rest) = file.strip_prefix(INTERFACE_DIR_PLACEHOLDER) {
            (rest, &self.options.include_dirs)
        } else if is_header(Path::new(file)) {
            (file, &self.options.cpp_include_dirs)
        } else {
            (file, &self.options.include_dirs)
        };
        let relative = relative.trim_start_matches('/');
        let base = document.path.parent().unwrap_or_else(|| Path::new(""));
        std::iter::once(base.join(relative))
            .chain(dirs.iter().map(|dir| dir.join(relative)))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| GeneratorError::loader(file, "file not found"))
    }
}

fn is_header(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("h" | "hpp" | "hxx"))
}

/// `::Exchange::Point` style references name a C++ declaration, not a file.
fn is_scoped_name(reference: &str) -> bool {
    reference.contains("::")
        && !reference.contains('#')
        && !reference.contains('/')
        && !reference.contains('.')
}

/// A JSON pointer, or a C++ name matched against the fragment definitions.
fn lookup<'v>(root: &'v Value, pointer: &str) -> Option<&'v Value> {
    if pointer.is_empty() || pointer.starts_with('/') {
        return root.pointer(pointer);
    }
    let definitions = root.get("definitions")?.as_object()?;
    let name = pointer.trim_start_matches("::");
    definitions
        .get(name)
        .or_else(|| {
            definitions
                .iter()
                .find(|(key, _)| names_match(key, name))
                .map(|(_, value)| value)
        })
}

fn find_original_type<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    match value {
        Value::Object(map) => {
            let matches = map
                .get("@originaltype")
                .and_then(Value::as_str)
                .is_some_and(|original| names_match(original, name));
            if matches && map.get("type").is_some() {
                return Some(value);
            }
            map.values().find_map(|child| find_original_type(child, name))
        }
        Value::Array(items) => items.iter().find_map(|item| find_original_type(item, name)),
        _ => None,
    }
}

/// Adds the methods, properties and events of `include` documents that the
/// including document does not define itself.
fn merge_includes(document: &mut Value) {
    let Some(root) = document.as_object_mut() else {
        return;
    };
    let Some(Value::Object(includes)) = root.remove("include") else {
        return;
    };
    for (name, mut included) in includes {
        merge_includes(&mut included);
        log::debug!("Merging included interface '{}'", name);
        for section in ["methods", "properties", "events"] {
            let Some(Value::Object(entries)) = included.get_mut(section).map(Value::take) else {
                continue;
            };
            let target = root.entry(section).or_insert_with(|| json!({}));
            if let Some(target) = target.as_object_mut() {
                for (key, entry) in entries {
                    target.entry(key).or_insert(entry);
                }
            }
        }
    }
}

/// Shapes `params` and `result` according to `format`.
pub fn normalize(document: &mut Value, format: RpcFormat) {
    if let Some(methods) = document.get_mut("methods").and_then(Value::as_object_mut) {
        for method in methods.values_mut() {
            reshape(method, "params", format == RpcFormat::Collapsed, format);
            reshape(method, "result", format != RpcFormat::Compliant, format);
        }
    }
    if let Some(events) = document.get_mut("events").and_then(Value::as_object_mut) {
        for event in events.values_mut() {
            reshape(event, "params", format == RpcFormat::Collapsed, format);
        }
    }
    if let Some(properties) = document.get_mut("properties").and_then(Value::as_object_mut) {
        for property in properties.values_mut() {
            mirror(property);
        }
    }
}

fn reshape(entry: &mut Value, key: &str, unwrap: bool, format: RpcFormat) {
    let Some(value) = entry.get_mut(key) else {
        return;
    };
    let ty = value.get("type").and_then(Value::as_str).unwrap_or_default().to_string();
    if unwrap {
        if let Some(single) = single_member(value) {
            *value = single;
        }
    } else if format == RpcFormat::Compliant && ty != "object" && ty != "null" {
        let bare = value.take();
        *value = json!({
            "type": "object",
            "properties": { "value": bare },
            "required": ["value"],
        });
    }
}

/// The only member of a plain wrapper object.
fn single_member(value: &Value) -> Option<Value> {
    let map = value.as_object()?;
    if map.get("type").and_then(Value::as_str) != Some("object")
        || map.contains_key("@originaltype")
    {
        return None;
    }
    let properties = map.get("properties")?.as_object()?;
    if properties.len() != 1 {
        return None;
    }
    let (_, member) = properties.iter().next()?;
    let mut member = member.clone();
    if let (Some(description), Some(target)) = (map.get("description"), member.as_object_mut()) {
        target.entry("description").or_insert_with(|| description.clone());
    }
    Some(member)
}

/// Read-write properties carry both `params` and `result`.
fn mirror(property: &mut Value) {
    let Some(map) = property.as_object_mut() else {
        return;
    };
    let readonly = map.get("readonly").and_then(Value::as_bool).unwrap_or(false);
    let writeonly = map.get("writeonly").and_then(Value::as_bool).unwrap_or(false);
    if !readonly && !map.contains_key("params") {
        if let Some(result) = map.get("result").cloned() {
            map.insert("params".into(), result);
        }
    }
    if !writeonly && !map.contains_key("result") {
        if let Some(params) = map.get("params").cloned() {
            map.insert("result".into(), params);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::JsonRpcSchema;
    use crate::FileContext;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, value: &Value) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
        path
    }

    fn load(path: &Path, options: &GeneratorOptions) -> Result<Value> {
        let mut cache = FragmentCache::new().unwrap();
        Loader::new(options, &mut cache).load(path)
    }

    #[test]
    fn test_local_reference_with_override() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "doc.json",
            &json!({
                "definitions": { "level": { "type": "integer", "size": 8, "description": "Level" } },
                "methods": {
                    "set": { "params": { "$ref": "#/definitions/level", "description": "New level" } }
                }
            }),
        );
        let document = load(&path, &GeneratorOptions::default()).unwrap();
        let params = &document["methods"]["set"]["params"];
        // compliant wraps the bare integer
        let value = &params["properties"]["value"];
        assert_eq!(value["size"], 8);
        assert_eq!(value["description"], "New level");
        assert_eq!(value["@ref"], "#/definitions/level");
        assert_eq!(document["info"]["format"], "compliant");
    }

    #[test]
    fn test_same_file_reference_twice_yields_duplicates() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "common.json",
            &json!({ "definitions": { "point": {
                "type": "object",
                "properties": { "x": { "type": "integer" }, "y": { "type": "integer" } }
            } } }),
        );
        let path = write(
            &dir,
            "canvas.json",
            &json!({
                "methods": {
                    "move": { "summary": "Move", "params": { "$ref": "common.json#/definitions/point" } },
                    "draw": { "summary": "Draw", "params": { "$ref": "common.json#/definitions/point" } }
                }
            }),
        );
        let document = load(&path, &GeneratorOptions::default()).unwrap();
        let mut ctx = FileContext::new(&path);
        let schema = JsonRpcSchema::build(&document, &path, &mut ctx).unwrap();
        let first = schema.params(schema.find_method("move").unwrap()).unwrap();
        let second = schema.params(schema.find_method("draw").unwrap()).unwrap();
        assert_eq!(schema.canonical(second), first);
        assert_eq!(schema.ref_count(first), 2);
        assert!(ctx.warnings.iter().all(|w| !w.contains("duplicates")));
    }

    #[test]
    fn test_circular_reference_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "loop.json",
            &json!({
                "definitions": {
                    "a": { "$ref": "#/definitions/b" },
                    "b": { "$ref": "#/definitions/a" }
                },
                "methods": { "get": { "result": { "$ref": "#/definitions/a" } } }
            }),
        );
        let err = load(&path, &GeneratorOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "loader");
        assert!(err.to_string().contains("circular reference"), "{}", err);
    }

    #[test]
    fn test_missing_targets() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "a.json", &json!({ "methods": { "x": { "result": { "$ref": "missing.json" } } } }));
        let err = load(&path, &GeneratorOptions::default()).unwrap_err();
        assert!(err.to_string().contains("file not found"));

        let path = write(&dir, "b.json", &json!({ "methods": { "x": { "result": { "$ref": "#/nowhere" } } } }));
        let err = load(&path, &GeneratorOptions::default()).unwrap_err();
        assert!(err.to_string().contains("path not found: '#/nowhere'"));
    }

    #[test]
    fn test_interface_dir_placeholder() {
        let shared = TempDir::new().unwrap();
        write(&shared, "types.json", &json!({ "definitions": { "flag": { "type": "boolean" } } }));
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "doc.json",
            &json!({ "methods": { "x": { "result": { "$ref": "{interfacedir}/types.json#/definitions/flag" } } } }),
        );
        let options = GeneratorOptions {
            include_dirs: vec![shared.path().to_path_buf()],
            ..GeneratorOptions::default()
        };
        let document = load(&path, &options).unwrap();
        assert_eq!(document["methods"]["x"]["result"]["properties"]["value"]["type"], "boolean");
    }

    #[test]
    fn test_header_reference_is_converted_once() {
        let headers = TempDir::new().unwrap();
        fs::write(
            headers.path().join("Point.h"),
            "namespace Exchange {\n// @brief A point\nstruct Point { int32_t x; int32_t y; };\n}\n",
        )
        .unwrap();
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "doc.json",
            &json!({
                "methods": {
                    "a": { "params": { "$ref": "{cppinterfacedir}/Point.h#Point" } },
                    "b": { "params": { "$cppref": "{cppinterfacedir}/Point.h#/definitions/Exchange::Point" } }
                }
            }),
        );
        let options = GeneratorOptions {
            cpp_include_dirs: vec![headers.path().to_path_buf()],
            ..GeneratorOptions::default()
        };
        let mut cache = FragmentCache::new().unwrap();
        let document = Loader::new(&options, &mut cache).load(&path).unwrap();
        assert_eq!(cache.len(), 1);
        for method in ["a", "b"] {
            let params = &document["methods"][method]["params"];
            assert_eq!(params["@originaltype"], "Exchange::Point");
            assert_eq!(params["required"], json!(["x", "y"]));
        }
        let fragment_dir = cache.dir().to_path_buf();
        drop(cache);
        assert!(!fragment_dir.exists());
    }

    #[test]
    fn test_dataref_matches_original_type() {
        let dir = TempDir::new().unwrap();
        let path = write(
            &dir,
            "doc.json",
            &json!({
                "methods": {
                    "get": { "result": {
                        "type": "object",
                        "@originaltype": "Exchange::Info",
                        "properties": { "name": { "type": "string" } }
                    } },
                    "put": { "params": { "@dataref": "Info" } },
                    "check": { "params": { "$ref": "::Exchange::Info" } }
                }
            }),
        );
        let document = load(&path, &GeneratorOptions::default()).unwrap();
        assert_eq!(document["methods"]["put"]["params"]["properties"]["name"]["type"], "string");
        assert_eq!(document["methods"]["check"]["params"]["@ref"], "::Exchange::Info");
    }

    #[test]
    fn test_includes_do_not_override() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "base.json",
            &json!({ "methods": {
                "ping": { "summary": "Base ping", "result": { "type": "null" } },
                "reset": { "summary": "Reset", "result": { "type": "null" } }
            } }),
        );
        let path = write(
            &dir,
            "derived.json",
            &json!({
                "include": { "base": { "$ref": "base.json" } },
                "methods": { "ping": { "summary": "Derived ping", "result": { "type": "null" } } }
            }),
        );
        let document = load(&path, &GeneratorOptions::default()).unwrap();
        assert!(document.get("include").is_none());
        assert_eq!(document["methods"]["ping"]["summary"], "Derived ping");
        assert_eq!(document["methods"]["reset"]["summary"], "Reset");
    }

    #[test]
    fn test_format_normalization() {
        let document = || {
            json!({
                "methods": {
                    "get": { "result": {
                        "type": "object",
                        "properties": { "level": { "type": "integer" } }
                    } },
                    "set": { "params": {
                        "type": "object",
                        "properties": { "level": { "type": "integer" } }
                    } }
                },
                "properties": {
                    "level": { "params": { "type": "integer" } },
                    "state": { "readonly": true, "result": { "type": "string" } }
                }
            })
        };

        let mut compliant = document();
        normalize(&mut compliant, RpcFormat::Compliant);
        assert_eq!(compliant["methods"]["get"]["result"]["type"], "object");
        assert_eq!(compliant["properties"]["level"]["result"], json!({ "type": "integer" }));
        assert!(compliant["properties"]["state"].get("params").is_none());

        let mut extended = document();
        normalize(&mut extended, RpcFormat::Extended);
        assert_eq!(extended["methods"]["get"]["result"], json!({ "type": "integer" }));
        assert_eq!(extended["methods"]["set"]["params"]["type"], "object");

        let mut collapsed = document();
        normalize(&mut collapsed, RpcFormat::Collapsed);
        assert_eq!(collapsed["methods"]["set"]["params"], json!({ "type": "integer" }));
    }
}
