//! Conversion of C++ interface classes into JSON-RPC schema documents
//!
//! The result is a plain `serde_json::Value` in the same shape a hand-written
//! schema has, so both kinds of input share the loader and the schema model.

use crate::ast::*;
use crate::error::{GeneratorError, Location, Result};
use crate::expression;
use crate::interface::{derives_from, Interface};
use crate::types::{camel_case, Fundamental, RefQualifiers, DEFAULT_INTERFACE_VERSION};
use crate::{FileContext, GeneratorOptions};
use serde_json::{json, Map, Value};
use std::path::Path;

/// Where a conversion happens, for error reporting.
struct Site {
    location: Location,
    prototype: String,
}

impl Site {
    fn error(&self, message: impl Into<String>) -> GeneratorError {
        GeneratorError::cpp(&self.location, self.prototype.clone(), message)
    }
}

struct Param {
    name: String,
    schema: Value,
    input: bool,
    output: bool,
    optional: bool,
}

struct Accessor {
    method: NodeId,
    getter: bool,
    index: Option<Value>,
    value: Value,
}

pub struct Extractor<'a> {
    ast: &'a Ast,
    options: &'a GeneratorOptions,
    visiting: Vec<NodeId>,
}

impl<'a> Extractor<'a> {
    pub fn new(ast: &'a Ast, options: &'a GeneratorOptions) -> Self {
        Self {
            ast,
            options,
            visiting: Vec::new(),
        }
    }

    fn ast(&self) -> &'a Ast {
        self.ast
    }

    /// Builds the schema document of one interface.
    pub fn extract(&mut self, interface: &Interface, ctx: &mut FileContext) -> Result<Value> {
        let class = interface.class;
        let node = self.ast().node(class);
        let data = self
            .ast
            .class(class)
            .ok_or_else(|| GeneratorError::parser(&node.location, "interface is not a class"))?;
        log::info!("Extracting interface {}", self.ast().full_name(class));

        let mut document = Map::new();
        document.insert("$schema".into(), json!("interface.json.schema"));
        document.insert("jsonrpc".into(), json!("2.0"));
        document.insert("info".into(), Value::Object(self.info(interface, data)));

        let mut notifications = Vec::new();
        let mut groups: Vec<(String, Vec<NodeId>)> = Vec::new();
        for method in self.exported_methods(class) {
            if let Some(sink) = self.event_interface(method) {
                if !notifications.contains(&sink) {
                    notifications.push(sink);
                }
                continue;
            }
            let name = self.json_name(method);
            match groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, members)) => members.push(method),
                None => groups.push((name, vec![method])),
            }
        }
        self.join_renamed_accessors(&mut groups);

        let mut methods = Map::new();
        let mut properties = Map::new();
        for (group, members) in &groups {
            let tagged = members.iter().any(|&m| self.meta(m).is_property);
            let (accessors, plain): (Vec<NodeId>, Vec<NodeId>) = if tagged {
                members.iter().partition(|&&m| self.meta(m).is_property)
            } else if self.is_accessor_pair(members) {
                (members.clone(), Vec::new())
            } else {
                (Vec::new(), members.clone())
            };
            if !accessors.is_empty() {
                let property = self.property(&accessors, ctx)?;
                insert_unique(&mut properties, group.clone(), property, &self.site(accessors[0]))?;
            }
            for method in plain {
                let (name, value) = self.method(method, ctx)?;
                insert_unique(&mut methods, name, value, &self.site(method))?;
            }
        }

        let mut events = Map::new();
        for sink in notifications {
            for method in self.exported_methods(sink) {
                let (name, value) = self.event(method, ctx)?;
                insert_unique(&mut events, name, value, &self.site(method))?;
            }
        }

        if !methods.is_empty() {
            document.insert("methods".into(), Value::Object(methods));
        }
        if !properties.is_empty() {
            document.insert("properties".into(), Value::Object(properties));
        }
        if !events.is_empty() {
            document.insert("events".into(), Value::Object(events));
        }
        Ok(Value::Object(document))
    }

    /// Value schemas of every plain struct and enum declared in `file`,
    /// keyed by full C++ name. Used as the target of header `$ref`s.
    pub fn definitions(&mut self, file: Option<&str>) -> Value {
        let mut definitions = Map::new();
        for id in 0..self.ast().len() {
            let node = self.ast().node(id);
            if file.is_some_and(|f| f != node.location.file) {
                continue;
            }
            let site = Site {
                location: node.location.clone(),
                prototype: self.ast().full_name(id),
            };
            let schema = match &node.kind {
                NodeKind::Class(class)
                    if class.defined && !class.is_template() && !self.has_virtual_methods(id) =>
                {
                    self.struct_schema(id, &site)
                }
                NodeKind::Enum(_) if !node.name.is_empty() => self.enum_schema(id, &site),
                _ => continue,
            };
            match schema {
                Ok(schema) => {
                    definitions.insert(site.prototype, schema);
                }
                Err(e) => log::debug!("Skipping definition {}: {}", site.prototype, e),
            }
        }
        json!({ "definitions": definitions })
    }

    fn info(&self, interface: &Interface, data: &ClassData) -> Map<String, Value> {
        let node = self.ast().node(interface.class);
        let class_name = node
            .name
            .strip_prefix('I')
            .filter(|rest| rest.starts_with(|c: char| c.is_ascii_uppercase()))
            .unwrap_or(&node.name);
        let namespace = node.parent.map(|p| self.ast().full_name(p)).unwrap_or_default();

        let mut info = Map::new();
        info.insert("class".into(), json!(class_name));
        info.insert("namespace".into(), json!(namespace));
        info.insert("interface".into(), json!(self.ast().full_name(interface.class)));
        if let Some(id) = interface.id {
            info.insert("id".into(), json!(id));
        }
        let version = data.flags.json_version.as_deref().unwrap_or(DEFAULT_INTERFACE_VERSION);
        info.insert("version".into(), json!(version));
        if let Some(format) = data.flags.format {
            info.insert("format".into(), json!(format.as_str()));
        }
        let source = Path::new(&interface.file)
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_else(|| interface.file.clone());
        info.insert("sourcefile".into(), json!(source));
        if let Some(url) = &data.flags.source_location {
            info.insert("sourcelocation".into(), json!(url));
        }
        if let Some(brief) = &data.meta.brief {
            info.insert("summary".into(), json!(brief));
        }
        if let Some(details) = &data.meta.details {
            info.insert("description".into(), json!(details));
        }
        info
    }

    /// Virtual member functions that take part in the JSON-RPC interface.
    fn exported_methods(&self, class: NodeId) -> Vec<NodeId> {
        self.ast
            .children(class)
            .iter()
            .copied()
            .filter(|&c| match self.ast().method(c) {
                Some(m) => {
                    m.is_virtual
                        && !m.is_constructor
                        && !m.is_destructor
                        && !m.is_static
                        && !m.flags.omit
                        && !m.flags.json_omit
                        && m.access == Access::Public
                }
                None => false,
            })
            .collect()
    }

    fn has_virtual_methods(&self, class: NodeId) -> bool {
        self.ast
            .children(class)
            .iter()
            .any(|&c| self.ast().method(c).is_some_and(|m| m.is_virtual))
    }

    fn meta(&self, id: NodeId) -> &'a Metadata {
        match &self.ast().node(id).kind {
            NodeKind::Method(m) => &m.meta,
            NodeKind::Variable(v) => &v.meta,
            NodeKind::Class(c) => &c.meta,
            NodeKind::Enum(e) => &e.meta,
            NodeKind::Enumerator(e) => &e.meta,
            NodeKind::Typedef(t) => &t.meta,
            NodeKind::Namespace { .. } => {
                static EMPTY: std::sync::OnceLock<Metadata> = std::sync::OnceLock::new();
                EMPTY.get_or_init(Metadata::default)
            }
        }
    }

    fn site(&self, id: NodeId) -> Site {
        Site {
            location: self.ast().node(id).location.clone(),
            prototype: self.ast().prototype(id),
        }
    }

    fn json_name(&self, id: NodeId) -> String {
        self.meta(id)
            .text
            .clone()
            .unwrap_or_else(|| camel_case(&self.ast().node(id).name))
    }

    /// The notification interface a registration method takes, if any.
    fn event_interface(&self, method: NodeId) -> Option<NodeId> {
        let data = self.ast().method(method)?;
        data.params.iter().find_map(|&p| {
            let ty = &self.ast().variable(p)?.ty;
            let tagged = self
                .ast
                .typedef_chain(ty)
                .into_iter()
                .any(|t| self.ast().typedef(t).is_some_and(|d| d.flags.event));
            let resolved = self.ast().resolve_typedef(ty);
            match resolved.base {
                TypeBase::Named(id) => {
                    let class = self.ast().class(id)?;
                    (class.flags.event || tagged).then_some(id)
                }
                _ => None,
            }
        })
    }

    fn is_error_code(&self, ty: &Type) -> bool {
        let resolved = self.ast().resolve_typedef(ty);
        if resolved.qualifiers.is_pointer() || resolved.qualifiers.is_reference() {
            return false;
        }
        if resolved.base == TypeBase::Intrinsic(Intrinsic::HResult) {
            return true;
        }
        let spelling = ty.spelling.trim_start_matches("::");
        self.options.error_code_types.iter().any(|code| {
            code == spelling
                || match resolved.base {
                    TypeBase::Fundamental(f) => Fundamental::from_name(code) == Some(f),
                    _ => false,
                }
        })
    }

    fn is_output_param(&self, param: NodeId, implicit: bool) -> bool {
        let Some(var) = self.ast().variable(param) else {
            return false;
        };
        if var.meta.input || var.meta.output {
            return var.meta.output;
        }
        let q = self.ast().resolve_typedef(&var.ty).qualifiers;
        implicit && is_mutable_indirection(q)
    }

    /// `Some(true)` for getter-shaped methods, `Some(false)` for setters.
    fn accessor_shape(&self, method: NodeId) -> Option<bool> {
        let data = self.ast().method(method)?;
        match data.params.len() {
            0 => (data.is_const && !self.is_error_code(&data.retval) && !data.retval.is_void())
                .then_some(true),
            1 | 2 => {
                let last = *data.params.last()?;
                if data.is_const || self.is_output_param(last, false) {
                    Some(true)
                } else {
                    let q = self.ast().variable(last)?.ty.qualifiers;
                    (!is_mutable_indirection(q)).then_some(false)
                }
            }
            _ => None,
        }
    }

    /// Rejoins a getter and setter of one C++ name when only one of them
    /// carries a `@text` override; the overridden name wins.
    fn join_renamed_accessors(&self, groups: &mut Vec<(String, Vec<NodeId>)>) {
        let mut i = 0;
        while i < groups.len() {
            let partner = match groups[i].1.as_slice() {
                [renamed] if self.meta(*renamed).text.is_some() => {
                    let cpp_name = &self.ast().node(*renamed).name;
                    groups.iter().position(|(_, members)| match members.as_slice() {
                        [other] => {
                            other != renamed
                                && self.meta(*other).text.is_none()
                                && &self.ast().node(*other).name == cpp_name
                                && self.is_accessor_pair(&[*renamed, *other])
                        }
                        _ => false,
                    })
                }
                _ => None,
            };
            match partner {
                Some(j) => {
                    let (_, members) = groups.remove(j);
                    let target = if j < i { i - 1 } else { i };
                    groups[target].1.extend(members);
                    i = target + 1;
                }
                None => i += 1,
            }
        }
    }

    fn is_accessor_pair(&self, members: &[NodeId]) -> bool {
        match members {
            [a, b] => matches!(
                (self.accessor_shape(*a), self.accessor_shape(*b)),
                (Some(true), Some(false)) | (Some(false), Some(true))
            ),
            _ => false,
        }
    }

    fn documentation(
        &self,
        id: NodeId,
        kind: &str,
        target: &mut Map<String, Value>,
        ctx: &mut FileContext,
    ) {
        let meta = self.meta(id);
        match &meta.brief {
            Some(brief) => {
                target.insert("summary".into(), json!(brief));
            }
            None => ctx.doc_issue(format!(
                "{} '{}' is missing a summary",
                kind,
                self.ast().full_name(id)
            )),
        }
        if let Some(details) = &meta.details {
            target.insert("description".into(), json!(details));
        }
        if meta.is_deprecated {
            target.insert("deprecated".into(), json!(true));
        }
        if meta.is_obsolete {
            target.insert("obsolete".into(), json!(true));
        }
        if let Some(alt) = &meta.alt {
            target.insert("alt".into(), json!(alt));
        }
        if !meta.retval_docs.is_empty() {
            let errors: Vec<Value> = meta
                .retval_docs
                .iter()
                .map(|(name, text)| json!({ "message": name, "description": text }))
                .collect();
            target.insert("errors".into(), Value::Array(errors));
        }
    }

    fn method(&mut self, id: NodeId, ctx: &mut FileContext) -> Result<(String, Value)> {
        let site = self.site(id);
        let data = self.ast().method(id).ok_or_else(|| site.error("not a method"))?;
        let returns_error_code = self.is_error_code(&data.retval);
        if self.options.verify && !returns_error_code {
            return Err(site.error(format!(
                "method must return an error code ({})",
                self.options.error_code_types.join(", ")
            )));
        }

        let params = self.params(id, false, &site)?;
        let mut method = Map::new();
        self.documentation(id, "method", &mut method, ctx);

        let inputs: Vec<&Param> = params.iter().filter(|p| p.input).collect();
        let outputs: Vec<&Param> = params.iter().filter(|p| p.output).collect();
        if !inputs.is_empty() {
            method.insert("params".into(), object_of(&inputs));
        }
        let result = if !outputs.is_empty() {
            object_of(&outputs)
        } else if !returns_error_code && !data.retval.is_void() {
            let retval = data.retval.clone();
            self.convert(&retval, &Metadata::default(), &site)?
        } else {
            json!({ "type": "null" })
        };
        method.insert("result".into(), result);
        Ok((self.json_name(id), Value::Object(method)))
    }

    fn event(&mut self, id: NodeId, ctx: &mut FileContext) -> Result<(String, Value)> {
        let site = self.site(id);
        let data = self.ast().method(id).ok_or_else(|| site.error("not a method"))?;
        let index_param = data
            .params
            .first()
            .copied()
            .filter(|&p| self.ast().variable(p).is_some_and(|v| v.meta.is_index));

        let mut event = Map::new();
        self.documentation(id, "event", &mut event, ctx);
        let mut params = self.params(id, false, &site)?;
        if let Some(p) = index_param {
            let name = self.json_name(p);
            let position = params.iter().position(|param| param.name == name).ok_or_else(|| {
                site.error(format!(
                    "index parameter '{}' cannot also be the length of another parameter",
                    self.ast().node(p).name
                ))
            })?;
            let index = params.remove(position);
            event.insert("id".into(), self.index_schema(index, &site)?);
        }
        if let Some(output) = params.iter().find(|p| p.output) {
            return Err(site.error(format!("event parameter '{}' must be an input", output.name)));
        }
        if !params.is_empty() {
            let inputs: Vec<&Param> = params.iter().collect();
            event.insert("params".into(), object_of(&inputs));
        }
        if data.meta.is_listener {
            event.insert("statuslistener".into(), json!(true));
        }
        Ok((self.json_name(id), Value::Object(event)))
    }

    fn accessor(&mut self, id: NodeId) -> Result<Accessor> {
        let site = self.site(id);
        let data = self.ast().method(id).ok_or_else(|| site.error("not a method"))?.clone();
        if data.params.len() > 2 {
            return Err(site.error("too many parameters for a property accessor"));
        }
        let first_is_index = data
            .params
            .first()
            .is_some_and(|&p| self.ast().variable(p).is_some_and(|v| v.meta.is_index));
        let (index_param, value_param) = match data.params.as_slice() {
            [] => (None, None),
            [only] if first_is_index => (Some(*only), None),
            [only] => (None, Some(*only)),
            [index, value] => (Some(*index), Some(*value)),
            _ => unreachable!("accessor arity checked above"),
        };

        let getter = match value_param {
            Some(value) => data.is_const || self.is_output_param(value, data.is_const),
            None => true,
        };
        let uses_retval = getter && value_param.is_none();
        if self.options.verify
            && !uses_retval
            && !data.retval.is_void()
            && !self.is_error_code(&data.retval)
        {
            return Err(site.error("property accessor must return an error code or void"));
        }

        let value = match value_param {
            Some(param) => {
                let var = self
                    .ast()
                    .variable(param)
                    .ok_or_else(|| site.error("invalid parameter"))?
                    .clone();
                if !getter && self.is_output_param(param, false) {
                    return Err(site.error(format!(
                        "setter parameter '{}' must be an input",
                        self.ast().node(param).name
                    )));
                }
                let mut schema = self.convert(&var.ty, &var.meta, &site)?;
                describe(&mut schema, self.param_description(id, param));
                schema
            }
            None => {
                if data.retval.is_void() || self.is_error_code(&data.retval) {
                    return Err(site.error("property getter has no value to return"));
                }
                self.convert(&data.retval, &Metadata::default(), &site)?
            }
        };

        let index = match index_param {
            Some(param) => {
                let var = self
                    .ast()
                    .variable(param)
                    .ok_or_else(|| site.error("invalid parameter"))?
                    .clone();
                let mut schema = self.convert(&var.ty, &var.meta, &site)?;
                describe(&mut schema, self.param_description(id, param));
                let index = Param {
                    name: self.json_name(param),
                    schema,
                    input: true,
                    output: false,
                    optional: false,
                };
                Some(self.index_schema(index, &site)?)
            }
            None => None,
        };

        Ok(Accessor {
            method: id,
            getter,
            index,
            value,
        })
    }

    fn index_schema(&self, index: Param, site: &Site) -> Result<Value> {
        let kind = index.schema.get("type").and_then(Value::as_str).unwrap_or("");
        if !matches!(kind, "integer" | "string") || index.schema.get("encode").is_some() {
            return Err(site.error("index to a property must be integer, enum or string type"));
        }
        let mut schema = index.schema;
        if let Value::Object(map) = &mut schema {
            map.insert("name".into(), json!(index.name));
        }
        Ok(schema)
    }

    fn property(&mut self, methods: &[NodeId], ctx: &mut FileContext) -> Result<Value> {
        let accessors = methods.iter().map(|&m| self.accessor(m)).collect::<Result<Vec<_>>>()?;
        let getters: Vec<&Accessor> = accessors.iter().filter(|a| a.getter).collect();
        let setters: Vec<&Accessor> = accessors.iter().filter(|a| !a.getter).collect();
        let first = &accessors[0];
        if getters.len() > 1 || setters.len() > 1 {
            return Err(self
                .site(first.method)
                .error("property has more than one getter or setter"));
        }
        let getter = getters.first().copied();
        let setter = setters.first().copied();

        if let (Some(get), Some(set)) = (getter, setter) {
            let site = self.site(set.method);
            if !same_shape(&get.value, &set.value) {
                return Err(site.error(format!(
                    "property '{}' getter and setter types differ",
                    self.ast().node(set.method).name
                )));
            }
            match (&get.index, &set.index) {
                (Some(a), Some(b)) if !same_shape(a, b) => {
                    return Err(site.error("property index types of getter and setter differ"));
                }
                (Some(_), None) | (None, Some(_)) => {
                    return Err(
                        site.error("property index is declared on only one of getter and setter")
                    );
                }
                _ => {}
            }
        }

        let primary = getter.or(setter).map(|a| a.method).unwrap_or(first.method);
        let mut property = Map::new();
        self.documentation(primary, "property", &mut property, ctx);
        if let (Some(_), Some(set)) = (getter, setter) {
            let meta = self.meta(set.method);
            if !property.contains_key("summary") {
                if let Some(brief) = &meta.brief {
                    property.insert("summary".into(), json!(brief));
                }
            }
        }
        match (getter, setter) {
            (Some(_), None) => {
                property.insert("readonly".into(), json!(true));
            }
            (None, Some(_)) => {
                property.insert("writeonly".into(), json!(true));
            }
            _ => {}
        }
        if let Some(index) = getter.or(setter).and_then(|a| a.index.clone()) {
            property.insert("index".into(), index);
        }
        if let Some(set) = setter {
            property.insert("params".into(), set.value.clone());
        }
        if let Some(get) = getter {
            property.insert("result".into(), get.value.clone());
        }
        Ok(Value::Object(property))
    }

    fn param_description(&self, method: NodeId, param: NodeId) -> Option<String> {
        let name = &self.ast().node(param).name;
        self.meta(method)
            .param_doc(name)
            .map(str::to_string)
            .or_else(|| self.meta(param).brief.clone())
    }

    /// Converts the parameters of `method`, deciding their direction.
    fn params(&mut self, method: NodeId, implicit_output: bool, site: &Site) -> Result<Vec<Param>> {
        let data = self.ast().method(method).ok_or_else(|| site.error("not a method"))?.clone();
        let method_name = &self.ast().node(method).name;

        // parameters named by another parameter's length or interface tag
        let mut implied = Vec::new();
        for &p in &data.params {
            if let Some(var) = self.ast().variable(p) {
                let tags = [&var.meta.length, &var.meta.maxlength, &var.meta.interface];
                for expr in tags.into_iter().flatten() {
                    if let [single] = expr.as_slice() {
                        implied.push(single.clone());
                    }
                }
            }
        }

        let mut params = Vec::new();
        for &p in &data.params {
            let name = self.ast().node(p).name.clone();
            let var = self
                .ast()
                .variable(p)
                .ok_or_else(|| site.error("invalid parameter"))?
                .clone();
            if name.is_empty() {
                return Err(site.error("unnamed parameter"));
            }
            if &name == method_name {
                return Err(site.error(format!(
                    "parameter '{}' has the same name as its method",
                    name
                )));
            }
            if implied.contains(&name) {
                continue;
            }

            let q = self.ast().resolve_typedef(&var.ty).qualifiers;
            let intent = var.meta.length.is_some()
                || var.meta.maxlength.is_some()
                || var.meta.interface.is_some();
            let (input, output) = if var.meta.input || var.meta.output {
                (var.meta.input, var.meta.output)
            } else if !is_mutable_indirection(q) {
                (true, false)
            } else if intent && q.is_pointer() {
                (false, true)
            } else if implicit_output || !self.options.verify {
                (false, true)
            } else {
                let kind = if q.is_pointer() { "pointer" } else { "reference" };
                return Err(site.error(format!(
                    "non-const {} parameter '{}' requires an @in, @out or @inout tag",
                    kind, name
                )));
            };

            let mut schema = self.convert(&var.ty, &var.meta, site)?;
            describe(&mut schema, self.param_description(method, p));
            let optional = schema.get("optional").and_then(Value::as_bool).unwrap_or(false);
            params.push(Param {
                name: self.json_name(p),
                schema,
                input,
                output,
                optional,
            });
        }
        Ok(params)
    }

    /// Maps a C++ type onto a JSON schema value.
    fn convert(&mut self, ty: &Type, meta: &Metadata, site: &Site) -> Result<Value> {
        let chain = self.ast().typedef_chain(ty);
        let resolved = self.ast().resolve_typedef(ty);
        let q = resolved.qualifiers;

        if meta.interface.is_some() {
            return Ok(
                json!({ "type": "integer", "size": 32, "signed": false, "instanceid": true }),
            );
        }

        if let TypeBase::Fundamental(f) = resolved.base {
            let byte = matches!(f, Fundamental::UInt8 | Fundamental::UnsignedChar);
            let is_buffer =
                meta.length.is_some() || meta.maxlength.is_some() || resolved.array.is_some();
            if is_buffer && (byte || f.is_char()) {
                let mut schema = Map::new();
                schema.insert("type".into(), json!("string"));
                if byte {
                    schema.insert("encode".into(), json!("base64"));
                }
                if let Some(length) = meta.length.as_ref().or(resolved.array.as_ref()) {
                    schema.insert("length".into(), json!(length.join(" ")));
                }
                if let Some(maxlength) = &meta.maxlength {
                    schema.insert("maxlength".into(), json!(maxlength.join(" ")));
                }
                return Ok(Value::Object(schema));
            }
            if q.is_pointer() && f.is_char() {
                return Ok(json!({ "type": "string" }));
            }
            if q.is_pointer() && is_buffer {
                return Err(
                    site.error("buffer length is only supported for byte and character buffers")
                );
            }
        }

        let mut schema = match &resolved.base {
            TypeBase::Fundamental(f) => fundamental_schema(*f),
            TypeBase::Intrinsic(Intrinsic::String) => json!({ "type": "string" }),
            TypeBase::Intrinsic(Intrinsic::HResult) => {
                json!({ "type": "integer", "size": 32, "signed": false })
            }
            TypeBase::Intrinsic(Intrinsic::InstanceId) => {
                json!({ "type": "integer", "size": 32, "signed": false, "instanceid": true })
            }
            TypeBase::Intrinsic(Intrinsic::Optional(inner)) => {
                let mut schema = self.convert(inner, meta, site)?;
                if let Value::Object(map) = &mut schema {
                    map.insert("optional".into(), json!(true));
                }
                schema
            }
            TypeBase::Intrinsic(Intrinsic::Iterator(inner)) => {
                let items = self.convert(inner, &Metadata::default(), site)?;
                json!({ "type": "array", "items": items })
            }
            TypeBase::Named(id) => {
                let id = *id;
                match &self.ast().node(id).kind {
                    NodeKind::Enum(data) => {
                        let schema = self.enum_schema(id, site)?;
                        let bitmask = meta.bitmask
                            || data.meta.bitmask
                            || chain
                                .iter()
                                .any(|&t| self.ast().typedef(t).is_some_and(|d| d.meta.bitmask));
                        if bitmask {
                            json!({ "type": "array", "items": schema, "bitmask": true })
                        } else {
                            schema
                        }
                    }
                    NodeKind::Class(class) => {
                        let iterator = class.flags.iterator
                            || chain
                                .iter()
                                .any(|&t| self.ast().typedef(t).is_some_and(|d| d.flags.iterator));
                        if iterator {
                            self.iterator_schema(id, site)?
                        } else if self.has_virtual_methods(id)
                            || derives_from(self.ast, id, &self.options.root_interface)
                        {
                            return Err(site.error(format!(
                                "interface '{}' cannot be passed as a value",
                                self.ast().full_name(id)
                            )));
                        } else {
                            self.struct_schema(id, site)?
                        }
                    }
                    _ => {
                        return Err(
                            site.error(format!("'{}' is not a type", self.ast().full_name(id)))
                        )
                    }
                }
            }
            TypeBase::Unresolved(name) => {
                return Err(site.error(format!("unknown type '{}'", name)))
            }
        };

        if let Some(size) = &resolved.array {
            let mut array = Map::new();
            array.insert("type".into(), json!("array"));
            array.insert("items".into(), schema);
            let ast = self.ast;
            if let Some(count) = expression::evaluate(size, &|n| ast.lookup_value(ROOT, n)) {
                array.insert("maxItems".into(), json!(count));
            }
            schema = Value::Object(array);
        }
        if meta.opaque {
            if let Value::Object(map) = &mut schema {
                map.insert("opaque".into(), json!(true));
            }
        }
        Ok(schema)
    }

    fn enum_schema(&self, id: NodeId, site: &Site) -> Result<Value> {
        let data = self.ast().enumeration(id).ok_or_else(|| site.error("not an enum"))?;
        let mut names = Vec::new();
        let mut values = Vec::new();
        let mut ids = Vec::new();
        for &e in &data.enumerators {
            let enumerator =
                self.ast().enumerator(e).ok_or_else(|| site.error("not an enumerator"))?;
            let name = &self.ast().node(e).name;
            let value = enumerator.value.ok_or_else(|| {
                site.error(format!(
                    "value of enumerator '{}' cannot be evaluated",
                    self.ast().full_name(e)
                ))
            })?;
            names.push(enumerator.meta.text.clone().unwrap_or_else(|| name.clone()));
            values.push(value);
            ids.push(name.clone());
        }
        let (size, signed) = data
            .underlying
            .as_ref()
            .map(|t| self.ast().resolve_typedef(t))
            .and_then(|t| match t.base {
                TypeBase::Fundamental(f) if f.is_integer() => Some((f.size(), f.is_signed())),
                _ => None,
            })
            .unwrap_or((32, true));
        Ok(json!({
            "type": "string",
            "enum": names,
            "enumvalues": values,
            "enumids": ids,
            "@originaltype": self.ast().full_name(id),
            "size": size,
            "signed": signed,
        }))
    }

    fn struct_schema(&mut self, class: NodeId, site: &Site) -> Result<Value> {
        if self.visiting.contains(&class) {
            return Err(site.error(format!("recursive type '{}'", self.ast().full_name(class))));
        }
        self.visiting.push(class);
        let result = self.struct_members(class, site);
        self.visiting.pop();

        let (properties, required) = result?;
        let mut schema = Map::new();
        schema.insert("type".into(), json!("object"));
        schema.insert("@originaltype".into(), json!(self.ast().full_name(class)));
        if let Some(brief) = &self.meta(class).brief {
            schema.insert("description".into(), json!(brief));
        }
        schema.insert("properties".into(), Value::Object(properties));
        schema.insert("required".into(), json!(required));
        Ok(Value::Object(schema))
    }

    fn struct_members(
        &mut self,
        class: NodeId,
        site: &Site,
    ) -> Result<(Map<String, Value>, Vec<String>)> {
        let mut properties = Map::new();
        let mut required = Vec::new();
        let bases: Vec<NodeId> = self
            .ast
            .class(class)
            .map(|c| c.bases.iter().filter_map(|b| b.resolved).collect())
            .unwrap_or_default();
        for base in bases {
            let (inherited, inherited_required) = self.struct_members(base, site)?;
            properties.extend(inherited);
            required.extend(inherited_required);
        }
        for &child in self.ast().children(class) {
            let Some(var) = self.ast().variable(child) else {
                continue;
            };
            if var.is_static || var.access != Access::Public {
                continue;
            }
            let var = var.clone();
            let name = self.json_name(child);
            let mut schema = self.convert(&var.ty, &var.meta, site)?;
            describe(&mut schema, var.meta.brief.clone());
            if !schema.get("optional").and_then(Value::as_bool).unwrap_or(false) {
                required.push(name.clone());
            }
            properties.insert(name, schema);
        }
        Ok((properties, required))
    }

    /// Element type of an `@iterator` interface, taken from its `Current()`.
    fn iterator_schema(&mut self, class: NodeId, site: &Site) -> Result<Value> {
        let current = self.ast().children(class).iter().copied().find_map(|c| {
            let method = self.ast().method(c)?;
            if self.ast().node(c).name != "Current" {
                return None;
            }
            match method.params.as_slice() {
                [param] => self.ast().variable(*param).map(|v| {
                    let mut ty = v.ty.clone();
                    ty.qualifiers.remove(RefQualifiers::REFERENCE);
                    ty.qualifiers.remove(RefQualifiers::CONST);
                    ty
                }),
                [] if !method.retval.is_void() => Some(method.retval.clone()),
                _ => None,
            }
        });
        let element = current.ok_or_else(|| {
            site.error(format!(
                "unable to determine element type of iterator '{}'",
                self.ast().full_name(class)
            ))
        })?;
        let items = self.convert(&element, &Metadata::default(), site)?;
        Ok(json!({ "type": "array", "items": items }))
    }
}

/// Non-const pointer or reference: the callee may write through it.
fn is_mutable_indirection(q: RefQualifiers) -> bool {
    if q.is_pointer() {
        !q.contains(RefQualifiers::POINTER_TO_CONST) && !q.is_const()
    } else {
        q.is_reference() && !q.is_const()
    }
}

fn fundamental_schema(f: Fundamental) -> Value {
    match f {
        Fundamental::Void => json!({ "type": "null" }),
        Fundamental::Bool => json!({ "type": "boolean" }),
        f if f.is_float() => json!({ "type": "number", "float": true, "size": f.size().min(64) }),
        f => json!({ "type": "integer", "size": f.size(), "signed": f.is_signed() }),
    }
}

fn describe(schema: &mut Value, description: Option<String>) {
    if let (Value::Object(map), Some(text)) = (schema, description) {
        map.insert("description".into(), json!(text));
    }
}

fn object_of(params: &[&Param]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for param in params {
        properties.insert(param.name.clone(), param.schema.clone());
        if !param.optional {
            required.push(param.name.clone());
        }
    }
    json!({ "type": "object", "properties": properties, "required": required })
}

fn insert_unique(
    target: &mut Map<String, Value>,
    name: String,
    value: Value,
    site: &Site,
) -> Result<()> {
    if target.contains_key(&name) {
        return Err(site.error(format!("duplicate JSON-RPC name '{}'", name)));
    }
    target.insert(name, value);
    Ok(())
}

/// Equality of two schemas, ignoring descriptive keys.
fn same_shape(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(x), Value::Object(y)) => {
            let relevant = |m: &Map<String, Value>| {
                m.iter()
                    .filter(|(k, _)| {
                        !matches!(
                            k.as_str(),
                            "description" | "summary" | "example" | "default" | "name"
                        )
                    })
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<Map<String, Value>>()
            };
            let (x, y) = (relevant(x), relevant(y));
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| same_shape(v, w)))
        }
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(v, w)| same_shape(v, w))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::find_interfaces;
    use crate::parser::parse_source;

    fn extract_with(source: &str, options: &GeneratorOptions) -> Result<(Value, FileContext)> {
        let ast = parse_source(source, "IFoo.h")?;
        let interfaces = find_interfaces(&ast, None, &options.root_interface);
        assert_eq!(interfaces.len(), 1, "expected one interface");
        let mut ctx = FileContext::new("IFoo.h");
        let document = Extractor::new(&ast, options).extract(&interfaces[0], &mut ctx)?;
        Ok((document, ctx))
    }

    fn extract(body: &str) -> Result<Value> {
        let source = format!(
            "namespace Exchange {{\n// @json 1.0.0\nstruct IFoo : virtual public Core::IUnknown {{\nenum {{ ID = 0x42 }};\n{}\n}};\n}}",
            body
        );
        extract_with(&source, &GeneratorOptions::default()).map(|(document, _)| document)
    }

    #[test]
    fn test_info_block() {
        let document = extract("// @brief Does nothing\nvirtual Core::hresult Nop() = 0;").unwrap();
        let info = &document["info"];
        assert_eq!(info["class"], "Foo");
        assert_eq!(info["namespace"], "Exchange");
        assert_eq!(info["interface"], "Exchange::IFoo");
        assert_eq!(info["id"], 0x42);
        assert_eq!(info["version"], "1.0.0");
        assert_eq!(info["sourcefile"], "IFoo.h");
        assert_eq!(document["methods"]["nop"]["summary"], "Does nothing");
        assert_eq!(document["methods"]["nop"]["result"], json!({ "type": "null" }));
    }

    #[test]
    fn test_getter_setter_pair_merges_into_property() {
        let document = extract(
            "virtual const uint32_t& Level() const = 0;\nvirtual void Level(const uint32_t& v) = 0;",
        )
        .unwrap();
        let properties = document["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 1);
        let level = &properties["level"];
        let expected = json!({ "type": "integer", "size": 32, "signed": false });
        assert_eq!(level["params"], expected);
        assert_eq!(level["result"], expected);
        assert!(level.get("readonly").is_none());
        assert!(level.get("writeonly").is_none());
        assert!(document.get("methods").is_none());
    }

    #[test]
    fn test_getter_setter_type_mismatch() {
        let err = extract("virtual const uint32_t& Level() const = 0;\nvirtual void Level(const uint16_t& v) = 0;")
            .unwrap_err();
        assert_eq!(err.kind(), "cpp");
        assert!(err.to_string().contains("getter and setter types differ"), "{}", err);
    }

    #[test]
    fn test_float_index_is_rejected() {
        let err = extract(
            "// @property\nvirtual Core::hresult Gain(const float band /* @index */, uint32_t& gain /* @out */) const = 0;",
        )
        .unwrap_err();
        assert_eq!(err.kind(), "cpp");
        assert!(err
            .to_string()
            .contains("index to a property must be integer, enum or string type"));
    }

    #[test]
    fn test_indexed_readonly_property() {
        let document = extract(
            "// @property\n// @brief Gain of a band\nvirtual Core::hresult Gain(const uint8_t band /* @index */, int16_t& gain /* @out */) const = 0;",
        )
        .unwrap();
        let gain = &document["properties"]["gain"];
        assert_eq!(gain["readonly"], true);
        assert_eq!(gain["index"]["name"], "band");
        assert_eq!(gain["index"]["size"], 8);
        assert_eq!(gain["result"], json!({ "type": "integer", "size": 16, "signed": true }));
        assert!(gain.get("params").is_none());
    }

    #[test]
    fn test_method_params_and_result() {
        let document = extract(
            r#"
            // @brief Sets a value
            // @param key Name of the value
            // @retval ERROR_UNKNOWN_KEY Key does not exist
            virtual Core::hresult Set(const string& key, const bool persist, uint32_t& previous /* @out */) = 0;
            "#,
        )
        .unwrap();
        let set = &document["methods"]["set"];
        assert_eq!(set["params"]["properties"]["key"]["description"], "Name of the value");
        assert_eq!(set["params"]["properties"]["persist"]["type"], "boolean");
        assert_eq!(set["params"]["required"], json!(["key", "persist"]));
        assert_eq!(set["result"]["properties"]["previous"]["type"], "integer");
        assert_eq!(set["errors"][0]["message"], "ERROR_UNKNOWN_KEY");
    }

    #[test]
    fn test_return_type_verification() {
        let source = "struct IFoo : virtual public Core::IUnknown { enum { ID = 1 }; virtual bool Ready() = 0; };";
        let err = extract_with(source, &GeneratorOptions::default()).unwrap_err();
        assert!(err.to_string().contains("must return an error code"));

        let options = GeneratorOptions {
            verify: false,
            all_interfaces: true,
            ..GeneratorOptions::default()
        };
        let (document, _) = extract_with(source, &options).unwrap();
        assert_eq!(document["methods"]["ready"]["result"], json!({ "type": "boolean" }));
    }

    #[test]
    fn test_untagged_reference_requires_direction() {
        let err = extract("virtual Core::hresult Get(string& value) = 0;").unwrap_err();
        assert!(err.to_string().contains("requires an @in, @out or @inout tag"));
        let err = extract("virtual Core::hresult Get(const string& get) = 0;");
        assert!(err.is_ok());
        let err = extract("virtual Core::hresult Get(const string& Get) = 0;").unwrap_err();
        assert!(err.to_string().contains("same name as its method"));
    }

    #[test]
    fn test_buffers_enums_and_structs() {
        let document = extract(
            r#"
            enum class State : uint8_t { IDLE, BUSY /* @text busy */ };
            struct Info { string name; Core::OptionalType<uint16_t> port; State state; };
            virtual Core::hresult Write(const uint16_t length, const uint8_t* data /* @length:length */) = 0;
            // @property
            virtual Core::hresult Status(Info& info /* @out */) const = 0;
            "#,
        )
        .unwrap();
        let write = &document["methods"]["write"]["params"];
        assert!(write["properties"].get("length").is_none());
        assert_eq!(write["properties"]["data"]["encode"], "base64");
        assert_eq!(write["properties"]["data"]["length"], "length");

        let status = &document["properties"]["status"]["result"];
        assert_eq!(status["@originaltype"], "Exchange::IFoo::Info");
        assert_eq!(status["required"], json!(["name", "state"]));
        assert_eq!(status["properties"]["port"]["optional"], true);
        let state = &status["properties"]["state"];
        assert_eq!(state["enum"], json!(["IDLE", "busy"]));
        assert_eq!(state["enumvalues"], json!([0, 1]));
        assert_eq!(state["size"], 8);
        assert_eq!(state["signed"], false);
    }

    #[test]
    fn test_length_expression_keeps_its_operands() {
        let document = extract(
            "virtual Core::hresult Write(const uint16_t len, const uint8_t* data /* @length:len * 2 */) = 0;",
        )
        .unwrap();
        let params = &document["methods"]["write"]["params"]["properties"];
        assert_eq!(params["data"]["length"], "len * 2");
        assert_eq!(params["data"]["encode"], "base64");
        assert_eq!(params["len"]["size"], 16);
    }

    #[test]
    fn test_iterator_elements_come_from_current() {
        let document = extract(
            r#"
            // @iterator
            struct IStringIterator {
                virtual bool Next(string& value /* @out */) = 0;
                virtual bool Current(string& value /* @out */) const = 0;
            };
            virtual Core::hresult Names(IStringIterator*& names /* @out */) = 0;
            "#,
        )
        .unwrap();
        assert_eq!(
            document["methods"]["names"]["result"]["properties"]["names"],
            json!({ "type": "array", "items": { "type": "string" } })
        );
    }

    #[test]
    fn test_iterator_without_current_is_rejected() {
        let err = extract(
            r#"
            // @iterator
            struct IStringIterator {
                virtual bool Next(string& value /* @out */) = 0;
            };
            virtual Core::hresult Names(IStringIterator*& names /* @out */) = 0;
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "cpp");
        assert!(err.to_string().contains("element type of iterator"), "{}", err);
    }

    #[test]
    fn test_bitmask_enum_is_an_array_of_names() {
        let document = extract(
            r#"
            // @bitmask
            enum Flags : uint8_t { READ = 1, WRITE = 2 };
            virtual Core::hresult Open(const Flags flags) = 0;
            "#,
        )
        .unwrap();
        let flags = &document["methods"]["open"]["params"]["properties"]["flags"];
        assert_eq!(flags["type"], "array");
        assert_eq!(flags["bitmask"], true);
        assert_eq!(flags["items"]["type"], "string");
        assert_eq!(flags["items"]["enum"], json!(["READ", "WRITE"]));
        assert_eq!(flags["items"]["enumvalues"], json!([1, 2]));
    }

    #[test]
    fn test_accessors_merge_by_json_name() {
        let expected = json!({ "type": "integer", "size": 32, "signed": false });
        let document = extract(
            r#"
            // @text volume
            virtual Core::hresult Level(uint32_t& value /* @out */) const = 0;
            virtual Core::hresult Level(const uint32_t value) = 0;
            "#,
        )
        .unwrap();
        let properties = document["properties"].as_object().unwrap();
        assert_eq!(properties.len(), 1);
        assert_eq!(properties["volume"]["params"], expected);
        assert_eq!(properties["volume"]["result"], expected);
        assert!(document.get("methods").is_none());

        let document = extract(
            r#"
            // @text volume
            virtual Core::hresult GetVolume(uint32_t& value /* @out */) const = 0;
            // @text volume
            virtual Core::hresult SetVolume(const uint32_t value) = 0;
            "#,
        )
        .unwrap();
        let volume = &document["properties"]["volume"];
        assert_eq!(volume["params"], expected);
        assert_eq!(volume["result"], expected);
        assert!(volume.get("readonly").is_none());
    }

    #[test]
    fn test_event_index_used_as_length_is_rejected() {
        let err = extract(
            r#"
            // @event
            struct INotification {
                virtual ~INotification() = default;
                virtual void Changed(const uint32_t id /* @index */, const uint8_t* data /* @length:id */) = 0;
            };
            virtual Core::hresult Register(INotification* sink) = 0;
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "cpp");
        assert!(
            err.to_string().contains("index parameter 'id' cannot also be the length"),
            "{}",
            err
        );
    }

    #[test]
    fn test_events_from_notification_interface() {
        let document = extract(
            r#"
            // @event
            struct INotification {
                virtual ~INotification() = default;
                // @brief Level changed
                // @statuslistener
                virtual void LevelChanged(const string& client /* @index */, const uint32_t level) = 0;
            };
            virtual Core::hresult Register(INotification* sink) = 0;
            virtual Core::hresult Unregister(INotification* sink) = 0;
            "#,
        )
        .unwrap();
        assert!(document.get("methods").is_none());
        let event = &document["events"]["levelChanged"];
        assert_eq!(event["id"]["name"], "client");
        assert_eq!(event["params"]["properties"]["level"]["size"], 32);
        assert!(event["params"]["properties"].get("client").is_none());
        assert_eq!(event["statuslistener"], true);
    }

    #[test]
    fn test_missing_summary_is_a_doc_issue() {
        let source = "struct IFoo : virtual public Core::IUnknown { enum { ID = 1 }; virtual Core::hresult Nop() = 0; };";
        let options = GeneratorOptions {
            all_interfaces: true,
            ..GeneratorOptions::default()
        };
        let (_, ctx) = extract_with(source, &options).unwrap();
        assert!(ctx.warnings.iter().any(|w| w.contains("missing a summary")));
    }

    #[test]
    fn test_definitions_fragment() {
        let ast = parse_source(
            "namespace Exchange { struct Point { int32_t x; int32_t y; }; enum Mode { A, B }; }",
            "Point.h",
        )
        .unwrap();
        let options = GeneratorOptions::default();
        let fragment = Extractor::new(&ast, &options).definitions(Some("Point.h"));
        assert_eq!(fragment["definitions"]["Exchange::Point"]["type"], "object");
        assert_eq!(fragment["definitions"]["Exchange::Mode"]["enumids"], json!(["A", "B"]));
    }
}
