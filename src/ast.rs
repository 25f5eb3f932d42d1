//! Abstract Syntax Tree for parsed C++ declarations
//!
//! Nodes live in an arena owned by [`Ast`] and refer to each other through
//! [`NodeId`] handles. Children are owned by their parent block; identifier
//! resolution only ever produces handles, it never re-parents a node.

use crate::error::{GeneratorError, Location, Result};
use crate::expression;
use crate::lexer::Tag;
use crate::types::{split_scoped, Fundamental, RefQualifiers, RpcFormat};

pub type NodeId = usize;

/// The global namespace.
pub const ROOT: NodeId = 0;

/// Annotation results attached to variables, methods and types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub brief: Option<String>,
    pub details: Option<String>,
    pub input: bool,
    pub output: bool,
    pub is_property: bool,
    pub is_index: bool,
    pub is_deprecated: bool,
    pub is_obsolete: bool,
    pub is_listener: bool,
    pub opaque: bool,
    pub bitmask: bool,
    pub length: Option<Vec<String>>,
    pub maxlength: Option<Vec<String>>,
    pub interface: Option<Vec<String>>,
    pub alt: Option<String>,
    pub text: Option<String>,
    pub param_docs: Vec<(String, String)>,
    pub retval_docs: Vec<(String, String)>,
}

impl Metadata {
    /// Records a declaration-level tag. Returns `false` for tags that are
    /// pre-declaration flags instead.
    pub fn apply(&mut self, tag: &Tag) -> bool {
        match tag {
            Tag::In => self.input = true,
            Tag::Out => self.output = true,
            Tag::InOut => {
                self.input = true;
                self.output = true;
            }
            Tag::Index => self.is_index = true,
            Tag::Property => self.is_property = true,
            Tag::Deprecated => self.is_deprecated = true,
            Tag::Obsolete => self.is_obsolete = true,
            Tag::StatusListener => self.is_listener = true,
            Tag::Opaque => self.opaque = true,
            Tag::Bitmask => self.bitmask = true,
            Tag::Text(text) => self.text = Some(text.clone()),
            Tag::Alt(alt) => self.alt = Some(alt.clone()),
            Tag::Length(expr) => self.length = Some(expr.clone()),
            Tag::MaxLength(expr) => self.maxlength = Some(expr.clone()),
            Tag::Interface(expr) => self.interface = Some(expr.clone()),
            Tag::Brief(text) => self.brief = Some(text.clone()),
            Tag::Details(text) => self.details = Some(text.clone()),
            Tag::Param { name, text } => self.param_docs.push((name.clone(), text.clone())),
            Tag::Retval { name, text } => self.retval_docs.push((name.clone(), text.clone())),
            _ => return false,
        }
        true
    }

    pub fn param_doc(&self, name: &str) -> Option<&str> {
        self.param_docs.iter().find(|(n, _)| n == name).map(|(_, text)| text.as_str())
    }
}

/// Flags that apply to the next declaration only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeclFlags {
    pub omit: bool,
    pub stub: bool,
    pub json: bool,
    pub json_version: Option<String>,
    pub json_omit: bool,
    pub event: bool,
    pub iterator: bool,
    pub format: Option<RpcFormat>,
    pub source_location: Option<String>,
}

impl DeclFlags {
    pub fn apply(&mut self, tag: &Tag) -> bool {
        match tag {
            Tag::StubgenOmit => self.omit = true,
            Tag::StubgenStub => self.stub = true,
            Tag::Json(version) => {
                self.json = true;
                self.json_version = version.clone();
            }
            Tag::JsonOmit => self.json_omit = true,
            Tag::Event => self.event = true,
            Tag::Iterator => self.iterator = true,
            Tag::Compliant => self.format = Some(RpcFormat::Compliant),
            Tag::Extended => self.format = Some(RpcFormat::Extended),
            Tag::Collapsed => self.format = Some(RpcFormat::Collapsed),
            Tag::SourceLocation(url) => self.source_location = Some(url.clone()),
            _ => return false,
        }
        true
    }
}

/// Types the framework provides without the declarations being parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum Intrinsic {
    String,
    HResult,
    InstanceId,
    Optional(Box<Type>),
    Iterator(Box<Type>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeBase {
    Fundamental(Fundamental),
    /// An enum, typedef or class declared in the AST.
    Named(NodeId),
    Intrinsic(Intrinsic),
    Unresolved(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub base: TypeBase,
    pub qualifiers: RefQualifiers,
    /// Size expression of a one-dimensional array declarator.
    pub array: Option<Vec<String>>,
    /// Type as written, for diagnostics.
    pub spelling: String,
}

impl Type {
    pub fn new(base: TypeBase, spelling: impl Into<String>) -> Self {
        Self {
            base,
            qualifiers: RefQualifiers::VALUE,
            array: None,
            spelling: spelling.into(),
        }
    }

    pub fn fundamental(fundamental: Fundamental) -> Self {
        Self::new(TypeBase::Fundamental(fundamental), fundamental.name())
    }

    pub fn is_void(&self) -> bool {
        self.base == TypeBase::Fundamental(Fundamental::Void) && self.qualifiers.is_value()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Public,
    Protected,
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Struct,
    Union,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaseClass {
    pub name: String,
    pub resolved: Option<NodeId>,
    pub access: Access,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateParam {
    pub name: String,
    pub is_type: bool,
    pub default: Vec<crate::lexer::Token>,
}

/// A class template definition, captured verbatim from the class keyword
/// to the closing brace.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateData {
    pub params: Vec<TemplateParam>,
    pub tokens: Vec<crate::lexer::Token>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceInfo {
    pub template: NodeId,
    pub arguments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassData {
    pub kind: ClassKind,
    pub bases: Vec<BaseClass>,
    pub children: Vec<NodeId>,
    /// `false` while only forward-declared.
    pub defined: bool,
    pub template: Option<TemplateData>,
    pub instance_of: Option<InstanceInfo>,
    pub flags: DeclFlags,
    pub meta: Metadata,
}

impl ClassData {
    pub fn is_template(&self) -> bool {
        self.template.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumData {
    pub scoped: bool,
    pub underlying: Option<Type>,
    pub enumerators: Vec<NodeId>,
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumeratorData {
    pub value: Option<i64>,
    pub expression: Vec<String>,
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypedefData {
    pub ty: Type,
    pub flags: DeclFlags,
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodData {
    pub retval: Type,
    pub params: Vec<NodeId>,
    pub is_virtual: bool,
    pub is_pure: bool,
    pub is_const: bool,
    pub is_static: bool,
    pub is_override: bool,
    pub is_noexcept: bool,
    pub is_constructor: bool,
    pub is_destructor: bool,
    pub access: Access,
    pub flags: DeclFlags,
    pub meta: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableRole {
    Global,
    Attribute,
    Parameter,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariableData {
    pub ty: Type,
    pub role: VariableRole,
    pub default: Vec<String>,
    pub is_static: bool,
    pub is_const: bool,
    pub access: Access,
    pub meta: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Namespace { children: Vec<NodeId> },
    Class(ClassData),
    Enum(EnumData),
    Enumerator(EnumeratorData),
    Typedef(TypedefData),
    Method(MethodData),
    Variable(VariableData),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub parent: Option<NodeId>,
    pub kind: NodeKind,
    pub location: Location,
}

#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
}

impl Default for Ast {
    fn default() -> Self {
        Self::new()
    }
}

impl Ast {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Namespace { children: Vec::new() },
                location: Location::default(),
            }],
        }
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn class(&self, id: NodeId) -> Option<&ClassData> {
        match &self.nodes[id].kind {
            NodeKind::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn class_mut(&mut self, id: NodeId) -> Option<&mut ClassData> {
        match &mut self.nodes[id].kind {
            NodeKind::Class(class) => Some(class),
            _ => None,
        }
    }

    pub fn method_mut(&mut self, id: NodeId) -> Option<&mut MethodData> {
        match &mut self.nodes[id].kind {
            NodeKind::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn method(&self, id: NodeId) -> Option<&MethodData> {
        match &self.nodes[id].kind {
            NodeKind::Method(method) => Some(method),
            _ => None,
        }
    }

    pub fn variable(&self, id: NodeId) -> Option<&VariableData> {
        match &self.nodes[id].kind {
            NodeKind::Variable(var) => Some(var),
            _ => None,
        }
    }

    pub fn enumeration(&self, id: NodeId) -> Option<&EnumData> {
        match &self.nodes[id].kind {
            NodeKind::Enum(data) => Some(data),
            _ => None,
        }
    }

    pub fn enumerator(&self, id: NodeId) -> Option<&EnumeratorData> {
        match &self.nodes[id].kind {
            NodeKind::Enumerator(data) => Some(data),
            _ => None,
        }
    }

    pub fn typedef(&self, id: NodeId) -> Option<&TypedefData> {
        match &self.nodes[id].kind {
            NodeKind::Typedef(data) => Some(data),
            _ => None,
        }
    }

    /// Owned children of a block: namespace/class members, enumerators or
    /// method parameters.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match &self.nodes[id].kind {
            NodeKind::Namespace { children } => children,
            NodeKind::Class(class) => &class.children,
            NodeKind::Enum(data) => &data.enumerators,
            NodeKind::Method(method) => &method.params,
            _ => &[],
        }
    }

    /// Parent's full name + `::` + own name.
    pub fn full_name(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = &self.nodes[node_id];
            if !node.name.is_empty() {
                segments.push(node.name.as_str());
            }
            current = node.parent;
        }
        segments.reverse();
        segments.join("::")
    }

    /// Appends a node under `parent`, enforcing unique sibling names.
    /// Methods may overload each other; unnamed declarations are exempt.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        name: impl Into<String>,
        kind: NodeKind,
        location: Location,
    ) -> Result<NodeId> {
        let name = name.into();
        if !name.is_empty() {
            let is_method = matches!(kind, NodeKind::Method(_));
            let clash = self.children(parent).iter().any(|&sibling| {
                let node = &self.nodes[sibling];
                node.name == name && !(is_method && matches!(node.kind, NodeKind::Method(_)))
            });
            if clash {
                return Err(GeneratorError::parser(
                    &location,
                    format!("duplicate identifier '{}' in '{}'", name, self.display_name(parent)),
                ));
            }
        }

        let id = self.nodes.len();
        self.nodes.push(Node {
            name,
            parent: Some(parent),
            kind,
            location,
        });
        match &mut self.nodes[parent].kind {
            NodeKind::Namespace { children } => children.push(id),
            NodeKind::Class(class) => class.children.push(id),
            NodeKind::Enum(data) => data.enumerators.push(id),
            NodeKind::Method(method) => method.params.push(id),
            _ => {}
        }
        Ok(id)
    }

    fn display_name(&self, id: NodeId) -> String {
        if id == ROOT {
            "<global>".to_string()
        } else {
            self.full_name(id)
        }
    }

    /// Drops the members of a class that is being redefined.
    pub fn clear_children(&mut self, id: NodeId) {
        if let NodeKind::Class(class) = &mut self.nodes[id].kind {
            class.children.clear();
        }
    }

    pub fn find_child(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        self.children(scope).iter().copied().find(|&c| self.nodes[c].name == name)
    }

    fn is_type_node(&self, id: NodeId) -> bool {
        matches!(
            self.nodes[id].kind,
            NodeKind::Namespace { .. }
                | NodeKind::Class(_)
                | NodeKind::Enum(_)
                | NodeKind::Typedef(_)
        )
    }

    /// Resolves a (possibly scoped) type name, searching from `scope`
    /// outwards to the global namespace. The innermost match wins.
    pub fn lookup(&self, scope: NodeId, name: &str) -> Option<NodeId> {
        let segments = split_scoped(name);
        if segments.is_empty() {
            return None;
        }
        if name.starts_with("::") {
            return self.lookup_in(ROOT, &segments);
        }
        let mut current = Some(scope);
        while let Some(s) = current {
            if let Some(found) = self.lookup_in(s, &segments) {
                return Some(found);
            }
            current = self.nodes[s].parent;
        }
        None
    }

    fn lookup_in(&self, scope: NodeId, segments: &[&str]) -> Option<NodeId> {
        let (first, rest) = segments.split_first()?;
        let mut node = self.find_type_member(scope, first, 0)?;
        for segment in rest {
            node = self.find_type_member(node, segment, 0)?;
        }
        Some(node)
    }

    /// A type member of `scope`, including members inherited from base classes.
    fn find_type_member(&self, scope: NodeId, name: &str, depth: usize) -> Option<NodeId> {
        if depth > 32 {
            return None;
        }
        let direct = self
            .children(scope)
            .iter()
            .copied()
            .find(|&c| self.nodes[c].name == name && self.is_type_node(c));
        if direct.is_some() {
            return direct;
        }
        match &self.nodes[scope].kind {
            NodeKind::Class(class) => class
                .bases
                .iter()
                .filter_map(|base| base.resolved)
                .find_map(|base| self.find_type_member(base, name, depth + 1)),
            NodeKind::Typedef(data) => match data.ty.base {
                TypeBase::Named(target) => self.find_type_member(target, name, depth + 1),
                _ => None,
            },
            _ => None,
        }
    }

    /// Resolves a constant (enumerator or initialised const variable) for
    /// constant folding.
    pub fn lookup_value(&self, scope: NodeId, name: &str) -> Option<i64> {
        self.lookup_value_guarded(scope, name, 0)
    }

    fn lookup_value_guarded(&self, scope: NodeId, name: &str, depth: usize) -> Option<i64> {
        if depth > 16 {
            return None;
        }
        let segments = split_scoped(name);
        let (last, prefix) = segments.split_last()?;
        if prefix.is_empty() {
            let mut current = Some(scope);
            while let Some(s) = current {
                if let Some(value) = self.find_value_member(s, last, depth) {
                    return Some(value);
                }
                current = self.nodes[s].parent;
            }
            return None;
        }
        let owner = self.lookup(scope, &prefix.join("::"))?;
        match &self.nodes[owner].kind {
            NodeKind::Enum(data) => data
                .enumerators
                .iter()
                .find(|&&e| self.nodes[e].name == *last)
                .and_then(|&e| self.enumerator(e)?.value),
            _ => self.find_value_member(owner, last, depth),
        }
    }

    fn find_value_member(&self, scope: NodeId, name: &str, depth: usize) -> Option<i64> {
        for &child in self.children(scope) {
            match &self.nodes[child].kind {
                NodeKind::Enum(data) if !data.scoped => {
                    let found = data.enumerators.iter().find(|&&e| self.nodes[e].name == name);
                    if let Some(&e) = found {
                        return self.enumerator(e)?.value;
                    }
                }
                NodeKind::Variable(var)
                    if self.nodes[child].name == name && var.is_const && !var.default.is_empty() =>
                {
                    return expression::evaluate(&var.default, &|n| {
                        self.lookup_value_guarded(scope, n, depth + 1)
                    });
                }
                _ => {}
            }
        }
        if let NodeKind::Class(class) = &self.nodes[scope].kind {
            return class
                .bases
                .iter()
                .filter_map(|base| base.resolved)
                .find_map(|base| self.find_value_member(base, name, depth + 1));
        }
        None
    }

    /// Follows typedef chains, merging the qualifiers collected on the way.
    pub fn resolve_typedef(&self, ty: &Type) -> Type {
        let mut resolved = ty.clone();
        for _ in 0..32 {
            let TypeBase::Named(id) = resolved.base else {
                break;
            };
            let Some(data) = self.typedef(id) else {
                break;
            };
            let mut inner = data.ty.clone();
            inner.qualifiers |= resolved.qualifiers;
            if inner.array.is_none() {
                inner.array = resolved.array.take();
            }
            inner.spelling = resolved.spelling.clone();
            resolved = inner;
        }
        resolved
    }

    /// The typedef chain of `ty`, outermost first, for flag lookups.
    pub fn typedef_chain(&self, ty: &Type) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut base = ty.base.clone();
        while let TypeBase::Named(id) = base {
            chain.push(id);
            match self.typedef(id) {
                Some(data) if chain.len() < 32 => base = data.ty.base.clone(),
                _ => break,
            }
        }
        chain
    }

    /// Classes reachable through the resolved base lists, transitively.
    pub fn all_bases(&self, class: NodeId) -> Vec<NodeId> {
        let mut result = Vec::new();
        let mut stack = vec![class];
        while let Some(current) = stack.pop() {
            if let Some(data) = self.class(current) {
                for base in data.bases.iter().filter_map(|b| b.resolved) {
                    if !result.contains(&base) && base != class {
                        result.push(base);
                        stack.push(base);
                    }
                }
            }
        }
        result
    }

    /// Every class node in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.nodes.len()).filter(|&id| matches!(self.nodes[id].kind, NodeKind::Class(_)))
    }

    /// Human-readable spelling of a method, used in diagnostics.
    pub fn prototype(&self, method: NodeId) -> String {
        let Some(data) = self.method(method) else {
            return self.full_name(method);
        };
        let params: Vec<String> = data
            .params
            .iter()
            .map(|&p| {
                let ty = self.variable(p).map(|v| v.ty.spelling.as_str()).unwrap_or("");
                format!("{} {}", ty, self.nodes[p].name).trim().to_string()
            })
            .collect();
        format!(
            "{} {}({}){}",
            data.retval.spelling,
            self.full_name(method),
            params.join(", "),
            if data.is_const { " const" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace() -> NodeKind {
        NodeKind::Namespace { children: Vec::new() }
    }

    fn alias(f: Fundamental) -> NodeKind {
        NodeKind::Typedef(TypedefData {
            ty: Type::fundamental(f),
            flags: DeclFlags::default(),
            meta: Metadata::default(),
        })
    }

    #[test]
    fn test_full_name_joins_ancestors() {
        let mut ast = Ast::new();
        let a = ast.add_child(ROOT, "A", namespace(), Location::default()).unwrap();
        let b = ast.add_child(a, "B", namespace(), Location::default()).unwrap();
        let t = ast.add_child(b, "Level", alias(Fundamental::UInt8), Location::default()).unwrap();
        assert_eq!(ast.full_name(t), "A::B::Level");
    }

    #[test]
    fn test_duplicate_sibling_is_rejected() {
        let mut ast = Ast::new();
        ast.add_child(ROOT, "Level", alias(Fundamental::UInt8), Location::default()).unwrap();
        let err = ast
            .add_child(ROOT, "Level", alias(Fundamental::UInt16), Location::new("x.h", 4))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate identifier 'Level'"));
    }

    #[test]
    fn test_lookup_prefers_innermost_scope() {
        let mut ast = Ast::new();
        let outer = ast
            .add_child(ROOT, "Level", alias(Fundamental::UInt8), Location::default())
            .unwrap();
        let ns = ast.add_child(ROOT, "Inner", namespace(), Location::default()).unwrap();
        let inner = ast
            .add_child(ns, "Level", alias(Fundamental::UInt16), Location::default())
            .unwrap();

        assert_eq!(ast.lookup(ns, "Level"), Some(inner));
        assert_eq!(ast.lookup(ROOT, "Level"), Some(outer));
        assert_eq!(ast.lookup(ns, "::Level"), Some(outer));
        assert_eq!(ast.lookup(ROOT, "Inner::Level"), Some(inner));
        assert_eq!(ast.lookup(ROOT, "Missing"), None);
    }

    #[test]
    fn test_resolve_typedef_merges_qualifiers() {
        let mut ast = Ast::new();
        let inner = ast
            .add_child(ROOT, "Raw", alias(Fundamental::UInt32), Location::default())
            .unwrap();
        let mut alias = Type::new(TypeBase::Named(inner), "Raw");
        alias.qualifiers = RefQualifiers::CONST | RefQualifiers::REFERENCE;
        let resolved = ast.resolve_typedef(&alias);
        assert_eq!(resolved.base, TypeBase::Fundamental(Fundamental::UInt32));
        assert!(resolved.qualifiers.is_reference());
        assert!(resolved.qualifiers.is_const());
    }
}
