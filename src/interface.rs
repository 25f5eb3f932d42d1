//! Discovery of interface classes in a parsed AST

use crate::ast::{Ast, NodeId, NodeKind};

/// An interface class together with its resolved id.
#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub class: NodeId,
    /// Value of the class's `ID` enumerator; `None` when it refers to
    /// constants that were not parsed.
    pub id: Option<i64>,
    pub file: String,
}

/// `Core::IUnknown` matches `IUnknown` written inside `Core`, and
/// `WPEFramework::Core::IUnknown` written from the outside.
pub fn names_match(candidate: &str, root: &str) -> bool {
    let candidate = candidate.trim_start_matches("::");
    let root = root.trim_start_matches("::");
    candidate == root
        || candidate.ends_with(&format!("::{}", root))
        || root.ends_with(&format!("::{}", candidate))
}

/// Whether `class` inherits from `root`, directly or through its bases.
pub fn derives_from(ast: &Ast, class: NodeId, root: &str) -> bool {
    let mut pending = vec![class];
    let mut visited = Vec::new();
    while let Some(current) = pending.pop() {
        if visited.contains(&current) {
            continue;
        }
        visited.push(current);
        let Some(data) = ast.class(current) else {
            continue;
        };
        for base in &data.bases {
            match base.resolved {
                Some(resolved) if names_match(&ast.full_name(resolved), root) => return true,
                Some(resolved) => pending.push(resolved),
                None if names_match(&base.name, root) => return true,
                None => {}
            }
        }
    }
    false
}

/// The `ID` enumerator declared directly inside `class`.
fn interface_id(ast: &Ast, class: NodeId) -> Option<Option<i64>> {
    ast.children(class)
        .iter()
        .filter(|&&child| matches!(ast.node(child).kind, NodeKind::Enum(_)))
        .flat_map(|&child| ast.children(child).iter().copied())
        .find(|&enumerator| ast.node(enumerator).name == "ID")
        .map(|enumerator| ast.enumerator(enumerator).and_then(|e| e.value))
}

/// Interface classes declared in `file` (all files when `None`), in
/// declaration order.
pub fn find_interfaces(ast: &Ast, file: Option<&str>, root: &str) -> Vec<Interface> {
    let mut interfaces = Vec::new();
    for class in ast.classes() {
        let node = ast.node(class);
        let Some(data) = ast.class(class) else {
            continue;
        };
        if !data.defined || data.is_template() || data.instance_of.is_some() {
            continue;
        }
        if file.is_some_and(|f| f != node.location.file) {
            continue;
        }
        if !derives_from(ast, class, root) {
            continue;
        }
        let Some(id) = interface_id(ast, class) else {
            continue;
        };
        if id.is_none() {
            log::warn!(
                "{}: interface id of '{}' cannot be evaluated",
                node.location,
                ast.full_name(class)
            );
        }
        interfaces.push(Interface {
            class,
            id,
            file: node.location.file.clone(),
        });
    }
    interfaces
}
