//! Declaration parser for annotated C++ headers
//!
//! A single pass over the token stream with an explicit stack of open
//! blocks. Tags seen before a declaration are held as pending state and
//! consumed by the next declaration.

use crate::ast::*;
use crate::error::{GeneratorError, Location, Result};
use crate::expression;
use crate::lexer::{tokenize_files, tokenize_source, Tag, Token, TokenType};
use crate::types::{short_name, Fundamental, RefQualifiers};
use std::path::PathBuf;

const FUNDAMENTAL_KEYWORDS: &[&str] = &[
    "unsigned", "signed", "short", "long", "int", "char", "bool", "void", "float", "double",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockKind {
    Namespace,
    Class,
    Anonymous,
}

#[derive(Debug, Clone)]
pub(crate) struct Block {
    pub node: NodeId,
    pub kind: BlockKind,
    pub access: Access,
    pub opened_at: Location,
}

#[derive(Debug, Default)]
struct Specifiers {
    is_virtual: bool,
    is_static: bool,
    is_constexpr: bool,
}

pub struct Parser {
    pub(crate) ast: Ast,
    pub(crate) tokens: Vec<Token>,
    pub(crate) current: usize,
    pub(crate) blocks: Vec<Block>,
    pub(crate) pending: DeclFlags,
    pub(crate) meta: Metadata,
    pub(crate) instantiation_depth: usize,
}

/// Parses in-memory source as a single header.
pub fn parse_source(source: &str, filename: &str) -> Result<Ast> {
    Parser::new(tokenize_source(source, filename)?).parse()
}

/// Parses a list of headers into one AST, in order.
pub fn parse_files(files: &[PathBuf], include_dirs: &[PathBuf]) -> Result<Ast> {
    Parser::new(tokenize_files(files, include_dirs)?).parse()
}

impl Parser {
    pub fn new(mut tokens: Vec<Token>) -> Self {
        if !matches!(tokens.last().map(|t| &t.token_type), Some(TokenType::Eof)) {
            let (filename, line) = tokens
                .last()
                .map(|t| (t.filename.clone(), t.line))
                .unwrap_or_default();
            tokens.push(Token {
                token_type: TokenType::Eof,
                line,
                filename,
            });
        }
        Self {
            ast: Ast::new(),
            tokens,
            current: 0,
            blocks: vec![Block {
                node: ROOT,
                kind: BlockKind::Namespace,
                access: Access::Public,
                opened_at: Location::default(),
            }],
            pending: DeclFlags::default(),
            meta: Metadata::default(),
            instantiation_depth: 0,
        }
    }

    pub fn parse(mut self) -> Result<Ast> {
        self.parse_block_items(1)?;
        Ok(self.ast)
    }

    /// Parses declarations until the end of the stream. `base_depth` is the
    /// block stack height that must be restored by then.
    pub(crate) fn parse_block_items(&mut self, base_depth: usize) -> Result<()> {
        loop {
            let token = self.peek().clone();
            match &token.token_type {
                TokenType::Eof => {
                    self.check_blocks_closed(base_depth)?;
                    return Ok(());
                }
                TokenType::FileMarker(name) => {
                    self.check_blocks_closed(base_depth)?;
                    log::debug!("Parsing declarations of {}", name);
                    self.pending = DeclFlags::default();
                    self.meta = Metadata::default();
                    self.advance();
                }
                TokenType::Tag(tag) => {
                    self.collect_tag(tag);
                    self.advance();
                }
                TokenType::Punct(p) if p == ";" => {
                    self.advance();
                }
                TokenType::Punct(p) if p == "}" => self.close_block()?,
                TokenType::Punct(p) if p == "{" => {
                    self.advance();
                    self.push_block(self.scope(), BlockKind::Anonymous, token.location());
                }
                TokenType::Punct(p) if p == "::" || p == "~" => self.parse_declaration()?,
                TokenType::Identifier(word) => self.parse_statement(word)?,
                other => {
                    return Err(GeneratorError::parser(
                        &token.location(),
                        format!("unexpected {}", other),
                    ));
                }
            }
        }
    }

    fn check_blocks_closed(&self, base_depth: usize) -> Result<()> {
        match self.blocks.last() {
            Some(block) if self.blocks.len() > base_depth => {
                Err(GeneratorError::parser(&block.opened_at, "unmatched '{'"))
            }
            _ => Ok(()),
        }
    }

    fn parse_statement(&mut self, word: &str) -> Result<()> {
        match word {
            "namespace" => self.parse_namespace(),
            "inline" if self.peek_at(1).is_ident("namespace") => {
                self.advance();
                self.parse_namespace()
            }
            "using" => self.parse_using(),
            "typedef" => self.parse_typedef(),
            "template" => self.parse_template(),
            "class" | "struct" | "union" if self.is_class_definition() => self.parse_class(),
            "enum" => self.parse_enum(),
            "public" | "protected" | "private" if self.peek_at(1).is_punct(":") => {
                let access = match word {
                    "public" => Access::Public,
                    "protected" => Access::Protected,
                    _ => Access::Private,
                };
                if let Some(block) = self.blocks.last_mut() {
                    block.access = access;
                }
                self.advance();
                self.advance();
                Ok(())
            }
            "friend" | "static_assert" => {
                self.skip_declaration()?;
                self.meta = Metadata::default();
                Ok(())
            }
            "extern" if matches!(self.peek_at(1).token_type, TokenType::String(_)) => {
                self.advance();
                self.advance();
                if self.check_punct("{") {
                    let location = self.advance().location();
                    self.push_block(self.scope(), BlockKind::Anonymous, location);
                }
                Ok(())
            }
            _ => self.parse_declaration(),
        }
    }

    fn close_block(&mut self) -> Result<()> {
        let token = self.advance().clone();
        if self.blocks.len() <= 1 {
            return Err(GeneratorError::parser(&token.location(), "unmatched '}'"));
        }
        let block = self.blocks.pop();
        self.meta = Metadata::default();
        if matches!(block, Some(Block { kind: BlockKind::Class, .. })) {
            // `} instance;` declares a variable of the class just closed
            while !self.check_punct(";") && !self.check_punct("}") && !self.is_at_end() {
                self.advance();
            }
            self.match_punct(";");
        }
        Ok(())
    }

    fn parse_namespace(&mut self) -> Result<()> {
        let location = self.advance().location();
        if self.check_punct("{") {
            self.advance();
            self.push_block(self.scope(), BlockKind::Anonymous, location);
            return Ok(());
        }
        if self.peek_at(1).is_punct("=") {
            return self.skip_declaration();
        }

        let mut scope = self.scope();
        loop {
            let name_token = self.peek().clone();
            let name = self.expect_identifier("namespace name")?;
            scope = match self.ast.find_child(scope, &name) {
                Some(existing)
                    if matches!(self.ast.node(existing).kind, NodeKind::Namespace { .. }) =>
                {
                    existing
                }
                _ => self.ast.add_child(
                    scope,
                    name,
                    NodeKind::Namespace { children: Vec::new() },
                    name_token.location(),
                )?,
            };
            if !self.match_punct("::") {
                break;
            }
            self.match_ident("inline");
        }

        self.consume_punct("{", "expected '{' after namespace name")?;
        self.push_block(scope, BlockKind::Namespace, location);
        Ok(())
    }

    fn parse_using(&mut self) -> Result<()> {
        let location = self.advance().location();
        if matches!(self.peek().token_type, TokenType::Identifier(_))
            && self.peek_at(1).is_punct("=")
        {
            let name = self.expect_identifier("alias name")?;
            self.advance();
            let ty = self.parse_type()?;
            self.consume_punct(";", "expected ';' after alias declaration")?;
            return self.add_typedef(name, ty, location);
        }
        // using-directives and using-declarations only affect lookup
        self.skip_declaration()
    }

    fn parse_typedef(&mut self) -> Result<()> {
        let location = self.advance().location();
        if matches!(self.peek().text(), "struct" | "class" | "union" | "enum")
            && (self.peek_at(1).is_punct("{") || self.peek_at(2).is_punct("{"))
        {
            return Err(GeneratorError::parser(
                &location,
                "type definitions inside typedef are not supported",
            ));
        }

        let mut ty = self.parse_type()?;
        if self.check_punct("(") {
            log::debug!("{}: skipping function typedef", location);
            self.skip_declaration()?;
            self.clear_pending();
            return Ok(());
        }
        let name = self.expect_identifier("typedef name")?;
        self.parse_array_suffix(&mut ty)?;
        self.consume_punct(";", "expected ';' after typedef")?;
        self.add_typedef(name, ty, location)
    }

    fn add_typedef(&mut self, name: String, ty: Type, location: Location) -> Result<()> {
        let data = TypedefData {
            ty,
            flags: std::mem::take(&mut self.pending),
            meta: std::mem::take(&mut self.meta),
        };
        self.ast.add_child(self.scope(), name, NodeKind::Typedef(data), location)?;
        Ok(())
    }

    fn is_class_definition(&self) -> bool {
        let next = self.peek_at(1);
        if next.is_ident("alignas") || next.is_punct("{") {
            return true;
        }
        let offset = if is_export_macro(next)
            && matches!(self.peek_at(2).token_type, TokenType::Identifier(_))
        {
            2
        } else {
            1
        };
        matches!(self.peek_at(offset).token_type, TokenType::Identifier(_)) && {
            let after = self.peek_at(offset + 1);
            after.is_punct("{")
                || after.is_punct(":")
                || after.is_punct(";")
                || after.is_ident("final")
        }
    }

    fn parse_class(&mut self) -> Result<()> {
        let keyword = self.advance().clone();
        let location = keyword.location();
        let kind = match keyword.text() {
            "class" => ClassKind::Class,
            "struct" => ClassKind::Struct,
            _ => ClassKind::Union,
        };
        if self.check_ident("alignas") {
            return Err(GeneratorError::parser(&location, "alignment specifiers are not supported"));
        }
        if self.check_punct("{") {
            return Err(GeneratorError::parser(&location, "anonymous classes are not supported"));
        }
        if is_export_macro(self.peek())
            && matches!(self.peek_at(1).token_type, TokenType::Identifier(_))
        {
            self.advance();
        }
        let name = self.expect_identifier("class name")?;
        self.match_ident("final");

        if self.match_punct(";") {
            self.declare_class(&name, kind, location, false)?;
            return Ok(());
        }

        let default_access = if kind == ClassKind::Class {
            Access::Private
        } else {
            Access::Public
        };
        let bases = if self.match_punct(":") {
            self.parse_base_list(default_access)?
        } else {
            Vec::new()
        };
        self.consume_punct("{", "expected '{' after class head")?;

        let id = self.declare_class(&name, kind, location.clone(), true)?;
        if let Some(class) = self.ast.class_mut(id) {
            class.bases = bases;
        }
        self.push_block(id, BlockKind::Class, location);
        if let Some(block) = self.blocks.last_mut() {
            block.access = default_access;
        }
        Ok(())
    }

    /// Creates a class node, or reuses a forward declaration of it.
    fn declare_class(
        &mut self,
        name: &str,
        kind: ClassKind,
        location: Location,
        defining: bool,
    ) -> Result<NodeId> {
        let scope = self.scope();
        let flags = std::mem::take(&mut self.pending);
        let meta = std::mem::take(&mut self.meta);

        if let Some(existing) = self.ast.find_child(scope, name) {
            if let Some(class) = self.ast.class(existing).filter(|c| !c.is_template()) {
                let has_methods = class
                    .children
                    .iter()
                    .any(|&c| matches!(self.ast.node(c).kind, NodeKind::Method(_)));
                if defining && class.defined && has_methods {
                    return Err(GeneratorError::parser(
                        &location,
                        format!("class '{}' redefined", self.ast.full_name(existing)),
                    ));
                }
                if defining {
                    self.ast.clear_children(existing);
                    self.ast.node_mut(existing).location = location;
                }
                if let Some(class) = self.ast.class_mut(existing) {
                    class.kind = kind;
                    class.defined |= defining;
                    if flags != DeclFlags::default() {
                        class.flags = flags;
                    }
                    if meta != Metadata::default() {
                        class.meta = meta;
                    }
                }
                return Ok(existing);
            }
        }

        let data = ClassData {
            kind,
            bases: Vec::new(),
            children: Vec::new(),
            defined: defining,
            template: None,
            instance_of: None,
            flags,
            meta,
        };
        self.ast.add_child(scope, name, NodeKind::Class(data), location)
    }

    fn parse_base_list(&mut self, default_access: Access) -> Result<Vec<BaseClass>> {
        let mut bases = Vec::new();
        loop {
            let mut access = default_access;
            loop {
                match self.peek().text() {
                    "virtual" => {}
                    "public" => access = Access::Public,
                    "protected" => access = Access::Protected,
                    "private" => access = Access::Private,
                    _ => break,
                }
                self.advance();
            }
            let location = self.peek().location();
            let start = self.current;
            let (name, args) = self.parse_scoped_name()?;
            let spelling = spell(&self.tokens[start..self.current]);
            let resolved = match self.resolve_type_name(&name, args, &location)? {
                TypeBase::Named(id) => self.class_of(id),
                _ => None,
            };
            bases.push(BaseClass {
                name: spelling,
                resolved,
                access,
            });
            if !self.match_punct(",") {
                return Ok(bases);
            }
        }
    }

    /// The class a named type designates, looking through typedefs.
    fn class_of(&self, id: NodeId) -> Option<NodeId> {
        let ty = self.ast.resolve_typedef(&Type::new(TypeBase::Named(id), ""));
        match ty.base {
            TypeBase::Named(target) if self.ast.class(target).is_some() => Some(target),
            _ => None,
        }
    }

    fn parse_enum(&mut self) -> Result<()> {
        let location = self.advance().location();
        let scoped = self.match_ident("class") || self.match_ident("struct");
        let name = match &self.peek().token_type {
            TokenType::Identifier(name) => {
                let name = name.clone();
                self.advance();
                name
            }
            _ => String::new(),
        };
        let underlying = if self.match_punct(":") {
            Some(self.parse_type()?)
        } else {
            None
        };
        let meta = std::mem::take(&mut self.meta);
        self.pending = DeclFlags::default();

        let data = EnumData {
            scoped,
            underlying,
            enumerators: Vec::new(),
            meta,
        };
        if self.match_punct(";") {
            self.ast.add_child(self.scope(), name, NodeKind::Enum(data), location)?;
            return Ok(());
        }
        self.consume_punct("{", "expected '{' after enum head")?;
        let id = self.ast.add_child(self.scope(), name, NodeKind::Enum(data), location)?;
        self.parse_enumerators(id)?;

        if !self.match_punct(";") && matches!(self.peek().token_type, TokenType::Identifier(_)) {
            self.skip_declaration()?;
        }
        Ok(())
    }

    fn parse_enumerators(&mut self, id: NodeId) -> Result<()> {
        let mut next_value = Some(0i64);
        loop {
            let mut meta = Metadata::default();
            self.collect_tags_into(&mut meta);
            if self.match_punct("}") {
                return Ok(());
            }
            let token = self.peek().clone();
            let name = self.expect_identifier("enumerator name")?;

            let (value, expression) = if self.match_punct("=") {
                let expression = self.capture_until(&[",", "}"], &mut meta)?;
                let value = {
                    let ast = &self.ast;
                    let scope = self.blocks.last().map(|b| b.node).unwrap_or(ROOT);
                    expression::evaluate(&expression, &|n| {
                        enumerator_value(ast, id, n).or_else(|| ast.lookup_value(scope, n))
                    })
                };
                if value.is_none() {
                    log::debug!(
                        "{}: enumerator '{}' has no constant value",
                        token.location(),
                        name
                    );
                }
                (value, expression)
            } else {
                (next_value, Vec::new())
            };
            next_value = value.and_then(|v| v.checked_add(1));
            self.collect_tags_into(&mut meta);

            let data = EnumeratorData {
                value,
                expression,
                meta,
            };
            let enumerator =
                self.ast.add_child(id, name, NodeKind::Enumerator(data), token.location())?;

            if self.match_punct(",") {
                // tags trailing the comma on the same line annotate this enumerator
                while let TokenType::Tag(tag) = &self.peek().token_type {
                    if self.peek().line != token.line {
                        break;
                    }
                    let tag = tag.clone();
                    if let NodeKind::Enumerator(data) = &mut self.ast.node_mut(enumerator).kind {
                        data.meta.apply(&tag);
                    }
                    self.advance();
                }
                continue;
            }
            self.collect_tags_into(&mut Metadata::default());
            self.consume_punct("}", "expected ',' or '}' in enumerator list")?;
            return Ok(());
        }
    }

    fn parse_template(&mut self) -> Result<()> {
        let location = self.advance().location();
        if !self.check_punct("<") {
            return Err(GeneratorError::parser(&location, "expected '<' after 'template'"));
        }
        let raw_params = self.parse_template_arguments()?;
        if raw_params.is_empty() {
            log::debug!("{}: skipping explicit template specialization", location);
            self.skip_declaration()?;
            self.clear_pending();
            return Ok(());
        }
        let params = raw_params
            .iter()
            .map(|tokens| template_param(tokens, &location))
            .collect::<Result<Vec<_>>>()?;

        if !matches!(self.peek().text(), "class" | "struct" | "union") {
            log::debug!("{}: skipping function or alias template", location);
            self.skip_declaration()?;
            self.clear_pending();
            return Ok(());
        }

        let start = self.current;
        let keyword = self.advance().clone();
        let kind = match keyword.text() {
            "class" => ClassKind::Class,
            "struct" => ClassKind::Struct,
            _ => ClassKind::Union,
        };
        let name = self.expect_identifier("template name")?;
        if self.check_punct("<") {
            log::debug!("{}: skipping partial specialization of '{}'", location, name);
            self.skip_declaration()?;
            self.clear_pending();
            return Ok(());
        }
        let forward = self.match_punct(";");
        if !forward {
            while !self.check_punct("{") {
                if self.is_at_end() {
                    return Err(GeneratorError::parser(
                        &location,
                        format!("incomplete template '{}'", name),
                    ));
                }
                self.advance();
            }
            self.skip_balanced("{", "}")?;
        }
        let tokens = if forward {
            Vec::new()
        } else {
            self.tokens[start..self.current].to_vec()
        };
        self.match_punct(";");

        let scope = self.scope();
        let flags = std::mem::take(&mut self.pending);
        let meta = std::mem::take(&mut self.meta);
        let template = TemplateData { params, tokens };

        if let Some(existing) = self.ast.find_child(scope, &name) {
            if let Some(class) = self
                .ast
                .class_mut(existing)
                .filter(|c| c.is_template() && !c.defined)
            {
                if !forward {
                    class.template = Some(template);
                    class.defined = true;
                    class.flags = flags;
                    class.meta = meta;
                }
                return Ok(());
            }
        }

        let data = ClassData {
            kind,
            bases: Vec::new(),
            children: Vec::new(),
            defined: !forward,
            template: Some(template),
            instance_of: None,
            flags,
            meta,
        };
        self.ast.add_child(scope, name, NodeKind::Class(data), keyword.location())?;
        Ok(())
    }

    fn parse_declaration(&mut self) -> Result<()> {
        let location = self.peek().location();
        let mut specifiers = Specifiers::default();
        loop {
            match self.peek().text() {
                "virtual" => specifiers.is_virtual = true,
                "static" => specifiers.is_static = true,
                "constexpr" => specifiers.is_constexpr = true,
                "inline" | "explicit" | "mutable" | "extern" | "register" => {}
                "alignas" => {
                    return Err(GeneratorError::parser(
                        &location,
                        "alignment specifiers are not supported",
                    ));
                }
                _ => {
                    if let TokenType::Tag(tag) = &self.peek().token_type {
                        let tag = tag.clone();
                        self.collect_tag(&tag);
                    } else {
                        break;
                    }
                }
            }
            self.advance();
        }

        if self.match_punct("~") {
            let name = format!("~{}", self.expect_identifier("destructor name")?);
            let mut retval = Type::fundamental(Fundamental::Void);
            retval.spelling.clear();
            return self.parse_function(name, retval, specifiers, location, Role::Destructor);
        }

        if let Some(class) = self.current_class() {
            if self.peek().is_ident(&self.ast.node(class).name) && self.peek_at(1).is_punct("(") {
                let name = self.expect_identifier("constructor name")?;
                let mut retval = Type::fundamental(Fundamental::Void);
                retval.spelling.clear();
                return self.parse_function(name, retval, specifiers, location, Role::Constructor);
            }
        }

        if self.is_call_expression() {
            log::debug!("{}: retracting call expression '{}'", location, self.peek().text());
            self.skip_call()?;
            self.clear_pending();
            return Ok(());
        }

        let ty = self.parse_type()?;
        if self.check_ident("operator") {
            self.skip_declaration()?;
            self.clear_pending();
            return Ok(());
        }
        let name_token = self.peek().clone();
        let name = match &name_token.token_type {
            TokenType::Identifier(name) => name.clone(),
            other => {
                return Err(GeneratorError::parser(
                    &name_token.location(),
                    format!("expected declarator name, got {}", other),
                ))
            }
        };
        self.advance();

        if self.check_punct("(") {
            return self.parse_function(name, ty, specifiers, location, Role::Method);
        }
        self.parse_variables(name, ty, specifiers, location)
    }

    /// A scoped name followed by `(` that does not designate a type is a
    /// macro invocation or call, not a declaration.
    fn is_call_expression(&self) -> bool {
        let mut offset = 0;
        let mut name = String::new();
        if self.peek_at(0).is_punct("::") {
            name.push_str("::");
            offset += 1;
        }
        loop {
            let token = self.peek_at(offset);
            let TokenType::Identifier(segment) = &token.token_type else {
                return false;
            };
            if FUNDAMENTAL_KEYWORDS.contains(&segment.as_str())
                || matches!(segment.as_str(), "const" | "volatile" | "typename")
            {
                return false;
            }
            name.push_str(segment);
            offset += 1;
            if self.peek_at(offset).is_punct("::") {
                name.push_str("::");
                offset += 1;
            } else {
                break;
            }
        }
        self.peek_at(offset).is_punct("(")
            && Fundamental::from_name(&name).is_none()
            && self.ast.lookup(self.scope(), &name).is_none()
    }

    fn skip_call(&mut self) -> Result<()> {
        while !self.check_punct("(") {
            self.advance();
        }
        self.skip_balanced("(", ")")?;
        self.match_punct(";");
        Ok(())
    }

    fn parse_function(
        &mut self,
        name: String,
        retval: Type,
        specifiers: Specifiers,
        location: Location,
        role: Role,
    ) -> Result<()> {
        let flags = std::mem::take(&mut self.pending);
        let meta = std::mem::take(&mut self.meta);
        let access = self.access();
        let data = MethodData {
            retval,
            params: Vec::new(),
            is_virtual: specifiers.is_virtual,
            is_pure: false,
            is_const: false,
            is_static: specifiers.is_static,
            is_override: false,
            is_noexcept: false,
            is_constructor: role == Role::Constructor,
            is_destructor: role == Role::Destructor,
            access,
            flags,
            meta,
        };
        let id = self.ast.add_child(
            self.scope(),
            name.clone(),
            NodeKind::Method(data),
            location.clone(),
        )?;

        self.consume_punct("(", "expected '('")?;
        self.parse_parameters(id)?;

        let mut trailing = Metadata::default();
        let mut retval = None;
        loop {
            let token = self.peek().clone();
            let Some(method) = self.ast.method_mut(id) else {
                break;
            };
            match &token.token_type {
                TokenType::Identifier(word) if word == "const" => method.is_const = true,
                TokenType::Identifier(word) if word == "override" => method.is_override = true,
                TokenType::Identifier(word) if word == "noexcept" => {
                    method.is_noexcept = true;
                    self.advance();
                    if self.check_punct("(") {
                        self.skip_balanced("(", ")")?;
                    }
                    continue;
                }
                TokenType::Identifier(word) if word == "throw" => {
                    self.advance();
                    self.skip_balanced("(", ")")?;
                    continue;
                }
                TokenType::Identifier(word) if word == "volatile" || word == "final" => {}
                TokenType::Punct(p) if p == "&" || p == "&&" => {}
                TokenType::Punct(p) if p == "->" => {
                    self.advance();
                    retval = Some(self.parse_type()?);
                    continue;
                }
                TokenType::Tag(tag) => {
                    trailing.apply(tag);
                }
                _ => break,
            }
            self.advance();
        }

        if self.match_punct("=") {
            let value = self.advance().clone();
            match value.text() {
                "0" => {
                    if let Some(method) = self.ast.method_mut(id) {
                        method.is_pure = true;
                    }
                }
                "default" | "delete" => {}
                other => {
                    return Err(GeneratorError::parser(
                        &value.location(),
                        format!("unexpected '{}' after '=' in declaration of '{}'", other, name),
                    ))
                }
            }
        }
        if role == Role::Constructor && self.check_punct(":") {
            while !self.check_punct("{") && !self.is_at_end() {
                self.advance();
            }
        }
        if self.check_punct("{") {
            self.skip_balanced("{", "}")?;
        } else {
            self.consume_punct(";", &format!("expected ';' after declaration of '{}'", name))?;
        }

        if let Some(method) = self.ast.method_mut(id) {
            if let Some(retval) = retval {
                method.retval = retval;
            }
            merge_metadata(&mut method.meta, trailing);
        }
        Ok(())
    }

    fn parse_parameters(&mut self, method: NodeId) -> Result<()> {
        if self.match_punct(")") {
            return Ok(());
        }
        if self.check_ident("void") && self.peek_at(1).is_punct(")") {
            self.advance();
            self.advance();
            return Ok(());
        }
        loop {
            let mut meta = Metadata::default();
            self.collect_tags_into(&mut meta);
            if !self.match_punct("...") {
                let location = self.peek().location();
                let mut ty = self.parse_type()?;
                self.collect_tags_into(&mut meta);
                let name = match &self.peek().token_type {
                    TokenType::Identifier(name) => {
                        let name = name.clone();
                        self.advance();
                        name
                    }
                    _ => String::new(),
                };
                self.parse_array_suffix(&mut ty)?;
                self.collect_tags_into(&mut meta);
                let default = if self.match_punct("=") {
                    self.capture_until(&[",", ")"], &mut meta)?
                } else {
                    Vec::new()
                };
                self.collect_tags_into(&mut meta);

                let data = VariableData {
                    ty,
                    role: VariableRole::Parameter,
                    default,
                    is_static: false,
                    is_const: false,
                    access: Access::Public,
                    meta,
                };
                self.ast.add_child(method, name, NodeKind::Variable(data), location)?;
            }
            if self.match_punct(",") {
                continue;
            }
            self.consume_punct(")", "expected ')' after parameter list")?;
            return Ok(());
        }
    }

    fn parse_variables(
        &mut self,
        first: String,
        ty: Type,
        specifiers: Specifiers,
        location: Location,
    ) -> Result<()> {
        self.pending = DeclFlags::default();
        let mut meta = std::mem::take(&mut self.meta);
        let role = if self.current_class().is_some() {
            VariableRole::Attribute
        } else {
            VariableRole::Global
        };
        let access = self.access();
        let mut name = first;
        loop {
            let mut declared = ty.clone();
            self.parse_array_suffix(&mut declared)?;
            if self.match_punct(":") {
                // bit-field width
                self.capture_until(&[",", ";"], &mut meta)?;
            }
            let default = if self.match_punct("=") {
                self.capture_until(&[",", ";"], &mut meta)?
            } else if self.check_punct("{") {
                self.advance();
                let value = self.capture_until(&["}"], &mut meta)?;
                self.consume_punct("}", "expected '}' after initializer")?;
                value
            } else {
                Vec::new()
            };
            self.collect_tags_into(&mut meta);

            let is_const = specifiers.is_constexpr
                || (declared.qualifiers.is_const() && !declared.qualifiers.is_pointer());
            let data = VariableData {
                ty: declared,
                role,
                default,
                is_static: specifiers.is_static,
                is_const,
                access,
                meta: meta.clone(),
            };
            self.ast.add_child(self.scope(), name, NodeKind::Variable(data), location.clone())?;

            if !self.match_punct(",") {
                break;
            }
            name = self.expect_identifier("variable name")?;
        }
        self.consume_punct(";", "expected ';' after variable declaration")?;
        Ok(())
    }

    /// Parses a type specifier with its cv and pointer/reference declarator
    /// parts, resolving the named type.
    pub(crate) fn parse_type(&mut self) -> Result<Type> {
        let location = self.peek().location();
        let start = self.current;
        let mut qualifiers = RefQualifiers::VALUE;

        loop {
            match self.peek().text() {
                "const" => qualifiers |= RefQualifiers::CONST,
                "volatile" => qualifiers |= RefQualifiers::VOLATILE,
                "typename" | "struct" | "class" | "enum" | "union" => {}
                "alignas" => {
                    return Err(GeneratorError::parser(
                        &location,
                        "alignment specifiers are not supported",
                    ));
                }
                _ => break,
            }
            self.advance();
        }

        let base = if FUNDAMENTAL_KEYWORDS.contains(&self.peek().text()) {
            TypeBase::Fundamental(self.parse_fundamental(&location)?)
        } else {
            let (name, args) = self.parse_scoped_name()?;
            self.resolve_type_name(&name, args, &location)?
        };

        loop {
            let token = self.peek().clone();
            match token.text() {
                "const" => qualifiers |= RefQualifiers::CONST,
                "volatile" => qualifiers |= RefQualifiers::VOLATILE,
                "*" => {
                    if qualifiers.contains(RefQualifiers::POINTER_TO_POINTER) {
                        return Err(GeneratorError::parser(
                            &token.location(),
                            "multi-level pointers are not supported",
                        ));
                    }
                    if qualifiers.contains(RefQualifiers::POINTER) {
                        qualifiers |= RefQualifiers::POINTER_TO_POINTER;
                    } else {
                        // cv seen so far qualifies the pointee
                        if qualifiers.contains(RefQualifiers::CONST) {
                            qualifiers.remove(RefQualifiers::CONST);
                            qualifiers |= RefQualifiers::POINTER_TO_CONST;
                        }
                        if qualifiers.contains(RefQualifiers::VOLATILE) {
                            qualifiers.remove(RefQualifiers::VOLATILE);
                            qualifiers |= RefQualifiers::POINTER_TO_VOLATILE;
                        }
                        qualifiers |= RefQualifiers::POINTER;
                    }
                }
                "&" => qualifiers |= RefQualifiers::REFERENCE,
                "&&" => {
                    return Err(GeneratorError::parser(
                        &token.location(),
                        "rvalue references are not supported",
                    ));
                }
                _ => break,
            }
            self.advance();
        }

        Ok(Type {
            base,
            qualifiers,
            array: None,
            spelling: spell(&self.tokens[start..self.current]),
        })
    }

    fn parse_fundamental(&mut self, location: &Location) -> Result<Fundamental> {
        let (mut unsigned, mut signed, mut shorts, mut longs) = (false, false, 0, 0);
        let mut base: Option<String> = None;
        while FUNDAMENTAL_KEYWORDS.contains(&self.peek().text()) {
            let word = self.advance().text().to_string();
            match word.as_str() {
                "unsigned" => unsigned = true,
                "signed" => signed = true,
                "short" => shorts += 1,
                "long" => longs += 1,
                other => {
                    if base.is_some() {
                        return Err(GeneratorError::parser(
                            location,
                            "invalid combination of type specifiers",
                        ));
                    }
                    base = Some(other.to_string());
                }
            }
        }
        let fundamental = match base.as_deref() {
            Some("bool") if !(unsigned || signed) && shorts + longs == 0 => Some(Fundamental::Bool),
            Some("void") if !(unsigned || signed) && shorts + longs == 0 => Some(Fundamental::Void),
            Some("float") if !(unsigned || signed) && shorts + longs == 0 => {
                Some(Fundamental::Float)
            }
            Some("bool" | "void" | "float") => None,
            other => Fundamental::from_specifiers(unsigned, signed, shorts, longs, other),
        };
        fundamental.ok_or_else(|| {
            GeneratorError::parser(location, "invalid combination of type specifiers")
        })
    }

    /// Reads `[::]A::B<args>`; template arguments are only accepted on the
    /// last segment.
    fn parse_scoped_name(&mut self) -> Result<(String, Option<Vec<Vec<Token>>>)> {
        let location = self.peek().location();
        let mut name = String::new();
        if self.match_punct("::") {
            name.push_str("::");
        }
        loop {
            let segment = self.expect_identifier("type name")?;
            name.push_str(&segment);
            let args = if self.check_punct("<") {
                Some(self.parse_template_arguments()?)
            } else {
                None
            };
            if self.check_punct("::")
                && matches!(self.peek_at(1).token_type, TokenType::Identifier(_))
            {
                if args.is_some() {
                    return Err(GeneratorError::parser(
                        &location,
                        format!(
                            "nested names of template instances are not supported ('{}')",
                            name
                        ),
                    ));
                }
                self.advance();
                name.push_str("::");
                continue;
            }
            return Ok((name, args));
        }
    }

    /// Splits a `<...>` list at top-level commas. The current token is `<`.
    pub(crate) fn parse_template_arguments(&mut self) -> Result<Vec<Vec<Token>>> {
        let open = self.advance().location();
        let mut args = Vec::new();
        let mut arg = Vec::new();
        let (mut angle, mut paren) = (0usize, 0usize);
        loop {
            let token = self.advance().clone();
            match token.text() {
                _ if token.token_type == TokenType::Eof => {
                    return Err(GeneratorError::parser(&open, "unmatched '<'"));
                }
                ">" if angle == 0 && paren == 0 => break,
                "," if angle == 0 && paren == 0 => {
                    args.push(std::mem::take(&mut arg));
                    continue;
                }
                "<" => angle += 1,
                ">" => angle -= 1,
                "(" => paren += 1,
                ")" => paren = paren.saturating_sub(1),
                _ => {}
            }
            if !matches!(token.token_type, TokenType::Tag(_)) {
                arg.push(token);
            }
        }
        if !arg.is_empty() || !args.is_empty() {
            args.push(arg);
        }
        Ok(args)
    }

    /// Maps a type name to an AST node, an intrinsic, or leaves it unresolved.
    /// Class templates are instantiated on the spot.
    pub(crate) fn resolve_type_name(
        &mut self,
        name: &str,
        args: Option<Vec<Vec<Token>>>,
        location: &Location,
    ) -> Result<TypeBase> {
        if args.is_none() {
            if let Some(fundamental) = Fundamental::from_name(name) {
                return Ok(TypeBase::Fundamental(fundamental));
            }
        }

        if let Some(id) = self.ast.lookup(self.scope(), name) {
            return match &self.ast.node(id).kind {
                NodeKind::Class(class) if class.is_template() => {
                    let args = args.ok_or_else(|| {
                        GeneratorError::parser(
                            location,
                            format!("template '{}' used without arguments", name),
                        )
                    })?;
                    Ok(TypeBase::Named(self.instantiate(id, args, location)?))
                }
                NodeKind::Namespace { .. } => Err(GeneratorError::parser(
                    location,
                    format!("'{}' names a namespace, not a type", name),
                )),
                _ => Ok(TypeBase::Named(id)),
            };
        }

        let intrinsic = match (short_name(name), args) {
            ("string", None) => Intrinsic::String,
            ("hresult", None) => Intrinsic::HResult,
            ("instance_id", None) => Intrinsic::InstanceId,
            ("OptionalType", Some(args)) if args.len() == 1 => {
                Intrinsic::Optional(Box::new(self.parse_type_from(args[0].clone())?))
            }
            ("IIteratorType", Some(args)) if !args.is_empty() => {
                Intrinsic::Iterator(Box::new(self.parse_type_from(args[0].clone())?))
            }
            _ => return Ok(TypeBase::Unresolved(name.trim_start_matches("::").to_string())),
        };
        Ok(TypeBase::Intrinsic(intrinsic))
    }

    pub(crate) fn parse_type_from(&mut self, tokens: Vec<Token>) -> Result<Type> {
        self.with_tokens(tokens, |parser| {
            let ty = parser.parse_type()?;
            if !parser.is_at_end() {
                let token = parser.peek();
                return Err(GeneratorError::parser(
                    &token.location(),
                    format!("unexpected {} in type", token.token_type),
                ));
            }
            Ok(ty)
        })
    }

    /// Runs `f` over a separate token stream, restoring the current one after.
    pub(crate) fn with_tokens<T>(
        &mut self,
        mut tokens: Vec<Token>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        let (filename, line) = tokens
            .last()
            .or_else(|| self.tokens.get(self.current))
            .map(|t| (t.filename.clone(), t.line))
            .unwrap_or_default();
        tokens.push(Token {
            token_type: TokenType::Eof,
            line,
            filename,
        });
        let saved_tokens = std::mem::replace(&mut self.tokens, tokens);
        let saved_current = std::mem::replace(&mut self.current, 0);
        let result = f(self);
        self.tokens = saved_tokens;
        self.current = saved_current;
        result
    }

    fn parse_array_suffix(&mut self, ty: &mut Type) -> Result<()> {
        let token = self.peek().clone();
        if !self.match_punct("[") {
            return Ok(());
        }
        if ty.qualifiers.is_pointer() {
            return Err(GeneratorError::parser(
                &token.location(),
                "arrays of pointers are not supported",
            ));
        }
        let size = self.capture_until(&["]"], &mut Metadata::default())?;
        self.consume_punct("]", "expected ']'")?;
        if self.check_punct("[") {
            return Err(GeneratorError::parser(
                &token.location(),
                "multi-dimensional arrays are not supported",
            ));
        }
        ty.array = Some(size);
        Ok(())
    }

    /// Collects token texts up to one of `stops` at nesting depth zero; tags
    /// on the way are applied to `meta`.
    fn capture_until(&mut self, stops: &[&str], meta: &mut Metadata) -> Result<Vec<String>> {
        let start = self.peek().location();
        let mut depth = 0usize;
        let mut captured = Vec::new();
        loop {
            let token = self.peek().clone();
            match &token.token_type {
                TokenType::Eof | TokenType::FileMarker(_) => {
                    return Err(GeneratorError::parser(
                        &start,
                        "unexpected end of file in expression",
                    ));
                }
                TokenType::Tag(tag) => {
                    meta.apply(tag);
                    self.advance();
                    continue;
                }
                _ => {}
            }
            let text = token.text();
            if depth == 0 && stops.contains(&text) {
                return Ok(captured);
            }
            match text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    if depth == 0 {
                        return Err(GeneratorError::parser(
                            &token.location(),
                            format!("unmatched '{}'", text),
                        ));
                    }
                    depth -= 1;
                }
                _ => {}
            }
            captured.push(text.to_string());
            self.advance();
        }
    }

    /// Skips a declaration this parser has no use for: up to a `;` at depth
    /// zero, or through a brace-enclosed body.
    fn skip_declaration(&mut self) -> Result<()> {
        let start = self.peek().location();
        let mut depth = 0usize;
        loop {
            let token = self.advance().clone();
            match &token.token_type {
                TokenType::Eof => {
                    return Err(GeneratorError::parser(&start, "unexpected end of file"))
                }
                TokenType::Punct(p) if p == ";" && depth == 0 => return Ok(()),
                TokenType::Punct(p) if p == "(" || p == "[" || p == "{" => depth += 1,
                TokenType::Punct(p) if p == ")" || p == "]" || p == "}" => {
                    if depth == 0 {
                        return Err(GeneratorError::parser(
                            &token.location(),
                            format!("unmatched '{}'", p),
                        ));
                    }
                    depth -= 1;
                    if p == "}" && depth == 0 {
                        self.match_punct(";");
                        return Ok(());
                    }
                }
                _ => {}
            }
        }
    }

    /// Skips a balanced `open ... close` group. The current token is `open`.
    fn skip_balanced(&mut self, open: &str, close: &str) -> Result<()> {
        let start = self.consume_punct(open, &format!("expected '{}'", open))?.location();
        let mut depth = 1usize;
        while depth > 0 {
            let token = self.advance().clone();
            if token.token_type == TokenType::Eof {
                return Err(GeneratorError::parser(&start, format!("unmatched '{}'", open)));
            }
            if token.is_punct(open) {
                depth += 1;
            } else if token.is_punct(close) {
                depth -= 1;
            }
        }
        Ok(())
    }

    fn collect_tag(&mut self, tag: &Tag) {
        if !self.pending.apply(tag) {
            self.meta.apply(tag);
        }
    }

    fn collect_tags_into(&mut self, meta: &mut Metadata) {
        while let TokenType::Tag(tag) = &self.peek().token_type {
            let tag = tag.clone();
            if !meta.apply(&tag) {
                self.pending.apply(&tag);
            }
            self.advance();
        }
    }

    fn clear_pending(&mut self) {
        self.pending = DeclFlags::default();
        self.meta = Metadata::default();
    }

    pub(crate) fn push_block(&mut self, node: NodeId, kind: BlockKind, opened_at: Location) {
        let access = self.access();
        self.blocks.push(Block {
            node,
            kind,
            access,
            opened_at,
        });
    }

    pub(crate) fn scope(&self) -> NodeId {
        self.blocks.last().map(|b| b.node).unwrap_or(ROOT)
    }

    fn current_class(&self) -> Option<NodeId> {
        self.blocks
            .iter()
            .rev()
            .find(|b| b.kind != BlockKind::Anonymous)
            .filter(|b| b.kind == BlockKind::Class)
            .map(|b| b.node)
    }

    fn access(&self) -> Access {
        self.blocks.last().map(|b| b.access).unwrap_or(Access::Public)
    }

    // Token stream helpers

    fn expect_identifier(&mut self, what: &str) -> Result<String> {
        let token = self.peek().clone();
        match token.token_type {
            TokenType::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            ref other => Err(GeneratorError::parser(
                &token.location(),
                format!("expected {}, got {}", what, other),
            )),
        }
    }

    fn match_punct(&mut self, punct: &str) -> bool {
        if self.check_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_ident(&mut self, ident: &str) -> bool {
        if self.check_ident(ident) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn check_punct(&self, punct: &str) -> bool {
        self.peek().is_punct(punct)
    }

    fn check_ident(&self, ident: &str) -> bool {
        self.peek().is_ident(ident)
    }

    fn consume_punct(&mut self, punct: &str, message: &str) -> Result<&Token> {
        if self.check_punct(punct) {
            Ok(self.advance())
        } else {
            let token = self.peek();
            Err(GeneratorError::parser(
                &token.location(),
                format!("{}, got {}", message, token.token_type),
            ))
        }
    }

    pub(crate) fn advance(&mut self) -> &Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    pub(crate) fn is_at_end(&self) -> bool {
        matches!(self.peek().token_type, TokenType::Eof)
    }

    pub(crate) fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.current + offset).min(last)]
    }

    fn previous(&self) -> &Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Method,
    Constructor,
    Destructor,
}

/// Upper-case visibility macros such as `EXTERNAL` between the class key
/// and the class name.
fn is_export_macro(token: &Token) -> bool {
    match &token.token_type {
        TokenType::Identifier(word) => {
            word.len() > 1
                && word
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}

fn enumerator_value(ast: &Ast, enumeration: NodeId, name: &str) -> Option<i64> {
    ast.children(enumeration)
        .iter()
        .find(|&&e| ast.node(e).name == name)
        .and_then(|&e| ast.enumerator(e)?.value)
}

fn merge_metadata(target: &mut Metadata, extra: Metadata) {
    if extra == Metadata::default() {
        return;
    }
    let Metadata {
        brief,
        details,
        input,
        output,
        is_property,
        is_index,
        is_deprecated,
        is_obsolete,
        is_listener,
        opaque,
        bitmask,
        length,
        maxlength,
        interface,
        alt,
        text,
        param_docs,
        retval_docs,
    } = extra;
    target.brief = target.brief.take().or(brief);
    target.details = target.details.take().or(details);
    target.input |= input;
    target.output |= output;
    target.is_property |= is_property;
    target.is_index |= is_index;
    target.is_deprecated |= is_deprecated;
    target.is_obsolete |= is_obsolete;
    target.is_listener |= is_listener;
    target.opaque |= opaque;
    target.bitmask |= bitmask;
    target.length = target.length.take().or(length);
    target.maxlength = target.maxlength.take().or(maxlength);
    target.interface = target.interface.take().or(interface);
    target.alt = target.alt.take().or(alt);
    target.text = target.text.take().or(text);
    target.param_docs.extend(param_docs);
    target.retval_docs.extend(retval_docs);
}

fn template_param(tokens: &[Token], location: &Location) -> Result<TemplateParam> {
    let default_at = tokens.iter().position(|t| t.is_punct("="));
    let head = &tokens[..default_at.unwrap_or(tokens.len())];
    let default = default_at.map(|i| tokens[i + 1..].to_vec()).unwrap_or_default();
    match head.first().map(Token::text) {
        Some("template") => Err(GeneratorError::parser(
            location,
            "template template parameters are not supported",
        )),
        Some("typename" | "class") => Ok(TemplateParam {
            name: head.get(1).map(|t| t.text().to_string()).unwrap_or_default(),
            is_type: true,
            default,
        }),
        Some(_) => {
            let name = head
                .iter()
                .rev()
                .find(|t| matches!(t.token_type, TokenType::Identifier(_)))
                .map(|t| t.text().to_string())
                .unwrap_or_default();
            Ok(TemplateParam {
                name,
                is_type: false,
                default,
            })
        }
        None => Err(GeneratorError::parser(location, "empty template parameter")),
    }
}

/// Source spelling of a token run, with spaces only between words.
pub(crate) fn spell(tokens: &[Token]) -> String {
    let mut text = String::new();
    let mut previous_word = false;
    for token in tokens {
        let lexeme = token.text();
        if lexeme.is_empty() {
            continue;
        }
        let word = lexeme.starts_with(|c: char| c.is_alphanumeric() || c == '_');
        if word && previous_word {
            text.push(' ');
        }
        text.push_str(lexeme);
        previous_word = word;
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Ast {
        parse_source(source, "test.h").unwrap()
    }

    fn find(ast: &Ast, name: &str) -> NodeId {
        ast.lookup(ROOT, name).unwrap_or_else(|| panic!("'{}' not found", name))
    }

    fn method_named(ast: &Ast, class: NodeId, name: &str) -> NodeId {
        *ast.children(class)
            .iter()
            .find(|&&c| ast.node(c).name == name && ast.method(c).is_some())
            .unwrap_or_else(|| panic!("method '{}' not found", name))
    }

    #[test]
    fn test_namespaces_and_full_names() {
        let ast = parse(
            r#"
            namespace WPEFramework {
            namespace Exchange {
                struct IFoo { };
            }
            }
            namespace WPEFramework { namespace Exchange { typedef uint8_t Level; } }
            "#,
        );
        let foo = find(&ast, "WPEFramework::Exchange::IFoo");
        assert_eq!(ast.full_name(foo), "WPEFramework::Exchange::IFoo");
        let level = find(&ast, "WPEFramework::Exchange::Level");
        assert_eq!(ast.node(ast.node(level).parent.unwrap()).name, "Exchange");
    }

    #[test]
    fn test_scoped_enum_with_underlying_type() {
        let ast = parse("enum class Kind : uint8_t { A, B };");
        let kind = find(&ast, "Kind");
        let data = ast.enumeration(kind).unwrap();
        assert!(data.scoped);
        assert_eq!(
            data.underlying.as_ref().map(|t| t.base.clone()),
            Some(TypeBase::Fundamental(Fundamental::UInt8))
        );
        let values: Vec<_> = data
            .enumerators
            .iter()
            .map(|&e| ast.enumerator(e).unwrap().value)
            .collect();
        assert_eq!(values, vec![Some(0), Some(1)]);
        assert_eq!(ast.full_name(data.enumerators[1]), "Kind::B");
    }

    #[test]
    fn test_enumerator_expressions() {
        let ast = parse(
            r#"
            namespace RPC { enum IDS { ID_BASE = 0x100, ID_NEXT }; }
            struct IFoo {
                enum { ID = RPC::ID_BASE + 0x20 };
                enum Flags { NONE = 0, ONE = 1 << 0, TWO = 1 << 1, BOTH = ONE | TWO, AFTER };
            };
            "#,
        );
        let next = find(&ast, "RPC::IDS");
        let values: Vec<_> = ast
            .children(next)
            .iter()
            .map(|&e| ast.enumerator(e).unwrap().value)
            .collect();
        assert_eq!(values, vec![Some(0x100), Some(0x101)]);

        let foo = find(&ast, "IFoo");
        assert_eq!(ast.lookup_value(foo, "ID"), Some(0x120));
        let flags = find(&ast, "IFoo::Flags");
        let values: Vec<_> = ast
            .children(flags)
            .iter()
            .map(|&e| ast.enumerator(e).unwrap().value)
            .collect();
        assert_eq!(values, vec![Some(0), Some(1), Some(2), Some(3), Some(4)]);
    }

    #[test]
    fn test_duplicate_identifier() {
        let err = parse_source("typedef uint8_t Level;\ntypedef uint16_t Level;", "dup.h").unwrap_err();
        assert!(err.to_string().contains("dup.h(2)"), "{}", err);
        assert!(err.to_string().contains("duplicate identifier 'Level'"));
    }

    #[test]
    fn test_overloads_are_not_duplicates() {
        let ast = parse("struct IFoo { virtual uint32_t Get(uint8_t& a) = 0; virtual uint32_t Get(uint16_t& a) = 0; };");
        let foo = find(&ast, "IFoo");
        assert_eq!(ast.children(foo).len(), 2);
    }

    #[test]
    fn test_forward_declaration_is_reused() {
        let ast = parse("struct IFoo;\nstruct IFoo { virtual void Bar() = 0; };\nstruct IFoo;");
        let foo = find(&ast, "IFoo");
        assert!(ast.class(foo).unwrap().defined);
        assert_eq!(ast.classes().count(), 1);
    }

    #[test]
    fn test_class_with_methods_cannot_be_redefined() {
        let err = parse_source(
            "struct IFoo { virtual void Bar() = 0; };\nstruct IFoo { virtual void Baz() = 0; };",
            "redef.h",
        )
        .unwrap_err();
        assert!(err.to_string().contains("redefined"));
    }

    #[test]
    fn test_method_parsing() {
        let ast = parse(
            r#"
            struct IFoo : virtual public Core::IUnknown {
                // @brief Sets things
                virtual Core::hresult Set(const string& key /* @in */, /* @out */ uint32_t& value, const bool flag = false) = 0;
                virtual uint32_t Level() const = 0;
                ~IFoo() override = default;
            };
            "#,
        );
        let foo = find(&ast, "IFoo");
        let class = ast.class(foo).unwrap();
        assert_eq!(class.bases.len(), 1);
        assert_eq!(class.bases[0].name, "Core::IUnknown");
        assert_eq!(class.bases[0].resolved, None);
        assert_eq!(class.bases[0].access, Access::Public);

        let set = method_named(&ast, foo, "Set");
        let data = ast.method(set).unwrap();
        assert!(data.is_virtual && data.is_pure);
        assert_eq!(data.retval.base, TypeBase::Intrinsic(Intrinsic::HResult));
        assert_eq!(data.meta.brief.as_deref(), Some("Sets things"));
        assert_eq!(data.params.len(), 3);

        let key = ast.variable(data.params[0]).unwrap();
        assert!(key.meta.input);
        assert!(key.ty.qualifiers.is_reference() && key.ty.qualifiers.is_const());
        assert_eq!(key.ty.base, TypeBase::Intrinsic(Intrinsic::String));
        let value = ast.variable(data.params[1]).unwrap();
        assert!(value.meta.output);
        let flag = ast.variable(data.params[2]).unwrap();
        assert_eq!(flag.default, vec!["false".to_string()]);
        assert_eq!(ast.full_name(data.params[1]), "IFoo::Set::value");

        let level = ast.method(method_named(&ast, foo, "Level")).unwrap();
        assert!(level.is_const);
        let dtor = ast.method(method_named(&ast, foo, "~IFoo")).unwrap();
        assert!(dtor.is_destructor);
    }

    #[test]
    fn test_unsupported_constructs() {
        let cases = [
            ("struct A { void F(string&& s); };", "rvalue references"),
            ("struct A { uint8_t* data[4]; };", "arrays of pointers"),
            ("struct A { uint8_t data[4][4]; };", "multi-dimensional arrays"),
            ("struct alignas(8) A { };", "alignment specifiers"),
            ("struct A { uint8_t*** p; };", "multi-level pointers"),
        ];
        for (source, expected) in cases {
            let err = parse_source(source, "bad.h").unwrap_err();
            assert!(err.to_string().contains(expected), "{}: {}", source, err);
        }
    }

    #[test]
    fn test_unmatched_braces() {
        let err = parse_source("namespace A {\nstruct B {\n};", "open.h").unwrap_err();
        assert!(err.to_string().contains("open.h(1): parse error: unmatched '{'"), "{}", err);
        let err = parse_source("};", "close.h").unwrap_err();
        assert!(err.to_string().contains("unmatched '}'"));
    }

    #[test]
    fn test_call_expressions_are_retracted() {
        let ast = parse(
            r#"
            struct Impl {
                BEGIN_INTERFACE_MAP(Impl)
                INTERFACE_ENTRY(Exchange::IFoo)
                void Run();
            };
            "#,
        );
        let imp = find(&ast, "Impl");
        let names: Vec<_> = ast.children(imp).iter().map(|&c| ast.node(c).name.clone()).collect();
        assert_eq!(names, vec!["Run".to_string()]);
    }

    #[test]
    fn test_pointer_qualifiers() {
        let ast = parse("struct A { void F(const uint8_t* data, char* const buffer); };");
        let a = find(&ast, "A");
        let f = ast.method(method_named(&ast, a, "F")).unwrap();
        let data = &ast.variable(f.params[0]).unwrap().ty;
        assert!(data.qualifiers.is_pointer());
        assert!(data.qualifiers.contains(RefQualifiers::POINTER_TO_CONST));
        assert!(!data.qualifiers.is_const());
        let buffer = &ast.variable(f.params[1]).unwrap().ty;
        assert!(buffer.qualifiers.is_const());
        assert!(!buffer.qualifiers.contains(RefQualifiers::POINTER_TO_CONST));
    }

    #[test]
    fn test_intrinsic_wrappers() {
        let ast = parse(
            r#"
            typedef Core::OptionalType<uint16_t> Port;
            typedef RPC::IIteratorType<string, RPC::ID_STRINGITERATOR> IStringIterator;
            "#,
        );
        let port = ast.typedef(find(&ast, "Port")).unwrap();
        assert_eq!(
            port.ty.base,
            TypeBase::Intrinsic(Intrinsic::Optional(Box::new(Type {
                base: TypeBase::Fundamental(Fundamental::UInt16),
                qualifiers: RefQualifiers::VALUE,
                array: None,
                spelling: "uint16_t".to_string(),
            })))
        );
        let iterator = ast.typedef(find(&ast, "IStringIterator")).unwrap();
        match &iterator.ty.base {
            TypeBase::Intrinsic(Intrinsic::Iterator(element)) => {
                assert_eq!(element.base, TypeBase::Intrinsic(Intrinsic::String))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_pending_flags_apply_to_next_declaration_only() {
        let ast = parse(
            r#"
            // @json 1.0.0
            struct IFoo { };
            struct IBar { };
            "#,
        );
        let foo = ast.class(find(&ast, "IFoo")).unwrap();
        assert!(foo.flags.json);
        assert_eq!(foo.flags.json_version.as_deref(), Some("1.0.0"));
        let bar = ast.class(find(&ast, "IBar")).unwrap();
        assert!(!bar.flags.json);
    }

    #[test]
    fn test_multiword_fundamentals() {
        let ast = parse("struct A { unsigned long long a; unsigned b; short int c; long double d; };");
        let a = find(&ast, "A");
        let bases: Vec<_> = ast
            .children(a)
            .iter()
            .map(|&c| ast.variable(c).unwrap().ty.base.clone())
            .collect();
        assert_eq!(
            bases,
            vec![
                TypeBase::Fundamental(Fundamental::UnsignedLongLong),
                TypeBase::Fundamental(Fundamental::UnsignedInt),
                TypeBase::Fundamental(Fundamental::Short),
                TypeBase::Fundamental(Fundamental::LongDouble),
            ]
        );
    }
}
