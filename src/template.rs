//! Class template instantiation
//!
//! The captured definition of a template is re-parsed with every parameter
//! replaced by its argument. Type arguments are spelled fully qualified so
//! the body can be parsed in the scope of the template rather than the scope
//! of its use.

use crate::ast::*;
use crate::error::{GeneratorError, Location, Result};
use crate::expression;
use crate::lexer::{Token, TokenType};
use crate::parser::{spell, Block, BlockKind, Parser};

const MAX_INSTANTIATION_DEPTH: usize = 16;

impl Parser {
    /// Returns the instance of `template` for `args`, creating it on first use.
    pub(crate) fn instantiate(
        &mut self,
        template: NodeId,
        args: Vec<Vec<Token>>,
        location: &Location,
    ) -> Result<NodeId> {
        let template_name = self.ast.node(template).name.clone();
        let data = match self.ast.class(template).and_then(|c| c.template.clone()) {
            Some(data) if !data.tokens.is_empty() => data,
            _ => {
                return Err(GeneratorError::parser(
                    location,
                    format!("template '{}' used before its definition", template_name),
                ))
            }
        };
        if args.len() > data.params.len() {
            return Err(GeneratorError::parser(
                location,
                format!("too many arguments for template '{}'", template_name),
            ));
        }

        let mut replacements = Vec::with_capacity(data.params.len());
        let mut spellings = Vec::with_capacity(data.params.len());
        for (index, param) in data.params.iter().enumerate() {
            let tokens = match args.get(index) {
                Some(tokens) => tokens.clone(),
                None if !param.default.is_empty() => param.default.clone(),
                None => {
                    return Err(GeneratorError::parser(
                        location,
                        format!(
                            "missing argument '{}' for template '{}'",
                            param.name, template_name
                        ),
                    ))
                }
            };
            let canonical = self.canonical_argument(param, tokens)?;
            spellings.push(spell(&canonical));
            replacements.push(canonical);
        }

        let instance_name = instance_name(&template_name, &spellings);
        let parent = self.ast.node(template).parent.unwrap_or(ROOT);
        if let Some(existing) = self.ast.find_child(parent, &instance_name) {
            return Ok(existing);
        }

        if self.instantiation_depth >= MAX_INSTANTIATION_DEPTH {
            return Err(GeneratorError::parser(
                location,
                format!(
                    "template instantiation depth exceeded while instantiating '{}'",
                    template_name
                ),
            ));
        }

        let body = substitute(&data, &template_name, &instance_name, &replacements);
        log::debug!(
            "Instantiating {}<{}> as {}",
            self.ast.full_name(template),
            spellings.join(", "),
            instance_name
        );

        let kind = if self.ast.class(parent).is_some() {
            BlockKind::Class
        } else {
            BlockKind::Namespace
        };
        let saved_blocks = std::mem::replace(
            &mut self.blocks,
            vec![Block {
                node: parent,
                kind,
                access: Access::Public,
                opened_at: location.clone(),
            }],
        );
        let saved_pending = std::mem::take(&mut self.pending);
        let saved_meta = std::mem::take(&mut self.meta);
        self.instantiation_depth += 1;

        let result = self.with_tokens(body, |parser| parser.parse_block_items(1));

        self.instantiation_depth -= 1;
        self.blocks = saved_blocks;
        self.pending = saved_pending;
        self.meta = saved_meta;
        result?;

        let instance = self.ast.find_child(parent, &instance_name).ok_or_else(|| {
            GeneratorError::parser(
                location,
                format!("failed to instantiate template '{}'", template_name),
            )
        })?;
        let (flags, meta) = match self.ast.class(template) {
            Some(class) => (class.flags.clone(), class.meta.clone()),
            None => (DeclFlags::default(), Metadata::default()),
        };
        if let Some(class) = self.ast.class_mut(instance) {
            class.instance_of = Some(InstanceInfo {
                template,
                arguments: spellings,
            });
            class.flags = flags;
            class.meta = meta;
        }
        Ok(instance)
    }

    /// Rewrites an argument so that it means the same thing inside the
    /// template's own scope.
    fn canonical_argument(
        &mut self,
        param: &TemplateParam,
        tokens: Vec<Token>,
    ) -> Result<Vec<Token>> {
        if !param.is_type {
            let texts: Vec<String> = tokens.iter().map(|t| t.text().to_string()).collect();
            let scope = self.scope();
            let ast = &self.ast;
            return Ok(match expression::evaluate(&texts, &|n| ast.lookup_value(scope, n)) {
                Some(value) => vec![retoken(&tokens, TokenType::Number(value.to_string()))],
                None => tokens,
            });
        }

        // locate the type name inside the argument: after leading cv words
        let start = tokens
            .iter()
            .position(|t| {
                !matches!(
                    t.text(),
                    "const" | "volatile" | "typename" | "struct" | "class" | "enum"
                )
            })
            .unwrap_or(tokens.len());
        let mut end = start;
        if tokens.get(end).is_some_and(|t| t.is_punct("::")) {
            end += 1;
        }
        while tokens.get(end).is_some_and(|t| matches!(t.token_type, TokenType::Identifier(_))) {
            end += 1;
            if tokens.get(end).is_some_and(|t| t.is_punct("::")) {
                end += 1;
            } else {
                break;
            }
        }
        if tokens.get(end).is_some_and(|t| t.is_punct("<")) {
            let mut depth = 0usize;
            while let Some(token) = tokens.get(end) {
                end += 1;
                if token.is_punct("<") {
                    depth += 1;
                } else if token.is_punct(">") {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
            }
        }

        let ty = self.parse_type_from(tokens[start..end].to_vec())?;
        let TypeBase::Named(id) = ty.base else {
            return Ok(tokens);
        };
        let mut canonical = tokens[..start].to_vec();
        for segment in self.ast.full_name(id).split("::") {
            canonical.push(retoken(&tokens, TokenType::Punct("::".to_string())));
            canonical.push(retoken(&tokens, TokenType::Identifier(segment.to_string())));
        }
        canonical.extend_from_slice(&tokens[end..]);
        Ok(canonical)
    }
}

fn retoken(like: &[Token], token_type: TokenType) -> Token {
    let (filename, line) = like.first().map(|t| (t.filename.clone(), t.line)).unwrap_or_default();
    Token {
        token_type,
        line,
        filename,
    }
}

/// `Name_<first four md5 bytes of the argument list, hex>`.
fn instance_name(template_name: &str, arguments: &[String]) -> String {
    let digest = md5::compute(arguments.join(",").as_bytes());
    format!("{}_{}", template_name, hex::encode(&digest.0[..4]))
}

fn substitute(
    data: &TemplateData,
    template_name: &str,
    instance_name: &str,
    replacements: &[Vec<Token>],
) -> Vec<Token> {
    let mut body = Vec::with_capacity(data.tokens.len() + 1);
    let mut index = 0;
    while index < data.tokens.len() {
        let token = &data.tokens[index];
        index += 1;
        let TokenType::Identifier(word) = &token.token_type else {
            body.push(token.clone());
            continue;
        };
        if word == template_name {
            body.push(Token {
                token_type: TokenType::Identifier(instance_name.to_string()),
                ..token.clone()
            });
            // self references carry the parameter list again
            if data.tokens.get(index).is_some_and(|t| t.is_punct("<")) {
                let mut depth = 0usize;
                while let Some(next) = data.tokens.get(index) {
                    index += 1;
                    if next.is_punct("<") {
                        depth += 1;
                    } else if next.is_punct(">") {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                }
            }
            continue;
        }
        match data.params.iter().position(|p| !p.name.is_empty() && &p.name == word) {
            Some(param) => body.extend(replacements[param].iter().map(|r| Token {
                token_type: r.token_type.clone(),
                line: token.line,
                filename: token.filename.clone(),
            })),
            None => body.push(token.clone()),
        }
    }
    if let Some(last) = data.tokens.last() {
        body.push(Token {
            token_type: TokenType::Punct(";".to_string()),
            ..last.clone()
        });
    }
    body
}

#[cfg(test)]
mod tests {
    use crate::ast::*;
    use crate::parser::parse_source;
    use crate::types::Fundamental;

    fn attribute_types(ast: &Ast, class: NodeId) -> Vec<TypeBase> {
        ast.children(class)
            .iter()
            .filter_map(|&c| ast.variable(c))
            .map(|v| v.ty.base.clone())
            .collect()
    }

    fn instance_of(ast: &Ast, typedef: &str) -> NodeId {
        match ast.typedef(ast.lookup(ROOT, typedef).unwrap()).unwrap().ty.base {
            TypeBase::Named(id) => id,
            ref other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_type_parameter_substitution() {
        let ast = parse_source(
            r#"
            namespace Core {
                template <typename T, uint8_t SIZE = 4>
                struct Buffer {
                    T value;
                    uint8_t data[SIZE];
                };
            }
            typedef Core::Buffer<uint32_t> Words;
            "#,
            "tpl.h",
        )
        .unwrap();
        let words = instance_of(&ast, "Words");
        let class = ast.class(words).unwrap();
        let info = class.instance_of.as_ref().unwrap();
        assert_eq!(ast.node(info.template).name, "Buffer");
        assert_eq!(info.arguments, vec!["uint32_t".to_string(), "4".to_string()]);
        assert!(ast.node(words).name.starts_with("Buffer_"));
        assert_eq!(ast.node(words).name.len(), "Buffer_".len() + 8);
        assert_eq!(ast.full_name(ast.node(words).parent.unwrap()), "Core");
        assert_eq!(
            attribute_types(&ast, words),
            vec![
                TypeBase::Fundamental(Fundamental::UInt32),
                TypeBase::Fundamental(Fundamental::UInt8)
            ]
        );
        let data = ast.children(words)[1];
        assert_eq!(ast.variable(data).unwrap().ty.array, Some(vec!["4".to_string()]));
    }

    #[test]
    fn test_identical_arguments_share_an_instance() {
        let ast = parse_source(
            r#"
            template <typename T> struct Box { T item; };
            typedef Box<uint16_t> A;
            typedef Box<uint16_t> B;
            typedef Box<uint32_t> C;
            "#,
            "tpl.h",
        )
        .unwrap();
        assert_eq!(instance_of(&ast, "A"), instance_of(&ast, "B"));
        assert_ne!(instance_of(&ast, "A"), instance_of(&ast, "C"));
    }

    #[test]
    fn test_type_arguments_resolve_at_use_site() {
        let ast = parse_source(
            r#"
            template <typename T> struct Box { T item; };
            namespace Exchange {
                struct Point { int32_t x; int32_t y; };
                struct Holder { Box<Point> boxed; };
            }
            "#,
            "tpl.h",
        )
        .unwrap();
        let holder = ast.lookup(ROOT, "Exchange::Holder").unwrap();
        let boxed = ast.variable(ast.children(holder)[0]).unwrap();
        let TypeBase::Named(instance) = boxed.ty.base else {
            panic!("not instantiated");
        };
        let point = ast.lookup(ROOT, "Exchange::Point").unwrap();
        assert_eq!(attribute_types(&ast, instance), vec![TypeBase::Named(point)]);
        assert_eq!(
            ast.class(instance).unwrap().instance_of.as_ref().unwrap().arguments,
            vec!["::Exchange::Point".to_string()]
        );
    }

    #[test]
    fn test_template_without_arguments_is_an_error() {
        let err = parse_source("template <typename T> struct Box { T item; };\nstruct A { Box b; };", "tpl.h")
            .unwrap_err();
        assert!(err.to_string().contains("used without arguments"));
    }
}
