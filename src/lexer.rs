//! Lexical analysis for annotated C++ interface headers
//!
//! Comments and preprocessor directives are dropped, except for the annotation
//! tags found inside comments, which become [`TokenType::Tag`] tokens.

use crate::error::{GeneratorError, Location, Result};
use crate::types::MAX_INCLUDE_DEPTH;
use regex::Regex;
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Annotation payload extracted from a comment.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    In,
    Out,
    InOut,
    Index,
    Property,
    Deprecated,
    Obsolete,
    Bitmask,
    Opaque,
    Event,
    Iterator,
    StatusListener,
    Compliant,
    Extended,
    Collapsed,
    Text(String),
    Alt(String),
    Length(Vec<String>),
    MaxLength(Vec<String>),
    Interface(Vec<String>),
    Brief(String),
    Details(String),
    Param { name: String, text: String },
    Retval { name: String, text: String },
    Json(Option<String>),
    JsonOmit,
    StubgenOmit,
    StubgenStub,
    StubgenInclude(String),
    SourceLocation(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenType {
    Identifier(String),
    Number(String),
    String(String),
    Char(String),
    Punct(String),
    Tag(Tag),
    /// Start of a top-level source file.
    FileMarker(String),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub line: usize,
    pub filename: String,
}

impl Token {
    pub fn location(&self) -> Location {
        Location::new(self.filename.clone(), self.line)
    }

    /// Source text of the token, empty for markers.
    pub fn text(&self) -> &str {
        match &self.token_type {
            TokenType::Identifier(s) | TokenType::Number(s) | TokenType::Punct(s) => s,
            TokenType::String(s) | TokenType::Char(s) => s,
            _ => "",
        }
    }

    pub fn is_punct(&self, punct: &str) -> bool {
        matches!(&self.token_type, TokenType::Punct(p) if p == punct)
    }

    pub fn is_ident(&self, ident: &str) -> bool {
        matches!(&self.token_type, TokenType::Identifier(i) if i == ident)
    }
}

impl fmt::Display for TokenType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenType::Identifier(id) => write!(f, "identifier '{}'", id),
            TokenType::Number(n) => write!(f, "number '{}'", n),
            TokenType::String(s) => write!(f, "string \"{}\"", s),
            TokenType::Char(c) => write!(f, "character '{}'", c),
            TokenType::Punct(p) => write!(f, "'{}'", p),
            TokenType::Tag(tag) => write!(f, "tag {:?}", tag),
            TokenType::FileMarker(file) => write!(f, "start of {}", file),
            TokenType::Eof => write!(f, "end of file"),
        }
    }
}

fn number_regex() -> &'static Regex {
    static NUMBER_RE: OnceLock<Regex> = OnceLock::new();
    NUMBER_RE.get_or_init(|| {
        Regex::new(
            r"^(0[xX][0-9a-fA-F']+|0[bB][01']+|[0-9][0-9']*(\.[0-9]*)?([eE][+-]?[0-9]+)?)[uUlLfF]*$",
        )
        .expect("number literal pattern")
    })
}

const PUNCTUATORS: &[&str] = &[
    "...", "::", "->", "&&", "||", "<<", "==", "!=", "<=", "+=", "-=", "{", "}", "[", "]", "(",
    ")", "<", ">", ";", ":", ",", "=", "*", "&", "~", "!", "+", "-", "/", "%", "^", "|", "?", ".",
    "#",
];

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    filename: String,
    at_line_start: bool,
    stopped: bool,
}

impl Lexer {
    pub fn new(input: &str, filename: impl Into<String>) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            filename: filename.into(),
            at_line_start: true,
            stopped: false,
        }
    }

    /// Tokenizes the whole input. The stream is not terminated with `Eof`;
    /// [`tokenize_source`] and [`tokenize_files`] add the markers.
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();

        while !self.is_at_end() && !self.stopped {
            self.next_tokens(&mut tokens)?;
        }

        Ok(tokens)
    }

    fn location(&self) -> Location {
        Location::new(self.filename.clone(), self.line)
    }

    fn token(&self, token_type: TokenType, line: usize) -> Token {
        Token {
            token_type,
            line,
            filename: self.filename.clone(),
        }
    }

    fn next_tokens(&mut self, tokens: &mut Vec<Token>) -> Result<()> {
        let Some(ch) = self.peek() else {
            return Ok(());
        };

        if ch == '\n' {
            self.advance();
            self.line += 1;
            self.at_line_start = true;
            return Ok(());
        }

        if ch.is_whitespace() {
            self.advance();
            return Ok(());
        }

        let start_line = self.line;

        if ch == '#' && self.at_line_start {
            return self.read_directive();
        }
        self.at_line_start = false;

        if ch == '/' && self.peek_next() == Some('/') {
            self.position += 2;
            let comment = self.read_line_comment();
            for (tag, offset) in self.parse_comment(&comment, start_line)? {
                tokens.push(self.token(TokenType::Tag(tag), start_line + offset));
            }
            return Ok(());
        }

        if ch == '/' && self.peek_next() == Some('*') {
            self.position += 2;
            let comment = self.read_block_comment(start_line)?;
            for (tag, offset) in self.parse_comment(&comment, start_line)? {
                tokens.push(self.token(TokenType::Tag(tag), start_line + offset));
            }
            return Ok(());
        }

        let token_type = match ch {
            '"' => {
                self.advance();
                TokenType::String(self.read_quoted('"')?)
            }
            '\'' => {
                self.advance();
                TokenType::Char(self.read_quoted('\'')?)
            }
            c if c.is_ascii_digit() => {
                let number =
                    self.read_while(|c| c.is_ascii_alphanumeric() || c == '.' || c == '\'');
                if !number_regex().is_match(&number) {
                    return Err(GeneratorError::lex(
                        &self.location(),
                        format!("invalid number literal '{}'", number),
                    ));
                }
                TokenType::Number(number)
            }
            c if c.is_alphabetic() || c == '_' => {
                TokenType::Identifier(self.read_while(|c| c.is_alphanumeric() || c == '_'))
            }
            _ => TokenType::Punct(self.read_punct()?),
        };

        tokens.push(self.token(token_type, start_line));
        Ok(())
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if ch.is_some() {
            self.position += 1;
        }
        ch
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_next(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn read_while(&mut self, pred: impl Fn(char) -> bool) -> String {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if !pred(ch) {
                break;
            }
            text.push(ch);
            self.position += 1;
        }
        text
    }

    fn read_punct(&mut self) -> Result<String> {
        for punct in PUNCTUATORS {
            let len = punct.chars().count();
            if self.position + len <= self.input.len()
                && self.input[self.position..self.position + len].iter().copied().eq(punct.chars())
            {
                self.position += len;
                return Ok(punct.to_string());
            }
        }
        let ch = self.peek().unwrap_or('\0');
        Err(GeneratorError::lex(&self.location(), format!("unexpected character '{}'", ch)))
    }

    fn read_quoted(&mut self, quote: char) -> Result<String> {
        let mut value = String::new();
        while let Some(ch) = self.advance() {
            match ch {
                '\\' => {
                    if let Some(escaped) = self.advance() {
                        value.push('\\');
                        value.push(escaped);
                    }
                }
                '\n' => break,
                c if c == quote => return Ok(value),
                c => value.push(c),
            }
        }
        Err(GeneratorError::lex(&self.location(), "unterminated literal"))
    }

    fn read_line_comment(&mut self) -> String {
        self.read_while(|c| c != '\n')
    }

    fn read_block_comment(&mut self, start_line: usize) -> Result<String> {
        let mut comment = String::new();
        loop {
            match self.advance() {
                Some('*') if self.peek() == Some('/') => {
                    self.position += 1;
                    return Ok(comment);
                }
                Some(ch) => {
                    if ch == '\n' {
                        self.line += 1;
                    }
                    comment.push(ch);
                }
                None => {
                    return Err(GeneratorError::lex(
                        &Location::new(self.filename.clone(), start_line),
                        "unmatched block comment",
                    ))
                }
            }
        }
    }

    /// Reads one logical preprocessor line; `#if 0` sections are skipped.
    fn read_directive(&mut self) -> Result<()> {
        let directive = self.read_logical_line();
        let words: Vec<&str> = directive.trim_start_matches('#').split_whitespace().collect();
        if words.first() == Some(&"if") && words.get(1) == Some(&"0") {
            self.skip_disabled_block()?;
        }
        Ok(())
    }

    fn read_logical_line(&mut self) -> String {
        let mut text = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\\' && self.peek_next() == Some('\n') {
                self.position += 2;
                self.line += 1;
                continue;
            }
            if ch == '\n' {
                break;
            }
            text.push(ch);
            self.position += 1;
        }
        text
    }

    fn skip_disabled_block(&mut self) -> Result<()> {
        let start = self.location();
        let mut depth = 1usize;
        while !self.is_at_end() {
            let line = self.read_logical_line();
            self.advance();
            self.line += 1;
            let trimmed = line.trim_start();
            if let Some(directive) = trimmed.strip_prefix('#') {
                let keyword = directive.split_whitespace().next().unwrap_or("");
                match keyword {
                    "if" | "ifdef" | "ifndef" => depth += 1,
                    "endif" => depth -= 1,
                    "else" | "elif" if depth == 1 => depth = 0,
                    _ => {}
                }
                if depth == 0 {
                    self.at_line_start = true;
                    return Ok(());
                }
            }
        }
        Err(GeneratorError::lex(&start, "unterminated '#if 0' block"))
    }

    /// Extracts the tags of one comment; returns each tag with its line offset.
    fn parse_comment(&mut self, comment: &str, start_line: usize) -> Result<Vec<(Tag, usize)>> {
        let chars: Vec<char> = comment.chars().collect();
        let starts = tag_starts(&chars);
        let mut tags = Vec::new();

        for (index, &start) in starts.iter().enumerate() {
            let end = starts.get(index + 1).copied().unwrap_or(chars.len());
            let offset = chars[..start].iter().filter(|&&c| c == '\n').count();
            let location = Location::new(self.filename.clone(), start_line + offset);
            let body: String = chars[start + 1..end].iter().collect();

            let name_len = body
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
                .count();
            let name = &body[..name_len];
            let rest = &body[name_len..];
            let (arg, rest) = match rest.strip_prefix(':') {
                Some(after) => {
                    let arg_len = after
                        .find(|c: char| c.is_whitespace() || c == ',')
                        .unwrap_or(after.len());
                    (Some(&after[..arg_len]), &after[arg_len..])
                }
                None => (None, rest),
            };
            let text = clean_comment_text(rest);

            let tag = match name {
                "in" => Tag::In,
                "out" => Tag::Out,
                "inout" => Tag::InOut,
                "index" => Tag::Index,
                "property" => Tag::Property,
                "deprecated" => Tag::Deprecated,
                "obsolete" => Tag::Obsolete,
                "bitmask" => Tag::Bitmask,
                "opaque" => Tag::Opaque,
                "event" => Tag::Event,
                "iterator" => Tag::Iterator,
                "statuslistener" => Tag::StatusListener,
                "compliant" => Tag::Compliant,
                "stop" => {
                    self.stopped = true;
                    break;
                }
                "text" => Tag::Text(arg_or_word(arg, &text, &location, "@text")?),
                "alt" => Tag::Alt(arg_or_word(arg, &text, &location, "@alt")?),
                "length" | "maxlength" | "interface" => {
                    let expression = match arg {
                        Some(_) => expression_text(&body[name_len + 1..]),
                        None => String::new(),
                    };
                    let tokens = tokenize_expression(&expression, &location)?;
                    if tokens.is_empty() {
                        return Err(GeneratorError::lex(
                            &location,
                            format!("@{} requires an expression", name),
                        ));
                    }
                    match name {
                        "length" => Tag::Length(tokens),
                        "maxlength" => Tag::MaxLength(tokens),
                        _ => Tag::Interface(tokens),
                    }
                }
                "brief" => Tag::Brief(text),
                "details" => Tag::Details(text),
                "param" | "retval" => {
                    let (param, description) = split_first_word(&text);
                    if param.is_empty() {
                        return Err(GeneratorError::lex(
                            &location,
                            format!("@{} requires a name", name),
                        ));
                    }
                    let param = param.trim_end_matches(':').to_string();
                    if name == "param" {
                        Tag::Param { name: param, text: description }
                    } else {
                        Tag::Retval { name: param, text: description }
                    }
                }
                "json" => match arg {
                    Some("omit") => Tag::JsonOmit,
                    Some(version) if !version.is_empty() => Tag::Json(Some(version.to_string())),
                    _ => {
                        let (word, _) = split_first_word(&text);
                        if word.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                            Tag::Json(Some(word.to_string()))
                        } else {
                            Tag::Json(None)
                        }
                    }
                },
                "uncompliant" => match arg {
                    Some("extended") => Tag::Extended,
                    Some("collapsed") => Tag::Collapsed,
                    other => {
                        return Err(GeneratorError::lex(
                            &location,
                            format!("unknown @uncompliant mode '{}'", other.unwrap_or("")),
                        ))
                    }
                },
                "stubgen" => match arg {
                    Some("omit") => Tag::StubgenOmit,
                    Some("stub") => Tag::StubgenStub,
                    Some("include") => {
                        let (file, _) = split_first_word(&text);
                        let file = file.trim_matches('"');
                        if file.is_empty() {
                            return Err(GeneratorError::lex(
                                &location,
                                "@stubgen:include requires a file name",
                            ));
                        }
                        Tag::StubgenInclude(file.to_string())
                    }
                    other => {
                        return Err(GeneratorError::lex(
                            &location,
                            format!("unknown @stubgen directive '{}'", other.unwrap_or("")),
                        ))
                    }
                },
                "sourcelocation" => {
                    Tag::SourceLocation(arg_or_word(arg, &text, &location, "@sourcelocation")?)
                }
                unknown => {
                    return Err(GeneratorError::lex(
                        &location,
                        format!("unknown tag '@{}'", unknown),
                    ));
                }
            };
            tags.push((tag, offset));
        }

        Ok(tags)
    }
}

/// Positions of `@` characters that open a tag.
fn tag_starts(chars: &[char]) -> Vec<usize> {
    (0..chars.len())
        .filter(|&i| {
            chars[i] == '@'
                && chars.get(i + 1).is_some_and(|c| c.is_ascii_alphabetic())
                && (i == 0
                    || matches!(chars[i - 1], ' ' | '\t' | '\n' | '\r' | '*' | '/' | '!' | '<'))
        })
        .collect()
}

/// Joins comment lines, dropping the decoration of block comments.
fn clean_comment_text(text: &str) -> String {
    text.lines()
        .map(|line| line.trim().trim_start_matches(['*', '/', '!']).trim())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn split_first_word(text: &str) -> (&str, String) {
    let text = text.trim();
    match text.find(char::is_whitespace) {
        Some(pos) => (&text[..pos], text[pos..].trim().to_string()),
        None => (text, String::new()),
    }
}

fn arg_or_word(arg: Option<&str>, text: &str, location: &Location, tag: &str) -> Result<String> {
    match arg {
        Some(arg) if !arg.is_empty() => Ok(arg.trim_matches('"').to_string()),
        _ => {
            let (word, _) = split_first_word(text);
            if word.is_empty() {
                Err(GeneratorError::lex(location, format!("{} requires an argument", tag)))
            } else {
                Ok(word.trim_matches('"').to_string())
            }
        }
    }
}

/// Expression text after `@length:`, up to a comma, a following tag or the
/// end of the comment line at parenthesis depth zero.
fn expression_text(text: &str) -> String {
    let mut depth = 0i32;
    let mut expression = String::new();
    for ch in text.chars() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' | '@' | '\n' if depth <= 0 => break,
            _ => {}
        }
        expression.push(ch);
    }
    expression.trim().to_string()
}

/// Splits a tag expression into lexemes and checks `sizeof(` nesting.
fn tokenize_expression(text: &str, location: &Location) -> Result<Vec<String>> {
    let mut lexer = Lexer::new(text, location.file.clone());
    lexer.line = location.line;
    let tokens = lexer.tokenize()?;
    let mut depth = 0i32;
    for token in &tokens {
        if token.is_punct("(") {
            depth += 1;
        } else if token.is_punct(")") {
            depth -= 1;
            if depth < 0 {
                break;
            }
        }
    }
    if depth != 0 {
        return Err(GeneratorError::lex(
            location,
            format!("unmatched parenthesis in expression '{}'", text),
        ));
    }
    Ok(tokens.iter().map(|t| t.text().to_string()).collect())
}

/// Tokenizes in-memory source as one top-level file.
pub fn tokenize_source(source: &str, filename: &str) -> Result<Vec<Token>> {
    let mut tokens = vec![Token {
        token_type: TokenType::FileMarker(filename.to_string()),
        line: 1,
        filename: filename.to_string(),
    }];
    let mut lexer = Lexer::new(source, filename);
    tokens.extend(lexer.tokenize()?);
    tokens.push(Token {
        token_type: TokenType::Eof,
        line: lexer.line,
        filename: filename.to_string(),
    });
    Ok(tokens)
}

/// Tokenizes several headers into one stream, splicing `@stubgen:include`
/// files in place. Each top-level file starts with a `FileMarker`.
pub fn tokenize_files(files: &[PathBuf], include_dirs: &[PathBuf]) -> Result<Vec<Token>> {
    let mut splicer = IncludeSplicer {
        include_dirs,
        in_flight: HashSet::new(),
    };
    let mut tokens = Vec::new();
    for file in files {
        let name = file.to_string_lossy().to_string();
        tokens.push(Token {
            token_type: TokenType::FileMarker(name.clone()),
            line: 1,
            filename: name,
        });
        splicer.tokenize_recursive(file, 0, &mut tokens)?;
    }
    let (filename, line) = tokens.last().map(|t| (t.filename.clone(), t.line)).unwrap_or_default();
    tokens.push(Token {
        token_type: TokenType::Eof,
        line,
        filename,
    });
    Ok(tokens)
}

struct IncludeSplicer<'a> {
    include_dirs: &'a [PathBuf],
    in_flight: HashSet<PathBuf>,
}

impl IncludeSplicer<'_> {
    fn tokenize_recursive(
        &mut self,
        path: &Path,
        depth: usize,
        out: &mut Vec<Token>,
    ) -> Result<()> {
        let name = path.to_string_lossy().to_string();
        if depth > MAX_INCLUDE_DEPTH {
            return Err(GeneratorError::lex(
                &Location::new(name, 0),
                format!("maximum include depth ({}) exceeded", MAX_INCLUDE_DEPTH),
            ));
        }

        let canonical = fs::canonicalize(path)
            .map_err(|e| {
                GeneratorError::loader(name.clone(), format!("cannot open header: {}", e))
            })?;
        if !self.in_flight.insert(canonical.clone()) {
            return Err(GeneratorError::lex(&Location::new(name, 0), "circular @stubgen:include"));
        }

        let source = fs::read_to_string(&canonical)?;
        let tokens = Lexer::new(&source, name.clone()).tokenize()?;
        let base_dir = canonical.parent().map(Path::to_path_buf).unwrap_or_default();

        for token in tokens {
            if let TokenType::Tag(Tag::StubgenInclude(file)) = &token.token_type {
                let target = self.find_include(&base_dir, file).ok_or_else(|| {
                    GeneratorError::lex(
                        &token.location(),
                        format!("included file '{}' not found", file),
                    )
                })?;
                log::debug!("Splicing include: {} -> {}", file, target.display());
                self.tokenize_recursive(&target, depth + 1, out)?;
            } else {
                out.push(token);
            }
        }

        self.in_flight.remove(&canonical);
        Ok(())
    }

    fn find_include(&self, base_dir: &Path, file: &str) -> Option<PathBuf> {
        std::iter::once(base_dir)
            .chain(self.include_dirs.iter().map(PathBuf::as_path))
            .map(|dir| dir.join(file))
            .find(|candidate| candidate.is_file())
    }
}
