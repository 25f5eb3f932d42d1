//! Interface description compiler
//!
//! Turns annotated C++ interface headers and hand-written JSON-RPC schema
//! documents into one resolved, de-duplicated object graph per interface,
//! ready for code and documentation emitters.
//!
//! # Basic Usage
//!
//! ```no_run
//! use jsongen::{Generator, GeneratorOptions};
//! use std::path::PathBuf;
//!
//! let mut generator = Generator::new(GeneratorOptions::default())?;
//! let report = generator.run(&[PathBuf::from("IDictionary.h")]);
//! for schema in report.schemas() {
//!     println!("{} methods", schema.methods.len());
//! }
//! # Ok::<(), jsongen::GeneratorError>(())
//! ```
//!
//! # Pipeline
//!
//! 1. **Lexer** - strips comments and preprocessor lines, turns annotation
//!    tags into tokens
//! 2. **Parser** - builds the declaration AST, instantiating class templates
//! 3. **Extractor** - converts each interface class into a schema document
//! 4. **Loader** - resolves `$ref`/`$cppref`/`@dataref` links, merges
//!    includes and normalizes shapes for the RPC format
//! 5. **Schema** - builds the typed node arena and tracks duplicate shapes

pub mod ast;
pub mod cli;
pub mod error;
pub mod expression;
pub mod extractor;
pub mod interface;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod schema;
mod template;
pub mod tracker;
pub mod types;

use std::path::{Path, PathBuf};

pub use error::{GeneratorError, Location, Result};
pub use extractor::Extractor;
pub use interface::{find_interfaces, Interface};
pub use loader::{FragmentCache, Loader};
pub use parser::{parse_files, parse_source, Parser};
pub use schema::{JsonId, JsonKind, JsonNode, JsonRpcSchema, RefTracking};
pub use tracker::TrackerContext;
pub use types::RpcFormat;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

#[derive(Debug, Clone)]
pub struct GeneratorOptions {
    /// Format used when a document does not name one.
    pub format: RpcFormat,
    /// Search path of `{interfacedir}` and relative JSON references.
    pub include_dirs: Vec<PathBuf>,
    /// Search path of `{cppinterfacedir}`, header references and
    /// `@stubgen:include`.
    pub cpp_include_dirs: Vec<PathBuf>,
    /// Headers parsed ahead of every C++ input.
    pub extra_headers: Vec<PathBuf>,
    /// Enforce error-code return types and explicit parameter directions.
    pub verify: bool,
    /// Convert interfaces that lack a `@json` tag too.
    pub all_interfaces: bool,
    pub root_interface: String,
    pub error_code_types: Vec<String>,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            format: RpcFormat::default(),
            include_dirs: Vec::new(),
            cpp_include_dirs: Vec::new(),
            extra_headers: Vec::new(),
            verify: true,
            all_interfaces: false,
            root_interface: types::ROOT_INTERFACE.to_string(),
            error_code_types: types::ERROR_CODE_TYPES.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// State of processing one input file.
#[derive(Debug)]
pub struct FileContext {
    pub path: PathBuf,
    pub trackers: TrackerContext,
    pub warnings: Vec<String>,
}

impl FileContext {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            trackers: TrackerContext::new(),
            warnings: Vec::new(),
        }
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}: {}", self.path.display(), message);
        self.warnings.push(message);
    }

    /// Missing or inconsistent documentation.
    pub fn doc_issue(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!(target: "jsongen::doc", "{}: {}", self.path.display(), message);
        self.warnings.push(format!("documentation: {}", message));
    }
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub outcome: Result<Vec<JsonRpcSchema>>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RunReport {
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn error_count(&self) -> usize {
        self.files.iter().filter(|f| f.outcome.is_err()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.files.iter().map(|f| f.warnings.len()).sum()
    }

    /// Every schema built successfully, in input order.
    pub fn schemas(&self) -> impl Iterator<Item = &JsonRpcSchema> {
        self.files.iter().filter_map(|f| f.outcome.as_ref().ok()).flatten()
    }
}

/// Runs the pipeline over input files. Header fragments converted for
/// `$ref`s are shared by all files and removed when the generator is dropped.
pub struct Generator {
    options: GeneratorOptions,
    fragments: FragmentCache,
}

impl Generator {
    pub fn new(options: GeneratorOptions) -> Result<Self> {
        Ok(Self {
            options,
            fragments: FragmentCache::new()?,
        })
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Processes every input in turn. A failing file is reported and the
    /// run continues with the next one.
    pub fn run(&mut self, inputs: &[PathBuf]) -> RunReport {
        let mut report = RunReport::default();
        for path in inputs {
            log::info!("Processing {}", path.display());
            let mut ctx = FileContext::new(path);
            let outcome = self.process_file(path, &mut ctx);
            match &outcome {
                Ok(schemas) => log::info!("{}: {} interface(s)", path.display(), schemas.len()),
                Err(e) => log::error!("{}: {} error: {}", path.display(), e.kind(), e),
            }
            report.files.push(FileReport {
                path: path.clone(),
                outcome,
                warnings: ctx.warnings,
            });
        }
        report
    }

    pub fn process_file(
        &mut self,
        path: &Path,
        ctx: &mut FileContext,
    ) -> Result<Vec<JsonRpcSchema>> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                let document = Loader::new(&self.options, &mut self.fragments).load(path)?;
                Ok(vec![JsonRpcSchema::build(&document, path, ctx)?])
            }
            Some("h" | "hpp" | "hxx") => self.process_header(path, ctx),
            _ => Err(GeneratorError::InvalidFormat {
                message: format!("unsupported input '{}'", path.display()),
            }),
        }
    }

    fn process_header(&mut self, path: &Path, ctx: &mut FileContext) -> Result<Vec<JsonRpcSchema>> {
        let mut files = self.options.extra_headers.clone();
        files.push(path.to_path_buf());
        let ast = parse_files(&files, &self.options.cpp_include_dirs)?;
        let file = path.to_string_lossy().to_string();

        let mut schemas = Vec::new();
        for interface in find_interfaces(&ast, Some(&file), &self.options.root_interface) {
            let Some(class) = ast.class(interface.class) else {
                continue;
            };
            let name = ast.full_name(interface.class);
            if class.flags.omit || class.flags.json_omit {
                log::debug!("Skipping omitted interface {}", name);
                continue;
            }
            if !class.flags.json && !self.options.all_interfaces {
                log::debug!("Skipping {}: no @json tag", name);
                continue;
            }
            let document = Extractor::new(&ast, &self.options).extract(&interface, ctx)?;
            let document = Loader::new(&self.options, &mut self.fragments).resolve(document, path)?;
            schemas.push(JsonRpcSchema::build(&document, path, ctx)?);
        }
        if schemas.is_empty() {
            log::info!("{}: no JSON-RPC interfaces", path.display());
        }
        Ok(schemas)
    }
}
