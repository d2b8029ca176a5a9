//! Path templates: `<%Y>/<%m-%b>-<city>` → `2015/06-Jun-California`.
//!
//! A template is literal text interleaved with `<...>` groups. Parsing
//! happens once per distinct template string and produces an immutable AST
//! ([`Node`]); rendering is a pure function of that AST, the file's
//! metadata snapshot and its source info. Dry runs and real runs go through
//! the same [`PathFormat::render`], which is what makes previews exact.
//!
//! ## Grammar
//!
//! ```text
//! template    := (literal | modified | group)*
//! modified    := ('%u' | '%l') group
//! group       := '<' alternative ('|' alternative)* '>'
//! alternative := sub-template             (contains '<')
//!              | ('%u' | '%l')? field slice?
//! field       := '%' strftime | '"' text '"' | name
//! slice       := '[' int? (':' int?)? ']'
//! ```
//!
//! A group with several alternatives renders the first one whose
//! placeholders all resolve non-empty (`<city|folder>`), otherwise nothing.
//! An inline `%u`/`%l` only counts as a case modifier when a field name or
//! quote follows it; `<%l%p>` stays a strftime format.
//!
//! Any syntax problem is reported with its char position before a single
//! file is touched.

mod parser;
mod render;
mod sanitize;

pub use parser::{Case, Field, Node, Placeholder, Slice};
pub use render::RenderContext;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("syntax error at position {position}: {message}")]
    Syntax { position: usize, message: String },
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    nodes: Vec<Node>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            source: source.to_string(),
            nodes: parser::parse(source)?,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render without segment cleanup.
    pub fn render(&self, ctx: &RenderContext<'_>) -> String {
        render::render_nodes(&self.nodes, ctx, true)
    }

    /// Whether any placeholder, at any depth, reads `field`.
    pub fn references(&self, field: &Field) -> bool {
        fn walk(nodes: &[Node], field: &Field) -> bool {
            nodes.iter().any(|node| match node {
                Node::Placeholder(p) => &p.field == field,
                Node::Fallback(branches) => branches.iter().any(|b| walk(b, field)),
                Node::Literal(_) => false,
            })
        }
        walk(&self.nodes, field)
    }
}

/// Directory and filename templates of a collection layout.
#[derive(Debug, Clone)]
pub struct PathFormat {
    dirs: Arc<Template>,
    name: Arc<Template>,
}

impl PathFormat {
    pub fn new(dirs: &str, name: &str) -> Result<Self, TemplateError> {
        Ok(Self {
            dirs: Arc::new(Template::parse(dirs)?),
            name: Arc::new(Template::parse(name)?),
        })
    }

    fn from_parts(dirs: Arc<Template>, name: Arc<Template>) -> Self {
        Self { dirs, name }
    }

    /// Render the destination, relative to the collection root.
    ///
    /// Empty directory segments disappear. The source extension is appended
    /// unless the name template uses `<ext>`, and a name that renders empty
    /// or hidden falls back to the original filename.
    pub fn render(&self, ctx: &RenderContext<'_>) -> PathBuf {
        let mut segments: Vec<String> = self
            .dirs
            .render(ctx)
            .split('/')
            .filter_map(sanitize::clean_dir_segment)
            .collect();

        let rendered_name = self.name.render(ctx);
        let mut name_parts: Vec<&str> = rendered_name.split('/').collect();
        let last = name_parts.pop().unwrap_or_default();
        segments.extend(name_parts.into_iter().filter_map(sanitize::clean_dir_segment));

        let mut name = sanitize::clean_file_name(last);
        if !name.is_empty() && !self.name.references(&Field::Ext) {
            let ext = crate::naming::parse_filename(&ctx.source.filename).extension;
            if !ext.is_empty() {
                name = format!("{name}.{ext}");
            }
        }
        if name.is_empty() || name.starts_with('.') {
            name = sanitize::sanitize_value(&ctx.source.filename, ctx.whitespace_sub);
        }

        let mut path: PathBuf = segments.iter().collect();
        path.push(name);
        path
    }
}

/// Parses each distinct template string once.
#[derive(Default)]
pub struct TemplateEngine {
    cache: Mutex<HashMap<String, Arc<Template>>>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(&self, source: &str) -> Result<Arc<Template>, TemplateError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(template) = cache.get(source) {
            return Ok(Arc::clone(template));
        }
        let template = Arc::new(Template::parse(source)?);
        cache.insert(source.to_string(), Arc::clone(&template));
        Ok(template)
    }

    pub fn path_format(&self, dirs: &str, name: &str) -> Result<PathFormat, TemplateError> {
        Ok(PathFormat::from_parts(self.template(dirs)?, self.template(name)?))
    }
}
