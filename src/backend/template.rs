//! Template rendering
//!
//! A small language:
//! - `{{ name }}` substitutes a variable (dotted names walk into tables)
//! - `{{#if name}} ... {{else}} ... {{/if}}` renders one branch depending on
//!   the truthiness of `name`; sections nest
//!
//! Referencing a variable that is not defined is an error, so a typo in a
//! template never renders as an empty string.

use super::Renderer;
use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use toml::{Table, Value};

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:#if\s+(?P<cond>[A-Za-z_][\w.]*)|(?P<else>else)|(?P<end>/if)|(?P<var>[A-Za-z_][\w.]*))\s*\}\}")
        .expect("template tag pattern is valid")
});

/// Problems found while parsing or rendering a template
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("line {line}: undefined variable '{name}'")]
    Undefined { name: String, line: usize },

    #[error("line {line}: '{{{{#if {name}}}}}' is never closed")]
    Unclosed { name: String, line: usize },

    #[error("line {line}: '{{{{{tag}}}}}' without a matching '{{{{#if}}}}'")]
    Unmatched { tag: &'static str, line: usize },

    #[error("line {line}: variable '{name}' is a table and cannot be rendered")]
    NotScalar { name: String, line: usize },
}

#[derive(Debug)]
enum Node {
    Text(String),
    Var { name: String, line: usize },
    If {
        name: String,
        line: usize,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

struct Section {
    name: String,
    line: usize,
    then: Vec<Node>,
    otherwise: Vec<Node>,
    in_else: bool,
}

impl Section {
    fn body(&mut self) -> &mut Vec<Node> {
        if self.in_else {
            &mut self.otherwise
        } else {
            &mut self.then
        }
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut root = Vec::new();
    let mut open: Vec<Section> = Vec::new();
    let mut last = 0;

    for caps in TAG.captures_iter(source) {
        let Some(whole) = caps.get(0) else { continue };
        let line = line_of(source, whole.start());

        let text = &source[last..whole.start()];
        last = whole.end();
        if !text.is_empty() {
            let body = match open.last_mut() {
                Some(section) => section.body(),
                None => &mut root,
            };
            body.push(Node::Text(text.to_string()));
        }

        if let Some(cond) = caps.name("cond") {
            open.push(Section {
                name: cond.as_str().to_string(),
                line,
                then: Vec::new(),
                otherwise: Vec::new(),
                in_else: false,
            });
        } else if caps.name("else").is_some() {
            match open.last_mut() {
                Some(section) if !section.in_else => section.in_else = true,
                _ => return Err(TemplateError::Unmatched { tag: "else", line }),
            }
        } else if caps.name("end").is_some() {
            let Some(section) = open.pop() else {
                return Err(TemplateError::Unmatched { tag: "/if", line });
            };
            let node = Node::If {
                name: section.name,
                line: section.line,
                then: section.then,
                otherwise: section.otherwise,
            };
            match open.last_mut() {
                Some(parent) => parent.body().push(node),
                None => root.push(node),
            }
        } else if let Some(var) = caps.name("var") {
            let node = Node::Var {
                name: var.as_str().to_string(),
                line,
            };
            match open.last_mut() {
                Some(section) => section.body().push(node),
                None => root.push(node),
            }
        }
    }

    if let Some(section) = open.pop() {
        return Err(TemplateError::Unclosed {
            name: section.name,
            line: section.line,
        });
    }

    if last < source.len() {
        root.push(Node::Text(source[last..].to_string()));
    }
    Ok(root)
}

fn lookup<'a>(vars: &'a Table, name: &str) -> Option<&'a Value> {
    let mut parts = name.split('.');
    let mut value = vars.get(parts.next()?)?;
    for part in parts {
        value = value.as_table()?.get(part)?;
    }
    Some(value)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Boolean(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::Array(items) => !items.is_empty(),
        Value::Table(table) => !table.is_empty(),
        Value::Datetime(_) => true,
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Float(f) => Some(f.to_string()),
        Value::Boolean(b) => Some(b.to_string()),
        Value::Datetime(dt) => Some(dt.to_string()),
        Value::Array(items) => items
            .iter()
            .map(scalar)
            .collect::<Option<Vec<_>>>()
            .map(|parts| parts.join(" ")),
        Value::Table(_) => None,
    }
}

fn emit(nodes: &[Node], vars: &Table, out: &mut String) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Var { name, line } => {
                let value = lookup(vars, name).ok_or_else(|| TemplateError::Undefined {
                    name: name.clone(),
                    line: *line,
                })?;
                let text = scalar(value).ok_or_else(|| TemplateError::NotScalar {
                    name: name.clone(),
                    line: *line,
                })?;
                out.push_str(&text);
            }
            Node::If {
                name,
                line,
                then,
                otherwise,
            } => {
                let value = lookup(vars, name).ok_or_else(|| TemplateError::Undefined {
                    name: name.clone(),
                    line: *line,
                })?;
                let branch = if truthy(value) { then } else { otherwise };
                emit(branch, vars, out)?;
            }
        }
    }
    Ok(())
}

/// Render template source with the given variables
pub fn render_str(source: &str, vars: &Table) -> Result<String, TemplateError> {
    let nodes = parse(source)?;
    let mut out = String::with_capacity(source.len());
    emit(&nodes, vars, &mut out)?;
    Ok(out)
}

/// Renders templates stored as files in a directory
#[derive(Debug, Clone)]
pub struct TemplateDir {
    root: PathBuf,
}

impl TemplateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Renderer for TemplateDir {
    fn render(&self, template_id: &str, variables: &Table) -> Result<Vec<u8>> {
        let path = self.root.join(template_id);
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read template {}", path.display()))?;
        let rendered = render_str(&source, variables)
            .with_context(|| format!("Failed to render template {template_id}"))?;
        Ok(rendered.into_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(source: &str) -> Table {
        toml::from_str(source).unwrap()
    }

    #[test]
    fn test_substitution() {
        let vars = vars("port = 8080\nhost = \"db.internal\"");
        assert_eq!(
            render_str("listen {{ host }}:{{port}}\n", &vars).unwrap(),
            "listen db.internal:8080\n"
        );
    }

    #[test]
    fn test_dotted_names_and_arrays() {
        let vars = vars("names = [\"git.example.com\", \"gitlab\"]\n[database]\nhost = \"localhost\"");
        assert_eq!(
            render_str("{{ database.host }} / {{ names }}", &vars).unwrap(),
            "localhost / git.example.com gitlab"
        );
    }

    #[test]
    fn test_if_else() {
        let template = "{{#if https}}listen 443 ssl;{{else}}listen 80;{{/if}}";
        assert_eq!(
            render_str(template, &vars("https = true")).unwrap(),
            "listen 443 ssl;"
        );
        assert_eq!(
            render_str(template, &vars("https = false")).unwrap(),
            "listen 80;"
        );
    }

    #[test]
    fn test_nested_sections() {
        let template = "{{#if a}}A{{#if b}}B{{/if}}{{else}}none{{/if}}";
        assert_eq!(render_str(template, &vars("a = 1\nb = \"\"")).unwrap(), "A");
        assert_eq!(render_str(template, &vars("a = 1\nb = \"y\"")).unwrap(), "AB");
        assert_eq!(render_str(template, &vars("a = 0\nb = \"y\"")).unwrap(), "none");
    }

    #[test]
    fn test_undefined_variable_is_an_error() {
        let err = render_str("a\nb {{ missing }}", &Table::new()).unwrap_err();
        assert_eq!(
            err,
            TemplateError::Undefined {
                name: "missing".to_string(),
                line: 2
            }
        );
    }

    #[test]
    fn test_undefined_in_untaken_branch_is_fine() {
        let out = render_str("{{#if on}}{{ missing }}{{/if}}ok", &vars("on = false")).unwrap();
        assert_eq!(out, "ok");
    }

    #[test]
    fn test_structure_errors() {
        assert!(matches!(
            render_str("{{#if a}}open", &vars("a = true")),
            Err(TemplateError::Unclosed { .. })
        ));
        assert!(matches!(
            render_str("{{/if}}", &Table::new()),
            Err(TemplateError::Unmatched { tag: "/if", .. })
        ));
        assert!(matches!(
            render_str("{{else}}", &Table::new()),
            Err(TemplateError::Unmatched { tag: "else", .. })
        ));
    }

    #[test]
    fn test_table_is_not_renderable() {
        let err = render_str("{{ database }}", &vars("[database]\nhost = \"x\"")).unwrap_err();
        assert!(matches!(err, TemplateError::NotScalar { .. }));
    }

    #[test]
    fn test_template_dir_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yml"), "port: {{ port }}\n").unwrap();

        let renderer = TemplateDir::new(dir.path());
        let out = renderer.render("config.yml", &vars("port = 8081")).unwrap();
        assert_eq!(out, b"port: 8081\n");

        let err = renderer.render("missing.yml", &Table::new()).unwrap_err();
        assert!(err.to_string().contains("missing.yml"));
    }
}
