//! A minimal file-system template engine.
//!
//! Templates are files under a root directory. Two tags are understood:
//!
//! - `{{ name }}` / `{{ user.name }}`: substitutes a variable. Strings are
//!   inserted verbatim, `null` and missing variables as nothing, anything else
//!   as compact JSON.
//! - `{{ include var }}` / `{{ include "path.tpl" }}`: renders another
//!   template, named either by a variable or by a quoted literal, with the same
//!   variables.
//!
//! Anything richer belongs in a real engine behind [`TemplateEngine`].

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use serde_json::Value;

use super::{RenderError, TemplateEngine, TemplateVars};

const OPEN: &str = "{{";
const CLOSE: &str = "}}";
const MAX_INCLUDE_DEPTH: usize = 16;

/// Engine reading templates from a directory.
#[derive(Debug, Clone)]
pub struct FsEngine {
    root: PathBuf,
}

impl FsEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // `None` for names escaping the root.
    fn locate(&self, template: &str) -> Option<PathBuf> {
        let relative = Path::new(template.trim_start_matches('/'));
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        (!escapes && !template.is_empty()).then(|| self.root.join(relative))
    }

    fn render_at_depth(
        &self,
        template: &str,
        vars: &TemplateVars,
        depth: usize,
        read: &mut Vec<String>,
    ) -> Result<String, RenderError> {
        if depth > MAX_INCLUDE_DEPTH {
            return Err(RenderError::IncludeDepth {
                template: template.to_owned(),
                limit: MAX_INCLUDE_DEPTH,
            });
        }

        let path = self
            .locate(template)
            .filter(|p| p.is_file())
            .ok_or_else(|| RenderError::NotFound {
                template: template.to_owned(),
                root: self.root.clone(),
            })?;

        let source = fs::read_to_string(&path).map_err(|source| RenderError::Io {
            template: template.to_owned(),
            source,
        })?;
        if !read.iter().any(|seen| seen == template) {
            read.push(template.to_owned());
        }

        let mut out = String::with_capacity(source.len());
        let mut rest = source.as_str();
        let mut offset = 0;

        while let Some(start) = rest.find(OPEN) {
            out.push_str(&rest[..start]);
            let after_open = &rest[start + OPEN.len()..];
            let end = after_open.find(CLOSE).ok_or_else(|| RenderError::Syntax {
                template: template.to_owned(),
                offset: offset + start,
                message: "unclosed tag".to_owned(),
            })?;

            let tag = after_open[..end].trim();
            match tag.strip_prefix("include ") {
                Some(target) => {
                    let target = target.trim();
                    let name = match target.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
                        Some(literal) => Some(literal.to_owned()),
                        None => lookup(vars, target).and_then(Value::as_str).map(str::to_owned),
                    };
                    if let Some(name) = name.filter(|n| !n.is_empty()) {
                        out.push_str(&self.render_at_depth(&name, vars, depth + 1, read)?);
                    }
                }
                None if tag.is_empty() => {
                    return Err(RenderError::Syntax {
                        template: template.to_owned(),
                        offset: offset + start,
                        message: "empty tag".to_owned(),
                    });
                }
                None => match lookup(vars, tag) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                },
            }

            let consumed = start + OPEN.len() + end + CLOSE.len();
            offset += consumed;
            rest = &rest[consumed..];
        }
        out.push_str(rest);

        Ok(out)
    }
}

// Dotted lookup into nested objects: `user.name`.
fn lookup<'a>(vars: &'a TemplateVars, name: &str) -> Option<&'a Value> {
    let mut parts = name.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

impl TemplateEngine for FsEngine {
    fn exists(&self, template: &str) -> bool {
        self.locate(template).is_some_and(|p| p.is_file())
    }

    fn modified(&self, template: &str) -> Option<SystemTime> {
        let path = self.locate(template)?;
        fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    fn render(&self, template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
        self.render_at_depth(template, vars, 0, &mut Vec::new())
    }

    fn render_traced(
        &self,
        template: &str,
        vars: &TemplateVars,
    ) -> Result<(String, Vec<String>), RenderError> {
        let mut read = Vec::new();
        let body = self.render_at_depth(template, vars, 0, &mut read)?;
        Ok((body, read))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn engine_with(files: &[(&str, &str)]) -> (TempDir, FsEngine) {
        let dir = tempfile::tempdir().unwrap();
        for (name, body) in files {
            let path = dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, body).unwrap();
        }
        let engine = FsEngine::new(dir.path());
        (dir, engine)
    }

    #[test]
    fn substitutes_variables() {
        let (_dir, engine) = engine_with(&[("page.tpl", "<h1>{{ title }}</h1>{{user.id}}|{{ missing }}|{{ n }}")]);
        let vars: TemplateVars = [
            ("title", json!("Guests")),
            ("user", json!({ "id": 7 })),
            ("n", json!(null)),
        ]
        .into_iter()
        .collect();

        assert_eq!(engine.render("page.tpl", &vars).unwrap(), "<h1>Guests</h1>7||");
    }

    #[test]
    fn includes_by_variable_and_literal() {
        let (_dir, engine) = engine_with(&[
            ("frame.tpl", "[{{ include mainTemplate }}]({{ include \"footer.tpl\" }})"),
            ("user/list.tpl", "list of {{ who }}"),
            ("footer.tpl", "bye"),
        ]);
        let vars: TemplateVars = [("mainTemplate", "user/list.tpl"), ("who", "guests")]
            .into_iter()
            .collect();

        assert_eq!(engine.render("frame.tpl", &vars).unwrap(), "[list of guests](bye)");

        let (_, read) = engine.render_traced("frame.tpl", &vars).unwrap();
        assert_eq!(read, ["frame.tpl", "user/list.tpl", "footer.tpl"]);
    }

    #[test]
    fn unset_include_renders_nothing() {
        let (_dir, engine) = engine_with(&[("frame.tpl", "a{{ include mainTemplate }}b")]);
        assert_eq!(engine.render("frame.tpl", &TemplateVars::new()).unwrap(), "ab");
    }

    #[test]
    fn self_include_is_bounded() {
        let (_dir, engine) = engine_with(&[("loop.tpl", "{{ include \"loop.tpl\" }}")]);
        let err = engine.render("loop.tpl", &TemplateVars::new()).unwrap_err();
        assert!(matches!(err, RenderError::IncludeDepth { .. }));
    }

    #[test]
    fn unclosed_tag_reports_offset() {
        let (_dir, engine) = engine_with(&[("bad.tpl", "abc{{ oops")]);
        match engine.render("bad.tpl", &TemplateVars::new()) {
            Err(RenderError::Syntax { offset, .. }) => assert_eq!(offset, 3),
            other => panic!("expected syntax error, got {other:?}"),
        }
    }

    #[test]
    fn existence_and_traversal() {
        let (_dir, engine) = engine_with(&[("a/b.tpl", "x")]);
        assert!(engine.exists("a/b.tpl"));
        assert!(!engine.exists("a/c.tpl"));
        assert!(!engine.exists("../etc/passwd"));
        assert!(!engine.exists("a"));
        assert!(engine.modified("a/b.tpl").is_some());
        assert!(matches!(
            engine.render("nope.tpl", &TemplateVars::new()),
            Err(RenderError::NotFound { .. })
        ));
    }
}
