//! Template naming conventions.
//!
//! A bare template name such as `"Profile"` resolves to `profile.tpl` inside a
//! controller's conventional directory. Every controller type carries an
//! ordered list of such directories, most specific first and ending at the
//! template root, so a specialised controller only has to ship the templates
//! it actually changes:
//!
//! ```text
//! lineage ["AdminUser", "Admin", ""]  →  dirs ["admin_user/", "admin/", ""]
//! "Profile"  →  admin_user/profile.tpl   (if present)
//!           →  admin/profile.tpl        (if present)
//!           →  profile.tpl
//! ```

use super::TemplateEngine;

/// File extension every template name is normalised to.
pub const TEMPLATE_EXTENSION: &str = ".tpl";

/// Joins `dir` and `name`, lowercasing the name and adding [`TEMPLATE_EXTENSION`].
///
/// ```
/// use simplectl::template::path::pathed_template_name;
///
/// assert_eq!(pathed_template_name("Profile", Some("user")), "user/profile.tpl");
/// assert_eq!(pathed_template_name("list.tpl", Some("user/")), "user/list.tpl");
/// assert_eq!(pathed_template_name("frame", None), "frame.tpl");
/// assert_eq!(pathed_template_name("", Some("user/")), "user/");
/// ```
pub fn pathed_template_name(name: &str, dir: Option<&str>) -> String {
    let mut path = dir.unwrap_or("").to_owned();

    if !path.is_empty() && !path.ends_with('/') && !name.starts_with('/') {
        path.push('/');
    }

    if !name.is_empty() {
        path.push_str(&name.to_lowercase());
        if !name.ends_with(TEMPLATE_EXTENSION) {
            path.push_str(TEMPLATE_EXTENSION);
        }
    }

    path
}

/// `AdminUser` → `admin_user`.
///
/// ```
/// use simplectl::template::path::camel_case_to_underscore;
///
/// assert_eq!(camel_case_to_underscore("AdminUser"), "admin_user");
/// assert_eq!(camel_case_to_underscore("shop"), "shop");
/// assert_eq!(camel_case_to_underscore(""), "");
/// ```
pub fn camel_case_to_underscore(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, ch) in name.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                out.push('_');
            }
            out.extend(ch.to_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Ordered fallback directories of one controller type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateDirs {
    dirs: Vec<String>,
}

impl TemplateDirs {
    /// Derives the directories from class-prefix identifiers, most derived first.
    ///
    /// The template root (`""`) is always the final entry.
    ///
    /// ```
    /// use simplectl::template::TemplateDirs;
    ///
    /// let dirs = TemplateDirs::from_lineage(["AdminUser", "Admin"]);
    /// assert_eq!(dirs.as_slice(), ["admin_user/", "admin/", ""]);
    /// ```
    pub fn from_lineage<I, S>(lineage: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dirs: Vec<String> = Vec::new();
        for prefix in lineage {
            let dir = camel_case_to_underscore(prefix.as_ref());
            let dir = if dir.is_empty() { dir } else { dir + "/" };
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        if dirs.last().is_none_or(|last| !last.is_empty()) {
            dirs.retain(|d| !d.is_empty());
            dirs.push(String::new());
        }
        Self { dirs }
    }

    pub fn as_slice(&self) -> &[String] {
        &self.dirs
    }

    /// Resolves `name` to the first directory in which the engine has it.
    ///
    /// Falls back to the template root when no directory has the file.
    pub fn conventional_path(&self, name: &str, engine: &dyn TemplateEngine) -> String {
        let mut candidate = String::new();
        for dir in &self.dirs {
            candidate = pathed_template_name(name, Some(dir));
            if engine.exists(&candidate) {
                break;
            }
        }
        candidate
    }

    /// Resolves a template reference the way page setters do.
    ///
    /// A non-empty name without `/` goes through [`conventional_path`](Self::conventional_path);
    /// anything else is only normalised.
    pub fn resolve(&self, name: &str, engine: &dyn TemplateEngine) -> String {
        if !name.is_empty() && !name.contains('/') {
            self.conventional_path(name, engine)
        } else {
            pathed_template_name(name, None)
        }
    }
}
