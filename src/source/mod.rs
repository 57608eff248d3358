//! Reading locale files from a checkout.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::overlay::filename_pattern;
use crate::types::Content;

pub const DEFAULT_PATTERN: &str = "**/*.{json,yaml,yml}";

/// A locale file found under a checkout root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// Path relative to the root, always with `/` separators.
    pub filename: String,
    pub language: String,
}

/// Parses a JSON or YAML locale file into a flat key map.
///
/// Nested objects become dotted keys (`{"nav": {"home": "Home"}}` is `nav.home`). Numbers
/// and booleans are kept as their text form; arrays and nulls are dropped.
pub fn parse_locale(path: &Path, bytes: &[u8]) -> Result<Content> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);

    let root: Value = match extension.as_deref() {
        Some("json") => serde_json::from_slice(bytes)?,
        Some("yaml" | "yml") => serde_yaml::from_slice(bytes)
            .map_err(|e| Error::BadRequest(format!("{}: {e}", path.display())))?,
        _ => {
            return Err(Error::BadRequest(format!(
                "unsupported locale file: {}",
                path.display()
            )));
        }
    };

    let Value::Object(map) = root else {
        return Err(Error::BadRequest(format!(
            "{}: top level must be an object",
            path.display()
        )));
    };

    let mut content = Content::new();
    for (key, value) in map {
        flatten(&key, value, &mut content);
    }
    Ok(content)
}

fn flatten(prefix: &str, value: Value, out: &mut Content) {
    match value {
        Value::String(s) => {
            out.insert(prefix.to_string(), s);
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Object(map) => {
            for (key, nested) in map {
                flatten(&format!("{prefix}.{key}"), nested, out);
            }
        }
        Value::Array(_) | Value::Null => {}
    }
}

/// Detects which of `languages` a relative path belongs to. The longest matching code
/// wins, so `pt-BR` beats `pt`.
#[must_use]
pub fn detect_language<'l>(filename: &str, languages: &'l [String]) -> Option<&'l str> {
    languages
        .iter()
        .filter(|lang| filename_pattern(filename, lang).is_some())
        .max_by_key(|lang| lang.len())
        .map(String::as_str)
}

/// Finds locale files under `root` matching a glob `pattern` and tags each with its
/// language. Files that belong to none of `languages` are skipped.
pub fn discover(root: &Path, pattern: &str, languages: &[String]) -> Result<Vec<DiscoveredFile>> {
    // The root is literal; only the caller's pattern may contain wildcards.
    let base = glob::Pattern::escape(&root.to_string_lossy());
    let base = base.trim_end_matches('/');

    let mut files = Vec::new();
    for entry in expand_braces(pattern.trim_start_matches('/')) {
        let entry = format!("{base}/{entry}");
        let paths =
            glob::glob(&entry).map_err(|e| Error::Config(format!("bad pattern {pattern}: {e}")))?;
        for path in paths {
            let path = path.map_err(|e| Error::Io(e.into_error()))?;
            if !path.is_file() {
                continue;
            }
            let Ok(relative) = path.strip_prefix(root) else {
                continue;
            };
            let filename = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            match detect_language(&filename, languages) {
                Some(language) => files.push(DiscoveredFile {
                    language: language.to_string(),
                    filename,
                    path,
                }),
                None => debug!("Skipping {filename}: no known language in path"),
            }
        }
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    files.dedup_by(|a, b| a.filename == b.filename);
    if files.is_empty() {
        warn!("No locale files matched {pattern} under {}", root.display());
    }
    Ok(files)
}

/// `glob` has no brace alternation; expands a single `{a,b}` group.
fn expand_braces(pattern: &str) -> Vec<String> {
    let (Some(open), Some(close)) = (pattern.find('{'), pattern.find('}')) else {
        return vec![pattern.to_string()];
    };
    if close < open {
        return vec![pattern.to_string()];
    }
    pattern[open + 1..close]
        .split(',')
        .map(|alt| format!("{}{alt}{}", &pattern[..open], &pattern[close + 1..]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn langs(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_parse_nested_json() {
        let content = parse_locale(
            Path::new("en.json"),
            br#"{"welcome": "Hello", "nav": {"home": "Home", "count": 3, "on": true}, "list": [1], "gone": null}"#,
        )
        .unwrap();

        assert_eq!(content.len(), 4);
        assert_eq!(content["welcome"], "Hello");
        assert_eq!(content["nav.home"], "Home");
        assert_eq!(content["nav.count"], "3");
        assert_eq!(content["nav.on"], "true");
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = b"welcome: Hello\nnav:\n  home: Home\n";
        let content = parse_locale(Path::new("locales/en.yml"), yaml).unwrap();
        assert_eq!(content["welcome"], "Hello");
        assert_eq!(content["nav.home"], "Home");
    }

    #[test]
    fn test_parse_rejects_non_object() {
        assert!(matches!(
            parse_locale(Path::new("en.json"), b"[\"a\"]"),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            parse_locale(Path::new("en.txt"), b"a=b"),
            Err(Error::BadRequest(_))
        ));
        assert!(matches!(
            parse_locale(Path::new("en.json"), b"{"),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_detect_language() {
        let languages = langs(&["en", "pt", "pt-BR"]);
        assert_eq!(detect_language("locales/en/common.json", &languages), Some("en"));
        assert_eq!(detect_language("pt-BR.json", &languages), Some("pt-BR"));
        assert_eq!(detect_language("pt.json", &languages), Some("pt"));
        assert_eq!(detect_language("content.json", &languages), None);
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(
            expand_braces("a/*.{json,yml}"),
            vec!["a/*.json".to_string(), "a/*.yml".to_string()]
        );
        assert_eq!(expand_braces("a/*.json"), vec!["a/*.json".to_string()]);
    }

    #[test]
    fn test_discover_escapes_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("checkout [v2]*{a,b}");
        fs::create_dir_all(root.join("locales")).unwrap();
        fs::write(root.join("locales/en.json"), "{}").unwrap();
        fs::write(root.join("locales/fr.json"), "{}").unwrap();

        let files = discover(&root, DEFAULT_PATTERN, &langs(&["en", "fr"])).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.filename.as_str()).collect();
        assert_eq!(names, vec!["locales/en.json", "locales/fr.json"]);
    }

    #[test]
    fn test_discover() {
        let temp = TempDir::new().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("locales/en")).unwrap();
        fs::create_dir_all(root.join("locales/fr")).unwrap();
        fs::write(root.join("locales/en/common.json"), "{}").unwrap();
        fs::write(root.join("locales/fr/common.json"), "{}").unwrap();
        fs::write(root.join("locales/fr/nav.yml"), "a: b").unwrap();
        fs::write(root.join("package.json"), "{}").unwrap();

        let files = discover(root, DEFAULT_PATTERN, &langs(&["en", "fr"])).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|f| (f.language.as_str(), f.filename.as_str()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("en", "locales/en/common.json"),
                ("fr", "locales/fr/common.json"),
                ("fr", "locales/fr/nav.yml"),
            ]
        );
    }
}
