//! JSON Pointer (RFC 6901) utilities for the patchline sync protocol.
//!
//! Patch paths travel on the wire as pointer strings. This crate converts
//! between those strings and `Vec<String>` component paths, and looks values
//! up in `serde_json` documents. Besides plain absolute pointers (`/a/x`) it
//! understands the root-relative form (`./a/x`) that branch-filtered patch
//! logs emit: the leading `.` marks the path as relative to the root of a
//! (possibly partial) mirror tree, and is otherwise ignored during lookup.
//!
//! # Example
//!
//! ```
//! use patchline_pointer::{parse_pointer, format_pointer, get};
//!
//! let path = parse_pointer("/foo/bar");
//! assert_eq!(path, vec!["foo".to_string(), "bar".to_string()]);
//! assert_eq!(format_pointer(&path), "/foo/bar");
//!
//! let doc = serde_json::json!({"foo": {"bar": 42}});
//! assert_eq!(get(&doc, &path), Some(&serde_json::json!(42)));
//! ```

use serde_json::Value;

/// A parsed pointer: one string per path component, root is the empty path.
pub type Path = Vec<String>;

/// Unescapes a pointer path component.
///
/// Per RFC 6901, `~1` is replaced with `/` and `~0` with `~`.
///
/// # Example
///
/// ```
/// use patchline_pointer::unescape_component;
///
/// assert_eq!(unescape_component("a~0b"), "a~b");
/// assert_eq!(unescape_component("c~1d"), "c/d");
/// ```
pub fn unescape_component(component: &str) -> String {
    if !component.contains('~') {
        return component.to_string();
    }
    // Order matters: ~1 must be replaced before ~0
    component.replace("~1", "/").replace("~0", "~")
}

/// Escapes a pointer path component.
///
/// Per RFC 6901, `/` is replaced with `~1` and `~` with `~0`.
pub fn escape_component(component: &str) -> String {
    if !component.contains('/') && !component.contains('~') {
        return component.to_string();
    }
    // Order matters: ~ must be escaped before /
    component.replace('~', "~0").replace('/', "~1")
}

/// Parse an absolute JSON Pointer string into path components.
///
/// The empty string is the root (empty path); otherwise the leading `/` is
/// stripped and each component unescaped.
///
/// # Example
///
/// ```
/// use patchline_pointer::parse_pointer;
///
/// assert_eq!(parse_pointer(""), Vec::<String>::new());
/// assert_eq!(parse_pointer("/foo/bar"), vec!["foo", "bar"]);
/// assert_eq!(parse_pointer("/a~0b/c~1d"), vec!["a~b", "c/d"]);
/// ```
pub fn parse_pointer(pointer: &str) -> Path {
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer[1..].split('/').map(unescape_component).collect()
}

/// Parse a pointer that may carry the root-relative `.` marker.
///
/// `./a/x` parses to the same path as `/a/x`; a bare `.` is the root.
///
/// # Example
///
/// ```
/// use patchline_pointer::parse_root_relative;
///
/// assert_eq!(parse_root_relative("/a/x"), vec!["a", "x"]);
/// assert_eq!(parse_root_relative("./a/x"), vec!["a", "x"]);
/// assert_eq!(parse_root_relative("."), Vec::<String>::new());
/// ```
pub fn parse_root_relative(pointer: &str) -> Path {
    let rest = pointer.strip_prefix('.').unwrap_or(pointer);
    parse_pointer(rest)
}

/// Format path components into an absolute pointer string.
///
/// Returns the empty string for the root path.
pub fn format_pointer(path: &[String]) -> String {
    if path.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    for component in path {
        out.push('/');
        out.push_str(&escape_component(component));
    }
    out
}

/// The first full path segment of a pointer, unescaped.
///
/// Recognizes both absolute and root-relative pointers. Returns `None` for
/// the root pointer or anything without a leading separator. Comparing the
/// returned segment for equality is how branch membership is decided:
/// `/branchName` and `/branchName/...` name the branch, `/branchNameExtra`
/// does not.
///
/// # Example
///
/// ```
/// use patchline_pointer::first_segment;
///
/// assert_eq!(first_segment("/a/x"), Some("a".to_string()));
/// assert_eq!(first_segment("./a/x"), Some("a".to_string()));
/// assert_eq!(first_segment(""), None);
/// ```
pub fn first_segment(pointer: &str) -> Option<String> {
    let rest = pointer.strip_prefix('.').unwrap_or(pointer);
    let rest = rest.strip_prefix('/')?;
    let end = rest.find('/').unwrap_or(rest.len());
    Some(unescape_component(&rest[..end]))
}

/// Get a value from a JSON document by path.
///
/// Returns `None` if the path doesn't exist or indexes a non-container.
pub fn get<'a>(val: &'a Value, path: &[String]) -> Option<&'a Value> {
    let mut current = val;
    for step in path {
        match current {
            Value::Object(map) => {
                current = map.get(step)?;
            }
            Value::Array(arr) => {
                let idx: usize = step.parse().ok()?;
                current = arr.get(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}

/// Get a mutable reference to a value in a JSON document by path.
pub fn get_mut<'a>(val: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    let mut current = val;
    for step in path {
        match current {
            Value::Object(map) => {
                current = map.get_mut(step)?;
            }
            Value::Array(arr) => {
                let idx: usize = step.parse().ok()?;
                current = arr.get_mut(idx)?;
            }
            _ => return None,
        }
    }
    Some(current)
}
