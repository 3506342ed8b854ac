//! CSV field quoting for the change feed.

use std::borrow::Cow;

/// Check if a field must be quoted.
pub fn needs_escaping(field: &str) -> bool {
    field.contains(['"', ',', '\n', ' '])
}

/// Quote a field, doubling embedded quotes.
pub fn escape(field: &str) -> String {
    let mut escaped = String::with_capacity(field.len() + 2);
    escaped.push('"');
    for c in field.chars() {
        if c == '"' {
            escaped.push('"');
        }
        escaped.push(c);
    }
    escaped.push('"');
    escaped
}

/// Quote a field only when it needs it.
pub fn escape_if_needed(field: &str) -> Cow<'_, str> {
    if needs_escaping(field) {
        Cow::Owned(escape(field))
    } else {
        Cow::Borrowed(field)
    }
}

/// Format one feed line, without the trailing newline.
pub fn format(path: &str, kind: &str) -> String {
    format!("{},{kind}", escape_if_needed(path))
}
