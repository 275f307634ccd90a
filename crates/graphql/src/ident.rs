use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VALID: Regex = Regex::new("^[_a-zA-Z][_a-zA-Z0-9]*$").unwrap();
    static ref SEPARATORS: Regex = Regex::new("[^a-zA-Z0-9]+").unwrap();
}

/// Whether `name` is usable as a GraphQL identifier as-is.
pub(crate) fn is_valid(name: &str) -> bool {
    VALID.is_match(name)
}

/// A GraphQL field name for a source JSON key. Valid identifiers pass
/// through untouched; anything else is mapped deterministically.
pub(crate) fn field_name(raw: &str) -> String {
    if is_valid(raw) {
        return raw.to_string();
    }
    camel_case(raw)
}

/// The root query field name for a source schema string: camelCase of its
/// dot-separated segments (`olm.package` becomes `olmPackage`).
pub(crate) fn root_field_name(schema: &str) -> String {
    camel_case(schema)
}

/// The object type name for a source schema string: every segment
/// title-cased and concatenated (`olm.package` becomes `OlmPackage`).
pub(crate) fn type_name(schema: &str) -> String {
    let joined: String = SEPARATORS
        .split(schema)
        .filter(|piece| !piece.is_empty())
        .map(title)
        .collect();
    prefixed_if_invalid(joined)
}

/// Title-case: first character uppercased, the rest untouched.
pub(crate) fn title(piece: &str) -> String {
    let mut chars = piece.chars();
    match chars.next() {
        None => String::new(),
        Some(first) => first.to_uppercase().chain(chars).collect(),
    }
}

fn camel_case(raw: &str) -> String {
    let mut out = String::new();
    for (i, piece) in SEPARATORS
        .split(raw)
        .filter(|piece| !piece.is_empty())
        .enumerate()
    {
        if i == 0 {
            out.push_str(&piece.to_lowercase());
        } else {
            out.push_str(&title(piece));
        }
    }
    prefixed_if_invalid(out)
}

fn prefixed_if_invalid(name: String) -> String {
    if name.is_empty() || !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        format!("field_{name}")
    } else {
        name
    }
}
