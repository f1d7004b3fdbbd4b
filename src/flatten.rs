//! Recursive flattener: element tree → flat key/value mapping.
//!
//! Keys are dot-joined paths of tag names from the message root down to a
//! leaf value or attribute. The root's own tag is never part of any key —
//! paths start at the root's children. Repeated sibling tags are
//! disambiguated with an integer suffix: the first occurrence keeps the
//! bare tag, the second becomes `tag1`, the third `tag2`, and so on.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::element::Element;

/// Error raised when flattening produces a colliding key.
///
/// A collision means the input is malformed; merging the values silently
/// would lose data, so the whole message is rejected.
#[derive(Debug, Clone, PartialEq)]
pub enum FlattenError {
    DuplicateKey { key: String, value: String },
}

impl fmt::Display for FlattenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlattenError::DuplicateKey { key, value } => {
                write!(f, "duplicate flat key '{}' (colliding value: '{}')", key, value)
            }
        }
    }
}

impl std::error::Error for FlattenError {}

/// Flatten a message element tree into a flat, insertion-ordered mapping.
///
/// The input tree is borrowed immutably; namespace prefixes in the
/// `{namespace}name` form are stripped from tag and attribute names as they
/// are used, so trees built by hand with namespaced tags flatten the same
/// way as parsed documents.
pub fn flatten(element: &Element) -> Result<IndexMap<String, String>, FlattenError> {
    let mut output = IndexMap::new();
    flatten_into(element, &mut Vec::new(), &mut output)?;
    Ok(output)
}

fn flatten_into(
    element: &Element,
    path: &mut Vec<String>,
    output: &mut IndexMap<String, String>,
) -> Result<(), FlattenError> {
    if let Some(text) = &element.text {
        if !text.trim().is_empty() {
            insert_unique(output, path.join("."), text.clone())?;
        }
    }

    for (name, value) in &element.attributes {
        path.push(strip_namespace(name).to_string());
        insert_unique(output, path.join("."), value.clone())?;
        path.pop();
    }

    // Occurrence count per stripped tag, for duplicate-sibling suffixing.
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for child in &element.children {
        let tag = strip_namespace(&child.tag);
        let occurrence = seen.entry(tag).or_insert(0);
        let key = if *occurrence == 0 {
            tag.to_string()
        } else {
            format!("{}{}", tag, occurrence)
        };
        *occurrence += 1;

        path.push(key);
        flatten_into(child, path, output)?;
        path.pop();
    }

    Ok(())
}

fn insert_unique(
    output: &mut IndexMap<String, String>,
    key: String,
    value: String,
) -> Result<(), FlattenError> {
    if output.contains_key(&key) {
        return Err(FlattenError::DuplicateKey { key, value });
    }
    output.insert(key, value);
    Ok(())
}

/// Strip an `{namespace}` prefix from a tag or attribute name.
fn strip_namespace(name: &str) -> &str {
    if name.starts_with('{') {
        match name.find('}') {
            Some(end) => &name[end + 1..],
            None => name,
        }
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::parse_collection;

    fn first_message(xml: &str) -> Element {
        parse_collection(xml.as_bytes()).unwrap().remove(0)
    }

    #[test]
    fn test_flatten_nested_paths() {
        let message = first_message(
            r#"<c><message>
                <flight source="TH" timestamp="2019-07-02T17:52:35.323Z">
                    <enRoute><position><altitude>310</altitude></position></enRoute>
                </flight>
            </message></c>"#,
        );

        let flat = flatten(&message).unwrap();
        assert_eq!(flat.get("flight.source").map(String::as_str), Some("TH"));
        assert_eq!(
            flat.get("flight.timestamp").map(String::as_str),
            Some("2019-07-02T17:52:35.323Z")
        );
        assert_eq!(
            flat.get("flight.enRoute.position.altitude").map(String::as_str),
            Some("310")
        );
        // One entry per leaf value/attribute, nothing else.
        assert_eq!(flat.len(), 3);
    }

    #[test]
    fn test_flatten_root_tag_not_in_keys() {
        let message = first_message("<c><message><flight centre=\"ZLA\"/></message></c>");
        let flat = flatten(&message).unwrap();
        assert!(flat.contains_key("flight.centre"));
        assert!(flat.keys().all(|k| !k.starts_with("message")));
    }

    #[test]
    fn test_flatten_duplicate_siblings_suffixed_from_one() {
        let message = first_message(
            "<c><m><nameValue>a</nameValue><nameValue>b</nameValue><nameValue>c</nameValue></m></c>",
        );

        let flat = flatten(&message).unwrap();
        assert_eq!(flat.get("nameValue").map(String::as_str), Some("a"));
        assert_eq!(flat.get("nameValue1").map(String::as_str), Some("b"));
        assert_eq!(flat.get("nameValue2").map(String::as_str), Some("c"));
    }

    #[test]
    fn test_flatten_duplicate_key_is_fatal() {
        // Attribute "foo" and child element <foo> produce the same key.
        let message = first_message("<c><m foo=\"1\"><foo>2</foo></m></c>");

        let result = flatten(&message);
        assert_eq!(
            result,
            Err(FlattenError::DuplicateKey {
                key: "foo".to_string(),
                value: "2".to_string(),
            })
        );
    }

    #[test]
    fn test_flatten_suffix_collides_with_literal_tag() {
        // Siblings tag, tag, tag1: the second <tag> is suffixed to "tag1",
        // which collides with the literal <tag1> element.
        let message = first_message("<c><m><tag>a</tag><tag>b</tag><tag1>c</tag1></m></c>");
        assert!(matches!(
            flatten(&message),
            Err(FlattenError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_flatten_whitespace_text_skipped_children_visited() {
        let message = first_message("<c><m>  <child attr=\"v\">leaf</child>  </m></c>");

        let flat = flatten(&message).unwrap();
        assert_eq!(flat.get("child").map(String::as_str), Some("leaf"));
        assert_eq!(flat.get("child.attr").map(String::as_str), Some("v"));
        assert_eq!(flat.len(), 2);
    }

    #[test]
    fn test_flatten_strips_manual_namespace_prefix() {
        let mut flight = Element::new("{urn:us.gov.dot.faa.aim.fixm}flight");
        flight.text = Some("x".to_string());
        flight
            .attributes
            .push(("{urn:us.gov.dot.faa.aim.fixm}centre".to_string(), "ZLA".to_string()));

        let mut message = Element::new("message");
        message.children.push(flight);

        let flat = flatten(&message).unwrap();
        assert_eq!(flat.get("flight").map(String::as_str), Some("x"));
        assert_eq!(flat.get("flight.centre").map(String::as_str), Some("ZLA"));
    }

    #[test]
    fn test_flatten_parsed_namespace_round_trip() {
        let message = first_message(
            r#"<c xmlns:f="urn:example"><msg><f:flight f:centre="ZAB">v</f:flight></msg></c>"#,
        );

        let flat = flatten(&message).unwrap();
        assert_eq!(flat.get("flight").map(String::as_str), Some("v"));
        assert_eq!(flat.get("flight.centre").map(String::as_str), Some("ZAB"));
        assert!(!flat.keys().any(|k| k.contains("urn:example")));
    }
}
