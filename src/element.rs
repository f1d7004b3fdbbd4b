//! Owned XML element model and message-collection parsing.
//!
//! FIXM deliveries arrive as one XML message collection per broker delivery.
//! The intake parses the payload once and hands each child message to the
//! pipeline as an owned tree, so messages can cross the worker channel
//! without borrowing the delivery buffer.

use std::fmt;
use std::str;

/// A single XML element: tag, optional text, attributes, and child elements.
///
/// Tag and attribute names are stored as local names — namespace prefixes
/// are dropped during conversion from the parsed document.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub text: Option<String>,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    /// Create an element with no text, attributes, or children.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            text: None,
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Convert a parsed document node into an owned element tree.
    fn from_node(node: roxmltree::Node) -> Self {
        let text = node
            .children()
            .find(|n| n.is_text())
            .and_then(|n| n.text())
            .map(|t| t.to_string());

        let attributes = node
            .attributes()
            .map(|a| (a.name().to_string(), a.value().to_string()))
            .collect();

        let children = node
            .children()
            .filter(|n| n.is_element())
            .map(Element::from_node)
            .collect();

        Self {
            tag: node.tag_name().name().to_string(),
            text,
            attributes,
            children,
        }
    }
}

/// Error raised when a delivery payload cannot be parsed as a message
/// collection. The whole delivery is dropped; nothing is enqueued.
#[derive(Debug)]
pub enum ParseError {
    /// Payload bytes are not valid UTF-8.
    Encoding(str::Utf8Error),
    /// Payload is not well-formed XML.
    Xml(roxmltree::Error),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Encoding(err) => write!(f, "payload is not valid UTF-8: {}", err),
            ParseError::Xml(err) => write!(f, "payload is not well-formed XML: {}", err),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parse a delivery payload as an XML message collection and return its
/// immediate child messages as owned element trees.
///
/// The collection root itself is discarded — only its element children are
/// messages. An empty collection parses to an empty vector.
pub fn parse_collection(payload: &[u8]) -> Result<Vec<Element>, ParseError> {
    let text = str::from_utf8(payload).map_err(ParseError::Encoding)?;
    let document = roxmltree::Document::parse(text).map_err(ParseError::Xml)?;

    Ok(document
        .root_element()
        .children()
        .filter(|n| n.is_element())
        .map(Element::from_node)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection_splits_messages() {
        let payload = br#"<collection>
            <message><flight source="TH"/></message>
            <message><flight source="HP"/></message>
        </collection>"#;

        let messages = parse_collection(payload).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].tag, "message");
        assert_eq!(messages[0].children[0].tag, "flight");
        assert_eq!(
            messages[0].children[0].attributes,
            vec![("source".to_string(), "TH".to_string())]
        );
    }

    #[test]
    fn test_parse_collection_strips_namespaces() {
        let payload = br#"<ns:collection xmlns:ns="urn:example">
            <ns:message><ns:flight/></ns:message>
        </ns:collection>"#;

        let messages = parse_collection(payload).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].tag, "message");
        assert_eq!(messages[0].children[0].tag, "flight");
    }

    #[test]
    fn test_parse_collection_empty() {
        let messages = parse_collection(b"<collection/>").unwrap();
        assert!(messages.is_empty());
    }

    #[test]
    fn test_parse_collection_malformed_xml() {
        let result = parse_collection(b"<collection><message></collection>");
        assert!(matches!(result, Err(ParseError::Xml(_))));
    }

    #[test]
    fn test_parse_collection_invalid_utf8() {
        let result = parse_collection(&[0x3c, 0xff, 0xfe]);
        assert!(matches!(result, Err(ParseError::Encoding(_))));
    }

    #[test]
    fn test_element_text_and_attributes() {
        let payload = b"<c><m altitude=\"310\">  <pos>33.6 -112.1</pos></m></c>";
        let messages = parse_collection(payload).unwrap();

        let message = &messages[0];
        assert_eq!(
            message.attributes,
            vec![("altitude".to_string(), "310".to_string())]
        );
        // Whitespace-only text is preserved here; the flattener skips it.
        assert_eq!(message.text.as_deref(), Some("  "));
        assert_eq!(message.children[0].text.as_deref(), Some("33.6 -112.1"));
    }
}
