use std::str::FromStr;

use minidom::Element;

use crate::error::StanzaError;
use crate::ns;

/// Parse one serialized top-level stanza.
pub fn parse_stanza(raw: &[u8]) -> Result<Element, StanzaError> {
    let xml = std::str::from_utf8(raw)
        .map_err(|error| StanzaError::ParseFailed(format!("invalid UTF-8 stanza bytes: {error}")))?;
    let trimmed = xml.trim();
    if trimmed.is_empty() {
        return Err(StanzaError::ParseFailed(
            "stanza payload is empty".to_string(),
        ));
    }

    Element::from_str(trimmed)
        .map_err(|error| StanzaError::ParseFailed(format!("failed to parse stanza XML: {error}")))
}

pub fn serialize_stanza(element: &Element) -> Result<Vec<u8>, StanzaError> {
    let mut payload = Vec::new();
    element.write_to(&mut payload).map_err(|error| {
        StanzaError::ParseFailed(format!(
            "failed to serialize <{}/> stanza: {error}",
            element.name()
        ))
    })?;
    Ok(payload)
}

/// `<stream:error/>` ends the session; returns its condition when `element` is one.
pub fn stream_error_condition(element: &Element) -> Option<String> {
    if !element.is("error", ns::STREAM) {
        return None;
    }
    let condition = element
        .children()
        .find(|child| child.name() != "text")
        .map(|child| child.name().to_string())
        .unwrap_or_else(|| "undefined-condition".to_string());
    Some(condition)
}
