use quick_xml::escape::resolve_predefined_entity;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

/// The ENML body of a note could not be parsed as a document of its own.
#[derive(Debug, Error, PartialEq)]
pub enum ContentError {
    #[error("Content XML parsing failed: {0}")]
    Malformed(String),
    #[error("Content XML parsing failed: no root element")]
    NoRoot,
}

/// The five XML entities plus those ENML borrows from XHTML.
fn resolve_entity(name: &str) -> Option<&'static str> {
    if let Some(predefined) = resolve_predefined_entity(name) {
        return Some(predefined);
    }
    match name {
        "nbsp" => Some("\u{a0}"),
        "ensp" => Some("\u{2002}"),
        "emsp" => Some("\u{2003}"),
        "thinsp" => Some("\u{2009}"),
        "ndash" => Some("\u{2013}"),
        "mdash" => Some("\u{2014}"),
        "lsquo" => Some("\u{2018}"),
        "rsquo" => Some("\u{2019}"),
        "ldquo" => Some("\u{201c}"),
        "rdquo" => Some("\u{201d}"),
        "hellip" => Some("\u{2026}"),
        "bull" => Some("\u{2022}"),
        "middot" => Some("\u{b7}"),
        "copy" => Some("\u{a9}"),
        "reg" => Some("\u{ae}"),
        "trade" => Some("\u{2122}"),
        "deg" => Some("\u{b0}"),
        "euro" => Some("\u{20ac}"),
        _ => None,
    }
}

/// Parse serialized ENML and return its text nodes in document order, one per
/// line, with the whole result trimmed. An empty string is a valid result.
pub fn plain_text(markup: &str) -> Result<String, ContentError> {
    let mut reader = Reader::from_str(markup.trim());
    let mut pieces: Vec<String> = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ContentError::Malformed(e.to_string()))?;
        match event {
            Event::Start(_) => {
                if depth == 0 && seen_root {
                    return Err(ContentError::Malformed("junk after document element".into()));
                }
                seen_root = true;
                depth += 1;
            }
            Event::Empty(_) => {
                if depth == 0 {
                    if seen_root {
                        return Err(ContentError::Malformed("junk after document element".into()));
                    }
                    seen_root = true;
                }
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Text(e) => {
                let text = e
                    .unescape_with(resolve_entity)
                    .map_err(|e| ContentError::Malformed(e.to_string()))?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(ContentError::Malformed("text outside the root element".into()));
                    }
                } else {
                    pieces.push(text.into_owned());
                }
            }
            Event::CData(e) if depth > 0 => {
                let text = std::str::from_utf8(&e)
                    .map_err(|e| ContentError::Malformed(e.to_string()))?;
                pieces.push(text.to_string());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(ContentError::NoRoot);
    }
    if depth != 0 {
        return Err(ContentError::Malformed("unclosed element at end of content".into()));
    }
    Ok(pieces.join("\n").trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="no"?>
<!DOCTYPE en-note SYSTEM "http://xml.evernote.com/pub/enml2.dtd">"#;

    #[test]
    fn single_div() {
        let md = format!("{HEADER}<en-note><div>Buy milk</div></en-note>");
        assert_eq!(plain_text(&md).unwrap(), "Buy milk");
    }

    #[test]
    fn text_nodes_joined_by_newline() {
        let md = "<en-note><div>first</div><div>second <b>bold</b> tail</div></en-note>";
        assert_eq!(plain_text(md).unwrap(), "first\nsecond \nbold\n tail");
    }

    #[test]
    fn entities_resolved() {
        let md = "<en-note><div>salt&nbsp;&amp;&#32;pepper &mdash; 2&deg;</div></en-note>";
        assert_eq!(plain_text(md).unwrap(), "salt\u{a0}& pepper \u{2014} 2\u{b0}");
    }

    #[test]
    fn predefined_entities_resolved() {
        let md = "<en-note><div>if a &lt; b &amp;&amp; b &gt; c</div><div>&quot;x&quot; &apos;y&apos;</div></en-note>";
        assert_eq!(plain_text(md).unwrap(), "if a < b && b > c\n\"x\" 'y'");
    }

    #[test]
    fn whitespace_only_is_empty() {
        let md = format!("{HEADER}\n<en-note>\n   <div> </div>\n<br/></en-note>\n");
        assert_eq!(plain_text(&md).unwrap(), "");
    }

    #[test]
    fn malformed_inner_markup() {
        let err = plain_text("<en-note><div>oops</en-note>").unwrap_err();
        assert!(matches!(err, ContentError::Malformed(_)));
    }

    #[test]
    fn unclosed_inner_markup() {
        assert!(plain_text("<en-note><div>oops</div>").is_err());
    }

    #[test]
    fn plain_string_is_not_markup() {
        assert!(matches!(plain_text("just words"), Err(ContentError::Malformed(_))));
        assert_eq!(plain_text(""), Err(ContentError::NoRoot));
    }

    #[test]
    fn two_roots_rejected() {
        assert!(plain_text("<a>x</a><b>y</b>").is_err());
    }
}
