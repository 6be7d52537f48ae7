use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use thiserror::Error;

use crate::enex::{self, ContentError, NoteRecord, ResourceRecord};
use crate::layout;

/// Why a note's text produced no file.
#[derive(Debug, Error, PartialEq)]
pub enum NoteError {
    #[error("Note has no content")]
    MissingContent,
    #[error(transparent)]
    Content(#[from] ContentError),
    #[error("Note content is empty")]
    EmptyContent,
}

/// Why one attachment produced no file. The note itself carries on.
#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    #[error("Missing mime type or resource data")]
    MissingField,
    #[error("Base64 decoding failed: {0}")]
    Decode(#[from] base64::DecodeError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct NormalizedNote {
    /// Title as written in the archive, used in log entries.
    pub title: String,
    /// Filesystem-safe form of the title.
    pub file_stem: String,
    /// `None` when there is no text worth recording: a note carried only by
    /// its attachments.
    pub text: Option<Result<String, NoteError>>,
    pub resources: Vec<Result<Attachment, ResourceError>>,
}

/// Validate one note record. Returns `None` for untitled notes, which are
/// skipped without a trace.
pub fn normalize(record: &NoteRecord) -> Option<NormalizedNote> {
    let title = record.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    let resources: Vec<_> = record.resources.iter().map(decode_resource).collect();

    let text = match record.raw_content.as_deref().map(str::trim) {
        None | Some("") => Err(NoteError::MissingContent),
        Some(markup) => enex::plain_text(markup)
            .map_err(NoteError::from)
            .and_then(|text| {
                if text.is_empty() {
                    Err(NoteError::EmptyContent)
                } else {
                    Ok(text)
                }
            }),
    };
    let text = match text {
        Err(NoteError::MissingContent | NoteError::EmptyContent) if !resources.is_empty() => None,
        other => Some(other),
    };

    Some(NormalizedNote {
        title: title.to_string(),
        file_stem: layout::sanitize_component(title),
        text,
        resources,
    })
}

fn decode_resource(record: &ResourceRecord) -> Result<Attachment, ResourceError> {
    let mime_type = record
        .mime_type
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .ok_or(ResourceError::MissingField)?;
    let encoded = record
        .data_base64
        .as_deref()
        .filter(|d| !d.trim().is_empty())
        .ok_or(ResourceError::MissingField)?;

    Ok(Attachment {
        mime_type: mime_type.to_string(),
        data: decode_base64(encoded)?,
    })
}

/// ENEX wraps base64 at a fixed column; strip the line breaks before decoding.
pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64.decode(compact)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(title: Option<&str>, content: Option<&str>, resources: Vec<ResourceRecord>) -> NoteRecord {
        NoteRecord {
            title: title.map(String::from),
            raw_content: content.map(String::from),
            resources,
        }
    }

    fn resource(mime: Option<&str>, data: Option<&str>) -> ResourceRecord {
        ResourceRecord {
            mime_type: mime.map(String::from),
            data_base64: data.map(String::from),
        }
    }

    #[test]
    fn untitled_notes_skipped() {
        let body = Some("<en-note>text</en-note>");
        assert!(normalize(&note(None, body, vec![])).is_none());
        assert!(normalize(&note(Some(""), body, vec![])).is_none());
        assert!(normalize(&note(Some("   "), body, vec![])).is_none());
    }

    #[test]
    fn text_note() {
        let n = normalize(&note(Some("A/B//C"), Some("<en-note><div>Buy milk</div></en-note>"), vec![]))
            .unwrap();
        assert_eq!(n.title, "A/B//C");
        assert_eq!(n.file_stem, "A-B-C");
        assert_eq!(n.text, Some(Ok("Buy milk".to_string())));
        assert!(n.resources.is_empty());
    }

    #[test]
    fn empty_and_missing_content() {
        let n = normalize(&note(Some("Blank"), Some("<en-note> \n </en-note>"), vec![])).unwrap();
        assert_eq!(n.text, Some(Err(NoteError::EmptyContent)));
        assert_eq!(n.text.unwrap().unwrap_err().to_string(), "Note content is empty");

        let n = normalize(&note(Some("None"), None, vec![])).unwrap();
        assert_eq!(n.text, Some(Err(NoteError::MissingContent)));
    }

    #[test]
    fn malformed_content_is_note_failure() {
        let n = normalize(&note(Some("Bad"), Some("<en-note><div></en-note>"), vec![])).unwrap();
        assert!(matches!(n.text, Some(Err(NoteError::Content(_)))));
    }

    #[test]
    fn attachment_only_note_has_no_text_entry() {
        let n = normalize(&note(
            Some("Photo"),
            Some("<en-note><en-media hash=\"x\" type=\"image/png\"/></en-note>"),
            vec![resource(Some("image/png"), Some("aGVsbG8gd29ybGQ="))],
        ))
        .unwrap();
        assert!(n.text.is_none());
        assert_eq!(
            n.resources,
            vec![Ok(Attachment {
                mime_type: "image/png".into(),
                data: b"hello world".to_vec(),
            })]
        );
    }

    #[test]
    fn resource_failures_are_isolated() {
        let n = normalize(&note(
            Some("Mixed"),
            Some("<en-note>caption</en-note>"),
            vec![
                resource(None, Some("aGVsbG8=")),
                resource(Some("image/png"), Some("")),
                resource(Some("image/png"), Some("not base64!!")),
                resource(Some("image/gif"), Some("aGVs\nbG8=\n")),
            ],
        ))
        .unwrap();
        assert_eq!(n.text, Some(Ok("caption".to_string())));
        assert_eq!(n.resources[0], Err(ResourceError::MissingField));
        assert_eq!(n.resources[1], Err(ResourceError::MissingField));
        assert!(matches!(n.resources[2], Err(ResourceError::Decode(_))));
        assert_eq!(n.resources[3].as_ref().unwrap().data, b"hello");
    }
}
