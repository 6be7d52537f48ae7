use std::fs;
use std::path::Path;

use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;
use tracing::debug;

use super::{Archive, NoteRecord, ResourceRecord};

/// Failure to read an archive as a whole. The run records it once and moves on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{archive}: cannot read archive: {source}")]
    Io {
        archive: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{archive}: malformed XML at byte {position}: {message}")]
    Xml {
        archive: String,
        position: u64,
        message: String,
    },
    #[error("{archive}: document has no root element")]
    NoRoot { archive: String },
}

impl ParseError {
    pub fn archive(&self) -> &str {
        match self {
            ParseError::Io { archive, .. }
            | ParseError::Xml { archive, .. }
            | ParseError::NoRoot { archive } => archive,
        }
    }
}

/// Which text-bearing field the reader is currently inside.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Slot {
    Title,
    Content,
    Mime,
    Data,
}

/// Read an ENEX file and collect every `<note>` directly under the root element.
pub fn load(path: &Path) -> Result<Archive, ParseError> {
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let xml = fs::read_to_string(path).map_err(|source| ParseError::Io {
        archive: name.clone(),
        source,
    })?;

    let notes = parse_notes(&xml).map_err(|e| e.with_archive(&name))?;
    debug!(notebook = %name, notes = notes.len(), "archive parsed");

    Ok(Archive {
        name,
        file_name,
        notes,
    })
}

/// Archive-agnostic parse error, tagged with the archive name by [`load`].
#[derive(Debug)]
struct RawError {
    position: u64,
    message: String,
    no_root: bool,
}

impl RawError {
    fn with_archive(self, archive: &str) -> ParseError {
        if self.no_root {
            ParseError::NoRoot {
                archive: archive.to_string(),
            }
        } else {
            ParseError::Xml {
                archive: archive.to_string(),
                position: self.position,
                message: self.message,
            }
        }
    }
}

fn parse_notes(xml: &str) -> Result<Vec<NoteRecord>, RawError> {
    let mut reader = Reader::from_str(xml);
    let fail = |reader: &Reader<&[u8]>, message: String| RawError {
        position: reader.buffer_position() as u64,
        message,
        no_root: false,
    };

    let mut notes = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut note: Option<NoteRecord> = None;
    let mut resource: Option<ResourceRecord> = None;
    let mut slot: Option<(Slot, usize)> = None;

    loop {
        let event = match reader.read_event() {
            Ok(ev) => ev,
            Err(e) => return Err(fail(&reader, e.to_string())),
        };

        match event {
            Event::Start(e) => {
                if depth == 0 && seen_root {
                    return Err(fail(&reader, "more than one root element".into()));
                }
                depth += 1;
                seen_root = true;
                match (depth, e.local_name().as_ref()) {
                    (2, b"note") => note = Some(NoteRecord::default()),
                    (3, b"resource") if note.is_some() => resource = Some(ResourceRecord::default()),
                    (3, b"title") if note.is_some() => {
                        open_slot(note.as_mut(), resource.as_mut(), Slot::Title);
                        slot = Some((Slot::Title, depth));
                    }
                    (3, b"content") if note.is_some() => {
                        open_slot(note.as_mut(), resource.as_mut(), Slot::Content);
                        slot = Some((Slot::Content, depth));
                    }
                    (4, b"mime") if resource.is_some() => {
                        open_slot(note.as_mut(), resource.as_mut(), Slot::Mime);
                        slot = Some((Slot::Mime, depth));
                    }
                    (4, b"data") if resource.is_some() => {
                        open_slot(note.as_mut(), resource.as_mut(), Slot::Data);
                        slot = Some((Slot::Data, depth));
                    }
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if depth == 0 {
                    if seen_root {
                        return Err(fail(&reader, "more than one root element".into()));
                    }
                    seen_root = true;
                    continue;
                }
                // Self-closing elements sit one level below the current depth.
                match (depth + 1, e.local_name().as_ref()) {
                    (2, b"note") => notes.push(NoteRecord::default()),
                    (3, b"resource") => {
                        if let Some(n) = note.as_mut() {
                            n.resources.push(ResourceRecord::default());
                        }
                    }
                    (3, b"title") => open_slot(note.as_mut(), None, Slot::Title),
                    (3, b"content") => open_slot(note.as_mut(), None, Slot::Content),
                    (4, b"mime") => open_slot(None, resource.as_mut(), Slot::Mime),
                    (4, b"data") => open_slot(None, resource.as_mut(), Slot::Data),
                    _ => {}
                }
            }
            Event::End(e) => {
                match (depth, e.local_name().as_ref()) {
                    (2, b"note") => {
                        if let Some(n) = note.take() {
                            notes.push(n);
                        }
                    }
                    (3, b"resource") => {
                        if let (Some(n), Some(r)) = (note.as_mut(), resource.take()) {
                            n.resources.push(r);
                        }
                    }
                    _ => {}
                }
                if matches!(slot, Some((_, d)) if d == depth) {
                    slot = None;
                }
                depth = depth.saturating_sub(1);
            }
            Event::Text(e) => {
                let text = e
                    .unescape()
                    .map_err(|err| fail(&reader, err.to_string()))?;
                if depth == 0 {
                    if !text.trim().is_empty() {
                        return Err(fail(&reader, "text outside the root element".into()));
                    }
                    continue;
                }
                if let Some((field, d)) = slot {
                    if d == depth {
                        append(note.as_mut(), resource.as_mut(), field, &text);
                    }
                }
            }
            Event::CData(e) => {
                if let Some((field, d)) = slot {
                    if d == depth {
                        let text = std::str::from_utf8(&e)
                            .map_err(|err| fail(&reader, err.to_string()))?;
                        append(note.as_mut(), resource.as_mut(), field, text);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(RawError {
            position: 0,
            message: String::new(),
            no_root: true,
        });
    }
    if depth != 0 {
        return Err(fail(
            &reader,
            format!("unexpected end of document, {depth} element(s) left open"),
        ));
    }
    Ok(notes)
}

/// Mark a field as present even before any text arrives, so `<data></data>`
/// reads as empty rather than missing.
fn open_slot(note: Option<&mut NoteRecord>, resource: Option<&mut ResourceRecord>, field: Slot) {
    let target = match field {
        Slot::Title => note.map(|n| &mut n.title),
        Slot::Content => note.map(|n| &mut n.raw_content),
        Slot::Mime => resource.map(|r| &mut r.mime_type),
        Slot::Data => resource.map(|r| &mut r.data_base64),
    };
    if let Some(value) = target {
        value.get_or_insert_with(String::new);
    }
}

fn append(
    note: Option<&mut NoteRecord>,
    resource: Option<&mut ResourceRecord>,
    field: Slot,
    text: &str,
) {
    let target = match field {
        Slot::Title => note.map(|n| &mut n.title),
        Slot::Content => note.map(|n| &mut n.raw_content),
        Slot::Mime => resource.map(|r| &mut r.mime_type),
        Slot::Data => resource.map(|r| &mut r.data_base64),
    };
    if let Some(value) = target {
        value.get_or_insert_with(String::new).push_str(text);
    }
}
