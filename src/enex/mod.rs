pub mod archive;
pub mod content;

pub use archive::load;
pub use content::{plain_text, ContentError};

/// One exported notebook file.
#[derive(Debug, Clone)]
pub struct Archive {
    /// Notebook identifier, taken from the file stem.
    pub name: String,
    /// File name as found on disk (e.g. `Personal.enex`).
    pub file_name: String,
    pub notes: Vec<NoteRecord>,
}

/// A `<note>` element with its fields still unvalidated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NoteRecord {
    pub title: Option<String>,
    /// Serialized ENML, parsed separately by [`plain_text`].
    pub raw_content: Option<String>,
    pub resources: Vec<ResourceRecord>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceRecord {
    pub mime_type: Option<String>,
    pub data_base64: Option<String>,
}
