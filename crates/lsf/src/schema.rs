//! Typed views over system documents: log streams and remote portals.
//!
//! Each resource is stored as one document with id `<kind>.<id>.<kind>` and
//! one document field per element.

use lsf_system::{Content, Document, LsfError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Kinds of resource kept in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Stream,
    Remote,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Stream => "stream",
            ResourceKind::Remote => "remote",
        }
    }

    /// Document id of resource `id` of this kind.
    pub fn doc_id(&self, id: &str) -> String {
        format!("{0}.{1}.{0}", self.as_str(), id)
    }

    /// Prefix shared by all document ids of this kind.
    pub fn doc_prefix(&self) -> String {
        format!("{}.", self.as_str())
    }

    /// Resource id embedded in `doc_id`, if it is a document of this kind.
    pub fn resource_id<'a>(&self, doc_id: &'a str) -> Option<&'a str> {
        let kind = self.as_str();
        doc_id
            .strip_prefix(kind)?
            .strip_prefix('.')?
            .strip_suffix(kind)?
            .strip_suffix('.')
            .filter(|id| !id.is_empty())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Document id of the stream named `id`.
pub fn stream_doc_id(id: &str) -> String {
    ResourceKind::Stream.doc_id(id)
}

/// Document id of the remote portal named `id`.
pub fn remote_doc_id(id: &str) -> String {
    ResourceKind::Remote.doc_id(id)
}

/// Check a stream or remote id: ASCII alphanumerics, `-` and `_`.
pub fn validate_resource_id(kind: ResourceKind, id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(LsfError::illegal_argument(format!("{} id is empty", kind)));
    }
    if !id
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(LsfError::illegal_argument(format!(
            "{} id {:?} may only contain letters, digits, '-' and '_'",
            kind, id
        )));
    }
    Ok(())
}

/// How the files of a stream are journaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalModel {
    /// Live file renamed aside (app.log -> app.log.1) when full
    Rotation,
    /// Writer moves on to a new file name when full
    Rollover,
}

impl JournalModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            JournalModel::Rotation => "rotation",
            JournalModel::Rollover => "rollover",
        }
    }
}

impl fmt::Display for JournalModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalModel {
    type Err = LsfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rotation" => Ok(JournalModel::Rotation),
            "rollover" => Ok(JournalModel::Rollover),
            other => Err(LsfError::illegal_argument(format!(
                "journal model must be one of {{rotation, rollover}}, got {:?}",
                other
            ))),
        }
    }
}

/// Document field names of a log stream.
pub mod stream_elem {
    pub const ID: &str = "id";
    pub const BASEPATH: &str = "basepath";
    pub const PATTERN: &str = "pattern";
    pub const JOURNAL_MODEL: &str = "journal-model";
    /// Prefix of user-defined fields
    pub const FIELD_PREFIX: &str = "field.";
}

/// Document field names of a remote portal.
pub mod remote_elem {
    pub const ID: &str = "id";
    pub const HOST: &str = "host";
    pub const PORT: &str = "port";
}

/// A named source of journaled log files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogStream {
    pub id: String,
    /// Directory holding the log files
    pub path: PathBuf,
    /// Glob matched against file names in `path`
    pub pattern: String,
    pub journal_model: JournalModel,
    /// Free-form fields attached to every shipped record
    pub fields: BTreeMap<String, String>,
}

impl LogStream {
    pub fn doc_id(&self) -> String {
        stream_doc_id(&self.id)
    }

    /// Encode as document content.
    pub fn encode(&self) -> Content {
        let mut content = Content::new();
        content.insert(stream_elem::ID.to_string(), self.id.as_bytes().to_vec());
        content.insert(
            stream_elem::BASEPATH.to_string(),
            self.path.to_string_lossy().as_bytes().to_vec(),
        );
        content.insert(
            stream_elem::PATTERN.to_string(),
            self.pattern.as_bytes().to_vec(),
        );
        content.insert(
            stream_elem::JOURNAL_MODEL.to_string(),
            self.journal_model.as_str().as_bytes().to_vec(),
        );
        for (name, value) in &self.fields {
            content.insert(
                format!("{}{}", stream_elem::FIELD_PREFIX, name),
                value.as_bytes().to_vec(),
            );
        }
        content
    }

    /// Decode a stream document.
    pub fn decode(doc: &Document) -> Result<Self> {
        let fields = doc
            .field_names()
            .filter_map(|name| {
                let key = name.strip_prefix(stream_elem::FIELD_PREFIX)?;
                let value = doc.get_str(name)?;
                Some((key.to_string(), value.to_string()))
            })
            .collect();

        Ok(Self {
            id: required(doc, stream_elem::ID)?.to_string(),
            path: PathBuf::from(required(doc, stream_elem::BASEPATH)?),
            pattern: required(doc, stream_elem::PATTERN)?.to_string(),
            journal_model: required(doc, stream_elem::JOURNAL_MODEL)?
                .parse()
                .map_err(|e| LsfError::fatal(format!("stream document {}: {}", doc.id(), e)))?,
            fields,
        })
    }

    /// One-line description for `stream list`.
    pub fn digest(&self, verbose: bool) -> String {
        if verbose {
            format!(
                "stream {} path:{} pattern:{} mode:{}",
                self.id,
                self.path.display(),
                self.pattern,
                self.journal_model
            )
        } else {
            format!("stream {}", self.id)
        }
    }
}

/// A remote endpoint that events can be shipped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePort {
    pub id: String,
    pub host: String,
    pub port: u16,
}

impl RemotePort {
    pub fn doc_id(&self) -> String {
        remote_doc_id(&self.id)
    }

    pub fn encode(&self) -> Content {
        let mut content = Content::new();
        content.insert(remote_elem::ID.to_string(), self.id.as_bytes().to_vec());
        content.insert(remote_elem::HOST.to_string(), self.host.as_bytes().to_vec());
        content.insert(
            remote_elem::PORT.to_string(),
            self.port.to_string().into_bytes(),
        );
        content
    }

    pub fn decode(doc: &Document) -> Result<Self> {
        let port = required(doc, remote_elem::PORT)?;
        Ok(Self {
            id: required(doc, remote_elem::ID)?.to_string(),
            host: required(doc, remote_elem::HOST)?.to_string(),
            port: port.parse().map_err(|_| {
                LsfError::fatal(format!("remote document {}: invalid port {:?}", doc.id(), port))
            })?,
        })
    }

    pub fn digest(&self, verbose: bool) -> String {
        if verbose {
            format!("remote {} host:{} port:{}", self.id, self.host, self.port)
        } else {
            format!("remote {}", self.id)
        }
    }
}

fn required<'a>(doc: &'a Document, field: &str) -> Result<&'a str> {
    doc.get_str(field).ok_or_else(|| {
        LsfError::fatal(format!(
            "document {} is missing field {:?}",
            doc.id(),
            field
        ))
    })
}
