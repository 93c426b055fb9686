//! Mention records consumed from the document-extraction collaborator.

use std::fmt;
use std::io::BufRead;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Identifier of one mention in the input stream.
///
/// Checkpoints record these to make resumption skip already-processed work.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MentionId(String);

impl MentionId {
    /// Wraps an id supplied by the producer.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derives an id for a mention without one.
    ///
    /// Hashes the document id, the mention's position in the stream and the
    /// raw name, so the same input file yields the same ids on every run and
    /// repeated mentions of a name inside one document stay distinct.
    #[must_use]
    pub fn derive(document_id: &str, ordinal: u64, raw_name: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(document_id.as_bytes());
        hasher.update(&[0]);
        hasher.update(&ordinal.to_le_bytes());
        hasher.update(&[0]);
        hasher.update(raw_name.as_bytes());
        let hash = hasher.finalize();
        Self(format!("m-{}", &hash.to_hex()[..32]))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MentionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A raw entity mention extracted from one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mention {
    /// Stable id; derived from the stream position when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mention_id: Option<MentionId>,
    /// Name exactly as extracted
    pub raw_name: String,
    /// Id of the source document
    pub document_id: String,
    /// Document kind, e.g. `flight_log` or `deposition`
    pub document_type: String,
    /// Text surrounding the mention
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_snippet: Option<String>,
}

impl Mention {
    /// Creates a mention without an explicit id or context.
    #[must_use]
    pub fn new(
        raw_name: impl Into<String>,
        document_id: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        Self {
            mention_id: None,
            raw_name: raw_name.into(),
            document_id: document_id.into(),
            document_type: document_type.into(),
            context_snippet: None,
        }
    }

    /// Attaches a context snippet.
    #[must_use]
    pub fn with_context(mut self, snippet: impl Into<String>) -> Self {
        self.context_snippet = Some(snippet.into());
        self
    }

    /// Attaches an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.mention_id = Some(MentionId::new(id));
        self
    }

    /// Returns the explicit id, or derives one from the stream position.
    #[must_use]
    pub fn id_at(&self, ordinal: u64) -> MentionId {
        self.mention_id
            .clone()
            .unwrap_or_else(|| MentionId::derive(&self.document_id, ordinal, &self.raw_name))
    }
}

/// Document context handed to the resolver with each mention.
#[derive(Debug, Clone, Copy, Default)]
pub struct MentionContext<'a> {
    /// Kind of the document the mention came from
    pub document_type: &'a str,
    /// Surrounding text, if extracted
    pub snippet: Option<&'a str>,
}

impl<'a> From<&'a Mention> for MentionContext<'a> {
    fn from(mention: &'a Mention) -> Self {
        Self {
            document_type: &mention.document_type,
            snippet: mention.context_snippet.as_deref(),
        }
    }
}

/// Reads JSON-lines mentions.
///
/// Blank lines are ignored. Lines that fail to parse are returned as
/// [`InputError::UnparseableMention`] so the caller can report them and move
/// on; the reader itself never stops on bad data, only on I/O failure.
///
/// # Errors
///
/// Returns the underlying I/O error if reading fails.
pub fn read_jsonl<R: BufRead>(reader: R) -> std::io::Result<Vec<Result<Mention, InputError>>> {
    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        out.push(
            serde_json::from_str::<Mention>(&line).map_err(|e| InputError::UnparseableMention {
                line: idx + 1,
                message: e.to_string(),
            }),
        );
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_ids_are_stable_and_positional() {
        let a = MentionId::derive("doc-1", 0, "Doug Band");
        let b = MentionId::derive("doc-1", 0, "Doug Band");
        let c = MentionId::derive("doc-1", 1, "Doug Band");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("m-"));
    }

    #[test]
    fn explicit_id_wins() {
        let mention = Mention::new("Doug Band", "doc-1", "email").with_id("abc");
        assert_eq!(mention.id_at(7).as_str(), "abc");
    }

    #[test]
    fn reads_jsonl_and_reports_bad_lines() {
        let input = concat!(
            r#"{"raw_name":"Doug Band","document_id":"d1","document_type":"email"}"#,
            "\n\n",
            "not json\n",
            r#"{"raw_name":"Clinton Foundation","document_id":"d2","document_type":"court_record","context_snippet":"donation"}"#,
            "\n"
        );
        let parsed = read_jsonl(input.as_bytes()).unwrap();
        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].is_ok());
        assert!(matches!(parsed[1], Err(InputError::UnparseableMention { line: 3, .. })));
        let second = parsed[2].as_ref().unwrap();
        assert_eq!(second.context_snippet.as_deref(), Some("donation"));
    }
}
