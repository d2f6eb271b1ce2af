//! Multi-part messages.

use bytes::Bytes;

/// An ordered list of parts delivered atomically.
///
/// On the wire every part but the last carries the MORE flag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    parts: Vec<Bytes>,
}

impl Message {
    /// Create an empty message
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a single-part message
    pub fn single(part: impl Into<Bytes>) -> Self {
        Self {
            parts: vec![part.into()],
        }
    }

    /// Append a part
    pub fn push(&mut self, part: impl Into<Bytes>) {
        self.parts.push(part.into());
    }

    /// Builder-style [`push`](Self::push)
    #[must_use]
    pub fn with_part(mut self, part: impl Into<Bytes>) -> Self {
        self.push(part);
        self
    }

    /// Borrow the parts
    pub fn parts(&self) -> &[Bytes] {
        &self.parts
    }

    /// Take the parts
    pub fn into_parts(self) -> Vec<Bytes> {
        self.parts
    }

    /// Number of parts
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    /// True if the message has no parts
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Sum of all part lengths
    pub fn total_bytes(&self) -> usize {
        self.parts.iter().map(Bytes::len).sum()
    }
}

impl From<Vec<Bytes>> for Message {
    fn from(parts: Vec<Bytes>) -> Self {
        Self { parts }
    }
}
