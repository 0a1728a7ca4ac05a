//! The shared, read-only byte sequence streamed to clients.
//!
//! Loaded once before the listener starts accepting. Clones share the same
//! allocation, so handing the payload to the event loop never copies it.

use bytes::Bytes;
use std::io;
use std::path::Path;

/// Immutable payload bytes.
#[derive(Debug, Clone, Default)]
pub struct Payload {
    data: Bytes,
}

impl Payload {
    /// Read the whole file at `path` into memory.
    pub fn load(path: &Path) -> io::Result<Self> {
        let data = std::fs::read(path).map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("failed to load payload '{}': {}", path.display(), e),
            )
        })?;
        Ok(Self::from(data))
    }

    #[cfg(test)]
    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// At most `max` bytes starting at `cursor`.
    ///
    /// Returns an empty slice once `cursor` reaches the end.
    pub fn slice(&self, cursor: usize, max: usize) -> &[u8] {
        let start = cursor.min(self.data.len());
        let end = start.saturating_add(max).min(self.data.len());
        &self.data[start..end]
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}
