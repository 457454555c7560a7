//! Policy image buffers.
//!
//! A [`PolicyImage`] owns the serialized policy bytes handed to the kernel
//! and records where they came from: read straight from a versioned policy
//! file, or produced by the transform provider (downgrade or user merge).
//! Ownership is linear — superseding an image drops the old buffer, and the
//! last surviving image lives until after the commit attempt.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Where a policy image's bytes originated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageOrigin {
    /// Bytes read verbatim from an on-disk policy file.
    FileBacked {
        /// The policy file the bytes were read from.
        path: PathBuf,
    },
    /// Bytes produced by the transform provider.
    Transformed,
}

/// An owned policy image ready to be customized or committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyImage {
    bytes: Vec<u8>,
    origin: ImageOrigin,
}

impl PolicyImage {
    /// Read a policy image from an already-opened file.
    ///
    /// The caller opens the file so that "not found" can be told apart from
    /// other open errors during the version scan.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the file fails.
    pub fn from_open_file(mut file: fs::File, path: &Path) -> io::Result<Self> {
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;
        Ok(Self {
            bytes,
            origin: ImageOrigin::FileBacked {
                path: path.to_owned(),
            },
        })
    }

    /// Wrap bytes produced by the transform provider.
    pub fn transformed(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            origin: ImageOrigin::Transformed,
        }
    }

    /// The image bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable access for in-place boolean merges.
    ///
    /// Boolean toggles flip values inside the image without resizing it, so
    /// the provider's merge functions take the buffer in place.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Length of the image in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the image is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Where the bytes came from.
    pub fn origin(&self) -> &ImageOrigin {
        &self.origin
    }

    /// The source file path, when the image is file-backed.
    pub fn source_path(&self) -> Option<&Path> {
        match &self.origin {
            ImageOrigin::FileBacked { path } => Some(path),
            ImageOrigin::Transformed => None,
        }
    }
}
