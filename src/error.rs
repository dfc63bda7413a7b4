use std::{io, path::Path, path::PathBuf};

use thiserror::Error;

/// Error values returned by the retargeting and grafting entry points.
#[derive(Error, Debug)]
pub enum RetargetError {
    /// A bones stream is truncated or carries impossible values.
    #[error("malformed bone data: {reason}")]
    MalformedBoneData { reason: String },

    /// A correspondence table asset is truncated or carries impossible values.
    #[error("malformed correspondence table: {reason}")]
    MalformedCorrespondenceTable { reason: String },

    /// A correspondence table does not fit the slot or the full-body vertex set.
    #[error("correspondence mismatch for slot {slot}: {reason}")]
    CorrespondenceMismatch { slot: String, reason: String },

    /// I/O fault while reading a required file.
    #[error("storage unavailable: {}", .path.display())]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The file exists but is not a decodable image.
    #[error("failed to decode texture {}: {reason}", .path.display())]
    TextureDecode { path: PathBuf, reason: String },

    /// A race, slot, overlay, recipe or rest pose template is not registered.
    #[error("template asset not found: {0}")]
    MissingTemplateAsset(String),

    /// Mesh buffers violate the slot invariants.
    #[error("invalid mesh data in slot {slot}: {reason}")]
    InvalidMesh { slot: String, reason: String },

    /// A control bone's global transform is singular.
    #[error("failed to invert global transform of bone {bone}")]
    NonInvertibleBindMatrix { bone: String },

    /// The rig construction collaborator rejected the staged rig.
    #[error("rig build failed: {0}")]
    RigBuild(String),

    /// Another avatar modification holds the single-flight gate; retry later.
    #[error("another avatar modification is in flight")]
    ConcurrentModificationBlocked,
}

impl RetargetError {
    /// Attach a file path to path-carrying variants produced by stream readers.
    pub fn with_path(self, path: &Path) -> Self {
        match self {
            RetargetError::StorageUnavailable { source, .. } => RetargetError::StorageUnavailable {
                path: path.to_path_buf(),
                source,
            },
            RetargetError::TextureDecode { reason, .. } => RetargetError::TextureDecode {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        }
    }

    /// True for the informational retry state of the single-flight gate.
    pub fn is_retry(&self) -> bool {
        matches!(self, RetargetError::ConcurrentModificationBlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_stream_io_error_when_path_attached_then_message_names_file() {
        let error = RetargetError::StorageUnavailable {
            path: PathBuf::new(),
            source: io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        }
        .with_path(Path::new("avatars/a1/bones.bin"));

        assert!(error.to_string().contains("avatars/a1/bones.bin"));
    }

    #[test]
    fn given_mismatch_error_when_formatted_then_slot_and_reason_are_included() {
        let error = RetargetError::CorrespondenceMismatch {
            slot: "FR_High_MaleFace".to_string(),
            reason: "table declares 500 vertices, slot has 499".to_string(),
        };

        let message = error.to_string();
        assert!(message.contains("FR_High_MaleFace"));
        assert!(message.contains("499"));
        assert!(!error.is_retry());
        assert!(RetargetError::ConcurrentModificationBlocked.is_retry());
    }
}
