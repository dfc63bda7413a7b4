//! Avatar identity grafting.
//!
//! Retargets template head, eyes and mouth slots onto an externally generated
//! avatar, corrects rest poses from its bone snapshot, grafts a generated
//! haircut with synthesized skinning, and sequences these revertible edits
//! around a rig rebuild.

pub mod logging;

pub(crate) mod binary;
pub mod bones;
pub mod correspondence;
pub mod error;
pub mod hair;
pub mod kinematics;
pub mod library;
pub mod mesh;
pub mod modifier;
pub mod orchestrator;
pub mod package;
pub mod races;
pub mod rest_pose;
pub mod settings;
pub mod storage;
pub mod texture;

#[cfg(test)]
mod test_support;

pub use error::RetargetError;
pub use library::AssetLibrary;
pub use logging::{LogLevel, ResultExt, init_logging, send_log};
pub use modifier::RuntimeAssetModifier;
pub use orchestrator::{ModificationEvent, ModificationQueue, ModificationRequest, Orchestrator};
pub use package::{AvatarAssetPackage, save_avatar_package};
