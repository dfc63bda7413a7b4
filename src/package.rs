//! Per-avatar asset packages: snapshots of the modified templates saved
//! under the avatar's own names so they can be loaded without regenerating.

use std::{fs, io, path::Path, path::PathBuf};

use anyhow::Context;
use image::{DynamicImage, ImageFormat};
use serde::{Deserialize, Serialize};

use crate::log_info;
use crate::mesh::{Material, OverlayAsset, SlotAsset};
use crate::rest_pose::{RestPose, save_rest_pose};
use crate::storage::{
    ASSET_EXTENSION, AvatarAssetFile, TEXTURE_EXTENSION, avatar_asset_file, avatar_asset_path,
};

/// One asset a unit contributes to an avatar package.
#[derive(Debug, Clone, PartialEq)]
pub enum PackagedAsset {
    RestPose(RestPose),
    Slot(SlotAsset),
    Overlay(OverlayAsset),
}

/// Modified templates of one avatar, renamed `<avatar>_<asset>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvatarAssetPackage {
    pub avatar_name: String,
    pub rest_pose: Option<RestPose>,
    pub slots: Vec<SlotAsset>,
    pub overlays: Vec<OverlayAsset>,
}

impl AvatarAssetPackage {
    pub fn new(avatar_name: &str) -> Self {
        Self {
            avatar_name: avatar_name.to_string(),
            ..Self::default()
        }
    }

    pub fn push(&mut self, asset: PackagedAsset) {
        match asset {
            PackagedAsset::RestPose(rest_pose) => self.rest_pose = Some(rest_pose),
            PackagedAsset::Slot(slot) => self.slots.push(slot),
            PackagedAsset::Overlay(overlay) => self.overlays.push(overlay),
        }
    }

    pub fn slot(&self, name: &str) -> Option<&SlotAsset> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn overlay(&self, name: &str) -> Option<&OverlayAsset> {
        self.overlays.iter().find(|overlay| overlay.name == name)
    }
}

/// Serialized form of a packaged overlay; textures are referenced by file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRecord {
    pub name: String,
    pub name_hash: i32,
    pub textures: Vec<String>,
    pub color: [f32; 4],
    pub material: Material,
}

impl OverlayRecord {
    pub fn new(overlay: &OverlayAsset, textures: Vec<String>) -> Self {
        Self {
            name: overlay.name.clone(),
            name_hash: overlay.name_hash,
            textures,
            color: overlay.color,
            material: overlay.material.clone(),
        }
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

pub(crate) fn file_name_of(path: &Path) -> anyhow::Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))
        .with_context(|| format!("invalid asset path: {}", path.display()))
}

/// Persist a package under `<root>/<avatar>/`.
///
/// Writes the rest pose, then every overlay's layer 0 texture (JPEG) with its
/// overlay record, then every slot. Returns the written files in that order.
pub fn save_avatar_package(package: &AvatarAssetPackage, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let avatar = package.avatar_name.as_str();
    let dir = root.join(avatar);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create avatar asset directory: {}", dir.display()))?;

    let mut written = Vec::new();
    if let Some(rest_pose) = &package.rest_pose {
        let path = avatar_asset_file(root, avatar, AvatarAssetFile::RestPose);
        save_rest_pose(&path, rest_pose)?;
        written.push(path);
    }

    for overlay in &package.overlays {
        let mut textures = Vec::with_capacity(overlay.textures.len());
        if let Some(texture) = overlay.textures.first() {
            let path = avatar_asset_path(root, avatar, &texture.name, TEXTURE_EXTENSION);
            // JPEG carries no alpha channel.
            DynamicImage::ImageRgb8(texture.image.to_rgb8())
                .save_with_format(&path, ImageFormat::Jpeg)
                .with_context(|| format!("failed to write avatar texture: {}", path.display()))?;
            textures.push(file_name_of(&path)?);
            written.push(path);
        }

        let path = avatar_asset_path(root, avatar, &overlay.name, ASSET_EXTENSION);
        write_json(&path, &OverlayRecord::new(overlay, textures))?;
        written.push(path);
    }

    for slot in &package.slots {
        let path = avatar_asset_path(root, avatar, &slot.name, ASSET_EXTENSION);
        write_json(&path, slot)?;
        written.push(path);
    }

    log_info!("Saved {} assets for {} to {}", written.len(), avatar, dir.display());
    Ok(written)
}
