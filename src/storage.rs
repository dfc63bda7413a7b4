//! File naming convention for generated avatar data and packaged hair assets.

use std::path::{Path, PathBuf};

use crate::{correspondence::BodyPart, races::Gender};

/// Files the remote pipeline leaves in a per-avatar directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarFile {
    Photo,
    FullbodyMesh,
    HeadTexture,
    EyesTexture,
    BodyTexture,
    BonesData,
}

impl AvatarFile {
    pub fn file_name(&self) -> &'static str {
        match self {
            AvatarFile::Photo => "photo.jpg",
            AvatarFile::FullbodyMesh => "model.ply",
            AvatarFile::HeadTexture => "model.jpg",
            AvatarFile::EyesTexture => "eyes_texture.jpg",
            AvatarFile::BodyTexture => "body_texture.jpg",
            AvatarFile::BonesData => "bones.bin",
        }
    }
}

/// Files making up one packaged hair asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaircutAssetFile {
    Texture,
    Overlay,
    Slot,
    Recipe,
}

impl HaircutAssetFile {
    pub fn suffix(&self) -> &'static str {
        match self {
            HaircutAssetFile::Texture => "texture.png",
            HaircutAssetFile::Overlay => "overlay.json",
            HaircutAssetFile::Slot => "slot.json",
            HaircutAssetFile::Recipe => "recipe.json",
        }
    }
}

/// Assets generated for one avatar from the modified templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvatarAssetFile {
    RestPose,
    HeadSlot,
    EyesSlot,
    MouthSlot,
    HeadOverlay,
    EyesOverlay,
    BodyOverlay,
    HeadTexture,
    EyesTexture,
    BodyTexture,
}

impl AvatarAssetFile {
    pub fn suffix(&self) -> &'static str {
        match self {
            AvatarAssetFile::RestPose => "t_pose",
            AvatarAssetFile::HeadSlot => "head_slot",
            AvatarAssetFile::EyesSlot => "eyes_slot",
            AvatarAssetFile::MouthSlot => "mouth_slot",
            AvatarAssetFile::HeadOverlay => "head_overlay",
            AvatarAssetFile::EyesOverlay => "eyes_overlay",
            AvatarAssetFile::BodyOverlay => "body_overlay",
            AvatarAssetFile::HeadTexture => "head",
            AvatarAssetFile::EyesTexture => "eyes",
            AvatarAssetFile::BodyTexture => "body",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            AvatarAssetFile::HeadTexture
            | AvatarAssetFile::EyesTexture
            | AvatarAssetFile::BodyTexture => TEXTURE_EXTENSION,
            _ => ASSET_EXTENSION,
        }
    }

    pub fn slot_for(part: BodyPart) -> Self {
        match part {
            BodyPart::Head => AvatarAssetFile::HeadSlot,
            BodyPart::Eyes => AvatarAssetFile::EyesSlot,
            BodyPart::Mouth => AvatarAssetFile::MouthSlot,
        }
    }

    /// Overlay and texture files of a body part; the mouth has none.
    pub fn overlay_for(part: BodyPart) -> Option<(Self, Self)> {
        match part {
            BodyPart::Head => Some((AvatarAssetFile::HeadOverlay, AvatarAssetFile::HeadTexture)),
            BodyPart::Eyes => Some((AvatarAssetFile::EyesOverlay, AvatarAssetFile::EyesTexture)),
            BodyPart::Mouth => None,
        }
    }
}

/// Extension of serialized slot, overlay, recipe and rest pose assets.
pub const ASSET_EXTENSION: &str = "json";
/// Extension of generated avatar textures.
pub const TEXTURE_EXTENSION: &str = "jpg";

pub fn avatar_file(avatar_dir: &Path, file: AvatarFile) -> PathBuf {
    avatar_dir.join(file.file_name())
}

/// Short hair id: the last `/`-separated segment of a hair name.
pub fn short_haircut_id(hair_name: &str) -> &str {
    hair_name.rsplit('/').next().unwrap_or(hair_name)
}

/// Asset name stem shared by every file of one packaged hair.
pub fn haircut_asset_stem(avatar_name: &str, hair_name: &str) -> String {
    format!("{}_{}", avatar_name, short_haircut_id(hair_name))
}

pub fn haircut_directory(root: &Path, avatar_name: &str, hair_name: &str) -> PathBuf {
    root.join(avatar_name)
        .join("haircuts")
        .join(short_haircut_id(hair_name))
}

pub fn haircut_file(
    root: &Path,
    avatar_name: &str,
    hair_name: &str,
    file: HaircutAssetFile,
) -> PathBuf {
    haircut_directory(root, avatar_name, hair_name).join(format!(
        "{}_{}",
        haircut_asset_stem(avatar_name, hair_name),
        file.suffix()
    ))
}

/// Generated hair mesh (GLB) as delivered next to the packaged assets.
pub fn haircut_mesh_file(root: &Path, avatar_name: &str, hair_name: &str) -> PathBuf {
    haircut_directory(root, avatar_name, hair_name)
        .join(format!("{}.glb", short_haircut_id(hair_name)))
}

/// Asset name of a generated avatar asset: `<avatar>_<suffix>`.
pub fn avatar_asset_name(avatar_name: &str, file: AvatarAssetFile) -> String {
    format!("{}_{}", avatar_name, file.suffix())
}

/// Path of a named asset in the avatar's generated asset directory.
pub fn avatar_asset_path(root: &Path, avatar_name: &str, asset_name: &str, extension: &str) -> PathBuf {
    root.join(avatar_name).join(format!("{asset_name}.{extension}"))
}

pub fn avatar_asset_file(root: &Path, avatar_name: &str, file: AvatarAssetFile) -> PathBuf {
    avatar_asset_path(
        root,
        avatar_name,
        &avatar_asset_name(avatar_name, file),
        file.extension(),
    )
}

/// Asset name of the correspondence table for one gender and body part.
pub fn correspondence_asset_name(gender: Gender, part: BodyPart) -> String {
    format!("uma_{}_{}_indices.bytes", gender.as_str(), part.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_avatar_dir_when_resolving_bones_then_file_is_bones_bin() {
        let path = avatar_file(Path::new("/data/a1"), AvatarFile::BonesData);
        assert_eq!(path, PathBuf::from("/data/a1/bones.bin"));
        assert_eq!(AvatarFile::HeadTexture.file_name(), "model.jpg");
    }

    #[test]
    fn given_prefixed_hair_name_when_shortening_then_last_segment_is_kept() {
        assert_eq!(short_haircut_id("plus/generated_short"), "generated_short");
        assert_eq!(short_haircut_id("bob"), "bob");
    }

    #[test]
    fn given_hair_asset_when_resolving_file_then_path_follows_layout() {
        let path = haircut_file(
            Path::new("/out"),
            "alice",
            "plus/bob",
            HaircutAssetFile::Slot,
        );
        assert_eq!(path, PathBuf::from("/out/alice/haircuts/bob/alice_bob_slot.json"));
        assert_eq!(
            haircut_mesh_file(Path::new("/out"), "alice", "plus/bob"),
            PathBuf::from("/out/alice/haircuts/bob/bob.glb")
        );
    }

    #[test]
    fn given_avatar_asset_when_resolving_file_then_name_is_prefixed_with_avatar() {
        assert_eq!(
            avatar_asset_file(Path::new("/out"), "alice", AvatarAssetFile::RestPose),
            PathBuf::from("/out/alice/alice_t_pose.json")
        );
        assert_eq!(
            avatar_asset_file(Path::new("/out"), "alice", AvatarAssetFile::EyesTexture),
            PathBuf::from("/out/alice/alice_eyes.jpg")
        );
        assert_eq!(AvatarAssetFile::overlay_for(BodyPart::Mouth), None);
        assert_eq!(
            avatar_asset_name("alice", AvatarAssetFile::slot_for(BodyPart::Head)),
            "alice_head_slot"
        );
    }

    #[test]
    fn given_gender_and_part_when_naming_table_then_name_matches_convention() {
        assert_eq!(
            correspondence_asset_name(Gender::Female, BodyPart::Eyes),
            "uma_female_eyes_indices.bytes"
        );
    }
}
