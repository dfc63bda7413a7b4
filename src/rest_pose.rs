//! Rest pose ("T-Pose") assets and the revertible corrector that writes an
//! avatar's bone snapshot into them.

use std::{collections::HashMap, fs, path::Path, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::bones::{Bone, BoneSnapshot, read_bone_snapshot_file};
use crate::error::RetargetError;
use crate::library::AssetLibrary;
use crate::log_error;
use crate::modifier::RuntimeAssetModifier;
use crate::package::PackagedAsset;
use crate::storage::{AvatarAssetFile, avatar_asset_name};

/// Sentinel name of the implicit parent of the tree root.
pub const GLOBAL_BONE: &str = "Global";

/// Named table of bone local transforms shared by all characters of a race.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestPose {
    pub name: String,
    bones: Vec<Bone>,
}

impl RestPose {
    pub fn new(name: &str, bones: Vec<Bone>) -> Self {
        Self {
            name: name.to_string(),
            bones,
        }
    }

    pub fn bone(&self, name: &str) -> Option<&Bone> {
        self.bones.iter().find(|bone| bone.name == name)
    }

    pub fn bone_mut(&mut self, name: &str) -> Option<&mut Bone> {
        self.bones.iter_mut().find(|bone| bone.name == name)
    }

    pub fn bones(&self) -> &[Bone] {
        &self.bones
    }

    /// Overwrite entries whose names appear in `snapshot`, leaving `excluded`
    /// untouched. Returns the number of overwritten entries.
    pub fn apply_snapshot(&mut self, snapshot: &[Bone], excluded: &str) -> usize {
        let mut by_name: HashMap<&str, &Bone> = HashMap::with_capacity(snapshot.len());
        for bone in snapshot {
            by_name.entry(bone.name.as_str()).or_insert(bone);
        }

        let mut updated = 0;
        for entry in self.bones.iter_mut() {
            if entry.name == excluded {
                continue;
            }
            if let Some(source) = by_name.get(entry.name.as_str()) {
                *entry = (*source).clone();
                updated += 1;
            }
        }
        updated
    }

    fn restore(&mut self, bones: &[Bone]) {
        self.bones = bones.to_vec();
    }
}

/// Save a rest pose as JSON, e.g. to persist a per-avatar corrected pose.
pub fn save_rest_pose(path: &Path, rest_pose: &RestPose) -> Result<()> {
    let content =
        serde_json::to_string_pretty(rest_pose).context("failed to serialize rest pose")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save rest pose: {}", path.display()))?;
    Ok(())
}

pub fn load_rest_pose(path: &Path) -> Result<RestPose> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load rest pose: {}", path.display()))?;
    serde_json::from_str(&content).context("failed to parse rest pose JSON")
}

// ─── Corrector ────────────────────────────────────────────────────────────────

/// Where the corrector reads its bone snapshot from.
#[derive(Debug, Clone)]
pub enum BoneSource {
    /// Bones file read on every `modify`.
    File(PathBuf),
    /// Snapshot already loaded by the caller.
    Snapshot(Arc<BoneSnapshot>),
}

impl BoneSource {
    fn load(&self) -> Result<Arc<BoneSnapshot>, RetargetError> {
        match self {
            BoneSource::File(path) => read_bone_snapshot_file(path).map(Arc::new),
            BoneSource::Snapshot(snapshot) => Ok(Arc::clone(snapshot)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrectorState {
    Unmodified,
    Modified,
}

/// Revertible correction of one rest pose asset.
///
/// Not reentrant: two correctors modifying the same rest pose at once must be
/// serialized by the caller (the orchestrator's single-flight gate does so).
#[derive(Debug)]
pub struct RestPoseCorrector {
    rest_pose: String,
    source: BoneSource,
    excluded_bone: String,
    original: Vec<Bone>,
    state: CorrectorState,
}

impl RestPoseCorrector {
    /// Capture the current table of `rest_pose` for later revert.
    pub fn new(
        assets: &AssetLibrary,
        rest_pose: &str,
        source: BoneSource,
        excluded_bone: &str,
    ) -> Result<Self, RetargetError> {
        let original = assets.rest_pose(rest_pose)?.bones().to_vec();
        Ok(Self {
            rest_pose: rest_pose.to_string(),
            source,
            excluded_bone: excluded_bone.to_string(),
            original,
            state: CorrectorState::Unmodified,
        })
    }

    pub fn state(&self) -> CorrectorState {
        self.state
    }

    pub fn rest_pose_name(&self) -> &str {
        &self.rest_pose
    }

    /// The corrected table as currently held by the library.
    pub fn modified_rest_pose<'a>(
        &self,
        assets: &'a AssetLibrary,
    ) -> Result<&'a RestPose, RetargetError> {
        assets.rest_pose(&self.rest_pose)
    }

    fn try_modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let snapshot = self.source.load()?;
        let rest_pose = assets.rest_pose_mut(&self.rest_pose)?;
        self.state = CorrectorState::Modified;
        rest_pose.apply_snapshot(&snapshot, &self.excluded_bone);
        Ok(())
    }
}

impl RuntimeAssetModifier for RestPoseCorrector {
    fn label(&self) -> String {
        format!("rest pose {}", self.rest_pose)
    }

    fn modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let result = self.try_modify(assets);
        if let Err(err) = &result {
            log_error!("Failed to modify rest pose {}: {}", self.rest_pose, err);
            self.revert(assets);
        }
        result
    }

    fn revert(&mut self, assets: &mut AssetLibrary) {
        if let Ok(rest_pose) = assets.rest_pose_mut(&self.rest_pose) {
            rest_pose.restore(&self.original);
        }
        self.state = CorrectorState::Unmodified;
    }

    fn package(
        &self,
        assets: &AssetLibrary,
        avatar_name: &str,
    ) -> Result<Vec<PackagedAsset>, RetargetError> {
        let mut rest_pose = self.modified_rest_pose(assets)?.clone();
        rest_pose.name = avatar_asset_name(avatar_name, AvatarAssetFile::RestPose);
        Ok(vec![PackagedAsset::RestPose(rest_pose)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{bone_at, encode_bones_file, rest_pose_with};
    use nalgebra::Vector3;

    fn library_with(rest_pose: RestPose) -> AssetLibrary {
        let mut assets = AssetLibrary::default();
        assets.insert_rest_pose(rest_pose);
        assets
    }

    fn template() -> RestPose {
        let mut pose = rest_pose_with(&[
            ("Neck", Vector3::new(0.0, 0.0, 4.0)),
            ("Head", Vector3::new(0.0, 0.0, 6.0)),
            ("SpineAdjust", Vector3::new(0.0, 0.0, 1.0)),
        ]);
        pose.name = "HumanMaleTPose".to_string();
        pose
    }

    #[test]
    fn given_snapshot_when_modifying_then_matching_bones_are_overwritten() {
        let mut assets = library_with(template());
        let snapshot = vec![
            bone_at("Head", Vector3::new(0.0, 0.0, 7.5)),
            bone_at("Unrelated", Vector3::new(9.0, 9.0, 9.0)),
        ];
        let mut corrector = RestPoseCorrector::new(
            &assets,
            "HumanMaleTPose",
            BoneSource::Snapshot(Arc::new(snapshot)),
            "SpineAdjust",
        )
        .expect("rest pose registered");

        corrector.modify(&mut assets).expect("modify succeeds");

        let pose = corrector.modified_rest_pose(&assets).expect("pose");
        assert_eq!(pose.bone("Head").map(|b| b.position.z), Some(7.5));
        assert_eq!(pose.bone("Neck").map(|b| b.position.z), Some(4.0));
        assert!(pose.bone("Unrelated").is_none());
        assert_eq!(corrector.state(), CorrectorState::Modified);
    }

    #[test]
    fn given_corrected_pose_when_packaging_then_copy_is_named_after_avatar() {
        let mut assets = library_with(template());
        let snapshot = vec![bone_at("Head", Vector3::new(0.0, 0.0, 7.5))];
        let mut corrector = RestPoseCorrector::new(
            &assets,
            "HumanMaleTPose",
            BoneSource::Snapshot(Arc::new(snapshot)),
            "SpineAdjust",
        )
        .expect("rest pose registered");
        corrector.modify(&mut assets).expect("modify succeeds");

        let packaged = corrector.package(&assets, "alice").expect("package");

        let [PackagedAsset::RestPose(pose)] = packaged.as_slice() else {
            panic!("expected one rest pose, got {packaged:?}");
        };
        assert_eq!(pose.name, "alice_t_pose");
        assert_eq!(pose.bone("Head").map(|b| b.position.z), Some(7.5));
        assert_eq!(assets.rest_pose("HumanMaleTPose").expect("template").name, "HumanMaleTPose");
    }

    #[test]
    fn given_excluded_bone_in_snapshot_when_modifying_then_it_is_left_untouched() {
        let mut pose = template();
        let snapshot = vec![bone_at("SpineAdjust", Vector3::new(5.0, 5.0, 5.0))];

        let updated = pose.apply_snapshot(&snapshot, "SpineAdjust");

        assert_eq!(updated, 0);
        assert_eq!(pose.bone("SpineAdjust").map(|b| b.position.z), Some(1.0));
    }

    #[test]
    fn given_modified_pose_when_reverting_then_original_table_is_restored() {
        let original = template();
        let mut assets = library_with(original.clone());
        let snapshot = vec![bone_at("Neck", Vector3::new(0.0, 1.0, 3.0))];
        let mut corrector = RestPoseCorrector::new(
            &assets,
            "HumanMaleTPose",
            BoneSource::Snapshot(Arc::new(snapshot)),
            "SpineAdjust",
        )
        .expect("rest pose registered");

        corrector.modify(&mut assets).expect("modify succeeds");
        corrector.revert(&mut assets);
        corrector.revert(&mut assets);

        assert_eq!(assets.rest_pose("HumanMaleTPose").expect("pose"), &original);
        assert_eq!(corrector.state(), CorrectorState::Unmodified);
    }

    #[test]
    fn given_truncated_bones_file_when_modifying_then_pose_is_reverted_and_error_returned() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("bones.bin");
        let mut bytes = encode_bones_file(&[bone_at("Head", Vector3::new(0.0, 0.0, 8.0))], None);
        bytes.truncate(bytes.len() - 6);
        fs::write(&path, bytes).expect("write bones");

        let original = template();
        let mut assets = library_with(original.clone());
        let mut corrector = RestPoseCorrector::new(
            &assets,
            "HumanMaleTPose",
            BoneSource::File(path),
            "SpineAdjust",
        )
        .expect("rest pose registered");

        let error = corrector.modify(&mut assets).unwrap_err();

        assert!(matches!(error, RetargetError::MalformedBoneData { .. }));
        assert_eq!(assets.rest_pose("HumanMaleTPose").expect("pose"), &original);
    }

    #[test]
    fn given_unknown_rest_pose_when_constructing_then_missing_template_is_returned() {
        let assets = AssetLibrary::default();
        let error = RestPoseCorrector::new(
            &assets,
            "Female_TPose",
            BoneSource::Snapshot(Arc::new(Vec::new())),
            "SpineAdjust",
        )
        .unwrap_err();
        assert!(matches!(error, RetargetError::MissingTemplateAsset(_)));
    }

    #[test]
    fn given_rest_pose_when_saved_and_loaded_then_table_is_identical() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("t_pose.json");
        let pose = template();

        save_rest_pose(&path, &pose).expect("save");
        let loaded = load_rest_pose(&path).expect("load");

        assert_eq!(loaded, pose);
    }
}
