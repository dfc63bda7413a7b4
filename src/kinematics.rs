//! Bone hierarchy arena and the forward-kinematics walk that produces
//! pose-space-to-model-space transforms and bind poses.

use std::f32::consts::PI;

use nalgebra::{Matrix4, Quaternion, Translation3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::bones::{Bone, bone_hash};
use crate::error::RetargetError;
use crate::rest_pose::{GLOBAL_BONE, RestPose};

/// Builds `translation * rotation * scale`.
///
/// A zero-length quaternion is treated as identity rotation.
pub fn trs(
    position: &Vector3<f32>,
    rotation: &Quaternion<f32>,
    scale: &Vector3<f32>,
) -> Matrix4<f32> {
    let rotation = if rotation.norm() > f32::EPSILON {
        UnitQuaternion::from_quaternion(*rotation)
    } else {
        UnitQuaternion::identity()
    };

    let translation_matrix = Translation3::from(*position).to_homogeneous();
    let rotation_matrix = rotation.to_homogeneous();
    let scale_matrix = Matrix4::new_nonuniform_scaling(scale);
    translation_matrix * rotation_matrix * scale_matrix
}

/// 180° about the up (z) axis; compensates the template's authoring orientation.
pub fn orientation_correction() -> Matrix4<f32> {
    UnitQuaternion::from_axis_angle(&Vector3::z_axis(), PI).to_homogeneous()
}

// ─── Hierarchy arena ──────────────────────────────────────────────────────────

/// Stable index of a bone inside a [`BoneHierarchy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoneHandle(usize);

impl BoneHandle {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Hierarchy node carried by a mesh slot: name, hash, parent hash and the
/// slot's own local transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HierarchyBone {
    pub name: String,
    pub hash: i32,
    pub parent_hash: i32,
    pub local: Bone,
}

impl HierarchyBone {
    pub fn new(name: &str, parent: &str) -> Self {
        Self {
            name: name.to_string(),
            hash: bone_hash(name),
            parent_hash: bone_hash(parent),
            local: Bone::identity(name),
        }
    }

    pub fn with_local(mut self, position: Vector3<f32>, rotation: Quaternion<f32>) -> Self {
        self.local.position = position;
        self.local.rotation = rotation;
        self
    }
}

/// Append-only bone arena; handles never move once issued.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneHierarchy {
    bones: Vec<HierarchyBone>,
}

impl BoneHierarchy {
    pub fn new(bones: Vec<HierarchyBone>) -> Self {
        Self { bones }
    }

    pub fn push(&mut self, bone: HierarchyBone) -> BoneHandle {
        self.bones.push(bone);
        BoneHandle(self.bones.len() - 1)
    }

    pub fn get(&self, handle: BoneHandle) -> Option<&HierarchyBone> {
        self.bones.get(handle.0)
    }

    pub fn find_by_hash(&self, hash: i32) -> Option<BoneHandle> {
        self.bones
            .iter()
            .position(|bone| bone.hash == hash)
            .map(BoneHandle)
    }

    pub fn find_by_name(&self, name: &str) -> Option<BoneHandle> {
        self.bones
            .iter()
            .position(|bone| bone.name == name)
            .map(BoneHandle)
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HierarchyBone> {
        self.bones.iter()
    }
}

// ─── Forward kinematics ───────────────────────────────────────────────────────

/// Computes a bone's pose-space-to-model-space transform against a rest pose.
///
/// Walks from `bone_hash` up through parent hashes, composing each bone's
/// rest-pose TRS on the left; a bone missing from the rest pose falls back
/// to the hierarchy's own local transform. The walk stops at the first hash
/// absent from `hierarchy`, so an unknown `bone_hash` yields only the
/// `Global` transform and the orientation correction.
pub fn global_transform(
    bone_hash: i32,
    hierarchy: &BoneHierarchy,
    rest_pose: &RestPose,
) -> Matrix4<f32> {
    let mut matrix = Matrix4::<f32>::identity();
    let mut current = bone_hash;
    let mut steps = 0;

    while let Some(handle) = hierarchy.find_by_hash(current) {
        let Some(bone) = hierarchy.get(handle) else {
            break;
        };
        let local = rest_pose
            .bone(&bone.name)
            .map(Bone::local_matrix)
            .unwrap_or_else(|| bone.local.local_matrix());
        matrix = local * matrix;
        current = bone.parent_hash;

        // Parent cycles would never terminate.
        steps += 1;
        if steps > hierarchy.len() {
            break;
        }
    }

    let global = rest_pose
        .bone(GLOBAL_BONE)
        .map(Bone::local_matrix)
        .unwrap_or_else(Matrix4::identity);

    orientation_correction() * global * matrix
}

/// Inverse of [`global_transform`].
///
/// # Errors
///
/// Returns `RetargetError::NonInvertibleBindMatrix` when the global transform
/// is singular (for example a zero scale in the chain).
pub fn bind_pose(
    bone_hash: i32,
    hierarchy: &BoneHierarchy,
    rest_pose: &RestPose,
) -> Result<Matrix4<f32>, RetargetError> {
    global_transform(bone_hash, hierarchy, rest_pose)
        .try_inverse()
        .ok_or_else(|| RetargetError::NonInvertibleBindMatrix {
            bone: hierarchy
                .find_by_hash(bone_hash)
                .and_then(|handle| hierarchy.get(handle))
                .map(|bone| bone.name.clone())
                .unwrap_or_else(|| format!("#{bone_hash:08x}")),
        })
}

/// Translation column of a transform.
pub fn translation_of(matrix: &Matrix4<f32>) -> Vector3<f32> {
    Vector3::new(matrix[(0, 3)], matrix[(1, 3)], matrix[(2, 3)])
}
