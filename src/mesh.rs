//! Template asset data model: mesh slots, overlays, materials and wardrobe
//! recipes.

use nalgebra::{Matrix4, Vector2, Vector3, Vector4};
use serde::{Deserialize, Serialize};

use crate::bones::bone_hash;
use crate::error::RetargetError;
use crate::kinematics::BoneHierarchy;
use crate::texture::Texture;

/// Up to four bone influences of one vertex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoneWeight {
    pub bone_indices: [u16; 4],
    pub weights: [f32; 4],
}

impl BoneWeight {
    /// Two influences; the remaining two slots are zero.
    pub fn two(first: u16, first_weight: f32, second: u16, second_weight: f32) -> Self {
        Self {
            bone_indices: [first, second, 0, 0],
            weights: [first_weight, second_weight, 0.0, 0.0],
        }
    }
}

/// Geometry and skinning data of one replaceable body part or accessory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub vertices: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub tangents: Vec<Vector4<f32>>,
    pub uv: Vec<Vector2<f32>>,
    pub triangles: Vec<u32>,
    pub bone_name_hashes: Vec<i32>,
    pub bone_weights: Vec<BoneWeight>,
    /// One bind matrix per entry of `bone_name_hashes`.
    pub bind_poses: Vec<Matrix4<f32>>,
    /// Bone hierarchy the slot is skinned against.
    pub bones: BoneHierarchy,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Check the slot invariants: per-vertex buffers agree in length, weight
    /// indices reference the bone hash list, weights are finite and
    /// non-negative, triangles reference existing vertices.
    pub fn validate(&self, slot: &str) -> Result<(), RetargetError> {
        let invalid = |reason: String| RetargetError::InvalidMesh {
            slot: slot.to_string(),
            reason,
        };

        let count = self.vertices.len();
        if self.uv.len() != count {
            return Err(invalid(format!(
                "{} uv coordinates for {} vertices",
                self.uv.len(),
                count
            )));
        }
        if self.bone_weights.len() != count {
            return Err(invalid(format!(
                "{} bone weights for {} vertices",
                self.bone_weights.len(),
                count
            )));
        }
        if !self.normals.is_empty() && self.normals.len() != count {
            return Err(invalid(format!(
                "{} normals for {} vertices",
                self.normals.len(),
                count
            )));
        }
        if self.bind_poses.len() != self.bone_name_hashes.len() {
            return Err(invalid(format!(
                "{} bind poses for {} bones",
                self.bind_poses.len(),
                self.bone_name_hashes.len()
            )));
        }

        for (vertex, weight) in self.bone_weights.iter().enumerate() {
            for (index, value) in weight.bone_indices.iter().zip(weight.weights) {
                if !value.is_finite() || value < 0.0 {
                    return Err(invalid(format!("vertex {vertex} has weight {value}")));
                }
                if value > 0.0 && usize::from(*index) >= self.bone_name_hashes.len() {
                    return Err(invalid(format!(
                        "vertex {vertex} references bone {index} of {}",
                        self.bone_name_hashes.len()
                    )));
                }
            }
        }

        if self.triangles.len() % 3 != 0 {
            return Err(invalid(format!(
                "triangle index count {} is not a multiple of 3",
                self.triangles.len()
            )));
        }
        if let Some(index) = self
            .triangles
            .iter()
            .find(|index| **index as usize >= count)
        {
            return Err(invalid(format!(
                "triangle index {index} out of range for {count} vertices"
            )));
        }

        Ok(())
    }
}

/// A named mesh slot template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotAsset {
    pub name: String,
    pub name_hash: i32,
    pub mesh: MeshData,
    /// Overlay names applied to this slot, layer 0 first.
    pub overlays: Vec<String>,
}

impl SlotAsset {
    pub fn new(name: &str, mesh: MeshData, overlays: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            name_hash: bone_hash(name),
            mesh,
            overlays,
        }
    }

    pub fn first_overlay(&self) -> Option<&str> {
        self.overlays.first().map(String::as_str)
    }
}

/// Shader program a material renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderProgram {
    Standard,
    HairLit,
    HairUnlit,
}

impl ShaderProgram {
    pub fn for_hair(use_lit_shader: bool) -> Self {
        if use_lit_shader {
            ShaderProgram::HairLit
        } else {
            ShaderProgram::HairUnlit
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    pub shader: ShaderProgram,
}

/// Texture layer of a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayAsset {
    pub name: String,
    pub name_hash: i32,
    pub textures: Vec<Texture>,
    pub color: [f32; 4],
    pub material: Material,
}

impl OverlayAsset {
    pub fn new(name: &str, textures: Vec<Texture>, material: Material) -> Self {
        Self {
            name: name.to_string(),
            name_hash: bone_hash(name),
            textures,
            color: [1.0, 1.0, 1.0, 1.0],
            material,
        }
    }
}

/// Wardrobe recipe: the slots an accessory installs into one wardrobe slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WardrobeRecipe {
    pub name: String,
    pub wardrobe_slot: String,
    pub slots: Vec<String>,
}

impl WardrobeRecipe {
    pub fn first_slot(&self) -> Option<&str> {
        self.slots.first().map(String::as_str)
    }
}
