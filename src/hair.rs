//! Hair Grafting Unit: imports a generated hair mesh into the template hair
//! slot, synthesizes two-bone skinning against the corrected rest pose and
//! packages the result as reusable assets.

use std::{fs, path::Path, path::PathBuf};

use anyhow::Context;
use image::{DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, RgbImage, RgbaImage};
use nalgebra::{Vector2, Vector3};

use crate::bones::bone_hash;
use crate::correspondence::axis_convert;
use crate::error::RetargetError;
use crate::kinematics::{
    BoneHandle, BoneHierarchy, HierarchyBone, bind_pose, global_transform, translation_of,
};
use crate::library::AssetLibrary;
use crate::mesh::{BoneWeight, Material, MeshData, OverlayAsset, ShaderProgram, SlotAsset, WardrobeRecipe};
use crate::modifier::RuntimeAssetModifier;
use crate::package::{OverlayRecord, file_name_of, write_json};
use crate::races::Gender;
use crate::rest_pose::{BoneSource, RestPose, RestPoseCorrector};
use crate::settings::GraftSettings;
use crate::storage::{HaircutAssetFile, haircut_asset_stem, haircut_directory, haircut_file};
use crate::texture::Texture;
use crate::{log_error, log_info};

pub const HEAD_ADJUST: &str = "HeadAdjust";
pub const NECK_ADJUST: &str = "NeckAdjust";
pub const NECK: &str = "Neck";
pub const HEAD: &str = "Head";

// ─── Generated hair mesh ──────────────────────────────────────────────────────

/// Hair geometry and texture as returned by the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct TexturedMesh {
    pub vertices: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uv: Vec<Vector2<f32>>,
    pub triangles: Vec<u32>,
    pub texture: Texture,
}

fn import_error(path: &Path, reason: String) -> RetargetError {
    RetargetError::InvalidMesh {
        slot: path.display().to_string(),
        reason,
    }
}

fn to_dynamic_image(data: gltf::image::Data) -> Option<DynamicImage> {
    use gltf::image::Format;

    let (width, height) = (data.width, data.height);
    match data.format {
        Format::R8G8B8A8 => RgbaImage::from_raw(width, height, data.pixels).map(DynamicImage::ImageRgba8),
        Format::R8G8B8 => RgbImage::from_raw(width, height, data.pixels).map(DynamicImage::ImageRgb8),
        Format::R8G8 => GrayAlphaImage::from_raw(width, height, data.pixels).map(DynamicImage::ImageLumaA8),
        Format::R8 => GrayImage::from_raw(width, height, data.pixels).map(DynamicImage::ImageLuma8),
        _ => None,
    }
}

/// Read the first primitive of a glTF/GLB hair mesh and its base colour
/// texture (or the first embedded image when no material texture is set).
pub fn load_textured_mesh(path: &Path) -> Result<TexturedMesh, RetargetError> {
    let (document, buffers, images) = gltf::import(path).map_err(|err| match err {
        gltf::Error::Io(source) => RetargetError::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        },
        other => import_error(path, other.to_string()),
    })?;

    let primitive = document
        .meshes()
        .next()
        .and_then(|mesh| mesh.primitives().next())
        .ok_or_else(|| import_error(path, "file contains no mesh primitive".to_string()))?;
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|b| &b.0[..]));

    let vertices: Vec<Vector3<f32>> = reader
        .read_positions()
        .ok_or_else(|| import_error(path, "primitive has no positions".to_string()))?
        .map(Vector3::from)
        .collect();
    let normals: Vec<Vector3<f32>> = reader
        .read_normals()
        .map(|normals| normals.map(Vector3::from).collect())
        .unwrap_or_default();
    let uv: Vec<Vector2<f32>> = reader
        .read_tex_coords(0)
        .map(|coords| coords.into_f32().map(Vector2::from).collect())
        .unwrap_or_else(|| vec![Vector2::zeros(); vertices.len()]);
    let triangles: Vec<u32> = reader
        .read_indices()
        .map(|indices| indices.into_u32().collect())
        .unwrap_or_else(|| (0..vertices.len() as u32).collect());

    let image_index = primitive
        .material()
        .pbr_metallic_roughness()
        .base_color_texture()
        .map(|info| info.texture().source().index())
        .unwrap_or(0);
    let image = images
        .into_iter()
        .nth(image_index)
        .ok_or_else(|| import_error(path, "hair mesh has no texture".to_string()))?;
    let image = to_dynamic_image(image)
        .ok_or_else(|| import_error(path, "unsupported hair texture pixel format".to_string()))?;

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("haircut");
    Ok(TexturedMesh {
        vertices,
        normals,
        uv,
        triangles,
        texture: Texture::new(name, image),
    })
}

// ─── Skinning ─────────────────────────────────────────────────────────────────

/// Append `NeckAdjust` under `Neck` unless it is already present.
///
/// The new bone has identity rotation and scale and zero offset.
pub fn add_neck_adjust_bone(bones: &mut BoneHierarchy) -> BoneHandle {
    if let Some(handle) = bones.find_by_name(NECK_ADJUST) {
        return handle;
    }
    bones.push(HierarchyBone::new(NECK_ADJUST, NECK))
}

/// `(head_weight, neck_weight)` for a vertex at height `z`.
///
/// Above the head: all head. Below the neck: all neck. In between the
/// weights interpolate linearly and sum to one. A zero-height span
/// assigns everything to the head.
pub fn blend_weights(z: f32, head_z: f32, neck_z: f32) -> (f32, f32) {
    if z > head_z {
        return (1.0, 0.0);
    }
    if z < neck_z {
        return (0.0, 1.0);
    }

    let height = head_z - neck_z;
    if height <= f32::EPSILON {
        return (1.0, 0.0);
    }
    ((z - neck_z) / height, (head_z - z) / height)
}

/// Bind `mesh` to `HeadAdjust` and `NeckAdjust`, blending by height between
/// the `Head` bone and `NeckAdjust`.
pub fn set_skinning(mesh: &mut MeshData, rest_pose: &RestPose) -> Result<(), RetargetError> {
    let head_adjust = bone_hash(HEAD_ADJUST);
    let neck_adjust = bone_hash(NECK_ADJUST);
    mesh.bone_name_hashes = vec![head_adjust, neck_adjust];
    add_neck_adjust_bone(&mut mesh.bones);

    // The model is rotated 90° about x, so height is the z coordinate.
    let head_z = translation_of(&global_transform(bone_hash(HEAD), &mesh.bones, rest_pose)).z;
    let neck_z = translation_of(&global_transform(neck_adjust, &mesh.bones, rest_pose)).z;

    mesh.bone_weights = mesh
        .vertices
        .iter()
        .map(|vertex| {
            let (head_weight, neck_weight) = blend_weights(vertex.z, head_z, neck_z);
            BoneWeight::two(0, head_weight, 1, neck_weight)
        })
        .collect();

    mesh.bind_poses = vec![
        bind_pose(head_adjust, &mesh.bones, rest_pose)?,
        bind_pose(neck_adjust, &mesh.bones, rest_pose)?,
    ];
    Ok(())
}

// ─── Hair Grafting Unit ───────────────────────────────────────────────────────

/// Grafts a generated hair mesh into the slot of a hair wardrobe recipe.
///
/// Construction corrects the gender's canonical rest pose with the avatar's
/// bone snapshot; the correction is undone by `revert`.
#[derive(Debug)]
pub struct HairGraftModifier {
    hair_name: String,
    recipe: WardrobeRecipe,
    slot: String,
    overlay: String,
    generated: TexturedMesh,
    use_lit_shader: bool,
    corrector: RestPoseCorrector,
    original_mesh: MeshData,
    original_texture: Option<Texture>,
    original_material: Material,
}

impl HairGraftModifier {
    /// # Errors
    ///
    /// `MissingTemplateAsset` when the recipe, its slot, the slot's overlay or
    /// the canonical rest pose is not registered; any bone snapshot error
    /// raised while correcting the rest pose.
    pub fn new(
        hair_name: &str,
        recipe_name: &str,
        generated: TexturedMesh,
        bones: BoneSource,
        gender: Gender,
        assets: &mut AssetLibrary,
        settings: &GraftSettings,
    ) -> Result<Self, RetargetError> {
        let recipe = assets.recipe(recipe_name)?.clone();
        let slot_name = recipe.first_slot().ok_or_else(|| {
            RetargetError::MissingTemplateAsset(format!("slot of recipe {recipe_name}"))
        })?;
        let slot = assets.slot(slot_name)?;
        let overlay_name = slot.first_overlay().ok_or_else(|| {
            RetargetError::MissingTemplateAsset(format!("overlay of slot {slot_name}"))
        })?;
        let overlay = assets.overlay(overlay_name)?;

        let slot_name = slot.name.clone();
        let original_mesh = slot.mesh.clone();
        let overlay_name = overlay.name.clone();
        let original_texture = overlay.textures.first().cloned();
        let original_material = overlay.material.clone();

        // Hair meshes are authored against the default pose of the gender.
        let mut corrector = RestPoseCorrector::new(
            assets,
            gender.canonical_rest_pose(),
            bones,
            &settings.excluded_bone,
        )?;
        corrector.modify(assets)?;

        Ok(Self {
            hair_name: hair_name.to_string(),
            recipe,
            slot: slot_name,
            overlay: overlay_name,
            generated,
            use_lit_shader: settings.use_lit_shader_for_hair,
            corrector,
            original_mesh,
            original_texture,
            original_material,
        })
    }

    pub fn hair_name(&self) -> &str {
        &self.hair_name
    }

    pub fn recipe(&self) -> &WardrobeRecipe {
        &self.recipe
    }

    pub fn set_use_lit_shader(&mut self, use_lit_shader: bool) {
        self.use_lit_shader = use_lit_shader;
    }

    fn try_modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let mut mesh = assets.slot(&self.slot)?.mesh.clone();
        mesh.vertices = self.generated.vertices.iter().map(axis_convert).collect();
        mesh.normals = self.generated.normals.iter().map(axis_convert).collect();
        mesh.tangents.clear();
        mesh.uv = self.generated.uv.clone();
        mesh.triangles = self.generated.triangles.clone();

        set_skinning(&mut mesh, self.corrector.modified_rest_pose(assets)?)?;
        mesh.validate(&self.slot)?;

        assets.slot_mut(&self.slot)?.mesh = mesh;

        let overlay = assets.overlay_mut(&self.overlay)?;
        match overlay.textures.first_mut() {
            Some(layer) => *layer = self.generated.texture.clone(),
            None => overlay.textures.push(self.generated.texture.clone()),
        }
        overlay.material = Material {
            name: format!("{}_material", self.hair_name),
            shader: ShaderProgram::for_hair(self.use_lit_shader),
        };
        Ok(())
    }

    /// Snapshot the modified slot, overlay and recipe as a standalone asset
    /// set named after `avatar_name` and the hair.
    pub fn package(
        &self,
        assets: &AssetLibrary,
        avatar_name: &str,
    ) -> Result<HairAssetPackage, RetargetError> {
        let stem = haircut_asset_stem(avatar_name, &self.hair_name);
        let slot_name = format!("{stem}_slot");
        let overlay_name = format!("{stem}_overlay");

        let slot = SlotAsset::new(
            &slot_name,
            assets.slot(&self.slot)?.mesh.clone(),
            vec![overlay_name.clone()],
        );

        let template_overlay = assets.overlay(&self.overlay)?;
        let texture = Texture {
            name: format!("{stem}_texture"),
            image: self.generated.texture.image.clone(),
        };
        let mut overlay = OverlayAsset::new(
            &overlay_name,
            vec![texture.clone()],
            template_overlay.material.clone(),
        );
        overlay.color = template_overlay.color;

        let recipe = WardrobeRecipe {
            name: format!("{stem}_recipe"),
            wardrobe_slot: self.recipe.wardrobe_slot.clone(),
            slots: vec![slot_name],
        };

        Ok(HairAssetPackage {
            avatar_name: avatar_name.to_string(),
            hair_name: self.hair_name.clone(),
            slot,
            overlay,
            recipe,
            texture,
        })
    }
}

impl RuntimeAssetModifier for HairGraftModifier {
    fn label(&self) -> String {
        format!("haircut {}", self.hair_name)
    }

    fn modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let result = self.try_modify(assets);
        if let Err(err) = &result {
            log_error!("Failed to modify haircut slot {}: {}", self.slot, err);
            self.revert(assets);
        }
        result
    }

    fn revert(&mut self, assets: &mut AssetLibrary) {
        if let Ok(slot) = assets.slot_mut(&self.slot) {
            slot.mesh = self.original_mesh.clone();
        }
        if let Ok(overlay) = assets.overlay_mut(&self.overlay) {
            match &self.original_texture {
                Some(original) => match overlay.textures.first_mut() {
                    Some(layer) => *layer = original.clone(),
                    None => overlay.textures.push(original.clone()),
                },
                None => overlay.textures.clear(),
            }
            overlay.material = self.original_material.clone();
        }
        self.corrector.revert(assets);
    }
}

// ─── Packaging ────────────────────────────────────────────────────────────────

/// Standalone asset set of one grafted hair.
#[derive(Debug, Clone)]
pub struct HairAssetPackage {
    pub avatar_name: String,
    pub hair_name: String,
    pub slot: SlotAsset,
    pub overlay: OverlayAsset,
    pub recipe: WardrobeRecipe,
    pub texture: Texture,
}

/// Persist a package under `<root>/<avatar>/haircuts/<hair id>/`.
///
/// Returns the written files: texture, overlay, slot, recipe.
pub fn save_hair_package(package: &HairAssetPackage, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let dir = haircut_directory(root, &package.avatar_name, &package.hair_name);
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create haircut directory: {}", dir.display()))?;

    let file = |kind| haircut_file(root, &package.avatar_name, &package.hair_name, kind);

    let texture_path = file(HaircutAssetFile::Texture);
    package
        .texture
        .image
        .save_with_format(&texture_path, ImageFormat::Png)
        .with_context(|| format!("failed to write hair texture: {}", texture_path.display()))?;

    let overlay = OverlayRecord::new(&package.overlay, vec![file_name_of(&texture_path)?]);

    let overlay_path = file(HaircutAssetFile::Overlay);
    write_json(&overlay_path, &overlay)?;
    let slot_path = file(HaircutAssetFile::Slot);
    write_json(&slot_path, &package.slot)?;
    let recipe_path = file(HaircutAssetFile::Recipe);
    write_json(&recipe_path, &package.recipe)?;

    log_info!("Saved haircut {} for {} to {}", package.hair_name, package.avatar_name, dir.display());
    Ok(vec![texture_path, overlay_path, slot_path, recipe_path])
}
