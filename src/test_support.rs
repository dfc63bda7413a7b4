//! Fixtures shared by the unit tests: stream encoders, small template
//! libraries and an on-disk avatar directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use nalgebra::{Matrix4, Vector2, Vector3};

use crate::bones::{Bone, bone_hash};
use crate::correspondence::{BodyPart, CorrespondenceTable};
use crate::error::RetargetError;
use crate::hair::{HEAD, HEAD_ADJUST, NECK, TexturedMesh};
use crate::kinematics::{BoneHierarchy, HierarchyBone};
use crate::library::{AssetLibrary, RaceData};
use crate::mesh::{BoneWeight, Material, MeshData, OverlayAsset, ShaderProgram, SlotAsset, WardrobeRecipe};
use crate::orchestrator::{Character, IdentityStore, RigBuilder, StagedRig};
use crate::races::{Gender, HAIR_WARDROBE_SLOT};
use crate::rest_pose::{GLOBAL_BONE, RestPose};
use crate::storage::{AvatarFile, avatar_file, haircut_mesh_file};
use crate::texture::Texture;

// ─── Streams ──────────────────────────────────────────────────────────────────

pub(crate) fn push_i32(bytes: &mut Vec<u8>, value: i32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

pub(crate) fn push_f32(bytes: &mut Vec<u8>, value: f32) {
    bytes.extend_from_slice(&value.to_le_bytes());
}

/// Encode bones (and optionally the full-body vertex block) so that reading
/// the stream back yields exactly `bones` and `vertices`.
pub(crate) fn encode_bones_file(bones: &[Bone], vertices: Option<&Vec<Vector3<f32>>>) -> Vec<u8> {
    let mut bytes = Vec::new();
    push_i32(&mut bytes, bones.len() as i32);
    for bone in bones {
        push_i32(&mut bytes, bone.name.len() as i32);
        bytes.extend_from_slice(bone.name.as_bytes());

        let q = &bone.rotation.coords;
        for value in [q.x, -q.y, -q.z, q.w] {
            push_f32(&mut bytes, value);
        }
        for value in [-bone.position.x, bone.position.y, bone.position.z] {
            push_f32(&mut bytes, value);
        }
        for value in [bone.scale.x, bone.scale.y, bone.scale.z] {
            push_f32(&mut bytes, value);
        }
    }

    if let Some(vertices) = vertices {
        push_i32(&mut bytes, vertices.len() as i32);
        for vertex in vertices {
            for value in [-vertex.x, vertex.y, vertex.z] {
                push_f32(&mut bytes, value);
            }
        }
    }
    bytes
}

pub(crate) fn encode_correspondence_table(
    slot_vertex_count: i32,
    source_vertex_count: i32,
    source_indices: &[i32],
) -> Vec<u8> {
    let mut bytes = Vec::new();
    push_i32(&mut bytes, slot_vertex_count);
    push_i32(&mut bytes, source_vertex_count);
    for index in source_indices {
        push_i32(&mut bytes, *index);
    }
    bytes
}

// ─── Bones and poses ──────────────────────────────────────────────────────────

pub(crate) fn bone_at(name: &str, position: Vector3<f32>) -> Bone {
    Bone {
        position,
        ..Bone::identity(name)
    }
}

pub(crate) fn rest_pose_with(bones: &[(&str, Vector3<f32>)]) -> RestPose {
    RestPose::new(
        "TestTPose",
        bones
            .iter()
            .map(|(name, position)| bone_at(name, *position))
            .collect(),
    )
}

/// `Neck` under the implicit `Global` root, `Head` under `Neck`.
pub(crate) fn neck_head_hierarchy() -> BoneHierarchy {
    BoneHierarchy::new(vec![
        HierarchyBone::new(NECK, GLOBAL_BONE),
        HierarchyBone::new(HEAD, NECK),
    ])
}

// ─── Images ───────────────────────────────────────────────────────────────────

pub(crate) fn solid_texture(name: &str, width: u32, height: u32) -> Texture {
    Texture::new(
        name,
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([180, 140, 120]))),
    )
}

pub(crate) fn write_jpeg(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(width, height, Rgb([200, 160, 140]))
        .save_with_format(&path, ImageFormat::Jpeg)
        .expect("write jpeg");
    path
}

fn standard_material(name: &str) -> Material {
    Material {
        name: name.to_string(),
        shader: ShaderProgram::Standard,
    }
}

fn flat_mesh(vertex_count: usize, uv: Vector2<f32>) -> MeshData {
    MeshData {
        vertices: vec![Vector3::zeros(); vertex_count],
        uv: vec![uv; vertex_count],
        bone_weights: vec![BoneWeight::default(); vertex_count],
        ..MeshData::default()
    }
}

// ─── Hair templates ───────────────────────────────────────────────────────────

/// Male hair recipe, slot and overlay plus `Male_TPose` with `Neck` at z = 3
/// and `Head` at z = 5.
pub(crate) fn hair_library() -> AssetLibrary {
    let mut assets = AssetLibrary::default();
    add_hair_templates(&mut assets);
    assets
}

fn add_hair_templates(assets: &mut AssetLibrary) {
    let mut pose = rest_pose_with(&[
        (NECK, Vector3::new(0.0, 0.0, 3.0)),
        (HEAD, Vector3::new(0.0, 0.0, 5.0)),
        (HEAD_ADJUST, Vector3::zeros()),
        ("SpineAdjust", Vector3::new(0.0, 0.0, 1.0)),
    ]);
    pose.name = Gender::Male.canonical_rest_pose().to_string();
    assets.insert_rest_pose(pose);

    let mut bones = neck_head_hierarchy();
    bones.push(HierarchyBone::new(HEAD_ADJUST, HEAD));
    let mesh = MeshData {
        triangles: vec![0, 1, 2],
        bone_name_hashes: vec![bone_hash(HEAD_ADJUST)],
        bind_poses: vec![Matrix4::identity()],
        bones,
        ..flat_mesh(3, Vector2::zeros())
    };
    assets.insert_slot(SlotAsset::new(
        "AvatarSdkHair",
        mesh,
        vec!["AvatarSdkHairOverlay".to_string()],
    ));
    assets.insert_overlay(OverlayAsset::new(
        "AvatarSdkHairOverlay",
        vec![solid_texture("hair_template", 64, 64)],
        standard_material("hair_template"),
    ));
    assets.insert_recipe(WardrobeRecipe {
        name: Gender::Male.hair_recipe_template().to_string(),
        wardrobe_slot: HAIR_WARDROBE_SLOT.to_string(),
        slots: vec!["AvatarSdkHair".to_string()],
    });
}

// ─── Avatar fixture ───────────────────────────────────────────────────────────

/// Full-body vertices written to the fixture bones file.
fn full_body_vertices() -> Vec<Vector3<f32>> {
    vec![
        Vector3::new(1.0, 2.0, 3.0),
        Vector3::new(-1.0, 0.0, 0.0),
        Vector3::new(0.5, 0.5, 0.5),
        Vector3::new(2.0, 2.0, 2.0),
    ]
}

/// Templates of the `HumanMaleHighPoly` race plus the male hair templates.
pub(crate) fn avatar_library() -> AssetLibrary {
    let mut assets = hair_library();
    assets.insert_race(RaceData {
        name: "HumanMaleHighPoly".to_string(),
        rest_pose: "HumanMaleTPose".to_string(),
    });

    let mut pose = rest_pose_with(&[
        (GLOBAL_BONE, Vector3::zeros()),
        (NECK, Vector3::new(0.0, 0.0, 3.0)),
        (HEAD, Vector3::new(0.0, 0.0, 5.0)),
        ("SpineAdjust", Vector3::new(0.0, 0.0, 1.0)),
    ]);
    pose.name = "HumanMaleTPose".to_string();
    assets.insert_rest_pose(pose);

    let slots = [
        ("FR_High_MaleFace", 3, Some("M_Face")),
        ("FR_High_MaleEyes", 2, Some("M_Eyes")),
        ("FR_High_MaleInnerMouth", 2, None),
        ("FR_High_MaleTorso", 1, Some("M_Bod Overlay 1")),
    ];
    for (name, vertex_count, overlay) in slots {
        assets.insert_slot(SlotAsset::new(
            name,
            flat_mesh(vertex_count, Vector2::new(0.6, 0.5)),
            overlay.map(str::to_string).into_iter().collect(),
        ));
    }
    for (name, size) in [("M_Face", 512), ("M_Eyes", 512), ("M_Bod Overlay 1", 32)] {
        assets.insert_overlay(OverlayAsset::new(
            name,
            vec![solid_texture(name, size, size)],
            standard_material(name),
        ));
    }

    let tables = [
        (BodyPart::Head, vec![0, 2, 3]),
        (BodyPart::Eyes, vec![1, 0]),
        (BodyPart::Mouth, vec![2, 3]),
    ];
    for (part, source_indices) in tables {
        assets.correspondence_mut().insert(
            Gender::Male,
            part,
            CorrespondenceTable {
                slot_vertex_count: source_indices.len(),
                source_vertex_count: full_body_vertices().len(),
                source_indices,
            },
        );
    }
    assets
}

/// Write the files of one generated avatar: bones with `Neck` at z = 4 and
/// `Head` at z = 6, a head texture, a photo-derived eyes texture and a body
/// texture.
pub(crate) fn write_avatar_files(avatar_dir: &Path) {
    fs::create_dir_all(avatar_dir).expect("create avatar dir");
    let bones = vec![
        bone_at(NECK, Vector3::new(0.0, 0.0, 4.0)),
        bone_at(HEAD, Vector3::new(0.0, 0.0, 6.0)),
        bone_at("SpineAdjust", Vector3::new(5.0, 5.0, 5.0)),
    ];
    fs::write(
        avatar_file(avatar_dir, AvatarFile::BonesData),
        encode_bones_file(&bones, Some(&full_body_vertices())),
    )
    .expect("write bones");
    write_jpeg(avatar_dir, AvatarFile::HeadTexture.file_name(), 64, 64);
    write_jpeg(avatar_dir, AvatarFile::EyesTexture.file_name(), 1024, 512);
    write_jpeg(avatar_dir, AvatarFile::BodyTexture.file_name(), 16, 16);
}

/// Identity store over a temp directory with an optional in-memory haircut.
pub(crate) struct FixtureStore {
    root: PathBuf,
    haircut: Option<TexturedMesh>,
}

impl FixtureStore {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            haircut: None,
        }
    }

    /// Serve a generated haircut whose vertices sit at the given heights.
    pub(crate) fn with_haircut(mut self, heights: &[f32]) -> Self {
        let count = heights.len();
        self.haircut = Some(TexturedMesh {
            vertices: heights.iter().map(|h| Vector3::new(0.0, *h, 0.0)).collect(),
            normals: vec![Vector3::new(0.0, 0.0, 1.0); count],
            uv: vec![Vector2::new(0.5, 0.5); count],
            triangles: vec![0, 0, count as u32 - 1],
            texture: solid_texture("haircut", 8, 8),
        });
        self
    }
}

impl IdentityStore for FixtureStore {
    fn avatar_directory(&self, avatar_id: &str) -> PathBuf {
        self.root.join(avatar_id)
    }

    fn load_haircut(&self, avatar_id: &str, hair_name: &str) -> Result<TexturedMesh, RetargetError> {
        self.haircut
            .clone()
            .ok_or_else(|| RetargetError::StorageUnavailable {
                path: haircut_mesh_file(&self.root, avatar_id, hair_name),
                source: io::Error::new(io::ErrorKind::NotFound, "no haircut generated"),
            })
    }
}

/// Rig builder that keeps every staged rig and logs `build <avatar>`.
#[derive(Default)]
pub(crate) struct RecordingBuilder {
    pub(crate) rigs: Arc<Mutex<Vec<StagedRig>>>,
    log: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingBuilder {
    pub(crate) fn with_log(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl RigBuilder for RecordingBuilder {
    fn build(&mut self, _character: &Character, rig: &StagedRig) -> Result<(), RetargetError> {
        self.log
            .lock()
            .expect("log lock")
            .push(format!("build {}", rig.avatar_id));
        self.rigs.lock().expect("rigs lock").push(rig.clone());
        if self.fail {
            return Err(RetargetError::RigBuild("rejected".to_string()));
        }
        Ok(())
    }
}
