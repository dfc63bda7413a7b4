//! Bone Transform Store: parses the bones file produced by the remote
//! pipeline into bone local transforms and the full-body vertex set.

use std::{fs::File, io::BufReader, io::Read, path::Path};

use nalgebra::{Matrix4, Quaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::binary::{LeReader, capacity_hint};
use crate::error::RetargetError;
use crate::kinematics::trs;

/// Bytes of rotation, position and scale floats following each bone name.
pub const BONE_PAYLOAD_BYTES: u64 = 40;

/// A named local bone transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub name: String,
    pub rotation: Quaternion<f32>,
    pub position: Vector3<f32>,
    pub scale: Vector3<f32>,
}

impl Bone {
    pub fn identity(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rotation: Quaternion::identity(),
            position: Vector3::zeros(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn hash(&self) -> i32 {
        bone_hash(&self.name)
    }

    /// `TRS(position, rotation, scale)` of this bone.
    pub fn local_matrix(&self) -> Matrix4<f32> {
        trs(&self.position, &self.rotation, &self.scale)
    }
}

/// Bones in stream order, expressed in the template's axis convention.
pub type BoneSnapshot = Vec<Bone>;

/// Stable 32-bit FNV-1a hash of a bone or asset name.
pub fn bone_hash(name: &str) -> i32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in name.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash as i32
}

fn malformed(reason: String) -> RetargetError {
    RetargetError::MalformedBoneData { reason }
}

fn read_name<R: Read>(reader: &mut LeReader<R>) -> Result<String, RetargetError> {
    let len = reader.read_count("bone name length")?;
    let bytes = reader.read_bytes(len, "bone name")?;
    String::from_utf8(bytes).map_err(|err| malformed(format!("bone name is not UTF-8: {err}")))
}

fn read_bone<R: Read>(reader: &mut LeReader<R>) -> Result<Bone, RetargetError> {
    let name = read_name(reader)?;

    // Handedness conversion: negate quaternion y/z and position x.
    let qx = reader.read_f32("rotation")?;
    let qy = -reader.read_f32("rotation")?;
    let qz = -reader.read_f32("rotation")?;
    let qw = reader.read_f32("rotation")?;

    let px = -reader.read_f32("position")?;
    let py = reader.read_f32("position")?;
    let pz = reader.read_f32("position")?;

    let sx = reader.read_f32("scale")?;
    let sy = reader.read_f32("scale")?;
    let sz = reader.read_f32("scale")?;

    Ok(Bone {
        name,
        rotation: Quaternion::new(qw, qx, qy, qz),
        position: Vector3::new(px, py, pz),
        scale: Vector3::new(sx, sy, sz),
    })
}

/// Read a bone snapshot from a bones stream.
///
/// # Errors
///
/// `MalformedBoneData` when the stream ends before the declared bone count is
/// satisfied; `StorageUnavailable` for any other I/O fault.
pub fn read_bone_snapshot<R: Read>(stream: R) -> Result<BoneSnapshot, RetargetError> {
    let mut reader = LeReader::new(stream, malformed);
    let count = reader.read_count("bone count")?;
    let mut bones = Vec::with_capacity(capacity_hint(count));
    for _ in 0..count {
        bones.push(read_bone(&mut reader)?);
    }
    Ok(bones)
}

/// Read the full-body vertex block that follows the bones in a bones file.
/// Vertices are returned with x negated.
pub fn read_full_body_vertices<R: Read>(stream: R) -> Result<Vec<Vector3<f32>>, RetargetError> {
    let mut reader = LeReader::new(stream, malformed);
    let bone_count = reader.read_count("bone count")?;
    for _ in 0..bone_count {
        let name_len = reader.read_count("bone name length")?;
        reader.skip(name_len as u64, "bone name")?;
        reader.skip(BONE_PAYLOAD_BYTES, "bone transform")?;
    }

    let vertex_count = reader.read_count("vertex count")?;
    let mut vertices = Vec::with_capacity(capacity_hint(vertex_count));
    for _ in 0..vertex_count {
        let x = -reader.read_f32("vertex")?;
        let y = reader.read_f32("vertex")?;
        let z = reader.read_f32("vertex")?;
        vertices.push(Vector3::new(x, y, z));
    }
    Ok(vertices)
}

fn open(path: &Path) -> Result<BufReader<File>, RetargetError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| RetargetError::StorageUnavailable {
            path: path.to_path_buf(),
            source,
        })
}

pub fn read_bone_snapshot_file(path: &Path) -> Result<BoneSnapshot, RetargetError> {
    read_bone_snapshot(open(path)?).map_err(|err| err.with_path(path))
}

pub fn read_full_body_vertices_file(path: &Path) -> Result<Vec<Vector3<f32>>, RetargetError> {
    read_full_body_vertices(open(path)?).map_err(|err| err.with_path(path))
}

/// Find the first bone with the given name.
pub fn find_bone<'a>(bones: &'a [Bone], name: &str) -> Option<&'a Bone> {
    bones.iter().find(|bone| bone.name == name)
}
