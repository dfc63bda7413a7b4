//! Vertex Correspondence Engine: remaps full-body vertices onto the fixed
//! topology of the head, eyes and mouth slots.

use std::{collections::HashMap, fs::File, io::BufReader, io::Read, path::Path, path::PathBuf, sync::Arc};

use nalgebra::{Vector2, Vector3};

use crate::binary::{LeReader, capacity_hint};
use crate::error::RetargetError;
use crate::library::AssetLibrary;
use crate::mesh::{MeshData, SlotAsset};
use crate::modifier::RuntimeAssetModifier;
use crate::package::PackagedAsset;
use crate::races::Gender;
use crate::settings::GraftSettings;
use crate::storage::{AvatarAssetFile, avatar_asset_name, correspondence_asset_name};
use crate::texture::OverlayModifier;
use crate::{log_error, log_info, log_warn};

/// Body part a correspondence table targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BodyPart {
    Head,
    Eyes,
    Mouth,
}

impl BodyPart {
    pub const ALL: [BodyPart; 3] = [BodyPart::Head, BodyPart::Eyes, BodyPart::Mouth];

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyPart::Head => "head",
            BodyPart::Eyes => "eyes",
            BodyPart::Mouth => "mouth",
        }
    }
}

/// Slot-local vertex index → full-body template vertex index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrespondenceTable {
    pub slot_vertex_count: usize,
    pub source_vertex_count: usize,
    /// Indexed by slot vertex.
    pub source_indices: Vec<usize>,
}

fn malformed(reason: String) -> RetargetError {
    RetargetError::MalformedCorrespondenceTable { reason }
}

/// Read a table: slot vertex count, source vertex count, then one source
/// index per slot vertex, all little-endian `int32`.
pub fn read_correspondence_table<R: Read>(stream: R) -> Result<CorrespondenceTable, RetargetError> {
    let mut reader = LeReader::new(stream, malformed);
    let slot_vertex_count = reader.read_count("slot vertex count")?;
    let source_vertex_count = reader.read_count("source vertex count")?;

    let mut source_indices = Vec::with_capacity(capacity_hint(slot_vertex_count));
    for _ in 0..slot_vertex_count {
        source_indices.push(reader.read_count("source vertex index")?);
    }

    Ok(CorrespondenceTable {
        slot_vertex_count,
        source_vertex_count,
        source_indices,
    })
}

pub fn read_correspondence_table_file(path: &Path) -> Result<CorrespondenceTable, RetargetError> {
    let file = File::open(path).map_err(|source| RetargetError::StorageUnavailable {
        path: path.to_path_buf(),
        source,
    })?;
    read_correspondence_table(BufReader::new(file)).map_err(|err| err.with_path(path))
}

/// Correspondence tables keyed by gender and body part.
#[derive(Debug, Clone, Default)]
pub struct CorrespondenceTables {
    tables: HashMap<(Gender, BodyPart), Arc<CorrespondenceTable>>,
}

impl CorrespondenceTables {
    pub fn insert(&mut self, gender: Gender, part: BodyPart, table: CorrespondenceTable) {
        self.tables.insert((gender, part), Arc::new(table));
    }

    pub fn get(&self, gender: Gender, part: BodyPart) -> Result<Arc<CorrespondenceTable>, RetargetError> {
        self.tables
            .get(&(gender, part))
            .cloned()
            .ok_or_else(|| RetargetError::MissingTemplateAsset(correspondence_asset_name(gender, part)))
    }

    /// Load every table present in `dir`; absent assets are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self, RetargetError> {
        let mut tables = Self::default();
        for gender in [Gender::Male, Gender::Female] {
            for part in BodyPart::ALL {
                let path = dir.join(correspondence_asset_name(gender, part));
                if !path.is_file() {
                    continue;
                }
                tables.insert(gender, part, read_correspondence_table_file(&path)?);
            }
        }
        log_info!("Loaded {} correspondence tables from {}", tables.len(), dir.display());
        Ok(tables)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// `(x, y, z)` → `(-x, z, y)`.
pub fn axis_convert(v: &Vector3<f32>) -> Vector3<f32> {
    Vector3::new(-v.x, v.z, v.y)
}

/// Write the axis-converted full-body vertices into `slot_vertices`.
///
/// Every count and index is validated before the first write, so on error
/// the slot is left unchanged.
pub fn apply_correspondence(
    full_body_vertices: &[Vector3<f32>],
    slot: &str,
    slot_vertices: &mut [Vector3<f32>],
    table: &CorrespondenceTable,
) -> Result<(), RetargetError> {
    let mismatch = |reason: String| RetargetError::CorrespondenceMismatch {
        slot: slot.to_string(),
        reason,
    };

    if table.slot_vertex_count != slot_vertices.len() {
        return Err(mismatch(format!(
            "table declares {} vertices, slot has {}",
            table.slot_vertex_count,
            slot_vertices.len()
        )));
    }
    if table.source_vertex_count > full_body_vertices.len() {
        return Err(mismatch(format!(
            "table expects {} full-body vertices, snapshot has {}",
            table.source_vertex_count,
            full_body_vertices.len()
        )));
    }
    if table.source_indices.len() != table.slot_vertex_count {
        return Err(mismatch(format!(
            "table holds {} indices for {} vertices",
            table.source_indices.len(),
            table.slot_vertex_count
        )));
    }
    if let Some(index) = table
        .source_indices
        .iter()
        .find(|index| **index >= full_body_vertices.len())
    {
        return Err(mismatch(format!(
            "source index {index} out of range for {} full-body vertices",
            full_body_vertices.len()
        )));
    }

    for (target, source) in slot_vertices.iter_mut().zip(&table.source_indices) {
        *target = axis_convert(&full_body_vertices[*source]);
    }
    Ok(())
}

/// Address the correct half of a two-eye-packed texture: vertices with
/// local x > 0 use the left half, the rest the right half.
pub fn split_eye_uvs(vertices: &[Vector3<f32>], uv: &mut [Vector2<f32>]) {
    for (vertex, coord) in vertices.iter().zip(uv.iter_mut()) {
        if vertex.x > 0.0 {
            coord.x /= 2.0;
        } else {
            coord.x = 0.5 + coord.x / 2.0;
        }
    }
}

// ─── Slot modifier ────────────────────────────────────────────────────────────

/// Replaces a body-part slot's vertices from the full-body vertex set and,
/// optionally, its first overlay's texture.
#[derive(Debug)]
pub struct SlotModifier {
    part: BodyPart,
    slot: Option<String>,
    table: Option<Arc<CorrespondenceTable>>,
    full_body_vertices: Arc<Vec<Vector3<f32>>>,
    original: Option<MeshData>,
    overlay: Option<OverlayModifier>,
    photo_eyes_texture_width: u32,
}

impl SlotModifier {
    /// Capture the slot mesh. A slot absent from the library leaves the unit
    /// inert with a warning.
    pub fn new(
        assets: &AssetLibrary,
        gender: Gender,
        part: BodyPart,
        slot: &str,
        texture_file: Option<PathBuf>,
        full_body_vertices: Arc<Vec<Vector3<f32>>>,
        settings: &GraftSettings,
    ) -> Result<Self, RetargetError> {
        let photo_eyes_texture_width = settings.photo_eyes_texture_width;
        let Ok(asset) = assets.slot(slot) else {
            log_warn!("Slot {} for {} is not available, skipped", slot, part.as_str());
            return Ok(Self {
                part,
                slot: None,
                table: None,
                full_body_vertices,
                original: None,
                overlay: None,
                photo_eyes_texture_width,
            });
        };

        let table = assets.correspondence().get(gender, part)?;
        let overlay = texture_file
            .filter(|path| !path.as_os_str().is_empty())
            .map(|path| {
                let unit = OverlayModifier::new(assets, asset.first_overlay(), Some(path));
                match AvatarAssetFile::overlay_for(part) {
                    Some((overlay, texture)) => unit.packaged_as(overlay, texture),
                    None => unit,
                }
            });

        Ok(Self {
            part,
            slot: Some(asset.name.clone()),
            table: Some(table),
            full_body_vertices,
            original: Some(asset.mesh.clone()),
            overlay,
            photo_eyes_texture_width,
        })
    }

    pub fn part(&self) -> BodyPart {
        self.part
    }

    fn try_modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let (Some(slot), Some(table)) = (&self.slot, &self.table) else {
            return Ok(());
        };

        let mesh = &mut assets.slot_mut(slot)?.mesh;
        apply_correspondence(&self.full_body_vertices, slot, &mut mesh.vertices, table)?;

        let Some(overlay) = self.overlay.as_mut() else {
            return Ok(());
        };
        overlay.modify(assets)?;

        if self.part == BodyPart::Eyes {
            let photo_derived = overlay
                .modified_texture()
                .is_some_and(|texture| texture.width() == self.photo_eyes_texture_width);
            if photo_derived {
                let mesh = &mut assets.slot_mut(slot)?.mesh;
                split_eye_uvs(&mesh.vertices, &mut mesh.uv);
            }
        }
        Ok(())
    }
}

impl RuntimeAssetModifier for SlotModifier {
    fn label(&self) -> String {
        format!(
            "{} slot {}",
            self.part.as_str(),
            self.slot.as_deref().unwrap_or("<none>")
        )
    }

    fn modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let result = self.try_modify(assets);
        if let Err(err) = &result {
            log_error!("Failed to modify {}: {}", self.label(), err);
            self.revert(assets);
        }
        result
    }

    fn revert(&mut self, assets: &mut AssetLibrary) {
        if let (Some(slot), Some(original)) = (&self.slot, &self.original)
            && let Ok(asset) = assets.slot_mut(slot)
        {
            asset.mesh = original.clone();
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.revert(assets);
        }
    }

    /// The slot renamed `<avatar>_<part>_slot`, followed by its overlay when
    /// this unit swaps one. The packaged slot points at the packaged overlay.
    fn package(
        &self,
        assets: &AssetLibrary,
        avatar_name: &str,
    ) -> Result<Vec<PackagedAsset>, RetargetError> {
        let Some(slot) = self.slot.as_deref() else {
            return Ok(Vec::new());
        };
        let current = assets.slot(slot)?;
        let mut overlays = current.overlays.clone();
        let mut packaged = Vec::with_capacity(2);
        if let Some(unit) = &self.overlay {
            for asset in unit.package(assets, avatar_name)? {
                if let PackagedAsset::Overlay(overlay) = &asset {
                    match overlays.first_mut() {
                        Some(first) => *first = overlay.name.clone(),
                        None => overlays.push(overlay.name.clone()),
                    }
                }
                packaged.push(asset);
            }
        }

        let name = avatar_asset_name(avatar_name, AvatarAssetFile::slot_for(self.part));
        packaged.insert(
            0,
            PackagedAsset::Slot(SlotAsset::new(&name, current.mesh.clone(), overlays)),
        );
        Ok(packaged)
    }
}
