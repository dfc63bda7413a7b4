//! Texture loading and the Texture Swap Unit.

use std::{fmt, io, path::Path, path::PathBuf, sync::Arc};

use image::{DynamicImage, ImageError, ImageReader};

use crate::error::RetargetError;
use crate::library::AssetLibrary;
use crate::mesh::OverlayAsset;
use crate::modifier::RuntimeAssetModifier;
use crate::package::PackagedAsset;
use crate::storage::{AvatarAssetFile, avatar_asset_name};
use crate::{log_error, log_warn};

/// Shared image handle. Equality is reference identity, so a reverted
/// overlay compares equal only when it holds the very same image again.
#[derive(Clone)]
pub struct Texture {
    pub name: String,
    pub image: Arc<DynamicImage>,
}

impl Texture {
    pub fn new(name: &str, image: DynamicImage) -> Self {
        Self {
            name: name.to_string(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl PartialEq for Texture {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("name", &self.name)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

/// Decode an image file into a texture named after the file stem.
///
/// # Errors
///
/// `StorageUnavailable` when the file cannot be read, `TextureDecode` when it
/// is not a supported image.
pub fn load_texture(path: &Path) -> Result<Texture, RetargetError> {
    let storage = |source: io::Error| RetargetError::StorageUnavailable {
        path: path.to_path_buf(),
        source,
    };
    let image = ImageReader::open(path)
        .map_err(storage)?
        .with_guessed_format()
        .map_err(storage)?
        .decode()
        .map_err(|err| match err {
            ImageError::IoError(source) => storage(source),
            other => RetargetError::TextureDecode {
                path: path.to_path_buf(),
                reason: other.to_string(),
            },
        })?;

    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("texture");
    Ok(Texture::new(name, image))
}

// ─── Texture Swap Unit ────────────────────────────────────────────────────────

/// Replaces layer 0 of an overlay with an image file and restores the
/// previous image on revert.
#[derive(Debug)]
pub struct OverlayModifier {
    overlay: Option<String>,
    texture_file: Option<PathBuf>,
    original: Option<Texture>,
    modified: Option<Texture>,
    asset_files: Option<(AvatarAssetFile, AvatarAssetFile)>,
}

impl OverlayModifier {
    /// Capture layer 0 of `overlay`. A missing overlay leaves the unit inert.
    pub fn new(assets: &AssetLibrary, overlay: Option<&str>, texture_file: Option<PathBuf>) -> Self {
        let found = overlay.and_then(|name| assets.overlay(name).ok());
        if found.is_none() {
            log_warn!(
                "Overlay {} is not available, texture swap skipped",
                overlay.unwrap_or("<none>")
            );
        }

        Self {
            overlay: found.map(|asset| asset.name.clone()),
            original: found.and_then(|asset| asset.textures.first().cloned()),
            texture_file: texture_file.filter(|path| !path.as_os_str().is_empty()),
            modified: None,
            asset_files: None,
        }
    }

    /// Include the overlay in avatar packages as `overlay` with layer 0
    /// saved as `texture`.
    pub fn packaged_as(mut self, overlay: AvatarAssetFile, texture: AvatarAssetFile) -> Self {
        self.asset_files = Some((overlay, texture));
        self
    }

    /// Copy of the overlay as currently held by the library, renamed, with
    /// layer 0 renamed to `texture_name`. `None` for an inert unit.
    pub fn package_overlay(
        &self,
        assets: &AssetLibrary,
        overlay_name: &str,
        texture_name: &str,
    ) -> Result<Option<OverlayAsset>, RetargetError> {
        let Some(source) = self.overlay.as_deref() else {
            return Ok(None);
        };
        let current = assets.overlay(source)?;
        let mut textures = current.textures.clone();
        if let Some(layer) = textures.first_mut() {
            layer.name = texture_name.to_string();
        }
        let mut overlay = OverlayAsset::new(overlay_name, textures, current.material.clone());
        overlay.color = current.color;
        Ok(Some(overlay))
    }

    /// Texture installed by the last successful `modify`.
    pub fn modified_texture(&self) -> Option<&Texture> {
        self.modified.as_ref()
    }

    pub fn overlay_name(&self) -> Option<&str> {
        self.overlay.as_deref()
    }

    fn try_modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError> {
        let (Some(overlay), Some(texture_file)) = (&self.overlay, &self.texture_file) else {
            return Ok(());
        };

        let texture = load_texture(texture_file)?;
        let asset = assets.overlay_mut(overlay)?;
        match asset.textures.first_mut() {
            Some(layer) => *layer = texture.clone(),
            None => asset.textures.push(texture.clone()),
        }
        self.modified = Some(texture);
        Ok(())
    }
}

impl RuntimeAssetModifier for OverlayModifier {
    fn label(&self) -> String {
        format!("overlay {}", self.overlay.as_deref().unwrap_or("<none>"))
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
        self.modified = None;
        let Some(overlay) = &self.overlay else {
            return;
        };
        let Ok(asset) = assets.overlay_mut(overlay) else {
            return;
        };
        match &self.original {
            Some(original) => match asset.textures.first_mut() {
                Some(layer) => *layer = original.clone(),
                None => asset.textures.push(original.clone()),
            },
            None => asset.textures.clear(),
        }
    }

    fn package(
        &self,
        assets: &AssetLibrary,
        avatar_name: &str,
    ) -> Result<Vec<PackagedAsset>, RetargetError> {
        let Some((overlay, texture)) = self.asset_files else {
            return Ok(Vec::new());
        };
        let packaged = self.package_overlay(
            assets,
            &avatar_asset_name(avatar_name, overlay),
            &avatar_asset_name(avatar_name, texture),
        )?;
        Ok(packaged.map(PackagedAsset::Overlay).into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{Material, OverlayAsset, ShaderProgram};
    use crate::test_support::{solid_texture, write_jpeg};

    fn library_with_overlay(name: &str) -> (AssetLibrary, Texture) {
        let original = solid_texture("template", 512, 512);
        let mut assets = AssetLibrary::default();
        assets.insert_overlay(OverlayAsset::new(
            name,
            vec![original.clone()],
            Material {
                name: "skin".to_string(),
                shader: ShaderProgram::Standard,
            },
        ));
        (assets, original)
    }

    #[test]
    fn given_image_file_when_modifying_then_layer_zero_is_replaced() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_jpeg(dir.path(), "model.jpg", 64, 32);
        let (mut assets, original) = library_with_overlay("M_Head");
        let mut unit = OverlayModifier::new(&assets, Some("M_Head"), Some(path));

        unit.modify(&mut assets).expect("modify succeeds");

        let layer = &assets.overlay("M_Head").expect("overlay").textures[0];
        assert_ne!(layer, &original);
        assert_eq!(layer.width(), 64);
        assert_eq!(unit.modified_texture().map(Texture::height), Some(32));
    }

    #[test]
    fn given_body_overlay_unit_when_packaging_then_overlay_and_texture_are_renamed() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_jpeg(dir.path(), "body_texture.jpg", 16, 16);
        let (mut assets, _) = library_with_overlay("M_Bod smooth");
        let mut unit = OverlayModifier::new(&assets, Some("M_Bod smooth"), Some(path))
            .packaged_as(AvatarAssetFile::BodyOverlay, AvatarAssetFile::BodyTexture);
        unit.modify(&mut assets).expect("modify succeeds");

        let packaged = unit.package(&assets, "alice").expect("package");

        let [PackagedAsset::Overlay(overlay)] = packaged.as_slice() else {
            panic!("expected one overlay, got {packaged:?}");
        };
        assert_eq!(overlay.name, "alice_body_overlay");
        assert_eq!(overlay.textures[0].name, "alice_body");
        assert_eq!(overlay.textures[0].width(), 16);
        assert_eq!(overlay.material.name, "skin");
    }

    #[test]
    fn given_overlay_unit_without_asset_files_when_packaging_then_nothing_is_produced() {
        let (assets, _) = library_with_overlay("M_Head");
        let unit = OverlayModifier::new(&assets, Some("M_Head"), None);

        assert!(unit.package(&assets, "alice").expect("package").is_empty());
    }

    #[test]
    fn given_modified_overlay_when_reverting_then_original_reference_is_restored() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_jpeg(dir.path(), "body_texture.jpg", 16, 16);
        let (mut assets, original) = library_with_overlay("M_Bod smooth");
        let mut unit = OverlayModifier::new(&assets, Some("M_Bod smooth"), Some(path));

        unit.modify(&mut assets).expect("modify succeeds");
        unit.revert(&mut assets);
        unit.revert(&mut assets);

        assert_eq!(assets.overlay("M_Bod smooth").expect("overlay").textures[0], original);
        assert!(unit.modified_texture().is_none());
    }

    #[test]
    fn given_undecodable_file_when_modifying_then_error_and_original_kept() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("eyes_texture.jpg");
        std::fs::write(&path, b"not an image").expect("write file");
        let (mut assets, original) = library_with_overlay("M_Eyes");
        let mut unit = OverlayModifier::new(&assets, Some("M_Eyes"), Some(path));

        let error = unit.modify(&mut assets).unwrap_err();

        assert!(matches!(error, RetargetError::TextureDecode { .. }));
        assert_eq!(assets.overlay("M_Eyes").expect("overlay").textures[0], original);
    }

    #[test]
    fn given_missing_file_when_loading_then_storage_unavailable() {
        let error = load_texture(Path::new("/nonexistent/model.jpg")).unwrap_err();
        assert!(matches!(error, RetargetError::StorageUnavailable { .. }));
    }

    #[test]
    fn given_unknown_overlay_when_modifying_then_unit_is_a_no_op() {
        let (mut assets, original) = library_with_overlay("M_Head");
        let mut unit = OverlayModifier::new(
            &assets,
            Some("Missing"),
            Some(PathBuf::from("/nonexistent/model.jpg")),
        );

        unit.modify(&mut assets).expect("inert unit succeeds");

        assert_eq!(assets.overlay("M_Head").expect("overlay").textures[0], original);
        assert!(unit.overlay_name().is_none());
    }

    #[test]
    fn given_no_texture_file_when_modifying_then_overlay_is_untouched() {
        let (mut assets, original) = library_with_overlay("M_Head");
        let mut unit = OverlayModifier::new(&assets, Some("M_Head"), None);

        unit.modify(&mut assets).expect("no-op succeeds");

        assert_eq!(assets.overlay("M_Head").expect("overlay").textures[0], original);
    }
}
