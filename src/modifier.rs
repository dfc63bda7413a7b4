use crate::error::RetargetError;
use crate::library::AssetLibrary;
use crate::package::PackagedAsset;

/// A revertible mutation of template assets.
///
/// `modify` returns `Err` only after the unit has reverted its own partial
/// edits; the orchestrator then reverts every unit that succeeded before it.
/// `revert` must be idempotent.
pub trait RuntimeAssetModifier: Send {
    /// Short human-readable description used in log messages.
    fn label(&self) -> String;

    fn modify(&mut self, assets: &mut AssetLibrary) -> Result<(), RetargetError>;

    fn revert(&mut self, assets: &mut AssetLibrary);

    /// Snapshot of the assets this unit modified, renamed for `avatar_name`.
    /// Called between `modify` and `revert`. Units without per-avatar assets
    /// contribute nothing.
    fn package(
        &self,
        _assets: &AssetLibrary,
        _avatar_name: &str,
    ) -> Result<Vec<PackagedAsset>, RetargetError> {
        Ok(Vec::new())
    }
}

/// Revert units in reverse order of application.
pub fn revert_all(units: &mut [Box<dyn RuntimeAssetModifier>], assets: &mut AssetLibrary) {
    for unit in units.iter_mut().rev() {
        unit.revert(assets);
    }
}
