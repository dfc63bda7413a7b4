//! In-memory template asset library shared by every character of a process.

use std::collections::HashMap;

use crate::correspondence::CorrespondenceTables;
use crate::error::RetargetError;
use crate::mesh::{OverlayAsset, SlotAsset, WardrobeRecipe};
use crate::races::{Gender, gender_for_race};
use crate::rest_pose::RestPose;

/// Race template: the rest pose its characters are built against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaceData {
    pub name: String,
    pub rest_pose: String,
}

impl RaceData {
    pub fn gender(&self) -> Gender {
        gender_for_race(&self.name)
    }
}

/// Owning store of the mutable template assets.
///
/// Runtime modifiers edit these assets in place and restore them on revert.
#[derive(Debug, Clone, Default)]
pub struct AssetLibrary {
    rest_poses: HashMap<String, RestPose>,
    slots: HashMap<String, SlotAsset>,
    overlays: HashMap<String, OverlayAsset>,
    recipes: HashMap<String, WardrobeRecipe>,
    races: HashMap<String, RaceData>,
    correspondence: CorrespondenceTables,
}

fn missing(kind: &str, name: &str) -> RetargetError {
    RetargetError::MissingTemplateAsset(format!("{kind} {name}"))
}

impl AssetLibrary {
    pub fn insert_rest_pose(&mut self, rest_pose: RestPose) {
        self.rest_poses.insert(rest_pose.name.clone(), rest_pose);
    }

    pub fn insert_slot(&mut self, slot: SlotAsset) {
        self.slots.insert(slot.name.clone(), slot);
    }

    pub fn insert_overlay(&mut self, overlay: OverlayAsset) {
        self.overlays.insert(overlay.name.clone(), overlay);
    }

    pub fn insert_recipe(&mut self, recipe: WardrobeRecipe) {
        self.recipes.insert(recipe.name.clone(), recipe);
    }

    pub fn insert_race(&mut self, race: RaceData) {
        self.races.insert(race.name.clone(), race);
    }

    pub fn rest_pose(&self, name: &str) -> Result<&RestPose, RetargetError> {
        self.rest_poses
            .get(name)
            .ok_or_else(|| missing("rest pose", name))
    }

    pub fn rest_pose_mut(&mut self, name: &str) -> Result<&mut RestPose, RetargetError> {
        self.rest_poses
            .get_mut(name)
            .ok_or_else(|| missing("rest pose", name))
    }

    pub fn slot(&self, name: &str) -> Result<&SlotAsset, RetargetError> {
        self.slots.get(name).ok_or_else(|| missing("slot", name))
    }

    pub fn slot_mut(&mut self, name: &str) -> Result<&mut SlotAsset, RetargetError> {
        self.slots.get_mut(name).ok_or_else(|| missing("slot", name))
    }

    pub fn overlay(&self, name: &str) -> Result<&OverlayAsset, RetargetError> {
        self.overlays
            .get(name)
            .ok_or_else(|| missing("overlay", name))
    }

    pub fn overlay_mut(&mut self, name: &str) -> Result<&mut OverlayAsset, RetargetError> {
        self.overlays
            .get_mut(name)
            .ok_or_else(|| missing("overlay", name))
    }

    pub fn recipe(&self, name: &str) -> Result<&WardrobeRecipe, RetargetError> {
        self.recipes
            .get(name)
            .ok_or_else(|| missing("recipe", name))
    }

    pub fn race(&self, name: &str) -> Result<&RaceData, RetargetError> {
        self.races.get(name).ok_or_else(|| missing("race", name))
    }

    pub fn correspondence(&self) -> &CorrespondenceTables {
        &self.correspondence
    }

    pub fn correspondence_mut(&mut self) -> &mut CorrespondenceTables {
        &mut self.correspondence
    }

    pub fn set_correspondence(&mut self, tables: CorrespondenceTables) {
        self.correspondence = tables;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_empty_library_when_looking_up_then_missing_template_names_asset() {
        let assets = AssetLibrary::default();

        let error = assets.recipe("avatar_sdk_male_hair_recipe").unwrap_err();

        assert!(matches!(error, RetargetError::MissingTemplateAsset(_)));
        assert!(error.to_string().contains("avatar_sdk_male_hair_recipe"));
    }

    #[test]
    fn given_registered_race_when_resolving_gender_then_name_decides() {
        let mut assets = AssetLibrary::default();
        assets.insert_race(RaceData {
            name: "HumanFemaleHighPoly".to_string(),
            rest_pose: "HumanFemaleTPose".to_string(),
        });

        let race = assets.race("HumanFemaleHighPoly").expect("race");
        assert_eq!(race.gender(), Gender::Female);
    }
}
