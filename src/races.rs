use serde::{Deserialize, Serialize};

// ─── Gender ───────────────────────────────────────────────────────────────────

/// Template gender; selects correspondence tables, canonical rest pose and
/// hair recipe template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }

    /// Rest pose the generated hair meshes are authored against.
    pub fn canonical_rest_pose(&self) -> &'static str {
        match self {
            Gender::Male => "Male_TPose",
            Gender::Female => "Female_TPose",
        }
    }

    /// Wardrobe recipe template a hair accessory binds to.
    pub fn hair_recipe_template(&self) -> &'static str {
        match self {
            Gender::Male => "avatar_sdk_male_hair_recipe",
            Gender::Female => "avatar_sdk_female_hair_recipe",
        }
    }
}

/// Detect template gender from a race name.
pub fn gender_for_race(race_name: &str) -> Gender {
    if race_name.to_lowercase().contains("female") {
        Gender::Female
    } else {
        Gender::Male
    }
}

// ─── Slot names ───────────────────────────────────────────────────────────────

/// Slot and overlay names a supported race exposes to the grafting units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotNames {
    pub head_slot: &'static str,
    pub eyes_slot: &'static str,
    pub body_slot: &'static str,
    pub mouth_slot: &'static str,
    pub body_overlay: &'static str,
}

/// Wardrobe slot that holds the hair recipe.
pub const HAIR_WARDROBE_SLOT: &str = "Hair";

const SUPPORTED_RACES: [(&str, SlotNames); 4] = [
    (
        "avatar_sdk_male_highpoly",
        SlotNames {
            head_slot: "FR_High_MaleFace",
            eyes_slot: "FR_High_MaleEyes",
            body_slot: "FR_High_MaleTorso",
            mouth_slot: "FR_High_MaleInnerMouth",
            body_overlay: "M_Bod smooth",
        },
    ),
    (
        "avatar_sdk_female_highpoly",
        SlotNames {
            head_slot: "FR_High_FemaleFace",
            eyes_slot: "FR_High_FemaleEyes",
            body_slot: "FR_High_FemaleTorso",
            mouth_slot: "FR_High_FemaleInnerMouth",
            body_overlay: "F_H_Bod",
        },
    ),
    (
        "HumanMaleHighPoly",
        SlotNames {
            head_slot: "FR_High_MaleFace",
            eyes_slot: "FR_High_MaleEyes",
            body_slot: "FR_High_MaleTorso",
            mouth_slot: "FR_High_MaleInnerMouth",
            body_overlay: "M_Bod Overlay 1",
        },
    ),
    (
        "HumanFemaleHighPoly",
        SlotNames {
            head_slot: "FR_High_FemaleFace",
            eyes_slot: "FR_High_FemaleEyes",
            body_slot: "FR_High_FemaleTorso",
            mouth_slot: "FR_High_FemaleInnerMouth",
            body_overlay: "F_H_Bod",
        },
    ),
];

/// Resolve slot names for a race; `None` when the race is not supported.
pub fn slot_names_for_race(race_name: &str) -> Option<&'static SlotNames> {
    SUPPORTED_RACES
        .iter()
        .find(|(name, _)| *name == race_name)
        .map(|(_, names)| names)
}

/// Names of every supported race.
pub fn supported_race_names() -> Vec<&'static str> {
    SUPPORTED_RACES.iter().map(|(name, _)| *name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_female_race_name_when_detecting_gender_then_female_is_returned() {
        assert_eq!(gender_for_race("HumanFemaleHighPoly"), Gender::Female);
        assert_eq!(gender_for_race("avatar_sdk_female_highpoly"), Gender::Female);
        assert_eq!(gender_for_race("HumanMaleHighPoly"), Gender::Male);
    }

    #[test]
    fn given_supported_race_when_resolving_slots_then_names_match_table() {
        let names = slot_names_for_race("HumanMaleHighPoly").expect("supported race");
        assert_eq!(names.head_slot, "FR_High_MaleFace");
        assert_eq!(names.body_overlay, "M_Bod Overlay 1");
    }

    #[test]
    fn given_unknown_race_when_resolving_slots_then_none_is_returned() {
        assert!(slot_names_for_race("HumanMale").is_none());
        assert_eq!(supported_race_names().len(), 4);
    }

    #[test]
    fn given_gender_when_resolving_templates_then_names_are_gendered() {
        assert_eq!(Gender::Female.canonical_rest_pose(), "Female_TPose");
        assert_eq!(
            Gender::Male.hair_recipe_template(),
            "avatar_sdk_male_hair_recipe"
        );
    }
}
