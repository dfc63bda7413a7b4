//! Modification Orchestrator: sequences the grafting units into one
//! stage → commit → cleanup pass per avatar, serialized process-wide by a
//! single-flight gate, and a job queue that runs passes on one worker.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError},
    thread::{self, JoinHandle},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use crate::bones::read_full_body_vertices_file;
use crate::correspondence::{BodyPart, CorrespondenceTables, SlotModifier};
use crate::error::RetargetError;
use crate::hair::{HairGraftModifier, TexturedMesh, load_textured_mesh};
use crate::library::AssetLibrary;
use crate::logging::ResultExt;
use crate::mesh::{OverlayAsset, SlotAsset, WardrobeRecipe};
use crate::modifier::{RuntimeAssetModifier, revert_all};
use crate::package::AvatarAssetPackage;
use crate::races::{Gender, HAIR_WARDROBE_SLOT, gender_for_race, slot_names_for_race};
use crate::rest_pose::{BoneSource, RestPose, RestPoseCorrector};
use crate::settings::GraftSettings;
use crate::storage::{AvatarAssetFile, AvatarFile, avatar_file, haircut_mesh_file};
use crate::texture::OverlayModifier;
use crate::{log_debug, log_error, log_info, log_warn};

// ─── Requests and events ──────────────────────────────────────────────────────

/// One "apply generated identity" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationRequest {
    pub avatar_id: String,
    pub hair_name: Option<String>,
    #[serde(default = "default_remove_current_hair")]
    pub remove_current_hair: bool,
}

fn default_remove_current_hair() -> bool {
    true
}

impl ModificationRequest {
    pub fn new(avatar_id: &str, hair_name: Option<&str>) -> Self {
        Self {
            avatar_id: avatar_id.to_string(),
            hair_name: hair_name.map(str::to_string),
            remove_current_hair: true,
        }
    }
}

/// Terminal notification of a modification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ModificationEvent {
    Completed {
        avatar_id: String,
        hair_name: Option<String>,
    },
    Failed {
        avatar_id: String,
        message: String,
    },
}

impl ModificationEvent {
    pub fn avatar_id(&self) -> &str {
        match self {
            ModificationEvent::Completed { avatar_id, .. }
            | ModificationEvent::Failed { avatar_id, .. } => avatar_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ModificationEvent::Completed { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    /// Holding the gate, loading avatar data.
    Locked,
    /// Running the units' `modify`.
    Applying,
    /// Rig rebuild in progress; revert pending.
    Finalizing,
}

// ─── Collaborators ────────────────────────────────────────────────────────────

/// Character being edited: race plus wardrobe slot → recipe name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    pub race: String,
    pub wardrobe: BTreeMap<String, String>,
}

impl Character {
    pub fn new(name: &str, race: &str) -> Self {
        Self {
            name: name.to_string(),
            race: race.to_string(),
            wardrobe: BTreeMap::new(),
        }
    }

    pub fn set_slot(&mut self, recipe: &WardrobeRecipe) {
        self.wardrobe
            .insert(recipe.wardrobe_slot.clone(), recipe.name.clone());
    }

    pub fn clear_slot(&mut self, wardrobe_slot: &str) {
        self.wardrobe.remove(wardrobe_slot);
    }

    pub fn recipe_in(&self, wardrobe_slot: &str) -> Option<&str> {
        self.wardrobe.get(wardrobe_slot).map(String::as_str)
    }
}

/// Source of generated avatar data.
pub trait IdentityStore: Send {
    fn avatar_directory(&self, avatar_id: &str) -> PathBuf;

    fn load_haircut(&self, avatar_id: &str, hair_name: &str) -> Result<TexturedMesh, RetargetError>;
}

/// Identity store over a local directory tree: `<root>/<avatar_id>/...`.
#[derive(Debug, Clone)]
pub struct LocalIdentityStore {
    root: PathBuf,
}

impl LocalIdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl IdentityStore for LocalIdentityStore {
    fn avatar_directory(&self, avatar_id: &str) -> PathBuf {
        self.root.join(avatar_id)
    }

    fn load_haircut(&self, avatar_id: &str, hair_name: &str) -> Result<TexturedMesh, RetargetError> {
        load_textured_mesh(&haircut_mesh_file(&self.root, avatar_id, hair_name))
    }
}

/// Rig construction collaborator; consumes the staged rig.
pub trait RigBuilder: Send {
    fn build(&mut self, character: &Character, rig: &StagedRig) -> Result<(), RetargetError>;
}

/// Immutable description of the modified templates a rebuild consumes.
#[derive(Debug, Clone)]
pub struct StagedRig {
    pub avatar_id: String,
    pub race: String,
    pub rest_pose: RestPose,
    pub slots: Vec<SlotAsset>,
    pub overlays: Vec<OverlayAsset>,
    pub wardrobe: BTreeMap<String, String>,
}

impl StagedRig {
    pub fn slot(&self, name: &str) -> Option<&SlotAsset> {
        self.slots.iter().find(|slot| slot.name == name)
    }

    pub fn overlay(&self, name: &str) -> Option<&OverlayAsset> {
        self.overlays.iter().find(|overlay| overlay.name == name)
    }
}

// ─── Single-flight gate ───────────────────────────────────────────────────────

/// At most one modification pass holds this gate at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: Mutex<bool>,
    released: Condvar,
}

static GLOBAL_GATE: OnceLock<Arc<SingleFlight>> = OnceLock::new();

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide gate shared by every orchestrator built with `new`.
    pub fn global() -> Arc<SingleFlight> {
        GLOBAL_GATE
            .get_or_init(|| Arc::new(SingleFlight::new()))
            .clone()
    }

    /// Non-blocking acquisition.
    ///
    /// # Errors
    ///
    /// `ConcurrentModificationBlocked` while another pass holds the gate.
    pub fn try_acquire(self: &Arc<Self>) -> Result<FlightGuard, RetargetError> {
        let mut busy = self.lock();
        if *busy {
            return Err(RetargetError::ConcurrentModificationBlocked);
        }
        *busy = true;
        Ok(FlightGuard {
            gate: Arc::clone(self),
        })
    }

    /// Block until the gate is released, then take it.
    pub fn acquire(self: &Arc<Self>) -> FlightGuard {
        let mut busy = self.lock();
        if *busy {
            log_debug!("Waiting for the in-flight avatar modification to finish");
        }
        while *busy {
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *busy = true;
        FlightGuard {
            gate: Arc::clone(self),
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.lock()
    }

    // The flag stays meaningful after a panic elsewhere, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, bool> {
        self.busy.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn release(&self) {
        *self.lock() = false;
        self.released.notify_one();
    }
}

/// Releases the gate on drop.
#[derive(Debug)]
pub struct FlightGuard {
    gate: Arc<SingleFlight>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.gate.release();
    }
}

// ─── Orchestrator ─────────────────────────────────────────────────────────────

type Listener = Box<dyn Fn(&ModificationEvent) + Send>;

/// Result of `stage`: the applied units, the rig they describe and the held
/// gate. Must be handed to `cleanup`.
pub struct StagedModification {
    avatar_id: String,
    hair_name: Option<String>,
    units: Vec<Box<dyn RuntimeAssetModifier>>,
    rig: StagedRig,
    guard: FlightGuard,
}

impl StagedModification {
    pub fn rig(&self) -> &StagedRig {
        &self.rig
    }

    pub fn avatar_id(&self) -> &str {
        &self.avatar_id
    }
}

/// Per-process coordinator owning the template asset library.
pub struct Orchestrator {
    assets: AssetLibrary,
    settings: GraftSettings,
    store: Box<dyn IdentityStore>,
    gate: Arc<SingleFlight>,
    state: OrchestratorState,
    listeners: Vec<Listener>,
}

impl Orchestrator {
    /// Build an orchestrator on the process-wide gate. Correspondence tables
    /// are loaded from `settings.correspondence_dir` when it is set.
    pub fn new(
        assets: AssetLibrary,
        settings: GraftSettings,
        store: Box<dyn IdentityStore>,
    ) -> Result<Self, RetargetError> {
        Self::with_gate(assets, settings, store, SingleFlight::global())
    }

    pub fn with_gate(
        mut assets: AssetLibrary,
        settings: GraftSettings,
        store: Box<dyn IdentityStore>,
        gate: Arc<SingleFlight>,
    ) -> Result<Self, RetargetError> {
        if let Some(dir) = settings.correspondence_dir.as_deref() {
            assets.set_correspondence(CorrespondenceTables::load_dir(Path::new(dir))?);
        }
        Ok(Self {
            assets,
            settings,
            store,
            gate,
            state: OrchestratorState::Idle,
            listeners: Vec::new(),
        })
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    pub fn assets(&self) -> &AssetLibrary {
        &self.assets
    }

    pub fn assets_mut(&mut self) -> &mut AssetLibrary {
        &mut self.assets
    }

    pub fn settings(&self) -> &GraftSettings {
        &self.settings
    }

    /// Register a listener for completion and failure events.
    pub fn subscribe(&mut self, listener: impl Fn(&ModificationEvent) + Send + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn set_state(&mut self, state: OrchestratorState) {
        log_debug!("Orchestrator state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn notify(&self, event: &ModificationEvent) {
        for listener in &self.listeners {
            listener(event);
        }
    }

    /// Phase one: acquire the gate, build every unit and run its `modify`.
    ///
    /// On error every unit built so far is reverted in reverse order, the
    /// character's wardrobe is put back and the gate is released before
    /// returning.
    pub fn stage(
        &mut self,
        character: &mut Character,
        request: &ModificationRequest,
    ) -> Result<StagedModification, RetargetError> {
        let guard = self.gate.acquire();
        self.set_state(OrchestratorState::Locked);
        log_info!("Applying generated identity {} to {}", request.avatar_id, character.name);

        let wardrobe = character.wardrobe.clone();
        let mut units: Vec<Box<dyn RuntimeAssetModifier>> = Vec::new();
        let staged = self
            .build_units(character, request, &mut units)
            .and_then(|()| self.apply_units(&mut units))
            .and_then(|()| self.snapshot_rig(character, &request.avatar_id))
            .log_error(Some("failed to stage generated identity"));

        match staged {
            Ok(rig) => Ok(StagedModification {
                avatar_id: request.avatar_id.clone(),
                hair_name: request.hair_name.clone(),
                units,
                rig,
                guard,
            }),
            Err(err) => {
                revert_all(&mut units, &mut self.assets);
                character.wardrobe = wardrobe;
                drop(guard);
                self.set_state(OrchestratorState::Idle);
                Err(err)
            }
        }
    }

    /// Phase two: hand the staged rig to the rebuild collaborator.
    pub fn commit(
        &mut self,
        character: &Character,
        staged: &StagedModification,
        builder: &mut dyn RigBuilder,
    ) -> Result<(), RetargetError> {
        self.set_state(OrchestratorState::Finalizing);
        builder.build(character, &staged.rig)
    }

    /// Phase three: revert every unit in reverse order, release the gate and
    /// emit the terminal event.
    pub fn cleanup(
        &mut self,
        staged: StagedModification,
        outcome: Result<(), RetargetError>,
    ) -> ModificationEvent {
        let StagedModification {
            avatar_id,
            hair_name,
            mut units,
            guard,
            ..
        } = staged;

        revert_all(&mut units, &mut self.assets);
        drop(guard);
        self.set_state(OrchestratorState::Idle);

        let event = match outcome {
            Ok(()) => {
                log_info!("Generated identity {} applied", avatar_id);
                ModificationEvent::Completed {
                    avatar_id,
                    hair_name,
                }
            }
            Err(err) => {
                log_error!("Rig rebuild for {} failed: {}", avatar_id, err);
                ModificationEvent::Failed {
                    avatar_id,
                    message: err.to_string(),
                }
            }
        };
        self.notify(&event);
        event
    }

    /// Stage, rebuild and clean up one avatar; the returned event is also
    /// delivered to every listener.
    pub fn apply_generated_identity(
        &mut self,
        character: &mut Character,
        request: &ModificationRequest,
        builder: &mut dyn RigBuilder,
    ) -> ModificationEvent {
        let staged = match self.stage(character, request) {
            Ok(staged) => staged,
            Err(err) => {
                let event = ModificationEvent::Failed {
                    avatar_id: request.avatar_id.clone(),
                    message: err.to_string(),
                };
                self.notify(&event);
                return event;
            }
        };

        let outcome = self.commit(character, &staged, builder);
        self.cleanup(staged, outcome)
    }

    /// Apply an avatar's head, eyes, mouth, body and rest pose edits to the
    /// templates, snapshot them under `avatar_name` and revert.
    ///
    /// Runs under the gate like `stage`. Haircuts are packaged separately and
    /// the character is left untouched. The templates are reverted whatever
    /// the outcome.
    pub fn package_generated_identity(
        &mut self,
        character: &Character,
        avatar_id: &str,
        avatar_name: &str,
    ) -> Result<AvatarAssetPackage, RetargetError> {
        let guard = self.gate.acquire();
        self.set_state(OrchestratorState::Locked);
        log_info!("Packaging generated identity {} as {}", avatar_id, avatar_name);

        let mut scratch = character.clone();
        let request = ModificationRequest {
            avatar_id: avatar_id.to_string(),
            hair_name: None,
            remove_current_hair: false,
        };
        let mut units: Vec<Box<dyn RuntimeAssetModifier>> = Vec::new();
        let packaged = self
            .build_units(&mut scratch, &request, &mut units)
            .and_then(|()| self.apply_units(&mut units))
            .and_then(|()| {
                let mut package = AvatarAssetPackage::new(avatar_name);
                for unit in &units {
                    for asset in unit.package(&self.assets, avatar_name)? {
                        package.push(asset);
                    }
                }
                Ok(package)
            })
            .log_error(Some("failed to package generated identity"));

        revert_all(&mut units, &mut self.assets);
        drop(guard);
        self.set_state(OrchestratorState::Idle);
        packaged
    }

    fn build_units(
        &mut self,
        character: &mut Character,
        request: &ModificationRequest,
        units: &mut Vec<Box<dyn RuntimeAssetModifier>>,
    ) -> Result<(), RetargetError> {
        let race = self.assets.race(&character.race)?.clone();
        let names = slot_names_for_race(&race.name)
            .ok_or_else(|| RetargetError::MissingTemplateAsset(format!("race {}", race.name)))?;
        let gender = gender_for_race(&race.name);

        let avatar_dir = self.store.avatar_directory(&request.avatar_id);
        let bones_file = avatar_file(&avatar_dir, AvatarFile::BonesData);
        let full_body_vertices = Arc::new(read_full_body_vertices_file(&bones_file)?);

        units.push(Box::new(RestPoseCorrector::new(
            &self.assets,
            &race.rest_pose,
            BoneSource::File(bones_file.clone()),
            &self.settings.excluded_bone,
        )?));

        let body_parts = [
            (BodyPart::Head, names.head_slot, Some(AvatarFile::HeadTexture)),
            (BodyPart::Eyes, names.eyes_slot, Some(AvatarFile::EyesTexture)),
            (BodyPart::Mouth, names.mouth_slot, None),
        ];
        for (part, slot, texture) in body_parts {
            units.push(Box::new(SlotModifier::new(
                &self.assets,
                gender,
                part,
                slot,
                texture.map(|file| avatar_file(&avatar_dir, file)),
                Arc::clone(&full_body_vertices),
                &self.settings,
            )?));
        }
        units.push(Box::new(
            OverlayModifier::new(
                &self.assets,
                Some(names.body_overlay),
                Some(avatar_file(&avatar_dir, AvatarFile::BodyTexture)),
            )
            .packaged_as(AvatarAssetFile::BodyOverlay, AvatarAssetFile::BodyTexture),
        ));

        if request.remove_current_hair {
            character.clear_slot(HAIR_WARDROBE_SLOT);
        }

        if let Some(hair_name) = request.hair_name.as_deref() {
            match self.build_hair_unit(&request.avatar_id, hair_name, gender, &bones_file) {
                Ok(unit) => {
                    character.set_slot(unit.recipe());
                    units.push(Box::new(unit));
                }
                Err(err) => log_warn!("Haircut {} skipped: {}", hair_name, err),
            }
        }
        Ok(())
    }

    fn build_hair_unit(
        &mut self,
        avatar_id: &str,
        hair_name: &str,
        gender: Gender,
        bones_file: &Path,
    ) -> Result<HairGraftModifier, RetargetError> {
        let generated = self.store.load_haircut(avatar_id, hair_name)?;
        HairGraftModifier::new(
            hair_name,
            gender.hair_recipe_template(),
            generated,
            BoneSource::File(bones_file.to_path_buf()),
            gender,
            &mut self.assets,
            &self.settings,
        )
    }

    fn apply_units(
        &mut self,
        units: &mut [Box<dyn RuntimeAssetModifier>],
    ) -> Result<(), RetargetError> {
        self.set_state(OrchestratorState::Applying);
        for unit in units.iter_mut() {
            unit.modify(&mut self.assets)?;
        }
        Ok(())
    }

    fn snapshot_rig(&self, character: &Character, avatar_id: &str) -> Result<StagedRig, RetargetError> {
        let race = self.assets.race(&character.race)?;
        let rest_pose = self.assets.rest_pose(&race.rest_pose)?.clone();

        let mut slot_names: Vec<&str> = slot_names_for_race(&race.name)
            .map(|names| {
                vec![names.head_slot, names.eyes_slot, names.mouth_slot, names.body_slot]
            })
            .unwrap_or_default();
        for recipe in character.wardrobe.values() {
            if let Ok(recipe) = self.assets.recipe(recipe) {
                slot_names.extend(recipe.slots.iter().map(String::as_str));
            }
        }

        let slots: Vec<SlotAsset> = slot_names
            .iter()
            .filter_map(|name| self.assets.slot(name).ok().cloned())
            .collect();

        let mut overlay_names: Vec<&str> = slots
            .iter()
            .flat_map(|slot| slot.overlays.iter().map(String::as_str))
            .collect();
        if let Some(names) = slot_names_for_race(&race.name) {
            overlay_names.push(names.body_overlay);
        }
        overlay_names.sort_unstable();
        overlay_names.dedup();
        let overlays = overlay_names
            .iter()
            .filter_map(|name| self.assets.overlay(name).ok().cloned())
            .collect();

        Ok(StagedRig {
            avatar_id: avatar_id.to_string(),
            race: race.name.clone(),
            rest_pose,
            slots,
            overlays,
            wardrobe: character.wardrobe.clone(),
        })
    }
}

// ─── Job queue ────────────────────────────────────────────────────────────────

/// Character after the pass plus its terminal event.
#[derive(Debug, Clone)]
pub struct ModificationOutcome {
    pub character: Character,
    pub event: ModificationEvent,
}

enum Job {
    Apply {
        character: Character,
        request: ModificationRequest,
        reply: Sender<ModificationOutcome>,
    },
    Shutdown,
}

/// Runs modify → rebuild → revert jobs one at a time on a single worker
/// thread that owns the orchestrator and the rig builder.
pub struct ModificationQueue {
    jobs: Sender<Job>,
    worker: Option<JoinHandle<Orchestrator>>,
}

impl ModificationQueue {
    pub fn spawn(mut orchestrator: Orchestrator, mut builder: Box<dyn RigBuilder>) -> Self {
        let (jobs, incoming) = unbounded::<Job>();
        let worker = thread::spawn(move || {
            loop {
                match incoming.recv() {
                    Ok(Job::Apply {
                        mut character,
                        request,
                        reply,
                    }) => {
                        let event = orchestrator.apply_generated_identity(
                            &mut character,
                            &request,
                            builder.as_mut(),
                        );
                        let _ = reply.send(ModificationOutcome { character, event });
                    }
                    Ok(Job::Shutdown) | Err(_) => break,
                }
            }
            orchestrator
        });

        Self {
            jobs,
            worker: Some(worker),
        }
    }

    /// Enqueue a pass; the receiver yields its outcome once processed.
    pub fn submit(
        &self,
        character: Character,
        request: ModificationRequest,
    ) -> Result<Receiver<ModificationOutcome>, RetargetError> {
        let (reply, outcome) = unbounded();
        self.jobs
            .send(Job::Apply {
                character,
                request,
                reply,
            })
            .map_err(|_| RetargetError::RigBuild("modification queue is shut down".to_string()))?;
        Ok(outcome)
    }

    /// Finish queued jobs, stop the worker and hand back the orchestrator.
    pub fn shutdown(mut self) -> Option<Orchestrator> {
        let _ = self.jobs.send(Job::Shutdown);
        self.worker.take().and_then(|worker| worker.join().ok())
    }
}

impl Drop for ModificationQueue {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.jobs.send(Job::Shutdown);
            let _ = worker.join();
        }
    }
}
