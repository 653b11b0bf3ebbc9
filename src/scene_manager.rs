// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scene manager
//!
//! Owns the two live scene slots (the always-loaded `default` scene and the
//! user's active scene), the active-scene pointer file, and the remote
//! provisioning session.
//!
//! # Provisioning
//!
//! ```text
//! Idle --SET_NEW_SCENE--> AwaitingRuleCount --SET_NUM_OF_RULES--> CollectingRules
//!   ^                          | overall timeout                     | rule timeout
//!   |                          v                                     v
//!   +------------------ restore previous <-------- all valid? save + confirm
//!                                                   missing? re-request (budget)
//! ```
//!
//! While a session runs the user slot holds the scene being uploaded and is
//! excluded from evaluation. The previously active scene comes back when the
//! session ends, whatever the outcome.

use std::borrow::Cow;
use std::fs;
use std::io::ErrorKind;

use log::{debug, error, info, warn};

use crate::config::{ProvisioningConfig, StoragePaths};
use crate::error::{SceneError, StorageError};
use crate::message::{Envelope, GffMessage, Origin, ALL_RULES};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::rule::{Action, Rule};
use crate::scene::{Scene, SceneName};
use crate::time::Clock;

/// A scene plus whether it is loaded and usable
#[derive(Debug, Clone)]
pub struct SceneSlot {
    pub valid: bool,
    pub scene: Scene,
}

/// Step of a provisioning session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningPhase {
    /// Waiting for `SET_NUM_OF_RULES`
    AwaitingRuleCount {
        /// Seconds left before the session is abandoned
        remaining_s: u16,
    },
    /// Receiving `SET_RULE_WITH_INDEXS`
    CollectingRules {
        /// Rule count announced by the peer
        expected: u16,
        /// Milliseconds left before the rule table is checked
        remaining_ms: u32,
        /// Re-request rounds left
        resend_budget: u8,
    },
}

/// Remote upload of one scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningSession {
    /// Scene being uploaded
    pub scene: SceneName,
    /// Side that started the session; replies go there
    pub peer: Origin,
    /// Active scene to bring back afterwards
    pub previous: Option<SceneName>,
    pub phase: ProvisioningPhase,
}

/// Scene slots, scene files and provisioning
#[derive(Debug)]
pub struct SceneManager {
    paths: StoragePaths,
    config: ProvisioningConfig,
    default: SceneSlot,
    user: SceneSlot,
    active: Option<SceneName>,
    session: Option<ProvisioningSession>,
}

impl SceneManager {
    /// Create a manager with empty, invalid slots
    pub fn new(paths: StoragePaths, config: ProvisioningConfig) -> Self {
        let default_path = paths.default_scene();
        Self {
            default: SceneSlot {
                valid: false,
                scene: Scene::new(SceneName::default_scene(), default_path.clone()),
            },
            user: SceneSlot {
                valid: false,
                scene: Scene::new(SceneName::default_scene(), default_path),
            },
            paths,
            config,
            active: None,
            session: None,
        }
    }

    /// The default scene slot
    pub fn default_slot(&self) -> &SceneSlot {
        &self.default
    }

    /// The user scene slot
    pub fn user_slot(&self) -> &SceneSlot {
        &self.user
    }

    /// Name of the active user scene
    pub fn active(&self) -> Option<&SceneName> {
        self.active.as_ref()
    }

    /// Running provisioning session
    pub fn session(&self) -> Option<&ProvisioningSession> {
        self.session.as_ref()
    }

    pub fn is_provisioning(&self) -> bool {
        self.session.is_some()
    }

    /// Load the default scene and the active user scene from storage
    ///
    /// A missing default scene file starts an empty default scene.
    pub fn restore(&mut self) {
        match self.default.scene.restore() {
            Ok(()) => self.default.valid = true,
            Err(e) if e.is_not_found() => {
                info!("no default scene stored, starting empty");
                self.default.valid = true;
                if let Err(e) = self.default.scene.save() {
                    error!("cannot create default scene: {}", e);
                }
            }
            Err(e) => {
                error!("default scene unusable: {}", e);
                self.default.valid = false;
            }
        }

        match self.get_active_scene() {
            Ok(Some(name)) => {
                self.load_user(&name);
                self.active = Some(name);
            }
            Ok(None) => {
                debug!("no active scene");
                self.active = None;
            }
            Err(e) => {
                error!("cannot read active scene: {}", e);
                self.active = None;
            }
        }
    }

    /// Persist both live slots
    pub fn save(&self) -> Result<(), StorageError> {
        if self.default.valid {
            self.default.scene.save()?;
        }
        if self.user.valid && !self.is_provisioning() {
            self.user.scene.save()?;
        }
        Ok(())
    }

    fn load_user(&mut self, name: &SceneName) {
        self.user
            .scene
            .retarget(name.clone(), self.paths.scene_file(name));
        match self.user.scene.restore() {
            Ok(()) => {
                self.user.valid = true;
                info!(
                    "scene {} loaded ({} rules)",
                    name,
                    self.user.scene.num_valid_rules()
                );
            }
            Err(e) => {
                self.user.valid = false;
                error!("scene {} unusable: {}", name, e);
            }
        }
    }

    /// Read the active-scene pointer file
    pub fn get_active_scene(&self) -> Result<Option<SceneName>, StorageError> {
        let path = &self.paths.active_scene;
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        let name = content.trim();
        if name.is_empty() {
            return Ok(None);
        }
        SceneName::new(name)
            .map(Some)
            .map_err(|e| StorageError::parse(path, 1, e.to_string()))
    }

    /// Write the active-scene pointer file
    pub fn set_active_scene(&self, name: &SceneName) -> Result<(), StorageError> {
        let path = &self.paths.active_scene;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(path, name.as_str()).map_err(|e| StorageError::io(path, e))
    }

    /// True when a file exists for `name`
    pub fn scene_exists(&self, name: &SceneName) -> bool {
        self.paths.scene_file(name).is_file()
    }

    /// Make a stored scene the active user scene
    pub fn activate_scene(&mut self, name: &SceneName) -> Result<(), SceneError> {
        if self.is_provisioning() {
            return Err(SceneError::ProvisioningInProgress);
        }
        if name.is_default() {
            return Err(SceneError::Protected(name.to_string()));
        }
        if !self.scene_exists(name) {
            return Err(SceneError::NotFound(name.to_string()));
        }

        self.set_active_scene(name)?;
        self.active = Some(name.clone());
        self.load_user(name);
        if self.user.valid {
            info!("scene {} activated", name);
        }
        Ok(())
    }

    /// Actions of every valid slot fired by the current event
    pub fn evaluate(
        &self,
        trigger_by_report: bool,
        report: Option<&DeviceRecord>,
        registry: &DeviceRegistry,
        clock: &dyn Clock,
    ) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.default.valid {
            actions.extend(self.default.scene.evaluate(trigger_by_report, report, registry, clock));
        }
        if self.user.valid && !self.is_provisioning() {
            actions.extend(self.user.scene.evaluate(trigger_by_report, report, registry, clock));
        }
        actions
    }

    /// Stored scenes other than `default` and the active one, sorted
    pub fn inactive_scenes(&self) -> Result<Vec<SceneName>, StorageError> {
        let dir = &self.paths.scenes_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(dir, e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(dir, e))?;
            if !entry.path().is_file() {
                continue;
            }
            let Some(name) = entry
                .file_name()
                .to_str()
                .and_then(|n| SceneName::new(n).ok())
            else {
                continue;
            };
            if name.is_default() || Some(&name) == self.active.as_ref() {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn check_unprotected(&self, name: &SceneName) -> Result<(), SceneError> {
        if self.is_provisioning() {
            return Err(SceneError::ProvisioningInProgress);
        }
        if name.is_default() || Some(name) == self.active.as_ref() {
            return Err(SceneError::Protected(name.to_string()));
        }
        Ok(())
    }

    /// Delete an inactive scene
    pub fn remove_scene(&mut self, name: &SceneName) -> Result<(), SceneError> {
        self.check_unprotected(name)?;
        let path = self.paths.scene_file(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("scene {} removed", name);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(SceneError::NotFound(name.to_string())),
            Err(e) => Err(StorageError::io(path, e).into()),
        }
    }

    /// Rename an inactive scene
    pub fn rename_scene(&mut self, old: &SceneName, new: &SceneName) -> Result<(), SceneError> {
        self.check_unprotected(old)?;
        self.check_unprotected(new)?;
        if !self.scene_exists(old) {
            return Err(SceneError::NotFound(old.to_string()));
        }
        if self.scene_exists(new) {
            return Err(SceneError::AlreadyExists(new.to_string()));
        }
        let from = self.paths.scene_file(old);
        fs::rename(&from, self.paths.scene_file(new)).map_err(|e| StorageError::io(from, e))?;
        info!("scene {} renamed to {}", old, new);
        Ok(())
    }

    /// A scene for reading: a live slot when loaded, storage otherwise
    pub fn scene(&self, name: &SceneName) -> Result<Cow<'_, Scene>, SceneError> {
        if name.is_default() && self.default.valid {
            return Ok(Cow::Borrowed(&self.default.scene));
        }
        if self.user.valid && !self.is_provisioning() && self.user.scene.name() == name {
            return Ok(Cow::Borrowed(&self.user.scene));
        }
        if !self.scene_exists(name) {
            return Err(SceneError::NotFound(name.to_string()));
        }
        let mut scene = Scene::new(name.clone(), self.paths.scene_file(name));
        scene.restore()?;
        Ok(Cow::Owned(scene))
    }

    /// Install a rule received over the wire
    ///
    /// During provisioning only the scene being uploaded accepts rules.
    /// Otherwise the named scene is updated and saved.
    pub fn set_rule(&mut self, name: &SceneName, index: usize, rule: Rule) -> Result<(), SceneError> {
        if let Some(session) = &self.session {
            if &session.scene != name {
                debug!("rule for {} dropped while provisioning {}", name, session.scene);
                return Err(SceneError::ProvisioningInProgress);
            }
            return self.user.scene.add_rule(rule, index);
        }

        if name.is_default() {
            self.default.scene.add_rule(rule, index)?;
            self.default.valid = true;
            return Ok(self.default.scene.save()?);
        }
        if self.user.valid && self.user.scene.name() == name {
            self.user.scene.add_rule(rule, index)?;
            return Ok(self.user.scene.save()?);
        }
        if !self.scene_exists(name) {
            return Err(SceneError::NotFound(name.to_string()));
        }
        let mut scene = Scene::new(name.clone(), self.paths.scene_file(name));
        scene.restore()?;
        scene.add_rule(rule, index)?;
        Ok(scene.save()?)
    }

    /// Start uploading scene `name` on behalf of `peer`
    ///
    /// Returns the `GET_NUM_OF_RULES` request for the peer. Requests for the
    /// active scene, the default scene or a second scene are ignored.
    pub fn begin_provisioning(&mut self, name: SceneName, peer: Origin) -> Vec<Envelope> {
        let previous = match &self.session {
            Some(session) if session.scene == name => {
                debug!("provisioning of {} restarted", name);
                session.previous.clone()
            }
            Some(session) => {
                warn!("SET_NEW_SCENE {} ignored, {} in progress", name, session.scene);
                return Vec::new();
            }
            None => {
                if Some(&name) == self.active.as_ref() {
                    info!("SET_NEW_SCENE {} ignored, scene is active", name);
                    return Vec::new();
                }
                if name.is_default() {
                    warn!("SET_NEW_SCENE for the default scene ignored");
                    return Vec::new();
                }
                self.active.clone()
            }
        };

        self.user
            .scene
            .retarget(name.clone(), self.paths.scene_file(&name));
        self.user.scene.new_scene();
        self.user.valid = false;
        self.session = Some(ProvisioningSession {
            scene: name.clone(),
            peer,
            previous,
            phase: ProvisioningPhase::AwaitingRuleCount {
                remaining_s: self.config.overall_timeout_s,
            },
        });
        info!("provisioning scene {}", name);

        vec![Envelope::new(peer, GffMessage::GetNumOfRules { scene: name })]
    }

    /// Handle the peer's rule count
    ///
    /// Returns the wildcard `GET_RULE_WITH_INDEXS` request.
    pub fn on_rule_count(&mut self, name: &SceneName, count: u16) -> Vec<Envelope> {
        let Some(session) = self.session.as_mut() else {
            debug!("SET_NUM_OF_RULES {} outside provisioning dropped", name);
            return Vec::new();
        };
        if &session.scene != name {
            debug!("SET_NUM_OF_RULES {} dropped while provisioning {}", name, session.scene);
            return Vec::new();
        }

        if let Err(e) = self.user.scene.expect_rules(count as usize) {
            warn!("provisioning {} abandoned: {}", name, e);
            self.end_session();
            return Vec::new();
        }

        session.phase = ProvisioningPhase::CollectingRules {
            expected: count,
            remaining_ms: count as u32 * self.config.per_rule_timeout_ms,
            resend_budget: self.config.resend_budget,
        };
        debug!("expecting {} rules for {}", count, name);

        vec![Envelope::new(
            session.peer,
            GffMessage::GetRuleWithIndex {
                scene: name.clone(),
                index: ALL_RULES,
            },
        )]
    }

    /// Advance the per-rule timer by `elapsed_ms`
    pub fn tick_fine(&mut self, elapsed_ms: u32) -> Vec<Envelope> {
        let expired = match self.session.as_mut().map(|s| &mut s.phase) {
            Some(ProvisioningPhase::CollectingRules { remaining_ms, .. }) => {
                *remaining_ms = remaining_ms.saturating_sub(elapsed_ms);
                *remaining_ms == 0
            }
            _ => false,
        };
        if expired {
            self.on_rule_timeout()
        } else {
            Vec::new()
        }
    }

    /// Advance the overall timer by one second
    ///
    /// Only runs until the rule count arrives; the per-rule timer decides
    /// from then on.
    pub fn tick_second(&mut self) {
        let expired = match self.session.as_mut().map(|s| &mut s.phase) {
            Some(ProvisioningPhase::AwaitingRuleCount { remaining_s }) => {
                *remaining_s = remaining_s.saturating_sub(1);
                *remaining_s == 0
            }
            _ => false,
        };
        if expired {
            if let Some(session) = &self.session {
                warn!("provisioning {} timed out waiting for rule count", session.scene);
            }
            self.end_session();
        }
    }

    fn on_rule_timeout(&mut self) -> Vec<Envelope> {
        let Some(session) = self.session.as_mut() else {
            return Vec::new();
        };
        let ProvisioningPhase::CollectingRules {
            expected,
            resend_budget,
            ..
        } = session.phase
        else {
            return Vec::new();
        };

        let mut missing = Vec::new();
        let mut next = self.user.scene.find_first_invalid(false);
        while let Some(index) = next {
            missing.push(index);
            next = self.user.scene.find_first_invalid(true);
        }

        let scene = session.scene.clone();
        let peer = session.peer;

        if missing.is_empty() {
            let mut out = Vec::new();
            match self.user.scene.save() {
                Ok(()) => {
                    info!("scene {} provisioned ({} rules)", scene, expected);
                    out.push(Envelope::new(peer, GffMessage::SetNewScene { scene }));
                }
                Err(e) => error!("cannot save provisioned scene {}: {}", scene, e),
            }
            self.end_session();
            return out;
        }

        if resend_budget == 0 {
            warn!("provisioning {} abandoned, {} rules missing", scene, missing.len());
            self.end_session();
            return Vec::new();
        }

        debug!("re-requesting rules {:?} of {}", missing, scene);
        session.phase = ProvisioningPhase::CollectingRules {
            expected,
            remaining_ms: missing.len() as u32 * self.config.per_rule_timeout_ms,
            resend_budget: resend_budget - 1,
        };
        missing
            .into_iter()
            .map(|index| {
                Envelope::new(
                    peer,
                    GffMessage::GetRuleWithIndex {
                        scene: scene.clone(),
                        index: index as u16,
                    },
                )
            })
            .collect()
    }

    /// Drop the session and bring back the previously active scene
    pub fn end_session(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        match session.previous {
            Some(name) => self.load_user(&name),
            None => {
                self.user.scene.new_scene();
                self.user.valid = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{device_type, DeviceId};
    use crate::rule::{CompareOp, Condition};
    use std::path::Path;

    fn name(s: &str) -> SceneName {
        SceneName::new(s).unwrap()
    }

    fn rule(value: i16) -> Rule {
        Rule::new(true)
            .with_input(Condition::Compare {
                op: CompareOp::Equal,
                device_id: DeviceId::new(1, 1, 0, device_type::BUTTON),
                value,
            })
            .unwrap()
            .with_output(Action::set_device_value(
                DeviceId::new(1, 2, 0, device_type::ON_OFF_OUTPUT),
                value,
            ))
            .unwrap()
    }

    fn manager(root: &Path) -> SceneManager {
        let mut manager = SceneManager::new(StoragePaths::new(root), ProvisioningConfig::default());
        manager.restore();
        manager
    }

    fn store_scene(root: &Path, scene: &str, rules: &[Rule]) {
        let mut s = Scene::new(name(scene), StoragePaths::new(root).scene_file(&name(scene)));
        for (i, r) in rules.iter().enumerate() {
            s.add_rule(r.clone(), i).unwrap();
        }
        s.save().unwrap();
    }

    #[test]
    fn test_restore_creates_default() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());
        assert!(manager.default_slot().valid);
        assert!(!manager.user_slot().valid);
        assert!(manager.active().is_none());
        assert!(dir.path().join("scenes").join("default").is_file());
    }

    #[test]
    fn test_activate_scene() {
        let dir = tempfile::tempdir().unwrap();
        store_scene(dir.path(), "night", &[rule(1)]);
        let mut manager = manager(dir.path());

        manager.activate_scene(&name("night")).unwrap();
        assert_eq!(manager.active(), Some(&name("night")));
        assert!(manager.user_slot().valid);
        assert_eq!(
            fs::read_to_string(dir.path().join("actscene")).unwrap(),
            "night"
        );

        // Survives a restart
        let restarted = self::manager(dir.path());
        assert_eq!(restarted.active(), Some(&name("night")));
        assert_eq!(restarted.user_slot().scene.num_valid_rules(), 1);

        assert!(matches!(
            manager.activate_scene(&name("ghost")),
            Err(SceneError::NotFound(_))
        ));
        assert!(matches!(
            manager.activate_scene(&name("default")),
            Err(SceneError::Protected(_))
        ));
    }

    #[test]
    fn test_inactive_scenes_and_housekeeping() {
        let dir = tempfile::tempdir().unwrap();
        store_scene(dir.path(), "night", &[rule(1)]);
        store_scene(dir.path(), "away", &[]);
        store_scene(dir.path(), "party", &[]);
        let mut manager = manager(dir.path());
        manager.activate_scene(&name("night")).unwrap();

        assert_eq!(
            manager.inactive_scenes().unwrap(),
            vec![name("away"), name("party")]
        );

        assert!(matches!(
            manager.remove_scene(&name("night")),
            Err(SceneError::Protected(_))
        ));
        assert!(matches!(
            manager.rename_scene(&name("default"), &name("x")),
            Err(SceneError::Protected(_))
        ));
        assert!(matches!(
            manager.rename_scene(&name("away"), &name("party")),
            Err(SceneError::AlreadyExists(_))
        ));

        manager.rename_scene(&name("away"), &name("holiday")).unwrap();
        manager.remove_scene(&name("party")).unwrap();
        assert_eq!(manager.inactive_scenes().unwrap(), vec![name("holiday")]);
        assert!(matches!(
            manager.remove_scene(&name("party")),
            Err(SceneError::NotFound(_))
        ));
    }

    #[test]
    fn test_set_rule_outside_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        store_scene(dir.path(), "night", &[rule(1)]);
        store_scene(dir.path(), "away", &[]);
        let mut manager = manager(dir.path());
        manager.activate_scene(&name("night")).unwrap();

        manager.set_rule(&name("night"), 1, rule(2)).unwrap();
        assert_eq!(manager.user_slot().scene.num_valid_rules(), 2);

        manager.set_rule(&name("default"), 0, rule(3)).unwrap();
        assert_eq!(manager.default_slot().scene.get_rule(0).unwrap(), &rule(3));

        manager.set_rule(&name("away"), 4, rule(4)).unwrap();
        let away = manager.scene(&name("away")).unwrap();
        assert!(matches!(away, Cow::Owned(_)));
        assert_eq!(away.get_rule(4).unwrap(), &rule(4));

        assert!(matches!(
            manager.set_rule(&name("ghost"), 0, rule(1)),
            Err(SceneError::NotFound(_))
        ));
    }

    #[test]
    fn test_provisioning_happy_path() {
        let dir = tempfile::tempdir().unwrap();
        store_scene(dir.path(), "night", &[rule(1)]);
        let mut manager = manager(dir.path());
        manager.activate_scene(&name("night")).unwrap();

        let out = manager.begin_provisioning(name("testA"), Origin::Ble);
        assert_eq!(
            out,
            vec![Envelope::new(
                Origin::Ble,
                GffMessage::GetNumOfRules {
                    scene: name("testA")
                }
            )]
        );
        assert!(!manager.user_slot().valid);

        let out = manager.on_rule_count(&name("testA"), 2);
        assert_eq!(
            out[0].message,
            GffMessage::GetRuleWithIndex {
                scene: name("testA"),
                index: ALL_RULES
            }
        );

        manager.set_rule(&name("testA"), 1, rule(6)).unwrap();
        manager.set_rule(&name("testA"), 0, rule(5)).unwrap();

        assert!(manager.tick_fine(1999).is_empty());
        let out = manager.tick_fine(1);
        assert_eq!(
            out,
            vec![Envelope::new(
                Origin::Ble,
                GffMessage::SetNewScene {
                    scene: name("testA")
                }
            )]
        );

        assert!(!manager.is_provisioning());
        assert_eq!(manager.active(), Some(&name("night")));
        assert_eq!(manager.user_slot().scene.name(), &name("night"));
        assert!(manager.user_slot().valid);

        let saved = manager.scene(&name("testA")).unwrap();
        assert_eq!(saved.cur_num_rules(), 2);
        assert_eq!(saved.get_rule(0).unwrap(), &rule(5));
    }

    #[test]
    fn test_provisioning_resend_then_abandon() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path());

        manager.begin_provisioning(name("testB"), Origin::Ble);
        manager.on_rule_count(&name("testB"), 3);
        manager.set_rule(&name("testB"), 1, rule(1)).unwrap();

        let out = manager.tick_fine(3000);
        let indexes: Vec<_> = out
            .iter()
            .map(|e| match &e.message {
                GffMessage::GetRuleWithIndex { index, .. } => *index,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        assert_eq!(indexes, vec![0, 2]);
        assert!(manager.is_provisioning());

        // Budget spent: next timeout gives up
        assert!(manager.tick_fine(2000).is_empty());
        assert!(!manager.is_provisioning());
        assert!(!manager.scene_exists(&name("testB")));
        assert!(!manager.user_slot().valid);
    }

    #[test]
    fn test_provisioning_resend_recovers() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path());

        manager.begin_provisioning(name("testC"), Origin::Ble);
        manager.on_rule_count(&name("testC"), 2);
        manager.set_rule(&name("testC"), 0, rule(1)).unwrap();
        assert_eq!(manager.tick_fine(2000).len(), 1);

        manager.set_rule(&name("testC"), 1, rule(2)).unwrap();
        let out = manager.tick_fine(1000);
        assert!(matches!(out[0].message, GffMessage::SetNewScene { .. }));
        assert!(manager.scene_exists(&name("testC")));
    }

    #[test]
    fn test_session_affinity() {
        let dir = tempfile::tempdir().unwrap();
        store_scene(dir.path(), "other", &[]);
        let mut manager = manager(dir.path());

        manager.begin_provisioning(name("testA"), Origin::Ble);
        assert!(manager
            .begin_provisioning(name("testB"), Origin::Ble)
            .is_empty());
        assert!(manager.on_rule_count(&name("testB"), 1).is_empty());
        assert_eq!(
            manager.set_rule(&name("other"), 0, rule(1)),
            Err(SceneError::ProvisioningInProgress)
        );
        assert_eq!(
            manager.activate_scene(&name("other")),
            Err(SceneError::ProvisioningInProgress)
        );
        assert_eq!(manager.session().unwrap().scene, name("testA"));
    }

    #[test]
    fn test_overall_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path());
        manager.begin_provisioning(name("slow"), Origin::Ble);
        for _ in 0..24 {
            manager.tick_second();
        }
        assert!(manager.is_provisioning());
        manager.tick_second();
        assert!(!manager.is_provisioning());
    }

    #[test]
    fn test_rule_timer_takes_over_from_overall_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path());
        manager.begin_provisioning(name("big"), Origin::Ble);
        manager.on_rule_count(&name("big"), 25);
        for _ in 0..30 {
            manager.tick_second();
        }
        assert!(manager.is_provisioning());
    }

    #[test]
    fn test_active_scene_not_reprovisioned() {
        let dir = tempfile::tempdir().unwrap();
        store_scene(dir.path(), "night", &[]);
        let mut manager = manager(dir.path());
        manager.activate_scene(&name("night")).unwrap();
        assert!(manager
            .begin_provisioning(name("night"), Origin::Ble)
            .is_empty());
        assert!(!manager.is_provisioning());
    }

    #[test]
    fn test_too_many_rules_abandons() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = manager(dir.path());
        manager.begin_provisioning(name("huge"), Origin::Ble);
        assert!(manager.on_rule_count(&name("huge"), 26).is_empty());
        assert!(!manager.is_provisioning());
    }
}
