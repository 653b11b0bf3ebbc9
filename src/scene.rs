// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Scenes
//!
//! A [`Scene`] is a fixed table of [`SCENE_MAX_RULES`] rule slots backed by
//! one file. Slots `0..cur_num_rules()` are in use; a slot may still be
//! invalid while a scene is being filled in.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::error::{SceneError, StorageError};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::rule::{Action, ActionKind, Rule};
use crate::time::Clock;

/// Rule slots per scene
pub const SCENE_MAX_RULES: usize = 25;

/// Scene name field size on the wire
pub const SCENE_NAME_SIZE: usize = 8;

/// Name of the always-loaded scene
pub const DEFAULT_SCENE_NAME: &str = "default";

/// Validated scene name: 1 to 8 bytes, usable as a file name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SceneName(String);

impl SceneName {
    /// Validate a name
    pub fn new(name: impl Into<String>) -> Result<Self, SceneError> {
        let name = name.into();
        let usable = !name.is_empty()
            && name.len() <= SCENE_NAME_SIZE
            && name != "."
            && name != ".."
            && name
                .bytes()
                .all(|b| b.is_ascii_graphic() && b != b'/' && b != b'\\');
        if usable {
            Ok(Self(name))
        } else {
            Err(SceneError::InvalidName(name))
        }
    }

    /// The default scene's name
    pub fn default_scene() -> Self {
        Self(DEFAULT_SCENE_NAME.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the default scene
    pub fn is_default(&self) -> bool {
        self.0 == DEFAULT_SCENE_NAME
    }

    /// Null-padded wire field
    pub fn to_field(&self) -> [u8; SCENE_NAME_SIZE] {
        let mut field = [0u8; SCENE_NAME_SIZE];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }

    /// Decode a null-padded wire field
    pub fn from_field(field: &[u8]) -> Result<Self, SceneError> {
        let field = &field[..SCENE_NAME_SIZE.min(field.len())];
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let name = std::str::from_utf8(&field[..end])
            .map_err(|_| SceneError::InvalidName(String::from_utf8_lossy(field).into_owned()))?;
        Self::new(name)
    }
}

impl fmt::Display for SceneName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fixed-capacity rule table bound to a file
#[derive(Debug, Clone)]
pub struct Scene {
    name: SceneName,
    path: PathBuf,
    rules: Vec<Rule>,
    cur_num_rules: usize,
    invalid_cursor: Option<usize>,
}

impl Scene {
    /// Create an empty scene backed by `path`
    pub fn new(name: SceneName, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
            rules: vec![Rule::default(); SCENE_MAX_RULES],
            cur_num_rules: 0,
            invalid_cursor: None,
        }
    }

    pub fn name(&self) -> &SceneName {
        &self.name
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Point the scene at another name and file; rules are kept
    pub fn retarget(&mut self, name: SceneName, path: impl Into<PathBuf>) {
        self.name = name;
        self.path = path.into();
    }

    /// Number of slots in use
    pub fn cur_num_rules(&self) -> usize {
        self.cur_num_rules
    }

    /// Number of valid rules
    pub fn num_valid_rules(&self) -> usize {
        self.valid_rules().count()
    }

    /// Valid rules with their slot index
    pub fn valid_rules(&self) -> impl Iterator<Item = (usize, &Rule)> {
        self.rules[..self.cur_num_rules]
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_valid)
    }

    /// Invalidate every slot
    pub fn new_scene(&mut self) {
        self.rules.fill(Rule::default());
        self.cur_num_rules = 0;
        self.invalid_cursor = None;
    }

    fn check_index(index: usize) -> Result<(), SceneError> {
        if index >= SCENE_MAX_RULES {
            return Err(SceneError::IndexOutOfRange {
                index,
                max: SCENE_MAX_RULES - 1,
            });
        }
        Ok(())
    }

    /// Install `rule` at `index`, growing the used range when needed
    pub fn add_rule(&mut self, rule: Rule, index: usize) -> Result<(), SceneError> {
        Self::check_index(index)?;
        self.rules[index] = rule;
        if index >= self.cur_num_rules {
            self.cur_num_rules = index + 1;
        }
        Ok(())
    }

    /// Valid rule at `index`
    pub fn get_rule(&self, index: usize) -> Result<&Rule, SceneError> {
        Self::check_index(index)?;
        let rule = &self.rules[index];
        if index >= self.cur_num_rules || !rule.is_valid {
            return Err(SceneError::EmptySlot(index));
        }
        Ok(rule)
    }

    /// Invalidate the rule at `index`
    pub fn remove_rule(&mut self, index: usize) -> Result<Rule, SceneError> {
        Self::check_index(index)?;
        Ok(std::mem::take(&mut self.rules[index]))
    }

    /// Declare `count` slots in use, all invalid until filled
    pub fn expect_rules(&mut self, count: usize) -> Result<(), SceneError> {
        if count > SCENE_MAX_RULES {
            return Err(SceneError::IndexOutOfRange {
                index: count - 1,
                max: SCENE_MAX_RULES - 1,
            });
        }
        self.cur_num_rules = count;
        self.invalid_cursor = None;
        Ok(())
    }

    /// First invalid slot in `0..cur_num_rules()`
    ///
    /// With `cont` set the scan resumes after the slot returned by the
    /// previous call; with no previous hit it starts from 0.
    pub fn find_first_invalid(&mut self, cont: bool) -> Option<usize> {
        let start = match (cont, self.invalid_cursor) {
            (true, Some(previous)) => previous + 1,
            _ => 0,
        };
        let found = (start..self.cur_num_rules).find(|&i| !self.rules[i].is_valid);
        if found.is_some() {
            self.invalid_cursor = found;
        }
        found
    }

    /// Actions of every rule fired by the current event
    ///
    /// For a report, `report` carries the new value while `registry` still
    /// holds the old one.
    pub fn evaluate(
        &self,
        trigger_by_report: bool,
        report: Option<&DeviceRecord>,
        registry: &DeviceRegistry,
        clock: &dyn Clock,
    ) -> Vec<Action> {
        let now = clock.now();
        let mut actions = Vec::new();
        for (index, rule) in self.valid_rules() {
            if !rule.fires(trigger_by_report, report, registry, now) {
                continue;
            }
            debug!("scene {} rule {} fired", self.name, index);
            for action in rule.outputs() {
                match action.kind {
                    ActionKind::SetDeviceValue => actions.push(*action),
                    kind => debug!("scene {} rule {}: {:?} not supported", self.name, index, kind),
                }
            }
        }
        actions
    }

    /// Write slots `0..cur_num_rules()` to the backing file
    pub fn save(&self) -> Result<(), StorageError> {
        let content: String = self.rules[..self.cur_num_rules]
            .iter()
            .map(|rule| rule.record().to_string())
            .collect();
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(&self.path, content).map_err(|e| StorageError::io(&self.path, e))
    }

    /// Reload from the backing file
    ///
    /// The scene is emptied first and stays empty on any error.
    pub fn restore(&mut self) -> Result<(), StorageError> {
        self.new_scene();
        let result = fs::read_to_string(&self.path)
            .map_err(|e| StorageError::io(&self.path, e))
            .and_then(|content| self.load_records(&content));
        if let Err(ref e) = result {
            if !e.is_not_found() {
                warn!("scene {} restore failed: {}", self.name, e);
            }
            self.new_scene();
        }
        result
    }

    fn load_records(&mut self, content: &str) -> Result<(), StorageError> {
        let path = self.path.clone();
        let mut lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| (i + 1, line))
            .filter(|(_, line)| !line.trim().is_empty());

        let mut index = 0;
        while let Some(rule) = Rule::read_record(&mut lines, &path)? {
            self.add_rule(rule, index).map_err(|e| {
                StorageError::parse(&path, 0, format!("rule {}: {}", index, e))
            })?;
            index += 1;
        }
        Ok(())
    }
}

impl fmt::Display for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "scene {} ({} of {} rules valid)",
            self.name,
            self.num_valid_rules(),
            self.cur_num_rules
        )?;
        for (index, rule) in self.rules[..self.cur_num_rules].iter().enumerate() {
            writeln!(f, "{:>3}: {}", index, rule)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{device_type, DeviceId};
    use crate::rule::{CompareOp, Condition};
    use crate::time::{FixedClock, PackedTime};

    const BUTTON: DeviceId = DeviceId::new(2, 1, 0, device_type::BUTTON);
    const LAMP: DeviceId = DeviceId::new(2, 3, 0, device_type::ON_OFF_OUTPUT);

    fn button_rule(value: i16, lamp: i16) -> Rule {
        Rule::new(true)
            .with_input(Condition::Compare {
                op: CompareOp::Equal,
                device_id: BUTTON,
                value,
            })
            .unwrap()
            .with_output(Action::set_device_value(LAMP, lamp))
            .unwrap()
    }

    fn scene_in(dir: &Path) -> Scene {
        let name = SceneName::new("evening").unwrap();
        Scene::new(name, dir.join("scenes").join("evening"))
    }

    #[test]
    fn test_scene_name_rules() {
        assert!(SceneName::new("testA").is_ok());
        assert!(SceneName::new("12345678").is_ok());
        assert!(SceneName::new("").is_err());
        assert!(SceneName::new("123456789").is_err());
        assert!(SceneName::new("a/b").is_err());
        assert!(SceneName::new("..").is_err());
        assert!(SceneName::new("a b").is_err());
        assert!(SceneName::default_scene().is_default());
    }

    #[test]
    fn test_scene_name_field() {
        let name = SceneName::new("testA").unwrap();
        let field = name.to_field();
        assert_eq!(&field, b"testA\0\0\0");
        assert_eq!(SceneName::from_field(&field).unwrap(), name);
        assert!(SceneName::from_field(&[0u8; 8]).is_err());
        assert_eq!(
            SceneName::from_field(b"fullname").unwrap().as_str(),
            "fullname"
        );
    }

    #[test]
    fn test_add_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.add_rule(button_rule(1, 1), 3).unwrap();
        assert_eq!(scene.cur_num_rules(), 4);
        assert_eq!(scene.get_rule(3).unwrap(), &button_rule(1, 1));
        assert_eq!(scene.get_rule(0), Err(SceneError::EmptySlot(0)));

        let removed = scene.remove_rule(3).unwrap();
        assert!(removed.is_valid);
        assert_eq!(scene.get_rule(3), Err(SceneError::EmptySlot(3)));
        assert_eq!(scene.cur_num_rules(), 4);
    }

    #[test]
    fn test_index_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        let err = scene.add_rule(button_rule(1, 1), SCENE_MAX_RULES);
        assert_eq!(
            err,
            Err(SceneError::IndexOutOfRange {
                index: SCENE_MAX_RULES,
                max: SCENE_MAX_RULES - 1
            })
        );
        assert!(scene.get_rule(SCENE_MAX_RULES).is_err());
        assert!(scene.remove_rule(99).is_err());
        assert_eq!(scene.cur_num_rules(), 0);
    }

    #[test]
    fn test_find_first_invalid_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.expect_rules(5).unwrap();
        scene.add_rule(button_rule(1, 1), 0).unwrap();
        scene.add_rule(button_rule(1, 1), 2).unwrap();

        assert_eq!(scene.find_first_invalid(false), Some(1));
        assert_eq!(scene.find_first_invalid(true), Some(3));
        assert_eq!(scene.find_first_invalid(true), Some(4));
        assert_eq!(scene.find_first_invalid(true), None);
        assert_eq!(scene.find_first_invalid(false), Some(1));

        scene.new_scene();
        assert_eq!(scene.find_first_invalid(true), None);
    }

    #[test]
    fn test_unseeded_continue_scans_from_zero() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.expect_rules(2).unwrap();
        assert_eq!(scene.find_first_invalid(true), Some(0));
    }

    #[test]
    fn test_evaluate_emits_actions() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.add_rule(button_rule(1, 100), 0).unwrap();
        scene.add_rule(button_rule(0, 0), 1).unwrap();

        let registry = DeviceRegistry::new(4);
        let clock = FixedClock::new(PackedTime(0));
        let press = DeviceRecord {
            device_id: BUTTON,
            value: 1,
            ttl: 0,
        };
        let actions = scene.evaluate(true, Some(&press), &registry, &clock);
        assert_eq!(actions, vec![Action::set_device_value(LAMP, 100)]);
    }

    #[test]
    fn test_reserved_actions_not_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        let mut rule = button_rule(1, 1);
        rule.push_output(Action {
            kind: ActionKind::SetMultiValue,
            device_id: LAMP,
            value: 2,
        })
        .unwrap();
        scene.add_rule(rule, 0).unwrap();

        let registry = DeviceRegistry::new(4);
        let press = DeviceRecord {
            device_id: BUTTON,
            value: 1,
            ttl: 0,
        };
        let actions = scene.evaluate(true, Some(&press), &registry, &FixedClock::default());
        assert_eq!(actions, vec![Action::set_device_value(LAMP, 1)]);
    }

    #[test]
    fn test_save_restore() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.add_rule(button_rule(1, 1), 0).unwrap();
        scene.add_rule(button_rule(0, 0), 2).unwrap();
        scene.save().unwrap();

        let mut restored = scene_in(dir.path());
        restored.restore().unwrap();
        assert_eq!(restored.cur_num_rules(), 3);
        assert_eq!(restored.get_rule(0).unwrap(), &button_rule(1, 1));
        assert!(restored.get_rule(1).is_err());
        assert_eq!(restored.get_rule(2).unwrap(), &button_rule(0, 0));
    }

    #[test]
    fn test_restore_missing_or_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.add_rule(button_rule(1, 1), 0).unwrap();
        assert!(scene.restore().unwrap_err().is_not_found());
        assert_eq!(scene.cur_num_rules(), 0);

        fs::create_dir_all(dir.path().join("scenes")).unwrap();
        fs::write(scene.path(), "R: 1 1 0 0\nR: 1 1 x 0\n").unwrap();
        assert!(matches!(
            scene.restore(),
            Err(StorageError::Parse { line: 2, .. })
        ));
        assert_eq!(scene.cur_num_rules(), 0);
    }

    #[test]
    fn test_display() {
        let dir = tempfile::tempdir().unwrap();
        let mut scene = scene_in(dir.path());
        scene.add_rule(button_rule(1, 1), 1).unwrap();
        let text = scene.to_string();
        assert!(text.starts_with("scene evening (1 of 2 rules valid)"));
        assert!(text.contains("  0: <empty>"));
    }
}
