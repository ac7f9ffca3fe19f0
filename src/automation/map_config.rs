//! Map definitions.
//!
//! Each playable map lives in `maps/<difficulty>/<MAP>.json`:
//!
//! ```json
//! {
//!   "hero": "OBYN",
//!   "towers": {
//!     "HERO0": { "type": "HERO", "coords": { "x": 0.41, "y": 0.55 } },
//!     "DART1": { "type": "DART", "coords": { "x": 0.30, "y": 0.62 } }
//!   },
//!   "instructions": {
//!     "start": ["place HERO0"],
//!     "milestones": { "10": ["place DART1"], "24": ["upgrade DART1 1 1"] },
//!     "end": []
//!   }
//! }
//! ```
//!
//! Loading validates every instruction against the tower table and the
//! global button and shortcut tables.

use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;
use tracing::{debug, warn};

use crate::automation::config::{AutomationConfig, RelativePoint, StartMode};
use crate::automation::instruction::Instruction;

/// Tower type whose placement needs extra key presses.
pub const HERO_TOWER_TYPE: &str = "HERO";

/// Placeholder in button names replaced by the map's hero.
const HERO_PLACEHOLDER: &str = "{hero}";

#[derive(Debug, Error)]
pub enum MapConfigError {
    #[error("map {name} not found in {}", dir.display())]
    NotFound { name: String, dir: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{context}: '{raw}' is not a valid instruction ({reason})")]
    InvalidInstruction {
        context: String,
        raw: String,
        reason: String,
    },

    #[error("{context}: unknown tower {tower}")]
    UnknownTower { context: String, tower: String },

    #[error("{context}: unknown button {button}")]
    UnknownButton { context: String, button: String },

    #[error("no keyboard shortcut for {name}")]
    MissingShortcut { name: String },
}

#[derive(Clone, Debug, Deserialize)]
pub struct TowerConfig {
    #[serde(rename = "type")]
    pub tower_type: String,
    pub coords: RelativePoint,
}

impl TowerConfig {
    pub fn is_hero(&self) -> bool {
        self.tower_type == HERO_TOWER_TYPE
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct MapInstructions {
    pub start: Vec<Instruction>,
    /// Round threshold → instructions to run once that round is reached
    pub milestones: BTreeMap<u32, Vec<Instruction>>,
    pub end: Vec<Instruction>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct MapConfig {
    /// File stem, filled in by [`MapConfig::load`]
    #[serde(skip)]
    pub name: String,
    pub hero: String,
    #[serde(default)]
    pub towers: BTreeMap<String, TowerConfig>,
    #[serde(default)]
    pub instructions: MapInstructions,
}

impl MapConfig {
    /// Loads `<maps_dir>/<difficulty>/<name>.json`.
    ///
    /// Every validation problem is logged. With `strict_instructions` the
    /// first problem is returned as the error, otherwise the map loads and
    /// offending instructions are skipped at runtime.
    pub fn load(
        maps_dir: &Path,
        difficulty: &str,
        name: &str,
        config: &AutomationConfig,
    ) -> Result<Self, MapConfigError> {
        let dir = maps_dir.join(difficulty);
        let path = dir.join(format!("{}.json", name));
        if !path.exists() {
            return Err(MapConfigError::NotFound {
                name: name.to_string(),
                dir,
            });
        }

        let contents = fs::read_to_string(&path).map_err(|source| MapConfigError::Io {
            path: path.clone(),
            source,
        })?;
        let mut map: MapConfig =
            serde_json::from_str(&contents).map_err(|source| MapConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        map.name = name.to_string();

        let mut problems = map.validate(config);
        for problem in &problems {
            warn!("Map {}: {}", map.name, problem);
        }
        if config.strict_instructions && !problems.is_empty() {
            return Err(problems.swap_remove(0));
        }

        debug!(
            "Loaded map {} ({} towers, {} milestones)",
            map.name,
            map.towers.len(),
            map.instructions.milestones.len()
        );
        Ok(map)
    }

    /// Replaces `{hero}` in a button name with this map's hero.
    pub fn resolve_button(&self, button: &str) -> String {
        button.replace(HERO_PLACEHOLDER, &self.hero)
    }

    /// Checks the map against the global tables. Returns every problem found.
    pub fn validate(&self, config: &AutomationConfig) -> Vec<MapConfigError> {
        let mut problems = Vec::new();

        for tower in self.towers.values() {
            if !config.tower_shortcuts.contains_key(&tower.tower_type) {
                push_unique(
                    &mut problems,
                    MapConfigError::MissingShortcut {
                        name: tower.tower_type.clone(),
                    },
                );
            }
        }

        let mut groups: Vec<(String, &[Instruction])> =
            vec![("start".to_string(), self.instructions.start.as_slice())];
        for (round, instructions) in &self.instructions.milestones {
            groups.push((format!("round {}", round), instructions.as_slice()));
        }
        groups.push(("end".to_string(), self.instructions.end.as_slice()));
        if config.start_mode == StartMode::CollectionEvent {
            groups.push((
                "collection_event_enter_map".to_string(),
                config.sequences.collection_event_enter_map.as_slice(),
            ));
        }

        for (context, instructions) in groups {
            for instruction in instructions {
                self.check_instruction(&context, instruction, config, &mut problems);
            }
        }

        problems
    }

    fn check_instruction(
        &self,
        context: &str,
        instruction: &Instruction,
        config: &AutomationConfig,
        problems: &mut Vec<MapConfigError>,
    ) {
        if let Some(tower) = instruction.tower() {
            if !self.towers.contains_key(tower) {
                problems.push(MapConfigError::UnknownTower {
                    context: context.to_string(),
                    tower: tower.to_string(),
                });
            }
        }

        match instruction {
            Instruction::Unrecognized { raw, reason } => {
                problems.push(MapConfigError::InvalidInstruction {
                    context: context.to_string(),
                    raw: raw.clone(),
                    reason: reason.clone(),
                });
            }
            Instruction::Upgrade { paths, .. } => {
                for path in paths {
                    if !config.tower_shortcuts.contains_key(path.shortcut_name()) {
                        push_unique(
                            problems,
                            MapConfigError::MissingShortcut {
                                name: path.shortcut_name().to_string(),
                            },
                        );
                    }
                }
            }
            Instruction::Click { button } => {
                let button = self.resolve_button(button);
                if !config.button_positions.contains_key(&button) {
                    problems.push(MapConfigError::UnknownButton {
                        context: context.to_string(),
                        button,
                    });
                }
            }
            _ => {}
        }
    }
}

fn push_unique(problems: &mut Vec<MapConfigError>, problem: MapConfigError) {
    let message = problem.to_string();
    if !problems.iter().any(|p| p.to_string() == message) {
        problems.push(problem);
    }
}

/// Lists the map names (file stems) available for a difficulty, sorted.
pub fn list_maps(maps_dir: &Path, difficulty: &str) -> std::io::Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(maps_dir.join(difficulty))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

/// Uppercases and strips everything outside A-Z.
fn normalize_map_name(text: &str) -> String {
    static NON_LETTERS: OnceLock<Regex> = OnceLock::new();
    let re = NON_LETTERS.get_or_init(|| Regex::new(r"[^A-Z]+").expect("valid regex"));
    re.replace_all(&text.to_ascii_uppercase(), "").into_owned()
}

fn levenshtein(a: &[char], b: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            curr[j + 1] = substitution.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Similarity in [0, 1]: 1 minus the edit distance over the longer length.
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a: Vec<char> = normalize_map_name(a).chars().collect();
    let b: Vec<char> = normalize_map_name(b).chars().collect();
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(&a, &b) as f32 / longest as f32
}

/// Picks the candidate most similar to an OCR'd map name.
///
/// Returns `None` when no candidate reaches `cutoff`. Ties go to the
/// earlier candidate.
pub fn find_best_map_match(ocr_text: &str, candidates: &[String], cutoff: f32) -> Option<String> {
    let mut best: Option<(&String, f32)> = None;
    for candidate in candidates {
        let score = name_similarity(ocr_text, candidate);
        debug!("Map match {} vs {}: {:.2}", ocr_text, candidate, score);
        if score >= cutoff && best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((candidate, score));
        }
    }
    best.map(|(name, _)| name.clone())
}
