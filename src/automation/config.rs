//! Configuration types for automation.
//!
//! Loads settings from config.json at startup. Provides button positions,
//! tower shortcuts, the round-counter region, monitor and escalation
//! thresholds, timing parameters and the named UI sequences.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

use crate::automation::instruction::Instruction;

/// Global configuration instance, initialized once at startup.
static CONFIG: OnceLock<AutomationConfig> = OnceLock::new();

/// A rectangle in relative coordinates (0.0 to 1.0) of the game client area.
/// Used for screen regions that scale with window size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativeRect {
    /// X position of top-left corner (0.0 = left edge, 1.0 = right edge)
    pub x: f32,
    /// Y position of top-left corner (0.0 = top edge, 1.0 = bottom edge)
    pub y: f32,
    /// Width as fraction of window width
    pub width: f32,
    /// Height as fraction of window height
    pub height: f32,
}

impl Default for RelativeRect {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: 0.1,
            height: 0.1,
        }
    }
}

/// A point in relative coordinates, used for buttons and tower positions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RelativePoint {
    /// X position (0.0 = left edge, 1.0 = right edge)
    pub x: f32,
    /// Y position (0.0 = top edge, 1.0 = bottom edge)
    pub y: f32,
}

impl RelativePoint {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Default for RelativePoint {
    fn default() -> Self {
        Self { x: 0.5, y: 0.5 }
    }
}

/// How a run gets from the home screen into a map.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartMode {
    /// Enter the collection event, read the offered map name and play it.
    #[default]
    CollectionEvent,
    /// Always play `default_map` through the `fixed_map_start` sequence.
    FixedMap,
}

/// Round counter polling and the plausibility model applied to each reading.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Region holding the "<current>/<total>" round counter
    pub round_region: RelativeRect,
    /// Delay between two OCR samples (milliseconds)
    pub poll_interval_ms: u64,
    /// Round number assumed at the start of every run
    pub baseline_round: u32,
    /// Expected right-hand side of the counter
    pub total_rounds: u32,
    /// Readings must be below `current + max_round_jump`
    pub max_round_jump: u32,
    /// Jumps that are recurring OCR misreads on some maps and never accepted
    pub excluded_jumps: Vec<u32>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            round_region: RelativeRect {
                x: 0.745,
                y: 0.025,
                width: 0.09,
                height: 0.05,
            },
            poll_interval_ms: 500,
            baseline_round: 5,
            total_rounds: 100,
            max_round_jump: 6,
            excluded_jumps: vec![10, 11, 12],
        }
    }
}

/// Failure-count thresholds driving the outer loop's recovery heuristics.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// How often the controller inspects the failure counter (milliseconds)
    pub check_interval_ms: u64,
    /// Failures after which a level-up screen is assumed (~1.5 minutes)
    pub level_up_failures: u32,
    /// Failures after which the run is assumed lost (~5 minutes)
    pub defeat_failures: u32,
    /// Pause after returning home from a defeat (milliseconds)
    pub defeat_settle_ms: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 500,
            level_up_failures: 180,
            defeat_failures: 600,
            defeat_settle_ms: 3000,
        }
    }
}

/// Pauses inserted between automated actions so the game UI can keep up.
/// All values are milliseconds.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub instruction_settle_ms: u64,
    pub place_key_delay_ms: u64,
    pub select_delay_ms: u64,
    pub upgrade_key_delay_ms: u64,
    pub dismiss_delay_ms: u64,
    pub retarget_select_delay_ms: u64,
    pub retarget_key_delay_ms: u64,
    pub focus_delay_ms: u64,
    pub focus_restore_delay_ms: u64,
    /// Wait before end-of-map handling so the last round can resolve
    pub final_round_settle_ms: u64,
    pub map_load_delay_ms: u64,
    /// Wait before retrying after a run could not be started
    pub retry_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            instruction_settle_ms: 500,
            place_key_delay_ms: 1000,
            select_delay_ms: 1000,
            upgrade_key_delay_ms: 500,
            dismiss_delay_ms: 300,
            retarget_select_delay_ms: 500,
            retarget_key_delay_ms: 100,
            focus_delay_ms: 300,
            focus_restore_delay_ms: 50,
            final_round_settle_ms: 30_000,
            map_load_delay_ms: 3000,
            retry_delay_ms: 10_000,
        }
    }
}

impl Timings {
    /// Converts one of the millisecond fields to a `Duration`.
    pub fn ms(value: u64) -> Duration {
        Duration::from_millis(value)
    }

    /// All pauses disabled. Used by tests.
    #[cfg(test)]
    pub fn instant() -> Self {
        Self {
            instruction_settle_ms: 0,
            place_key_delay_ms: 0,
            select_delay_ms: 0,
            upgrade_key_delay_ms: 0,
            dismiss_delay_ms: 0,
            retarget_select_delay_ms: 0,
            retarget_key_delay_ms: 0,
            focus_delay_ms: 0,
            focus_restore_delay_ms: 0,
            final_round_settle_ms: 0,
            map_load_delay_ms: 0,
            retry_delay_ms: 0,
        }
    }
}

/// In-run points and the reward they unlock.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Points already banked when the process starts
    pub initial_points: u32,
    /// Points earned per completed map
    pub points_per_run: u32,
    /// Points spent per reward collection
    pub points_to_collect: u32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            initial_points: 37,
            points_per_run: 14,
            points_to_collect: 70,
        }
    }
}

/// Named UI sequences run outside of map milestones.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Sequences {
    /// Home screen → collection event map list
    pub collection_event_open: Vec<Instruction>,
    /// Map list → hero selection (`{hero}`) → map started
    pub collection_event_enter_map: Vec<Instruction>,
    /// Home screen → `default_map` started
    pub fixed_map_start: Vec<Instruction>,
    /// Starts the first round after the map's start instructions
    pub start_rounds: Vec<Instruction>,
    /// Victory screen → home screen
    pub end_of_map: Vec<Instruction>,
    /// Spends collected points on the reward screen
    pub reward_collection: Vec<Instruction>,
    /// Clicks through a presumed level-up screen
    pub level_up_dismiss: Vec<Instruction>,
    /// Defeat screen → home screen
    pub defeat_return_home: Vec<Instruction>,
}

fn sequence(lines: &[&str]) -> Vec<Instruction> {
    lines.iter().map(|line| Instruction::parse(line)).collect()
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            collection_event_open: sequence(&[
                "click COLLECTION_EVENT_SELECT",
                "click COLLECTION_EVENT_START",
                "wait 1000",
            ]),
            collection_event_enter_map: sequence(&[
                "click HERO_SELECT_IN_MAP_SELECT",
                "click {hero}_SELECT",
                "click HERO_SELECT_CONFIRM",
                "click BACK_BUTTON",
                "click BACK_BUTTON",
                "click COLLECTION_EVENT_START",
                "click COLLECTION_EVENT_EXPERT_MAP_SELECT",
                "click HARD_MODE_SELECT",
                "click IMPOPPABLE_MODE_SELECT",
                "click MAP_OVERWRITE_SAVE",
                "wait 4000",
                "click IMPOPPABLE_GAMESTART_OK",
            ]),
            fixed_map_start: sequence(&[
                "click HOME_PLAY_BUTTON",
                "click MAP_GO_LEFT_BUTTON",
                "click MAP_GO_LEFT_BUTTON",
                "click MAP_GO_LEFT_BUTTON",
                "click MAP_SELECT_TOPRIGHT",
                "click HARD_MODE_SELECT",
                "click IMPOPPABLE_MODE_SELECT",
                "click MAP_OVERWRITE_SAVE",
                "wait 4000",
                "click IMPOPPABLE_GAMESTART_OK",
            ]),
            start_rounds: sequence(&["press space", "press space"]),
            end_of_map: sequence(&[
                "click END_GAME_NEXT_BUTTON",
                "wait 1000",
                "click END_GAME_NEXT_BUTTON",
                "wait 1000",
                "click END_GAME_HOME_BUTTON",
                "wait 2000",
            ]),
            reward_collection: sequence(&[
                "click COLLECT_INSTA",
                "wait 1000",
                "click 3INSTA1",
                "wait 1000",
                "click 3INSTA1",
                "wait 1000",
                "click 3INSTA2",
                "wait 1000",
                "click 3INSTA2",
                "wait 1000",
                "click 3INSTA3",
                "wait 1000",
                "click 3INSTA3",
                "wait 1000",
                "click 2INSTA1",
                "wait 1000",
                "click 2INSTA1",
                "wait 1000",
                "click 2INSTA2",
                "wait 1000",
                "click 2INSTA2",
                "wait 1000",
                "click INSTASELECTOK",
                "wait 1000",
                "click BACK_BUTTON",
                "wait 2000",
            ]),
            level_up_dismiss: sequence(&["click INSTASELECTOK", "click INSTASELECTOK"]),
            defeat_return_home: sequence(&["click DEFEAT_GAME_HOME_BUTTON"]),
        }
    }
}

impl Sequences {
    /// Every sequence with its config key, for validation and logging.
    pub fn named(&self) -> [(&'static str, &[Instruction]); 8] {
        [
            ("collection_event_open", self.collection_event_open.as_slice()),
            ("collection_event_enter_map", self.collection_event_enter_map.as_slice()),
            ("fixed_map_start", self.fixed_map_start.as_slice()),
            ("start_rounds", self.start_rounds.as_slice()),
            ("end_of_map", self.end_of_map.as_slice()),
            ("reward_collection", self.reward_collection.as_slice()),
            ("level_up_dismiss", self.level_up_dismiss.as_slice()),
            ("defeat_return_home", self.defeat_return_home.as_slice()),
        ]
    }
}

/// Complete automation configuration.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AutomationConfig {
    /// Executable name of the game, used to find its window
    pub process_name: String,
    /// Capture the game in the background and only steal focus for input
    pub background_mode: bool,
    pub start_mode: StartMode,
    /// Map played in `fixed_map` mode
    pub default_map: String,
    /// Sub-directory of `maps/` holding the map definitions
    pub difficulty: String,
    /// Minimum similarity for matching an OCR'd map name to a map file
    pub map_match_cutoff: f32,
    /// Region holding the map name on the collection event screen
    pub map_name_region: RelativeRect,
    /// Refuse to load maps whose instructions do not validate
    pub strict_instructions: bool,
    /// Round at which end-of-map handling starts
    pub final_round: u32,
    /// OCR brightness threshold (pixels with R, G, B all > threshold are kept)
    pub ocr_threshold: u8,
    pub monitor: MonitorConfig,
    pub escalation: EscalationConfig,
    pub timings: Timings,
    pub rewards: RewardConfig,
    /// Named button positions used by `click` instructions
    pub button_positions: BTreeMap<String, RelativePoint>,
    /// Keyboard shortcut per tower type plus UPGRADE_TOP/MIDDLE/BOTTOM
    pub tower_shortcuts: BTreeMap<String, String>,
    /// Key cycling a selected tower's targeting mode
    pub retarget_key: String,
    /// Key closing the tower selection panel
    pub dismiss_key: String,
    pub sequences: Sequences,
}

fn default_button_positions() -> BTreeMap<String, RelativePoint> {
    [
        ("HOME_PLAY_BUTTON", 0.455, 0.865),
        ("MAP_GO_LEFT_BUTTON", 0.080, 0.440),
        ("MAP_SELECT_TOPRIGHT", 0.700, 0.250),
        ("HARD_MODE_SELECT", 0.690, 0.400),
        ("IMPOPPABLE_MODE_SELECT", 0.690, 0.520),
        ("MAP_OVERWRITE_SAVE", 0.590, 0.710),
        ("IMPOPPABLE_GAMESTART_OK", 0.500, 0.780),
        ("COLLECTION_EVENT_SELECT", 0.910, 0.610),
        ("COLLECTION_EVENT_START", 0.500, 0.830),
        ("COLLECTION_EVENT_EXPERT_MAP_SELECT", 0.500, 0.440),
        ("HERO_SELECT_IN_MAP_SELECT", 0.070, 0.830),
        ("HERO_SELECT_CONFIRM", 0.570, 0.570),
        ("BACK_BUTTON", 0.040, 0.050),
        ("END_GAME_NEXT_BUTTON", 0.500, 0.850),
        ("END_GAME_HOME_BUTTON", 0.370, 0.780),
        ("DEFEAT_GAME_HOME_BUTTON", 0.395, 0.760),
        ("INSTASELECTOK", 0.500, 0.880),
        ("COLLECT_INSTA", 0.500, 0.620),
        ("3INSTA1", 0.380, 0.500),
        ("3INSTA2", 0.500, 0.500),
        ("3INSTA3", 0.620, 0.500),
        ("2INSTA1", 0.440, 0.500),
        ("2INSTA2", 0.560, 0.500),
        ("QUINCY_SELECT", 0.080, 0.250),
        ("GWENDOLIN_SELECT", 0.160, 0.250),
        ("STRIKER_JONES_SELECT", 0.240, 0.250),
        ("OBYN_SELECT", 0.080, 0.400),
        ("BENJAMIN_SELECT", 0.240, 0.400),
        ("EZILI_SELECT", 0.080, 0.550),
        ("ADORA_SELECT", 0.160, 0.550),
        ("SAUDA_SELECT", 0.160, 0.700),
    ]
    .into_iter()
    .map(|(name, x, y)| (name.to_string(), RelativePoint::new(x, y)))
    .collect()
}

fn default_tower_shortcuts() -> BTreeMap<String, String> {
    [
        ("HERO", "u"),
        ("DART", "q"),
        ("BOOMERANG", "w"),
        ("BOMB", "e"),
        ("TACK", "r"),
        ("ICE", "t"),
        ("GLUE", "y"),
        ("SNIPER", "z"),
        ("SUB", "x"),
        ("BUCCANEER", "c"),
        ("ACE", "v"),
        ("HELI", "b"),
        ("MORTAR", "n"),
        ("DARTLING", "m"),
        ("WIZARD", "a"),
        ("SUPER", "s"),
        ("NINJA", "d"),
        ("ALCHEMIST", "f"),
        ("DRUID", "g"),
        ("MERMONKEY", "o"),
        ("FARM", "h"),
        ("SPIKE", "j"),
        ("VILLAGE", "k"),
        ("ENGINEER", "l"),
        ("BEAST_HANDLER", "i"),
        ("UPGRADE_TOP", ","),
        ("UPGRADE_MIDDLE", "."),
        ("UPGRADE_BOTTOM", "/"),
    ]
    .into_iter()
    .map(|(tower, key)| (tower.to_string(), key.to_string()))
    .collect()
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            process_name: "BloonsTD6.exe".to_string(),
            background_mode: true,
            start_mode: StartMode::default(),
            default_map: "DARKDUNGEONS".to_string(),
            difficulty: "impoppable".to_string(),
            map_match_cutoff: 0.75,
            map_name_region: RelativeRect {
                x: 0.400,
                y: 0.300,
                width: 0.200,
                height: 0.050,
            },
            strict_instructions: true,
            final_round: 99,
            ocr_threshold: 190,
            monitor: MonitorConfig::default(),
            escalation: EscalationConfig::default(),
            timings: Timings::default(),
            rewards: RewardConfig::default(),
            button_positions: default_button_positions(),
            tower_shortcuts: default_tower_shortcuts(),
            retarget_key: "tab".to_string(),
            dismiss_key: "esc".to_string(),
            sequences: Sequences::default(),
        }
    }
}

impl AutomationConfig {
    /// Checks the named sequences against the button table.
    ///
    /// Returns one human-readable problem per offending instruction. `click`
    /// targets containing `{hero}` are resolved per map and skipped here.
    pub fn sequence_problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        for (name, instructions) in self.sequences.named() {
            for instruction in instructions {
                match instruction {
                    Instruction::Unrecognized { raw, reason } => {
                        problems.push(format!("sequence {}: '{}' ({})", name, raw, reason));
                    }
                    Instruction::Click { button }
                        if !button.contains("{hero}")
                            && !self.button_positions.contains_key(button) =>
                    {
                        problems.push(format!("sequence {}: unknown button {}", name, button));
                    }
                    _ => {}
                }
            }
        }
        problems
    }
}

/// Parses a configuration file.
pub fn load_config_from(path: &Path) -> Result<AutomationConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Loads configuration from config.json or returns defaults.
/// Looks for config.json in the same directory as the executable.
fn load_config() -> AutomationConfig {
    let config_path = crate::paths::get_config_path();
    info!("Looking for config at: {}", config_path.display());

    let config = if config_path.exists() {
        match load_config_from(&config_path) {
            Ok(config) => {
                info!("Config loaded from config.json");
                config
            }
            Err(e) => {
                warn!("{:#}. Using defaults.", e);
                AutomationConfig::default()
            }
        }
    } else {
        info!("config.json not found. Using default config.");
        AutomationConfig::default()
    };

    for problem in config.sequence_problems() {
        warn!("Config: {}", problem);
    }

    config
}

/// Initializes the global configuration. Call once at startup.
pub fn init_config() {
    let _ = CONFIG.set(load_config());
}

/// Returns a reference to the global configuration.
/// Panics if called before init_config().
pub fn get_config() -> &'static AutomationConfig {
    CONFIG
        .get()
        .expect("Config not initialized. Call init_config() first.")
}
