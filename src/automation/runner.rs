//! Run controller - main loop of the auto player.
//!
//! One run: pick the map, start it, let the round monitor and milestone
//! dispatcher play it, watch the failure streak for stuck screens, and
//! record the result. `run_forever` repeats runs until aborted.

use anyhow::{Result, anyhow, bail};
use chrono::Local;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::automation::config::{AutomationConfig, EscalationConfig, StartMode, Timings};
use crate::automation::csv_writer::{RunReport, append_run, init_csv};
use crate::automation::dispatcher::{MilestoneDispatcher, RewardTracker, RunFlag};
use crate::automation::focus::FocusPort;
use crate::automation::input::InputPort;
use crate::automation::interpreter::Automator;
use crate::automation::map_config::{MapConfig, find_best_map_match, list_maps};
use crate::automation::monitor::{RoundMonitor, RoundState};
use crate::automation::state::{ABORT_REQUESTED, RunOutcome, RunPhase};
use crate::ocr::{MAP_NAME_WHITELIST, TextReader};

/// What the failure streak calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    None,
    /// A level-up screen is probably hiding the round counter
    LevelUp,
    /// The game is probably lost
    Defeat,
}

/// Maps the failure streak to escalations. The level-up dismissal fires
/// once per streak and re-arms when the streak drops below its threshold.
#[derive(Debug)]
pub struct EscalationTracker {
    level_up_failures: u32,
    defeat_failures: u32,
    level_up_fired: bool,
}

impl EscalationTracker {
    pub fn new(config: &EscalationConfig) -> Self {
        Self {
            level_up_failures: config.level_up_failures,
            defeat_failures: config.defeat_failures,
            level_up_fired: false,
        }
    }

    pub fn check(&mut self, failures: u32) -> Escalation {
        if failures > self.defeat_failures {
            return Escalation::Defeat;
        }
        if failures < self.level_up_failures {
            self.level_up_fired = false;
            return Escalation::None;
        }
        if self.level_up_fired {
            Escalation::None
        } else {
            self.level_up_fired = true;
            Escalation::LevelUp
        }
    }
}

pub struct RunController {
    config: Arc<AutomationConfig>,
    automator: Arc<Automator>,
    reader: Arc<dyn TextReader>,
    maps_dir: PathBuf,
    history_path: Option<PathBuf>,
    rewards: Arc<Mutex<RewardTracker>>,
    abort: &'static AtomicBool,
    runs: u32,
    phase: RunPhase,
}

impl RunController {
    pub fn new(
        config: Arc<AutomationConfig>,
        input: Box<dyn InputPort>,
        focus: Box<dyn FocusPort>,
        reader: Arc<dyn TextReader>,
        maps_dir: PathBuf,
    ) -> Self {
        let rewards = Arc::new(Mutex::new(RewardTracker::new(&config.rewards)));
        Self {
            automator: Arc::new(Automator::new(input, focus, Arc::clone(&config))),
            config,
            reader,
            maps_dir,
            history_path: None,
            rewards,
            abort: &ABORT_REQUESTED,
            runs: 0,
            phase: RunPhase::Idle,
        }
    }

    /// Appends a row per run to the given CSV file.
    pub fn with_history(mut self, path: PathBuf) -> Self {
        self.history_path = Some(path);
        self
    }

    #[cfg(test)]
    fn with_abort_flag(mut self, flag: &'static AtomicBool) -> Self {
        self.abort = flag;
        self
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn set_phase(&mut self, phase: RunPhase) {
        if self.phase != phase {
            info!("Phase: {} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    /// Plays runs until the abort hotkey is pressed.
    pub fn run_forever(&mut self) {
        info!("Auto player started (Ctrl+Shift+Q to abort)");

        while !self.aborted() {
            match self.run_once() {
                Ok(report) if report.outcome == RunOutcome::Aborted => break,
                Ok(_) => {}
                Err(e) => {
                    error!("Run {} failed: {:#}", self.runs, e);
                    self.set_phase(RunPhase::Idle);
                    thread::sleep(Timings::ms(self.config.timings.retry_delay_ms));
                }
            }
        }

        info!("Auto player stopped after {} runs", self.runs);
    }

    /// Plays a single map from the home screen back to the home screen.
    pub fn run_once(&mut self) -> Result<RunReport> {
        self.runs += 1;
        let started_at = Local::now();
        let start = Instant::now();
        info!("Run {} starting", self.runs);

        self.set_phase(RunPhase::SelectingMap);
        let map = Arc::new(self.select_map()?);

        self.set_phase(RunPhase::StartingMap);
        let state = Arc::new(RoundState::new(self.config.monitor.baseline_round));
        let run_ended = Arc::new(RunFlag::new());
        let monitor = RoundMonitor::new(
            Arc::clone(&self.reader),
            &self.config.monitor,
            Arc::clone(&state),
        );
        let mut dispatcher = MilestoneDispatcher::new(
            Arc::clone(&map),
            Arc::clone(&self.automator),
            Arc::clone(&self.rewards),
            Arc::clone(&run_ended),
        );
        monitor.add_listener(move |round| dispatcher.on_round(round));

        thread::sleep(Timings::ms(self.config.timings.map_load_delay_ms));
        self.automator
            .run_sequence("map start", &map.instructions.start, Some(map.as_ref()));
        self.automator
            .run_sequence("start_rounds", &self.config.sequences.start_rounds, Some(map.as_ref()));

        // Started after the start instructions so milestone input cannot overlap them
        monitor.start();
        self.set_phase(RunPhase::Playing);
        let outcome = self.supervise(&monitor, &state, &run_ended);
        monitor.stop();

        self.set_phase(RunPhase::Finished);
        let report = RunReport {
            run: self.runs,
            started_at,
            map: map.name.clone(),
            outcome,
            final_round: state.current_round(),
            duration: start.elapsed(),
        };
        info!(
            "Run {} on {}: {} at round {} after {}s",
            report.run,
            report.map,
            report.outcome,
            report.final_round,
            report.duration.as_secs()
        );
        self.record(&report);
        self.set_phase(RunPhase::Idle);

        Ok(report)
    }

    /// Waits for the run to end while handling escalations.
    fn supervise(
        &mut self,
        monitor: &RoundMonitor,
        state: &RoundState,
        run_ended: &RunFlag,
    ) -> RunOutcome {
        let mut escalation = EscalationTracker::new(&self.config.escalation);
        let interval = Timings::ms(self.config.escalation.check_interval_ms);

        loop {
            if self.aborted() {
                info!("Abort requested");
                return RunOutcome::Aborted;
            }
            if run_ended.is_ended() {
                return RunOutcome::Completed;
            }

            let failures = state.consecutive_failures();
            match escalation.check(failures) {
                Escalation::None => {}
                Escalation::LevelUp => {
                    warn!("{} failed readings, assuming a level-up screen", failures);
                    self.set_phase(RunPhase::DismissingLevelUp);
                    self.automator.run_sequence(
                        "level_up_dismiss",
                        &self.config.sequences.level_up_dismiss,
                        None,
                    );
                    self.set_phase(RunPhase::Playing);
                }
                Escalation::Defeat => {
                    warn!("{} failed readings, assuming defeat", failures);
                    monitor.stop();
                    // The last accepted reading may have finished the map meanwhile
                    if run_ended.is_ended() {
                        return RunOutcome::Completed;
                    }

                    self.set_phase(RunPhase::ReturningHome);
                    self.automator.run_sequence(
                        "defeat_return_home",
                        &self.config.sequences.defeat_return_home,
                        None,
                    );
                    state.reset_failures();
                    run_ended.mark_ended();
                    thread::sleep(Timings::ms(self.config.escalation.defeat_settle_ms));
                    return RunOutcome::Defeated;
                }
            }

            thread::sleep(interval);
        }
    }

    /// Navigates into a map and loads its definition.
    fn select_map(&self) -> Result<MapConfig> {
        let config = &self.config;

        match config.start_mode {
            StartMode::FixedMap => {
                let map =
                    MapConfig::load(&self.maps_dir, &config.difficulty, &config.default_map, config)?;
                self.automator
                    .run_sequence("fixed_map_start", &config.sequences.fixed_map_start, Some(&map));
                Ok(map)
            }
            StartMode::CollectionEvent => {
                self.automator.run_sequence(
                    "collection_event_open",
                    &config.sequences.collection_event_open,
                    None,
                );

                let Some(text) = self.reader.read(&config.map_name_region, MAP_NAME_WHITELIST) else {
                    bail!("Could not read the event map name");
                };
                let candidates = list_maps(&self.maps_dir, &config.difficulty)?;
                let name = find_best_map_match(&text, &candidates, config.map_match_cutoff)
                    .ok_or_else(|| anyhow!("No {} map matches '{}'", config.difficulty, text))?;
                info!("Event map '{}' matched {}", text, name);

                let map = MapConfig::load(&self.maps_dir, &config.difficulty, &name, config)?;
                self.automator.run_sequence(
                    "collection_event_enter_map",
                    &config.sequences.collection_event_enter_map,
                    Some(&map),
                );
                Ok(map)
            }
        }
    }

    fn record(&self, report: &RunReport) {
        let Some(path) = &self.history_path else {
            return;
        };
        if let Err(e) = init_csv(path).and_then(|_| append_run(path, report)) {
            warn!("Failed to record run: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::{Event, NoFocus, RecordingInput, ScriptedReader, instant_config};
    use std::fs;
    use crate::automation::config::RelativeRect;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    const TEST_MAP: &str = r#"{
        "hero": "OBYN",
        "towers": {
            "HERO0": { "type": "HERO", "coords": { "x": 0.41, "y": 0.55 } },
            "DART1": { "type": "DART", "coords": { "x": 0.30, "y": 0.62 } }
        },
        "instructions": {
            "start": ["place HERO0"],
            "milestones": {
                "10": ["place DART1"],
                "99": ["press x"]
            },
            "end": []
        }
    }"#;

    fn maps_dir() -> TempDir {
        let dir = tempdir().unwrap();
        let impoppable = dir.path().join("impoppable");
        fs::create_dir_all(&impoppable).unwrap();
        fs::write(impoppable.join("TESTMAP.json"), TEST_MAP).unwrap();
        dir
    }

    fn test_config(start_mode: StartMode) -> AutomationConfig {
        let mut config = instant_config();
        config.start_mode = start_mode;
        config.default_map = "TESTMAP".to_string();
        config.monitor.poll_interval_ms = 1;
        config.escalation.check_interval_ms = 1;
        config.escalation.defeat_settle_ms = 0;
        config
    }

    fn fresh_flag() -> &'static AtomicBool {
        Box::leak(Box::new(AtomicBool::new(false)))
    }

    fn controller(
        config: AutomationConfig,
        readings: &[&str],
        maps: &Path,
    ) -> (RunController, RecordingInput) {
        let input = RecordingInput::default();
        let controller = RunController::new(
            Arc::new(config),
            Box::new(input.clone()),
            Box::new(NoFocus),
            Arc::new(ScriptedReader::new(readings)),
            maps.to_path_buf(),
        )
        .with_abort_flag(fresh_flag());
        (controller, input)
    }

    fn count(events: &[Event], event: &Event) -> usize {
        events.iter().filter(|e| *e == event).count()
    }

    fn button_click(config: &AutomationConfig, name: &str) -> Event {
        let p = config.button_positions[name];
        Event::Click(p.x, p.y)
    }

    #[test]
    fn test_escalation_tracker() {
        let mut tracker = EscalationTracker::new(&EscalationConfig {
            level_up_failures: 3,
            defeat_failures: 6,
            ..EscalationConfig::default()
        });

        assert_eq!(tracker.check(2), Escalation::None);
        assert_eq!(tracker.check(3), Escalation::LevelUp);
        assert_eq!(tracker.check(4), Escalation::None);
        assert_eq!(tracker.check(6), Escalation::None);
        assert_eq!(tracker.check(7), Escalation::Defeat);

        // New streak re-arms the level-up dismissal
        assert_eq!(tracker.check(0), Escalation::None);
        assert_eq!(tracker.check(5), Escalation::LevelUp);
    }

    #[test]
    fn test_run_completes_and_fires_each_milestone_once() {
        let maps = maps_dir();
        let mut config = test_config(StartMode::FixedMap);
        // Every reading in this scenario is a plausible advance
        config.monitor.max_round_jump = 100;
        let expected = config.clone();

        let (mut controller, input) = controller(config, &["11/100", "50/100", "99/100"], maps.path());
        let report = controller.run_once().unwrap();

        assert_eq!(report.outcome, RunOutcome::Completed);
        assert_eq!(report.final_round, 99);
        assert_eq!(report.map, "TESTMAP");

        let events = input.events();
        assert_eq!(count(&events, &Event::Move(0.30, 0.62)), 1, "round 10 fired once");
        assert_eq!(count(&events, &Event::Press("x".to_string())), 1, "round 99 fired once");
        assert_eq!(count(&events, &button_click(&expected, "END_GAME_HOME_BUTTON")), 1);

        // Start: fixed map menus, hero placement, then rounds started
        let space = Event::Press("space".to_string());
        let first_space = events.iter().position(|e| *e == space).unwrap();
        let hero = events.iter().position(|e| *e == Event::Move(0.41, 0.55)).unwrap();
        let dart = events.iter().position(|e| *e == Event::Move(0.30, 0.62)).unwrap();
        assert!(hero < first_space && first_space < dart);
    }

    /// Scripted reader that notes how many inputs were sent before each read.
    struct ObservingReader {
        readings: Mutex<Vec<&'static str>>,
        input: RecordingInput,
        inputs_at_read: Mutex<Vec<usize>>,
    }

    impl TextReader for ObservingReader {
        fn read(&self, _region: &RelativeRect, _whitelist: &str) -> Option<String> {
            self.inputs_at_read.lock().unwrap().push(self.input.events().len());
            let mut readings = self.readings.lock().unwrap();
            (!readings.is_empty()).then(|| readings.remove(0).to_string())
        }
    }

    #[test]
    fn test_nothing_fires_between_milestones_and_end_waits_for_settle() {
        let maps = maps_dir();
        let mut config = test_config(StartMode::FixedMap);
        config.monitor.max_round_jump = 100;
        config.timings.final_round_settle_ms = 80;
        let expected = config.clone();

        let input = RecordingInput::default();
        let reader = Arc::new(ObservingReader {
            readings: Mutex::new(vec!["11/100", "50/100", "99/100"]),
            input: input.clone(),
            inputs_at_read: Mutex::new(Vec::new()),
        });
        let mut controller = RunController::new(
            Arc::new(config),
            Box::new(input.clone()),
            Box::new(NoFocus),
            Arc::clone(&reader) as Arc<dyn TextReader>,
            maps.path().to_path_buf(),
        )
        .with_abort_flag(fresh_flag());

        let report = controller.run_once().unwrap();
        assert_eq!(report.outcome, RunOutcome::Completed);

        // Listeners run before the next read, so each read sees the input
        // sent for the previous reading
        let seen = reader.inputs_at_read.lock().unwrap().clone();
        assert!(seen[1] > seen[0], "round 10 fired after 11/100");
        assert_eq!(seen[2], seen[1], "nothing fired after 50/100");

        let milestone = input.first_time_of(&Event::Press("x".to_string())).unwrap();
        let end = input
            .first_time_of(&button_click(&expected, "END_GAME_NEXT_BUTTON"))
            .unwrap();
        assert!(end.duration_since(milestone) >= Duration::from_millis(80));
    }

    #[test]
    fn test_sensing_loss_escalates_to_defeat() {
        let maps = maps_dir();
        let mut config = test_config(StartMode::FixedMap);
        config.monitor.poll_interval_ms = 5;
        config.escalation.level_up_failures = 3;
        config.escalation.defeat_failures = 40;
        let expected = config.clone();

        let (mut controller, input) = controller(config, &[], maps.path());
        let report = controller.run_once().unwrap();

        assert_eq!(report.outcome, RunOutcome::Defeated);
        assert_eq!(report.final_round, 5);

        let events = input.events();
        // level_up_dismiss clicks INSTASELECTOK twice, exactly once per streak
        assert_eq!(count(&events, &button_click(&expected, "INSTASELECTOK")), 2);
        assert_eq!(count(&events, &button_click(&expected, "DEFEAT_GAME_HOME_BUTTON")), 1);
        assert_eq!(count(&events, &button_click(&expected, "END_GAME_HOME_BUTTON")), 0);
    }

    #[test]
    fn test_collection_event_selects_matched_map_and_hero() {
        let maps = maps_dir();
        let mut config = test_config(StartMode::CollectionEvent);
        config.monitor.max_round_jump = 100;
        let expected = config.clone();

        let (mut controller, input) = controller(config, &["TESTMAF", "99/100"], maps.path());
        let report = controller.run_once().unwrap();

        assert_eq!(report.map, "TESTMAP");
        assert_eq!(report.outcome, RunOutcome::Completed);
        let events = input.events();
        assert_eq!(count(&events, &button_click(&expected, "OBYN_SELECT")), 1);
        // Milestone 10 caught up on the 99 reading
        assert_eq!(count(&events, &Event::Move(0.30, 0.62)), 1);
    }

    #[test]
    fn test_unmatched_event_map_fails_the_attempt() {
        let maps = maps_dir();
        let config = test_config(StartMode::CollectionEvent);

        let (mut controller, input) = controller(config, &["QUARRY"], maps.path());
        let err = controller.run_once().unwrap_err();

        assert!(err.to_string().contains("QUARRY"));
        assert!(input.events().iter().all(|e| !matches!(e, Event::Press(_))));
    }

    #[test]
    fn test_missing_fixed_map_fails_before_input() {
        let maps = tempdir().unwrap();
        let (mut controller, input) = controller(test_config(StartMode::FixedMap), &[], maps.path());

        assert!(controller.run_once().is_err());
        assert!(input.events().is_empty());
    }

    #[test]
    fn test_abort_ends_run_and_loop() {
        let maps = maps_dir();
        let flag = fresh_flag();
        let (controller, input) = controller(test_config(StartMode::FixedMap), &[], maps.path());
        let mut controller = controller.with_abort_flag(flag);

        flag.store(true, Ordering::SeqCst);
        let report = controller.run_once().unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted);

        let before = input.events().len();
        controller.run_forever();
        assert_eq!(input.events().len(), before);
    }

    #[test]
    fn test_history_is_recorded() {
        let maps = maps_dir();
        let history = tempdir().unwrap();
        let csv = history.path().join("runs.csv");
        let mut config = test_config(StartMode::FixedMap);
        config.monitor.max_round_jump = 100;

        let (controller, _input) = controller(config, &["99/100"], maps.path());
        let mut controller = controller.with_history(csv.clone());
        controller.run_once().unwrap();

        let content = fs::read_to_string(&csv).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("1,"));
        assert!(lines[1].contains(",TESTMAP,completed,99,"));
    }
}
