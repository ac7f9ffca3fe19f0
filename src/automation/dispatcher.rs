//! Milestone dispatch.
//!
//! Registered as a round monitor listener. Every pending milestone whose
//! round has been reached (or passed, when readings were missed) fires once
//! in ascending order; the final round triggers end-of-map handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::info;

use crate::automation::config::{RewardConfig, Timings};
use crate::automation::instruction::Instruction;
use crate::automation::interpreter::Automator;
use crate::automation::map_config::MapConfig;

/// Set-once marker for the end of a run.
#[derive(Debug, Default)]
pub struct RunFlag(AtomicBool);

impl RunFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the run as ended. Returns `false` if it already was.
    pub fn mark_ended(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_ended(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// In-game points banked across runs.
#[derive(Debug)]
pub struct RewardTracker {
    points: u32,
    points_per_run: u32,
    points_to_collect: u32,
}

impl RewardTracker {
    pub fn new(config: &RewardConfig) -> Self {
        Self {
            points: config.initial_points,
            points_per_run: config.points_per_run,
            points_to_collect: config.points_to_collect,
        }
    }

    pub fn points(&self) -> u32 {
        self.points
    }

    /// Credits a completed map. Returns `true` when a reward is due; the
    /// cost is deducted and the remainder carried over.
    pub fn record_completed_run(&mut self) -> bool {
        self.points += self.points_per_run;
        if self.points >= self.points_to_collect {
            self.points -= self.points_to_collect;
            true
        } else {
            false
        }
    }
}

pub struct MilestoneDispatcher {
    /// Not yet fired milestones, ascending by round
    pending: Vec<(u32, Vec<Instruction>)>,
    map: Arc<MapConfig>,
    automator: Arc<Automator>,
    rewards: Arc<Mutex<RewardTracker>>,
    run_ended: Arc<RunFlag>,
    end_handled: bool,
}

impl MilestoneDispatcher {
    pub fn new(
        map: Arc<MapConfig>,
        automator: Arc<Automator>,
        rewards: Arc<Mutex<RewardTracker>>,
        run_ended: Arc<RunFlag>,
    ) -> Self {
        let pending = map
            .instructions
            .milestones
            .iter()
            .map(|(round, instructions)| (*round, instructions.clone()))
            .collect();
        Self {
            pending,
            map,
            automator,
            rewards,
            run_ended,
            end_handled: false,
        }
    }

    pub fn pending_rounds(&self) -> Vec<u32> {
        self.pending.iter().map(|(round, _)| *round).collect()
    }

    /// Handles an accepted round change.
    pub fn on_round(&mut self, round: u32) {
        let due = self.pending.iter().take_while(|(t, _)| *t <= round).count();
        let fired: Vec<(u32, Vec<Instruction>)> = self.pending.drain(..due).collect();
        for (threshold, instructions) in fired {
            info!("Milestone {} reached at round {}", threshold, round);
            self.automator.run_sequence(
                &format!("round {}", threshold),
                &instructions,
                Some(self.map.as_ref()),
            );
        }

        let config = self.automator.config();
        if round >= config.final_round && !self.end_handled && !self.run_ended.is_ended() {
            self.end_handled = true;
            self.finish_map();
        }
    }

    fn finish_map(&self) {
        let config = self.automator.config();
        info!(
            "Final round reached, ending map in {}s",
            config.timings.final_round_settle_ms / 1000
        );
        thread::sleep(Timings::ms(config.timings.final_round_settle_ms));

        self.automator
            .run_sequence("map end", &self.map.instructions.end, Some(self.map.as_ref()));
        self.automator
            .run_sequence("end_of_map", &config.sequences.end_of_map, Some(self.map.as_ref()));

        let collect = {
            let mut rewards = self.rewards.lock().unwrap_or_else(|e| e.into_inner());
            let collect = rewards.record_completed_run();
            info!("Points: {}", rewards.points());
            collect
        };
        if collect {
            info!("Collecting reward");
            self.automator
                .run_sequence("reward_collection", &config.sequences.reward_collection, None);
        }

        self.run_ended.mark_ended();
        info!("Map {} completed", self.map.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::{
        Event, NoFocus, RecordingInput, instant_config, sample_map,
    };

    struct Harness {
        dispatcher: MilestoneDispatcher,
        input: RecordingInput,
        rewards: Arc<Mutex<RewardTracker>>,
        run_ended: Arc<RunFlag>,
    }

    fn harness() -> Harness {
        let config = instant_config();
        let input = RecordingInput::default();
        let rewards = Arc::new(Mutex::new(RewardTracker::new(&config.rewards)));
        let run_ended = Arc::new(RunFlag::new());
        let automator = Arc::new(Automator::new(
            Box::new(input.clone()),
            Box::new(NoFocus),
            Arc::new(config),
        ));
        Harness {
            dispatcher: MilestoneDispatcher::new(
                Arc::new(sample_map()),
                automator,
                Arc::clone(&rewards),
                Arc::clone(&run_ended),
            ),
            input,
            rewards,
            run_ended,
        }
    }

    #[test]
    fn test_catch_up_fires_passed_milestones_in_order() {
        let mut h = harness();
        h.dispatcher.on_round(25);

        assert_eq!(h.dispatcher.pending_rounds(), vec![30]);
        // place DART1 (round 10) then upgrade DART1 1 (round 20)
        assert_eq!(
            h.input.events(),
            vec![
                Event::Move(0.30, 0.62),
                Event::Press("q".to_string()),
                Event::Press("q".to_string()),
                Event::Click(0.30, 0.62),
                Event::Click(0.30, 0.62),
                Event::Press(",".to_string()),
                Event::Press("esc".to_string()),
            ]
        );
    }

    #[test]
    fn test_milestones_fire_at_most_once() {
        let mut h = harness();
        h.dispatcher.on_round(10);
        let after_first = h.input.events().len();
        assert_eq!(after_first, 4);

        h.dispatcher.on_round(10);
        h.dispatcher.on_round(11);
        assert_eq!(h.input.events().len(), after_first);
        assert_eq!(h.dispatcher.pending_rounds(), vec![20, 30]);
    }

    #[test]
    fn test_below_first_milestone_does_nothing() {
        let mut h = harness();
        h.dispatcher.on_round(9);
        assert!(h.input.events().is_empty());
        assert_eq!(h.dispatcher.pending_rounds(), vec![10, 20, 30]);
    }

    #[test]
    fn test_final_round_ends_map_once() {
        let mut h = harness();
        h.dispatcher.on_round(99);

        assert!(h.dispatcher.pending_rounds().is_empty());
        assert!(h.run_ended.is_ended());
        assert_eq!(h.rewards.lock().unwrap().points(), 37 + 14);

        let config = instant_config();
        let home = config.button_positions["END_GAME_HOME_BUTTON"];
        let events = h.input.events();
        assert_eq!(events.last(), Some(&Event::Click(home.x, home.y)));
        let count = events.len();

        h.dispatcher.on_round(100);
        assert_eq!(h.input.events().len(), count);
        assert_eq!(h.rewards.lock().unwrap().points(), 37 + 14);
    }

    #[test]
    fn test_reward_collected_when_due() {
        let mut h = harness();
        h.rewards.lock().unwrap().points = 60;
        h.dispatcher.on_round(99);

        assert_eq!(h.rewards.lock().unwrap().points(), 4);
        let config = instant_config();
        let back = config.button_positions["BACK_BUTTON"];
        assert_eq!(h.input.events().last(), Some(&Event::Click(back.x, back.y)));
    }

    #[test]
    fn test_end_skipped_after_defeat() {
        let mut h = harness();
        assert!(h.run_ended.mark_ended());
        h.dispatcher.on_round(99);

        // Milestones still fire, but no end-of-map input and no points
        assert_eq!(h.rewards.lock().unwrap().points(), 37);
        let config = instant_config();
        let home = config.button_positions["END_GAME_HOME_BUTTON"];
        assert!(!h.input.clicks().contains(&(home.x, home.y)));
    }

    #[test]
    fn test_reward_tracker_carries_remainder() {
        let mut tracker = RewardTracker::new(&RewardConfig::default());
        let due: Vec<bool> = (0..8).map(|_| tracker.record_completed_run()).collect();
        // 51, 65, 79→9, 23, 37, 51, 65, 79→9
        assert_eq!(due, vec![false, false, true, false, false, false, false, true]);
        assert_eq!(tracker.points(), 9);
    }

    #[test]
    fn test_run_flag_set_once() {
        let flag = RunFlag::new();
        assert!(!flag.is_ended());
        assert!(flag.mark_ended());
        assert!(!flag.mark_ended());
        assert!(flag.is_ended());
    }
}
