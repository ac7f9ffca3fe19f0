//! In-crate fakes for the text, input and focus ports.

use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::automation::config::{AutomationConfig, RelativePoint, RelativeRect, Timings};
use crate::automation::focus::{FocusPort, WindowId};
use crate::automation::input::InputPort;
use crate::automation::instruction::Instruction;
use crate::automation::map_config::MapConfig;
use crate::ocr::TextReader;

/// Returns the scripted readings in order, then `None` forever.
pub struct ScriptedReader {
    readings: Mutex<VecDeque<Option<String>>>,
}

impl ScriptedReader {
    pub fn new(readings: &[&str]) -> Self {
        Self {
            readings: Mutex::new(readings.iter().map(|r| Some(r.to_string())).collect()),
        }
    }
}

impl TextReader for ScriptedReader {
    fn read(&self, _region: &RelativeRect, _whitelist: &str) -> Option<String> {
        self.readings.lock().unwrap().pop_front().flatten()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Click(f32, f32),
    Move(f32, f32),
    Press(String),
}

/// Records every input call with the time it was made. Clones share the
/// same log.
#[derive(Clone, Default)]
pub struct RecordingInput {
    log: Arc<Mutex<Vec<(Instant, Event)>>>,
}

impl RecordingInput {
    fn record(&self, event: Event) {
        self.log.lock().unwrap().push((Instant::now(), event));
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Time of the first occurrence of `event`.
    pub fn first_time_of(&self, event: &Event) -> Option<Instant> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .find(|(_, e)| e == event)
            .map(|(at, _)| *at)
    }

    pub fn clicks(&self) -> Vec<(f32, f32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Click(x, y) => Some((x, y)),
                _ => None,
            })
            .collect()
    }
}

impl InputPort for RecordingInput {
    fn click(&mut self, at: RelativePoint) -> Result<()> {
        self.record(Event::Click(at.x, at.y));
        Ok(())
    }

    fn move_to(&mut self, at: RelativePoint) -> Result<()> {
        self.record(Event::Move(at.x, at.y));
        Ok(())
    }

    fn press(&mut self, key: &str) -> Result<()> {
        self.record(Event::Press(key.to_string()));
        Ok(())
    }
}

pub struct NoFocus;

impl FocusPort for NoFocus {
    fn foreground(&self) -> Option<WindowId> {
        None
    }

    fn activate_target(&self) -> Result<()> {
        Ok(())
    }

    fn restore(&self, _previous: WindowId) -> Result<()> {
        Ok(())
    }
}

/// Default configuration with every pause disabled and no focus juggling.
/// `wait` steps are dropped from the global sequences.
pub fn instant_config() -> AutomationConfig {
    let mut config = AutomationConfig {
        background_mode: false,
        timings: Timings::instant(),
        ..AutomationConfig::default()
    };
    let s = &mut config.sequences;
    for sequence in [
        &mut s.collection_event_open,
        &mut s.collection_event_enter_map,
        &mut s.fixed_map_start,
        &mut s.start_rounds,
        &mut s.end_of_map,
        &mut s.reward_collection,
        &mut s.level_up_dismiss,
        &mut s.defeat_return_home,
    ] {
        sequence.retain(|i| !matches!(i, Instruction::Wait { .. }));
    }
    config
}

/// Small map: a hero and one dart monkey, milestones at 10, 20 and 30.
pub fn sample_map() -> MapConfig {
    let mut map: MapConfig = serde_json::from_str(
        r#"{
            "hero": "OBYN",
            "towers": {
                "HERO0": { "type": "HERO", "coords": { "x": 0.41, "y": 0.55 } },
                "DART1": { "type": "DART", "coords": { "x": 0.30, "y": 0.62 } }
            },
            "instructions": {
                "start": ["place HERO0"],
                "milestones": {
                    "10": ["place DART1"],
                    "20": ["upgrade DART1 1"],
                    "30": ["change DART1 1"]
                },
                "end": ["press esc"]
            }
        }"#,
    )
    .unwrap();
    map.name = "TESTMAP".to_string();
    map
}
