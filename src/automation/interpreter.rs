//! Executes instruction sequences through the input port.
//!
//! All input for one sequence happens while holding the input lock, so
//! sequences started from the polling thread and from the run controller
//! never interleave.

use anyhow::{Context, Result, anyhow};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::{debug, info, warn};

use crate::automation::config::{AutomationConfig, RelativePoint, Timings};
use crate::automation::focus::{FocusGuard, FocusPort};
use crate::automation::input::InputPort;
use crate::automation::instruction::Instruction;
use crate::automation::map_config::{MapConfig, TowerConfig};

pub struct Automator {
    input: Mutex<Box<dyn InputPort>>,
    focus: Box<dyn FocusPort>,
    config: Arc<AutomationConfig>,
}

impl Automator {
    pub fn new(
        input: Box<dyn InputPort>,
        focus: Box<dyn FocusPort>,
        config: Arc<AutomationConfig>,
    ) -> Self {
        Self {
            input: Mutex::new(input),
            focus,
            config,
        }
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// Runs a sequence in order with a settle pause after each instruction.
    ///
    /// A failing instruction is logged and the sequence continues.
    pub fn run_sequence(&self, label: &str, instructions: &[Instruction], map: Option<&MapConfig>) {
        if instructions.is_empty() {
            return;
        }
        info!("Running {} ({} instructions)", label, instructions.len());

        let timings = &self.config.timings;
        let mut input = self.input.lock().unwrap_or_else(|e| e.into_inner());
        let _focus = FocusGuard::acquire(
            self.focus.as_ref(),
            self.config.background_mode,
            Timings::ms(timings.focus_delay_ms),
            Timings::ms(timings.focus_restore_delay_ms),
        );

        for instruction in instructions {
            debug!("{}: {}", label, instruction);
            if let Err(e) = self.execute(input.as_mut(), instruction, map) {
                warn!("{}: '{}' skipped: {:#}", label, instruction, e);
            }
            sleep_ms(timings.instruction_settle_ms);
        }
    }

    fn execute(
        &self,
        input: &mut dyn InputPort,
        instruction: &Instruction,
        map: Option<&MapConfig>,
    ) -> Result<()> {
        let timings = &self.config.timings;

        match instruction {
            Instruction::Place { tower } => {
                let tower = lookup_tower(map, tower)?;
                let shortcut = self.shortcut(&tower.tower_type)?;

                // Pointer first so the game routes the shortcut to the map
                input.move_to(tower.coords)?;
                input.press(shortcut)?;
                if tower.is_hero() {
                    // Hero menu takes longer to open
                    sleep_ms(timings.place_key_delay_ms);
                    input.press(shortcut)?;
                    sleep_ms(timings.place_key_delay_ms);
                    input.press(shortcut)?;
                }
                sleep_ms(timings.place_key_delay_ms);
                input.press(shortcut)?;
                sleep_ms(timings.place_key_delay_ms);
                input.click(tower.coords)
            }

            Instruction::Upgrade { tower, paths } => {
                let tower = lookup_tower(map, tower)?;
                input.click(tower.coords)?;
                sleep_ms(timings.select_delay_ms);

                for path in paths {
                    let shortcut = self.shortcut(path.shortcut_name())?;
                    sleep_ms(timings.upgrade_key_delay_ms);
                    input.press(shortcut)?;
                    sleep_ms(timings.upgrade_key_delay_ms);
                }
                sleep_ms(timings.dismiss_delay_ms);
                input.press(&self.config.dismiss_key)
            }

            Instruction::Change { tower, times } => {
                let tower = lookup_tower(map, tower)?;
                input.click(tower.coords)?;
                sleep_ms(timings.retarget_select_delay_ms);

                for _ in 0..*times {
                    input.press(&self.config.retarget_key)?;
                    sleep_ms(timings.retarget_key_delay_ms);
                }
                input.press(&self.config.dismiss_key)
            }

            Instruction::Click { button } => {
                let button = match map {
                    Some(map) => map.resolve_button(button),
                    None => button.clone(),
                };
                input.click(self.button(&button)?)
            }

            Instruction::Press { key } => input.press(key),

            Instruction::Wait { millis } => {
                sleep_ms(*millis);
                Ok(())
            }

            Instruction::Unrecognized { raw, reason } => {
                warn!("Skipping unrecognized instruction '{}' ({})", raw, reason);
                Ok(())
            }
        }
    }

    fn shortcut(&self, name: &str) -> Result<&str> {
        self.config
            .tower_shortcuts
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| anyhow!("no keyboard shortcut for {}", name))
    }

    fn button(&self, name: &str) -> Result<RelativePoint> {
        self.config
            .button_positions
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("unknown button {}", name))
    }
}

fn lookup_tower<'a>(map: Option<&'a MapConfig>, id: &str) -> Result<&'a TowerConfig> {
    map.context("tower instruction outside of a map")?
        .towers
        .get(id)
        .ok_or_else(|| anyhow!("unknown tower {}", id))
}

fn sleep_ms(millis: u64) {
    if millis > 0 {
        thread::sleep(Timings::ms(millis));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::{Event, NoFocus, RecordingInput, instant_config, sample_map};

    fn automator(config: AutomationConfig) -> (Automator, RecordingInput) {
        let input = RecordingInput::default();
        let automator = Automator::new(Box::new(input.clone()), Box::new(NoFocus), Arc::new(config));
        (automator, input)
    }

    fn press(key: &str) -> Event {
        Event::Press(key.to_string())
    }

    fn run(lines: &[&str]) -> Vec<Event> {
        let (automator, input) = automator(instant_config());
        let instructions: Vec<Instruction> = lines.iter().map(|l| Instruction::parse(l)).collect();
        automator.run_sequence("test", &instructions, Some(&sample_map()));
        input.events()
    }

    #[test]
    fn test_place_tower() {
        // DART1 at (0.30, 0.62), shortcut q
        assert_eq!(
            run(&["place DART1"]),
            vec![Event::Move(0.30, 0.62), press("q"), press("q"), Event::Click(0.30, 0.62)]
        );
    }

    #[test]
    fn test_place_hero_presses_twice_more() {
        assert_eq!(
            run(&["place HERO0"]),
            vec![
                Event::Move(0.41, 0.55),
                press("u"),
                press("u"),
                press("u"),
                press("u"),
                Event::Click(0.41, 0.55),
            ]
        );
    }

    #[test]
    fn test_upgrade_in_listed_order() {
        assert_eq!(
            run(&["upgrade DART1 3 1 2"]),
            vec![Event::Click(0.30, 0.62), press("/"), press(","), press("."), press("esc")]
        );
    }

    #[test]
    fn test_change_targeting() {
        assert_eq!(
            run(&["change DART1 2"]),
            vec![Event::Click(0.30, 0.62), press("tab"), press("tab"), press("esc")]
        );
    }

    #[test]
    fn test_click_resolves_hero_button() {
        let config = instant_config();
        let obyn = config.button_positions["OBYN_SELECT"];
        assert_eq!(run(&["click {hero}_SELECT"]), vec![Event::Click(obyn.x, obyn.y)]);
    }

    #[test]
    fn test_bad_instructions_are_skipped() {
        assert_eq!(
            run(&["sell DART1", "place GHOST", "click NOWHERE", "press space", "wait 0"]),
            vec![press("space")]
        );
    }

    #[test]
    fn test_tower_instruction_without_map_is_skipped() {
        let (automator, input) = automator(instant_config());
        automator.run_sequence(
            "test",
            &[Instruction::parse("place DART1"), Instruction::parse("press esc")],
            None,
        );
        assert_eq!(input.events(), vec![press("esc")]);
    }

    #[test]
    fn test_concurrent_sequences_do_not_interleave() {
        let mut config = instant_config();
        config.timings.instruction_settle_ms = 1;
        let (automator, input) = automator(config);
        let automator = Arc::new(automator);

        let sequence = |key: &str| -> Vec<Instruction> {
            (0..10).map(|_| Instruction::parse(&format!("press {}", key))).collect()
        };
        let a = sequence("a");
        let b = sequence("b");

        let first = {
            let automator = Arc::clone(&automator);
            thread::spawn(move || automator.run_sequence("a", &a, None))
        };
        let second = {
            let automator = Arc::clone(&automator);
            thread::spawn(move || automator.run_sequence("b", &b, None))
        };
        first.join().unwrap();
        second.join().unwrap();

        let events = input.events();
        assert_eq!(events.len(), 20);
        let switches = events.windows(2).filter(|w| w[0] != w[1]).count();
        assert_eq!(switches, 1, "sequences interleaved: {:?}", events);
    }
}
