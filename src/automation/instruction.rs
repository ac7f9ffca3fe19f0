//! Instruction model.
//!
//! Instructions are authored as short strings in map files and in the
//! global configuration:
//!
//! ```text
//! place HERO0          upgrade DART1 1 1 3      change SNIPER1 2
//! click BACK_BUTTON    press space              wait 1000
//! ```
//!
//! Parsing never fails. Anything that does not match a known form becomes
//! [`Instruction::Unrecognized`] so that loading can decide whether to
//! reject the sequence or keep it and skip the entry at runtime.

use serde::Deserialize;
use std::fmt;

/// One of the three upgrade paths of a tower.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradePath {
    Top,
    Middle,
    Bottom,
}

impl UpgradePath {
    fn from_token(token: &str) -> Option<Self> {
        match token {
            "1" => Some(Self::Top),
            "2" => Some(Self::Middle),
            "3" => Some(Self::Bottom),
            _ => None,
        }
    }

    /// Name of the entry in the shortcut table that upgrades this path.
    pub fn shortcut_name(self) -> &'static str {
        match self {
            Self::Top => "UPGRADE_TOP",
            Self::Middle => "UPGRADE_MIDDLE",
            Self::Bottom => "UPGRADE_BOTTOM",
        }
    }

    fn number(self) -> u8 {
        match self {
            Self::Top => 1,
            Self::Middle => 2,
            Self::Bottom => 3,
        }
    }
}

/// A single declarative action.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Instruction {
    /// Place the tower at its configured coordinate.
    Place { tower: String },
    /// Select the tower and buy upgrades in the listed order.
    Upgrade {
        tower: String,
        paths: Vec<UpgradePath>,
    },
    /// Select the tower and cycle its targeting mode.
    Change { tower: String, times: u32 },
    /// Click a named button from the global button table.
    Click { button: String },
    /// Press a key by name.
    Press { key: String },
    /// Sleep for the given number of milliseconds.
    Wait { millis: u64 },
    /// Text that did not parse. Kept so the problem can be reported.
    Unrecognized { raw: String, reason: String },
}

impl Instruction {
    /// Parses one authored instruction.
    pub fn parse(raw: &str) -> Self {
        let tokens: Vec<&str> = raw.split_whitespace().collect();
        let Some((&keyword, args)) = tokens.split_first() else {
            return Self::unrecognized(raw, "empty instruction");
        };

        match (keyword.to_ascii_lowercase().as_str(), args) {
            ("place", [tower]) => Self::Place {
                tower: tower.to_string(),
            },
            ("place", _) => Self::unrecognized(raw, "expected: place <tower>"),

            ("upgrade", [tower, paths @ ..]) if !paths.is_empty() => {
                let parsed: Option<Vec<UpgradePath>> =
                    paths.iter().map(|p| UpgradePath::from_token(p)).collect();
                match parsed {
                    Some(paths) => Self::Upgrade {
                        tower: tower.to_string(),
                        paths,
                    },
                    None => Self::unrecognized(raw, "upgrade paths must be 1, 2 or 3"),
                }
            }
            ("upgrade", _) => Self::unrecognized(raw, "expected: upgrade <tower> <path>..."),

            ("change", [tower, times]) => match times.parse::<u32>() {
                Ok(times) => Self::Change {
                    tower: tower.to_string(),
                    times,
                },
                Err(_) => Self::unrecognized(raw, "targeting count must be a number"),
            },
            ("change", _) => Self::unrecognized(raw, "expected: change <tower> <times>"),

            ("click", [button]) => Self::Click {
                button: button.to_string(),
            },
            ("click", _) => Self::unrecognized(raw, "expected: click <button>"),

            ("press", [key]) => Self::Press {
                key: key.to_string(),
            },
            ("press", _) => Self::unrecognized(raw, "expected: press <key>"),

            ("wait", [millis]) => match millis.parse::<u64>() {
                Ok(millis) => Self::Wait { millis },
                Err(_) => Self::unrecognized(raw, "wait duration must be milliseconds"),
            },
            ("wait", _) => Self::unrecognized(raw, "expected: wait <milliseconds>"),

            _ => Self::unrecognized(raw, "unknown instruction"),
        }
    }

    fn unrecognized(raw: &str, reason: &str) -> Self {
        Self::Unrecognized {
            raw: raw.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Tower id this instruction operates on, if any.
    pub fn tower(&self) -> Option<&str> {
        match self {
            Self::Place { tower } | Self::Upgrade { tower, .. } | Self::Change { tower, .. } => {
                Some(tower)
            }
            _ => None,
        }
    }
}

impl From<String> for Instruction {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Place { tower } => write!(f, "place {}", tower),
            Self::Upgrade { tower, paths } => {
                write!(f, "upgrade {}", tower)?;
                for path in paths {
                    write!(f, " {}", path.number())?;
                }
                Ok(())
            }
            Self::Change { tower, times } => write!(f, "change {} {}", tower, times),
            Self::Click { button } => write!(f, "click {}", button),
            Self::Press { key } => write!(f, "press {}", key),
            Self::Wait { millis } => write!(f, "wait {}", millis),
            Self::Unrecognized { raw, .. } => write!(f, "{}", raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tower_instructions() {
        assert_eq!(
            Instruction::parse("place HERO0"),
            Instruction::Place {
                tower: "HERO0".to_string()
            }
        );
        assert_eq!(
            Instruction::parse("upgrade DART1 1 1 3 2"),
            Instruction::Upgrade {
                tower: "DART1".to_string(),
                paths: vec![
                    UpgradePath::Top,
                    UpgradePath::Top,
                    UpgradePath::Bottom,
                    UpgradePath::Middle
                ],
            }
        );
        assert_eq!(
            Instruction::parse("  change   SNIPER1 2 "),
            Instruction::Change {
                tower: "SNIPER1".to_string(),
                times: 2
            }
        );
    }

    #[test]
    fn test_parse_ui_instructions() {
        assert_eq!(
            Instruction::parse("click {hero}_SELECT"),
            Instruction::Click {
                button: "{hero}_SELECT".to_string()
            }
        );
        assert_eq!(
            Instruction::parse("press space"),
            Instruction::Press {
                key: "space".to_string()
            }
        );
        assert_eq!(Instruction::parse("wait 4000"), Instruction::Wait { millis: 4000 });
        assert_eq!(
            Instruction::parse("PLACE DART1"),
            Instruction::Place {
                tower: "DART1".to_string()
            }
        );
    }

    #[test]
    fn test_malformed_instructions_are_kept_as_unrecognized() {
        for raw in [
            "",
            "sell DART1",
            "place",
            "place DART1 DART2",
            "upgrade DART1",
            "upgrade DART1 4",
            "change DART1",
            "change DART1 twice",
            "wait soon",
        ] {
            match Instruction::parse(raw) {
                Instruction::Unrecognized { raw: kept, .. } => assert_eq!(kept, raw),
                other => panic!("'{}' parsed as {:?}", raw, other),
            }
        }
    }

    #[test]
    fn test_deserialize_from_string() {
        let parsed: Vec<Instruction> =
            serde_json::from_str(r#"["place HERO0", "bogus"]"#).unwrap();
        assert_eq!(parsed[0].tower(), Some("HERO0"));
        assert!(matches!(parsed[1], Instruction::Unrecognized { .. }));
    }

    #[test]
    fn test_display_matches_authored_form() {
        for raw in ["place DART1", "upgrade DART1 1 2 3", "change NINJA1 3", "wait 10"] {
            assert_eq!(Instruction::parse(raw).to_string(), raw);
        }
    }

    #[test]
    fn test_upgrade_shortcut_names() {
        assert_eq!(UpgradePath::Top.shortcut_name(), "UPGRADE_TOP");
        assert_eq!(UpgradePath::Middle.shortcut_name(), "UPGRADE_MIDDLE");
        assert_eq!(UpgradePath::Bottom.shortcut_name(), "UPGRADE_BOTTOM");
    }
}
