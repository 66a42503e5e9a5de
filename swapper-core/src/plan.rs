use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{Read, Seek, Write};
use std::path::Path;

use crate::naming::{move_character, select_character, swap_characters, CharacterSelector};
use crate::nitrofs::Directory;
use crate::relocate::{GroupMoveReport, Relocator};
use crate::Result;

/// Custom-mode command list, read from JSON:
///
/// ```json
/// { "commands": [
///     { "move": { "from": "model/fieldchar/head01a", "to": "model/fieldchar/head02" } },
///     { "swap_characters": { "a": "1", "b": "2a" } }
/// ] }
/// ```
///
/// A character selector without a variation letter selects every variation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Move { from: String, to: String },
    Swap { a: String, b: String },
    MoveCharacter { from: CharacterSelector, to: CharacterSelector },
    SwapCharacters { a: CharacterSelector, b: CharacterSelector },
}

impl Plan {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Runs the commands in order and stops at the first failure.
    pub fn execute<S, D>(&self, root: &Directory, relocator: &mut Relocator<S, D>) -> Result<GroupMoveReport>
    where
        S: Read + Seek,
        D: Write + Seek,
    {
        let mut report = GroupMoveReport::default();

        for command in &self.commands {
            info!("{}", command);
            match command {
                Command::Move { from, to } => {
                    relocator.move_path(root, from, to)?;
                    report.copies += 1;
                }
                Command::Swap { a, b } => {
                    relocator.swap_path(root, a, b)?;
                    report.copies += 2;
                }
                Command::MoveCharacter { from, to } => {
                    let from = select_character(root, from)?;
                    let to = select_character(root, to)?;
                    report.merge(move_character(relocator, &from, &to)?);
                }
                Command::SwapCharacters { a, b } => {
                    let a = select_character(root, a)?;
                    let b = select_character(root, b)?;
                    report.merge(swap_characters(relocator, &a, &b)?);
                }
            }
        }

        Ok(report)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Move { from, to } => write!(f, "move {} -> {}", from, to),
            Command::Swap { a, b } => write!(f, "swap {} <-> {}", a, b),
            Command::MoveCharacter { from, to } => write!(f, "move character {} -> {}", from, to),
            Command::SwapCharacters { a, b } => write!(f, "swap characters {} <-> {}", a, b),
        }
    }
}
