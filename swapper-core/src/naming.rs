use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Seek, Write};
use std::str::FromStr;
use thiserror::Error;

use crate::nitrofs::{Directory, FileEntry};
use crate::relocate::{Fallback, GroupMoveReport, Relocator};
use crate::Result;

/// Directory holding the field character models.
pub const FIELD_CHARACTER_DIR: &str = "model/fieldchar";

pub const MAX_CHARACTER_NUMBER: u32 = 47;

pub const WALK_ANIMATION: u32 = 2;
pub const SPRINT_ANIMATION: u32 = 3;

const VARIATIONS: std::ops::RangeInclusive<char> = 'a'..='h';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelType {
    /// `cha`: a character's body.
    Body,
    /// `head`
    Head,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpecialTrait {
    Ice,
    Rock,
    Paralysis,
}

impl SpecialTrait {
    const ALL: [(&'static str, SpecialTrait); 3] = [
        ("ice", SpecialTrait::Ice),
        ("rock", SpecialTrait::Rock),
        ("paralysis", SpecialTrait::Paralysis),
    ];

    fn strip(s: &str) -> (Option<SpecialTrait>, &str) {
        for (tag, special_trait) in Self::ALL {
            if let Some(rest) = s.strip_prefix(tag) {
                return (Some(special_trait), rest);
            }
        }
        (None, s)
    }
}

/// What a field model's file name says about it.
///
/// Names follow `[cha|head][number][variation][_trait][_animation]`, e.g.
/// `cha01a_01`, `cha02_ice_01`, `head03b`. The trait is one of `ice`,
/// `rock` or `paralysis`. Only a prefix of the name has to follow the
/// pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacterInfo {
    pub model_type: ModelType,
    pub character_number: u32,
    pub variation: Option<char>,
    pub special_trait: Option<SpecialTrait>,
    pub animation_number: Option<u32>,
}

/// Key used to line up one character's models with another's.
pub type CharacterKey = (Option<SpecialTrait>, Option<u32>);

fn split_digits(s: &str) -> (&str, &str) {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s.split_at(end)
}

pub fn classify(name: &str) -> Option<CharacterInfo> {
    let (model_type, rest) = if let Some(rest) = name.strip_prefix("cha") {
        (ModelType::Body, rest)
    } else if let Some(rest) = name.strip_prefix("head") {
        (ModelType::Head, rest)
    } else {
        return None;
    };

    let (digits, rest) = split_digits(rest);
    let character_number = digits.parse().ok()?;

    let (variation, rest) = match rest.chars().next() {
        Some(c) if VARIATIONS.contains(&c) => (Some(c), &rest[1..]),
        _ => (None, rest),
    };

    let rest = rest.strip_prefix('_').unwrap_or(rest);
    let (special_trait, rest) = SpecialTrait::strip(rest);
    let rest = rest.strip_prefix('_').unwrap_or(rest);

    let (digits, _) = split_digits(rest);
    let animation_number = if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    };

    Some(CharacterInfo {
        model_type,
        character_number,
        variation,
        special_trait,
        animation_number,
    })
}

/// Matching key for character moves: files with the same trait and
/// animation replace each other. Heads have neither, so heads match heads.
pub fn character_key(file: &FileEntry) -> CharacterKey {
    classify(&file.name)
        .map(|info| (info.special_trait, info.animation_number))
        .unwrap_or_default()
}

fn animation_number(file: &FileEntry) -> Option<u32> {
    classify(&file.name).and_then(|info| info.animation_number)
}

/// Walk stands in for sprint when the source character has no sprint.
/// Only the animation number counts here: a sprint with any trait on the
/// source side keeps the fallback off.
pub fn sprint_fallback() -> Fallback<Option<u32>> {
    Fallback {
        key: animation_number,
        missing: Some(SPRINT_ANIMATION),
        substitute: Some(WALK_ANIMATION),
    }
}

/// Errors that can occur while parsing a character selector such as `11b`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectorError {
    #[error("empty character selector")]
    Empty,

    #[error("invalid character id '{token}', expected an integer")]
    ParseInt {
        token: String,
        #[source]
        source: std::num::ParseIntError,
    },

    #[error("invalid variation '{variation}' in '{token}', expected a letter from a to h")]
    InvalidVariation { token: String, variation: char },

    #[error("invalid character id {number}, must be within range [0, {}]", MAX_CHARACTER_NUMBER)]
    OutOfRange { number: u32 },
}

/// A character number with an optional variation letter, written `2`,
/// `11b`, and so on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CharacterSelector {
    pub number: u32,
    pub variation: Option<char>,
}

impl FromStr for CharacterSelector {
    type Err = SelectorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let token = s.trim();
        let last = token.chars().last().ok_or(SelectorError::Empty)?;

        let (digits, variation) = if last.is_ascii_digit() {
            (token, None)
        } else {
            if !VARIATIONS.contains(&last) {
                return Err(SelectorError::InvalidVariation {
                    token: token.to_string(),
                    variation: last,
                });
            }
            (&token[..token.len() - last.len_utf8()], Some(last))
        };

        let number = digits
            .parse::<u32>()
            .map_err(|e| SelectorError::ParseInt {
                token: token.to_string(),
                source: e,
            })?;
        if number > MAX_CHARACTER_NUMBER {
            return Err(SelectorError::OutOfRange { number });
        }

        Ok(Self { number, variation })
    }
}

impl TryFrom<String> for CharacterSelector {
    type Error = SelectorError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CharacterSelector> for String {
    fn from(selector: CharacterSelector) -> Self {
        selector.to_string()
    }
}

impl fmt::Display for CharacterSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number)?;
        if let Some(variation) = self.variation {
            write!(f, "{}", variation)?;
        }
        Ok(())
    }
}

/// Field models of one character, in table order. With a variation, only
/// models of that variation plus the ones shared by all variations (no
/// variation letter) are returned.
pub fn get_character(
    root: &Directory,
    character_number: u32,
    variation: Option<char>,
) -> Result<Vec<&FileEntry>> {
    let models = root.get_dir(FIELD_CHARACTER_DIR)?;
    Ok(models
        .files()
        .filter(|file| match classify(&file.name) {
            Some(info) if info.character_number == character_number => match variation {
                Some(wanted) => info.variation.map_or(true, |v| v == wanted),
                None => true,
            },
            _ => false,
        })
        .collect())
}

pub fn select_character<'a>(root: &'a Directory, selector: &CharacterSelector) -> Result<Vec<&'a FileEntry>> {
    get_character(root, selector.number, selector.variation)
}

/// Replaces every destination model with the source model of the same
/// trait and animation.
pub fn move_character<S, D>(
    relocator: &mut Relocator<S, D>,
    sources: &[&FileEntry],
    destinations: &[&FileEntry],
) -> Result<GroupMoveReport>
where
    S: Read + Seek,
    D: Write + Seek,
{
    relocator.move_group_with_fallback(sources, destinations, character_key, &sprint_fallback())
}

pub fn swap_characters<S, D>(
    relocator: &mut Relocator<S, D>,
    a: &[&FileEntry],
    b: &[&FileEntry],
) -> Result<GroupMoveReport>
where
    S: Read + Seek,
    D: Write + Seek,
{
    let mut report = move_character(relocator, a, b)?;
    report.merge(move_character(relocator, b, a)?);
    Ok(report)
}
