use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixture;
mod header;
pub mod naming;
pub mod nitrofs;
mod path;
pub mod plan;
pub mod relocate;

pub use header::{ImageHeader, HEADER_OFFSET};
pub use naming::{CharacterSelector, SelectorError};
pub use nitrofs::{read_file_system, Directory, Entry, EntryRef, FileEntry};
pub use plan::{Command, Plan};
pub use relocate::{Fallback, GroupMoveReport, RelocationConfig, Relocator};

/// Settings for a single swap run, as assembled by the CLI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapSettings {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub mode: SwapMode,
    pub weird_sprint: bool,
    pub debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    /// Swap Hunter with the selected character.
    Character(CharacterSelector),
    /// Custom mode: run the commands of a JSON plan file.
    Plan(PathBuf),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub report: GroupMoveReport,
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("image is truncated: {0}")]
    TruncatedImage(String),
    #[error("corrupt file table: {0}")]
    CorruptTable(String),
    #[error("Path not found. Failed at {0}")]
    PathNotFound(String),
    #[error("'{0}' is a directory, not a file")]
    NotAFile(String),
    #[error("'{0}' is a file, not a directory")]
    NotADirectory(String),
    #[error("{from} and {to}'s sizes differ ({from_len} != {to_len})")]
    SizeMismatch {
        from: String,
        to: String,
        from_len: u32,
        to_len: u32,
    },
    #[error("no source entry for {missing}, and no substitute {substitute} entry to fall back on")]
    MissingFallbackSource { missing: String, substitute: String },
    #[error("invalid character selector: {0}")]
    Selector(#[from] SelectorError),
    #[error("invalid plan: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SwapError>;

/// Turns an unexpected EOF into `TruncatedImage`, naming what was being read.
pub(crate) fn truncated(what: &str) -> impl FnOnce(io::Error) -> SwapError + '_ {
    move |err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            SwapError::TruncatedImage(what.to_string())
        } else {
            SwapError::Io(err)
        }
    }
}

/// Character number of Hunter, the player character.
pub const HUNTER: u32 = 1;
/// Hunter's Deinonychus variation, which takes the place of the swapped character.
pub const HUNTER_DEINONYCHUS: char = 'c';
pub const DEFAULT_VARIATION: char = 'a';

/// Replaces every Hunter model with the selected character and the
/// selected character with Deinonychus Hunter.
pub fn swap_with_hunter<S, D>(
    root: &Directory,
    relocator: &mut Relocator<S, D>,
    selector: CharacterSelector,
) -> Result<GroupMoveReport>
where
    S: io::Read + io::Seek,
    D: io::Write + io::Seek,
{
    let all_hunters = naming::get_character(root, HUNTER, None)?;
    let deinonychus = naming::get_character(root, HUNTER, Some(HUNTER_DEINONYCHUS))?;
    let target = naming::get_character(
        root,
        selector.number,
        Some(selector.variation.unwrap_or(DEFAULT_VARIATION)),
    )?;

    if target.is_empty() {
        return Err(SwapError::Config(format!(
            "no field models found for character {}",
            selector
        )));
    }

    let mut report = naming::move_character(relocator, &target, &all_hunters)?;
    report.merge(naming::move_character(relocator, &deinonychus, &target)?);
    Ok(report)
}

enum Job {
    Character(CharacterSelector),
    Plan(Plan),
}

pub fn run(settings: SwapSettings) -> Result<RunSummary> {
    if !settings.input_path.is_file() {
        return Err(SwapError::Config(format!(
            "Input file does not exist: '{}'",
            settings.input_path.display()
        )));
    }

    if settings.output_path.exists()
        && fs::canonicalize(&settings.output_path)? == fs::canonicalize(&settings.input_path)?
    {
        return Err(SwapError::Config(
            "output file must differ from the input file".to_string(),
        ));
    }

    // Load the plan before touching the output so a bad plan leaves no file behind.
    let job = match &settings.mode {
        SwapMode::Character(selector) => Job::Character(*selector),
        SwapMode::Plan(path) => Job::Plan(Plan::load(path)?),
    };

    let mut input = File::open(&settings.input_path)?;
    let root = read_file_system(&mut input)?;

    info!("Using '{}' as input file", settings.input_path.display());
    info!("Using '{}' as output file", settings.output_path.display());
    if !settings.weird_sprint {
        info!("Weird sprint disabled");
    }

    fs::copy(&settings.input_path, &settings.output_path)?;
    let output = OpenOptions::new().write(true).open(&settings.output_path)?;

    let config = RelocationConfig {
        verbose: settings.debug,
        enable_fallback: settings.weird_sprint,
    };
    let mut relocator = Relocator::new(input, output, config);

    let result = match job {
        Job::Character(selector) => {
            info!("Swapping Hunter with character {}", selector);
            swap_with_hunter(&root, &mut relocator, selector)
        }
        Job::Plan(plan) => plan.execute(&root, &mut relocator),
    };

    // A half-relocated image is worse than none.
    let report = match result {
        Ok(report) => report,
        Err(err) => {
            drop(relocator);
            if let Err(remove_err) = fs::remove_file(&settings.output_path) {
                warn!(
                    "could not remove partial output {}: {}",
                    settings.output_path.display(),
                    remove_err
                );
            }
            return Err(err);
        }
    };

    let (_, output) = relocator.into_inner();
    output.sync_all()?;

    if report.overwritten > 0 {
        info!(
            "{} destination(s) were written more than once; the last source applied wins",
            report.overwritten
        );
    }
    info!("{} copies applied", report.copies + report.fallback_copies);

    Ok(RunSummary { report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::{build_image, FixtureNode};
    use std::io::Cursor;

    fn fieldchar_image() -> Vec<u8> {
        let models = vec![
            FixtureNode::file("cha01a_01", b"A1A1"),
            FixtureNode::file("cha01a_02", b"A2A2"),
            FixtureNode::file("cha01a_03", b"A3A3"),
            FixtureNode::file("head01a", b"HAHA"),
            FixtureNode::file("cha01c_01", b"C1C1"),
            FixtureNode::file("cha01c_02", b"C2C2"),
            FixtureNode::file("cha01c_03", b"C3C3"),
            FixtureNode::file("head01c", b"HCHC"),
            FixtureNode::file("cha02_01", b"B1B1"),
            FixtureNode::file("cha02_02", b"B2B2"),
            FixtureNode::file("head02", b"HBHB"),
        ];
        build_image(&[
            FixtureNode::file("arm9ovl.bin", b"overlay"),
            FixtureNode::dir(
                "model",
                vec![
                    FixtureNode::file("modeldata", b"shared table"),
                    FixtureNode::dir("fieldchar", models),
                ],
            ),
        ])
    }

    fn contents<'a>(image: &'a [u8], root: &Directory, path: &str) -> &'a [u8] {
        let file = root.get_file(path).unwrap();
        let start = file.start_address as usize;
        &image[start..start + file.length as usize]
    }

    fn settings(dir: &tempfile::TempDir, mode: SwapMode) -> SwapSettings {
        SwapSettings {
            input_path: dir.path().join("Fossil Fighters.nds"),
            output_path: dir.path().join("Fossil Fighters - test.nds"),
            mode,
            weird_sprint: true,
            debug: false,
        }
    }

    #[test]
    fn swaps_hunter_with_character() {
        let image = fieldchar_image();
        let root = read_file_system(&mut Cursor::new(&image)).unwrap();
        let mut relocator = Relocator::new(
            Cursor::new(image.clone()),
            Cursor::new(image.clone()),
            RelocationConfig::default(),
        );

        let selector: CharacterSelector = "2".parse().unwrap();
        swap_with_hunter(&root, &mut relocator, selector).unwrap();

        let (_, output) = relocator.into_inner();
        let out = output.into_inner();
        let expect = [
            ("cha01a_01", b"B1B1"),
            ("cha01a_02", b"B2B2"),
            // No sprint for character 2, so its walk is used.
            ("cha01a_03", b"B2B2"),
            ("head01a", b"HBHB"),
            ("cha01c_01", b"B1B1"),
            ("cha01c_02", b"B2B2"),
            ("cha01c_03", b"B2B2"),
            ("head01c", b"HBHB"),
            ("cha02_01", b"C1C1"),
            ("cha02_02", b"C2C2"),
            ("head02", b"HCHC"),
        ];
        for (name, data) in expect {
            let path = format!("model/fieldchar/{name}");
            assert_eq!(contents(&out, &root, &path), data, "{path}");
        }
        assert_eq!(contents(&out, &root, "model/modeldata"), b"shared table");
    }

    #[test]
    fn unknown_character_is_rejected() {
        let image = fieldchar_image();
        let root = read_file_system(&mut Cursor::new(&image)).unwrap();
        let mut relocator = Relocator::new(
            Cursor::new(image.clone()),
            Cursor::new(image.clone()),
            RelocationConfig::default(),
        );
        let selector: CharacterSelector = "40".parse().unwrap();
        let err = swap_with_hunter(&root, &mut relocator, selector).unwrap_err();
        assert!(matches!(err, SwapError::Config(_)));
        assert_eq!(relocator.into_inner().1.into_inner(), image);
    }

    #[test]
    fn run_writes_output_and_leaves_input_alone() {
        let dir = tempfile::tempdir().unwrap();
        let image = fieldchar_image();
        let settings = settings(&dir, SwapMode::Character("2a".parse().unwrap()));
        fs::write(&settings.input_path, &image).unwrap();

        let summary = run(settings.clone()).unwrap();
        assert_eq!(summary.report.fallback_copies, 2);

        let root = read_file_system(&mut Cursor::new(&image)).unwrap();
        let out = fs::read(&settings.output_path).unwrap();
        assert_eq!(out.len(), image.len());
        assert_eq!(contents(&out, &root, "model/fieldchar/head01a"), b"HBHB");
        assert_eq!(contents(&out, &root, "model/fieldchar/head02"), b"HCHC");
        assert_eq!(fs::read(&settings.input_path).unwrap(), image);
    }

    #[test]
    fn run_executes_plan() {
        let dir = tempfile::tempdir().unwrap();
        let image = fieldchar_image();
        let plan_path = dir.path().join("plan.json");
        fs::write(
            &plan_path,
            r#"{ "commands": [
                { "swap": { "a": "model/fieldchar/head01a", "b": "model/fieldchar/head02" } }
            ] }"#,
        )
        .unwrap();
        let settings = settings(&dir, SwapMode::Plan(plan_path));
        fs::write(&settings.input_path, &image).unwrap();

        run(settings.clone()).unwrap();

        let root = read_file_system(&mut Cursor::new(&image)).unwrap();
        let out = fs::read(&settings.output_path).unwrap();
        assert_eq!(contents(&out, &root, "model/fieldchar/head01a"), b"HBHB");
        assert_eq!(contents(&out, &root, "model/fieldchar/head02"), b"HAHA");
        assert_eq!(contents(&out, &root, "model/fieldchar/cha01a_01"), b"A1A1");
    }

    #[test]
    fn run_rejects_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir, SwapMode::Character("2".parse().unwrap()));
        let err = run(settings.clone()).unwrap_err();
        assert!(matches!(err, SwapError::Config(_)));
        assert!(!settings.output_path.exists());
    }

    #[test]
    fn run_refuses_to_overwrite_input() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(&dir, SwapMode::Character("2".parse().unwrap()));
        fs::write(&settings.input_path, fieldchar_image()).unwrap();
        settings.output_path = settings.input_path.clone();
        assert!(matches!(run(settings).unwrap_err(), SwapError::Config(_)));
    }
}
