use clap::Parser;
use std::fs::File;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use swapper_core::{read_file_system, run, CharacterSelector, Entry, SwapError, SwapMode, SwapSettings};

#[derive(Debug, Parser)]
#[command(name = "ff1-swapper", version, about = "Fossil Fighters field model swapper")]
struct Args {
    /// [INPUT] OUTPUT_NAME [CHARACTER]. INPUT is recognised by its .nds
    /// extension and defaults to the only .nds file in the current
    /// directory. The output ROM is written next to the input as
    /// "<input> - <OUTPUT_NAME>.nds". CHARACTER (e.g. 2, 11 or 11b, a bare
    /// number meaning variation a) is swapped with Hunter and is required
    /// unless --custom is given.
    #[arg(
        value_name = "ARGS",
        num_args = 1..=3,
        required_unless_present = "list"
    )]
    positional: Vec<String>,

    /// Custom mode: run the commands in this JSON plan instead of swapping
    /// with Hunter.
    #[arg(long, value_name = "PLAN")]
    custom: Option<PathBuf>,

    /// Don't substitute the walking animation for a missing sprint.
    #[arg(short = 'd', long)]
    disable_weird_sprint: bool,

    /// Overwrite the output ROM if it already exists.
    #[arg(long)]
    force: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Debug-only: list one directory of the ROM's file system and exit.
    #[arg(long, value_name = "DIR", hide = true)]
    list: Option<String>,
}

/// Positional arguments once INPUT has been told apart from the rest.
#[derive(Debug, PartialEq, Eq)]
struct Positionals {
    input: Option<PathBuf>,
    name: Option<String>,
    character: Option<String>,
}

fn has_nds_extension(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("nds"))
}

fn split_positionals(values: Vec<String>) -> Result<Positionals, SwapError> {
    let mut values = values.into_iter().peekable();
    let input = values
        .next_if(|value| has_nds_extension(Path::new(value)))
        .map(PathBuf::from);
    let name = values.next();
    let character = values.next();

    if let Some(extra) = values.next() {
        return Err(SwapError::Config(format!("unexpected argument '{}'", extra)));
    }

    Ok(Positionals {
        input,
        name,
        character,
    })
}

fn init_logging(debug: bool) -> Result<(), log::SetLoggerError> {
    let level = if debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
}

/// All `.nds` files directly inside `dir`, sorted by name.
fn find_nds_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| has_nds_extension(path))
        .collect()
}

fn pick_input(input: Option<PathBuf>) -> Result<PathBuf, SwapError> {
    if let Some(input) = input {
        return Ok(input);
    }

    let mut found = find_nds_files(Path::new("."));
    match found.len() {
        0 => Err(SwapError::Config(
            "No nds files found in current directory".to_string(),
        )),
        1 => Ok(found.remove(0)),
        _ => {
            let names: Vec<String> = found.iter().map(|p| p.display().to_string()).collect();
            Err(SwapError::Config(format!(
                "Found several nds files, pick one with --input: {}",
                names.join(", ")
            )))
        }
    }
}

fn output_path_for(input: &Path, name: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_file_name(format!("{} - {}.nds", stem, name))
}

fn list_directory(input: &Path, dir: &str) -> Result<(), SwapError> {
    let mut image = File::open(input)?;
    let root = read_file_system(&mut image)?;
    let dir = root.get_dir(dir)?;

    for child in &dir.children {
        match child {
            Entry::File(file) => println!(
                "{:>6}  0x{:08X}  {:>8}  {}",
                file.id, file.start_address, file.length, file
            ),
            Entry::Directory(sub) => println!("0x{:04X}  {:>10}  {:>8}  {}", sub.id, "", "", sub),
        }
    }
    Ok(())
}

fn settings_from_args(args: Args) -> Result<SwapSettings, SwapError> {
    let positionals = split_positionals(args.positional)?;
    let input_path = pick_input(positionals.input)?;
    let name = positionals
        .name
        .ok_or_else(|| SwapError::Config("an output name is required".to_string()))?;
    let output_path = output_path_for(&input_path, &name);

    if output_path.exists() && !args.force {
        return Err(SwapError::Config(format!(
            "File '{}' already exists, pass --force to overwrite it",
            output_path.display()
        )));
    }

    let mode = match (args.custom, positionals.character) {
        (Some(_), Some(character)) => {
            return Err(SwapError::Config(format!(
                "character '{}' can't be combined with --custom",
                character
            )))
        }
        (Some(plan), None) => SwapMode::Plan(plan),
        (None, Some(character)) => SwapMode::Character(character.parse::<CharacterSelector>()?),
        (None, None) => {
            return Err(SwapError::Config(
                "a character is required unless --custom is given".to_string(),
            ))
        }
    };

    Ok(SwapSettings {
        input_path,
        output_path,
        mode,
        weird_sprint: !args.disable_weird_sprint,
        debug: args.debug,
    })
}

fn main() {
    let args = Args::parse();

    if let Err(err) = init_logging(args.debug) {
        eprintln!("Failed to set up logging: {err}");
    }

    // Debug path: dump a directory listing and exit.
    if let Some(dir) = args.list.clone() {
        let result = split_positionals(args.positional)
            .and_then(|positionals| pick_input(positionals.input))
            .and_then(|input| list_directory(&input, &dir));
        if let Err(err) = result {
            eprintln!("Error: {err}");
            std::process::exit(1);
        }
        return;
    }

    let result = settings_from_args(args).and_then(|settings| {
        let output_path = settings.output_path.clone();
        run(settings)?;
        println!("Wrote '{}'", output_path.display());
        Ok(())
    });

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
