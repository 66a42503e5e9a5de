//! Byte-range relocation between two images.
//!
//! Every read comes from the source image and every write goes to the
//! destination image, so a sequence of copies never observes its own
//! output. Ranges are only ever copied between entries of equal length.

use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::nitrofs::{Directory, FileEntry};
use crate::{truncated, Result, SwapError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationConfig {
    /// Log each group-move copy at info level.
    pub verbose: bool,
    /// Allow [`Fallback`] substitution in group moves.
    pub enable_fallback: bool,
}

impl Default for RelocationConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            enable_fallback: true,
        }
    }
}

/// When no source carries `missing` but a destination does, copy the first
/// source carrying `substitute` onto those destinations instead.
///
/// `key` is independent of the key the group is matched on, so a fallback can
/// look at a coarser property than the one that lines sources up with
/// destinations.
#[derive(Clone)]
pub struct Fallback<L> {
    pub key: fn(&FileEntry) -> L,
    pub missing: L,
    pub substitute: L,
}

impl<L: fmt::Debug> fmt::Debug for Fallback<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fallback")
            .field("missing", &self.missing)
            .field("substitute", &self.substitute)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupMoveReport {
    pub copies: usize,
    pub fallback_copies: usize,
    /// Destinations that received more than one copy; only the last stays.
    pub overwritten: usize,
}

impl GroupMoveReport {
    pub fn merge(&mut self, other: GroupMoveReport) {
        self.copies += other.copies;
        self.fallback_copies += other.fallback_copies;
        self.overwritten += other.overwritten;
    }
}

pub struct Relocator<S, D> {
    source: S,
    destination: D,
    config: RelocationConfig,
}

impl<S, D> Relocator<S, D>
where
    S: Read + Seek,
    D: Write + Seek,
{
    /// `destination` is expected to start out as a copy of `source`.
    pub fn new(source: S, destination: D, config: RelocationConfig) -> Self {
        Self {
            source,
            destination,
            config,
        }
    }

    pub fn into_inner(self) -> (S, D) {
        (self.source, self.destination)
    }

    /// Copies `from`'s bytes in the source image over `to`'s bytes in the
    /// destination image. Nothing is written unless the lengths match and
    /// the whole source range could be read.
    pub fn copy(&mut self, from: &FileEntry, to: &FileEntry) -> Result<()> {
        if from.length != to.length {
            return Err(SwapError::SizeMismatch {
                from: from.name.clone(),
                to: to.name.clone(),
                from_len: from.length,
                to_len: to.length,
            });
        }

        debug!(
            "copy {} @ 0x{:08X} -> {} @ 0x{:08X} ({} bytes)",
            from, from.start_address, to, to.start_address, from.length
        );

        let mut buf = vec![0u8; from.length as usize];
        self.source
            .seek(SeekFrom::Start(u64::from(from.start_address)))?;
        self.source
            .read_exact(&mut buf)
            .map_err(truncated(&from.name))?;

        self.destination
            .seek(SeekFrom::Start(u64::from(to.start_address)))?;
        self.destination.write_all(&buf)?;
        Ok(())
    }

    pub fn swap(&mut self, a: &FileEntry, b: &FileEntry) -> Result<()> {
        self.copy(a, b)?;
        self.copy(b, a)
    }

    pub fn move_path(&mut self, root: &Directory, from: &str, to: &str) -> Result<()> {
        let from = root.get_file(from)?;
        let to = root.get_file(to)?;
        self.copy(from, to)
    }

    pub fn swap_path(&mut self, root: &Directory, a: &str, b: &str) -> Result<()> {
        let a = root.get_file(a)?;
        let b = root.get_file(b)?;
        self.swap(a, b)
    }

    /// Copies each source onto every destination with an equal key, in
    /// source order. Sources that share a key all land on the same
    /// destinations, so the last of them wins; the report counts those
    /// destinations in `overwritten`.
    pub fn move_group<K, F>(
        &mut self,
        sources: &[&FileEntry],
        destinations: &[&FileEntry],
        key: F,
    ) -> Result<GroupMoveReport>
    where
        K: PartialEq,
        F: Fn(&FileEntry) -> K,
    {
        self.group_move(sources, destinations, key, None::<&Fallback<()>>)
    }

    /// [`move_group`](Self::move_group), then `fallback` when enabled.
    pub fn move_group_with_fallback<K, F, L>(
        &mut self,
        sources: &[&FileEntry],
        destinations: &[&FileEntry],
        key: F,
        fallback: &Fallback<L>,
    ) -> Result<GroupMoveReport>
    where
        K: PartialEq,
        F: Fn(&FileEntry) -> K,
        L: PartialEq + fmt::Debug,
    {
        self.group_move(sources, destinations, key, Some(fallback))
    }

    fn group_move<K, F, L>(
        &mut self,
        sources: &[&FileEntry],
        destinations: &[&FileEntry],
        key: F,
        fallback: Option<&Fallback<L>>,
    ) -> Result<GroupMoveReport>
    where
        K: PartialEq,
        F: Fn(&FileEntry) -> K,
        L: PartialEq + fmt::Debug,
    {
        let mut report = GroupMoveReport::default();
        let mut writes: HashMap<u16, usize> = HashMap::new();

        let source_keys: Vec<K> = sources.iter().map(|file| key(*file)).collect();
        let destination_keys: Vec<K> = destinations.iter().map(|file| key(*file)).collect();

        for (source, source_key) in sources.iter().zip(&source_keys) {
            for (destination, _) in destinations
                .iter()
                .zip(&destination_keys)
                .filter(|(_, destination_key)| *destination_key == source_key)
            {
                self.log_copy("", source, destination);
                self.copy(source, destination)?;
                report.copies += 1;
                *writes.entry(destination.id).or_default() += 1;
            }
        }

        if let Some(fallback) = fallback.filter(|_| self.config.enable_fallback) {
            let fallback_key = fallback.key;
            let has_missing = sources
                .iter()
                .any(|source| fallback_key(source) == fallback.missing);
            let targets: Vec<&FileEntry> = destinations
                .iter()
                .copied()
                .filter(|destination| fallback_key(destination) == fallback.missing)
                .collect();

            if !has_missing && !targets.is_empty() {
                let substitute = sources
                    .iter()
                    .copied()
                    .find(|source| fallback_key(source) == fallback.substitute)
                    .ok_or_else(|| SwapError::MissingFallbackSource {
                        missing: format!("{:?}", fallback.missing),
                        substitute: format!("{:?}", fallback.substitute),
                    })?;

                for destination in targets {
                    self.log_copy("fallback: ", substitute, destination);
                    self.copy(substitute, destination)?;
                    report.fallback_copies += 1;
                    *writes.entry(destination.id).or_default() += 1;
                }
            }
        }

        report.overwritten = writes.values().filter(|&&count| count > 1).count();
        Ok(report)
    }

    fn log_copy(&self, prefix: &str, from: &FileEntry, to: &FileEntry) {
        if self.config.verbose {
            info!("{}{} {}", prefix, from, to);
        }
    }
}
