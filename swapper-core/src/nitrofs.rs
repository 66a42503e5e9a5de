//! NitroFS: the directory tree embedded in a DS ROM.
//!
//! The name table starts with one 8-byte record per directory, followed by
//! each directory's entry list. Files and directories are numbered in two
//! separate id spaces: files count up from each directory's first-child id,
//! directories count up from [`DIRECTORY_ID_BASE`] in table order. Entry
//! lists only name a subdirectory by id, so the tree is put together after
//! every list has been read.

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, warn};
use std::collections::HashSet;
use std::fmt;
use std::io::{Cursor, Read, Seek, SeekFrom};

use crate::header::ImageHeader;
use crate::{truncated, Result, SwapError};

/// Id of the root directory; the rest follow in table order.
pub const DIRECTORY_ID_BASE: u16 = 0xF000;

/// Length bytes above this mark a subdirectory reference.
const SUBDIRECTORY_FLAG: u8 = 0x80;

const ALLOCATION_SLOT_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    pub id: u16,
    pub start_address: u32,
    pub length: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Empty for the root.
    pub name: String,
    pub id: u16,
    /// Offset of the entry list, relative to the start of the name table.
    pub table_offset: u32,
    pub first_child_id: u16,
    /// `None` for the root, whose record stores the directory count instead.
    pub parent_id: Option<u16>,
    pub children: Vec<Entry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    File(FileEntry),
    Directory(Directory),
}

/// A borrowed view of either kind of node, so the root (which is not held
/// in an [`Entry`]) can be returned from path lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryRef<'a> {
    File(&'a FileEntry),
    Directory(&'a Directory),
}

impl Entry {
    pub fn name(&self) -> &str {
        match self {
            Entry::File(file) => &file.name,
            Entry::Directory(dir) => &dir.name,
        }
    }

    pub fn id(&self) -> u16 {
        match self {
            Entry::File(file) => file.id,
            Entry::Directory(dir) => dir.id,
        }
    }

    pub fn entry_ref(&self) -> EntryRef<'_> {
        match self {
            Entry::File(file) => EntryRef::File(file),
            Entry::Directory(dir) => EntryRef::Directory(dir),
        }
    }
}

impl Directory {
    pub fn child(&self, name: &str) -> Option<&Entry> {
        self.children.iter().find(|child| child.name() == name)
    }

    /// Leaf files directly inside this directory, in table order.
    pub fn files(&self) -> impl Iterator<Item = &FileEntry> {
        self.children.iter().filter_map(|child| match child {
            Entry::File(file) => Some(file),
            Entry::Directory(_) => None,
        })
    }

    /// Number of leaf files in this directory and all directories below it.
    pub fn file_count(&self) -> usize {
        self.children
            .iter()
            .map(|child| match child {
                Entry::File(_) => 1,
                Entry::Directory(dir) => dir.file_count(),
            })
            .sum()
    }
}

impl fmt::Display for FileEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Directory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/", self.name)
    }
}

impl fmt::Display for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::File(file) => fmt::Display::fmt(file, f),
            Entry::Directory(dir) => fmt::Display::fmt(dir, f),
        }
    }
}

struct DirectoryRecord {
    table_offset: u32,
    first_child_id: u16,
    parent_id: Option<u16>,
}

enum RawChild {
    File { name: String, id: u16 },
    Subdirectory { name: String, id: u16 },
}

struct PendingDirectory {
    record: DirectoryRecord,
    children: Vec<RawChild>,
}

/// Reads the header, both tables, and returns the assembled root directory
/// with every file's byte range filled in.
pub fn read_file_system<R: Read + Seek>(image: &mut R) -> Result<Directory> {
    let header = ImageHeader::read(image)?;
    let name_table = read_table(
        image,
        header.name_table_offset,
        header.name_table_length,
        "name table",
    )?;
    let allocation_table = read_table(
        image,
        header.allocation_table_offset,
        header.allocation_table_length,
        "allocation table",
    )?;

    let records = parse_directory_records(&name_table)?;
    let mut pending = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| -> Result<Option<PendingDirectory>> {
            let id = directory_id(index)?;
            let children = parse_entry_list(&name_table, id, &record)?;
            Ok(Some(PendingDirectory { record, children }))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut root = assemble(String::new(), DIRECTORY_ID_BASE, &mut pending)?;

    for (index, _) in pending.iter().enumerate().filter(|(_, dir)| dir.is_some()) {
        warn!(
            "directory 0x{:04X} is not referenced from the root and was skipped",
            usize::from(DIRECTORY_ID_BASE) + index
        );
    }

    assign_ranges(&mut root, &allocation_table)?;
    Ok(root)
}

fn read_table<R: Read + Seek>(image: &mut R, offset: u32, length: u32, what: &str) -> Result<Vec<u8>> {
    // The header is untrusted; check the range before sizing a buffer from it.
    let image_length = image.seek(SeekFrom::End(0))?;
    if u64::from(offset) + u64::from(length) > image_length {
        return Err(SwapError::TruncatedImage(format!(
            "{} (0x{:X} bytes at 0x{:08X}, image is 0x{:X} bytes)",
            what, length, offset, image_length
        )));
    }

    let mut table = vec![0u8; length as usize];
    image.seek(SeekFrom::Start(u64::from(offset)))?;
    image.read_exact(&mut table).map_err(truncated(what))?;
    Ok(table)
}

fn directory_id(index: usize) -> Result<u16> {
    u16::try_from(index)
        .ok()
        .and_then(|index| DIRECTORY_ID_BASE.checked_add(index))
        .ok_or_else(|| SwapError::CorruptTable(format!("too many directories ({})", index + 1)))
}

fn parse_directory_records(name_table: &[u8]) -> Result<Vec<DirectoryRecord>> {
    let mut cursor = Cursor::new(name_table);
    let eof = || truncated("name table directory records");

    let root_offset = cursor.read_u32::<LittleEndian>().map_err(eof())?;
    let root_first_child = cursor.read_u16::<LittleEndian>().map_err(eof())?;
    let count = cursor.read_u16::<LittleEndian>().map_err(eof())?;

    if count == 0 {
        return Err(SwapError::CorruptTable(
            "name table declares zero directories".to_string(),
        ));
    }

    let mut records = Vec::with_capacity(usize::from(count));
    records.push(DirectoryRecord {
        table_offset: root_offset,
        first_child_id: root_first_child,
        parent_id: None,
    });

    for _ in 1..count {
        records.push(DirectoryRecord {
            table_offset: cursor.read_u32::<LittleEndian>().map_err(eof())?,
            first_child_id: cursor.read_u16::<LittleEndian>().map_err(eof())?,
            parent_id: Some(cursor.read_u16::<LittleEndian>().map_err(eof())?),
        });
    }

    debug!("name table declares {} directories", count);
    Ok(records)
}

fn parse_entry_list(name_table: &[u8], dir_id: u16, record: &DirectoryRecord) -> Result<Vec<RawChild>> {
    let what = format!("entry list of directory 0x{:04X}", dir_id);
    let start = record.table_offset as usize;
    if start > name_table.len() {
        return Err(SwapError::TruncatedImage(what));
    }

    let mut cursor = Cursor::new(&name_table[start..]);
    let mut next_file_id = record.first_child_id;
    let mut children = Vec::new();

    loop {
        let length = cursor.read_u8().map_err(truncated(&what))?;
        if length == 0 {
            break;
        }

        let is_directory = length > SUBDIRECTORY_FLAG;
        let name_length = if is_directory {
            length - SUBDIRECTORY_FLAG
        } else {
            length
        };

        let mut raw_name = vec![0u8; usize::from(name_length)];
        cursor.read_exact(&mut raw_name).map_err(truncated(&what))?;
        let name = String::from_utf8_lossy(&raw_name).into_owned();

        if is_directory {
            let id = cursor.read_u16::<LittleEndian>().map_err(truncated(&what))?;
            children.push(RawChild::Subdirectory { name, id });
        } else {
            let id = next_file_id;
            next_file_id = next_file_id.checked_add(1).ok_or_else(|| {
                SwapError::CorruptTable(format!("file ids overflow in {}", what))
            })?;
            children.push(RawChild::File { name, id });
        }
    }

    debug!(
        "directory 0x{:04X}: {} entries at name table offset 0x{:X}",
        dir_id,
        children.len(),
        start
    );
    Ok(children)
}

/// Builds the directory with `id`, grafting every subdirectory it names in
/// place of the reference. Each parsed directory can be taken only once,
/// which keeps the result a tree even if the table loops back on itself.
fn assemble(name: String, id: u16, pending: &mut [Option<PendingDirectory>]) -> Result<Directory> {
    let slot = id
        .checked_sub(DIRECTORY_ID_BASE)
        .and_then(|index| pending.get_mut(usize::from(index)))
        .ok_or_else(|| {
            SwapError::CorruptTable(format!(
                "entry '{}' refers to directory 0x{:04X}, which is not declared",
                name, id
            ))
        })?;
    let PendingDirectory { record, children: raw_children } = slot.take().ok_or_else(|| {
        SwapError::CorruptTable(format!(
            "directory 0x{:04X} is referenced more than once (last as '{}')",
            id, name
        ))
    })?;

    let mut seen = HashSet::new();
    let mut children = Vec::with_capacity(raw_children.len());
    for raw in raw_children {
        let child = match raw {
            RawChild::File { name, id } => Entry::File(FileEntry {
                name,
                id,
                start_address: 0,
                length: 0,
            }),
            RawChild::Subdirectory { name, id } => Entry::Directory(assemble(name, id, pending)?),
        };
        if !seen.insert(child.name().to_string()) {
            return Err(SwapError::CorruptTable(format!(
                "directory 0x{:04X} lists '{}' twice",
                id,
                child.name()
            )));
        }
        children.push(child);
    }

    Ok(Directory {
        name,
        id,
        table_offset: record.table_offset,
        first_child_id: record.first_child_id,
        parent_id: record.parent_id,
        children,
    })
}

fn assign_ranges(dir: &mut Directory, allocation_table: &[u8]) -> Result<()> {
    for child in &mut dir.children {
        match child {
            Entry::File(file) => {
                let (start, end) = read_allocation_slot(allocation_table, file.id)?;
                file.start_address = start;
                file.length = end.checked_sub(start).ok_or_else(|| {
                    SwapError::CorruptTable(format!(
                        "'{}' ends at 0x{:08X}, before its start 0x{:08X}",
                        file.name, end, start
                    ))
                })?;
            }
            Entry::Directory(sub) => assign_ranges(sub, allocation_table)?,
        }
    }
    Ok(())
}

fn read_allocation_slot(allocation_table: &[u8], id: u16) -> Result<(u32, u32)> {
    let offset = usize::from(id) * ALLOCATION_SLOT_SIZE;
    let mut slot = allocation_table
        .get(offset..offset + ALLOCATION_SLOT_SIZE)
        .ok_or_else(|| SwapError::TruncatedImage(format!("allocation table slot for file {}", id)))?;
    let start = slot.read_u32::<LittleEndian>()?;
    let end = slot.read_u32::<LittleEndian>()?;
    Ok((start, end))
}
