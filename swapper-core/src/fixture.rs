//! Builds small synthetic ROM images with a NitroFS tree, for tests and for
//! trying out swap plans without a real dump.

use crate::header::HEADER_OFFSET;
use crate::nitrofs::DIRECTORY_ID_BASE;

const NAME_TABLE_OFFSET: usize = 0x200;
const DATA_ALIGNMENT: usize = 0x10;

#[derive(Debug, Clone)]
pub enum FixtureNode {
    File { name: String, data: Vec<u8> },
    Dir { name: String, children: Vec<FixtureNode> },
}

impl FixtureNode {
    pub fn file(name: &str, data: &[u8]) -> Self {
        FixtureNode::File {
            name: name.to_string(),
            data: data.to_vec(),
        }
    }

    pub fn dir(name: &str, children: Vec<FixtureNode>) -> Self {
        FixtureNode::Dir {
            name: name.to_string(),
            children,
        }
    }
}

enum FlatEntry<'a> {
    File(&'a str, &'a [u8]),
    Dir(&'a str, u16),
}

struct FlatDir<'a> {
    parent_id: u16,
    entries: Vec<FlatEntry<'a>>,
}

/// Directory ids are handed out depth-first, root first.
fn flatten<'a>(children: &'a [FixtureNode], parent_id: u16, dirs: &mut Vec<FlatDir<'a>>) -> u16 {
    let id = DIRECTORY_ID_BASE + dirs.len() as u16;
    dirs.push(FlatDir {
        parent_id,
        entries: Vec::new(),
    });

    let mut entries = Vec::with_capacity(children.len());
    for child in children {
        match child {
            FixtureNode::File { name, data } => entries.push(FlatEntry::File(name, data)),
            FixtureNode::Dir { name, children } => {
                let sub = flatten(children, id, dirs);
                entries.push(FlatEntry::Dir(name, sub));
            }
        }
    }
    dirs[usize::from(id - DIRECTORY_ID_BASE)].entries = entries;
    id
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_le_bytes());
}

fn align(value: usize, to: usize) -> usize {
    (value + to - 1) / to * to
}

/// Lays out an image: header, name table at `0x200`, allocation table, then
/// file data in id order. Names must be shorter than 128 bytes.
pub fn build_image(root: &[FixtureNode]) -> Vec<u8> {
    let mut dirs = Vec::new();
    flatten(root, DIRECTORY_ID_BASE, &mut dirs);

    let mut first_child_ids = Vec::with_capacity(dirs.len());
    let mut files: Vec<&[u8]> = Vec::new();
    for dir in &dirs {
        first_child_ids.push(files.len() as u16);
        for entry in &dir.entries {
            if let FlatEntry::File(_, data) = entry {
                files.push(*data);
            }
        }
    }

    let mut entry_lists = Vec::new();
    let mut list_offsets = Vec::with_capacity(dirs.len());
    let records_len = dirs.len() * 8;
    for dir in &dirs {
        list_offsets.push((records_len + entry_lists.len()) as u32);
        for entry in &dir.entries {
            match entry {
                FlatEntry::File(name, _) => {
                    entry_lists.push(name.len() as u8);
                    entry_lists.extend_from_slice(name.as_bytes());
                }
                FlatEntry::Dir(name, id) => {
                    entry_lists.push(0x80 + name.len() as u8);
                    entry_lists.extend_from_slice(name.as_bytes());
                    put_u16(&mut entry_lists, *id);
                }
            }
        }
        entry_lists.push(0);
    }

    let mut name_table = Vec::with_capacity(records_len + entry_lists.len());
    for (index, dir) in dirs.iter().enumerate() {
        put_u32(&mut name_table, list_offsets[index]);
        put_u16(&mut name_table, first_child_ids[index]);
        // the root record carries the directory count where others carry the parent
        let last = if index == 0 { dirs.len() as u16 } else { dir.parent_id };
        put_u16(&mut name_table, last);
    }
    name_table.extend_from_slice(&entry_lists);

    let allocation_offset = align(NAME_TABLE_OFFSET + name_table.len(), 4);
    let allocation_len = files.len() * 8;
    let data_offset = align(allocation_offset + allocation_len, DATA_ALIGNMENT);

    let mut allocation_table = Vec::with_capacity(allocation_len);
    let mut data = Vec::new();
    for file in &files {
        let start = data_offset + data.len();
        put_u32(&mut allocation_table, start as u32);
        put_u32(&mut allocation_table, (start + file.len()) as u32);
        data.extend_from_slice(file);
        data.resize(align(data.len(), DATA_ALIGNMENT), 0xFF);
    }

    let mut image = vec![0u8; data_offset + data.len()];
    let mut header = Vec::with_capacity(16);
    put_u32(&mut header, NAME_TABLE_OFFSET as u32);
    put_u32(&mut header, name_table.len() as u32);
    put_u32(&mut header, allocation_offset as u32);
    put_u32(&mut header, allocation_len as u32);
    let header_offset = HEADER_OFFSET as usize;
    image[header_offset..header_offset + header.len()].copy_from_slice(&header);

    image[NAME_TABLE_OFFSET..NAME_TABLE_OFFSET + name_table.len()].copy_from_slice(&name_table);
    image[allocation_offset..allocation_offset + allocation_len].copy_from_slice(&allocation_table);
    image[data_offset..].copy_from_slice(&data);
    image
}
