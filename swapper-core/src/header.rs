use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Read, Seek, SeekFrom};

use crate::{truncated, Result};

/// Offset of the file-name-table/file-allocation-table descriptors in the ROM header.
pub const HEADER_OFFSET: u64 = 0x40;

/// Locations of the name table and allocation table inside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    pub name_table_offset: u32,
    pub name_table_length: u32,
    pub allocation_table_offset: u32,
    pub allocation_table_length: u32,
}

impl ImageHeader {
    pub fn read<R: Read + Seek>(image: &mut R) -> Result<Self> {
        let mut raw = [0u8; 16];
        image.seek(SeekFrom::Start(HEADER_OFFSET))?;
        image.read_exact(&mut raw).map_err(truncated("ROM header"))?;

        let mut fields = &raw[..];
        Ok(Self {
            name_table_offset: fields.read_u32::<LittleEndian>()?,
            name_table_length: fields.read_u32::<LittleEndian>()?,
            allocation_table_offset: fields.read_u32::<LittleEndian>()?,
            allocation_table_length: fields.read_u32::<LittleEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SwapError;
    use std::io::Cursor;

    #[test]
    fn reads_table_descriptors() {
        let mut image = vec![0u8; 0x50];
        image[0x40..0x50].copy_from_slice(&[
            0x00, 0x02, 0x00, 0x00, // name table offset
            0x34, 0x00, 0x00, 0x00, // name table length
            0x40, 0x02, 0x00, 0x00, // allocation table offset
            0x18, 0x00, 0x00, 0x00, // allocation table length
        ]);

        let header = ImageHeader::read(&mut Cursor::new(image)).unwrap();
        assert_eq!(
            header,
            ImageHeader {
                name_table_offset: 0x200,
                name_table_length: 0x34,
                allocation_table_offset: 0x240,
                allocation_table_length: 0x18,
            }
        );
    }

    #[test]
    fn short_image_is_truncated() {
        let err = ImageHeader::read(&mut Cursor::new(vec![0u8; 0x4F])).unwrap_err();
        assert!(matches!(err, SwapError::TruncatedImage(_)));
    }
}
