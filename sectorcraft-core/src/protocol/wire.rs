use std::io::{Error, ErrorKind, Read, Result, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::blocks::BlockId;
use crate::coord::{Coord, Position, SectorCoord};

pub trait WireReadExt: Read {

    #[inline]
    fn read_int(&mut self) -> Result<i32> {
        self.read_i32::<LittleEndian>()
    }

    #[inline]
    fn read_position(&mut self) -> Result<Position> {
        Ok(Coord::new(self.read_int()?, self.read_int()?, self.read_int()?))
    }

    #[inline]
    fn read_sector_coord(&mut self) -> Result<SectorCoord> {
        Ok(SectorCoord::new(self.read_int()?, self.read_int()?, self.read_int()?))
    }

    #[inline]
    fn read_block_id(&mut self) -> Result<BlockId> {
        let mut bytes = [0u8; 2];
        self.read_exact(&mut bytes)?;
        Ok(BlockId::from_wire(bytes))
    }
}

impl<R: Read + ?Sized> WireReadExt for R {}

pub trait WireWriteExt: Write {

    #[inline]
    fn write_int(&mut self, value: i32) -> Result<()> {
        self.write_i32::<LittleEndian>(value)
    }

    #[inline]
    fn write_position(&mut self, pos: Position) -> Result<()> {
        self.write_int(pos.x)?;
        self.write_int(pos.y)?;
        self.write_int(pos.z)
    }

    #[inline]
    fn write_sector_coord(&mut self, coord: SectorCoord) -> Result<()> {
        self.write_int(coord.x)?;
        self.write_int(coord.y)?;
        self.write_int(coord.z)
    }

    #[inline]
    fn write_block_id(&mut self, id: BlockId) -> Result<()> {
        match id.to_wire() {
            Some(bytes) => self.write_all(&bytes),
            None => Err(Error::new(ErrorKind::InvalidInput, format!("Block id {} doesn't fit in two bytes", id)))
        }
    }

    #[inline]
    fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_int(value.len() as i32)?;
        self.write_all(value.as_bytes())
    }
}

impl<W: Write + ?Sized> WireWriteExt for W {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ints_are_little_endian() {
        let mut buf = Vec::new();
        WireWriteExt::write_int(&mut buf, 0x0102_0304).unwrap();
        assert_eq!(buf, [4, 3, 2, 1]);
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut buf = Vec::new();
        buf.write_string("héllo").unwrap();
        assert_eq!(&buf[..4], &[6, 0, 0, 0]);
        assert_eq!(&buf[4..], "héllo".as_bytes());
    }

    #[test]
    fn wide_block_ids_are_refused() {
        let mut buf = Vec::new();
        assert!(buf.write_block_id(BlockId::new(256, 0)).is_err());
        buf.write_block_id(BlockId::new(5, 1)).unwrap();
        assert_eq!(buf, [5, 1]);
    }
}
