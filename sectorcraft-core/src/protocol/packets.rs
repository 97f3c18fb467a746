use crate::blocks::BlockId;
use crate::coord::{Position, SectorCoord};
use crate::inventory::{Inventory, INVENTORY_LEN};

use super::codec::{self, BLANK_SECTOR_LEN, SECTOR_BLOB_LEN};
use super::framing::{write_frame, Frame};
use super::wire::{WireReadExt, WireWriteExt};
use super::{PacketType, ProtocolError};

/// Separates usernames in the user list
pub const USER_LIST_SEPARATOR: char = '\u{7}';

/// Position payload length
const POSITION_LEN: usize = 12;
const ADD_BLOCK_LEN: usize = POSITION_LEN + 2;

pub type Color = [u8; 4];

/// Packets sent by clients.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientPacket {
    RequestSector(SectorCoord),
    AddBlock(Position, BlockId),
    RemoveBlock(Position),
    Chat(String),
    Inventory(Inventory),
    /// Username
    Login(String)
}

/// Packets sent by the server.
#[derive(Clone, Debug, PartialEq)]
pub enum ServerPacket {
    /// Encoded sector blob, see `codec::encode_sector`
    SectorData(Vec<u8>),
    BlankSector(SectorCoord),
    AddBlock(Position, BlockId),
    RemoveBlock(Position),
    Chat(String, Color),
    Inventory(Inventory),
    UserList(Vec<String>),
    /// Spawn position
    Spawn(Position)
}

fn check_len(kind: PacketType, payload: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if payload.len() != expected {
        return Err(ProtocolError::WrongLength { kind, expected, actual: payload.len() });
    }

    Ok(())
}

/// Reads a length-prefixed string that must fill the rest of `payload` but `trailing` bytes.
fn read_message(kind: PacketType, payload: &[u8], trailing: usize) -> Result<(String, &[u8]), ProtocolError> {
    if payload.len() < 4 + trailing {
        return Err(ProtocolError::WrongLength { kind, expected: 4 + trailing, actual: payload.len() });
    }

    let mut rbuf = payload;
    let len = rbuf.read_int()?;
    let expected = 4 + trailing + len.max(0) as usize;
    if len < 0 || payload.len() != expected {
        return Err(ProtocolError::WrongLength { kind, expected, actual: payload.len() });
    }

    let (text, rest) = rbuf.split_at(len as usize);
    let message = String::from_utf8(text.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(kind))?;
    Ok((message, rest))
}

fn position_payload(pos: Position) -> Vec<u8> {
    let mut wbuf = Vec::with_capacity(ADD_BLOCK_LEN);
    let _ = wbuf.write_position(pos);
    wbuf
}

fn add_block_payload(pos: Position, id: BlockId) -> Vec<u8> {
    let mut wbuf = position_payload(pos);
    // Ids are validated against the registry before they get here
    if wbuf.write_block_id(id).is_err() {
        wbuf.extend_from_slice(&[0, 0]);
    }
    wbuf
}

fn string_payload(message: &str, extra: usize) -> Vec<u8> {
    let mut wbuf = Vec::with_capacity(4 + message.len() + extra);
    let _ = wbuf.write_string(message);
    wbuf
}

fn decode_add_block(payload: &[u8]) -> Result<(Position, BlockId), ProtocolError> {
    check_len(PacketType::AddBlock, payload, ADD_BLOCK_LEN)?;
    let mut rbuf = payload;
    Ok((rbuf.read_position()?, rbuf.read_block_id()?))
}

fn decode_remove_block(payload: &[u8]) -> Result<Position, ProtocolError> {
    check_len(PacketType::RemoveBlock, payload, POSITION_LEN)?;
    let mut rbuf = payload;
    Ok(rbuf.read_position()?)
}

fn decode_inventory(payload: &[u8]) -> Result<Inventory, ProtocolError> {
    Inventory::from_bytes(payload).ok_or(ProtocolError::WrongLength {
        kind: PacketType::Inventory,
        expected: INVENTORY_LEN,
        actual: payload.len()
    })
}

fn packet_type(frame: &Frame) -> Result<PacketType, ProtocolError> {
    frame.packet_type().ok_or(ProtocolError::UnknownPacket(frame.kind))
}

impl ClientPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            ClientPacket::RequestSector(_) => PacketType::Sector,
            ClientPacket::AddBlock(..) => PacketType::AddBlock,
            ClientPacket::RemoveBlock(_) => PacketType::RemoveBlock,
            ClientPacket::Chat(_) => PacketType::Chat,
            ClientPacket::Inventory(_) => PacketType::Inventory,
            ClientPacket::Login(_) => PacketType::Login
        }
    }

    /// Full frame, header included.
    pub fn encode(&self) -> Vec<u8> {
        let payload = match self {
            ClientPacket::RequestSector(coord) => codec::encode_blank_sector(*coord),
            ClientPacket::AddBlock(pos, id) => add_block_payload(*pos, *id),
            ClientPacket::RemoveBlock(pos) => position_payload(*pos),
            ClientPacket::Chat(message) | ClientPacket::Login(message) => string_payload(message, 0),
            ClientPacket::Inventory(inventory) => inventory.as_bytes().to_vec()
        };

        write_frame(self.packet_type() as u8, &payload)
    }

    pub fn decode(frame: &Frame) -> Result<ClientPacket, ProtocolError> {
        let payload = &frame.payload[..];
        let kind = packet_type(frame)?;
        Ok(match kind {
            PacketType::Sector => ClientPacket::RequestSector(codec::decode_blank_sector(payload)?),
            PacketType::AddBlock => {
                let (pos, id) = decode_add_block(payload)?;
                ClientPacket::AddBlock(pos, id)
            }
            PacketType::RemoveBlock => ClientPacket::RemoveBlock(decode_remove_block(payload)?),
            PacketType::Chat => ClientPacket::Chat(read_message(kind, payload, 0)?.0),
            PacketType::Inventory => ClientPacket::Inventory(decode_inventory(payload)?),
            PacketType::Login => ClientPacket::Login(read_message(kind, payload, 0)?.0),
            PacketType::BlankSector | PacketType::UserList => return Err(ProtocolError::UnexpectedPacket(kind))
        })
    }
}

impl ServerPacket {
    pub fn packet_type(&self) -> PacketType {
        match self {
            ServerPacket::SectorData(_) => PacketType::Sector,
            ServerPacket::BlankSector(_) => PacketType::BlankSector,
            ServerPacket::AddBlock(..) => PacketType::AddBlock,
            ServerPacket::RemoveBlock(_) => PacketType::RemoveBlock,
            ServerPacket::Chat(..) => PacketType::Chat,
            ServerPacket::Inventory(_) => PacketType::Inventory,
            ServerPacket::UserList(_) => PacketType::UserList,
            ServerPacket::Spawn(_) => PacketType::Login
        }
    }

    /// Full frame, header included.
    pub fn encode(&self) -> Vec<u8> {
        let kind = self.packet_type() as u8;
        match self {
            ServerPacket::SectorData(blob) => write_frame(kind, blob),
            ServerPacket::BlankSector(coord) => write_frame(kind, &codec::encode_blank_sector(*coord)),
            ServerPacket::AddBlock(pos, id) => write_frame(kind, &add_block_payload(*pos, *id)),
            ServerPacket::RemoveBlock(pos) | ServerPacket::Spawn(pos) => write_frame(kind, &position_payload(*pos)),
            ServerPacket::Chat(message, color) => {
                let mut wbuf = string_payload(message, color.len());
                wbuf.extend_from_slice(color);
                write_frame(kind, &wbuf)
            }
            ServerPacket::Inventory(inventory) => write_frame(kind, inventory.as_bytes()),
            ServerPacket::UserList(names) => {
                let separator = USER_LIST_SEPARATOR.to_string();
                write_frame(kind, names.join(&separator).as_bytes())
            }
        }
    }

    /// Sector blobs are only checked for length here, `codec::decode_sector`
    /// does the rest.
    pub fn decode(frame: &Frame) -> Result<ServerPacket, ProtocolError> {
        let payload = &frame.payload[..];
        let kind = packet_type(frame)?;
        Ok(match kind {
            PacketType::Sector => {
                check_len(kind, payload, SECTOR_BLOB_LEN)?;
                ServerPacket::SectorData(payload.to_vec())
            }
            PacketType::BlankSector => {
                check_len(kind, payload, BLANK_SECTOR_LEN)?;
                ServerPacket::BlankSector(codec::decode_blank_sector(payload)?)
            }
            PacketType::AddBlock => {
                let (pos, id) = decode_add_block(payload)?;
                ServerPacket::AddBlock(pos, id)
            }
            PacketType::RemoveBlock => ServerPacket::RemoveBlock(decode_remove_block(payload)?),
            PacketType::Chat => {
                let (message, rest) = read_message(kind, payload, 4)?;
                ServerPacket::Chat(message, [rest[0], rest[1], rest[2], rest[3]])
            }
            PacketType::Inventory => ServerPacket::Inventory(decode_inventory(payload)?),
            PacketType::UserList => {
                let names = String::from_utf8(payload.to_vec()).map_err(|_| ProtocolError::InvalidUtf8(kind))?;
                ServerPacket::UserList(names.split(USER_LIST_SEPARATOR)
                    .filter(|name| !name.is_empty())
                    .map(str::to_owned)
                    .collect())
            }
            PacketType::Login => {
                check_len(kind, payload, POSITION_LEN)?;
                let mut rbuf = payload;
                ServerPacket::Spawn(rbuf.read_position()?)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::PLANKS;
    use crate::coord::Coord;
    use crate::protocol::framing::FrameDecoder;

    fn frame(bytes: &[u8]) -> Frame {
        let mut decoder = FrameDecoder::new().unwrap();
        decoder.feed(bytes).unwrap();
        decoder.next_frame().unwrap()
    }

    #[test]
    fn add_block_wire_format() {
        let packet = ClientPacket::AddBlock(Coord::new(1, 2, 3), PLANKS);
        assert_eq!(packet.encode(), [19, 0, 0, 0, 3, 1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0, 0, 5, 0]);
        assert_eq!(ClientPacket::decode(&frame(&packet.encode())), Ok(packet));
    }

    #[test]
    fn chat_carries_a_color_from_the_server() {
        let packet = ServerPacket::Chat("<bob> hi".to_owned(), [255, 255, 255, 255]);
        let bytes = packet.encode();
        assert_eq!(bytes.len(), 5 + 4 + 8 + 4);
        assert_eq!(ServerPacket::decode(&frame(&bytes)), Ok(packet));

        // The client form has no color
        let client = ClientPacket::Chat("<bob> hi".to_owned()).encode();
        assert!(matches!(
            ServerPacket::decode(&frame(&client)),
            Err(ProtocolError::WrongLength { kind: PacketType::Chat, .. })));
    }

    #[test]
    fn user_list_is_separated_by_bell() {
        let packet = ServerPacket::UserList(vec!["alice".to_owned(), "bob".to_owned()]);
        let bytes = packet.encode();
        assert_eq!(&bytes[5..], b"alice\x07bob");
        assert_eq!(ServerPacket::decode(&frame(&bytes)), Ok(packet));
        assert_eq!(
            ServerPacket::decode(&Frame::new(7, Vec::new())),
            Ok(ServerPacket::UserList(Vec::new())));
    }

    #[test]
    fn packet_255_means_login_or_spawn() {
        let login = ClientPacket::Login("carol".to_owned());
        assert_eq!(ClientPacket::decode(&frame(&login.encode())), Ok(login));

        let spawn = ServerPacket::Spawn(Coord::new(0, 40, -2));
        let bytes = spawn.encode();
        assert_eq!(bytes[4], 255);
        assert_eq!(ServerPacket::decode(&frame(&bytes)), Ok(spawn));
    }

    #[test]
    fn malformed_payloads() {
        assert!(matches!(
            ClientPacket::decode(&Frame::new(4, vec![0; 11])),
            Err(ProtocolError::WrongLength { kind: PacketType::RemoveBlock, expected: 12, actual: 11 })));
        assert!(matches!(
            ClientPacket::decode(&Frame::new(6, vec![0; 12])),
            Err(ProtocolError::WrongLength { kind: PacketType::Inventory, .. })));
        assert_eq!(
            ClientPacket::decode(&Frame::new(5, vec![2, 0, 0, 0, 0xc3, 0x28])),
            Err(ProtocolError::InvalidUtf8(PacketType::Chat)));
        assert_eq!(ClientPacket::decode(&Frame::new(9, Vec::new())), Err(ProtocolError::UnknownPacket(9)));
        assert_eq!(
            ClientPacket::decode(&Frame::new(7, Vec::new())),
            Err(ProtocolError::UnexpectedPacket(PacketType::UserList)));
        assert!(ServerPacket::decode(&Frame::new(1, vec![0; 100])).is_err());
    }
}
