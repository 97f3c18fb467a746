pub mod blocks;
pub mod client;
pub mod coord;
pub mod inventory;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod storage;
pub mod terrain;

/// Port the server listens on unless configured otherwise
pub const DEFAULT_PORT: u16 = 1486;
