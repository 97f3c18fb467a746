pub mod region;
pub mod sector;
pub mod world;
