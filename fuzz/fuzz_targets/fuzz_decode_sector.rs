#![no_main]
use libfuzzer_sys::fuzz_target;
use sectorcraft_core::blocks::BlockRegistry;
use sectorcraft_core::protocol::codec;

fuzz_target!(|data: &[u8]| {
    let registry = BlockRegistry::default();
    if let Ok(sector) = codec::decode_sector(data, &registry) {
        assert!(sector.len() <= 512);
    }
});
