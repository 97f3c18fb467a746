#![no_main]
use libfuzzer_sys::fuzz_target;
use sectorcraft_core::protocol::framing::FrameDecoder;
use sectorcraft_core::protocol::packets::{ClientPacket, ServerPacket};

fuzz_target!(|data: &[u8]| {
    let mut decoder = FrameDecoder::new().unwrap();
    if decoder.feed(data).is_err() {
        return;
    }

    while let Some(frame) = decoder.next_frame() {
        let _ = ClientPacket::decode(&frame);
        let _ = ServerPacket::decode(&frame);
    }
});
