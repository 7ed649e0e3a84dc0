//! Fuzz target: `TransferPacket::decode` and `looks_like_packet`
//!
//! Arbitrary characteristic writes must never panic the decoder, and a
//! write classified as a packet must decode to exactly what it declares.
//!
//! cargo fuzz run fuzz_packet_decode

#![no_main]

use datalogger::transfer::codec::{looks_like_packet, HEADER_SIZE, MAX_PAYLOAD, PACKET_CAPACITY};
use datalogger::transfer::TransferPacket;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(packet) = TransferPacket::decode(data) else {
        assert!(data.len() < HEADER_SIZE);
        assert!(!looks_like_packet(data));
        return;
    };
    assert!(packet.payload.len() <= MAX_PAYLOAD);
    assert!(packet.encoded_len() <= data.len());

    if looks_like_packet(data) {
        assert!(packet.chunk_index < packet.total_units);
        if data.len() != PACKET_CAPACITY {
            assert_eq!(packet.encoded_len(), data.len());
        }
    }

    let mut buf = [0u8; PACKET_CAPACITY];
    let len = packet.encode(&mut buf).expect("decoded packet re-encodes");
    assert_eq!(&buf[HEADER_SIZE..len], packet.payload.as_slice());
});
