//! Property tests for the pkt-line codec.

use std::io::Cursor;

use git_wire_core::pktline::{PacketLine, Reader, Writer, MAX_DATA_LEN};
use proptest::prelude::*;

proptest! {
    /// Any payload within the frame limit survives an encode/decode cycle.
    #[test]
    fn data_frames_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..=65516)) {
        let mut bytes = Vec::new();
        Writer::new(&mut bytes).write_data(&payload).unwrap();
        let mut reader = Reader::new(Cursor::new(bytes));
        prop_assert_eq!(reader.read_line().unwrap(), Some(PacketLine::Data(payload)));
        prop_assert_eq!(reader.read_line().unwrap(), None);
    }

    /// Several frames concatenate and decode in order.
    #[test]
    fn frame_sequences_round_trip(payloads in proptest::collection::vec(
        proptest::collection::vec(any::<u8>(), 0..256),
        0..16,
    )) {
        let mut bytes = Vec::new();
        {
            let mut writer = Writer::new(&mut bytes);
            for payload in &payloads {
                writer.write_data(payload).unwrap();
            }
            writer.write_flush().unwrap();
        }
        let mut reader = Reader::new(Cursor::new(bytes));
        let lines = reader.read_until_flush().unwrap();
        prop_assert_eq!(lines.len(), payloads.len());
        for (line, payload) in lines.iter().zip(&payloads) {
            prop_assert_eq!(line.data(), Some(payload.as_slice()));
        }
    }
}

#[test]
fn flush_round_trips() {
    let mut bytes = Vec::new();
    Writer::new(&mut bytes).write_flush().unwrap();
    let mut reader = Reader::new(Cursor::new(bytes));
    assert_eq!(reader.read_line().unwrap(), Some(PacketLine::Flush));
}

#[test]
fn maximum_payload_is_accepted() {
    let payload = vec![0xabu8; MAX_DATA_LEN];
    let mut bytes = Vec::new();
    Writer::new(&mut bytes).write_data(&payload).unwrap();
    let mut reader = Reader::new(Cursor::new(bytes));
    assert_eq!(
        reader.read_line().unwrap(),
        Some(PacketLine::Data(payload))
    );
}
