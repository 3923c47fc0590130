//! Property-based tests for the packet codec and the framer.

mod common;

use medcab_core::DeviceAddress;
use medcab_protocol::bits::checksum;
use medcab_protocol::{Framer, Packet, ProtocolError, build_unlock, parse_response};
use proptest::prelude::*;
use tokio::time::Instant;

/// Strategy for arbitrary well-formed packets (0-40 data bytes).
fn any_packet() -> impl Strategy<Value = Packet> {
    (
        any::<u8>(),
        any::<u8>(),
        any::<u8>(),
        any::<u8>(),
        prop::collection::vec(any::<u8>(), 0..=40),
    )
        .prop_map(|(address, lock_num, command, ask, data)| {
            Packet::new(address, lock_num, command, ask, data).expect("data within bounds")
        })
}

/// Strategy for slot ids outside `1..=12`.
fn out_of_range_slot() -> impl Strategy<Value = i64> {
    prop_oneof![i64::MIN..=0i64, 13i64..=i64::MAX]
}

proptest! {
    /// The SUM byte equals the checksum of every other byte.
    #[test]
    fn prop_checksum_round_trip(packet in any_packet()) {
        let bytes = packet.to_bytes();
        let mut without_sum = bytes.to_vec();
        let sum = without_sum.remove(7);

        prop_assert_eq!(checksum(&without_sum).unwrap(), sum);
        prop_assert_eq!(Packet::parse(&bytes).unwrap(), packet);
    }

    /// A hardware echo of any unlock request with ASK = SUCCESS decodes as success.
    #[test]
    fn prop_unlock_echo_succeeds(address in any::<u8>(), slot in 1i64..=12) {
        let request = build_unlock(DeviceAddress::new(address), slot).unwrap();
        prop_assert_eq!(i64::from(request.lock_num), slot - 1);

        let echo = Packet::new(
            request.address,
            request.lock_num,
            request.command,
            0x10,
            Vec::new(),
        )
        .unwrap()
        .to_bytes();
        let parsed = parse_response(&echo).unwrap();

        prop_assert!(parsed.unlock_success());
        prop_assert_eq!(parsed.packet.address, address);
    }

    /// Unlock requests outside the slot range are rejected for every address.
    #[test]
    fn prop_unlock_rejects_out_of_range(address in any::<u8>(), slot in out_of_range_slot()) {
        let result = build_unlock(DeviceAddress::new(address), slot);
        prop_assert_eq!(result, Err(ProtocolError::InvalidSlot { slot, max: 12 }));
    }

    /// Chunk boundaries never change what the framer delivers.
    #[test]
    fn prop_framer_chunking_is_transparent(
        packet in any_packet(),
        cuts in prop::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let bytes = packet.to_bytes();

        let mut offsets: Vec<usize> = cuts.iter().map(|i| i.index(bytes.len())).collect();
        offsets.push(0);
        offsets.push(bytes.len());
        offsets.sort_unstable();
        offsets.dedup();
        let chunks: Vec<&[u8]> = offsets.windows(2).map(|w| &bytes[w[0]..w[1]]).collect();

        let now = Instant::now();
        let whole = common::feed_chunks(&mut Framer::new(), &[&bytes[..]], now);
        let split = common::feed_chunks(&mut Framer::new(), &chunks, now);

        prop_assert_eq!(whole.len(), 1);
        prop_assert_eq!(&whole, &split);
        prop_assert_eq!(Packet::parse(&split[0]).unwrap(), packet);
    }
}
