//! Randomized loss/roundtrip tests for the packet coding adapter.

use bftsim_coding::{Decoder, Encoder};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

fn generate_random_message<R: Rng>(rng: &mut R, message_size: usize) -> Vec<u8> {
    (0..message_size).map(|_| rng.gen()).collect()
}

/// Draws `drawn` packets, loses `lost` of them at random, and feeds the rest
/// to a fresh decoder. Panics if reconstruction fails or differs.
fn roundtrip_with_loss(rng: &mut impl Rng, message: &[u8], packet_size: usize, lost: usize) {
    let mut encoder = Encoder::new(message, packet_size).unwrap();
    let drawn = encoder.original_count() + lost;
    let mut packets: Vec<_> = (0..drawn).map(|_| encoder.next_packet()).collect();
    packets.shuffle(rng);
    packets.truncate(drawn - lost);

    let mut decoder = Decoder::new();
    let mut done = false;
    for packet in &packets {
        done = decoder.add_packet(packet).unwrap() || done;
    }
    assert!(done, "decoder should complete with {} of {} packets", packets.len(), drawn);

    let reconstructed = decoder.result().unwrap();
    assert_eq!(
        Sha256::digest(&reconstructed),
        Sha256::digest(message),
        "reconstructed payload does not match the original"
    );
}

#[test]
fn roundtrip_survives_packet_loss() {
    const ITERATIONS: u64 = 200;
    for seed in 0..ITERATIONS {
        let mut rng = StdRng::seed_from_u64(seed);
        let packet_size = rng.gen_range(16..512) * 2;
        let message_size = rng.gen_range(1..8 * 1024);
        let message = generate_random_message(&mut rng, message_size);
        let lost = rng.gen_range(0..16);
        roundtrip_with_loss(&mut rng, &message, packet_size, lost);
    }
}

#[test]
fn roundtrip_block_sized_payload() {
    let mut rng = StdRng::seed_from_u64(42);
    let message = generate_random_message(&mut rng, 1024 * 1024);
    roundtrip_with_loss(&mut rng, &message, 1400, 20);
}

#[test]
fn out_of_order_arrival_decodes() {
    let mut rng = StdRng::seed_from_u64(7);
    let message = generate_random_message(&mut rng, 10_000);
    let mut encoder = Encoder::new(&message, 256).unwrap();

    let mut packets: Vec<_> = (0..encoder.original_count() + 8).map(|_| encoder.next_packet()).collect();
    packets.shuffle(&mut rng);

    let mut decoder = Decoder::new();
    for packet in &packets {
        if decoder.add_packet(packet).unwrap() {
            break;
        }
    }
    assert_eq!(decoder.result().unwrap(), message);
}
