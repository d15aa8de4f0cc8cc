//! Rateless packet coding for coded block dissemination.
//!
//! A leader encodes a block into a stream of self-describing packets; a
//! replica reconstructs the block from any sufficiently large subset of
//! distinct packets. The erasure code underneath is Reed-Solomon
//! ([`reed_solomon_simd`]), which is MDS: any `original_count` distinct
//! shards reconstruct the payload. The packet stream is unbounded; once the
//! original and recovery shards are exhausted the encoder wraps around and
//! retransmits, so callers may keep drawing packets for as long as they need
//! to outlast network loss.


use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};
use reed_solomon_simd::{ReedSolomonDecoder, ReedSolomonEncoder};

/// Fixed-size header prepended to every packet: shard index, original shard
/// count, recovery shard count and payload length, as little-endian `u32`s.
pub const PACKET_HEADER_BYTES: usize = 16;

/// Recovery shards generated even for tiny payloads, so that single-shard
/// blocks still tolerate loss without immediate retransmission.
const MIN_RECOVERY_SHARDS: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CodingError {
    #[error("cannot encode an empty payload")]
    EmptyData,
    #[error("packet size must be positive")]
    ZeroPacketSize,
    #[error("malformed packet: {0}")]
    MalformedPacket(String),
    #[error("not enough packets have been collected to decode")]
    NotReady,
    #[error(transparent)]
    ReedSolomon(#[from] reed_solomon_simd::Error),
}

/// Stream-level parameters carried by every packet header. All packets of one
/// encoded block agree on these; a decoder adopts them from the first packet
/// it sees and rejects packets that disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StreamParams {
    original_count: usize,
    recovery_count: usize,
    shard_bytes: usize,
    data_len: usize,
}

impl StreamParams {
    fn total_shards(&self) -> usize {
        self.original_count + self.recovery_count
    }
}

/// Produces the packet stream for a single block.
///
/// All shards (original and recovery) are materialized at construction;
/// [`next_packet`](Encoder::next_packet) only stamps headers, so drawing
/// packets is cheap and infallible.
#[derive(Debug)]
pub struct Encoder {
    params: StreamParams,
    // Original shards (zero-padded to `shard_bytes`) followed by recovery
    // shards.
    shards: Vec<Bytes>,
    next_shard: usize,
}

impl Encoder {
    /// Encodes `data` into shards of (roughly) `packet_size` bytes.
    ///
    /// `packet_size` is rounded up to the nearest even value, a requirement
    /// of the underlying Reed-Solomon engine. Fails on empty `data` or zero
    /// `packet_size`.
    pub fn new(data: &[u8], packet_size: usize) -> Result<Self, CodingError> {
        if data.is_empty() {
            return Err(CodingError::EmptyData);
        }
        if packet_size == 0 {
            return Err(CodingError::ZeroPacketSize);
        }
        let shard_bytes = packet_size + (packet_size % 2);
        let original_count = data.len().div_ceil(shard_bytes);
        let recovery_count = original_count.max(MIN_RECOVERY_SHARDS);

        let mut shards = Vec::with_capacity(original_count + recovery_count);
        for chunk in data.chunks(shard_bytes) {
            if chunk.len() == shard_bytes {
                shards.push(Bytes::copy_from_slice(chunk));
            } else {
                let mut padded = BytesMut::zeroed(shard_bytes);
                padded[..chunk.len()].copy_from_slice(chunk);
                shards.push(padded.freeze());
            }
        }

        let mut encoder = ReedSolomonEncoder::new(original_count, recovery_count, shard_bytes)?;
        for shard in &shards {
            encoder.add_original_shard(shard)?;
        }
        let encoded = encoder.encode()?;
        shards.extend(encoded.recovery_iter().map(Bytes::copy_from_slice));

        let params = StreamParams {
            original_count,
            recovery_count,
            shard_bytes,
            data_len: data.len(),
        };
        Ok(Self { params, shards, next_shard: 0 })
    }

    /// The number of distinct packets a decoder needs to reconstruct the
    /// block.
    pub fn original_count(&self) -> usize {
        self.params.original_count
    }

    /// Draws the next packet. The stream never ends: after every distinct
    /// shard has been emitted once, the sequence wraps around and retransmits.
    pub fn next_packet(&mut self) -> Bytes {
        let index = self.next_shard;
        self.next_shard = (self.next_shard + 1) % self.params.total_shards();

        let mut packet = BytesMut::with_capacity(PACKET_HEADER_BYTES + self.params.shard_bytes);
        packet.put_u32_le(index_to_u32(index));
        packet.put_u32_le(index_to_u32(self.params.original_count));
        packet.put_u32_le(index_to_u32(self.params.recovery_count));
        packet.put_u32_le(index_to_u32(self.params.data_len));
        packet.extend_from_slice(&self.shards[index]);
        packet.freeze()
    }
}

/// Accumulates packets for a single block until enough distinct shards are
/// held to reconstruct it.
#[derive(Default)]
pub struct Decoder {
    // Adopted from the first packet.
    params: Option<StreamParams>,
    shards: HashMap<usize, Bytes>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one packet. Returns `Ok(true)` once the decoder holds enough
    /// distinct shards to reconstruct the payload; duplicate packets return
    /// `Ok(false)`. Packets inconsistent with the stream parameters are
    /// rejected with an error and leave the decoder state untouched.
    pub fn add_packet(&mut self, packet: &[u8]) -> Result<bool, CodingError> {
        let (index, params, shard) = parse_packet(packet)?;
        let known = *self.params.get_or_insert(params);
        if params != known {
            return Err(CodingError::MalformedPacket(format!(
                "stream parameter mismatch: got {params:?}, expected {known:?}"
            )));
        }
        self.shards.entry(index).or_insert_with(|| Bytes::copy_from_slice(shard));
        Ok(self.shards.len() >= known.original_count)
    }

    /// Reconstructs the payload once [`add_packet`](Decoder::add_packet) has
    /// returned `true`. Reed-Solomon recovery is skipped entirely when every
    /// original shard arrived directly.
    pub fn result(&self) -> Result<Bytes, CodingError> {
        let params = self.params.ok_or(CodingError::NotReady)?;
        if self.shards.len() < params.original_count {
            return Err(CodingError::NotReady);
        }

        let missing: Vec<usize> =
            (0..params.original_count).filter(|i| !self.shards.contains_key(i)).collect();
        let restored = if missing.is_empty() {
            HashMap::new()
        } else {
            self.restore_missing(&params)?
        };

        let mut data = BytesMut::with_capacity(params.original_count * params.shard_bytes);
        for index in 0..params.original_count {
            match self.shards.get(&index) {
                Some(shard) => data.extend_from_slice(shard),
                None => data.extend_from_slice(&restored[&index]),
            }
        }
        data.truncate(params.data_len);
        Ok(data.freeze())
    }

    fn restore_missing(&self, params: &StreamParams) -> Result<HashMap<usize, Bytes>, CodingError> {
        let mut decoder = ReedSolomonDecoder::new(
            params.original_count,
            params.recovery_count,
            params.shard_bytes,
        )?;
        // The code is MDS: any `original_count` distinct shards suffice, so
        // feeding exactly that many keeps reconstruction deterministic.
        let mut fed = 0;
        for (&index, shard) in &self.shards {
            if fed == params.original_count {
                break;
            }
            if index < params.original_count {
                decoder.add_original_shard(index, shard)?;
            } else {
                decoder.add_recovery_shard(index - params.original_count, shard)?;
            }
            fed += 1;
        }
        let decoded = decoder.decode()?;
        Ok(decoded
            .restored_original_iter()
            .map(|(index, shard)| (index, Bytes::copy_from_slice(shard)))
            .collect())
    }
}

fn parse_packet(packet: &[u8]) -> Result<(usize, StreamParams, &[u8]), CodingError> {
    if packet.len() <= PACKET_HEADER_BYTES {
        return Err(CodingError::MalformedPacket(format!(
            "packet of {} bytes is too short to carry a header and a shard",
            packet.len()
        )));
    }
    let index = read_u32_le(packet, 0);
    let original_count = read_u32_le(packet, 4);
    let recovery_count = read_u32_le(packet, 8);
    let data_len = read_u32_le(packet, 12);
    let shard = &packet[PACKET_HEADER_BYTES..];

    if original_count == 0 {
        return Err(CodingError::MalformedPacket("zero original shard count".to_string()));
    }
    if index >= original_count + recovery_count {
        return Err(CodingError::MalformedPacket(format!(
            "shard index {index} out of range for {original_count}+{recovery_count} shards"
        )));
    }
    let params = StreamParams {
        original_count,
        recovery_count,
        shard_bytes: shard.len(),
        data_len,
    };
    Ok((index, params, shard))
}

fn read_u32_le(packet: &[u8], offset: usize) -> usize {
    let raw: [u8; 4] = packet[offset..offset + 4].try_into().expect("slice is 4 bytes");
    usize::try_from(u32::from_le_bytes(raw)).expect("u32 fits in usize")
}

fn index_to_u32(value: usize) -> u32 {
    u32::try_from(value).expect("shard counts are far below u32::MAX")
}
