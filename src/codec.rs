//! Snapshot persistence: a single framed file capturing every live entry,
//! reloaded by reinserting each one through the normal admission path.
//!
//! Grounded on `db/persistance/dumper.rs`'s async `tokio::fs`-based
//! dump/load and its checksum trailer, but collapsed from the teacher's
//! versioned-directory-plus-gzip scheme into one flat framed file (no
//! compression layer — spec.md's snapshot format has no compression
//! requirement, so `flate2`/`brotli` are dropped, see DESIGN.md), and
//! switched from `crc32fast` to the `crc` crate's CRC-64 (spec.md's
//! checksum is 64-bit).

use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_64_XZ};

use crate::error::CacheError;

const MAGIC: u32 = 0x544C_4655; // "TLFU" packed into 4 bytes
const FORMAT_VERSION: u16 = 1;
const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);

/// Caller-supplied (de)serialization for keys and values. Kept as a
/// trait object so `Cache::save_snapshot`/`load_snapshot` don't need a
/// generic serde bound baked into every `Cache<K, V>` instantiation.
pub trait EntryCodec<K, V>: Send + Sync {
    fn encode_key(&self, key: &K) -> Vec<u8>;
    fn decode_key(&self, bytes: &[u8]) -> Result<K, CacheError>;
    fn encode_value(&self, value: &V) -> Vec<u8>;
    fn decode_value(&self, bytes: &[u8]) -> Result<V, CacheError>;
}

/// One entry as read back from a snapshot, before being re-admitted.
pub struct DecodedEntry<K, V> {
    pub key: K,
    pub value: V,
    pub cost: i64,
    pub ttl_ms_remaining: Option<u64>,
}

/// Serializes `entries` into a single framed buffer with a CRC64 trailer.
pub fn encode_snapshot<K, V>(
    codec: &dyn EntryCodec<K, V>,
    user_version: u32,
    capacity: i64,
    entries: &[(K, V, i64, Option<u64>)],
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(MAGIC).unwrap();
    buf.write_u16::<LittleEndian>(FORMAT_VERSION).unwrap();
    buf.write_u32::<LittleEndian>(user_version).unwrap();
    buf.write_i64::<LittleEndian>(capacity).unwrap();
    buf.write_u64::<LittleEndian>(entries.len() as u64).unwrap();

    for (key, value, cost, ttl) in entries {
        let kb = codec.encode_key(key);
        let vb = codec.encode_value(value);
        buf.write_u32::<LittleEndian>(kb.len() as u32).unwrap();
        buf.extend_from_slice(&kb);
        buf.write_u32::<LittleEndian>(vb.len() as u32).unwrap();
        buf.extend_from_slice(&vb);
        buf.write_i64::<LittleEndian>(*cost).unwrap();
        match ttl {
            Some(ms) => {
                buf.write_u8(1).unwrap();
                buf.write_u64::<LittleEndian>(*ms).unwrap();
            }
            None => buf.write_u8(0).unwrap(),
        }
    }

    let checksum = CRC64.checksum(&buf);
    buf.write_u64::<LittleEndian>(checksum).unwrap();
    buf
}

/// Parses a buffer produced by [`encode_snapshot`], verifying the magic,
/// format version, checksum, and (if `expected_user_version` is given)
/// the caller's own version tag.
pub fn decode_snapshot<K, V>(
    codec: &dyn EntryCodec<K, V>,
    bytes: &[u8],
    expected_user_version: Option<u32>,
) -> Result<(i64, Vec<DecodedEntry<K, V>>), CacheError> {
    if bytes.len() < 8 {
        return Err(CacheError::ChecksumMismatch);
    }
    let (body, trailer) = bytes.split_at(bytes.len() - 8);
    let expected_checksum = Cursor::new(trailer).read_u64::<LittleEndian>().unwrap();
    if CRC64.checksum(body) != expected_checksum {
        return Err(CacheError::ChecksumMismatch);
    }

    let mut cursor = Cursor::new(body);
    let magic = cursor.read_u32::<LittleEndian>().map_err(CacheError::Io)?;
    if magic != MAGIC {
        return Err(CacheError::ChecksumMismatch);
    }
    let _format_version = cursor.read_u16::<LittleEndian>().map_err(CacheError::Io)?;
    let user_version = cursor.read_u32::<LittleEndian>().map_err(CacheError::Io)?;
    if let Some(expected) = expected_user_version {
        if expected != user_version {
            return Err(CacheError::VersionMismatch { expected, found: user_version });
        }
    }
    let capacity = cursor.read_i64::<LittleEndian>().map_err(CacheError::Io)?;
    let count = cursor.read_u64::<LittleEndian>().map_err(CacheError::Io)?;

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let klen = cursor.read_u32::<LittleEndian>().map_err(CacheError::Io)? as usize;
        let mut kb = vec![0u8; klen];
        std::io::Read::read_exact(&mut cursor, &mut kb).map_err(CacheError::Io)?;
        let key = codec.decode_key(&kb)?;

        let vlen = cursor.read_u32::<LittleEndian>().map_err(CacheError::Io)? as usize;
        let mut vb = vec![0u8; vlen];
        std::io::Read::read_exact(&mut cursor, &mut vb).map_err(CacheError::Io)?;
        let value = codec.decode_value(&vb)?;

        let cost = cursor.read_i64::<LittleEndian>().map_err(CacheError::Io)?;
        let has_ttl = cursor.read_u8().map_err(CacheError::Io)?;
        let ttl_ms_remaining = if has_ttl == 1 {
            Some(cursor.read_u64::<LittleEndian>().map_err(CacheError::Io)?)
        } else {
            None
        };

        entries.push(DecodedEntry { key, value, cost, ttl_ms_remaining });
    }

    Ok((capacity, entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct U64Codec;

    impl EntryCodec<u64, u64> for U64Codec {
        fn encode_key(&self, key: &u64) -> Vec<u8> {
            key.to_le_bytes().to_vec()
        }
        fn decode_key(&self, bytes: &[u8]) -> Result<u64, CacheError> {
            Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
        }
        fn encode_value(&self, value: &u64) -> Vec<u8> {
            value.to_le_bytes().to_vec()
        }
        fn decode_value(&self, bytes: &[u8]) -> Result<u64, CacheError> {
            Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
        }
    }

    #[test]
    fn roundtrip_entries() {
        let codec = U64Codec;
        let entries = vec![(1u64, 100u64, 1i64, None), (2u64, 200u64, 2i64, Some(5000))];
        let bytes = encode_snapshot(&codec, 7, 1000, &entries);
        let (capacity, decoded) = decode_snapshot(&codec, &bytes, Some(7)).unwrap();
        assert_eq!(capacity, 1000);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].key, 1);
        assert_eq!(decoded[0].value, 100);
        assert_eq!(decoded[1].ttl_ms_remaining, Some(5000));
    }

    #[test]
    fn corrupted_trailer_is_rejected() {
        let codec = U64Codec;
        let entries = vec![(1u64, 100u64, 1i64, None)];
        let mut bytes = encode_snapshot(&codec, 1, 1000, &entries);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(decode_snapshot(&codec, &bytes, None), Err(CacheError::ChecksumMismatch)));
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let codec = U64Codec;
        let entries = vec![(1u64, 100u64, 1i64, None)];
        let bytes = encode_snapshot(&codec, 1, 1000, &entries);
        assert!(matches!(
            decode_snapshot(&codec, &bytes, Some(2)),
            Err(CacheError::VersionMismatch { expected: 2, found: 1 })
        ));
    }
}
