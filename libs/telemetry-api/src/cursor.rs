use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::TelemetryError;
use crate::reading::{InstrumentKind, PartitionKey};
use crate::store::ScanPosition;

/// Current token layout. Tokens with another version byte are rejected.
pub const CURSOR_VERSION: u8 = 1;

const MAC_LEN: usize = 16;
const KEY_CONTEXT: &str = "apollo telemetry 2024-01-01 page cursor mac key";

// ════════════════════════════════════════════════════════════════
//  PageCursor
// ════════════════════════════════════════════════════════════════

/// Opaque continuation token handed to clients as `pagestate`.
///
/// Only `CursorCodec::encode` produces one. Clients echo it back verbatim.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageCursor(String);

impl PageCursor {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageCursor({})", self.0)
    }
}

impl fmt::Display for PageCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ════════════════════════════════════════════════════════════════
//  CursorCodec
// ════════════════════════════════════════════════════════════════

/// Mints and verifies page cursors.
///
/// Layout (big-endian), then base64url without padding:
///
/// ```text
/// u8 version | u8 kind | [16] journey | u16 len + name bytes
/// | i64 secs | u32 nanos | u64 seq | [16] mac
/// ```
///
/// The MAC is a truncated BLAKE3 keyed hash over everything before it.
/// Replicas configured with the same secret accept each other's tokens.
#[derive(Clone)]
pub struct CursorCodec {
    key: [u8; 32],
}

impl fmt::Debug for CursorCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CursorCodec").finish_non_exhaustive()
    }
}

impl CursorCodec {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: blake3::derive_key(KEY_CONTEXT, secret),
        }
    }

    pub fn encode(&self, kind: InstrumentKind, partition: &PartitionKey, position: &ScanPosition) -> PageCursor {
        let name = partition.spacecraft_name.as_bytes();
        // Names over MAX_SPACECRAFT_NAME_BYTES never reach a scan.
        let name_len = u16::try_from(name.len()).unwrap_or(u16::MAX);
        let name = &name[..name_len as usize];

        let mut buf = Vec::with_capacity(2 + 16 + 2 + name.len() + 8 + 4 + 8 + MAC_LEN);
        buf.push(CURSOR_VERSION);
        buf.push(kind.tag());
        buf.extend_from_slice(partition.journey_id.as_bytes());
        buf.extend_from_slice(&name_len.to_be_bytes());
        buf.extend_from_slice(name);
        buf.extend_from_slice(&position.timestamp.timestamp().to_be_bytes());
        buf.extend_from_slice(&position.timestamp.timestamp_subsec_nanos().to_be_bytes());
        buf.extend_from_slice(&position.seq.to_be_bytes());
        let mac = self.mac(&buf);
        buf.extend_from_slice(&mac);

        PageCursor(URL_SAFE_NO_PAD.encode(buf))
    }

    /// Verify `token` and return the position it resumes after.
    ///
    /// Fails with `InvalidCursor` for malformed, tampered, unknown-version
    /// or foreign (other partition / other instrument) tokens.
    pub fn decode(
        &self,
        token: &str,
        kind: InstrumentKind,
        partition: &PartitionKey,
    ) -> Result<ScanPosition, TelemetryError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| invalid("not a page state token"))?;

        match raw.first() {
            None => return Err(invalid("empty page state")),
            Some(&CURSOR_VERSION) => {}
            Some(v) => return Err(invalid(format!("unsupported page state version {v}"))),
        }
        if raw.len() < 1 + MAC_LEN {
            return Err(invalid("truncated page state"));
        }

        let (body, mac) = raw.split_at(raw.len() - MAC_LEN);
        if !constant_time_eq(&self.mac(body), mac) {
            return Err(invalid("page state failed integrity check"));
        }

        let mut r = ByteReader::new(&body[1..]);
        let tag = r.u8()?;
        let journey = r.take(16)?;
        let name_len = r.u16()? as usize;
        let name = r.take(name_len)?;
        let secs = r.i64()?;
        let nanos = r.u32()?;
        let seq = r.u64()?;
        if !r.is_empty() {
            return Err(invalid("trailing bytes in page state"));
        }

        let token_kind = InstrumentKind::from_tag(tag).ok_or_else(|| invalid("unknown instrument tag"))?;
        if token_kind != kind {
            return Err(invalid(format!(
                "page state was issued for {token_kind} readings, not {kind}"
            )));
        }
        if journey != partition.journey_id.as_bytes() || name != partition.spacecraft_name.as_bytes() {
            return Err(invalid("page state belongs to another spacecraft or journey"));
        }

        let timestamp = DateTime::from_timestamp(secs, nanos).ok_or_else(|| invalid("timestamp out of range"))?;
        Ok(ScanPosition { timestamp, seq })
    }

    fn mac(&self, body: &[u8]) -> [u8; MAC_LEN] {
        let hash = blake3::keyed_hash(&self.key, body);
        let mut out = [0u8; MAC_LEN];
        out.copy_from_slice(&hash.as_bytes()[..MAC_LEN]);
        out
    }
}

fn invalid(msg: impl Into<String>) -> TelemetryError {
    TelemetryError::InvalidCursor(msg.into())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ════════════════════════════════════════════════════════════════
//  ByteReader
// ════════════════════════════════════════════════════════════════

struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], TelemetryError> {
        if self.buf.len() < n {
            return Err(invalid("truncated page state"));
        }
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TelemetryError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, TelemetryError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, TelemetryError> {
        self.array().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> Result<u32, TelemetryError> {
        self.array().map(u32::from_be_bytes)
    }

    fn i64(&mut self) -> Result<i64, TelemetryError> {
        self.array().map(i64::from_be_bytes)
    }

    fn u64(&mut self) -> Result<u64, TelemetryError> {
        self.array().map(u64::from_be_bytes)
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn partition(name: &str) -> PartitionKey {
        PartitionKey::new(name, Uuid::parse_str("abb7c000-c310-11ac-8080-808080808080").unwrap())
    }

    fn position() -> ScanPosition {
        ScanPosition::new("2024-01-01T00:00:00.123456789Z".parse().unwrap(), 42)
    }

    #[test]
    fn decodes_what_it_encodes() {
        let codec = CursorCodec::new(b"secret");
        let p = partition("gemini3");
        let token = codec.encode(InstrumentKind::Pressure, &p, &position());

        let decoded = codec.decode(token.as_str(), InstrumentKind::Pressure, &p).unwrap();
        assert_eq!(decoded, position());
    }

    #[test]
    fn token_is_url_safe() {
        let codec = CursorCodec::new(b"secret");
        let token = codec.encode(InstrumentKind::Speed, &partition("gemini/3 ?&"), &position());
        assert!(
            token
                .as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn rejects_foreign_partition_and_kind() {
        let codec = CursorCodec::new(b"secret");
        let token = codec.encode(InstrumentKind::Temperature, &partition("gemini3"), &position());

        let other_name = codec.decode(token.as_str(), InstrumentKind::Temperature, &partition("Gemini3"));
        assert!(matches!(other_name, Err(TelemetryError::InvalidCursor(_))));

        let other_journey = PartitionKey::new("gemini3", Uuid::nil());
        let res = codec.decode(token.as_str(), InstrumentKind::Temperature, &other_journey);
        assert!(matches!(res, Err(TelemetryError::InvalidCursor(_))));

        let other_kind = codec.decode(token.as_str(), InstrumentKind::Location, &partition("gemini3"));
        assert!(matches!(other_kind, Err(TelemetryError::InvalidCursor(_))));
    }

    #[test]
    fn rejects_tokens_signed_with_another_secret() {
        let p = partition("gemini3");
        let token = CursorCodec::new(b"replica-a").encode(InstrumentKind::Speed, &p, &position());
        let res = CursorCodec::new(b"replica-b").decode(token.as_str(), InstrumentKind::Speed, &p);
        assert!(matches!(res, Err(TelemetryError::InvalidCursor(_))));
    }

    #[test]
    fn rejects_tampered_truncated_and_garbage_tokens() {
        let codec = CursorCodec::new(b"secret");
        let p = partition("gemini3");
        let token = codec.encode(InstrumentKind::Speed, &p, &position());

        let mut raw = URL_SAFE_NO_PAD.decode(token.as_str()).unwrap();
        let seq_offset = raw.len() - MAC_LEN - 1;
        raw[seq_offset] ^= 0x01;
        let tampered = URL_SAFE_NO_PAD.encode(&raw);
        assert!(codec.decode(&tampered, InstrumentKind::Speed, &p).is_err());

        let truncated = &token.as_str()[..token.as_str().len() / 2];
        assert!(codec.decode(truncated, InstrumentKind::Speed, &p).is_err());

        for garbage in ["", "!!!", "AAAA", "not a cursor"] {
            let res = codec.decode(garbage, InstrumentKind::Speed, &p);
            assert!(matches!(res, Err(TelemetryError::InvalidCursor(_))), "{garbage}");
        }
    }

    #[test]
    fn rejects_unknown_version() {
        let codec = CursorCodec::new(b"secret");
        let p = partition("gemini3");
        let token = codec.encode(InstrumentKind::Speed, &p, &position());

        let mut raw = URL_SAFE_NO_PAD.decode(token.as_str()).unwrap();
        raw[0] = 2;
        let err = codec
            .decode(&URL_SAFE_NO_PAD.encode(&raw), InstrumentKind::Speed, &p)
            .unwrap_err();
        assert!(err.to_string().contains("version"), "{err}");
    }
}
