//! Violation evidence: records, the sealed ledger, and the writer that
//! persists images and appends ledger entries.

use anyhow::Result;
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};

use crate::pipeline::TrackId;
use crate::seal::{decode_hash32, hash_entry, sign_entry};

pub mod ledger;
pub mod writer;

pub use ledger::{
    open_ledger, open_ledger_file, InMemoryLedger, JsonLedger, Ledger, LedgerBackend,
    SharedLedger, SqliteLedger,
};
pub use writer::{EvidenceWriter, ViolationEvent};

/// Timestamp format of `ViolationRecord::timestamp`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// Timestamp format of `LedgerEntry::saved_at`.
pub const SAVED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One red-light violation. Immutable once written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub video: String,
    pub track_id: TrackId,
    pub vehicle_type: String,
    pub license_plate: String,
    /// Province code of a format-valid plate.
    pub region: Option<String>,
    pub timestamp: String,
    pub crop_image: String,
    pub context_image: String,
}

/// A ledger row: the record plus save time and integrity fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(flatten)]
    pub record: ViolationRecord,
    pub saved_at: String,
    pub crop_sha256: String,
    pub context_sha256: String,
    pub prev_hash: String,
    pub entry_hash: String,
    pub signature: String,
}

/// Hashed portion of an entry, serialized in field order.
#[derive(Serialize)]
struct EntryPayload<'a> {
    #[serde(flatten)]
    record: &'a ViolationRecord,
    saved_at: &'a str,
    crop_sha256: &'a str,
    context_sha256: &'a str,
}

/// Record plus image digests, not yet chained.
#[derive(Clone, Debug)]
pub struct UnsealedEntry {
    pub record: ViolationRecord,
    pub saved_at: String,
    pub crop_sha256: String,
    pub context_sha256: String,
}

impl UnsealedEntry {
    fn payload_json(&self) -> Result<String> {
        payload_json(
            &self.record,
            &self.saved_at,
            &self.crop_sha256,
            &self.context_sha256,
        )
    }

    /// Chains this entry after `prev_hash` and signs it.
    pub fn seal(self, prev_hash: &[u8; 32], signing_key: &SigningKey) -> Result<LedgerEntry> {
        let payload = self.payload_json()?;
        let entry_hash = hash_entry(prev_hash, payload.as_bytes());
        let signature = sign_entry(signing_key, &entry_hash);
        Ok(LedgerEntry {
            record: self.record,
            saved_at: self.saved_at,
            crop_sha256: self.crop_sha256,
            context_sha256: self.context_sha256,
            prev_hash: hex::encode(prev_hash),
            entry_hash: hex::encode(entry_hash),
            signature: hex::encode(signature),
        })
    }
}

impl LedgerEntry {
    /// Bytes covered by `entry_hash`.
    pub fn payload_json(&self) -> Result<String> {
        payload_json(
            &self.record,
            &self.saved_at,
            &self.crop_sha256,
            &self.context_sha256,
        )
    }

    pub fn entry_hash_bytes(&self) -> Result<[u8; 32]> {
        decode_hash32(&self.entry_hash)
    }
}

fn payload_json(
    record: &ViolationRecord,
    saved_at: &str,
    crop_sha256: &str,
    context_sha256: &str,
) -> Result<String> {
    Ok(serde_json::to_string(&EntryPayload {
        record,
        saved_at,
        crop_sha256,
        context_sha256,
    })?)
}

#[cfg(test)]
pub(crate) fn sample_record(track_id: TrackId) -> ViolationRecord {
    ViolationRecord {
        video: "junction.mp4".to_string(),
        track_id,
        vehicle_type: "car".to_string(),
        license_plate: "30A12345".to_string(),
        region: Some("30".to_string()),
        timestamp: "2026-10-19T08:15:00".to_string(),
        crop_image: format!("output/violations/junction/{}_081500_crop.jpg", track_id),
        context_image: format!("output/violations/junction/{}_081500_context.jpg", track_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seal::{signing_key_from_seed, GENESIS_HASH};

    fn unsealed(track_id: TrackId) -> UnsealedEntry {
        UnsealedEntry {
            record: sample_record(track_id),
            saved_at: "2026-10-19 08:15:01".to_string(),
            crop_sha256: "aa".repeat(32),
            context_sha256: "bb".repeat(32),
        }
    }

    #[test]
    fn entry_json_is_flat() {
        let key = signing_key_from_seed("devkey:test").unwrap();
        let entry = unsealed(4).seal(&GENESIS_HASH, &key).unwrap();
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["track_id"], 4);
        assert_eq!(value["license_plate"], "30A12345");
        assert_eq!(value["prev_hash"], "00".repeat(32));

        let back: LedgerEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn sealed_hash_covers_payload() {
        let key = signing_key_from_seed("devkey:test").unwrap();
        let entry = unsealed(1).seal(&GENESIS_HASH, &key).unwrap();
        let expected = hash_entry(&GENESIS_HASH, entry.payload_json().unwrap().as_bytes());
        assert_eq!(entry.entry_hash_bytes().unwrap(), expected);

        let mut tampered = entry.clone();
        tampered.record.license_plate = "99Z99999".to_string();
        let recomputed = hash_entry(&GENESIS_HASH, tampered.payload_json().unwrap().as_bytes());
        assert_ne!(recomputed, expected);
    }
}
