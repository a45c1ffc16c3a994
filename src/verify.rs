//! Offline ledger verification.
//!
//! Walks a ledger in append order and checks, for every entry:
//! - `prev_hash` links to the previous entry (genesis for the first)
//! - `entry_hash` matches the recomputed payload hash
//! - the Ed25519 signature over `entry_hash`
//! - optionally, the SHA-256 of both evidence images on disk

use anyhow::{anyhow, Context, Result};
use ed25519_dalek::VerifyingKey;
use std::collections::BTreeMap;
use std::path::Path;

use crate::evidence::{open_ledger_file, LedgerEntry};
use crate::seal::{decode_signature, hash_entry, sha256_hex, verify_entry_signature, GENESIS_HASH};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerifyReport {
    pub entries: usize,
    pub violations_by_video: BTreeMap<String, usize>,
    pub images_checked: usize,
    /// Hex hash of the last entry.
    pub head: Option<String>,
}

pub fn parse_public_key_hex(value: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(value.trim()).map_err(|e| anyhow!("invalid public key hex: {}", e))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("public key must be 32 bytes, got {}", b.len()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| anyhow!("invalid public key: {}", e))
}

/// Opens the ledger at `path` (JSON or SQLite) and verifies it.
pub fn verify_ledger(
    path: &Path,
    verifying_key: &VerifyingKey,
    check_images: bool,
) -> Result<VerifyReport> {
    let ledger = open_ledger_file(path)?;
    let entries = ledger
        .entries()
        .with_context(|| format!("load ledger {}", path.display()))?;
    verify_entries(&entries, verifying_key, check_images)
}

pub fn verify_entries(
    entries: &[LedgerEntry],
    verifying_key: &VerifyingKey,
    check_images: bool,
) -> Result<VerifyReport> {
    let mut report = VerifyReport::default();
    let mut expected_prev = GENESIS_HASH;

    for (i, entry) in entries.iter().enumerate() {
        let label = format!("entry {} (track {})", i, entry.record.track_id);

        if entry.prev_hash != hex::encode(expected_prev) {
            return Err(anyhow!("{}: chain broken, prev_hash does not link", label));
        }
        let payload = entry.payload_json()?;
        let recomputed = hash_entry(&expected_prev, payload.as_bytes());
        let stored = entry
            .entry_hash_bytes()
            .with_context(|| format!("{}: entry_hash", label))?;
        if recomputed != stored {
            return Err(anyhow!("{}: entry_hash mismatch, payload was modified", label));
        }
        let signature = decode_signature(&entry.signature)
            .with_context(|| format!("{}: signature", label))?;
        verify_entry_signature(verifying_key, &stored, &signature)
            .with_context(|| format!("{}: signature verification failed", label))?;

        if check_images {
            check_image(&entry.record.crop_image, &entry.crop_sha256)
                .with_context(|| format!("{}: crop image", label))?;
            check_image(&entry.record.context_image, &entry.context_sha256)
                .with_context(|| format!("{}: context image", label))?;
            report.images_checked += 2;
        }

        *report
            .violations_by_video
            .entry(entry.record.video.clone())
            .or_default() += 1;
        expected_prev = stored;
    }

    report.entries = entries.len();
    report.head = entries.last().map(|e| e.entry_hash.clone());
    Ok(report)
}

fn check_image(path: &str, expected: &str) -> Result<()> {
    let bytes = std::fs::read(path).with_context(|| format!("read {}", path))?;
    if sha256_hex(&bytes) != expected {
        return Err(anyhow!("{} does not match its recorded digest", path));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::{sample_record, InMemoryLedger, Ledger, UnsealedEntry};
    use crate::seal::signing_key_from_seed;

    fn ledger(count: u64) -> Vec<LedgerEntry> {
        let key = signing_key_from_seed("devkey:test").unwrap();
        let mut ledger = InMemoryLedger::default();
        for id in 1..=count {
            ledger
                .append(
                    UnsealedEntry {
                        record: sample_record(id),
                        saved_at: "2026-10-19 08:15:01".to_string(),
                        crop_sha256: "aa".repeat(32),
                        context_sha256: "bb".repeat(32),
                    },
                    &key,
                )
                .unwrap();
        }
        ledger.entries().unwrap()
    }

    fn public_key() -> VerifyingKey {
        signing_key_from_seed("devkey:test").unwrap().verifying_key()
    }

    #[test]
    fn intact_chain_verifies() {
        let entries = ledger(3);
        let report = verify_entries(&entries, &public_key(), false).unwrap();
        assert_eq!(report.entries, 3);
        assert_eq!(report.violations_by_video["junction.mp4"], 3);
        assert_eq!(report.head.as_deref(), Some(entries[2].entry_hash.as_str()));
    }

    #[test]
    fn empty_ledger_verifies() {
        let report = verify_entries(&[], &public_key(), true).unwrap();
        assert_eq!(report.entries, 0);
        assert!(report.head.is_none());
    }

    #[test]
    fn edited_record_is_detected() {
        let mut entries = ledger(2);
        entries[0].record.license_plate = "99Z99999".to_string();
        let err = verify_entries(&entries, &public_key(), false).unwrap_err();
        assert!(format!("{:#}", err).contains("entry_hash mismatch"));
    }

    #[test]
    fn removed_entry_breaks_chain() {
        let mut entries = ledger(3);
        entries.remove(1);
        let err = verify_entries(&entries, &public_key(), false).unwrap_err();
        assert!(format!("{:#}", err).contains("chain broken"));
    }

    #[test]
    fn wrong_key_is_rejected() {
        let entries = ledger(1);
        let other = signing_key_from_seed("devkey:other").unwrap().verifying_key();
        assert!(verify_entries(&entries, &other, false).is_err());
    }

    #[test]
    fn public_key_hex_roundtrip() {
        let key = public_key();
        let parsed = parse_public_key_hex(&hex::encode(key.to_bytes())).unwrap();
        assert_eq!(parsed, key);
        assert!(parse_public_key_hex("abcd").is_err());
    }
}
