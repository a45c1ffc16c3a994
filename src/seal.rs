use anyhow::{anyhow, Result};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

/// Chain head used before the first ledger entry.
pub const GENESIS_HASH: [u8; 32] = [0u8; 32];

/// Hashes a ledger entry payload with the previous chain hash.
pub fn hash_entry(prev_hash: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash);
    hasher.update(payload);
    hasher.finalize().into()
}

/// Signs a ledger entry hash using Ed25519.
pub fn sign_entry(signing_key: &SigningKey, entry_hash: &[u8; 32]) -> [u8; 64] {
    signing_key.sign(entry_hash).to_bytes()
}

/// Verifies a ledger entry signature against its entry hash.
pub fn verify_entry_signature(
    verifying_key: &VerifyingKey,
    entry_hash: &[u8; 32],
    signature: &[u8; 64],
) -> Result<()> {
    let sig = ed25519_dalek::Signature::from_bytes(signature);
    verifying_key
        .verify(entry_hash, &sig)
        .map_err(|e| anyhow!("signature verification failed: {}", e))
}

/// Derives the device signing key from a seed string (SHA-256 of the trimmed seed).
pub fn signing_key_from_seed(seed: &str) -> Result<SigningKey> {
    let trimmed = seed.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("device_key_seed is required"));
    }
    let digest: [u8; 32] = Sha256::digest(trimmed.as_bytes()).into();
    Ok(SigningKey::from_bytes(&digest))
}

/// SHA-256 digest of a byte slice, hex encoded.
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn decode_hash32(value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value.trim()).map_err(|e| anyhow!("invalid hex hash: {}", e))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| anyhow!("invalid hash length: expected 32 bytes, got {}", b.len()))
}

pub fn decode_signature(value: &str) -> Result<[u8; 64]> {
    let bytes = hex::decode(value.trim()).map_err(|e| anyhow!("invalid hex signature: {}", e))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        anyhow!(
            "invalid signature length: expected 64 bytes, got {}",
            b.len()
        )
    })
}
