//! Single-use backup codes for the second factor.
//!
//! Codes are `XXXX-XXXX` over an alphabet without lookalike characters,
//! hashed with the same Argon2id parameters as passwords. Only the hashes
//! are persisted; a consumed code is removed from the stored set.

use anyhow::{Result, anyhow};
use rand::{RngCore, rngs::OsRng};

use crate::password;

pub const DEFAULT_BACKUP_CODE_COUNT: usize = 10;

const CODE_LEN: usize = 8;
const GROUP_SIZE: usize = 4;
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A freshly issued batch: plaintext for the user, hashes for storage.
#[derive(Debug)]
pub struct BackupCodeSet {
    pub codes: Vec<String>,
    pub hashes: Vec<String>,
}

/// Issue `n` backup codes.
///
/// # Errors
/// Returns an error when randomness or hashing fails.
pub fn issue(n: usize) -> Result<BackupCodeSet> {
    let mut codes = Vec::with_capacity(n);
    let mut hashes = Vec::with_capacity(n);
    for _ in 0..n {
        let code = generate_code()?;
        let hash = password::hash(&normalize(&code)?)?;
        codes.push(code);
        hashes.push(hash);
    }
    Ok(BackupCodeSet { codes, hashes })
}

/// Whether any stored hash matches the presented code.
///
/// Returns the index of the match so consumption can remove exactly that
/// entry. Malformed stored hashes are skipped rather than fatal.
#[must_use]
pub fn verify(hashes: &[String], code: &str) -> Option<usize> {
    let normalized = normalize(code).ok()?;
    hashes
        .iter()
        .position(|hash| password::verify(&normalized, hash).unwrap_or(false))
}

/// Consume a code: on a match, return the stored set minus that entry.
#[must_use]
pub fn consume(hashes: &[String], code: &str) -> Option<Vec<String>> {
    let index = verify(hashes, code)?;
    let mut remaining = hashes.to_vec();
    remaining.remove(index);
    Some(remaining)
}

/// Strip separators and uppercase; reject anything that is not a code.
fn normalize(input: &str) -> Result<String> {
    let normalized: String = input
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|ch| ch.to_ascii_uppercase())
        .collect();
    if normalized.len() != CODE_LEN {
        return Err(anyhow!("invalid backup code length"));
    }
    if !normalized.bytes().all(|b| ALPHABET.contains(&b)) {
        return Err(anyhow!("invalid backup code characters"));
    }
    Ok(normalized)
}

fn generate_code() -> Result<String> {
    let mut raw = [0u8; CODE_LEN];
    OsRng
        .try_fill_bytes(&mut raw)
        .map_err(|err| anyhow!("failed to generate backup code: {err}"))?;
    let mut out = String::with_capacity(CODE_LEN + 1);
    for (idx, byte) in raw.iter().enumerate() {
        if idx > 0 && idx % GROUP_SIZE == 0 {
            out.push('-');
        }
        out.push(ALPHABET[usize::from(*byte) % ALPHABET.len()] as char);
    }
    Ok(out)
}
