use anyhow::{anyhow, Result};
use regex::Regex;

use crate::detect::UNKNOWN_PLATE;
use crate::pipeline::tracker::PlateVote;

/// Sums within this distance are treated as tied.
const TIE_EPSILON: f32 = 1e-6;

/// Canonical plate text: uppercase, alphanumerics only, with the usual OCR
/// look-alikes folded to digits (O,Q→0, I→1, S→5, Z→2).
pub fn normalize_plate(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| match c.to_ascii_uppercase() {
            'O' | 'Q' => '0',
            'I' => '1',
            'S' => '5',
            'Z' => '2',
            other => other,
        })
        .collect()
}

/// Overlay form of a plate: `30A12345` renders as `30A-12345`.
///
/// The series is the two-digit province code, one letter, and an optional
/// second letter. Anything that does not look like that is returned as is.
pub fn display_plate(plate: &str) -> String {
    let chars: Vec<char> = plate.chars().collect();
    if chars.len() < 6
        || !chars[0].is_ascii_digit()
        || !chars[1].is_ascii_digit()
        || !chars[2].is_ascii_uppercase()
    {
        return plate.to_string();
    }
    let split = if chars[3].is_ascii_uppercase() { 4 } else { 3 };
    let (series, number): (String, String) = (
        chars[..split].iter().collect(),
        chars[split..].iter().collect(),
    );
    format!("{}-{}", series, number)
}

struct Candidate {
    text: String,
    total: f32,
    best_single: f32,
}

/// Resolves noisy per-frame plate reads into one plate per track.
#[derive(Debug, Clone)]
pub struct PlateArbiter {
    format: Regex,
}

impl PlateArbiter {
    pub fn new(format: &str) -> Result<Self> {
        let format =
            Regex::new(format).map_err(|e| anyhow!("invalid plate format regex: {}", e))?;
        Ok(Self { format })
    }

    pub fn is_valid(&self, plate: &str) -> bool {
        self.format.is_match(plate)
    }

    /// Province code (first two digits) of a format-valid plate.
    pub fn region(&self, plate: &str) -> Option<String> {
        if !self.is_valid(plate) {
            return None;
        }
        let code: String = plate.chars().take(2).collect();
        (code.len() == 2 && code.chars().all(|c| c.is_ascii_digit())).then_some(code)
    }

    /// Picks the plate with the highest summed confidence over normalized
    /// votes.
    ///
    /// Ties prefer format-valid candidates, then the highest single read,
    /// then the earliest seen. No usable votes gives `"unknown"`.
    pub fn resolve(&self, votes: &[PlateVote]) -> String {
        let mut candidates: Vec<Candidate> = Vec::new();
        for vote in votes {
            let text = normalize_plate(&vote.text);
            if text.is_empty() || text.eq_ignore_ascii_case(UNKNOWN_PLATE) {
                continue;
            }
            match candidates.iter_mut().find(|c| c.text == text) {
                Some(c) => {
                    c.total += vote.confidence;
                    c.best_single = c.best_single.max(vote.confidence);
                }
                None => candidates.push(Candidate {
                    text,
                    total: vote.confidence,
                    best_single: vote.confidence,
                }),
            }
        }

        let Some(top) = candidates
            .iter()
            .map(|c| c.total)
            .max_by(|a, b| a.total_cmp(b))
        else {
            return UNKNOWN_PLATE.to_string();
        };

        let tied: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| top - c.total <= TIE_EPSILON)
            .collect();
        let valid: Vec<&Candidate> = tied
            .iter()
            .copied()
            .filter(|c| self.is_valid(&c.text))
            .collect();
        let pool = if valid.is_empty() { tied } else { valid };

        let mut winner = pool[0];
        for candidate in pool.iter().skip(1).copied() {
            if candidate.best_single > winner.best_single {
                winner = candidate;
            }
        }
        winner.text.clone()
    }
}
