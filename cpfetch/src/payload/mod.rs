//! Recovery of the binary payload from collected session text.

mod decode;
mod extract;

pub use decode::{decode, decode_and_persist, persist};
pub use extract::{MIN_CANDIDATE_LEN, Payload, extract_candidates, is_candidate};

use crate::error::{PayloadError, Result};

/// Characters of raw output kept as a sample when nothing was found.
const SAMPLE_CHARS: usize = 2000;

/// Extract the payload, failing with [`PayloadError::NoPayloadFound`] when
/// no line qualifies. The error carries the head of the raw output.
pub fn require_payload(raw: &str) -> Result<Payload<'_>> {
    let payload = extract_candidates(raw);
    if payload.is_empty() {
        return Err(PayloadError::NoPayloadFound {
            raw_len: raw.len(),
            sample: raw.chars().take(SAMPLE_CHARS).collect(),
        }
        .into());
    }
    Ok(payload)
}
