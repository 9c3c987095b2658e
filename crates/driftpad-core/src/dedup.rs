//! Duplicate detection for notes.
//!
//! Before a record is created on either side, these rules decide whether an
//! equivalent record already exists. Matching runs in strict priority order
//! and short-circuits on the first hit:
//!
//! 1. identity — the candidate already carries a cloud id that resolves;
//! 2. exact — same owner and title, byte-equal content after trimming;
//! 3. temporal proximity — same owner and title, modification timestamps
//!    within a small tolerance window (catches retried submissions of the
//!    same logical edit);
//! 4. fuzzy — normalized Levenshtein similarity above a high threshold,
//!    restricted to substantial bodies and pre-filtered by a content prefix
//!    range to bound cost.
//!
//! No rule matching means the record is treated as genuinely new. False
//! negatives are acceptable; a false positive would merge unrelated notes,
//! which is the failure mode this ordering minimizes.

use crate::models::Note;
use crate::remote::{FetchSource, NoteDoc, NoteQuery, RemoteResult, RemoteStore};

/// Tolerance window for the temporal-proximity rule (ms).
pub const TEMPORAL_TOLERANCE_MS: i64 = 1000;

/// Minimum body length (chars) before the fuzzy rule applies.
pub const FUZZY_MIN_BODY_CHARS: usize = 50;

/// Length of the content prefix used to narrow fuzzy candidates.
pub const FUZZY_PREFIX_CHARS: usize = 20;

/// Similarity threshold for the fuzzy rule, exclusive.
pub const FUZZY_SIMILARITY_THRESHOLD: f64 = 0.9;

/// Resolves whether a local note already has an equivalent remote document.
pub struct DuplicateResolver<'a, R: RemoteStore> {
    remote: &'a R,
}

impl<'a, R: RemoteStore> DuplicateResolver<'a, R> {
    pub const fn new(remote: &'a R) -> Self {
        Self { remote }
    }

    /// Find the remote document id an upload of `candidate` should target,
    /// or `None` when the note is genuinely new to the remote store.
    pub async fn resolve(&self, candidate: &Note, owner_id: &str) -> RemoteResult<Option<String>> {
        // Rule 1: identity. A recorded cloud id that still resolves is
        // authoritative.
        if let Some(cloud_id) = candidate.cloud_id.as_deref().filter(|id| !id.is_empty()) {
            if self.remote.get_note(cloud_id).await?.is_some() {
                return Ok(Some(cloud_id.to_string()));
            }
        }

        // Rules 2 and 3 share one title query.
        if !candidate.title.trim().is_empty() {
            let title_matches = self
                .remote
                .query_notes(
                    &NoteQuery::for_owner(owner_id).with_title(candidate.title.clone()),
                    FetchSource::Server,
                )
                .await?;

            let wanted = candidate.trimmed_body();
            for remote_note in &title_matches {
                if remote_note.doc.content_text().trim() == wanted {
                    tracing::debug!(doc_id = %remote_note.doc_id, "Exact duplicate match");
                    return Ok(Some(remote_note.doc_id.clone()));
                }
            }

            for remote_note in &title_matches {
                let delta = remote_note.doc.modified_ms() - candidate.modified_at;
                if delta.abs() <= TEMPORAL_TOLERANCE_MS {
                    tracing::debug!(doc_id = %remote_note.doc_id, "Temporal-proximity match");
                    return Ok(Some(remote_note.doc_id.clone()));
                }
            }
        }

        // Rule 4: fuzzy, only for substantial bodies.
        if candidate.body.chars().count() > FUZZY_MIN_BODY_CHARS {
            let prefix: String = candidate.body.chars().take(FUZZY_PREFIX_CHARS).collect();
            let prefix_matches = self
                .remote
                .query_notes(
                    &NoteQuery::for_owner(owner_id).with_content_prefix(prefix),
                    FetchSource::Server,
                )
                .await?;

            for remote_note in &prefix_matches {
                let score = similarity_ratio(&candidate.body, remote_note.doc.content_text());
                if score > FUZZY_SIMILARITY_THRESHOLD {
                    tracing::debug!(doc_id = %remote_note.doc_id, score, "Fuzzy duplicate match");
                    return Ok(Some(remote_note.doc_id.clone()));
                }
            }
        }

        Ok(None)
    }
}

/// Apply the exact/temporal/fuzzy rules against local candidates, for the
/// merge direction: an incoming remote document that is not linked yet may
/// still correspond to an existing local note. Returns the local id.
#[must_use]
pub fn find_local_match(candidates: &[Note], doc: &NoteDoc) -> Option<i64> {
    let title = doc.title_text();
    let content = doc.content_text();

    if !title.trim().is_empty() {
        // Exact: title plus trimmed content.
        for note in candidates {
            if note.title == title && note.trimmed_body() == content.trim() {
                return note.id;
            }
        }

        // Temporal proximity among title matches.
        for note in candidates {
            if note.title == title
                && (doc.modified_ms() - note.modified_at).abs() <= TEMPORAL_TOLERANCE_MS
            {
                return note.id;
            }
        }
    }

    // Fuzzy, with the same prefix pre-filter the remote query uses.
    if content.chars().count() > FUZZY_MIN_BODY_CHARS {
        let prefix: String = content.chars().take(FUZZY_PREFIX_CHARS).collect();
        for note in candidates {
            if !note.body.starts_with(&prefix) {
                continue;
            }
            if similarity_ratio(content, &note.body) > FUZZY_SIMILARITY_THRESHOLD {
                return note.id;
            }
        }
    }

    None
}

/// Levenshtein edit distance between two strings, over chars.
#[must_use]
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();
    if a_len == 0 {
        return b_len;
    }
    if b_len == 0 {
        return a_len;
    }

    let mut prev = (0..=b_len).collect::<Vec<_>>();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = usize::from(a_chars[i - 1] != b_chars[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Normalized similarity: `(max_len - edit_distance) / max_len`.
///
/// Two empty strings are identical (1.0).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein_distance(a, b);
    (max_len - distance) as f64 / max_len as f64
}
