//! Duplicate detection.
//!
//! Everything here is pure: scoring and grouping read a `WorkingSet` and
//! return plans. `merge.rs` executes them.

use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::working_set::WorkingSet;
use crate::database::Recording;
use crate::error::ReconcileError;

/// Names that capture pipelines give recordings before anything meaningful is known
const BUILTIN_GENERIC_PATTERNS: &[&str] = &[
    r"^rec_\d{8}_\d{4,6}$",
    r"^\d{8}[_-]\d{4,6}$",
    r"^\d{4}-\d{2}-\d{2}([ T_]\d{2}[:.-]?\d{2}([:.-]?\d{2})?)?$",
    r"(?i)^(new )?recording( \d+)?$",
    r"(?i)^voice memo( \d+)?$",
    r"(?i)^(audio|memo|capture)[ _-]?\d+$",
    r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
];

static BUILTIN_GENERIC_REGEXES: Lazy<Vec<Regex>> = Lazy::new(|| {
    BUILTIN_GENERIC_PATTERNS
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
});

static MEDIA_EXTENSION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?i)\.(m4a|wav|mp3|caf|aac|mp4|ogg|flac|webm)$").ok());

/// Decides whether a display name is a placeholder rather than a title
#[derive(Debug, Clone, Default)]
pub struct GenericNameMatcher {
    extra: Vec<Regex>,
}

impl GenericNameMatcher {
    /// Built-in patterns plus configured ones. Invalid patterns are skipped.
    pub fn new(patterns: &[String]) -> Self {
        let extra = patterns
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(regex) => Some(regex),
                Err(e) => {
                    log::warn!("Ignoring invalid generic name pattern '{}': {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { extra }
    }

    pub fn is_generic(&self, name: &str) -> bool {
        let trimmed = name.trim();
        let stem = match MEDIA_EXTENSION.as_ref() {
            Some(ext) => ext.replace(trimmed, ""),
            None => trimmed.into(),
        };
        if stem.is_empty() {
            return true;
        }

        BUILTIN_GENERIC_REGEXES
            .iter()
            .chain(self.extra.iter())
            .any(|regex| regex.is_match(&stem))
    }
}

/// How complete a recording is; higher survives a merge
pub fn completeness_score(set: &WorkingSet, recording: &Recording) -> u32 {
    let mut score = 0;
    if set.owns_transcript(recording) {
        score += 2;
    }
    if set.owns_summary(recording) {
        score += 2;
    }
    if recording.duration > 0.0 {
        score += 1;
    }
    if recording.file_size > 0 {
        score += 1;
    }
    if recording.location.is_some() {
        score += 1;
    }
    score
}

/// Recordings that share a name or a resolved media file, with the one to keep
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DuplicateGroup {
    pub survivor: String,
    /// Remaining members in id order
    pub losers: Vec<String>,
    /// Set when the survivor was picked by id alone
    pub ambiguity: Option<ReconcileError>,
}

/// A generic-named recording without content and the titled recording it duplicates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrossIdentityPair {
    pub generic: String,
    pub titled: String,
}

/// Pick the survivor among ids: highest score, then latest last_modified, then smallest id
pub fn choose_survivor(set: &WorkingSet, ids: &[String]) -> Option<(String, Option<ReconcileError>)> {
    let mut ranked: Vec<(&Recording, u32)> = ids
        .iter()
        .filter_map(|id| set.recordings.get(id))
        .map(|r| (r, completeness_score(set, r)))
        .collect();

    ranked.sort_by(|(a, a_score), (b, b_score)| {
        b_score
            .cmp(a_score)
            .then_with(|| b.last_modified.cmp(&a.last_modified))
            .then_with(|| a.id.cmp(&b.id))
    });

    let (survivor, survivor_score) = ranked.first()?;
    let tied: Vec<String> = ranked
        .iter()
        .filter(|(r, score)| score == survivor_score && r.last_modified == survivor.last_modified)
        .map(|(r, _)| r.id.clone())
        .collect();

    let ambiguity = (tied.len() > 1).then(|| ReconcileError::AmbiguousDuplicate {
        survivor: survivor.id.clone(),
        candidates: tied,
    });
    Some((survivor.id.clone(), ambiguity))
}

/// Group recordings by trimmed display name and by resolved media file name.
/// Both keys are unioned, so A~B by name and B~C by file puts A, B, C together.
/// Generic names are capture placeholders, not identities, and never form a name key.
pub fn exact_key_groups(set: &WorkingSet, matcher: &GenericNameMatcher) -> Vec<DuplicateGroup> {
    let ids: Vec<&String> = set.recordings.keys().collect();
    let mut parent: Vec<usize> = (0..ids.len()).collect();
    let mut first_by_key: BTreeMap<String, usize> = BTreeMap::new();

    for (index, id) in ids.iter().enumerate() {
        let recording = &set.recordings[*id];
        let mut keys = Vec::with_capacity(2);

        let name = recording.name.trim();
        if !name.is_empty() && !matcher.is_generic(name) {
            keys.push(format!("name:{}", name));
        }
        if let Some(file_name) = set.media_status(id).resolved_file_name() {
            keys.push(format!("file:{}", file_name));
        }

        for key in keys {
            match first_by_key.get(&key) {
                Some(&other) => union(&mut parent, index, other),
                None => {
                    first_by_key.insert(key, index);
                }
            }
        }
    }

    let mut members: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    for index in 0..ids.len() {
        let root = find(&mut parent, index);
        members.entry(root).or_default().push(ids[index].clone());
    }

    members
        .into_values()
        .filter(|group| group.len() > 1)
        .filter_map(|group| {
            let (survivor, ambiguity) = choose_survivor(set, &group)?;
            let losers = group.into_iter().filter(|id| *id != survivor).collect();
            Some(DuplicateGroup { survivor, losers, ambiguity })
        })
        .collect()
}

fn find(parent: &mut [usize], mut index: usize) -> usize {
    while parent[index] != index {
        parent[index] = parent[parent[index]];
        index = parent[index];
    }
    index
}

fn union(parent: &mut [usize], a: usize, b: usize) {
    let (root_a, root_b) = (find(parent, a), find(parent, b));
    if root_a != root_b {
        let (low, high) = if root_a < root_b { (root_a, root_b) } else { (root_b, root_a) };
        parent[high] = low;
    }
}

/// Pair each content-less generic recording with the closest titled recording that
/// has content, captured within `window` or at the same position.
pub fn cross_identity_pairs(
    set: &WorkingSet,
    matcher: &GenericNameMatcher,
    window: Duration,
) -> Vec<CrossIdentityPair> {
    let titled: Vec<&Recording> = set
        .recordings
        .values()
        .filter(|r| !matcher.is_generic(&r.name) && set.owns_content(r))
        .collect();
    if titled.is_empty() {
        return Vec::new();
    }

    set.recordings
        .values()
        .filter(|r| matcher.is_generic(&r.name) && !set.owns_content(r))
        .filter_map(|generic| {
            titled
                .iter()
                .filter(|candidate| {
                    let within_window = (candidate.recorded_at - generic.recorded_at).abs() <= window;
                    let same_place = match (&generic.location, &candidate.location) {
                        (Some(a), Some(b)) => a.same_position(b),
                        _ => false,
                    };
                    within_window || same_place
                })
                .min_by(|a, b| {
                    let gap_a = (a.recorded_at - generic.recorded_at).abs();
                    let gap_b = (b.recorded_at - generic.recorded_at).abs();
                    gap_a.cmp(&gap_b).then_with(|| a.id.cmp(&b.id))
                })
                .map(|candidate| CrossIdentityPair {
                    generic: generic.id.clone(),
                    titled: candidate.id.clone(),
                })
        })
        .collect()
}
