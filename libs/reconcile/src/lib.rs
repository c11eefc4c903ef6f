//! Reconciliation primitives.
//!
//! This library plans the merge of an externally observed inventory into a
//! domain model. Key concepts:
//!
//! - **Domain item**: what the control plane believes exists.
//! - **Scanned item**: what an agent actually observed.
//! - **Matching key**: a stable attribute present on both sides (a MAC
//!   address, a qualified export name).
//!
//! # Invariants
//!
//! - Planning is pure and deterministic given the same inputs
//! - A domain item without a key can never match and is reported lost
//! - Each scanned key is planned at most once; later duplicates are counted
//!   but never produce a second creation
//! - Nothing is ever planned for deletion; the caller decides what "lost" means

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Outcome of matching domain items against scanned items.
#[derive(Debug)]
pub struct MergePlan<'d, 's, D, S> {
    /// Domain items with no scanned counterpart.
    pub lost: Vec<&'d D>,
    /// Scanned items paired with the first domain item sharing their key.
    pub matched: Vec<(&'d D, &'s S)>,
    /// Scanned items with no domain counterpart.
    pub unmatched: Vec<&'s S>,
    /// Scanned items skipped because an earlier one had the same key.
    pub duplicates: usize,
}

impl<D, S> MergePlan<'_, '_, D, S> {
    /// True when the plan neither matches nor creates nor loses anything.
    pub fn is_empty(&self) -> bool {
        self.lost.is_empty() && self.matched.is_empty() && self.unmatched.is_empty()
    }
}

/// Plans a merge of `scanned` into `domain`.
///
/// Scanned items are visited in order. When several domain items share a key,
/// the first one wins the match and the others are neither matched nor lost.
pub fn plan_merge<'d, 's, D, S, K, FD, FS>(
    domain: &'d [D],
    scanned: impl IntoIterator<Item = &'s S>,
    domain_key: FD,
    scanned_key: FS,
) -> MergePlan<'d, 's, D, S>
where
    K: Eq + Hash,
    FD: Fn(&D) -> Option<K>,
    FS: Fn(&S) -> K,
{
    let mut by_key: HashMap<K, &'d D> = HashMap::new();
    let mut keyless = Vec::new();
    for item in domain {
        match domain_key(item) {
            Some(key) => {
                by_key.entry(key).or_insert(item);
            }
            None => keyless.push(item),
        }
    }

    let mut seen: HashSet<K> = HashSet::new();
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    let mut duplicates = 0;

    for item in scanned {
        let key = scanned_key(item);
        if seen.contains(&key) {
            duplicates += 1;
            continue;
        }
        match by_key.get(&key) {
            Some(domain_item) => matched.push((*domain_item, item)),
            None => unmatched.push(item),
        }
        seen.insert(key);
    }

    let mut lost = keyless;
    lost.extend(
        domain
            .iter()
            .filter(|item| domain_key(*item).is_some_and(|key| !seen.contains(&key))),
    );

    MergePlan {
        lost,
        matched,
        unmatched,
        duplicates,
    }
}

/// Counters describing one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Matched items whose state changed.
    pub updated: usize,
    /// Matched items whose state was already current.
    pub unchanged: usize,
    /// New domain items created from unmatched scanned items.
    pub created: usize,
    /// Domain items newly marked lost.
    pub lost: usize,
    /// Items left alone because they are locked by an in-flight job.
    pub skipped_locked: usize,
}

impl MergeStats {
    /// Adds another pass's counters to this one.
    pub fn absorb(&mut self, other: MergeStats) {
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.created += other.created;
        self.lost += other.lost;
        self.skipped_locked += other.skipped_locked;
    }

    /// True when the pass changed nothing.
    pub fn is_noop(&self) -> bool {
        self.updated == 0 && self.created == 0 && self.lost == 0
    }
}

impl fmt::Display for MergeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "updated={} unchanged={} created={} lost={} skipped_locked={}",
            self.updated, self.unchanged, self.created, self.lost, self.skipped_locked
        )
    }
}
