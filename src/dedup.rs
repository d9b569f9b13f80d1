//! In-run deduplication by content fingerprint
//!
//! The first candidate seen with a fingerprint is kept; later ones are
//! dropped with a reference to it. Callers admit candidates in enumeration
//! order so the outcome is deterministic.

use crate::candidate::Candidate;
use crate::fingerprint::Fingerprint;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Default)]
pub struct DedupIndex {
    seen: HashMap<Fingerprint, String>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a fingerprinted candidate
    ///
    /// Returns the identifier of the earlier candidate with identical content
    /// if there is one, otherwise records this candidate and returns `None`.
    pub fn admit(&mut self, fingerprint: &Fingerprint, candidate: &Candidate) -> Option<String> {
        if let Some(original) = self.seen.get(fingerprint) {
            debug!(
                "Skipping {} with fingerprint {}: duplicate of {}",
                candidate.identifier(),
                fingerprint.short(),
                original
            );
            return Some(original.clone());
        }
        self.seen
            .insert(fingerprint.clone(), candidate.identifier());
        None
    }

    /// Distinct fingerprints admitted so far
    pub fn admitted(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ChangeKind, ChangeRecord};
    use proptest::prelude::*;

    fn candidate(source: &str, path: &str) -> Candidate {
        Candidate::new(ChangeRecord::new(source, path, ChangeKind::Added))
    }

    #[test]
    fn test_first_occurrence_wins() {
        let mut index = DedupIndex::new();
        let fp = Fingerprint::of_bytes(b"shared");

        assert_eq!(index.admit(&fp, &candidate("aaa", "/etc/app.conf")), None);
        assert_eq!(
            index.admit(&fp, &candidate("bbb", "/etc/app.conf")),
            Some("aaa:/etc/app.conf".to_string())
        );
        assert_eq!(
            index.admit(&fp, &candidate("ccc", "/etc/app.conf")),
            Some("aaa:/etc/app.conf".to_string())
        );
        assert_eq!(index.admitted(), 1);
    }

    #[test]
    fn test_distinct_content_kept() {
        let mut index = DedupIndex::new();
        assert!(index
            .admit(&Fingerprint::of_bytes(b"a"), &candidate("c1", "/x"))
            .is_none());
        assert!(index
            .admit(&Fingerprint::of_bytes(b"b"), &candidate("c1", "/x"))
            .is_none());
        assert_eq!(index.admitted(), 2);
    }

    proptest! {
        /// Exactly one candidate per distinct content survives
        #[test]
        fn prop_one_survivor_per_content(contents in prop::collection::vec(0u8..6, 0..40)) {
            let mut index = DedupIndex::new();
            let mut admitted = 0usize;
            for (i, byte) in contents.iter().enumerate() {
                let fp = Fingerprint::of_bytes(&[*byte]);
                let c = candidate("src", &format!("/f{}", i));
                if index.admit(&fp, &c).is_none() {
                    admitted += 1;
                }
            }
            let distinct: std::collections::HashSet<u8> = contents.iter().copied().collect();
            prop_assert_eq!(admitted, distinct.len());
            prop_assert_eq!(index.admitted(), distinct.len());
        }

        /// The survivor is always the first occurrence
        #[test]
        fn prop_survivor_is_first(contents in prop::collection::vec(0u8..4, 1..30)) {
            let mut index = DedupIndex::new();
            for (i, byte) in contents.iter().enumerate() {
                index.admit(&Fingerprint::of_bytes(&[*byte]), &candidate("src", &format!("/f{}", i)));
            }
            for byte in contents.iter() {
                let first = contents.iter().position(|b| b == byte).unwrap();
                let expected = format!("src:/f{}", first);
                let late = candidate("late", "/again");
                prop_assert_eq!(
                    index.admit(&Fingerprint::of_bytes(&[*byte]), &late),
                    Some(expected)
                );
            }
        }
    }
}
