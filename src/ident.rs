//! External identifier allocation.
//!
//! Every on-ledger action carries a client-chosen external identifier that
//! the contracts require to be globally unique and never reused. Candidates
//! are `<kind prefix>_<random suffix>`; on a duplicate rejection the
//! orchestrator simply asks for a fresh candidate rather than probing the
//! ledger for availability.

use parking_lot::Mutex;
use thiserror::Error;

use crate::types::{ActionKind, ExternalId, MAX_EXTERNAL_ID_LEN};

/// Base58 character set. Excludes 0/O and I/l so identifiers survive
/// being read back over support channels.
const SUFFIX_ALPHABET: &[u8] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

pub const DEFAULT_SUFFIX_LEN: usize = 16;

#[derive(Debug, Error)]
pub enum IdentError {
    #[error("suffix length must be at least 1")]
    SuffixEmpty,
    #[error("prefix {prefix:?} plus a {suffix_len}-byte suffix exceeds {MAX_EXTERNAL_ID_LEN} bytes")]
    SuffixTooLong { prefix: &'static str, suffix_len: usize },
}

/// Random identifier generator with a per-allocator RNG.
///
/// Generation is pure: the allocator never checks the ledger, collision
/// handling belongs to the retry loop around submission.
pub struct IdentifierAllocator {
    suffix_len: usize,
    rng: Mutex<fastrand::Rng>,
}

impl IdentifierAllocator {
    /// Build an allocator, rejecting suffix lengths that could push any
    /// action kind's identifier past the on-ledger length bound.
    pub fn new(suffix_len: usize) -> Result<Self, IdentError> {
        if suffix_len == 0 {
            return Err(IdentError::SuffixEmpty);
        }
        for kind in ActionKind::ALL {
            let prefix = kind.id_prefix();
            if prefix.len() + 1 + suffix_len > MAX_EXTERNAL_ID_LEN {
                return Err(IdentError::SuffixTooLong { prefix, suffix_len });
            }
        }
        Ok(Self {
            suffix_len,
            rng: Mutex::new(fastrand::Rng::new()),
        })
    }

    /// Deterministic allocator for tests and replay tooling.
    pub fn with_seed(suffix_len: usize, seed: u64) -> Result<Self, IdentError> {
        let allocator = Self::new(suffix_len)?;
        *allocator.rng.lock() = fastrand::Rng::with_seed(seed);
        Ok(allocator)
    }

    pub fn suffix_len(&self) -> usize {
        self.suffix_len
    }

    /// Produce a fresh candidate identifier for `kind`.
    pub fn allocate(&self, kind: ActionKind) -> ExternalId {
        let prefix = kind.id_prefix();
        let mut out = String::with_capacity(prefix.len() + 1 + self.suffix_len);
        out.push_str(prefix);
        out.push('_');
        let mut rng = self.rng.lock();
        for _ in 0..self.suffix_len {
            let idx = rng.usize(..SUFFIX_ALPHABET.len());
            out.push(SUFFIX_ALPHABET[idx] as char);
        }
        ExternalId::from_validated(out)
    }
}

impl Default for IdentifierAllocator {
    fn default() -> Self {
        // DEFAULT_SUFFIX_LEN fits every prefix, so construction cannot fail.
        Self {
            suffix_len: DEFAULT_SUFFIX_LEN,
            rng: Mutex::new(fastrand::Rng::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_allocate_shape_for_every_kind() {
        let allocator = IdentifierAllocator::default();
        for kind in ActionKind::ALL {
            let id = allocator.allocate(kind);
            let expected_prefix = format!("{}_", kind.id_prefix());
            assert!(id.as_str().starts_with(&expected_prefix), "id {id} for {kind:?}");
            assert_eq!(id.len(), expected_prefix.len() + DEFAULT_SUFFIX_LEN);
            assert!(id.len() <= MAX_EXTERNAL_ID_LEN);
        }
    }

    #[test]
    fn test_suffix_stays_in_alphabet() {
        let allocator = IdentifierAllocator::with_seed(24, 7).unwrap();
        let id = allocator.allocate(ActionKind::Purchase);
        let suffix = id.as_str().split_once('_').unwrap().1;
        assert!(suffix.bytes().all(|b| SUFFIX_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_rejects_oversized_suffix() {
        // "loan" is the longest prefix: 4 + 1 + 27 == 32 is the ceiling.
        assert!(IdentifierAllocator::new(27).is_ok());
        assert!(matches!(
            IdentifierAllocator::new(28),
            Err(IdentError::SuffixTooLong { prefix: "loan", .. })
        ));
        assert!(matches!(
            IdentifierAllocator::new(0),
            Err(IdentError::SuffixEmpty)
        ));
    }

    #[test]
    fn test_seeded_allocators_agree() {
        let a = IdentifierAllocator::with_seed(12, 99).unwrap();
        let b = IdentifierAllocator::with_seed(12, 99).unwrap();
        for _ in 0..8 {
            assert_eq!(
                a.allocate(ActionKind::List).as_str(),
                b.allocate(ActionKind::List).as_str()
            );
        }
    }

    #[test]
    fn test_candidates_do_not_collide_in_practice() {
        let allocator = IdentifierAllocator::with_seed(DEFAULT_SUFFIX_LEN, 3).unwrap();
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(allocator.allocate(ActionKind::Stake)));
        }
    }
}
