//! Contact identities and the tangential-history table.

use std::collections::{HashMap, HashSet};
use std::fmt;

use glam::DVec3;

use crate::particle::ParticleId;

/// Canonical identity of a contact.
///
/// Pairs are always stored as `(lower id, higher id)`, so the same two bodies
/// map to the same key no matter which order the broad phase reports them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContactKey {
    /// Sphere-sphere contact.
    Pair(ParticleId, ParticleId),
    /// Sphere-wall contact: particle id and wall triangle index.
    Wall(ParticleId, u32),
}

impl ContactKey {
    /// Canonical key for two spheres.
    #[inline]
    pub fn pair(a: ParticleId, b: ParticleId) -> Self {
        if a <= b {
            ContactKey::Pair(a, b)
        } else {
            ContactKey::Pair(b, a)
        }
    }

    /// Key for a sphere touching wall triangle `triangle`.
    #[inline]
    pub fn wall(particle: ParticleId, triangle: usize) -> Self {
        ContactKey::Wall(particle, triangle as u32)
    }

    /// Whether particle `id` takes part in this contact.
    pub fn involves(&self, id: ParticleId) -> bool {
        match *self {
            ContactKey::Pair(a, b) => a == id || b == id,
            ContactKey::Wall(p, _) => p == id,
        }
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContactKey::Pair(a, b) => write!(f, "particle {a} / particle {b}"),
            ContactKey::Wall(p, t) => write!(f, "particle {p} / wall triangle {t}"),
        }
    }
}

/// Accumulated tangential displacement per active contact.
///
/// Entries are created when a contact first appears and must be pruned as
/// soon as the contact separates; [`ContactHistory::prune`] runs after every
/// narrow-phase pass.
#[derive(Debug, Clone, Default)]
pub struct ContactHistory {
    entries: HashMap<ContactKey, DVec3>,
}

impl ContactHistory {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored tangential displacement for `key`.
    #[inline]
    pub fn get(&self, key: &ContactKey) -> Option<DVec3> {
        self.entries.get(key).copied()
    }

    /// Store the tangential displacement for `key`.
    #[inline]
    pub fn insert(&mut self, key: ContactKey, displacement: DVec3) {
        self.entries.insert(key, displacement);
    }

    /// Whether `key` has an entry.
    pub fn contains(&self, key: &ContactKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &ContactKey> {
        self.entries.keys()
    }

    /// Delete every entry whose key is not in `active`. Returns the number
    /// of entries removed.
    pub fn prune<'a, I>(&mut self, active: I) -> usize
    where
        I: IntoIterator<Item = &'a ContactKey>,
    {
        let active: HashSet<&ContactKey> = active.into_iter().collect();
        let before = self.entries.len();
        self.entries.retain(|k, _| active.contains(k));
        before - self.entries.len()
    }

    /// Delete every entry involving one of `removed`.
    pub fn forget_particles(&mut self, removed: &HashSet<ParticleId>) {
        if removed.is_empty() {
            return;
        }
        self.entries.retain(|k, _| match *k {
            ContactKey::Pair(a, b) => !removed.contains(&a) && !removed.contains(&b),
            ContactKey::Wall(p, _) => !removed.contains(&p),
        });
    }
}
