//! Insertion-ordered collection of enrolled identities.
//!
//! The roster is owned by the caller. Enrollment proposes writes through a
//! [`SharedRoster`] write guard; verification holds the read guard only for
//! the duration of one match.

use crate::types::{Identity, IdentityId};
use std::sync::Arc;
use tokio::sync::RwLock;

pub type SharedRoster = Arc<RwLock<Roster>>;

/// Whether an upsert appended a new identity or replaced an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RosterChange {
    Added,
    Updated,
}

#[derive(Debug, Clone, Default)]
pub struct Roster {
    identities: Vec<Identity>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_identities(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    /// Wrap into the shared handle used by the flows.
    pub fn into_shared(self) -> SharedRoster {
        Arc::new(RwLock::new(self))
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Identity> {
        self.identities.iter()
    }

    pub fn get(&self, id: &IdentityId) -> Option<&Identity> {
        self.identities.iter().find(|i| &i.id == id)
    }

    /// Insert a new identity at the end, or replace one with the same id in place.
    pub fn upsert(&mut self, identity: Identity) -> RosterChange {
        match self.identities.iter_mut().find(|i| i.id == identity.id) {
            Some(existing) => {
                *existing = identity;
                RosterChange::Updated
            }
            None => {
                self.identities.push(identity);
                RosterChange::Added
            }
        }
    }

    pub fn remove(&mut self, id: &IdentityId) -> Option<Identity> {
        let pos = self.identities.iter().position(|i| &i.id == id)?;
        Some(self.identities.remove(pos))
    }

    pub fn into_vec(self) -> Vec<Identity> {
        self.identities
    }
}

impl<'a> IntoIterator for &'a Roster {
    type Item = &'a Identity;
    type IntoIter = std::slice::Iter<'a, Identity>;

    fn into_iter(self) -> Self::IntoIter {
        self.identities.iter()
    }
}
