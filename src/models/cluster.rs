use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::hash::Hash;

use super::Contact;

/// Sequence that keeps only the first occurrence of each value.
#[derive(Debug, Clone)]
pub struct OrderedSet<T> {
    items: Vec<T>,
    seen: HashSet<T>,
}

impl<T: Eq + Hash + Clone> OrderedSet<T> {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Append `value` unless already present. Returns whether it was added.
    pub fn insert(&mut self, value: T) -> bool {
        if self.seen.contains(&value) {
            return false;
        }
        self.seen.insert(value.clone());
        self.items.push(value);
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.seen.contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.items
    }
}

impl<T: Eq + Hash + Clone> Default for OrderedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Eq + Hash + Clone> FromIterator<T> for OrderedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for value in iter {
            set.insert(value);
        }
        set
    }
}

/// Consolidated view of one identity cluster, as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterView {
    pub primary_contact_id: i64,
    pub emails: Vec<String>,
    pub phone_numbers: Vec<String>,
    pub secondary_contact_ids: Vec<i64>,
}

impl ClusterView {
    /// Build the view from cluster members already ordered by creation time.
    /// Emails and phone numbers keep first-seen order; secondaries keep
    /// member order.
    pub fn from_contacts(primary_contact_id: i64, contacts: &[Contact]) -> Self {
        let emails: OrderedSet<String> = contacts.iter().filter_map(|c| c.email.clone()).collect();
        let phone_numbers: OrderedSet<String> = contacts
            .iter()
            .filter_map(|c| c.phone_number.clone())
            .collect();
        let secondary_contact_ids = contacts
            .iter()
            .filter(|c| !c.is_primary())
            .map(|c| c.id)
            .collect();

        Self {
            primary_contact_id,
            emails: emails.into_vec(),
            phone_numbers: phone_numbers.into_vec(),
            secondary_contact_ids,
        }
    }
}
