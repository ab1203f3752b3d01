//! Cache group index.
//!
//! Maps an endpoint to every group it belongs to, so that a write to one endpoint
//! can evict the cached reads of all related endpoints in one pass.

use std::collections::{BTreeSet, HashMap};

static NO_GROUPS: BTreeSet<usize> = BTreeSet::new();

/// Endpoints whose cached entries are invalidated together.
///
/// Order is insertion order and carries no meaning; duplicates are harmless.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheGroup(Vec<String>);

impl CacheGroup {
    pub fn new<I, S>(endpoints: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(endpoints.into_iter().map(Into::into).collect())
    }

    pub fn endpoints(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for CacheGroup {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Append-only list of groups plus the inverse endpoint → group index mapping.
///
/// Built once at startup with [`CacheGroupIndex::add_group`], then shared read-only
/// behind an `Arc`; queries take `&self` and need no lock.
#[derive(Debug, Clone, Default)]
pub struct CacheGroupIndex {
    groups: Vec<CacheGroup>,
    endpoint_groups: HashMap<String, BTreeSet<usize>>,
}

impl CacheGroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a group and record its index under each member endpoint.
    ///
    /// Returns the index assigned to the group.
    pub fn add_group(&mut self, group: CacheGroup) -> usize {
        let index = self.groups.len();
        for endpoint in group.endpoints() {
            self.endpoint_groups
                .entry(endpoint.clone())
                .or_default()
                .insert(index);
        }
        self.groups.push(group);
        index
    }

    /// Indices of every group `endpoint` participates in; empty when unknown.
    pub fn related_group_indexes(&self, endpoint: &str) -> &BTreeSet<usize> {
        self.endpoint_groups.get(endpoint).unwrap_or(&NO_GROUPS)
    }

    /// Union of the members of every group related to `endpoint`, deduplicated and
    /// in a stable order.
    pub fn related_endpoints(&self, endpoint: &str) -> BTreeSet<&str> {
        self.related_group_indexes(endpoint)
            .iter()
            .filter_map(|index| self.groups.get(*index))
            .flat_map(|group| group.endpoints().iter().map(String::as_str))
            .collect()
    }

    pub fn group(&self, index: usize) -> Option<&CacheGroup> {
        self.groups.get(index)
    }

    pub fn groups(&self) -> &[CacheGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromIterator<CacheGroup> for CacheGroupIndex {
    fn from_iter<I: IntoIterator<Item = CacheGroup>>(iter: I) -> Self {
        let mut index = Self::new();
        for group in iter {
            index.add_group(group);
        }
        index
    }
}
