//! Group layout: validation of the group-id contract and explicit key → group mappings.
//!
//! Training and sampling take samples and group ids as parallel arrays. The samples of
//! one group must be contiguous and ids must never decrease, so that a group is a
//! plain range of the sample slice. An id may skip forward; the skipped groups have no
//! samples.

use std::collections::BTreeMap;
use std::ops::Range;

use crate::error::{Error, Result};

/// Per-group sample ranges derived from a validated group-id sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupLayout {
    ranges: Vec<Range<usize>>,
}

impl GroupLayout {
    /// Validate `group_ids` against `group_count` and compute each group's range.
    ///
    /// Fails with [`Error::InputContract`] when an id is `>= group_count` or smaller
    /// than its predecessor.
    pub fn new(group_ids: &[usize], group_count: usize) -> Result<Self> {
        let mut ranges = vec![0..0; group_count];
        let mut start = 0;
        let mut current: Option<usize> = None;

        for (index, &id) in group_ids.iter().enumerate() {
            if id >= group_count {
                return Err(Error::InputContract {
                    index,
                    message: format!("group id {id} is not below group count {group_count}"),
                });
            }
            match current {
                Some(prev) if id < prev => {
                    return Err(Error::InputContract {
                        index,
                        message: format!(
                            "group id {id} follows {prev}; ids must be non-decreasing"
                        ),
                    });
                }
                Some(prev) if id == prev => {}
                Some(prev) => {
                    ranges[prev] = start..index;
                    start = index;
                    current = Some(id);
                }
                None => current = Some(id),
            }
        }
        if let Some(last) = current {
            ranges[last] = start..group_ids.len();
        }

        Ok(Self { ranges })
    }

    /// Number of groups, including groups without samples.
    pub fn group_count(&self) -> usize {
        self.ranges.len()
    }

    /// Sample range of `group`.
    pub fn range(&self, group: usize) -> Range<usize> {
        self.ranges[group].clone()
    }

    /// Sample ranges of all groups in group order.
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.ranges
    }

    /// Number of samples in `group`.
    pub fn group_len(&self, group: usize) -> usize {
        self.ranges[group].len()
    }
}

/// Check samples and group ids as parallel arrays and return the common dimensionality.
pub(crate) fn check_samples(samples: &[Vec<f64>], group_ids: &[usize]) -> Result<usize> {
    if samples.len() != group_ids.len() {
        return Err(Error::LengthMismatch {
            samples: samples.len(),
            group_ids: group_ids.len(),
        });
    }
    let Some(first) = samples.first() else {
        return Err(Error::EmptyInput);
    };
    let dim = first.len();
    if dim == 0 {
        return Err(Error::InvalidParameter {
            name: "dimension",
            message: "must be at least 1",
        });
    }
    for (index, sample) in samples.iter().enumerate() {
        if sample.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                found: sample.len(),
            });
        }
        if sample.iter().any(|v| !v.is_finite()) {
            return Err(Error::InputContract {
                index,
                message: "sample contains a non-finite value".to_string(),
            });
        }
    }
    Ok(dim)
}

/// Stable-sort `(sample, group id)` pairs by group id, producing the contiguous
/// layout training expects. Samples within a group keep their relative order.
pub fn sort_by_group(
    samples: Vec<Vec<f64>>,
    group_ids: Vec<usize>,
) -> Result<(Vec<Vec<f64>>, Vec<usize>)> {
    if samples.len() != group_ids.len() {
        return Err(Error::LengthMismatch {
            samples: samples.len(),
            group_ids: group_ids.len(),
        });
    }
    let mut pairs: Vec<(usize, Vec<f64>)> = group_ids.into_iter().zip(samples).collect();
    pairs.sort_by_key(|(id, _)| *id);
    Ok(pairs.into_iter().map(|(id, s)| (s, id)).unzip())
}

/// Explicit mapping from caller keys (histogram bins, block coordinates, ...) to dense group ids.
///
/// Dense ids follow the key order, so sorting samples by key and by group id agree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupIndex<K> {
    keys: Vec<K>,
    lookup: BTreeMap<K, usize>,
}

impl<K: Ord + Clone> GroupIndex<K> {
    /// Build an index over the distinct keys in `keys`.
    pub fn from_keys<'a, I>(keys: I) -> Self
    where
        I: IntoIterator<Item = &'a K>,
        K: 'a,
    {
        let mut lookup: BTreeMap<K, usize> = keys.into_iter().map(|k| (k.clone(), 0)).collect();
        let mut ordered = Vec::with_capacity(lookup.len());
        for (group, (key, slot)) in lookup.iter_mut().enumerate() {
            *slot = group;
            ordered.push(key.clone());
        }
        Self {
            keys: ordered,
            lookup,
        }
    }

    /// Number of groups.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// True when the index holds no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Group id of `key`.
    pub fn group_of(&self, key: &K) -> Option<usize> {
        self.lookup.get(key).copied()
    }

    /// Key of `group`.
    pub fn key(&self, group: usize) -> Option<&K> {
        self.keys.get(group)
    }

    /// Translate a key sequence into group ids; an unknown key is a contract violation.
    pub fn assign(&self, keys: &[K]) -> Result<Vec<usize>> {
        keys.iter()
            .enumerate()
            .map(|(index, key)| {
                self.group_of(key).ok_or_else(|| Error::InputContract {
                    index,
                    message: "key is not part of the group index".to_string(),
                })
            })
            .collect()
    }
}
