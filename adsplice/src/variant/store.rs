//! Asset renditions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rendition {
    pub bitrate_kbps: u32,
    /// Media playlist of this rendition.
    pub playlist_uri: String,
}

impl Rendition {
    pub fn new(bitrate_kbps: u32, playlist_uri: impl Into<String>) -> Self {
        Self {
            bitrate_kbps,
            playlist_uri: playlist_uri.into(),
        }
    }
}

/// Renditions of one asset keyed by exact bitrate. Only ever grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VariantSet {
    pub asset_id: String,
    renditions: BTreeMap<u32, Rendition>,
}

impl VariantSet {
    pub fn new(asset_id: impl Into<String>) -> Self {
        Self {
            asset_id: asset_id.into(),
            renditions: BTreeMap::new(),
        }
    }

    pub fn from_renditions(
        asset_id: impl Into<String>,
        renditions: impl IntoIterator<Item = Rendition>,
    ) -> Self {
        let mut set = Self::new(asset_id);
        set.merge(renditions);
        set
    }

    /// Add a rendition unless its bitrate is already present. An existing
    /// rendition is never replaced.
    pub fn insert(&mut self, rendition: Rendition) -> bool {
        match self.renditions.entry(rendition.bitrate_kbps) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(rendition);
                true
            }
        }
    }

    /// Returns how many renditions were new.
    pub fn merge(&mut self, renditions: impl IntoIterator<Item = Rendition>) -> usize {
        renditions
            .into_iter()
            .map(|r| self.insert(r))
            .filter(|added| *added)
            .count()
    }

    pub fn get(&self, bitrate_kbps: u32) -> Option<&Rendition> {
        self.renditions.get(&bitrate_kbps)
    }

    /// Nearest rendition by absolute bitrate difference; ties go to the
    /// lower bitrate.
    pub fn closest(&self, bitrate_kbps: u32) -> Option<&Rendition> {
        let mut best: Option<&Rendition> = None;
        for r in self.renditions.values() {
            let diff = r.bitrate_kbps.abs_diff(bitrate_kbps);
            if best.is_none_or(|b| diff < b.bitrate_kbps.abs_diff(bitrate_kbps)) {
                best = Some(r);
            }
        }
        best
    }

    pub fn bitrates(&self) -> impl Iterator<Item = u32> + '_ {
        self.renditions.keys().copied()
    }

    pub fn renditions(&self) -> impl Iterator<Item = &Rendition> {
        self.renditions.values()
    }

    pub fn len(&self) -> usize {
        self.renditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.renditions.is_empty()
    }
}

/// External store of asset renditions.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn variant_set(&self, asset_id: &str) -> Result<Option<VariantSet>>;

    /// Add renditions to an asset, keeping any already there. Returns how
    /// many were new.
    async fn merge_renditions(&self, asset_id: &str, renditions: Vec<Rendition>) -> Result<usize>;
}

#[derive(Default)]
pub struct InMemoryAssetStore {
    sets: DashMap<String, VariantSet>,
}

impl InMemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AssetStore for InMemoryAssetStore {
    async fn variant_set(&self, asset_id: &str) -> Result<Option<VariantSet>> {
        Ok(self.sets.get(asset_id).map(|s| s.value().clone()))
    }

    async fn merge_renditions(&self, asset_id: &str, renditions: Vec<Rendition>) -> Result<usize> {
        let mut set = self
            .sets
            .entry(asset_id.to_string())
            .or_insert_with(|| VariantSet::new(asset_id));
        Ok(set.merge(renditions))
    }
}
