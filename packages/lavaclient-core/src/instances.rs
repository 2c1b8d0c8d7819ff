//! Backend instance registry and load balancer.
//!
//! The registry is the sole owner of [`Instance`]s. Sessions refer to their
//! instance by id only and look it up on every command.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::channel::{ChannelSession, ConnectionState, InstanceId};
use crate::config::InstanceConfig;
use crate::error::{LavaError, LavaResult};
use crate::protocol::Outbound;
use crate::protocol_constants::NO_STATS_PENALTY;
use crate::stats::{InstanceStats, StatsSnapshot};

/// One registered backend instance.
pub struct Instance {
    config: InstanceConfig,
    channel: Arc<ChannelSession>,
    stats: RwLock<Option<Arc<InstanceStats>>>,
}

impl Instance {
    pub fn new(config: InstanceConfig, channel: Arc<ChannelSession>) -> Arc<Self> {
        Arc::new(Self {
            config,
            channel,
            stats: RwLock::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    pub fn channel(&self) -> &Arc<ChannelSession> {
        &self.channel
    }

    pub fn state(&self) -> ConnectionState {
        self.channel.state()
    }

    pub fn is_usable(&self) -> bool {
        self.state().is_usable()
    }

    /// Latest statistics with their penalty, if any were reported.
    pub fn stats(&self) -> Option<Arc<InstanceStats>> {
        self.stats.read().clone()
    }

    /// Total penalty; instances without statistics rank last.
    pub fn penalty(&self) -> f64 {
        self.stats
            .read()
            .as_ref()
            .map_or(NO_STATS_PENALTY, |stats| stats.penalty.total)
    }

    /// Replaces the statistics snapshot as a whole.
    pub fn update_stats(&self, snapshot: StatsSnapshot) -> Arc<InstanceStats> {
        let stats = Arc::new(InstanceStats::new(snapshot));
        *self.stats.write() = Some(Arc::clone(&stats));
        stats
    }

    pub async fn send(&self, command: &Outbound) -> LavaResult<()> {
        self.channel.send(command).await
    }
}

/// All known instances, keyed by name.
pub struct InstanceRegistry {
    instances: DashMap<InstanceId, Arc<Instance>>,
    regions: BTreeMap<String, Vec<String>>,
}

impl InstanceRegistry {
    /// `regions` maps a region tag to the voice endpoint prefixes it covers.
    pub fn new(regions: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            instances: DashMap::new(),
            regions,
        }
    }

    pub fn insert(&self, instance: Arc<Instance>) -> LavaResult<()> {
        match self.instances.entry(instance.id().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => {
                Err(LavaError::DuplicateInstance(entry.key().clone()))
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                log::info!("[Instances] Registered {}", instance.id());
                entry.insert(instance);
                Ok(())
            }
        }
    }

    /// Unregisters an instance and stops its channel.
    pub fn remove(&self, id: &str) -> Option<Arc<Instance>> {
        let (_, instance) = self.instances.remove(id)?;
        instance.channel.shutdown();
        log::info!("[Instances] Removed {}", id);
        Some(instance)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Instance>> {
        self.instances.get(id).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.instances.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn all(&self) -> Vec<Arc<Instance>> {
        self.instances
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn usable(&self) -> Vec<Arc<Instance>> {
        self.instances
            .iter()
            .filter(|entry| entry.value().is_usable())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Picks the best instance for a session.
    ///
    /// Candidates are usable instances not in `exclude`. If any candidate's
    /// region matches `region_hint`, only those are considered. The lowest
    /// penalty wins; ties go to the instance connected longest.
    pub fn select(&self, region_hint: Option<&str>, exclude: &[&str]) -> LavaResult<Arc<Instance>> {
        let candidates: Vec<Arc<Instance>> = self
            .usable()
            .into_iter()
            .filter(|instance| !exclude.contains(&instance.id()))
            .collect();

        let regional: Vec<Arc<Instance>> = match region_hint {
            Some(hint) => candidates
                .iter()
                .filter(|instance| instance.region() == Some(hint))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        let pool = if regional.is_empty() {
            candidates
        } else {
            regional
        };

        pool.into_iter()
            .map(|instance| (instance.penalty(), instance.channel.connected_since(), instance))
            .min_by(|a, b| compare_candidates((a.0, a.1), (b.0, b.1)))
            .map(|(_, _, instance)| instance)
            .ok_or_else(|| LavaError::NoAvailableInstance(region_hint.map(str::to_string)))
    }

    /// Maps a voice server endpoint to a region that has a usable instance.
    pub fn region_for_endpoint(&self, endpoint: &str) -> Option<String> {
        let endpoint = endpoint.strip_prefix("vip-").unwrap_or(endpoint);
        let usable = self.usable();
        self.regions
            .iter()
            .filter(|(_, prefixes)| prefixes.iter().any(|p| endpoint.starts_with(p.as_str())))
            .find(|(region, _)| {
                usable
                    .iter()
                    .any(|instance| instance.region() == Some(region.as_str()))
            })
            .map(|(region, _)| region.clone())
    }

    /// Stops every channel without unregistering instances.
    pub fn shutdown_all(&self) {
        for entry in self.instances.iter() {
            entry.value().channel.shutdown();
        }
    }
}

fn compare_candidates(a: (f64, Option<Instant>), b: (f64, Option<Instant>)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| match (a.1, b.1) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    })
}
