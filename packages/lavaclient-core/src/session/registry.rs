//! Live sessions, one per destination.

use std::sync::Arc;

use dashmap::DashMap;

use super::Session;
use crate::events::EventEmitter;
use crate::instances::InstanceRegistry;

pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    instances: Arc<InstanceRegistry>,
    emitter: Arc<dyn EventEmitter>,
    pending_capacity: usize,
}

impl SessionRegistry {
    pub fn new(
        instances: Arc<InstanceRegistry>,
        emitter: Arc<dyn EventEmitter>,
        pending_capacity: usize,
    ) -> Self {
        Self {
            sessions: DashMap::new(),
            instances,
            emitter,
            pending_capacity,
        }
    }

    /// Returns the session for `guild_id`, creating it on the best usable
    /// instance. Without one the new session starts parked.
    pub fn get_or_create(&self, guild_id: &str, region_hint: Option<&str>) -> Arc<Session> {
        if let Some(session) = self.sessions.get(guild_id) {
            return Arc::clone(session.value());
        }

        let entry = self.sessions.entry(guild_id.to_string()).or_insert_with(|| {
            let instance = match self.instances.select(region_hint, &[]) {
                Ok(instance) => Some(instance.id().to_string()),
                Err(e) => {
                    log::info!("[Sessions] {} created parked: {}", guild_id, e);
                    None
                }
            };
            log::debug!(
                "[Sessions] Created {} on {}",
                guild_id,
                instance.as_deref().unwrap_or("none")
            );
            Session::new(
                guild_id,
                instance,
                region_hint.map(str::to_string),
                Arc::clone(&self.instances),
                Arc::clone(&self.emitter),
                self.pending_capacity,
            )
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, guild_id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(guild_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Drops the session after tearing it down on its instance.
    pub async fn remove(&self, guild_id: &str) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(guild_id)?;
        session.destroy().await;
        Some(session)
    }

    /// Sessions currently assigned to `instance`.
    pub fn sessions_on(&self, instance: &str) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().instance_id().as_deref() == Some(instance))
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Sessions waiting for an instance.
    pub fn parked(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|entry| entry.value().is_parked())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
