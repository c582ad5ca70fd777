use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::sync::Arc;
use tracing::{debug, info};

use super::{backend::AudioBackend, session::Session};
use crate::{bot::transport::Transport, config::PlayerSettings};

/// Una sesión viva por guild.
///
/// Las sesiones se crean en el primer comando que las necesita y se quitan
/// solas al destruirse; una sesión retirada nunca se reutiliza.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<Session>>,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    settings: PlayerSettings,
}

impl SessionRegistry {
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
        settings: PlayerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            sessions: DashMap::new(),
            backend,
            transport,
            settings,
        })
    }

    /// Devuelve la sesión del guild, creándola si no existe.
    pub fn get_or_create(self: &Arc<Self>, guild_id: GuildId) -> Arc<Session> {
        let start = || {
            Session::start(
                guild_id,
                self.settings.clone(),
                self.backend.clone(),
                self.transport.clone(),
                Arc::downgrade(self),
            )
        };

        match self.sessions.entry(guild_id) {
            Entry::Occupied(mut entry) if entry.get().is_terminated() => {
                // Se destruyó pero todavía no se retiró
                let session = start();
                entry.insert(session.clone());
                session
            }
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(start()).clone(),
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<Session>> {
        self.sessions
            .get(&guild_id)
            .map(|entry| entry.value().clone())
            .filter(|session| !session.is_terminated())
    }

    /// Quita y destruye la sesión del guild, si hay una.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        let Some((_, session)) = self.sessions.remove(&guild_id) else {
            return false;
        };
        session.destroy().await;
        info!("🗑️ Sesión de guild {} eliminada", guild_id);
        true
    }

    /// Quita `session` del registro solo si sigue siendo la registrada.
    pub(crate) fn remove_session(&self, session: &Session) {
        let removed = self
            .sessions
            .remove_if(&session.guild_id(), |_, current| {
                std::ptr::eq(Arc::as_ptr(current), session)
            });
        if removed.is_some() {
            debug!("📤 Sesión de guild {} retirada del registro", session.guild_id());
        }
    }

    /// Destruye todas las sesiones (apagado del bot).
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        info!("🛑 Cerrando {} sesiones", sessions.len());
        join_all(sessions.iter().map(|session| session.destroy())).await;
        self.sessions.clear();
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn backend(&self) -> &Arc<dyn AudioBackend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{track, Harness};

    #[tokio::test(start_paused = true)]
    async fn one_session_per_guild() {
        let harness = Harness::new();
        let guild = GuildId::new(7);

        let first = harness.registry.get_or_create(guild);
        let again = harness.registry.get_or_create(guild);
        let other = harness.registry.get_or_create(GuildId::new(8));

        assert!(Arc::ptr_eq(&first, &again));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(harness.registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn destroyed_sessions_are_replaced() {
        let harness = Harness::new();
        let guild = GuildId::new(7);

        let first = harness.registry.get_or_create(guild);
        first.destroy().await;
        assert!(harness.registry.get(guild).is_none());

        let second = harness.registry.get_or_create(guild);
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!second.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_session_does_not_evict_its_replacement() {
        let harness = Harness::new();
        let guild = GuildId::new(7);

        let first = harness.registry.get_or_create(guild);
        assert!(harness.registry.remove(guild).await);
        let second = harness.registry.get_or_create(guild);

        harness.registry.remove_session(&first);

        let current = harness.registry.get(guild).unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_tears_down_every_guild() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("a")], false).await;
        let other = harness.registry.get_or_create(GuildId::new(8));
        harness.settle().await;

        harness.registry.shutdown().await;

        assert!(session.is_terminated());
        assert!(other.is_terminated());
        assert!(harness.registry.is_empty());
        assert_eq!(harness.backend.stops(), 2);
    }
}
