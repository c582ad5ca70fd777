use serenity::model::id::GuildId;
use std::{fmt, sync::Arc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::registry::SessionRegistry;

/// Identifica una reproducción concreta dentro de una sesión.
///
/// Cada `play` usa un token nuevo; un evento con un token viejo (un `End`
/// duplicado, o el `End` de un track que ya se saltó) no puede avanzar la cola.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlaybackToken(pub u64);

impl fmt::Display for PlaybackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Por qué terminó una reproducción.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    Finished,
    Stopped,
    Replaced,
    Cleanup,
    LoadFailed,
}

/// Eventos del ciclo de vida de un track emitidos por el backend de audio.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    TrackStarted {
        guild_id: GuildId,
        token: PlaybackToken,
    },
    TrackEnded {
        guild_id: GuildId,
        token: PlaybackToken,
        reason: EndReason,
    },
    TrackErrored {
        guild_id: GuildId,
        token: PlaybackToken,
        reason: String,
        detail: Option<String>,
    },
}

impl BackendEvent {
    pub fn guild_id(&self) -> GuildId {
        match self {
            BackendEvent::TrackStarted { guild_id, .. }
            | BackendEvent::TrackEnded { guild_id, .. }
            | BackendEvent::TrackErrored { guild_id, .. } => *guild_id,
        }
    }

    pub fn token(&self) -> PlaybackToken {
        match self {
            BackendEvent::TrackStarted { token, .. }
            | BackendEvent::TrackEnded { token, .. }
            | BackendEvent::TrackErrored { token, .. } => *token,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<BackendEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<BackendEvent>;

/// Entrega los eventos del backend a la sesión dueña, en orden de llegada.
pub struct EventRouter {
    registry: Arc<SessionRegistry>,
}

impl EventRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    /// Canal por el que el backend publica sus eventos.
    pub fn channel() -> (EventSender, EventReceiver) {
        mpsc::unbounded_channel()
    }

    pub async fn dispatch(&self, event: BackendEvent) {
        let guild_id = event.guild_id();
        match self.registry.get(guild_id) {
            Some(session) => session.handle_backend_event(event).await,
            None => debug!("📭 Evento {:?} para guild {} sin sesión, ignorado", event, guild_id),
        }
    }

    /// Consume el canal hasta que todos los emisores se cierran.
    ///
    /// Un solo consumidor garantiza que los eventos de una sesión se aplican en
    /// el orden en que llegaron.
    pub async fn run(self, mut events: EventReceiver) {
        info!("📡 Router de eventos de audio iniciado");
        while let Some(event) = events.recv().await {
            self.dispatch(event).await;
        }
        warn!("📡 Canal de eventos cerrado, router detenido");
    }
}
