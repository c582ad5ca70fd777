use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, MessageId, UserId};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

/// Metadatos de un track tal como los devuelve el backend de búsqueda.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackInfo {
    pub id: String,
    pub title: String,
    pub author: String,
    /// `None` para transmisiones en vivo
    pub duration: Option<Duration>,
    pub uri: String,
    pub thumbnail: Option<String>,
}

impl TrackInfo {
    pub fn is_stream(&self) -> bool {
        self.duration.is_none()
    }
}

/// Quién pidió el track y desde dónde.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequestOrigin {
    pub requester: UserId,
    pub channel: ChannelId,
    pub message: Option<MessageId>,
}

/// Un track en la cola: metadatos más el origen de la petición.
///
/// Los clones comparten la marca de "muerto", así el loop de cola y la vista
/// previa ven el mismo estado cuando el backend reporta un fallo.
#[derive(Debug, Clone)]
pub struct Track {
    pub info: TrackInfo,
    pub requester: UserId,
    pub channel: ChannelId,
    pub message: Option<MessageId>,
    pub added_at: DateTime<Utc>,
    dead: Arc<AtomicBool>,
}

impl Track {
    pub fn new(info: TrackInfo, origin: RequestOrigin) -> Self {
        Self {
            info,
            requester: origin.requester,
            channel: origin.channel,
            message: origin.message,
            added_at: Utc::now(),
            dead: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn title(&self) -> &str {
        &self.info.title
    }

    pub fn duration(&self) -> Option<Duration> {
        self.info.duration
    }

    pub fn is_stream(&self) -> bool {
        self.info.is_stream()
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn mark_dead(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Cuánto lleva en la cola a la hora `now`.
    pub fn waiting(&self, now: DateTime<Utc>) -> Duration {
        (now - self.added_at).to_std().unwrap_or_default()
    }

    /// Misma entrada de cola (no solo el mismo video).
    pub fn same_entry(&self, other: &Track) -> bool {
        Arc::ptr_eq(&self.dead, &other.dead)
    }
}
