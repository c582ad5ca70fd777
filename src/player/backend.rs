use anyhow::Result;
use async_trait::async_trait;
use serenity::model::id::GuildId;
use std::time::Duration;

use super::{equalizer::EqualizerPreset, events::PlaybackToken, track::{Track, TrackInfo}};

/// Resultado de resolver una búsqueda o URL.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchResult {
    /// Resultados individuales, el primero es el más relevante
    Tracks(Vec<TrackInfo>),
    Playlist { name: String, tracks: Vec<TrackInfo> },
}

impl SearchResult {
    pub fn is_empty(&self) -> bool {
        match self {
            SearchResult::Tracks(tracks) => tracks.is_empty(),
            SearchResult::Playlist { tracks, .. } => tracks.is_empty(),
        }
    }
}

/// Servicio externo que busca y reproduce audio.
///
/// Cada `play` recibe un [`PlaybackToken`] nuevo; el backend debe etiquetar con
/// él los eventos de fin o error de esa reproducción (ver
/// [`BackendEvent`](super::events::BackendEvent)).
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResult>;

    async fn play(&self, guild_id: GuildId, token: PlaybackToken, track: &Track) -> Result<()>;

    async fn pause(&self, guild_id: GuildId, paused: bool) -> Result<()>;

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<()>;

    /// Posición actual de la reproducción
    async fn position(&self, guild_id: GuildId) -> Result<Duration>;

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<()>;

    async fn set_equalizer(&self, guild_id: GuildId, preset: EqualizerPreset) -> Result<()>;

    async fn stop(&self, guild_id: GuildId) -> Result<()>;
}
