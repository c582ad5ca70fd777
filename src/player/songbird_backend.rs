use anyhow::{anyhow, Context, Result};
use async_process::Command;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serenity::model::id::GuildId;
use songbird::{
    input::{AuxMetadata, Compose, YoutubeDl},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use super::{
    backend::{AudioBackend, SearchResult},
    equalizer::EqualizerPreset,
    events::{BackendEvent, EndReason, EventSender, PlaybackToken},
    track::{Track, TrackInfo},
};

const SEARCH_PREFIX: &str = "ytsearch:";
const SEARCH_RESULTS: usize = 5;
const PLAYLIST_LIMIT: usize = 100;

/// Backend de audio sobre songbird + yt-dlp.
///
/// Songbird no tiene etapa de ecualización: el preset vive en la sesión y
/// solo se muestra en el mensaje de estado.
pub struct SongbirdBackend {
    manager: Arc<Songbird>,
    http: reqwest::Client,
    events: EventSender,
    handles: DashMap<GuildId, TrackHandle>,
    volumes: DashMap<GuildId, u16>,
}

impl SongbirdBackend {
    pub fn new(manager: Arc<Songbird>, events: EventSender) -> Self {
        Self {
            manager,
            http: reqwest::Client::new(),
            events,
            handles: DashMap::new(),
            volumes: DashMap::new(),
        }
    }

    fn handle(&self, guild_id: GuildId) -> Result<TrackHandle> {
        self.handles
            .get(&guild_id)
            .map(|handle| handle.clone())
            .ok_or_else(|| anyhow!("No hay track activo en guild {}", guild_id))
    }

    async fn search_terms(&self, terms: &str) -> Result<SearchResult> {
        info!("🔍 Buscando en YouTube: {}", terms);

        let mut source = YoutubeDl::new_search(self.http.clone(), terms.to_string());
        let results = source
            .search(Some(SEARCH_RESULTS))
            .await
            .context("Error al buscar con yt-dlp")?;

        Ok(SearchResult::Tracks(
            results.into_iter().filter_map(metadata_to_info).collect(),
        ))
    }

    async fn resolve_url(&self, url: &str) -> Result<SearchResult> {
        debug!("📊 Obteniendo info de: {}", url);

        let mut source = YoutubeDl::new(self.http.clone(), url.to_string());
        let metadata = source
            .aux_metadata()
            .await
            .context("Error al obtener metadata con yt-dlp")?;

        Ok(SearchResult::Tracks(
            metadata_to_info(metadata).into_iter().collect(),
        ))
    }

    async fn resolve_playlist(&self, url: &str) -> Result<SearchResult> {
        info!("📋 Obteniendo playlist: {}", url);

        let output = Command::new("yt-dlp")
            .args([
                "--flat-playlist",
                "--dump-json",
                "--playlist-end",
                &PLAYLIST_LIMIT.to_string(),
                "--no-warnings",
                url,
            ])
            .output()
            .await
            .context("Error al ejecutar yt-dlp")?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp error: {}", error);
        }

        Ok(parse_playlist(&String::from_utf8_lossy(&output.stdout)))
    }
}

#[async_trait]
impl AudioBackend for SongbirdBackend {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        if let Some(terms) = query.strip_prefix(SEARCH_PREFIX) {
            self.search_terms(terms.trim()).await
        } else if query.contains("list=") {
            self.resolve_playlist(query).await
        } else {
            self.resolve_url(query).await
        }
    }

    async fn play(&self, guild_id: GuildId, token: PlaybackToken, track: &Track) -> Result<()> {
        let call = self
            .manager
            .get(guild_id)
            .ok_or_else(|| anyhow!("Sin conexión de voz en guild {}", guild_id))?;

        let input = YoutubeDl::new(self.http.clone(), track.info.uri.clone());
        let handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(input.into())
        };

        let volume = self.volumes.get(&guild_id).map_or(50, |v| *v);
        handle.set_volume(f32::from(volume) / 100.0)?;

        for event in [TrackEvent::End, TrackEvent::Error] {
            handle
                .add_event(
                    Event::Track(event),
                    TrackLifecycleHandler {
                        guild_id,
                        token,
                        events: self.events.clone(),
                    },
                )
                .map_err(|e| anyhow!("Error al agregar event handler: {}", e))?;
        }

        self.handles.insert(guild_id, handle);
        let _ = self.events.send(BackendEvent::TrackStarted { guild_id, token });

        info!("🎵 Reproduciendo: {} ({})", track.title(), token);
        Ok(())
    }

    async fn pause(&self, guild_id: GuildId, paused: bool) -> Result<()> {
        let handle = self.handle(guild_id)?;
        if paused {
            handle.pause()?;
            info!("⏸️ Reproducción pausada");
        } else {
            handle.play()?;
            info!("▶️ Reproducción reanudada");
        }
        Ok(())
    }

    async fn seek(&self, guild_id: GuildId, position: Duration) -> Result<()> {
        let handle = self.handle(guild_id)?;
        handle
            .seek(position)
            .result_async()
            .await
            .map_err(|e| anyhow!("Error al buscar posición: {:?}", e))?;
        debug!("⏩ Posición movida a {}s", position.as_secs());
        Ok(())
    }

    async fn position(&self, guild_id: GuildId) -> Result<Duration> {
        let handle = self.handle(guild_id)?;
        Ok(handle.get_info().await?.position)
    }

    async fn set_volume(&self, guild_id: GuildId, volume: u16) -> Result<()> {
        self.volumes.insert(guild_id, volume);
        if let Some(handle) = self.handles.get(&guild_id) {
            handle.set_volume(f32::from(volume) / 100.0)?;
        }
        info!("🔊 Volumen ajustado a {}%", volume);
        Ok(())
    }

    async fn set_equalizer(&self, guild_id: GuildId, preset: EqualizerPreset) -> Result<()> {
        debug!("🎚️ Ecualizador {} en guild {} (sin etapa de audio)", preset, guild_id);
        Ok(())
    }

    async fn stop(&self, guild_id: GuildId) -> Result<()> {
        if let Some((_, handle)) = self.handles.remove(&guild_id) {
            // El track puede haber terminado solo
            let _ = handle.stop();
            info!("⏹️ Reproducción detenida");
        }
        Ok(())
    }
}

/// Reenvía el fin o error de un track al router, etiquetado con su token.
struct TrackLifecycleHandler {
    guild_id: GuildId,
    token: PlaybackToken,
    events: EventSender,
}

#[async_trait]
impl VoiceEventHandler for TrackLifecycleHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let EventContext::Track(track_list) = ctx else {
            return None;
        };

        for (state, _handle) in *track_list {
            let event = match &state.playing {
                PlayMode::Errored(e) => BackendEvent::TrackErrored {
                    guild_id: self.guild_id,
                    token: self.token,
                    reason: "fault".to_string(),
                    detail: Some(format!("{:?}", e)),
                },
                PlayMode::Stop => BackendEvent::TrackEnded {
                    guild_id: self.guild_id,
                    token: self.token,
                    reason: EndReason::Stopped,
                },
                _ => BackendEvent::TrackEnded {
                    guild_id: self.guild_id,
                    token: self.token,
                    reason: EndReason::Finished,
                },
            };

            debug!("🎵 Evento de track en guild {}: {:?}", self.guild_id, event);
            if self.events.send(event).is_err() {
                warn!("📡 Router de eventos cerrado, evento descartado");
            }
        }

        None
    }
}

fn metadata_to_info(metadata: AuxMetadata) -> Option<TrackInfo> {
    let uri = metadata.source_url?;
    Some(TrackInfo {
        id: uri.clone(),
        title: metadata
            .title
            .or(metadata.track)
            .unwrap_or_else(|| "Desconocido".to_string()),
        author: metadata
            .artist
            .or(metadata.channel)
            .unwrap_or_else(|| "Desconocido".to_string()),
        duration: metadata.duration.filter(|d| !d.is_zero()),
        uri,
        thumbnail: metadata.thumbnail,
    })
}

/// Una línea de `yt-dlp --flat-playlist --dump-json`.
#[derive(Debug, Deserialize)]
struct FlatEntry {
    id: String,
    title: Option<String>,
    url: Option<String>,
    duration: Option<f64>,
    uploader: Option<String>,
    channel: Option<String>,
    playlist_title: Option<String>,
}

fn parse_playlist(stdout: &str) -> SearchResult {
    let mut name = None;
    let mut tracks = Vec::new();

    for line in stdout.lines() {
        let Ok(entry) = serde_json::from_str::<FlatEntry>(line) else {
            continue;
        };

        if name.is_none() {
            name = entry.playlist_title.clone();
        }

        let uri = entry
            .url
            .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id));
        tracks.push(TrackInfo {
            id: entry.id,
            title: entry.title.unwrap_or_else(|| "Desconocido".to_string()),
            author: entry
                .uploader
                .or(entry.channel)
                .unwrap_or_else(|| "Desconocido".to_string()),
            duration: entry
                .duration
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
            uri,
            thumbnail: None,
        });
    }

    SearchResult::Playlist {
        name: name.unwrap_or_else(|| "Playlist".to_string()),
        tracks,
    }
}
