//! # Command surface
//!
//! One method per user-facing verb. Every method returns a [`Reply`] (or a
//! [`PlayerError`] that the front end turns into one) and never talks to
//! serenity directly, so the same logic serves slash commands and tests.

use anyhow::Result;
use regex::Regex;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, info, warn};

use crate::{
    bot::transport::Transport,
    error::{PlayerError, PlayerResult},
    player::{
        backend::SearchResult,
        equalizer::EqualizerPreset,
        registry::SessionRegistry,
        session::{Session, VolumeOutcome},
        track::{RequestOrigin, Track},
        votes::VoteCommand,
    },
    storage::{DeleteOutcome, InsertOutcome, MusicStore, SavedPlaylist},
    ui::{
        controls,
        embeds,
        prompts,
        reply::{self, Reply},
    },
};

const URL_PATTERN: &str = r"^https?://(?:www\.)?.+";
const SEARCH_PREFIX: &str = "ytsearch:";

const SEEK_HELP: &str = "Tiempo inválido\n```Prueba:\n0       (desde el principio)\n4:30    (4m30s)\n1:15:10 (1h15m10s)```";

/// Quién invocó un comando y desde dónde.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandContext {
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub message: Option<MessageId>,
}

impl CommandContext {
    fn origin(&self) -> RequestOrigin {
        RequestOrigin {
            requester: self.user_id,
            channel: self.channel_id,
            message: self.message,
        }
    }
}

/// Acción de `/playlist`.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaylistAction {
    /// Reproduce la playlist guardada con ese nombre
    Show(String),
    Add { name: String, url: String, private: bool },
    Remove(String),
    List,
}

/// Traduce cada verbo a operaciones sobre la sesión del guild.
pub struct MusicService {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn MusicStore>,
    selection_timeout: Duration,
    confirmation_timeout: Duration,
    url: Regex,
}

impl MusicService {
    pub fn new(
        registry: Arc<SessionRegistry>,
        store: Arc<dyn MusicStore>,
        selection_timeout: Duration,
        confirmation_timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            registry,
            store,
            selection_timeout,
            confirmation_timeout,
            url: Regex::new(URL_PATTERN)?,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    fn transport(&self) -> &Arc<dyn Transport> {
        self.registry.transport()
    }

    /// Sesión conectada del guild, sin crear una nueva.
    fn session(&self, guild_id: GuildId) -> PlayerResult<Arc<Session>> {
        self.registry
            .get(guild_id)
            .filter(|session| session.is_connected())
            .ok_or(PlayerError::NotConnected)
    }

    fn playing_session(&self, guild_id: GuildId) -> PlayerResult<Arc<Session>> {
        let session = self.session(guild_id)?;
        if session.current().is_none() {
            return Err(PlayerError::NothingPlaying);
        }
        Ok(session)
    }

    /// Une el bot al canal indicado o, si no hay, al canal de voz de quien invoca.
    pub async fn connect(&self, ctx: &CommandContext, channel: Option<ChannelId>) -> PlayerResult<Reply> {
        let channel = channel
            .or_else(|| self.transport().member_voice_channel(ctx.guild_id, ctx.user_id))
            .ok_or_else(|| {
                PlayerError::input("No hay canal al que unirse. Indica un canal de voz o entra a uno")
            })?;

        let session = self.registry.get_or_create(ctx.guild_id);
        if session.voice_channel() == Some(channel) {
            return Ok(Reply::text(format!("🔊 Ya estoy en <#{}>", channel))
                .ephemeral()
                .delete_after(Duration::from_secs(5)));
        }

        session.connect(channel).await?;
        Ok(Reply::text(format!("🔊 Conectado a <#{}>", channel)).delete_after(Duration::from_secs(10)))
    }

    /// Conecta (o mueve) la sesión al canal de quien pide música.
    async fn ensure_connected(&self, ctx: &CommandContext) -> PlayerResult<Arc<Session>> {
        let member_channel = self.transport().member_voice_channel(ctx.guild_id, ctx.user_id);
        let connected = self
            .registry
            .get(ctx.guild_id)
            .is_some_and(|session| session.is_connected());
        if member_channel.is_none() && !connected {
            return Err(PlayerError::input(
                "No hay canal al que unirse. Indica un canal de voz o entra a uno",
            ));
        }

        let session = self.registry.get_or_create(ctx.guild_id);
        if let Some(wanted) = member_channel {
            if session.voice_channel() != Some(wanted) {
                session.connect(wanted).await?;
            }
        }
        Ok(session)
    }

    /// Busca y encola. `front` pone lo encontrado al frente de la cola.
    pub async fn play(&self, ctx: &CommandContext, query: &str, front: bool) -> PlayerResult<Reply> {
        let session = self.ensure_connected(ctx).await?;

        let query = query.trim().trim_start_matches('<').trim_end_matches('>').trim();
        if query.is_empty() {
            return Err(PlayerError::input("Indica una canción o URL"));
        }

        let lookup = if self.url.is_match(query) {
            query.to_string()
        } else {
            format!("{}{}", SEARCH_PREFIX, query)
        };

        let result = self
            .registry
            .backend()
            .search(&lookup)
            .await
            .map_err(PlayerError::Backend)?;
        if result.is_empty() {
            return Err(PlayerError::NotFound(format!(
                "ninguna canción para `{}`, intenta de nuevo",
                query
            )));
        }

        let origin = ctx.origin();
        match result {
            SearchResult::Playlist { name, tracks } => {
                let count = tracks.len();
                let tracks = tracks.into_iter().map(|info| Track::new(info, origin)).collect();
                session.enqueue(tracks, front).await;

                info!("📋 Playlist '{}' ({} canciones) encolada en guild {}", name, count, ctx.guild_id);
                Ok(Reply::card(embeds::playlist_added_card(&name, count, front))
                    .delete_after(Duration::from_secs(15)))
            }
            SearchResult::Tracks(mut options) => {
                let index = if options.len() == 1 {
                    0
                } else {
                    prompts::select_track(
                        self.transport(),
                        ctx.channel_id,
                        ctx.user_id,
                        &options,
                        self.selection_timeout,
                    )
                    .await?
                };

                // La sesión pudo cerrarse mientras se elegía
                if session.is_terminated() || !session.is_connected() {
                    return Err(PlayerError::NotConnected);
                }

                let info = options.swap_remove(index);
                let card = embeds::track_added_card(&info, front);
                info!("🎵 '{}' encolada en guild {}", info.title, ctx.guild_id);
                session.enqueue(vec![Track::new(info, origin)], front).await;
                Ok(Reply::card(card).delete_after(Duration::from_secs(10)))
            }
        }
    }

    /// Vuelve a publicar el mensaje de estado al final del canal.
    pub async fn now_playing(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        if session.current().is_none() {
            return Err(PlayerError::NothingPlaying);
        }

        let text = if session.now_playing().await {
            "📻 Estado publicado"
        } else {
            "⏳ El estado ya se está actualizando"
        };
        Ok(Reply::text(text).ephemeral().delete_after(Duration::from_secs(5)))
    }

    pub async fn pause(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        if session.is_paused() {
            return Ok(reply::unchanged_notice(VoteCommand::Pause));
        }
        controls::vote_gated(&session, VoteCommand::Pause, ctx.user_id).await
    }

    pub async fn resume(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        if !session.is_paused() {
            return Ok(reply::unchanged_notice(VoteCommand::Resume));
        }
        controls::vote_gated(&session, VoteCommand::Resume, ctx.user_id).await
    }

    /// Salta el track actual y descarta `count - 1` de la cola.
    pub async fn skip(&self, ctx: &CommandContext, count: usize) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        let count = count.max(1);
        if count == 1 {
            return controls::vote_gated(&session, VoteCommand::Skip, ctx.user_id).await;
        }

        let privileged = self.transport().is_privileged(ctx.guild_id, ctx.user_id);
        let decision = session.vote(VoteCommand::Skip, ctx.user_id, privileged);
        if let Some(notice) = reply::vote_notice(VoteCommand::Skip, ctx.user_id, decision) {
            return Ok(notice);
        }

        let dropped = session.skip(count).await?;
        Ok(Reply::text(format!("⏭️ <@{}> saltó {} canciones", ctx.user_id, dropped + 1))
            .delete_after(Duration::from_secs(10)))
    }

    pub async fn stop(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        controls::vote_gated(&session, VoteCommand::Stop, ctx.user_id).await
    }

    pub async fn shuffle(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        controls::vote_gated(&session, VoteCommand::Shuffle, ctx.user_id).await
    }

    pub async fn repeat(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        controls::vote_gated(&session, VoteCommand::Repeat, ctx.user_id).await
    }

    /// Fija el volumen; por encima de 100 pide confirmación a quien lo pidió.
    pub async fn set_volume(&self, ctx: &CommandContext, value: i64) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        let privileged = self.transport().is_privileged(ctx.guild_id, ctx.user_id);

        if !privileged && !session.listeners().contains(&ctx.user_id) {
            return Err(PlayerError::input("No estás en mi canal de voz"));
        }

        let volume = match session.set_volume(value, false, privileged).await? {
            VolumeOutcome::Applied(volume) => volume,
            VolumeOutcome::NeedsConfirmation(volume) => {
                let question = format!(
                    "¿Subir el volumen a **{}%**? Los volúmenes altos pueden dañar la audición",
                    volume
                );
                let accepted = prompts::confirm(
                    self.transport(),
                    ctx.channel_id,
                    ctx.user_id,
                    &question,
                    self.confirmation_timeout,
                )
                .await?;

                if !accepted {
                    return Ok(Reply::text("🔈 Volumen sin cambios").delete_after(Duration::from_secs(5)));
                }

                match session.set_volume(value, true, privileged).await? {
                    VolumeOutcome::Applied(volume) | VolumeOutcome::NeedsConfirmation(volume) => volume,
                }
            }
        };

        Ok(Reply::text(format!("🔊 <@{}> fijó el volumen en **{}%**", ctx.user_id, volume))
            .delete_after(Duration::from_secs(10)))
    }

    pub async fn volume_up(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        let step = session.volume_up().await?;
        Ok(reply::volume_step_notice(ctx.user_id, step))
    }

    pub async fn volume_down(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        let step = session.volume_down().await?;
        Ok(reply::volume_step_notice(ctx.user_id, step))
    }

    pub async fn show_queue(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        Ok(Reply::card(embeds::queue_card(&session.queue_listing(), chrono::Utc::now())))
    }

    pub async fn toggle_loop(&self, ctx: &CommandContext, enabled: Option<bool>) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        let looping = session.set_loop(enabled).await;
        Ok(reply::loop_notice(ctx.user_id, looping))
    }

    /// Conserva solo los primeros `keep` tracks de la cola.
    pub async fn clear(&self, ctx: &CommandContext, keep: usize) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        let removed = session.clear(keep).await;
        Ok(Reply::text(format!("🧹 Se quitaron {} canciones de la cola", removed))
            .delete_after(Duration::from_secs(10)))
    }

    pub async fn set_equalizer(&self, ctx: &CommandContext, name: &str) -> PlayerResult<Reply> {
        let session = self.session(ctx.guild_id)?;
        let preset: EqualizerPreset = name.parse()?;
        session.set_equalizer(preset).await?;
        Ok(Reply::text(format!("🎛️ Ecualizador en **{}** - <@{}>", preset, ctx.user_id))
            .delete_after(Duration::from_secs(10)))
    }

    pub async fn seek(&self, ctx: &CommandContext, time: &str) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        let position = parse_song_time(time).ok_or_else(|| PlayerError::input(SEEK_HELP))?;

        session.seek(position).await?;
        let text = if position.is_zero() {
            format!("⏮️ <@{}> reinició la canción desde el principio", ctx.user_id)
        } else {
            format!("⏩ <@{}> llevó la canción a `{}`", ctx.user_id, embeds::format_duration(position))
        };
        Ok(Reply::text(text).delete_after(Duration::from_secs(10)))
    }

    pub async fn fast_forward(&self, ctx: &CommandContext, time: &str) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        let amount = parse_song_time(time).ok_or_else(|| PlayerError::input(SEEK_HELP))?;

        let now = session.fast_forward(amount).await?;
        Ok(Reply::text(format!(
            "⏩ <@{}> adelantó la canción `{}` (ahora en `{}`)",
            ctx.user_id,
            embeds::format_duration(amount),
            embeds::format_duration(now)
        ))
        .delete_after(Duration::from_secs(10)))
    }

    pub async fn rewind(&self, ctx: &CommandContext, time: &str) -> PlayerResult<Reply> {
        let session = self.playing_session(ctx.guild_id)?;
        let amount = parse_song_time(time).ok_or_else(|| PlayerError::input(SEEK_HELP))?;

        let now = session.rewind(amount).await?;
        let text = if now.is_zero() {
            format!("⏮️ <@{}> reinició la canción desde el principio", ctx.user_id)
        } else {
            format!(
                "⏪ <@{}> retrocedió la canción `{}` (ahora en `{}`)",
                ctx.user_id,
                embeds::format_duration(amount),
                embeds::format_duration(now)
            )
        };
        Ok(Reply::text(text).delete_after(Duration::from_secs(10)))
    }

    pub async fn playlist(&self, ctx: &CommandContext, action: PlaylistAction) -> PlayerResult<Reply> {
        match action {
            PlaylistAction::Show(name) => {
                let url = self
                    .store
                    .lookup_playlist(ctx.user_id, &name)
                    .await
                    .map_err(PlayerError::Storage)?;

                match url {
                    Some(url) => self.play(ctx, &url, false).await,
                    None => {
                        let listing = self.playlist_listing(ctx.user_id).await?;
                        Ok(listing.with_text(format!(
                            "🔍 No encontré una playlist llamada `{}`. Estas son las disponibles:",
                            name.trim().to_lowercase()
                        )))
                    }
                }
            }
            PlaylistAction::Add { name, url, private } => {
                let playlist = SavedPlaylist::new(ctx.user_id, &name, url, private);
                let (name, url) = (playlist.name.clone(), playlist.url.clone());

                match self
                    .store
                    .insert_playlist(playlist)
                    .await
                    .map_err(PlayerError::Storage)?
                {
                    InsertOutcome::Inserted => Ok(Reply::text(format!(
                        "💾 Playlist `{}` guardada con el enlace `{}`",
                        name, url
                    ))),
                    InsertOutcome::Duplicate => Err(PlayerError::Duplicate(format!(
                        "ya tienes una playlist llamada `{}`",
                        name
                    ))),
                }
            }
            PlaylistAction::Remove(name) => {
                let name = name.trim().to_lowercase();
                match self
                    .store
                    .delete_playlist(ctx.user_id, &name)
                    .await
                    .map_err(PlayerError::Storage)?
                {
                    DeleteOutcome::Deleted => Ok(Reply::text(format!("🗑️ Playlist `{}` eliminada", name))),
                    DeleteOutcome::NotFound => {
                        Err(PlayerError::NotFound(format!("tu playlist `{}`", name)))
                    }
                }
            }
            PlaylistAction::List => self.playlist_listing(ctx.user_id).await.map(Reply::from),
        }
    }

    async fn playlist_listing(&self, user: UserId) -> PlayerResult<PlaylistListing> {
        let playlists = self
            .store
            .list_playlists(user)
            .await
            .map_err(PlayerError::Storage)?;

        if playlists.is_empty() {
            return Ok(PlaylistListing(Reply::text("📭 No hay playlists guardadas")));
        }
        Ok(PlaylistListing(Reply::card(embeds::playlists_card(&playlists))))
    }

    /// Activa o desactiva el regreso automático desde el canal AFK.
    pub async fn toggle_noafk(&self, ctx: &CommandContext) -> PlayerResult<Reply> {
        let enabled = self
            .store
            .toggle_opt_in(ctx.user_id)
            .await
            .map_err(PlayerError::Storage)?;

        let text = if enabled {
            "➕ Te devolveré al canal de música cuando te manden a AFK"
        } else {
            "➖ Ya no te devolveré al canal de música cuando te manden a AFK"
        };
        Ok(Reply::text(text).ephemeral())
    }

    /// Sigue al bot cuando alguien lo mueve de canal; si lo desconectan, cierra
    /// la sesión del guild.
    pub async fn handle_bot_moved(&self, guild_id: GuildId, channel: Option<ChannelId>) {
        match channel {
            Some(channel) => {
                if let Some(session) = self.registry.get(guild_id) {
                    session.follow_voice_channel(channel);
                }
            }
            None => {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                self.registry.remove(guild_id).await;
            }
        }
    }

    /// Devuelve al canal de la sesión a un miembro inscrito que fue movido al
    /// canal AFK. Devuelve `true` si lo movió.
    pub async fn handle_member_moved(
        &self,
        guild_id: GuildId,
        user: UserId,
        before: Option<ChannelId>,
        after: Option<ChannelId>,
    ) -> bool {
        let (Some(before), Some(after)) = (before, after) else {
            return false;
        };

        let Some(session) = self.registry.get(guild_id) else {
            return false;
        };
        let Some(music_channel) = session.voice_channel() else {
            return false;
        };
        let Some(afk) = self.transport().afk_channel(guild_id) else {
            return false;
        };

        if before != music_channel || after != afk {
            return false;
        }

        match self.store.opt_in_users().await {
            Ok(users) if users.contains(&user) => {}
            Ok(_) => return false,
            Err(e) => {
                warn!("No se pudo leer la lista noafk: {}", e);
                return false;
            }
        }

        match self.transport().move_member(guild_id, user, music_channel).await {
            Ok(()) => {
                info!("↩️ Anti-AFK: {} devuelto a {} en guild {}", user, music_channel, guild_id);
                true
            }
            Err(e) => {
                debug!("No se pudo devolver a {}: {}", user, e);
                false
            }
        }
    }
}

/// Listado de playlists, que `/playlist <nombre>` reutiliza cuando no encuentra el nombre.
struct PlaylistListing(Reply);

impl PlaylistListing {
    fn with_text(self, text: String) -> Reply {
        let mut reply = self.0;
        reply.message = reply.message.with_text(text);
        reply
    }
}

impl From<PlaylistListing> for Reply {
    fn from(listing: PlaylistListing) -> Self {
        listing.0
    }
}

/// Interpreta `s`, `m:s` o `h:m:s`.
pub fn parse_song_time(input: &str) -> Option<Duration> {
    let parts = input
        .trim()
        .split(':')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    let seconds = match parts.as_slice() {
        [s] => *s,
        [m, s] => m.checked_mul(60)?.checked_add(*s)?,
        [h, m, s] => h
            .checked_mul(3600)?
            .checked_add(m.checked_mul(60)?)?
            .checked_add(*s)?,
        _ => return None,
    };
    Some(Duration::from_secs(seconds))
}
