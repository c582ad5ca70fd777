//! Fakes en memoria para los tests: transporte de Discord, backend de audio y
//! un arnés que arma el registro con ambos.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::sync::broadcast;

use crate::{
    bot::transport::{OutgoingMessage, ReactionEvent, Transport},
    config::PlayerSettings,
    player::{
        backend::{AudioBackend, SearchResult},
        equalizer::EqualizerPreset,
        events::PlaybackToken,
        registry::SessionRegistry,
        session::Session,
        track::{RequestOrigin, Track, TrackInfo},
    },
};

pub const GUILD: GuildId = GuildId::new(1);
pub const VOICE: ChannelId = ChannelId::new(10);
pub const TEXT: ChannelId = ChannelId::new(100);
pub const BOT: UserId = UserId::new(999);

pub fn info(title: &str, seconds: Option<u64>) -> TrackInfo {
    TrackInfo {
        id: title.to_string(),
        title: title.to_string(),
        author: "Artista".to_string(),
        duration: seconds.map(Duration::from_secs),
        uri: format!("https://youtu.be/{}", title.replace(' ', "_")),
        thumbnail: None,
    }
}

pub fn origin() -> RequestOrigin {
    RequestOrigin {
        requester: UserId::new(1),
        channel: TEXT,
        message: None,
    }
}

/// Track de 3:00 pedido por el usuario 1 en el canal de texto de prueba
pub fn track(title: &str) -> Track {
    track_with_length(title, 180)
}

pub fn track_with_length(title: &str, seconds: u64) -> Track {
    Track::new(info(title, Some(seconds)), origin())
}

#[derive(Debug, Clone)]
struct FakeMessage {
    channel: ChannelId,
    id: MessageId,
    content: Option<String>,
    deleted: bool,
}

#[derive(Default)]
struct TransportState {
    next_id: u64,
    messages: Vec<FakeMessage>,
    sent_texts: Vec<String>,
    status_renders: usize,
    fail_edits: bool,
    latency: Duration,
    listeners: Vec<UserId>,
    privileged: HashSet<UserId>,
    member_channels: HashMap<UserId, ChannelId>,
    afk_channel: Option<ChannelId>,
    moves: Vec<(UserId, ChannelId)>,
    reactions: HashMap<MessageId, Vec<String>>,
    removed_reactions: Vec<(MessageId, UserId, String)>,
    joined: Vec<ChannelId>,
    left: usize,
}

/// Transporte en memoria: guarda los mensajes y deja inyectar reacciones.
pub struct FakeTransport {
    state: Mutex<TransportState>,
    reactions: broadcast::Sender<ReactionEvent>,
}

impl FakeTransport {
    pub fn new() -> Self {
        let (reactions, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(TransportState {
                next_id: 1000,
                ..Default::default()
            }),
            reactions,
        }
    }

    pub fn fail_edits(&self, fail: bool) {
        self.state.lock().fail_edits = fail;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Miembros humanos en el canal de voz de la sesión
    pub fn set_listeners(&self, users: Vec<u64>) {
        let mut state = self.state.lock();
        state.listeners = users.iter().copied().map(UserId::new).collect();
        for user in &users {
            state.member_channels.insert(UserId::new(*user), VOICE);
        }
    }

    pub fn set_privileged(&self, users: Vec<u64>) {
        self.state.lock().privileged = users.into_iter().map(UserId::new).collect();
    }

    pub fn set_afk_channel(&self, channel: ChannelId) {
        self.state.lock().afk_channel = Some(channel);
    }

    pub fn place_member(&self, user: u64, channel: ChannelId) {
        self.state.lock().member_channels.insert(UserId::new(user), channel);
    }

    pub fn moves(&self) -> Vec<(UserId, ChannelId)> {
        self.state.lock().moves.clone()
    }

    pub fn joined(&self) -> Vec<ChannelId> {
        self.state.lock().joined.clone()
    }

    pub fn left_voice(&self) -> usize {
        self.state.lock().left
    }

    pub fn live_messages(&self, channel: ChannelId) -> Vec<MessageId> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.channel == channel && !m.deleted)
            .map(|m| m.id)
            .collect()
    }

    pub fn live_message_count(&self) -> usize {
        self.state.lock().messages.iter().filter(|m| !m.deleted).count()
    }

    pub fn is_live(&self, id: MessageId) -> bool {
        self.state
            .lock()
            .messages
            .iter()
            .any(|m| m.id == id && !m.deleted)
    }

    pub fn content_of(&self, channel: ChannelId, id: MessageId) -> Option<String> {
        self.state
            .lock()
            .messages
            .iter()
            .find(|m| m.channel == channel && m.id == id && !m.deleted)
            .and_then(|m| m.content.clone())
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.state.lock().sent_texts.clone()
    }

    pub fn live_texts_containing(&self, needle: &str) -> usize {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| !m.deleted && m.content.as_deref().is_some_and(|c| c.contains(needle)))
            .count()
    }

    /// Envíos y ediciones con tarjeta
    pub fn status_renders(&self) -> usize {
        self.state.lock().status_renders
    }

    pub fn reactions_on(&self, message: MessageId) -> Vec<String> {
        self.state
            .lock()
            .reactions
            .get(&message)
            .cloned()
            .unwrap_or_default()
    }

    pub fn removed_reactions(&self) -> Vec<(MessageId, UserId, String)> {
        self.state.lock().removed_reactions.clone()
    }

    /// Simula que `user` reaccionó con `emoji` al mensaje
    pub fn react(&self, message: MessageId, user: u64, emoji: &str) {
        let channel = self
            .state
            .lock()
            .messages
            .iter()
            .find(|m| m.id == message)
            .map_or(TEXT, |m| m.channel);

        let _ = self.reactions.send(ReactionEvent {
            guild_id: Some(GUILD),
            channel_id: channel,
            message_id: message,
            user_id: UserId::new(user),
            emoji: emoji.to_string(),
        });
    }

    async fn delay(&self) {
        let latency = self.state.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn bot_user_id(&self) -> UserId {
        BOT
    }

    async fn send_message(&self, channel: ChannelId, message: OutgoingMessage) -> Result<MessageId> {
        self.delay().await;
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = MessageId::new(state.next_id);
        if message.card.is_some() {
            state.status_renders += 1;
        }
        if let Some(text) = &message.content {
            state.sent_texts.push(text.clone());
        }
        state.messages.push(FakeMessage {
            channel,
            id,
            content: message.content,
            deleted: false,
        });
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: OutgoingMessage,
    ) -> Result<()> {
        self.delay().await;
        let mut state = self.state.lock();
        if state.fail_edits {
            return Err(anyhow!("Unknown Message"));
        }
        if content.card.is_some() {
            state.status_renders += 1;
        }
        let target = state
            .messages
            .iter_mut()
            .find(|m| m.channel == channel && m.id == message && !m.deleted)
            .ok_or_else(|| anyhow!("Unknown Message"))?;
        target.content = content.content;
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        self.delay().await;
        let mut state = self.state.lock();
        let target = state
            .messages
            .iter_mut()
            .find(|m| m.channel == channel && m.id == message && !m.deleted)
            .ok_or_else(|| anyhow!("Unknown Message"))?;
        target.deleted = true;
        Ok(())
    }

    async fn recent_message_ids(&self, channel: ChannelId, limit: u8) -> Result<Vec<MessageId>> {
        self.delay().await;
        Ok(self
            .state
            .lock()
            .messages
            .iter()
            .rev()
            .filter(|m| m.channel == channel && !m.deleted)
            .take(usize::from(limit))
            .map(|m| m.id)
            .collect())
    }

    async fn add_reaction(&self, _channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        self.state
            .lock()
            .reactions
            .entry(message)
            .or_default()
            .push(emoji.to_string());
        Ok(())
    }

    async fn remove_reaction(
        &self,
        _channel: ChannelId,
        message: MessageId,
        user: UserId,
        emoji: &str,
    ) -> Result<()> {
        self.state
            .lock()
            .removed_reactions
            .push((message, user, emoji.to_string()));
        Ok(())
    }

    fn subscribe_reactions(&self) -> broadcast::Receiver<ReactionEvent> {
        self.reactions.subscribe()
    }

    fn voice_members(&self, _guild: GuildId, channel: ChannelId) -> Vec<UserId> {
        let state = self.state.lock();
        state
            .listeners
            .iter()
            .copied()
            .filter(|user| state.member_channels.get(user) == Some(&channel))
            .collect()
    }

    fn member_voice_channel(&self, _guild: GuildId, user: UserId) -> Option<ChannelId> {
        self.state.lock().member_channels.get(&user).copied()
    }

    fn afk_channel(&self, _guild: GuildId) -> Option<ChannelId> {
        self.state.lock().afk_channel
    }

    fn is_privileged(&self, _guild: GuildId, user: UserId) -> bool {
        self.state.lock().privileged.contains(&user)
    }

    async fn move_member(&self, _guild: GuildId, user: UserId, channel: ChannelId) -> Result<()> {
        let mut state = self.state.lock();
        state.moves.push((user, channel));
        state.member_channels.insert(user, channel);
        Ok(())
    }

    async fn join_voice(&self, _guild: GuildId, channel: ChannelId) -> Result<()> {
        self.state.lock().joined.push(channel);
        Ok(())
    }

    async fn leave_voice(&self, _guild: GuildId) -> Result<()> {
        self.state.lock().left += 1;
        Ok(())
    }
}

#[derive(Default)]
struct BackendState {
    played: Vec<(PlaybackToken, String)>,
    fail_next_play: bool,
    paused: Option<bool>,
    volume: Option<u16>,
    equalizer: Option<EqualizerPreset>,
    position: Duration,
    last_seek: Option<Duration>,
    stops: usize,
    results: HashMap<String, SearchResult>,
    searches: VecDeque<String>,
}

/// Backend que registra las llamadas; los eventos los inyecta el test.
#[derive(Default)]
pub struct FakeBackend {
    state: Mutex<BackendState>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_play(&self) {
        self.state.lock().fail_next_play = true;
    }

    pub fn last_token(&self) -> Option<PlaybackToken> {
        self.state.lock().played.last().map(|(token, _)| *token)
    }

    pub fn played_titles(&self) -> Vec<String> {
        self.state
            .lock()
            .played
            .iter()
            .map(|(_, title)| title.clone())
            .collect()
    }

    pub fn paused(&self) -> Option<bool> {
        self.state.lock().paused
    }

    pub fn volume(&self) -> Option<u16> {
        self.state.lock().volume
    }

    pub fn equalizer(&self) -> Option<EqualizerPreset> {
        self.state.lock().equalizer
    }

    pub fn set_position(&self, position: Duration) {
        self.state.lock().position = position;
    }

    pub fn last_seek(&self) -> Option<Duration> {
        self.state.lock().last_seek
    }

    pub fn stops(&self) -> usize {
        self.state.lock().stops
    }

    pub fn set_result(&self, query: &str, result: SearchResult) {
        self.state.lock().results.insert(query.to_string(), result);
    }

    pub fn searches(&self) -> Vec<String> {
        self.state.lock().searches.iter().cloned().collect()
    }
}

#[async_trait]
impl AudioBackend for FakeBackend {
    async fn search(&self, query: &str) -> Result<SearchResult> {
        let mut state = self.state.lock();
        state.searches.push_back(query.to_string());
        Ok(state
            .results
            .get(query)
            .cloned()
            .unwrap_or(SearchResult::Tracks(Vec::new())))
    }

    async fn play(&self, _guild_id: GuildId, token: PlaybackToken, track: &Track) -> Result<()> {
        let mut state = self.state.lock();
        state.played.push((token, track.title().to_string()));
        state.position = Duration::ZERO;
        if std::mem::take(&mut state.fail_next_play) {
            return Err(anyhow!("no se pudo cargar {}", track.title()));
        }
        Ok(())
    }

    async fn pause(&self, _guild_id: GuildId, paused: bool) -> Result<()> {
        self.state.lock().paused = Some(paused);
        Ok(())
    }

    async fn seek(&self, _guild_id: GuildId, position: Duration) -> Result<()> {
        let mut state = self.state.lock();
        state.last_seek = Some(position);
        state.position = position;
        Ok(())
    }

    async fn position(&self, _guild_id: GuildId) -> Result<Duration> {
        Ok(self.state.lock().position)
    }

    async fn set_volume(&self, _guild_id: GuildId, volume: u16) -> Result<()> {
        self.state.lock().volume = Some(volume);
        Ok(())
    }

    async fn set_equalizer(&self, _guild_id: GuildId, preset: EqualizerPreset) -> Result<()> {
        self.state.lock().equalizer = Some(preset);
        Ok(())
    }

    async fn stop(&self, _guild_id: GuildId) -> Result<()> {
        self.state.lock().stops += 1;
        Ok(())
    }
}

/// Registro armado con los fakes.
pub struct Harness {
    pub transport: Arc<FakeTransport>,
    pub backend: Arc<FakeBackend>,
    pub registry: Arc<SessionRegistry>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(PlayerSettings::default())
    }

    pub fn with_settings(settings: PlayerSettings) -> Self {
        let transport = Arc::new(FakeTransport::new());
        let backend = Arc::new(FakeBackend::new());
        let registry = SessionRegistry::new(backend.clone(), transport.clone(), settings);
        Self {
            transport,
            backend,
            registry,
        }
    }

    /// Sesión del guild de prueba, conectada al canal de voz de prueba
    pub async fn session(&self) -> Arc<Session> {
        let session = self.registry.get_or_create(GUILD);
        if let Err(e) = session.connect(VOICE).await {
            panic!("no se pudo conectar: {e}");
        }
        session
    }

    /// Deja correr las tareas pendientes sin avanzar el reloj
    pub async fn settle(&self) {
        for _ in 0..100 {
            tokio::task::yield_now().await;
        }
    }
}
