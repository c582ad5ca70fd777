//! # Transport
//!
//! Everything the player needs from Discord, behind one trait.
//!
//! The playback controller never talks to serenity directly: it sends and edits
//! messages, reads reaction events and asks about voice membership through
//! [`Transport`]. [`SerenityTransport`] is the production implementation; the
//! tests use an in-memory fake.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serenity::{
    all::{
        Cache, ChannelId, CreateMessage, EditMessage, GetMessages, GuildId, Http, MessageId,
        Reaction, ReactionType, RoleId, UserId,
    },
};
use songbird::{error::JoinError, Songbird};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ui::embeds::Card;

/// Capacidad del canal de reacciones; los receptores lentos pierden las más viejas
const REACTION_CHANNEL_CAPACITY: usize = 256;

/// Contenido de un mensaje saliente: texto, tarjeta o ambos.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub content: Option<String>,
    pub card: Option<Card>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            card: None,
        }
    }

    pub fn card(card: Card) -> Self {
        Self {
            content: None,
            card: Some(card),
        }
    }

    pub fn with_text(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }
}

/// Una reacción agregada a un mensaje.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionEvent {
    pub guild_id: Option<GuildId>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub user_id: UserId,
    /// Representación en texto del emoji (unicode tal cual)
    pub emoji: String,
}

/// Operaciones de chat y voz que consume el reproductor.
///
/// Los errores de borrado/edición se devuelven tal cual; es el llamador quien
/// decide si un mensaje que ya no existe es un problema.
#[async_trait]
pub trait Transport: Send + Sync {
    fn bot_user_id(&self) -> UserId;

    async fn send_message(&self, channel: ChannelId, message: OutgoingMessage) -> Result<MessageId>;

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: OutgoingMessage,
    ) -> Result<()>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()>;

    /// Ids de los `limit` mensajes más recientes del canal, del más nuevo al más viejo
    async fn recent_message_ids(&self, channel: ChannelId, limit: u8) -> Result<Vec<MessageId>>;

    async fn add_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()>;

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        user: UserId,
        emoji: &str,
    ) -> Result<()>;

    fn subscribe_reactions(&self) -> broadcast::Receiver<ReactionEvent>;

    /// Miembros humanos conectados al canal de voz
    fn voice_members(&self, guild: GuildId, channel: ChannelId) -> Vec<UserId>;

    fn member_voice_channel(&self, guild: GuildId, user: UserId) -> Option<ChannelId>;

    fn afk_channel(&self, guild: GuildId) -> Option<ChannelId>;

    /// `true` si el miembro puede gestionar el servidor (o es el dueño)
    fn is_privileged(&self, guild: GuildId, user: UserId) -> bool;

    async fn move_member(&self, guild: GuildId, user: UserId, channel: ChannelId) -> Result<()>;

    async fn join_voice(&self, guild: GuildId, channel: ChannelId) -> Result<()>;

    async fn leave_voice(&self, guild: GuildId) -> Result<()>;
}

/// [`Transport`] sobre la API HTTP y la caché de serenity, con songbird para voz.
pub struct SerenityTransport {
    http: Arc<Http>,
    cache: Arc<Cache>,
    songbird: Arc<Songbird>,
    bot_id: UserId,
    reactions: broadcast::Sender<ReactionEvent>,
}

impl SerenityTransport {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>, songbird: Arc<Songbird>, bot_id: UserId) -> Self {
        let (reactions, _) = broadcast::channel(REACTION_CHANNEL_CAPACITY);
        Self {
            http,
            cache,
            songbird,
            bot_id,
            reactions,
        }
    }

    /// Publica una reacción del gateway para los listeners suscritos.
    pub fn forward_reaction(&self, reaction: &Reaction) {
        let Some(user_id) = reaction.user_id else {
            return;
        };

        let event = ReactionEvent {
            guild_id: reaction.guild_id,
            channel_id: reaction.channel_id,
            message_id: reaction.message_id,
            user_id,
            emoji: reaction.emoji.to_string(),
        };

        // Sin suscriptores no hay nadie esperando, no es un error
        let _ = self.reactions.send(event);
    }

    fn build_message(message: OutgoingMessage) -> CreateMessage {
        let mut builder = CreateMessage::new();
        if let Some(content) = message.content {
            builder = builder.content(content);
        }
        if let Some(card) = message.card {
            builder = builder.embed(card.to_embed());
        }
        builder
    }
}

#[async_trait]
impl Transport for SerenityTransport {
    fn bot_user_id(&self) -> UserId {
        self.bot_id
    }

    async fn send_message(&self, channel: ChannelId, message: OutgoingMessage) -> Result<MessageId> {
        let sent = channel
            .send_message(&self.http, Self::build_message(message))
            .await?;
        Ok(sent.id)
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        content: OutgoingMessage,
    ) -> Result<()> {
        // Editar sin texto lo borra, igual que al reemplazar el mensaje
        let mut builder = EditMessage::new().content(content.content.unwrap_or_default());
        if let Some(card) = content.card {
            builder = builder.embed(card.to_embed());
        }
        channel.edit_message(&self.http, message, builder).await?;
        Ok(())
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        channel.delete_message(&self.http, message).await?;
        Ok(())
    }

    async fn recent_message_ids(&self, channel: ChannelId, limit: u8) -> Result<Vec<MessageId>> {
        let messages = channel
            .messages(&self.http, GetMessages::new().limit(limit))
            .await?;
        Ok(messages.into_iter().map(|m| m.id).collect())
    }

    async fn add_reaction(&self, channel: ChannelId, message: MessageId, emoji: &str) -> Result<()> {
        channel
            .create_reaction(&self.http, message, ReactionType::Unicode(emoji.to_string()))
            .await?;
        Ok(())
    }

    async fn remove_reaction(
        &self,
        channel: ChannelId,
        message: MessageId,
        user: UserId,
        emoji: &str,
    ) -> Result<()> {
        channel
            .delete_reaction(
                &self.http,
                message,
                Some(user),
                ReactionType::Unicode(emoji.to_string()),
            )
            .await?;
        Ok(())
    }

    fn subscribe_reactions(&self) -> broadcast::Receiver<ReactionEvent> {
        self.reactions.subscribe()
    }

    fn voice_members(&self, guild: GuildId, channel: ChannelId) -> Vec<UserId> {
        let Some(guild) = self.cache.guild(guild) else {
            return Vec::new();
        };

        guild
            .voice_states
            .iter()
            .filter(|(_, state)| state.channel_id == Some(channel))
            .filter(|(user_id, state)| {
                let is_bot = state
                    .member
                    .as_ref()
                    .map(|m| m.user.bot)
                    .or_else(|| guild.members.get(*user_id).map(|m| m.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .map(|(user_id, _)| *user_id)
            .collect()
    }

    fn member_voice_channel(&self, guild: GuildId, user: UserId) -> Option<ChannelId> {
        self.cache
            .guild(guild)?
            .voice_states
            .get(&user)
            .and_then(|state| state.channel_id)
    }

    fn afk_channel(&self, guild: GuildId) -> Option<ChannelId> {
        self.cache
            .guild(guild)?
            .afk_metadata
            .as_ref()
            .map(|afk| afk.afk_channel_id)
    }

    fn is_privileged(&self, guild_id: GuildId, user: UserId) -> bool {
        let Some(guild) = self.cache.guild(guild_id) else {
            return false;
        };

        if guild.owner_id == user {
            return true;
        }

        let Some(member) = guild.members.get(&user) else {
            return false;
        };

        // @everyone comparte id con el guild
        let everyone = RoleId::new(guild_id.get());
        std::iter::once(&everyone)
            .chain(member.roles.iter())
            .filter_map(|role_id| guild.roles.get(role_id))
            .any(|role| role.permissions.manage_guild() || role.permissions.administrator())
    }

    async fn move_member(&self, guild: GuildId, user: UserId, channel: ChannelId) -> Result<()> {
        guild.move_member(&self.http, user, channel).await?;
        info!("↩️ Miembro {} devuelto al canal {}", user, channel);
        Ok(())
    }

    async fn join_voice(&self, guild: GuildId, channel: ChannelId) -> Result<()> {
        self.songbird
            .join(guild, channel)
            .await
            .map_err(|e| anyhow!("Error al conectar al canal de voz: {:?}", e))?;
        info!("🔊 Conectado al canal de voz en guild {}", guild);
        Ok(())
    }

    async fn leave_voice(&self, guild: GuildId) -> Result<()> {
        match self.songbird.remove(guild).await {
            Ok(()) => {
                info!("👋 Desconectado del canal de voz en guild {}", guild);
                Ok(())
            }
            Err(JoinError::NoCall) => {
                debug!("Sin llamada activa en guild {}", guild);
                Ok(())
            }
            Err(e) => {
                warn!("Error al desconectar de voz en guild {}: {:?}", guild, e);
                Err(anyhow!("Error al desconectar: {:?}", e))
            }
        }
    }
}
