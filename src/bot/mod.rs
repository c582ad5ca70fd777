//! # Bot Module
//!
//! Discord front end for Open Music Bot.
//!
//! This module contains:
//! - Slash command registration ([`commands`]) and dispatch ([`handlers`])
//! - The command surface shared by every entry point ([`service`])
//! - The chat/voice transport the player talks through ([`transport`])
//! - Gateway event handling (ready, interactions, reactions, voice state updates)
//!
//! ## Architecture
//!
//! [`OpenMusicBot`] implements Serenity's [`EventHandler`] trait. The services
//! it routes to are built once the client exists (the transport needs the
//! client's HTTP and cache) and live in the client's data map as
//! [`BotServices`].

use anyhow::Result;
use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Reaction, Ready, VoiceState},
    async_trait,
    prelude::TypeMapKey,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod service;
pub mod transport;

use crate::config::Config;
use service::MusicService;
use transport::SerenityTransport;

/// Servicios que los eventos del gateway necesitan.
pub struct BotServices {
    pub service: Arc<MusicService>,
    pub transport: Arc<SerenityTransport>,
}

impl TypeMapKey for BotServices {
    type Value = Arc<BotServices>;
}

/// Main Discord bot handler for Open Music Bot.
pub struct OpenMusicBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
}

impl OpenMusicBot {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn services(ctx: &Context) -> Option<Arc<BotServices>> {
        let services = ctx.data.read().await.get::<BotServices>().cloned();
        if services.is_none() {
            warn!("⚠️ Evento recibido antes de inicializar los servicios");
        }
        services
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands are registered per guild when `GUILD_ID` is set (instant
    /// propagation, useful for development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registrando comandos slash...");
        info!("🔧 Application ID: {}", self.config.application_id);

        match self.config.guild_id {
            Some(guild_id) => {
                info!("🏠 Registrando comandos para guild específica: {}", guild_id);
                let guild_id = GuildId::from(guild_id);

                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ El bot no está en la guild especificada: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id).await.map_err(|e| {
                    error!("❌ Error registrando comandos de guild: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos de guild. Verifica que el bot tenga permisos de 'applications.commands' en la guild.")
                })?;
                info!("✅ Comandos de guild registrados para: {}", guild_id);
            }
            None => {
                info!("🌐 Registrando comandos globalmente");
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Error registrando comandos globales: {:?}", e);
                    anyhow::anyhow!("No se pudieron registrar comandos globales. Verifica que el bot tenga permisos de 'applications.commands'.")
                })?;
                info!("✅ Comandos globales registrados");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl EventHandler for OpenMusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error al registrar comandos: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Command(command) = interaction else {
            return;
        };
        let Some(services) = Self::services(&ctx).await else {
            return;
        };

        if let Err(e) = handlers::handle_command(&ctx, command, &services.service).await {
            error!("Error manejando comando: {:?}", e);
        }
    }

    /// Las reacciones alimentan el control remoto del mensaje de estado y los prompts.
    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        if let Some(services) = Self::services(&ctx).await {
            services.transport.forward_reaction(&reaction);
        }
    }

    /// Sigue los movimientos del bot (o cierra la sesión si lo desconectan) y aplica el anti-AFK.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let Some(services) = Self::services(&ctx).await else {
            return;
        };

        let current_user_id = ctx.cache.current_user().id;
        if new.user_id == current_user_id {
            services.service.handle_bot_moved(guild_id, new.channel_id).await;
            return;
        }

        let before = old.and_then(|state| state.channel_id);
        services
            .service
            .handle_member_moved(guild_id, new.user_id, before, new.channel_id)
            .await;
    }
}
