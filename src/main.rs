use anyhow::{Context, Result};
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod bot;
mod config;
mod error;
mod player;
mod storage;
mod ui;

#[cfg(test)]
mod testing;

use crate::bot::{service::MusicService, transport::SerenityTransport, BotServices, OpenMusicBot};
use crate::config::Config;
use crate::player::{events::EventRouter, registry::SessionRegistry, songbird_backend::SongbirdBackend};
use crate::storage::JsonStorage;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check().await;
    }

    info!("🎵 Iniciando Open Music Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    // Inicializar almacenamiento JSON
    let storage = Arc::new(JsonStorage::new(config.data_dir.clone()).await?);

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MESSAGE_REACTIONS;

    // Construir cliente
    let songbird = Songbird::serenity();
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(OpenMusicBot::new(config.clone()))
        .register_songbird_with(songbird.clone())
        .await
        .context("No se pudo construir el cliente de Discord")?;

    let bot_id = client.http.get_current_user().await?.id;
    info!("🤖 Bot ID: {}", bot_id);

    // Transporte, backend de audio y sesiones
    let transport = Arc::new(SerenityTransport::new(
        client.http.clone(),
        client.cache.clone(),
        songbird.clone(),
        bot_id,
    ));
    let (events, event_stream) = EventRouter::channel();
    let backend = Arc::new(SongbirdBackend::new(songbird, events));
    let registry = SessionRegistry::new(backend, transport.clone(), config.player_settings());

    tokio::spawn(EventRouter::new(registry.clone()).run(event_stream));

    let service = Arc::new(MusicService::new(
        registry.clone(),
        storage,
        config.selection_timeout,
        config.confirmation_timeout,
    )?);

    {
        let mut data = client.data.write().await;
        data.insert::<BotServices>(Arc::new(BotServices { service, transport }));
    }

    // Manejar shutdown graceful
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        registry.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    Ok(())
}

async fn health_check() -> Result<()> {
    // Verificar dependencias críticas
    let yt_dlp = async_process::Command::new("yt-dlp")
        .arg("--version")
        .output()
        .await?;

    let ffmpeg = async_process::Command::new("ffmpeg")
        .arg("-version")
        .output()
        .await?;

    if yt_dlp.status.success() && ffmpeg.status.success() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("Dependencias faltantes");
    }
}
