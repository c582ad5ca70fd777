use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{application::CommandOptionType, id::GuildId},
    prelude::Context,
};

use crate::player::equalizer::EqualizerPreset;

/// Registra comandos globales
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    for command in all_commands() {
        ctx.http.create_global_command(&command).await?;
    }

    Ok(())
}

/// Registra comandos para una guild específica (desarrollo)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;

    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        join_command(),
        play_command(),
        playnext_command(),
        nowplaying_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        stop_command(),
        volume_command(),
        volup_command(),
        voldown_command(),
        queue_command(),
        shuffle_command(),
        repeat_command(),
        loop_command(),
        clear_command(),
        equalizer_command(),
        seek_command(),
        ff_command(),
        rewind_command(),
        playlist_command(),
        noafk_command(),
    ]
}

// Comandos de reproducción

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Reproduce una canción o playlist")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn playnext_command() -> CreateCommand {
    CreateCommand::new("playnext")
        .description("Agrega una canción o playlist al frente de la cola")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::String,
                "query",
                "URL o término de búsqueda",
            )
            .required(true),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Vuelve a mostrar el reproductor al final del canal")
}

// Comandos de control (votables)

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pausa la reproducción actual")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Reanuda la reproducción pausada")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip")
        .description("Salta a la siguiente canción")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "amount",
                "Número de canciones a saltar",
            )
            .min_int_value(1)
            .max_int_value(100),
        )
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Detiene la música, limpia la cola y desconecta")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Mezcla la cola")
}

fn repeat_command() -> CreateCommand {
    CreateCommand::new("repeat").description("Repite la canción actual una vez más")
}

// Comandos de cola

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue").description("Muestra las próximas canciones")
}

fn loop_command() -> CreateCommand {
    CreateCommand::new("loop")
        .description("Activa/desactiva el loop de toda la cola")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Boolean,
            "enabled",
            "Forzar encendido o apagado (sin valor alterna)",
        ))
}

fn clear_command() -> CreateCommand {
    CreateCommand::new("clear")
        .description("Limpia la cola dejando las primeras canciones")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "keep",
                "Cuántas canciones conservar (0 por defecto)",
            )
            .min_int_value(0),
        )
}

// Comandos de audio

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Ajusta el volumen de reproducción")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::Integer,
                "level",
                "Nivel de volumen (más de 100 requiere confirmación)",
            )
            .required(true)
            .max_int_value(1000),
        )
}

fn volup_command() -> CreateCommand {
    CreateCommand::new("volup").description("Sube el volumen un escalón")
}

fn voldown_command() -> CreateCommand {
    CreateCommand::new("voldown").description("Baja el volumen un escalón")
}

fn equalizer_command() -> CreateCommand {
    let mut preset =
        CreateCommandOption::new(CommandOptionType::String, "preset", "Preset de ecualizador")
            .required(true);
    for choice in EqualizerPreset::ALL {
        preset = preset.add_string_choice(choice.name(), choice.name());
    }

    CreateCommand::new("equalizer")
        .description("Configura el ecualizador")
        .add_option(preset)
}

fn seek_command() -> CreateCommand {
    CreateCommand::new("seek")
        .description("Salta a un momento de la canción")
        .add_option(time_option("Momento: 0, 4:30 o 1:15:10"))
}

fn ff_command() -> CreateCommand {
    CreateCommand::new("ff")
        .description("Adelanta la canción")
        .add_option(time_option("Cuánto adelantar: 10, 4:30 o 1:15:10"))
}

fn rewind_command() -> CreateCommand {
    CreateCommand::new("rewind")
        .description("Retrocede la canción")
        .add_option(time_option("Cuánto retroceder: 10, 4:30 o 1:15:10"))
}

fn time_option(description: &str) -> CreateCommandOption {
    CreateCommandOption::new(CommandOptionType::String, "time", description).required(true)
}

// Comandos de conexión

fn join_command() -> CreateCommand {
    CreateCommand::new("join")
        .description("Conecta el bot a tu canal de voz")
        .add_option(CreateCommandOption::new(
            CommandOptionType::Channel,
            "channel",
            "Canal de voz (por defecto el tuyo)",
        ))
}

// Playlists guardadas y anti-AFK

fn playlist_command() -> CreateCommand {
    let name = || {
        CreateCommandOption::new(CommandOptionType::String, "name", "Nombre de la playlist")
            .required(true)
    };

    CreateCommand::new("playlist")
        .description("Playlists guardadas")
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "show",
                "Reproduce una playlist guardada",
            )
            .add_sub_option(name()),
        )
        .add_option(
            CreateCommandOption::new(CommandOptionType::SubCommand, "add", "Guarda una playlist")
                .add_sub_option(name())
                .add_sub_option(
                    CreateCommandOption::new(CommandOptionType::String, "url", "Enlace")
                        .required(true),
                )
                .add_sub_option(CreateCommandOption::new(
                    CommandOptionType::Boolean,
                    "private",
                    "Solo visible para ti",
                )),
        )
        .add_option(
            CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "remove",
                "Elimina una playlist tuya",
            )
            .add_sub_option(name()),
        )
        .add_option(CreateCommandOption::new(
            CommandOptionType::SubCommand,
            "list",
            "Lista las playlists disponibles",
        ))
}

fn noafk_command() -> CreateCommand {
    CreateCommand::new("noafk").description("Vuelve al canal de música si te mandan a AFK")
}
