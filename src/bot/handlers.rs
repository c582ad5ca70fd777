use anyhow::{anyhow, Result};
use serenity::{
    builder::{CreateInteractionResponseFollowup, EditInteractionResponse},
    model::application::{CommandData, CommandDataOption, CommandDataOptionValue, CommandInteraction},
    prelude::Context,
};
use tracing::{debug, error, info};

use super::service::{CommandContext, MusicService, PlaylistAction};
use crate::{
    error::{PlayerError, PlayerResult},
    ui::reply::{self, Reply},
};

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    service: &MusicService,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // Algunos comandos esperan una selección o confirmación: siempre diferimos
    command.defer(&ctx.http).await?;

    let invocation = CommandContext {
        guild_id,
        channel_id: command.channel_id,
        user_id: command.user.id,
        message: None,
    };

    let reply = match dispatch(service, &invocation, &command.data).await {
        Ok(reply) => reply,
        Err(e) => {
            if e.is_internal() {
                error!("❌ /{} falló en guild {}: {:?}", command.data.name, guild_id, e);
            } else {
                debug!("/{} rechazado en guild {}: {}", command.data.name, guild_id, e);
            }
            Reply::error(&e)
        }
    };

    respond(ctx, &command, service, reply).await
}

async fn dispatch(
    service: &MusicService,
    invocation: &CommandContext,
    data: &CommandData,
) -> PlayerResult<Reply> {
    let options = data.options.as_slice();

    match data.name.as_str() {
        "join" => {
            let channel = option(options, "channel").and_then(CommandDataOptionValue::as_channel_id);
            service.connect(invocation, channel).await
        }
        "play" => service.play(invocation, required_str(options, "query")?, false).await,
        "playnext" => service.play(invocation, required_str(options, "query")?, true).await,
        "nowplaying" => service.now_playing(invocation).await,
        "pause" => service.pause(invocation).await,
        "resume" => service.resume(invocation).await,
        "skip" => {
            let amount = integer(options, "amount").unwrap_or(1).max(1);
            service.skip(invocation, amount).await
        }
        "stop" => service.stop(invocation).await,
        "volume" => {
            let level = option(options, "level")
                .and_then(CommandDataOptionValue::as_i64)
                .ok_or_else(|| PlayerError::input("Indica un volumen"))?;
            service.set_volume(invocation, level).await
        }
        "volup" => service.volume_up(invocation).await,
        "voldown" => service.volume_down(invocation).await,
        "queue" => service.show_queue(invocation).await,
        "shuffle" => service.shuffle(invocation).await,
        "repeat" => service.repeat(invocation).await,
        "loop" => {
            let enabled = option(options, "enabled").and_then(CommandDataOptionValue::as_bool);
            service.toggle_loop(invocation, enabled).await
        }
        "clear" => {
            let keep = integer(options, "keep").unwrap_or(0);
            service.clear(invocation, keep).await
        }
        "equalizer" => service.set_equalizer(invocation, required_str(options, "preset")?).await,
        "seek" => service.seek(invocation, required_str(options, "time")?).await,
        "ff" => service.fast_forward(invocation, required_str(options, "time")?).await,
        "rewind" => service.rewind(invocation, required_str(options, "time")?).await,
        "playlist" => service.playlist(invocation, playlist_action(options)?).await,
        "noafk" => service.toggle_noafk(invocation).await,
        other => Err(PlayerError::input(format!("Comando no reconocido: /{}", other))),
    }
}

fn option<'a>(options: &'a [CommandDataOption], name: &str) -> Option<&'a CommandDataOptionValue> {
    options.iter().find(|opt| opt.name == name).map(|opt| &opt.value)
}

fn required_str<'a>(options: &'a [CommandDataOption], name: &str) -> PlayerResult<&'a str> {
    option(options, name)
        .and_then(CommandDataOptionValue::as_str)
        .ok_or_else(|| PlayerError::input(format!("Falta el parámetro `{}`", name)))
}

fn integer(options: &[CommandDataOption], name: &str) -> Option<usize> {
    option(options, name)
        .and_then(CommandDataOptionValue::as_i64)
        .map(|value| usize::try_from(value).unwrap_or(0))
}

fn playlist_action(options: &[CommandDataOption]) -> PlayerResult<PlaylistAction> {
    let Some(sub) = options.first() else {
        return Ok(PlaylistAction::List);
    };
    let CommandDataOptionValue::SubCommand(args) = &sub.value else {
        return Err(PlayerError::input("Subcomando de playlist inválido"));
    };

    match sub.name.as_str() {
        "show" => Ok(PlaylistAction::Show(required_str(args, "name")?.to_string())),
        "add" => Ok(PlaylistAction::Add {
            name: required_str(args, "name")?.to_string(),
            url: required_str(args, "url")?.to_string(),
            private: option(args, "private")
                .and_then(CommandDataOptionValue::as_bool)
                .unwrap_or(false),
        }),
        "remove" => Ok(PlaylistAction::Remove(required_str(args, "name")?.to_string())),
        "list" => Ok(PlaylistAction::List),
        other => Err(PlayerError::input(format!("Subcomando desconocido: {}", other))),
    }
}

/// Completa la respuesta diferida. Las efímeras van como followup porque la
/// respuesta diferida ya es pública.
async fn respond(
    ctx: &Context,
    command: &CommandInteraction,
    service: &MusicService,
    reply: Reply,
) -> Result<()> {
    if reply.ephemeral {
        command.delete_response(&ctx.http).await?;

        let mut followup = CreateInteractionResponseFollowup::new().ephemeral(true);
        if let Some(content) = reply.message.content {
            followup = followup.content(content);
        }
        if let Some(card) = reply.message.card {
            followup = followup.embed(card.to_embed());
        }
        command.create_followup(&ctx.http, followup).await?;
        return Ok(());
    }

    let mut edit = EditInteractionResponse::new();
    if let Some(content) = reply.message.content {
        edit = edit.content(content);
    }
    if let Some(card) = reply.message.card {
        edit = edit.embed(card.to_embed());
    }
    let message = command.edit_response(&ctx.http, edit).await?;

    if let Some(delay) = reply.delete_after {
        let session = command.guild_id.and_then(|guild_id| service.registry().get(guild_id));
        reply::delete_later(
            session.as_deref(),
            service.registry().transport(),
            message.channel_id,
            message.id,
            delay,
        );
    }

    Ok(())
}
