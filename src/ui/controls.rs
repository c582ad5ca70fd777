use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serenity::model::id::{ChannelId, MessageId, UserId};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tracing::{debug, info, warn};

use super::{
    embeds,
    reply::{self, Reply},
};
use crate::{
    bot::transport::ReactionEvent,
    error::PlayerResult,
    player::{session::Session, votes::VoteCommand},
};

/// Botones del mensaje de estado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteControl {
    PlayPause,
    Stop,
    Skip,
    Shuffle,
    Repeat,
    Loop,
    VolumeDown,
    VolumeUp,
    Queue,
}

impl RemoteControl {
    /// En el orden en que se agregan las reacciones
    pub const ALL: [RemoteControl; 9] = [
        RemoteControl::PlayPause,
        RemoteControl::Stop,
        RemoteControl::Skip,
        RemoteControl::Shuffle,
        RemoteControl::Repeat,
        RemoteControl::Loop,
        RemoteControl::VolumeDown,
        RemoteControl::VolumeUp,
        RemoteControl::Queue,
    ];

    pub fn glyph(self) -> &'static str {
        match self {
            RemoteControl::PlayPause => "⏯️",
            RemoteControl::Stop => "⏹️",
            RemoteControl::Skip => "⏭️",
            RemoteControl::Shuffle => "🔀",
            RemoteControl::Repeat => "🔂",
            RemoteControl::Loop => "🔁",
            RemoteControl::VolumeDown => "➖",
            RemoteControl::VolumeUp => "➕",
            RemoteControl::Queue => "ℹ️",
        }
    }

    /// Discord puede mandar el emoji con o sin el selector de variación.
    pub fn from_glyph(glyph: &str) -> Option<Self> {
        let bare = glyph.trim_end_matches('\u{fe0f}');
        Self::ALL
            .into_iter()
            .find(|control| control.glyph().trim_end_matches('\u{fe0f}') == bare)
    }
}

/// Límite de usos por (usuario, control).
pub struct ControlLimiter {
    limiter: DefaultKeyedRateLimiter<(UserId, RemoteControl)>,
}

impl ControlLimiter {
    pub fn new(per_minute: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: RateLimiter::keyed(quota),
        }
    }

    pub fn allow(&self, user: UserId, control: RemoteControl) -> bool {
        self.limiter.check_key(&(user, control)).is_ok()
    }
}

/// Escucha las reacciones del mensaje de estado `message`.
///
/// Sale cuando el mensaje deja de ser el de la sesión o la sesión se destruye,
/// y en ese caso limpia el mensaje si todavía le pertenece.
pub fn spawn_listener(session: Arc<Session>, channel: ChannelId, message: MessageId) -> JoinHandle<()> {
    // Suscribirse antes de publicar las reacciones para no perder ninguna
    let mut reactions = session.transport().subscribe_reactions();

    tokio::spawn(async move {
        let transport = session.transport().clone();
        {
            let transport = transport.clone();
            tokio::spawn(async move {
                for control in RemoteControl::ALL {
                    if let Err(e) = transport.add_reaction(channel, message, control.glyph()).await {
                        debug!("No se pudieron agregar los controles a {}: {}", message, e);
                        return;
                    }
                }
            });
        }

        let shutdown = session.shutdown_token();
        debug!("🎮 Controles activos en mensaje {}", message);

        while session.status().is_bound(message) {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = reactions.recv() => received,
            };

            let event = match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("🎮 Se perdieron {} reacciones", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };

            let Some(control) = accept(&session, message, &event) else {
                continue;
            };

            if let Err(e) = transport
                .remove_reaction(channel, message, event.user_id, &event.emoji)
                .await
            {
                debug!("No se pudo quitar la reacción: {}", e);
            }

            if !session.controls().allow(event.user_id, control) {
                debug!("🎮 {:?} de {} limitado", control, event.user_id);
                continue;
            }

            // En su propia tarea: un stop destruye la superficie y con ella este listener
            let session = session.clone();
            tokio::spawn(invoke(session, channel, event.user_id, control));
        }

        session.status().retire(message).await;
        debug!("🎮 Controles de {} detenidos", message);
    })
}

fn accept(session: &Session, message: MessageId, event: &ReactionEvent) -> Option<RemoteControl> {
    if event.message_id != message || event.user_id == session.transport().bot_user_id() {
        return None;
    }
    let control = RemoteControl::from_glyph(&event.emoji)?;
    session
        .listeners()
        .contains(&event.user_id)
        .then_some(control)
}

async fn invoke(session: Arc<Session>, channel: ChannelId, user: UserId, control: RemoteControl) {
    info!("🎮 {} usó {:?} en guild {}", user, control, session.guild_id());

    let reply = match run_control(&session, user, control).await {
        Ok(reply) => reply,
        Err(e) => {
            if e.is_internal() {
                warn!("Error al ejecutar control {:?}: {:?}", control, e);
            }
            Some(Reply::error(&e))
        }
    };

    if let Some(reply) = reply {
        reply::deliver(&session, channel, reply).await;
    }
}

async fn run_control(
    session: &Arc<Session>,
    user: UserId,
    control: RemoteControl,
) -> PlayerResult<Option<Reply>> {
    let voted = |command| vote_gated(session, command, user);

    match control {
        RemoteControl::PlayPause => {
            let command = if session.is_paused() {
                VoteCommand::Resume
            } else {
                VoteCommand::Pause
            };
            voted(command).await.map(Some)
        }
        RemoteControl::Stop => voted(VoteCommand::Stop).await.map(Some),
        RemoteControl::Skip => voted(VoteCommand::Skip).await.map(Some),
        RemoteControl::Shuffle => voted(VoteCommand::Shuffle).await.map(Some),
        RemoteControl::Repeat => voted(VoteCommand::Repeat).await.map(Some),
        RemoteControl::Loop => {
            let looping = session.set_loop(None).await;
            Ok(Some(reply::loop_notice(user, looping)))
        }
        RemoteControl::VolumeDown => {
            let step = session.volume_down().await?;
            Ok(Some(reply::volume_step_notice(user, step)))
        }
        RemoteControl::VolumeUp => {
            let step = session.volume_up().await?;
            Ok(Some(reply::volume_step_notice(user, step)))
        }
        RemoteControl::Queue => Ok(Some(
            Reply::card(embeds::queue_card(&session.queue_listing(), chrono::Utc::now()))
                .delete_after(Duration::from_secs(20)),
        )),
    }
}

/// Filtro de votación compartido por los comandos y los controles.
///
/// Los miembros con permisos ejecutan directo; el resto vota y el comando se
/// ejecuta cuando se alcanza el quórum.
pub async fn vote_gated(session: &Arc<Session>, command: VoteCommand, user: UserId) -> PlayerResult<Reply> {
    let privileged = session
        .transport()
        .is_privileged(session.guild_id(), user);

    let decision = session.vote(command, user, privileged);
    if let Some(notice) = reply::vote_notice(command, user, decision) {
        return Ok(notice);
    }

    if session.execute(command).await? {
        Ok(reply::command_ack(command, user, decision))
    } else {
        Ok(reply::unchanged_notice(command))
    }
}
