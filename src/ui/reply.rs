use serenity::model::id::{ChannelId, MessageId, UserId};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

use super::embeds::{self, Card};
use crate::{
    bot::transport::{OutgoingMessage, Transport},
    error::PlayerError,
    player::{
        session::{Session, VolumeStep, VoteReply},
        votes::VoteCommand,
    },
};

/// Respuesta de un comando: contenido, si se borra sola y si solo la ve quien la pidió.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: OutgoingMessage,
    pub delete_after: Option<Duration>,
    pub ephemeral: bool,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            message: OutgoingMessage::text(content),
            delete_after: None,
            ephemeral: false,
        }
    }

    pub fn card(card: Card) -> Self {
        Self {
            message: OutgoingMessage::card(card),
            delete_after: None,
            ephemeral: false,
        }
    }

    /// Error para quien invocó el comando; los internos no exponen detalles.
    pub fn error(error: &PlayerError) -> Self {
        let description = if error.is_internal() {
            "Algo salió mal, intenta de nuevo más tarde".to_string()
        } else {
            error.to_string()
        };
        Self::card(embeds::error_card(&description))
            .ephemeral()
            .delete_after(Duration::from_secs(15))
    }

    pub fn delete_after(mut self, delay: Duration) -> Self {
        self.delete_after = Some(delay);
        self
    }

    pub fn ephemeral(mut self) -> Self {
        self.ephemeral = true;
        self
    }

    pub fn content(&self) -> Option<&str> {
        self.message.content.as_deref()
    }
}

/// Publica una respuesta en un canal fuera de una interacción.
pub async fn deliver(session: &Session, channel: ChannelId, reply: Reply) {
    let transport = session.transport();
    let message = match transport.send_message(channel, reply.message).await {
        Ok(id) => id,
        Err(e) => {
            warn!("No se pudo enviar respuesta a {}: {}", channel, e);
            return;
        }
    };

    if let Some(delay) = reply.delete_after {
        delete_later(Some(session), transport, channel, message, delay);
    }
}

/// Borra una respuesta tras `delay`.
///
/// Con una sesión viva el borrado queda a su cargo y se adelanta si la sesión
/// se destruye. Sin sesión (o tras un stop) corre por su cuenta.
pub fn delete_later(
    session: Option<&Session>,
    transport: &Arc<dyn Transport>,
    channel: ChannelId,
    message: MessageId,
    delay: Duration,
) {
    if let Some(session) = session.filter(|session| !session.is_terminated()) {
        session.defer_delete(channel, message, delay);
        return;
    }

    let transport = transport.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = transport.delete_message(channel, message).await {
            debug!("Respuesta {} ya eliminada: {}", message, e);
        }
    });
}

/// Aviso de una votación que todavía no ejecutó el comando.
pub fn vote_notice(command: VoteCommand, voter: UserId, reply: VoteReply) -> Option<Reply> {
    match reply {
        VoteReply::AlreadyVoted { remaining } => Some(
            Reply::text(format!(
                "🗳️ <@{}> ya votaste para `{}`. Faltan **{}** votos",
                voter, command, remaining
            ))
            .delete_after(Duration::from_secs(5)),
        ),
        VoteReply::Pending { remaining } => Some(
            Reply::text(format!(
                "🗳️ <@{}> votó para `{}`. Faltan **{}** votos",
                voter, command, remaining
            ))
            .delete_after(Duration::from_secs(5)),
        ),
        VoteReply::Direct | VoteReply::Passed => None,
    }
}

/// Confirmación de un comando votable ya ejecutado.
pub fn command_ack(command: VoteCommand, user: UserId, reply: VoteReply) -> Reply {
    let (text, delay) = match command {
        VoteCommand::Pause => (format!("⏸️ <@{}> pausó la reproducción", user), 7),
        VoteCommand::Resume => (format!("▶️ <@{}> reanudó la reproducción", user), 7),
        VoteCommand::Stop => (format!("⏹️ <@{}> detuvo la música", user), 10),
        VoteCommand::Shuffle => (format!("🔀 <@{}> mezcló la cola", user), 10),
        VoteCommand::Skip => (format!("⏭️ <@{}> saltó la canción", user), 8),
        VoteCommand::Repeat => (format!("🔂 <@{}> repitió la canción", user), 7),
    };

    if reply == VoteReply::Passed {
        Reply::text(format!("🗳️ Votación para `{}` aprobada. {}", command, text))
            .delete_after(Duration::from_secs(10))
    } else {
        Reply::text(text).delete_after(Duration::from_secs(delay))
    }
}

/// Comando votable que no cambió nada (pausar algo pausado).
pub fn unchanged_notice(command: VoteCommand) -> Reply {
    let text = match command {
        VoteCommand::Pause => "⏸️ La reproducción ya está en pausa",
        VoteCommand::Resume => "▶️ La reproducción no está en pausa",
        _ => "ℹ️ No hubo nada que cambiar",
    };
    Reply::text(text).delete_after(Duration::from_secs(5))
}

pub fn volume_step_notice(user: UserId, step: VolumeStep) -> Reply {
    let text = match step {
        VolumeStep::Raised(volume) => format!("🔊 <@{}> subió el volumen a **{}%**", user, volume),
        VolumeStep::Lowered(volume) => format!("🔉 <@{}> bajó el volumen a **{}%**", user, volume),
        VolumeStep::MaxReached => "🔊 Volumen máximo alcanzado".to_string(),
        VolumeStep::Muted => "🔇 Reproductor silenciado".to_string(),
    };
    Reply::text(text).delete_after(Duration::from_secs(7))
}

pub fn loop_notice(user: UserId, looping: bool) -> Reply {
    let state = if looping { "activó" } else { "desactivó" };
    Reply::text(format!("🔁 <@{}> {} el loop de la cola", user, state)).delete_after(Duration::from_secs(10))
}
