use serenity::model::id::{ChannelId, MessageId, UserId};
use std::{sync::Arc, time::Duration};
use tokio::sync::broadcast::{error::RecvError, Receiver};
use tracing::{debug, info};

use super::embeds::{self, Card};
use crate::{
    bot::transport::{OutgoingMessage, ReactionEvent, Transport},
    error::{PlayerError, PlayerResult},
    player::track::TrackInfo,
};

/// Máximo de opciones que se ofrecen al elegir un resultado
pub const MAX_OPTIONS: usize = 5;

const CANCEL: &str = "❌";
const CONFIRM: &str = "✅";

/// Emoji de tecla numérica para la opción `n` (1..=9)
pub fn number_glyph(n: usize) -> String {
    format!("{}\u{20e3}", n)
}

fn same_glyph(a: &str, b: &str) -> bool {
    a.replace('\u{fe0f}', "") == b.replace('\u{fe0f}', "")
}

/// Muestra hasta cinco resultados y espera que `requester` elija uno.
///
/// Devuelve el índice elegido. El mensaje se borra al terminar, con o sin respuesta.
pub async fn select_track(
    transport: &Arc<dyn Transport>,
    channel: ChannelId,
    requester: UserId,
    options: &[TrackInfo],
    timeout: Duration,
) -> PlayerResult<usize> {
    let options = &options[..options.len().min(MAX_OPTIONS)];
    let mut glyphs: Vec<String> = (1..=options.len()).map(number_glyph).collect();
    glyphs.push(CANCEL.to_string());

    let card = embeds::selection_card(options);
    let choice = await_choice(transport, channel, requester, card, &glyphs, timeout).await?;

    if choice == options.len() {
        info!("🔍 {} canceló la selección", requester);
        return Err(PlayerError::SelectionAborted);
    }
    Ok(choice)
}

/// Pide a `requester` que confirme con ✅ o ❌.
pub async fn confirm(
    transport: &Arc<dyn Transport>,
    channel: ChannelId,
    requester: UserId,
    question: &str,
    timeout: Duration,
) -> PlayerResult<bool> {
    let glyphs = [CONFIRM.to_string(), CANCEL.to_string()];
    let card = embeds::warning_card(question);
    let choice = await_choice(transport, channel, requester, card, &glyphs, timeout).await?;
    Ok(choice == 0)
}

async fn await_choice(
    transport: &Arc<dyn Transport>,
    channel: ChannelId,
    requester: UserId,
    card: Card,
    glyphs: &[String],
    timeout: Duration,
) -> PlayerResult<usize> {
    let mut reactions = transport.subscribe_reactions();
    let message = transport
        .send_message(channel, OutgoingMessage::card(card))
        .await
        .map_err(PlayerError::Transport)?;

    {
        let transport = transport.clone();
        let glyphs = glyphs.to_vec();
        tokio::spawn(async move {
            for glyph in glyphs {
                if let Err(e) = transport.add_reaction(channel, message, &glyph).await {
                    debug!("No se pudieron agregar las opciones: {}", e);
                    return;
                }
            }
        });
    }

    let outcome = tokio::time::timeout(
        timeout,
        next_choice(&mut reactions, message, requester, glyphs),
    )
    .await;

    if let Err(e) = transport.delete_message(channel, message).await {
        debug!("Selector {} ya eliminado: {}", message, e);
    }

    match outcome {
        Ok(Some(index)) => Ok(index),
        Ok(None) => Err(PlayerError::SelectionAborted),
        Err(_) => Err(PlayerError::SelectionTimedOut(timeout)),
    }
}

async fn next_choice(
    reactions: &mut Receiver<ReactionEvent>,
    message: MessageId,
    requester: UserId,
    glyphs: &[String],
) -> Option<usize> {
    loop {
        let event = match reactions.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return None,
        };

        if event.message_id != message || event.user_id != requester {
            continue;
        }

        if let Some(index) = glyphs.iter().position(|g| same_glyph(g, &event.emoji)) {
            return Some(index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{info, FakeTransport, TEXT};
    use pretty_assertions::assert_eq;

    fn options(n: usize) -> Vec<TrackInfo> {
        (1..=n).map(|i| info(&format!("opción {i}"), Some(200))).collect()
    }

    async fn pending_message(fake: &FakeTransport) -> MessageId {
        for _ in 0..50 {
            if let Some(id) = fake.live_messages(TEXT).first() {
                return *id;
            }
            tokio::task::yield_now().await;
        }
        panic!("el selector nunca se publicó");
    }

    #[tokio::test(start_paused = true)]
    async fn requester_picks_an_option() {
        let fake = Arc::new(FakeTransport::new());
        let transport: Arc<dyn Transport> = fake.clone();

        let prompt = tokio::spawn(async move {
            select_track(&transport, TEXT, UserId::new(1), &options(7), Duration::from_secs(60)).await
        });
        let message = pending_message(&fake).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let mut offered = fake.reactions_on(message);
        assert_eq!(offered.len(), 6);
        assert_eq!(offered.pop().as_deref(), Some("❌"));

        fake.react(message, 2, "2️⃣");
        fake.react(message, 1, "3️⃣");

        assert_eq!(prompt.await.unwrap().unwrap(), 2);
        assert!(fake.live_messages(TEXT).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_and_timeout() {
        let fake = Arc::new(FakeTransport::new());
        let transport: Arc<dyn Transport> = fake.clone();

        let prompt = {
            let transport = transport.clone();
            tokio::spawn(async move {
                select_track(&transport, TEXT, UserId::new(1), &options(2), Duration::from_secs(60)).await
            })
        };
        let message = pending_message(&fake).await;
        fake.react(message, 1, "❌");
        assert!(matches!(prompt.await.unwrap(), Err(PlayerError::SelectionAborted)));

        let result = select_track(&transport, TEXT, UserId::new(1), &options(2), Duration::from_secs(60)).await;
        assert!(matches!(result, Err(PlayerError::SelectionTimedOut(_))));
        assert!(fake.live_messages(TEXT).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmation_accepts_check_mark() {
        let fake = Arc::new(FakeTransport::new());
        let transport: Arc<dyn Transport> = fake.clone();

        let prompt = tokio::spawn(async move {
            confirm(&transport, TEXT, UserId::new(1), "¿Seguro?", Duration::from_secs(30)).await
        });
        let message = pending_message(&fake).await;
        fake.react(message, 1, "✅");

        assert!(prompt.await.unwrap().unwrap());
    }
}
