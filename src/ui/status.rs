use anyhow::Result;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, MessageId};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::bot::transport::{OutgoingMessage, Transport};

/// Cómo quedó el mensaje de estado tras un `present`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presented {
    /// Se editó en su lugar
    Edited(MessageId),
    /// Se publicó un mensaje nuevo; hay que enlazarle un listener
    Posted(MessageId),
}

/// Mantiene el único mensaje de estado de una sesión y su listener de controles.
///
/// Solo una renderización puede estar en vuelo: [`StatusSurface::try_begin`]
/// devuelve un guard y, si ya había una, marca la superficie como sucia para que
/// el refresco periódico la recoja.
pub struct StatusSurface {
    transport: Arc<dyn Transport>,
    history_window: u8,
    message: Mutex<Option<(ChannelId, MessageId)>>,
    listener: Mutex<Option<(MessageId, JoinHandle<()>)>>,
    updating: AtomicBool,
    dirty: AtomicBool,
}

/// Mientras vive, la superficie está "actualizándose".
pub struct RefreshGuard<'a> {
    surface: &'a StatusSurface,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.surface.updating.store(false, Ordering::Release);
    }
}

impl StatusSurface {
    pub fn new(transport: Arc<dyn Transport>, history_window: u8) -> Self {
        Self {
            transport,
            history_window,
            message: Mutex::new(None),
            listener: Mutex::new(None),
            updating: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
        }
    }

    /// Intenta tomar el turno de renderizar. Si hay una renderización en
    /// vuelo, deja la superficie sucia y devuelve `None`.
    pub fn try_begin(&self) -> Option<RefreshGuard<'_>> {
        if self.updating.swap(true, Ordering::AcqRel) {
            self.dirty.store(true, Ordering::Release);
            return None;
        }
        self.dirty.store(false, Ordering::Release);
        Some(RefreshGuard { surface: self })
    }

    /// Turno para el refresco periódico: solo si hay cambios pendientes y nada en vuelo.
    pub fn begin_pending(&self) -> Option<RefreshGuard<'_>> {
        if !self.dirty.load(Ordering::Acquire) {
            return None;
        }
        if self.updating.swap(true, Ordering::AcqRel) {
            return None;
        }
        self.dirty.store(false, Ordering::Release);
        Some(RefreshGuard { surface: self })
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Hay una renderización en vuelo o pendiente.
    pub fn is_busy(&self) -> bool {
        self.is_updating() || self.is_dirty()
    }

    pub fn current(&self) -> Option<(ChannelId, MessageId)> {
        *self.message.lock()
    }

    pub fn is_bound(&self, message: MessageId) -> bool {
        self.current().is_some_and(|(_, id)| id == message)
    }

    /// Edita el mensaje actual si sigue a la vista, o lo reemplaza por uno nuevo.
    pub async fn present(&self, channel: ChannelId, content: OutgoingMessage) -> Result<Presented> {
        if let Some((old_channel, old_id)) = self.current() {
            if old_channel == channel && self.is_fresh(old_channel, old_id).await {
                match self
                    .transport
                    .edit_message(old_channel, old_id, content.clone())
                    .await
                {
                    Ok(()) => return Ok(Presented::Edited(old_id)),
                    Err(e) => debug!("🔄 No se pudo editar el estado ({}), recreando", e),
                }
            }

            // Puede que ya no exista
            if let Err(e) = self.transport.delete_message(old_channel, old_id).await {
                debug!("Mensaje de estado viejo ya no estaba: {}", e);
            }
            self.message.lock().take();
        }

        self.abort_listener();

        let id = self.transport.send_message(channel, content).await?;
        *self.message.lock() = Some((channel, id));
        debug!("📌 Nuevo mensaje de estado {} en {}", id, channel);
        Ok(Presented::Posted(id))
    }

    /// Enlaza el listener del mensaje recién publicado, cancelando el anterior.
    pub fn bind_listener(&self, message: MessageId, handle: JoinHandle<()>) {
        if let Some((_, old)) = self.listener.lock().replace((message, handle)) {
            old.abort();
        }
    }

    /// Limpieza del listener de `message` al terminar.
    ///
    /// Solo toca el mensaje y el slot del listener si siguen siendo los de
    /// `message`; un reemplazo publicado mientras tanto queda intacto.
    pub async fn retire(&self, message: MessageId) {
        let bound = {
            let mut current = self.message.lock();
            match *current {
                Some((channel, id)) if id == message => current.take().map(|_| channel),
                _ => None,
            }
        };

        if let Some(channel) = bound {
            if let Err(e) = self.transport.delete_message(channel, message).await {
                debug!("Mensaje de estado ya eliminado: {}", e);
            }
        }

        let mut listener = self.listener.lock();
        if listener.as_ref().is_some_and(|(id, _)| *id == message) {
            // Es el propio listener quien llama: soltar el handle no lo cancela
            listener.take();
        }
    }

    /// Borra el mensaje (tolerando que ya no exista) y cancela el listener.
    pub async fn destroy(&self) {
        let message = self.message.lock().take();
        if let Some((channel, id)) = message {
            if let Err(e) = self.transport.delete_message(channel, id).await {
                debug!("Mensaje de estado ya eliminado: {}", e);
            }
        }
        self.abort_listener();
    }

    fn abort_listener(&self) {
        if let Some((_, handle)) = self.listener.lock().take() {
            handle.abort();
        }
    }

    async fn is_fresh(&self, channel: ChannelId, message: MessageId) -> bool {
        match self
            .transport
            .recent_message_ids(channel, self.history_window)
            .await
        {
            Ok(ids) => ids.contains(&message),
            Err(e) => {
                warn!("No se pudo leer el historial de {}: {}", channel, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeTransport;
    use pretty_assertions::assert_eq;

    const CHANNEL: ChannelId = ChannelId::new(100);

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    fn surface(transport: &Arc<FakeTransport>) -> StatusSurface {
        StatusSurface::new(transport.clone(), 7)
    }

    #[tokio::test]
    async fn first_present_posts() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);

        let outcome = status.present(CHANNEL, OutgoingMessage::text("hola")).await.unwrap();

        let Presented::Posted(id) = outcome else {
            panic!("se esperaba un mensaje nuevo");
        };
        assert_eq!(status.current(), Some((CHANNEL, id)));
        assert_eq!(transport.live_messages(CHANNEL), vec![id]);
    }

    #[tokio::test]
    async fn fresh_message_is_edited_in_place() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);
        let Presented::Posted(id) = status.present(CHANNEL, OutgoingMessage::text("a")).await.unwrap() else {
            panic!();
        };

        let outcome = status.present(CHANNEL, OutgoingMessage::text("b")).await.unwrap();

        assert_eq!(outcome, Presented::Edited(id));
        assert_eq!(transport.content_of(CHANNEL, id).as_deref(), Some("b"));
        assert_eq!(transport.live_messages(CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn buried_message_is_replaced() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);
        let Presented::Posted(old) = status.present(CHANNEL, OutgoingMessage::text("a")).await.unwrap() else {
            panic!();
        };
        for i in 0..7 {
            transport.send_message(CHANNEL, OutgoingMessage::text(format!("chat {i}"))).await.unwrap();
        }

        let outcome = status.present(CHANNEL, OutgoingMessage::text("b")).await.unwrap();

        let Presented::Posted(new) = outcome else {
            panic!("se esperaba un reemplazo");
        };
        assert_ne!(new, old);
        assert!(!transport.live_messages(CHANNEL).contains(&old));
        assert_eq!(status.current(), Some((CHANNEL, new)));
    }

    #[tokio::test]
    async fn failed_edit_recreates() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);
        status.present(CHANNEL, OutgoingMessage::text("a")).await.unwrap();
        transport.fail_edits(true);

        let outcome = status.present(CHANNEL, OutgoingMessage::text("b")).await.unwrap();

        assert!(matches!(outcome, Presented::Posted(_)));
        assert_eq!(transport.live_messages(CHANNEL).len(), 1);
    }

    #[tokio::test]
    async fn destroy_tolerates_missing_message() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);
        let Presented::Posted(id) = status.present(CHANNEL, OutgoingMessage::text("a")).await.unwrap() else {
            panic!();
        };
        transport.delete_message(CHANNEL, id).await.unwrap();

        status.destroy().await;

        assert_eq!(status.current(), None);
    }

    #[tokio::test]
    async fn replacing_aborts_the_old_listener() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);
        let Presented::Posted(id) = status.present(CHANNEL, OutgoingMessage::text("a")).await.unwrap() else {
            panic!();
        };

        let first = tokio::spawn(std::future::pending::<()>());
        let first_handle = first.abort_handle();
        status.bind_listener(id, first);

        let second = tokio::spawn(std::future::pending::<()>());
        let second_handle = second.abort_handle();
        status.bind_listener(id, second);
        settle().await;
        assert!(first_handle.is_finished());
        assert!(!second_handle.is_finished());

        status.destroy().await;
        settle().await;
        assert!(second_handle.is_finished());
    }

    #[tokio::test]
    async fn retire_leaves_a_newer_message_alone() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);
        let Presented::Posted(old) = status.present(CHANNEL, OutgoingMessage::text("a")).await.unwrap() else {
            panic!();
        };
        transport.fail_edits(true);
        let Presented::Posted(new) = status.present(CHANNEL, OutgoingMessage::text("b")).await.unwrap() else {
            panic!();
        };

        status.retire(old).await;
        assert_eq!(status.current(), Some((CHANNEL, new)));
        assert_eq!(transport.live_messages(CHANNEL), vec![new]);

        status.retire(new).await;
        assert_eq!(status.current(), None);
        assert!(transport.live_messages(CHANNEL).is_empty());
    }

    #[test]
    fn triggers_during_a_render_collapse_into_one_pending() {
        let transport = Arc::new(FakeTransport::new());
        let status = surface(&transport);

        let guard = status.try_begin().unwrap();
        assert!(status.try_begin().is_none());
        assert!(status.try_begin().is_none());
        assert!(status.begin_pending().is_none());
        drop(guard);

        assert!(status.is_dirty());
        let pending = status.begin_pending();
        assert!(pending.is_some());
        drop(pending);
        assert!(status.begin_pending().is_none());
    }
}
