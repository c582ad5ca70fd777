use parking_lot::Mutex;
use std::{collections::VecDeque, time::Duration};
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

use super::track::Track;

#[derive(Debug, Error, PartialEq)]
pub enum QueueError {
    /// Nadie agregó nada durante la ventana de inactividad.
    #[error("cola vacía tras {}s de inactividad", .0.as_secs())]
    Empty(Duration),
}

/// Cola FIFO sin límite con espera bloqueante.
///
/// `pop_front` es el único punto donde el loop de reproducción espera material
/// nuevo: se despierta en cuanto alguien hace `push_back`/`push_front`, o falla
/// con [`QueueError::Empty`] si pasa la ventana de inactividad.
#[derive(Debug, Default)]
pub struct TrackQueue {
    items: Mutex<VecDeque<Track>>,
    available: Notify,
}

impl TrackQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Agrega un track al final de la cola
    pub fn push_back(&self, track: Track) {
        debug!("➕ Agregado a la cola: {}", track.title());
        self.items.lock().push_back(track);
        self.available.notify_one();
    }

    /// Agrega un track al frente de la cola
    pub fn push_front(&self, track: Track) {
        debug!("⏫ Agregado al frente de la cola: {}", track.title());
        self.items.lock().push_front(track);
        self.available.notify_one();
    }

    /// Obtiene el siguiente track, esperando hasta `idle` si la cola está vacía.
    pub async fn pop_front(&self, idle: Duration) -> Result<Track, QueueError> {
        let deadline = tokio::time::Instant::now() + idle;

        loop {
            if let Some(track) = self.items.lock().pop_front() {
                debug!("➡️ Siguiente en cola (FIFO): {}", track.title());
                return Ok(track);
            }

            // notify_one guarda un permiso si nadie espera todavía, así que un
            // push entre el lock y este await no se pierde.
            if tokio::time::timeout_at(deadline, self.available.notified())
                .await
                .is_err()
            {
                info!("📭 Cola vacía tras {}s sin actividad", idle.as_secs());
                return Err(QueueError::Empty(idle));
            }
        }
    }

    /// Saca el último track si cumple `predicate` (usado cuando un track en loop falla).
    pub fn pop_back_if(&self, predicate: impl FnOnce(&Track) -> bool) -> Option<Track> {
        let mut items = self.items.lock();
        if items.back().is_some_and(predicate) {
            items.pop_back()
        } else {
            None
        }
    }

    /// Descarta los primeros `count` tracks y devuelve cuántos se quitaron.
    pub fn drop_front(&self, count: usize) -> usize {
        let mut items = self.items.lock();
        let dropped = count.min(items.len());
        items.drain(..dropped);
        dropped
    }

    /// Conserva solo los primeros `keep` tracks.
    pub fn truncate(&self, keep: usize) -> usize {
        let mut items = self.items.lock();
        let before = items.len();
        items.truncate(keep);
        let removed = before - items.len();
        if removed > 0 {
            info!("🗑️ Eliminadas {} canciones de la cola", removed);
        }
        removed
    }

    /// Vacía la cola devolviendo su contenido en orden.
    pub fn drain(&self) -> Vec<Track> {
        self.items.lock().drain(..).collect()
    }

    /// Reemplaza el contenido completo de la cola.
    pub fn replace(&self, tracks: Vec<Track>) {
        let has_items = !tracks.is_empty();
        *self.items.lock() = tracks.into();
        if has_items {
            self.available.notify_one();
        }
    }

    /// Mezcla la cola en su lugar.
    pub fn shuffle(&self) {
        use rand::seq::SliceRandom;

        let mut items = self.drain();
        items.shuffle(&mut rand::thread_rng());
        self.replace(items);
        info!("🔀 Cola mezclada");
    }

    /// Copia de la cola completa, sin consumirla.
    pub fn snapshot(&self) -> Vec<Track> {
        self.items.lock().iter().cloned().collect()
    }

    /// Copia de los primeros `limit` tracks.
    pub fn peek(&self, limit: usize) -> Vec<Track> {
        self.items.lock().iter().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}
