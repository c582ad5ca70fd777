use std::time::Duration;
use thiserror::Error;

/// Errores que se reportan al usuario que invocó el comando.
///
/// Ninguna variante deja el estado de la sesión a medias: la operación se
/// aborta antes de mutar nada, o el backend rechazó la llamada y la sesión
/// conserva su estado anterior.
#[derive(Debug, Error)]
pub enum PlayerError {
    #[error("{0}")]
    UserInput(String),

    #[error("No estoy conectado a ningún canal de voz")]
    NotConnected,

    #[error("No hay nada reproduciéndose ahora mismo")]
    NothingPlaying,

    #[error("Selección cancelada")]
    SelectionAborted,

    #[error("Tardaste demasiado en elegir ({}s), cancelando", .0.as_secs())]
    SelectionTimedOut(Duration),

    #[error("No se encontró: {0}")]
    NotFound(String),

    #[error("Ya existe: {0}")]
    Duplicate(String),

    #[error("Error del backend de audio: {0}")]
    Backend(#[source] anyhow::Error),

    #[error("Error de almacenamiento: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("Error de Discord: {0}")]
    Transport(#[source] anyhow::Error),
}

impl PlayerError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::UserInput(message.into())
    }

    /// Los errores internos se registran completos; al usuario solo le llega el resumen.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Storage(_) | Self::Transport(_))
    }
}

pub type PlayerResult<T> = std::result::Result<T, PlayerError>;
