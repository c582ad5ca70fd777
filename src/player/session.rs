use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::Notify,
    task::{AbortHandle, JoinHandle},
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    backend::AudioBackend,
    equalizer::EqualizerPreset,
    events::{BackendEvent, PlaybackToken},
    queue::{QueueError, TrackQueue},
    registry::SessionRegistry,
    track::Track,
    votes::{VoteCommand, VoteLedger, VoteOutcome},
};
use crate::{
    bot::transport::{OutgoingMessage, Transport},
    config::PlayerSettings,
    error::{PlayerError, PlayerResult},
    ui::{
        controls::{self, ControlLimiter},
        embeds,
        status::{Presented, StatusSurface},
    },
};

/// Cuántos tracks muestra el listado de la cola
pub const QUEUE_LISTING_LEN: usize = 15;

/// Cuántos tracks muestra la vista previa del mensaje de estado
const STATUS_PREVIEW_LEN: usize = 3;

/// Tiempo que vive el aviso de un track que falló
const TRACK_ERROR_NOTICE: Duration = Duration::from_secs(10);

/// Fase del loop de reproducción.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Esperando material en la cola
    Idle,
    /// Entre tracks: el anterior terminó y el siguiente aún no suena
    Advancing,
    Playing,
    Paused,
    Terminated,
}

/// Resultado de pedir un volumen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeOutcome {
    Applied(u16),
    /// Más de 100 sin confirmar: no se aplicó nada
    NeedsConfirmation(u16),
}

/// Resultado de subir o bajar el volumen un paso.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeStep {
    Raised(u16),
    Lowered(u16),
    /// Se llegó (o ya se estaba) en 100
    MaxReached,
    /// Se llegó a 0 desde abajo del primer escalón
    Muted,
}

/// Respuesta del filtro de votación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteReply {
    /// Miembro con permisos: se ejecuta sin votar
    Direct,
    Passed,
    AlreadyVoted { remaining: usize },
    Pending { remaining: usize },
}

impl VoteReply {
    pub fn is_approved(self) -> bool {
        matches!(self, VoteReply::Direct | VoteReply::Passed)
    }
}

/// Foto del estado que se pinta en el mensaje de estado.
#[derive(Debug, Clone)]
pub struct StatusView {
    pub current: Option<Track>,
    pub paused: bool,
    pub position: Option<Duration>,
    pub equalizer: EqualizerPreset,
    pub queue_len: usize,
    pub volume: u16,
    pub looping: bool,
    /// Próximos tracks que no fallaron
    pub upcoming: Vec<Track>,
}

struct PlayerState {
    current: Option<Track>,
    token: Option<PlaybackToken>,
    phase: PlaybackState,
    paused: bool,
    looping: bool,
    volume: u16,
    equalizer: EqualizerPreset,
    voice_channel: Option<ChannelId>,
}

#[derive(Default)]
struct SessionTasks {
    playback: Option<JoinHandle<()>>,
    updater: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct DeferredTasks {
    next_id: u64,
    tasks: HashMap<String, (u64, AbortHandle)>,
}

/// Controlador de reproducción de un guild.
///
/// Es dueño de la cola, los votos, el track actual y el mensaje de estado.
/// Al crearse arranca dos tareas (el loop de reproducción y el refresco
/// periódico del estado) que solo terminan en [`Session::destroy`] o cuando la
/// cola pasa la ventana de inactividad sin recibir nada.
pub struct Session {
    guild_id: GuildId,
    settings: PlayerSettings,
    backend: Arc<dyn AudioBackend>,
    transport: Arc<dyn Transport>,
    registry: Weak<SessionRegistry>,
    queue: TrackQueue,
    votes: Mutex<VoteLedger>,
    state: Mutex<PlayerState>,
    completion: Notify,
    tokens: AtomicU64,
    status: StatusSurface,
    controls: ControlLimiter,
    tasks: Mutex<SessionTasks>,
    deferred: Arc<Mutex<DeferredTasks>>,
    notices: AtomicU64,
    shutdown: CancellationToken,
    destroyed: AtomicBool,
}

impl Session {
    /// Crea la sesión y arranca sus tareas.
    pub(crate) fn start(
        guild_id: GuildId,
        settings: PlayerSettings,
        backend: Arc<dyn AudioBackend>,
        transport: Arc<dyn Transport>,
        registry: Weak<SessionRegistry>,
    ) -> Arc<Self> {
        let session = Arc::new(Self {
            guild_id,
            backend,
            status: StatusSurface::new(transport.clone(), settings.history_window),
            controls: ControlLimiter::new(settings.control_rate_limit),
            transport,
            registry,
            queue: TrackQueue::new(),
            votes: Mutex::new(VoteLedger::new()),
            state: Mutex::new(PlayerState {
                current: None,
                token: None,
                phase: PlaybackState::Idle,
                paused: false,
                looping: false,
                volume: settings.default_volume,
                equalizer: EqualizerPreset::default(),
                voice_channel: None,
            }),
            completion: Notify::new(),
            tokens: AtomicU64::new(0),
            tasks: Mutex::new(SessionTasks::default()),
            deferred: Arc::new(Mutex::new(DeferredTasks::default())),
            notices: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
            destroyed: AtomicBool::new(false),
            settings,
        });

        let playback = tokio::spawn(session.clone().playback_loop());
        let updater = tokio::spawn(session.clone().updater_loop());
        *session.tasks.lock() = SessionTasks {
            playback: Some(playback),
            updater: Some(updater),
        };

        info!("🎛️ Sesión creada para guild {}", guild_id);
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn state(&self) -> PlaybackState {
        self.state.lock().phase
    }

    pub fn is_terminated(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    pub fn current(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn is_looping(&self) -> bool {
        self.state.lock().looping
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn equalizer(&self) -> EqualizerPreset {
        self.state.lock().equalizer
    }

    pub fn voice_channel(&self) -> Option<ChannelId> {
        self.state.lock().voice_channel
    }

    pub fn is_connected(&self) -> bool {
        self.voice_channel().is_some()
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn status(&self) -> &StatusSurface {
        &self.status
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn controls(&self) -> &ControlLimiter {
        &self.controls
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[cfg(test)]
    pub fn vote_count(&self, command: VoteCommand) -> usize {
        self.votes.lock().count(command)
    }

    /// Miembros humanos en el canal de voz de la sesión
    pub fn listeners(&self) -> Vec<UserId> {
        match self.voice_channel() {
            Some(channel) => self.transport.voice_members(self.guild_id, channel),
            None => Vec::new(),
        }
    }

    /// Conecta (o mueve) la sesión a un canal de voz.
    pub async fn connect(&self, channel: ChannelId) -> PlayerResult<()> {
        if self.voice_channel() == Some(channel) {
            return Ok(());
        }

        self.transport
            .join_voice(self.guild_id, channel)
            .await
            .map_err(PlayerError::Transport)?;
        self.state.lock().voice_channel = Some(channel);
        info!("🔊 Sesión de guild {} conectada a {}", self.guild_id, channel);
        Ok(())
    }

    /// Registra que el bot fue movido a otro canal de voz desde fuera.
    ///
    /// Los votos pendientes eran de otro grupo de oyentes y se descartan.
    pub fn follow_voice_channel(&self, channel: ChannelId) -> bool {
        {
            let mut state = self.state.lock();
            if state.voice_channel == Some(channel) || state.phase == PlaybackState::Terminated {
                return false;
            }
            state.voice_channel = Some(channel);
        }

        self.votes.lock().reset_all();
        self.status.mark_dirty();
        info!("🔀 Bot movido a {} en guild {}", channel, self.guild_id);
        true
    }

    /// Agrega tracks al final, o al frente conservando su orden.
    pub async fn enqueue(self: &Arc<Self>, tracks: Vec<Track>, front: bool) {
        if front {
            for track in tracks.into_iter().rev() {
                self.queue.push_front(track);
            }
        } else {
            for track in tracks {
                self.queue.push_back(track);
            }
        }

        if self.status.current().is_some() && self.current().is_some() {
            self.request_refresh().await;
        }
    }

    /// Pausa el track actual. Devuelve `false` si ya estaba en pausa.
    pub async fn pause(self: &Arc<Self>) -> PlayerResult<bool> {
        self.set_paused(true).await
    }

    /// Reanuda el track actual. Devuelve `false` si no estaba en pausa.
    pub async fn resume(self: &Arc<Self>) -> PlayerResult<bool> {
        self.set_paused(false).await
    }

    async fn set_paused(self: &Arc<Self>, paused: bool) -> PlayerResult<bool> {
        {
            let state = self.state.lock();
            if state.current.is_none() {
                return Err(PlayerError::NothingPlaying);
            }
            if state.paused == paused {
                return Ok(false);
            }
        }

        self.backend
            .pause(self.guild_id, paused)
            .await
            .map_err(PlayerError::Backend)?;

        {
            let mut state = self.state.lock();
            // El track pudo terminar mientras esperábamos al backend
            if state.current.is_none() {
                return Ok(false);
            }
            state.paused = paused;
            state.phase = if paused {
                PlaybackState::Paused
            } else {
                PlaybackState::Playing
            };
        }

        self.request_refresh().await;
        Ok(true)
    }

    /// Descarta `count - 1` tracks de la cola y termina el actual.
    /// Devuelve cuántos tracks de la cola se descartaron.
    pub async fn skip(&self, count: usize) -> PlayerResult<usize> {
        let token = self.state.lock().token.ok_or(PlayerError::NothingPlaying)?;

        self.backend
            .stop(self.guild_id)
            .await
            .map_err(PlayerError::Backend)?;

        let dropped = self.queue.drop_front(count.max(1) - 1);
        if self.complete(token) {
            info!("⏭️ Track saltado en guild {} ({} más descartados)", self.guild_id, dropped);
        }
        self.status.mark_dirty();
        Ok(dropped)
    }

    /// Pide un volumen exacto.
    ///
    /// Un miembro sin permisos no puede pasar de 100 si hay alguien más
    /// escuchando; por encima de 100 siempre hace falta confirmar.
    pub async fn set_volume(
        self: &Arc<Self>,
        value: i64,
        confirmed: bool,
        privileged: bool,
    ) -> PlayerResult<VolumeOutcome> {
        if value < 0 {
            return Err(PlayerError::input("El volumen debe ser al menos 0"));
        }

        if value > 100 && !privileged && self.listeners().len() > 1 {
            return Err(PlayerError::input("Elige un valor entre 0 y 100"));
        }

        let volume = u16::try_from(value)
            .map_err(|_| PlayerError::input(format!("{} no es un volumen válido", value)))?;

        if volume > 100 && !confirmed {
            return Ok(VolumeOutcome::NeedsConfirmation(volume));
        }

        self.apply_volume(volume).await?;
        Ok(VolumeOutcome::Applied(volume))
    }

    pub async fn volume_up(self: &Arc<Self>) -> PlayerResult<VolumeStep> {
        let current = self.volume();
        // ceil((v + 10) / 10) * 10
        let target = (current + 10).div_ceil(10) * 10;

        if target > 100 {
            if current < 100 {
                self.apply_volume(100).await?;
            }
            return Ok(VolumeStep::MaxReached);
        }

        self.apply_volume(target).await?;
        Ok(VolumeStep::Raised(target))
    }

    pub async fn volume_down(self: &Arc<Self>) -> PlayerResult<VolumeStep> {
        let lowered = i64::from(self.volume()) - 10;
        // ceil(x / 10) * 10 también para x negativo
        let target = if lowered >= 0 {
            (lowered + 9) / 10 * 10
        } else {
            -((-lowered) / 10) * 10
        };

        if target < 0 {
            self.apply_volume(0).await?;
            return Ok(VolumeStep::Muted);
        }

        let target = u16::try_from(target).unwrap_or(0);
        self.apply_volume(target).await?;
        Ok(VolumeStep::Lowered(target))
    }

    async fn apply_volume(self: &Arc<Self>, volume: u16) -> PlayerResult<()> {
        self.backend
            .set_volume(self.guild_id, volume)
            .await
            .map_err(PlayerError::Backend)?;
        self.state.lock().volume = volume;
        self.request_refresh().await;
        Ok(())
    }

    pub async fn shuffle(self: &Arc<Self>) {
        self.queue.shuffle();
        self.request_refresh().await;
    }

    /// Vuelve a poner el track actual al frente de la cola.
    pub async fn repeat_current(self: &Arc<Self>) -> PlayerResult<()> {
        let current = self.current().ok_or(PlayerError::NothingPlaying)?;
        self.queue.push_front(current);
        self.request_refresh().await;
        Ok(())
    }

    /// Activa, desactiva (`Some`) o alterna (`None`) el loop de la cola.
    pub async fn set_loop(self: &Arc<Self>, enabled: Option<bool>) -> bool {
        let (looping, requeue) = {
            let mut state = self.state.lock();
            let looping = enabled.unwrap_or(!state.looping);
            let requeue = looping && !state.looping && state.token.is_some();
            state.looping = looping;
            (looping, requeue.then(|| state.current.clone()).flatten())
        };

        // El track actual ya salió de la cola: hay que devolverlo al ciclo
        if let Some(current) = requeue {
            self.queue.push_back(current);
        }

        info!("🔁 Loop {} en guild {}", if looping { "activado" } else { "desactivado" }, self.guild_id);
        self.request_refresh().await;
        looping
    }

    /// Conserva solo los primeros `keep` tracks de la cola.
    pub async fn clear(self: &Arc<Self>, keep: usize) -> usize {
        let removed = self.queue.truncate(keep);
        self.request_refresh().await;
        removed
    }

    pub async fn set_equalizer(self: &Arc<Self>, preset: EqualizerPreset) -> PlayerResult<()> {
        self.backend
            .set_equalizer(self.guild_id, preset)
            .await
            .map_err(PlayerError::Backend)?;
        self.state.lock().equalizer = preset;
        self.request_refresh().await;
        Ok(())
    }

    /// Salta a una posición absoluta; 0 reinicia el track.
    pub async fn seek(self: &Arc<Self>, position: Duration) -> PlayerResult<()> {
        let length = self.seekable_length()?;
        if position > length {
            return Err(PlayerError::input("El tiempo ingresado es mayor que la canción"));
        }
        self.seek_to(position).await
    }

    /// Adelanta `amount`; devuelve la nueva posición.
    pub async fn fast_forward(self: &Arc<Self>, amount: Duration) -> PlayerResult<Duration> {
        if amount < Duration::from_secs(1) {
            return Err(PlayerError::input("Ingresa un tiempo de al menos 1 segundo"));
        }

        let length = self.seekable_length()?;
        let position = self.position().await?;
        let Some(target) = position.checked_add(amount).filter(|target| *target <= length) else {
            return Err(PlayerError::input(format!(
                "No queda suficiente canción para adelantar ({} restantes)",
                embeds::format_duration(length.saturating_sub(position))
            )));
        };

        self.seek_to(target).await?;
        Ok(target)
    }

    /// Retrocede `amount`, o reinicia si no alcanza; devuelve la nueva posición.
    pub async fn rewind(self: &Arc<Self>, amount: Duration) -> PlayerResult<Duration> {
        if amount < Duration::from_secs(1) {
            return Err(PlayerError::input("Ingresa un tiempo de al menos 1 segundo"));
        }

        self.seekable_length()?;
        let target = self.position().await?.saturating_sub(amount);
        self.seek_to(target).await?;
        Ok(target)
    }

    fn seekable_length(&self) -> PlayerResult<Duration> {
        let current = self.current().ok_or(PlayerError::NothingPlaying)?;
        current
            .duration()
            .ok_or_else(|| PlayerError::input("No se puede mover una transmisión en vivo"))
    }

    async fn position(&self) -> PlayerResult<Duration> {
        self.backend
            .position(self.guild_id)
            .await
            .map_err(PlayerError::Backend)
    }

    async fn seek_to(self: &Arc<Self>, position: Duration) -> PlayerResult<()> {
        self.backend
            .seek(self.guild_id, position)
            .await
            .map_err(PlayerError::Backend)?;
        self.request_refresh().await;
        Ok(())
    }

    /// Vuelve a publicar el mensaje de estado al final del canal.
    ///
    /// No hace nada si ya hay una renderización en vuelo o pendiente.
    pub async fn now_playing(self: &Arc<Self>) -> bool {
        if self.status.is_busy() {
            return false;
        }
        self.status.destroy().await;
        self.request_refresh().await;
        true
    }

    pub fn queue_listing(&self) -> Vec<Track> {
        self.queue.peek(QUEUE_LISTING_LEN)
    }

    /// Filtro de votación para pause/resume/stop/shuffle/skip/repeat.
    ///
    /// No ejecuta nada: si la respuesta está aprobada el llamador corre el comando.
    pub fn vote(&self, command: VoteCommand, voter: UserId, privileged: bool) -> VoteReply {
        if privileged {
            return VoteReply::Direct;
        }

        let members = self.listeners().len();
        match self.votes.lock().register_vote(command, voter, members) {
            VoteOutcome::Passed => VoteReply::Passed,
            VoteOutcome::AlreadyVoted { remaining } => VoteReply::AlreadyVoted { remaining },
            VoteOutcome::Recorded { remaining } => VoteReply::Pending { remaining },
        }
    }

    /// Ejecuta un comando votable con sus parámetros por defecto.
    ///
    /// Devuelve `false` si no hubo nada que cambiar (pausar algo ya pausado).
    pub async fn execute(self: &Arc<Self>, command: VoteCommand) -> PlayerResult<bool> {
        match command {
            VoteCommand::Pause => self.pause().await,
            VoteCommand::Resume => self.resume().await,
            VoteCommand::Stop => {
                self.destroy().await;
                Ok(true)
            }
            VoteCommand::Shuffle => {
                self.shuffle().await;
                Ok(true)
            }
            VoteCommand::Skip => self.skip(1).await.map(|_| true),
            VoteCommand::Repeat => self.repeat_current().await.map(|_| true),
        }
    }

    /// Aplica un evento del backend. Los eventos con un token que no es el
    /// de la reproducción actual se ignoran.
    pub async fn handle_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::TrackStarted { token, .. } => {
                debug!("▶️ Backend confirmó inicio {} en guild {}", token, self.guild_id);
            }
            BackendEvent::TrackEnded { token, reason, .. } => {
                if self.complete(token) {
                    debug!("🏁 Track terminado ({:?}) en guild {}", reason, self.guild_id);
                } else {
                    debug!("Evento de fin obsoleto {} en guild {}", token, self.guild_id);
                }
            }
            BackendEvent::TrackErrored {
                token,
                reason,
                detail,
                ..
            } => self.fail_track(token, &reason, detail.as_deref()).await,
        }
    }

    /// Marca la reproducción `token` como terminada y despierta al loop.
    fn complete(&self, token: PlaybackToken) -> bool {
        {
            let mut state = self.state.lock();
            if state.token != Some(token) {
                return false;
            }
            state.token = None;
            state.phase = PlaybackState::Advancing;
        }
        self.completion.notify_one();
        true
    }

    async fn fail_track(&self, token: PlaybackToken, reason: &str, detail: Option<&str>) {
        let (track, looping) = {
            let state = self.state.lock();
            if state.token != Some(token) {
                return;
            }
            (state.current.clone(), state.looping)
        };

        let Some(track) = track else {
            return;
        };

        warn!(
            "❌ Error en track '{}' en guild {}: {} {}",
            track.title(),
            self.guild_id,
            reason,
            detail.unwrap_or_default()
        );
        track.mark_dead();

        // En loop el track ya volvió a la cola; se saca para que no trabe el ciclo
        if looping {
            if let Some(evicted) = self.queue.pop_back_if(|last| last.same_entry(&track)) {
                debug!("🗑️ '{}' sacado del loop", evicted.title());
            }
        }

        self.post_transient(
            track.channel,
            OutgoingMessage::text(format!(
                "❌ Ocurrió un error al reproducir **{}**. Intenta de nuevo más tarde",
                track.title()
            )),
            TRACK_ERROR_NOTICE,
        );

        self.complete(token);
    }

    /// Publica un aviso que se borra solo tras `delay`, o en cuanto la sesión
    /// se destruya. No espera al envío.
    pub fn post_transient(&self, channel: ChannelId, message: OutgoingMessage, delay: Duration) {
        let transport = self.transport.clone();
        let shutdown = self.shutdown.clone();
        let name = format!("notice-{}", self.notices.fetch_add(1, Ordering::Relaxed));

        self.spawn_owned(name, async move {
            let id = match transport.send_message(channel, message).await {
                Ok(id) => id,
                Err(e) => {
                    warn!("No se pudo enviar aviso a {}: {}", channel, e);
                    return;
                }
            };
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            if let Err(e) = transport.delete_message(channel, id).await {
                debug!("Aviso {} ya eliminado: {}", id, e);
            }
        });
    }

    /// Borra un mensaje tras `delay`, o en cuanto la sesión se destruya.
    pub fn defer_delete(&self, channel: ChannelId, message: MessageId, delay: Duration) {
        let transport = self.transport.clone();
        self.defer(format!("delete-{}", message), delay, async move {
            if let Err(e) = transport.delete_message(channel, message).await {
                debug!("Mensaje {} ya eliminado: {}", message, e);
            }
        });
    }

    /// Tarea de limpieza con nombre que corre tras `delay`.
    ///
    /// Al destruirse la sesión las tareas pendientes se ejecutan en el acto.
    pub fn defer<F>(&self, name: impl Into<String>, delay: Duration, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.spawn_owned(name, async move {
            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            work.await;
        });
    }

    /// Lanza una tarea registrada a nombre de la sesión. Un nombre repetido
    /// cancela la tarea anterior.
    fn spawn_owned<F>(&self, name: impl Into<String>, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let registry = self.deferred.clone();

        let mut deferred = self.deferred.lock();
        deferred.next_id += 1;
        let id = deferred.next_id;

        let task_name = name.clone();
        let handle = tokio::spawn(async move {
            work.await;

            let mut deferred = registry.lock();
            if deferred.tasks.get(&task_name).is_some_and(|(task_id, _)| *task_id == id) {
                deferred.tasks.remove(&task_name);
            }
        });

        if let Some((_, previous)) = deferred.tasks.insert(name, (id, handle.abort_handle())) {
            previous.abort();
        }
    }

    /// Pide una renderización del estado: se hace ya, o queda pendiente para
    /// el próximo tick si hay otra en vuelo.
    pub async fn request_refresh(self: &Arc<Self>) {
        let Some(_guard) = self.status.try_begin() else {
            debug!("⏳ Refresco en vuelo, queda pendiente");
            return;
        };
        self.render_status().await;
    }

    pub async fn status_view(&self) -> StatusView {
        let (current, paused, equalizer, volume, looping) = {
            let state = self.state.lock();
            (
                state.current.clone(),
                state.paused,
                state.equalizer,
                state.volume,
                state.looping,
            )
        };

        let position = match &current {
            Some(track) if !track.is_stream() => self.backend.position(self.guild_id).await.ok(),
            _ => None,
        };

        let queued = self.queue.snapshot();
        StatusView {
            current,
            paused,
            position,
            equalizer,
            queue_len: queued.len(),
            volume,
            looping,
            upcoming: queued
                .into_iter()
                .filter(|track| !track.is_dead())
                .take(STATUS_PREVIEW_LEN)
                .collect(),
        }
    }

    async fn render_status(self: &Arc<Self>) {
        if self.is_terminated() {
            return;
        }

        let view = self.status_view().await;
        let Some(channel) = view.current.as_ref().map(|track| track.channel) else {
            return;
        };

        let card = embeds::status_card(&view);
        match self.status.present(channel, OutgoingMessage::card(card)).await {
            Ok(Presented::Posted(message)) => {
                if self.is_terminated() {
                    // La sesión se destruyó mientras publicábamos
                    self.status.destroy().await;
                    return;
                }
                let listener = controls::spawn_listener(self.clone(), channel, message);
                self.status.bind_listener(message, listener);
            }
            Ok(Presented::Edited(_)) => {}
            Err(e) => warn!("No se pudo actualizar el estado en guild {}: {}", self.guild_id, e),
        }
    }

    async fn playback_loop(self: Arc<Self>) {
        let (equalizer, volume) = {
            let state = self.state.lock();
            (state.equalizer, state.volume)
        };
        if let Err(e) = self.backend.set_equalizer(self.guild_id, equalizer).await {
            warn!("No se pudo aplicar el ecualizador inicial: {}", e);
        }
        if let Err(e) = self.backend.set_volume(self.guild_id, volume).await {
            warn!("No se pudo aplicar el volumen inicial: {}", e);
        }

        loop {
            self.state.lock().phase = PlaybackState::Idle;

            let track = match self.queue.pop_front(self.settings.idle_timeout).await {
                Ok(track) => track,
                Err(QueueError::Empty(idle)) => {
                    info!(
                        "💤 Guild {} sin actividad por {}s, cerrando sesión",
                        self.guild_id,
                        idle.as_secs()
                    );
                    self.status.destroy().await;
                    let session = self.clone();
                    tokio::spawn(async move { session.destroy().await });
                    return;
                }
            };

            self.play(track).await;
            self.completion.notified().await;

            self.votes.lock().reset_all();
            let mut state = self.state.lock();
            state.current = None;
            state.paused = false;
        }
    }

    async fn play(self: &Arc<Self>, track: Track) {
        let token = PlaybackToken(self.tokens.fetch_add(1, Ordering::Relaxed) + 1);

        {
            let mut state = self.state.lock();
            state.phase = PlaybackState::Advancing;
            state.current = Some(track.clone());
            state.paused = false;
            state.token = Some(token);

            if state.looping {
                self.queue.push_back(track.clone());
            }
        }

        match self.backend.play(self.guild_id, token, &track).await {
            Ok(()) => {
                {
                    let mut state = self.state.lock();
                    if state.token == Some(token) {
                        state.phase = PlaybackState::Playing;
                    }
                }
                if !self.status.is_dirty() {
                    self.request_refresh().await;
                }
            }
            Err(e) => {
                error!("❌ El backend no pudo reproducir '{}': {:?}", track.title(), e);
                self.fail_track(token, "load failed", Some(&e.to_string())).await;
            }
        }
    }

    async fn updater_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.settings.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // El primer tick es inmediato
        interval.tick().await;

        loop {
            interval.tick().await;
            if let Some(_guard) = self.status.begin_pending() {
                self.render_status().await;
            }
        }
    }

    /// Destruye la sesión: cancela sus tareas, vacía la cola, borra el estado
    /// y se desconecta de voz. Solo la primera llamada tiene efecto.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }

        info!("🧹 Destruyendo sesión de guild {}", self.guild_id);
        self.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for handle in [tasks.playback, tasks.updater].into_iter().flatten() {
            // Puede haber terminado ya
            handle.abort();
        }

        self.queue.drain();
        self.votes.lock().reset_all();
        {
            let mut state = self.state.lock();
            state.current = None;
            state.token = None;
            state.paused = false;
            state.phase = PlaybackState::Terminated;
        }

        self.status.destroy().await;

        if let Err(e) = self.backend.stop(self.guild_id).await {
            warn!("Error al detener reproducción: {:?}", e);
        }
        if let Err(e) = self.transport.leave_voice(self.guild_id).await {
            warn!("Error al salir del canal de voz: {:?}", e);
        }
        self.state.lock().voice_channel = None;

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_session(self);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        player::events::EndReason,
        testing::{track, track_with_length, Harness, TEXT},
    };
    use pretty_assertions::assert_eq;

    fn titles(tracks: &[Track]) -> Vec<String> {
        tracks.iter().map(|t| t.title().to_string()).collect()
    }

    async fn finish_current(harness: &Harness, session: &Session) {
        let token = harness.backend.last_token().unwrap();
        session
            .handle_backend_event(BackendEvent::TrackEnded {
                guild_id: session.guild_id(),
                token,
                reason: EndReason::Finished,
            })
            .await;
        harness.settle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn plays_in_order_and_advances_on_end() {
        let harness = Harness::new();
        let session = harness.session().await;

        session.enqueue(vec![track("a"), track("b")], false).await;
        harness.settle().await;
        assert_eq!(session.current().unwrap().title(), "a");
        assert_eq!(session.state(), PlaybackState::Playing);

        finish_current(&harness, &session).await;
        assert_eq!(session.current().unwrap().title(), "b");
        assert_eq!(harness.backend.played_titles(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_end_events_advance_once() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("a"), track("b"), track("c")], false).await;
        harness.settle().await;

        let token = harness.backend.last_token().unwrap();
        for _ in 0..3 {
            session
                .handle_backend_event(BackendEvent::TrackEnded {
                    guild_id: session.guild_id(),
                    token,
                    reason: EndReason::Finished,
                })
                .await;
        }
        harness.settle().await;

        assert_eq!(session.current().unwrap().title(), "b");
        assert_eq!(titles(&session.queue().snapshot()), vec!["c"]);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_mode_cycles_the_queue() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.set_loop(Some(true)).await;

        session.enqueue(vec![track("A"), track("B")], false).await;
        harness.settle().await;
        assert_eq!(titles(&session.queue().snapshot()), vec!["B", "A"]);

        finish_current(&harness, &session).await;

        assert_eq!(session.current().unwrap().title(), "B");
        assert_eq!(titles(&session.queue().snapshot()), vec!["A", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_track_is_evicted_from_the_loop_and_reported() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.set_loop(Some(true)).await;
        session.enqueue(vec![track("broken"), track("ok")], false).await;
        harness.settle().await;

        let token = harness.backend.last_token().unwrap();
        session
            .handle_backend_event(BackendEvent::TrackErrored {
                guild_id: session.guild_id(),
                token,
                reason: "fault".to_string(),
                detail: Some("403".to_string()),
            })
            .await;
        harness.settle().await;

        assert_eq!(session.current().unwrap().title(), "ok");
        assert_eq!(titles(&session.queue().snapshot()), vec!["ok"]);
        assert!(harness
            .transport
            .sent_texts()
            .iter()
            .any(|text| text.contains("error al reproducir **broken**")));

        // El aviso se borra a los 10 s
        let notices = harness.transport.live_texts_containing("broken");
        assert_eq!(notices, 1);
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(harness.transport.live_texts_containing("broken"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn track_errors_do_not_wait_for_the_notice() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("broken"), track("ok")], false).await;
        harness.settle().await;
        harness.transport.set_latency(Duration::from_secs(5));

        let token = harness.backend.last_token().unwrap();
        let handled = tokio::time::timeout(
            Duration::from_millis(1),
            session.handle_backend_event(BackendEvent::TrackErrored {
                guild_id: session.guild_id(),
                token,
                reason: "fault".to_string(),
                detail: None,
            }),
        )
        .await;
        assert!(handled.is_ok());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(harness.transport.live_texts_containing("broken"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_notices_are_flushed_on_destroy() {
        let harness = Harness::new();
        let session = harness.session().await;

        session.post_transient(TEXT, OutgoingMessage::text("aviso temporal"), Duration::from_secs(60));
        harness.settle().await;
        assert_eq!(harness.transport.live_texts_containing("aviso temporal"), 1);

        session.destroy().await;
        harness.settle().await;
        assert_eq!(harness.transport.live_texts_containing("aviso temporal"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn play_failure_advances_like_an_error() {
        let harness = Harness::new();
        harness.backend.fail_next_play();
        let session = harness.session().await;

        session.enqueue(vec![track("bad"), track("good")], false).await;
        harness.settle().await;

        assert_eq!(session.current().unwrap().title(), "good");
    }

    #[tokio::test(start_paused = true)]
    async fn votes_are_cleared_when_the_track_advances() {
        let harness = Harness::new();
        harness.transport.set_listeners((1..=11).collect());
        let session = harness.session().await;
        session.enqueue(vec![track("a"), track("b")], false).await;
        harness.settle().await;

        assert_eq!(
            session.vote(VoteCommand::Skip, UserId::new(2), false),
            VoteReply::Pending { remaining: 3 }
        );
        session.vote(VoteCommand::Pause, UserId::new(3), false);

        finish_current(&harness, &session).await;

        for command in VoteCommand::ALL {
            assert_eq!(session.vote_count(command), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn volume_rules() {
        let harness = Harness::new();
        harness.transport.set_listeners(vec![1]);
        let session = harness.session().await;

        assert_eq!(
            session.set_volume(150, false, false).await.unwrap(),
            VolumeOutcome::NeedsConfirmation(150)
        );
        assert_eq!(session.volume(), 50);

        assert_eq!(
            session.set_volume(150, true, false).await.unwrap(),
            VolumeOutcome::Applied(150)
        );
        assert_eq!(session.volume(), 150);
        assert_eq!(harness.backend.volume(), Some(150));

        assert!(matches!(
            session.set_volume(-5, true, true).await,
            Err(PlayerError::UserInput(_))
        ));
        assert_eq!(session.volume(), 150);

        session.set_volume(95, false, false).await.unwrap();
        assert_eq!(session.volume_up().await.unwrap(), VolumeStep::MaxReached);
        assert_eq!(session.volume(), 100);
        assert_eq!(session.volume_up().await.unwrap(), VolumeStep::MaxReached);
        assert_eq!(session.volume(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn loud_volume_needs_privilege_with_company() {
        let harness = Harness::new();
        harness.transport.set_listeners(vec![1, 2]);
        let session = harness.session().await;

        assert!(matches!(
            session.set_volume(150, true, false).await,
            Err(PlayerError::UserInput(_))
        ));
        assert_eq!(
            session.set_volume(150, false, true).await.unwrap(),
            VolumeOutcome::NeedsConfirmation(150)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn volume_steps_round_to_tens() {
        let harness = Harness::new();
        let session = harness.session().await;

        session.set_volume(43, false, false).await.unwrap();
        assert_eq!(session.volume_up().await.unwrap(), VolumeStep::Raised(60));
        assert_eq!(session.volume_down().await.unwrap(), VolumeStep::Lowered(50));

        session.set_volume(5, false, false).await.unwrap();
        assert_eq!(session.volume_down().await.unwrap(), VolumeStep::Lowered(0));
        assert_eq!(session.volume_down().await.unwrap(), VolumeStep::Muted);
        assert_eq!(session.volume(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_timeout_terminates_and_removes_the_status() {
        let harness = Harness::new();
        harness.transport.set_listeners(vec![1]);
        let session = harness.session().await;

        session.enqueue(vec![track_with_length("T", 180)], false).await;
        harness.settle().await;
        assert_eq!(harness.transport.live_message_count(), 1);

        let reply = session.vote(VoteCommand::Skip, UserId::new(1), false);
        assert_eq!(reply, VoteReply::Passed);
        session.execute(VoteCommand::Skip).await.unwrap();
        harness.settle().await;
        assert!(session.queue().is_empty());
        assert_eq!(session.state(), PlaybackState::Idle);

        tokio::time::sleep(Duration::from_secs(301)).await;
        harness.settle().await;

        assert_eq!(session.state(), PlaybackState::Terminated);
        assert!(session.is_terminated());
        assert_eq!(harness.transport.live_message_count(), 0);
        assert!(harness.registry.get(session.guild_id()).is_none());
        assert_eq!(harness.transport.left_voice(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_refreshes_collapses_into_one_render() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("a")], false).await;
        harness.settle().await;
        let renders_before = harness.transport.status_renders();

        harness.transport.set_latency(Duration::from_secs(1));
        let in_flight = {
            let session = session.clone();
            tokio::spawn(async move { session.request_refresh().await })
        };
        tokio::task::yield_now().await;
        assert!(session.status().is_updating());

        session.request_refresh().await;
        session.request_refresh().await;
        in_flight.await.unwrap();
        assert_eq!(harness.transport.status_renders(), renders_before + 1);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(harness.transport.status_renders(), renders_before + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn seek_validation() {
        let harness = Harness::new();
        let session = harness.session().await;
        assert!(matches!(
            session.seek(Duration::ZERO).await,
            Err(PlayerError::NothingPlaying)
        ));

        session.enqueue(vec![track_with_length("song", 180)], false).await;
        harness.settle().await;
        harness.backend.set_position(Duration::from_secs(170));

        assert!(session.seek(Duration::from_secs(200)).await.is_err());
        session.seek(Duration::from_secs(60)).await.unwrap();
        assert_eq!(harness.backend.last_seek(), Some(Duration::from_secs(60)));
        harness.backend.set_position(Duration::from_secs(170));

        assert!(session.fast_forward(Duration::ZERO).await.is_err());
        let err = session.fast_forward(Duration::from_secs(30)).await.unwrap_err();
        assert!(err.to_string().contains("0:10 restantes"));

        assert_eq!(
            session.rewind(Duration::from_secs(500)).await.unwrap(),
            Duration::ZERO
        );
    }

    #[tokio::test(start_paused = true)]
    async fn huge_fast_forward_is_rejected() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track_with_length("song", 180)], false).await;
        harness.settle().await;
        harness.backend.set_position(Duration::from_secs(10));

        let err = session.fast_forward(Duration::from_secs(u64::MAX)).await.unwrap_err();
        assert!(matches!(err, PlayerError::UserInput(_)));
        assert_eq!(harness.backend.last_seek(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn play_next_keeps_playlist_order_at_the_front() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("playing"), track("later")], false).await;
        harness.settle().await;

        session.enqueue(vec![track("p1"), track("p2"), track("p3")], true).await;

        assert_eq!(
            titles(&session.queue().snapshot()),
            vec!["p1", "p2", "p3", "later"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_and_clear() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("now"), track("x"), track("y"), track("z")], false).await;
        harness.settle().await;

        session.repeat_current().await.unwrap();
        assert_eq!(titles(&session.queue().snapshot()), vec!["now", "x", "y", "z"]);

        assert_eq!(session.clear(1).await, 3);
        assert_eq!(titles(&session.queue().snapshot()), vec!["now"]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_tears_everything_down_once() {
        let harness = Harness::new();
        let session = harness.session().await;
        session.enqueue(vec![track("a"), track("b")], false).await;
        harness.settle().await;

        session.execute(VoteCommand::Stop).await.unwrap();
        session.destroy().await;
        harness.settle().await;

        assert_eq!(session.state(), PlaybackState::Terminated);
        assert!(session.queue().is_empty());
        assert_eq!(harness.transport.live_message_count(), 0);
        assert_eq!(harness.transport.left_voice(), 1);
        assert!(harness.registry.get(session.guild_id()).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_requires_a_current_track() {
        let harness = Harness::new();
        let session = harness.session().await;
        assert!(matches!(session.pause().await, Err(PlayerError::NothingPlaying)));

        session.enqueue(vec![track("a")], false).await;
        harness.settle().await;

        assert!(session.pause().await.unwrap());
        assert!(!session.pause().await.unwrap());
        assert_eq!(session.state(), PlaybackState::Paused);
        assert!(session.resume().await.unwrap());
        assert_eq!(session.state(), PlaybackState::Playing);
        assert_eq!(harness.backend.paused(), Some(false));
    }
}
