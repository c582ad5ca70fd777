use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{
    collections::{BTreeSet, HashSet},
    path::{Path, PathBuf},
};
use tokio::{fs, sync::Mutex};
use tracing::{debug, info};

const PLAYLISTS_FILE: &str = "playlists.json";
const NOAFK_FILE: &str = "noafk.json";

/// Playlist guardada por un usuario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPlaylist {
    pub owner: u64,
    /// Siempre en minúsculas
    pub name: String,
    pub url: String,
    pub private: bool,
}

impl SavedPlaylist {
    pub fn new(owner: UserId, name: &str, url: impl Into<String>, private: bool) -> Self {
        Self {
            owner: owner.get(),
            name: name.trim().to_lowercase(),
            url: url.into(),
            private,
        }
    }

    fn visible_to(&self, user: UserId) -> bool {
        !self.private || self.owner == user.get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Lo que el reproductor necesita persistir: playlists guardadas y quién
/// quiere volver del canal AFK.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MusicStore: Send + Sync {
    /// URL de la playlist `name` visible para `user`; la propia gana sobre una pública ajena
    async fn lookup_playlist(&self, user: UserId, name: &str) -> Result<Option<String>>;

    /// Playlists públicas y propias, sin nombres repetidos y con las propias primero
    async fn list_playlists(&self, user: UserId) -> Result<Vec<SavedPlaylist>>;

    async fn insert_playlist(&self, playlist: SavedPlaylist) -> Result<InsertOutcome>;

    async fn delete_playlist(&self, user: UserId, name: &str) -> Result<DeleteOutcome>;

    async fn opt_in_users(&self) -> Result<HashSet<UserId>>;

    /// Alterna la preferencia y devuelve si quedó activada
    async fn toggle_opt_in(&self, user: UserId) -> Result<bool>;
}

#[derive(Debug, Default)]
struct StoreData {
    playlists: Vec<SavedPlaylist>,
    noafk: BTreeSet<u64>,
}

/// Almacenamiento en archivos JSON dentro de `DATA_DIR`.
///
/// Todo se mantiene en memoria y cada cambio reescribe el archivo afectado.
pub struct JsonStorage {
    data_dir: PathBuf,
    data: Mutex<StoreData>,
}

impl JsonStorage {
    pub async fn new(data_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&data_dir).await?;

        let playlists: Vec<SavedPlaylist> = load_json(&data_dir.join(PLAYLISTS_FILE)).await?;
        let noafk: BTreeSet<u64> = load_json(&data_dir.join(NOAFK_FILE)).await?;

        info!(
            "📁 Storage inicializado en {} ({} playlists, {} usuarios noafk)",
            data_dir.display(),
            playlists.len(),
            noafk.len()
        );

        Ok(Self {
            data_dir,
            data: Mutex::new(StoreData { playlists, noafk }),
        })
    }

    /// Escribe en un temporal y lo renombra, así el archivo nunca queda a medias.
    async fn save<T: Serialize>(&self, file: &str, value: &T) -> Result<()> {
        let path = self.data_dir.join(file);
        let staging = self.data_dir.join(format!("{}.tmp", file));
        let content = serde_json::to_string_pretty(value)?;

        fs::write(&staging, content)
            .await
            .with_context(|| format!("No se pudo escribir {}", staging.display()))?;
        fs::rename(&staging, &path)
            .await
            .with_context(|| format!("No se pudo reemplazar {}", path.display()))?;
        debug!("💾 {} guardado", file);
        Ok(())
    }
}

async fn load_json<T: for<'de> Deserialize<'de> + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path).await {
        Ok(content) => serde_json::from_str(&content)
            .with_context(|| format!("{} no es JSON válido", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl MusicStore for JsonStorage {
    async fn lookup_playlist(&self, user: UserId, name: &str) -> Result<Option<String>> {
        let name = name.trim().to_lowercase();
        let data = self.data.lock().await;

        let own = data
            .playlists
            .iter()
            .find(|p| p.name == name && p.owner == user.get());
        let public = || {
            data.playlists
                .iter()
                .find(|p| p.name == name && p.visible_to(user))
        };

        Ok(own.or_else(public).map(|p| p.url.clone()))
    }

    async fn list_playlists(&self, user: UserId) -> Result<Vec<SavedPlaylist>> {
        let data = self.data.lock().await;

        let own = data.playlists.iter().filter(|p| p.owner == user.get());
        let others = data
            .playlists
            .iter()
            .filter(|p| p.owner != user.get() && p.visible_to(user));

        let mut seen = HashSet::new();
        Ok(own
            .chain(others)
            .filter(|p| seen.insert(p.name.clone()))
            .cloned()
            .collect())
    }

    async fn insert_playlist(&self, playlist: SavedPlaylist) -> Result<InsertOutcome> {
        let mut data = self.data.lock().await;

        if data
            .playlists
            .iter()
            .any(|p| p.owner == playlist.owner && p.name == playlist.name)
        {
            return Ok(InsertOutcome::Duplicate);
        }

        let (name, owner) = (playlist.name.clone(), playlist.owner);
        let mut playlists = data.playlists.clone();
        playlists.push(playlist);
        self.save(PLAYLISTS_FILE, &playlists).await?;

        data.playlists = playlists;
        info!("💾 Playlist '{}' guardada por {}", name, owner);
        Ok(InsertOutcome::Inserted)
    }

    async fn delete_playlist(&self, user: UserId, name: &str) -> Result<DeleteOutcome> {
        let name = name.trim().to_lowercase();
        let mut data = self.data.lock().await;

        let mut playlists = data.playlists.clone();
        playlists.retain(|p| !(p.owner == user.get() && p.name == name));
        if playlists.len() == data.playlists.len() {
            return Ok(DeleteOutcome::NotFound);
        }

        self.save(PLAYLISTS_FILE, &playlists).await?;
        data.playlists = playlists;
        info!("🗑️ Playlist '{}' de {} eliminada", name, user);
        Ok(DeleteOutcome::Deleted)
    }

    async fn opt_in_users(&self) -> Result<HashSet<UserId>> {
        let data = self.data.lock().await;
        Ok(data.noafk.iter().copied().map(UserId::new).collect())
    }

    async fn toggle_opt_in(&self, user: UserId) -> Result<bool> {
        let mut data = self.data.lock().await;

        let mut noafk = data.noafk.clone();
        let enabled = if noafk.remove(&user.get()) {
            false
        } else {
            noafk.insert(user.get());
            true
        };

        self.save(NOAFK_FILE, &noafk).await?;
        data.noafk = noafk;
        Ok(enabled)
    }
}
