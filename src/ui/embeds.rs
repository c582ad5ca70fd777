use chrono::{DateTime, Utc};
use serenity::{
    all::{Colour, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};
use std::time::Duration;

use crate::{
    player::{
        equalizer::EqualizerPreset,
        session::StatusView,
        track::{Track, TrackInfo},
    },
    storage::SavedPlaylist,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
    pub const CONTROLLER_AMBER: Colour = Colour::from_rgb(255, 179, 71);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Music Bot";

/// Largo máximo de un título en las vistas previas de la cola
const PREVIEW_TITLE_LEN: usize = 45;

/// Contenido enriquecido de un mensaje, independiente del transporte.
///
/// Los tests inspeccionan los campos directamente; el transporte de Discord lo
/// convierte con [`Card::to_embed`].
#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub title: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub color: Colour,
    pub thumbnail: Option<String>,
    pub fields: Vec<CardField>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CardField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

impl Card {
    pub fn new(title: impl Into<String>, color: Colour) -> Self {
        Self {
            title: title.into(),
            description: None,
            url: None,
            color,
            thumbnail: None,
            fields: Vec::new(),
            footer: Some(STANDARD_FOOTER.to_string()),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn thumbnail(mut self, thumbnail: Option<String>) -> Self {
        self.thumbnail = thumbnail;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(CardField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, footer: impl Into<String>) -> Self {
        self.footer = Some(footer.into());
        self
    }

    /// Busca un campo por nombre
    pub fn field_value(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|field| field.name == name)
            .map(|field| field.value.as_str())
    }

    pub fn to_embed(&self) -> CreateEmbed {
        let mut embed = CreateEmbed::default()
            .title(&self.title)
            .color(self.color)
            .timestamp(Timestamp::now());

        if let Some(description) = &self.description {
            embed = embed.description(description);
        }
        if let Some(url) = &self.url {
            embed = embed.url(url);
        }
        if let Some(thumbnail) = &self.thumbnail {
            embed = embed.thumbnail(thumbnail);
        }
        for field in &self.fields {
            embed = embed.field(&field.name, &field.value, field.inline);
        }
        if let Some(footer) = &self.footer {
            embed = embed.footer(CreateEmbedFooter::new(footer));
        }

        embed
    }
}

/// Tarjeta del controlador: lo que suena, cómo suena y lo que viene.
pub fn status_card(view: &StatusView) -> Card {
    let Some(track) = &view.current else {
        return Card::new("🎛️ Controlador de Música", colors::NEUTRAL_GRAY)
            .description("😴 **No hay nada sonando**\n\n💡 Usa `/play <canción>` para agregar música");
    };

    let indicator = if view.paused {
        "⏸️ **EN PAUSA**"
    } else {
        "🎶 **Reproduciendo ahora:**"
    };

    let duration = match track.duration() {
        None => "🔴 `En vivo`".to_string(),
        Some(total) => format!(
            "{}/{}",
            format_duration(view.position.unwrap_or_default()),
            format_duration(total)
        ),
    };

    let mut card = Card::new("🎛️ Controlador de Música", colors::CONTROLLER_AMBER)
        .description(format!(
            "{}```ini\n{}\n\n[EQ]: {} [{}]```",
            indicator,
            track.title(),
            view.equalizer,
            EqualizerPreset::choices()
        ))
        .thumbnail(track.info.thumbnail.clone())
        .field("⏱️ Duración", duration, true)
        .field("🔗 Video", format!("[Abrir]({})", track.info.uri), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester), true)
        .field("📋 En cola", view.queue_len.to_string(), true)
        .field("🔊 Volumen", format!("**`{}%`**", view.volume), true)
        .field("🔁 Loop", if view.looping { "ON" } else { "OFF" }, true);

    if !view.upcoming.is_empty() {
        let coming_up = view
            .upcoming
            .iter()
            .map(|t| format!("**-** `{}`\n{}", truncate_title(t.title(), PREVIEW_TITLE_LEN), "-".repeat(10)))
            .collect::<Vec<_>>()
            .join("\n");
        card = card.field("⏭️ A continuación", coming_up, false);
    }

    card
}

/// Lista numerada de los próximos tracks con cuánto llevan esperando
pub fn queue_card(upcoming: &[Track], now: DateTime<Utc>) -> Card {
    if upcoming.is_empty() {
        return Card::new("📋 Cola de Reproducción", colors::NEUTRAL_GRAY)
            .description("😴 **No quedan canciones en la cola**");
    }

    let description = upcoming
        .iter()
        .enumerate()
        .map(|(i, track)| {
            let length = track
                .duration()
                .map_or_else(|| "En vivo".to_string(), format_duration);
            format!(
                "`{}. [{}] {}` {}",
                i + 1,
                length,
                truncate_title(track.title(), PREVIEW_TITLE_LEN),
                format_waiting(track.waiting(now))
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Card::new(
        format!("📋 Próximas - siguientes {}", upcoming.len()),
        colors::INFO_BLUE,
    )
    .description(description)
}

fn format_waiting(waiting: Duration) -> String {
    match waiting.as_secs() / 60 {
        0 => "(recién agregada)".to_string(),
        1 => "(hace 1 minuto)".to_string(),
        minutes => format!("(hace {} minutos)", minutes),
    }
}

/// Opciones de búsqueda para elegir con reacciones numeradas
pub fn selection_card(options: &[TrackInfo]) -> Card {
    let description = options
        .iter()
        .enumerate()
        .map(|(i, info)| {
            let length = info
                .duration
                .map_or_else(|| "En vivo".to_string(), format_duration);
            format!(
                "{}\u{20e3} `{}` - `{}` [{}]\n{}",
                i + 1,
                truncate_title(&info.title, 90),
                truncate_title(&info.author, 40),
                length,
                "-".repeat(15)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    Card::new("🔍 Búsqueda en YouTube", colors::ERROR_RED).description(description)
}

pub fn playlists_card(playlists: &[SavedPlaylist]) -> Card {
    let description = playlists
        .iter()
        .map(|p| format!("[{}]({})", p.name, p.url))
        .collect::<Vec<_>>()
        .join("\n");

    Card::new("💾 Playlists Guardadas", colors::MUSIC_PURPLE).description(description)
}

pub fn track_added_card(track: &TrackInfo, front: bool) -> Card {
    let target = if front { "al frente de la cola" } else { "a la cola" };
    let duration = track
        .duration
        .map_or_else(|| "🔴 En vivo".to_string(), format_duration);

    Card::new("✅ Canción Agregada", colors::SUCCESS_GREEN)
        .description(format!("**{}** se agregó {}", track.title, target))
        .field("🎤 Artista", &track.author, true)
        .field("⏱️ Duración", duration, true)
        .url(&track.uri)
        .thumbnail(track.thumbnail.clone())
}

pub fn playlist_added_card(name: &str, count: usize, front: bool) -> Card {
    let target = if front { "al frente de la cola" } else { "a la cola" };
    Card::new("📋 Playlist Agregada", colors::MUSIC_PURPLE)
        .description(format!("Se agregó la playlist **{}** con {} canciones {}", name, count, target))
        .field("📊 Canciones agregadas", count.to_string(), true)
}

pub fn error_card(description: &str) -> Card {
    Card::new("❌ Error", colors::ERROR_RED).description(description)
}

pub fn info_card(title: &str, description: &str) -> Card {
    Card::new(format!("ℹ️ {}", title), colors::INFO_BLUE).description(description)
}

pub fn warning_card(description: &str) -> Card {
    Card::new("⚠️ Confirmación", colors::WARNING_ORANGE).description(description)
}

/// Recorta a `max` caracteres agregando "..." si hizo falta.
pub fn truncate_title(title: &str, max: usize) -> String {
    if title.chars().count() > max {
        format!("{}...", title.chars().take(max).collect::<String>())
    } else {
        title.to_string()
    }
}

/// Formatea una duración en formato legible
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}
