use std::{fmt, str::FromStr};

use crate::error::PlayerError;

/// Presets de ecualizador disponibles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EqualizerPreset {
    #[default]
    Flat,
    Boost,
    Metal,
    Piano,
}

impl EqualizerPreset {
    pub const ALL: [EqualizerPreset; 4] = [
        EqualizerPreset::Flat,
        EqualizerPreset::Boost,
        EqualizerPreset::Metal,
        EqualizerPreset::Piano,
    ];

    pub fn name(self) -> &'static str {
        match self {
            EqualizerPreset::Flat => "Flat",
            EqualizerPreset::Boost => "Boost",
            EqualizerPreset::Metal => "Metal",
            EqualizerPreset::Piano => "Piano",
        }
    }

    /// Lista para mensajes de ayuda: "Flat/Boost/Metal/Piano"
    pub fn choices() -> String {
        Self::ALL
            .iter()
            .map(|preset| preset.name())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl fmt::Display for EqualizerPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EqualizerPreset {
    type Err = PlayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|preset| preset.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                PlayerError::input(format!(
                    "`{}` no es un ecualizador válido. Prueba {}",
                    s.trim(),
                    Self::choices().replace('/', ", ")
                ))
            })
    }
}
