//! Light/dark preference, the console's only persisted state.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }
}

impl Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => f.write_str("light"),
            Self::Dark => f.write_str("dark"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ThemeError {
    #[error("Failed to persist theme: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize theme: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct ThemeFile {
    theme: Theme,
}

/// File-backed theme preference under the state directory. A missing or
/// unreadable file falls back to light.
pub struct ThemeStore {
    path: PathBuf,
    current: RwLock<Theme>,
}

impl ThemeStore {
    pub async fn load(state_dir: &Path) -> Self {
        let path = state_dir.join("theme.json");
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match serde_json::from_str::<ThemeFile>(&raw) {
                Ok(file) => file.theme,
                Err(e) => {
                    warn!("ignoring malformed theme file {}: {e}", path.display());
                    Theme::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Theme::default(),
            Err(e) => {
                warn!("failed to read theme file {}: {e}", path.display());
                Theme::default()
            }
        };

        Self {
            path,
            current: RwLock::new(current),
        }
    }

    pub async fn current(&self) -> Theme {
        *self.current.read().await
    }

    pub async fn set(&self, theme: Theme) -> Result<(), ThemeError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(&ThemeFile { theme })?;
        tokio::fs::write(&self.path, raw).await?;

        *self.current.write().await = theme;
        Ok(())
    }
}
