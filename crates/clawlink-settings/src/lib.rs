//! # clawlink-settings
//!
//! Configuration management with layered sources for the Clawlink agent.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ClawlinkSettings::default()`]
//! 2. **User file** — `~/.clawlink/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `CLAWLINK_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use clawlink_settings::{ClawlinkSettings, get_settings};
//!
//! let settings = get_settings();
//! println!("board url: {}", settings.base_url);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, expand_home, load_settings, load_settings_from_path, settings_path,
};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
///
/// Initialized on first access via [`get_settings`], or explicitly through
/// [`init_settings`] when the binary loads from a non-default path.
static SETTINGS: OnceLock<ClawlinkSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.clawlink/settings.json` with env
/// var overrides. On subsequent calls, returns the cached value. If loading
/// fails, returns compiled defaults.
pub fn get_settings() -> &'static ClawlinkSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// # Errors
///
/// Returns the provided settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: ClawlinkSettings) -> std::result::Result<(), ClawlinkSettings> {
    SETTINGS.set(settings)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
