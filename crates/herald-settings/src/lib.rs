//! # herald-settings
//!
//! Configuration for the Herald notification relay.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`HeraldSettings::default()`]
//! 2. **Settings file** — `$HERALD_SETTINGS` or `~/.herald/settings.json`
//!    (deep-merged over defaults)
//! 3. **Environment variables** — `PORT` and `HERALD_*` overrides (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use herald_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on port {}", settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides, deep_merge, load_settings, load_settings_from_path,
    read_settings_file, settings_path,
};
pub use types::{HeraldSettings, LogFormat, LoggingSettings, ServerSettings};
