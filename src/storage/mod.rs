//! Persistence of completed blocks.
//!  - [preferences::PreferencesFile] is a small user-preferences style store: a JSON object of
//!    opaque blobs under fixed keys, guarded by file locks.
//!  - [history::History] keeps the completed blocks under a single key and is loaded and saved
//!    whole.

pub mod history;
pub mod preferences;

pub const PREFERENCES_FILE_NAME: &str = "preferences.json";
