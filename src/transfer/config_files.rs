//! Config-service file operations on the SD card.
//!
//! | Path                          | Role                                   |
//! |-------------------------------|----------------------------------------|
//! | `/config/`                    | active config and helper scripts       |
//! | `/config_update/`             | staging area for uploads               |
//! | `/config/config.json`         | the live device configuration          |
//! | `/config_update/config.json`  | last uploaded configuration, verified  |
//!
//! A new `config.json` is written to the staging area first, read back and
//! parsed, and only then copied over the active one.

use log::{info, warn};

use crate::app::commands::ResponseCode;
use crate::app::ports::{FileStore, StorageError};
use crate::config::DeviceConfig;

pub const ACTIVE_DIR: &str = "/config";
pub const UPDATE_DIR: &str = "/config_update";
pub const ACTIVE_CONFIG: &str = "/config/config.json";
pub const STAGED_CONFIG: &str = "/config_update/config.json";
pub const STAGED_CALIBRATION: &str = "/config_update/calib_coeff.json";
pub const ACTIVE_CALIBRATION: &str = "/config/calib_coeff.json";

/// Width of the NUL-padded name field in SAVE_FILE / GET_FILE requests.
pub const NAME_FIELD: usize = 100;

const LISTED_EXTENSIONS: [&str; 2] = [".py", ".json"];

/// Normalise a peer-supplied file name into an absolute card path.
///
/// Backslashes become slashes, `..` is refused, a bare name lands in the
/// staging directory.
pub fn resolve_path(name: &str) -> Option<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut path = trimmed.replace('\\', "/");
    if path.contains("..") {
        warn!("Config: refusing path with '..': {}", trimmed);
        return None;
    }
    if !path.starts_with('/') {
        path.insert(0, '/');
    }
    while path.contains("//") {
        path = path.replace("//", "/");
    }
    if !path[1..].contains('/') {
        path.insert_str(0, UPDATE_DIR);
    }
    Some(path)
}

/// Printable ASCII from the name field, up to the first NUL.
pub fn extract_name(field: &[u8]) -> String {
    field
        .iter()
        .take(NAME_FIELD)
        .take_while(|&&b| b != 0)
        .filter(|b| (32..=126).contains(*b))
        .map(|&b| char::from(b))
        .collect()
}

fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Thin layer over a [`FileStore`] for the config commands.
pub struct ConfigFiles<F: FileStore> {
    files: F,
}

impl<F: FileStore> ConfigFiles<F> {
    pub fn new(files: F) -> Self {
        Self { files }
    }

    /// JSON array of `.py` / `.json` names in the active directory,
    /// case-insensitively de-duplicated and sorted.
    pub fn list(&self) -> String {
        let mut names: Vec<String> = Vec::new();
        let entries = match self.files.list(ACTIVE_DIR) {
            Ok(entries) => entries,
            Err(StorageError::NotFound) => Vec::new(),
            Err(e) => {
                warn!("Config: listing {} failed: {}", ACTIVE_DIR, e);
                Vec::new()
            }
        };
        for name in entries {
            let lower = name.to_ascii_lowercase();
            if !LISTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
                continue;
            }
            if names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                continue;
            }
            names.push(name);
        }
        names.sort();
        serde_json::to_string(&names).unwrap_or_else(|_| "[]".into())
    }

    /// Content of `name`. Absolute paths are opened as given; bare names
    /// are searched in the active, staging and root directories.
    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        if name.starts_with('/') {
            return self.files.read(name).ok();
        }
        [ACTIVE_DIR, UPDATE_DIR, ""].iter().find_map(|root| {
            let mut path = format!("{root}/{name}");
            while path.contains("//") {
                path = path.replace("//", "/");
            }
            self.files.read(&path).ok()
        })
    }

    /// Store an uploaded file.
    pub fn save(&self, name: &str, content: &[u8]) -> ResponseCode {
        let Some(path) = resolve_path(name) else {
            return ResponseCode::UnknownCommand;
        };
        if let Err(e) = self.files.create_dir_all(parent_dir(&path)) {
            warn!("Config: cannot create {}: {}", parent_dir(&path), e);
            return ResponseCode::FileNotFound;
        }
        match self.files.write(&path, content) {
            Ok(()) => {
                info!("Config: saved {} ({} bytes)", path, content.len());
                ResponseCode::Ok
            }
            Err(e) => {
                warn!("Config: writing {} failed: {}", path, e);
                ResponseCode::FileNotFound
            }
        }
    }

    /// Stage, verify and activate a new `config.json`.
    pub fn install_config(&self, document: &[u8]) -> Result<DeviceConfig, ResponseCode> {
        let document = trim_trailing_nuls(document);
        if serde_json::from_slice::<serde_json::Value>(document).is_err() {
            warn!("Config: upload is not valid JSON");
            return Err(ResponseCode::JsonError);
        }
        let config = DeviceConfig::from_json(document).map_err(|e| {
            warn!("Config: rejected: {}", e);
            ResponseCode::InvalidConfig
        })?;

        self.files
            .write(STAGED_CONFIG, document)
            .map_err(|_| ResponseCode::FileNotFound)?;
        let staged = self
            .files
            .read(STAGED_CONFIG)
            .map_err(|_| ResponseCode::FileNotFound)?;
        if DeviceConfig::from_json(&staged).is_err() {
            warn!("Config: staged copy does not read back");
            return Err(ResponseCode::FileNotFound);
        }
        self.files
            .write(ACTIVE_CONFIG, &staged)
            .map_err(|_| ResponseCode::FileNotFound)?;
        self.promote_calibration();
        info!("Config: activated ({} bytes)", staged.len());
        Ok(config)
    }

    /// The active configuration, if one is installed and valid.
    pub fn active_config(&self) -> Option<DeviceConfig> {
        let bytes = self.files.read(ACTIVE_CONFIG).ok()?;
        DeviceConfig::from_json(&bytes).ok()
    }

    fn promote_calibration(&self) {
        let Ok(bytes) = self.files.read(STAGED_CALIBRATION) else {
            return;
        };
        if serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
            warn!("Config: staged calibration is not valid JSON, kept out");
            return;
        }
        if let Err(e) = self.files.write(ACTIVE_CALIBRATION, &bytes) {
            warn!("Config: calibration not activated: {}", e);
        }
    }
}

fn trim_trailing_nuls(data: &[u8]) -> &[u8] {
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    &data[..end]
}

// ── Tests ────────────────────────────────────────────────────
