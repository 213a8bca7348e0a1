use crate::errors::{AppError, AppResult};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};

pub type ConfigMap = Map<String, Value>;

/// Keys owned by the AI configuration. Everything else in a merged settings
/// object belongs to the application configuration.
pub const AI_CONFIG_KEYS: [&str; 6] = ["api_key", "base_url", "model", "temperature", "max_tokens", "timeout"];

pub const REQUIRED_AI_KEYS: [&str; 3] = ["api_key", "base_url", "model"];

pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 30;

const HOME_ENV: &str = "MD_EDITOR_HOME";
const STATIC_ENV: &str = "MD_EDITOR_STATIC";

pub fn default_ai_config() -> ConfigMap {
    into_map(json!({
        "api_key": "",
        "base_url": "https://api.openai.com/v1",
        "model": "gpt-4o-mini",
        "temperature": 0.7,
        "max_tokens": 2000,
        "timeout": DEFAULT_AI_TIMEOUT_SECS
    }))
}

pub fn default_app_config() -> ConfigMap {
    into_map(json!({
        "host": "127.0.0.1",
        "port": 5000,
        "debug": false,
        "auto_save": true,
        "auto_save_interval": 30,
        "theme": "light",
        "font_size": 14,
        "tab_size": 4,
        "word_wrap": true,
        "preview_theme": "github",
        "sync_scroll": true,
        "highlight_code": true
    }))
}

fn into_map(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Filesystem layout rooted at one base directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    base_dir: PathBuf,
    static_dir: PathBuf,
}

impl AppPaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let static_dir = base_dir.join("static");
        Self { base_dir, static_dir }
    }

    /// Base directory from `MD_EDITOR_HOME`, otherwise the directory holding
    /// the executable. UI assets come from `MD_EDITOR_STATIC` when set.
    pub fn discover() -> AppResult<Self> {
        let base_dir = match std::env::var_os(HOME_ENV) {
            Some(home) => PathBuf::from(home),
            None => {
                let exe = std::env::current_exe()?;
                exe.parent()
                    .map(Path::to_path_buf)
                    .ok_or_else(|| AppError::Internal("executable has no parent directory".to_string()))?
            }
        };
        Ok(Self::resolve(base_dir, std::env::var_os(STATIC_ENV).map(PathBuf::from)))
    }

    fn resolve(base_dir: PathBuf, static_override: Option<PathBuf>) -> Self {
        let paths = Self::new(base_dir);
        let paths = match static_override {
            Some(static_dir) => paths.with_static_dir(static_dir),
            None => paths,
        };
        if !paths.static_dir.join("index.html").is_file() {
            tracing::warn!(
                static_dir = %paths.static_dir.display(),
                "index.html not found; set {} to the UI asset directory",
                STATIC_ENV
            );
        }
        paths
    }

    pub fn with_static_dir(mut self, static_dir: impl Into<PathBuf>) -> Self {
        self.static_dir = static_dir.into();
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn data_dir(&self) -> PathBuf {
        self.base_dir.join("data")
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join("md_editor.db")
    }

    pub fn ai_config_path(&self) -> PathBuf {
        self.data_dir().join("config.json")
    }

    pub fn app_config_path(&self) -> PathBuf {
        self.data_dir().join("app_config.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir().join("logs")
    }

    pub fn version_path(&self) -> PathBuf {
        self.data_dir().join("version.json")
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }

    /// Writable counterpart of [`AppPaths::static_dir`], always under the base
    /// directory. Served under `/static` after the bundled assets.
    pub fn public_dir(&self) -> PathBuf {
        self.base_dir.join("static")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.public_dir().join("uploads")
    }
}

/// Two independent JSON documents: AI provider settings and application
/// preferences. Reads fall back to the full default mapping; writes replace
/// the whole file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    ai_config_path: PathBuf,
    app_config_path: PathBuf,
}

impl ConfigStore {
    pub fn open(paths: &AppPaths) -> AppResult<Self> {
        let store = Self {
            ai_config_path: paths.ai_config_path(),
            app_config_path: paths.app_config_path(),
        };
        store.ensure_exists()?;
        Ok(store)
    }

    fn ensure_exists(&self) -> AppResult<()> {
        if !self.ai_config_path.exists() {
            tracing::info!(path = %self.ai_config_path.display(), "seeding default ai config");
            self.save_ai_config(&default_ai_config())?;
        }
        if !self.app_config_path.exists() {
            tracing::info!(path = %self.app_config_path.display(), "seeding default app config");
            self.save_app_config(&default_app_config())?;
        }
        Ok(())
    }

    pub fn get_ai_config(&self) -> ConfigMap {
        read_or_default(&self.ai_config_path, default_ai_config)
    }

    pub fn save_ai_config(&self, config: &ConfigMap) -> AppResult<()> {
        write_config(&self.ai_config_path, config)
    }

    pub fn get_app_config(&self) -> ConfigMap {
        read_or_default(&self.app_config_path, default_app_config)
    }

    pub fn save_app_config(&self, config: &ConfigMap) -> AppResult<()> {
        write_config(&self.app_config_path, config)
    }

    /// AI config overlaid by app config.
    pub fn merged_settings(&self) -> ConfigMap {
        let mut merged = self.get_ai_config();
        merged.extend(self.get_app_config());
        merged
    }

    /// Each side is written only when the submitted settings carry keys for it.
    pub fn save_settings(&self, settings: ConfigMap) -> AppResult<()> {
        let (ai, app) = split_settings(settings);
        if !ai.is_empty() {
            self.save_ai_config(&ai)?;
        }
        if !app.is_empty() {
            self.save_app_config(&app)?;
        }
        Ok(())
    }
}

/// Routes [`AI_CONFIG_KEYS`] to the first map and every other key, recognized
/// or not, to the second.
pub fn split_settings(settings: ConfigMap) -> (ConfigMap, ConfigMap) {
    let mut ai = Map::new();
    let mut app = Map::new();
    for (key, value) in settings {
        if AI_CONFIG_KEYS.contains(&key.as_str()) {
            ai.insert(key, value);
        } else {
            app.insert(key, value);
        }
    }
    (ai, app)
}

fn read_or_default(path: &Path, default: fn() -> ConfigMap) -> ConfigMap {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "config unreadable, using defaults");
            return default();
        }
    };

    match serde_json::from_str::<Value>(&raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!(path = %path.display(), "config is not a json object, using defaults");
            default()
        }
        Err(error) => {
            tracing::warn!(path = %path.display(), error = %error, "config malformed, using defaults");
            default()
        }
    }
}

fn write_config(path: &Path, config: &ConfigMap) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let raw = serde_json::to_string_pretty(config)?;
    fs::write(path, raw)?;
    tracing::info!(path = %path.display(), keys = config.len(), "config saved");
    Ok(())
}

/// Validated view of the AI configuration used for a single provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct AiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub timeout_secs: u64,
}

impl AiSettings {
    pub fn from_config(config: &ConfigMap) -> AppResult<Self> {
        let missing: Vec<String> = REQUIRED_AI_KEYS
            .iter()
            .filter(|key| non_empty_str(config, key).is_none())
            .map(|key| key.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AppError::ConfigIncomplete(missing));
        }

        Ok(Self {
            api_key: non_empty_str(config, "api_key").unwrap_or_default().to_string(),
            base_url: non_empty_str(config, "base_url").unwrap_or_default().to_string(),
            model: non_empty_str(config, "model").unwrap_or_default().to_string(),
            temperature: config.get("temperature").and_then(Value::as_f64).unwrap_or(0.7),
            max_tokens: config.get("max_tokens").and_then(Value::as_u64).unwrap_or(2000),
            timeout_secs: config
                .get("timeout")
                .and_then(Value::as_u64)
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_AI_TIMEOUT_SECS),
        })
    }

    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

fn non_empty_str<'a>(config: &'a ConfigMap, key: &str) -> Option<&'a str> {
    config
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Bind address and log verbosity taken from the application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
}

impl ServerSettings {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            host: non_empty_str(config, "host").unwrap_or("127.0.0.1").to_string(),
            port: config
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|port| u16::try_from(port).ok())
                .unwrap_or(5000),
            debug: config.get("debug").and_then(Value::as_bool).unwrap_or(false),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.address())
    }
}

#[cfg(test)]
mod tests {
    use super::{
        default_ai_config, default_app_config, split_settings, AiSettings, AppPaths, ConfigMap, ConfigStore,
        ServerSettings,
    };
    use crate::errors::AppError;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        value.as_object().cloned().expect("object")
    }

    #[test]
    fn open_seeds_both_files_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path());
        let store = ConfigStore::open(&paths).expect("store");

        assert!(paths.ai_config_path().exists());
        assert!(paths.app_config_path().exists());
        assert_eq!(store.get_ai_config(), default_ai_config());
        assert_eq!(store.get_app_config(), default_app_config());
    }

    #[test]
    fn uploads_stay_under_base_dir_when_assets_live_elsewhere() {
        let dir = tempfile::tempdir().expect("tempdir");
        let assets = dir.path().join("bundle").join("ui");

        let paths = AppPaths::resolve(dir.path().join("home"), Some(assets.clone()));
        assert_eq!(paths.static_dir(), assets.as_path());
        assert_eq!(paths.upload_dir(), dir.path().join("home").join("static").join("uploads"));

        let paths = AppPaths::resolve(dir.path().join("home"), None);
        assert_eq!(paths.static_dir(), dir.path().join("home").join("static").as_path());
        assert_eq!(paths.public_dir(), paths.static_dir());
    }

    #[test]
    fn ai_config_round_trips_exactly() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::open(&AppPaths::new(dir.path())).expect("store");

        let config = map(json!({
            "api_key": "sk-test",
            "base_url": "http://localhost:9999/v1",
            "model": "tiny",
            "temperature": 0.2,
            "max_tokens": 64,
            "timeout": 5
        }));
        store.save_ai_config(&config).expect("save");
        assert_eq!(store.get_ai_config(), config);
        assert_eq!(store.get_app_config(), default_app_config());
    }

    #[test]
    fn malformed_or_missing_files_read_as_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = AppPaths::new(dir.path());
        let store = ConfigStore::open(&paths).expect("store");

        std::fs::write(paths.app_config_path(), "{not json").expect("corrupt");
        assert_eq!(store.get_app_config(), default_app_config());

        std::fs::write(paths.ai_config_path(), "[1, 2, 3]").expect("array");
        assert_eq!(store.get_ai_config(), default_ai_config());

        std::fs::remove_file(paths.ai_config_path()).expect("remove");
        assert_eq!(store.get_ai_config(), default_ai_config());
    }

    #[test]
    fn stored_mapping_is_never_merged_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::open(&AppPaths::new(dir.path())).expect("store");

        let partial = map(json!({ "theme": "dark" }));
        store.save_app_config(&partial).expect("save");
        assert_eq!(store.get_app_config(), partial);
    }

    #[test]
    fn split_routes_ai_keys_and_passes_unknown_keys_to_app() {
        let (ai, app) = split_settings(map(json!({
            "api_key": "k",
            "timeout": 10,
            "theme": "dark",
            "custom_flag": true
        })));

        assert_eq!(ai, map(json!({ "api_key": "k", "timeout": 10 })));
        assert_eq!(app, map(json!({ "theme": "dark", "custom_flag": true })));
    }

    #[test]
    fn save_settings_only_touches_sides_with_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ConfigStore::open(&AppPaths::new(dir.path())).expect("store");

        store.save_settings(map(json!({ "theme": "dark" }))).expect("save");
        assert_eq!(store.get_ai_config(), default_ai_config());
        assert_eq!(store.get_app_config(), map(json!({ "theme": "dark" })));

        let merged = store.merged_settings();
        assert_eq!(merged.get("theme"), Some(&json!("dark")));
        assert_eq!(merged.get("model"), Some(&json!("gpt-4o-mini")));
    }

    #[test]
    fn ai_settings_name_every_missing_required_key() {
        let result = AiSettings::from_config(&map(json!({ "base_url": "http://x", "api_key": "  " })));
        match result {
            Err(AppError::ConfigIncomplete(missing)) => assert_eq!(missing, vec!["api_key", "model"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn ai_settings_fill_optional_parameters() {
        let settings = AiSettings::from_config(&map(json!({
            "api_key": "k",
            "base_url": "http://localhost/v1/",
            "model": "m"
        })))
        .expect("settings");

        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.max_tokens, 2000);
        assert_eq!(settings.completions_url(), "http://localhost/v1/chat/completions");
    }

    #[test]
    fn server_settings_tolerate_mistyped_values() {
        let settings = ServerSettings::from_config(&map(json!({ "port": "eighty", "debug": true })));
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 5000);
        assert!(settings.debug);
        assert_eq!(settings.url(), "http://127.0.0.1:5000");
    }
}
