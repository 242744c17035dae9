use serde_derive::{Deserialize, Serialize};

/// Persisted CLI configuration, loaded with `confy` from the platform config
/// directory (or an explicit path passed on the command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLoad {
    version: u8,

    /// Path to the on-disk log file backing the store. `:memory:` selects
    /// the in-memory engine instead, discarding all data on exit.
    pub db_path: String,

    pub prompt: Option<String>,

    /// Show a running op count after every command.
    pub show_stats: Option<bool>,
}

impl Default for ConfigLoad {
    fn default() -> Self {
        ConfigLoad {
            version: 0,
            db_path: ":memory:".to_string(),
            prompt: Some("kvcli".to_string()),
            show_stats: Some(false),
        }
    }
}

impl ConfigLoad {
    pub fn load(path: &str) -> Self {
        match confy::load_path(path) {
            Ok(cfg) => cfg,
            Err(_) => ConfigLoad::default(),
        }
    }

    pub fn terminal_update(&mut self) {
        self.show_stats = Some(true);
    }
}
