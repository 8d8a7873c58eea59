use crate::renderer::SchedulerConfig;
use inkstack_core::history::HistoryConfig;

const DOCUMENTATION: &str = r#"# Inkstack preferences. You may edit this file, but be aware that formatting and comments will not
# be preserved. Missing keys take their default value.

# [history]
# max_undo_depth = 256         # Commands kept for undo. Remove the key for no limit.
# [scheduler]
# frame_interval_ms = 16.667   # Length of one display frame.
# grace_frames = 5             # Frames a live preview may take before it's cancelled.
# event_capacity = 64          # Scheduler events buffered for slow listeners.

"#;

#[must_use]
pub fn preferences_dir() -> Option<std::path::PathBuf> {
    let mut base_dir = dirs::preference_dir()?;
    base_dir.push(env!("CARGO_PKG_NAME"));
    Some(base_dir)
}

#[derive(Clone, Copy, PartialEq, Debug, Default, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub history: HistoryConfig,
    pub scheduler: SchedulerConfig,
}
impl Preferences {
    const FILENAME: &'static str = "preferences.toml";
    /// Load the user's preferences, or defaults if unavailable for some reason.
    #[must_use]
    pub fn load() -> Self {
        match preferences_dir() {
            None => {
                log::warn!("No preferences dir, defaulting.");
                Self::default()
            }
            Some(mut dir) => {
                dir.push(Self::FILENAME);
                Self::load_or_default(&dir)
            }
        }
    }
    #[must_use]
    pub fn load_or_default(path: &std::path::Path) -> Self {
        let loaded: anyhow::Result<Self> = try_block::try_block! {
            let string = std::fs::read_to_string(path)?;
            let preferences: Self = toml::from_str(&string)?;
            Ok(preferences)
        };
        match loaded {
            Ok(preferences) => preferences,
            Err(e) => {
                log::warn!("Preferences at {path:?} weren't available, defaulting: {e:#}");
                Self::default()
            }
        }
    }
    /// Save to the user's preferences dir.
    pub fn save(&self) -> anyhow::Result<()> {
        let preferences =
            preferences_dir().ok_or_else(|| anyhow::anyhow!("No preferences dir found"))?;
        // Explicity do *not* create recursively. If not found, the user probably has a good reason.
        // Ignore errors (could already exist). Any real errors will be emitted by file access below.
        let _ = std::fs::DirBuilder::new().create(&preferences);
        self.save_to(&preferences.join(Self::FILENAME))
    }
    pub fn save_to(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let string = toml::ser::to_string_pretty(self)?;
        // Prefix some documentation.
        std::fs::write(path, DOCUMENTATION.to_owned() + &string)?;
        Ok(())
    }
}
