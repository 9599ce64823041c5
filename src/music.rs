//! Background music toggle with a persisted on/off preference.
//!
//! The preference is stored under [`MUSIC_PREFERENCE_KEY`] as `"true"` or
//! `"false"`; when absent music defaults to enabled. Playback only starts
//! once the user has interacted with the page.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Preference key for the music on/off state.
pub const MUSIC_PREFERENCE_KEY: &str = "musicEnabled";

/// Background music volume applied before playback.
pub const BACKGROUND_VOLUME: f32 = 0.5;

/// Durable client-side key-value preferences.
pub trait PreferenceStore {
    /// Reads a preference.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be read.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Writes a preference.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot be written.
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/// An audio element that can be played and paused.
pub trait AudioSink {
    /// Starts playback. May be refused, e.g. by an autoplay policy.
    ///
    /// # Errors
    ///
    /// Returns an error if playback was refused.
    fn play(&mut self) -> Result<()>;

    /// Pauses playback.
    fn pause(&mut self);

    /// Whether playback is paused.
    fn is_paused(&self) -> bool;

    /// Sets the volume in `0.0..=1.0`.
    fn set_volume(&mut self, volume: f32);
}

/// Preferences kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct MemoryPreferenceStore {
    values: BTreeMap<String, String>,
}

impl MemoryPreferenceStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PreferenceStore for MemoryPreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Preferences persisted to a TOML file.
#[derive(Debug, Clone)]
pub struct FilePreferenceStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl FilePreferenceStore {
    /// Opens the store at `path`; a missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, values })
    }

    /// The backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PreferenceStore for FilePreferenceStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, toml::to_string(&self.values)?)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

/// An audio sink with no output; it only tracks play/pause state.
#[derive(Debug, Clone, PartialEq)]
pub struct SilentSink {
    paused: bool,
    volume: f32,
}

impl Default for SilentSink {
    fn default() -> Self {
        Self {
            paused: true,
            volume: 1.0,
        }
    }
}

impl SilentSink {
    /// Creates a paused sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current volume.
    #[must_use]
    pub const fn volume(&self) -> f32 {
        self.volume
    }
}

impl AudioSink for SilentSink {
    fn play(&mut self) -> Result<()> {
        self.paused = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn set_volume(&mut self, volume: f32) {
        self.volume = volume.clamp(0.0, 1.0);
    }
}

/// Looping background music with an optional success jingle.
pub struct MusicControl<P: PreferenceStore, A: AudioSink> {
    prefs: P,
    background: A,
    success: Option<A>,
    enabled: bool,
    has_user_interacted: bool,
}

impl<P: PreferenceStore, A: AudioSink> MusicControl<P, A> {
    /// Restores the saved preference and pauses the background track when
    /// music is disabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the preference cannot be read.
    pub fn new(prefs: P, background: A, success: Option<A>) -> Result<Self> {
        let enabled = prefs
            .get(MUSIC_PREFERENCE_KEY)?
            .is_none_or(|value| value == "true");
        let mut control = Self {
            prefs,
            background,
            success,
            enabled,
            has_user_interacted: false,
        };
        if !control.enabled {
            control.background.pause();
        }
        Ok(control)
    }

    /// Whether music is enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the user has interacted with the page yet.
    #[must_use]
    pub const fn has_user_interacted(&self) -> bool {
        self.has_user_interacted
    }

    /// The background track.
    #[must_use]
    pub const fn background(&self) -> &A {
        &self.background
    }

    /// The success track, if any.
    #[must_use]
    pub const fn success(&self) -> Option<&A> {
        self.success.as_ref()
    }

    /// Flips the preference, persists it, and plays or pauses accordingly.
    /// Returns the new enabled state.
    ///
    /// # Errors
    ///
    /// Returns an error if the preference cannot be saved.
    pub fn toggle(&mut self) -> Result<bool> {
        self.has_user_interacted = true;
        self.set_enabled(!self.enabled)
    }

    /// Sets the preference explicitly, persists it, and plays or pauses.
    ///
    /// # Errors
    ///
    /// Returns an error if the preference cannot be saved.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<bool> {
        self.enabled = enabled;
        self.prefs
            .set(MUSIC_PREFERENCE_KEY, if enabled { "true" } else { "false" })?;

        if enabled {
            // Don't talk over the success jingle.
            if self.success.as_ref().is_none_or(|s| s.is_paused()) {
                self.play();
            }
        } else {
            self.background.pause();
            if let Some(success) = self.success.as_mut().filter(|s| !s.is_paused()) {
                success.pause();
            }
        }
        Ok(self.enabled)
    }

    /// Starts the background track if music is enabled and the user has
    /// interacted. A refused play is logged and retried on the next call.
    /// Returns true if playback started.
    pub fn play(&mut self) -> bool {
        if !self.enabled || !self.has_user_interacted {
            return false;
        }
        self.background.set_volume(BACKGROUND_VOLUME);
        match self.background.play() {
            Ok(()) => {
                log::info!("Background music started");
                true
            }
            Err(e) => {
                log::info!("Playback prevented: {e}");
                false
            }
        }
    }

    /// Pauses the background track without changing the preference.
    pub fn pause(&mut self) {
        self.background.pause();
    }

    /// Records the first user interaction and starts playback if enabled.
    pub fn on_first_interaction(&mut self) -> bool {
        if self.has_user_interacted {
            return false;
        }
        self.has_user_interacted = true;
        self.play()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use tempfile::TempDir;

    #[derive(Default)]
    struct BlockedSink {
        attempts: usize,
    }

    impl AudioSink for BlockedSink {
        fn play(&mut self) -> Result<()> {
            self.attempts += 1;
            Err(Error::Config("autoplay blocked".to_string()))
        }

        fn pause(&mut self) {}

        fn is_paused(&self) -> bool {
            true
        }

        fn set_volume(&mut self, _volume: f32) {}
    }

    fn control() -> MusicControl<MemoryPreferenceStore, SilentSink> {
        MusicControl::new(MemoryPreferenceStore::new(), SilentSink::new(), None).unwrap()
    }

    #[test]
    fn enabled_by_default() {
        assert!(control().is_enabled());
    }

    #[test]
    fn saved_false_disables() {
        let mut prefs = MemoryPreferenceStore::new();
        prefs.set(MUSIC_PREFERENCE_KEY, "false").unwrap();
        let music = MusicControl::new(prefs, SilentSink::new(), None).unwrap();
        assert!(!music.is_enabled());
        assert!(music.background().is_paused());
    }

    #[test]
    fn no_playback_before_interaction() {
        let mut music = control();
        assert!(!music.play());
        assert!(music.background().is_paused());

        assert!(music.on_first_interaction());
        assert!(!music.background().is_paused());
        assert!((music.background().volume() - BACKGROUND_VOLUME).abs() < f32::EPSILON);
        assert!(!music.on_first_interaction());
    }

    #[test]
    fn toggle_persists_and_pauses() {
        let mut music = control();
        music.on_first_interaction();

        assert!(!music.toggle().unwrap());
        assert!(music.background().is_paused());
        assert_eq!(
            music.prefs.get(MUSIC_PREFERENCE_KEY).unwrap().as_deref(),
            Some("false")
        );

        assert!(music.toggle().unwrap());
        assert!(!music.background().is_paused());
        assert_eq!(
            music.prefs.get(MUSIC_PREFERENCE_KEY).unwrap().as_deref(),
            Some("true")
        );
    }

    #[test]
    fn toggle_off_pauses_success_jingle() {
        let mut jingle = SilentSink::new();
        jingle.play().unwrap();
        let mut music =
            MusicControl::new(MemoryPreferenceStore::new(), SilentSink::new(), Some(jingle))
                .unwrap();

        music.toggle().unwrap();
        assert!(music.success().unwrap().is_paused());
    }

    #[test]
    fn enabling_waits_for_success_jingle() {
        let mut prefs = MemoryPreferenceStore::new();
        prefs.set(MUSIC_PREFERENCE_KEY, "false").unwrap();
        let mut jingle = SilentSink::new();
        jingle.play().unwrap();
        let mut music = MusicControl::new(prefs, SilentSink::new(), Some(jingle)).unwrap();

        assert!(music.toggle().unwrap());
        assert!(music.background().is_paused());
    }

    #[test]
    fn refused_playback_is_retried() {
        let mut music =
            MusicControl::new(MemoryPreferenceStore::new(), BlockedSink::default(), None)
                .unwrap();
        assert!(!music.on_first_interaction());
        assert!(!music.play());
        assert_eq!(music.background().attempts, 2);
    }

    #[test]
    fn file_store_persists_across_sessions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("prefs").join("preferences.toml");

        let mut music = MusicControl::new(
            FilePreferenceStore::open(&path).unwrap(),
            SilentSink::new(),
            None,
        )
        .unwrap();
        music.toggle().unwrap();

        let reopened = MusicControl::new(
            FilePreferenceStore::open(&path).unwrap(),
            SilentSink::new(),
            None,
        )
        .unwrap();
        assert!(!reopened.is_enabled());
    }
}
