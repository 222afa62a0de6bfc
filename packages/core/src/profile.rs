use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

fn default_baud() -> u32 {
    115_200
}

/// Configuration bundle for one device under test: how to reach it over UART,
/// which pins wake/reset it, and what its firmware tasks are called.
///
/// The `tasks` map is descriptive metadata only. It is never validated
/// against the task range the engine enforces, so a profile may happily
/// label tasks the firmware does not have.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DutProfile {
    pub name: String,
    pub uart_port: String,
    #[serde(default = "default_baud")]
    pub uart_baud: u32,
    #[serde(default)]
    pub gpio_wake: Option<u8>,
    #[serde(default)]
    pub gpio_reset: Option<u8>,
    #[serde(default)]
    pub tasks: BTreeMap<String, String>,
}

impl DutProfile {
    pub fn new(name: impl Into<String>, uart_port: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uart_port: uart_port.into(),
            uart_baud: default_baud(),
            gpio_wake: None,
            gpio_reset: None,
            tasks: BTreeMap::new(),
        }
    }

    /// Display label for a task number, from the profile's task map.
    pub fn task_description(&self, number: i64) -> Option<&str> {
        self.tasks.get(&number.to_string()).map(String::as_str)
    }

    /// Safe default for hosts without real hardware attached.
    pub fn mock() -> Self {
        let mut profile = Self::new("mock", "/dev/ttyUSB0");
        for n in 1..=5u8 {
            profile.tasks.insert(n.to_string(), format!("Task {n}"));
        }
        profile
    }
}

/// Directory-backed profile storage, one `<name>.json` per profile.
/// A `mock` profile is created on first open if absent.
pub struct ProfileStore {
    dir: PathBuf,
    profiles: BTreeMap<String, DutProfile>,
}

impl ProfileStore {
    /// Default location under the user's home directory.
    pub fn default_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir()
            .context("Failed to resolve home directory")?
            .join(".benchlink")
            .join("profiles"))
    }

    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let mut store = Self {
            dir,
            profiles: BTreeMap::new(),
        };
        store.load_all();
        store.ensure_mock_profile()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reload every `*.json` profile from disk. Unreadable files are logged
    /// and skipped so one corrupt profile cannot hide the rest.
    pub fn load_all(&mut self) {
        self.profiles.clear();
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) => {
                log::warn!("Failed to read profile dir {}: {err}", self.dir.display());
                return;
            }
        };
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match Self::read_profile(&path) {
                Ok(profile) => {
                    self.profiles.insert(profile.name.clone(), profile);
                }
                Err(err) => log::warn!("Skipping profile {}: {err}", path.display()),
            }
        }
    }

    fn read_profile(path: &Path) -> Result<DutProfile> {
        let json = fs::read_to_string(path)?;
        let profile: DutProfile = serde_json::from_str(&json)?;
        Ok(profile)
    }

    pub fn save(&mut self, profile: DutProfile) -> Result<()> {
        let path = self.dir.join(format!("{}.json", profile.name));
        let json = serde_json::to_string_pretty(&profile)?;
        fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn delete(&mut self, name: &str) -> Result<()> {
        let path = self.dir.join(format!("{name}.json"));
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }
        self.profiles.remove(name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&DutProfile> {
        self.profiles.get(name)
    }

    pub fn list(&self) -> Vec<&DutProfile> {
        self.profiles.values().collect()
    }

    fn ensure_mock_profile(&mut self) -> Result<()> {
        if !self.profiles.contains_key("mock") {
            self.save(DutProfile::mock())?;
            log::info!("Created default 'mock' profile");
        }
        Ok(())
    }
}
