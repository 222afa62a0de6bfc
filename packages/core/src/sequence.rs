use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

fn default_wait_unit() -> String {
    "ms".to_string()
}

/// One instruction in a test sequence.
///
/// A closed sum type: the `type` tag on the wire admits exactly these seven
/// kinds. Values the engine validates at execution time (task number range,
/// sleep mode, duration unit) are deliberately left loosely typed so a
/// malformed sequence file still loads and fails as a step result instead of
/// a parse error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Step {
    /// Pulse a wake pin. Falls back to the profile's `gpio_wake` when the
    /// step itself names no pin.
    Wake {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gpio: Option<u8>,
    },
    /// Run firmware task N over UART. The description is display-only and
    /// never read during execution; task labels come from the DUT profile.
    Task {
        number: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    /// Put the MCU into a sleep mode, optionally blocking locally afterwards
    /// while the device is unreachable.
    Sleep {
        mode: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit: Option<String>,
    },
    /// Local delay, no UART traffic.
    Wait {
        duration: f64,
        #[serde(default = "default_wait_unit")]
        unit: String,
    },
    /// Marker evaluated by the engine's top level loop: jumps execution back
    /// to the start of the whole sequence `count` times.
    Repeat { count: u32 },
    /// Unconditional pass, no hardware interaction.
    Pass {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// Unconditional fail, no hardware interaction.
    Fail {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Step {
    /// Wire name of the step kind (`wake`, `task`, ...).
    pub fn kind(&self) -> &'static str {
        match self {
            Step::Wake { .. } => "wake",
            Step::Task { .. } => "task",
            Step::Sleep { .. } => "sleep",
            Step::Wait { .. } => "wait",
            Step::Repeat { .. } => "repeat",
            Step::Pass { .. } => "pass",
            Step::Fail { .. } => "fail",
        }
    }

    /// Kind-specific parameters as a JSON object (the step object minus its
    /// `type` tag). Used by the results store.
    pub fn params(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => {
                map.remove("type");
                map
            }
            _ => serde_json::Map::new(),
        }
    }
}

/// An ordered, named list of steps. Order is significant, duplicates are
/// allowed, and the name doubles as the file stem when persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Sequence {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
        }
    }

    pub fn add_wake(&mut self, gpio: Option<u8>) -> &mut Self {
        self.steps.push(Step::Wake { gpio });
        self
    }

    /// Append a task step. The 1-4 range is enforced at execution time, not
    /// here, so sequences with out-of-range numbers can still be authored,
    /// saved and inspected.
    pub fn add_task(&mut self, number: i64, description: Option<&str>) -> &mut Self {
        self.steps.push(Step::Task {
            number,
            description: description.map(str::to_string),
        });
        self
    }

    pub fn add_sleep(&mut self, mode: &str, duration: Option<f64>, unit: Option<&str>) -> &mut Self {
        self.steps.push(Step::Sleep {
            mode: mode.to_uppercase(),
            duration,
            unit: unit.map(str::to_string),
        });
        self
    }

    pub fn add_wait(&mut self, duration: f64, unit: &str) -> &mut Self {
        self.steps.push(Step::Wait {
            duration,
            unit: unit.to_string(),
        });
        self
    }

    pub fn add_repeat(&mut self, count: u32) -> &mut Self {
        self.steps.push(Step::Repeat { count });
        self
    }

    pub fn add_pass(&mut self, message: Option<&str>) -> &mut Self {
        self.steps.push(Step::Pass {
            message: message.map(str::to_string),
        });
        self
    }

    pub fn add_fail(&mut self, message: Option<&str>) -> &mut Self {
        self.steps.push(Step::Fail {
            message: message.map(str::to_string),
        });
        self
    }

    pub fn remove_step(&mut self, index: usize) -> Option<Step> {
        if index < self.steps.len() {
            Some(self.steps.remove(index))
        } else {
            None
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let sequence: Sequence = serde_json::from_str(&json)
            .with_context(|| format!("Invalid sequence file {}", path.display()))?;
        Ok(sequence)
    }
}

/// Directory-backed sequence storage, one `<name>.json` per sequence. Two
/// sequences with the same name overwrite each other's file.
pub struct SequenceStore {
    dir: PathBuf,
}

impl SequenceStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn save(&self, sequence: &Sequence) -> Result<PathBuf> {
        if sequence.name.is_empty() {
            return Err(anyhow!("Sequence has no name"));
        }
        let path = self.dir.join(format!("{}.json", sequence.name));
        sequence.save(&path)?;
        Ok(path)
    }

    pub fn load(&self, name: &str) -> Result<Sequence> {
        Sequence::load(&self.dir.join(format!("{name}.json")))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        let path = self.dir.join(format!("{name}.json"));
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete {}", path.display()))?;
        }
        Ok(())
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter_map(|e| {
                        let path = e.path();
                        if path.extension().is_some_and(|ext| ext == "json") {
                            path.file_stem().map(|s| s.to_string_lossy().into_owned())
                        } else {
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}
