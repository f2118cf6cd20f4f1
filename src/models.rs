use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Absolute URL of a remotely hosted audio file, as found on the source page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioLink(pub url::Url);

impl AudioLink {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Percent-decoded last path segment, if there is one.
    pub fn file_name(&self) -> Option<String> {
        let segment = self.0.path_segments()?.last()?;
        if segment.is_empty() {
            return None;
        }
        let decoded = urlencoding::decode(segment)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| segment.to_string());
        // Never let a decoded name escape the scratch directory.
        let name = decoded.rsplit(['/', '\\']).next().unwrap_or_default().to_string();
        if name.is_empty() || name == "." || name == ".." {
            None
        } else {
            Some(name)
        }
    }
}

impl fmt::Display for AudioLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct LocalAudioFile {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnergyClass {
    High,
    Medium,
    Low,
}

impl EnergyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyClass::High => "High Energy",
            EnergyClass::Medium => "Medium Energy",
            EnergyClass::Low => "Low Energy",
        }
    }
}

impl fmt::Display for EnergyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioMetrics {
    pub duration_ms: i64,
    pub loudness: f64,
    pub classification: EnergyClass,
}
