//! Model catalog - profiles the backend can serve and its current status

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Running,
    Switching,
    #[default]
    Stopped,
    Error,
}

impl ModelStatus {
    /// Statuses the switch polling loop stops on
    pub fn is_terminal(&self) -> bool {
        matches!(self, ModelStatus::Running | ModelStatus::Error)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Running => "running",
            ModelStatus::Switching => "switching",
            ModelStatus::Stopped => "stopped",
            ModelStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareRequirements {
    #[serde(default)]
    pub min_vram_gb: Option<f64>,
    #[serde(default)]
    pub recommended_vram_gb: Option<f64>,
    #[serde(default)]
    pub min_gpus: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    pub name: String,
    /// Identifier the completion endpoint expects
    pub model_id: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_max_model_len")]
    pub max_model_len: u32,
    #[serde(default = "default_tensor_parallel_size")]
    pub tensor_parallel_size: u32,
    #[serde(default = "default_gpu_memory_utilization")]
    pub gpu_memory_utilization: f32,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    #[serde(default = "default_swap_space")]
    pub swap_space: u32,
    #[serde(default)]
    pub hardware_requirements: Option<HardwareRequirements>,
}

fn default_max_model_len() -> u32 {
    4096
}

fn default_tensor_parallel_size() -> u32 {
    1
}

fn default_gpu_memory_utilization() -> f32 {
    0.85
}

fn default_dtype() -> String {
    "float16".to_string()
}

fn default_swap_space() -> u32 {
    4
}

const DEFAULT_MIN_VRAM_GB: f64 = 8.0;
const DEFAULT_MIN_GPUS: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuInfo {
    pub name: String,
    pub memory_total_mb: u64,
    pub memory_used_mb: u64,
    pub memory_free_mb: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareInfo {
    #[serde(default)]
    pub gpus: Vec<GpuInfo>,
    pub gpu_count: u32,
    pub total_vram_gb: f64,
    pub available_vram_gb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Compatibility {
    pub compatible: bool,
    pub message: String,
}

impl Compatibility {
    fn ok() -> Self {
        Self {
            compatible: true,
            message: "hardware compatible".to_string(),
        }
    }

    fn refuse(message: String) -> Self {
        Self {
            compatible: false,
            message,
        }
    }
}

impl ModelProfile {
    /// Mirror of the backend's admission rules, for display only
    pub fn check_compatibility(&self, hardware: &HardwareInfo) -> Compatibility {
        let reqs = self.hardware_requirements.clone().unwrap_or_default();
        let min_vram = reqs.min_vram_gb.unwrap_or(DEFAULT_MIN_VRAM_GB);
        let min_gpus = reqs.min_gpus.unwrap_or(DEFAULT_MIN_GPUS);

        if hardware.gpu_count < min_gpus {
            return Compatibility::refuse(format!(
                "needs at least {} GPU(s), found {}",
                min_gpus, hardware.gpu_count
            ));
        }

        if hardware.available_vram_gb < min_vram {
            return Compatibility::refuse(format!(
                "needs at least {:.0}GB free VRAM, {:.1}GB available",
                min_vram, hardware.available_vram_gb
            ));
        }

        if self.tensor_parallel_size > hardware.gpu_count {
            return Compatibility::refuse(format!(
                "tensor_parallel_size {} exceeds GPU count {}",
                self.tensor_parallel_size, hardware.gpu_count
            ));
        }

        Compatibility::ok()
    }
}

/// Snapshot of the backend's model status
///
/// Snapshots are replaced whole, never merged field by field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub current_profile: Option<String>,
    pub status: ModelStatus,
    #[serde(rename = "available_profiles", default)]
    pub profiles: BTreeMap<String, ModelProfile>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub hardware_info: Option<HardwareInfo>,
}

impl ModelCatalog {
    pub fn profile(&self, profile_id: &str) -> Option<&ModelProfile> {
        self.profiles.get(profile_id)
    }

    /// Backend model identifier for a user-facing profile id
    pub fn resolve_model_id(&self, profile_id: &str) -> Option<&str> {
        self.profile(profile_id).map(|p| p.model_id.as_str())
    }

    /// The profile is loaded and serving
    pub fn is_active(&self, profile_id: &str) -> bool {
        self.status == ModelStatus::Running && self.current_profile.as_deref() == Some(profile_id)
    }

    pub fn current(&self) -> Option<&ModelProfile> {
        self.current_profile.as_deref().and_then(|id| self.profile(id))
    }

    /// New snapshot with this catalog's profiles and the status fields of `poll`
    pub fn with_status_of(&self, poll: ModelCatalog) -> ModelCatalog {
        ModelCatalog {
            current_profile: poll.current_profile,
            status: poll.status,
            profiles: self.profiles.clone(),
            message: poll.message,
            hardware_info: poll.hardware_info.or_else(|| self.hardware_info.clone()),
        }
    }

    pub fn with_status(&self, status: ModelStatus, message: Option<String>) -> ModelCatalog {
        ModelCatalog {
            status,
            message,
            ..self.clone()
        }
    }
}
