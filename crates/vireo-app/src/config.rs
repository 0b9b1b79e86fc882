// SPDX-License-Identifier: CEPL-1.0
//! `vireo.toml`. Every field has a default, so a partial or missing file
//! still yields a complete config.

use std::{fs, io, path::Path};

use serde::Deserialize;
use tracing::{debug, warn};
use vireo_platform::WindowSettings;
use vireo_render::{PresentModePreference, RendererConfig};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowCfg {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: "vireo".into(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Mailbox,
    Fifo,
    Immediate,
}

impl From<PresentModeCfg> for PresentModePreference {
    fn from(m: PresentModeCfg) -> Self {
        match m {
            PresentModeCfg::Mailbox => PresentModePreference::Mailbox,
            PresentModeCfg::Fifo => PresentModePreference::Fifo,
            PresentModeCfg::Immediate => PresentModePreference::Immediate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct VulkanCfg {
    pub validation: bool,
    pub validation_layers: Vec<String>,
    pub device_extensions: Vec<String>,
    pub present_mode: PresentModeCfg,
    /// Upper bound; the device maximum wins when lower.
    pub msaa_samples: u32,
}

impl Default for VulkanCfg {
    fn default() -> Self {
        let r = RendererConfig::default();
        VulkanCfg {
            validation: r.validation,
            validation_layers: r.validation_layers,
            device_extensions: r.device_extensions,
            present_mode: PresentModeCfg::default(),
            msaa_samples: r.msaa_samples,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub spin_degrees_per_second: f32,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: [0.02, 0.02, 0.04, 1.0],
            spin_degrees_per_second: 45.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct AppCfg {
    pub window: WindowCfg,
    pub vulkan: VulkanCfg,
    pub render: RenderCfg,
}

impl AppCfg {
    pub fn parse(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// `validation` overrides the file when set from the command line.
    pub fn renderer_config(&self, validation: Option<bool>) -> RendererConfig {
        RendererConfig {
            validation: validation.unwrap_or(self.vulkan.validation),
            validation_layers: self.vulkan.validation_layers.clone(),
            device_extensions: self.vulkan.device_extensions.clone(),
            present_mode: self.vulkan.present_mode.into(),
            msaa_samples: self.vulkan.msaa_samples,
            clear_color: self.render.clear_color,
        }
    }

    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings {
            title: self.window.title.clone(),
            width: self.window.width,
            height: self.window.height,
            resizable: self.window.resizable,
        }
    }
}

/// Lenient: a missing file is silent, an unreadable or malformed one is
/// reported and replaced by defaults.
pub fn load(path: &Path) -> AppCfg {
    let text = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no config file, using defaults");
            return AppCfg::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config unreadable, using defaults");
            return AppCfg::default();
        }
    };
    match AppCfg::parse(&text) {
        Ok(cfg) => {
            debug!(path = %path.display(), "config loaded");
            cfg
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config malformed, using defaults");
            AppCfg::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(AppCfg::parse("").unwrap(), AppCfg::default());
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let cfg = AppCfg::parse(
            r#"
            [window]
            title = "demo"

            [vulkan]
            present_mode = "fifo"
            msaa_samples = 8
            "#,
        )
        .unwrap();
        assert_eq!(cfg.window.title, "demo");
        assert_eq!(cfg.window.width, 1280);
        assert_eq!(cfg.vulkan.present_mode, PresentModeCfg::Fifo);
        assert_eq!(cfg.vulkan.msaa_samples, 8);
        assert_eq!(cfg.vulkan.validation_layers, vec!["VK_LAYER_KHRONOS_validation"]);
        assert_eq!(cfg.render, RenderCfg::default());
    }

    #[test]
    fn unknown_present_mode_is_rejected() {
        assert!(AppCfg::parse("[vulkan]\npresent_mode = \"relaxed\"").is_err());
    }

    #[test]
    fn command_line_overrides_validation() {
        let mut cfg = AppCfg::default();
        cfg.vulkan.validation = false;
        assert!(!cfg.renderer_config(None).validation);
        assert!(cfg.renderer_config(Some(true)).validation);
        cfg.vulkan.validation = true;
        assert!(!cfg.renderer_config(Some(false)).validation);
    }

    #[test]
    fn renderer_config_carries_render_section() {
        let cfg = AppCfg::parse(
            "[render]\nclear_color = [1.0, 0.0, 0.0, 1.0]\n[vulkan]\npresent_mode = \"immediate\"",
        )
        .unwrap();
        let r = cfg.renderer_config(None);
        assert_eq!(r.clear_color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(r.present_mode, PresentModePreference::Immediate);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("vireo-config-that-does-not-exist.toml");
        assert_eq!(load(&path), AppCfg::default());
    }

    #[test]
    fn malformed_file_yields_defaults() {
        let path = std::env::temp_dir().join(format!("vireo-bad-{}.toml", std::process::id()));
        fs::write(&path, "[window\ntitle = ").unwrap();
        let cfg = load(&path);
        let _ = fs::remove_file(&path);
        assert_eq!(cfg, AppCfg::default());
    }
}
