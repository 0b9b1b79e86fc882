// SPDX-License-Identifier: CEPL-1.0
//! Loader, instance, validation layers, debug messenger and surface.

use std::ffi::{c_char, c_void, CStr, CString};

use anyhow::{anyhow, bail, Context, Result};
use ash::ext::debug_utils;
use ash::khr::surface;
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle};
use tracing::{debug, error, info, trace, warn};
use vireo_render::RendererConfig;

/// Forwards validation output into `tracing`, keyed on severity.
unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    kind: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    if data.is_null() || (*data).p_message.is_null() {
        return vk::FALSE;
    }
    let msg = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "vulkan", ?kind, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(target: "vulkan", ?kind, "{msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(target: "vulkan", ?kind, "{msg}");
    } else {
        trace!(target: "vulkan", ?kind, "{msg}");
    }
    // never abort the call that triggered the message
    vk::FALSE
}

/// Requested layers the loader does not offer, in request order.
pub fn missing_layers<'a>(requested: &'a [String], available: &[String]) -> Vec<&'a str> {
    requested
        .iter()
        .filter(|want| !available.iter().any(|have| have == *want))
        .map(String::as_str)
        .collect()
}

pub struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

impl DebugMessenger {
    unsafe fn new(entry: &Entry, instance: &Instance) -> Result<Self> {
        let loader = debug_utils::Instance::new(entry, instance);
        let ci = vk::DebugUtilsMessengerCreateInfoEXT {
            s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
            message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            pfn_user_callback: Some(debug_callback),
            ..Default::default()
        };
        let handle = loader
            .create_debug_utils_messenger(&ci, None)
            .context("vkCreateDebugUtilsMessengerEXT")?;
        Ok(Self { loader, handle })
    }

    pub unsafe fn destroy(&self) {
        self.loader.destroy_debug_utils_messenger(self.handle, None);
    }
}

unsafe fn available_layers(entry: &Entry) -> Result<Vec<String>> {
    let props = entry
        .enumerate_instance_layer_properties()
        .context("vkEnumerateInstanceLayerProperties")?;
    Ok(props
        .iter()
        .filter_map(|p| p.layer_name_as_c_str().ok())
        .map(|name| name.to_string_lossy().into_owned())
        .collect())
}

unsafe fn create_instance(
    entry: &Entry,
    display_raw: RawDisplayHandle,
    config: &RendererConfig,
) -> Result<Instance> {
    let app = CString::new("vireo")?;
    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app.as_ptr(),
        application_version: vk::make_api_version(0, 0, 1, 0),
        p_engine_name: app.as_ptr(),
        engine_version: vk::make_api_version(0, 0, 1, 0),
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut extensions: Vec<*const c_char> = ash_window::enumerate_required_extensions(display_raw)
        .context("enumerate_required_extensions")?
        .to_vec();

    let layers: Vec<CString> = if config.validation {
        let available = available_layers(entry)?;
        let missing = missing_layers(&config.validation_layers, &available);
        if !missing.is_empty() {
            bail!("validation layers not available: {}", missing.join(", "));
        }
        extensions.push(debug_utils::NAME.as_ptr());
        config
            .validation_layers
            .iter()
            .map(|l| CString::new(l.as_str()))
            .collect::<std::result::Result<_, _>>()?
    } else {
        Vec::new()
    };
    let layer_ptrs: Vec<*const c_char> = layers.iter().map(|l| l.as_ptr()).collect();

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: extensions.len() as u32,
        pp_enabled_extension_names: extensions.as_ptr(),
        enabled_layer_count: layer_ptrs.len() as u32,
        pp_enabled_layer_names: layer_ptrs.as_ptr(),
        ..Default::default()
    };
    Ok(entry
        .create_instance(&create_info, None)
        .context("vkCreateInstance")?)
}

pub struct InstanceContext {
    pub entry: Entry,
    pub instance: Instance,
    pub surface_loader: surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub debug: Option<DebugMessenger>,
}

impl InstanceContext {
    // STRICT ORDER:
    // 1) Instance (WSI extensions, optional validation)
    // 2) Debug messenger, so surface and device creation are already covered
    // 3) Surface FROM THIS INSTANCE; device selection queries present support against it
    pub unsafe fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        config: &RendererConfig,
    ) -> Result<Self> {
        let dh = display
            .display_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();
        let wh = window
            .window_handle()
            .map_err(|e| anyhow!("{e}"))?
            .as_raw();

        let entry = Entry::load().context("load Vulkan loader")?;
        let instance = create_instance(&entry, dh, config)?;
        let debug = if config.validation {
            Some(DebugMessenger::new(&entry, &instance)?)
        } else {
            None
        };

        let surface_loader = surface::Instance::new(&entry, &instance);
        let surface = ash_window::create_surface(&entry, &instance, dh, wh, None)
            .context("ash_window::create_surface")?;
        info!(validation = config.validation, "vulkan instance and surface created");

        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            debug,
        })
    }

    /// Caller must have destroyed the device first.
    pub unsafe fn destroy(&mut self) {
        self.surface_loader.destroy_surface(self.surface, None);
        if let Some(debug) = self.debug.take() {
            debug.destroy();
        }
        self.instance.destroy_instance(None);
    }
}
