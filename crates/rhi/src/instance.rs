//! Vulkan instance, validation layers and debug messenger.
//!
//! The platform layer supplies the surface extensions it needs; a headless
//! instance passes none.
//!
//! ```no_run
//! use ember_rhi::instance::{Instance, InstanceDesc};
//!
//! let instance = Instance::new(&InstanceDesc {
//!     app_name: "demo",
//!     validation: cfg!(debug_assertions),
//!     surface_extensions: &[],
//! })
//! .expect("Failed to create Vulkan instance");
//! assert!(instance.api_version() >= ash::vk::API_VERSION_1_3);
//! ```

use std::ffi::{CStr, CString, c_char};

use ash::{Entry, vk};
use tracing::{debug, error, info, warn};

use crate::error::{RhiError, RhiResult};

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &CStr = c"Ember";

/// Parameters for [`Instance::new`].
#[derive(Debug, Clone, Copy)]
pub struct InstanceDesc<'a> {
    /// Application name reported to the driver
    pub app_name: &'a str,
    /// Enable validation layers when installed
    pub validation: bool,
    /// Extensions reported by the windowing layer, empty for headless use.
    pub surface_extensions: &'a [*const c_char],
}

/// Vulkan instance, with the debug messenger when validation is on.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<ash::ext::debug_utils::Instance>,
    debug_messenger: Option<vk::DebugUtilsMessengerEXT>,
    api_version: u32,
}

impl Instance {
    /// Load the Vulkan library and create the instance.
    ///
    /// Missing validation layers are logged and skipped rather than failing.
    pub fn new(desc: &InstanceDesc<'_>) -> RhiResult<Self> {
        let app_name = CString::new(desc.app_name)
            .map_err(|e| RhiError::InvalidArgument(format!("Invalid application name: {}", e)))?;

        let entry = unsafe { Entry::load()? };

        let validation = desc.validation && Self::is_validation_layer_available(&entry)?;
        if desc.validation && !validation {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let api_version = vk::API_VERSION_1_3;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(ENGINE_NAME)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(api_version);

        let mut extensions: Vec<*const c_char> = desc.surface_extensions.to_vec();
        if validation {
            extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        }

        let layers = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };

        info!(
            "Vulkan instance created for '{}' ({} extension(s), validation {})",
            desc.app_name,
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        let (debug_utils, debug_messenger) = if validation {
            let debug_utils = ash::ext::debug_utils::Instance::new(&entry, &instance);
            let messenger = Self::setup_debug_messenger(&debug_utils)?;
            debug!("Debug messenger installed");
            (Some(debug_utils), Some(messenger))
        } else {
            (None, None)
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
            debug_messenger,
            api_version,
        })
    }

    /// Get a reference to the ash instance.
    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get a reference to the loaded Vulkan entry points.
    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    /// API version the instance was created with.
    #[inline]
    pub fn api_version(&self) -> u32 {
        self.api_version
    }

    /// Whether validation messages are being routed to tracing.
    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_messenger.is_some()
    }

    /// Surface function loader bound to this instance.
    pub fn surface_loader(&self) -> ash::khr::surface::Instance {
        ash::khr::surface::Instance::new(&self.entry, &self.instance)
    }

    fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
        let available_layers = unsafe { entry.enumerate_instance_layer_properties()? };

        Ok(available_layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name == VALIDATION_LAYER_NAME
        }))
    }

    fn setup_debug_messenger(
        debug_utils: &ash::ext::debug_utils::Instance,
    ) -> RhiResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        Ok(messenger)
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let (Some(debug_utils), Some(messenger)) = (&self.debug_utils, self.debug_messenger)
            {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = message_kind(message_type);
    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => error!("[vulkan {}] {}", kind, message),
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => warn!("[vulkan {}] {}", kind, message),
        _ => debug!("[vulkan {}] {}", kind, message),
    }

    vk::FALSE
}

fn message_kind(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "validation"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "performance"
    } else {
        "general"
    }
}
