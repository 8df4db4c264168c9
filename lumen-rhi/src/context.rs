//! Vulkan Context - instance, validation messenger and presentation surface.

use std::ffi::{c_char, CStr};
use ash::{vk, Entry, Instance};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::window::Window;
use lumen_core::log;
use crate::error::{RhiError, VkResultExt};

#[cfg(feature = "validation")]
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const APPLICATION_NAME: &CStr = c"Lumen Application";
const ENGINE_NAME: &CStr = c"Lumen";

/// A presentable surface bound to one native window.
pub struct Surface {
    loader: ash::khr::surface::Instance,
    handle: vk::SurfaceKHR,
}

impl Surface {
    #[inline]
    pub fn loader(&self) -> &ash::khr::surface::Instance { &self.loader }

    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR { self.handle }

    /// Whether `family` of `physical_device` can present to this surface.
    pub fn supports_family(&self, physical_device: vk::PhysicalDevice, family: u32) -> Result<bool, RhiError> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(physical_device, family, self.handle)
                .vk("vkGetPhysicalDeviceSurfaceSupportKHR")
        }
    }
}

/// Owns the instance. Everything else in the RHI hangs off a context.
pub struct Context {
    entry: Entry,
    instance: Instance,
    surface: Option<Surface>,

    #[cfg(feature = "validation")]
    debug_messenger: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Context {
    /// Create an instance able to present to `window`, and the surface for it.
    #[profiling::function]
    pub fn new(window: &Window) -> Result<Self, RhiError> {
        let display_handle = window.display_handle()?.as_raw();
        let window_handle = window.window_handle()?.as_raw();

        let entry = unsafe { Entry::load()? };
        let surface_extensions = ash_window::enumerate_required_extensions(display_handle)
            .vk("vkEnumerateInstanceExtensionProperties")?;
        let mut context = Self::with_extensions(entry, surface_extensions)?;

        let handle = unsafe {
            ash_window::create_surface(&context.entry, &context.instance, display_handle, window_handle, None)
                .vk("vkCreateSurfaceKHR")?
        };
        context.surface = Some(Surface {
            loader: ash::khr::surface::Instance::new(&context.entry, &context.instance),
            handle,
        });

        Ok(context)
    }

    /// Create an instance without any presentation support.
    pub fn headless() -> Result<Self, RhiError> {
        let entry = unsafe { Entry::load()? };
        Self::with_extensions(entry, &[])
    }

    fn with_extensions(entry: Entry, surface_extensions: &[*const c_char]) -> Result<Self, RhiError> {
        let instance = create_instance(&entry, surface_extensions)?;

        #[cfg(feature = "validation")]
        let debug_messenger = setup_debug_messenger(&entry, &instance)?;

        Ok(Self {
            entry,
            instance,
            surface: None,
            #[cfg(feature = "validation")]
            debug_messenger,
        })
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// The window surface, `None` for a headless context.
    #[inline]
    pub fn surface(&self) -> Option<&Surface> {
        self.surface.as_ref()
    }

    pub(crate) fn debug_utils_enabled(&self) -> bool {
        #[cfg(feature = "validation")]
        {
            self.debug_messenger.is_some()
        }
        #[cfg(not(feature = "validation"))]
        {
            false
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        unsafe {
            if let Some(surface) = self.surface.take() {
                surface.loader.destroy_surface(surface.handle, None);
            }

            #[cfg(feature = "validation")]
            if let Some((debug_utils, messenger)) = self.debug_messenger.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

fn create_instance(entry: &Entry, surface_extensions: &[*const c_char]) -> Result<Instance, RhiError> {
    let app_info = vk::ApplicationInfo::default()
        .application_name(APPLICATION_NAME)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(ENGINE_NAME)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_3);

    #[allow(unused_mut)]
    let mut extensions = surface_extensions.to_vec();
    #[allow(unused_mut)]
    let mut layers: Vec<*const c_char> = Vec::new();

    #[cfg(feature = "validation")]
    if validation_layer_available(entry) {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
        layers.push(VALIDATION_LAYER.as_ptr());
    } else {
        log::warn!("{} requested but not installed, continuing without it", VALIDATION_LAYER.to_string_lossy());
    }

    let create_info = vk::InstanceCreateInfo::default()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layers);

    unsafe { entry.create_instance(&create_info, None).vk("vkCreateInstance") }
}

#[cfg(feature = "validation")]
fn validation_layer_available(entry: &Entry) -> bool {
    let Ok(layers) = (unsafe { entry.enumerate_instance_layer_properties() }) else {
        return false;
    };
    layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER))
}

#[cfg(feature = "validation")]
fn setup_debug_messenger(
    entry: &Entry,
    instance: &Instance,
) -> Result<Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>, RhiError> {
    if !validation_layer_available(entry) {
        return Ok(None);
    }

    let debug_utils = ash::ext::debug_utils::Instance::new(entry, instance);

    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(MESSAGE_SEVERITIES)
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(vulkan_debug_callback));

    let messenger = unsafe {
        debug_utils
            .create_debug_utils_messenger(&create_info, None)
            .vk("vkCreateDebugUtilsMessengerEXT")?
    };

    Ok(Some((debug_utils, messenger)))
}

#[cfg(feature = "validation")]
const MESSAGE_SEVERITIES: vk::DebugUtilsMessageSeverityFlagsEXT = vk::DebugUtilsMessageSeverityFlagsEXT::from_raw(
    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR.as_raw()
        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING.as_raw()
        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO.as_raw()
        | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE.as_raw(),
);

/// Log level a validation message of `severity` is forwarded at.
#[cfg(feature = "validation")]
fn message_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

#[cfg(feature = "validation")]
unsafe extern "system" fn vulkan_debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let Some(callback_data) = (unsafe { p_callback_data.as_ref() }) else {
        return vk::FALSE;
    };
    let message = unsafe { callback_data.message_as_c_str() }
        .map(CStr::to_string_lossy)
        .unwrap_or_default();

    let type_str = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::GENERAL => "[General]",
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "[Validation]",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "[Performance]",
        _ => "[Unknown]",
    };

    let objects = if callback_data.object_count > 0 && !callback_data.p_objects.is_null() {
        let objects = unsafe {
            std::slice::from_raw_parts(callback_data.p_objects, callback_data.object_count as usize)
        };
        objects
            .iter()
            .map(|object| {
                let name = unsafe { object.object_name_as_c_str() }
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "<unnamed>".to_owned());
                format!("{:?} {:#x} `{}`", object.object_type, object.object_handle, name)
            })
            .collect::<Vec<_>>()
            .join(", ")
    } else {
        String::new()
    };

    let level = message_level(message_severity);
    if level <= log::Level::Warn {
        log::log!(level, "Vulkan {}: {} [{}]", type_str, message, objects);
    } else {
        log::log!(level, "Vulkan {}: {}", type_str, message);
    }

    vk::FALSE
}
