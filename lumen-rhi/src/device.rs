//! Vulkan Device - adapter selection, logical device, queues and the memory allocator.
//!
//! Adapter selection only accepts discrete GPUs that expose three distinct
//! queue families: graphics (which must also present to the context surface
//! when there is one), a compute family without graphics, and a transfer
//! family with neither graphics nor compute. An adapter that does not meet
//! all of them is rejected, and if none is left device creation fails with
//! [`RhiError::NoSuitableAdapter`].

use std::ffi::CString;
use std::fmt::Write as _;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use ash::vk;
use enumflags2::{bitflags, BitFlags};
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use lumen_core::collections::hashset::HashSet;
use lumen_core::log;
use crate::context::Context;
use crate::error::{RhiError, VkResultExt};
use crate::queue::Queue;

#[bitflags]
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueCapability {
    Graphics = 1 << 0,
    Compute = 1 << 1,
    Transfer = 1 << 2,
    Present = 1 << 3,
}

pub type QueueCapabilities = BitFlags<QueueCapability>;

impl QueueCapability {
    pub fn from_vk(flags: vk::QueueFlags, present: bool) -> QueueCapabilities {
        let mut caps = QueueCapabilities::empty();
        if flags.contains(vk::QueueFlags::GRAPHICS) {
            caps |= QueueCapability::Graphics;
        }
        if flags.contains(vk::QueueFlags::COMPUTE) {
            caps |= QueueCapability::Compute;
        }
        if flags.contains(vk::QueueFlags::TRANSFER) {
            caps |= QueueCapability::Transfer;
        }
        if present {
            caps |= QueueCapability::Present;
        }
        caps
    }
}

/// Queue family indices chosen for the three hardware engines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

/// Scan `families` once and pick graphics, async compute and pure transfer families.
///
/// Returns the names of the families that could not be found on failure.
pub fn select_queue_families(
    families: &[QueueCapabilities],
    require_present: bool,
) -> Result<QueueFamilyIndices, Vec<&'static str>> {
    let mut graphics = None;
    let mut compute = None;
    let mut transfer = None;

    for (index, caps) in families.iter().enumerate() {
        let index = index as u32;
        let has_graphics = caps.contains(QueueCapability::Graphics);
        let has_compute = caps.contains(QueueCapability::Compute);

        if graphics.is_none() && has_graphics && (!require_present || caps.contains(QueueCapability::Present)) {
            graphics = Some(index);
        }
        if compute.is_none() && has_compute && !has_graphics {
            compute = Some(index);
        }
        if transfer.is_none() && caps.contains(QueueCapability::Transfer) && !has_compute && !has_graphics {
            transfer = Some(index);
        }
    }

    match (graphics, compute, transfer) {
        (Some(graphics), Some(compute), Some(transfer)) => Ok(QueueFamilyIndices { graphics, compute, transfer }),
        _ => {
            let mut missing = Vec::new();
            if graphics.is_none() {
                missing.push(if require_present { "graphics+present" } else { "graphics" });
            }
            if compute.is_none() {
                missing.push("dedicated compute");
            }
            if transfer.is_none() {
                missing.push("dedicated transfer");
            }
            Err(missing)
        }
    }
}

/// What selection needs to know about one physical device.
#[derive(Clone, Debug)]
pub struct AdapterCandidate {
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub queue_families: Vec<QueueCapabilities>,
}

/// Pick the first candidate that satisfies every requirement.
///
/// The error lists why each candidate was rejected.
pub fn select_adapter(
    candidates: &[AdapterCandidate],
    require_present: bool,
) -> Result<(usize, QueueFamilyIndices), RhiError> {
    let mut diagnostic = String::new();

    for (index, candidate) in candidates.iter().enumerate() {
        if candidate.device_type != vk::PhysicalDeviceType::DISCRETE_GPU {
            let _ = writeln!(diagnostic, "  {}: not a discrete GPU ({:?})", candidate.name, candidate.device_type);
            continue;
        }
        if candidate.api_version < vk::API_VERSION_1_3 {
            let _ = writeln!(
                diagnostic,
                "  {}: Vulkan {}.{} is older than 1.3",
                candidate.name,
                vk::api_version_major(candidate.api_version),
                vk::api_version_minor(candidate.api_version),
            );
            continue;
        }
        match select_queue_families(&candidate.queue_families, require_present) {
            Ok(families) => return Ok((index, families)),
            Err(missing) => {
                let _ = writeln!(diagnostic, "  {}: missing {} queue family", candidate.name, missing.join(", "));
            }
        }
    }

    if candidates.is_empty() {
        diagnostic.push_str("  no Vulkan physical devices were enumerated\n");
    }

    Err(RhiError::NoSuitableAdapter { diagnostic })
}

/// The physical device backing a [`Device`].
#[derive(Clone)]
pub struct Adapter {
    handle: vk::PhysicalDevice,
    name: String,
    properties: vk::PhysicalDeviceProperties,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    families: QueueFamilyIndices,
}

impl Adapter {
    #[inline]
    pub fn handle(&self) -> vk::PhysicalDevice { self.handle }

    #[inline]
    pub fn name(&self) -> &str { &self.name }

    #[inline]
    pub fn properties(&self) -> &vk::PhysicalDeviceProperties { &self.properties }

    #[inline]
    pub fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties { &self.memory_properties }

    #[inline]
    pub fn queue_families(&self) -> QueueFamilyIndices { self.families }
}

/// State every device-owned object keeps alive.
///
/// Dropped only after the last object referencing it, so destruction order of
/// resources relative to the device never matters.
pub struct DeviceShared {
    pub(crate) raw: ash::Device,
    allocator: ManuallyDrop<Mutex<Allocator>>,
    debug_utils: Option<ash::ext::debug_utils::Device>,
    context: Arc<Context>,
}

pub type DeviceRef = Arc<DeviceShared>;

impl DeviceShared {
    #[inline]
    pub fn raw(&self) -> &ash::Device { &self.raw }

    #[inline]
    pub fn context(&self) -> &Arc<Context> { &self.context }

    pub(crate) fn allocate(&self, desc: &AllocationCreateDesc) -> Result<Allocation, RhiError> {
        Ok(self.allocator.lock().allocate(desc)?)
    }

    pub(crate) fn free(&self, allocation: Allocation) {
        if let Err(e) = self.allocator.lock().free(allocation) {
            log::error!("Failed to free GPU allocation: {e}");
        }
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            // The allocator returns its memory blocks to this device, so it goes first.
            ManuallyDrop::drop(&mut self.allocator);
            self.raw.destroy_device(None);
        }
    }
}

/// Logical device with the graphics, compute and transfer queues.
pub struct Device {
    shared: DeviceRef,
    adapter: Adapter,

    graphics_queue: Queue,
    compute_queue: Queue,
    transfer_queue: Queue,
}

impl Device {
    /// Select an adapter for `context` and create the logical device on it.
    #[profiling::function]
    pub fn new(context: Arc<Context>) -> Result<Self, RhiError> {
        let instance = context.instance();
        let physical_devices = unsafe { instance.enumerate_physical_devices().vk("vkEnumeratePhysicalDevices")? };

        let mut candidates = Vec::with_capacity(physical_devices.len());
        for &physical_device in &physical_devices {
            candidates.push(describe_adapter(&context, physical_device)?);
        }
        for candidate in &candidates {
            log::info!("Found GPU: {} (type: {:?})", candidate.name, candidate.device_type);
        }

        let require_present = context.surface().is_some();
        let (chosen, families) = select_adapter(&candidates, require_present)?;
        let handle = physical_devices[chosen];

        let adapter = Adapter {
            handle,
            name: candidates[chosen].name.clone(),
            properties: unsafe { instance.get_physical_device_properties(handle) },
            memory_properties: unsafe { instance.get_physical_device_memory_properties(handle) },
            families,
        };
        log::info!(
            "Selected {}: graphics family {}, compute family {}, transfer family {}",
            adapter.name, families.graphics, families.compute, families.transfer
        );

        let raw = create_logical_device(&context, &adapter, require_present)?;

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: raw.clone(),
            physical_device: handle,
            debug_settings: Default::default(),
            buffer_device_address: true,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { raw.destroy_device(None) };
                return Err(e.into());
            }
        };

        let debug_utils = context
            .debug_utils_enabled()
            .then(|| ash::ext::debug_utils::Device::new(instance, &raw));

        let shared = Arc::new(DeviceShared {
            raw,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            debug_utils,
            context,
        });

        let graphics_queue = Queue::new("queue.graphics", &shared, families.graphics);
        let compute_queue = Queue::new("queue.compute", &shared, families.compute);
        let transfer_queue = Queue::new("queue.transfer", &shared, families.transfer);

        Ok(Self {
            shared,
            adapter,
            graphics_queue,
            compute_queue,
            transfer_queue,
        })
    }

    /// Get a reference to the logical device.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.shared.raw
    }

    #[inline]
    pub fn shared(&self) -> &DeviceRef {
        &self.shared
    }

    #[inline]
    pub fn context(&self) -> &Arc<Context> {
        &self.shared.context
    }

    #[inline]
    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    #[inline]
    pub fn graphics_queue(&self) -> &Queue { &self.graphics_queue }

    #[inline]
    pub fn compute_queue(&self) -> &Queue { &self.compute_queue }

    #[inline]
    pub fn transfer_queue(&self) -> &Queue { &self.transfer_queue }

    /// Block until every queue of the device is idle.
    pub fn wait_idle(&self) -> Result<(), RhiError> {
        unsafe { self.shared.raw.device_wait_idle().vk("vkDeviceWaitIdle") }
    }
}

fn describe_adapter(context: &Context, physical_device: vk::PhysicalDevice) -> Result<AdapterCandidate, RhiError> {
    let instance = context.instance();
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed adapter>".to_owned());

    let family_properties = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let mut queue_families = Vec::with_capacity(family_properties.len());
    for (index, family) in family_properties.iter().enumerate() {
        let present = match context.surface() {
            Some(surface) => surface.supports_family(physical_device, index as u32)?,
            None => false,
        };
        queue_families.push(QueueCapability::from_vk(family.queue_flags, present));
    }

    Ok(AdapterCandidate {
        name,
        device_type: properties.device_type,
        api_version: properties.api_version,
        queue_families,
    })
}

fn create_logical_device(context: &Context, adapter: &Adapter, presentable: bool) -> Result<ash::Device, RhiError> {
    let families = adapter.families;
    let unique_families: HashSet<u32> = [families.graphics, families.compute, families.transfer]
        .into_iter()
        .collect();

    let queue_priority = 1.0f32;
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
        .iter()
        .map(|&family| {
            vk::DeviceQueueCreateInfo::default()
                .queue_family_index(family)
                .queue_priorities(std::slice::from_ref(&queue_priority))
        })
        .collect();

    let mut extensions: Vec<*const std::ffi::c_char> = Vec::new();
    if presentable {
        extensions.push(ash::khr::swapchain::NAME.as_ptr());
    }

    let mut vulkan_12_features = vk::PhysicalDeviceVulkan12Features::default()
        .timeline_semaphore(true)
        .buffer_device_address(true);

    let mut vulkan_13_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .push_next(&mut vulkan_12_features)
        .push_next(&mut vulkan_13_features);

    unsafe {
        context
            .instance()
            .create_device(adapter.handle, &create_info, None)
            .vk("vkCreateDevice")
    }
}

#[allow(dead_code)]
pub(crate) mod sealed {
    pub trait Sealed {}
}

/// Crate-only trait for objects that keep their owning device alive.
///
/// This trait is sealed and not visible to users of `lumen-rhi`.
#[allow(dead_code)]
pub(crate) trait DeviceObject: sealed::Sealed {
    fn device(&self) -> &DeviceRef;

    #[inline]
    fn raw_device(&self) -> &ash::Device {
        &self.device().raw
    }
}

/// Objects that can label themselves for validation messages and capture tools.
pub trait DebuggableObject {
    fn set_debug_name(&self);
}

/// Attach `name` to `handle` when debug utils are enabled.
pub(crate) fn set_debug_name_handle<H: vk::Handle>(device: &DeviceShared, handle: H, name: &str) {
    let Some(debug_utils) = &device.debug_utils else {
        return;
    };
    let Ok(name) = CString::new(name) else {
        return;
    };

    let info = vk::DebugUtilsObjectNameInfoEXT::default()
        .object_handle(handle)
        .object_name(name.as_c_str());
    if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(&info) } {
        log::debug!("Failed to name {:?} `{}`: {e}", H::TYPE, name.to_string_lossy());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use QueueCapability::*;

    fn caps(list: &[QueueCapability]) -> QueueCapabilities {
        list.iter().fold(QueueCapabilities::empty(), |acc, &c| acc | c)
    }

    fn discrete(name: &str, families: Vec<QueueCapabilities>) -> AdapterCandidate {
        AdapterCandidate {
            name: name.to_owned(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version: vk::API_VERSION_1_3,
            queue_families: families,
        }
    }

    fn full_layout() -> Vec<QueueCapabilities> {
        vec![
            caps(&[Graphics, Compute, Transfer, Present]),
            caps(&[Transfer]),
            caps(&[Compute, Transfer]),
        ]
    }

    #[test]
    fn picks_dedicated_families() {
        let families = select_queue_families(&full_layout(), true).unwrap();
        assert_eq!(families, QueueFamilyIndices { graphics: 0, compute: 2, transfer: 1 });
    }

    #[test]
    fn first_matching_family_wins() {
        let layout = vec![
            caps(&[Compute, Transfer]),
            caps(&[Graphics, Compute, Transfer, Present]),
            caps(&[Compute]),
            caps(&[Transfer]),
            caps(&[Transfer]),
        ];
        let families = select_queue_families(&layout, true).unwrap();
        assert_eq!(families, QueueFamilyIndices { graphics: 1, compute: 0, transfer: 3 });
    }

    #[test]
    fn graphics_must_present_when_required() {
        let layout = vec![
            caps(&[Graphics, Compute, Transfer]),
            caps(&[Transfer]),
            caps(&[Compute]),
        ];
        assert_eq!(select_queue_families(&layout, true).unwrap_err(), vec!["graphics+present"]);
        assert!(select_queue_families(&layout, false).is_ok());
    }

    #[test]
    fn missing_dedicated_engines_are_reported() {
        let layout = vec![caps(&[Graphics, Compute, Transfer, Present])];
        assert_eq!(
            select_queue_families(&layout, true).unwrap_err(),
            vec!["dedicated compute", "dedicated transfer"]
        );
    }

    #[test]
    fn no_adapters_is_an_error() {
        let err = select_adapter(&[], true).unwrap_err();
        match err {
            RhiError::NoSuitableAdapter { diagnostic } => assert!(diagnostic.contains("no Vulkan physical devices")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn integrated_only_is_rejected() {
        let mut integrated = discrete("igpu", full_layout());
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;

        let err = select_adapter(&[integrated], true).unwrap_err();
        match err {
            RhiError::NoSuitableAdapter { diagnostic } => assert!(diagnostic.contains("igpu: not a discrete GPU")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn skips_discrete_without_queue_families() {
        let lacking = discrete("lacking", vec![caps(&[Graphics, Compute, Transfer, Present])]);
        let good = discrete("good", full_layout());

        let (index, families) = select_adapter(&[lacking, good], true).unwrap();
        assert_eq!(index, 1);
        assert_eq!(families.transfer, 1);
    }

    #[test]
    fn old_api_version_is_rejected() {
        let mut old = discrete("old", full_layout());
        old.api_version = vk::API_VERSION_1_2;
        assert!(select_adapter(&[old], true).is_err());
    }

    #[test]
    fn capabilities_from_vk_flags() {
        let caps = QueueCapability::from_vk(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER, false);
        assert!(caps.contains(Compute | Transfer));
        assert!(!caps.intersects(Graphics | Present));
    }
}
