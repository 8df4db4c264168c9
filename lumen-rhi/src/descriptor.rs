//! Vulkan Descriptor - descriptor set layouts, growable pool allocator and set writer.

use ash::vk;
use lumen_core::collections::hashmap::HashMap;
use lumen_core::log;
use lumen_rhi_derive::DeviceObject;
use crate::buffer::Buffer;
use crate::device::{set_debug_name_handle, DebuggableObject, Device, DeviceRef};
use crate::error::{vulkan_error, BindingError, RhiError, VkResultExt};

/// Layout binding information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

impl LayoutBinding {
    pub fn new(binding: u32, descriptor_type: vk::DescriptorType, stage_flags: vk::ShaderStageFlags) -> Self {
        Self { binding, descriptor_type, count: 1, stage_flags }
    }
}

/// Descriptor set layout with binding metadata for validation.
#[DeviceObject(named)]
pub struct DescriptorLayout {
    layout: vk::DescriptorSetLayout,
    bindings: Vec<LayoutBinding>,
    binding_types: HashMap<u32, vk::DescriptorType>,
}

impl DescriptorLayout {
    pub fn new(device: &Device, name: &str, bindings: &[LayoutBinding]) -> Result<Self, RhiError> {
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags)
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)
                .vk("vkCreateDescriptorSetLayout")?
        };

        let layout = Self {
            layout,
            bindings: bindings.to_vec(),
            binding_types: bindings.iter().map(|b| (b.binding, b.descriptor_type)).collect(),
            device: device.shared().clone(),
            name: name.to_owned(),
        };
        layout.set_debug_name();
        Ok(layout)
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn get_binding(&self, binding: u32) -> Option<&LayoutBinding> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    #[inline]
    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }
}

impl Drop for DescriptorLayout {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

impl DebuggableObject for DescriptorLayout {
    fn set_debug_name(&self) {
        set_debug_name_handle(&self.device, self.layout, &self.name);
    }
}

/// How many descriptors of `ty` a pool holds per set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    pub ty: vk::DescriptorType,
    pub ratio: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorAllocatorConfig {
    pub sets_per_pool: u32,
    pub ratios: Vec<PoolSizeRatio>,
}

impl Default for DescriptorAllocatorConfig {
    fn default() -> Self {
        Self {
            sets_per_pool: 1024,
            ratios: vec![
                PoolSizeRatio { ty: vk::DescriptorType::STORAGE_IMAGE, ratio: 1.0 },
                PoolSizeRatio { ty: vk::DescriptorType::UNIFORM_BUFFER, ratio: 1.0 },
                PoolSizeRatio { ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER, ratio: 1.0 },
            ],
        }
    }
}

/// Descriptor counts for a pool of `sets` sets. Every listed type gets at least one.
pub fn pool_sizes(ratios: &[PoolSizeRatio], sets: u32) -> Vec<vk::DescriptorPoolSize> {
    ratios
        .iter()
        .map(|r| vk::DescriptorPoolSize {
            ty: r.ty,
            descriptor_count: ((r.ratio * sets as f32).ceil() as u32).max(1),
        })
        .collect()
}

/// Backend of a [`PoolChain`]: creates pools and allocates sets from them.
pub(crate) trait PoolProvider {
    type Pool;
    type Layout: ?Sized;
    type Set;

    fn create_pool(&mut self) -> Result<Self::Pool, RhiError>;
    fn allocate(&self, pool: &Self::Pool, layout: &Self::Layout) -> Result<Self::Set, vk::Result>;
    fn reset_pool(&self, pool: &Self::Pool) -> Result<(), RhiError>;
    fn destroy_pool(&self, pool: Self::Pool);
}

fn is_pool_exhausted(result: vk::Result) -> bool {
    matches!(result, vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL)
}

/// Pool-of-pools bookkeeping shared by the real allocator and tests.
///
/// One current pool serves allocations; an exhausted one moves to `used`
/// and the request is retried once on a pool from `free` or a new one.
pub(crate) struct PoolChain<P: PoolProvider> {
    provider: P,
    current: Option<P::Pool>,
    used: Vec<P::Pool>,
    free: Vec<P::Pool>,
}

impl<P: PoolProvider> PoolChain<P> {
    pub(crate) fn new(provider: P) -> Self {
        Self {
            provider,
            current: None,
            used: Vec::new(),
            free: Vec::new(),
        }
    }

    fn obtain(&mut self) -> Result<P::Pool, RhiError> {
        if let Some(pool) = self.current.take() {
            return Ok(pool);
        }
        if let Some(pool) = self.free.pop() {
            return Ok(pool);
        }
        self.provider.create_pool()
    }

    #[track_caller]
    pub(crate) fn allocate(&mut self, layout: &P::Layout) -> Result<P::Set, RhiError> {
        let pool = self.obtain()?;
        match self.provider.allocate(&pool, layout) {
            Ok(set) => {
                self.current = Some(pool);
                return Ok(set);
            }
            Err(result) if is_pool_exhausted(result) => {
                self.used.push(pool);
            }
            Err(result) => {
                self.current = Some(pool);
                return Err(vulkan_error("vkAllocateDescriptorSets", result, std::panic::Location::caller()));
            }
        }

        let pool = self.obtain()?;
        let result = self.provider.allocate(&pool, layout);
        self.current = Some(pool);
        match result {
            Ok(set) => Ok(set),
            Err(result) if is_pool_exhausted(result) => {
                log::error!("Descriptor set does not fit a fresh pool ({result:?})");
                Err(RhiError::DescriptorPoolExhausted)
            }
            Err(result) => Err(vulkan_error("vkAllocateDescriptorSets", result, std::panic::Location::caller())),
        }
    }

    /// Reset every pool handed out since the last reset and make them available again.
    pub(crate) fn reset(&mut self) -> Result<(), RhiError> {
        if let Some(pool) = self.current.take() {
            self.used.push(pool);
        }
        while let Some(pool) = self.used.pop() {
            if let Err(e) = self.provider.reset_pool(&pool) {
                self.used.push(pool);
                return Err(e);
            }
            self.free.push(pool);
        }
        Ok(())
    }

    pub(crate) fn pool_count(&self) -> usize {
        self.used.len() + self.free.len() + usize::from(self.current.is_some())
    }

    fn destroy_all(&mut self) {
        let pools = self.current.take().into_iter().chain(self.used.drain(..)).chain(self.free.drain(..));
        for pool in pools.collect::<Vec<_>>() {
            self.provider.destroy_pool(pool);
        }
    }
}

struct VulkanPools {
    device: DeviceRef,
    name: String,
    sets_per_pool: u32,
    sizes: Vec<vk::DescriptorPoolSize>,
    created: usize,
}

impl PoolProvider for VulkanPools {
    type Pool = vk::DescriptorPool;
    type Layout = DescriptorLayout;
    type Set = vk::DescriptorSet;

    fn create_pool(&mut self) -> Result<vk::DescriptorPool, RhiError> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(self.sets_per_pool)
            .pool_sizes(&self.sizes);

        let pool = unsafe {
            self.device
                .raw
                .create_descriptor_pool(&create_info, None)
                .vk("vkCreateDescriptorPool")?
        };
        set_debug_name_handle(&self.device, pool, &format!("{}.pool{}", self.name, self.created));
        self.created += 1;

        log::debug!("Descriptor allocator `{}` created pool #{} ({} sets)", self.name, self.created, self.sets_per_pool);
        Ok(pool)
    }

    fn allocate(&self, pool: &vk::DescriptorPool, layout: &DescriptorLayout) -> Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.raw.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    fn reset_pool(&self, pool: &vk::DescriptorPool) -> Result<(), RhiError> {
        unsafe {
            self.device
                .raw
                .reset_descriptor_pool(*pool, vk::DescriptorPoolResetFlags::empty())
                .vk("vkResetDescriptorPool")
        }
    }

    fn destroy_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.raw.destroy_descriptor_pool(pool, None) }
    }
}

/// Growable descriptor set allocator, reset wholesale once per frame.
pub struct DescriptorAllocator {
    chain: PoolChain<VulkanPools>,
}

impl DescriptorAllocator {
    pub fn new(device: &Device, name: &str, config: &DescriptorAllocatorConfig) -> Self {
        let provider = VulkanPools {
            device: device.shared().clone(),
            name: name.to_owned(),
            sets_per_pool: config.sets_per_pool,
            sizes: pool_sizes(&config.ratios, config.sets_per_pool),
            created: 0,
        };
        Self { chain: PoolChain::new(provider) }
    }

    /// Allocate one set, growing onto another pool if the current one is full.
    #[profiling::function]
    pub fn allocate(&mut self, layout: &DescriptorLayout) -> Result<vk::DescriptorSet, RhiError> {
        self.chain.allocate(layout)
    }

    /// Release every set allocated so far. None of them may still be in use.
    pub fn reset(&mut self) -> Result<(), RhiError> {
        self.chain.reset()
    }

    pub fn pool_count(&self) -> usize {
        self.chain.pool_count()
    }
}

impl Drop for DescriptorAllocator {
    fn drop(&mut self) {
        self.chain.destroy_all();
    }
}

/// Check a write against the types declared by a layout.
fn check_binding(
    layout: &HashMap<u32, vk::DescriptorType>,
    binding: u32,
    got: vk::DescriptorType,
) -> Result<(), BindingError> {
    match layout.get(&binding) {
        None => Err(BindingError::BindingNotFound(binding)),
        Some(&expected) if expected != got => Err(BindingError::TypeMismatch { binding, expected, got }),
        Some(_) => Ok(()),
    }
}

enum PendingInfo {
    Buffer(vk::DescriptorBufferInfo),
    Image(vk::DescriptorImageInfo),
}

struct PendingWrite {
    binding: u32,
    descriptor_type: vk::DescriptorType,
    info: PendingInfo,
}

/// Collects descriptor writes for one layout and applies them to a set.
pub struct DescriptorWriter<'a> {
    layout: &'a DescriptorLayout,
    writes: Vec<PendingWrite>,
}

impl<'a> DescriptorWriter<'a> {
    pub fn new(layout: &'a DescriptorLayout) -> Self {
        Self { layout, writes: Vec::new() }
    }

    /// Write a whole buffer as a uniform or storage buffer.
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: &Buffer,
        descriptor_type: vk::DescriptorType,
    ) -> Result<&mut Self, BindingError> {
        check_binding(&self.layout.binding_types, binding, descriptor_type)?;
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: PendingInfo::Buffer(buffer.descriptor_info()),
        });
        Ok(self)
    }

    /// Write a combined image sampler.
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
    ) -> Result<&mut Self, BindingError> {
        let descriptor_type = vk::DescriptorType::COMBINED_IMAGE_SAMPLER;
        check_binding(&self.layout.binding_types, binding, descriptor_type)?;
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: PendingInfo::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .sampler(sampler)
                    .image_layout(layout),
            ),
        });
        Ok(self)
    }

    /// Write a storage image accessed in the `GENERAL` layout.
    pub fn write_storage_image(&mut self, binding: u32, view: vk::ImageView) -> Result<&mut Self, BindingError> {
        let descriptor_type = vk::DescriptorType::STORAGE_IMAGE;
        check_binding(&self.layout.binding_types, binding, descriptor_type)?;
        self.writes.push(PendingWrite {
            binding,
            descriptor_type,
            info: PendingInfo::Image(
                vk::DescriptorImageInfo::default()
                    .image_view(view)
                    .image_layout(vk::ImageLayout::GENERAL),
            ),
        });
        Ok(self)
    }

    /// Apply every pending write to `set`.
    pub fn update(&self, set: vk::DescriptorSet) {
        if self.writes.is_empty() {
            return;
        }

        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|pending| {
                let write = vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(pending.binding)
                    .dst_array_element(0)
                    .descriptor_type(pending.descriptor_type);
                match &pending.info {
                    PendingInfo::Buffer(info) => write.buffer_info(std::slice::from_ref(info)),
                    PendingInfo::Image(info) => write.image_info(std::slice::from_ref(info)),
                }
            })
            .collect();

        unsafe { self.layout.device.raw.update_descriptor_sets(&writes, &[]) }
    }

    pub fn clear(&mut self) {
        self.writes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct MockPool {
        remaining: Cell<u32>,
    }

    /// Pools holding `capacity` descriptors; a layout is the number of descriptors a set needs.
    struct MockPools {
        capacity: u32,
        created: usize,
        attempts: Cell<usize>,
        resets: Cell<usize>,
        fail_with: Option<vk::Result>,
    }

    impl MockPools {
        fn new(capacity: u32) -> Self {
            Self { capacity, created: 0, attempts: Cell::new(0), resets: Cell::new(0), fail_with: None }
        }
    }

    impl PoolProvider for MockPools {
        type Pool = MockPool;
        type Layout = u32;
        type Set = usize;

        fn create_pool(&mut self) -> Result<MockPool, RhiError> {
            self.created += 1;
            Ok(MockPool { remaining: Cell::new(self.capacity) })
        }

        fn allocate(&self, pool: &MockPool, layout: &u32) -> Result<usize, vk::Result> {
            self.attempts.set(self.attempts.get() + 1);
            if let Some(result) = self.fail_with {
                return Err(result);
            }
            if pool.remaining.get() < *layout {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            pool.remaining.set(pool.remaining.get() - layout);
            Ok(self.attempts.get())
        }

        fn reset_pool(&self, pool: &MockPool) -> Result<(), RhiError> {
            self.resets.set(self.resets.get() + 1);
            pool.remaining.set(self.capacity);
            Ok(())
        }

        fn destroy_pool(&self, _pool: MockPool) {}
    }

    #[test]
    fn grows_past_one_pool() {
        let mut chain = PoolChain::new(MockPools::new(4));
        for _ in 0..5 {
            chain.allocate(&1).unwrap();
        }
        assert_eq!(chain.provider.created, 2);
        assert_eq!(chain.pool_count(), 2);
    }

    #[test]
    fn reset_recycles_pools() {
        let mut chain = PoolChain::new(MockPools::new(4));
        for _ in 0..9 {
            chain.allocate(&1).unwrap();
        }
        assert_eq!(chain.provider.created, 3);

        chain.reset().unwrap();
        assert_eq!(chain.provider.resets.get(), 3);

        for _ in 0..9 {
            chain.allocate(&1).unwrap();
        }
        assert_eq!(chain.provider.created, 3);
        assert_eq!(chain.pool_count(), 3);
    }

    #[test]
    fn second_exhaustion_is_fatal() {
        let mut chain = PoolChain::new(MockPools::new(4));
        let err = chain.allocate(&5).unwrap_err();

        assert!(matches!(err, RhiError::DescriptorPoolExhausted));
        assert_eq!(chain.provider.attempts.get(), 2);
        assert_eq!(chain.provider.created, 2);

        // The chain stays usable for sets that fit.
        chain.allocate(&1).unwrap();
    }

    #[test]
    fn fragmented_pool_is_retried() {
        let mut chain = PoolChain::new(MockPools::new(2));
        chain.allocate(&2).unwrap();
        chain.provider.fail_with = Some(vk::Result::ERROR_FRAGMENTED_POOL);
        assert!(matches!(chain.allocate(&1), Err(RhiError::DescriptorPoolExhausted)));
        assert_eq!(chain.provider.attempts.get(), 3);
    }

    #[test]
    fn other_errors_are_not_retried() {
        let mut chain = PoolChain::new(MockPools::new(4));
        chain.provider.fail_with = Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);

        let err = chain.allocate(&1).unwrap_err();
        assert!(matches!(err, RhiError::Vulkan { result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY, .. }));
        assert_eq!(chain.provider.attempts.get(), 1);
    }

    #[test]
    fn pool_sizes_scale_with_ratio() {
        let ratios = [
            PoolSizeRatio { ty: vk::DescriptorType::STORAGE_IMAGE, ratio: 1.0 },
            PoolSizeRatio { ty: vk::DescriptorType::UNIFORM_BUFFER, ratio: 0.5 },
            PoolSizeRatio { ty: vk::DescriptorType::SAMPLER, ratio: 0.0 },
        ];
        let sizes = pool_sizes(&ratios, 10);
        let counts: Vec<u32> = sizes.iter().map(|s| s.descriptor_count).collect();
        assert_eq!(counts, vec![10, 5, 1]);

        let defaults = DescriptorAllocatorConfig::default();
        assert_eq!(defaults.sets_per_pool, 1024);
        assert!(pool_sizes(&defaults.ratios, defaults.sets_per_pool).iter().all(|s| s.descriptor_count == 1024));
    }

    #[test]
    fn writes_are_checked_against_layout() {
        let mut layout = HashMap::default();
        layout.insert(0, vk::DescriptorType::STORAGE_IMAGE);
        layout.insert(1, vk::DescriptorType::UNIFORM_BUFFER);

        assert!(check_binding(&layout, 0, vk::DescriptorType::STORAGE_IMAGE).is_ok());
        assert_eq!(
            check_binding(&layout, 2, vk::DescriptorType::STORAGE_IMAGE),
            Err(BindingError::BindingNotFound(2))
        );
        assert_eq!(
            check_binding(&layout, 1, vk::DescriptorType::STORAGE_BUFFER),
            Err(BindingError::TypeMismatch {
                binding: 1,
                expected: vk::DescriptorType::UNIFORM_BUFFER,
                got: vk::DescriptorType::STORAGE_BUFFER,
            })
        );
    }
}
