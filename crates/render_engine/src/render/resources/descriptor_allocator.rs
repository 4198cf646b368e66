//! Growable descriptor set allocator
//!
//! Each frame slot owns one allocator and allocates every descriptor set it
//! needs for that frame from it. Sets are never freed one by one: once the
//! slot's fence has signaled, [`DescriptorAllocator::clear_pools`] resets every
//! pool at once.
//!
//! Pools live in two lists. `ready` pools may still have room; `full` pools
//! reported `OUT_OF_POOL_MEMORY` or `FRAGMENTED_POOL`. When the current pool
//! fails, it moves to `full` and the allocation is retried exactly once. An
//! exhausted pool is retried from another ready pool, or from a fresh pool
//! when none is left. A fragmented pool is always retried from a fresh pool.
//! Fresh pools are 1.5x larger than the previous one, up to the configured
//! cap. Pools are never shrunk; they are
//! only released by [`DescriptorAllocator::destroy_pools`].

use crate::render::api::*;
use crate::render::{RenderError, RenderResult};

/// Capacity multiplier applied each time a new pool is created
pub const POOL_GROWTH_FACTOR: f32 = 1.5;

/// Descriptor pool allocator with growth on exhaustion
#[derive(Debug)]
pub struct DescriptorAllocator {
    label: String,
    ratios: Vec<PoolSizeRatio>,
    ready: Vec<DescriptorPoolHandle>,
    full: Vec<DescriptorPoolHandle>,
    sets_per_pool: u32,
    max_sets_per_pool: u32,
    capacity: u32,
    allocated_since_clear: u32,
}

impl DescriptorAllocator {
    /// Create an allocator whose first pool holds `initial_sets` sets
    pub fn new(
        device: &dyn GpuDevice,
        label: impl Into<String>,
        initial_sets: u32,
        max_sets_per_pool: u32,
        ratios: &[PoolSizeRatio],
    ) -> RenderResult<Self> {
        let label = label.into();
        let initial_sets = initial_sets.clamp(1, max_sets_per_pool.max(1));
        let first = device.create_descriptor_pool(initial_sets, ratios)?;
        log::debug!("{label}: created descriptor pool {:?} ({initial_sets} sets)", first);

        Ok(Self {
            label,
            ratios: ratios.to_vec(),
            ready: vec![first],
            full: Vec::new(),
            sets_per_pool: grow(initial_sets, max_sets_per_pool),
            max_sets_per_pool,
            capacity: initial_sets,
            allocated_since_clear: 0,
        })
    }

    /// Allocate one descriptor set
    ///
    /// A single exhausted pool is recovered by growing; a second failure in a
    /// row is returned as [`RenderError::DescriptorAllocation`].
    pub fn allocate(
        &mut self,
        device: &dyn GpuDevice,
        layout: DescriptorLayoutHandle,
    ) -> RenderResult<DescriptorSetHandle> {
        let pool = self.acquire_pool(device)?;

        let set = match device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready.push(pool);
                set
            }
            Err(failure @ (AllocationError::OutOfPoolMemory | AllocationError::FragmentedPool)) => {
                self.full.push(pool);

                // Fragmentation always retries on a fresh pool.
                let retry_pool = match failure {
                    AllocationError::FragmentedPool => self.create_pool(device)?,
                    _ => self.acquire_pool(device)?,
                };
                match device.allocate_descriptor_set(retry_pool, layout) {
                    Ok(set) => {
                        self.ready.push(retry_pool);
                        set
                    }
                    Err(AllocationError::Device(e)) => {
                        self.ready.push(retry_pool);
                        return Err(e);
                    }
                    Err(e) => {
                        self.full.push(retry_pool);
                        log::error!("{}: descriptor allocation failed after growing: {e}", self.label);
                        return Err(RenderError::DescriptorAllocation(format!("{}: {e}", self.label)));
                    }
                }
            }
            Err(AllocationError::Device(e)) => {
                self.ready.push(pool);
                return Err(e);
            }
        };

        self.allocated_since_clear += 1;
        Ok(set)
    }

    /// Reset every pool and make them all ready again
    ///
    /// The caller guarantees the GPU has finished with every set allocated
    /// since the last clear.
    pub fn clear_pools(&mut self, device: &dyn GpuDevice) -> RenderResult<()> {
        for &pool in self.ready.iter().chain(self.full.iter()) {
            device.reset_descriptor_pool(pool)?;
        }
        self.ready.append(&mut self.full);
        self.allocated_since_clear = 0;
        Ok(())
    }

    /// Destroy every pool
    pub fn destroy_pools(&mut self, device: &dyn GpuDevice) {
        for pool in self.ready.drain(..).chain(self.full.drain(..)) {
            device.destroy_descriptor_pool(pool);
        }
        self.capacity = 0;
        self.allocated_since_clear = 0;
    }

    /// Number of pools currently owned
    pub fn pool_count(&self) -> usize {
        self.ready.len() + self.full.len()
    }

    /// Total set capacity across all pools
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of pools marked full since the last clear
    pub fn full_pool_count(&self) -> usize {
        self.full.len()
    }

    /// Sets handed out since the last clear
    pub fn allocated_since_clear(&self) -> u32 {
        self.allocated_since_clear
    }

    /// Capacity the next freshly created pool will have
    pub fn next_pool_size(&self) -> u32 {
        self.sets_per_pool
    }

    fn acquire_pool(&mut self, device: &dyn GpuDevice) -> RenderResult<DescriptorPoolHandle> {
        match self.ready.pop() {
            Some(pool) => Ok(pool),
            None => self.create_pool(device),
        }
    }

    fn create_pool(&mut self, device: &dyn GpuDevice) -> RenderResult<DescriptorPoolHandle> {
        let sets = self.sets_per_pool;
        let pool = device.create_descriptor_pool(sets, &self.ratios)?;
        self.capacity += sets;
        self.sets_per_pool = grow(sets, self.max_sets_per_pool);
        log::debug!(
            "{}: new descriptor pool {:?} ({} sets, {} total)",
            self.label,
            pool,
            sets,
            self.capacity
        );
        Ok(pool)
    }
}

fn grow(sets: u32, cap: u32) -> u32 {
    let grown = (sets as f32 * POOL_GROWTH_FACTOR).ceil() as u32;
    grown.max(sets + 1).min(cap.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::{Event, RecordingDevice};
    use std::collections::HashSet;

    const RATIOS: [PoolSizeRatio; 2] = [
        PoolSizeRatio { ty: DescriptorType::UniformBuffer, ratio: 1.0 },
        PoolSizeRatio { ty: DescriptorType::CombinedImageSampler, ratio: 1.0 },
    ];

    fn allocator(device: &RecordingDevice, initial: u32, max: u32) -> DescriptorAllocator {
        DescriptorAllocator::new(device, "test", initial, max, &RATIOS).unwrap()
    }

    #[test]
    fn test_growth_creates_enough_pools() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 4, 4092);

        let mut sets = HashSet::new();
        for _ in 0..30 {
            let set = alloc.allocate(&device, layout).unwrap();
            assert!(!set.is_null());
            sets.insert(set);
        }

        // 4 + 6 + 9 + 14 = 33 >= 30
        assert_eq!(alloc.pool_count(), 4);
        assert_eq!(alloc.capacity(), 33);
        assert_eq!(sets.len(), 30);
    }

    #[test]
    fn test_pool_sizes_grow_by_half() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 4, 4092);

        for _ in 0..20 {
            alloc.allocate(&device, layout).unwrap();
        }

        let sizes: Vec<u32> = device
            .events()
            .iter()
            .filter_map(|e| match e {
                Event::PoolCreated { max_sets, .. } => Some(*max_sets),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![4, 6, 9, 14]);
    }

    #[test]
    fn test_clear_reuses_pools_without_growth() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 4, 4092);

        for _ in 0..10 {
            alloc.allocate(&device, layout).unwrap();
        }
        let pools_before = alloc.pool_count();
        let capacity = alloc.capacity();
        assert!(alloc.full_pool_count() > 0);

        alloc.clear_pools(&device).unwrap();
        assert_eq!(alloc.full_pool_count(), 0);
        assert_eq!(alloc.allocated_since_clear(), 0);

        for _ in 0..capacity {
            alloc.allocate(&device, layout).unwrap();
        }
        assert_eq!(alloc.pool_count(), pools_before);
    }

    #[test]
    fn test_clear_resets_every_pool() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 2, 4092);

        for _ in 0..5 {
            alloc.allocate(&device, layout).unwrap();
        }
        alloc.clear_pools(&device).unwrap();

        let resets = device.count_events(|e| matches!(e, Event::PoolReset(_)));
        assert_eq!(resets, alloc.pool_count());
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 4, 4092);

        device.fail_next_allocations(2);
        let result = alloc.allocate(&device, layout);
        assert!(matches!(result, Err(RenderError::DescriptorAllocation(_))));

        // Exactly one retry: two allocation attempts, one new pool, both full.
        assert_eq!(device.count_events(|e| matches!(e, Event::SetAllocated { .. })), 0);
        assert_eq!(alloc.pool_count(), 2);
        assert_eq!(alloc.full_pool_count(), 2);
    }

    #[test]
    fn test_fragmented_pool_retries_on_fresh_pool() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 4, 4092);

        // Two pools, both ready again after the clear.
        for _ in 0..5 {
            alloc.allocate(&device, layout).unwrap();
        }
        alloc.clear_pools(&device).unwrap();
        assert_eq!(alloc.pool_count(), 2);

        device.clear_events();
        device.fragment_next_allocation();
        alloc.allocate(&device, layout).unwrap();

        let events = device.events();
        let created: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::PoolCreated { pool, .. } => Some(*pool),
                _ => None,
            })
            .collect();
        let used: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::SetAllocated { pool, .. } => Some(*pool),
                _ => None,
            })
            .collect();
        assert_eq!(created.len(), 1);
        assert_eq!(used, created);
        assert_eq!(alloc.pool_count(), 3);
        assert_eq!(alloc.full_pool_count(), 1);
    }

    #[test]
    fn test_single_failure_is_recovered() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 4, 4092);

        device.fail_next_allocations(1);
        assert!(alloc.allocate(&device, layout).is_ok());
        assert_eq!(alloc.full_pool_count(), 1);
    }

    #[test]
    fn test_growth_is_capped() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 8, 10);

        for _ in 0..40 {
            alloc.allocate(&device, layout).unwrap();
        }
        assert_eq!(alloc.next_pool_size(), 10);
        // 8 + 10 + 10 + 10 + 10 = 48
        assert_eq!(alloc.pool_count(), 5);
    }

    #[test]
    fn test_destroy_releases_all_pools() {
        let device = RecordingDevice::new();
        let layout = device.create_descriptor_layout(&[]).unwrap();
        let mut alloc = allocator(&device, 2, 4092);
        for _ in 0..7 {
            alloc.allocate(&device, layout).unwrap();
        }

        alloc.destroy_pools(&device);
        device.destroy_descriptor_layout(layout);
        assert_eq!(alloc.pool_count(), 0);
        assert_eq!(device.live_resources(), 0);
    }
}
