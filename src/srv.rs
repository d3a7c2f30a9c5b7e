//! Shader resource view slots.
//!
//! All textures the overlay samples from live in one shader-visible
//! descriptor heap. [`SlotTable`] keeps track of which slots are in use;
//! [`SrvAllocator`] owns the heap and writes the views.
//!
//! Transient slots are tagged with the frame that allocated them and only
//! become reusable when that frame index comes around again, which is the
//! point at which the GPU is known to be done with them.
use crate::error::FrameError;

#[derive(Debug, Clone)]
struct Slot<R> {
    resource: R,
    transient: bool,
}

/// Index bookkeeping for a fixed-capacity descriptor heap.
#[derive(Debug)]
pub struct SlotTable<R> {
    slots: Vec<Option<Slot<R>>>,
    free_list: Vec<u32>,
    cursor: u32,
    capacity: u32,
    transient: Vec<Vec<u32>>,
}

impl<R: PartialEq> SlotTable<R> {
    /// Creates a table of `capacity` slots for a ring of `frame_count`
    /// frames.
    pub fn new(capacity: u32, frame_count: u32) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free_list: Vec::new(),
            cursor: 0,
            capacity,
            transient: (0..frame_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of frames transient slots are tracked for.
    pub fn frame_count(&self) -> u32 {
        self.transient.len() as u32
    }

    /// Number of slots currently holding a resource.
    pub fn live(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether `index` currently holds a resource.
    pub fn is_live(&self, index: u32) -> bool {
        matches!(self.slots.get(index as usize), Some(Some(_)))
    }

    /// Returns the resource stored at `index`.
    pub fn get(&self, index: u32) -> Option<&R> {
        self.slots.get(index as usize)?.as_ref().map(|s| &s.resource)
    }

    /// Claims a slot for `resource`.
    ///
    /// Recycled indices are preferred over fresh ones. When `transient` is
    /// set the slot is released automatically by the next
    /// [`begin_frame`](SlotTable::begin_frame) for `frame_index`.
    pub fn allocate(
        &mut self,
        resource: R,
        transient: bool,
        frame_index: u32,
    ) -> Result<u32, FrameError> {
        if transient && frame_index >= self.frame_count() {
            return Err(FrameError::InvalidFrameIndex {
                index: frame_index,
                count: self.frame_count(),
            });
        }

        let index = match self.free_list.pop() {
            Some(index) => index,
            None if self.cursor < self.capacity => {
                self.cursor += 1;
                self.cursor - 1
            },
            None => return Err(FrameError::HeapExhausted { capacity: self.capacity }),
        };

        self.slots[index as usize] = Some(Slot { resource, transient });
        if transient {
            self.transient[frame_index as usize].push(index);
        }

        Ok(index)
    }

    /// Releases the persistent slot `index` immediately.
    ///
    /// Releasing a slot that is already free is a no-op. Transient slots are
    /// refused: they are only recycled by
    /// [`begin_frame`](SlotTable::begin_frame), once the GPU is done with
    /// them.
    pub fn free(&mut self, index: u32) -> Result<(), FrameError> {
        let slot = self
            .slots
            .get_mut(index as usize)
            .ok_or(FrameError::InvalidSlot { index, capacity: self.capacity })?;

        match *slot {
            Some(Slot { transient: true, .. }) => Err(FrameError::TransientSlot { index }),
            Some(_) => {
                *slot = None;
                self.free_list.push(index);
                Ok(())
            },
            None => Ok(()),
        }
    }

    /// Recycles every transient slot allocated by `frame_index`.
    pub fn begin_frame(&mut self, frame_index: u32) -> Result<(), FrameError> {
        let count = self.frame_count();
        let pending = self
            .transient
            .get_mut(frame_index as usize)
            .ok_or(FrameError::InvalidFrameIndex { index: frame_index, count })?;

        for index in pending.drain(..) {
            self.slots[index as usize] = None;
            self.free_list.push(index);
        }

        Ok(())
    }

    /// Releases the first persistent slot holding `resource`.
    pub fn free_if(&mut self, resource: &R) -> Option<u32> {
        let index = self.slots.iter().position(|slot| {
            matches!(slot, Some(Slot { resource: r, transient: false }) if r == resource)
        })? as u32;

        self.slots[index as usize] = None;
        self.free_list.push(index);
        Some(index)
    }

    /// Changes the number of tracked frames. Every pending transient slot is
    /// released first, so this must only be called with the GPU idle.
    pub fn set_frame_count(&mut self, frame_count: u32) {
        for frame in 0..self.frame_count() {
            let _ = self.begin_frame(frame);
        }
        self.transient = (0..frame_count).map(|_| Vec::new()).collect();
    }
}

#[cfg(windows)]
pub use self::d3d12::{SrvAllocator, SrvSlot};

#[cfg(windows)]
mod d3d12 {
    use tracing::{debug, trace};
    use windows::core::Result;
    use windows::Win32::Graphics::Direct3D12::*;
    use windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT;

    use super::SlotTable;
    use crate::error::FrameError;

    /// A claimed descriptor slot.
    #[derive(Debug, Clone, Copy)]
    pub struct SrvSlot {
        pub index: u32,
        pub cpu: D3D12_CPU_DESCRIPTOR_HANDLE,
        pub gpu: D3D12_GPU_DESCRIPTOR_HANDLE,
    }

    /// Shader-visible CBV/SRV/UAV heap with slot management.
    pub struct SrvAllocator {
        device: ID3D12Device,
        heap: ID3D12DescriptorHeap,
        descriptor_size: u32,
        cpu_start: D3D12_CPU_DESCRIPTOR_HANDLE,
        gpu_start: D3D12_GPU_DESCRIPTOR_HANDLE,
        table: SlotTable<ID3D12Resource>,
    }

    impl SrvAllocator {
        pub fn new(device: &ID3D12Device, capacity: u32, frame_count: u32) -> Result<Self> {
            let heap: ID3D12DescriptorHeap = unsafe {
                device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                    Type: D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
                    NumDescriptors: capacity,
                    Flags: D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE,
                    NodeMask: 0,
                })
            }?;

            let descriptor_size = unsafe {
                device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV)
            };
            let cpu_start = unsafe { heap.GetCPUDescriptorHandleForHeapStart() };
            let gpu_start = unsafe { heap.GetGPUDescriptorHandleForHeapStart() };

            debug!("SRV heap: {capacity} slots, {descriptor_size} bytes each");

            Ok(Self {
                device: device.clone(),
                heap,
                descriptor_size,
                cpu_start,
                gpu_start,
                table: SlotTable::new(capacity, frame_count),
            })
        }

        pub fn heap(&self) -> &ID3D12DescriptorHeap {
            &self.heap
        }

        pub fn table(&self) -> &SlotTable<ID3D12Resource> {
            &self.table
        }

        pub fn slot(&self, index: u32) -> SrvSlot {
            SrvSlot {
                index,
                cpu: D3D12_CPU_DESCRIPTOR_HANDLE {
                    ptr: self.cpu_start.ptr + (index * self.descriptor_size) as usize,
                },
                gpu: D3D12_GPU_DESCRIPTOR_HANDLE {
                    ptr: self.gpu_start.ptr + (index * self.descriptor_size) as u64,
                },
            }
        }

        /// Claims a slot and writes a view of `resource` described by `desc`.
        pub fn allocate(
            &mut self,
            resource: &ID3D12Resource,
            desc: &D3D12_SHADER_RESOURCE_VIEW_DESC,
            transient: bool,
            frame_index: u32,
        ) -> std::result::Result<SrvSlot, FrameError> {
            let index = self.table.allocate(resource.clone(), transient, frame_index)?;
            let slot = self.slot(index);
            unsafe { self.device.CreateShaderResourceView(resource, Some(desc), slot.cpu) };
            trace!("SRV slot {index} allocated (transient: {transient})");
            Ok(slot)
        }

        /// Persistent view of a single-mip 2D texture.
        pub fn allocate_texture_srv(
            &mut self,
            resource: &ID3D12Resource,
            format: DXGI_FORMAT,
        ) -> std::result::Result<SrvSlot, FrameError> {
            self.allocate(resource, &texture2d_srv_desc(format), false, 0)
        }

        /// Persistent view of a swapchain buffer.
        pub fn allocate_backbuffer_srv(
            &mut self,
            resource: &ID3D12Resource,
            format: DXGI_FORMAT,
        ) -> std::result::Result<SrvSlot, FrameError> {
            self.allocate_texture_srv(resource, format)
        }

        pub fn free(&mut self, index: u32) -> std::result::Result<(), FrameError> {
            self.table.free(index)
        }

        /// Drops the view of `resource`, if one was allocated for it.
        pub fn free_if_backbuffer(&mut self, resource: &ID3D12Resource) -> bool {
            self.table.free_if(resource).is_some()
        }

        pub fn begin_frame(&mut self, frame_index: u32) -> std::result::Result<(), FrameError> {
            self.table.begin_frame(frame_index)
        }

        pub fn set_frame_count(&mut self, frame_count: u32) {
            self.table.set_frame_count(frame_count)
        }
    }

    pub(crate) fn texture2d_srv_desc(format: DXGI_FORMAT) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
        D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        }
    }
}
