//! Per-frame GPU resources.
//!
//! Each swapchain buffer gets its own [`FrameResource`]: a command allocator,
//! a command list, a fence and a persistently mapped upload heap that is
//! carved up by an [`UploadArena`]. The arena for buffer `i` is only rewound
//! after the fence for buffer `i` has been waited on, so the CPU never
//! overwrites memory the GPU may still read.
use std::ptr;

use crate::error::FrameError;

/// Alignment required for constant buffer views.
pub const CB_ALIGNMENT: usize = 256;
/// Alignment used for vertex and instance data.
pub const DEFAULT_ALIGNMENT: usize = 16;

/// Rounds `value` up to a multiple of `alignment`, which must be a power of
/// two.
pub const fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

/// Linear bump allocator over a mapped upload buffer.
///
/// The arena starts sealed. [`reset`](UploadArena::reset) opens it for a new
/// frame and [`seal`](UploadArena::seal) closes it once the frame has been
/// submitted; writes to a sealed arena fail with
/// [`FrameError::ArenaInFlight`].
#[derive(Debug)]
pub struct UploadArena {
    cpu_base: *mut u8,
    gpu_base: u64,
    capacity: usize,
    cursor: usize,
    open: bool,
}

// The arena only hands out copies into memory owned by its frame resource.
unsafe impl Send for UploadArena {}

impl UploadArena {
    /// Wraps a mapped region.
    ///
    /// # Safety
    ///
    /// `cpu_base` must be valid for writes of `capacity` bytes for the whole
    /// lifetime of the arena, and `gpu_base` must be the GPU virtual address
    /// of the same region.
    pub unsafe fn from_raw_parts(cpu_base: *mut u8, gpu_base: u64, capacity: usize) -> Self {
        Self { cpu_base, gpu_base, capacity, cursor: 0, open: false }
    }

    /// Rewinds the arena and opens it for writing.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.open = true;
    }

    /// Closes the arena until the next [`reset`](UploadArena::reset).
    pub fn seal(&mut self) {
        self.open = false;
    }

    /// Whether the arena accepts writes.
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Bytes consumed so far in this frame.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Total size of the arena.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// GPU virtual address of the start of the arena.
    pub fn gpu_base(&self) -> u64 {
        self.gpu_base
    }

    /// Copies `data` into the arena at the next offset aligned to
    /// `alignment` and returns its GPU address.
    pub fn push_bytes(&mut self, data: &[u8], alignment: usize) -> Result<u64, FrameError> {
        self.push_parts(&[data], alignment)
    }

    /// Copies `data` as a constant buffer: 256-byte aligned start, and the
    /// cursor is left on a 256-byte boundary.
    pub fn push_cb(&mut self, data: &[u8]) -> Result<u64, FrameError> {
        let address = self.push_parts(&[data], CB_ALIGNMENT)?;
        self.cursor = align_up(self.cursor, CB_ALIGNMENT).min(self.capacity);
        Ok(address)
    }

    /// Copies several slices back to back, as one contiguous allocation.
    pub fn push_parts(&mut self, parts: &[&[u8]], alignment: usize) -> Result<u64, FrameError> {
        if !self.open {
            return Err(FrameError::ArenaInFlight);
        }

        let offset = align_up(self.cursor, alignment);
        let size: usize = parts.iter().map(|p| p.len()).sum();

        if offset + size > self.capacity {
            return Err(FrameError::ArenaExhausted {
                offset,
                requested: size,
                capacity: self.capacity,
            });
        }

        let mut dst = offset;
        for part in parts {
            unsafe { ptr::copy_nonoverlapping(part.as_ptr(), self.cpu_base.add(dst), part.len()) };
            dst += part.len();
        }

        self.cursor = offset + size;
        Ok(self.gpu_base + offset as u64)
    }
}

/// Fixed ring of per-buffer records, indexed by swapchain buffer index.
#[derive(Debug)]
pub struct FrameRing<T> {
    frames: Vec<T>,
}

impl<T> FrameRing<T> {
    /// Builds `count` records with `f(index)`.
    pub fn new<E>(count: u32, f: impl FnMut(u32) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self { frames: (0..count).map(f).collect::<Result<_, _>>()? })
    }

    /// Number of records.
    pub fn len(&self) -> u32 {
        self.frames.len() as u32
    }

    /// Whether the ring holds no records.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Returns the record for buffer `index`.
    pub fn get_mut(&mut self, index: u32) -> Result<&mut T, FrameError> {
        let count = self.len();
        self.frames.get_mut(index as usize).ok_or(FrameError::InvalidFrameIndex { index, count })
    }

    /// Iterates over all records.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.frames.iter()
    }

    /// Iterates mutably over all records.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.frames.iter_mut()
    }
}

#[cfg(windows)]
pub use self::d3d12::{Fence, FrameResource};

#[cfg(windows)]
mod d3d12 {
    use std::ffi::c_void;

    use windows::core::{ComInterface, Result};
    use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WIN32_ERROR};
    use windows::Win32::Graphics::Direct3D12::*;
    use windows::Win32::Graphics::Dxgi::Common::*;
    use windows::Win32::System::Threading::{
        CreateEventExW, WaitForSingleObjectEx, CREATE_EVENT, INFINITE,
    };

    use super::UploadArena;
    use crate::error::FrameError;
    use crate::util::try_out_ptr;

    /// A D3D12 fence with its wait event.
    pub struct Fence {
        fence: ID3D12Fence,
        value: u64,
        event: HANDLE,
    }

    impl Fence {
        pub fn new(device: &ID3D12Device) -> Result<Self> {
            let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }?;
            let event = unsafe { CreateEventExW(None, None, CREATE_EVENT(0), 0x1F0003) }?;

            Ok(Self { fence, value: 0, event })
        }

        /// Bumps the expected value and asks `queue` to signal it.
        pub fn signal(&mut self, queue: &ID3D12CommandQueue) -> Result<()> {
            self.value += 1;
            unsafe { queue.Signal(&self.fence, self.value) }
        }

        /// Blocks until the GPU has reached the last signaled value.
        pub fn wait(&self) -> Result<()> {
            unsafe {
                if self.fence.GetCompletedValue() < self.value {
                    self.fence.SetEventOnCompletion(self.value, self.event)?;
                    let status = WaitForSingleObjectEx(self.event, INFINITE, false);
                    wait_status(status, self.value)?;
                }
            }
            Ok(())
        }

        pub fn value(&self) -> u64 {
            self.value
        }

        pub fn completed(&self) -> u64 {
            unsafe { self.fence.GetCompletedValue() }
        }
    }

    /// Anything but a signaled event means the allocator may still be in use.
    pub(crate) fn wait_status(
        status: WIN32_ERROR,
        value: u64,
    ) -> std::result::Result<(), FrameError> {
        if status == WAIT_OBJECT_0 {
            Ok(())
        } else {
            tracing::error!("Fence wait for {value} returned {:#x}", status.0);
            Err(FrameError::FenceWait { value, status: status.0 })
        }
    }

    impl Drop for Fence {
        fn drop(&mut self) {
            let _ = unsafe { CloseHandle(self.event) };
        }
    }

    /// Command recording state and upload memory for one swapchain buffer.
    pub struct FrameResource {
        command_allocator: ID3D12CommandAllocator,
        command_list: ID3D12GraphicsCommandList,
        fence: Fence,
        upload_heap: ID3D12Resource,
        arena: UploadArena,
    }

    impl FrameResource {
        pub fn new(device: &ID3D12Device, arena_bytes: usize) -> Result<Self> {
            let command_allocator: ID3D12CommandAllocator =
                unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;
            let command_list: ID3D12GraphicsCommandList = unsafe {
                device.CreateCommandList(
                    0,
                    D3D12_COMMAND_LIST_TYPE_DIRECT,
                    &command_allocator,
                    None,
                )
            }?;
            unsafe { command_list.Close() }?;

            let fence = Fence::new(device)?;

            let upload_heap: ID3D12Resource = try_out_ptr(|v| unsafe {
                device.CreateCommittedResource(
                    &D3D12_HEAP_PROPERTIES {
                        Type: D3D12_HEAP_TYPE_UPLOAD,
                        CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
                        MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
                        CreationNodeMask: 0,
                        VisibleNodeMask: 0,
                    },
                    D3D12_HEAP_FLAG_NONE,
                    &buffer_desc(arena_bytes as u64),
                    D3D12_RESOURCE_STATE_GENERIC_READ,
                    None,
                    v,
                )
            })?;

            let mut cpu_base: *mut c_void = std::ptr::null_mut();
            let read_range = D3D12_RANGE { Begin: 0, End: 0 };
            unsafe { upload_heap.Map(0, Some(&read_range), Some(&mut cpu_base)) }?;
            let gpu_base = unsafe { upload_heap.GetGPUVirtualAddress() };

            let arena =
                unsafe { UploadArena::from_raw_parts(cpu_base as *mut u8, gpu_base, arena_bytes) };

            Ok(Self { command_allocator, command_list, fence, upload_heap, arena })
        }

        /// Blocks until the GPU is done with this buffer's previous frame.
        pub fn wait_for_gpu(&self) -> Result<()> {
            self.fence.wait()
        }

        /// Starts recording a new frame. Must follow
        /// [`wait_for_gpu`](FrameResource::wait_for_gpu).
        pub fn reset(&mut self, pipeline_state: &ID3D12PipelineState) -> Result<()> {
            unsafe {
                self.command_allocator.Reset()?;
                self.command_list.Reset(&self.command_allocator, pipeline_state)?;
            }
            self.arena.reset();
            Ok(())
        }

        /// Closes the list, submits it to `queue` and signals the fence.
        pub fn submit(&mut self, queue: &ID3D12CommandQueue) -> Result<()> {
            self.arena.seal();
            unsafe {
                self.command_list.Close()?;
                queue.ExecuteCommandLists(&[Some(self.command_list.cast()?)]);
            }
            self.fence.signal(queue)
        }

        pub fn command_list(&self) -> &ID3D12GraphicsCommandList {
            &self.command_list
        }

        pub fn arena_mut(&mut self) -> &mut UploadArena {
            &mut self.arena
        }

        pub fn fence(&self) -> &Fence {
            &self.fence
        }
    }

    impl Drop for FrameResource {
        fn drop(&mut self) {
            unsafe { self.upload_heap.Unmap(0, None) };
        }
    }

    pub(crate) fn buffer_desc(width: u64) -> D3D12_RESOURCE_DESC {
        D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Alignment: 0,
            Width: width,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: DXGI_FORMAT_UNKNOWN,
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            Flags: D3D12_RESOURCE_FLAG_NONE,
        }
    }
}

#[cfg(windows)]
pub(crate) use self::d3d12::buffer_desc;

#[cfg(test)]
mod tests {
    use super::*;

    struct Backing {
        memory: Vec<u8>,
        arena: UploadArena,
    }

    fn backing(capacity: usize) -> Backing {
        let mut memory = vec![0u8; capacity];
        let arena = unsafe { UploadArena::from_raw_parts(memory.as_mut_ptr(), 0x1_0000, capacity) };
        Backing { memory, arena }
    }

    #[test]
    fn allocations_are_aligned_and_in_bounds() {
        let mut b = backing(64 * 1024);
        b.arena.reset();

        let sizes = [1usize, 60, 17, 300, 4, 255, 1024, 3];
        let mut previous_end = 0u64;
        for (i, size) in sizes.iter().enumerate() {
            let data = vec![i as u8; *size];
            let address = if i % 2 == 0 {
                b.arena.push_cb(&data).unwrap()
            } else {
                b.arena.push_bytes(&data, DEFAULT_ALIGNMENT).unwrap()
            };
            let alignment = (if i % 2 == 0 { CB_ALIGNMENT } else { DEFAULT_ALIGNMENT }) as u64;
            assert_eq!(address % alignment, 0);
            assert!(address >= previous_end);
            assert!(address + *size as u64 <= 0x1_0000 + 64 * 1024);
            previous_end = address + *size as u64;

            let offset = (address - 0x1_0000) as usize;
            assert!(b.memory[offset..offset + size].iter().all(|&x| x == i as u8));
        }
    }

    #[test]
    fn cb_push_leaves_cursor_on_boundary() {
        let mut b = backing(4096);
        b.arena.reset();
        b.arena.push_cb(&[1u8; 10]).unwrap();
        assert_eq!(b.arena.cursor(), 256);
        b.arena.push_bytes(&[2u8; 10], DEFAULT_ALIGNMENT).unwrap();
        assert_eq!(b.arena.cursor(), 266);
    }

    #[test]
    fn rejects_allocation_past_capacity() {
        let mut b = backing(512);
        b.arena.reset();
        b.arena.push_bytes(&[0u8; 500], DEFAULT_ALIGNMENT).unwrap();
        let err = b.arena.push_bytes(&[0u8; 16], DEFAULT_ALIGNMENT).unwrap_err();
        assert_eq!(err, FrameError::ArenaExhausted { offset: 512, requested: 16, capacity: 512 });
        assert_eq!(b.arena.cursor(), 500);
    }

    #[test]
    fn parts_are_contiguous() {
        let mut b = backing(256);
        b.arena.reset();
        let address = b.arena.push_parts(&[&[1, 2, 3], &[4, 5]], DEFAULT_ALIGNMENT).unwrap();
        let offset = (address - 0x1_0000) as usize;
        assert_eq!(&b.memory[offset..offset + 5], &[1, 2, 3, 4, 5]);
    }

    // Models the GPU with a per-buffer "in flight" flag: submitting a frame
    // seals its arena, and only waiting on the buffer's fence lets it reopen.
    #[test]
    fn ring_never_writes_a_frame_in_flight() {
        for count in 2..=4u32 {
            let mut memories: Vec<Vec<u8>> = (0..count).map(|_| vec![0u8; 1024]).collect();
            let mut ring = FrameRing::new(count, |i| {
                let memory = &mut memories[i as usize];
                Ok::<_, FrameError>(unsafe {
                    UploadArena::from_raw_parts(memory.as_mut_ptr(), 0x1000 * (i as u64 + 1), 1024)
                })
            })
            .unwrap();
            assert_eq!(ring.len(), count);

            for frame in 0..count * 3 {
                let index = frame % count;
                let arena = ring.get_mut(index).unwrap();

                // Still sealed from the previous round: the write must fail.
                if frame >= count {
                    assert_eq!(arena.push_bytes(&[0u8; 4], 16), Err(FrameError::ArenaInFlight));
                }

                // Fence wait, then rewind.
                arena.reset();
                arena.push_bytes(&[frame as u8; 64], 16).unwrap();
                arena.seal();
            }

            assert!(matches!(
                ring.get_mut(count),
                Err(FrameError::InvalidFrameIndex { index, count: c })
                    if index == count && c == count
            ));
        }
    }

    #[cfg(windows)]
    #[test]
    fn fence_waits_must_end_signaled() {
        use windows::Win32::Foundation::{WAIT_OBJECT_0, WIN32_ERROR};

        assert_eq!(d3d12::wait_status(WAIT_OBJECT_0, 7), Ok(()));
        // WAIT_FAILED and WAIT_TIMEOUT.
        for status in [0xffff_ffffu32, 0x102] {
            assert_eq!(
                d3d12::wait_status(WIN32_ERROR(status), 7),
                Err(FrameError::FenceWait { value: 7, status })
            );
        }
    }
}
