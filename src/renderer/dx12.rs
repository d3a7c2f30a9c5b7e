// NOTE: see this for ManuallyDrop instances https://github.com/microsoft/windows-rs/issues/2386

//! Direct3D 12 implementation of [`RenderBackend`].
//!
//! [`DeviceContext`] either adopts the host's swapchain and queue (hooked
//! mode) or creates its own window-bound swapchain (standalone mode). Both
//! end up with one [`FrameResource`] per swapchain buffer, a single
//! shader-visible SRV heap and one pipeline state.
use std::ffi::c_void;
use std::mem::{self, ManuallyDrop};
use std::{ptr, slice};

use memoffset::offset_of;
use tracing::{debug, error, info, trace, warn};
use windows::core::{s, w, ComInterface, Error, Result};
use windows::Win32::Foundation::{E_INVALIDARG, RECT};
use windows::Win32::Graphics::Direct3D::Fxc::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::config::OverlayConfig;
use crate::error::{SetupContext, SetupError};
use crate::fonts::AtlasImage;
use crate::frame::{buffer_desc, FrameResource, FrameRing, DEFAULT_ALIGNMENT};
use crate::math::{screen_projection, Mat4};
use crate::process::ProcessState;
use crate::renderer::shaders::{PIXEL_SHADER, VERTEX_SHADER};
use crate::renderer::{
    white_texture, Batch, DrawRecord, FrameStatus, RenderBackend, ResizeRequest, TextureId,
};
use crate::shapes::{ShapeInstance, QUAD_INDEX_COUNT, QUAD_INDICES, QUAD_VERTICES};
use crate::srv::SrvAllocator;
use crate::util::{self, try_out_err_blob, try_out_ptr, write_mapped};
use crate::vtable::create_device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Adopted the host's swapchain; the host presents.
    Hooked,
    /// Owns the swapchain and presents it.
    Standalone,
}

struct Backbuffer {
    resource: ID3D12Resource,
    rtv: D3D12_CPU_DESCRIPTOR_HANDLE,
}

/// The D3D12 render context.
pub struct DeviceContext {
    mode: Mode,
    device: ID3D12Device,
    command_queue: ID3D12CommandQueue,
    swap_chain: IDXGISwapChain3,
    format: DXGI_FORMAT,

    rtv_heap: Option<ID3D12DescriptorHeap>,
    backbuffers: Vec<Backbuffer>,
    frames: FrameRing<FrameResource>,
    ring_generation: u32,
    arena_bytes: usize,
    srv: SrvAllocator,

    root_signature: ID3D12RootSignature,
    pipeline_state: ID3D12PipelineState,
    quad: QuadMesh,
    uploader: TextureUploader,
    textures: Vec<ID3D12Resource>,
    white: TextureId,

    projection: Mat4,
    viewport: (u32, u32),
    frame_index: u32,
    recording: bool,
    last_draws: Vec<DrawRecord>,
}

// COM pointers here are only ever used from one thread at a time: the render
// thread, behind the overlay mutex.
unsafe impl Send for DeviceContext {}

impl DeviceContext {
    /// Adopts the swapchain and queue handed to the `Present` detour.
    pub fn hooked(
        swap_chain: &IDXGISwapChain3,
        command_queue: &ID3D12CommandQueue,
        config: &OverlayConfig,
    ) -> std::result::Result<Self, SetupError> {
        let device: ID3D12Device =
            unsafe { swap_chain.GetDevice() }.context("IDXGISwapChain::GetDevice")?;
        Self::new(Mode::Hooked, device, command_queue.clone(), swap_chain.clone(), config)
    }

    /// Creates a device and a swapchain for the window of `process`.
    pub fn standalone(
        process: &ProcessState,
        config: &OverlayConfig,
    ) -> std::result::Result<Self, SetupError> {
        if config.debug_layer {
            util::enable_dxgi_debug();
        }

        let factory: IDXGIFactory6 =
            unsafe { CreateDXGIFactory2(0) }.context("CreateDXGIFactory2")?;
        let adapter: IDXGIAdapter1 = unsafe {
            factory.EnumAdapterByGpuPreference(0, DXGI_GPU_PREFERENCE_HIGH_PERFORMANCE)
        }
        .context("EnumAdapterByGpuPreference")?;

        let (device, _) = create_device(&adapter)?;
        let command_queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Priority: 0,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            })
        }
        .context("CreateCommandQueue")?;

        let hwnd = process.hwnd();
        let size = process.size();
        let desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: size.x.max(1) as u32,
            Height: size.y.max(1) as u32,
            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
            Stereo: false.into(),
            SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: config.buffer_count,
            Scaling: DXGI_SCALING_STRETCH,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_UNSPECIFIED,
            Flags: 0,
        };

        let swap_chain: IDXGISwapChain1 =
            unsafe { factory.CreateSwapChainForHwnd(&command_queue, hwnd, &desc, None, None) }
                .context("CreateSwapChainForHwnd")?;
        unsafe { factory.MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER) }
            .context("MakeWindowAssociation")?;
        let swap_chain: IDXGISwapChain3 =
            swap_chain.cast().context("IDXGISwapChain1::cast<IDXGISwapChain3>")?;

        Self::new(Mode::Standalone, device, command_queue, swap_chain, config)
    }

    fn new(
        mode: Mode,
        device: ID3D12Device,
        command_queue: ID3D12CommandQueue,
        swap_chain: IDXGISwapChain3,
        config: &OverlayConfig,
    ) -> std::result::Result<Self, SetupError> {
        let desc = unsafe { swap_chain.GetDesc1() }.context("IDXGISwapChain1::GetDesc1")?;
        let buffer_count = desc.BufferCount;
        info!(
            "Initializing {mode:?} device context: {buffer_count} buffers, {}x{}, format {:?}",
            desc.Width, desc.Height, desc.Format
        );

        let srv = SrvAllocator::new(&device, config.srv_capacity, buffer_count)
            .context("Creating SRV heap")?;
        let root_signature =
            unsafe { create_root_signature(&device) }.context("Creating root signature")?;
        let pipeline_state = unsafe { create_pipeline_state(&device, &root_signature, desc.Format) }
            .context("Creating pipeline state")?;
        let frames =
            FrameRing::new(buffer_count, |_| FrameResource::new(&device, config.arena_bytes))
                .context("Creating frame resources")?;
        let quad = QuadMesh::new(&device).context("Creating quad mesh")?;
        let uploader = TextureUploader::new(&device).context("Creating texture uploader")?;

        let mut ctx = Self {
            mode,
            device,
            command_queue,
            swap_chain,
            format: desc.Format,
            rtv_heap: None,
            backbuffers: Vec::new(),
            frames,
            ring_generation: 0,
            arena_bytes: config.arena_bytes,
            srv,
            root_signature,
            pipeline_state,
            quad,
            uploader,
            textures: Vec::new(),
            white: TextureId::default(),
            projection: screen_projection(desc.Width, desc.Height),
            viewport: (desc.Width, desc.Height),
            frame_index: 0,
            recording: false,
            last_draws: Vec::new(),
        };

        ctx.white = ctx.create_texture(&white_texture()).context("Creating white texture")?;
        ctx.create_backbuffers().context("Creating backbuffer views")?;
        ctx.frame_index = unsafe { ctx.swap_chain.GetCurrentBackBufferIndex() };

        Ok(ctx)
    }

    pub fn device(&self) -> &ID3D12Device {
        &self.device
    }

    pub fn swap_chain(&self) -> &IDXGISwapChain3 {
        &self.swap_chain
    }

    pub fn srv(&self) -> &SrvAllocator {
        &self.srv
    }

    pub fn frame_count(&self) -> u32 {
        self.frames.len()
    }

    pub fn frame_index(&self) -> u32 {
        self.frame_index
    }

    /// Number of times the frame ring has been rebuilt by a resize.
    pub fn ring_generation(&self) -> u32 {
        self.ring_generation
    }

    /// Draws issued by the last `end_frame`.
    pub fn last_frame_draws(&self) -> &[DrawRecord] {
        &self.last_draws
    }

    /// Logs why the device was removed, if it was.
    pub fn log_device_removed_reason(&self) {
        if let Err(e) = unsafe { self.device.GetDeviceRemovedReason() } {
            error!("Device removed: {e:?}");
        }
    }

    /// Presents the owned swapchain. Standalone mode only.
    pub fn present(&mut self) -> Result<()> {
        if self.mode != Mode::Standalone {
            return Err(Error::new(E_INVALIDARG, "present on a hooked swapchain".into()));
        }
        let result = unsafe { self.swap_chain.Present(1, 0) }.ok();
        if let Err(e) = &result {
            error!("Present: {e:?}");
            self.log_device_removed_reason();
            util::print_dxgi_debug_messages();
        }
        self.post_present();
        result
    }

    /// Resizes the owned swapchain. Standalone mode only.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.mode != Mode::Standalone {
            return Err(Error::new(E_INVALIDARG, "resize on a hooked swapchain".into()));
        }
        self.release_backbuffers()?;
        unsafe { self.swap_chain.ResizeBuffers(0, width, height, DXGI_FORMAT_UNKNOWN, 0) }?;
        self.recreate_backbuffers(&ResizeRequest { buffer_count: 0, width, height, format: 0 })
    }

    fn create_backbuffers(&mut self) -> Result<()> {
        let count = self.frames.len();
        let rtv_heap: ID3D12DescriptorHeap = unsafe {
            self.device.CreateDescriptorHeap(&D3D12_DESCRIPTOR_HEAP_DESC {
                Type: D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
                NumDescriptors: count,
                Flags: D3D12_DESCRIPTOR_HEAP_FLAG_NONE,
                NodeMask: 0,
            })
        }?;
        unsafe { rtv_heap.SetName(w!("flashhook RTV heap")) }?;

        let start = unsafe { rtv_heap.GetCPUDescriptorHandleForHeapStart() };
        let increment =
            unsafe { self.device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_RTV) };

        for i in 0..count {
            let resource: ID3D12Resource = unsafe { self.swap_chain.GetBuffer(i) }?;
            let rtv = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: start.ptr + (i * increment) as usize };
            unsafe { self.device.CreateRenderTargetView(&resource, None, rtv) };
            let slot = self.srv.allocate_backbuffer_srv(&resource, self.format)?;
            trace!("Backbuffer {i}: rtv {:#x}, srv slot {}", rtv.ptr, slot.index);
            self.backbuffers.push(Backbuffer { resource, rtv });
        }

        self.rtv_heap = Some(rtv_heap);
        debug!("Created {count} backbuffer views");
        Ok(())
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.viewport = (width, height);
        self.projection = screen_projection(width, height);
    }
}

impl RenderBackend for DeviceContext {
    type Error = Error;

    fn begin_frame(&mut self) -> Result<FrameStatus> {
        let index = self.frame_index;
        let Some(backbuffer) = self.backbuffers.get(index as usize) else {
            trace!("No backbuffer {index}, skipping frame");
            return Ok(FrameStatus::Skipped);
        };

        let frame = self.frames.get_mut(index)?;
        frame.wait_for_gpu()?;
        self.srv.begin_frame(index)?;
        frame.reset(&self.pipeline_state)?;

        let (width, height) = self.viewport;
        let white = self.srv.slot(self.white.0).gpu;
        let list = frame.command_list();

        unsafe {
            let barriers = [util::create_barrier(
                &backbuffer.resource,
                D3D12_RESOURCE_STATE_PRESENT,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
            )];
            list.ResourceBarrier(&barriers);
            barriers.into_iter().for_each(util::drop_barrier);

            list.SetDescriptorHeaps(&[Some(self.srv.heap().clone())]);
            list.SetGraphicsRootSignature(&self.root_signature);
            list.SetGraphicsRoot32BitConstants(0, 16, self.projection.as_ptr() as *const c_void, 0);
            list.SetGraphicsRootDescriptorTable(1, white);
            list.RSSetViewports(&[D3D12_VIEWPORT {
                TopLeftX: 0f32,
                TopLeftY: 0f32,
                Width: width as f32,
                Height: height as f32,
                MinDepth: 0f32,
                MaxDepth: 1f32,
            }]);
            list.RSSetScissorRects(&[RECT {
                left: 0,
                top: 0,
                right: width as i32,
                bottom: height as i32,
            }]);
            list.OMSetRenderTargets(1, Some(&backbuffer.rtv), false, None);
            list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            list.IASetIndexBuffer(Some(&self.quad.index_view));
        }

        self.recording = true;
        Ok(FrameStatus::Ready)
    }

    fn end_frame(&mut self, batches: &[Batch<'_>]) -> Result<()> {
        if !self.recording {
            return Ok(());
        }
        self.recording = false;
        self.last_draws.clear();

        let index = self.frame_index;
        let Some(backbuffer) = self.backbuffers.get(index as usize) else {
            return Ok(());
        };
        let frame = self.frames.get_mut(index)?;

        for batch in batches {
            let count = batch.partition.instance_count();
            if count == 0 {
                continue;
            }

            let parts: [&[u8]; 2] = [
                bytemuck::cast_slice(batch.partition.persistent),
                bytemuck::cast_slice(batch.partition.transient),
            ];
            let address = match frame.arena_mut().push_parts(&parts, DEFAULT_ALIGNMENT) {
                Ok(address) => address,
                Err(e) => {
                    error!("Dropping partition {:?}: {e}", batch.partition.key);
                    continue;
                },
            };

            let texture = batch
                .texture
                .filter(|t| self.srv.table().is_live(t.0))
                .unwrap_or(self.white);
            let instance_view = D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: address,
                SizeInBytes: count * mem::size_of::<ShapeInstance>() as u32,
                StrideInBytes: mem::size_of::<ShapeInstance>() as u32,
            };

            let list = frame.command_list();
            unsafe {
                list.IASetVertexBuffers(0, Some(&[self.quad.vertex_view, instance_view]));
                list.SetGraphicsRootDescriptorTable(1, self.srv.slot(texture.0).gpu);
                list.DrawIndexedInstanced(QUAD_INDEX_COUNT, count, 0, 0, 0);
            }
            self.last_draws.push(DrawRecord::quads(batch.partition.key, count));
        }

        unsafe {
            let barriers = [util::create_barrier(
                &backbuffer.resource,
                D3D12_RESOURCE_STATE_RENDER_TARGET,
                D3D12_RESOURCE_STATE_PRESENT,
            )];
            frame.command_list().ResourceBarrier(&barriers);
            barriers.into_iter().for_each(util::drop_barrier);
        }

        frame.submit(&self.command_queue)?;
        trace!("Submitted frame {index} with {} draws", self.last_draws.len());
        Ok(())
    }

    fn post_present(&mut self) {
        self.frame_index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };
    }

    fn create_texture(&mut self, image: &AtlasImage) -> Result<TextureId> {
        let texture: ID3D12Resource = try_out_ptr(|v| unsafe {
            self.device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_DEFAULT,
                    CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
                    MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
                    CreationNodeMask: Default::default(),
                    VisibleNodeMask: Default::default(),
                },
                D3D12_HEAP_FLAG_NONE,
                &D3D12_RESOURCE_DESC {
                    Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                    Alignment: 0,
                    Width: image.width as _,
                    Height: image.height as _,
                    DepthOrArraySize: 1,
                    MipLevels: 1,
                    Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                    SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
                    Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                    Flags: D3D12_RESOURCE_FLAG_NONE,
                },
                D3D12_RESOURCE_STATE_COPY_DEST,
                None,
                v,
            )
        })?;
        unsafe { texture.SetName(w!("flashhook Texture")) }?;

        self.uploader.upload(&self.device, &texture, image)?;
        let slot = self.srv.allocate_texture_srv(&texture, DXGI_FORMAT_R8G8B8A8_UNORM)?;
        self.textures.push(texture);

        debug!("Texture {}x{} in SRV slot {}", image.width, image.height, slot.index);
        Ok(TextureId(slot.index))
    }

    fn release_backbuffers(&mut self) -> Result<()> {
        let mut result = Ok(());
        for frame in self.frames.iter() {
            if let Err(e) = frame.wait_for_gpu() {
                error!("Waiting for frame before resize: {e:?}");
                result = Err(e);
            }
        }

        for backbuffer in self.backbuffers.drain(..) {
            self.srv.free_if_backbuffer(&backbuffer.resource);
        }
        self.rtv_heap = None;
        self.recording = false;

        debug!("Released backbuffers");
        result
    }

    fn recreate_backbuffers(&mut self, request: &ResizeRequest) -> Result<()> {
        let desc = unsafe { self.swap_chain.GetDesc1() }?;
        let count = desc.BufferCount;
        if request.buffer_count != 0 && request.buffer_count != count {
            warn!("Requested {} buffers, swapchain has {count}", request.buffer_count);
        }

        if desc.Format != self.format {
            info!("Swapchain format changed {:?} -> {:?}", self.format, desc.Format);
            self.pipeline_state =
                unsafe { create_pipeline_state(&self.device, &self.root_signature, desc.Format) }?;
            self.format = desc.Format;
        }

        // Every fence was drained by release_backbuffers.
        let device = &self.device;
        let arena_bytes = self.arena_bytes;
        self.frames = FrameRing::new(count, |_| FrameResource::new(device, arena_bytes))?;
        self.ring_generation += 1;
        self.srv.set_frame_count(count);

        self.create_backbuffers()?;
        self.set_viewport(desc.Width, desc.Height);
        self.frame_index = unsafe { self.swap_chain.GetCurrentBackBufferIndex() };

        debug!("Recreated {count} backbuffers at {}x{}", desc.Width, desc.Height);
        Ok(())
    }

    fn backbuffer_count(&self) -> u32 {
        self.backbuffers.len() as u32
    }

    fn viewport_size(&self) -> (u32, u32) {
        self.viewport
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        for frame in self.frames.iter() {
            if let Err(e) = frame.wait_for_gpu() {
                error!("Waiting for frame on drop: {e:?}");
            }
        }
    }
}

/// Shared unit quad.
struct QuadMesh {
    _vertices: ID3D12Resource,
    _indices: ID3D12Resource,
    vertex_view: D3D12_VERTEX_BUFFER_VIEW,
    index_view: D3D12_INDEX_BUFFER_VIEW,
}

impl QuadMesh {
    fn new(device: &ID3D12Device) -> Result<Self> {
        let vertex_bytes: &[u8] = bytemuck::cast_slice(&QUAD_VERTICES);
        let index_bytes: &[u8] = bytemuck::cast_slice(&QUAD_INDICES);

        let vertices = upload_buffer(device, vertex_bytes)?;
        let indices = upload_buffer(device, index_bytes)?;

        unsafe {
            vertices.SetName(w!("flashhook Quad Vertices"))?;
            indices.SetName(w!("flashhook Quad Indices"))?;
        }

        Ok(Self {
            vertex_view: D3D12_VERTEX_BUFFER_VIEW {
                BufferLocation: unsafe { vertices.GetGPUVirtualAddress() },
                SizeInBytes: vertex_bytes.len() as u32,
                StrideInBytes: mem::size_of::<[f32; 2]>() as u32,
            },
            index_view: D3D12_INDEX_BUFFER_VIEW {
                BufferLocation: unsafe { indices.GetGPUVirtualAddress() },
                SizeInBytes: index_bytes.len() as u32,
                Format: DXGI_FORMAT_R16_UINT,
            },
            _vertices: vertices,
            _indices: indices,
        })
    }
}

/// Upload-heap buffer initialized with `data`.
fn upload_buffer(device: &ID3D12Device, data: &[u8]) -> Result<ID3D12Resource> {
    let resource: ID3D12Resource = try_out_ptr(|v| unsafe {
        device.CreateCommittedResource(
            &D3D12_HEAP_PROPERTIES {
                Type: D3D12_HEAP_TYPE_UPLOAD,
                CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
                MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
                CreationNodeMask: 0,
                VisibleNodeMask: 0,
            },
            D3D12_HEAP_FLAG_NONE,
            &buffer_desc(data.len() as u64),
            D3D12_RESOURCE_STATE_GENERIC_READ,
            None,
            v,
        )
    })?;

    unsafe {
        let mut mapped = ptr::null_mut();
        resource.Map(0, None, Some(&mut mapped))?;
        write_mapped(mapped, data);
        resource.Unmap(0, None);
    }

    Ok(resource)
}

/// One-shot copy queue for texture uploads.
struct TextureUploader {
    command_queue: ID3D12CommandQueue,
    command_allocator: ID3D12CommandAllocator,
    command_list: ID3D12GraphicsCommandList,
    fence: crate::frame::Fence,
}

impl TextureUploader {
    fn new(device: &ID3D12Device) -> Result<Self> {
        let command_queue: ID3D12CommandQueue = unsafe {
            device.CreateCommandQueue(&D3D12_COMMAND_QUEUE_DESC {
                Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
                Priority: 0,
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                NodeMask: 0,
            })
        }?;

        let command_allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }?;

        let command_list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(0, D3D12_COMMAND_LIST_TYPE_DIRECT, &command_allocator, None)
        }?;

        unsafe {
            command_list.Close()?;
            command_allocator.SetName(w!("flashhook Upload Command Allocator"))?;
            command_list.SetName(w!("flashhook Upload Command List"))?;
        }

        let fence = crate::frame::Fence::new(device)?;

        Ok(Self { command_queue, command_allocator, command_list, fence })
    }

    /// Copies `image` into `texture` and waits for the copy to finish.
    fn upload(
        &mut self,
        device: &ID3D12Device,
        texture: &ID3D12Resource,
        image: &AtlasImage,
    ) -> Result<()> {
        let row_size = image.width * 4;
        if image.pixels.len() != (row_size * image.height) as usize {
            error!(
                "Image data is {} bytes, expected {}x{}x4",
                image.pixels.len(),
                image.width,
                image.height
            );
            return Err(Error::new(E_INVALIDARG, "image size mismatch".into()));
        }

        let align = D3D12_TEXTURE_DATA_PITCH_ALIGNMENT;
        let pitch = (row_size + align - 1) / align * align;
        let staging: ID3D12Resource = try_out_ptr(|v| unsafe {
            device.CreateCommittedResource(
                &D3D12_HEAP_PROPERTIES {
                    Type: D3D12_HEAP_TYPE_UPLOAD,
                    CPUPageProperty: D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
                    MemoryPoolPreference: D3D12_MEMORY_POOL_UNKNOWN,
                    CreationNodeMask: Default::default(),
                    VisibleNodeMask: Default::default(),
                },
                D3D12_HEAP_FLAG_NONE,
                &buffer_desc((pitch * image.height) as u64),
                D3D12_RESOURCE_STATE_GENERIC_READ,
                None,
                v,
            )
        })?;

        unsafe {
            let mut mapped = ptr::null_mut();
            staging.Map(0, None, Some(&mut mapped))?;
            for (y, row) in image.pixels.chunks_exact(row_size as usize).enumerate() {
                write_mapped((mapped as *mut u8).add(y * pitch as usize) as *mut c_void, row);
            }
            staging.Unmap(0, None);

            self.command_allocator.Reset()?;
            self.command_list.Reset(&self.command_allocator, None)?;

            let dst_location = D3D12_TEXTURE_COPY_LOCATION {
                pResource: ManuallyDrop::new(Some(texture.clone())),
                Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 { SubresourceIndex: 0 },
            };

            let src_location = D3D12_TEXTURE_COPY_LOCATION {
                pResource: ManuallyDrop::new(Some(staging.clone())),
                Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
                Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                    PlacedFootprint: D3D12_PLACED_SUBRESOURCE_FOOTPRINT {
                        Offset: 0,
                        Footprint: D3D12_SUBRESOURCE_FOOTPRINT {
                            Format: DXGI_FORMAT_R8G8B8A8_UNORM,
                            Width: image.width,
                            Height: image.height,
                            Depth: 1,
                            RowPitch: pitch,
                        },
                    },
                },
            };

            self.command_list.CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, None);
            let barriers = [util::create_barrier(
                texture,
                D3D12_RESOURCE_STATE_COPY_DEST,
                D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
            )];
            self.command_list.ResourceBarrier(&barriers);
            self.command_list.Close()?;
            self.command_queue.ExecuteCommandLists(&[Some(self.command_list.cast()?)]);
            self.fence.signal(&self.command_queue)?;
            self.fence.wait()?;

            barriers.into_iter().for_each(util::drop_barrier);
            let _ = ManuallyDrop::into_inner(dst_location.pResource);
            let _ = ManuallyDrop::into_inner(src_location.pResource);
        }

        Ok(())
    }
}

unsafe fn create_root_signature(device: &ID3D12Device) -> Result<ID3D12RootSignature> {
    let ranges = [D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: 1,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: 0,
    }];

    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: 16,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_VERTEX,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: ranges.len() as u32,
                    pDescriptorRanges: ranges.as_ptr(),
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
    ];

    let root_signature_desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 1,
        pStaticSamplers: &D3D12_STATIC_SAMPLER_DESC {
            Filter: D3D12_FILTER_MIN_MAG_MIP_POINT,
            AddressU: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressV: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            AddressW: D3D12_TEXTURE_ADDRESS_MODE_CLAMP,
            MipLODBias: 0f32,
            MaxAnisotropy: 0,
            ComparisonFunc: D3D12_COMPARISON_FUNC_ALWAYS,
            BorderColor: D3D12_STATIC_BORDER_COLOR_TRANSPARENT_BLACK,
            MinLOD: 0f32,
            MaxLOD: 0f32,
            ShaderRegister: 0,
            RegisterSpace: 0,
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
        Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT
            | D3D12_ROOT_SIGNATURE_FLAG_DENY_HULL_SHADER_ROOT_ACCESS
            | D3D12_ROOT_SIGNATURE_FLAG_DENY_DOMAIN_SHADER_ROOT_ACCESS
            | D3D12_ROOT_SIGNATURE_FLAG_DENY_GEOMETRY_SHADER_ROOT_ACCESS,
    };

    let blob: ID3DBlob = try_out_err_blob(|v, err_blob| {
        D3D12SerializeRootSignature(
            &root_signature_desc,
            D3D_ROOT_SIGNATURE_VERSION_1_0,
            v,
            Some(err_blob),
        )
    })
    .map_err(util::print_error_blob("Serializing root signature"))?;

    let root_signature: ID3D12RootSignature = device.CreateRootSignature(
        0,
        slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize()),
    )?;
    root_signature.SetName(w!("flashhook Root Signature"))?;

    Ok(root_signature)
}

fn compile_shader(
    source: &str,
    target: windows::core::PCSTR,
    what: &'static str,
) -> Result<ID3DBlob> {
    try_out_err_blob(|v, err_blob| unsafe {
        D3DCompile(
            source.as_ptr() as _,
            source.len(),
            None,
            None,
            None::<&ID3DInclude>,
            s!("main"),
            target,
            0,
            0,
            v,
            Some(err_blob),
        )
    })
    .map_err(util::print_error_blob(what))
}

fn instance_element(
    semantic_index: u32,
    format: DXGI_FORMAT,
    offset: usize,
) -> D3D12_INPUT_ELEMENT_DESC {
    D3D12_INPUT_ELEMENT_DESC {
        SemanticName: s!("TEXCOORD"),
        SemanticIndex: semantic_index,
        Format: format,
        InputSlot: 1,
        AlignedByteOffset: offset as u32,
        InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_INSTANCE_DATA,
        InstanceDataStepRate: 1,
    }
}

unsafe fn create_pipeline_state(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    format: DXGI_FORMAT,
) -> Result<ID3D12PipelineState> {
    let vtx_shader = compile_shader(VERTEX_SHADER, s!("vs_5_0"), "Compiling vertex shader")?;
    let pix_shader = compile_shader(PIXEL_SHADER, s!("ps_5_0"), "Compiling pixel shader")?;

    let input_elements = [
        D3D12_INPUT_ELEMENT_DESC {
            SemanticName: s!("POSITION"),
            SemanticIndex: 0,
            Format: DXGI_FORMAT_R32G32_FLOAT,
            InputSlot: 0,
            AlignedByteOffset: 0,
            InputSlotClass: D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
            InstanceDataStepRate: 0,
        },
        instance_element(1, DXGI_FORMAT_R32G32_FLOAT, offset_of!(ShapeInstance, pos)),
        instance_element(2, DXGI_FORMAT_R32G32_FLOAT, offset_of!(ShapeInstance, size)),
        instance_element(3, DXGI_FORMAT_R32_FLOAT, offset_of!(ShapeInstance, rotation)),
        instance_element(4, DXGI_FORMAT_R32_FLOAT, offset_of!(ShapeInstance, stroke_width)),
        instance_element(5, DXGI_FORMAT_R32G32B32A32_FLOAT, offset_of!(ShapeInstance, color)),
        instance_element(6, DXGI_FORMAT_R32_UINT, offset_of!(ShapeInstance, shape_type)),
        instance_element(7, DXGI_FORMAT_R32G32B32A32_FLOAT, offset_of!(ShapeInstance, uv)),
    ];

    let pso_desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
        NodeMask: 0,
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        SampleMask: u32::MAX,
        NumRenderTargets: 1,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Flags: D3D12_PIPELINE_STATE_FLAG_NONE,
        RTVFormats: [
            format,
            Default::default(),
            Default::default(),
            Default::default(),
            Default::default(),
            Default::default(),
            Default::default(),
            Default::default(),
        ],
        DSVFormat: DXGI_FORMAT_UNKNOWN,
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: vtx_shader.GetBufferPointer(),
            BytecodeLength: vtx_shader.GetBufferSize(),
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: pix_shader.GetBufferPointer(),
            BytecodeLength: pix_shader.GetBufferSize(),
        },
        InputLayout: D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: input_elements.as_ptr(),
            NumElements: input_elements.len() as u32,
        },
        BlendState: D3D12_BLEND_DESC {
            AlphaToCoverageEnable: false.into(),
            IndependentBlendEnable: false.into(),
            RenderTarget: [
                D3D12_RENDER_TARGET_BLEND_DESC {
                    BlendEnable: true.into(),
                    LogicOpEnable: false.into(),
                    SrcBlend: D3D12_BLEND_SRC_ALPHA,
                    DestBlend: D3D12_BLEND_INV_SRC_ALPHA,
                    BlendOp: D3D12_BLEND_OP_ADD,
                    SrcBlendAlpha: D3D12_BLEND_ONE,
                    DestBlendAlpha: D3D12_BLEND_INV_SRC_ALPHA,
                    BlendOpAlpha: D3D12_BLEND_OP_ADD,
                    LogicOp: Default::default(),
                    RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as _,
                },
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
            ],
        },
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: D3D12_CULL_MODE_NONE,
            FrontCounterClockwise: false.into(),
            DepthBias: D3D12_DEFAULT_DEPTH_BIAS,
            DepthBiasClamp: D3D12_DEFAULT_DEPTH_BIAS_CLAMP,
            SlopeScaledDepthBias: D3D12_DEFAULT_SLOPE_SCALED_DEPTH_BIAS,
            DepthClipEnable: true.into(),
            MultisampleEnable: false.into(),
            AntialiasedLineEnable: false.into(),
            ForcedSampleCount: 0,
            ConservativeRaster: D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
        },
        ..Default::default()
    };

    let pipeline_state = device.CreateGraphicsPipelineState(&pso_desc);
    let _ = ManuallyDrop::into_inner(pso_desc.pRootSignature);
    let pipeline_state: ID3D12PipelineState = pipeline_state?;
    pipeline_state.SetName(w!("flashhook Pipeline State"))?;

    Ok(pipeline_state)
}
