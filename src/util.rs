//! COM out-param helpers, resource barriers and DXGI debug plumbing.
use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{ptr, slice};

use tracing::{error, info};
use windows::core::{Error, Result, PCSTR};
use windows::Win32::Foundation::{E_POINTER, HMODULE};
use windows::Win32::Graphics::Direct3D::ID3DBlob;
use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::{
    DXGIGetDebugInterface1, IDXGIInfoQueue, DXGI_DEBUG_ALL, DXGI_INFO_QUEUE_MESSAGE,
};
use windows::Win32::System::LibraryLoader::{
    GetModuleFileNameA, GetModuleHandleExA, GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS,
    GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
};

static DXGI_DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Helper for fallible [`windows`] APIs that have an optional pointer
/// out-param. A call that succeeds but leaves the pointer empty is reported
/// as `E_POINTER`.
///
/// # Example
///
/// ```ignore
/// let dev: ID3D12Device =
///     try_out_ptr(|v| unsafe { D3D12CreateDevice(&adapter, D3D_FEATURE_LEVEL_11_0, v) })?;
/// ```
pub fn try_out_ptr<T, F, O>(mut f: F) -> Result<T>
where
    F: FnMut(&mut Option<T>) -> Result<O>,
{
    let mut t: Option<T> = None;
    f(&mut t)?;
    t.ok_or_else(|| Error::from(E_POINTER))
}

/// Helper for fallible [`windows`] APIs that have an optional pointer
/// out-param and an optional pointer err-param.
///
/// On failure the error blob, if any was produced, is handed back with the
/// error.
pub fn try_out_err_blob<T1, T2, F, O>(mut f: F) -> std::result::Result<T1, (Error, Option<T2>)>
where
    F: FnMut(&mut Option<T1>, &mut Option<T2>) -> Result<O>,
{
    let mut t1: Option<T1> = None;
    let mut t2: Option<T2> = None;
    match f(&mut t1, &mut t2) {
        Ok(_) => t1.ok_or_else(|| (Error::from(E_POINTER), t2)),
        Err(e) => Err((e, t2)),
    }
}

/// Logs the contents of an error blob and returns the error alone.
pub fn print_error_blob(msg: &'static str) -> impl Fn((Error, Option<ID3DBlob>)) -> Error {
    move |(e, blob)| {
        match blob.as_ref().map(blob_to_string) {
            Some(text) => error!("{msg}: {e:?} {text}"),
            None => error!("{msg}: {e:?}"),
        }
        e
    }
}

/// Interprets the contents of a blob as text.
pub fn blob_to_string(blob: &ID3DBlob) -> String {
    unsafe {
        let data =
            slice::from_raw_parts(blob.GetBufferPointer() as *const u8, blob.GetBufferSize());
        String::from_utf8_lossy(data).trim_end_matches('\0').to_string()
    }
}

/// Creates a transition barrier for every subresource of `resource`.
///
/// The barrier holds a reference to the resource; release it with
/// [`drop_barrier`] once the command list has recorded it.
pub fn create_barrier(
    resource: &ID3D12Resource,
    before: D3D12_RESOURCE_STATES,
    after: D3D12_RESOURCE_STATES,
) -> D3D12_RESOURCE_BARRIER {
    D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: D3D12_RESOURCE_BARRIER_FLAG_NONE,
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: ManuallyDrop::new(Some(resource.clone())),
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            }),
        },
    }
}

/// Releases the resource reference held by a barrier from
/// [`create_barrier`].
pub fn drop_barrier(barrier: D3D12_RESOURCE_BARRIER) {
    let transition = ManuallyDrop::into_inner(unsafe { barrier.Anonymous.Transition });
    let _ = ManuallyDrop::into_inner(transition.pResource);
}

/// Enables the D3D12 debug layer and the DXGI info queue dump.
///
/// Must run before any device is created to have an effect on it.
pub fn enable_dxgi_debug() {
    match try_out_ptr(|v| unsafe { D3D12GetDebugInterface::<ID3D12Debug>(v) }) {
        Ok(debug) => unsafe { debug.EnableDebugLayer() },
        Err(e) => error!("D3D12GetDebugInterface: {e:?}"),
    }
    info!("DXGI debugging enabled");
    DXGI_DEBUG_ENABLED.store(true, Ordering::SeqCst);
}

/// Disables the DXGI info queue dump.
pub fn disable_dxgi_debug() {
    info!("DXGI debugging disabled");
    DXGI_DEBUG_ENABLED.store(false, Ordering::SeqCst);
}

pub fn dxgi_debug_enabled() -> bool {
    DXGI_DEBUG_ENABLED.load(Ordering::SeqCst)
}

/// Logs and clears the messages stored in the DXGI info queue.
///
/// Does nothing unless [`enable_dxgi_debug`] was called.
pub fn print_dxgi_debug_messages() {
    if !dxgi_debug_enabled() {
        return;
    }

    let diq: IDXGIInfoQueue = match unsafe { DXGIGetDebugInterface1(0) } {
        Ok(diq) => diq,
        Err(e) => {
            error!("DXGIGetDebugInterface1: {e:?}");
            return;
        },
    };

    unsafe {
        for i in 0..diq.GetNumStoredMessages(DXGI_DEBUG_ALL) {
            let mut msg_len: usize = 0;
            if diq.GetMessage(DXGI_DEBUG_ALL, i, None, &mut msg_len).is_err() || msg_len == 0 {
                continue;
            }

            // u64 backing keeps the message header aligned.
            let mut buf = vec![0u64; (msg_len + 7) / 8];
            let msg = buf.as_mut_ptr() as *mut DXGI_INFO_QUEUE_MESSAGE;
            if diq.GetMessage(DXGI_DEBUG_ALL, i, Some(msg), &mut msg_len).is_err() {
                continue;
            }

            let msg = &*msg;
            if msg.pDescription.is_null() || msg.DescriptionByteLength == 0 {
                continue;
            }
            let text = slice::from_raw_parts(msg.pDescription, msg.DescriptionByteLength - 1);
            error!("[DIQ] {}", String::from_utf8_lossy(text));
        }
        diq.ClearStoredMessages(DXGI_DEBUG_ALL);
    }
}

/// Returns the path of the module containing `address`.
pub(crate) fn module_path(address: usize) -> Option<PathBuf> {
    let mut module = HMODULE::default();
    unsafe {
        GetModuleHandleExA(
            GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS | GET_MODULE_HANDLE_EX_FLAG_UNCHANGED_REFCOUNT,
            PCSTR(address as *const u8),
            &mut module,
        )
    }
    .ok()?;

    let mut buf = [0u8; 260];
    let len = unsafe { GetModuleFileNameA(module, &mut buf) } as usize;
    if len == 0 {
        return None;
    }
    Some(PathBuf::from(String::from_utf8_lossy(&buf[..len]).into_owned()))
}

/// Returns the path of the implementor's DLL.
pub fn get_dll_path() -> Option<PathBuf> {
    module_path(get_dll_path as usize)
}

/// Copies `data` into mapped memory at `dst`.
///
/// # Safety
///
/// `dst` must be valid for `data.len()` bytes of writes.
pub(crate) unsafe fn write_mapped(dst: *mut c_void, data: &[u8]) {
    ptr::copy_nonoverlapping(data.as_ptr(), dst as *mut u8, data.len());
}
