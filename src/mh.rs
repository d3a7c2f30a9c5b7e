//! Thin wrapper around [`minhook`](https://github.com/TsudaKageyu/minhook).
use std::ffi::c_void;
use std::ptr::null_mut;

use minhook_sys::{
    MH_ApplyQueued, MH_CreateHook, MH_Initialize, MH_QueueDisableHook, MH_QueueEnableHook,
    MH_RemoveHook, MH_Uninitialize,
};
use tracing::{debug, error};

use crate::hooks::Interceptor;

/// MinHook status codes.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MhStatus {
    /// Unknown error. Should not be returned.
    Unknown,
    /// Successful.
    Ok,
    /// MinHook is already initialized.
    AlreadyInitialized,
    /// MinHook is not initialized yet, or already uninitialized.
    NotInitialized,
    /// The hook for the specified target function is already created.
    AlreadyCreated,
    /// The hook for the specified target function is not created yet.
    NotCreated,
    /// The hook for the specified target function is already enabled.
    Enabled,
    /// The hook for the specified target function is not enabled yet, or
    /// already disabled.
    Disabled,
    /// The specified pointer is invalid. It points the address of non-allocated
    /// and/or non-executable region.
    NotExecutable,
    /// The specified target function cannot be hooked.
    UnsupportedFunction,
    /// Failed to allocate memory.
    MemoryAlloc,
    /// Failed to change the memory protection.
    MemoryProtect,
    /// The specified module is not loaded.
    ModuleNotFound,
    /// The specified function is not found.
    FunctionNotFound,
}

impl MhStatus {
    /// Maps a raw `MH_STATUS` value.
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => MhStatus::Ok,
            1 => MhStatus::AlreadyInitialized,
            2 => MhStatus::NotInitialized,
            3 => MhStatus::AlreadyCreated,
            4 => MhStatus::NotCreated,
            5 => MhStatus::Enabled,
            6 => MhStatus::Disabled,
            7 => MhStatus::NotExecutable,
            8 => MhStatus::UnsupportedFunction,
            9 => MhStatus::MemoryAlloc,
            10 => MhStatus::MemoryProtect,
            11 => MhStatus::ModuleNotFound,
            12 => MhStatus::FunctionNotFound,
            _ => MhStatus::Unknown,
        }
    }

    pub fn ok_context(self, context: &str) -> Result<(), MhStatus> {
        if self == MhStatus::Ok {
            Ok(())
        } else {
            error!("{context}: {self:?}");
            Err(self)
        }
    }

    pub fn ok(self) -> Result<(), MhStatus> {
        if self == MhStatus::Ok {
            Ok(())
        } else {
            Err(self)
        }
    }
}

/// Initializes MinHook. Initializing twice is not an error.
pub fn initialize() -> Result<(), MhStatus> {
    match MhStatus::from_raw(unsafe { MH_Initialize() } as i32) {
        MhStatus::Ok | MhStatus::AlreadyInitialized => Ok(()),
        status => status.ok_context("MH_Initialize"),
    }
}

/// Uninitializes MinHook, removing every hook it still knows about.
pub fn uninitialize() -> Result<(), MhStatus> {
    MhStatus::from_raw(unsafe { MH_Uninitialize() } as i32).ok_context("MH_Uninitialize")
}

/// Applies every queued enable and disable.
pub fn apply_queued() -> Result<(), MhStatus> {
    MhStatus::from_raw(unsafe { MH_ApplyQueued() } as i32).ok_context("MH_ApplyQueued")
}

/// Structure that holds original address, hook function address, and trampoline
/// address for a given hook.
pub struct MhHook {
    addr: *mut c_void,
    hook_impl: *mut c_void,
    trampoline: *mut c_void,
}

impl MhHook {
    /// # Safety
    ///
    /// `addr` must be the entry point of a function with the same signature
    /// as `hook_impl`.
    pub unsafe fn new(addr: *mut c_void, hook_impl: *mut c_void) -> Result<Self, MhStatus> {
        let mut trampoline: *mut c_void = null_mut();
        let status =
            MH_CreateHook(addr as _, hook_impl as _, &mut trampoline as *mut *mut c_void as *mut _);
        MhStatus::from_raw(status as i32).ok_context("MH_CreateHook")?;

        debug!("Created hook {addr:p} -> {hook_impl:p}, trampoline {trampoline:p}");
        Ok(Self { addr, hook_impl, trampoline })
    }

    pub fn addr(&self) -> *mut c_void {
        self.addr
    }

    pub fn hook_impl(&self) -> *mut c_void {
        self.hook_impl
    }

    pub fn trampoline(&self) -> *mut c_void {
        self.trampoline
    }

    /// # Safety
    ///
    /// The hook goes live on the next [`apply_queued`].
    pub unsafe fn queue_enable(&self) -> Result<(), MhStatus> {
        MhStatus::from_raw(MH_QueueEnableHook(self.addr as _) as i32)
            .ok_context("MH_QueueEnableHook")
    }

    /// # Safety
    ///
    /// The hook is removed on the next [`apply_queued`].
    pub unsafe fn queue_disable(&self) -> Result<(), MhStatus> {
        MhStatus::from_raw(MH_QueueDisableHook(self.addr as _) as i32)
            .ok_context("MH_QueueDisableHook")
    }

    /// # Safety
    ///
    /// The hook must be disabled.
    pub unsafe fn remove(&self) -> Result<(), MhStatus> {
        MhStatus::from_raw(MH_RemoveHook(self.addr as _) as i32).ok_context("MH_RemoveHook")
    }
}

/// [`Interceptor`] backed by MinHook. Enables and disables its hooks as one
/// queued batch.
#[derive(Default)]
pub struct MinHook {
    hooks: Vec<MhHook>,
}

unsafe impl Send for MinHook {}
unsafe impl Sync for MinHook {}

impl MinHook {
    pub fn new() -> Result<Self, MhStatus> {
        initialize()?;
        Ok(Self { hooks: Vec::new() })
    }

    pub fn hooks(&self) -> &[MhHook] {
        &self.hooks
    }
}

impl Interceptor for MinHook {
    type Error = MhStatus;

    unsafe fn create(
        &mut self,
        target: *mut c_void,
        detour: *mut c_void,
    ) -> Result<*mut c_void, MhStatus> {
        let hook = MhHook::new(target, detour)?;
        let trampoline = hook.trampoline();
        self.hooks.push(hook);
        Ok(trampoline)
    }

    unsafe fn enable_all(&mut self) -> Result<(), MhStatus> {
        for hook in &self.hooks {
            hook.queue_enable()?;
        }
        apply_queued()
    }

    unsafe fn disable_all(&mut self) -> Result<(), MhStatus> {
        for hook in &self.hooks {
            hook.queue_disable()?;
        }
        apply_queued()
    }
}
