//! Error types shared by the overlay.
//!
//! [`FrameError`] covers the per-frame bookkeeping (upload arena, descriptor
//! slots) and is recoverable: the frame that hits it drops the offending work
//! and rendering continues. [`SetupError`] covers everything that can go
//! wrong while discovering the swapchain, creating device objects or
//! installing the detours; those are fatal and end up at the injection entry
//! point.
use thiserror::Error;

#[cfg(windows)]
use crate::mh::MhStatus;

/// Result of the setup paths.
pub type Result<T, E = SetupError> = std::result::Result<T, E>;

/// Failures of the per-frame bookkeeping types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The upload arena cannot fit the requested allocation.
    #[error("upload arena exhausted: {requested} bytes at offset {offset} exceed {capacity}")]
    ArenaExhausted {
        /// Aligned offset the allocation would have started at.
        offset: usize,
        /// Requested size in bytes.
        requested: usize,
        /// Total arena size in bytes.
        capacity: usize,
    },
    /// The arena was written to while its frame is still in flight.
    #[error("upload arena written while its frame is in flight")]
    ArenaInFlight,
    /// Every descriptor slot is in use.
    #[error("descriptor heap exhausted ({capacity} slots)")]
    HeapExhausted {
        /// Number of slots in the heap.
        capacity: u32,
    },
    /// A frame index outside of the ring was supplied.
    #[error("frame index {index} out of range for {count} frames")]
    InvalidFrameIndex {
        /// Offending index.
        index: u32,
        /// Number of frames in the ring.
        count: u32,
    },
    /// A descriptor index outside of the heap was supplied.
    #[error("descriptor index {index} out of range for {capacity} slots")]
    InvalidSlot {
        /// Offending index.
        index: u32,
        /// Number of slots in the heap.
        capacity: u32,
    },
    /// A transient descriptor was freed by hand instead of waiting for its
    /// frame to come around.
    #[error("descriptor {index} is transient and is released by its frame")]
    TransientSlot { index: u32 },
    /// Waiting on a frame fence did not end with the fence signaled.
    #[error("fence wait for value {value} ended with status {status:#x}")]
    FenceWait {
        /// Fence value waited for.
        value: u64,
        /// Raw return of the wait call.
        status: u32,
    },
}

/// Unrecoverable failures while bringing the overlay up.
#[derive(Debug, Error)]
pub enum SetupError {
    /// A graphics or windowing API call failed.
    #[cfg(windows)]
    #[error("{context}: {source}")]
    Graphics {
        /// The call that failed.
        context: &'static str,
        /// The underlying error.
        #[source]
        source: windows::core::Error,
    },
    /// No adapter accepted any of the requested feature levels.
    #[error("no supported Direct3D 12 feature level")]
    NoFeatureLevel,
    /// The command queue pointer was not found inside the swapchain object.
    #[error("command queue not found within {bound:#x} bytes of the swapchain")]
    OffsetNotFound {
        /// Number of bytes scanned.
        bound: usize,
    },
    /// The live swapchain holds no command queue at the discovered offset.
    #[error("no command queue at swapchain offset {offset:#x}")]
    CommandQueueMissing { offset: usize },
    /// The hooks were not installed before the first intercepted call.
    #[error("hooks not installed")]
    NotInstalled,
    /// A vtable slot does not point into a loaded module.
    #[error("vtable slot {slot} does not resolve into a loaded module")]
    VtableMismatch {
        /// Offending slot.
        slot: usize,
    },
    /// MinHook refused to create or enable a detour.
    #[cfg(windows)]
    #[error("minhook: {0:?}")]
    Hook(MhStatus),
    /// The target or overlay window could not be found or created.
    #[error("window: {0}")]
    Window(String),
    /// Frame bookkeeping failed during setup.
    #[error(transparent)]
    Frame(#[from] FrameError),
}

impl SetupError {
    /// Returns the raw `HRESULT` for graphics failures, if any.
    pub fn hresult(&self) -> Option<i32> {
        match self {
            #[cfg(windows)]
            SetupError::Graphics { source, .. } => Some(source.code().0),
            _ => None,
        }
    }
}

#[cfg(windows)]
impl From<MhStatus> for SetupError {
    fn from(status: MhStatus) -> Self {
        SetupError::Hook(status)
    }
}

#[cfg(windows)]
impl From<FrameError> for windows::core::Error {
    fn from(e: FrameError) -> Self {
        use windows::Win32::Foundation::{E_FAIL, E_INVALIDARG, E_OUTOFMEMORY};

        let code = match e {
            FrameError::ArenaExhausted { .. } | FrameError::HeapExhausted { .. } => E_OUTOFMEMORY,
            FrameError::FenceWait { .. } => E_FAIL,
            _ => E_INVALIDARG,
        };
        windows::core::Error::new(code, e.to_string().into())
    }
}

/// Attaches the name of the failing call to a `windows` error.
#[cfg(windows)]
pub(crate) trait SetupContext<T> {
    fn context(self, context: &'static str) -> Result<T, SetupError>;
}

#[cfg(windows)]
impl<T> SetupContext<T> for windows::core::Result<T> {
    fn context(self, context: &'static str) -> Result<T, SetupError> {
        self.map_err(|source| {
            tracing::error!("{context}: {source:?}");
            SetupError::Graphics { context, source }
        })
    }
}
