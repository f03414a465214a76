//! GPU host-buffer transfer primitives: staged copy vs pinned zero-copy.
//!
//! Two data-movement strategies exposed as independently benchmarkable
//! operations. Staged copy moves a host buffer into device memory with an
//! explicit synchronous copy per iteration; zero-copy page-locks host
//! memory and maps it into the device address space, so device-side reads
//! see host writes without a host-to-device copy step.
//!
//! Allocation or mapping failure is fatal to the calling measurement run:
//! it signals resource exhaustion, not a transient condition.

use std::ffi::c_void;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cudarc::driver::CudaContext;
use cudarc::driver::sys;
use log::error;

#[derive(Debug)]
pub enum GpuError {
    Context(String),
    Alloc(String),
    Map(String),
    Copy(String),
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::Context(m) => write!(f, "cuda context: {m}"),
            GpuError::Alloc(m) => write!(f, "allocation failed: {m}"),
            GpuError::Map(m) => write!(f, "device mapping failed: {m}"),
            GpuError::Copy(m) => write!(f, "copy failed: {m}"),
        }
    }
}

impl std::error::Error for GpuError {}

fn check(rc: sys::cudaError_enum, what: &str) -> Result<(), String> {
    if rc == sys::cudaError_enum::CUDA_SUCCESS {
        Ok(())
    } else {
        Err(format!("{what}: {rc:?}"))
    }
}

/// Latency report for one measurement run.
pub struct TransferReport {
    pub bytes: usize,
    pub iterations: u32,
    pub avg_latency: Duration,
}

/// Device buffer owned through the raw driver API. Freed by the thread
/// that allocated it.
struct DeviceBuffer {
    _ctx: Arc<CudaContext>,
    ptr: sys::CUdeviceptr,
    bytes: usize,
}

impl DeviceBuffer {
    fn new(ctx: &Arc<CudaContext>, bytes: usize) -> Result<Self, GpuError> {
        let mut ptr: sys::CUdeviceptr = 0;
        let rc = unsafe { sys::cuMemAlloc_v2(&mut ptr, bytes) };
        check(rc, "cuMemAlloc").map_err(GpuError::Alloc)?;
        Ok(Self {
            _ctx: Arc::clone(ctx),
            ptr,
            bytes,
        })
    }

    fn copy_from_host(&mut self, src: &[f32]) -> Result<(), GpuError> {
        assert!(std::mem::size_of_val(src) <= self.bytes);
        let rc = unsafe {
            sys::cuMemcpyHtoD_v2(
                self.ptr,
                src.as_ptr() as *const c_void,
                std::mem::size_of_val(src),
            )
        };
        check(rc, "cuMemcpyHtoD").map_err(GpuError::Copy)
    }

    fn copy_from_device(&mut self, src: sys::CUdeviceptr, bytes: usize) -> Result<(), GpuError> {
        assert!(bytes <= self.bytes);
        let rc = unsafe { sys::cuMemcpyDtoD_v2(self.ptr, src, bytes) };
        check(rc, "cuMemcpyDtoD").map_err(GpuError::Copy)
    }

    fn read_back(&self, elems: usize) -> Result<Vec<f32>, GpuError> {
        let mut out = vec![0f32; elems];
        let rc = unsafe {
            sys::cuMemcpyDtoH_v2(
                out.as_mut_ptr() as *mut c_void,
                self.ptr,
                elems * std::mem::size_of::<f32>(),
            )
        };
        check(rc, "cuMemcpyDtoH").map_err(GpuError::Copy)?;
        Ok(out)
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        let rc = unsafe { sys::cuMemFree_v2(self.ptr) };
        if rc != sys::cudaError_enum::CUDA_SUCCESS {
            error!("gpu: cuMemFree failed: {rc:?}");
        }
    }
}

/// Page-locked host memory mapped into the device address space. Host
/// writes become visible to device reads through [`PinnedRegion::
/// device_ptr`] with no explicit copy.
pub struct PinnedRegion {
    _ctx: Arc<CudaContext>,
    host_ptr: *mut f32,
    device_ptr: sys::CUdeviceptr,
    len: usize,
}

impl PinnedRegion {
    pub fn new(ctx: &Arc<CudaContext>, elems: usize) -> Result<Self, GpuError> {
        let bytes = elems * std::mem::size_of::<f32>();
        let mut host_ptr: *mut c_void = std::ptr::null_mut();
        let rc =
            unsafe { sys::cuMemHostAlloc(&mut host_ptr, bytes, sys::CU_MEMHOSTALLOC_DEVICEMAP) };
        check(rc, "cuMemHostAlloc").map_err(GpuError::Alloc)?;

        let mut device_ptr: sys::CUdeviceptr = 0;
        let rc = unsafe { sys::cuMemHostGetDevicePointer_v2(&mut device_ptr, host_ptr, 0) };
        if let Err(m) = check(rc, "cuMemHostGetDevicePointer") {
            unsafe {
                sys::cuMemFreeHost(host_ptr);
            }
            return Err(GpuError::Map(m));
        }

        Ok(Self {
            _ctx: Arc::clone(ctx),
            host_ptr: host_ptr as *mut f32,
            device_ptr,
            len: elems,
        })
    }

    pub fn host_slice(&self) -> &[f32] {
        unsafe { std::slice::from_raw_parts(self.host_ptr, self.len) }
    }

    pub fn host_slice_mut(&mut self) -> &mut [f32] {
        unsafe { std::slice::from_raw_parts_mut(self.host_ptr, self.len) }
    }

    pub fn device_ptr(&self) -> sys::CUdeviceptr {
        self.device_ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for PinnedRegion {
    fn drop(&mut self) {
        let rc = unsafe { sys::cuMemFreeHost(self.host_ptr as *mut c_void) };
        if rc != sys::cudaError_enum::CUDA_SUCCESS {
            error!("gpu: cuMemFreeHost failed: {rc:?}");
        }
    }
}

fn elems_for(size_bytes: usize) -> Result<usize, GpuError> {
    let elems = size_bytes / std::mem::size_of::<f32>();
    if elems == 0 {
        return Err(GpuError::Alloc(format!("size {size_bytes} too small")));
    }
    Ok(elems)
}

fn synchronize() -> Result<(), GpuError> {
    let rc = unsafe { sys::cuCtxSynchronize() };
    check(rc, "cuCtxSynchronize").map_err(GpuError::Copy)
}

/// Staged copy: host buffer → device buffer, one synchronous copy per
/// iteration into a device allocation made once up front.
pub fn measure_staged_copy(size_bytes: usize, iterations: u32) -> Result<TransferReport, GpuError> {
    let elems = elems_for(size_bytes)?;
    let ctx = CudaContext::new(0).map_err(|e| GpuError::Context(e.to_string()))?;

    let host: Vec<f32> = (0..elems).map(|i| i as f32).collect();
    let mut device = DeviceBuffer::new(&ctx, elems * std::mem::size_of::<f32>())?;

    let start = Instant::now();
    for _ in 0..iterations {
        device.copy_from_host(&host)?;
        synchronize()?;
    }
    let total = start.elapsed();

    Ok(TransferReport {
        bytes: elems * std::mem::size_of::<f32>(),
        iterations,
        avg_latency: total / iterations.max(1),
    })
}

/// Pinned zero-copy: host writes land in page-locked mapped memory; each
/// iteration reads the mapped region from the device side (device-to-device
/// copy out of the mapped pointer) with no host-to-device copy step.
pub fn measure_zero_copy(size_bytes: usize, iterations: u32) -> Result<TransferReport, GpuError> {
    let elems = elems_for(size_bytes)?;
    let ctx = CudaContext::new(0).map_err(|e| GpuError::Context(e.to_string()))?;

    let mut region = PinnedRegion::new(&ctx, elems)?;
    for (i, v) in region.host_slice_mut().iter_mut().enumerate() {
        *v = i as f32;
    }
    let mut device = DeviceBuffer::new(&ctx, elems * std::mem::size_of::<f32>())?;

    let start = Instant::now();
    for _ in 0..iterations {
        device.copy_from_device(region.device_ptr(), elems * std::mem::size_of::<f32>())?;
        synchronize()?;
    }
    let total = start.elapsed();

    Ok(TransferReport {
        bytes: elems * std::mem::size_of::<f32>(),
        iterations,
        avg_latency: total / iterations.max(1),
    })
}
