use core::ffi::c_void;
use core::ptr;

use cl3::command_queue::CL_BLOCKING;
use cl3::error_codes::ClError;
use cl3::memory::{CL_MAP_READ, CL_MAP_WRITE};

pub use cl3::memory::{
    CL_MEM_ALLOC_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE, CL_MEM_USE_HOST_PTR,
    CL_MEM_WRITE_ONLY,
};

use crate::env::ComputeEnv;
use crate::error::{errstr, OclError};

/// Upper bound on planes per scatter/gather transfer.
pub const MAX_PLANES: usize = 8;

/// A device memory region plus its declared byte size.
///
/// Valid only while the environment that created it stays initialized.
/// Released explicitly via [`DeviceBuffer::release`], with `Drop` as a
/// safety net.
#[derive(Debug)]
pub struct DeviceBuffer {
    mem: *mut c_void,
    size: usize,
}

unsafe impl Send for DeviceBuffer {}

impl DeviceBuffer {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_null(&self) -> bool {
        self.mem.is_null()
    }

    /// Releases the underlying memory object; an empty or already
    /// released buffer is a no-op. Release failures are logged.
    pub fn release(&mut self) {
        if self.mem.is_null() {
            return;
        }
        if let Err(e) = unsafe { cl3::memory::release_mem_object(self.mem) } {
            log::error!("could not release buffer: {}", errstr(e));
        }
        self.mem = ptr::null_mut();
        self.size = 0;
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Host<->device transfers. These calls are not serialized by the
/// environment lock; they rely on the command queue's own ordering.
/// Concurrent transfers on the same queue from multiple threads need
/// external synchronization if the underlying queue is not thread-safe.
impl ComputeEnv {
    /// Allocates a device buffer of `size` bytes against the current
    /// context, optionally backed by host memory (pair `host_ptr` with
    /// `CL_MEM_USE_HOST_PTR` in `flags`).
    pub fn create_buffer(
        &self,
        size: usize,
        flags: u64,
        host_ptr: Option<*mut c_void>,
    ) -> Result<DeviceBuffer, OclError> {
        let (context, _queue) = self.transfer_handles()?;
        let mem = unsafe {
            cl3::memory::create_buffer(context, flags, size, host_ptr.unwrap_or(ptr::null_mut()))
        }
        .map_err(|e| OclError::api("clCreateBuffer", ClError(e)))?;
        Ok(DeviceBuffer { mem, size })
    }

    /// Copies `src` into the buffer through a blocking mapped pointer.
    pub fn write_buffer(&self, buffer: &DeviceBuffer, src: &[u8]) -> Result<(), OclError> {
        let (_context, queue) = self.transfer_handles()?;
        if src.is_empty() {
            return Ok(());
        }
        let mapped = map_buffer(queue, buffer.mem, CL_MAP_WRITE, src.len())?;
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), mapped.cast::<u8>(), src.len()) };
        unmap_buffer(queue, buffer.mem, mapped)
    }

    /// Copies `dst.len()` bytes out of the buffer through a blocking
    /// mapped pointer.
    pub fn read_buffer(&self, buffer: &DeviceBuffer, dst: &mut [u8]) -> Result<(), OclError> {
        let (_context, queue) = self.transfer_handles()?;
        if dst.is_empty() {
            return Ok(());
        }
        let mapped = map_buffer(queue, buffer.mem, CL_MAP_READ, dst.len())?;
        unsafe { ptr::copy_nonoverlapping(mapped as *const u8, dst.as_mut_ptr(), dst.len()) };
        unmap_buffer(queue, buffer.mem, mapped)
    }

    /// Writes up to [`MAX_PLANES`] planes contiguously into the buffer,
    /// starting at `offset`, under a single map/unmap. The summed plane
    /// sizes plus the offset must fit the buffer's declared size.
    pub fn write_buffer_planes(
        &self,
        buffer: &DeviceBuffer,
        offset: usize,
        planes: &[&[u8]],
    ) -> Result<(), OclError> {
        let extent = plane_extent(planes.iter().map(|p| p.len()), offset, buffer.size)?;
        let (_context, queue) = self.transfer_handles()?;
        if extent == 0 {
            return Ok(());
        }
        let mapped = map_buffer(queue, buffer.mem, CL_MAP_WRITE, extent)?;
        let mut cursor = unsafe { mapped.cast::<u8>().add(offset) };
        for plane in planes {
            unsafe {
                ptr::copy_nonoverlapping(plane.as_ptr(), cursor, plane.len());
                cursor = cursor.add(plane.len());
            }
        }
        unmap_buffer(queue, buffer.mem, mapped)
    }

    /// Reads planes contiguously from the start of the buffer under a
    /// single map/unmap, filling each slice in order.
    pub fn read_buffer_planes(
        &self,
        buffer: &DeviceBuffer,
        planes: &mut [&mut [u8]],
    ) -> Result<(), OclError> {
        let extent = plane_extent(planes.iter().map(|p| p.len()), 0, buffer.size)?;
        let (_context, queue) = self.transfer_handles()?;
        if extent == 0 {
            return Ok(());
        }
        let mapped = map_buffer(queue, buffer.mem, CL_MAP_READ, extent)?;
        let mut cursor = mapped as *const u8;
        for plane in planes.iter_mut() {
            unsafe {
                ptr::copy_nonoverlapping(cursor, plane.as_mut_ptr(), plane.len());
                cursor = cursor.add(plane.len());
            }
        }
        unmap_buffer(queue, buffer.mem, mapped)
    }
}

/// Validates a scatter/gather layout against a buffer's declared size and
/// returns the number of bytes to map.
fn plane_extent<I>(plane_sizes: I, offset: usize, capacity: usize) -> Result<usize, OclError>
where
    I: ExactSizeIterator<Item = usize>,
{
    if plane_sizes.len() > MAX_PLANES {
        return Err(OclError::Validation(format!(
            "plane count {} exceeds the maximum of {MAX_PLANES}",
            plane_sizes.len()
        )));
    }
    let mut total = offset;
    for size in plane_sizes {
        total = total
            .checked_add(size)
            .ok_or_else(|| OclError::Validation("plane sizes overflow".to_string()))?;
    }
    if total > capacity {
        return Err(OclError::Validation(format!(
            "planes need {total} bytes but the buffer holds {capacity}"
        )));
    }
    Ok(total)
}

fn map_buffer(
    queue: *mut c_void,
    mem: *mut c_void,
    flags: u64,
    size: usize,
) -> Result<*mut c_void, OclError> {
    let mut mapped: *mut c_void = ptr::null_mut();
    let event = unsafe {
        cl3::command_queue::enqueue_map_buffer(
            queue,
            mem,
            CL_BLOCKING,
            flags,
            0,
            size,
            &mut mapped,
            0,
            ptr::null(),
        )
    }
    .map_err(|e| OclError::api("clEnqueueMapBuffer", ClError(e)))?;
    release_event(event);
    Ok(mapped)
}

fn unmap_buffer(queue: *mut c_void, mem: *mut c_void, mapped: *mut c_void) -> Result<(), OclError> {
    let event = unsafe { cl3::command_queue::enqueue_unmap_mem_object(queue, mem, mapped, 0, ptr::null()) }
        .map_err(|e| OclError::api("clEnqueueUnmapMemObject", ClError(e)))?;
    if let Err(e) = cl3::event::wait_for_events(&[event]) {
        log::error!("could not wait for unmap completion: {}", errstr(e));
    }
    release_event(event);
    Ok(())
}

fn release_event(event: *mut c_void) {
    if let Err(e) = unsafe { cl3::event::release_event(event) } {
        log::error!("could not release event: {}", errstr(e));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_extent_accepts_a_fitting_layout() {
        let sizes = [16usize, 16, 32];
        assert_eq!(plane_extent(sizes.iter().copied(), 0, 64).unwrap(), 64);
        assert_eq!(plane_extent(sizes.iter().copied(), 8, 128).unwrap(), 72);
    }

    #[test]
    fn plane_extent_rejects_too_many_planes() {
        let sizes = [1usize; MAX_PLANES + 1];
        assert!(matches!(
            plane_extent(sizes.iter().copied(), 0, 1024),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn plane_extent_accounts_for_the_write_offset() {
        let sizes = [32usize, 32];
        // Fits without the offset, does not fit with it.
        assert!(plane_extent(sizes.iter().copied(), 0, 64).is_ok());
        assert!(matches!(
            plane_extent(sizes.iter().copied(), 1, 64),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn plane_extent_rejects_overflowing_sizes() {
        let sizes = [usize::MAX, 2];
        assert!(matches!(
            plane_extent(sizes.iter().copied(), 1, 64),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn empty_plane_set_is_valid() {
        assert_eq!(plane_extent(core::iter::empty(), 0, 64).unwrap(), 0);
    }

    #[test]
    fn transfers_require_an_initialized_environment() {
        let env = ComputeEnv::new();
        assert!(matches!(
            env.create_buffer(64, CL_MEM_READ_WRITE, None),
            Err(OclError::Validation(_))
        ));
        let buf = DeviceBuffer {
            mem: ptr::null_mut(),
            size: 64,
        };
        assert!(matches!(
            env.write_buffer(&buf, &[0u8; 16]),
            Err(OclError::Validation(_))
        ));
        let mut out = [0u8; 16];
        assert!(matches!(
            env.read_buffer(&buf, &mut out),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn releasing_an_empty_buffer_is_a_no_op() {
        let mut buf = DeviceBuffer {
            mem: ptr::null_mut(),
            size: 0,
        };
        buf.release();
        assert!(buf.is_null());
    }
}
