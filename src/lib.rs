//! OpenCL execution-environment management: device discovery, context and
//! command-queue lifecycle, lazy compilation of registered kernel source,
//! named kernel handles and host<->device buffer transfer.
//!
//! ```no_run
//! use oclenv::{ComputeEnv, Kernel, CL_MEM_READ_WRITE};
//!
//! static SOURCE: &str = "__kernel void scale(__global uchar *buf) {}";
//!
//! # fn main() -> Result<(), oclenv::OclError> {
//! let env = ComputeEnv::new();
//! env.register_source(SOURCE)?;
//! env.init(None)?;
//!
//! let mut kernel = Kernel::new();
//! env.create_kernel(&mut kernel, "scale")?;
//!
//! let buf = env.create_buffer(4096, CL_MEM_READ_WRITE, None)?;
//! env.write_buffer(&buf, &[0u8; 4096])?;
//!
//! env.release_kernel(&mut kernel);
//! env.uninit();
//! # Ok(())
//! # }
//! ```
//!
//! Kernel *execution* (enqueueing launches, event dependency graphs) is
//! out of scope; callers drive launches themselves through the raw
//! handles a [`Kernel`] exposes.

mod buffer;
mod device;
mod env;
mod error;
mod kernel;
mod options;

pub use buffer::{
    DeviceBuffer, CL_MEM_ALLOC_HOST_PTR, CL_MEM_READ_ONLY, CL_MEM_READ_WRITE,
    CL_MEM_USE_HOST_PTR, CL_MEM_WRITE_ONLY, MAX_PLANES,
};
pub use device::{enumerate_devices, DeviceInfo, DeviceKind, DeviceList, PlatformInfo};
pub use env::{ComputeEnv, ExternalEnv};
pub use error::{errstr, OclError};
pub use kernel::{Kernel, MAX_KERNEL_NAME_LEN};
pub use options::EnvOptions;
