use core::ffi::c_void;
use core::ptr;
use std::ffi::CString;

use cl3::error_codes::ClError;

use crate::env::ComputeEnv;
use crate::error::{errstr, OclError};

/// Maximum kernel name length in bytes, terminator included.
pub const MAX_KERNEL_NAME_LEN: usize = 150;

/// A named kernel bound to the environment's shared command queue.
///
/// The caller owns this struct; the environment owns the underlying
/// OpenCL object until [`ComputeEnv::release_kernel`] is called.
#[derive(Debug)]
pub struct Kernel {
    pub(crate) kernel: *mut c_void,
    pub(crate) queue: *mut c_void,
    name: String,
}

unsafe impl Send for Kernel {}

impl Kernel {
    pub fn new() -> Self {
        Self {
            kernel: ptr::null_mut(),
            queue: ptr::null_mut(),
            name: String::new(),
        }
    }

    pub fn is_live(&self) -> bool {
        !self.kernel.is_null()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw (kernel, queue) handles for callers that enqueue launches
    /// themselves; launch scheduling is outside this crate's scope.
    pub fn raw(&self) -> (*mut c_void, *mut c_void) {
        (self.kernel, self.queue)
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeEnv {
    /// Resolves `name` against the compiled programs and binds the handle.
    ///
    /// Programs are searched in registration order and the first one
    /// exposing the name wins. A handle that is already live is left
    /// untouched and the call succeeds.
    pub fn create_kernel(&self, handle: &mut Kernel, name: &str) -> Result<(), OclError> {
        if name.len() + 1 > MAX_KERNEL_NAME_LEN {
            return Err(OclError::Validation(format!(
                "kernel name '{name}' is too long"
            )));
        }
        if handle.is_live() {
            return Ok(());
        }
        let cname = CString::new(name).map_err(|_| {
            OclError::Validation(format!("kernel name '{name}' contains a nul byte"))
        })?;
        let mut st = self.lock();
        if st.kernel_count >= st.options.max_kernels {
            return Err(OclError::ResourceExhausted("live kernel limit reached"));
        }
        if st.programs.is_empty() {
            return Err(OclError::Validation(
                "no program has been compiled, cannot create kernel".to_string(),
            ));
        }
        let Some((_context, queue, _device)) = st.session.handles() else {
            return Err(OclError::Validation(
                "environment is not initialized".to_string(),
            ));
        };
        let mut resolved = None;
        let mut last = OclError::Api {
            op: "clCreateKernel",
            status: 0,
        };
        for &program in &st.programs {
            match cl3::kernel::create_kernel(program, &cname) {
                Ok(kernel) => {
                    resolved = Some(kernel);
                    break;
                }
                Err(e) => last = OclError::api("clCreateKernel", ClError(e)),
            }
        }
        let Some(kernel) = resolved else {
            return Err(last);
        };
        st.kernel_count += 1;
        handle.kernel = kernel;
        handle.queue = queue;
        handle.name = name.to_string();
        Ok(())
    }

    /// Releases the underlying kernel object and clears the handle.
    /// An empty handle is a no-op. Release failures are logged; the
    /// handle is cleared regardless so forward progress is preserved.
    pub fn release_kernel(&self, handle: &mut Kernel) {
        if !handle.is_live() {
            return;
        }
        let mut st = self.lock();
        if let Err(e) = unsafe { cl3::kernel::release_kernel(handle.kernel) } {
            log::error!("could not release kernel '{}': {}", handle.name, errstr(e));
        }
        handle.kernel = ptr::null_mut();
        handle.queue = ptr::null_mut();
        handle.name.clear();
        st.kernel_count -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlong_name_is_a_validation_error() {
        let env = ComputeEnv::new();
        let mut k = Kernel::new();
        let name = "k".repeat(MAX_KERNEL_NAME_LEN);
        assert!(matches!(
            env.create_kernel(&mut k, &name),
            Err(OclError::Validation(_))
        ));
        assert!(!k.is_live());
    }

    #[test]
    fn name_at_the_limit_passes_length_validation() {
        let env = ComputeEnv::new();
        let mut k = Kernel::new();
        let name = "k".repeat(MAX_KERNEL_NAME_LEN - 1);
        // Fails later, on the empty program table, not on the length.
        let err = env.create_kernel(&mut k, &name).unwrap_err();
        assert!(err.to_string().contains("no program"));
    }

    #[test]
    fn kernel_ceiling_is_enforced_before_the_search() {
        use crate::options::EnvOptions;
        let env = ComputeEnv::with_options(EnvOptions {
            max_kernels: 0,
            ..EnvOptions::default()
        });
        let mut k = Kernel::new();
        assert!(matches!(
            env.create_kernel(&mut k, "scale"),
            Err(OclError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn nothing_compiled_is_a_validation_error() {
        let env = ComputeEnv::new();
        let mut k = Kernel::new();
        assert!(matches!(
            env.create_kernel(&mut k, "scale"),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn nul_byte_in_name_is_a_validation_error() {
        let env = ComputeEnv::new();
        let mut k = Kernel::new();
        assert!(matches!(
            env.create_kernel(&mut k, "bad\0name"),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn releasing_an_empty_handle_is_a_no_op() {
        let env = ComputeEnv::new();
        let mut k = Kernel::default();
        env.release_kernel(&mut k);
        assert!(!k.is_live());
        assert_eq!(k.name(), "");
    }
}
