use core::ffi::c_void;
use core::ptr;
use std::ffi::CString;
use std::sync::{Mutex, MutexGuard, PoisonError};

use cl3::error_codes::ClError;
use cl3::ext::CL_PROGRAM_BUILD_LOG;

use crate::device::{enumerate_devices, DeviceList};
use crate::error::{errstr, OclError};
use crate::options::EnvOptions;

/// Descriptor for adopting a platform/context/queue created by the caller.
///
/// Pass to [`ComputeEnv::init`] to wrap a pre-existing OpenCL environment.
/// The caller retains ownership of every handle; the environment will
/// never release them.
#[derive(Clone, Copy, Debug)]
pub struct ExternalEnv {
    pub platform_id: *mut c_void,
    pub device_id: *mut c_void,
    pub device_type: u64,
    pub context: *mut c_void,
    pub command_queue: *mut c_void,
}

impl Default for ExternalEnv {
    fn default() -> Self {
        Self {
            platform_id: ptr::null_mut(),
            device_id: ptr::null_mut(),
            device_type: 0,
            context: ptr::null_mut(),
            command_queue: ptr::null_mut(),
        }
    }
}

unsafe impl Send for ExternalEnv {}

/// Provenance of the live context/queue. Teardown is a single match:
/// `Owned` handles are released by the environment, `Adopted` handles
/// belong to the caller and are never touched.
pub(crate) enum Session {
    Idle,
    Owned {
        context: *mut c_void,
        queue: *mut c_void,
        device: *mut c_void,
    },
    Adopted {
        context: *mut c_void,
        queue: *mut c_void,
        device: *mut c_void,
    },
}

impl Session {
    pub(crate) fn handles(&self) -> Option<(*mut c_void, *mut c_void, *mut c_void)> {
        match self {
            Session::Idle => None,
            Session::Owned {
                context,
                queue,
                device,
            }
            | Session::Adopted {
                context,
                queue,
                device,
            } => Some((*context, *queue, *device)),
        }
    }
}

/// A registered kernel source fragment. Identity is the pointer identity
/// of the `&'static str`; a fragment compiles at most once.
struct KernelSource {
    text: &'static str,
    compiled: bool,
}

pub(crate) struct EnvState {
    pub(crate) options: EnvOptions,
    init_count: u32,
    platform_idx: i32,
    device_idx: i32,
    platform_id: *mut c_void,
    device_type: u64,
    pub(crate) session: Session,
    sources: Vec<KernelSource>,
    pub(crate) programs: Vec<*mut c_void>,
    pub(crate) kernel_count: usize,
    device_list: Option<DeviceList>,
}

/// An OpenCL execution environment: selected platform/device, context,
/// command queue, registered kernel sources and compiled programs.
///
/// Initialization is reference counted: every successful [`init`] must be
/// paired with one [`uninit`]. All mutating calls are serialized by one
/// internal lock; buffer transfers only take it to snapshot handles.
///
/// [`init`]: ComputeEnv::init
/// [`uninit`]: ComputeEnv::uninit
pub struct ComputeEnv {
    state: Mutex<EnvState>,
}

// Handles are only mutated under the lock. OpenCL API objects other than
// kernels are safe to share across threads.
unsafe impl Send for ComputeEnv {}
unsafe impl Sync for ComputeEnv {}

impl Default for ComputeEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl ComputeEnv {
    pub fn new() -> Self {
        Self::with_options(EnvOptions::default())
    }

    pub fn with_options(options: EnvOptions) -> Self {
        Self {
            state: Mutex::new(EnvState {
                options,
                init_count: 0,
                platform_idx: -1,
                device_idx: -1,
                platform_id: ptr::null_mut(),
                device_type: 0,
                session: Session::Idle,
                sources: Vec::new(),
                programs: Vec::new(),
                kernel_count: 0,
                device_list: None,
            }),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, EnvState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sets one configuration option by key. Recognized keys:
    /// `platform_idx`, `device_idx`, `build_options`.
    /// Values take effect at the next first-init.
    pub fn set_option(&self, key: &str, value: &str) -> Result<(), OclError> {
        self.lock().options.set(key, value)
    }

    /// Reads one configuration option back as a string.
    pub fn get_option(&self, key: &str) -> Result<String, OclError> {
        self.lock().options.get(key)
    }

    /// Registers a fragment of kernel source for the next compile pass.
    ///
    /// Registering the identical fragment (same `&'static str` identity)
    /// twice is a no-op. Fails with `ResourceExhausted` once the table
    /// holds `max_programs` fragments.
    pub fn register_source(&self, source: &'static str) -> Result<(), OclError> {
        let mut st = self.lock();
        if st
            .sources
            .iter()
            .any(|s| ptr::eq(s.text.as_ptr(), source.as_ptr()))
        {
            log::warn!("same kernel source has already been registered");
            return Ok(());
        }
        if st.sources.len() >= st.options.max_programs {
            return Err(OclError::ResourceExhausted("kernel source table is full"));
        }
        st.sources.push(KernelSource {
            text: source,
            compiled: false,
        });
        Ok(())
    }

    /// Initializes the environment, or bumps its reference count if it is
    /// already up.
    ///
    /// The first init either adopts the supplied external environment or
    /// discovers a device (honoring `platform_idx`/`device_idx`) and
    /// creates a context and command queue. Every init then compiles any
    /// registered-but-uncompiled kernel source. An init with an empty
    /// source registry fails: there is nothing for the environment to do.
    pub fn init(&self, external: Option<&ExternalEnv>) -> Result<(), OclError> {
        let mut st = self.lock();
        if st.init_count == 0 {
            st.platform_idx = st.options.platform_idx;
            st.device_idx = st.options.device_idx;
            st.establish(external)?;
        }
        let build_options = st.options.build_options.clone();
        st.compile_pending(&build_options)?;
        if st.sources.is_empty() {
            return Err(OclError::Validation(
                "no kernel source registered, nothing to initialize".to_string(),
            ));
        }
        st.init_count += 1;
        Ok(())
    }

    /// Drops one reference to the environment.
    ///
    /// Self-owned resources are released on the call that takes the count
    /// to zero, provided no kernel handle is outstanding at that instant.
    /// If kernels are still live, teardown is skipped and is not retried
    /// automatically when the last kernel is released; the caller must
    /// issue one further `uninit` after that point. Adopted environments
    /// never release the caller's handles.
    pub fn uninit(&self) {
        let mut st = self.lock();
        if st.init_count > 0 {
            st.init_count -= 1;
        } else if matches!(st.session, Session::Idle) {
            log::warn!("uninit called on an environment that is not initialized");
            return;
        }
        if matches!(st.session, Session::Adopted { .. }) {
            return;
        }
        if st.init_count > 0 || st.kernel_count > 0 {
            return;
        }
        st.teardown();
    }

    /// Snapshot of (context, queue) for buffer transfers, which run
    /// outside the environment lock.
    pub(crate) fn transfer_handles(&self) -> Result<(*mut c_void, *mut c_void), OclError> {
        let st = self.lock();
        st.session
            .handles()
            .map(|(context, queue, _)| (context, queue))
            .ok_or_else(|| OclError::Validation("environment is not initialized".to_string()))
    }
}

impl EnvState {
    /// First-init resource acquisition. A session that survived a drained
    /// uninit (teardown skipped while kernels were live) is reused as is.
    fn establish(&mut self, external: Option<&ExternalEnv>) -> Result<(), OclError> {
        if !matches!(self.session, Session::Idle) {
            return Ok(());
        }
        if let Some(ext) = external {
            self.platform_id = ext.platform_id;
            self.device_type = ext.device_type;
            self.session = Session::Adopted {
                context: ext.context,
                queue: ext.command_queue,
                device: ext.device_id,
            };
            return Ok(());
        }

        let list = match self.device_list.take() {
            Some(list) => list,
            None => enumerate_devices()?,
        };
        let selected = select_target(&list, self.platform_idx, self.device_idx);
        // Keep the enumeration cached even when selection fails.
        let (pi, di) = match selected {
            Ok(target) => target,
            Err(e) => {
                self.device_list = Some(list);
                return Err(e);
            }
        };
        let platform_id = list.platforms[pi].id;
        let vendor = list.platforms[pi].vendor.clone();
        let device = list.platforms[pi].devices[di].id;
        let device_type = list.platforms[pi].devices[di].kind.to_cl();
        self.device_list = Some(list);

        let context = cl3::context::create_context(&[device], ptr::null(), None, ptr::null_mut())
            .map_err(|e| OclError::api("clCreateContext", ClError(e)))?;
        let queue = match unsafe { cl3::command_queue::create_command_queue(context, device, 0) } {
            Ok(queue) => queue,
            Err(e) => {
                if let Err(re) = unsafe { cl3::context::release_context(context) } {
                    log::error!("could not release context: {}", errstr(re));
                }
                return Err(OclError::api("clCreateCommandQueue", ClError(e)));
            }
        };
        self.platform_idx = pi as i32;
        self.device_idx = di as i32;
        self.platform_id = platform_id;
        self.device_type = device_type;
        self.session = Session::Owned {
            context,
            queue,
            device,
        };
        log::debug!(
            "using platform '{}' (index {}), device index {}, type {:#x}, id {:?}",
            vendor,
            pi,
            di,
            self.device_type,
            self.platform_id,
        );
        Ok(())
    }

    /// Concatenates every uncompiled fragment, in registration order, into
    /// one program and builds it with the configured options. A fragment
    /// is marked compiled when it is gathered and is never re-submitted,
    /// even if the build fails. No uncompiled fragment is a cheap no-op.
    fn compile_pending(&mut self, build_options: &str) -> Result<(), OclError> {
        let mut blob = String::new();
        for src in self.sources.iter_mut().filter(|s| !s.compiled) {
            blob.push_str(src.text);
            src.compiled = true;
        }
        if blob.is_empty() {
            return Ok(());
        }
        let Some((context, _queue, device)) = self.session.handles() else {
            return Err(OclError::Validation(
                "environment is not initialized".to_string(),
            ));
        };
        if self.programs.len() >= self.options.max_programs {
            return Err(OclError::ResourceExhausted("program table is full"));
        }
        let program = cl3::program::create_program_with_source(context, &[blob.as_str()])
            .map_err(|e| OclError::api("clCreateProgramWithSource", ClError(e)))?;
        let options = CString::new(build_options)
            .map_err(|_| OclError::Validation("build options contain a nul byte".to_string()))?;
        if let Err(e) =
            cl3::program::build_program(program, &[device], &options, None, ptr::null_mut())
        {
            if let Ok(build_log) =
                cl3::program::get_program_build_info(program, device, CL_PROGRAM_BUILD_LOG)
            {
                log::error!("kernel build failed:\n{build_log}");
            }
            if let Err(re) = unsafe { cl3::program::release_program(program) } {
                log::error!("could not release failed program: {}", errstr(re));
            }
            return Err(OclError::api("clBuildProgram", ClError(e)));
        }
        self.programs.push(program);
        Ok(())
    }

    /// Releases programs, queue and context in that order, then the cached
    /// device list. Release failures are logged and do not stop the
    /// remaining releases.
    fn teardown(&mut self) {
        match std::mem::replace(&mut self.session, Session::Idle) {
            Session::Owned {
                context,
                queue,
                device: _,
            } => {
                for program in self.programs.drain(..) {
                    if let Err(e) = unsafe { cl3::program::release_program(program) } {
                        log::error!("could not release program: {}", errstr(e));
                    }
                }
                if let Err(e) = unsafe { cl3::command_queue::release_command_queue(queue) } {
                    log::error!("could not release command queue: {}", errstr(e));
                }
                if let Err(e) = unsafe { cl3::context::release_context(context) } {
                    log::error!("could not release context: {}", errstr(e));
                }
                self.device_list = None;
                self.platform_id = ptr::null_mut();
                self.device_type = 0;
            }
            other => self.session = other,
        }
    }
}

/// Resolves the configured platform/device indices against an enumeration,
/// defaulting to the first platform with at least one device and its first
/// device. Out-of-range indices and zero-device platforms are validation
/// errors, distinguishable from API failures.
fn select_target(
    list: &DeviceList,
    platform_idx: i32,
    device_idx: i32,
) -> Result<(usize, usize), OclError> {
    let pi = if platform_idx >= 0 {
        let pi = platform_idx as usize;
        let platform = list.platforms.get(pi).ok_or_else(|| {
            OclError::Validation(format!(
                "platform index {platform_idx} out of range ({} platforms found)",
                list.platforms.len()
            ))
        })?;
        if platform.devices.is_empty() {
            return Err(OclError::Validation(format!(
                "platform {platform_idx} has no devices"
            )));
        }
        pi
    } else {
        list.platforms
            .iter()
            .position(|p| !p.devices.is_empty())
            .ok_or_else(|| {
                OclError::Validation("no OpenCL platform with available devices".to_string())
            })?
    };
    let di = if device_idx >= 0 {
        let di = device_idx as usize;
        if di >= list.platforms[pi].devices.len() {
            return Err(OclError::Validation(format!(
                "device index {device_idx} out of range ({} devices on platform {pi})",
                list.platforms[pi].devices.len()
            )));
        }
        di
    } else {
        0
    };
    Ok((pi, di))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceInfo, DeviceKind, PlatformInfo};

    fn fake_list() -> DeviceList {
        DeviceList {
            platforms: vec![
                PlatformInfo {
                    id: ptr::null_mut(),
                    vendor: "Empty Inc".into(),
                    devices: vec![],
                },
                PlatformInfo {
                    id: ptr::null_mut(),
                    vendor: "Acme".into(),
                    devices: vec![DeviceInfo {
                        id: ptr::null_mut(),
                        kind: DeviceKind::Gpu,
                        name: "acme gpu".into(),
                    }],
                },
            ],
        }
    }

    #[test]
    fn auto_select_skips_platforms_without_devices() {
        assert_eq!(select_target(&fake_list(), -1, -1).unwrap(), (1, 0));
    }

    #[test]
    fn out_of_range_platform_index_is_a_validation_error() {
        assert!(matches!(
            select_target(&fake_list(), 5, -1),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn platform_without_devices_is_a_validation_error() {
        assert!(matches!(
            select_target(&fake_list(), 0, -1),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn out_of_range_device_index_is_a_validation_error() {
        assert!(matches!(
            select_target(&fake_list(), 1, 3),
            Err(OclError::Validation(_))
        ));
    }

    #[test]
    fn explicit_indices_are_honored() {
        assert_eq!(select_target(&fake_list(), 1, 0).unwrap(), (1, 0));
    }

    #[test]
    fn duplicate_registration_is_a_no_op() {
        static A: &str = "__kernel void a(void) {}";
        static B: &str = "__kernel void b(void) {}";
        static C: &str = "__kernel void c(void) {}";
        let env = ComputeEnv::with_options(EnvOptions {
            max_programs: 2,
            ..EnvOptions::default()
        });
        env.register_source(A).unwrap();
        // Same identity again: table still holds one entry, so B fits.
        env.register_source(A).unwrap();
        env.register_source(B).unwrap();
        assert!(matches!(
            env.register_source(C),
            Err(OclError::ResourceExhausted(_))
        ));
        // A duplicate succeeds even with the table full.
        env.register_source(A).unwrap();
    }

    #[test]
    fn uninit_at_zero_count_is_a_no_op() {
        let env = ComputeEnv::new();
        env.uninit();
        env.uninit();
    }

    #[test]
    fn option_accessors_go_through_the_store() {
        let env = ComputeEnv::new();
        env.set_option("platform_idx", "1").unwrap();
        assert_eq!(env.get_option("platform_idx").unwrap(), "1");
        assert!(env.set_option("bogus", "1").is_err());
    }
}
