use core::ffi::c_void;

use cl3::error_codes::ClError;
use cl3::ext::{
    CL_DEVICE_NAME, CL_DEVICE_TYPE_CPU, CL_DEVICE_TYPE_DEFAULT, CL_DEVICE_TYPE_GPU,
    CL_PLATFORM_VENDOR,
};

use crate::error::{errstr, OclError, CL_DEVICE_NOT_FOUND};

/// Device classes queried during enumeration, in query order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Gpu,
    Cpu,
    Default,
}

impl DeviceKind {
    /// The raw `CL_DEVICE_TYPE_*` bitfield value for this class.
    pub fn to_cl(self) -> u64 {
        match self {
            DeviceKind::Gpu => CL_DEVICE_TYPE_GPU,
            DeviceKind::Cpu => CL_DEVICE_TYPE_CPU,
            DeviceKind::Default => CL_DEVICE_TYPE_DEFAULT,
        }
    }
}

const DEVICE_KINDS: [DeviceKind; 3] = [DeviceKind::Gpu, DeviceKind::Cpu, DeviceKind::Default];

/// One compute device discovered on a platform. Immutable once built.
#[derive(Debug)]
pub struct DeviceInfo {
    pub id: *mut c_void,
    pub kind: DeviceKind,
    pub name: String,
}

/// One platform and the devices discovered on it, in discovery order.
#[derive(Debug)]
pub struct PlatformInfo {
    pub id: *mut c_void,
    pub vendor: String,
    pub devices: Vec<DeviceInfo>,
}

/// Result of an enumeration pass. Owned by whoever requested it and
/// released by dropping it.
#[derive(Debug, Default)]
pub struct DeviceList {
    pub platforms: Vec<PlatformInfo>,
}

impl DeviceList {
    /// Total number of device entries across all platforms. A device
    /// reachable under two classes is counted once per class.
    pub fn device_count(&self) -> usize {
        self.platforms.iter().map(|p| p.devices.len()).sum()
    }
}

// Platform and device ids are process-global tokens handed out by the ICD,
// not thread-affine objects.
unsafe impl Send for DeviceList {}
unsafe impl Sync for DeviceList {}

/// Queries every platform for its GPU, CPU and default-class devices.
///
/// Classes are queried independently, so a device reachable under two
/// classes appears twice. A device whose name query fails is skipped with
/// a warning rather than aborting the enumeration; a platform-id query
/// failure is fatal for the whole call.
pub fn enumerate_devices() -> Result<DeviceList, OclError> {
    let platform_ids = cl3::platform::get_platform_ids()
        .map_err(|e| OclError::api("clGetPlatformIDs", ClError(e)))?;
    let mut platforms = Vec::with_capacity(platform_ids.len());
    for pid in platform_ids {
        let vendor = match cl3::platform::get_platform_data(pid, CL_PLATFORM_VENDOR) {
            Ok(bytes) => param_text(bytes),
            Err(e) => {
                log::warn!("could not query platform vendor: {}", errstr(e));
                String::new()
            }
        };
        let mut devices = Vec::new();
        for kind in DEVICE_KINDS {
            let ids = match cl3::device::get_device_ids(pid, kind.to_cl()) {
                Ok(ids) => ids,
                Err(e) if e == CL_DEVICE_NOT_FOUND => continue,
                Err(e) => {
                    log::warn!("could not get device ids: {}", errstr(e));
                    continue;
                }
            };
            for did in ids {
                let name = match cl3::device::get_device_data(did, CL_DEVICE_NAME) {
                    Ok(bytes) => param_text(bytes),
                    Err(e) => {
                        log::warn!("could not get device name: {}", errstr(e));
                        continue;
                    }
                };
                devices.push(DeviceInfo {
                    id: did,
                    kind,
                    name,
                });
            }
        }
        platforms.push(PlatformInfo {
            id: pid,
            vendor,
            devices,
        });
    }
    Ok(DeviceList { platforms })
}

// Info queries return the raw parameter bytes, nul terminator included.
fn param_text(bytes: Vec<u8>) -> String {
    String::from_utf8_lossy(&bytes)
        .trim_end_matches('\0')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn param_text_strips_trailing_nul() {
        assert_eq!(param_text(b"Acme Compute\0".to_vec()), "Acme Compute");
        assert_eq!(param_text(b"no terminator".to_vec()), "no terminator");
        assert_eq!(param_text(Vec::new()), "");
    }

    #[test]
    fn device_count_sums_all_platforms() {
        use core::ptr;
        let list = DeviceList {
            platforms: vec![
                PlatformInfo {
                    id: ptr::null_mut(),
                    vendor: "a".into(),
                    devices: vec![],
                },
                PlatformInfo {
                    id: ptr::null_mut(),
                    vendor: "b".into(),
                    devices: vec![
                        DeviceInfo {
                            id: ptr::null_mut(),
                            kind: DeviceKind::Gpu,
                            name: "g".into(),
                        },
                        DeviceInfo {
                            id: ptr::null_mut(),
                            kind: DeviceKind::Cpu,
                            name: "c".into(),
                        },
                    ],
                },
            ],
        };
        assert_eq!(list.device_count(), 2);
    }
}
