use crate::error::OclError;

/// Tunables read by [`crate::ComputeEnv`] at first init.
///
/// `platform_idx` and `device_idx` default to -1, which selects the first
/// platform with at least one device and its first device. The capacity
/// ceilings bound the shared kernel-source/program table and the number
/// of simultaneously live kernels.
#[derive(Clone, Debug)]
pub struct EnvOptions {
    pub platform_idx: i32,
    pub device_idx: i32,
    pub build_options: String,
    pub max_programs: usize,
    pub max_kernels: usize,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            platform_idx: -1,
            device_idx: -1,
            build_options: "-I.".to_string(),
            max_programs: 200,
            max_kernels: 500,
        }
    }
}

impl EnvOptions {
    pub(crate) fn set(&mut self, key: &str, value: &str) -> Result<(), OclError> {
        match key {
            "platform_idx" => self.platform_idx = parse_idx(key, value)?,
            "device_idx" => self.device_idx = parse_idx(key, value)?,
            "build_options" => self.build_options = value.to_string(),
            _ => {
                return Err(OclError::Validation(format!("unknown option '{key}'")));
            }
        }
        Ok(())
    }

    pub(crate) fn get(&self, key: &str) -> Result<String, OclError> {
        Ok(match key {
            "platform_idx" => self.platform_idx.to_string(),
            "device_idx" => self.device_idx.to_string(),
            "build_options" => self.build_options.clone(),
            _ => {
                return Err(OclError::Validation(format!("unknown option '{key}'")));
            }
        })
    }
}

fn parse_idx(key: &str, value: &str) -> Result<i32, OclError> {
    let idx: i32 = value.parse().map_err(|_| {
        OclError::Validation(format!("option '{key}' expects an integer, got '{value}'"))
    })?;
    if idx < -1 {
        return Err(OclError::Validation(format!(
            "option '{key}' must be -1 (auto) or a non-negative index"
        )));
    }
    Ok(idx)
}
