use core::fmt::{Display, Formatter};

use cl3::error_codes::ClError;

pub(crate) const CL_DEVICE_NOT_FOUND: i32 = -1;

/// Status code / description pairs for every error the OpenCL 1.2 API can
/// return. Scanned linearly; the table is small and cold.
const ERR_TEXT: &[(i32, &str)] = &[
    (-1, "DEVICE NOT FOUND"),
    (-2, "DEVICE NOT AVAILABLE"),
    (-3, "COMPILER NOT AVAILABLE"),
    (-4, "MEM OBJECT ALLOCATION FAILURE"),
    (-5, "OUT OF RESOURCES"),
    (-6, "OUT OF HOST MEMORY"),
    (-7, "PROFILING INFO NOT AVAILABLE"),
    (-8, "MEM COPY OVERLAP"),
    (-9, "IMAGE FORMAT MISMATCH"),
    (-10, "IMAGE FORMAT NOT SUPPORTED"),
    (-11, "BUILD PROGRAM FAILURE"),
    (-12, "MAP FAILURE"),
    (-13, "MISALIGNED SUB BUFFER OFFSET"),
    (-14, "EXEC STATUS ERROR FOR EVENTS IN WAIT LIST"),
    (-15, "COMPILE PROGRAM FAILURE"),
    (-16, "LINKER NOT AVAILABLE"),
    (-17, "LINK PROGRAM FAILURE"),
    (-18, "DEVICE PARTITION FAILED"),
    (-19, "KERNEL ARG INFO NOT AVAILABLE"),
    (-30, "INVALID VALUE"),
    (-31, "INVALID DEVICE TYPE"),
    (-32, "INVALID PLATFORM"),
    (-33, "INVALID DEVICE"),
    (-34, "INVALID CONTEXT"),
    (-35, "INVALID QUEUE PROPERTIES"),
    (-36, "INVALID COMMAND QUEUE"),
    (-37, "INVALID HOST PTR"),
    (-38, "INVALID MEM OBJECT"),
    (-39, "INVALID IMAGE FORMAT DESCRIPTOR"),
    (-40, "INVALID IMAGE SIZE"),
    (-41, "INVALID SAMPLER"),
    (-42, "INVALID BINARY"),
    (-43, "INVALID BUILD OPTIONS"),
    (-44, "INVALID PROGRAM"),
    (-45, "INVALID PROGRAM EXECUTABLE"),
    (-46, "INVALID KERNEL NAME"),
    (-47, "INVALID KERNEL DEFINITION"),
    (-48, "INVALID KERNEL"),
    (-49, "INVALID ARG INDEX"),
    (-50, "INVALID ARG VALUE"),
    (-51, "INVALID ARG SIZE"),
    (-52, "INVALID KERNEL ARGS"),
    (-53, "INVALID WORK DIMENSION"),
    (-54, "INVALID WORK GROUP SIZE"),
    (-55, "INVALID WORK ITEM SIZE"),
    (-56, "INVALID GLOBAL OFFSET"),
    (-57, "INVALID EVENT WAIT LIST"),
    (-58, "INVALID EVENT"),
    (-59, "INVALID OPERATION"),
    (-60, "INVALID GL OBJECT"),
    (-61, "INVALID BUFFER SIZE"),
    (-62, "INVALID MIP LEVEL"),
    (-63, "INVALID GLOBAL WORK SIZE"),
    (-64, "INVALID PROPERTY"),
    (-65, "INVALID IMAGE DESCRIPTOR"),
    (-66, "INVALID COMPILER OPTIONS"),
    (-67, "INVALID LINKER OPTIONS"),
    (-68, "INVALID DEVICE PARTITION COUNT"),
];

/// Returns a stable description of an OpenCL status code,
/// or `"unknown error"` for codes outside the table.
pub fn errstr(status: i32) -> &'static str {
    ERR_TEXT
        .iter()
        .find(|(code, _)| *code == status)
        .map_or("unknown error", |(_, text)| *text)
}

/// Errors surfaced by this crate.
#[derive(Debug)]
pub enum OclError {
    /// Caller-supplied arguments violate a precondition. Detected before
    /// any OpenCL call is made.
    Validation(String),
    /// A bounded table or counter is full.
    ResourceExhausted(&'static str),
    /// The OpenCL runtime returned a non-success status.
    Api {
        /// The API call that failed.
        op: &'static str,
        /// The raw status code.
        status: i32,
    },
}

impl OclError {
    pub(crate) fn api(op: &'static str, err: ClError) -> Self {
        OclError::Api { op, status: err.0 }
    }
}

impl Display for OclError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            OclError::Validation(msg) => f.write_str(msg),
            OclError::ResourceExhausted(what) => {
                f.write_fmt(format_args!("resource exhausted: {what}"))
            }
            OclError::Api { op, status } => f.write_fmt(format_args!(
                "{op} failed: {} ({status})",
                errstr(*status)
            )),
        }
    }
}

impl std::error::Error for OclError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_translate() {
        assert_eq!(errstr(-1), "DEVICE NOT FOUND");
        assert_eq!(errstr(-11), "BUILD PROGRAM FAILURE");
        assert_eq!(errstr(-68), "INVALID DEVICE PARTITION COUNT");
    }

    #[test]
    fn unknown_codes_translate_to_fixed_string() {
        assert_eq!(errstr(0), "unknown error");
        assert_eq!(errstr(-20), "unknown error");
        assert_eq!(errstr(12345), "unknown error");
    }

    #[test]
    fn api_error_includes_translated_reason() {
        let err = OclError::Api {
            op: "clBuildProgram",
            status: -11,
        };
        let text = err.to_string();
        assert!(text.contains("clBuildProgram"));
        assert!(text.contains("BUILD PROGRAM FAILURE"));
    }
}
