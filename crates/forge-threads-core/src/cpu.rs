//! Validation of the logical-processor query.

use crate::error::ThreadError;

/// Upper bound accepted from the OS. Anything larger is treated as garbage.
pub const MAX_PLAUSIBLE_CPUS: i64 = 1 << 16;

/// Turn the raw `sysconf(_SC_NPROCESSORS_ONLN)` result into a core count.
///
/// `-1` (query unsupported or failed), zero, and implausibly large values
/// are errors rather than being reinterpreted as unsigned.
pub fn validate_cpu_count(raw: i64) -> Result<u32, ThreadError> {
    if raw < 1 || raw > MAX_PLAUSIBLE_CPUS {
        return Err(ThreadError::CpuQuery { raw });
    }
    u32::try_from(raw).map_err(|_| ThreadError::CpuQuery { raw })
}
