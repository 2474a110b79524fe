use crate::error::ProbeError;
use crate::system::process::Connection;

pub trait PlatformExtensions {
    /// Every socket on the host that can be attributed to a pid.
    fn connections() -> Result<Vec<Connection>, ProbeError>;
}

#[cfg(target_os = "linux")]
mod linux;
#[cfg(not(target_os = "linux"))]
mod unsupported;

#[cfg(target_os = "linux")]
use linux as platform_impl;
#[cfg(not(target_os = "linux"))]
use unsupported as platform_impl;

pub fn connections() -> Result<Vec<Connection>, ProbeError> {
    platform_impl::Platform::connections()
}
