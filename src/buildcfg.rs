//! Exports configuration data from the build system

/// The configured configuration directory
pub const CONFIGDIR: &str = "/etc/ais-target";
pub const JS_DIR: &str = "/usr/share/javascript/ais-target";

#[macro_export]
macro_rules! AIS_TARGET_RUN_DIR_M { () => ("/run/ais-target") }

#[macro_export]
macro_rules! AIS_TARGET_LOG_DIR_M { () => ("/var/log/ais-target") }

#[macro_export]
macro_rules! AIS_TARGET_CACHE_DIR_M { () => ("/var/cache/ais-target") }

/// namespaced directory for in-memory (tmpfs) run state
pub const AIS_TARGET_RUN_DIR: &str = AIS_TARGET_RUN_DIR_M!();

/// namespaced directory for persistent logging
pub const AIS_TARGET_LOG_DIR: &str = AIS_TARGET_LOG_DIR_M!();

/// logfile for all API requests handled by this target's API surface.
pub const API_ACCESS_LOG_FN: &str = concat!(AIS_TARGET_LOG_DIR_M!(), "/api/access.log");

/// logfile for failed authentication attempts against the admin surface.
pub const API_AUTH_LOG_FN: &str = concat!(AIS_TARGET_LOG_DIR_M!(), "/api/auth.log");

/// the PID filename for the target daemon
pub const AIS_TARGET_PID_FN: &str = concat!(AIS_TARGET_RUN_DIR_M!(), "/target.pid");

/// Prepend configuration directory to a file name
///
/// #### Example:
/// ```
/// # #[macro_use] extern crate ais_target;
/// let cert_path = configdir!("/proxy.pfx");
/// ```
#[macro_export]
macro_rules! configdir {
    ($subdir:expr) => (concat!("/etc/ais-target", $subdir))
}

/// Prepend the run directory to a file name.
#[macro_export]
macro_rules! rundir {
    ($subdir:expr) => {
        concat!(AIS_TARGET_RUN_DIR_M!(), $subdir)
    };
}
