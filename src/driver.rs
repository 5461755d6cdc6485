//! Driver support.

use crate::info;

/// Driver interfaces.
pub mod interface {
    /// Device Driver functions.
    pub trait DeviceDriver {
        /// Reason a bring-up failed.
        type Error: core::fmt::Display;

        /// Return a compatibility string for identifying the driver.
        fn compatible(&self) -> &'static str;

        /// Called by the boot sequence to bring up the device.
        ///
        /// # Safety
        ///
        /// - During init, drivers might do stuff with system-wide impact.
        unsafe fn init(&self) -> Result<(), Self::Error> {
            Ok(())
        }
    }
}

/// Bring up a single driver, logging the outcome.
///
/// # Safety
///
/// - See [`interface::DeviceDriver::init`].
pub unsafe fn init_driver<D>(driver: &D) -> Result<(), D::Error>
where
    D: interface::DeviceDriver + ?Sized,
{
    driver.init().map_err(|x| {
        info!("Error initializing driver: {}: {}", driver.compatible(), x);
        x
    })?;

    info!("Driver up: {}", driver.compatible());
    Ok(())
}
