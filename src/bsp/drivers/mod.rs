//! Device drivers for the BCM2xxx peripherals.

pub mod bcm2xxx_emmc;
pub mod bcm2xxx_gpio;
pub mod bcm2xxx_mailbox;
pub mod bcm2xxx_pl011;
pub mod common;
