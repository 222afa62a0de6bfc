use anyhow::Result;

/// Seam for driving the wake/reset pins of a DUT.
///
/// On a bench host without GPIO hardware the [`LogGpio`] default just records
/// the request; a real driver (sysfs, gpiod, remote agent) plugs in here.
pub trait GpioDriver: Send {
    /// Pulse the given pin to wake the DUT (active-high).
    fn pulse_wake(&mut self, pin: u8) -> Result<()>;
}

/// No-hardware driver: logs the pulse and reports success.
pub struct LogGpio;

impl GpioDriver for LogGpio {
    fn pulse_wake(&mut self, pin: u8) -> Result<()> {
        log::info!("Wake pulse requested on GPIO {pin} (no hardware driver attached)");
        Ok(())
    }
}
