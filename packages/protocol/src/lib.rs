pub mod gpio;
pub mod transport;
pub mod wire;

pub use gpio::{GpioDriver, LogGpio};
pub use transport::{CommandLink, UartTransport, RESPONSE_TIMEOUT};
pub use wire::{Command, SleepMode};
