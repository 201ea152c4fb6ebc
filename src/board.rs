/// Hardware abstraction for supported boards.
///
/// Each board module defines pin assignments selected at compile time via
/// feature flags. Bus addresses of the switches and sensors live in
/// [`crate::mux`] since they do not depend on the controller board.

#[cfg(feature = "board-tdisplay-s3")]
mod hw {
    pub const I2C_SDA_PIN: u8 = 43;
    pub const I2C_SCL_PIN: u8 = 44;
    pub const I2C_FREQ_HZ: u32 = 400_000;
    /// Interrupt line per module, indexed by module index (active low)
    pub const INT_PINS: [u8; 3] = [13, 12, 11];
    pub const BOARD_NAME: &str = "tdisplay_s3";
}

#[cfg(not(feature = "board-tdisplay-s3"))]
mod hw {
    pub const I2C_FREQ_HZ: u32 = 400_000;
    pub const BOARD_NAME: &str = "unknown";
}

pub use hw::*;
