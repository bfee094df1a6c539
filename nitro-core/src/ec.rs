//! Embedded-controller register access
//!
//! The EC exposes its register space as a small seekable file under debugfs
//! (the `ec_sys` module, loaded with `write_support=1`). Every operation is
//! one bounded seek-and-transfer of a single byte at a fixed offset; there
//! is no transaction support at the hardware level.
//!
//! Raw access is behind the [`EcBus`] trait so the fan daemon's state
//! machine can be driven against a recording fake. [`FanIo`] layers the
//! per-fan mode/duty contract on top of the raw bus using a model's
//! [`RegisterMap`].

use crate::model::{Fan, FanMode, RegisterMap};
use nitro_error::{NitroError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::debug;

/// EC register interface exposed by the ec_sys kernel module
pub const EC_IO_PATH: &str = "/sys/kernel/debug/ec/ec0/io";

/// Raw byte-addressable register access
pub trait EcBus {
    fn read_register(&mut self, register: u64) -> Result<u8>;
    fn write_register(&mut self, register: u64, value: u8) -> Result<()>;
}

/// The real EC debug interface file
#[derive(Debug)]
pub struct EcDev {
    file: File,
}

impl EcDev {
    /// Open the EC interface at its well-known path
    pub fn open() -> Result<Self> {
        Self::open_at(Path::new(EC_IO_PATH))
    }

    /// Open an EC interface at an explicit path
    pub fn open_at(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| {
                NitroError::generic(format!(
                    "Failed to open EC interface {}: {}. Ensure the ec_sys module is loaded with write_support=1",
                    path.display(),
                    e
                ))
            })?;
        Ok(Self { file })
    }
}

impl EcBus for EcDev {
    fn read_register(&mut self, register: u64) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.file
            .seek(SeekFrom::Start(register))
            .and_then(|_| self.file.read_exact(&mut buf))
            .map_err(|source| NitroError::EcRead { register, source })?;
        Ok(buf[0])
    }

    fn write_register(&mut self, register: u64, value: u8) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(register))
            .and_then(|_| self.file.write_all(&[value]))
            .and_then(|_| self.file.flush())
            .map_err(|source| NitroError::EcWrite { register, source })?;
        debug!("EC write: register {} <- {:#04x}", register, value);
        Ok(())
    }
}

/// Per-fan mode and duty-cycle operations over a raw EC bus
///
/// Mode bytes and register offsets come from the verified model's register
/// map; callers never see raw offsets.
pub struct FanIo<B: EcBus> {
    bus: B,
    map: &'static RegisterMap,
}

impl<B: EcBus> FanIo<B> {
    pub fn new(bus: B, map: &'static RegisterMap) -> Self {
        Self { bus, map }
    }

    /// Put a fan under manual or automatic control
    pub fn write_fan_mode(&mut self, fan: Fan, mode: FanMode) -> Result<()> {
        self.bus
            .write_register(self.map.mode_register(fan), self.map.mode_byte(fan, mode))
    }

    /// Set a fan's duty cycle in percent; the fan must already be in manual
    /// mode or the EC ignores the value
    pub fn write_fan_duty(&mut self, fan: Fan, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(NitroError::InvalidDutyCycle { value: percent });
        }
        self.bus.write_register(self.map.duty_register(fan), percent)
    }

    /// Read back a fan's current duty cycle from its tach register
    pub fn read_fan_duty(&mut self, fan: Fan) -> Result<u8> {
        self.bus.read_register(self.map.tach_register(fan))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SUPPORTED_MODELS;
    use std::io::Write as _;

    fn ec_image() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(&[0u8; 256]).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn writes_land_at_the_register_offset() {
        let image = ec_image();
        let mut dev = EcDev::open_at(image.path()).unwrap();

        dev.write_register(55, 100).unwrap();
        dev.write_register(34, 0x0C).unwrap();

        assert_eq!(dev.read_register(55).unwrap(), 100);
        assert_eq!(dev.read_register(34).unwrap(), 0x0C);
        assert_eq!(dev.read_register(0).unwrap(), 0);

        let bytes = std::fs::read(image.path()).unwrap();
        assert_eq!(bytes[55], 100);
        assert_eq!(bytes[34], 0x0C);
    }

    #[test]
    fn open_missing_interface_is_an_error() {
        let err = EcDev::open_at(Path::new("/nonexistent/ec/io")).unwrap_err();
        assert!(err.to_string().contains("ec_sys"));
    }

    #[test]
    fn fan_io_resolves_registers_from_the_map() {
        let image = ec_image();
        let dev = EcDev::open_at(image.path()).unwrap();
        let mut io = FanIo::new(dev, &SUPPORTED_MODELS[0].ec);

        io.write_fan_mode(Fan::Gpu, FanMode::Manual).unwrap();
        io.write_fan_duty(Fan::Gpu, 75).unwrap();

        let bytes = std::fs::read(image.path()).unwrap();
        assert_eq!(bytes[33], 0x30);
        assert_eq!(bytes[58], 75);
    }

    #[test]
    fn out_of_range_duty_is_rejected_without_io() {
        let image = ec_image();
        let dev = EcDev::open_at(image.path()).unwrap();
        let mut io = FanIo::new(dev, &SUPPORTED_MODELS[0].ec);

        let err = io.write_fan_duty(Fan::Cpu, 101).unwrap_err();
        assert!(matches!(err, NitroError::InvalidDutyCycle { value: 101 }));

        let bytes = std::fs::read(image.path()).unwrap();
        assert_eq!(bytes[55], 0, "duty register must be untouched");
    }
}
