#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
mod memory;

#[cfg(target_os = "linux")]
use linux::is_port_open;
#[cfg(target_os = "macos")]
use macos::is_port_open;

pub use memory::MemoryBus;
pub use serialport::{Parity, SerialPort};

use anyhow::Result;
use core::time::Duration;
use log::debug;
use serialport::{self, SerialPortType};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("no compatible serial adapter found")]
    NoCompatiblePort,
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
}

/// Non-blocking byte transport for one physical bus.
///
/// `read_bytes` is only ever called with at most `bytes_available()` bytes
/// of room, so implementations never have to wait for data.
pub trait Bus: Send {
    fn bytes_available(&mut self) -> Result<usize>;
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_bytes(&mut self, data: &[u8]) -> Result<()>;
}

impl Bus for Box<dyn SerialPort> {
    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read(buf)?)
    }

    fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        self.write_all(data)?;
        self.flush()?;
        Ok(())
    }
}

#[derive(PartialEq)]
struct UsbId(u16, u16);

static COMPATIBLE_IDS: &[UsbId] = &[
    UsbId(0x0403, 0x6001), // FTDI FT232R USB UART
    UsbId(0x0403, 0x6014), // FTDI FT232H Single HS USB-UART/FIFO IC
    UsbId(0x1a86, 0x7523), // QinHeng Electronics HL-340 USB-Serial adapter
    UsbId(0x10c4, 0xea60), // Silicon Labs CP210x UART Bridge
    UsbId(0x067b, 0x2303), // Prolific PL2303 Serial Port
];

pub fn open_port(
    port_name: &str,
    baudrate: u32,
    parity: Parity,
    force: bool,
) -> Result<Box<dyn SerialPort>> {
    let true_name: String = if port_name == "auto" {
        guess_port()?
    } else {
        port_name.to_string()
    };

    if !force && is_port_open(&true_name) {
        return Err(OpenPortError::PortBusy {
            port_name: true_name,
        }
        .into());
    }

    let port = serialport::new(&true_name, baudrate)
        .parity(parity)
        .timeout(Duration::from_millis(10))
        .open()?;

    debug!(
        "open_port OK: {} @ {} baud, parity {:?}",
        &true_name, baudrate, parity
    );
    Ok(port)
}

fn guess_port() -> Result<String> {
    serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                COMPATIBLE_IDS.contains(&UsbId(usb_info.vid, usb_info.pid))
                    && !is_port_open(&info.port_name)
            }
            SerialPortType::Unknown | SerialPortType::PciPort | SerialPortType::BluetoothPort => {
                false
            }
        })
        .map(|info| info.port_name)
        .next()
        .ok_or_else(|| OpenPortError::NoCompatiblePort.into())
}
