//! We use this mocking module in unit tests to emulate a DPS power supply on
//! the other end of a serial port.
//!
//! [`FakeDps`] parses the host's frames and answers `GET`s from an internal
//! [`Dump`], applies `SET`s to it and tracks the `LOCK` state. Clones share the
//! same device, so a test can keep one handle while the connection owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::discovery::{Port, UsbIdentity};
use crate::dump::{Dump, sample_dump};
use crate::error::{Result, TransportError};
use crate::field::{FieldCode, PayloadShape};
use crate::frame::{Action, Direction, Frame, FrameDecoder};
use crate::property::PropertyValue;
use crate::registry::{self, FieldValue};

pub const MODEL_NAME: &str = "DPS-150";
pub const HARDWARE_VERSION: &str = "V1.0";
pub const FIRMWARE_VERSION: &str = "V1.2";

#[derive(Debug, thiserror::Error)]
pub enum MockSerialError {
    /// No data available, as a serial read timeout reports it.
    #[error("Read timed out")]
    WouldBlock,
    /// Simulated unplugged device.
    #[error("Device disconnected")]
    Disconnected,
    /// An OS error without a more specific kind.
    #[error("Unclassified I/O error")]
    Unclassified,
}

impl embedded_io::Error for MockSerialError {
    fn kind(&self) -> embedded_io::ErrorKind {
        match self {
            MockSerialError::WouldBlock => embedded_io::ErrorKind::TimedOut,
            MockSerialError::Disconnected => embedded_io::ErrorKind::BrokenPipe,
            MockSerialError::Unclassified => embedded_io::ErrorKind::Other,
        }
    }
}

struct Device {
    dump: Dump,
    locked: bool,
    baud_index: Option<u8>,
    /// Bytes waiting to be read by the host.
    outbox: VecDeque<u8>,
    /// Everything the host wrote.
    written: Vec<u8>,
    decoder: FrameDecoder,
    silent: bool,
    should_error_on_read: bool,
    should_fail_reads: bool,
    should_error_on_write: bool,
}

#[derive(Clone)]
pub struct FakeDps {
    device: Arc<Mutex<Device>>,
}

impl FakeDps {
    /// A responsive device holding [`sample_dump`], identifier 7.
    pub fn new() -> Self {
        Self {
            device: Arc::new(Mutex::new(Device {
                dump: sample_dump(),
                locked: false,
                baud_index: None,
                outbox: VecDeque::new(),
                written: Vec::new(),
                decoder: FrameDecoder::new(),
                silent: false,
                should_error_on_read: false,
                should_fail_reads: false,
                should_error_on_write: false,
            })),
        }
    }

    pub fn with_identifier(self, identifier: u8) -> Self {
        self.device().dump.identifier = identifier;
        self
    }

    /// Keep reading requests but never answer.
    pub fn set_silent(&self, silent: bool) {
        self.device().silent = silent;
    }

    pub fn set_read_error(&self, should_error: bool) {
        self.device().should_error_on_read = should_error;
    }

    /// Fail every read with an unclassified error, like a line stuck in EIO.
    pub fn set_failing_reads(&self, failing: bool) {
        self.device().should_fail_reads = failing;
    }

    pub fn set_write_error(&self, should_error: bool) {
        self.device().should_error_on_write = should_error;
    }

    /// Queue raw bytes for the host.
    pub fn inject(&self, bytes: &[u8]) {
        self.device().outbox.extend(bytes);
    }

    /// Queue `count` well formed frames with a wrong checksum.
    pub fn inject_corrupt_frames(&self, count: usize) {
        for _ in 0..count {
            let mut bytes = Frame::new(Direction::Rx, Action::Get, FieldCode::Volume, &[1])
                .map(|frame| frame.to_bytes())
                .unwrap_or_default();
            if let Some(last) = bytes.last_mut() {
                *last ^= 0xFF;
            }
            self.inject(&bytes);
        }
    }

    /// Report a value unprompted, like the device does while running.
    pub fn report(&self, field: FieldCode, value: &FieldValue) {
        let payload = registry::encode_payload(field, value).unwrap_or_default();
        let frame = Frame::with_payload(Direction::Rx, Action::Get, field, payload);
        self.inject(&frame.to_bytes());
    }

    pub fn written_data(&self) -> Vec<u8> {
        self.device().written.clone()
    }

    /// Every frame the host wrote. Panics if the log holds anything but whole,
    /// valid frames.
    pub fn written_frames(&self) -> Vec<Frame> {
        let written = self.written_data();
        let mut decoder: FrameDecoder<4096> = FrameDecoder::new();
        let mut frames = Vec::new();
        for chunk in written.chunks(1024) {
            decoder.push(chunk).expect("write log overflowed the decoder");
            while let Some(frame) = decoder.next_frame() {
                frames.push(frame.expect("host wrote a malformed frame"));
            }
        }
        assert_eq!(decoder.pending(), 0, "host wrote a partial frame");
        frames
    }

    pub fn locked(&self) -> bool {
        self.device().locked
    }

    pub fn baud_index(&self) -> Option<u8> {
        self.device().baud_index
    }

    pub fn dump(&self) -> Dump {
        self.device().dump.clone()
    }

    fn device(&self) -> MutexGuard<'_, Device> {
        self.device.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for FakeDps {
    fn default() -> Self {
        Self::new()
    }
}

/// A [`SerialBackend`](crate::transport::SerialBackend) whose every port is
/// the same [`FakeDps`].
#[derive(Clone)]
pub struct FakeBackend {
    device: FakeDps,
    ports: Vec<Port>,
    missing: bool,
}

impl FakeBackend {
    pub fn new(device: FakeDps) -> Self {
        Self {
            device,
            ports: Vec::new(),
            missing: false,
        }
    }

    /// Ports returned by enumeration, regardless of the identity asked for.
    pub fn with_ports(mut self, ports: Vec<Port>) -> Self {
        self.ports = ports;
        self
    }

    /// Fail every open as if the device was unplugged.
    pub fn unplugged(mut self) -> Self {
        self.missing = true;
        self
    }
}

impl crate::transport::SerialBackend for FakeBackend {
    type Transport = FakeDps;

    fn open(&self, path: &str, _baud_rate: u32, _read_timeout: Duration) -> Result<FakeDps> {
        if self.missing {
            return Err(TransportError::new(
                embedded_io::ErrorKind::NotFound,
                format!("{path}: no such device"),
            )
            .into());
        }
        Ok(self.device.clone())
    }

    fn enumerate(&self, _identity: UsbIdentity) -> Vec<Port> {
        self.ports.clone()
    }
}

impl Device {
    fn handle(&mut self, frame: Frame) {
        if frame.direction() != Direction::Tx {
            return;
        }
        let byte = frame.payload().first().copied().unwrap_or(0);
        match frame.action() {
            Action::Lock => self.locked = byte != 0,
            Action::Baud => self.baud_index = Some(byte),
            Action::Set => {
                if let Ok(value) = registry::decode_payload(frame.field(), frame.payload()) {
                    self.apply(frame.field(), &value);
                }
            }
            Action::Get if !self.silent => {
                if let Some(value) = self.value_of(frame.field()) {
                    self.reply(frame.field(), &value);
                }
            }
            Action::Get => {}
        }
    }

    fn reply(&mut self, field: FieldCode, value: &FieldValue) {
        if let Ok(payload) = registry::encode_payload(field, value) {
            let frame = Frame::with_payload(Direction::Rx, Action::Get, field, payload);
            self.outbox.extend(frame.to_bytes());
        }
    }

    fn value_of(&self, field: FieldCode) -> Option<FieldValue> {
        let text = |text: &str| FieldValue::Scalar(PropertyValue::Text(text.to_string()));
        match field {
            FieldCode::ModelName => Some(text(MODEL_NAME)),
            FieldCode::HardwareVersion => Some(text(HARDWARE_VERSION)),
            FieldCode::FirmwareVersion => Some(text(FIRMWARE_VERSION)),
            FieldCode::All => Some(FieldValue::Dump(Box::new(self.dump.clone()))),
            _ => self
                .dump
                .fields()
                .into_iter()
                .find(|(known, _)| *known == field)
                .map(|(_, value)| value),
        }
    }

    fn apply(&mut self, field: FieldCode, value: &FieldValue) {
        use FieldCode as F;
        let Some(scalar) = value.as_scalar() else {
            return;
        };
        let float = scalar.as_float().unwrap_or_default();
        let byte = scalar.as_uint().unwrap_or_default() as u8;
        let dump = &mut self.dump;
        match field {
            F::VSet => dump.set.voltage = float,
            F::ISet => dump.set.current = float,
            F::Ovp => dump.protection.ovp = float,
            F::Ocp => dump.protection.ocp = float,
            F::Opp => dump.protection.opp = float,
            F::Otp => dump.protection.otp = float,
            F::Lvp => dump.protection.lvp = float,
            F::Brightness => dump.brightness = byte,
            F::Volume => dump.volume = byte,
            F::Metering => dump.metering = byte != 0,
            F::Running => dump.running = byte != 0,
            F::Identifier => dump.identifier = byte,
            preset if field.shape() == PayloadShape::Float32 => {
                let code = preset as u8;
                if (F::M1Voltage as u8..=F::M6Current as u8).contains(&code) {
                    let offset = (code - F::M1Voltage as u8) as usize;
                    let slot = &mut dump.presets[offset / 2];
                    if offset % 2 == 0 {
                        slot.voltage = float;
                    } else {
                        slot.current = float;
                    }
                }
            }
            _ => {}
        }
    }
}

impl embedded_io::ErrorType for FakeDps {
    type Error = MockSerialError;
}

impl embedded_io::Write for FakeDps {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        let mut device = self.device();
        if device.should_error_on_write {
            return Err(MockSerialError::Disconnected);
        }
        device.written.extend_from_slice(buf);
        let _ = device.decoder.push(buf);
        while let Some(frame) = device.decoder.next_frame() {
            if let Ok(frame) = frame {
                device.handle(frame);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl embedded_io::Read for FakeDps {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut device = self.device();
        if device.should_error_on_read {
            return Err(MockSerialError::Disconnected);
        }
        if device.should_fail_reads {
            return Err(MockSerialError::Unclassified);
        }
        if device.outbox.is_empty() {
            return Err(MockSerialError::WouldBlock);
        }
        let count = buf.len().min(device.outbox.len());
        for (slot, byte) in buf.iter_mut().zip(device.outbox.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDecoder;
    use embedded_io::{Error, Read, Write};

    fn read_frames(fake: &mut FakeDps) -> Vec<Frame> {
        let mut decoder: FrameDecoder = FrameDecoder::new();
        let mut buffer = [0u8; 64];
        while let Ok(count) = fake.read(&mut buffer) {
            decoder.push(&buffer[..count]).unwrap();
        }
        let mut frames = Vec::new();
        while let Some(frame) = decoder.next_frame() {
            frames.push(frame.unwrap());
        }
        frames
    }

    #[test]
    fn test_answers_get() {
        let mut fake = FakeDps::new();
        fake.write_all(&Frame::request(Action::Get, FieldCode::FirmwareVersion).to_bytes())
            .unwrap();
        fake.write_all(&Frame::request(Action::Get, FieldCode::VSet).to_bytes())
            .unwrap();

        let frames = read_frames(&mut fake);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].direction(), Direction::Rx);
        assert_eq!(frames[0].payload(), FIRMWARE_VERSION.as_bytes());
        assert_eq!(frames[1].payload(), &5.0f32.to_le_bytes());
    }

    #[test]
    fn test_applies_set_and_lock() {
        let mut fake = FakeDps::new();
        fake.write_all(&Frame::control(Action::Lock, 1).to_bytes()).unwrap();
        let set = Frame::new(Direction::Tx, Action::Set, FieldCode::M3Current, &2.5f32.to_le_bytes())
            .unwrap();
        fake.write_all(&set.to_bytes()).unwrap();

        assert!(fake.locked());
        assert_eq!(fake.dump().presets[2].current, 2.5);
        assert_eq!(fake.written_frames(), vec![Frame::control(Action::Lock, 1), set]);
        assert!(read_frames(&mut fake).is_empty());
    }

    #[test]
    fn test_silent_device() {
        let mut fake = FakeDps::new();
        fake.set_silent(true);
        fake.write_all(&Frame::request(Action::Get, FieldCode::All).to_bytes())
            .unwrap();
        let mut buffer = [0u8; 8];
        assert!(matches!(fake.read(&mut buffer), Err(MockSerialError::WouldBlock)));
    }

    #[test]
    fn test_error_simulation() {
        let mut fake = FakeDps::new();
        fake.set_write_error(true);
        assert!(fake.write(b"x").is_err());
        assert!(fake.written_data().is_empty());

        fake.set_read_error(true);
        let mut buffer = [0u8; 8];
        let err = fake.read(&mut buffer).unwrap_err();
        assert_eq!(err.kind(), embedded_io::ErrorKind::BrokenPipe);
        assert_eq!(err.to_string(), "Device disconnected");

        fake.set_read_error(false);
        fake.set_failing_reads(true);
        assert_eq!(
            fake.read(&mut buffer).unwrap_err().kind(),
            embedded_io::ErrorKind::Other
        );

        fake.set_failing_reads(false);
        assert_eq!(
            fake.read(&mut buffer).unwrap_err().kind(),
            embedded_io::ErrorKind::TimedOut
        );
    }
}
