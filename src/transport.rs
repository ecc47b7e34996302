//! Hardware capability interfaces
//!
//! The control loop talks to the CAN controller and the RS-485 line only
//! through these two traits, so the decoder and the Modbus engine can be
//! driven by synthetic frame and byte streams in tests.
//!
//! | Trait | Implementation | Feature |
//! |-------|----------------|---------|
//! | [`CanTransceiver`] | [`SocketCanTransceiver`] | `socketcan` |
//! | [`SerialTransport`] | [`SerialPortTransport`] | `rtu` |
//!
//! Both calls must return immediately; neither may block the loop.

use crate::error::GatewayResult;
use crate::j1939::CanFrame;

/// Controller error counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CanErrorStatus {
    /// Bus errors observed since the transceiver was opened
    pub bus_errors: u32,
    pub error_passive: bool,
    pub bus_off: bool,
}

/// Non-blocking CAN receiver
pub trait CanTransceiver {
    /// Next received frame, or `None` if the receive queue is empty
    fn receive(&mut self) -> Option<CanFrame>;

    /// Current controller error status
    fn poll_errors(&mut self) -> CanErrorStatus;
}

/// Non-blocking byte-oriented serial line
pub trait SerialTransport {
    /// Copy whatever bytes are currently available into `buf`; returns the
    /// count (0 when the line is idle).
    fn read_available(&mut self, buf: &mut [u8]) -> GatewayResult<usize>;

    /// Transmit a complete frame
    fn write(&mut self, bytes: &[u8]) -> GatewayResult<()>;
}

/// Controller condition carried by a CAN error frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanFault {
    /// Protocol violation, missing ACK, lost arbitration or similar
    BusError,
    /// Error counters crossed the warning level
    ErrorWarning,
    ErrorPassive,
    /// Back to error-active
    ErrorActive,
    BusOff,
    /// Controller restarted after bus-off
    Restarted,
}

/// Folds error frames and read failures into a [`CanErrorStatus`].
///
/// A persistent read failure (interface down) is latched: it is reported
/// once, counted once, and cleared by the next successful read.
#[derive(Debug, Clone, Default)]
pub struct CanErrorTracker {
    status: CanErrorStatus,
    read_failing: bool,
}

impl CanErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> CanErrorStatus {
        self.status
    }

    /// Apply one error-frame condition; returns true if the status changed
    /// in a way worth logging.
    pub fn record_fault(&mut self, fault: CanFault) -> bool {
        let s = &mut self.status;
        match fault {
            CanFault::BusError | CanFault::ErrorWarning => {
                s.bus_errors = s.bus_errors.saturating_add(1);
                true
            }
            CanFault::ErrorPassive => {
                s.bus_errors = s.bus_errors.saturating_add(1);
                !std::mem::replace(&mut s.error_passive, true)
            }
            CanFault::ErrorActive => std::mem::replace(&mut s.error_passive, false),
            CanFault::BusOff => {
                if s.bus_off {
                    return false;
                }
                s.bus_off = true;
                s.bus_errors = s.bus_errors.saturating_add(1);
                true
            }
            CanFault::Restarted => {
                let changed = s.bus_off || s.error_passive;
                s.bus_off = false;
                s.error_passive = false;
                changed
            }
        }
    }

    /// Record a failed socket read; returns true only for the first failure
    /// of a run. `link_down` marks the interface as down (bus-off).
    pub fn record_read_error(&mut self, link_down: bool) -> bool {
        if self.read_failing {
            return false;
        }
        self.read_failing = true;
        self.status.bus_errors = self.status.bus_errors.saturating_add(1);
        if link_down {
            self.status.bus_off = true;
        }
        true
    }

    /// Record a successful read (frame or empty queue); returns true if this
    /// ends a run of read failures.
    pub fn record_read_ok(&mut self) -> bool {
        if !self.read_failing {
            return false;
        }
        self.read_failing = false;
        self.status.bus_off = false;
        true
    }
}

impl<T: CanTransceiver + ?Sized> CanTransceiver for Box<T> {
    fn receive(&mut self) -> Option<CanFrame> {
        (**self).receive()
    }

    fn poll_errors(&mut self) -> CanErrorStatus {
        (**self).poll_errors()
    }
}

impl<T: SerialTransport + ?Sized> SerialTransport for Box<T> {
    fn read_available(&mut self, buf: &mut [u8]) -> GatewayResult<usize> {
        (**self).read_available(buf)
    }

    fn write(&mut self, bytes: &[u8]) -> GatewayResult<()> {
        (**self).write(bytes)
    }
}

#[cfg(feature = "socketcan")]
pub use self::socketcan_impl::SocketCanTransceiver;

#[cfg(feature = "socketcan")]
mod socketcan_impl {
    use std::io;

    use socketcan::errors::{CanError, ControllerProblem};
    use socketcan::{CanSocket, EmbeddedFrame, Id, Socket, SocketOptions};
    use tracing::{debug, info, warn};

    use super::{CanErrorStatus, CanErrorTracker, CanFault, CanTransceiver};
    use crate::error::{GatewayError, GatewayResult};
    use crate::j1939::CanFrame;

    /// Linux SocketCAN receiver. The interface bitrate (250 kbit/s for
    /// J1939) is configured outside the process; no acceptance filter is set
    /// and all controller error frames are delivered.
    pub struct SocketCanTransceiver {
        socket: CanSocket,
        interface: String,
        errors: CanErrorTracker,
    }

    impl SocketCanTransceiver {
        /// Open `interface` in non-blocking mode
        pub fn open(interface: &str) -> GatewayResult<Self> {
            let socket = CanSocket::open(interface).map_err(|e| {
                GatewayError::can(format!("failed to open CAN interface {}: {}", interface, e))
            })?;
            socket.set_nonblocking(true).map_err(|e| {
                GatewayError::can(format!(
                    "failed to set {} non-blocking: {}",
                    interface, e
                ))
            })?;
            socket.set_error_filter_accept_all().map_err(|e| {
                GatewayError::can(format!(
                    "failed to enable error frames on {}: {}",
                    interface, e
                ))
            })?;
            info!("CAN interface {} opened", interface);

            Ok(Self {
                socket,
                interface: interface.to_string(),
                errors: CanErrorTracker::new(),
            })
        }

        pub fn interface(&self) -> &str {
            &self.interface
        }

        fn record_error_frame(&mut self, error: CanError) {
            let Some(fault) = classify(&error) else {
                debug!("CAN error frame on {}: {}", self.interface, error);
                return;
            };
            if self.errors.record_fault(fault) {
                debug!("CAN error frame on {}: {}", self.interface, error);
            }
        }
    }

    /// Map a decoded error frame onto the controller condition it reports
    fn classify(error: &CanError) -> Option<CanFault> {
        match error {
            CanError::BusOff => Some(CanFault::BusOff),
            CanError::Restarted => Some(CanFault::Restarted),
            CanError::ControllerProblem(problem) => match problem {
                ControllerProblem::ReceiveErrorPassive | ControllerProblem::TransmitErrorPassive => {
                    Some(CanFault::ErrorPassive)
                }
                ControllerProblem::ReceiveErrorWarning | ControllerProblem::TransmitErrorWarning => {
                    Some(CanFault::ErrorWarning)
                }
                ControllerProblem::Active => Some(CanFault::ErrorActive),
                _ => Some(CanFault::BusError),
            },
            CanError::DecodingFailure(_) => None,
            _ => Some(CanFault::BusError),
        }
    }

    impl CanTransceiver for SocketCanTransceiver {
        fn receive(&mut self) -> Option<CanFrame> {
            loop {
                let result = self.socket.read_frame();
                if !matches!(&result, Err(e) if e.kind() != io::ErrorKind::WouldBlock)
                    && self.errors.record_read_ok()
                {
                    info!("CAN interface {} readable again", self.interface);
                }

                match result {
                    Ok(socketcan::CanFrame::Data(frame)) => {
                        let converted = match frame.id() {
                            Id::Extended(id) => CanFrame::new_extended(id.as_raw(), frame.data()),
                            Id::Standard(id) => CanFrame::new_standard(id.as_raw(), frame.data()),
                        };
                        match converted {
                            Ok(frame) => return Some(frame),
                            Err(e) => debug!("dropping CAN frame: {}", e),
                        }
                    }
                    Ok(socketcan::CanFrame::Remote(_)) => continue,
                    Ok(socketcan::CanFrame::Error(frame)) => {
                        self.record_error_frame(CanError::from(frame));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                    Err(e) => {
                        let link_down = e.raw_os_error() == Some(libc::ENETDOWN);
                        if self.errors.record_read_error(link_down) {
                            warn!("CAN read error on {}: {}", self.interface, e);
                        }
                        return None;
                    }
                }
            }
        }

        fn poll_errors(&mut self) -> CanErrorStatus {
            self.errors.status()
        }
    }
}

#[cfg(feature = "rtu")]
pub use self::serial_impl::SerialPortTransport;

#[cfg(feature = "rtu")]
mod serial_impl {
    use std::io::{Read, Write};
    use std::time::Duration;

    use tracing::info;

    use super::SerialTransport;
    use crate::config::{SerialParity, SerialSettings};
    use crate::error::{GatewayError, GatewayResult};

    /// RS-485 line opened through `tokio-serial`'s blocking port API, polled
    /// with `bytes_to_read` so reads never wait.
    pub struct SerialPortTransport {
        port: Box<dyn tokio_serial::SerialPort>,
        name: String,
    }

    impl SerialPortTransport {
        pub fn open(settings: &SerialSettings) -> GatewayResult<Self> {
            let data_bits = match settings.data_bits {
                7 => tokio_serial::DataBits::Seven,
                _ => tokio_serial::DataBits::Eight,
            };
            let parity = match settings.parity {
                SerialParity::None => tokio_serial::Parity::None,
                SerialParity::Even => tokio_serial::Parity::Even,
                SerialParity::Odd => tokio_serial::Parity::Odd,
            };
            let stop_bits = match settings.stop_bits {
                2 => tokio_serial::StopBits::Two,
                _ => tokio_serial::StopBits::One,
            };

            let port = tokio_serial::new(&settings.port, settings.baud_rate)
                .data_bits(data_bits)
                .parity(parity)
                .stop_bits(stop_bits)
                .timeout(Duration::from_millis(100))
                .open()
                .map_err(|e| {
                    GatewayError::serial(format!(
                        "failed to open serial port {}: {}",
                        settings.port, e
                    ))
                })?;
            info!(
                "serial port {} opened at {} baud",
                settings.port, settings.baud_rate
            );

            Ok(Self {
                port,
                name: settings.port.clone(),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl SerialTransport for SerialPortTransport {
        fn read_available(&mut self, buf: &mut [u8]) -> GatewayResult<usize> {
            let pending = self
                .port
                .bytes_to_read()
                .map_err(|e| GatewayError::serial(format!("{}: {}", self.name, e)))?
                as usize;
            if pending == 0 {
                return Ok(0);
            }
            let n = pending.min(buf.len());
            Ok(self.port.read(&mut buf[..n])?)
        }

        fn write(&mut self, bytes: &[u8]) -> GatewayResult<()> {
            self.port.write_all(bytes)?;
            self.port.flush()?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_frames_set_status() {
        let mut tracker = CanErrorTracker::new();
        assert!(tracker.record_fault(CanFault::BusError));
        assert!(tracker.record_fault(CanFault::ErrorPassive));
        assert!(!tracker.record_fault(CanFault::ErrorPassive));

        let status = tracker.status();
        assert_eq!(status.bus_errors, 3);
        assert!(status.error_passive);
        assert!(!status.bus_off);

        assert!(tracker.record_fault(CanFault::ErrorActive));
        assert!(!tracker.status().error_passive);
    }

    #[test]
    fn test_bus_off_latched_until_restart() {
        let mut tracker = CanErrorTracker::new();
        assert!(tracker.record_fault(CanFault::BusOff));
        assert!(!tracker.record_fault(CanFault::BusOff));
        assert!(tracker.status().bus_off);
        assert_eq!(tracker.status().bus_errors, 1);

        assert!(tracker.record_fault(CanFault::Restarted));
        assert!(!tracker.status().bus_off);
        assert!(!tracker.record_fault(CanFault::Restarted));
    }

    #[test]
    fn test_persistent_read_error_counted_once() {
        let mut tracker = CanErrorTracker::new();
        let reported = (0..2000)
            .filter(|_| tracker.record_read_error(true))
            .count();

        assert_eq!(reported, 1);
        assert_eq!(tracker.status().bus_errors, 1);
        assert!(tracker.status().bus_off);

        assert!(tracker.record_read_ok());
        assert!(!tracker.record_read_ok());
        assert!(!tracker.status().bus_off);

        // A new outage is reported again
        assert!(tracker.record_read_error(false));
        assert_eq!(tracker.status().bus_errors, 2);
        assert!(!tracker.status().bus_off);
    }
}
