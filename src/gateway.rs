//! Cooperative control loop
//!
//! [`Gateway`] ties the pieces together on a single task:
//!
//! 1. drain the CAN receive queue through the J1939 decoder into the store
//! 2. check the CAN controller error status
//! 3. run the staleness monitor
//! 4. service the RS-485 line once
//! 5. emit the periodic engine summary
//!
//! Nothing in [`Gateway::poll_once`] blocks, and no per-frame error stops the
//! loop. The decoder and the register projector share the task, so the
//! engine state needs no locking.

use std::future::Future;
use std::time::Instant;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::constants::MAX_CAN_FRAMES_PER_POLL;
use crate::error::GatewayResult;
use crate::j1939::decode;
use crate::registers::{project, RegisterMap};
use crate::server::{RtuServer, ServerStats};
use crate::staleness::StalenessMonitor;
use crate::state::{EngineState, EngineStore};
use crate::transport::{CanErrorStatus, CanTransceiver, SerialTransport};

/// CAN-side counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GatewayStats {
    pub frames_received: u64,
    /// Frames that updated the engine state
    pub frames_decoded: u64,
    /// Standard-id, unrecognized or truncated frames
    pub frames_ignored: u64,
    pub can_bus_errors: u32,
}

pub struct Gateway<C, S, K = SystemClock> {
    config: GatewayConfig,
    can: Option<C>,
    serial: S,
    clock: K,
    epoch: Instant,
    store: EngineStore,
    server: RtuServer,
    monitor: StalenessMonitor,
    stats: GatewayStats,
    can_status: CanErrorStatus,
    last_summary: Instant,
}

impl<C, S> Gateway<C, S, SystemClock>
where
    C: CanTransceiver,
    S: SerialTransport,
{
    /// Build a gateway. `can` is `None` when the CAN controller could not be
    /// brought up; the Modbus side then keeps serving a stale register map.
    pub fn new(config: GatewayConfig, can: Option<C>, serial: S) -> GatewayResult<Self> {
        Self::with_clock(config, can, serial, SystemClock)
    }
}

impl<C, S, K> Gateway<C, S, K>
where
    C: CanTransceiver,
    S: SerialTransport,
    K: Clock,
{
    pub fn with_clock(
        config: GatewayConfig,
        can: Option<C>,
        serial: S,
        clock: K,
    ) -> GatewayResult<Self> {
        config.validate()?;

        if can.is_none() {
            error!("CAN path disabled, engine data will be reported stale");
        }

        let server = RtuServer::new(config.slave_id, config.serial.baud_rate)
            .with_packet_logging(config.packet_logging);
        let monitor = StalenessMonitor::new(config.stale_timeout_ms);
        let epoch = clock.now();

        info!(
            "gateway ready: slave {}, {} baud, stale after {} ms",
            config.slave_id, config.serial.baud_rate, config.stale_timeout_ms
        );

        Ok(Self {
            config,
            can,
            serial,
            clock,
            epoch,
            store: EngineStore::new(),
            server,
            monitor,
            stats: GatewayStats::default(),
            can_status: CanErrorStatus::default(),
            last_summary: epoch,
        })
    }

    /// Milliseconds since the gateway started, wrapping at 2^32
    pub fn now_ms(&self) -> u32 {
        self.clock.now().saturating_duration_since(self.epoch).as_millis() as u32
    }

    /// One pass of the control loop
    pub fn poll_once(&mut self) {
        self.drain_can();
        self.check_can_errors();

        let now_ms = self.now_ms();
        self.monitor.tick(&mut self.store, now_ms);

        let now = self.clock.now();
        if let Err(e) = self.server.poll(&mut self.serial, &self.store, now) {
            warn!("serial transport error: {}", e);
        }

        self.maybe_log_summary(now);
    }

    /// Drive [`poll_once`](Self::poll_once) every poll interval until
    /// `shutdown` resolves.
    pub async fn run_until<F: Future>(&mut self, shutdown: F) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("control loop started, period {:?}", self.config.poll_interval);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested, control loop stopped");
                    break;
                }
                _ = ticker.tick() => self.poll_once(),
            }
        }
    }

    fn drain_can(&mut self) {
        let Some(can) = self.can.as_mut() else {
            return;
        };

        let now_ms = self.clock.now().saturating_duration_since(self.epoch).as_millis() as u32;
        for _ in 0..MAX_CAN_FRAMES_PER_POLL {
            let Some(frame) = can.receive() else {
                break;
            };
            self.stats.frames_received += 1;

            match decode(&frame) {
                Ok(decoded) => {
                    if self.store.apply(&decoded, now_ms) {
                        self.stats.frames_decoded += 1;
                        trace!("{} from {}", decoded.name, decoded.id);
                    } else {
                        self.stats.frames_ignored += 1;
                    }
                }
                Err(e) => {
                    self.stats.frames_ignored += 1;
                    trace!("CAN frame 0x{:08X} ignored: {}", frame.id(), e);
                }
            }
        }
    }

    fn check_can_errors(&mut self) {
        let Some(can) = self.can.as_mut() else {
            return;
        };

        let status = can.poll_errors();
        if status.bus_errors > self.can_status.bus_errors {
            warn!("CAN bus error count: {}", status.bus_errors);
        }
        if status.error_passive && !self.can_status.error_passive {
            warn!("CAN controller error passive");
        }
        if status.bus_off && !self.can_status.bus_off {
            error!("CAN controller bus-off");
        } else if !status.bus_off && self.can_status.bus_off {
            info!("CAN controller recovered from bus-off");
        }
        self.stats.can_bus_errors = status.bus_errors;
        self.can_status = status;
    }

    fn maybe_log_summary(&mut self, now: Instant) {
        if self.config.summary_interval.is_zero()
            || now.saturating_duration_since(self.last_summary) < self.config.summary_interval
        {
            return;
        }
        self.last_summary = now;

        let s = self.store.snapshot();
        info!(
            "RPM: {}, coolant: {:.1} C, oil: {} kPa, load: {}%{}",
            s.rpm,
            f32::from(s.coolant_temp as i16) / 10.0,
            s.oil_pressure,
            s.engine_load,
            if s.is_stale() { " (stale)" } else { "" }
        );
        debug!("modbus: {:?}", self.server.stats());
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn is_can_enabled(&self) -> bool {
        self.can.is_some()
    }

    /// Current engine state (status export)
    pub fn snapshot(&self) -> EngineState {
        self.store.snapshot()
    }

    /// JSON status document
    pub fn status_json(&self) -> GatewayResult<String> {
        self.store.snapshot().to_json()
    }

    /// Register map as a master would currently read it
    pub fn registers(&self) -> RegisterMap {
        project(&self.store.snapshot())
    }

    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    pub fn server_stats(&self) -> ServerStats {
        self.server.stats()
    }

    pub fn serial(&self) -> &S {
        &self.serial
    }

    pub fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }

    pub fn can_mut(&mut self) -> Option<&mut C> {
        self.can.as_mut()
    }

    pub fn clock(&self) -> &K {
        &self.clock
    }
}
