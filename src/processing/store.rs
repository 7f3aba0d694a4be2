//! Latest-reading store shared between message intake and the fusion loop
//!
//! Each channel sits behind its own lock so a GPS write never blocks an IMU
//! read. Readings are small `Copy` values; every critical section is a single
//! copy, so a poisoned lock still holds a consistent value and is recovered.

use crate::core::{GpsReading, ImuReading, SensorReading, UwbReading};
use crate::utils::config::InitialReadings;
use std::sync::RwLock;

/// Copy of all three channels taken by the fusion loop.
///
/// Channels are read one after another, not under a common lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub gps: GpsReading,
    pub imu: ImuReading,
    pub uwb: UwbReading,
}

/// Most recent reading per channel, last write wins
#[derive(Debug)]
pub struct SensorStore {
    gps: RwLock<GpsReading>,
    imu: RwLock<ImuReading>,
    uwb: RwLock<UwbReading>,
}

impl SensorStore {
    /// Create store seeded with the given readings
    pub fn new(initial: &InitialReadings) -> Self {
        Self {
            gps: RwLock::new(initial.gps),
            imu: RwLock::new(initial.imu),
            uwb: RwLock::new(initial.uwb),
        }
    }

    /// Replace the reading of the channel `reading` belongs to
    pub fn set(&self, reading: SensorReading) {
        match reading {
            SensorReading::Gps(gps) => self.set_gps(gps),
            SensorReading::Imu(imu) => self.set_imu(imu),
            SensorReading::Uwb(uwb) => self.set_uwb(uwb),
        }
    }

    pub fn set_gps(&self, reading: GpsReading) {
        write(&self.gps, reading);
    }

    pub fn set_imu(&self, reading: ImuReading) {
        write(&self.imu, reading);
    }

    pub fn set_uwb(&self, reading: UwbReading) {
        write(&self.uwb, reading);
    }

    pub fn gps(&self) -> GpsReading {
        read(&self.gps)
    }

    pub fn imu(&self) -> ImuReading {
        read(&self.imu)
    }

    pub fn uwb(&self) -> UwbReading {
        read(&self.uwb)
    }

    /// Read all channels
    pub fn snapshot(&self) -> SensorSnapshot {
        SensorSnapshot {
            gps: self.gps(),
            imu: self.imu(),
            uwb: self.uwb(),
        }
    }
}

impl Default for SensorStore {
    fn default() -> Self {
        Self::new(&InitialReadings::default())
    }
}

fn read<T: Copy>(slot: &RwLock<T>) -> T {
    *slot.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(slot: &RwLock<T>, value: T) {
    *slot.write().unwrap_or_else(|e| e.into_inner()) = value;
}
