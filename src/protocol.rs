//! Decoding of the telemetry frames broadcast by the EVTV Tesla BMS
//! controller.
//!
//! The controller mirrors its CAN traffic as UDP datagrams. Every datagram
//! carries the 8-byte CAN payload at offset 0 and the little-endian 32-bit
//! CAN identifier at bytes 8..12. Only five identifiers are meaningful; all
//! other traffic is dropped without error.

use serde::{Deserialize, Serialize};

/// Shortest datagram that still carries a CAN identifier.
pub const MIN_FRAME_LENGTH: usize = 12;
/// Byte offset of the little-endian CAN identifier.
const FRAME_ID_OFFSET: usize = 8;

/// Pack voltage and the unscaled current word.
pub const FRAME_PACK_VOLTAGE: u32 = 0x150;
/// Pack current, power and derived voltage.
pub const FRAME_PACK_FLOW: u32 = 0x151;
/// State of charge.
pub const FRAME_SOC: u32 = 0x650;
/// Per-cell voltage extremes and cell counts.
pub const FRAME_CELL_STATS: u32 = 0x651;
/// Charger frequency-shift voltage and TCCH current limit.
pub const FRAME_CHARGER_LIMITS: u32 = 0x683;

fn u16_le(frame: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([frame[offset], frame[offset + 1]])
}

fn i32_le(frame: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([
        frame[offset],
        frame[offset + 1],
        frame[offset + 2],
        frame[offset + 3],
    ])
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// State of charge broadcast (frame 0x650).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Soc {
    /// State of charge in percent, half-percent wire resolution.
    pub state_of_charge: f64,
}

impl Soc {
    pub fn decode(frame: &[u8]) -> Self {
        Self {
            state_of_charge: frame[0] as f64 / 2.0,
        }
    }
}

/// Per-cell voltage statistics (frame 0x651).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellStats {
    pub lowest_cell: f64,
    pub highest_cell: f64,
    pub average_cell: f64,
    pub max_cells: u8,
    pub active_cells: u8,
}

impl CellStats {
    pub fn decode(frame: &[u8]) -> Self {
        Self {
            lowest_cell: u16_le(frame, 0) as f64 / 1000.0,
            highest_cell: u16_le(frame, 2) as f64 / 1000.0,
            average_cell: u16_le(frame, 4) as f64 / 1000.0,
            max_cells: frame[6],
            active_cells: frame[7],
        }
    }
}

/// Pack current and power (frame 0x151).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackFlow {
    /// Pack current in amps, rounded to 2 decimals.
    pub current: f64,
    /// Pack power in watts, rounded to a whole number.
    pub power: f64,
    /// Pack voltage derived as power/current, rounded to 1 decimal.
    pub volts: f64,
}

impl PackFlow {
    pub fn decode(frame: &[u8]) -> Self {
        // On the wire a positive sign means the pack is sourcing current;
        // the reported sign is flipped so that positive reads as charging.
        let current = i32_le(frame, 0) as f64 / 100.0 * -1.0;
        let power = i32_le(frame, 4) as f64 / 100.0 * -1.0;
        let volts = if current != 0.0 { power / current } else { 0.0 };
        Self {
            current: round_to(current, 2),
            power: power.round(),
            volts: round_to(volts, 1),
        }
    }
}

/// Charger operating limits (frame 0x683).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargerLimits {
    pub freq_shift_volts: f64,
    pub tcch_amps: f64,
}

impl ChargerLimits {
    pub fn decode(frame: &[u8]) -> Self {
        Self {
            freq_shift_volts: u16_le(frame, 2) as f64 / 100.0,
            tcch_amps: u16_le(frame, 4) as f64 / 10.0,
        }
    }
}

/// Pack voltage summary (frame 0x150).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackVoltage {
    pub volts: f64,
    /// Unscaled current word; the wire format does not define its unit.
    pub raw_current: u16,
}

impl PackVoltage {
    pub fn decode(frame: &[u8]) -> Self {
        Self {
            volts: u16_le(frame, 2) as f64 / 10.0,
            raw_current: u16_le(frame, 0),
        }
    }
}

/// One decoded telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Telemetry {
    Soc(Soc),
    CellStats(CellStats),
    PackFlow(PackFlow),
    ChargerLimits(ChargerLimits),
    PackVoltage(PackVoltage),
}

impl Telemetry {
    /// Extracts the CAN identifier, or `None` for datagrams too short to
    /// carry one.
    pub fn frame_id(frame: &[u8]) -> Option<u32> {
        if frame.len() < MIN_FRAME_LENGTH {
            return None;
        }
        Some(u32::from_le_bytes([
            frame[FRAME_ID_OFFSET],
            frame[FRAME_ID_OFFSET + 1],
            frame[FRAME_ID_OFFSET + 2],
            frame[FRAME_ID_OFFSET + 3],
        ]))
    }

    /// Decodes one datagram.
    ///
    /// Returns `None` for datagrams shorter than [`MIN_FRAME_LENGTH`] and for
    /// unrecognized identifiers. Recognized frames always decode: the fixed
    /// offsets all fall within the guaranteed minimum length, so no further
    /// bounds validation is performed.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let id = match Self::frame_id(frame) {
            Some(id) => id,
            None => {
                log::warn!("Ignored short frame (length={})", frame.len());
                return None;
            }
        };
        match id {
            FRAME_SOC => Some(Telemetry::Soc(Soc::decode(frame))),
            FRAME_CELL_STATS => Some(Telemetry::CellStats(CellStats::decode(frame))),
            FRAME_PACK_FLOW => Some(Telemetry::PackFlow(PackFlow::decode(frame))),
            FRAME_CHARGER_LIMITS => Some(Telemetry::ChargerLimits(ChargerLimits::decode(frame))),
            FRAME_PACK_VOLTAGE => Some(Telemetry::PackVoltage(PackVoltage::decode(frame))),
            _ => {
                log::debug!("Ignored unrecognized frame id {id:#05x}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: u32, payload: [u8; 8]) -> Vec<u8> {
        let mut frame = payload.to_vec();
        frame.extend_from_slice(&id.to_le_bytes());
        frame
    }

    #[test]
    fn test_short_frames_rejected() {
        for len in 0..MIN_FRAME_LENGTH {
            assert_eq!(Telemetry::decode(&vec![0xff; len]), None);
        }
    }

    #[test]
    fn test_unrecognized_id_rejected() {
        for id in [0x000, 0x152, 0x652, 0x7ff, 0xffff_ffff] {
            assert_eq!(Telemetry::decode(&frame(id, [0; 8])), None);
        }
    }

    #[test]
    fn test_soc_half_percent_scale() {
        let decoded = Telemetry::decode(&frame(FRAME_SOC, [100, 0, 0, 0, 0, 0, 0, 0]));
        assert_eq!(
            decoded,
            Some(Telemetry::Soc(Soc {
                state_of_charge: 50.0
            }))
        );
    }

    #[test]
    fn test_cell_stats_millivolt_scale() {
        // 1000 mV, 4100 mV, 3800 mV, 96 cells, 94 active
        let decoded = Telemetry::decode(&frame(
            FRAME_CELL_STATS,
            [0xE8, 0x03, 0x04, 0x10, 0xD8, 0x0E, 96, 94],
        ));
        assert_eq!(
            decoded,
            Some(Telemetry::CellStats(CellStats {
                lowest_cell: 1.0,
                highest_cell: 4.1,
                average_cell: 3.8,
                max_cells: 96,
                active_cells: 94,
            }))
        );
    }

    #[test]
    fn test_pack_flow_sign_flip() {
        // current raw 100 -> -1.0 A, power raw 200 -> -2 W, volts -2/-1 = 2.0
        let decoded = Telemetry::decode(&frame(FRAME_PACK_FLOW, [100, 0, 0, 0, 200, 0, 0, 0]));
        assert_eq!(
            decoded,
            Some(Telemetry::PackFlow(PackFlow {
                current: -1.0,
                power: -2.0,
                volts: 2.0,
            }))
        );
    }

    #[test]
    fn test_pack_flow_negative_raw_current() {
        // raw -500 -> 5.0 A after the flip
        let raw: i32 = -500;
        let mut payload = [0u8; 8];
        payload[0..4].copy_from_slice(&raw.to_le_bytes());
        let decoded = Telemetry::decode(&frame(FRAME_PACK_FLOW, payload));
        match decoded {
            Some(Telemetry::PackFlow(flow)) => {
                assert_eq!(flow.current, 5.0);
                assert_eq!(flow.power, 0.0);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_pack_flow_zero_current_volts_guard() {
        let decoded = Telemetry::decode(&frame(FRAME_PACK_FLOW, [0, 0, 0, 0, 200, 0, 0, 0]));
        match decoded {
            Some(Telemetry::PackFlow(flow)) => assert_eq!(flow.volts, 0.0),
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn test_charger_limits_scales() {
        // 25000/100 = 250.0 V, 120/10 = 12.0 A
        let decoded = Telemetry::decode(&frame(
            FRAME_CHARGER_LIMITS,
            [0, 0, 0xA8, 0x61, 120, 0, 0, 0],
        ));
        assert_eq!(
            decoded,
            Some(Telemetry::ChargerLimits(ChargerLimits {
                freq_shift_volts: 250.0,
                tcch_amps: 12.0,
            }))
        );
    }

    #[test]
    fn test_pack_voltage_decivolt_scale() {
        // raw current word 1234, 3859/10 = 385.9 V
        let decoded = Telemetry::decode(&frame(
            FRAME_PACK_VOLTAGE,
            [0xD2, 0x04, 0x13, 0x0F, 0, 0, 0, 0],
        ));
        assert_eq!(
            decoded,
            Some(Telemetry::PackVoltage(PackVoltage {
                volts: 385.9,
                raw_current: 1234,
            }))
        );
    }

    #[test]
    fn test_oversized_frame_still_decodes() {
        let mut oversized = frame(FRAME_SOC, [180, 0, 0, 0, 0, 0, 0, 0]);
        oversized.extend_from_slice(&[0xAA; 20]);
        assert_eq!(
            Telemetry::decode(&oversized),
            Some(Telemetry::Soc(Soc {
                state_of_charge: 90.0
            }))
        );
    }
}
