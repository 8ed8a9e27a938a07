//! Binary telemetry push frames.
//!
//! While monitoring is enabled the device pushes unsolicited binary frames
//! with no cid. Byte 0 is the discriminator:
//! - `1`: button state (8 bytes)
//! - `2`: button performance (12-byte header + 24-byte records)
//!
//! All structs are `#pragma pack(1)` on the firmware side and little-endian.
//! Decoders never fail loudly: a malformed frame yields `None` and a warning.

use serde::Serialize;
use tracing::warn;

/// Discriminator for button-state frames.
pub const BUTTON_STATE_CMD: u8 = 1;
/// Discriminator for button-performance frames.
pub const BUTTON_PERFORMANCE_CMD: u8 = 2;

/// Size of a button-state frame.
pub const BUTTON_STATE_LEN: usize = 8;
/// Size of the button-performance header.
pub const PERFORMANCE_HEADER_LEN: usize = 12;
/// Size of one button-performance record.
pub const PERFORMANCE_RECORD_LEN: usize = 24;

/// Maximum number of buttons a trigger mask can describe.
pub const MASK_BITS: u32 = 32;

/// Live trigger state of all buttons.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonStateFrame {
    pub command: u8,
    pub is_active: bool,
    pub trigger_mask: u32,
    pub total_buttons: u8,
}

/// Travel measurements for a single button.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonPerformanceRecord {
    pub button_index: u8,
    pub virtual_pin: u8,
    pub is_pressed: bool,
    /// Current physical travel (mm).
    pub current_distance: f32,
    pub press_trigger_distance: f32,
    pub press_start_distance: f32,
    pub release_trigger_distance: f32,
    pub release_start_distance: f32,
}

/// Performance snapshot for the buttons reported in this push.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonPerformanceFrame {
    pub command: u8,
    pub is_active: bool,
    pub button_count: u8,
    /// Device tick (ms).
    pub timestamp: u32,
    /// Maximum physical travel of the active switch mapping (mm).
    pub max_travel_distance: f32,
    pub buttons: Vec<ButtonPerformanceRecord>,
}

/// Any decoded push frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TelemetryFrame {
    ButtonState(ButtonStateFrame),
    ButtonPerformance(ButtonPerformanceFrame),
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_f32(buf: &[u8], offset: usize) -> f32 {
    f32::from_bits(read_u32(buf, offset))
}

/// Decode a button-state frame.
///
/// Layout: command@0, isActive@1, triggerMask@2..6, totalButtons@6, reserved@7.
pub fn decode_button_state(buf: &[u8]) -> Option<ButtonStateFrame> {
    if buf.len() < BUTTON_STATE_LEN {
        warn!(
            len = buf.len(),
            expected = BUTTON_STATE_LEN,
            "button state frame too short"
        );
        return None;
    }

    Some(ButtonStateFrame {
        command: buf[0],
        is_active: buf[1] != 0,
        trigger_mask: read_u32(buf, 2),
        total_buttons: buf[6],
    })
}

/// Decode a button-performance frame.
///
/// Header: command@0, isActive@1, buttonCount@2, reserved@3, timestamp@4,
/// maxTravelDistance@8. Each record: buttonIndex@0, virtualPin@1,
/// isPressed@2, then five f32 distances starting at @3, reserved@23.
pub fn decode_button_performance(buf: &[u8]) -> Option<ButtonPerformanceFrame> {
    if buf.len() < PERFORMANCE_HEADER_LEN {
        warn!(
            len = buf.len(),
            expected = PERFORMANCE_HEADER_LEN,
            "button performance header too short"
        );
        return None;
    }

    let button_count = buf[2];
    let expected = PERFORMANCE_HEADER_LEN + usize::from(button_count) * PERFORMANCE_RECORD_LEN;
    if buf.len() < expected {
        warn!(
            len = buf.len(),
            expected,
            button_count,
            "button performance frame truncated"
        );
        return None;
    }

    let buttons = buf[PERFORMANCE_HEADER_LEN..expected]
        .chunks_exact(PERFORMANCE_RECORD_LEN)
        .map(|rec| ButtonPerformanceRecord {
            button_index: rec[0],
            virtual_pin: rec[1],
            is_pressed: rec[2] != 0,
            current_distance: read_f32(rec, 3),
            press_trigger_distance: read_f32(rec, 7),
            press_start_distance: read_f32(rec, 11),
            release_trigger_distance: read_f32(rec, 15),
            release_start_distance: read_f32(rec, 19),
        })
        .collect();

    Some(ButtonPerformanceFrame {
        command: buf[0],
        is_active: buf[1] != 0,
        button_count,
        timestamp: read_u32(buf, 4),
        max_travel_distance: read_f32(buf, 8),
        buttons,
    })
}

/// Branch on the discriminator byte and decode.
pub fn decode_frame(buf: &[u8]) -> Option<TelemetryFrame> {
    match buf.first() {
        Some(&BUTTON_STATE_CMD) => decode_button_state(buf).map(TelemetryFrame::ButtonState),
        Some(&BUTTON_PERFORMANCE_CMD) => {
            decode_button_performance(buf).map(TelemetryFrame::ButtonPerformance)
        }
        Some(&other) => {
            warn!(discriminator = other, len = buf.len(), "unknown telemetry frame");
            None
        }
        None => {
            warn!("empty telemetry frame");
            None
        }
    }
}

/// Indices of the triggered buttons among the first `total_buttons` bits.
pub fn mask_to_button_indices(mask: u32, total_buttons: u32) -> Vec<u32> {
    (0..total_buttons.min(MASK_BITS))
        .filter(|&i| mask & (1 << i) != 0)
        .collect()
}

/// 32-character binary rendering of a trigger mask, MSB first.
pub fn mask_to_binary_string(mask: u32) -> String {
    format!("{mask:032b}")
}

/// Whether button `index` is set in `mask`. Out-of-range indices are never set.
pub fn is_button_triggered(mask: u32, index: i64) -> bool {
    if !(0..i64::from(MASK_BITS)).contains(&index) {
        return false;
    }
    mask & (1u32 << index) != 0
}

/// Kind of change between two successive button-state frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ButtonEventKind {
    ButtonPress,
    ButtonRelease,
    /// Any change in the mask; emitted once after the per-button events.
    ButtonChange,
}

/// A button transition derived from consecutive state frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonEvent {
    pub kind: ButtonEventKind,
    /// `None` for [`ButtonEventKind::ButtonChange`].
    pub button_index: Option<u32>,
    pub is_pressed: bool,
    pub trigger_mask: u32,
    pub total_buttons: u8,
}

/// Turns a stream of button-state frames into press/release events.
#[derive(Debug, Default)]
pub struct ButtonTransitionTracker {
    previous_mask: u32,
}

impl ButtonTransitionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next frame; returns the transitions since the last one.
    pub fn observe(&mut self, frame: &ButtonStateFrame) -> Vec<ButtonEvent> {
        let current = frame.trigger_mask;
        let previous = std::mem::replace(&mut self.previous_mask, current);
        if current == previous {
            return Vec::new();
        }

        let mut events: Vec<ButtonEvent> = (0..u32::from(frame.total_buttons).min(MASK_BITS))
            .filter(|&i| (current ^ previous) & (1 << i) != 0)
            .map(|i| {
                let is_pressed = current & (1 << i) != 0;
                ButtonEvent {
                    kind: if is_pressed {
                        ButtonEventKind::ButtonPress
                    } else {
                        ButtonEventKind::ButtonRelease
                    },
                    button_index: Some(i),
                    is_pressed,
                    trigger_mask: current,
                    total_buttons: frame.total_buttons,
                }
            })
            .collect();

        events.push(ButtonEvent {
            kind: ButtonEventKind::ButtonChange,
            button_index: None,
            is_pressed: current != 0,
            trigger_mask: current,
            total_buttons: frame.total_buttons,
        });
        events
    }

    /// Forget the last mask, e.g. when monitoring restarts.
    pub fn reset(&mut self) {
        self.previous_mask = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_frame(is_active: u8, mask: u32, total: u8) -> Vec<u8> {
        let mut buf = vec![BUTTON_STATE_CMD, is_active];
        buf.extend_from_slice(&mask.to_le_bytes());
        buf.push(total);
        buf.push(0);
        buf
    }

    fn perf_record(index: u8, pin: u8, pressed: u8, distances: [f32; 5]) -> Vec<u8> {
        let mut rec = vec![index, pin, pressed];
        for d in distances {
            rec.extend_from_slice(&d.to_le_bytes());
        }
        rec.push(0);
        rec
    }

    fn perf_header(count: u8, timestamp: u32, max_travel: f32) -> Vec<u8> {
        let mut buf = vec![BUTTON_PERFORMANCE_CMD, 1, count, 0];
        buf.extend_from_slice(&timestamp.to_le_bytes());
        buf.extend_from_slice(&max_travel.to_le_bytes());
        buf
    }

    #[test]
    fn button_state_rejects_seven_bytes() {
        let buf = state_frame(1, 5, 8);
        assert_eq!(decode_button_state(&buf[..7]), None);
    }

    #[test]
    fn button_state_decodes_fields() {
        let frame = decode_button_state(&state_frame(1, 0x0000_0005, 8)).unwrap();
        assert_eq!(frame.command, BUTTON_STATE_CMD);
        assert!(frame.is_active);
        assert_eq!(frame.trigger_mask, 5);
        assert_eq!(frame.total_buttons, 8);
    }

    #[test]
    fn button_state_any_nonzero_is_active() {
        assert!(decode_button_state(&state_frame(0x80, 0, 1)).unwrap().is_active);
        assert!(!decode_button_state(&state_frame(0, 0, 1)).unwrap().is_active);
    }

    #[test]
    fn performance_rejects_short_header() {
        let header = perf_header(0, 0, 4.0);
        assert_eq!(decode_button_performance(&header[..11]), None);
    }

    #[test]
    fn performance_rejects_truncated_records() {
        let mut buf = perf_header(2, 1000, 4.0);
        buf.extend(perf_record(0, 3, 1, [1.5, 1.0, 0.5, 0.75, 1.25]));
        buf.extend(perf_record(1, 4, 0, [0.0; 5]));
        assert_eq!(buf.len(), 60);
        assert_eq!(decode_button_performance(&buf[..59]), None);
    }

    #[test]
    fn performance_decodes_two_records() {
        let mut buf = perf_header(2, 123_456, 4.0);
        buf.extend(perf_record(0, 3, 1, [1.5, 1.0, 0.5, 0.75, 1.25]));
        buf.extend(perf_record(7, 9, 0, [0.25, 2.0, 0.125, 3.5, 4.0]));
        assert_eq!(buf.len(), 60);

        let frame = decode_button_performance(&buf).unwrap();
        assert!(frame.is_active);
        assert_eq!(frame.button_count, 2);
        assert_eq!(frame.timestamp, 123_456);
        assert_eq!(frame.max_travel_distance, 4.0);
        assert_eq!(frame.buttons.len(), 2);

        let first = &frame.buttons[0];
        assert_eq!(first.button_index, 0);
        assert_eq!(first.virtual_pin, 3);
        assert!(first.is_pressed);
        assert_eq!(first.current_distance, 1.5);
        assert_eq!(first.press_trigger_distance, 1.0);
        assert_eq!(first.press_start_distance, 0.5);
        assert_eq!(first.release_trigger_distance, 0.75);
        assert_eq!(first.release_start_distance, 1.25);

        let second = &frame.buttons[1];
        assert_eq!(second.button_index, 7);
        assert_eq!(second.virtual_pin, 9);
        assert!(!second.is_pressed);
        assert_eq!(second.release_start_distance, 4.0);
    }

    #[test]
    fn performance_ignores_trailing_bytes() {
        let mut buf = perf_header(1, 1, 4.0);
        buf.extend(perf_record(2, 2, 2, [0.0; 5]));
        buf.extend_from_slice(&[0xAA; 5]);
        let frame = decode_button_performance(&buf).unwrap();
        assert_eq!(frame.buttons.len(), 1);
        assert!(frame.buttons[0].is_pressed);
    }

    #[test]
    fn decode_frame_branches_on_discriminator() {
        match decode_frame(&state_frame(1, 1, 4)) {
            Some(TelemetryFrame::ButtonState(f)) => assert_eq!(f.trigger_mask, 1),
            other => panic!("unexpected {other:?}"),
        }
        let header = perf_header(0, 7, 4.0);
        match decode_frame(&header) {
            Some(TelemetryFrame::ButtonPerformance(f)) => assert_eq!(f.timestamp, 7),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(decode_frame(&[9, 0, 0, 0, 0, 0, 0, 0]), None);
        assert_eq!(decode_frame(&[]), None);
    }

    #[test]
    fn mask_helpers() {
        assert_eq!(mask_to_button_indices(0b1010_0101, 8), vec![0, 2, 5, 7]);
        assert_eq!(mask_to_button_indices(0b1010_0101, 3), vec![0, 2]);
        assert_eq!(mask_to_button_indices(0x8000_0000, 64), vec![31]);
        assert_eq!(mask_to_button_indices(u32::MAX, 0), Vec::<u32>::new());

        assert_eq!(
            mask_to_binary_string(5),
            "00000000000000000000000000000101"
        );
        assert_eq!(mask_to_binary_string(u32::MAX).len(), 32);

        assert!(is_button_triggered(5, 0));
        assert!(!is_button_triggered(5, 1));
        assert!(is_button_triggered(0x8000_0000, 31));
        assert!(!is_button_triggered(u32::MAX, 32));
        assert!(!is_button_triggered(u32::MAX, -1));
    }

    #[test]
    fn tracker_emits_press_release_and_change() {
        let mut tracker = ButtonTransitionTracker::new();
        let pressed = decode_button_state(&state_frame(1, 0b0101, 8)).unwrap();
        let events = tracker.observe(&pressed);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].kind, ButtonEventKind::ButtonPress);
        assert_eq!(events[0].button_index, Some(0));
        assert_eq!(events[1].button_index, Some(2));
        assert_eq!(events[2].kind, ButtonEventKind::ButtonChange);
        assert!(events[2].is_pressed);

        assert!(tracker.observe(&pressed).is_empty());

        let released = decode_button_state(&state_frame(1, 0b0100, 8)).unwrap();
        let events = tracker.observe(&released);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, ButtonEventKind::ButtonRelease);
        assert_eq!(events[0].button_index, Some(0));
        assert!(!events[0].is_pressed);
    }
}
