//! Entry type registry
//!
//! A static table maps each type code to its layout: a display name, the
//! minimum payload length the layout needs, and a pure decode function that
//! reads fields through a [`FieldReader`]. New firmware entry types are added
//! by adding a row; reconstruction and sequencing never look at type codes.
//!
//! MBB and BMS logs share one type code space, so there is a single table.
//! Revision 2 legacy logs carry free text instead and go through
//! [`text::decode_text_event`].

pub mod fields;
pub mod text;

use crate::types::{FieldValue, Fields};
use fields::{compact_hex, label, micro_trunc, milli, percent, FieldReader};

pub use text::{decode_text_event, TEXT_EVENT_CODE};

/// Type code of the system information block that carries header data in
/// compressed telemetry dumps
pub const SYSTEM_INFO_CODE: u8 = 0xFB;

/// Field layout of one entry type
pub struct EntryLayout {
    pub code: u8,
    pub name: &'static str,
    /// Payload bytes the layout reads; shorter payloads decode as truncated
    pub min_len: usize,
    decode: fn(&mut FieldReader<'_>),
}

/// Result of decoding one payload
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedPayload {
    pub name: String,
    pub fields: Fields,
    pub truncated: bool,
    /// Minimum payload length of the layout, 0 for unregistered codes
    pub min_len: usize,
    /// The type code has a registered layout
    pub known: bool,
}

/// Look up the layout for a type code
pub fn lookup(code: u8) -> Option<&'static EntryLayout> {
    LAYOUTS
        .binary_search_by_key(&code, |layout| layout.code)
        .ok()
        .map(|index| &LAYOUTS[index])
}

/// Decode a de-stuffed payload according to its type code
///
/// Unregistered codes never fail: they decode to a single `raw_hex` field.
pub fn decode_payload(code: u8, payload: &[u8]) -> DecodedPayload {
    match lookup(code) {
        Some(layout) => {
            let mut reader = FieldReader::new(payload);
            (layout.decode)(&mut reader);
            let (fields, short) = reader.finish();
            DecodedPayload {
                name: layout.name.to_string(),
                fields,
                truncated: short || payload.len() < layout.min_len,
                min_len: layout.min_len,
                known: true,
            }
        }
        None => DecodedPayload {
            name: format!("Unknown Type 0x{:02X}", code),
            fields: raw_hex_fields(payload),
            truncated: false,
            min_len: 0,
            known: false,
        },
    }
}

/// The fallback field set: the payload as hex
pub fn raw_hex_fields(payload: &[u8]) -> Fields {
    let mut fields = Fields::new();
    fields.insert("raw_hex".to_string(), FieldValue::Text(compact_hex(payload)));
    fields
}

macro_rules! layout {
    ($code:expr, $name:expr, $min_len:expr, $decode:expr) => {
        EntryLayout {
            code: $code,
            name: $name,
            min_len: $min_len,
            decode: $decode,
        }
    };
}

/// Registered layouts, sorted by type code
static LAYOUTS: &[EntryLayout] = &[
    layout!(0x01, "Board Status", 1, board_status),
    layout!(0x02, "High Throttle Disable", 0, raw_hex),
    layout!(0x03, "BMS Discharge Level", 22, discharge_level),
    layout!(0x04, "BMS Charge Full", 15, charge_event),
    layout!(0x05, "BMS Unknown Type 5", 0, raw_hex),
    layout!(0x06, "BMS Discharge Low", 15, charge_event),
    layout!(0x08, "BMS System State", 1, system_state),
    layout!(0x09, "Key State", 1, key_state),
    layout!(0x0B, "BMS SOC Adjusted for Voltage", 12, soc_adjusted),
    layout!(0x0D, "BMS Current Sensor Zeroed", 5, current_sensor_zeroed),
    layout!(0x0E, "BMS Unknown Type 14", 0, raw_hex),
    layout!(0x10, "BMS Hibernate State", 1, hibernate_state),
    layout!(0x11, "BMS Chassis Isolation Fault", 5, isolation_fault),
    layout!(0x12, "BMS Reflash", 21, reflash),
    layout!(0x13, "BMS CAN Node ID Changed", 2, can_node_id_changed),
    layout!(0x15, "BMS Contactor State", 13, contactor_state),
    layout!(0x16, "BMS Discharge Cutback", 1, discharge_cutback),
    layout!(0x18, "BMS Contactor Drive", 10, contactor_drive),
    layout!(0x1C, "MBB Unknown Type 28", 0, raw_hex),
    layout!(0x1E, "MBB Unknown Type 30", 0, raw_hex),
    layout!(0x1F, "MBB Unknown Type 31", 0, raw_hex),
    layout!(0x20, "MBB Unknown Type 32", 0, raw_hex),
    layout!(0x26, "MBB Unknown Type 38", 0, raw_hex),
    layout!(0x28, "Battery CAN Link Up", 1, module_number),
    layout!(0x29, "Battery CAN Link Down", 1, module_number),
    layout!(0x2A, "Sevcon CAN Link Up", 0, no_fields),
    layout!(0x2B, "Sevcon CAN Link Down", 0, no_fields),
    layout!(0x2C, "Riding Status", 27, riding_status),
    layout!(0x2D, "Charging Status", 14, charging_status),
    layout!(0x2F, "Sevcon Status", 5, sevcon_status),
    layout!(0x30, "Charger Status", 2, charger_status),
    layout!(0x31, "MBB BMS Isolation Fault", 0, raw_hex),
    layout!(0x33, "Battery Module Status", 20, battery_module_status),
    layout!(0x34, "Power State", 2, power_state),
    layout!(0x35, "MBB Unknown Type 53", 0, raw_hex),
    layout!(0x36, "Sevcon Power State", 1, sevcon_power_state),
    layout!(0x37, "MBB BT RX Buffer Overflow", 0, raw_hex),
    layout!(0x38, "BT RX Buffer Reset", 0, no_fields),
    layout!(0x39, "Battery Discharge Current Limited", 7, discharge_current_limited),
    layout!(0x3A, "Low Chassis Isolation", 5, low_chassis_isolation),
    layout!(0x3B, "Precharge Decay Too Steep", 0, no_fields),
    layout!(0x3C, "Disarmed Status", 27, disarmed_status),
    layout!(0x3D, "Battery Module Contactor Closed", 1, module_number),
    layout!(0x51, "Vehicle State Telemetry", 68, vehicle_state_telemetry),
    layout!(0x52, "Unknown Type 82", 0, raw_hex),
    layout!(0x54, "Sensor Data", 22, sensor_data),
    layout!(SYSTEM_INFO_CODE, "System Information", 0, system_information),
    layout!(0xFD, "Debug String", 0, debug_string),
];

// Documented types whose field meaning is not known

fn raw_hex(r: &mut FieldReader<'_>) {
    let hex = compact_hex(r.data());
    r.put("raw_hex", hex);
}

fn no_fields(_: &mut FieldReader<'_>) {}

// BMS entries

fn board_status(r: &mut FieldReader<'_>) {
    let cause = r.u8(0x00).map(u16::from);
    r.put_coded("reset_cause", cause, &[(0x04, "Software")]);
}

const BIKE_MODES: [(u16, &str); 3] = [(0x01, "Bike On"), (0x02, "Charge"), (0x03, "Idle")];

/// Cell, temperature, charge and pack fields shared by the BMS level entries
fn cell_summary(r: &mut FieldReader<'_>) {
    let low = r.u16(0x00);
    let high = r.u16(0x02);
    r.put_opt("voltage_low_cell_volts", low.map(milli));
    r.put_opt("voltage_high_cell_volts", high.map(milli));
    if let (Some(low), Some(high)) = (low, high) {
        r.put("voltage_balance_mv", i64::from(high) - i64::from(low));
    }
    let pack_temp = r.u8(0x04);
    r.put_opt("pack_temp_celsius", pack_temp);
    let bms_temp = r.u8(0x05);
    r.put_opt("bms_temp_celsius", bms_temp);
    let amp_hours = r.u32(0x06);
    r.put_opt("amp_hours", amp_hours.map(micro_trunc));
    let soc = r.u8(0x0A);
    r.put_opt("state_of_charge_percent", soc);
    let pack_voltage = r.u32(0x0B);
    r.put_opt("pack_voltage_volts", pack_voltage.map(milli));
}

fn discharge_level(r: &mut FieldReader<'_>) {
    cell_summary(r);
    let mode = r.u8(0x0F).map(u16::from);
    r.put_coded("mode", mode, &BIKE_MODES);
    let current = r.i32(0x10);
    r.put_opt("current_amps", current.map(micro_trunc));
    let unloaded = r.u16(0x14);
    r.put_opt("voltage_unloaded_cell_volts", unloaded.map(milli));
}

fn charge_event(r: &mut FieldReader<'_>) {
    cell_summary(r);
}

fn system_state(r: &mut FieldReader<'_>) {
    let on = r.bool(0x00);
    r.put_opt("system_on", on);
}

fn key_state(r: &mut FieldReader<'_>) {
    let on = r.bool(0x00);
    r.put_opt("key_on", on);
}

fn soc_adjusted(r: &mut FieldReader<'_>) {
    let old_uah = r.u32(0x00);
    r.put_opt("old_uah", old_uah);
    let old_soc = r.u8(0x04);
    r.put_opt("old_soc_percent", old_soc);
    let new_uah = r.u32(0x05);
    r.put_opt("new_uah", new_uah);
    let new_soc = r.u8(0x09);
    r.put_opt("new_soc_percent", new_soc);
    let low_cell = r.u16(0x0A);
    r.put_opt("low_cell_mv", low_cell);
}

fn current_sensor_zeroed(r: &mut FieldReader<'_>) {
    let old = r.u16(0x00);
    r.put_opt("old_mv", old);
    let new = r.u16(0x02);
    r.put_opt("new_mv", new);
    let corrfact = r.u8(0x04);
    r.put_opt("correction_factor", corrfact);
}

fn hibernate_state(r: &mut FieldReader<'_>) {
    let entering = r.bool(0x00);
    r.put_opt("entering_hibernate", entering);
}

fn isolation_fault(r: &mut FieldReader<'_>) {
    let ohms = r.u32(0x00);
    r.put_opt("isolation_ohms", ohms);
    let cell = r.u8(0x04);
    r.put_opt("cell", cell);
}

fn reflash(r: &mut FieldReader<'_>) {
    let revision = r.u8(0x00);
    r.put_opt("revision", revision);
    let build = r.text(0x01, 20);
    r.put_opt("build", build);
}

fn can_node_id_changed(r: &mut FieldReader<'_>) {
    let old = r.u8(0x00);
    r.put_opt("old_id", old);
    let new = r.u8(0x01);
    r.put_opt("new_id", new);
}

fn contactor_state(r: &mut FieldReader<'_>) {
    let closed = r.bool(0x00);
    r.put_opt("contactor_closed", closed);
    let pack = r.u32(0x01);
    let switched = r.u32(0x05);
    r.put_opt("pack_voltage_volts", pack.map(milli));
    r.put_opt("switched_voltage_volts", switched.map(milli));
    if let (Some(pack), Some(switched)) = (pack, switched) {
        r.put("precharge_percent", percent(switched as f64, pack as f64));
    }
    let discharge = r.i32(0x09);
    r.put_opt("discharge_current_amps", discharge.map(milli));
}

fn discharge_cutback(r: &mut FieldReader<'_>) {
    if let Some(raw) = r.u8(0x00) {
        r.put("cutback_raw", raw);
        r.put("cutback_percent", (f64::from(raw) / 255.0 * 100.0).round() as i64);
    }
}

fn contactor_drive(r: &mut FieldReader<'_>) {
    let pack = r.u32(0x01);
    r.put_opt("pack_voltage_volts", pack.map(milli));
    let switched = r.u32(0x05);
    r.put_opt("switched_voltage_volts", switched.map(milli));
    let duty = r.u8(0x09);
    r.put_opt("duty_cycle_percent", duty);
}

// MBB entries

fn module_number(r: &mut FieldReader<'_>) {
    let module = r.u8(0x00);
    r.put_opt("module", module);
}

/// Bit order of the contactor module flags in riding entries
const RIDING_MODS: [(u16, &str); 4] = [(0x00, "00"), (0x01, "10"), (0x02, "01"), (0x03, "11")];

/// Fields common to the riding and disarmed snapshots
fn vehicle_snapshot(r: &mut FieldReader<'_>) {
    let temp_high = r.u8(0x00);
    r.put_opt("pack_temp_high_celsius", temp_high);
    let temp_low = r.u8(0x01);
    r.put_opt("pack_temp_low_celsius", temp_low);
    let soc = r.u16(0x02);
    r.put_opt("state_of_charge_percent", soc);
    let pack_voltage = r.u32(0x04);
    r.put_opt("pack_voltage_volts", pack_voltage.map(milli));
    let motor_temp = r.i16(0x08);
    r.put_opt("motor_temp_celsius", motor_temp);
    let controller_temp = r.i16(0x0A);
    r.put_opt("controller_temp_celsius", controller_temp);
    let rpm = r.u16(0x0C);
    r.put_opt("motor_rpm", rpm);
    let ambient = r.i16(0x15);
    r.put_opt("ambient_temp_celsius", ambient);
    let odometer = r.u32(0x17);
    r.put_opt("odometer_km", odometer);
}

fn riding_status(r: &mut FieldReader<'_>) {
    vehicle_snapshot(r);
    let battery_current = r.i16(0x10);
    r.put_opt("battery_current_amps", battery_current);
    let motor_current = r.i16(0x13);
    r.put_opt("motor_current_amps", motor_current);
    if let Some(mods) = r.u8(0x12) {
        r.put("mods_raw", mods);
        r.put("mods", label(&RIDING_MODS, u16::from(mods)));
    }
}

fn disarmed_status(r: &mut FieldReader<'_>) {
    vehicle_snapshot(r);
    let battery_current = r.u8(0x10);
    r.put_opt("battery_current_amps", battery_current);
    let motor_current = r.i8(0x13);
    r.put_opt("motor_current_amps", motor_current);
    if let Some(mods) = r.u8(0x12) {
        r.put("mods_raw", mods);
        r.put("mods", format!("{:02b}", mods));
    }
}

fn charging_status(r: &mut FieldReader<'_>) {
    let temp_high = r.u8(0x00);
    r.put_opt("pack_temp_high_celsius", temp_high);
    let temp_low = r.u8(0x01);
    r.put_opt("pack_temp_low_celsius", temp_low);
    let soc = r.u16(0x02);
    r.put_opt("state_of_charge_percent", soc);
    let pack_voltage = r.u32(0x04);
    r.put_opt("pack_voltage_volts", pack_voltage.map(milli));
    let battery_current = r.i8(0x08);
    r.put_opt("battery_current_amps", battery_current);
    let mods = r.u8(0x0C);
    r.put_opt("mods", mods);
    let ambient = r.i8(0x0D);
    r.put_opt("ambient_temp_celsius", ambient);
}

const SEVCON_CAUSES: [(u16, &str); 3] = [
    (0x4681, "Preop"),
    (0x4884, "Sequence Fault"),
    (0x4981, "Throttle Fault"),
];

fn sevcon_status(r: &mut FieldReader<'_>) {
    let code = r.u16(0x00);
    r.put_opt("error_code", code);
    let sevcon_code = r.u16(0x02);
    r.put_opt("sevcon_error_code", sevcon_code);
    let reg = r.u8(0x04);
    r.put_opt("error_reg", reg);
    if let Some(sevcon_code) = sevcon_code {
        r.put("cause", label(&SEVCON_CAUSES, sevcon_code));
    }
    let data = r.data().get(0x05..).map(crate::types::hex_string);
    r.put_opt("data", data);
}

const CHARGERS: [(u16, &str); 4] = [
    (0x00, "Calex 720W"),
    (0x01, "Calex 1200W"),
    (0x02, "External Chg 0"),
    (0x03, "External Chg 1"),
];

const CHARGER_STATES: [(u16, &str); 2] = [(0x00, "Disconnected"), (0x01, "Connected")];

fn charger_status(r: &mut FieldReader<'_>) {
    let charger = r.u8(0x00).map(u16::from);
    r.put_coded("charger", charger, &CHARGERS);
    let state = r.u8(0x01).map(u16::from);
    r.put_coded("state", state, &CHARGER_STATES);
}

const MODULE_EVENTS: [(u16, &str); 3] = [
    (0x00, "Opening Contactor"),
    (0x01, "Closing Contactor"),
    (0x02, "Registered"),
];

fn battery_module_status(r: &mut FieldReader<'_>) {
    let event = r.u8(0x00).map(u16::from);
    r.put_coded("event", event, &MODULE_EVENTS);
    let module = r.u8(0x01);
    r.put_opt("module", module);

    let module_voltage = r.u32(0x02);
    r.put_opt("module_voltage_volts", module_voltage.map(milli));
    let system_max = r.u32(0x06);
    r.put_opt("system_max_volts", system_max.map(milli));
    let system_min = r.u32(0x0A);
    r.put_opt("system_min_volts", system_min.map(milli));
    let capacitor = r.u32(0x0E);
    r.put_opt("capacitor_voltage_volts", capacitor.map(milli));
    if let (Some(capacitor), Some(module_voltage)) = (capacitor, module_voltage) {
        r.put(
            "precharge_percent",
            percent(capacitor as f64, module_voltage as f64),
        );
    }
    let battery_current = r.i16(0x12);
    r.put_opt("battery_current_amps", battery_current);

    if let Some(serial) = r.data().get(0x14..).filter(|s| !s.is_empty()) {
        let text = fields::decode_text(serial);
        if !text.is_empty() && text.chars().all(|c| c.is_ascii_graphic()) {
            r.put("serial", text);
        } else {
            r.put("serial_hex", compact_hex(serial));
        }
    }
}

const POWER_SOURCES: [(u16, &str); 4] = [
    (0x01, "Key Switch"),
    (0x02, "Ext Charger 0"),
    (0x03, "Ext Charger 1"),
    (0x04, "Onboard Charger"),
];

fn power_state(r: &mut FieldReader<'_>) {
    let on = r.bool(0x00);
    r.put_opt("power_on", on);
    let cause = r.u8(0x01).map(u16::from);
    r.put_coded("cause", cause, &POWER_SOURCES);
}

fn sevcon_power_state(r: &mut FieldReader<'_>) {
    let on = r.bool(0x00);
    r.put_opt("sevcon_on", on);
}

fn discharge_current_limited(r: &mut FieldReader<'_>) {
    let limit = r.u16(0x00);
    r.put_opt("limit_amps", limit);
    let min_cell = r.u16(0x02);
    r.put_opt("min_cell_mv", min_cell);
    let temp = r.u8(0x04);
    r.put_opt("max_pack_temp_celsius", temp);
    let max_amps = r.u16(0x05);
    r.put_opt("max_amps", max_amps);
    if let (Some(limit), Some(max_amps)) = (limit, max_amps) {
        r.put("limit_percent", percent(f64::from(limit), f64::from(max_amps)));
    }
}

fn low_chassis_isolation(r: &mut FieldReader<'_>) {
    let kohms = r.u32(0x00);
    r.put_opt("isolation_kohms", kohms);
    let cell = r.u8(0x04);
    r.put_opt("cell", cell);
}

// Telemetry blocks (2025+ firmware)

fn vehicle_state_telemetry(r: &mut FieldReader<'_>) {
    let mut nested = FieldReader::new(r.data());
    let odometer = nested.u32(0);
    nested.put_opt("odometer_m", odometer);
    let soc_raw = nested.u32(4);
    nested.put_opt("soc_raw", soc_raw);
    let ambient_raw = nested.u32(8);
    nested.put_opt("ambient_temp_raw", ambient_raw);
    if let Some(state) = nested.data().get(36..40) {
        let state = fields::decode_text(state);
        nested.put("vehicle_state", state.trim());
    }
    for (i, offset) in (48..52).enumerate() {
        let temp = nested.u8(offset);
        nested.put_opt(&format!("temp_{}", i + 1), temp);
    }
    let (telemetry, _) = nested.finish();
    r.put("telemetry", telemetry);
}

fn sensor_data(r: &mut FieldReader<'_>) {
    let mut nested = FieldReader::new(r.data());
    let odometer = nested.u32(0);
    nested.put_opt("odometer_m", odometer);
    for i in 0..4 {
        let value = nested.u32(4 + 4 * i);
        nested.put_opt(&format!("sensor_{}", i + 1), value);
    }
    let status = nested.u16(20);
    nested.put_opt("status", status);
    let (sensors, _) = nested.finish();
    r.put("sensors", sensors);
}

/// Shortest printable run kept from a system information block
const SYSTEM_INFO_MIN_STRING: usize = 2;
const SERIAL_MIN_LEN: usize = 8;

fn system_information(r: &mut FieldReader<'_>) {
    let strings: Vec<String> = r
        .data()
        .split(|&b| b == 0)
        .filter(|run| {
            run.len() >= SYSTEM_INFO_MIN_STRING
                && run.iter().all(|&b| b == b' ' || b.is_ascii_graphic())
        })
        .map(|run| String::from_utf8_lossy(run).trim().to_string())
        .collect();

    let mut info = Fields::new();
    let vin = strings
        .iter()
        .find(|s| crate::formats::sections::is_vin(s))
        .cloned();
    let serial = strings
        .iter()
        .find(|s| {
            Some(*s) != vin.as_ref()
                && s.len() >= SERIAL_MIN_LEN
                && s.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .cloned();
    let firmware = strings.iter().find(|s| looks_like_version(s)).cloned();

    if let Some(vin) = vin {
        info.insert("vin".to_string(), vin.into());
    }
    if let Some(serial) = serial {
        info.insert("serial_number".to_string(), serial.into());
    }
    if let Some(firmware) = firmware {
        info.insert("firmware".to_string(), firmware.into());
    }
    info.insert("strings".to_string(), strings.join("; ").into());
    r.put("system_info", info);
}

/// A dotted numeric version such as `1.2.3`, optionally prefixed with `v`
fn looks_like_version(s: &str) -> bool {
    let digits = s.strip_prefix(['v', 'V']).unwrap_or(s);
    digits.contains('.')
        && digits.starts_with(|c: char| c.is_ascii_digit())
        && digits.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn debug_string(r: &mut FieldReader<'_>) {
    // The final byte is the string terminator
    let len = r.len().saturating_sub(1);
    let message = r.text(0, len).unwrap_or_default();
    if let Some(soc) = parse_soc_message(&message) {
        r.put("soc", soc);
    }
    r.put("message", message);
}

/// Field names of the comma separated values in `SOC:` debug strings
const SOC_FIELDS_COMPACT: [&str; 8] = [
    "soc_raw_1",
    "soc_raw_2",
    "soc_raw_3",
    "pack_voltage_mv",
    "soc_percent_1",
    "soc_percent_2",
    "soc_percent_3",
    "balance_or_current",
];

const SOC_FIELDS_EXTENDED: [&str; 12] = [
    "soc_raw_1",
    "soc_raw_2",
    "soc_raw_3",
    "pack_voltage_mv",
    "soc_percent_1",
    "soc_percent_2",
    "soc_percent_3",
    "balance_count",
    "voltage_max_mv",
    "voltage_min_1_mv",
    "voltage_min_2_mv",
    "current_ma",
];

/// Structured view of a `SOC:` debug string, when it has a known shape
fn parse_soc_message(message: &str) -> Option<Fields> {
    let values: Vec<&str> = message.strip_prefix("SOC:")?.split(',').map(str::trim).collect();
    let names: &[&str] = match values.len() {
        8 => &SOC_FIELDS_COMPACT,
        n if n >= 11 => &SOC_FIELDS_EXTENDED,
        _ => return None,
    };

    let mut soc = Fields::new();
    for (name, value) in names.iter().zip(&values) {
        let value = match value.parse::<i64>() {
            Ok(n) => FieldValue::Integer(n),
            Err(_) => FieldValue::Text(value.to_string()),
        };
        soc.insert(name.to_string(), value);
    }
    if let Some(mv) = soc.get("pack_voltage_mv").and_then(FieldValue::as_i64) {
        soc.insert("pack_voltage_volts".to_string(), FieldValue::Decimal(milli(mv)));
    }
    if let Some(ma) = soc.get("current_ma").and_then(FieldValue::as_i64) {
        soc.insert("current_amps".to_string(), FieldValue::Decimal(milli(ma)));
    }
    Some(soc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field<'a>(decoded: &'a DecodedPayload, name: &str) -> &'a FieldValue {
        decoded
            .fields
            .get(name)
            .unwrap_or_else(|| panic!("missing field {name}: {:?}", decoded.fields))
    }

    #[test]
    fn test_table_sorted_and_unique() {
        for pair in LAYOUTS.windows(2) {
            assert!(pair[0].code < pair[1].code, "0x{:02X} out of order", pair[1].code);
        }
        assert!(lookup(0x09).is_some());
        assert!(lookup(0x3E).is_none());
    }

    #[test]
    fn test_key_state() {
        let decoded = decode_payload(0x09, &[0x01]);
        assert_eq!(decoded.name, "Key State");
        assert_eq!(field(&decoded, "key_on"), &FieldValue::Bool(true));
        assert!(!decoded.truncated);
        assert!(decoded.known);
    }

    #[test]
    fn test_discharge_level_scaling() {
        let mut p = vec![0u8; 22];
        p[0x00..0x02].copy_from_slice(&3_300u16.to_le_bytes());
        p[0x02..0x04].copy_from_slice(&3_350u16.to_le_bytes());
        p[0x04] = 25;
        p[0x05] = 30;
        p[0x06..0x0A].copy_from_slice(&45_999_999u32.to_le_bytes());
        p[0x0A] = 87;
        p[0x0B..0x0F].copy_from_slice(&110_500u32.to_le_bytes());
        p[0x0F] = 0x02;
        p[0x10..0x14].copy_from_slice(&(-12_500_000i32).to_le_bytes());
        p[0x14..0x16].copy_from_slice(&3_310u16.to_le_bytes());

        let d = decode_payload(0x03, &p);
        assert!(!d.truncated);
        assert_eq!(field(&d, "voltage_low_cell_volts"), &FieldValue::Decimal(3.3));
        assert_eq!(field(&d, "voltage_high_cell_volts"), &FieldValue::Decimal(3.35));
        assert_eq!(field(&d, "voltage_balance_mv"), &FieldValue::Integer(50));
        assert_eq!(field(&d, "pack_temp_celsius"), &FieldValue::Integer(25));
        assert_eq!(field(&d, "bms_temp_celsius"), &FieldValue::Integer(30));
        assert_eq!(field(&d, "amp_hours"), &FieldValue::Integer(45));
        assert_eq!(field(&d, "state_of_charge_percent"), &FieldValue::Integer(87));
        assert_eq!(field(&d, "pack_voltage_volts"), &FieldValue::Decimal(110.5));
        assert_eq!(field(&d, "mode").as_str(), Some("Charge"));
        assert_eq!(field(&d, "current_amps"), &FieldValue::Integer(-12));
        assert_eq!(field(&d, "voltage_unloaded_cell_volts"), &FieldValue::Decimal(3.31));
    }

    #[test]
    fn test_short_payload_is_truncated_not_dropped() {
        let d = decode_payload(0x03, &[0xE4, 0x0C, 0x16, 0x0D]);
        assert!(d.truncated);
        assert_eq!(field(&d, "voltage_balance_mv"), &FieldValue::Integer(50));
        assert!(d.fields.get("pack_voltage_volts").is_none());
    }

    #[test]
    fn test_riding_status() {
        let mut p = vec![0u8; 27];
        p[0] = 31;
        p[1] = 29;
        p[2..4].copy_from_slice(&76u16.to_le_bytes());
        p[4..8].copy_from_slice(&112_345u32.to_le_bytes());
        p[8..10].copy_from_slice(&45i16.to_le_bytes());
        p[0x0A..0x0C].copy_from_slice(&38i16.to_le_bytes());
        p[0x0C..0x0E].copy_from_slice(&4_200u16.to_le_bytes());
        p[0x10..0x12].copy_from_slice(&(-20i16).to_le_bytes());
        p[0x12] = 0x01;
        p[0x13..0x15].copy_from_slice(&150i16.to_le_bytes());
        p[0x15..0x17].copy_from_slice(&(-3i16).to_le_bytes());
        p[0x17..0x1B].copy_from_slice(&12_345u32.to_le_bytes());

        let d = decode_payload(0x2C, &p);
        assert!(!d.truncated);
        assert_eq!(field(&d, "pack_voltage_volts"), &FieldValue::Decimal(112.345));
        assert_eq!(field(&d, "motor_rpm"), &FieldValue::Integer(4200));
        assert_eq!(field(&d, "battery_current_amps"), &FieldValue::Integer(-20));
        assert_eq!(field(&d, "motor_current_amps"), &FieldValue::Integer(150));
        assert_eq!(field(&d, "ambient_temp_celsius"), &FieldValue::Integer(-3));
        assert_eq!(field(&d, "odometer_km"), &FieldValue::Integer(12345));
        assert_eq!(field(&d, "mods").as_str(), Some("10"));
    }

    #[test]
    fn test_disarmed_uses_narrow_currents() {
        let mut p = vec![0u8; 27];
        p[0x10] = 200;
        p[0x12] = 0x02;
        p[0x13] = 0xF6;
        let d = decode_payload(0x3C, &p);
        assert_eq!(field(&d, "battery_current_amps"), &FieldValue::Integer(200));
        assert_eq!(field(&d, "motor_current_amps"), &FieldValue::Integer(-10));
        assert_eq!(field(&d, "mods").as_str(), Some("10"));
    }

    #[test]
    fn test_contactor_state_precharge() {
        let mut p = vec![0u8; 13];
        p[0] = 1;
        p[1..5].copy_from_slice(&100_000u32.to_le_bytes());
        p[5..9].copy_from_slice(&95_000u32.to_le_bytes());
        p[9..13].copy_from_slice(&(-1_500i32).to_le_bytes());
        let d = decode_payload(0x15, &p);
        assert_eq!(field(&d, "contactor_closed"), &FieldValue::Bool(true));
        assert_eq!(field(&d, "precharge_percent"), &FieldValue::Decimal(95.0));
        assert_eq!(field(&d, "discharge_current_amps"), &FieldValue::Decimal(-1.5));
    }

    #[test]
    fn test_sevcon_status_cause_and_data() {
        let d = decode_payload(0x2F, &[0x00, 0x10, 0x81, 0x49, 0x01, 0xAA, 0xBB]);
        assert_eq!(field(&d, "error_code"), &FieldValue::Integer(0x1000));
        assert_eq!(field(&d, "sevcon_error_code"), &FieldValue::Integer(0x4981));
        assert_eq!(field(&d, "cause").as_str(), Some("Throttle Fault"));
        assert_eq!(field(&d, "data").as_str(), Some("AA BB"));
    }

    #[test]
    fn test_discharge_cutback_rounding() {
        let d = decode_payload(0x16, &[128]);
        assert_eq!(field(&d, "cutback_percent"), &FieldValue::Integer(50));
    }

    #[test]
    fn test_battery_module_serial() {
        let mut p = vec![0u8; 0x14];
        p[0] = 0x02;
        p[1] = 3;
        p.extend_from_slice(b"MOD12345\0");
        let d = decode_payload(0x33, &p);
        assert_eq!(field(&d, "event").as_str(), Some("Registered"));
        assert_eq!(field(&d, "serial").as_str(), Some("MOD12345"));
    }

    #[test]
    fn test_unknown_code_falls_back_to_raw_hex() {
        let d = decode_payload(0x3E, &[0xDE, 0xAD]);
        assert!(!d.known);
        assert_eq!(d.name, "Unknown Type 0x3E");
        assert_eq!(field(&d, "raw_hex").as_str(), Some("dead"));
    }

    #[test]
    fn test_documented_unknown_keeps_raw_hex() {
        let d = decode_payload(0x1C, &[0x01, 0x02]);
        assert!(d.known);
        assert_eq!(d.name, "MBB Unknown Type 28");
        assert_eq!(field(&d, "raw_hex").as_str(), Some("0102"));
        assert_eq!(d.fields.len(), 1);
    }

    #[test]
    fn test_vehicle_state_telemetry_nested() {
        let mut p = vec![0u8; 68];
        p[0..4].copy_from_slice(&12_345_678u32.to_le_bytes());
        p[4..8].copy_from_slice(&512u32.to_le_bytes());
        p[36..39].copy_from_slice(b"RUN");
        p[48] = 21;
        p[51] = 24;
        let d = decode_payload(0x51, &p);
        let telemetry = field(&d, "telemetry").as_object().unwrap();
        assert_eq!(telemetry["odometer_m"], FieldValue::Integer(12_345_678));
        assert_eq!(telemetry["soc_raw"], FieldValue::Integer(512));
        assert_eq!(telemetry["vehicle_state"].as_str(), Some("RUN"));
        assert_eq!(telemetry["temp_1"], FieldValue::Integer(21));
        assert_eq!(telemetry["temp_4"], FieldValue::Integer(24));
        assert!(!d.truncated);

        let short = decode_payload(0x51, &p[..40]);
        assert!(short.truncated);
    }

    #[test]
    fn test_sensor_data_nested() {
        let mut p = vec![0u8; 22];
        p[4..8].copy_from_slice(&7u32.to_le_bytes());
        p[20..22].copy_from_slice(&0x0102u16.to_le_bytes());
        let d = decode_payload(0x54, &p);
        let sensors = field(&d, "sensors").as_object().unwrap();
        assert_eq!(sensors["sensor_1"], FieldValue::Integer(7));
        assert_eq!(sensors["status"], FieldValue::Integer(0x0102));
    }

    #[test]
    fn test_system_information_strings() {
        let payload = b"\x01\x02\0538SD1Z20GCG00001\0ZR2412345678\0v1.2.3\0x\0";
        let d = decode_payload(0xFB, payload);
        let info = field(&d, "system_info").as_object().unwrap();
        assert_eq!(info["vin"].as_str(), Some("538SD1Z20GCG00001"));
        assert_eq!(info["serial_number"].as_str(), Some("ZR2412345678"));
        assert_eq!(info["firmware"].as_str(), Some("v1.2.3"));
    }

    #[test]
    fn test_debug_string_plain_and_soc() {
        let d = decode_payload(0xFD, b"Hello world\0");
        assert_eq!(field(&d, "message").as_str(), Some("Hello world"));
        assert!(d.fields.get("soc").is_none());

        let d = decode_payload(0xFD, b"SOC:1,2,3,104500,90,91,92,5\0");
        let soc = field(&d, "soc").as_object().unwrap();
        assert_eq!(soc["pack_voltage_mv"], FieldValue::Integer(104_500));
        assert_eq!(soc["pack_voltage_volts"], FieldValue::Decimal(104.5));
        assert_eq!(soc["balance_or_current"], FieldValue::Integer(5));

        let d = decode_payload(0xFD, b"SOC:1,2,3,104500,90,91,92,5,4100,4000,3990,-2500\0");
        let soc = field(&d, "soc").as_object().unwrap();
        assert_eq!(soc["voltage_min_2_mv"], FieldValue::Integer(3990));
        assert_eq!(soc["current_amps"], FieldValue::Decimal(-2.5));

        let d = decode_payload(0xFD, b"SOC:1,2,3\0");
        assert!(d.fields.get("soc").is_none());
    }
}
