// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Rules: conditions and actions
//!
//! A [`Rule`] holds up to [`RULE_MAX_INPUTS`] conditions and
//! [`RULE_MAX_OUTPUTS`] actions. It fires when every condition holds and at
//! least one of them was triggered by the event being evaluated.
//!
//! # Wire layout (17 bytes, inside `SET_RULE_WITH_INDEXS`)
//!
//! ```text
//! [is_active: 1] [cond: 1] [cond_params: 8] [action: 1] [action_params: 6]
//!
//! cond_params:   [device_id: 4] [value: 2] [pad: 2]   or   [start: 4] [end: 4]
//! action_params: [device_id: 4] [value: 2]
//! ```
//!
//! Only the first input and first output travel on the wire.
//!
//! # Record layout (scene files)
//!
//! ```text
//! R: <valid> <active> <num_in> <num_out>
//! I: <cond>
//! <device_id hex> <value>      | <start hex> <end hex>
//! O: <action>
//! <device_id hex> <value>
//! ```

use std::fmt;
use std::path::Path;

use heapless::Vec as BoundedVec;

use crate::codec::{bytes_from_u16, bytes_from_u32, u16_from_bytes, u32_from_bytes, DeviceId};
use crate::error::{SceneError, StorageError};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::time::PackedTime;

/// Maximum conditions per rule
pub const RULE_MAX_INPUTS: usize = 2;
/// Maximum actions per rule
pub const RULE_MAX_OUTPUTS: usize = 2;

/// Encoded rule body size
pub const RULE_WIRE_SIZE: usize = 17;

/// Condition code marking "no input" on the wire
pub const NO_CONDITION: u8 = 0xFF;
/// Action code marking "no output" on the wire
pub const NO_ACTION: u8 = 0xFF;

/// Comparison used by value conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CompareOp {
    Equal = 0x00,
    Less = 0x01,
    LessOrEqual = 0x02,
    Greater = 0x03,
    GreaterOrEqual = 0x04,
}

impl CompareOp {
    /// `actual <op> threshold`
    pub fn holds(self, actual: i16, threshold: i16) -> bool {
        match self {
            CompareOp::Equal => actual == threshold,
            CompareOp::Less => actual < threshold,
            CompareOp::LessOrEqual => actual <= threshold,
            CompareOp::Greater => actual > threshold,
            CompareOp::GreaterOrEqual => actual >= threshold,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equal => "==",
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterOrEqual => ">=",
        }
    }
}

/// Rule input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    /// Device value compared against a constant
    Compare {
        op: CompareOp,
        device_id: DeviceId,
        value: i16,
    },
    /// Reported value differs from the stored one
    Changed { device_id: DeviceId },
    /// Reported value moved by at least `threshold`
    ChangedOver { device_id: DeviceId, threshold: i16 },
    /// Wall clock within `[start, end]`
    InTimeRange { start: PackedTime, end: PackedTime },
    /// Time of day within `[start, end]`
    InTimeRangeDaily { start: PackedTime, end: PackedTime },
}

/// Result of checking one condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionOutcome {
    /// Condition does not hold
    Unsatisfied,
    /// Condition holds; `triggered` when the current event caused it
    Satisfied { triggered: bool },
}

impl Condition {
    pub const CODE_EQUAL: u8 = 0x00;
    pub const CODE_LESS: u8 = 0x01;
    pub const CODE_LESS_OR_EQUAL: u8 = 0x02;
    pub const CODE_GREATER: u8 = 0x03;
    pub const CODE_GREATER_OR_EQUAL: u8 = 0x04;
    pub const CODE_CHANGED: u8 = 0x05;
    pub const CODE_CHANGED_OVER: u8 = 0x06;
    pub const CODE_IN_TIME_RANGE: u8 = 0x07;
    pub const CODE_IN_TIME_RANGE_DAILY: u8 = 0x08;

    /// Wire discriminant
    pub fn code(&self) -> u8 {
        match self {
            Condition::Compare { op, .. } => *op as u8,
            Condition::Changed { .. } => Self::CODE_CHANGED,
            Condition::ChangedOver { .. } => Self::CODE_CHANGED_OVER,
            Condition::InTimeRange { .. } => Self::CODE_IN_TIME_RANGE,
            Condition::InTimeRangeDaily { .. } => Self::CODE_IN_TIME_RANGE_DAILY,
        }
    }

    /// True when `code` takes a time range rather than a device/value pair
    pub fn is_time_code(code: u8) -> bool {
        code == Self::CODE_IN_TIME_RANGE || code == Self::CODE_IN_TIME_RANGE_DAILY
    }

    /// Build from a discriminant and its two parameters
    ///
    /// Device conditions carry `(device_id, value as u16)`, time conditions
    /// `(start, end)`.
    pub fn from_raw(code: u8, first: u32, second: u32) -> Result<Self, SceneError> {
        let device_id = DeviceId(first);
        let value = second as u16 as i16;
        let op = match code {
            Self::CODE_EQUAL => CompareOp::Equal,
            Self::CODE_LESS => CompareOp::Less,
            Self::CODE_LESS_OR_EQUAL => CompareOp::LessOrEqual,
            Self::CODE_GREATER => CompareOp::Greater,
            Self::CODE_GREATER_OR_EQUAL => CompareOp::GreaterOrEqual,
            Self::CODE_CHANGED => return Ok(Condition::Changed { device_id }),
            Self::CODE_CHANGED_OVER => {
                return Ok(Condition::ChangedOver {
                    device_id,
                    threshold: value,
                })
            }
            Self::CODE_IN_TIME_RANGE => {
                return Ok(Condition::InTimeRange {
                    start: PackedTime(first),
                    end: PackedTime(second),
                })
            }
            Self::CODE_IN_TIME_RANGE_DAILY => {
                return Ok(Condition::InTimeRangeDaily {
                    start: PackedTime(first),
                    end: PackedTime(second),
                })
            }
            other => return Err(SceneError::UnknownCondition(other)),
        };
        Ok(Condition::Compare {
            op,
            device_id,
            value,
        })
    }

    /// The two raw parameters, inverse of [`Condition::from_raw`]
    pub fn raw_params(&self) -> (u32, u32) {
        match *self {
            Condition::Compare {
                device_id, value, ..
            } => (device_id.raw(), value as u16 as u32),
            Condition::Changed { device_id } => (device_id.raw(), 0),
            Condition::ChangedOver {
                device_id,
                threshold,
            } => (device_id.raw(), threshold as u16 as u32),
            Condition::InTimeRange { start, end } | Condition::InTimeRangeDaily { start, end } => {
                (start.raw(), end.raw())
            }
        }
    }

    /// Device watched by this condition, if any
    pub fn device_id(&self) -> Option<DeviceId> {
        match *self {
            Condition::Compare { device_id, .. }
            | Condition::Changed { device_id }
            | Condition::ChangedOver { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    /// Check the condition against the current event
    ///
    /// `report` is the incoming device report when `trigger_by_report` is
    /// set; the registry still holds the value from before the report.
    pub fn check(
        &self,
        trigger_by_report: bool,
        report: Option<&DeviceRecord>,
        registry: &DeviceRegistry,
        now: PackedTime,
    ) -> ConditionOutcome {
        let reported = |id: DeviceId| {
            report
                .filter(|r| trigger_by_report && r.device_id == id)
                .map(|r| r.value)
        };

        match *self {
            Condition::Compare {
                op,
                device_id,
                value,
            } => {
                let (actual, triggered) = match reported(device_id) {
                    Some(v) => (v, true),
                    None => match registry.get_value(device_id) {
                        Some(v) => (v, false),
                        None => return ConditionOutcome::Unsatisfied,
                    },
                };
                satisfied_if(op.holds(actual, value), triggered)
            }
            Condition::Changed { device_id } => {
                match (reported(device_id), registry.get_value(device_id)) {
                    (Some(new), Some(old)) => satisfied_if(new != old, true),
                    _ => ConditionOutcome::Unsatisfied,
                }
            }
            Condition::ChangedOver {
                device_id,
                threshold,
            } => match (reported(device_id), registry.get_value(device_id)) {
                (Some(new), Some(old)) => {
                    let delta = (new as i32 - old as i32).abs();
                    satisfied_if(delta >= threshold as i32, true)
                }
                _ => ConditionOutcome::Unsatisfied,
            },
            Condition::InTimeRange { start, end } => {
                satisfied_if(start <= now && now <= end, !trigger_by_report)
            }
            Condition::InTimeRangeDaily { start, end } => {
                let now = now.time_of_day();
                satisfied_if(
                    start.time_of_day() <= now && now <= end.time_of_day(),
                    !trigger_by_report,
                )
            }
        }
    }
}

fn satisfied_if(holds: bool, triggered: bool) -> ConditionOutcome {
    if holds {
        ConditionOutcome::Satisfied { triggered }
    } else {
        ConditionOutcome::Unsatisfied
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Compare {
                op,
                device_id,
                value,
            } => write!(f, "{} {} {}", device_id, op.symbol(), value),
            Condition::Changed { device_id } => write!(f, "{} changed", device_id),
            Condition::ChangedOver {
                device_id,
                threshold,
            } => write!(f, "{} changed by >= {}", device_id, threshold),
            Condition::InTimeRange { start, end } => write!(f, "time in [{}, {}]", start, end),
            Condition::InTimeRangeDaily { start, end } => write!(
                f,
                "daily in [{:02}:{:02}:{:02}, {:02}:{:02}:{:02}]",
                start.hour(),
                start.minute(),
                start.second(),
                end.hour(),
                end.minute(),
                end.second()
            ),
        }
    }
}

/// Kind of rule output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActionKind {
    /// Set one device to a value
    SetDeviceValue = 0x00,
    /// Reserved: set several devices
    SetMultiValue = 0x01,
    /// Reserved: set several devices after a delay
    SetMultiValueTimed = 0x02,
}

impl ActionKind {
    /// Decode a wire discriminant
    pub fn from_code(code: u8) -> Result<Self, SceneError> {
        match code {
            0x00 => Ok(ActionKind::SetDeviceValue),
            0x01 => Ok(ActionKind::SetMultiValue),
            0x02 => Ok(ActionKind::SetMultiValueTimed),
            other => Err(SceneError::UnknownAction(other)),
        }
    }
}

/// Rule output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Action {
    pub kind: ActionKind,
    pub device_id: DeviceId,
    pub value: i16,
}

impl Action {
    /// Set `device_id` to `value`
    pub fn set_device_value(device_id: DeviceId, value: i16) -> Self {
        Self {
            kind: ActionKind::SetDeviceValue,
            device_id,
            value,
        }
    }

    /// Wire discriminant
    pub fn code(&self) -> u8 {
        self.kind as u8
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ActionKind::SetDeviceValue => write!(f, "set {} = {}", self.device_id, self.value),
            kind => write!(f, "{:?} {} = {}", kind, self.device_id, self.value),
        }
    }
}

/// One condition/action rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    /// Slot holds a rule
    pub is_valid: bool,
    /// Rule takes part in evaluation
    pub is_active: bool,
    inputs: BoundedVec<Condition, RULE_MAX_INPUTS>,
    outputs: BoundedVec<Action, RULE_MAX_OUTPUTS>,
}

impl Rule {
    /// Create a valid rule with no inputs or outputs
    pub fn new(is_active: bool) -> Self {
        Self {
            is_valid: true,
            is_active,
            ..Self::default()
        }
    }

    /// Builder form of [`Rule::push_input`]
    pub fn with_input(mut self, condition: Condition) -> Result<Self, SceneError> {
        self.push_input(condition)?;
        Ok(self)
    }

    /// Builder form of [`Rule::push_output`]
    pub fn with_output(mut self, action: Action) -> Result<Self, SceneError> {
        self.push_output(action)?;
        Ok(self)
    }

    /// Append a condition
    pub fn push_input(&mut self, condition: Condition) -> Result<(), SceneError> {
        self.inputs
            .push(condition)
            .map_err(|_| SceneError::TooManyInputs {
                max: RULE_MAX_INPUTS,
            })
    }

    /// Append an action
    pub fn push_output(&mut self, action: Action) -> Result<(), SceneError> {
        self.outputs
            .push(action)
            .map_err(|_| SceneError::TooManyOutputs {
                max: RULE_MAX_OUTPUTS,
            })
    }

    /// Conditions in order
    pub fn inputs(&self) -> &[Condition] {
        &self.inputs
    }

    /// Actions in order
    pub fn outputs(&self) -> &[Action] {
        &self.outputs
    }

    pub fn num_in(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_out(&self) -> usize {
        self.outputs.len()
    }

    /// Check every input against the current event
    ///
    /// Returns true when all inputs hold and at least one was triggered.
    pub fn fires(
        &self,
        trigger_by_report: bool,
        report: Option<&DeviceRecord>,
        registry: &DeviceRegistry,
        now: PackedTime,
    ) -> bool {
        if !(self.is_valid && self.is_active) || self.inputs.is_empty() {
            return false;
        }

        let mut has_trigger = false;
        for condition in &self.inputs {
            match condition.check(trigger_by_report, report, registry, now) {
                ConditionOutcome::Unsatisfied => return false,
                ConditionOutcome::Satisfied { triggered } => has_trigger |= triggered,
            }
        }
        has_trigger
    }

    /// Encode the 17-byte wire body into `buf`
    pub fn encode_wire(&self, buf: &mut [u8]) {
        buf[..RULE_WIRE_SIZE].fill(0);
        buf[0] = self.is_active as u8;

        match self.inputs.first() {
            Some(condition) => {
                buf[1] = condition.code();
                let (first, second) = condition.raw_params();
                bytes_from_u32(first, &mut buf[2..]);
                if Condition::is_time_code(condition.code()) {
                    bytes_from_u32(second, &mut buf[6..]);
                } else {
                    bytes_from_u16(second as u16, &mut buf[6..]);
                }
            }
            None => buf[1] = NO_CONDITION,
        }

        match self.outputs.first() {
            Some(action) => {
                buf[10] = action.code();
                bytes_from_u32(action.device_id.raw(), &mut buf[11..]);
                bytes_from_u16(action.value as u16, &mut buf[15..]);
            }
            None => buf[10] = NO_ACTION,
        }
    }

    /// Decode a 17-byte wire body into a valid rule
    pub fn decode_wire(buf: &[u8]) -> Result<Self, SceneError> {
        let mut rule = Rule::new(buf[0] != 0);

        let code = buf[1];
        if code != NO_CONDITION {
            let first = u32_from_bytes(&buf[2..]);
            let second = if Condition::is_time_code(code) {
                u32_from_bytes(&buf[6..])
            } else {
                u16_from_bytes(&buf[6..]) as u32
            };
            rule.push_input(Condition::from_raw(code, first, second)?)?;
        }

        let code = buf[10];
        if code != NO_ACTION {
            rule.push_output(Action {
                kind: ActionKind::from_code(code)?,
                device_id: DeviceId(u32_from_bytes(&buf[11..])),
                value: u16_from_bytes(&buf[15..]) as i16,
            })?;
        }

        Ok(rule)
    }

    /// Scene-file record of this rule, written through `Display`
    pub fn record(&self) -> RuleRecord<'_> {
        RuleRecord(self)
    }

    /// Read one record from numbered, non-blank scene-file lines
    ///
    /// Returns `Ok(None)` at end of input.
    pub fn read_record<'a, I>(lines: &mut I, path: &Path) -> Result<Option<Self>, StorageError>
    where
        I: Iterator<Item = (usize, &'a str)>,
    {
        let Some((line_no, header)) = lines.next() else {
            return Ok(None);
        };
        let fields = tagged_fields(header, "R:", path, line_no)?;
        let [valid, active, num_in, num_out] = parse_fields::<4>(&fields, path, line_no)?;
        if num_in > RULE_MAX_INPUTS as u32 || num_out > RULE_MAX_OUTPUTS as u32 {
            return Err(StorageError::parse(
                path,
                line_no,
                format!("rule has {} inputs and {} outputs", num_in, num_out),
            ));
        }

        let mut rule = Rule {
            is_valid: valid != 0,
            is_active: active != 0,
            ..Rule::default()
        };

        let mut last = line_no;
        for _ in 0..num_in {
            let (line_no, tag) = next_line(lines, path, last)?;
            let [code] = parse_fields::<1>(&tagged_fields(tag, "I:", path, line_no)?, path, line_no)?;
            let code = code as u8;
            let (line_no, params) = next_line(lines, path, line_no)?;
            let (first, second) = if Condition::is_time_code(code) {
                parse_hex_pair(params, path, line_no)?
            } else {
                let (id, value) = parse_id_value(params, path, line_no)?;
                (id, value as u16 as u32)
            };
            let condition = Condition::from_raw(code, first, second)
                .map_err(|e| StorageError::parse(path, line_no, e.to_string()))?;
            rule.push_input(condition)
                .map_err(|e| StorageError::parse(path, line_no, e.to_string()))?;
            last = line_no;
        }

        for _ in 0..num_out {
            let (line_no, tag) = next_line(lines, path, last)?;
            let [code] = parse_fields::<1>(&tagged_fields(tag, "O:", path, line_no)?, path, line_no)?;
            let kind = ActionKind::from_code(code as u8)
                .map_err(|e| StorageError::parse(path, line_no, e.to_string()))?;
            let (line_no, params) = next_line(lines, path, line_no)?;
            let (id, value) = parse_id_value(params, path, line_no)?;
            rule.push_output(Action {
                kind,
                device_id: DeviceId(id),
                value,
            })
            .map_err(|e| StorageError::parse(path, line_no, e.to_string()))?;
            last = line_no;
        }

        Ok(Some(rule))
    }
}

fn next_line<'a, I>(lines: &mut I, path: &Path, after: usize) -> Result<(usize, &'a str), StorageError>
where
    I: Iterator<Item = (usize, &'a str)>,
{
    lines
        .next()
        .ok_or_else(|| StorageError::parse(path, after + 1, "unexpected end of file"))
}

fn tagged_fields<'a>(
    line: &'a str,
    tag: &str,
    path: &Path,
    line_no: usize,
) -> Result<Vec<&'a str>, StorageError> {
    line.trim()
        .strip_prefix(tag)
        .map(|rest| rest.split_whitespace().collect())
        .ok_or_else(|| StorageError::parse(path, line_no, format!("expected '{}'", tag)))
}

fn parse_fields<const N: usize>(
    fields: &[&str],
    path: &Path,
    line_no: usize,
) -> Result<[u32; N], StorageError> {
    if fields.len() != N {
        return Err(StorageError::parse(
            path,
            line_no,
            format!("expected {} fields, found {}", N, fields.len()),
        ));
    }
    let mut out = [0u32; N];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = field
            .parse()
            .map_err(|_| StorageError::parse(path, line_no, format!("bad number {:?}", field)))?;
    }
    Ok(out)
}

fn parse_hex_pair(line: &str, path: &Path, line_no: usize) -> Result<(u32, u32), StorageError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(a), Some(b), None) => {
            let hex = |s: &str| {
                u32::from_str_radix(s, 16)
                    .map_err(|_| StorageError::parse(path, line_no, format!("bad hex {:?}", s)))
            };
            Ok((hex(a)?, hex(b)?))
        }
        _ => Err(StorageError::parse(path, line_no, "expected two fields")),
    }
}

fn parse_id_value(line: &str, path: &Path, line_no: usize) -> Result<(u32, i16), StorageError> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(value), None) => {
            let id = u32::from_str_radix(id, 16)
                .map_err(|_| StorageError::parse(path, line_no, format!("bad device id {:?}", id)))?;
            let value = value
                .parse::<i16>()
                .map_err(|_| StorageError::parse(path, line_no, format!("bad value {:?}", value)))?;
            Ok((id, value))
        }
        _ => Err(StorageError::parse(path, line_no, "expected device id and value")),
    }
}

/// Scene-file form of a [`Rule`]: a header line, then two lines per input
/// and per output
pub struct RuleRecord<'a>(&'a Rule);

impl fmt::Display for RuleRecord<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = self.0;
        writeln!(
            f,
            "R: {} {} {} {}",
            rule.is_valid as u8,
            rule.is_active as u8,
            rule.inputs.len(),
            rule.outputs.len()
        )?;
        for condition in &rule.inputs {
            let (first, second) = condition.raw_params();
            writeln!(f, "I: {}", condition.code())?;
            if Condition::is_time_code(condition.code()) {
                writeln!(f, "{:x} {:x}", first, second)?;
            } else {
                writeln!(f, "{:x} {}", first, second as u16 as i16)?;
            }
        }
        for action in &rule.outputs {
            writeln!(f, "O: {}", action.code())?;
            writeln!(f, "{:x} {}", action.device_id.raw(), action.value)?;
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_valid {
            return write!(f, "<empty>");
        }
        write!(f, "{} if ", if self.is_active { "on " } else { "off" })?;
        for (i, condition) in self.inputs.iter().enumerate() {
            if i > 0 {
                write!(f, " and ")?;
            }
            write!(f, "{}", condition)?;
        }
        write!(f, " then ")?;
        for (i, action) in self.outputs.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", action)?;
        }
        Ok(())
    }
}
