//! The enumerated control/query entry points and their argument/return
//! encodings.
//!
//! Everything that is not `create`/`start`/`stop`/`reset` is routed by
//! opcode, both over the direct worker proxy and through the callback ring.
//! Opcodes carry stable wire codes so the encoded records stay meaningful
//! across the shared region.

/// Control and query entry points routed by opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum Opcode {
    SetOption = 1,
    EvalCode = 2,
    CompileProgram = 3,
    InputMessage = 4,
    ScoreEvent = 5,
    GetControlChannel = 6,
    SetControlChannel = 7,
    GetStringChannel = 8,
    SetStringChannel = 9,
    TableLength = 10,
    TableGet = 11,
    TableSet = 12,
    GetScoreTime = 13,
}

impl Opcode {
    /// Wire code used in encoded callback records.
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Decodes a wire code; unknown codes are reported, not panicked on.
    pub fn from_code(code: i32) -> Option<Self> {
        use Opcode::*;
        Some(match code {
            1 => SetOption,
            2 => EvalCode,
            3 => CompileProgram,
            4 => InputMessage,
            5 => ScoreEvent,
            6 => GetControlChannel,
            7 => SetControlChannel,
            8 => GetStringChannel,
            9 => SetStringChannel,
            10 => TableLength,
            11 => TableGet,
            12 => TableSet,
            13 => GetScoreTime,
            _ => return None,
        })
    }

    /// Public operation name: the engine's stock prefix stripped, first
    /// character lowered.
    pub fn name(self) -> &'static str {
        use Opcode::*;
        match self {
            SetOption => "setOption",
            EvalCode => "evalCode",
            CompileProgram => "compileProgram",
            InputMessage => "inputMessage",
            ScoreEvent => "scoreEvent",
            GetControlChannel => "getControlChannel",
            SetControlChannel => "setControlChannel",
            GetStringChannel => "getStringChannel",
            SetStringChannel => "setStringChannel",
            TableLength => "tableLength",
            TableGet => "tableGet",
            TableSet => "tableSet",
            GetScoreTime => "getScoreTime",
        }
    }
}

/// One argument to a routed entry point.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiArg {
    Int(i32),
    Double(f64),
    Str(String),
    DoubleArray(Vec<f64>),
}

impl From<i32> for ApiArg {
    fn from(value: i32) -> Self {
        ApiArg::Int(value)
    }
}

impl From<f64> for ApiArg {
    fn from(value: f64) -> Self {
        ApiArg::Double(value)
    }
}

impl From<&str> for ApiArg {
    fn from(value: &str) -> Self {
        ApiArg::Str(value.to_owned())
    }
}

/// Result of a routed entry point. `Error` is the tagged failure value used
/// for unknown opcodes, bad arguments, and transport-level failures; it
/// never aborts the render loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiValue {
    Unit,
    Int(i32),
    Double(f64),
    Str(String),
    DoubleArray(Vec<f64>),
    Error(String),
}

impl ApiValue {
    pub fn is_error(&self) -> bool {
        matches!(self, ApiValue::Error(_))
    }

    pub fn error(message: impl Into<String>) -> Self {
        ApiValue::Error(message.into())
    }
}

/// Arity/type helpers shared by engine implementations.
pub fn arg_str(args: &[ApiArg], index: usize) -> Result<&str, ApiValue> {
    match args.get(index) {
        Some(ApiArg::Str(s)) => Ok(s),
        other => Err(ApiValue::error(format!(
            "argument {index} must be a string, got {other:?}"
        ))),
    }
}

pub fn arg_f64(args: &[ApiArg], index: usize) -> Result<f64, ApiValue> {
    match args.get(index) {
        Some(ApiArg::Double(v)) => Ok(*v),
        Some(ApiArg::Int(v)) => Ok(f64::from(*v)),
        other => Err(ApiValue::error(format!(
            "argument {index} must be numeric, got {other:?}"
        ))),
    }
}

pub fn arg_i32(args: &[ApiArg], index: usize) -> Result<i32, ApiValue> {
    match args.get(index) {
        Some(ApiArg::Int(v)) => Ok(*v),
        Some(ApiArg::Double(v)) => Ok(*v as i32),
        other => Err(ApiValue::error(format!(
            "argument {index} must be an integer, got {other:?}"
        ))),
    }
}
