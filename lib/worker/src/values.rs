//! Conversion between JSON call arguments/results and wasm values.

use crate::error::HostError;
use serde_json::{Number, Value as JsonValue};
use wasmer::{Type, Value};

/// Converts positional JSON `args` to the parameter types of `function`.
pub fn to_wasm_args(
    function: &str,
    params: &[Type],
    args: &[JsonValue],
) -> Result<Vec<Value>, HostError> {
    if params.len() != args.len() {
        return Err(HostError::Argument {
            function: function.to_string(),
            message: format!("expected {} arguments, got {}", params.len(), args.len()),
        });
    }
    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (ty, arg))| {
            to_wasm_value(*ty, arg).map_err(|message| HostError::Argument {
                function: function.to_string(),
                message: format!("argument {index}: {message}"),
            })
        })
        .collect()
}

fn to_wasm_value(ty: Type, arg: &JsonValue) -> Result<Value, String> {
    match ty {
        Type::I32 => match arg {
            // Unsigned 32-bit values (pointers) are reinterpreted.
            JsonValue::Number(n) => n
                .as_i64()
                .filter(|v| (i32::MIN as i64..=u32::MAX as i64).contains(v))
                .map(|v| Value::I32(v as u32 as i32))
                .ok_or_else(|| format!("{n} is not a 32-bit integer")),
            JsonValue::Bool(b) => Ok(Value::I32(*b as i32)),
            other => Err(format!("expected an integer, got {other}")),
        },
        Type::I64 => match arg {
            JsonValue::Number(n) => n
                .as_i64()
                .or_else(|| n.as_u64().map(|v| v as i64))
                .map(Value::I64)
                .ok_or_else(|| format!("{n} is not a 64-bit integer")),
            JsonValue::String(s) => s
                .parse::<i64>()
                .map(Value::I64)
                .map_err(|_| format!("{s:?} is not a 64-bit integer")),
            other => Err(format!("expected an integer, got {other}")),
        },
        Type::F32 => arg
            .as_f64()
            .map(|v| Value::F32(v as f32))
            .ok_or_else(|| format!("expected a number, got {arg}")),
        Type::F64 => arg
            .as_f64()
            .map(Value::F64)
            .ok_or_else(|| format!("expected a number, got {arg}")),
        other => Err(format!("parameters of type {other:?} are not supported")),
    }
}

/// Folds the results of a call into one JSON value: nothing is `null`, a
/// single result is returned as is and several become an array.
pub fn to_json(function: &str, results: &[Value]) -> Result<JsonValue, HostError> {
    let mut values = results
        .iter()
        .map(|value| {
            to_json_value(value).map_err(|message| HostError::Result {
                function: function.to_string(),
                message,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(match values.len() {
        0 => JsonValue::Null,
        1 => values.remove(0),
        _ => JsonValue::Array(values),
    })
}

fn to_json_value(value: &Value) -> Result<JsonValue, String> {
    match value {
        Value::I32(v) => Ok(JsonValue::from(*v)),
        Value::I64(v) => Ok(JsonValue::from(*v)),
        Value::F32(v) => float(*v as f64),
        Value::F64(v) => float(*v),
        other => Err(format!("results of type {:?} are not supported", other.ty())),
    }
}

fn float(v: f64) -> Result<JsonValue, String> {
    Number::from_f64(v)
        .map(JsonValue::Number)
        .ok_or_else(|| format!("{v} has no JSON representation"))
}
