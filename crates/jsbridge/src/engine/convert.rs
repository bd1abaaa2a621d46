//! Value and exception extraction from the engine.

use rquickjs::convert::Coerced;
use rquickjs::{Array, Ctx, Object, Type, Value};

use crate::error::ScriptException;
use crate::marshal::{OUT_OF_BOUNDS, ScriptValue};

/// Deepest array nesting that is converted. Cyclic arrays hit this.
pub const MAX_ARRAY_DEPTH: usize = 128;

/// Most array elements, summed over every nesting level, one result may hold.
/// Larger results could never fit a host reply and become the overflow error.
pub const MAX_ARRAY_ELEMENTS: usize = 1 << 20;

/// Convert an engine value to its owned form.
pub(crate) fn script_value<'js>(
    ctx: &Ctx<'js>,
    value: Value<'js>,
) -> Result<ScriptValue, ScriptException> {
    let mut budget = MAX_ARRAY_ELEMENTS;
    to_script_value(ctx, value, 0, &mut budget)
}

fn to_script_value<'js>(
    ctx: &Ctx<'js>,
    js: Value<'js>,
    depth: usize,
    budget: &mut usize,
) -> Result<ScriptValue, ScriptException> {
    let fail = |err: rquickjs::Error| exception(ctx, err, "", 0);

    match js.type_of() {
        Type::Undefined | Type::Null => Ok(ScriptValue::Nil),
        Type::Bool => Ok(ScriptValue::Bool(js.get::<bool>().map_err(fail)?)),
        Type::Int => Ok(ScriptValue::Number(f64::from(js.get::<i32>().map_err(fail)?))),
        Type::Float => Ok(ScriptValue::Number(js.get::<f64>().map_err(fail)?)),
        Type::String => Ok(ScriptValue::String(js.get::<String>().map_err(fail)?)),
        Type::Array => {
            if depth >= MAX_ARRAY_DEPTH {
                return Err(ScriptException::message(format!(
                    "RangeError: array nesting exceeds {MAX_ARRAY_DEPTH} levels"
                )));
            }
            let arr: Array = js.get().map_err(fail)?;
            // `length` can exceed i32, so read it as a double
            let length: f64 = arr.as_object().get("length").map_err(fail)?;
            let len = match length {
                n if n <= *budget as f64 => n as usize,
                _ => return Err(ScriptException::message(OUT_OF_BOUNDS)),
            };
            *budget -= len;

            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                let item: Value = arr.get(i).map_err(fail)?;
                items.push(to_script_value(ctx, item, depth + 1, budget)?);
            }
            Ok(ScriptValue::Array(items))
        }
        _ => {
            let text: Coerced<String> = js.get().map_err(fail)?;
            Ok(ScriptValue::String(text.0))
        }
    }
}

/// Turn an engine error into a [`ScriptException`], taking the pending
/// exception out of the context.
///
/// `line_offset` is the number of lines the engine saw before `source`
/// started (non-zero for wrapped job bodies).
pub(crate) fn exception(
    ctx: &Ctx<'_>,
    err: rquickjs::Error,
    source: &str,
    line_offset: u32,
) -> ScriptException {
    if !matches!(err, rquickjs::Error::Exception) {
        return ScriptException::message(err.to_string());
    }

    let thrown = ctx.catch();
    let message = match thrown.get::<Coerced<String>>() {
        Ok(text) => text.0,
        Err(_) => {
            let _ = ctx.catch();
            "unknown exception".to_string()
        }
    };

    let exception = ScriptException::message(message);
    match thrown.as_object().and_then(|obj| error_line(ctx, obj)) {
        Some(line) if line > line_offset => exception.at_line(line - line_offset, source),
        _ => exception,
    }
}

/// Line of an error object: `lineNumber` for syntax errors, otherwise the
/// first script frame of `stack`.
fn error_line(ctx: &Ctx<'_>, obj: &Object<'_>) -> Option<u32> {
    match obj.get::<_, Option<i32>>("lineNumber") {
        Ok(Some(line)) if line > 0 => return Some(line as u32),
        Ok(_) => {}
        Err(_) => {
            let _ = ctx.catch();
        }
    }

    match obj.get::<_, Option<String>>("stack") {
        Ok(stack) => stack.as_deref().and_then(stack_line),
        Err(_) => {
            let _ = ctx.catch();
            None
        }
    }
}

/// Parse the line of the first frame that has one, from frames shaped like
/// `    at <eval> (eval_script:3)` or `    at f (eval_script:3:7)`.
pub(crate) fn stack_line(stack: &str) -> Option<u32> {
    stack.lines().find_map(|frame| {
        let open = frame.rfind('(')?;
        let close = open + frame[open..].find(')')?;
        let numbers: Vec<u32> = frame[open + 1..close]
            .rsplit(':')
            .map_while(|part| part.parse().ok())
            .collect();
        match numbers.as_slice() {
            [line] => Some(*line),
            [_column, line, ..] => Some(*line),
            [] => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_line() {
        assert_eq!(stack_line("    at <eval> (eval_script:3)\n"), Some(3));
        assert_eq!(stack_line("    at f (eval_script:4:12)\n"), Some(4));
        assert_eq!(
            stack_line("    at sleep (native)\n    at <eval> (eval_script:2)\n"),
            Some(2)
        );
        assert_eq!(stack_line("no frames here"), None);
    }
}
