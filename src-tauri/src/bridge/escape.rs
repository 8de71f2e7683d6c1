//! Rendering of outbound callback invocations as script text.

use std::fmt::Write;

use super::protocol::{CallbackArg, CallbackName};

/// Quote `value` as a JavaScript string literal.
pub fn js_string_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    let mut prev = '\0';
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            // Line terminators inside string literals in older engines
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            // Keep "</script>" from closing an enclosing script element
            '/' if prev == '<' => out.push_str("\\/"),
            c if (c as u32) < 0x20 || c == '\u{7f}' => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
        prev = c;
    }
    out.push('"');
    out
}

/// Script literal for one argument
pub fn render_arg(arg: &CallbackArg) -> String {
    match arg {
        CallbackArg::Number(n) if n.is_finite() => n.to_string(),
        CallbackArg::Number(_) => "null".to_string(),
        CallbackArg::Bool(b) => b.to_string(),
        CallbackArg::Text(s) => js_string_literal(s),
    }
}

/// `name(arg);`
pub fn callback_script(name: &CallbackName, arg: &CallbackArg) -> String {
    format!("{}({});", name, render_arg(arg))
}
