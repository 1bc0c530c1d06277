//! Display-string helpers shared by pages, the title widget and the CLI.

use serde_json::{Map, Value};

/// Named placeholder values for [`format`].
pub type FmtArgs = Map<String, Value>;

/// Builds a [`FmtArgs`] map from `"name" => value` pairs.
///
/// Values go through `serde_json::json!`, so numbers, strings and booleans
/// can be mixed freely.
#[macro_export]
macro_rules! fmt_args {
    () => { $crate::format::FmtArgs::new() };
    ($($name:literal => $value:expr),+ $(,)?) => {{
        let mut args = $crate::format::FmtArgs::new();
        $( args.insert($name.to_string(), ::serde_json::json!($value)); )+
        args
    }};
}

/// Replaces every `{{ name }}` token in `template` with the matching entry of
/// `args`.
///
/// Whitespace inside the braces is ignored. Tokens without a matching entry,
/// and an unterminated `{{`, are copied through unchanged. Strings are
/// inserted as-is, `null` as the empty string, everything else in its JSON
/// form.
pub fn format(template: &str, args: &FmtArgs) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];
        let Some(close) = after_open.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };

        let name = after_open[..close].trim();
        match args.get(name) {
            Some(value) => out.push_str(&display_value(value)),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after_open[close + 2..];
    }

    out.push_str(rest);
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Bytes-to-size pipe used by the Size column
pub fn human_readable_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;
    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }
    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
