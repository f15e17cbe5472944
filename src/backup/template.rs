//! Placeholder expansion for artifact paths and pipeline commands.
//!
//! Paths recognize `{dt}` and `{name}`, commands recognize `{path}`.
//! Anything else between braces is copied through untouched.

use chrono::{DateTime, Local};

/// Token replaced by the tick timestamp in path templates.
pub const DT_TOKEN: &str = "{dt}";
/// Token replaced by the job name in path templates.
pub const NAME_TOKEN: &str = "{name}";
/// Token replaced by the resolved artifact path in command templates.
pub const PATH_TOKEN: &str = "{path}";

/// Timestamp layout used for `{dt}`, e.g. `2024-03-01_04:05:06`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

pub fn format_timestamp(at: &DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Expand a job's path template for a run starting at `at`.
pub fn expand_path(template: &str, name: &str, at: &DateTime<Local>) -> String {
    let timestamp = format_timestamp(at);
    substitute(template, &[(DT_TOKEN, &timestamp), (NAME_TOKEN, name)])
}

/// Expand a command template against the resolved artifact path.
pub fn expand_command(template: &str, path: &str) -> String {
    substitute(template, &[(PATH_TOKEN, path)])
}

/// Single left-to-right pass over `template`.
///
/// Replacement text is appended to the output and never scanned again, so a
/// value that itself looks like a token stays literal.
fn substitute(template: &str, tokens: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let candidate = &rest[open..];

        match tokens
            .iter()
            .find(|(token, _)| candidate.starts_with(token))
        {
            Some((token, value)) => {
                out.push_str(value);
                rest = &candidate[token.len()..];
            }
            None => {
                out.push('{');
                rest = &candidate[1..];
            }
        }
    }

    out.push_str(rest);
    out
}
