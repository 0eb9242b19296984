use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, COOLDOWN_COMMAND, ID_ARG_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
    SINGLE_PATH_COMMANDS, WINDOW_COMMAND,
};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionCommand {
    pub action: String,
    pub raw: String,
    pub args: BTreeMap<String, Value>,
}

impl SessionCommand {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    fn invalid(raw: &str, command: &str, reason: &str) -> Self {
        Self::new("invalid", raw)
            .with_arg("command", Value::String(command.to_string()))
            .with_arg("reason", Value::String(reason.to_string()))
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args
            .get(key)
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn arg_u64(&self, key: &str) -> Option<u64> {
        self.args.get(key).and_then(Value::as_u64)
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_single_path_arg(arg: &str) -> String {
    let parts = parse_path_args(arg);
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        _ => parts.join(" "),
    }
}

fn parse_millis(raw: &str) -> Option<u64> {
    let trimmed = raw.trim().to_ascii_lowercase();
    if let Some(seconds) = trimmed.strip_suffix("ms") {
        return seconds.trim().parse().ok();
    }
    if let Some(seconds) = trimmed.strip_suffix('s') {
        let value: f64 = seconds.trim().parse().ok()?;
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        return Some((value * 1000.0).round() as u64);
    }
    trimmed.parse().ok()
}

/// Parses one line typed into an interactive closet session.
///
/// Slash commands map to actions; any other non-empty text is treated as a
/// free-text occasion for a `nano` generation.
pub fn parse_command(text: &str) -> SessionCommand {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return SessionCommand::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        return SessionCommand::new("nano", text)
            .with_arg("occasion", Value::String(raw_trimmed.to_string()));
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return SessionCommand::new("nano", text)
            .with_arg("occasion", Value::String(raw_trimmed.to_string()));
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
        if arg.is_empty() {
            return SessionCommand::invalid(text, &command, "missing occasion text");
        }
        return SessionCommand::new(action, text)
            .with_arg("occasion", Value::String(arg.to_string()));
    }

    if let Some(action) = find_action(&command, ID_ARG_COMMANDS) {
        let Some(id) = arg.split_whitespace().next() else {
            return SessionCommand::invalid(text, &command, "missing id");
        };
        return SessionCommand::new(action, text).with_arg("id", Value::String(id.to_string()));
    }

    if let Some(action) = find_action(&command, SINGLE_PATH_COMMANDS) {
        let path = parse_single_path_arg(arg);
        if path.is_empty() {
            return SessionCommand::invalid(text, &command, "missing path");
        }
        return SessionCommand::new(action, text).with_arg("path", Value::String(path));
    }

    if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
        return SessionCommand::new(action, text);
    }

    if command == COOLDOWN_COMMAND.command {
        return match parse_millis(arg) {
            Some(ms) => SessionCommand::new(COOLDOWN_COMMAND.action, text)
                .with_arg("cooldown_ms", Value::from(ms)),
            None => SessionCommand::invalid(text, &command, "expected a duration like 2000 or 2s"),
        };
    }

    if command == WINDOW_COMMAND.command {
        let parts: Vec<&str> = arg.split_whitespace().collect();
        let max_calls = parts.first().and_then(|value| value.parse::<u64>().ok());
        let window_ms = parts.get(1).and_then(|value| parse_millis(value));
        return match (max_calls, window_ms, parts.len()) {
            (Some(max_calls), Some(window_ms), 2) => {
                SessionCommand::new(WINDOW_COMMAND.action, text)
                    .with_arg("max_calls", Value::from(max_calls))
                    .with_arg("window_ms", Value::from(window_ms))
            }
            _ => SessionCommand::invalid(text, &command, "expected <max_calls> <window>"),
        };
    }

    SessionCommand::new("unknown", text)
        .with_arg("command", Value::String(command))
        .with_arg("arg", Value::String(arg.to_string()))
}
