use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, INDEX_COMMANDS, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            command_args: BTreeMap::new(),
        }
    }

    fn with_arg(mut self, key: &str, value: Value) -> Self {
        self.command_args.insert(key.to_string(), value);
        self
    }

    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.command_args
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn arg_strings(&self, key: &str) -> Vec<String> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn arg_numbers(&self, key: &str) -> Vec<usize> {
        self.command_args
            .get(key)
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(Value::as_u64)
                    .map(|value| value as usize)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn find_spec(command: &str, specs: &[CommandSpec]) -> Option<CommandSpec> {
    specs.iter().find(|spec| spec.command == command).copied()
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

/// Splits `1, 3 4` into numbers; anything else is reported back as invalid.
fn parse_numbers(arg: &str) -> (Vec<u64>, Vec<String>) {
    let mut numbers = Vec::new();
    let mut invalid = Vec::new();
    for token in arg
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        match token.parse::<u64>() {
            Ok(value) => numbers.push(value),
            Err(_) => invalid.push(token.to_string()),
        }
    }
    (numbers, invalid)
}

fn strings(values: Vec<String>) -> Value {
    Value::Array(values.into_iter().map(Value::String).collect())
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    let Some(slash_tail) = raw_trimmed.strip_prefix('/') else {
        let mut intent = Intent::new("generate", text);
        intent.prompt = Some(raw_trimmed.to_string());
        return intent;
    };
    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        let mut intent = Intent::new("generate", text);
        intent.prompt = Some(raw_trimmed.to_string());
        return intent;
    }
    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    if let Some(spec) = find_spec(&command, RAW_ARG_COMMANDS) {
        return Intent::new(spec.action, text).with_arg(spec.arg_key, Value::String(arg.to_string()));
    }

    if let Some(spec) = find_spec(&command, INDEX_COMMANDS) {
        let (numbers, invalid) = parse_numbers(arg);
        return Intent::new(spec.action, text)
            .with_arg(
                spec.arg_key,
                Value::Array(numbers.into_iter().map(|value| Value::Number(value.into())).collect()),
            )
            .with_arg("invalid", strings(invalid));
    }

    if let Some(spec) = find_spec(&command, MULTI_PATH_COMMANDS) {
        return Intent::new(spec.action, text).with_arg(spec.arg_key, strings(parse_path_args(arg)));
    }

    if let Some(spec) = find_spec(&command, NO_ARG_COMMANDS) {
        return Intent::new(spec.action, text);
    }

    match command.as_str() {
        "generate" | "gen" => {
            let parts = parse_path_args(arg);
            let mut intent = Intent::new("generate", text);
            for part in parts {
                match part.parse::<u64>() {
                    Ok(count) => {
                        intent = intent.with_arg("count", Value::Number(count.into()));
                    }
                    Err(_) => {
                        intent = intent.with_arg("style", Value::String(part));
                    }
                }
            }
            intent
        }
        "commit" => Intent::new("commit", text).with_arg("stage", Value::String(arg.to_string())),
        "source" => {
            let mut parts = parse_path_args(arg).into_iter();
            let mut intent = Intent::new("switch_source", text)
                .with_arg("path", Value::String(parts.next().unwrap_or_default()));
            if let Some(stage) = parts.next() {
                intent = intent.with_arg("stage", Value::String(stage));
            }
            intent
        }
        _ => Intent::new("unknown", text)
            .with_arg("command", Value::String(command))
            .with_arg("arg", Value::String(arg.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_generates_with_custom_prompt() {
        let intent = parse_intent("  make the sky stormy ");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.prompt.as_deref(), Some("make the sky stormy"));
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn generate_takes_optional_style_and_count() {
        let intent = parse_intent("/generate detail-enhance 4");
        assert_eq!(intent.action, "generate");
        assert_eq!(intent.arg_str("style"), Some("detail-enhance"));
        assert_eq!(intent.command_args["count"], json!(4));
        assert!(intent.prompt.is_none());

        let bare = parse_intent("/generate");
        assert!(bare.command_args.is_empty());
    }

    #[test]
    fn index_commands_collect_numbers() {
        let select = parse_intent("/select 1, 3 4");
        assert_eq!(select.action, "select");
        assert_eq!(select.arg_numbers("indices"), vec![1, 3, 4]);
        assert!(select.arg_strings("invalid").is_empty());

        let reroll = parse_intent("/reroll two 2");
        assert_eq!(reroll.action, "reroll");
        assert_eq!(reroll.arg_numbers("indices"), vec![2]);
        assert_eq!(reroll.arg_strings("invalid"), vec!["two"]);

        assert_eq!(parse_intent("/count 3").action, "set_count");
    }

    #[test]
    fn path_commands_split_shell_words() {
        let refs = parse_intent("/ref \"/tmp/dusk sky.png\" b.png");
        assert_eq!(refs.action, "add_references");
        assert_eq!(refs.command_args["paths"], json!(["/tmp/dusk sky.png", "b.png"]));

        let sheets = parse_intent("/sheet Mina=/sheets/mina.png");
        assert_eq!(sheets.action, "add_character_sheets");
        assert_eq!(sheets.arg_strings("paths"), vec!["Mina=/sheets/mina.png"]);

        let source = parse_intent("/source \"/cuts/panel 2.png\" line-art");
        assert_eq!(source.action, "switch_source");
        assert_eq!(source.arg_str("path"), Some("/cuts/panel 2.png"));
        assert_eq!(source.arg_str("stage"), Some("line-art"));
    }

    #[test]
    fn raw_and_no_arg_commands() {
        let style = parse_intent("/style tone-reference");
        assert_eq!(style.action, "set_style");
        assert_eq!(style.arg_str("style"), Some("tone-reference"));

        let prompt = parse_intent("/prompt keep the rain, add fog");
        assert_eq!(prompt.arg_str("prompt"), Some("keep the rain, add fog"));

        assert_eq!(parse_intent("/all").action, "select_all");
        assert_eq!(parse_intent("/none").action, "deselect_all");
        assert_eq!(parse_intent("/EXIT").action, "quit");
        assert_eq!(parse_intent("/commit").arg_str("stage"), None);
        assert_eq!(parse_intent("/commit final").arg_str("stage"), Some("final"));
    }

    #[test]
    fn parse_unknown_command() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
