#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key the argument is stored under in `command_args`.
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "style",
        action: "set_style",
        arg_key: "style",
    },
    CommandSpec {
        command: "provider",
        action: "set_provider",
        arg_key: "provider",
    },
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
        arg_key: "prompt",
    },
    CommandSpec {
        command: "stage",
        action: "set_target_stage",
        arg_key: "stage",
    },
];

pub(crate) const INDEX_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "select",
        action: "select",
        arg_key: "indices",
    },
    CommandSpec {
        command: "deselect",
        action: "deselect",
        arg_key: "indices",
    },
    CommandSpec {
        command: "reroll",
        action: "reroll",
        arg_key: "indices",
    },
    CommandSpec {
        command: "count",
        action: "set_count",
        arg_key: "indices",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "ref",
        action: "add_references",
        arg_key: "paths",
    },
    CommandSpec {
        command: "sheet",
        action: "add_character_sheets",
        arg_key: "paths",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "all",
        action: "select_all",
        arg_key: "",
    },
    CommandSpec {
        command: "none",
        action: "deselect_all",
        arg_key: "",
    },
    CommandSpec {
        command: "list",
        action: "list",
        arg_key: "",
    },
    CommandSpec {
        command: "wait",
        action: "wait",
        arg_key: "",
    },
    CommandSpec {
        command: "clear_refs",
        action: "clear_refs",
        arg_key: "",
    },
    CommandSpec {
        command: "help",
        action: "help",
        arg_key: "",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
        arg_key: "",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
        arg_key: "",
    },
];

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/generate [style] [count]",
    "/style <key>",
    "/count <n>",
    "/provider <gemini|seedream|auto>",
    "/ref <paths>",
    "/sheet <name=path>",
    "/clear_refs",
    "/prompt <text>",
    "/reroll <n>",
    "/select <n>",
    "/deselect <n>",
    "/all",
    "/none",
    "/list",
    "/wait",
    "/stage <id>",
    "/commit [stage]",
    "/source <path> [stage]",
    "/help",
    "/quit",
];
