#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
    /// Key under which the argument is stored in `command_args`.
    pub arg_key: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
        arg_key: "text",
    },
    CommandSpec {
        command: "model",
        action: "set_model",
        arg_key: "model",
    },
    CommandSpec {
        command: "key",
        action: "set_api_key",
        arg_key: "key",
    },
    CommandSpec {
        command: "aspect",
        action: "set_aspect",
        arg_key: "aspect",
    },
    CommandSpec {
        command: "size",
        action: "set_base_size",
        arg_key: "size",
    },
    CommandSpec {
        command: "resize",
        action: "set_resize",
        arg_key: "value",
    },
    CommandSpec {
        command: "preset_save",
        action: "save_preset",
        arg_key: "name",
    },
    CommandSpec {
        command: "preset_load",
        action: "load_preset",
        arg_key: "name",
    },
    CommandSpec {
        command: "preset_delete",
        action: "delete_preset",
        arg_key: "name",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "out",
        action: "set_output_dir",
        arg_key: "path",
    },
    CommandSpec {
        command: "image",
        action: "set_source_image",
        arg_key: "path",
    },
    CommandSpec {
        command: "edit",
        action: "edit",
        arg_key: "path",
    },
];

pub(crate) const CUSTOM_SIZE_COMMAND: CommandSpec = CommandSpec {
    command: "custom",
    action: "set_custom_size",
    arg_key: "dims",
};

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "generate",
        action: "generate",
        arg_key: "",
    },
    CommandSpec {
        command: "presets",
        action: "list_presets",
        arg_key: "",
    },
    CommandSpec {
        command: "clear_key",
        action: "clear_api_key",
        arg_key: "",
    },
    CommandSpec {
        command: "status",
        action: "status",
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

pub const PANEL_HELP_COMMANDS: &[&str] = &[
    "/prompt <text>",
    "/generate",
    "/image <path>",
    "/edit [path]",
    "/aspect <1x1|16x9|4x3|9x16|custom>",
    "/size <512|1024|1536|2048>",
    "/custom <width> <height>",
    "/resize <on|off>",
    "/model <name>",
    "/out <dir>",
    "/key <api-key>",
    "/clear_key",
    "/presets",
    "/preset_save <name>",
    "/preset_load <name>",
    "/preset_delete <name>",
    "/status",
    "/help",
    "/quit",
];
