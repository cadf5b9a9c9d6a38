#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "key",
    action: "set_credential",
}];

/// Commands taking one 1-based version number.
pub(crate) const VERSION_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "revert",
        action: "revert",
    },
    CommandSpec {
        command: "remove",
        action: "remove_version",
    },
    CommandSpec {
        command: "download",
        action: "download",
    },
];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "upload",
    action: "upload",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "reset",
        action: "reset",
    },
    CommandSpec {
        command: "clear",
        action: "clear",
    },
    CommandSpec {
        command: "submit",
        action: "submit_pending",
    },
    CommandSpec {
        command: "key_clear",
        action: "clear_credential",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "status",
        action: "status",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const REMOVE_IMAGE_COMMAND: CommandSpec = CommandSpec {
    command: "remove_image",
    action: "remove_image",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/upload <paths…>",
    "/revert <n>",
    "/reset",
    "/remove <n>",
    "/remove_image <n> <k>",
    "/clear",
    "/submit",
    "/key <api key>",
    "/key_clear",
    "/history",
    "/status",
    "/download [n]",
    "/help",
];
