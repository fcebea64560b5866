#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "prompt",
        action: "set_prompt",
    },
    CommandSpec {
        command: "tag",
        action: "insert_tag",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "upload",
        action: "upload",
    },
    CommandSpec {
        command: "attach",
        action: "attach",
    },
    CommandSpec {
        command: "save",
        action: "save",
    },
];

pub(crate) const NUMBER_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "feature",
        action: "append_feature",
    },
    CommandSpec {
        command: "slider",
        action: "set_slider",
    },
];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "help",
        action: "help",
    },
    CommandSpec {
        command: "quit",
        action: "quit",
    },
    CommandSpec {
        command: "exit",
        action: "quit",
    },
    CommandSpec {
        command: "detach",
        action: "detach",
    },
    CommandSpec {
        command: "clear",
        action: "clear",
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
        command: "tags",
        action: "list_tags",
    },
    CommandSpec {
        command: "suggest",
        action: "suggest",
    },
    CommandSpec {
        command: "scan",
        action: "scan",
    },
    CommandSpec {
        command: "edit",
        action: "edit",
    },
    CommandSpec {
        command: "animate",
        action: "animate",
    },
    CommandSpec {
        command: "analyze",
        action: "analyze",
    },
    CommandSpec {
        command: "generate",
        action: "generate",
    },
    CommandSpec {
        command: "refine",
        action: "refine",
    },
    CommandSpec {
        command: "reset",
        action: "reset",
    },
];

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/attach",
    "/detach",
    "/history",
    "/clear",
    "/help",
    "/quit",
];

pub const STUDIO_HELP_COMMANDS: &[&str] = &[
    "/upload",
    "/prompt",
    "/tag",
    "/tags",
    "/suggest",
    "/scan",
    "/feature",
    "/generate",
    "/edit",
    "/animate",
    "/analyze",
    "/slider",
    "/save",
    "/refine",
    "/reset",
    "/status",
    "/help",
    "/quit",
];
