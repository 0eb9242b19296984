#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

/// Commands whose whole remainder is one free-text argument.
pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "nano",
    action: "nano",
}];

/// Commands taking a single item or outfit id.
pub(crate) const ID_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "top",
        action: "select_top",
    },
    CommandSpec {
        command: "bottom",
        action: "select_bottom",
    },
    CommandSpec {
        command: "like",
        action: "like",
    },
    CommandSpec {
        command: "unlike",
        action: "unlike",
    },
    CommandSpec {
        command: "remove",
        action: "remove_item",
    },
];

pub(crate) const SINGLE_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "transfer",
    action: "transfer",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "outfit",
        action: "generate_outfit",
    },
    CommandSpec {
        command: "tops",
        action: "list_tops",
    },
    CommandSpec {
        command: "bottoms",
        action: "list_bottoms",
    },
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "limits",
        action: "limits",
    },
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
];

pub(crate) const COOLDOWN_COMMAND: CommandSpec = CommandSpec {
    command: "cooldown",
    action: "set_cooldown",
};

pub(crate) const WINDOW_COMMAND: CommandSpec = CommandSpec {
    command: "window",
    action: "set_window",
};

pub const SESSION_HELP_COMMANDS: &[&str] = &[
    "/top",
    "/bottom",
    "/outfit",
    "/nano",
    "/transfer",
    "/tops",
    "/bottoms",
    "/remove",
    "/history",
    "/like",
    "/unlike",
    "/limits",
    "/cooldown",
    "/window",
    "/help",
    "/quit",
];
