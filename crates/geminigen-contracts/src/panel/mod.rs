mod command_registry;
mod intent_parser;

pub use command_registry::PANEL_HELP_COMMANDS;
pub use intent_parser::{parse_intent, Intent};
