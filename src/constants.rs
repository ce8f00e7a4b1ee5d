// src/constants.rs

/// Clap id of the hidden positional that collects operands beyond the declared arguments.
/// The leading underscores keep it out of the valid parameter namespace.
pub const EXTRA_OPERANDS_ID: &str = "__extra_operands";

/// Clap id of the flag that disables interactive prompting.
pub const NO_INTERACTIVE_ID: &str = "__no_interactive";

/// Long form of the flag that disables interactive prompting.
pub const NO_INTERACTIVE_FLAG: &str = "no-interactive";

/// Long flag reserved by the parser for help output.
pub const RESERVED_HELP_FLAG: &str = "help";

/// Short alias reserved by the parser for help output.
pub const RESERVED_HELP_ALIAS: &str = "h";

/// Message template for generated prompts; `{}` is replaced by the parameter name.
pub const DEFAULT_PROMPT_TEMPLATE: &str = "Please enter a value for {}:";

/// Raw value the parser records for an optional-value option given without a value.
pub const FLAG_PRESENT_VALUE: &str = "true";
