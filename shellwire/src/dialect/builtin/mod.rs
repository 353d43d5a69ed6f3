//! Built-in shell dialects.

mod bash;
mod cmd;
mod powershell;

pub use bash::dialect as bash;
pub use cmd::dialect as cmd;
pub use powershell::dialect as powershell;

use super::ShellDialectSpec;

/// All built-in dialects, in registration order.
pub fn all() -> Vec<ShellDialectSpec> {
    vec![bash(), cmd(), powershell()]
}
