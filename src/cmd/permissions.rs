//! Authorization check: `boardsync can`.

use anyhow::{Context, Result};
use boardsync_common::{Action, Role, authorize};

pub fn cmd_can(role: &str, action: &str) -> Result<()> {
    let role = Role::parse(role);
    let action: Action = action.parse().context("Failed to parse action")?;

    let verdict = if authorize(role, action) { "allow" } else { "deny" };
    println!("{} {} {}", role, action, verdict);
    Ok(())
}
