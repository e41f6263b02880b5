//! Commands every engine ships with: `help` and `exit`.

use std::sync::Arc;

use conch_types::Result;
use serde_json::json;

use crate::context::ActionFlow;
use crate::engine::Engine;
use crate::registry::Registry;

/// Install the built-in commands on a freshly constructed engine.
pub(crate) fn register_builtins(engine: &Engine) -> Result<()> {
    let registry = Arc::downgrade(engine.registry());
    let width = engine.help_width();
    engine
        .command("help [command...]")?
        .describe("Provides help for a given command.")
        .action(move |ctx, args| {
            let Some(registry) = registry.upgrade() else {
                return ActionFlow::unit();
            };
            let query = args.arg_list("command").unwrap_or_default().join(" ");
            if query.is_empty() {
                ctx.log(summary(&registry, width));
            } else {
                match registry.find(&query) {
                    Some(command) => ctx.log(command.help_information()),
                    None => {
                        ctx.log("\n  Invalid Command. Showing Help:\n");
                        ctx.log(summary(&registry, width));
                    },
                }
            }
            ActionFlow::unit()
        });

    let exit = engine.command("exit")?;
    exit.describe("Exits this instance of the shell.")
        .option("-f, --force", "Forces exit without confirmation.")?
        .action(|_, args| {
            let force = args.option_bool("force").unwrap_or(false);
            ActionFlow::ok(json!({ "exit": true, "force": force }))
        });
    engine.alias(&exit, "quit")?;
    Ok(())
}

/// The summary listing printed for bare `help` and for unknown commands.
///
/// Hidden commands and the catch command are left out. Descriptions wrap
/// to `width` columns, continuation lines aligned under the first.
pub(crate) fn summary(registry: &Registry, width: usize) -> String {
    let visible: Vec<_> = registry
        .commands()
        .into_iter()
        .filter(|cmd| !cmd.is_hidden() && !cmd.is_catch())
        .collect();
    let col = visible
        .iter()
        .map(|cmd| cmd.usage().len())
        .max()
        .unwrap_or(0);
    let avail = width.saturating_sub(col + 6).max(20);

    let mut out = String::from("\n  Commands:\n\n");
    for cmd in &visible {
        let usage = cmd.usage();
        let lines = wrap(&cmd.description(), avail);
        match lines.split_first() {
            None => out.push_str(&format!("    {usage}\n")),
            Some((first, rest)) => {
                out.push_str(&format!("    {usage:<col$}  {first}\n"));
                for line in rest {
                    out.push_str(&format!("    {:<col$}  {line}\n", ""));
                }
            },
        }
    }
    out
}

fn wrap(text: &str, avail: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.len() + 1 + word.len() <= avail {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
