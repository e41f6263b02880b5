//! Command model: name templates, option specs, and lifecycle hooks.
//!
//! A command is declared from a template like `cook <meal> [sides...]` and
//! configured fluently afterwards. Configuration lives behind a lock so the
//! registry can hand out shared handles while hosts keep chaining setters.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use conch_types::{Args, ConchError, Result};

use crate::complete::Completer;
use crate::context::{ActionFlow, ExecContext};

/// Action invoked when a command runs.
pub type ActionFn = Arc<dyn Fn(ExecContext, Args) -> ActionFlow + Send + Sync>;
/// Pre-action check. An `Err` completes the invocation without running it.
pub type ValidateFn = Arc<dyn Fn(&Args) -> Result<()> + Send + Sync>;
/// Cleanup hook fired on cancellation.
pub type CancelFn = Arc<dyn Fn(&ExecContext) + Send + Sync>;
/// Hook fired after an invocation's fan-in completes.
pub type DoneFn = Arc<dyn Fn(&ExecContext) + Send + Sync>;
/// Raw-line rewrite applied after name match, before pipe splitting.
/// Receives the full line and the remainder after the matched name.
pub type ParseFn = Arc<dyn Fn(&str, &str) -> String + Send + Sync>;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// How an option treats a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueMode {
    /// Boolean switch, never consumes a value.
    Flag,
    /// `--opt [value]`: consumes a value when one follows.
    Optional,
    /// `--opt <value>`: a following value is mandatory.
    Required,
}

/// One declared option, parsed from a flag spec string.
///
/// Accepted spec shapes: `-f, --force`, `--amount <n>`, `--dir [path]`,
/// `--no-color`. A `--no-` long name declares a negated boolean whose field
/// defaults to `true` when the option is absent.
#[derive(Clone)]
pub struct OptionSpec {
    flags: String,
    description: String,
    short: Option<String>,
    long: Option<String>,
    mode: ValueMode,
    completer: Option<Completer>,
}

impl OptionSpec {
    /// Parse a flag spec string.
    pub fn parse(flags: &str, description: &str) -> Result<Self> {
        let mut short = None;
        let mut long = None;
        let mut mode = ValueMode::Flag;
        for token in flags.split([' ', ',', '|']).filter(|t| !t.is_empty()) {
            if token.starts_with('<') {
                if !token.ends_with('>') {
                    return Err(ConchError::Registration(format!(
                        "unclosed value bracket in option spec '{flags}'"
                    )));
                }
                mode = ValueMode::Required;
            } else if token.starts_with('[') {
                if !token.ends_with(']') {
                    return Err(ConchError::Registration(format!(
                        "unclosed value bracket in option spec '{flags}'"
                    )));
                }
                mode = ValueMode::Optional;
            } else if let Some(rest) = token.strip_prefix("--") {
                if rest.is_empty() {
                    return Err(ConchError::Registration(format!(
                        "empty long flag in option spec '{flags}'"
                    )));
                }
                long = Some(token.to_string());
            } else if token.starts_with('-') && token.len() > 1 {
                short = Some(token.to_string());
            } else {
                return Err(ConchError::Registration(format!(
                    "malformed token '{token}' in option spec '{flags}'"
                )));
            }
        }
        if short.is_none() && long.is_none() {
            return Err(ConchError::Registration(format!(
                "option spec '{flags}' declares no flag"
            )));
        }
        Ok(Self {
            flags: flags.to_string(),
            description: description.to_string(),
            short,
            long,
            mode,
            completer: None,
        })
    }

    fn with_completer(mut self, completer: Completer) -> Self {
        self.completer = Some(completer);
        self
    }

    /// The flags string as declared, for help output.
    pub fn flags(&self) -> &str {
        &self.flags
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn mode(&self) -> ValueMode {
        self.mode
    }

    pub fn takes_value(&self) -> bool {
        self.mode != ValueMode::Flag
    }

    /// Whether the long form is declared `--no-...`.
    pub fn negated(&self) -> bool {
        self.long.as_deref().is_some_and(|l| l.starts_with("--no-"))
    }

    /// Positive name: the long (or short) flag without dashes or `no-`.
    pub fn name(&self) -> &str {
        let raw = match (&self.long, &self.short) {
            (Some(long), _) => long.trim_start_matches('-'),
            (None, Some(short)) => short.trim_start_matches('-'),
            (None, None) => "",
        };
        raw.strip_prefix("no-").unwrap_or(raw)
    }

    /// Field the parsed value binds to: the positive name in camelCase.
    pub fn field(&self) -> String {
        camel_case(self.name())
    }

    /// Flag shown as an autocomplete candidate.
    pub fn display_flag(&self) -> &str {
        match (&self.long, &self.short) {
            (Some(long), _) => long,
            (None, Some(short)) => short,
            (None, None) => "",
        }
    }

    /// Whether `word` (a typed flag without leading dashes) names this option.
    pub(crate) fn matches_word(&self, word: &str) -> bool {
        let short = self.short.as_deref().map(|s| s.trim_start_matches('-'));
        let long = self.long.as_deref().map(|l| l.trim_start_matches('-'));
        short == Some(word) || long == Some(word) || self.name() == word
    }

    pub fn completer(&self) -> Option<&Completer> {
        self.completer.as_ref()
    }
}

impl fmt::Debug for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptionSpec")
            .field("flags", &self.flags)
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

/// Convert a hyphenated flag name to its camelCase field form.
pub(crate) fn camel_case(name: &str) -> String {
    let mut parts = name.split('-');
    let mut out = String::new();
    if let Some(first) = parts.next() {
        out.push_str(first);
    }
    for part in parts {
        let mut chars = part.chars();
        if let Some(c) = chars.next() {
            out.extend(c.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Positional arguments
// ---------------------------------------------------------------------------

/// One positional slot derived from the name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgSpec {
    pub name: String,
    pub required: bool,
    pub variadic: bool,
}

impl ArgSpec {
    /// Render the slot the way it appears in usage text.
    pub fn display(&self) -> String {
        let dots = if self.variadic { "..." } else { "" };
        if self.required {
            format!("<{}{dots}>", self.name)
        } else {
            format!("[{}{dots}]", self.name)
        }
    }
}

/// Split a registration template into the literal name and its arg slots.
///
/// Slots are re-sequenced so required ones come first and a variadic slot
/// lands last, which keeps binding order independent of declaration order.
pub(crate) fn parse_template(template: &str) -> Result<(String, Vec<ArgSpec>)> {
    let template = template.trim();
    let spec_start = template
        .find(['<', '['])
        .unwrap_or(template.len());
    let name = template[..spec_start].trim();

    let mut args = Vec::new();
    for token in template[spec_start..].split_whitespace() {
        let (inner, required) = if let Some(rest) = token.strip_prefix('<') {
            match rest.strip_suffix('>') {
                Some(inner) => (inner, true),
                None => {
                    return Err(ConchError::Registration(format!(
                        "malformed argument token '{token}' in template '{template}'"
                    )));
                },
            }
        } else if let Some(rest) = token.strip_prefix('[') {
            match rest.strip_suffix(']') {
                Some(inner) => (inner, false),
                None => {
                    return Err(ConchError::Registration(format!(
                        "malformed argument token '{token}' in template '{template}'"
                    )));
                },
            }
        } else {
            return Err(ConchError::Registration(format!(
                "unexpected token '{token}' in template '{template}'"
            )));
        };
        let (name, variadic) = match inner.strip_suffix("...") {
            Some(base) => (base, true),
            None => (inner, false),
        };
        if name.is_empty() {
            return Err(ConchError::Registration(format!(
                "empty argument name in template '{template}'"
            )));
        }
        args.push(ArgSpec {
            name: name.to_string(),
            required,
            variadic,
        });
    }

    if args.iter().filter(|a| a.variadic).count() > 1 {
        return Err(ConchError::Registration(format!(
            "template '{template}' declares more than one variadic argument"
        )));
    }
    // Required slots first, variadic last. Stable, so declaration order is
    // kept within each class.
    args.sort_by_key(|a| (!a.required, a.variadic));

    Ok((name.to_string(), args))
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// What role a command plays in dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Normal,
    /// Entering redirects subsequent raw lines to this command's action.
    Mode,
    /// Fallback target when no literal name matches.
    Catch,
}

#[derive(Default)]
struct CommandState {
    description: String,
    aliases: Vec<String>,
    options: Vec<OptionSpec>,
    hidden: bool,
    allow_unknown: bool,
    delimiter: Option<String>,
    completer: Option<Completer>,
    action: Option<ActionFn>,
    validate: Option<ValidateFn>,
    cancel: Option<CancelFn>,
    done: Option<DoneFn>,
    help: Option<ActionFn>,
    init: Option<ActionFn>,
    parse: Option<ParseFn>,
}

/// A named, invocable unit held by the registry.
pub struct Command {
    name: String,
    args: Vec<ArgSpec>,
    kind: CommandKind,
    state: RwLock<CommandState>,
}

impl Command {
    pub(crate) fn build(template: &str, kind: CommandKind) -> Result<Self> {
        let (name, args) = parse_template(template)?;
        // A catch command is never matched by name, so its template may be
        // pure arg slots.
        if name.is_empty() && kind != CommandKind::Catch {
            return Err(ConchError::Registration(format!(
                "command template '{template}' has no name"
            )));
        }
        Ok(Self {
            name,
            args,
            kind,
            state: RwLock::new(CommandState::default()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, CommandState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CommandState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[ArgSpec] {
        &self.args
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn is_mode(&self) -> bool {
        self.kind == CommandKind::Mode
    }

    pub fn is_catch(&self) -> bool {
        self.kind == CommandKind::Catch
    }

    // -- Fluent configuration --

    /// Set the one-line description shown by help.
    pub fn describe(&self, text: &str) -> &Self {
        self.write().description = text.to_string();
        self
    }

    /// Declare an option from a flag spec string.
    pub fn option(&self, flags: &str, description: &str) -> Result<&Self> {
        let spec = OptionSpec::parse(flags, description)?;
        self.write().options.push(spec);
        Ok(self)
    }

    /// Declare an option carrying its own completion source.
    pub fn option_with(
        &self,
        flags: &str,
        description: &str,
        completer: Completer,
    ) -> Result<&Self> {
        let spec = OptionSpec::parse(flags, description)?.with_completer(completer);
        self.write().options.push(spec);
        Ok(self)
    }

    /// Exclude this command from help summaries and top-level completion.
    pub fn hidden(&self) -> &Self {
        self.write().hidden = true;
        self
    }

    /// Capture unrecognized option tokens instead of rejecting them.
    pub fn allow_unknown_options(&self) -> &Self {
        self.write().allow_unknown = true;
        self
    }

    /// Set the delimiter overlay applied while this mode is active.
    pub fn delimiter(&self, text: &str) -> &Self {
        self.write().delimiter = Some(text.to_string());
        self
    }

    /// Attach the command-level completion source.
    pub fn autocomplete(&self, completer: Completer) -> &Self {
        self.write().completer = Some(completer);
        self
    }

    pub fn action<F>(&self, f: F) -> &Self
    where
        F: Fn(ExecContext, Args) -> ActionFlow + Send + Sync + 'static,
    {
        self.write().action = Some(Arc::new(f));
        self
    }

    pub fn validate<F>(&self, f: F) -> &Self
    where
        F: Fn(&Args) -> Result<()> + Send + Sync + 'static,
    {
        self.write().validate = Some(Arc::new(f));
        self
    }

    pub fn cancel<F>(&self, f: F) -> &Self
    where
        F: Fn(&ExecContext) + Send + Sync + 'static,
    {
        self.write().cancel = Some(Arc::new(f));
        self
    }

    pub fn done<F>(&self, f: F) -> &Self
    where
        F: Fn(&ExecContext) + Send + Sync + 'static,
    {
        self.write().done = Some(Arc::new(f));
        self
    }

    /// Replace standard help output for this command.
    pub fn help<F>(&self, f: F) -> &Self
    where
        F: Fn(ExecContext, Args) -> ActionFlow + Send + Sync + 'static,
    {
        self.write().help = Some(Arc::new(f));
        self
    }

    /// Set the hook run when this mode is entered. Mode commands only.
    pub fn init<F>(&self, f: F) -> Result<&Self>
    where
        F: Fn(ExecContext, Args) -> ActionFlow + Send + Sync + 'static,
    {
        if !self.is_mode() {
            return Err(ConchError::Registration(format!(
                "init hook requires a mode command, '{}' is not one",
                self.name
            )));
        }
        self.write().init = Some(Arc::new(f));
        Ok(self)
    }

    /// Set the raw-line rewrite hook.
    pub fn parse<F>(&self, f: F) -> &Self
    where
        F: Fn(&str, &str) -> String + Send + Sync + 'static,
    {
        self.write().parse = Some(Arc::new(f));
        self
    }

    pub(crate) fn push_alias(&self, alias: &str) {
        self.write().aliases.push(alias.to_string());
    }

    // -- Accessors --

    pub fn description(&self) -> String {
        self.read().description.clone()
    }

    pub fn aliases(&self) -> Vec<String> {
        self.read().aliases.clone()
    }

    pub fn options(&self) -> Vec<OptionSpec> {
        self.read().options.clone()
    }

    pub fn is_hidden(&self) -> bool {
        self.read().hidden
    }

    pub fn allows_unknown(&self) -> bool {
        self.read().allow_unknown
    }

    pub fn mode_delimiter(&self) -> Option<String> {
        self.read().delimiter.clone()
    }

    pub fn completer(&self) -> Option<Completer> {
        self.read().completer.clone()
    }

    pub fn action_hook(&self) -> Option<ActionFn> {
        self.read().action.clone()
    }

    pub fn validate_hook(&self) -> Option<ValidateFn> {
        self.read().validate.clone()
    }

    pub fn cancel_hook(&self) -> Option<CancelFn> {
        self.read().cancel.clone()
    }

    pub fn done_hook(&self) -> Option<DoneFn> {
        self.read().done.clone()
    }

    pub fn help_hook(&self) -> Option<ActionFn> {
        self.read().help.clone()
    }

    pub fn init_hook(&self) -> Option<ActionFn> {
        self.read().init.clone()
    }

    pub fn parse_hook(&self) -> Option<ParseFn> {
        self.read().parse.clone()
    }

    // -- Help rendering --

    /// One-line usage: name, `[options]`, then the arg slots in order.
    pub fn usage(&self) -> String {
        let mut usage = format!("{} [options]", self.name);
        for arg in &self.args {
            usage.push(' ');
            usage.push_str(&arg.display());
        }
        usage
    }

    /// Multi-line detailed help: usage, aliases, description, option table.
    pub fn help_information(&self) -> String {
        let state = self.read();
        let mut width = "--help".len();
        for opt in &state.options {
            width = width.max(opt.flags.len());
        }

        let mut out = String::new();
        out.push_str(&format!("\n  Usage:  {}\n\n", self.usage()));
        if !state.aliases.is_empty() {
            out.push_str(&format!("  Alias: {}\n\n", state.aliases.join(" | ")));
        }
        if !state.description.is_empty() {
            out.push_str(&format!("  {}\n\n", state.description));
        }
        out.push_str("  Options:\n\n");
        out.push_str(&format!(
            "    {:width$}  output usage information\n",
            "--help"
        ));
        for opt in &state.options {
            out.push_str(&format!(
                "    {:width$}  {}\n",
                opt.flags, opt.description
            ));
        }
        out
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// In-module tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- Template parsing tests ----

    #[test]
    fn template_with_variadic_slot() {
        let (name, args) = parse_template("add [numbers...]").unwrap();
        assert_eq!(name, "add");
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].name, "numbers");
        assert!(!args[0].required);
        assert!(args[0].variadic);
    }

    #[test]
    fn template_with_multi_word_name() {
        let (name, args) = parse_template("deep command [opt]").unwrap();
        assert_eq!(name, "deep command");
        assert_eq!(args[0].name, "opt");
    }

    #[test]
    fn template_without_args() {
        let (name, args) = parse_template("exit").unwrap();
        assert_eq!(name, "exit");
        assert!(args.is_empty());
    }

    #[test]
    fn template_resequences_required_first() {
        let (_, args) = parse_template("cook [sides...] [sauce] <meal>").unwrap();
        let order: Vec<&str> = args.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(order, ["meal", "sauce", "sides"]);
        assert!(args[0].required);
        assert!(args[2].variadic);
    }

    #[test]
    fn template_rejects_two_variadics() {
        assert!(parse_template("bad [a...] [b...]").is_err());
    }

    #[test]
    fn template_rejects_junk_token() {
        assert!(parse_template("bad <a> junk").is_err());
    }

    #[test]
    fn template_rejects_unclosed_bracket() {
        assert!(parse_template("bad <a").is_err());
    }

    #[test]
    fn nameless_template_only_allowed_for_catch() {
        assert!(Command::build("<lonely>", CommandKind::Normal).is_err());
        let catch = Command::build("[words...]", CommandKind::Catch).unwrap();
        assert_eq!(catch.name(), "");
        assert!(catch.is_catch());
    }

    // ---- Option spec tests ----

    #[test]
    fn option_with_short_and_long() {
        let opt = OptionSpec::parse("-f, --force", "force it").unwrap();
        assert_eq!(opt.name(), "force");
        assert_eq!(opt.mode(), ValueMode::Flag);
        assert_eq!(opt.display_flag(), "--force");
        assert!(opt.matches_word("f"));
        assert!(opt.matches_word("force"));
        assert!(!opt.matches_word("forc"));
    }

    #[test]
    fn option_with_required_value() {
        let opt = OptionSpec::parse("--amount <n>", "how much").unwrap();
        assert_eq!(opt.mode(), ValueMode::Required);
        assert!(opt.takes_value());
    }

    #[test]
    fn option_with_optional_value() {
        let opt = OptionSpec::parse("-d, --dir [path]", "where").unwrap();
        assert_eq!(opt.mode(), ValueMode::Optional);
    }

    #[test]
    fn negated_option_keeps_positive_name() {
        let opt = OptionSpec::parse("--no-color", "disable color").unwrap();
        assert!(opt.negated());
        assert_eq!(opt.name(), "color");
        assert!(opt.matches_word("no-color"));
        assert!(opt.matches_word("color"));
    }

    #[test]
    fn option_field_is_camel_cased() {
        let opt = OptionSpec::parse("--save-dir <path>", "output dir").unwrap();
        assert_eq!(opt.field(), "saveDir");
    }

    #[test]
    fn option_spec_without_flags_is_rejected() {
        assert!(OptionSpec::parse("force", "no dashes").is_err());
        assert!(OptionSpec::parse("<value>", "only a bracket").is_err());
    }

    #[test]
    fn option_spec_unclosed_bracket_is_rejected() {
        assert!(OptionSpec::parse("--amount <n", "oops").is_err());
    }

    #[test]
    fn camel_case_handles_multiple_segments() {
        assert_eq!(camel_case("save-dir"), "saveDir");
        assert_eq!(camel_case("a-b-c"), "aBC");
        assert_eq!(camel_case("plain"), "plain");
    }

    // ---- Command tests ----

    #[test]
    fn fluent_configuration_reads_back() {
        let cmd = Command::build("serve <port>", CommandKind::Normal).unwrap();
        cmd.describe("start the server")
            .hidden()
            .allow_unknown_options();
        cmd.option("-v, --verbose", "spell it out").unwrap();

        assert_eq!(cmd.description(), "start the server");
        assert!(cmd.is_hidden());
        assert!(cmd.allows_unknown());
        assert_eq!(cmd.options().len(), 1);
    }

    #[test]
    fn init_rejected_on_non_mode_command() {
        let cmd = Command::build("plain", CommandKind::Normal).unwrap();
        let err = cmd
            .init(|_ctx, _args| ActionFlow::unit())
            .map(|_| ())
            .unwrap_err();
        assert!(err.to_string().contains("mode command"));
    }

    #[test]
    fn init_accepted_on_mode_command() {
        let cmd = Command::build("repl", CommandKind::Mode).unwrap();
        assert!(cmd.init(|_ctx, _args| ActionFlow::unit()).is_ok());
        assert!(cmd.init_hook().is_some());
    }

    #[test]
    fn usage_lists_resequenced_args() {
        let cmd = Command::build("cook [sides...] <meal>", CommandKind::Normal).unwrap();
        assert_eq!(cmd.usage(), "cook [options] <meal> [sides...]");
    }

    #[test]
    fn help_information_has_usage_and_options() {
        let cmd = Command::build("serve <port>", CommandKind::Normal).unwrap();
        cmd.describe("start the server");
        cmd.option("-v, --verbose", "spell it out").unwrap();
        cmd.push_alias("listen");

        let help = cmd.help_information();
        assert!(help.contains("Usage:  serve [options] <port>"));
        assert!(help.contains("Alias: listen"));
        assert!(help.contains("start the server"));
        assert!(help.contains("--help"));
        assert!(help.contains("output usage information"));
        assert!(help.contains("-v, --verbose"));
    }

    #[test]
    fn hooks_are_stored_and_cloned_out() {
        let cmd = Command::build("work", CommandKind::Normal).unwrap();
        assert!(cmd.action_hook().is_none());
        cmd.action(|_ctx, _args| ActionFlow::unit())
            .validate(|_args| Ok(()))
            .cancel(|_ctx| {})
            .done(|_ctx| {})
            .parse(|line, _rest| line.to_string());
        assert!(cmd.action_hook().is_some());
        assert!(cmd.validate_hook().is_some());
        assert!(cmd.cancel_hook().is_some());
        assert!(cmd.done_hook().is_some());
        assert!(cmd.parse_hook().is_some());
    }
}
