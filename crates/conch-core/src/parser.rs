//! Command-line parsing: pipe splitting, tokenization, and argument binding.
//!
//! A typed line is split on unquoted `|` characters into stages. Each stage
//! is matched against the registry (longest name or alias first), its
//! remainder is tokenized, and the tokens are bound to the matched command's
//! declared options and positional arguments.

use std::iter::Peekable;
use std::sync::Arc;
use std::vec::IntoIter;

use conch_types::{ArgValue, Args, ConchError, OptionValue, Result};

use crate::command::{Command, OptionSpec, ValueMode};
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Parsed output
// ---------------------------------------------------------------------------

/// One pipe stage: the matched command and its bound arguments.
#[derive(Debug)]
pub struct ParsedStage {
    pub command: Arc<Command>,
    pub args: Args,
    /// The stage's segment text as typed, trimmed.
    pub raw: String,
}

/// A fully parsed line, one stage per pipe segment.
#[derive(Debug)]
pub struct ParsedLine {
    pub stages: Vec<ParsedStage>,
}

/// A parse failure, carrying the failing stage's command when one matched.
///
/// Callers use the command to print targeted help instead of the general
/// command summary.
#[derive(Debug)]
pub struct ParseError {
    pub command: Option<Arc<Command>>,
    pub error: ConchError,
}

impl From<ParseError> for ConchError {
    fn from(failure: ParseError) -> Self {
        failure.error
    }
}

// ---------------------------------------------------------------------------
// Tokenizer: single quotes, double quotes, and backticks.
// ---------------------------------------------------------------------------

/// Tokenize a stage remainder respecting quotes.
///
/// A quoted span is atomic: whitespace inside it never splits a token. Quote
/// characters opening a token are stripped; quotes opened mid-token (as in
/// `key="a b"`) are kept so key=value normalization can see them. An
/// unterminated quote runs to the end of the input.
pub fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut started = false;
    // (closing character, whether the quote characters are kept)
    let mut quote: Option<(char, bool)> = None;

    for ch in input.chars() {
        if let Some((close, keep)) = quote {
            if ch == close {
                if keep {
                    current.push(ch);
                }
                quote = None;
            } else {
                current.push(ch);
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                let keep = started;
                if keep {
                    current.push(ch);
                }
                started = true;
                quote = Some((ch, keep));
            },
            c if c.is_whitespace() => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            },
            _ => {
                started = true;
                current.push(ch);
            },
        }
    }

    if started {
        tokens.push(current);
    }

    tokens
}

// ---------------------------------------------------------------------------
// Pipe splitting
// ---------------------------------------------------------------------------

/// Split a line on `|` (respecting quotes) into trimmed stage segments.
///
/// Quote characters stay in the segments; stripping happens later, at
/// tokenization. Empty segments are dropped.
pub fn split_pipes(input: &str) -> Vec<String> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut in_quote: Option<char> = None;

    for ch in input.chars() {
        if let Some(close) = in_quote {
            current.push(ch);
            if ch == close {
                in_quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' | '`' => {
                in_quote = Some(ch);
                current.push(ch);
            },
            '|' => {
                let segment = current.trim().to_string();
                if !segment.is_empty() {
                    segments.push(segment);
                }
                current.clear();
            },
            _ => current.push(ch),
        }
    }

    let segment = current.trim().to_string();
    if !segment.is_empty() {
        segments.push(segment);
    }

    segments
}

// ---------------------------------------------------------------------------
// Key=value normalization
// ---------------------------------------------------------------------------

/// Strip one matching layer of quotes from the value of a `key=value` token.
///
/// Tokens that do not look like a key=value pair pass through unchanged.
pub(crate) fn normalize_key_value(token: &str) -> String {
    let Some(eq) = token.find('=') else {
        return token.to_string();
    };
    let key = &token[..eq];
    let value = &token[eq + 1..];
    let identifier = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if !identifier {
        return token.to_string();
    }
    format!("{key}={}", strip_quote_layer(value))
}

fn strip_quote_layer(value: &str) -> &str {
    let mut chars = value.chars();
    if let (Some(first), Some(last)) = (chars.next(), chars.next_back())
        && first == last
        && matches!(first, '\'' | '"' | '`')
    {
        return &value[1..value.len() - 1];
    }
    value
}

// ---------------------------------------------------------------------------
// Command matching
// ---------------------------------------------------------------------------

/// A command matched at the head of a segment.
pub(crate) struct NameMatch {
    pub command: Arc<Command>,
    /// Byte length of the matched name within the trimmed segment.
    pub name_len: usize,
}

/// Match a segment against registry entries, longest name or alias first.
///
/// A name only matches on a full word boundary, so `car` never claims
/// `cards please`.
pub(crate) fn match_name(
    entries: &[(String, Arc<Command>)],
    segment: &str,
) -> Option<NameMatch> {
    let text = segment.trim();
    let mut best: Option<&(String, Arc<Command>)> = None;
    for entry in entries {
        let name = entry.0.as_str();
        if name.is_empty() {
            continue;
        }
        let fits = text == name
            || (text.starts_with(name) && text[name.len()..].starts_with(' '));
        if fits && best.is_none_or(|(b, _)| name.len() > b.len()) {
            best = Some(entry);
        }
    }
    best.map(|(name, command)| NameMatch {
        command: Arc::clone(command),
        name_len: name.len(),
    })
}

fn resolve_segment(
    registry: &Registry,
    entries: &[(String, Arc<Command>)],
    segment: &str,
) -> Option<(Arc<Command>, String)> {
    match match_name(entries, segment) {
        Some(found) => {
            let text = segment.trim();
            let remainder = text[found.name_len..].trim_start().to_string();
            Some((found.command, remainder))
        },
        // The catch command receives the whole segment as its remainder.
        None => registry
            .catch_command()
            .map(|catch| (catch, segment.trim().to_string())),
    }
}

// ---------------------------------------------------------------------------
// Argument binding
// ---------------------------------------------------------------------------

/// Whether a token is an option flag rather than a value.
///
/// A lone `-` and negative numbers count as values.
fn is_flag_token(token: &str) -> bool {
    let mut chars = token.chars();
    chars.next() == Some('-')
        && chars
            .next()
            .is_some_and(|c| !c.is_ascii_digit() && c != '.')
}

/// Take the next token as an option value unless it is itself a flag.
fn next_value(rest: &mut Peekable<IntoIter<String>>) -> Option<String> {
    if rest.peek().is_some_and(|t| !is_flag_token(t)) {
        rest.next()
    } else {
        None
    }
}

fn bind_option(
    command: &Command,
    options: &[OptionSpec],
    args: &mut Args,
    token: &str,
    rest: &mut Peekable<IntoIter<String>>,
) -> Result<()> {
    let body = token.trim_start_matches('-');
    let (word, inline) = match body.split_once('=') {
        Some((word, value)) => (word, Some(value.to_string())),
        None => (body, None),
    };

    // `--help` is always accepted, declared or not.
    if word == "help" {
        args.insert_option("help", OptionValue::Bool(true));
        return Ok(());
    }

    let mut spec = options.iter().find(|opt| opt.matches_word(word));
    let mut negation = false;
    if spec.is_none()
        && let Some(positive) = word.strip_prefix("no-")
    {
        spec = options.iter().find(|opt| opt.matches_word(positive));
        negation = spec.is_some();
    }
    if let Some(opt) = spec
        && opt.negated()
        && word.starts_with("no-")
    {
        negation = true;
    }

    let Some(opt) = spec else {
        return bind_unknown(command, args, word, inline, rest, token);
    };

    let field = opt.field();
    if negation {
        if opt.mode() == ValueMode::Required {
            return Err(ConchError::MissingOptionValue(opt.name().to_string()));
        }
        args.insert_option(&field, OptionValue::Bool(false));
        return Ok(());
    }

    match opt.mode() {
        ValueMode::Flag => {
            let value = match inline {
                Some(text) => OptionValue::Str(text),
                None => OptionValue::Bool(true),
            };
            args.insert_option(&field, value);
        },
        ValueMode::Required | ValueMode::Optional => {
            match inline.or_else(|| next_value(rest)) {
                Some(text) => args.insert_option(&field, OptionValue::Str(text)),
                None if opt.mode() == ValueMode::Required => {
                    return Err(ConchError::MissingOptionValue(opt.name().to_string()));
                },
                None => args.insert_option(&field, OptionValue::Bool(true)),
            }
        },
    }
    Ok(())
}

fn bind_unknown(
    command: &Command,
    args: &mut Args,
    word: &str,
    inline: Option<String>,
    rest: &mut Peekable<IntoIter<String>>,
    token: &str,
) -> Result<()> {
    if !command.allows_unknown() {
        let typed = match token.find('=') {
            Some(eq) => &token[..eq],
            None => token,
        };
        return Err(ConchError::UnknownOption(typed.to_string()));
    }
    // Unknown keys keep their typed spelling; only declared options get the
    // camelCase treatment.
    let value = match inline.or_else(|| next_value(rest)) {
        Some(text) => OptionValue::Str(text),
        None => OptionValue::Bool(true),
    };
    args.insert_option(word, value);
    Ok(())
}

/// Bind a stage's tokens to the command's options and positional slots.
fn build_args(command: &Command, remainder: &str, raw: &str, normalize: bool) -> Result<Args> {
    let mut tokens = tokenize(remainder);
    if normalize {
        for token in &mut tokens {
            *token = normalize_key_value(token);
        }
    }

    let options = command.options();
    let mut args = Args::from_raw(raw);

    // Negated booleans default to true so that absence differs from
    // passing `--no-flag`.
    for opt in &options {
        if opt.negated() {
            args.insert_option(&opt.field(), OptionValue::Bool(true));
        }
    }

    let mut positional = Vec::new();
    let mut iter = tokens.into_iter().peekable();
    while let Some(token) = iter.next() {
        if token == "--" {
            positional.extend(iter.by_ref());
            break;
        }
        if !is_flag_token(&token) {
            positional.push(token);
            continue;
        }
        bind_option(command, &options, &mut args, &token, &mut iter)?;
    }

    let specs = command.args();
    let mut leftovers = positional.into_iter();
    for spec in specs {
        if spec.variadic {
            args.insert_arg(&spec.name, ArgValue::List(leftovers.by_ref().collect()));
        } else if let Some(value) = leftovers.next() {
            args.insert_arg(&spec.name, ArgValue::Str(value));
        } else if spec.required {
            return Err(ConchError::MissingRequiredArg(spec.name.clone()));
        }
    }
    if specs.is_empty() {
        let rest: Vec<String> = leftovers.collect();
        if !rest.is_empty() {
            args.set_rest(rest);
        }
    }

    Ok(args)
}

// ---------------------------------------------------------------------------
// Line parsing
// ---------------------------------------------------------------------------

fn parse_stage(
    registry: &Registry,
    entries: &[(String, Arc<Command>)],
    segment: &str,
    normalize: bool,
) -> std::result::Result<ParsedStage, ParseError> {
    let Some((command, remainder)) = resolve_segment(registry, entries, segment) else {
        return Err(ParseError {
            command: None,
            error: ConchError::UnknownCommand(segment.to_string()),
        });
    };
    match build_args(&command, &remainder, segment, normalize) {
        Ok(args) => Ok(ParsedStage {
            command,
            args,
            raw: segment.to_string(),
        }),
        Err(error) => Err(ParseError {
            command: Some(command),
            error,
        }),
    }
}

/// Parse a full line into pipe stages.
///
/// The head command is matched against the whole line first, so that a
/// registered parse hook can rewrite the line before it is split on pipes.
/// The rewritten line is split and matched once; the hook never runs on
/// its own output. Any stage failing to match or bind fails the whole line.
pub fn parse_line(
    registry: &Registry,
    line: &str,
    normalize: bool,
) -> std::result::Result<ParsedLine, ParseError> {
    let entries = registry.lookup_entries();

    let rewritten = resolve_segment(registry, &entries, line).and_then(|(command, remainder)| {
        command
            .parse_hook()
            .map(|hook| hook(line.trim(), &remainder))
    });
    let line = rewritten.as_deref().unwrap_or(line);

    let segments = split_pipes(line);
    if segments.is_empty() {
        return Err(ParseError {
            command: None,
            error: ConchError::UnknownCommand(line.trim().to_string()),
        });
    }

    let mut stages = Vec::with_capacity(segments.len());
    for segment in &segments {
        stages.push(parse_stage(registry, &entries, segment, normalize)?);
    }
    Ok(ParsedLine { stages })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn registry_with(templates: &[&str]) -> Registry {
        let registry = Registry::new();
        for template in templates {
            registry.register(template).unwrap();
        }
        registry
    }

    fn parse(registry: &Registry, line: &str) -> ParsedLine {
        parse_line(registry, line, true).unwrap()
    }

    // ---- tokenizer tests ----

    #[test]
    fn tokenize_splits_on_whitespace() {
        assert_eq!(tokenize("one two  three"), vec!["one", "two", "three"]);
    }

    #[test]
    fn tokenize_strips_leading_quotes() {
        assert_eq!(tokenize("say 'big world' x"), vec!["say", "big world", "x"]);
        assert_eq!(tokenize(r#"a "b c" d"#), vec!["a", "b c", "d"]);
        assert_eq!(tokenize("`tick tock`"), vec!["tick tock"]);
    }

    #[test]
    fn tokenize_keeps_mid_token_quotes() {
        assert_eq!(tokenize(r#"--dir="my docs""#), vec![r#"--dir="my docs""#]);
    }

    #[test]
    fn tokenize_empty_quoted_token_survives() {
        assert_eq!(tokenize(r#"say """#), vec!["say", ""]);
    }

    #[test]
    fn tokenize_unterminated_quote_is_lenient() {
        assert_eq!(tokenize("say 'oops this runs"), vec!["say", "oops this runs"]);
    }

    #[test]
    fn tokenize_empty_input() {
        assert!(tokenize("").is_empty());
        assert!(tokenize("   ").is_empty());
    }

    // ---- pipe splitting tests ----

    #[test]
    fn split_pipes_basic() {
        assert_eq!(split_pipes("a | b | c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn split_pipes_keeps_quoted_pipe_atomic() {
        assert_eq!(
            split_pipes(r#"say "a|b" | reverse"#),
            vec![r#"say "a|b""#, "reverse"]
        );
    }

    #[test]
    fn split_pipes_drops_empty_segments() {
        assert_eq!(split_pipes("a | | b"), vec!["a", "b"]);
        assert_eq!(split_pipes("a |"), vec!["a"]);
    }

    // ---- normalization tests ----

    #[test]
    fn normalize_strips_one_quote_layer() {
        assert_eq!(normalize_key_value(r#"key="a b""#), "key=a b");
        assert_eq!(normalize_key_value("key='v'"), "key=v");
    }

    #[test]
    fn normalize_leaves_inner_quotes() {
        assert_eq!(normalize_key_value(r#"key="'v'""#), "key='v'");
    }

    #[test]
    fn normalize_ignores_non_pairs() {
        assert_eq!(normalize_key_value("plain"), "plain");
        assert_eq!(normalize_key_value("a b=c"), "a b=c");
        assert_eq!(normalize_key_value("=v"), "=v");
    }

    // ---- matching tests ----

    #[test]
    fn longest_name_wins() {
        let registry = registry_with(&["git", "git remote", "git remote add <name> <url>"]);
        let parsed = parse(&registry, "git remote add origin http://x");
        let stage = &parsed.stages[0];
        assert_eq!(stage.command.name(), "git remote add");
        assert_eq!(stage.args.arg_str("name"), Some("origin"));
        assert_eq!(stage.args.arg_str("url"), Some("http://x"));
    }

    #[test]
    fn name_matches_whole_words_only() {
        let registry = registry_with(&["car"]);
        let failure = parse_line(&registry, "cards please", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::UnknownCommand(_)));
        assert!(failure.command.is_none());
    }

    #[test]
    fn alias_matches() {
        let registry = Registry::new();
        let cmd = registry.register("exit").unwrap();
        registry.add_alias(&cmd, "quit").unwrap();
        let parsed = parse(&registry, "quit");
        assert_eq!(parsed.stages[0].command.name(), "exit");
    }

    #[test]
    fn catch_receives_whole_segment() {
        let registry = registry_with(&["say [words...]"]);
        registry.register_catch("[tokens...]").unwrap();
        let parsed = parse(&registry, "frobnicate the widget");
        let stage = &parsed.stages[0];
        assert!(stage.command.is_catch());
        assert_eq!(
            stage.args.arg_list("tokens"),
            Some(&["frobnicate".to_string(), "the".into(), "widget".into()][..])
        );
    }

    // ---- positional binding tests ----

    #[test]
    fn required_before_optional_regardless_of_template_order() {
        // Template declares the variadic first; binding still fills the
        // required slot from the first token.
        let registry = registry_with(&["deploy [extras...] <env>"]);
        let parsed = parse(&registry, "deploy prod a b");
        let stage = &parsed.stages[0];
        assert_eq!(stage.args.arg_str("env"), Some("prod"));
        assert_eq!(
            stage.args.arg_list("extras"),
            Some(&["a".to_string(), "b".into()][..])
        );
    }

    #[test]
    fn missing_required_argument_fails_with_command() {
        let registry = registry_with(&["deploy <env>"]);
        let failure = parse_line(&registry, "deploy", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::MissingRequiredArg(ref n) if n == "env"));
        assert_eq!(failure.command.unwrap().name(), "deploy");
    }

    #[test]
    fn variadic_collects_remaining_tokens() {
        let registry = registry_with(&["add [numbers...]"]);
        let parsed = parse(&registry, "add 1 -5 3.5");
        assert_eq!(
            parsed.stages[0].args.arg_list("numbers"),
            Some(&["1".to_string(), "-5".into(), "3.5".into()][..])
        );
    }

    #[test]
    fn zero_spec_command_keeps_extra_tokens_as_rest() {
        let registry = registry_with(&["ping"]);
        let parsed = parse(&registry, "ping a b c");
        assert_eq!(
            parsed.stages[0].args.rest(),
            &["a".to_string(), "b".into(), "c".into()]
        );
    }

    #[test]
    fn double_dash_ends_option_parsing() {
        let registry = registry_with(&["say [words...]"]);
        let parsed = parse(&registry, "say -- --force");
        assert_eq!(
            parsed.stages[0].args.arg_list("words"),
            Some(&["--force".to_string()][..])
        );
    }

    // ---- option binding tests ----

    #[test]
    fn flag_option_binds_true() {
        let registry = Registry::new();
        let cmd = registry.register("exit").unwrap();
        cmd.option("-f, --force", "forces exit").unwrap();
        let parsed = parse(&registry, "exit -f");
        assert_eq!(parsed.stages[0].args.option_bool("force"), Some(true));
        let parsed = parse(&registry, "exit --force");
        assert_eq!(parsed.stages[0].args.option_bool("force"), Some(true));
    }

    #[test]
    fn hyphenated_flag_binds_camel_case_field() {
        let registry = Registry::new();
        let cmd = registry.register("build").unwrap();
        cmd.option("--dry-run", "do not write").unwrap();
        let parsed = parse(&registry, "build --dry-run");
        assert_eq!(parsed.stages[0].args.option_bool("dryRun"), Some(true));
    }

    #[test]
    fn required_value_option() {
        let registry = Registry::new();
        let cmd = registry.register("build").unwrap();
        cmd.option("-o, --out <path>", "output directory").unwrap();

        let parsed = parse(&registry, "build --out dist");
        assert_eq!(parsed.stages[0].args.option_str("out"), Some("dist"));

        let parsed = parse(&registry, "build --out=dist");
        assert_eq!(parsed.stages[0].args.option_str("out"), Some("dist"));

        let failure = parse_line(&registry, "build --out", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::MissingOptionValue(ref n) if n == "out"));
    }

    #[test]
    fn required_value_option_rejects_following_flag() {
        let registry = Registry::new();
        let cmd = registry.register("build").unwrap();
        cmd.option("--out <path>", "output directory").unwrap();
        cmd.option("--force", "overwrite").unwrap();
        let failure = parse_line(&registry, "build --out --force", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::MissingOptionValue(_)));
    }

    #[test]
    fn optional_value_option_defaults_to_true() {
        let registry = Registry::new();
        let cmd = registry.register("log").unwrap();
        cmd.option("-v, --verbose [level]", "verbosity").unwrap();

        let parsed = parse(&registry, "log --verbose");
        assert_eq!(parsed.stages[0].args.option_bool("verbose"), Some(true));

        let parsed = parse(&registry, "log --verbose 3");
        assert_eq!(parsed.stages[0].args.option_str("verbose"), Some("3"));
    }

    #[test]
    fn negated_option_seeds_true_default() {
        let registry = Registry::new();
        let cmd = registry.register("render").unwrap();
        cmd.option("--no-color", "disable color").unwrap();

        let parsed = parse(&registry, "render");
        assert_eq!(parsed.stages[0].args.option_bool("color"), Some(true));

        let parsed = parse(&registry, "render --no-color");
        assert_eq!(parsed.stages[0].args.option_bool("color"), Some(false));

        let parsed = parse(&registry, "render --color");
        assert_eq!(parsed.stages[0].args.option_bool("color"), Some(true));
    }

    #[test]
    fn typed_negation_of_positive_option() {
        let registry = Registry::new();
        let cmd = registry.register("render").unwrap();
        cmd.option("--cache", "use the cache").unwrap();
        let parsed = parse(&registry, "render --no-cache");
        assert_eq!(parsed.stages[0].args.option_bool("cache"), Some(false));
    }

    #[test]
    fn unknown_option_fails() {
        let registry = registry_with(&["ping"]);
        let failure = parse_line(&registry, "ping --bogus", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::UnknownOption(ref t) if t == "--bogus"));
        assert_eq!(failure.command.unwrap().name(), "ping");
    }

    #[test]
    fn unknown_options_captured_when_allowed() {
        let registry = Registry::new();
        let cmd = registry.register("wrap").unwrap();
        cmd.allow_unknown_options();

        let parsed = parse(&registry, "wrap --bogus value --flag");
        let args = &parsed.stages[0].args;
        assert_eq!(args.option_str("bogus"), Some("value"));
        assert_eq!(args.option_bool("flag"), Some(true));
    }

    #[test]
    fn help_is_always_accepted() {
        let registry = registry_with(&["ping"]);
        let parsed = parse(&registry, "ping --help");
        assert!(parsed.stages[0].args.help_requested());
    }

    #[test]
    fn negative_numbers_are_values_not_flags() {
        let registry = Registry::new();
        let cmd = registry.register("wait").unwrap();
        cmd.option("--delay <ms>", "delay in ms").unwrap();
        let parsed = parse(&registry, "wait --delay -5");
        assert_eq!(parsed.stages[0].args.option_str("delay"), Some("-5"));
    }

    // ---- key=value toggle tests ----

    #[test]
    fn key_value_normalization_toggles() {
        let registry = registry_with(&["set [pairs...]"]);

        let parsed = parse_line(&registry, r#"set key="a b""#, true).unwrap();
        assert_eq!(
            parsed.stages[0].args.arg_list("pairs"),
            Some(&["key=a b".to_string()][..])
        );

        let parsed = parse_line(&registry, r#"set key="a b""#, false).unwrap();
        assert_eq!(
            parsed.stages[0].args.arg_list("pairs"),
            Some(&[r#"key="a b""#.to_string()][..])
        );
    }

    // ---- whole line tests ----

    #[test]
    fn quoted_pipe_stays_in_argument() {
        let registry = registry_with(&["say [words...]", "reverse [words...]"]);
        let parsed = parse(&registry, r#"say "a|b" | reverse"#);
        assert_eq!(parsed.stages.len(), 2);
        assert_eq!(parsed.stages[0].command.name(), "say");
        assert_eq!(
            parsed.stages[0].args.arg_list("words"),
            Some(&["a|b".to_string()][..])
        );
        assert_eq!(parsed.stages[1].command.name(), "reverse");
    }

    #[test]
    fn stage_raw_is_the_segment_text() {
        let registry = registry_with(&["say [words...]", "reverse [words...]"]);
        let parsed = parse(&registry, "say hi there | reverse");
        assert_eq!(parsed.stages[0].raw, "say hi there");
        assert_eq!(parsed.stages[0].args.raw(), Some("say hi there"));
        assert_eq!(parsed.stages[1].raw, "reverse");
    }

    #[test]
    fn unknown_downstream_stage_fails_the_line() {
        let registry = registry_with(&["say [words...]"]);
        let failure = parse_line(&registry, "say hi | nonesuch", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::UnknownCommand(ref s) if s == "nonesuch"));
    }

    #[test]
    fn parse_hook_rewrites_the_whole_line() {
        let registry = registry_with(&["say [words...]", "reverse [words...]"]);
        let foo = registry.register("foo").unwrap();
        foo.parse(|_line, _rest| "say hook | say made".to_string());

        let parsed = parse(&registry, "foo anything | reverse");
        let names: Vec<&str> = parsed
            .stages
            .iter()
            .map(|stage| stage.command.name())
            .collect();
        assert_eq!(names, ["say", "say"]);
        assert_eq!(
            parsed.stages[0].args.arg_list("words"),
            Some(&["hook".to_string()][..])
        );
    }

    #[test]
    fn parse_hook_appends_a_stage_after_existing_pipes() {
        let registry = registry_with(&["say [words...]", "reverse [words...]"]);
        let foo = registry.register("foo [args...]").unwrap();
        foo.parse(|line, _rest| format!("{line} | say tail"));

        let parsed = parse(&registry, "foo a | reverse");
        let names: Vec<&str> = parsed
            .stages
            .iter()
            .map(|stage| stage.command.name())
            .collect();
        assert_eq!(names, ["foo", "reverse", "say"]);
    }

    #[test]
    fn parse_hook_sees_the_line_and_the_remainder() {
        let seen = Arc::new(Mutex::new(None));
        let registry = registry_with(&["say [words...]"]);
        let again = registry.register("again").unwrap();
        let stash = Arc::clone(&seen);
        again.parse(move |line, rest| {
            *stash.lock().unwrap() = Some((line.to_string(), rest.to_string()));
            format!("say {rest}")
        });

        let parsed = parse(&registry, "again hi | say tail");
        assert_eq!(
            seen.lock().unwrap().take(),
            Some(("again hi | say tail".to_string(), "hi | say tail".to_string()))
        );
        assert_eq!(
            parsed.stages[0].args.arg_list("words"),
            Some(&["hi".to_string()][..])
        );
        assert_eq!(parsed.stages[1].command.name(), "say");
    }

    #[test]
    fn empty_line_is_unknown() {
        let registry = registry_with(&["say [words...]"]);
        let failure = parse_line(&registry, "   ", true).unwrap_err();
        assert!(matches!(failure.error, ConchError::UnknownCommand(_)));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn tokenize_matches_whitespace_split_without_quotes(
                input in "[a-z0-9 .=-]{0,60}"
            ) {
                let expected: Vec<String> =
                    input.split_whitespace().map(str::to_string).collect();
                prop_assert_eq!(tokenize(&input), expected);
            }

            #[test]
            fn quoted_span_is_never_split(inner in "[a-z |]{0,20}") {
                let line = format!("say \"{inner}\" | next");
                prop_assert_eq!(split_pipes(&line).len(), 2);
            }

            #[test]
            fn leading_quote_preserves_content(inner in "[a-z |=.-]{0,20}") {
                let quoted = format!("\"{inner}\"");
                prop_assert_eq!(tokenize(&quoted), vec![inner]);
            }
        }
    }
}
