//! Autocomplete: a pure longest-common-prefix core plus the context
//! resolution that picks a candidate source for the text at the cursor.
//!
//! Completion walks the same path as parsing: isolate the editable pipe
//! segment, find the active command, then match the remainder against
//! whichever source applies (option flags, an option's value source, or
//! the command's own source).

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::parser::match_name;
use crate::registry::Registry;

// ---------------------------------------------------------------------------
// Candidate sources
// ---------------------------------------------------------------------------

/// A completion candidate source.
///
/// Every shape funnels into one resolved list before matching.
#[derive(Clone)]
pub enum Completer {
    /// A fixed candidate list.
    Static(Vec<String>),
    /// Synchronous function of the current sub-context.
    Sync(Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>),
    /// Asynchronous function of the current sub-context.
    Async(Arc<dyn Fn(String) -> BoxFuture<'static, Vec<String>> + Send + Sync>),
}

impl Completer {
    pub fn fixed<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Completer::Static(items.into_iter().map(Into::into).collect())
    }

    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Completer::Sync(Arc::new(f))
    }

    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Vec<String>> + Send + 'static,
    {
        Completer::Async(Arc::new(move |context| Box::pin(f(context))))
    }

    /// Resolve the source against the current sub-context.
    pub async fn resolve(&self, context: &str) -> Vec<String> {
        match self {
            Completer::Static(items) => items.clone(),
            Completer::Sync(f) => f(context),
            Completer::Async(f) => f(context.to_string()).await,
        }
    }
}

impl fmt::Debug for Completer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completer::Static(items) => f.debug_tuple("Static").field(&items.len()).finish(),
            Completer::Sync(_) => f.write_str("Sync(..)"),
            Completer::Async(_) => f.write_str("Async(..)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Longest-common-prefix core
// ---------------------------------------------------------------------------

/// Outcome of matching a search string against candidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// A unique or extending completion replacing the search text.
    Replace(String),
    /// Ambiguous matches for display.
    Candidates(Vec<String>),
}

/// Longest-common-prefix match of `search` against `candidates`.
///
/// Candidates are compared by their visible text, so color codes do not
/// break matching. With `hold_path` set, everything up to the last `/` in
/// the search is held out of the comparison and reattached verbatim to a
/// replacement. `None` means nothing matched at all, which callers treat
/// differently from an ambiguous list.
pub fn match_candidates(
    search: &str,
    candidates: &[String],
    hold_path: bool,
) -> Option<MatchResult> {
    let mut sorted = candidates.to_vec();
    sorted.sort();

    let (prefix, needle) = if hold_path {
        match search.rfind('/') {
            Some(idx) => search.split_at(idx + 1),
            None => ("", search),
        }
    } else {
        ("", search)
    };

    let matches: Vec<&String> = sorted
        .iter()
        .filter(|candidate| strip_ansi(candidate).starts_with(needle))
        .collect();

    match matches.len() {
        0 => None,
        1 => {
            let only = matches[0];
            let space = if strip_ansi(only).ends_with('/') { "" } else { " " };
            Some(MatchResult::Replace(format!("{prefix}{only}{space}")))
        },
        _ => {
            if needle.is_empty() {
                return Some(MatchResult::Candidates(
                    matches.into_iter().cloned().collect(),
                ));
            }
            let common = common_prefix(&matches);
            if common.len() <= needle.len() {
                Some(MatchResult::Candidates(
                    matches.into_iter().cloned().collect(),
                ))
            } else {
                Some(MatchResult::Replace(format!("{prefix}{common}")))
            }
        },
    }
}

/// Match with leading whitespace held out and restored on replacement.
pub(crate) fn match_trimmed(
    text: &str,
    candidates: &[String],
    hold_path: bool,
) -> Option<MatchResult> {
    let rest = text.trim_start();
    let lead = &text[..text.len() - rest.len()];
    match match_candidates(rest.trim_end(), candidates, hold_path)? {
        MatchResult::Replace(replacement) => {
            Some(MatchResult::Replace(format!("{lead}{replacement}")))
        },
        list => Some(list),
    }
}

fn common_prefix(matches: &[&String]) -> String {
    let first = matches[0].as_str();
    let mut len = first.len();
    for other in &matches[1..] {
        let shared = first
            .chars()
            .zip(other.chars())
            .take_while(|(a, b)| a == b)
            .map(|(a, _)| a.len_utf8())
            .sum();
        len = len.min(shared);
    }
    first[..len].to_string()
}

/// Remove ANSI escape sequences for visible-text comparisons.
fn strip_ansi(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\u{1b}' {
            out.push(ch);
            continue;
        }
        if chars.peek() == Some(&'[') {
            chars.next();
            // Parameter bytes run until a final byte in `@`..=`~`.
            for next in chars.by_ref() {
                if ('@'..='~').contains(&next) {
                    break;
                }
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Context resolution
// ---------------------------------------------------------------------------

/// What a completion request produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Full replacement for the edited line.
    Line(String),
    /// Ambiguous candidates for display. `fresh` marks a path-style
    /// context (ending in `/`) that is exempt from repeated-tab damping.
    List { items: Vec<String>, fresh: bool },
}

/// Split the line at a character cursor.
fn split_at_cursor(line: &str, cursor: usize) -> (String, String) {
    let chars: Vec<char> = line.chars().collect();
    let cut = cursor.min(chars.len());
    let left: String = chars[..cut].iter().collect();
    let right: String = chars[cut..].iter().collect();
    (left, right)
}

/// The preserved tail right of the cursor, minus its first partial word.
fn cursor_suffix(right: &str) -> String {
    if let Some(rest) = right.strip_prefix(' ') {
        return rest.to_string();
    }
    match right.split_once(' ') {
        Some((_, rest)) => rest.to_string(),
        None => String::new(),
    }
}

/// Prefix-filter for ambiguous contexts.
///
/// Applies the same `/`-holdout as the match core. Already-typed complete
/// leading words are stripped from multi-word candidates so the display
/// stays compact.
fn filter_candidates(search: &str, candidates: &[String], hold_path: bool) -> Vec<String> {
    let tail = if hold_path {
        match search.rfind('/') {
            Some(idx) => &search[idx + 1..],
            None => search,
        }
    } else {
        search
    };
    let needle = tail.trim();
    let typed = needle.split_whitespace().count();
    let complete_words = if needle.is_empty() {
        0
    } else if tail.ends_with(char::is_whitespace) {
        typed
    } else {
        typed - 1
    };

    let mut items = Vec::new();
    for candidate in candidates {
        if !strip_ansi(candidate).starts_with(needle) {
            continue;
        }
        let words: Vec<&str> = candidate.split(' ').collect();
        if words.len() > 1 && complete_words > 0 && complete_words < words.len() {
            items.push(words[complete_words..].join(" "));
        } else {
            items.push(candidate.clone());
        }
    }
    items.sort();
    items
}

/// Complete the line at `cursor` (a character index).
///
/// Tries a direct match against command names first; if the typed name is
/// already complete, falls through to argument-level completion against
/// the active command's sources.
pub(crate) async fn complete_line(
    registry: &Registry,
    line: &str,
    cursor: usize,
) -> Option<Completion> {
    let (left, right) = split_at_cursor(line, cursor);
    let suffix = cursor_suffix(&right);
    let (prefix, context) = match left.rfind('|') {
        Some(idx) => left.split_at(idx + 1),
        None => ("", left.as_str()),
    };

    // Direct top-level match against command names and aliases.
    let names = registry.completion_names();
    match match_trimmed(context, &names, false) {
        Some(MatchResult::Replace(replacement)) if replacement != context => {
            return Some(Completion::Line(format!("{prefix}{replacement}{suffix}")));
        },
        Some(MatchResult::Replace(_)) => {
            // The full name is already typed; complete its arguments.
        },
        Some(MatchResult::Candidates(items)) => {
            return Some(Completion::List { items, fresh: false });
        },
        None => {},
    }

    // Resolve the active command for argument-level completion.
    let text = context.trim_start();
    let entries = registry.lookup_entries();
    let (command, sub) = match match_name(&entries, context) {
        Some(found) => {
            let sub = &text[found.name_len..];
            (found.command, sub)
        },
        None => match registry.catch_command() {
            Some(catch) => (catch, text),
            None => return None,
        },
    };

    let fresh = sub.ends_with('/');
    let words: Vec<&str> = sub.split_whitespace().collect();
    let at_boundary = sub.is_empty() || sub.ends_with(char::is_whitespace);
    let last = if at_boundary {
        ""
    } else {
        words.last().copied().unwrap_or("")
    };
    let before_last = if at_boundary {
        words.last().copied()
    } else if words.len() >= 2 {
        Some(words[words.len() - 2])
    } else {
        None
    };

    let options = command.options();
    let (search, candidates) = if last.starts_with('-') && !command.allows_unknown() {
        let flags: Vec<String> = options
            .iter()
            .map(|opt| opt.display_flag().to_string())
            .collect();
        (last.to_string(), flags)
    } else if let Some(prev) = before_last
        && prev.starts_with('-')
        && let Some(opt) = options
            .iter()
            .find(|opt| opt.matches_word(prev.trim_start_matches('-')))
        && opt.takes_value()
    {
        match opt.completer().cloned() {
            Some(source) => (last.to_string(), source.resolve(last).await),
            None => return None,
        }
    } else {
        let search = sub.trim_start().to_string();
        match command.completer() {
            Some(source) => {
                let resolved = source.resolve(&search).await;
                (search, resolved)
            },
            None => (search, Vec::new()),
        }
    };

    match match_candidates(&search, &candidates, true) {
        Some(MatchResult::Replace(replacement)) => {
            let kept = &context[..context.len() - search.len()];
            Some(Completion::Line(format!(
                "{prefix}{kept}{replacement}{suffix}"
            )))
        },
        _ => {
            let items = filter_candidates(&search, &candidates, true);
            if items.is_empty() {
                None
            } else {
                Some(Completion::List { items, fresh })
            }
        },
    }
}
