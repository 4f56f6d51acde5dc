//! Reaction rules for `mangd`.
//!
//! A rule file is a sequence of `;` terminated rules:
//!
//! ```text
//! # restart the shipper whenever the agent goes away
//! exec 'agent' -> 'logger -t mangd agent died';
//! 'build' -> 'test';   # kill every `test` once a `build` vanishes
//! ```
//!
//! Names are single quoted; inside quotes `\'` and `\\` escape a quote and a
//! backslash. Outside quotes whitespace is free and `#` starts a comment that
//! runs to the end of the line. The optional leading word picks the action;
//! rules without one get the daemon's default.
//!
//! [`RuleReader`] streams rules out of any reader. A malformed rule is
//! reported with its line number and the reader carries on after the next
//! `;`, so one bad rule never hides the ones that follow it.

use std::{
    fmt::{self, Display, Write as _},
    io::{self, BufRead, Bytes, Read},
    str::FromStr,
};

use serde::Serialize;
use strum::{Display as StrumDisplay, EnumString};

/// Longest parent or child field, in bytes.
pub const MAX_FIELD_LEN: usize = 255;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    StrumDisplay,
    EnumString,
    Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// SIGKILL every live process named like the child.
    Kill,
    /// Run the child text through `/bin/sh -c`.
    Exec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Parent,
    Child,
}

impl Role {
    const fn index(self) -> usize {
        match self {
            Role::Parent => 0,
            Role::Child => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    pub parent: String,
    pub child: String,
    pub action: Option<Action>,
}

impl Rule {
    pub fn new(parent: impl Into<String>, child: impl Into<String>) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            action: None,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    pub fn action_or(&self, default: Action) -> Action {
        self.action.unwrap_or(default)
    }
}

fn write_quoted(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_char('\'')?;
    for c in text.chars() {
        if matches!(c, '\'' | '\\') {
            f.write_char('\\')?;
        }
        f.write_char(c)?;
    }
    f.write_char('\'')
}

impl Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(action) = self.action {
            write!(f, "{action} ")?;
        }
        write_quoted(f, &self.parent)?;
        f.write_str("->")?;
        write_quoted(f, &self.child)?;
        f.write_char(';')
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleErrorKind {
    #[error("quote not closed before the end of the line")]
    UnterminatedQuote,
    #[error("{role} name longer than {max} bytes", max = MAX_FIELD_LEN)]
    FieldTooLong { role: Role },
    #[error("'-' and '>' may only appear together, once, after the parent")]
    MisplacedLinker,
    #[error("missing '->' between parent and child")]
    MissingLinker,
    #[error("empty {role} name")]
    EmptyField { role: Role },
    #[error("unexpected {0:?} outside quotes")]
    UnexpectedChar(char),
    #[error("unexpected quote")]
    UnexpectedQuote,
    #[error("unknown action {0:?}, expected kill or exec")]
    UnknownAction(String),
    #[error("file ends in the middle of a rule")]
    UnexpectedEof,
    #[error("{role} name is not valid UTF-8")]
    InvalidUtf8 { role: Role },
    #[error("read failed: {0}")]
    Io(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {kind}")]
pub struct RuleError {
    pub line: usize,
    pub kind: RuleErrorKind,
}

impl RuleError {
    pub fn new(line: usize, kind: RuleErrorKind) -> Self {
        Self { line, kind }
    }
}

impl From<io::Error> for RuleErrorKind {
    fn from(e: io::Error) -> Self {
        RuleErrorKind::Io(e.to_string())
    }
}

/// What feeding one byte to a [`Scanner`] produced.
enum Step {
    More,
    /// `;` closed a rule with nothing in it.
    Blank,
    Done(Result<Rule, RuleError>),
}

/// Scanner state for the rule being read.
#[derive(Default)]
struct Scanner {
    role_is_child: bool,
    in_quote: bool,
    in_comment: bool,
    escaped: bool,
    /// A `-` waiting for its `>`.
    saw_dash: bool,
    /// Any token at all since the last `;`.
    touched: bool,
    closed: [bool; 2],
    fields: [Vec<u8>; 2],
    keyword: Vec<u8>,
    keyword_done: bool,
    action: Option<Action>,
    error: Option<RuleError>,
}

impl Scanner {
    fn role(&self) -> Role {
        if self.role_is_child {
            Role::Child
        } else {
            Role::Parent
        }
    }

    /// Keeps the first error of the rule, the rest is noise.
    fn fail(&mut self, line: usize, kind: RuleErrorKind) {
        if self.error.is_none() {
            self.error = Some(RuleError::new(line, kind));
        }
    }

    fn push(&mut self, line: usize, byte: u8) {
        let role = self.role();
        let field = &mut self.fields[role.index()];
        if field.len() == MAX_FIELD_LEN {
            self.fail(line, RuleErrorKind::FieldTooLong { role });
        } else {
            field.push(byte);
        }
    }

    fn feed(&mut self, byte: u8, line: &mut usize) -> Step {
        if self.in_comment {
            if byte == b'\n' {
                *line += 1;
                self.in_comment = false;
            }
            return Step::More;
        }
        if self.error.is_some() {
            // resynchronise on the next `;`, quotes no longer mean anything
            match byte {
                b';' => return self.finish(*line),
                b'#' => self.in_comment = true,
                b'\n' => *line += 1,
                _ => {}
            }
            return Step::More;
        }
        if self.in_quote {
            self.feed_quoted(byte, line);
            return Step::More;
        }
        match byte {
            b';' => return self.finish(*line),
            b'#' => self.in_comment = true,
            b'\n' => {
                if self.saw_dash {
                    self.fail(*line, RuleErrorKind::MisplacedLinker);
                }
                *line += 1;
            }
            b if b.is_ascii_whitespace() => {
                if self.saw_dash {
                    self.fail(*line, RuleErrorKind::MisplacedLinker);
                }
                if !self.keyword.is_empty() {
                    self.keyword_done = true;
                }
            }
            b'\'' => self.open_quote(*line),
            b'-' => {
                self.touched = true;
                if self.saw_dash || self.role_is_child {
                    self.fail(*line, RuleErrorKind::MisplacedLinker);
                } else if !self.closed[Role::Parent.index()] {
                    self.fail(
                        *line,
                        RuleErrorKind::EmptyField { role: Role::Parent },
                    );
                }
                self.saw_dash = true;
            }
            b'>' => {
                self.touched = true;
                if !self.saw_dash || self.role_is_child {
                    self.fail(*line, RuleErrorKind::MisplacedLinker);
                } else if self.fields[Role::Parent.index()].is_empty() {
                    self.fail(
                        *line,
                        RuleErrorKind::EmptyField { role: Role::Parent },
                    );
                }
                self.saw_dash = false;
                self.role_is_child = true;
            }
            b if b.is_ascii_alphabetic()
                && !self.keyword_done
                && !self.touched_quotes() =>
            {
                self.touched = true;
                self.keyword.push(b);
            }
            b => {
                self.touched = true;
                self.fail(*line, RuleErrorKind::UnexpectedChar(char::from(b)));
            }
        }
        Step::More
    }

    fn touched_quotes(&self) -> bool {
        self.closed[Role::Parent.index()] || self.role_is_child || self.saw_dash
    }

    fn feed_quoted(&mut self, byte: u8, line: &mut usize) {
        if byte == b'\n' {
            self.fail(*line, RuleErrorKind::UnterminatedQuote);
            self.in_quote = false;
            self.escaped = false;
            *line += 1;
        } else if self.escaped {
            self.escaped = false;
            self.push(*line, byte);
        } else if byte == b'\\' {
            self.escaped = true;
        } else if byte == b'\'' {
            self.in_quote = false;
            self.closed[self.role().index()] = true;
        } else {
            self.push(*line, byte);
        }
    }

    fn open_quote(&mut self, line: usize) {
        self.touched = true;
        if self.saw_dash {
            self.fail(line, RuleErrorKind::MisplacedLinker);
        }
        if self.closed[self.role().index()] {
            self.fail(line, RuleErrorKind::UnexpectedQuote);
        }
        if !self.role_is_child && !self.keyword.is_empty() {
            let word = String::from_utf8_lossy(&self.keyword).into_owned();
            match Action::from_str(&word) {
                Ok(action) => self.action = Some(action),
                Err(_) => self.fail(line, RuleErrorKind::UnknownAction(word)),
            }
            self.keyword.clear();
            self.keyword_done = true;
        }
        self.in_quote = true;
    }

    fn finish(&mut self, line: usize) -> Step {
        let scanner = std::mem::take(self);
        if let Some(error) = scanner.error {
            return Step::Done(Err(error));
        }
        if !scanner.touched {
            return Step::Blank;
        }
        let fail = |kind| Step::Done(Err(RuleError::new(line, kind)));
        if scanner.saw_dash {
            return fail(RuleErrorKind::MisplacedLinker);
        }
        if !scanner.keyword.is_empty() {
            // a bare word that never met a quote
            return fail(RuleErrorKind::MissingLinker);
        }
        if !scanner.role_is_child {
            return fail(RuleErrorKind::MissingLinker);
        }
        let [parent, child] = scanner.fields;
        if !scanner.closed[Role::Child.index()] || child.is_empty() {
            return fail(RuleErrorKind::EmptyField { role: Role::Child });
        }
        let Ok(parent) = String::from_utf8(parent) else {
            return fail(RuleErrorKind::InvalidUtf8 { role: Role::Parent });
        };
        let Ok(child) = String::from_utf8(child) else {
            return fail(RuleErrorKind::InvalidUtf8 { role: Role::Child });
        };
        Step::Done(Ok(Rule {
            parent,
            child,
            action: scanner.action,
        }))
    }

    /// End of input: fine between rules, an error inside one.
    fn finish_eof(self, line: usize) -> Option<Result<Rule, RuleError>> {
        if let Some(error) = self.error {
            return Some(Err(error));
        }
        (self.touched || self.in_quote)
            .then(|| Err(RuleError::new(line, RuleErrorKind::UnexpectedEof)))
    }
}

/// Streams [`Rule`]s out of a reader. Yields `Err` for malformed rules and
/// keeps going; stops after the first I/O error or at end of input.
pub struct RuleReader<R> {
    bytes: Bytes<R>,
    line: usize,
    done: bool,
}

impl<R: BufRead> RuleReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            bytes: reader.bytes(),
            line: 1,
            done: false,
        }
    }

    /// Line the reader is currently on, 1-based.
    pub fn line(&self) -> usize {
        self.line
    }
}

impl<R: BufRead> Iterator for RuleReader<R> {
    type Item = Result<Rule, RuleError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut scanner = Scanner::default();
        loop {
            let byte = match self.bytes.next() {
                None => {
                    self.done = true;
                    return scanner.finish_eof(self.line);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(RuleError::new(self.line, e.into())));
                }
                Some(Ok(byte)) => byte,
            };
            match scanner.feed(byte, &mut self.line) {
                Step::More | Step::Blank => {}
                Step::Done(result) => return Some(result),
            }
        }
    }
}

/// Every rule and every error of `text`, in order.
pub fn parse_str(text: &str) -> Vec<Result<Rule, RuleError>> {
    RuleReader::new(text.as_bytes()).collect()
}

/// Splits a parse into the good rules and the errors.
pub fn partition(
    results: impl IntoIterator<Item = Result<Rule, RuleError>>,
) -> (Vec<Rule>, Vec<RuleError>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();
    for result in results {
        match result {
            Ok(rule) => rules.push(rule),
            Err(e) => errors.push(e),
        }
    }
    (rules, errors)
}

/// How [`rules_from_names`] pairs up names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NameLinking {
    /// Each name is the parent of the next instead of the first being the
    /// parent of all.
    pub chain: bool,
    pub reverse: bool,
    /// Emit every rule in both directions. Takes precedence over `reverse`.
    pub bidirectional: bool,
}

/// Builds rules linking process names the way pids are linked in trees.
pub fn rules_from_names<S: AsRef<str>>(
    names: &[S],
    linking: NameLinking,
) -> Vec<Rule> {
    let Some((first, rest)) = names.split_first() else {
        return Vec::new();
    };
    let mut parent = first.as_ref();
    let mut rules = Vec::new();
    for child in rest {
        let child = child.as_ref();
        let rule = if linking.reverse && !linking.bidirectional {
            Rule::new(child, parent)
        } else {
            Rule::new(parent, child)
        };
        if linking.bidirectional {
            let mirror = Rule::new(rule.child.clone(), rule.parent.clone());
            rules.push(rule);
            rules.push(mirror);
        } else {
            rules.push(rule);
        }
        if linking.chain {
            parent = child;
        }
    }
    rules
}

/// Rules of a whole file, read through a buffer.
pub fn read_rules<R: Read>(reader: R) -> RuleReader<io::BufReader<R>> {
    RuleReader::new(io::BufReader::new(reader))
}
