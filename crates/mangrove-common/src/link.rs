use std::{
    fmt::{self, Display},
    io::{self, BufRead, Write},
};

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt};

use crate::error::{
    InvalidPidSnafu, InvalidSeparatorSnafu, IoSnafu, MalformedLinkSnafu,
    Result,
};

/// Process ids as the kernel hands them out (`pid_t`).
pub type Pid = i32;

/// One kinship: `parent` owns `child`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
pub struct Link {
    pub parent: Pid,
    pub child: Pid,
}

impl Link {
    pub const fn new(parent: Pid, child: Pid) -> Self {
        Self { parent, child }
    }

    #[must_use]
    pub const fn reversed(self) -> Self {
        Self {
            parent: self.child,
            child: self.parent,
        }
    }

    /// The link followed by its mirror image.
    pub const fn with_mirror(self) -> [Self; 2] {
        [self, self.reversed()]
    }

    pub const fn touches(self, pid: Pid) -> bool {
        self.parent == pid || self.child == pid
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.parent, self.child)
    }
}

impl From<(Pid, Pid)> for Link {
    fn from((parent, child): (Pid, Pid)) -> Self {
        Self { parent, child }
    }
}

pub fn parse_pid(literal: &str) -> Result<Pid> {
    literal.trim().parse().ok().context(InvalidPidSnafu {
        literal: literal.to_string(),
    })
}

/// Line format of tree files: `<parent><separator><child>\n`.
#[derive(Debug, Clone, Copy)]
pub struct LinkCodec<'a> {
    separator: &'a str,
}

impl<'a> LinkCodec<'a> {
    pub fn new(separator: &'a str) -> Result<Self> {
        let reason = if separator.is_empty() {
            Some("must not be empty")
        } else if separator.contains(['\n', '\r']) {
            Some("must not contain a line break")
        } else if separator.chars().any(|c| c.is_ascii_digit()) {
            Some("must not contain digits")
        } else {
            None
        };
        if let Some(reason) = reason {
            return InvalidSeparatorSnafu {
                separator: separator.to_string(),
                reason,
            }
            .fail();
        }
        Ok(Self { separator })
    }

    /// For separators that already went through [`LinkCodec::new`].
    pub(crate) const fn validated(separator: &'a str) -> Self {
        Self { separator }
    }

    pub fn separator(&self) -> &'a str {
        self.separator
    }

    pub fn encode(&self, link: Link, out: &mut impl Write) -> io::Result<()> {
        writeln!(out, "{}{}{}", link.parent, self.separator, link.child)
    }

    /// Parses one line (without its line break). Blank lines yield `None`.
    pub fn decode(
        &self,
        line: &str,
    ) -> std::result::Result<Option<Link>, String> {
        if line.trim().is_empty() {
            return Ok(None);
        }
        let (parent, child) = line
            .split_once(self.separator)
            .ok_or_else(|| format!("missing separator in {line:?}"))?;
        let parent = parent
            .trim()
            .parse()
            .map_err(|_| format!("invalid parent pid {:?}", parent.trim()))?;
        let child = child
            .trim()
            .parse()
            .map_err(|_| format!("invalid child pid {:?}", child.trim()))?;
        Ok(Some(Link { parent, child }))
    }

    /// Reads every link of a tree file. A final line without its line break
    /// is accepted.
    pub fn read_all(
        &self,
        reader: impl BufRead,
        tree: &str,
        path: &std::path::Path,
    ) -> Result<Vec<Link>> {
        let lines = self.read_lines(reader, tree, path)?;
        Ok(lines.into_iter().filter_map(|(_, link)| link).collect())
    }

    /// Every line of a tree file exactly as stored, line break included,
    /// next to the link it holds. Blank lines hold none.
    pub fn read_lines(
        &self,
        mut reader: impl BufRead,
        tree: &str,
        path: &std::path::Path,
    ) -> Result<Vec<(String, Option<Link>)>> {
        let mut lines = Vec::new();
        loop {
            let mut text = String::new();
            if reader.read_line(&mut text).context(IoSnafu { path })? == 0 {
                return Ok(lines);
            }
            let body = text.strip_suffix('\n').unwrap_or(&text);
            let body = body.strip_suffix('\r').unwrap_or(body);
            match self.decode(body) {
                Ok(link) => lines.push((text, link)),
                Err(reason) => {
                    return MalformedLinkSnafu {
                        tree,
                        line: lines.len() + 1,
                        reason,
                    }
                    .fail();
                }
            }
        }
    }
}
