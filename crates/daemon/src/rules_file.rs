use std::{
    fs::{self, File},
    io::{self, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use mangd_rules::{Rule, RuleError, partition, read_rules};
use mangrove_common::census::name_matches;
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::error::{ReadRulesSnafu, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/mangd.conf";

/// The reaction rules of the daemon, cached until their file changes.
#[derive(Debug, Clone, Default)]
pub struct ReactionConfig {
    path: Option<PathBuf>,
    rules: Vec<Rule>,
    modified: Option<SystemTime>,
}

/// Every rule of the file at `path`, plus the malformed ones.
pub fn read_rule_file(path: &Path) -> Result<(Vec<Rule>, Vec<RuleError>)> {
    let file = File::open(path).context(ReadRulesSnafu { path })?;
    Ok(partition(read_rules(file)))
}

/// Prints `rules` one per line in rule syntax, or as a JSON array.
pub fn write_rules(
    rules: &[Rule],
    json: bool,
    out: &mut impl Write,
) -> io::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, rules)?;
        return writeln!(out);
    }
    for rule in rules {
        writeln!(out, "{rule}")?;
    }
    Ok(())
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl ReactionConfig {
    /// Fails only when the file cannot be read; malformed rules are logged
    /// and skipped.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let stamp = modified(&path);
        let rules = Self::read_logged(&path)?;
        info!("loaded {} rules from {}", rules.len(), path.display());
        Ok(Self {
            path: Some(path),
            rules,
            modified: stamp,
        })
    }

    /// Fixed rules that are never reloaded.
    pub fn from_rules(rules: Vec<Rule>) -> Self {
        Self {
            path: None,
            rules,
            modified: None,
        }
    }

    fn read_logged(path: &Path) -> Result<Vec<Rule>> {
        let (rules, errors) = read_rule_file(path)?;
        for e in errors {
            warn!("{}:{e}, rule skipped", path.display());
        }
        Ok(rules)
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Re-reads the file when its modification time moved. Returns whether
    /// the rules were replaced; on failure the previous rules stay.
    pub fn reload_if_changed(&mut self) -> bool {
        let Some(path) = &self.path else {
            return false;
        };
        let stamp = modified(path);
        if stamp == self.modified {
            return false;
        }
        match Self::read_logged(path) {
            Ok(rules) => {
                info!("reloaded {} rules from {}", rules.len(), path.display());
                self.rules = rules;
                self.modified = stamp;
                true
            }
            Err(e) => {
                warn!("keeping {} previous rules: {e}", self.rules.len());
                self.modified = stamp;
                false
            }
        }
    }

    /// Rules whose parent designates a process called `name`, file order.
    pub fn matching<'a>(
        &'a self,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules.iter().filter(move |rule| {
            let hit = name_matches(&rule.parent, name);
            if hit {
                debug!("{name} matches rule {rule}");
            }
            hit
        })
    }
}

#[cfg(test)]
mod tests {
    use mangd_rules::Action;

    use super::*;

    #[test]
    fn test_load_skips_malformed_rules() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "'a'->'b';\n'broken->'x';\nexec 'a'->'echo hi';\n")
            .unwrap();

        let config = ReactionConfig::load(file.path()).unwrap();

        assert_eq!(
            config.rules(),
            &[
                Rule::new("a", "b"),
                Rule::new("a", "echo hi").with_action(Action::Exec)
            ]
        );
        assert_eq!(config.matching("a").count(), 2);
        assert_eq!(config.matching("b").count(), 0);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ReactionConfig::load(dir.path().join("nope.conf")).is_err());
    }

    #[test]
    fn test_failed_reload_keeps_rules() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mangd.conf");
        fs::write(&path, "'a'->'b';").unwrap();
        let mut config = ReactionConfig::load(&path).unwrap();

        fs::remove_file(&path).unwrap();

        assert!(!config.reload_if_changed());
        assert_eq!(config.rules(), &[Rule::new("a", "b")]);
    }

    #[test]
    fn test_write_rules_as_text_and_json() {
        let rules = [
            Rule::new("a", "b"),
            Rule::new("it's", "echo").with_action(Action::Exec),
        ];

        let mut text = Vec::new();
        write_rules(&rules, false, &mut text).unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap(),
            "'a'->'b';\nexec 'it\\'s'->'echo';\n"
        );

        let mut json = Vec::new();
        write_rules(&rules, true, &mut json).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(
            parsed,
            serde_json::json!([
                { "parent": "a", "child": "b", "action": null },
                { "parent": "it's", "child": "echo", "action": "exec" },
            ])
        );
    }

    #[test]
    fn test_fixed_rules_never_reload() {
        let mut config = ReactionConfig::from_rules(vec![Rule::new("x", "y")]);
        assert!(!config.reload_if_changed());
        assert_eq!(config.matching("x").count(), 1);
    }
}
