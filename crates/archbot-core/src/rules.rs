//! Architecture rules: named markdown documents that every generated
//! architecture is checked against.
//!
//! Rules live as `*.md` files in one directory. The first `# ` heading is the
//! rule name; the whole file is the rule text handed to the evaluator. The
//! store is built once and shared read-only between sessions.

use std::fs;
use std::path::{Path, PathBuf};

use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub name: String,
    pub content: String,
    /// File the rule was read from, if any
    pub source: Option<PathBuf>,
}

impl Rule {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Rule {
            name: name.into(),
            content: content.into(),
            source: None,
        }
    }
}

/// Ordered, immutable rule collection. Duplicate names are kept.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    rules: Vec<Rule>,
}

impl RuleStore {
    pub fn new(rules: Vec<Rule>) -> Self {
        RuleStore { rules }
    }

    pub fn empty() -> Self {
        RuleStore::default()
    }

    /// Load every `*.md` file in `dir`, ordered by file name.
    ///
    /// A missing or unreadable directory gives an empty store: validation
    /// then becomes a no-op instead of blocking generation.
    pub fn load_dir(dir: &Path) -> Self {
        match rule_files(dir) {
            Ok(files) => {
                let rules: Vec<Rule> = files.iter().filter_map(|p| load_rule_file(p)).collect();
                tracing::info!(dir = %dir.display(), count = rules.len(), "loaded architecture rules");
                RuleStore { rules }
            }
            Err(e) => {
                tracing::warn!(dir = %dir.display(), "no rules loaded: {e}");
                RuleStore::empty()
            }
        }
    }

    pub fn all(&self) -> &[Rule] {
        &self.rules
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<Rule> for RuleStore {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        RuleStore::new(iter.into_iter().collect())
    }
}

fn rule_files(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    if !dir.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "rule directory does not exist",
        )));
    }
    // Surface permission problems before glob silently yields nothing
    fs::read_dir(dir)?;

    let pattern = format!(
        "{}/*.md",
        glob::Pattern::escape(&dir.to_string_lossy())
    );
    let mut files = Vec::new();
    for entry in glob::glob(&pattern)? {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => tracing::warn!("skipping unreadable rule entry: {e}"),
        }
    }
    files.sort();
    Ok(files)
}

fn load_rule_file(path: &Path) -> Option<Rule> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path.display(), "skipping rule file: {e}");
            return None;
        }
    };
    let rule = parse_rule(&text, path);
    match &rule {
        Some(r) => tracing::debug!(rule = %r.name, path = %path.display(), "loaded rule"),
        None => tracing::warn!(path = %path.display(), "skipping empty rule file"),
    }
    rule
}

/// Parse one markdown rule. The name is the first `# ` heading, falling back
/// to the file name. Blank documents are not rules.
pub fn parse_rule(text: &str, source: &Path) -> Option<Rule> {
    if text.trim().is_empty() {
        return None;
    }
    let name = first_heading(text).unwrap_or_else(|| {
        source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source.display().to_string())
    });
    Some(Rule {
        name,
        content: text.to_string(),
        source: Some(source.to_path_buf()),
    })
}

fn first_heading(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let rest = line.strip_prefix('#')?;
        if !rest.starts_with(|c: char| c == ' ' || c == '\t') {
            return None;
        }
        let title = rest.trim();
        (!title.is_empty()).then(|| title.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heading_becomes_name() {
        let rule = parse_rule(
            "Intro line\n## Not this\n# Least Privilege IAM\n\nEvery role is scoped.",
            Path::new("/rules/iam.md"),
        )
        .unwrap();
        assert_eq!(rule.name, "Least Privilege IAM");
        assert!(rule.content.starts_with("Intro line"));
        assert_eq!(rule.source.as_deref(), Some(Path::new("/rules/iam.md")));
    }

    #[test]
    fn file_name_when_no_heading() {
        let rule = parse_rule("Use multi-AZ for databases.", Path::new("/rules/multi_az.md")).unwrap();
        assert_eq!(rule.name, "multi_az.md");
    }

    #[test]
    fn blank_file_is_not_a_rule() {
        assert!(parse_rule("  \n\n", Path::new("x.md")).is_none());
    }

    #[test]
    fn load_dir_sorts_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_encryption.md"), "# Encrypt at rest\nKMS everywhere").unwrap();
        fs::write(dir.path().join("a_iam.md"), "# IAM\nLeast privilege").unwrap();
        fs::write(dir.path().join("empty.md"), "\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "# Not a rule").unwrap();
        fs::write(dir.path().join("c_dup.md"), "# IAM\nAgain").unwrap();

        let store = RuleStore::load_dir(dir.path());
        let names: Vec<&str> = store.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["IAM", "Encrypt at rest", "IAM"]);
    }

    #[test]
    fn missing_dir_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = RuleStore::load_dir(&dir.path().join("nope"));
        assert!(store.is_empty());
    }
}
