//! Repository configuration: the INI-style `config` file with `[section]`
//! and `[section "subsection"]` headers and `key = value` lines. Only the
//! options the core honors are given typed accessors; everything else is
//! carried verbatim through load/save.

use std::fs;
use std::path::Path;

use crate::errors::GitError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Section {
    name: String,
    subsection: Option<String>,
    entries: Vec<(String, String)>,
}

/// Parsed configuration document preserving section order.
#[derive(Debug, Clone, Default)]
pub struct Config {
    sections: Vec<Section>,
}

impl Config {
    /// Parse INI text.
    pub fn parse(content: &str) -> Result<Config, GitError> {
        let mut sections: Vec<Section> = Vec::new();
        for (lineno, raw) in content.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') {
                let inner = line
                    .strip_prefix('[')
                    .and_then(|l| l.strip_suffix(']'))
                    .ok_or_else(|| {
                        GitError::InvalidConfig(format!("line {}: bad section header", lineno + 1))
                    })?;
                let (name, subsection) = match inner.split_once(' ') {
                    Some((name, sub)) => {
                        let sub = sub.trim();
                        let sub = sub
                            .strip_prefix('"')
                            .and_then(|s| s.strip_suffix('"'))
                            .ok_or_else(|| {
                                GitError::InvalidConfig(format!(
                                    "line {}: unquoted subsection",
                                    lineno + 1
                                ))
                            })?;
                        (name.to_string(), Some(sub.to_string()))
                    }
                    None => (inner.to_string(), None),
                };
                sections.push(Section {
                    name: name.to_ascii_lowercase(),
                    subsection,
                    entries: Vec::new(),
                });
            } else if let Some((key, value)) = line.split_once('=') {
                let section = sections.last_mut().ok_or_else(|| {
                    GitError::InvalidConfig(format!("line {}: key outside a section", lineno + 1))
                })?;
                section
                    .entries
                    .push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
            } else {
                return Err(GitError::InvalidConfig(format!(
                    "line {}: expected `key = value`",
                    lineno + 1
                )));
            }
        }
        Ok(Config { sections })
    }

    /// Load from disk; a missing file yields an empty config.
    pub fn load(path: &Path) -> Result<Config, GitError> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Serialize back to INI text.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            match &section.subsection {
                Some(sub) => out.push_str(&format!("[{} \"{}\"]\n", section.name, sub)),
                None => out.push_str(&format!("[{}]\n", section.name)),
            }
            for (key, value) in &section.entries {
                out.push_str(&format!("\t{key} = {value}\n"));
            }
        }
        out
    }

    /// Atomic save: temp sibling + rename.
    pub fn save(&self, path: &Path) -> Result<(), GitError> {
        let dir = path
            .parent()
            .ok_or_else(|| GitError::InvalidConfig("config path has no parent".to_string()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        use std::io::Write;
        tmp.write_all(self.serialize().as_bytes())?;
        tmp.persist(path).map_err(|e| GitError::IOError(e.error))?;
        Ok(())
    }

    fn find(&self, name: &str, subsection: Option<&str>) -> Option<&Section> {
        self.sections
            .iter()
            .find(|s| s.name == name && s.subsection.as_deref() == subsection)
    }

    /// Last-one-wins lookup within a section.
    pub fn get(&self, section: &str, subsection: Option<&str>, key: &str) -> Option<&str> {
        self.find(section, subsection)?
            .entries
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set (or replace) a value, creating the section if needed.
    pub fn set(&mut self, section: &str, subsection: Option<&str>, key: &str, value: &str) {
        let section_name = section.to_ascii_lowercase();
        let key = key.to_ascii_lowercase();
        let existing = self
            .sections
            .iter_mut()
            .find(|s| s.name == section_name && s.subsection.as_deref() == subsection);
        let section = match existing {
            Some(s) => s,
            None => {
                self.sections.push(Section {
                    name: section_name,
                    subsection: subsection.map(|s| s.to_string()),
                    entries: Vec::new(),
                });
                self.sections.last_mut().expect("just pushed")
            }
        };
        if let Some(entry) = section.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value.to_string();
        } else {
            section.entries.push((key, value.to_string()));
        }
    }

    /// Remove a key; empty sections are dropped.
    pub fn unset(&mut self, section: &str, subsection: Option<&str>, key: &str) {
        if let Some(s) = self
            .sections
            .iter_mut()
            .find(|s| s.name == section && s.subsection.as_deref() == subsection)
        {
            s.entries.retain(|(k, _)| k != key);
        }
        self.sections
            .retain(|s| !(s.name == section && s.subsection.as_deref() == subsection && s.entries.is_empty()));
    }

    /// Subsection names of a section (e.g. configured remote names).
    pub fn subsections(&self, section: &str) -> Vec<String> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .filter_map(|s| s.subsection.clone())
            .collect()
    }

    // Typed accessors for the options the core honors.

    pub fn repository_format_version(&self) -> i64 {
        self.get("core", None, "repositoryformatversion")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    pub fn user_name(&self) -> Option<&str> {
        self.get("user", None, "name")
    }

    pub fn user_email(&self) -> Option<&str> {
        self.get("user", None, "email")
    }

    pub fn branch_remote(&self, branch: &str) -> Option<&str> {
        self.get("branch", Some(branch), "remote")
    }

    pub fn branch_merge(&self, branch: &str) -> Option<&str> {
        self.get("branch", Some(branch), "merge")
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    const SAMPLE: &str = r#"
[core]
	repositoryformatversion = 0
[user]
	name = A U Thor
	email = author@example.com
[remote "origin"]
	url = https://example.com/repo.git
	fetch = +refs/heads/*:refs/remotes/origin/*
[branch "main"]
	remote = origin
	merge = refs/heads/main
"#;

    /// Sections, subsections, and values parse and read back.
    #[test]
    fn parse_and_get() {
        let config = Config::parse(SAMPLE).unwrap();
        assert_eq!(config.repository_format_version(), 0);
        assert_eq!(config.user_name(), Some("A U Thor"));
        assert_eq!(config.user_email(), Some("author@example.com"));
        assert_eq!(
            config.get("remote", Some("origin"), "url"),
            Some("https://example.com/repo.git")
        );
        assert_eq!(config.branch_remote("main"), Some("origin"));
        assert_eq!(config.branch_merge("main"), Some("refs/heads/main"));
        assert_eq!(config.subsections("remote"), vec!["origin"]);
    }

    /// serialize → parse round-trips all values.
    #[test]
    fn round_trip() {
        let config = Config::parse(SAMPLE).unwrap();
        let text = config.serialize();
        let reparsed = Config::parse(&text).unwrap();
        assert_eq!(
            reparsed.get("remote", Some("origin"), "fetch"),
            Some("+refs/heads/*:refs/remotes/origin/*")
        );
        assert_eq!(reparsed.user_name(), Some("A U Thor"));
    }

    /// set creates sections and replaces values; unset drops empties.
    #[test]
    fn set_and_unset() {
        let mut config = Config::default();
        config.set("remote", Some("origin"), "url", "https://a.example/x.git");
        config.set("remote", Some("origin"), "url", "https://b.example/y.git");
        assert_eq!(
            config.get("remote", Some("origin"), "url"),
            Some("https://b.example/y.git")
        );
        config.unset("remote", Some("origin"), "url");
        assert_eq!(config.get("remote", Some("origin"), "url"), None);
        assert!(config.subsections("remote").is_empty());
    }

    /// Malformed lines surface as configuration errors.
    #[test]
    fn rejects_garbage() {
        assert!(Config::parse("[unclosed\n").is_err());
        assert!(Config::parse("key = outside\n").is_err());
        assert!(Config::parse("[s]\nnot a kv line\n").is_err());
    }
}
