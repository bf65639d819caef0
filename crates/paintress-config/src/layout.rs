//! The `.expedition/` subtree a continent carries.
//!
//! All durable state is plain files under this tree; `.run/` holds the
//! ephemeral per-run files and is kept out of version control through the
//! managed `.gitignore`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Entries the managed `.gitignore` must always contain, one per line.
pub const MANAGED_GITIGNORE_ENTRIES: &[&str] = &[".run/", "inbox/", "outbox/"];

const MISSION_TEXT: &str = include_str!("templates/mission.md");
const SKILL_DMAIL: &str = include_str!("templates/skill_dmail.md");
const SKILL_REPORT: &str = include_str!("templates/skill_expedition_report.md");

/// Path map for one continent's `.expedition/` subtree.
#[derive(Debug, Clone)]
pub struct ContinentLayout {
    continent: PathBuf,
}

impl ContinentLayout {
    pub fn new(continent: impl Into<PathBuf>) -> Self {
        Self {
            continent: continent.into(),
        }
    }

    pub fn continent(&self) -> &Path {
        &self.continent
    }

    pub fn root(&self) -> PathBuf {
        self.continent.join(".expedition")
    }

    pub fn journal_dir(&self) -> PathBuf {
        self.root().join("journal")
    }

    pub fn inbox_dir(&self) -> PathBuf {
        self.root().join("inbox")
    }

    pub fn outbox_dir(&self) -> PathBuf {
        self.root().join("outbox")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.root().join("archive")
    }

    pub fn context_dir(&self) -> PathBuf {
        self.root().join("context")
    }

    pub fn skills_dir(&self) -> PathBuf {
        self.root().join("skills")
    }

    pub fn config_path(&self) -> PathBuf {
        self.root().join("config.yaml")
    }

    pub fn mission_path(&self) -> PathBuf {
        self.root().join("mission.md")
    }

    pub fn gitignore_path(&self) -> PathBuf {
        self.root().join(".gitignore")
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root().join(".run")
    }

    pub fn flag_path(&self) -> PathBuf {
        self.run_dir().join("flag.md")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.run_dir().join("logs")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.run_dir().join("worktrees")
    }

    pub fn lumina_path(&self) -> PathBuf {
        self.run_dir().join("lumina.md")
    }

    /// Create every directory of the subtree, reconcile the managed
    /// `.gitignore`, and drop the skill manifests. Idempotent; called on
    /// every run start.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.journal_dir(),
            self.inbox_dir(),
            self.outbox_dir(),
            self.archive_dir(),
            self.context_dir(),
            self.logs_dir(),
            self.worktrees_dir(),
        ] {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        ensure_gitignore_entries(&self.gitignore_path(), MANAGED_GITIGNORE_ENTRIES)?;
        self.ensure_skills()?;
        Ok(())
    }

    /// Write the rules-of-engagement the prompt references. Rewritten each
    /// run so operators always see the text the agents were given.
    pub fn write_mission(&self) -> Result<()> {
        std::fs::write(self.mission_path(), MISSION_TEXT)
            .with_context(|| format!("Failed to write {}", self.mission_path().display()))
    }

    /// Read the mission text, falling back to the built-in when the file is
    /// absent.
    pub fn read_mission(&self) -> String {
        std::fs::read_to_string(self.mission_path()).unwrap_or_else(|_| MISSION_TEXT.to_string())
    }

    /// Operator-provided context files, merged alphabetically.
    pub fn read_context_files(&self) -> Result<Vec<(String, String)>> {
        let dir = self.context_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        let mut files = Vec::with_capacity(names.len());
        for name in names {
            let content = std::fs::read_to_string(dir.join(&name))?;
            files.push((name, content));
        }
        Ok(files)
    }

    fn ensure_skills(&self) -> Result<()> {
        for (name, content) in [("dmail", SKILL_DMAIL), ("expedition-report", SKILL_REPORT)] {
            let skill_dir = self.skills_dir().join(name);
            std::fs::create_dir_all(&skill_dir)
                .with_context(|| format!("Failed to create {}", skill_dir.display()))?;
            std::fs::write(skill_dir.join("SKILL.md"), content)?;
        }
        Ok(())
    }
}

/// Make sure `path` contains each entry as a whole line. Missing entries are
/// appended; present ones are never duplicated. A final line without a
/// trailing newline gets one before anything is appended.
pub fn ensure_gitignore_entries(path: &Path, entries: &[&str]) -> Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<&str> = entries
        .iter()
        .copied()
        .filter(|entry| !present.contains(entry))
        .collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut updated = existing;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    for entry in missing {
        updated.push_str(entry);
        updated.push('\n');
    }
    std::fs::write(path, updated).with_context(|| format!("Failed to write {}", path.display()))
}
