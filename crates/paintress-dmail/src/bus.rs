//! Queue operations over `inbox/`, `outbox/`, and `archive/`.

use anyhow::{Context, Result};
use paintress_config::ContinentLayout;
use tracing::debug;

use crate::model::DMail;

/// Persist a D-Mail for the agent and for the permanent record.
///
/// The archive copy is written first: it is the durable record, and if the
/// outbox write then fails the message is not lost while the caller still
/// observes the error. Defaults the schema version to `"1"`.
pub fn send_dmail(layout: &ContinentLayout, dmail: &DMail) -> Result<()> {
    let mut dmail = dmail.clone();
    if dmail.schema_version.as_deref().unwrap_or("").is_empty() {
        dmail.schema_version = Some("1".to_string());
    }
    let content = dmail.marshal()?;
    let file_name = dmail.file_name();

    let archive_dir = layout.archive_dir();
    std::fs::create_dir_all(&archive_dir)
        .with_context(|| format!("Failed to create {}", archive_dir.display()))?;
    let archive_path = archive_dir.join(&file_name);
    std::fs::write(&archive_path, &content)
        .with_context(|| format!("Failed to write {}", archive_path.display()))?;

    let outbox_dir = layout.outbox_dir();
    std::fs::create_dir_all(&outbox_dir)
        .with_context(|| format!("Failed to create {}", outbox_dir.display()))?;
    let outbox_path = outbox_dir.join(&file_name);
    std::fs::write(&outbox_path, &content)
        .with_context(|| format!("Failed to write {}", outbox_path.display()))?;

    debug!(name = %dmail.name, "D-Mail sent to archive and outbox");
    Ok(())
}

/// Parse every `.md` file in the inbox, sorted by filename.
///
/// Parse errors are propagated with the offending file named, so callers
/// fail closed instead of silently skipping malformed input. A missing
/// inbox directory is an empty inbox.
pub fn scan_inbox(layout: &ContinentLayout) -> Result<Vec<DMail>> {
    let inbox = layout.inbox_dir();
    if !inbox.exists() {
        return Ok(Vec::new());
    }

    let mut names: Vec<String> = Vec::new();
    for entry in std::fs::read_dir(&inbox)
        .with_context(|| format!("Failed to read {}", inbox.display()))?
    {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();

    let mut dmails = Vec::with_capacity(names.len());
    for name in names {
        let path = inbox.join(&name);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let dmail = DMail::parse(&content, &name)?;
        dmails.push(dmail);
    }
    Ok(dmails)
}

/// Move a handled inbox message into the archive by atomic rename.
pub fn archive_inbox_dmail(layout: &ContinentLayout, name: &str) -> Result<()> {
    let file_name = format!("{name}.md");
    let from = layout.inbox_dir().join(&file_name);
    let archive_dir = layout.archive_dir();
    std::fs::create_dir_all(&archive_dir)
        .with_context(|| format!("Failed to create {}", archive_dir.display()))?;
    let to = archive_dir.join(&file_name);
    std::fs::rename(&from, &to)
        .with_context(|| format!("Failed to archive {}", from.display()))?;
    debug!(name, "inbox D-Mail archived");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> (tempfile::TempDir, ContinentLayout) {
        let dir = tempfile::tempdir().unwrap();
        let layout = ContinentLayout::new(dir.path());
        layout.ensure().unwrap();
        (dir, layout)
    }

    fn dmail(name: &str) -> DMail {
        DMail::new(name, "feedback", "a message")
    }

    #[test]
    fn test_send_writes_identical_archive_and_outbox_copies() {
        let (_dir, layout) = layout();
        send_dmail(&layout, &dmail("note-1")).unwrap();

        let archived = std::fs::read(layout.archive_dir().join("note-1.md")).unwrap();
        let outboxed = std::fs::read(layout.outbox_dir().join("note-1.md")).unwrap();
        assert_eq!(archived, outboxed);
    }

    #[test]
    fn test_send_defaults_schema_version() {
        let (_dir, layout) = layout();
        send_dmail(&layout, &dmail("note-2")).unwrap();
        let content =
            std::fs::read_to_string(layout.archive_dir().join("note-2.md")).unwrap();
        let parsed = DMail::parse(&content, "note-2.md").unwrap();
        assert_eq!(parsed.schema_version.as_deref(), Some("1"));
    }

    #[test]
    fn test_send_archive_survives_outbox_failure() {
        let (_dir, layout) = layout();
        // Replace the outbox directory with a file so the outbox write fails.
        std::fs::remove_dir_all(layout.outbox_dir()).unwrap();
        std::fs::write(layout.root().join("outbox"), "not a directory").unwrap();

        let err = send_dmail(&layout, &dmail("note-3")).unwrap_err();
        assert!(err.to_string().contains("outbox") || err.to_string().contains("Failed"));

        let archived =
            std::fs::read_to_string(layout.archive_dir().join("note-3.md")).unwrap();
        DMail::parse(&archived, "note-3.md").unwrap();
    }

    #[test]
    fn test_scan_inbox_missing_dir_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ContinentLayout::new(dir.path());
        assert!(scan_inbox(&layout).unwrap().is_empty());
    }

    #[test]
    fn test_scan_inbox_sorted_and_filtered() {
        let (_dir, layout) = layout();
        for name in ["b-second", "a-first"] {
            let content = dmail(name).marshal().unwrap();
            std::fs::write(layout.inbox_dir().join(format!("{name}.md")), content).unwrap();
        }
        std::fs::write(layout.inbox_dir().join("notes.txt"), "ignored").unwrap();
        std::fs::create_dir_all(layout.inbox_dir().join("sub.md")).unwrap();

        let dmails = scan_inbox(&layout).unwrap();
        let names: Vec<&str> = dmails.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a-first", "b-second"]);
    }

    #[test]
    fn test_scan_inbox_names_broken_file() {
        let (_dir, layout) = layout();
        std::fs::write(layout.inbox_dir().join("broken.md"), "no frontmatter").unwrap();
        let err = scan_inbox(&layout).unwrap_err();
        assert!(err.to_string().contains("broken.md"));
    }

    #[test]
    fn test_archive_inbox_dmail_moves_file() {
        let (_dir, layout) = layout();
        let content = dmail("done").marshal().unwrap();
        std::fs::write(layout.inbox_dir().join("done.md"), &content).unwrap();

        archive_inbox_dmail(&layout, "done").unwrap();
        assert!(!layout.inbox_dir().join("done.md").exists());
        assert_eq!(
            std::fs::read_to_string(layout.archive_dir().join("done.md")).unwrap(),
            content
        );
    }
}
