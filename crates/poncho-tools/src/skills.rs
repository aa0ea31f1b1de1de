// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Skill discovery: scans configured directories for
//! subdirectories containing a `SKILL.md`, parsing only its YAML
//! frontmatter up front. The body is re-read lazily by `activate_skill`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Parsed `SKILL.md` frontmatter plus the directory it lives in.
#[derive(Debug, Clone)]
pub struct SkillManifest {
    pub name: String,
    pub description: Option<String>,
    /// Tool names the skill declares it needs, from `allowed-tools` (legacy:
    /// `tools`). Not currently enforced by the gate; exposed for the system
    /// prompt and future policy wiring.
    pub allowed_tools: Vec<String>,
    pub dir: PathBuf,
}

impl SkillManifest {
    pub fn path(&self) -> PathBuf {
        self.dir.join("SKILL.md")
    }

    pub fn scripts_dir(&self) -> PathBuf {
        self.dir.join("scripts")
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawHeader {
    name: Option<String>,
    description: Option<String>,
    #[serde(rename = "allowed-tools")]
    allowed_tools: Option<String>,
    tools: Option<Vec<String>>,
}

/// Splits a `SKILL.md` file into (frontmatter YAML, body). Returns `None`
/// when there is no `---`-delimited header.
fn split_frontmatter(raw: &str) -> Option<(&str, &str)> {
    let rest = raw.strip_prefix("---")?;
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let end = rest.find("\n---")?;
    let header = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Some((header, body))
}

/// Parses a single `SKILL.md` file's frontmatter. Returns `None` when the
/// file is missing a header or a `name` field — such a directory is not a
/// usable skill.
fn parse_manifest(md_path: &Path, dir: PathBuf) -> Option<SkillManifest> {
    let raw = std::fs::read_to_string(md_path).ok()?;
    let (header, _body) = split_frontmatter(&raw)?;
    let parsed: RawHeader = serde_yaml::from_str(header).ok()?;
    let name = parsed.name?;

    let allowed_tools = match (parsed.allowed_tools, parsed.tools) {
        (Some(s), _) => s.split_whitespace().map(String::from).collect(),
        (None, Some(list)) => list,
        (None, None) => Vec::new(),
    };

    Some(SkillManifest { name, description: parsed.description, allowed_tools, dir })
}

/// Returns the body of `skill`'s `SKILL.md`, stripping the frontmatter.
pub fn read_skill_body(skill: &SkillManifest) -> std::io::Result<String> {
    let raw = std::fs::read_to_string(skill.path())?;
    Ok(match split_frontmatter(&raw) {
        Some((_, body)) => body.to_string(),
        None => raw,
    })
}

fn discover_one_dir(dir: &Path, out: &mut Vec<SkillManifest>) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let md = path.join("SKILL.md");
        if md.is_file() {
            if let Some(manifest) = parse_manifest(&md, path) {
                out.push(manifest);
            }
        }
    }
}

/// Scans `directories` (non-recursive: each configured directory's immediate
/// subdirectories are candidate skills) for `SKILL.md` files.
pub fn discover_skills(directories: &[PathBuf]) -> Vec<SkillManifest> {
    let mut out = Vec::new();
    for dir in directories {
        discover_one_dir(dir, &mut out);
    }
    out
}

/// Read-only lookup table over the discovered skills, built once at startup
/// and shared (`Arc<SkillCatalog>`) across the progressive-disclosure tools.
pub struct SkillCatalog {
    by_name: HashMap<String, SkillManifest>,
}

impl SkillCatalog {
    pub fn new(directories: &[PathBuf]) -> Self {
        let by_name = discover_skills(directories).into_iter().map(|s| (s.name.clone(), s)).collect();
        Self { by_name }
    }

    pub fn get(&self, name: &str) -> Option<&SkillManifest> {
        self.by_name.get(name)
    }

    pub fn list(&self) -> Vec<&SkillManifest> {
        let mut v: Vec<&SkillManifest> = self.by_name.values().collect();
        v.sort_by(|a, b| a.name.cmp(&b.name));
        v
    }

    /// Compact `<skills>` XML block for the system prompt: name and
    /// description only, bodies are loaded lazily via `activate_skill`.
    pub fn prompt_block(&self) -> String {
        if self.by_name.is_empty() {
            return String::new();
        }
        let mut out = String::from("<skills>\n");
        for skill in self.list() {
            out.push_str(&format!(
                "  <skill><name>{}</name><description>{}</description></skill>\n",
                skill.name,
                skill.description.as_deref().unwrap_or("")
            ));
        }
        out.push_str("</skills>");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_root() -> PathBuf {
        use std::sync::atomic::{AtomicU32, Ordering};
        static CTR: AtomicU32 = AtomicU32::new(0);
        let n = CTR.fetch_add(1, Ordering::Relaxed);
        let root = std::env::temp_dir().join(format!("poncho_skills_{}_{n}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn write_skill(root: &Path, dir_name: &str, contents: &str) {
        let dir = root.join(dir_name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), contents).unwrap();
    }

    #[test]
    fn discovers_skill_with_space_separated_tools() {
        let root = tmp_root();
        write_skill(
            &root,
            "deploy",
            "---\nname: deploy\ndescription: Deploys the service\nallowed-tools: read_file write_file\n---\nBody text.\n",
        );
        let skills = discover_skills(&[root.clone()]);
        assert_eq!(skills.len(), 1);
        assert_eq!(skills[0].name, "deploy");
        assert_eq!(skills[0].allowed_tools, vec!["read_file", "write_file"]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn discovers_skill_with_legacy_tools_array() {
        let root = tmp_root();
        write_skill(&root, "legacy", "---\nname: legacy\ntools:\n  - read_file\n  - list_directory\n---\nBody.\n");
        let skills = discover_skills(&[root.clone()]);
        assert_eq!(skills[0].allowed_tools, vec!["read_file", "list_directory"]);
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn directory_without_skill_md_is_ignored() {
        let root = tmp_root();
        std::fs::create_dir_all(root.join("not_a_skill")).unwrap();
        let skills = discover_skills(&[root.clone()]);
        assert!(skills.is_empty());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn missing_name_field_is_ignored() {
        let root = tmp_root();
        write_skill(&root, "broken", "---\ndescription: no name here\n---\nBody.\n");
        let skills = discover_skills(&[root.clone()]);
        assert!(skills.is_empty());
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn read_skill_body_strips_frontmatter() {
        let root = tmp_root();
        write_skill(&root, "deploy", "---\nname: deploy\n---\nInstructions go here.\n");
        let catalog = SkillCatalog::new(&[root.clone()]);
        let skill = catalog.get("deploy").unwrap();
        let body = read_skill_body(skill).unwrap();
        assert_eq!(body.trim(), "Instructions go here.");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn catalog_lookup_and_prompt_block() {
        let root = tmp_root();
        write_skill(&root, "b_skill", "---\nname: b_skill\ndescription: second\n---\nx\n");
        write_skill(&root, "a_skill", "---\nname: a_skill\ndescription: first\n---\nx\n");
        let catalog = SkillCatalog::new(&[root.clone()]);
        assert!(catalog.get("a_skill").is_some());
        assert!(catalog.get("missing").is_none());
        let block = catalog.prompt_block();
        let a_pos = block.find("a_skill").unwrap();
        let b_pos = block.find("b_skill").unwrap();
        assert!(a_pos < b_pos, "skills should be sorted by name in the prompt block");
        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn empty_catalog_has_empty_prompt_block() {
        let catalog = SkillCatalog::new(&[]);
        assert_eq!(catalog.prompt_block(), "");
    }
}
