use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::error::JobError;

pub const WORKSPACE_PRESET_SUBDIRS: [&str; 4] =
    ["code/docs/presets", "docs/presets", "design/presets", "presets"];

const PROMPT_DELIMITER: &str = "\n\n---\n\nUSER REQUEST:\n";
const LISTING_DESCRIPTION_CHARS: usize = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresetListing {
    pub dir: PathBuf,
    pub name: String,
    pub description: String,
}

/// Ordered preset search path. Earlier directories shadow later ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresetResolver {
    dirs: Vec<PathBuf>,
}

impl PresetResolver {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Builds the search order: workspace preset folders under `cwd`, then
    /// the configured directory, then the built-in directory. Only existing
    /// directories are kept.
    pub fn with_search_order(
        cwd: &Path,
        configured_dir: Option<&Path>,
        builtin_dir: Option<&Path>,
    ) -> Self {
        let mut dirs = WORKSPACE_PRESET_SUBDIRS
            .iter()
            .map(|sub| cwd.join(sub))
            .collect::<Vec<_>>();
        dirs.extend(configured_dir.map(Path::to_path_buf));
        dirs.extend(builtin_dir.map(Path::to_path_buf));
        dirs.retain(|dir| dir.is_dir());
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        self.dirs.as_slice()
    }

    pub fn find(&self, name: &str) -> Option<PathBuf> {
        let file_name = if name.ends_with(".txt") {
            name.to_string()
        } else {
            format!("{name}.txt")
        };
        self.dirs
            .iter()
            .map(|dir| dir.join(file_name.as_str()))
            .find(|candidate| candidate.is_file())
    }

    pub fn load(&self, name: &str) -> Result<String, JobError> {
        let path = self.find(name).ok_or_else(|| JobError::PresetNotFound {
            name: name.to_string(),
            searched: self
                .dirs
                .iter()
                .map(|dir| dir.display().to_string())
                .collect(),
        })?;
        let raw = fs::read_to_string(path.as_path()).map_err(|e| JobError::PresetNotFound {
            name: name.to_string(),
            searched: vec![format!("{} ({e})", path.display())],
        })?;
        Ok(raw.trim().to_string())
    }

    /// Loads a comma separated list of presets into one labeled preamble.
    pub fn resolve(&self, names: &str) -> Result<String, JobError> {
        let mut sections = Vec::new();
        for name in names.split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let body = self.load(name)?;
            sections.push(format!("# Preset: {name}\n{body}"));
        }
        Ok(sections.join("\n\n"))
    }

    pub fn list(&self) -> Result<Vec<PresetListing>, std::io::Error> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for dir in self.dirs.iter() {
            let mut files = fs::read_dir(dir)?
                .filter_map(Result::ok)
                .map(|entry| entry.path())
                .filter(|path| {
                    path.is_file()
                        && path
                            .extension()
                            .and_then(|v| v.to_str())
                            .map(|v| v.eq_ignore_ascii_case("txt"))
                            .unwrap_or(false)
                })
                .collect::<Vec<_>>();
            files.sort();
            for path in files {
                let Some(name) = path.file_stem().and_then(|v| v.to_str()) else {
                    continue;
                };
                if !seen.insert(name.to_string()) {
                    continue;
                }
                let raw = fs::read_to_string(path.as_path())?;
                let description = raw
                    .lines()
                    .next()
                    .unwrap_or_default()
                    .chars()
                    .take(LISTING_DESCRIPTION_CHARS)
                    .collect::<String>();
                out.push(PresetListing {
                    dir: dir.clone(),
                    name: name.to_string(),
                    description,
                });
            }
        }
        Ok(out)
    }
}

pub fn compose_prompt(preset_text: &str, user_prompt: &str) -> String {
    if preset_text.is_empty() {
        return user_prompt.to_string();
    }
    format!("{preset_text}{PROMPT_DELIMITER}{user_prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_root(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("imagen_presets_{tag}_{stamp}"));
        fs::create_dir_all(&root).expect("temp root should exist");
        root
    }

    #[test]
    fn compose_with_empty_preset_returns_prompt_unchanged() {
        let prompt = "  a cat\n\twith a hat  ";
        assert_eq!(compose_prompt("", prompt), prompt);
    }

    #[test]
    fn compose_places_prompt_after_delimiter_block() {
        let composed = compose_prompt("# Preset: creative\nBe bold.", "login screen");
        assert_eq!(
            composed,
            "# Preset: creative\nBe bold.\n\n---\n\nUSER REQUEST:\nlogin screen"
        );
    }

    #[test]
    fn resolve_concatenates_presets_with_labels() {
        let root = temp_root("resolve");
        fs::write(root.join("creative.txt"), "Be bold.\n\n").expect("write creative");
        fs::write(root.join("brand.txt"), "  Teal and sand.  ").expect("write brand");

        let resolver = PresetResolver::new(vec![root.clone()]);
        let text = resolver
            .resolve(" creative, ,brand.txt ,")
            .expect("presets should resolve");

        assert_eq!(
            text,
            "# Preset: creative\nBe bold.\n\n# Preset: brand.txt\nTeal and sand."
        );
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn earlier_directory_shadows_later_ones() {
        let root = temp_root("shadow");
        let workspace = root.join("workspace");
        let builtin = root.join("builtin");
        fs::create_dir_all(&workspace).expect("workspace dir");
        fs::create_dir_all(&builtin).expect("builtin dir");
        fs::write(workspace.join("creative.txt"), "workspace").expect("write workspace");
        fs::write(builtin.join("creative.txt"), "builtin").expect("write builtin");
        fs::write(builtin.join("mobile-ui.txt"), "mobile").expect("write mobile");

        let resolver = PresetResolver::new(vec![workspace, builtin]);
        assert_eq!(resolver.load("creative").expect("load"), "workspace");
        assert_eq!(resolver.load("mobile-ui").expect("load"), "mobile");

        let listed = resolver.list().expect("list");
        let names = listed.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["creative", "mobile-ui"]);
        assert_eq!(listed[0].description, "workspace");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn unknown_preset_fails_with_searched_dirs() {
        let root = temp_root("missing");
        let resolver = PresetResolver::new(vec![root.clone()]);
        let err = resolver
            .resolve("creative,nope")
            .expect_err("missing preset should fail");
        match err {
            JobError::PresetNotFound { name, searched } => {
                assert_eq!(name, "creative");
                assert_eq!(searched, vec![root.display().to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn empty_spec_resolves_to_empty_text() {
        let resolver = PresetResolver::default();
        assert_eq!(resolver.resolve(" , ").expect("empty spec"), "");
    }

    #[test]
    fn search_order_keeps_only_existing_dirs() {
        let root = temp_root("order");
        fs::create_dir_all(root.join("design/presets")).expect("design presets");
        let configured = root.join("configured");
        fs::create_dir_all(&configured).expect("configured dir");
        let missing_builtin = root.join("nope");

        let resolver = PresetResolver::with_search_order(
            root.as_path(),
            Some(configured.as_path()),
            Some(missing_builtin.as_path()),
        );
        assert_eq!(
            resolver.dirs(),
            &[root.join("design/presets"), configured][..]
        );
        let _ = fs::remove_dir_all(root);
    }
}
