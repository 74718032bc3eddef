// Command allow-list
//
// Execution requests name a logical command; only names registered here (or
// absolute paths under a trusted prefix) are ever spawned. The table is built
// once at start and shared read-only by every session.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use webterm_handlers::HandlerError;

/// Subdirectories probed under every search root.
const SEARCH_SUBDIRS: &[&str] = &[
    "",
    "bin",
    "tools",
    "runtime_env",
    "..",
    "../bin",
    "../tools",
    "../runtime_env",
];

/// Where a MIB directory is looked for under each search root.
pub const MIBS_DIR_CANDIDATES: &[&str] = &["mibs", "lib/mibs", "tools/mibs"];

/// Where the capture directory is looked for under each search root.
pub const LOGS_DIR_CANDIDATES: &[&str] = &["logs"];

#[cfg(windows)]
const EXECUTABLE_SUFFIXES: &[&str] = &["", ".bat", ".com", ".exe"];
#[cfg(not(windows))]
const EXECUTABLE_SUFFIXES: &[&str] = &["", ".sh"];

const SNMP_TOOLS: &[&str] = &[
    "snmpget",
    "snmpgetnext",
    "snmpdf",
    "snmpbulkget",
    "snmpbulkwalk",
    "snmpdelta",
    "snmpnetstat",
    "snmpset",
    "snmpstatus",
    "snmptable",
    "snmptest",
    "snmptools",
    "snmptranslate",
    "snmptrap",
    "snmpusm",
    "snmpvacm",
    "snmpwalk",
    "wshell",
];

/// Where executables are looked for.
#[derive(Debug, Clone, Default)]
pub struct SearchPaths {
    roots: Vec<PathBuf>,
    use_path_env: bool,
}

impl SearchPaths {
    /// The working directory and the gateway's own folder, then `PATH`.
    pub fn standard() -> Self {
        let mut roots = Vec::new();
        if let Ok(cwd) = std::env::current_dir() {
            roots.push(cwd);
        }
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            roots.push(dir);
        }
        Self {
            roots,
            use_path_env: true,
        }
    }

    /// Only the given roots, no `PATH`.
    pub fn only(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            roots: roots.into_iter().collect(),
            use_path_env: false,
        }
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.roots.push(root.into());
        self
    }

    /// First existing file for any alias, trying platform suffixes under
    /// each root and its `bin`, `tools`, `runtime_env` and parent variants,
    /// then `PATH`.
    pub fn look_path(&self, aliases: &[&str]) -> Option<PathBuf> {
        let names: Vec<String> = aliases
            .iter()
            .flat_map(|alias| EXECUTABLE_SUFFIXES.iter().map(move |s| format!("{}{}", alias, s)))
            .collect();

        for name in &names {
            for root in &self.roots {
                for sub in SEARCH_SUBDIRS {
                    let candidate = root.join(sub).join(name);
                    if candidate.is_file() {
                        return Some(normalize(candidate));
                    }
                }
            }
        }

        if self.use_path_env {
            let path_var = std::env::var_os("PATH")?;
            for name in &names {
                for dir in std::env::split_paths(&path_var) {
                    let candidate = dir.join(name);
                    if candidate.is_file() {
                        return Some(candidate);
                    }
                }
            }
        }
        None
    }

    /// First existing directory among `candidates`, tried under each root
    /// and then under its parent. `PATH` is not consulted.
    pub fn look_dir(&self, candidates: &[&str]) -> Option<PathBuf> {
        for root in &self.roots {
            for base in [root.clone(), root.join("..")] {
                for candidate in candidates {
                    let dir = base.join(candidate);
                    if dir.is_dir() {
                        return Some(normalize(dir));
                    }
                }
            }
        }
        None
    }
}

fn normalize(path: PathBuf) -> PathBuf {
    std::fs::canonicalize(&path).unwrap_or(path)
}

/// Read-only mapping from command name to executable.
#[derive(Debug, Clone, Default)]
pub struct CommandTable {
    entries: HashMap<String, PathBuf>,
    trusted_prefixes: Vec<PathBuf>,
}

impl CommandTable {
    pub fn builder(search: SearchPaths) -> CommandTableBuilder {
        CommandTableBuilder {
            search,
            table: CommandTable::default(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Path> {
        self.entries.get(name).map(PathBuf::as_path)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Executable for a requested name, or `NotAllowed`.
    ///
    /// Registered names resolve to their path. Anything else is accepted
    /// only as an absolute path to an existing file under a trusted prefix.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, HandlerError> {
        if let Some(path) = self.entries.get(name) {
            return Ok(path.clone());
        }

        let candidate = Path::new(name);
        if candidate.is_absolute() && !has_parent_component(candidate) && candidate.is_file() {
            if let Some(prefix) = self
                .trusted_prefixes
                .iter()
                .find(|prefix| candidate.starts_with(prefix))
            {
                debug!("Command {} allowed by trusted prefix {}", name, prefix.display());
                return Ok(candidate.to_path_buf());
            }
        }

        Err(HandlerError::NotAllowed(name.to_string()))
    }
}

fn has_parent_component(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

/// Builds a [`CommandTable`]; the table cannot change once built.
pub struct CommandTableBuilder {
    search: SearchPaths,
    table: CommandTable,
}

impl CommandTableBuilder {
    /// Register an explicit path.
    pub fn command(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.table.entries.insert(name.into(), path.into());
        self
    }

    pub fn trusted_prefix(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.table.trusted_prefixes.push(prefix.into());
        self
    }

    /// Register `name` under the first alias found on disk.
    pub fn discover(mut self, name: &str, aliases: &[&str]) -> Self {
        if self.table.entries.contains_key(name) {
            return self;
        }
        match self.search.look_path(aliases) {
            Some(path) => {
                debug!("Discovered {} at {}", name, path.display());
                self.table.entries.insert(name.to_string(), path);
            }
            None => debug!("{} not found (tried {:?})", name, aliases),
        }
        self
    }

    /// The network tools the gateway ships with.
    pub fn discover_defaults(mut self) -> Self {
        for tool in SNMP_TOOLS {
            let bundled = format!("netsnmp/{}", tool);
            self = self.discover(tool, &[tool]);
            self = self.discover(tool, &[&bundled]);
        }
        self.discover("tpt", &["tpt"])
            .discover("nping", &["nmap/nping"])
            .discover("nmap", &["nmap/nmap"])
            .discover("plink", &["putty/plink", "ssh"])
            .discover("ssh", &["putty/plink", "ssh"])
            .discover("dig", &["dig/dig", "dig"])
    }

    pub fn build(self) -> CommandTable {
        if self.table.entries.is_empty() && self.table.trusted_prefixes.is_empty() {
            warn!("Command allow-list is empty; every execution request will be rejected");
        } else {
            info!(
                "Command allow-list ready: {} commands, {} trusted prefixes",
                self.table.entries.len(),
                self.table.trusted_prefixes.len()
            );
        }
        self.table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_unknown_name_rejected() {
        let table = CommandTable::builder(SearchPaths::only([])).build();
        assert!(matches!(
            table.resolve("rm"),
            Err(HandlerError::NotAllowed(name)) if name == "rm"
        ));
        assert!(table.resolve("/bin/sh").is_err());
    }

    #[test]
    fn test_explicit_command() {
        let table = CommandTable::builder(SearchPaths::only([]))
            .command("sh", "/bin/sh")
            .build();
        assert_eq!(table.resolve("sh").unwrap(), PathBuf::from("/bin/sh"));
        assert_eq!(table.names(), vec!["sh"]);
    }

    #[test]
    fn test_look_path_subdirs_and_suffix() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("gateway");
        std::fs::create_dir_all(&root).unwrap();
        #[cfg(not(windows))]
        touch(&root.join("tools").join("tpt.sh"));
        #[cfg(windows)]
        touch(&root.join("tools").join("tpt.exe"));
        touch(&dir.path().join("bin").join("dig"));

        let search = SearchPaths::only([root.clone()]);
        let tpt = search.look_path(&["tpt"]).unwrap();
        assert!(tpt.ends_with(if cfg!(windows) { "tpt.exe" } else { "tpt.sh" }));

        // `../bin` relative to the root.
        let dig = search.look_path(&["dig/dig", "dig"]).unwrap();
        assert!(dig.ends_with("dig"));
        assert!(search.look_path(&["nmap/nmap"]).is_none());
    }

    #[test]
    fn test_look_dir_prefers_root_then_parent() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("gateway");
        std::fs::create_dir_all(root.join("tools/mibs")).unwrap();
        std::fs::create_dir_all(dir.path().join("mibs")).unwrap();

        let search = SearchPaths::only([root.clone()]);
        let found = search.look_dir(MIBS_DIR_CANDIDATES).unwrap();
        assert_eq!(found, normalize(root.join("tools/mibs")));

        std::fs::remove_dir_all(root.join("tools")).unwrap();
        let found = search.look_dir(MIBS_DIR_CANDIDATES).unwrap();
        assert_eq!(found, normalize(dir.path().join("mibs")));
    }

    #[test]
    fn test_look_dir_ignores_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("logs"), b"not a directory").unwrap();
        std::fs::create_dir(dir.path().join("inner")).unwrap();
        let search = SearchPaths::only([dir.path().join("inner")]);
        assert_eq!(search.look_dir(LOGS_DIR_CANDIDATES), None);
    }

    #[test]
    fn test_discover_keeps_first_hit() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("netsnmp").join("snmpwalk"));
        touch(&dir.path().join("putty").join("plink"));

        let table = CommandTable::builder(SearchPaths::only([dir.path().to_path_buf()]))
            .command("dig", "/usr/bin/dig")
            .discover_defaults()
            .build();

        assert!(table.get("snmpwalk").unwrap().ends_with("netsnmp/snmpwalk"));
        assert!(table.get("plink").unwrap().ends_with("putty/plink"));
        assert_eq!(table.get("ssh"), table.get("plink"));
        assert_eq!(table.get("dig"), Some(Path::new("/usr/bin/dig")));
        assert!(!table.contains("nmap"));
    }

    #[test]
    fn test_trusted_prefix() {
        let dir = TempDir::new().unwrap();
        let tool = dir.path().join("scripts").join("probe");
        touch(&tool);

        let table = CommandTable::builder(SearchPaths::only([]))
            .trusted_prefix(dir.path().join("scripts"))
            .build();

        let name = tool.to_string_lossy().to_string();
        assert_eq!(table.resolve(&name).unwrap(), tool);

        let escape = dir.path().join("scripts").join("..").join("scripts").join("probe");
        assert!(table.resolve(&escape.to_string_lossy()).is_err());
        let missing = dir.path().join("scripts").join("nope");
        assert!(table.resolve(&missing.to_string_lossy()).is_err());
    }
}
