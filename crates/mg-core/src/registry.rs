//! Migration directory loading and schema-prefix resolution.
//!
//! A registry is built once per run from a directory of SQL files and is
//! immutable afterwards. File names carry the whole addressing scheme:
//! `<timestamp>.<title>.<prefix>.up.sql` / `.dn.sql` pairs target every
//! schema matching `<prefix>`, while `before.sql` and `after.sql` run once
//! per host around each migration pass.

use crate::checksum::compute_checksum;
use crate::error::{CoreError, CoreResult};
use crate::vars::MigrationVars;
use crate::wrap::{self, IndexWrap};
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

fn file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+\.[^.]+)\.([^.]+)\.(up|dn)\.sql$").expect("valid regex literal")
    })
}

/// One script on disk, loaded and validated.
#[derive(Debug)]
pub struct MigrationFile {
    /// Absolute (or load-relative) path of the script.
    pub path: PathBuf,

    /// Bare file name, used in error messages.
    pub file_name: String,

    /// Raw script body.
    pub body: String,

    /// Scheduling directives parsed from the body.
    pub vars: MigrationVars,

    /// Concurrent-index classification computed at load time.
    pub wrap: IndexWrap,
}

impl MigrationFile {
    /// Read a script, extract its directives and validate its index contract.
    pub fn load(path: &Path) -> CoreResult<Arc<Self>> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let body = std::fs::read_to_string(path).map_err(|e| CoreError::IoWithPath {
            path: path.display().to_string(),
            source: e,
        })?;
        let vars = MigrationVars::parse(&file_name, &body)?;
        let wrap = wrap::classify(&body, &vars).map_err(|messages| CoreError::InvalidIndexFile {
            file: file_name.clone(),
            messages,
        })?;
        Ok(Arc::new(Self {
            path: path.to_path_buf(),
            file_name,
            body,
            vars,
            wrap,
        }))
    }
}

/// A paired up/dn migration addressed at a schema prefix.
#[derive(Debug)]
pub struct MigrationEntry {
    /// Canonical version name: `<timestamp>.<title>.<prefix>`.
    pub name: String,

    /// The schema-name prefix this entry applies to.
    pub prefix: String,

    /// The forward script.
    pub up: Arc<MigrationFile>,

    /// The undo script.
    pub dn: Arc<MigrationFile>,
}

#[derive(Default)]
struct PendingPair {
    prefix: String,
    up: Option<Arc<MigrationFile>>,
    dn: Option<Arc<MigrationFile>>,
}

/// Immutable view of a migration directory.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Arc<MigrationEntry>>,
    /// Prefix groups ordered by descending prefix length, so longest-prefix
    /// matching is a linear scan that stops at the first hit.
    by_prefix: Vec<(String, Vec<Arc<MigrationEntry>>)>,
    before: Option<Arc<MigrationFile>>,
    after: Option<Arc<MigrationFile>>,
}

impl Registry {
    /// Load and validate every migration file in `dir`.
    pub fn load(dir: &Path) -> CoreResult<Self> {
        if !dir.is_dir() {
            return Err(CoreError::DirNotFound {
                path: dir.display().to_string(),
            });
        }

        let mut pairs: BTreeMap<String, PendingPair> = BTreeMap::new();
        let mut before = None;
        let mut after = None;

        for entry in std::fs::read_dir(dir).map_err(|e| CoreError::IoWithPath {
            path: dir.display().to_string(),
            source: e,
        })? {
            let entry = entry.map_err(|e| CoreError::IoWithPath {
                path: dir.display().to_string(),
                source: e,
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                log::warn!("Skipping non-UTF8 file name in {}", dir.display());
                continue;
            };

            if file_name == "before.sql" {
                before = Some(MigrationFile::load(&path)?);
                continue;
            }
            if file_name == "after.sql" {
                after = Some(MigrationFile::load(&path)?);
                continue;
            }

            if let Some(cap) = file_re().captures(file_name) {
                let name = format!("{}.{}", &cap[1], &cap[2]);
                let file = MigrationFile::load(&path)?;
                let pair = pairs.entry(name).or_default();
                pair.prefix = cap[2].to_string();
                match &cap[3] {
                    "up" => pair.up = Some(file),
                    _ => pair.dn = Some(file),
                }
            } else if file_name.ends_with(".sql") {
                return Err(CoreError::BadFileName {
                    file: file_name.to_string(),
                });
            }
            // Anything that is not SQL (editor droppings, READMEs) is ignored.
        }

        let mut entries = Vec::with_capacity(pairs.len());
        for (name, pair) in pairs {
            match (pair.up, pair.dn) {
                (Some(up), Some(dn)) => entries.push(Arc::new(MigrationEntry {
                    name,
                    prefix: pair.prefix,
                    up,
                    dn,
                })),
                (Some(up), None) => {
                    return Err(CoreError::MissingPair {
                        file: up.file_name.clone(),
                        expected: format!("{name}.dn.sql"),
                    })
                }
                (None, Some(dn)) => {
                    return Err(CoreError::MissingPair {
                        file: dn.file_name.clone(),
                        expected: format!("{name}.up.sql"),
                    })
                }
                (None, None) => unreachable!("pair entry created without a file"),
            }
        }
        // BTreeMap iteration already yields entries sorted by name.

        let mut grouped: BTreeMap<String, Vec<Arc<MigrationEntry>>> = BTreeMap::new();
        for e in &entries {
            grouped.entry(e.prefix.clone()).or_default().push(Arc::clone(e));
        }
        let mut by_prefix: Vec<(String, Vec<Arc<MigrationEntry>>)> = grouped.into_iter().collect();
        by_prefix.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));

        Ok(Self {
            entries,
            by_prefix,
            before,
            after,
        })
    }

    /// All entries, ordered by version name.
    pub fn entries(&self) -> &[Arc<MigrationEntry>] {
        &self.entries
    }

    /// Ordered version names.
    pub fn versions(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Known schema prefixes, longest first.
    pub fn prefixes(&self) -> Vec<&str> {
        self.by_prefix.iter().map(|(p, _)| p.as_str()).collect()
    }

    /// The optional `before.sql` script.
    pub fn before(&self) -> Option<&Arc<MigrationFile>> {
        self.before.as_ref()
    }

    /// The optional `after.sql` script.
    pub fn after(&self) -> Option<&Arc<MigrationFile>> {
        self.after.as_ref()
    }

    /// Find an entry by its canonical version name.
    pub fn entry(&self, name: &str) -> Option<&Arc<MigrationEntry>> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Resolve which entries apply to each candidate schema.
    ///
    /// The longest matching prefix wins; a shorter match that is itself a
    /// prefix of the winner is shadowed. A prefix that claims the schema
    /// name as a plain string prefix without matching its shard family
    /// (`sh` against `shard0001` once `shard` won) is incomparable with the
    /// winner and fails the run. Schemas matching no prefix are absent from
    /// the result.
    pub fn group_by_schema<'a>(
        &'a self,
        schemas: &[String],
    ) -> CoreResult<BTreeMap<String, &'a [Arc<MigrationEntry>]>> {
        let mut out = BTreeMap::new();
        for schema in schemas {
            let mut winner: Option<&(String, Vec<Arc<MigrationEntry>>)> = None;
            let mut dangling: Option<&str> = None;
            for group in &self.by_prefix {
                if schema_matches_prefix(schema, &group.0) {
                    match winner {
                        None => winner = Some(group),
                        Some(w) if w.0.starts_with(group.0.as_str()) => {}
                        Some(w) => {
                            return Err(CoreError::PrefixConflict {
                                schema: schema.clone(),
                                first: w.0.clone(),
                                second: group.0.clone(),
                            })
                        }
                    }
                } else if schema.starts_with(group.0.as_str()) && dangling.is_none() {
                    dangling = Some(group.0.as_str());
                }
            }
            if let (Some(w), Some(other)) = (winner, dangling) {
                return Err(CoreError::PrefixConflict {
                    schema: schema.clone(),
                    first: w.0.clone(),
                    second: other.to_string(),
                });
            }
            if let Some((_, entries)) = winner {
                out.insert(schema.clone(), entries.as_slice());
            }
        }
        Ok(out)
    }

    /// Digest of the on-disk version set.
    pub fn digest(&self) -> String {
        self.digest_with(false)
    }

    /// Digest with the hash truncated to 16 hex chars, for display.
    pub fn digest_short(&self) -> String {
        self.digest_with(true)
    }

    fn digest_with(&self, short: bool) -> String {
        let names: Vec<&str> = self.entries.iter().map(|e| e.name.as_str()).collect();
        let order: String = names
            .last()
            .map(|n| {
                let digits: String = n.chars().take_while(|c| c.is_ascii_digit()).collect();
                if digits.is_empty() {
                    "0".to_string()
                } else {
                    digits
                }
            })
            .unwrap_or_else(|| "0".to_string());
        let mut hash = compute_checksum(&names.join("\n"));
        if short {
            hash.truncate(16);
        }
        format!("{order}.{hash}")
    }
}

/// Does `schema` belong to the shard family named by `prefix`?
///
/// True iff `schema` starts with `prefix` and either nothing follows, a digit
/// follows, or the prefix itself contains a digit. This makes `sh` match
/// `sh0001` but not `sharding`, while `public` matches only itself.
pub fn schema_matches_prefix(schema: &str, prefix: &str) -> bool {
    let Some(rest) = schema.strip_prefix(prefix) else {
        return false;
    };
    match rest.chars().next() {
        None => true,
        Some(c) if c.is_ascii_digit() => true,
        Some(_) => prefix.chars().any(|c| c.is_ascii_digit()),
    }
}

/// Canonicalize a version reference to its first three dotted parts.
///
/// Accepts full file names (`20240101.add-users.sh.up.sql`) and returns the
/// version name (`20240101.add-users.sh`).
pub fn extract_version(name: &str) -> String {
    let parts: Vec<&str> = name.splitn(4, '.').collect();
    parts[..parts.len().min(3)].join(".")
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
