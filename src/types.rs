//! Shared value types used by both daemons.
use std::path::{Path, PathBuf};

/// The certificate files a lineage directory may hold.
pub const CERT_FILENAME: &str = "cert.pem";
pub const CHAIN_FILENAME: &str = "chain.pem";
pub const FULLCHAIN_FILENAME: &str = "fullchain.pem";
pub const PRIVKEY_FILENAME: &str = "privkey.pem";

/// The subset of a lineage's files a push worker may need to send.
pub const PUSHABLE_FILENAMES: [&str; 3] = [CHAIN_FILENAME, FULLCHAIN_FILENAME, PRIVKEY_FILENAME];

/// A named directory holding a certificate bundle.
///
/// `name` is the basename of the directory (typically the lineage's primary
/// domain); `path` is the full path to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lineage {
    pub name: String,
    pub path: PathBuf,
}

impl Lineage {
    pub fn new(path: impl Into<PathBuf>) -> Option<Self> {
        let path = path.into();
        let name = path.file_name()?.to_str()?.to_string();
        Some(Lineage { name, path })
    }

    pub fn file(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }
}

/// Lists the immediate subdirectories of `dir`, each treated as a lineage.
pub fn lineages_in(dir: &Path) -> std::io::Result<Vec<Lineage>> {
    let mut out = Vec::new();
    if !dir.is_dir() {
        return Ok(out);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if let Some(lineage) = Lineage::new(path) {
                out.push(lineage);
            }
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}
