use crate::error::ApiError;
use fs2::FileExt;
use regex::{NoExpand, Regex};
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tempfile::NamedTempFile;

pub const READ_ERROR: &str = "Could not read preseed file";
pub const WRITE_ERROR: &str = "Could not write preseed file";

const LOCK_ATTEMPTS: usize = 64;

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct PreseedUpdate {
    pub hostname: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub packages: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Hostname,
    Username,
    Password,
    Packages,
}

struct Directive {
    key: &'static str,
    kind: &'static str,
    field: Field,
}

static DIRECTIVES: [Directive; 5] = [
    Directive {
        key: "netcfg/get_hostname",
        kind: "string",
        field: Field::Hostname,
    },
    Directive {
        key: "passwd/username",
        kind: "string",
        field: Field::Username,
    },
    Directive {
        key: "passwd/user-password",
        kind: "password",
        field: Field::Password,
    },
    Directive {
        key: "passwd/user-password-again",
        kind: "password",
        field: Field::Password,
    },
    Directive {
        key: "pkgsel/include",
        kind: "string",
        field: Field::Packages,
    },
];

fn directive_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        DIRECTIVES
            .iter()
            .map(|d| {
                let pattern = format!(
                    r"d-i {} {} [^\r\n]+",
                    regex::escape(d.key),
                    regex::escape(d.kind)
                );
                Regex::new(&pattern).expect("directive pattern is a valid regex")
            })
            .collect()
    })
}

impl PreseedUpdate {
    pub fn validate(&self) -> Result<(), ApiError> {
        let required = [&self.hostname, &self.username, &self.password];
        if required
            .iter()
            .any(|v| v.as_deref().map_or(true, str::is_empty))
        {
            return Err(ApiError::Validation("Missing required fields".to_string()));
        }
        let all = [&self.hostname, &self.username, &self.password, &self.packages];
        if all
            .iter()
            .filter_map(|v| v.as_deref())
            .any(|v| v.contains(['\n', '\r']))
        {
            return Err(ApiError::Validation(
                "Fields must not contain line breaks".to_string(),
            ));
        }
        Ok(())
    }

    fn value(&self, field: Field) -> Option<&str> {
        let value = match field {
            Field::Hostname => &self.hostname,
            Field::Username => &self.username,
            Field::Password => &self.password,
            Field::Packages => &self.packages,
        };
        value.as_deref().filter(|v| !v.is_empty())
    }
}

// Only the first occurrence of each directive is rewritten; absent ones are
// not added.
pub fn apply_preseed_update(doc: &str, update: &PreseedUpdate) -> Result<String, ApiError> {
    update.validate()?;

    let mut out = doc.to_string();
    for (directive, pattern) in DIRECTIVES.iter().zip(directive_patterns()) {
        let Some(value) = update.value(directive.field) else {
            continue;
        };
        let line = format!("d-i {} {} {}", directive.key, directive.kind, value);
        if let std::borrow::Cow::Owned(replaced) = pattern.replace(&out, NoExpand(&line)) {
            out = replaced;
        }
    }
    Ok(out)
}

pub async fn update_preseed_file(path: PathBuf, update: PreseedUpdate) -> Result<(), ApiError> {
    update.validate()?;
    tokio::task::spawn_blocking(move || update_locked(&path, &update))
        .await
        .map_err(|err| ApiError::sink_unavailable(WRITE_ERROR, err))?
}

fn update_locked(path: &Path, update: &PreseedUpdate) -> Result<(), ApiError> {
    let (mut file, metadata) =
        lock_current(path).map_err(|err| ApiError::source_unavailable(READ_ERROR, err))?;

    let mut doc = String::new();
    file.read_to_string(&mut doc)
        .map_err(|err| ApiError::source_unavailable(READ_ERROR, err))?;

    let updated = apply_preseed_update(&doc, update)?;
    write_replacement(path, &metadata, &updated)
        .map_err(|err| ApiError::sink_unavailable(WRITE_ERROR, err))?;

    // dropping `file` releases the lock
    drop(file);
    Ok(())
}

// A writer that renamed a new file into place while we waited leaves us
// holding a stale inode; retry until the locked handle is the current file.
fn lock_current(path: &Path) -> io::Result<(File, Metadata)> {
    for _ in 0..LOCK_ATTEMPTS {
        let file = File::open(path)?;
        file.lock_exclusive()?;
        let locked = file.metadata()?;
        let current = fs::metadata(path)?;
        if same_file(&locked, &current) {
            return Ok((file, locked));
        }
    }
    Err(io::Error::new(
        io::ErrorKind::Other,
        "preseed file was replaced repeatedly while waiting for the lock",
    ))
}

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

fn write_replacement(path: &Path, original: &Metadata, contents: &str) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents.as_bytes())?;
    tmp.as_file().set_permissions(original.permissions())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
