//! Persistent configuration file.
//!
//! One JSON object whose top-level keys are sub-sections owned by individual
//! components (search history, highlight rules, filter-list options, buffer
//! size). The file carries a format version; files written by a newer
//! program, or older than the compatibility floor, are refused and the
//! program starts with defaults. Writes are debounced and skipped entirely
//! when the serialized content did not change; the previous file is kept
//! once as a `.bak` copy.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use core_highlight::RuleCfg;
use core_parse::ParseSpec;
use core_search::SearchPar;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

pub mod cli;

pub use cli::{BufferMode, CliArgs, CliError, parse_args};

/// Version stamp written into the file; bumped only on format changes.
pub const RCFILE_VERSION: u32 = 0x0001_0000;
/// Oldest file version this program still accepts.
pub const RCFILE_COMPAT: u32 = 0x0001_0000;

pub const DEFAULT_RC_FILE_NAME: &str = ".trowserc.qt";

/// Default buffer cap: 20 MiB head.
pub const DEFAULT_BUF_SIZE: u64 = 20 * 1024 * 1024;

pub const RC_WRITE_DELAY: Duration = Duration::from_secs(3);
pub const RC_WRITE_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error accessing config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("error parsing config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("config file has an incompatible version ({0:#x}) and cannot be loaded")]
    IncompatibleVersion(u32),
    #[error("config file appears truncated (no version entry)")]
    MissingVersion,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MainSearchCfg {
    #[serde(default)]
    pub tlb_history: Vec<SearchPar>,
    #[serde(default)]
    pub tlb_case: bool,
    #[serde(default)]
    pub tlb_regexp: bool,
    #[serde(default = "default_true")]
    pub tlb_hall: bool,
    #[serde(default = "default_hist_maxlen")]
    pub tlb_hist_maxlen: u32,
}

fn default_true() -> bool {
    true
}

fn default_hist_maxlen() -> u32 {
    core_search::TLB_HIST_MAXLEN as u32
}

impl Default for MainSearchCfg {
    fn default() -> Self {
        Self {
            tlb_history: Vec::new(),
            tlb_case: false,
            tlb_regexp: false,
            tlb_hall: true,
            tlb_hist_maxlen: default_hist_maxlen(),
        }
    }
}

/// Filter-list window options plus the side-column parser setup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SearchListCfg {
    #[serde(default)]
    pub show_line_idx: bool,
    #[serde(default)]
    pub show_line_delta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parser: Option<ParseSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RcFile {
    #[serde(default)]
    pub main_search: MainSearchCfg,
    #[serde(default)]
    pub highlight: Vec<RuleCfg>,
    #[serde(default)]
    pub search_list: SearchListCfg,
    /// The 64-bit byte cap split in two 32-bit halves.
    #[serde(default)]
    pub load_buf_size_lsb: u32,
    #[serde(default)]
    pub load_buf_size_msb: u32,
    pub xx_trowser_version: u32,
    /// Unknown top-level keys are preserved so a round-trip does not drop
    /// sections written by other versions.
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

impl Default for RcFile {
    fn default() -> Self {
        Self {
            main_search: MainSearchCfg::default(),
            highlight: Vec::new(),
            search_list: SearchListCfg::default(),
            load_buf_size_lsb: 0,
            load_buf_size_msb: 0,
            xx_trowser_version: RCFILE_VERSION,
            other: BTreeMap::new(),
        }
    }
}

impl RcFile {
    pub fn load_buf_size(&self) -> Option<u64> {
        let v = u64::from(self.load_buf_size_lsb) | (u64::from(self.load_buf_size_msb) << 32);
        (v != 0).then_some(v)
    }

    pub fn set_load_buf_size(&mut self, size: u64) {
        self.load_buf_size_lsb = (size & 0xFFFF_FFFF) as u32;
        self.load_buf_size_msb = (size >> 32) as u32;
    }
}

/// Path of the config file: explicit override, else the platform config
/// directory, else the working directory.
pub fn rc_path(override_path: Option<&Path>) -> PathBuf {
    if let Some(p) = override_path {
        return p.to_path_buf();
    }
    match dirs::config_dir() {
        Some(dir) => dir.join(DEFAULT_RC_FILE_NAME),
        None => {
            warn!(target: "config", "failed to determine config directory; using current directory");
            PathBuf::from(DEFAULT_RC_FILE_NAME)
        }
    }
}

/// Skip a leading block of blank and `#` comment lines.
fn skip_leading_comments(text: &str) -> &str {
    let mut rest = text;
    loop {
        let line_end = rest.find('\n').map(|i| i + 1).unwrap_or(rest.len());
        let line = rest[..line_end].trim_end_matches('\n').trim();
        if !line.is_empty() && !line.starts_with('#') {
            return rest;
        }
        if line_end == rest.len() {
            return "";
        }
        rest = &rest[line_end..];
    }
}

/// Load and validate the file. Callers fall back to [`RcFile::default`] on
/// any error, reporting it once.
pub fn load(path: &Path) -> Result<RcFile, ConfigError> {
    let text = fs::read_to_string(path)?;
    let body = skip_leading_comments(&text);

    // probe the version before deserializing the full structure
    let probe: serde_json::Value = serde_json::from_str(body)?;
    let version = probe
        .get("xx_trowser_version")
        .and_then(|v| v.as_u64())
        .ok_or(ConfigError::MissingVersion)? as u32;
    if !(RCFILE_COMPAT..=RCFILE_VERSION).contains(&version) {
        return Err(ConfigError::IncompatibleVersion(version));
    }

    let rc: RcFile = serde_json::from_value(probe)?;
    for key in rc.other.keys() {
        warn!(target: "config", key = key.as_str(), "ignoring unknown keyword at top-level in rcfile");
    }
    info!(target: "config", path = %path.display(), "config_loaded");
    Ok(rc)
}

/// Writer keeping the last serialized content for change detection and the
/// one-shot backup state.
pub struct ConfigWriter {
    path: PathBuf,
    prev: Option<RcFile>,
    backed_up: bool,
    error_reported: bool,
}

impl ConfigWriter {
    pub fn new(path: PathBuf, loaded: Option<RcFile>) -> Self {
        Self {
            path,
            prev: loaded,
            backed_up: false,
            error_reported: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write unless the content equals what was last read or written.
    /// Returns whether a write happened. I/O errors are reported only once
    /// per session; later attempts fail silently.
    pub fn write(&mut self, rc: &RcFile) -> Result<bool, ConfigError> {
        if self.prev.as_ref() == Some(rc) {
            return Ok(false);
        }
        let result = self.write_inner(rc);
        match &result {
            Ok(_) => {
                self.prev = Some(rc.clone());
                self.error_reported = false;
            }
            Err(_) if self.error_reported => return Ok(false),
            Err(_) => self.error_reported = true,
        }
        result.map(|_| true)
    }

    fn write_inner(&mut self, rc: &RcFile) -> Result<(), ConfigError> {
        self.backup_once()?;
        let mut text = String::from(
            "#\n# loupe configuration file\n#\n# This file is automatically generated - do not edit\n#\n",
        );
        text.push_str(&serde_json::to_string_pretty(rc)?);
        text.push('\n');
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, text)?;
        info!(target: "config", path = %self.path.display(), "config_written");
        Ok(())
    }

    /// Rename the pre-existing file to `.bak` before the first overwrite of
    /// this session; an older backup is replaced.
    fn backup_once(&mut self) -> Result<(), ConfigError> {
        if self.backed_up {
            return Ok(());
        }
        if self.path.exists() {
            let mut bak = self.path.as_os_str().to_owned();
            bak.push(".bak");
            let bak = PathBuf::from(bak);
            let _ = fs::remove_file(&bak);
            if let Err(e) = fs::rename(&self.path, &bak) {
                warn!(target: "config", error = %e, "failed to keep config backup");
            }
        }
        self.backed_up = true;
        Ok(())
    }
}

/// Debounce state for delayed config writes. A change request arms a short
/// timer; further changes re-arm it, but only until a bounded time has
/// passed since the last actual write, so continuous changes cannot defer
/// the write forever.
pub struct WriteDebounce {
    deadline: Option<Instant>,
    last_write: Instant,
}

impl Default for WriteDebounce {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteDebounce {
    pub fn new() -> Self {
        Self {
            deadline: None,
            last_write: Instant::now(),
        }
    }

    pub fn request(&mut self) {
        self.request_at(Instant::now());
    }

    pub fn request_at(&mut self, now: Instant) {
        if self.deadline.is_none() || now.duration_since(self.last_write) < RC_WRITE_MAX_DELAY {
            self.deadline = Some(now + RC_WRITE_DELAY);
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_due(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn mark_written(&mut self) {
        self.mark_written_at(Instant::now());
    }

    pub fn mark_written_at(&mut self, now: Instant) {
        self.deadline = None;
        self.last_write = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_rc() -> RcFile {
        let mut rc = RcFile::default();
        rc.main_search.tlb_history = vec![
            SearchPar::new("foo", true, false),
            SearchPar::new("bar", false, true),
        ];
        rc.main_search.tlb_hall = true;
        rc.set_load_buf_size(0x1_2345_6789);
        rc
    }

    #[test]
    fn round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        let mut w = ConfigWriter::new(path.clone(), None);
        let rc = sample_rc();
        assert!(w.write(&rc).unwrap());

        let back = load(&path).unwrap();
        assert_eq!(back, rc);
        assert_eq!(back.load_buf_size(), Some(0x1_2345_6789));
    }

    #[test]
    fn unchanged_content_is_not_rewritten() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        let mut w = ConfigWriter::new(path.clone(), None);
        let rc = sample_rc();
        assert!(w.write(&rc).unwrap());
        assert!(!w.write(&rc).unwrap());

        let mut rc2 = rc.clone();
        rc2.main_search.tlb_case = true;
        assert!(w.write(&rc2).unwrap());
    }

    #[test]
    fn backup_created_once_on_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        fs::write(&path, "old content").unwrap();

        let mut w = ConfigWriter::new(path.clone(), None);
        w.write(&sample_rc()).unwrap();
        let bak = dir.path().join("rc.json.bak");
        assert_eq!(fs::read_to_string(&bak).unwrap(), "old content");

        // a second write must not clobber the backup with the first write
        let mut rc2 = sample_rc();
        rc2.main_search.tlb_regexp = true;
        w.write(&rc2).unwrap();
        assert_eq!(fs::read_to_string(&bak).unwrap(), "old content");
    }

    #[test]
    fn leading_comments_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        let body = serde_json::to_string(&sample_rc()).unwrap();
        fs::write(&path, format!("# hello\n\n# world\n{body}")).unwrap();
        assert!(load(&path).is_ok());
    }

    #[test]
    fn incompatible_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        let mut rc = sample_rc();
        rc.xx_trowser_version = RCFILE_VERSION + 1;
        fs::write(&path, serde_json::to_string(&rc).unwrap()).unwrap();
        assert!(matches!(
            load(&path),
            Err(ConfigError::IncompatibleVersion(_))
        ));
    }

    #[test]
    fn missing_version_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        fs::write(&path, "{}").unwrap();
        assert!(matches!(load(&path), Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn unknown_sections_survive_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rc.json");
        let json = format!(
            r#"{{"xx_trowser_version": {RCFILE_VERSION}, "dlg_highlight": {{"win_geom": "00ff"}}}}"#
        );
        fs::write(&path, json).unwrap();
        let rc = load(&path).unwrap();
        assert!(rc.other.contains_key("dlg_highlight"));

        let mut w = ConfigWriter::new(path.clone(), None);
        w.write(&rc).unwrap();
        let back = load(&path).unwrap();
        assert_eq!(back.other, rc.other);
    }

    #[test]
    fn debounce_rearm_is_capped() {
        let mut d = WriteDebounce::new();
        let t0 = Instant::now();
        d.mark_written_at(t0);
        d.request_at(t0 + Duration::from_secs(1));
        let first_deadline = d.deadline().unwrap();

        // within the cap window, re-requests push the deadline out
        d.request_at(t0 + Duration::from_secs(2));
        assert!(d.deadline().unwrap() > first_deadline);

        // past the cap, the pending deadline stays put
        let pending = d.deadline().unwrap();
        d.request_at(t0 + RC_WRITE_MAX_DELAY + Duration::from_secs(1));
        assert_eq!(d.deadline().unwrap(), pending);
    }
}
