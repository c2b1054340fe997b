//! Per-connection session state: phase machine, fid table, negotiated
//! parameters.
//!
//! Generalizes the teacher's `FId<T>` wrapper (`srv.rs`) from a
//! process-wide `Arc<RwLock<HashMap<u32, FId<T>>>>` fid table to a
//! per-session, non-shared one (this server never shares a fid across
//! connections), carrying the phase gate spec.md's Session State component
//! requires and that the teacher's 9P2000.L-only client never needed.

use std::collections::HashMap;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fcall::QId;

/// Negotiation/attach phase a session must be in for a given request to be
/// legal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Phase {
    AwaitingVersion,
    AwaitingAttach,
    Attached,
}

/// Access mode recorded on an opened fid, the low bits of the classic
/// 9P2000 `om` encoding.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write,
    ReadWrite,
    Exec,
}

impl OpenMode {
    pub fn from_om(mode: u8) -> Option<OpenMode> {
        use crate::fcall::om;
        match mode & om::MODE_MASK {
            om::READ => Some(OpenMode::Read),
            om::WRITE => Some(OpenMode::Write),
            om::RDWR => Some(OpenMode::ReadWrite),
            om::EXEC => Some(OpenMode::Exec),
            _ => None,
        }
    }

    pub fn allows_write(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::ReadWrite)
    }

    pub fn allows_read(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ReadWrite | OpenMode::Exec)
    }
}

/// State recorded once a fid has been opened (or created-and-opened).
#[derive(Clone, Debug)]
pub struct OpenState {
    pub mode: OpenMode,
    pub is_dir: bool,
    /// Set by `Topen`'s `TRUNC` bit / remove-on-close bit.
    pub remove_on_close: bool,
    /// Byte cursor into the directory-entry stream, enforced by Read to be
    /// either 0 or the end of the previous read.
    pub dir_cursor: u64,
}

/// Per-fid server-side state: a path into the exported volume plus whatever
/// open state the client has established on it.
#[derive(Clone, Debug)]
pub struct FidState {
    pub fid: u32,
    /// Path components from the volume root, normalized (no `.`, `..`
    /// already resolved, no empty components).
    pub path: Vec<String>,
    pub qid: QId,
    pub open: Option<OpenState>,
}

impl FidState {
    pub fn new(fid: u32, path: Vec<String>, qid: QId) -> FidState {
        FidState {
            fid,
            path,
            qid,
            open: None,
        }
    }

    pub fn is_opened(&self) -> bool {
        self.open.is_some()
    }
}

/// Per-connection state: negotiated parameters, phase, and the bounded fid
/// table spec.md's Session State component (C4) names.
pub struct Session {
    pub phase: Phase,
    pub msize: u32,
    pub version: String,
    fids: HashMap<u32, FidState>,
    max_fids: usize,
}

impl Session {
    pub fn new(config: &Config) -> Session {
        Session {
            phase: Phase::AwaitingVersion,
            msize: config.max_msize,
            version: crate::fcall::VERSION_UNKNOWN.to_owned(),
            fids: HashMap::new(),
            max_fids: config.max_fids_per_client,
        }
    }

    /// `Tversion` resets a session back to its pre-attach state, dropping
    /// every fid, per spec.md 4.6.1.
    pub fn reset_for_version(&mut self, msize: u32, version: String) {
        self.msize = msize;
        self.version = version;
        self.fids.clear();
        self.phase = Phase::AwaitingAttach;
    }

    pub fn get(&self, fid: u32) -> Result<&FidState> {
        self.fids.get(&fid).ok_or(Error::UnknownFid)
    }

    pub fn get_mut(&mut self, fid: u32) -> Result<&mut FidState> {
        self.fids.get_mut(&fid).ok_or(Error::UnknownFid)
    }

    pub fn contains(&self, fid: u32) -> bool {
        self.fids.contains_key(&fid)
    }

    /// Insert a brand new fid, failing with `fid in use` per spec.md's Walk
    /// and Attach preconditions.
    pub fn insert_new(&mut self, state: FidState) -> Result<()> {
        if self.fids.contains_key(&state.fid) {
            return Err(Error::FidInUse);
        }
        if self.fids.len() >= self.max_fids {
            return Err(Error::Io(std::io::Error::other(
                "fid table exhausted",
            )));
        }
        self.fids.insert(state.fid, state);
        Ok(())
    }

    /// Replace (or insert) a fid unconditionally — used by Walk's
    /// clone/descent success path, where `newfid` may equal `fid`.
    pub fn put(&mut self, state: FidState) {
        self.fids.insert(state.fid, state);
    }

    /// Remove a fid and return its state. Clunk/Remove always release the
    /// fid even when the underlying operation fails, so callers should call
    /// this regardless of an earlier error.
    pub fn remove(&mut self, fid: u32) -> Option<FidState> {
        self.fids.remove(&fid)
    }

    pub fn fid_count(&self) -> usize {
        self.fids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> Config {
        Config::default()
    }

    #[test]
    fn new_session_starts_awaiting_version() {
        let s = Session::new(&cfg());
        assert_eq!(s.phase, Phase::AwaitingVersion);
        assert_eq!(s.fid_count(), 0);
    }

    #[test]
    fn insert_new_rejects_duplicate_fid() {
        let mut s = Session::new(&cfg());
        s.insert_new(FidState::new(0, vec![], QId::default())).unwrap();
        let err = s
            .insert_new(FidState::new(0, vec![], QId::default()))
            .unwrap_err();
        assert_eq!(err.ename(), "fid in use");
    }

    #[test]
    fn get_unknown_fid_errors() {
        let s = Session::new(&cfg());
        let err = s.get(42).unwrap_err();
        assert_eq!(err.ename(), "fid unknown or out of range");
    }

    #[test]
    fn reset_for_version_clears_fids_and_advances_phase() {
        let mut s = Session::new(&cfg());
        s.insert_new(FidState::new(1, vec![], QId::default())).unwrap();
        s.reset_for_version(4096, "9P2000.u".to_owned());
        assert_eq!(s.fid_count(), 0);
        assert_eq!(s.phase, Phase::AwaitingAttach);
    }

    #[test]
    fn fid_table_is_bounded() {
        let mut cfg = cfg();
        cfg.max_fids_per_client = 1;
        let mut s = Session::new(&cfg);
        s.insert_new(FidState::new(0, vec![], QId::default())).unwrap();
        let err = s
            .insert_new(FidState::new(1, vec![], QId::default()))
            .unwrap_err();
        assert_eq!(err.ename(), "io error");
    }
}
