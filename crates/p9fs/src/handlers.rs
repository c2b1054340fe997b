//! The thirteen 9P2000.u handlers (C6), plus the phase/message-type gate
//! that guards them (the part of spec.md 4.7 that isn't response framing).
//!
//! Grounded on the shape of the teacher's `Filesystem` trait (`srv.rs`): one
//! function per operation, taking fid state and returning a `Result<FCall>`.
//! Unlike the teacher, every operation here is implemented directly against
//! one FAT32 volume instead of being a generic trait a downstream crate
//! implements — this server has exactly one backend, so the indirection
//! the teacher's trait buys a library user buys nothing here.

use std::sync::Arc;

use log::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::fcall::{self, FCall, QId, QIdType, Stat, dm, om};
use crate::lock::FatLock;
use crate::mapper;
use crate::session::{FidState, OpenMode, OpenState, Phase, Session};

/// Maximum `nwname` per Walk, per spec.md 4.6.4.
pub const MAX_WALK_ELEMENTS: usize = 16;

pub struct Handler {
    lock: Arc<FatLock>,
    config: Config,
}

impl Handler {
    pub fn new(lock: Arc<FatLock>, config: Config) -> Handler {
        Handler { lock, config }
    }

    /// Entry point used by the dispatcher: validates message-type/phase
    /// legality (spec.md 4.7) then routes to the specific handler. Never
    /// returns `Err` — failures are already folded into `FCall::RError`, the
    /// shape the wire actually carries.
    pub async fn handle(&self, session: &mut Session, tag: u16, req: FCall) -> FCall {
        if let Err(e) = self.check_phase(session, &req) {
            warn!("tag {}: {:?}: {}", tag, fcall::MsgType::from(&req), e);
            return FCall::RError {
                ename: e.ename().to_owned(),
            };
        }

        let result = self.dispatch(session, req).await;
        match result {
            Ok(resp) => {
                info!("tag {}: -> {:?}", tag, fcall::MsgType::from(&resp));
                resp
            }
            Err(e) => {
                warn!("tag {}: error: {}", tag, e);
                FCall::RError {
                    ename: e.ename().to_owned(),
                }
            }
        }
    }

    fn check_phase(&self, session: &Session, req: &FCall) -> Result<()> {
        use FCall::*;
        match (session.phase, req) {
            // Version is legal (and repeatable) at any phase.
            (_, TVersion { .. }) => Ok(()),
            (Phase::AwaitingVersion, _) => Err(Error::Protocol),
            (Phase::AwaitingAttach, TAttach { .. } | TAuth { .. }) => Ok(()),
            (Phase::AwaitingAttach, _) => Err(Error::Protocol),
            (Phase::Attached, TVersion { .. } | TAttach { .. }) => Ok(()),
            (
                Phase::Attached,
                TAuth { .. }
                | TWalk { .. }
                | TOpen { .. }
                | TCreate { .. }
                | TRead { .. }
                | TWrite { .. }
                | TClunk { .. }
                | TRemove { .. }
                | TStat { .. }
                | TWStat { .. }
                | TFlush { .. },
            ) => Ok(()),
            _ => Err(Error::Protocol),
        }
    }

    async fn dispatch(&self, session: &mut Session, req: FCall) -> Result<FCall> {
        match req {
            FCall::TVersion { msize, version } => self.rversion(session, msize, version),
            FCall::TAuth { .. } => Err(Error::AuthNotRequired),
            FCall::TAttach {
                fid,
                afid,
                uname,
                aname,
                n_uname,
            } => self.rattach(session, fid, afid, uname, aname, n_uname),
            FCall::TWalk {
                fid,
                newfid,
                wnames,
            } => self.rwalk(session, fid, newfid, wnames).await,
            FCall::TOpen { fid, mode } => self.ropen(session, fid, mode).await,
            FCall::TCreate {
                fid,
                name,
                perm,
                mode,
            } => self.rcreate(session, fid, name, perm, mode).await,
            FCall::TRead { fid, offset, count } => self.rread(session, fid, offset, count).await,
            FCall::TWrite { fid, offset, data } => {
                self.rwrite(session, fid, offset, data.0).await
            }
            FCall::TClunk { fid } => self.rclunk(session, fid).await,
            FCall::TRemove { fid } => self.rremove(session, fid).await,
            FCall::TStat { fid } => self.rstat(session, fid).await,
            FCall::TWStat { fid, stat } => self.rwstat(session, fid, stat).await,
            FCall::TFlush { .. } => Ok(FCall::RFlush),
            _ => Err(Error::UnknownMessageType),
        }
    }

    fn rversion(&self, session: &mut Session, msize: u32, version: String) -> Result<FCall> {
        let agreed_msize = msize.min(self.config.max_msize).max(crate::config::MIN_MSIZE);
        let agreed_version = if version.starts_with(fcall::P92000U) {
            fcall::P92000U.to_owned()
        } else if version == fcall::P92000 {
            fcall::P92000.to_owned()
        } else {
            fcall::VERSION_UNKNOWN.to_owned()
        };

        if agreed_version != fcall::VERSION_UNKNOWN {
            session.reset_for_version(agreed_msize, agreed_version.clone());
        } else {
            session.msize = agreed_msize;
        }

        Ok(FCall::RVersion {
            msize: agreed_msize,
            version: agreed_version,
        })
    }

    fn rattach(
        &self,
        session: &mut Session,
        fid: u32,
        _afid: u32,
        _uname: String,
        _aname: String,
        _n_uname: u32,
    ) -> Result<FCall> {
        let qid = mapper::root_qid();
        session.insert_new(FidState::new(fid, Vec::new(), qid))?;
        session.phase = Phase::Attached;
        Ok(FCall::RAttach { qid })
    }

    async fn rwalk(
        &self,
        session: &mut Session,
        fid: u32,
        newfid: u32,
        wnames: Vec<String>,
    ) -> Result<FCall> {
        if wnames.len() > MAX_WALK_ELEMENTS {
            return Err(Error::WalkLimitExceeded);
        }
        let base = {
            let state = session.get(fid)?;
            if state.is_opened() && !wnames.is_empty() {
                return Err(Error::Protocol);
            }
            state.path.clone()
        };
        if newfid != fid && session.contains(newfid) {
            return Err(Error::FidInUse);
        }

        if wnames.is_empty() {
            let qid = session.get(fid)?.qid;
            if newfid != fid {
                session.put(FidState::new(newfid, base, qid));
            }
            return Ok(FCall::RWalk { wqids: vec![] });
        }

        let guard = self.lock.lock().await?;
        let root = guard.root_dir();
        let mut qids = Vec::new();
        let mut cur = base;
        for (i, name) in wnames.iter().enumerate() {
            let next = mapper::normalize(&cur, std::slice::from_ref(name))?;
            let stat = match mapper::stat_path(root.clone(), &next) {
                Ok(s) => s,
                Err(e) => {
                    if i == 0 {
                        return Err(e);
                    }
                    // Partial success: stop walking, keep fid unchanged.
                    return Ok(FCall::RWalk { wqids: qids });
                }
            };
            if i + 1 < wnames.len() && stat.qid.typ != QIdType::DIR {
                if i == 0 {
                    return Err(Error::NotADirectory);
                }
                // Partial success: stop walking, keep fid unchanged.
                return Ok(FCall::RWalk { wqids: qids });
            }
            qids.push(stat.qid);
            cur = next;
        }

        let last_qid = *qids.last().expect("wnames non-empty");
        session.put(FidState::new(newfid, cur, last_qid));
        Ok(FCall::RWalk { wqids: qids })
    }

    async fn ropen(&self, session: &mut Session, fid: u32, mode: u8) -> Result<FCall> {
        if session.get(fid)?.is_opened() {
            return Err(Error::Protocol);
        }
        let open_mode = OpenMode::from_om(mode).ok_or(Error::InvalidArgument)?;
        let truncate = mode & om::TRUNC != 0;
        let remove_on_close = mode & om::RCLOSE != 0;

        let path = session.get(fid)?.path.clone();
        let guard = self.lock.lock().await?;
        let root = guard.root_dir();
        let stat = mapper::stat_path(root.clone(), &path)?;
        let is_dir = stat.qid.typ == QIdType::DIR;

        if is_dir && open_mode.allows_write() {
            return Err(Error::IsADirectory);
        }
        if truncate {
            if is_dir {
                return Err(Error::IsADirectory);
            }
            mapper::truncate_file(root, &path, 0)?;
        }
        drop(guard);

        let iounit = (session.msize.saturating_sub(24)).min(session.msize);
        let state = session.get_mut(fid)?;
        state.qid = stat.qid;
        state.open = Some(OpenState {
            mode: open_mode,
            is_dir,
            remove_on_close,
            dir_cursor: 0,
        });

        Ok(FCall::ROpen {
            qid: stat.qid,
            iounit,
        })
    }

    async fn rcreate(
        &self,
        session: &mut Session,
        fid: u32,
        name: String,
        perm: u32,
        mode: u8,
    ) -> Result<FCall> {
        {
            let state = session.get(fid)?;
            if state.is_opened() {
                return Err(Error::Protocol);
            }
            if state.qid.typ != QIdType::DIR {
                return Err(Error::NotADirectory);
            }
        }
        if self.config.readonly {
            return Err(Error::PermissionDenied);
        }
        if perm & !(dm::DIR | dm::READ | dm::WRITE | dm::EXEC) != 0 {
            return Err(Error::NotSupported);
        }
        let want_dir = perm & dm::DIR != 0;
        if want_dir && OpenMode::from_om(mode) != Some(OpenMode::Read) {
            return Err(Error::InvalidArgument);
        }

        let parent = session.get(fid)?.path.clone();
        let new_path = mapper::normalize(&parent, std::slice::from_ref(&name))?;

        let guard = self.lock.lock().await?;
        let root = guard.root_dir();
        mapper::create_entry(root.clone(), &new_path, want_dir)?;
        let stat = match mapper::stat_path(root.clone(), &new_path) {
            Ok(s) => s,
            Err(e) => {
                let _ = mapper::remove_entry(root, &new_path);
                return Err(e);
            }
        };
        drop(guard);

        let open_mode = OpenMode::from_om(mode).ok_or(Error::InvalidArgument)?;
        let iounit = session.msize.saturating_sub(24);
        let state = session.get_mut(fid)?;
        state.path = new_path;
        state.qid = stat.qid;
        state.open = Some(OpenState {
            mode: open_mode,
            is_dir: want_dir,
            remove_on_close: mode & om::RCLOSE != 0,
            dir_cursor: 0,
        });

        Ok(FCall::RCreate {
            qid: stat.qid,
            iounit,
        })
    }

    async fn rread(&self, session: &mut Session, fid: u32, offset: u64, count: u32) -> Result<FCall> {
        let (path, open) = {
            let state = session.get(fid)?;
            let open = state.open.clone().ok_or(Error::Protocol)?;
            (state.path.clone(), open)
        };
        if !open.mode.allows_read() {
            return Err(Error::PermissionDenied);
        }

        let guard = self.lock.lock().await?;
        let root = guard.root_dir();

        if open.is_dir {
            if offset != 0 && offset != open.dir_cursor {
                return Err(Error::InvalidArgument);
            }
            let entries = mapper::list_dir(root, &path)?;
            let mut cursor = 0u64;
            let mut buf = Vec::new();
            for stat in entries {
                if cursor < offset {
                    cursor += stat.size() as u64 + 2;
                    continue;
                }
                let record_len = stat.size() as usize + 2;
                if !buf.is_empty() && buf.len() + record_len > count as usize {
                    break;
                }
                let mut enc = Vec::new();
                crate::serialize::Encodable::encode(&stat, &mut enc)
                    .map_err(Error::Io)?;
                if buf.is_empty() && enc.len() > count as usize {
                    // A single record never spans more than one Read call;
                    // the client must retry with a larger count.
                    break;
                }
                buf.extend_from_slice(&enc);
                cursor += enc.len() as u64;
            }
            drop(guard);
            let state = session.get_mut(fid)?;
            if let Some(open) = state.open.as_mut() {
                open.dir_cursor = offset + buf.len() as u64;
            }
            return Ok(FCall::RRead {
                data: crate::fcall::Data(buf),
            });
        }

        let data = mapper::read_file(root, &path, offset, count)?;
        Ok(FCall::RRead {
            data: crate::fcall::Data(data),
        })
    }

    async fn rwrite(&self, session: &mut Session, fid: u32, offset: u64, data: Vec<u8>) -> Result<FCall> {
        let (path, open) = {
            let state = session.get(fid)?;
            let open = state.open.clone().ok_or(Error::Protocol)?;
            (state.path.clone(), open)
        };
        if open.is_dir {
            return Err(Error::IsADirectory);
        }
        if !open.mode.allows_write() {
            return Err(Error::PermissionDenied);
        }
        if self.config.readonly {
            return Err(Error::PermissionDenied);
        }

        let guard = self.lock.lock().await?;
        let root = guard.root_dir();
        let count = mapper::write_file(root, &path, offset, &data)?;
        Ok(FCall::RWrite { count })
    }

    async fn rclunk(&self, session: &mut Session, fid: u32) -> Result<FCall> {
        let state = session.remove(fid).ok_or(Error::UnknownFid)?;
        if let Some(open) = state.open {
            if open.remove_on_close {
                let guard = self.lock.lock().await?;
                // Errors removing on close are reported, but the fid is
                // already released regardless (spec.md 4.6.9).
                let _ = mapper::remove_entry(guard.root_dir(), &state.path);
            }
        }
        Ok(FCall::RClunk)
    }

    async fn rremove(&self, session: &mut Session, fid: u32) -> Result<FCall> {
        let state = session.remove(fid).ok_or(Error::UnknownFid)?;
        if self.config.readonly {
            return Err(Error::PermissionDenied);
        }
        let guard = self.lock.lock().await?;
        match mapper::remove_entry(guard.root_dir(), &state.path) {
            Ok(()) => Ok(FCall::RRemove),
            Err(e) => {
                // Fid is already released above, even though we report the
                // underlying failure (spec.md 4.6.10).
                Err(e)
            }
        }
    }

    async fn rstat(&self, session: &mut Session, fid: u32) -> Result<FCall> {
        let path = session.get(fid)?.path.clone();
        let guard = self.lock.lock().await?;
        let stat = mapper::stat_path(guard.root_dir(), &path)?;
        Ok(FCall::RStat { stat })
    }

    async fn rwstat(&self, session: &mut Session, fid: u32, stat: Stat) -> Result<FCall> {
        if self.config.readonly {
            return Err(Error::PermissionDenied);
        }
        let path = session.get(fid)?.path.clone();
        let guard = self.lock.lock().await?;
        let root = guard.root_dir();
        let current = mapper::stat_path(root.clone(), &path)?;

        let mut new_path = path.clone();

        if !stat.name.is_empty() && stat.name != current.name {
            mapper::rename_entry(root.clone(), &path, &stat.name)?;
            if let Some((parent, _)) = path.split_last() {
                new_path = parent.to_vec();
                new_path.push(stat.name.clone());
            }
        }

        if stat.length != u64::MAX && stat.length < current.length {
            mapper::truncate_file(root.clone(), &new_path, stat.length)?;
        }

        if stat.mode != 0xFFFF_FFFF {
            let want_writable = stat.mode & dm::WRITE != 0;
            let is_writable = current.mode & dm::WRITE != 0;
            if want_writable != is_writable {
                mapper::set_readonly(root.clone(), &new_path, !want_writable)?;
            }
        }

        // mtime: silently ignored per spec.md's resolved Open Question —
        // this driver does not support setting it directly.

        if new_path != path {
            let state = session.get_mut(fid)?;
            state.path = new_path;
        }
        Ok(FCall::RWStat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    /// Format a throwaway FAT32 image on disk and hand back a `Handler`
    /// bound to it, mirroring spec.md 8's end-to-end scenarios.
    fn test_handler() -> Handler {
        let path = std::env::temp_dir().join(format!(
            "p9fs-test-{}-{:?}.img",
            std::process::id(),
            std::thread::current().id()
        ));
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .unwrap();
        file.set_len(8 * 1024 * 1024).unwrap();
        fatfs::format_volume(&mut file, fatfs::FormatVolumeOptions::new()).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let config = Config::default();
        let lock = Arc::new(FatLock::open(file, std::time::Duration::from_secs(5)).unwrap());
        Handler::new(lock, config)
    }

    fn version_attach(h: &Handler, session: &mut Session) {
        let resp = futures::executor::block_on(h.handle(
            session,
            0,
            FCall::TVersion {
                msize: 8192,
                version: fcall::P92000U.to_owned(),
            },
        ));
        assert!(matches!(resp, FCall::RVersion { .. }));

        let resp = futures::executor::block_on(h.handle(
            session,
            1,
            FCall::TAttach {
                fid: 0,
                afid: fcall::NOFID,
                uname: "tester".to_owned(),
                aname: String::new(),
                n_uname: fcall::NONUNAME,
            },
        ));
        assert!(matches!(resp, FCall::RAttach { .. }));
    }

    #[test]
    fn version_then_attach_then_walk_one_step() {
        let h = test_handler();
        let mut session = Session::new(&Config::default());
        version_attach(&h, &mut session);

        let resp = futures::executor::block_on(h.handle(
            &mut session,
            2,
            FCall::TWalk {
                fid: 0,
                newfid: 1,
                wnames: vec!["missing".to_owned()],
            },
        ));
        assert!(matches!(resp, FCall::RError { ref ename } if ename == "file not found"));
    }

    #[test]
    fn create_write_read_back_clunk() {
        let h = test_handler();
        let mut session = Session::new(&Config::default());
        version_attach(&h, &mut session);

        let resp = futures::executor::block_on(h.handle(
            &mut session,
            2,
            FCall::TCreate {
                fid: 0,
                name: "hello.txt".to_owned(),
                perm: 0,
                mode: om::RDWR,
            },
        ));
        assert!(matches!(resp, FCall::RCreate { .. }));

        let resp = futures::executor::block_on(h.handle(
            &mut session,
            3,
            FCall::TWrite {
                fid: 0,
                offset: 0,
                data: crate::fcall::Data(b"hi there".to_vec()),
            },
        ));
        assert!(matches!(resp, FCall::RWrite { count: 8 }));

        let resp = futures::executor::block_on(h.handle(
            &mut session,
            4,
            FCall::TRead {
                fid: 0,
                offset: 0,
                count: 64,
            },
        ));
        match resp {
            FCall::RRead { data } => assert_eq!(data.0, b"hi there"),
            other => panic!("unexpected response: {:?}", other),
        }

        let resp = futures::executor::block_on(h.handle(&mut session, 5, FCall::TClunk { fid: 0 }));
        assert!(matches!(resp, FCall::RClunk));
        assert_eq!(session.fid_count(), 0);
    }

    #[test]
    fn request_before_version_is_protocol_error() {
        let h = test_handler();
        let mut session = Session::new(&Config::default());

        let resp = futures::executor::block_on(h.handle(&mut session, 0, FCall::TClunk { fid: 0 }));
        assert!(matches!(resp, FCall::RError { ref ename } if ename == "protocol error"));
    }

    #[test]
    fn walk_past_limit_is_rejected() {
        let h = test_handler();
        let mut session = Session::new(&Config::default());
        version_attach(&h, &mut session);

        let wnames: Vec<String> = (0..(MAX_WALK_ELEMENTS + 1))
            .map(|i| format!("d{}", i))
            .collect();
        let resp = futures::executor::block_on(h.handle(
            &mut session,
            2,
            FCall::TWalk {
                fid: 0,
                newfid: 1,
                wnames,
            },
        ));
        assert!(matches!(resp, FCall::RError { ref ename } if ename == "walk limit exceeded"));
    }
}
