//! 9P2000.u protocol data types and constants.
//!
//! # Protocol
//! 9P2000.u — the thirteen operations this server speaks. Reviving the
//! classic 9P2000 ops (`Open`/`Create`/`Stat`/`Wstat`) that a 9P2000.L
//! server leaves out, and adding 9P2000.u's extra `Stat` fields
//! (`extension`, `n_uid`, `n_gid`, `n_muid`).

use std::mem::{size_of, size_of_val};

use bitflags::bitflags;

/// 9P2000 version string (exact-match fallback)
pub const P92000: &str = "9P2000";

/// 9P2000.u version string (the version this server prefers to negotiate)
pub const P92000U: &str = "9P2000.u";

/// The version string returned when the server does not recognize the
/// client's proposal.
pub const VERSION_UNKNOWN: &str = "unknown";

/// Special tag which `TVersion`/`RVersion` must use as `tag`
pub const NOTAG: u16 = !0;

/// Special value which `TAttach` with no auth must use as `afid`
pub const NOFID: u32 = !0;

/// Special uid which `TAuth`/`TAttach` use as `n_uname` to indicate no uid is specified
pub const NONUNAME: u32 = !0;

/// v9fs default port
pub const V9FS_PORT: u16 = 564;

/// Mode bits for `Topen`/`Tcreate`, the classic 9P2000 `om` encoding.
pub mod om {
    pub const READ: u8 = 0;
    pub const WRITE: u8 = 1;
    pub const RDWR: u8 = 2;
    pub const EXEC: u8 = 3;
    /// Mask for the low two bits carrying the access mode above.
    pub const MODE_MASK: u8 = 0x03;
    /// Or'ed in (except exec), truncate file first
    pub const TRUNC: u8 = 16;
    /// Or'ed in, close on exec (accepted, meaningless on this server)
    pub const CEXEC: u8 = 32;
    /// Or'ed in, remove on close
    pub const RCLOSE: u8 = 64;
}

/// Bits in `Stat.mode`, the classic 9P2000 `dm` encoding.
pub mod dm {
    pub const DIR: u32 = 0x80000000;
    pub const APPEND: u32 = 0x40000000;
    pub const EXCL: u32 = 0x20000000;
    pub const MOUNT: u32 = 0x10000000;
    pub const AUTH: u32 = 0x08000000;
    pub const TMP: u32 = 0x04000000;
    /// 9P2000.u symlink bit
    pub const SYMLINK: u32 = 0x02000000;
    pub const READ: u32 = 0x4;
    pub const WRITE: u32 = 0x2;
    pub const EXEC: u32 = 0x1;
}

bitflags! {
    /// Bits in QId.typ
    #[derive(Copy, Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord)]
    pub struct QIdType: u8 {
        #[doc = "Type bit for directories"]
        const DIR       = 0x80;
        #[doc = "Type bit for append only files"]
        const APPEND    = 0x40;
        #[doc = "Type bit for exclusive use files"]
        const EXCL      = 0x20;
        #[doc = "Type bits for symbolic links (9P2000.u, unused by this server)"]
        const SYMLINK   = 0x02;
        #[doc = "Plain file"]
        const FILE      = 0x00;
    }
}

/// The server's unique identification for the file being accessed.
///
/// `path` is synthesized from the FAT32 location of the entry: see
/// [`crate::mapper`] for the `(starting_cluster << 32) | dir_entry_offset`
/// encoding. `version` is derived from the entry's FAT modification time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct QId {
    pub typ: QIdType,
    pub version: u32,
    pub path: u64,
}

impl QId {
    pub const ENCODED_SIZE: u32 = (size_of::<u8>() + size_of::<u32>() + size_of::<u64>()) as u32;

    pub fn size(&self) -> u32 {
        Self::ENCODED_SIZE
    }
}

/// Plan 9 Namespace metadata, 9P2000.u flavor (adds `extension`, `n_uid`,
/// `n_gid`, `n_muid` to the classic 9P2000 `Stat`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stat {
    pub typ: u16,
    pub dev: u32,
    pub qid: QId,
    pub mode: u32,
    pub atime: u32,
    pub mtime: u32,
    pub length: u64,
    pub name: String,
    pub uid: String,
    pub gid: String,
    pub muid: String,
    pub extension: String,
    pub n_uid: u32,
    pub n_gid: u32,
    pub n_muid: u32,
}

impl Stat {
    /// Size of the encoded record, not counting the leading `size[2]` field
    /// itself (matching the wire convention: `stat.size` excludes itself).
    pub fn size(&self) -> u16 {
        (size_of_val(&self.typ)
            + size_of_val(&self.dev)
            + self.qid.size() as usize
            + size_of_val(&self.mode)
            + size_of_val(&self.atime)
            + size_of_val(&self.mtime)
            + size_of_val(&self.length)
            + (size_of::<u16>() * 5)
            + self.name.len()
            + self.uid.len()
            + self.gid.len()
            + self.muid.len()
            + self.extension.len()
            + size_of_val(&self.n_uid)
            + size_of_val(&self.n_gid)
            + size_of_val(&self.n_muid)) as u16
    }
}

/// Data payload used in `Rread`/`Twrite`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Data(pub Vec<u8>);

/// Message type, the thirteen 9P2000.u operations this server implements.
///
/// The numbering matches the historical 9P2000 assignment; a 9P2000.L
/// server doesn't use `TOpen`/`TCreate`/`TStat`/`TWStat` at all, so their
/// byte values are free for this server to revive unchanged.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MsgType {
    TVersion = 100,
    RVersion = 101,
    TAuth = 102,
    RAuth = 103,
    TAttach = 104,
    RAttach = 105,
    RError = 107,
    TFlush = 108,
    RFlush = 109,
    TWalk = 110,
    RWalk = 111,
    TOpen = 112,
    ROpen = 113,
    TCreate = 114,
    RCreate = 115,
    TRead = 116,
    RRead = 117,
    TWrite = 118,
    RWrite = 119,
    TClunk = 120,
    RClunk = 121,
    TRemove = 122,
    RRemove = 123,
    TStat = 124,
    RStat = 125,
    TWStat = 126,
    RWStat = 127,
}

impl MsgType {
    pub fn from_u8(v: u8) -> Option<MsgType> {
        use MsgType::*;
        Some(match v {
            100 => TVersion,
            101 => RVersion,
            102 => TAuth,
            103 => RAuth,
            104 => TAttach,
            105 => RAttach,
            107 => RError,
            108 => TFlush,
            109 => RFlush,
            110 => TWalk,
            111 => RWalk,
            112 => TOpen,
            113 => ROpen,
            114 => TCreate,
            115 => RCreate,
            116 => TRead,
            117 => RRead,
            118 => TWrite,
            119 => RWrite,
            120 => TClunk,
            121 => RClunk,
            122 => TRemove,
            123 => RRemove,
            124 => TStat,
            125 => RStat,
            126 => TWStat,
            127 => RWStat,
            _ => return None,
        })
    }

    pub fn is_t(&self) -> bool {
        !self.is_r()
    }

    pub fn is_r(&self) -> bool {
        use MsgType::*;
        matches!(
            *self,
            RVersion | RAuth | RAttach | RError | RFlush | RWalk | ROpen | RCreate | RRead
                | RWrite | RClunk | RRemove | RStat | RWStat
        )
    }
}

impl<'a> From<&'a FCall> for MsgType {
    fn from(fcall: &'a FCall) -> MsgType {
        match *fcall {
            FCall::TVersion { .. } => MsgType::TVersion,
            FCall::RVersion { .. } => MsgType::RVersion,
            FCall::TAuth { .. } => MsgType::TAuth,
            FCall::RAuth { .. } => MsgType::RAuth,
            FCall::TAttach { .. } => MsgType::TAttach,
            FCall::RAttach { .. } => MsgType::RAttach,
            FCall::RError { .. } => MsgType::RError,
            FCall::TFlush { .. } => MsgType::TFlush,
            FCall::RFlush => MsgType::RFlush,
            FCall::TWalk { .. } => MsgType::TWalk,
            FCall::RWalk { .. } => MsgType::RWalk,
            FCall::TOpen { .. } => MsgType::TOpen,
            FCall::ROpen { .. } => MsgType::ROpen,
            FCall::TCreate { .. } => MsgType::TCreate,
            FCall::RCreate { .. } => MsgType::RCreate,
            FCall::TRead { .. } => MsgType::TRead,
            FCall::RRead { .. } => MsgType::RRead,
            FCall::TWrite { .. } => MsgType::TWrite,
            FCall::RWrite { .. } => MsgType::RWrite,
            FCall::TClunk { .. } => MsgType::TClunk,
            FCall::RClunk => MsgType::RClunk,
            FCall::TRemove { .. } => MsgType::TRemove,
            FCall::RRemove => MsgType::RRemove,
            FCall::TStat { .. } => MsgType::TStat,
            FCall::RStat { .. } => MsgType::RStat,
            FCall::TWStat { .. } => MsgType::TWStat,
            FCall::RWStat => MsgType::RWStat,
        }
    }
}

/// A data type encapsulating the thirteen 9P2000.u message bodies this
/// server speaks.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum FCall {
    TVersion {
        msize: u32,
        version: String,
    },
    RVersion {
        msize: u32,
        version: String,
    },
    TAuth {
        afid: u32,
        uname: String,
        aname: String,
        n_uname: u32,
    },
    RAuth {
        aqid: QId,
    },
    TAttach {
        fid: u32,
        afid: u32,
        uname: String,
        aname: String,
        n_uname: u32,
    },
    RAttach {
        qid: QId,
    },
    RError {
        ename: String,
    },
    TFlush {
        oldtag: u16,
    },
    RFlush,
    TWalk {
        fid: u32,
        newfid: u32,
        wnames: Vec<String>,
    },
    RWalk {
        wqids: Vec<QId>,
    },
    TOpen {
        fid: u32,
        mode: u8,
    },
    ROpen {
        qid: QId,
        iounit: u32,
    },
    TCreate {
        fid: u32,
        name: String,
        perm: u32,
        mode: u8,
    },
    RCreate {
        qid: QId,
        iounit: u32,
    },
    TRead {
        fid: u32,
        offset: u64,
        count: u32,
    },
    RRead {
        data: Data,
    },
    TWrite {
        fid: u32,
        offset: u64,
        data: Data,
    },
    RWrite {
        count: u32,
    },
    TClunk {
        fid: u32,
    },
    RClunk,
    TRemove {
        fid: u32,
    },
    RRemove,
    TStat {
        fid: u32,
    },
    RStat {
        stat: Stat,
    },
    TWStat {
        fid: u32,
        stat: Stat,
    },
    RWStat,
}

impl FCall {
    /// Fids this message references as an existing fid (not a `newfid`).
    pub fn fids(&self) -> Vec<u32> {
        match *self {
            FCall::TAttach { afid, .. } if afid != NOFID => vec![afid],
            FCall::TWalk { fid, .. } => vec![fid],
            FCall::TOpen { fid, .. } => vec![fid],
            FCall::TCreate { fid, .. } => vec![fid],
            FCall::TRead { fid, .. } => vec![fid],
            FCall::TWrite { fid, .. } => vec![fid],
            FCall::TClunk { fid } => vec![fid],
            FCall::TRemove { fid } => vec![fid],
            FCall::TStat { fid } => vec![fid],
            FCall::TWStat { fid, .. } => vec![fid],
            _ => Vec::new(),
        }
    }

    pub fn newfid(&self) -> Option<u32> {
        match *self {
            FCall::TAttach { fid, .. } => Some(fid),
            FCall::TWalk { newfid, .. } => Some(newfid),
            _ => None,
        }
    }
}

/// Envelope for 9P messages: `tag` plus body. `size`/`type` are handled by
/// the framing layer, not stored here.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Msg {
    pub tag: u16,
    pub body: FCall,
}
