//! CPG wire messages
//!
//! Field shapes transcribed from `original_source/exec/cpg.c`'s
//! `struct req_exec_cpg_*` bodies (spec §6). Endian-converted on
//! receipt the same way votequorum's messages are.

use crate::node::NodeId;
use crate::wire::WireConvert;
use serde::{Deserialize, Serialize};

pub type GroupName = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinLeaveReason {
    Join,
    Leave,
    Procdown,
}

/// `PROCJOIN`/`PROCLEAVE{group_name, pid, reason}` — same wire shape,
/// distinguished only by `reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcJoinLeave {
    pub group_name: GroupName,
    pub pid: u32,
    pub reason: JoinLeaveReason,
}

/// `MCAST{group_name, msglen, pid, source, bytes}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mcast {
    pub group_name: GroupName,
    pub pid: u32,
    pub source: NodeId,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FragmentType {
    First,
    Continued,
    Last,
}

/// `PARTIAL_MCAST{group_name, msglen, fraglen, pid, type, source, bytes}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialMcast {
    pub group_name: GroupName,
    pub pid: u32,
    pub source: NodeId,
    pub msglen: u32,
    pub fragment_type: FragmentType,
    pub bytes: Vec<u8>,
}

/// `DOWNLIST{old_members_count, left_nodes}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Downlist {
    pub old_members_count: u32,
    pub left_nodes: Vec<NodeId>,
}

/// A version-mismatched downlist from an older peer; logged and dropped (spec §7/§9).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownlistOld {
    pub left_nodes: Vec<NodeId>,
}

/// One local `(pid, group)` entry carried in a `JOINLIST`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinlistEntry {
    pub pid: u32,
    pub group_name: GroupName,
}

/// `JOINLIST{(pid, group_name)*}` — every local process/group pair this node hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Joinlist {
    pub entries: Vec<JoinlistEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CpgMessage {
    ProcJoinLeave(ProcJoinLeave),
    Mcast(Mcast),
    PartialMcast(PartialMcast),
    Downlist(Downlist),
    DownlistOld(DownlistOld),
    Joinlist(Joinlist),
}

impl WireConvert for ProcJoinLeave {
    fn endian_convert(&mut self) {
        self.pid = self.pid.swap_bytes();
    }
}

impl WireConvert for Mcast {
    fn endian_convert(&mut self) {
        self.pid = self.pid.swap_bytes();
        self.source = self.source.swap_bytes();
    }
}

impl WireConvert for PartialMcast {
    fn endian_convert(&mut self) {
        self.pid = self.pid.swap_bytes();
        self.source = self.source.swap_bytes();
        self.msglen = self.msglen.swap_bytes();
    }
}

impl WireConvert for Downlist {
    fn endian_convert(&mut self) {
        self.old_members_count = self.old_members_count.swap_bytes();
        for n in &mut self.left_nodes {
            *n = n.swap_bytes();
        }
    }
}

impl WireConvert for DownlistOld {
    fn endian_convert(&mut self) {
        for n in &mut self.left_nodes {
            *n = n.swap_bytes();
        }
    }
}

impl WireConvert for JoinlistEntry {
    fn endian_convert(&mut self) {
        self.pid = self.pid.swap_bytes();
    }
}

impl WireConvert for Joinlist {
    fn endian_convert(&mut self) {
        for e in &mut self.entries {
            e.endian_convert();
        }
    }
}

impl WireConvert for CpgMessage {
    fn endian_convert(&mut self) {
        match self {
            CpgMessage::ProcJoinLeave(m) => m.endian_convert(),
            CpgMessage::Mcast(m) => m.endian_convert(),
            CpgMessage::PartialMcast(m) => m.endian_convert(),
            CpgMessage::Downlist(m) => m.endian_convert(),
            CpgMessage::DownlistOld(m) => m.endian_convert(),
            CpgMessage::Joinlist(m) => m.endian_convert(),
        }
    }
}
