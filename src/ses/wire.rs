//! Binary wire format for the session daemon's control channel.
//!
//! Frames are `u32` big-endian length followed by the payload; the first
//! payload byte is the message type. Strings carry a `u16` length,
//! UUIDs travel as 32 ASCII hex bytes.

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// First byte written on a fresh connection.
pub const HANDSHAKE_CTL: u8 = 0x01;
pub const HANDSHAKE_VT: u8 = 0x02;

/// Frames beyond this are a protocol violation, not real traffic.
pub const MAX_FRAME: u32 = 16 * 1024 * 1024;

pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> std::io::Result<()> {
    w.write_all(&(data.len() as u32).to_be_bytes()).await?;
    w.write_all(data).await?;
    w.flush().await?;
    Ok(())
}

/// Returns `Ok(None)` on clean EOF.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match r.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame too large: {} bytes", len),
        ));
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CtlRequest {
    Register { uuid: Uuid, name: String },
    /// `mux_socket` is exported to the child as `HEXE_MUX_SOCKET` so
    /// `mux --notify` inside the pane can find its way back.
    CreatePane { cols: u16, rows: u16, cwd: String, cmd: String, mux_socket: String },
    KillPane { pane_id: u32 },
    OrphanPane { pane_id: u32, sticky: bool, float_key: u8, cwd: String },
    SetSticky { pane_id: u32, sticky: bool },
    FindSticky { float_key: u8, cwd: String },
    AdoptPane { uuid: Uuid, cols: u16, rows: u16 },
    ListOrphaned,
    ListSessions,
    Detach { state: String },
    Reattach { prefix: String },
    Ping,
    PaneInfo { pane_id: u32 },
    SyncState { state: String },
    UpdatePaneName { pane_id: u32, name: String },
    UpdatePaneShell(PaneShellUpdate),
    GetPaneCwd { pane_id: u32 },
    /// Legacy hook; the daemon accepts and discards it.
    UpdatePaneAux { pane_id: u32, data: Vec<u8> },
    ResizePane { pane_id: u32, cols: u16, rows: u16 },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaneShellUpdate {
    pub pane_id: u32,
    pub cmd: String,
    pub cwd: String,
    pub status: i32,
    pub duration_ms: u32,
    pub jobs: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrphanEntry {
    pub uuid: Uuid,
    pub cwd: String,
    pub float_key: u8,
    pub sticky: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionEntry {
    pub uuid: Uuid,
    pub name: String,
    pub pane_count: u16,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CtlResponse {
    Ok,
    PaneCreated { pane_id: u32, uuid: Uuid },
    StickyPane { pane: Option<(u32, Uuid)> },
    Orphans { entries: Vec<OrphanEntry> },
    Sessions { entries: Vec<SessionEntry> },
    ReattachState { state: String, uuids: Vec<Uuid> },
    PaneInfo { pid: u32, cmd: String, cwd: String },
    PaneCwd { pane_id: u32, cwd: String },
    Error { message: String },
}

impl CtlResponse {
    pub fn code(&self) -> u8 {
        match self {
            CtlResponse::Ok => 100,
            CtlResponse::PaneCreated { .. } => 101,
            CtlResponse::StickyPane { .. } => 102,
            CtlResponse::Orphans { .. } => 103,
            CtlResponse::Sessions { .. } => 104,
            CtlResponse::ReattachState { .. } => 105,
            CtlResponse::PaneInfo { .. } => 106,
            CtlResponse::PaneCwd { .. } => 107,
            CtlResponse::Error { .. } => 108,
        }
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }
    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }
    fn str(&mut self, s: &str) {
        self.u16(s.len() as u16);
        self.buf.extend_from_slice(s.as_bytes());
    }
    fn bytes(&mut self, b: &[u8]) {
        self.u32(b.len() as u32);
        self.buf.extend_from_slice(b);
    }
    /// Long string with a u32 length (detach state can exceed u16).
    fn lstr(&mut self, s: &str) {
        self.bytes(s.as_bytes());
    }
    fn uuid(&mut self, u: Uuid) {
        self.buf
            .extend_from_slice(u.simple().to_string().as_bytes());
    }
}

struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            bail!("undersized payload: want {} past {}", n, self.pos);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }
    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }
    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn bool(&mut self) -> Result<bool> {
        Ok(self.u8()? != 0)
    }
    fn str(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
    fn lstr(&mut self) -> Result<String> {
        Ok(String::from_utf8_lossy(&self.bytes()?).into_owned())
    }
    fn uuid(&mut self) -> Result<Uuid> {
        let hex = std::str::from_utf8(self.take(32)?).context("uuid not ascii")?;
        Uuid::try_parse(hex).context("bad uuid hex")
    }
}

pub fn encode_request(req: &CtlRequest) -> Vec<u8> {
    let mut w = ByteWriter::default();
    match req {
        CtlRequest::Register { uuid, name } => {
            w.u8(1);
            w.uuid(*uuid);
            w.str(name);
        }
        CtlRequest::CreatePane { cols, rows, cwd, cmd, mux_socket } => {
            w.u8(2);
            w.u16(*cols);
            w.u16(*rows);
            w.str(cwd);
            w.str(cmd);
            w.str(mux_socket);
        }
        CtlRequest::KillPane { pane_id } => {
            w.u8(3);
            w.u32(*pane_id);
        }
        CtlRequest::OrphanPane { pane_id, sticky, float_key, cwd } => {
            w.u8(4);
            w.u32(*pane_id);
            w.bool(*sticky);
            w.u8(*float_key);
            w.str(cwd);
        }
        CtlRequest::SetSticky { pane_id, sticky } => {
            w.u8(5);
            w.u32(*pane_id);
            w.bool(*sticky);
        }
        CtlRequest::FindSticky { float_key, cwd } => {
            w.u8(6);
            w.u8(*float_key);
            w.str(cwd);
        }
        CtlRequest::AdoptPane { uuid, cols, rows } => {
            w.u8(7);
            w.uuid(*uuid);
            w.u16(*cols);
            w.u16(*rows);
        }
        CtlRequest::ListOrphaned => w.u8(8),
        CtlRequest::ListSessions => w.u8(9),
        CtlRequest::Detach { state } => {
            w.u8(10);
            w.lstr(state);
        }
        CtlRequest::Reattach { prefix } => {
            w.u8(11);
            w.str(prefix);
        }
        CtlRequest::Ping => w.u8(12),
        CtlRequest::PaneInfo { pane_id } => {
            w.u8(13);
            w.u32(*pane_id);
        }
        CtlRequest::SyncState { state } => {
            w.u8(14);
            w.lstr(state);
        }
        CtlRequest::UpdatePaneName { pane_id, name } => {
            w.u8(15);
            w.u32(*pane_id);
            w.str(name);
        }
        CtlRequest::UpdatePaneShell(u) => {
            w.u8(16);
            w.u32(u.pane_id);
            w.str(&u.cmd);
            w.str(&u.cwd);
            w.i32(u.status);
            w.u32(u.duration_ms);
            w.u16(u.jobs);
        }
        CtlRequest::GetPaneCwd { pane_id } => {
            w.u8(17);
            w.u32(*pane_id);
        }
        CtlRequest::UpdatePaneAux { pane_id, data } => {
            w.u8(18);
            w.u32(*pane_id);
            w.bytes(data);
        }
        CtlRequest::ResizePane { pane_id, cols, rows } => {
            w.u8(19);
            w.u32(*pane_id);
            w.u16(*cols);
            w.u16(*rows);
        }
    }
    w.buf
}

pub fn decode_request(payload: &[u8]) -> Result<CtlRequest> {
    let mut r = ByteReader::new(payload);
    let req = match r.u8()? {
        1 => CtlRequest::Register { uuid: r.uuid()?, name: r.str()? },
        2 => CtlRequest::CreatePane {
            cols: r.u16()?,
            rows: r.u16()?,
            cwd: r.str()?,
            cmd: r.str()?,
            mux_socket: r.str()?,
        },
        3 => CtlRequest::KillPane { pane_id: r.u32()? },
        4 => CtlRequest::OrphanPane {
            pane_id: r.u32()?,
            sticky: r.bool()?,
            float_key: r.u8()?,
            cwd: r.str()?,
        },
        5 => CtlRequest::SetSticky { pane_id: r.u32()?, sticky: r.bool()? },
        6 => CtlRequest::FindSticky { float_key: r.u8()?, cwd: r.str()? },
        7 => CtlRequest::AdoptPane { uuid: r.uuid()?, cols: r.u16()?, rows: r.u16()? },
        8 => CtlRequest::ListOrphaned,
        9 => CtlRequest::ListSessions,
        10 => CtlRequest::Detach { state: r.lstr()? },
        11 => CtlRequest::Reattach { prefix: r.str()? },
        12 => CtlRequest::Ping,
        13 => CtlRequest::PaneInfo { pane_id: r.u32()? },
        14 => CtlRequest::SyncState { state: r.lstr()? },
        15 => CtlRequest::UpdatePaneName { pane_id: r.u32()?, name: r.str()? },
        16 => CtlRequest::UpdatePaneShell(PaneShellUpdate {
            pane_id: r.u32()?,
            cmd: r.str()?,
            cwd: r.str()?,
            status: r.i32()?,
            duration_ms: r.u32()?,
            jobs: r.u16()?,
        }),
        17 => CtlRequest::GetPaneCwd { pane_id: r.u32()? },
        18 => CtlRequest::UpdatePaneAux { pane_id: r.u32()?, data: r.bytes()? },
        19 => CtlRequest::ResizePane {
            pane_id: r.u32()?,
            cols: r.u16()?,
            rows: r.u16()?,
        },
        t => bail!("unknown request type {}", t),
    };
    Ok(req)
}

pub fn encode_response(resp: &CtlResponse) -> Vec<u8> {
    let mut w = ByteWriter::default();
    w.u8(resp.code());
    match resp {
        CtlResponse::Ok => {}
        CtlResponse::PaneCreated { pane_id, uuid } => {
            w.u32(*pane_id);
            w.uuid(*uuid);
        }
        CtlResponse::StickyPane { pane } => match pane {
            Some((pane_id, uuid)) => {
                w.bool(true);
                w.u32(*pane_id);
                w.uuid(*uuid);
            }
            None => w.bool(false),
        },
        CtlResponse::Orphans { entries } => {
            w.u16(entries.len() as u16);
            for e in entries {
                w.uuid(e.uuid);
                w.str(&e.cwd);
                w.u8(e.float_key);
                w.bool(e.sticky);
            }
        }
        CtlResponse::Sessions { entries } => {
            w.u16(entries.len() as u16);
            for e in entries {
                w.uuid(e.uuid);
                w.str(&e.name);
                w.u16(e.pane_count);
            }
        }
        CtlResponse::ReattachState { state, uuids } => {
            w.lstr(state);
            w.u16(uuids.len() as u16);
            for u in uuids {
                w.uuid(*u);
            }
        }
        CtlResponse::PaneInfo { pid, cmd, cwd } => {
            w.u32(*pid);
            w.str(cmd);
            w.str(cwd);
        }
        CtlResponse::PaneCwd { pane_id, cwd } => {
            w.u32(*pane_id);
            w.str(cwd);
        }
        CtlResponse::Error { message } => w.str(message),
    }
    w.buf
}

pub fn decode_response(payload: &[u8]) -> Result<CtlResponse> {
    let mut r = ByteReader::new(payload);
    let resp = match r.u8()? {
        100 => CtlResponse::Ok,
        101 => CtlResponse::PaneCreated { pane_id: r.u32()?, uuid: r.uuid()? },
        102 => {
            let pane = if r.bool()? {
                Some((r.u32()?, r.uuid()?))
            } else {
                None
            };
            CtlResponse::StickyPane { pane }
        }
        103 => {
            let n = r.u16()?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                entries.push(OrphanEntry {
                    uuid: r.uuid()?,
                    cwd: r.str()?,
                    float_key: r.u8()?,
                    sticky: r.bool()?,
                });
            }
            CtlResponse::Orphans { entries }
        }
        104 => {
            let n = r.u16()?;
            let mut entries = Vec::with_capacity(n as usize);
            for _ in 0..n {
                entries.push(SessionEntry {
                    uuid: r.uuid()?,
                    name: r.str()?,
                    pane_count: r.u16()?,
                });
            }
            CtlResponse::Sessions { entries }
        }
        105 => {
            let state = r.lstr()?;
            let n = r.u16()?;
            let mut uuids = Vec::with_capacity(n as usize);
            for _ in 0..n {
                uuids.push(r.uuid()?);
            }
            CtlResponse::ReattachState { state, uuids }
        }
        106 => CtlResponse::PaneInfo { pid: r.u32()?, cmd: r.str()?, cwd: r.str()? },
        107 => CtlResponse::PaneCwd { pane_id: r.u32()?, cwd: r.str()? },
        108 => CtlResponse::Error { message: r.str()? },
        t => bail!("unknown response type {}", t),
    };
    Ok(resp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;

    fn round_trip_request(req: CtlRequest) {
        let bytes = encode_request(&req);
        let back = decode_request(&bytes).unwrap();
        assert_eq!(back, req);
    }

    fn round_trip_response(resp: CtlResponse) {
        let bytes = encode_response(&resp);
        let back = decode_response(&bytes).unwrap();
        assert_eq!(back, resp);
    }

    #[test]
    fn request_round_trips() {
        round_trip_request(CtlRequest::Register {
            uuid: Uuid::new_v4(),
            name: "ruffle".into(),
        });
        round_trip_request(CtlRequest::CreatePane {
            cols: 80,
            rows: 24,
            cwd: "/tmp".into(),
            cmd: "/bin/sh".into(),
            mux_socket: "/tmp/hexe-0/mux-1.sock".into(),
        });
        round_trip_request(CtlRequest::OrphanPane {
            pane_id: 3,
            sticky: true,
            float_key: b'f',
            cwd: "/home".into(),
        });
        round_trip_request(CtlRequest::AdoptPane {
            uuid: Uuid::new_v4(),
            cols: 100,
            rows: 40,
        });
        round_trip_request(CtlRequest::Detach {
            state: "{\"tabs\":[]}".into(),
        });
        round_trip_request(CtlRequest::UpdatePaneShell(PaneShellUpdate {
            pane_id: 9,
            cmd: "cargo build".into(),
            cwd: "/src".into(),
            status: -1,
            duration_ms: 1234,
            jobs: 2,
        }));
        round_trip_request(CtlRequest::UpdatePaneAux {
            pane_id: 1,
            data: vec![1, 2, 3],
        });
        round_trip_request(CtlRequest::Ping);
    }

    #[test]
    fn response_round_trips() {
        round_trip_response(CtlResponse::Ok);
        round_trip_response(CtlResponse::PaneCreated {
            pane_id: 7,
            uuid: Uuid::new_v4(),
        });
        round_trip_response(CtlResponse::StickyPane { pane: None });
        round_trip_response(CtlResponse::StickyPane {
            pane: Some((2, Uuid::new_v4())),
        });
        round_trip_response(CtlResponse::Orphans {
            entries: vec![OrphanEntry {
                uuid: Uuid::new_v4(),
                cwd: "/tmp".into(),
                float_key: b'g',
                sticky: false,
            }],
        });
        round_trip_response(CtlResponse::ReattachState {
            state: "{}".into(),
            uuids: vec![Uuid::new_v4(), Uuid::new_v4()],
        });
        round_trip_response(CtlResponse::Error {
            message: "no such pane".into(),
        });
    }

    #[test]
    fn undersized_payload_is_an_error() {
        let mut bytes = encode_response(&CtlResponse::PaneCreated {
            pane_id: 7,
            uuid: Uuid::new_v4(),
        });
        bytes.truncate(bytes.len() - 5);
        assert!(decode_response(&bytes).is_err());
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(decode_request(&[200]).is_err());
        assert!(decode_response(&[1]).is_err());
    }

    #[tokio::test]
    async fn frame_round_trip_over_socketpair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let payload = encode_request(&CtlRequest::Ping);
        write_frame(&mut a, &payload).await.unwrap();
        let got = read_frame(&mut b).await.unwrap().unwrap();
        assert_eq!(decode_request(&got).unwrap(), CtlRequest::Ping);
    }

    #[tokio::test]
    async fn frame_eof_is_none() {
        let (a, mut b) = UnixStream::pair().unwrap();
        drop(a);
        assert!(read_frame(&mut b).await.unwrap().is_none());
    }
}
