//! Control-channel adapter for the session daemon.
//!
//! Fire-and-forget messages share the stream with synchronous requests,
//! so their `ok` acks (and stray `pane_cwd` / stale `pane_info` frames)
//! can arrive ahead of a synchronous response. `request` drains those
//! before accepting the real answer; this skip rule is load-bearing, not
//! an optimization.

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use uuid::Uuid;

use super::wire::{
    self, CtlRequest, CtlResponse, OrphanEntry, PaneShellUpdate, SessionEntry, HANDSHAKE_CTL,
    HANDSHAKE_VT,
};

pub struct SesClient {
    ctl: UnixStream,
    /// Fire-and-forget messages sent whose `ok` ack has not been drained.
    outstanding_acks: u32,
    /// `pane_cwd` frames skimmed while waiting for something else; the
    /// mux consumes these on its resync tick.
    pub pending_cwds: Vec<(u32, String)>,
}

impl SesClient {
    pub async fn connect(path: &Path) -> Result<Self> {
        let mut ctl = UnixStream::connect(path)
            .await
            .with_context(|| format!("connect {}", path.display()))?;
        ctl.write_all(&[HANDSHAKE_CTL]).await?;
        ctl.flush().await?;
        Ok(Self::from_stream(ctl))
    }

    pub fn from_stream(ctl: UnixStream) -> Self {
        Self {
            ctl,
            outstanding_acks: 0,
            pending_cwds: Vec::new(),
        }
    }

    /// Open the VT channel for an already-registered session.
    pub async fn open_vt(path: &Path, session: Uuid) -> Result<UnixStream> {
        let mut vt = UnixStream::connect(path)
            .await
            .with_context(|| format!("connect {}", path.display()))?;
        vt.write_all(&[HANDSHAKE_VT]).await?;
        vt.write_all(session.simple().to_string().as_bytes()).await?;
        vt.flush().await?;
        Ok(vt)
    }

    // -- fire-and-forget ---------------------------------------------------

    pub async fn send_faf(&mut self, req: CtlRequest) -> Result<()> {
        let acked = !matches!(req, CtlRequest::GetPaneCwd { .. });
        wire::write_frame(&mut self.ctl, &wire::encode_request(&req)).await?;
        if acked {
            self.outstanding_acks += 1;
        }
        Ok(())
    }

    pub async fn sync_state(&mut self, state: String) -> Result<()> {
        self.send_faf(CtlRequest::SyncState { state }).await
    }

    pub async fn kill_pane(&mut self, pane_id: u32) -> Result<()> {
        self.send_faf(CtlRequest::KillPane { pane_id }).await
    }

    pub async fn orphan_pane(
        &mut self,
        pane_id: u32,
        sticky: bool,
        float_key: u8,
        cwd: String,
    ) -> Result<()> {
        self.send_faf(CtlRequest::OrphanPane {
            pane_id,
            sticky,
            float_key,
            cwd,
        })
        .await
    }

    pub async fn set_sticky(&mut self, pane_id: u32, sticky: bool) -> Result<()> {
        self.send_faf(CtlRequest::SetSticky { pane_id, sticky }).await
    }

    pub async fn update_pane_name(&mut self, pane_id: u32, name: String) -> Result<()> {
        self.send_faf(CtlRequest::UpdatePaneName { pane_id, name })
            .await
    }

    pub async fn update_pane_shell(&mut self, update: PaneShellUpdate) -> Result<()> {
        self.send_faf(CtlRequest::UpdatePaneShell(update)).await
    }

    pub async fn get_pane_cwd(&mut self, pane_id: u32) -> Result<()> {
        self.send_faf(CtlRequest::GetPaneCwd { pane_id }).await
    }

    /// No-op in the current protocol; still sent, result ignored.
    pub async fn update_pane_aux(&mut self, pane_id: u32, data: Vec<u8>) -> Result<()> {
        self.send_faf(CtlRequest::UpdatePaneAux { pane_id, data })
            .await
    }

    pub async fn resize_pane(&mut self, pane_id: u32, cols: u16, rows: u16) -> Result<()> {
        self.send_faf(CtlRequest::ResizePane { pane_id, cols, rows })
            .await
    }

    // -- synchronous -------------------------------------------------------

    /// Send a synchronous request and read its response, draining
    /// interleaved fire-and-forget traffic first.
    async fn request(&mut self, req: CtlRequest) -> Result<CtlResponse> {
        let expect_cwd = matches!(req, CtlRequest::GetPaneCwd { .. });
        let expect_info = matches!(req, CtlRequest::PaneInfo { .. });
        wire::write_frame(&mut self.ctl, &wire::encode_request(&req)).await?;
        loop {
            let Some(payload) = wire::read_frame(&mut self.ctl).await? else {
                bail!("daemon closed the control channel");
            };
            let resp = wire::decode_response(&payload)?;
            match resp {
                CtlResponse::Ok if self.outstanding_acks > 0 => {
                    self.outstanding_acks -= 1;
                }
                CtlResponse::PaneCwd { pane_id, cwd } if !expect_cwd => {
                    self.pending_cwds.push((pane_id, cwd));
                }
                CtlResponse::PaneInfo { .. } if !expect_info => {
                    // Stale info response from an earlier exchange; skip.
                }
                CtlResponse::Error { message } => bail!("ses: {}", message),
                other => return Ok(other),
            }
        }
    }

    pub async fn register(&mut self, uuid: Uuid, name: String) -> Result<()> {
        match self.request(CtlRequest::Register { uuid, name }).await? {
            CtlResponse::Ok => Ok(()),
            other => bail!("unexpected register response: {:?}", other),
        }
    }

    pub async fn create_pane(
        &mut self,
        cols: u16,
        rows: u16,
        cwd: String,
        cmd: String,
    ) -> Result<(u32, Uuid)> {
        // The daemon spawns the child, so the way back to this mux's IPC
        // socket has to travel with the request.
        let mux_socket = std::env::var(crate::ipc::ENV_SOCKET).unwrap_or_default();
        match self
            .request(CtlRequest::CreatePane {
                cols,
                rows,
                cwd,
                cmd,
                mux_socket,
            })
            .await?
        {
            CtlResponse::PaneCreated { pane_id, uuid } => Ok((pane_id, uuid)),
            other => bail!("unexpected create_pane response: {:?}", other),
        }
    }

    pub async fn find_sticky(&mut self, float_key: u8, cwd: String) -> Result<Option<(u32, Uuid)>> {
        match self.request(CtlRequest::FindSticky { float_key, cwd }).await? {
            CtlResponse::StickyPane { pane } => Ok(pane),
            other => bail!("unexpected find_sticky response: {:?}", other),
        }
    }

    pub async fn adopt_pane(&mut self, uuid: Uuid, cols: u16, rows: u16) -> Result<u32> {
        match self.request(CtlRequest::AdoptPane { uuid, cols, rows }).await? {
            CtlResponse::PaneCreated { pane_id, .. } => Ok(pane_id),
            other => bail!("unexpected adopt_pane response: {:?}", other),
        }
    }

    pub async fn list_orphaned(&mut self) -> Result<Vec<OrphanEntry>> {
        match self.request(CtlRequest::ListOrphaned).await? {
            CtlResponse::Orphans { entries } => Ok(entries),
            other => bail!("unexpected list_orphaned response: {:?}", other),
        }
    }

    pub async fn list_sessions(&mut self) -> Result<Vec<SessionEntry>> {
        match self.request(CtlRequest::ListSessions).await? {
            CtlResponse::Sessions { entries } => Ok(entries),
            other => bail!("unexpected list_sessions response: {:?}", other),
        }
    }

    pub async fn detach(&mut self, state: String) -> Result<()> {
        match self.request(CtlRequest::Detach { state }).await? {
            CtlResponse::Ok => Ok(()),
            other => bail!("unexpected detach response: {:?}", other),
        }
    }

    pub async fn reattach(&mut self, prefix: String) -> Result<(String, Vec<Uuid>)> {
        match self.request(CtlRequest::Reattach { prefix }).await? {
            CtlResponse::ReattachState { state, uuids } => Ok((state, uuids)),
            other => bail!("unexpected reattach response: {:?}", other),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        match self.request(CtlRequest::Ping).await? {
            CtlResponse::Ok => Ok(()),
            other => bail!("unexpected ping response: {:?}", other),
        }
    }

    pub async fn pane_info(&mut self, pane_id: u32) -> Result<(u32, String, String)> {
        match self.request(CtlRequest::PaneInfo { pane_id }).await? {
            CtlResponse::PaneInfo { pid, cmd, cwd } => Ok((pid, cmd, cwd)),
            other => bail!("unexpected pane_info response: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixStream;

    /// A scripted daemon end: reads requests, writes the given responses
    /// in order.
    async fn script(mut stream: UnixStream, responses: Vec<CtlResponse>) {
        let mut responses = responses.into_iter();
        while let Ok(Some(payload)) = wire::read_frame(&mut stream).await {
            let _req = wire::decode_request(&payload).unwrap();
            if let Some(resp) = responses.next() {
                wire::write_frame(&mut stream, &wire::encode_response(&resp))
                    .await
                    .unwrap();
            }
        }
    }

    #[tokio::test]
    async fn sync_after_faf_skips_acks() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = SesClient::from_stream(a);

        // The daemon acks two fire-and-forget messages, then answers the
        // synchronous create. Responses are written back-to-back so the
        // acks are already queued when the sync response is read.
        let daemon = tokio::spawn(async move {
            let mut stream = b;
            // kill_pane, set_sticky, create_pane
            for _ in 0..3 {
                let payload = wire::read_frame(&mut stream).await.unwrap().unwrap();
                wire::decode_request(&payload).unwrap();
            }
            let uuid = Uuid::new_v4();
            wire::write_frame(&mut stream, &wire::encode_response(&CtlResponse::Ok))
                .await
                .unwrap();
            wire::write_frame(&mut stream, &wire::encode_response(&CtlResponse::Ok))
                .await
                .unwrap();
            wire::write_frame(
                &mut stream,
                &wire::encode_response(&CtlResponse::PaneCreated { pane_id: 5, uuid }),
            )
            .await
            .unwrap();
            uuid
        });

        client.kill_pane(1).await.unwrap();
        client.set_sticky(2, true).await.unwrap();
        let (pane_id, uuid) = client
            .create_pane(80, 24, "/tmp".into(), "/bin/sh".into())
            .await
            .unwrap();
        assert_eq!(pane_id, 5);
        assert_eq!(uuid, daemon.await.unwrap());
    }

    #[tokio::test]
    async fn sync_ok_response_not_eaten_by_ack_skipping() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = SesClient::from_stream(a);

        let daemon = tokio::spawn(async move {
            let mut stream = b;
            for _ in 0..2 {
                let payload = wire::read_frame(&mut stream).await.unwrap().unwrap();
                wire::decode_request(&payload).unwrap();
            }
            // One ack for the faf, then the ping's own ok.
            wire::write_frame(&mut stream, &wire::encode_response(&CtlResponse::Ok))
                .await
                .unwrap();
            wire::write_frame(&mut stream, &wire::encode_response(&CtlResponse::Ok))
                .await
                .unwrap();
        });

        client.kill_pane(1).await.unwrap();
        client.ping().await.unwrap();
        daemon.await.unwrap();
    }

    #[tokio::test]
    async fn stray_pane_cwd_is_collected_not_returned() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = SesClient::from_stream(a);
        tokio::spawn(async move {
            let mut stream = b;
            let payload = wire::read_frame(&mut stream).await.unwrap().unwrap();
            wire::decode_request(&payload).unwrap();
            wire::write_frame(
                &mut stream,
                &wire::encode_response(&CtlResponse::PaneCwd {
                    pane_id: 4,
                    cwd: "/workdir".into(),
                }),
            )
            .await
            .unwrap();
            wire::write_frame(&mut stream, &wire::encode_response(&CtlResponse::Ok))
                .await
                .unwrap();
        });

        client.ping().await.unwrap();
        assert_eq!(client.pending_cwds, vec![(4, "/workdir".into())]);
    }

    #[tokio::test]
    async fn error_response_fails_the_request() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut client = SesClient::from_stream(a);
        tokio::spawn(script(
            b,
            vec![CtlResponse::Error {
                message: "no such orphan".into(),
            }],
        ));
        let err = client.adopt_pane(Uuid::new_v4(), 80, 24).await.unwrap_err();
        assert!(err.to_string().contains("no such orphan"));
    }
}
