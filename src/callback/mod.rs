//! Callback Channel (component D): server-initiated RPC to a client, used
//! for CB_RECALL (delegation recall), CB_NULL (callback-path health probe),
//! and SMB lease-break notification.
//!
//! CB_CALLIT is intentionally not implemented (§4.D: DDoS amplification).

mod address;
mod frame;

pub use address::UniversalAddress;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{Kind, Result};

/// Where to reach a client's callback program: address/port plus the
/// callback program number the client assigned itself (via `cb_program`
/// in SETCLIENTID / the v4.1 backchannel), since unlike ordinary RPC
/// services this number is not fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallbackTarget {
    pub addr: UniversalAddress,
    pub program: u32,
}

/// Builds the CB_COMPOUND4args/res (or CB_NULL's empty body) the caller
/// wants sent; boxed so the trait stays object-safe without this crate
/// needing to know the XDR layout.
pub type Encoder = Box<dyn FnOnce(&mut Vec<u8>) + Send>;

const PROC_CB_NULL: u32 = 0;
const PROC_CB_COMPOUND: u32 = 1;
const CALLBACK_PROGRAM_VERSION: u32 = 1;

#[async_trait]
pub trait CallbackChannel: Send + Sync {
    /// Issues one callback RPC and returns the procedure-specific result
    /// bytes (whatever followed the RPC accept envelope). `procedure` is
    /// `PROC_CB_NULL` (0) or `PROC_CB_COMPOUND` (1); `encode_args` builds
    /// the XDR body (ignored for CB_NULL, which always sends zero bytes).
    async fn call(&self, target: &CallbackTarget, procedure: u32, encode_args: Encoder) -> Result<Vec<u8>>;

    /// CB_NULL: probes that the callback path is alive.
    async fn cb_null(&self, target: &CallbackTarget) -> Result<()> {
        self.call(target, PROC_CB_NULL, Box::new(|_| {})).await.map(|_| ())
    }

    /// CB_COMPOUND carrying exactly one operation. `encode_args` builds
    /// that operation's XDR body (CB_RECALL's stateid+truncate+filehandle,
    /// typically).
    async fn cb_compound(&self, target: &CallbackTarget, encode_args: Encoder) -> Result<Vec<u8>> {
        self.call(target, PROC_CB_COMPOUND, encode_args).await
    }
}

/// Real implementation: dials a fresh TCP connection per call, combined
/// dial+I/O timeout (§4.D default 5s).
pub struct TcpCallbackChannel {
    timeout: Duration,
    next_xid: AtomicU32,
}

impl TcpCallbackChannel {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout, next_xid: AtomicU32::new(1) }
    }

    async fn call_inner(&self, target: &CallbackTarget, procedure: u32, args: &[u8]) -> Result<Vec<u8>> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        let body = frame::encode_call(xid, target.program, CALLBACK_PROGRAM_VERSION, procedure, args);
        let framed = frame::frame(&body);

        let reply_body = tokio::time::timeout(self.timeout, async {
            let mut stream =
                TcpStream::connect(target.addr.socket_addr()).await.map_err(|_| Kind::CallbackRpcFailure)?;
            stream.write_all(&framed).await.map_err(|_| Kind::CallbackRpcFailure)?;

            let mut collected = Vec::new();
            loop {
                let mut header = [0u8; 4];
                stream.read_exact(&mut header).await.map_err(|_| Kind::CallbackRpcFailure)?;
                let (last, len) = frame::parse_record_mark(&header);
                let mut chunk = vec![0u8; len as usize];
                stream.read_exact(&mut chunk).await.map_err(|_| Kind::CallbackRpcFailure)?;
                collected.extend_from_slice(&chunk);
                if last {
                    break;
                }
            }
            Ok::<Vec<u8>, Kind>(collected)
        })
        .await
        .map_err(|_| Kind::CallbackRpcFailure)??;

        frame::parse_reply(xid, &reply_body).map(|s| s.to_vec())
    }
}

#[async_trait]
impl CallbackChannel for TcpCallbackChannel {
    async fn call(&self, target: &CallbackTarget, procedure: u32, encode_args: Encoder) -> Result<Vec<u8>> {
        let mut args = Vec::new();
        if procedure != PROC_CB_NULL {
            encode_args(&mut args);
        }
        self.call_inner(target, procedure, &args).await
    }
}

/// Recording mock for tests: returns a canned result per call and logs
/// what was sent, with no network I/O.
#[derive(Default)]
pub struct MockCallbackChannel {
    pub calls: StdMutex<Vec<(CallbackTarget, u32)>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MockCallbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::Relaxed);
    }
}

#[async_trait]
impl CallbackChannel for MockCallbackChannel {
    async fn call(&self, target: &CallbackTarget, procedure: u32, encode_args: Encoder) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push((*target, procedure));
        if self.fail.load(Ordering::Relaxed) {
            return Err(Kind::CallbackRpcFailure);
        }
        let mut args = Vec::new();
        encode_args(&mut args);
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn target() -> CallbackTarget {
        CallbackTarget {
            addr: UniversalAddress { ip: IpAddr::V4(Ipv4Addr::LOCALHOST), port: 2049 },
            program: 0x4000_0001,
        }
    }

    #[tokio::test]
    async fn mock_records_calls_and_can_be_made_to_fail() {
        let mock = MockCallbackChannel::new();
        mock.cb_null(&target()).await.unwrap();
        assert_eq!(mock.calls.lock().unwrap().len(), 1);

        mock.set_failing(true);
        let err = mock.cb_null(&target()).await.unwrap_err();
        assert_eq!(err, Kind::CallbackRpcFailure);
    }

    #[tokio::test]
    async fn real_channel_fails_fast_against_unroutable_target() {
        let channel = TcpCallbackChannel::new(Duration::from_millis(50));
        let unroutable =
            CallbackTarget { addr: UniversalAddress { ip: IpAddr::V4(Ipv4Addr::new(10, 255, 255, 1)), port: 1 }, program: 1 };
        let result = channel.cb_null(&unroutable).await;
        assert!(result.is_err());
    }
}
