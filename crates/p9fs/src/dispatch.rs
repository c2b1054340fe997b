//! Per-connection dispatch (C5): strictly sequential request handling.
//!
//! The teacher's `srv.rs` spawns a fresh `tokio::spawn` task per inbound
//! message, so two requests on the same connection can be in flight and
//! complete out of order. spec.md 4.5 forbids that here: the FAT32 volume is
//! also touched by an unrelated program sharing the other core, and handler
//! execution must look, from the filesystem's point of view, like a single
//! thread draining one request at a time.
//!
//! This is modeled as a bounded `tokio::sync::mpsc` channel standing in for
//! the hardware "deferred queue" spec.md 4.5 describes: the read side of the
//! connection is the "interrupt" producer — it only frames bytes and enqueues
//! them, it never touches the FS lock — and a single consuming loop is the
//! "main loop" worker, handling one message to completion (including its own
//! response write) before dequeuing the next. Same framing (`LengthDelimitedCodec`,
//! little-endian, 4-byte length prefix covering itself) as the teacher's
//! `dispatch`/`srv_async_tcp`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::buf::{Buf, BufMut};
use futures::sink::SinkExt;
use log::{error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::length_delimited::LengthDelimitedCodec;

use crate::config::Config;
use crate::error::Error;
use crate::fcall::{FCall, MsgType, Msg};
use crate::handlers::Handler;
use crate::serialize;
use crate::session::Session;

/// Bound on the deferred queue: enough to absorb a burst without unbounded
/// growth, matching spec.md 4.5's "bounded" requirement for a queue that
/// ultimately lives in fixed MCU memory.
const QUEUE_DEPTH: usize = 32;

/// Per-connection entry point: frame the stream, run the read-side producer
/// and the single dispatch worker concurrently, and return once either side
/// ends (peer disconnect, frame error, or fatal write failure).
pub async fn serve_connection<Reader, Writer>(
    handler: std::sync::Arc<Handler>,
    config: Config,
    reader: Reader,
    writer: Writer,
) -> std::io::Result<()>
where
    Reader: 'static + AsyncRead + Send + Unpin,
    Writer: 'static + AsyncWrite + Send + Unpin,
{
    let mut framedread = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_read(reader);
    let mut framedwrite = LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_write(writer);

    let (tx, mut rx) = mpsc::channel::<Msg>(QUEUE_DEPTH);

    // Updated by the worker after every `Tversion` (`rversion` negotiates
    // `session.msize` down to `min(client's proposal, config.max_msize)`), so
    // the producer enforces the per-session ceiling the client actually
    // agreed to rather than the static server-wide ceiling.
    let negotiated_msize = Arc::new(AtomicU32::new(config.max_msize));

    let producer = {
        let negotiated_msize = negotiated_msize.clone();
        async move {
            while let Some(bytes) = framedread.next().await {
                let bytes = match bytes {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("frame error: {}", e);
                        break;
                    }
                };

                let msize = negotiated_msize.load(Ordering::Acquire);
                if bytes.len() as u32 + 4 > msize {
                    warn!("frame of {} bytes exceeds msize {}", bytes.len(), msize);
                    let _ = tx
                        .send(Msg {
                            tag: crate::fcall::NOTAG,
                            body: FCall::RError {
                                ename: Error::MsizeExceeded.ename().to_owned(),
                            },
                        })
                        .await;
                    break;
                }

                let msg = match serialize::read_msg(&mut bytes.reader()) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!("decode error: {}", e);
                        break;
                    }
                };
                info!("\t<- {:?}", msg);
                if tx.send(msg).await.is_err() {
                    break;
                }
            }
        }
    };

    let mut session = Session::new(&config);
    let worker = async move {
        while let Some(msg) = rx.recv().await {
            let tag = msg.tag;
            let is_terminal = matches!(msg.body, FCall::RError { .. });

            let response_body = if is_terminal {
                msg.body
            } else {
                let resp = handler.handle(&mut session, tag, msg.body).await;
                negotiated_msize.store(session.msize, Ordering::Release);
                resp
            };

            if !MsgType::from(&response_body).is_r() {
                continue;
            }

            let response = Msg {
                tag,
                body: response_body,
            };
            let mut buf = bytes::BytesMut::with_capacity(4096).writer();
            if let Err(e) = serialize::write_msg(&mut buf, &response) {
                error!("failed to encode response for tag {}: {}", tag, e);
                continue;
            }
            info!("\t-> {:?}", response);
            if let Err(e) = framedwrite.send(buf.into_inner().freeze()).await {
                error!("failed to write response for tag {}: {}", tag, e);
                break;
            }
            if is_terminal {
                break;
            }
        }
    };

    tokio::join!(producer, worker);
    Ok(())
}
