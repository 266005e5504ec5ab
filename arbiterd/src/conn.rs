//! Per-connection framing.
//!
//! A connection task reads one frame at a time, hands the decoded request
//! to the dispatcher together with a `oneshot` reply sender, and does not
//! read the next frame until the reply is written back. That await is
//! what enforces one outstanding request per connection; a parked wait
//! simply keeps the sender in the dispatcher until it resolves.

use {
    arbiter_protocol::{FrameHeader, ProtocolError, Reply, Request, HEADER_SIZE},
    async_std::{channel::Sender, os::unix::net::UnixStream, prelude::*},
    futures::channel::oneshot,
};

/// Connection number, assigned by the accept loop. Doubles as the wait
/// cookie for the connection's parked `SELECT`.
pub type ConnId = u64;

/// A decoded request on its way to the dispatcher.
pub struct Incoming {
    pub conn: ConnId,
    pub seq: u32,
    pub request: Request,
    pub reply: oneshot::Sender<Reply>,
}

/// What connection tasks feed the dispatcher.
pub enum Event {
    Request(Incoming),
    Disconnected(ConnId),
}

#[derive(Debug)]
enum ConnError {
    Io(std::io::Error),
    Protocol(ProtocolError),
    ServerGone,
}

impl From<std::io::Error> for ConnError {
    fn from(err: std::io::Error) -> Self {
        ConnError::Io(err)
    }
}

impl From<ProtocolError> for ConnError {
    fn from(err: ProtocolError) -> Self {
        ConnError::Protocol(err)
    }
}

/// Serve one client until EOF, a protocol violation, or the dispatcher
/// closing us. Always reports the disconnect so the dispatcher can run
/// the implicit-termination cleanup.
pub async fn serve_connection(conn: ConnId, stream: UnixStream, events: Sender<Event>) {
    debug!("conn {}: connected", conn);
    if let Err(err) = serve_frames(conn, stream, &events).await {
        debug!("conn {}: closing: {:?}", conn, err);
    }
    let _ = events.send(Event::Disconnected(conn)).await;
}

async fn serve_frames(
    conn: ConnId,
    mut stream: UnixStream,
    events: &Sender<Event>,
) -> Result<(), ConnError> {
    loop {
        let mut header = [0u8; HEADER_SIZE];
        if let Err(err) = stream.read_exact(&mut header).await {
            if err.kind() == std::io::ErrorKind::UnexpectedEof {
                debug!("conn {}: eof", conn);
                return Ok(());
            }
            return Err(err.into());
        }
        let header = FrameHeader::decode(&header)?;
        let mut body = vec![0; header.body_len()];
        stream.read_exact(&mut body).await?;
        let request = Request::decode(header.ty, &body)?;
        trace!("conn {}: seq {} {:?}", conn, header.seq, request);

        let (reply_tx, reply_rx) = oneshot::channel();
        events
            .send(Event::Request(Incoming {
                conn,
                seq: header.seq,
                request,
                reply: reply_tx,
            }))
            .await
            .map_err(|_| ConnError::ServerGone)?;
        let reply = match reply_rx.await {
            Ok(reply) => reply,
            // the dispatcher dropped us: terminated thread or violation
            Err(_) => return Ok(()),
        };
        stream.write_all(&reply.encode(header.ty, header.seq)).await?;
    }
}
