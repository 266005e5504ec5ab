//! The arbiter daemon: a single process holding every kernel-style object
//! (processes, threads, events, mutexes, semaphores) for its clients and
//! arbitrating handle operations and waits over a Unix-socket protocol.
//!
//! Connection tasks only frame and decode; every decoded request is fed to
//! the one dispatcher task that owns the object graph, so all state
//! changes are serialized without any lock spanning a request.

#![deny(unused_must_use)]

#[macro_use]
extern crate log;

mod conn;
mod dispatch;

pub use self::conn::{serve_connection, ConnId, Event, Incoming};
pub use self::dispatch::Dispatcher;

use async_std::{os::unix::net::UnixListener, prelude::*, task};

/// Accept clients forever, one framing task per connection, all feeding
/// the dispatcher. Returns when the listener is closed.
pub async fn serve(listener: UnixListener) {
    let (events_tx, events_rx) = async_std::channel::unbounded();
    let dispatcher = task::spawn(Dispatcher::new().run(events_rx));
    let mut next_conn: ConnId = 0;
    let mut incoming = listener.incoming();
    while let Some(stream) = incoming.next().await {
        match stream {
            Ok(stream) => {
                next_conn += 1;
                task::spawn(serve_connection(next_conn, stream, events_tx.clone()));
            }
            Err(err) => warn!("accept failed: {}", err),
        }
    }
    drop(events_tx);
    dispatcher.await;
}
