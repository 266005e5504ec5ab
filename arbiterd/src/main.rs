#![deny(unused_must_use)]

extern crate log;

use std::io::Write;
use std::os::unix::io::FromRawFd;
use {async_std::os::unix::net::UnixListener, log::info, structopt::StructOpt};

#[derive(Debug, StructOpt)]
#[structopt()]
struct Opt {
    /// Decimal number of a pre-opened, listening Unix-socket descriptor.
    fd: i32,
}

#[async_std::main]
async fn main() {
    init_logger();

    let opt = Opt::from_args();
    if unsafe { libc::fcntl(opt.fd, libc::F_GETFD) } < 0 {
        eprintln!("arbiterd: fd {} is not an open descriptor", opt.fd);
        eprintln!("usage: arbiterd <listening-socket-fd>");
        std::process::exit(1);
    }
    // ownership of the descriptor passes to the listener
    let listener = unsafe { UnixListener::from_raw_fd(opt.fd) };
    info!("serving on fd {}", opt.fd);
    arbiterd::serve(listener).await;
}

/// init the env_logger
fn init_logger() {
    env_logger::builder()
        .format(|buf, record| {
            use env_logger::fmt::Color;
            use log::Level;

            let tid = async_std::task::current().id();
            let mut style = buf.style();
            match record.level() {
                Level::Trace => style.set_color(Color::Black).set_intense(true),
                Level::Debug => style.set_color(Color::White),
                Level::Info => style.set_color(Color::Green),
                Level::Warn => style.set_color(Color::Yellow),
                Level::Error => style.set_color(Color::Red).set_bold(true),
            };
            let level = style.value(record.level());
            writeln!(buf, "[{:>5}][{}] {}", level, tid, record.args())
        })
        .init();
}
