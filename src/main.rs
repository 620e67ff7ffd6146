use std::cell::Cell;
use std::env;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use mio::{Events, Poll, Token};

use tick_ws::{ClientConfig, TcpTransport, WsClient};

const WS_TOKEN: Token = Token(0);

// Upper bound on how long the loop sleeps between ticks when the socket is quiet.
const TICK: Duration = Duration::from_millis(10);

// Extra ticks per wakeup while whole frames are still buffered.
const MAX_DRAIN: usize = 64;

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ClientConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            log::error!("config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let host = env::var("WS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = match env::var("WS_PORT").map(|p| p.parse::<u16>()) {
        Ok(Ok(port)) => port,
        Ok(Err(_)) => {
            log::error!("config: WS_PORT is not a port number");
            return ExitCode::FAILURE;
        }
        Err(_) => 80,
    };
    let path = env::var("WS_PATH").unwrap_or_else(|_| "/".to_string());
    let protocol = env::var("WS_PROTOCOL").ok();
    let greeting = env::var("WS_GREETING").ok();

    let mut poll = match Poll::new() {
        Ok(p) => p,
        Err(e) => {
            log::error!("mio poll: {e}");
            return ExitCode::FAILURE;
        }
    };
    let mut events = Events::with_capacity(16);

    let transport = match TcpTransport::with_registry(poll.registry(), WS_TOKEN, config.connect_timeout) {
        Ok(t) => t,
        Err(e) => {
            log::error!("transport: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut client = WsClient::new(transport, config);

    let just_opened = Rc::new(Cell::new(false));
    let flag = Rc::clone(&just_opened);
    client.on_open(move || {
        log::info!("open");
        flag.set(true);
    });
    client.on_message(|text| log::info!("text: {text}"));
    client.on_binary_message(|data| log::info!("binary: {} bytes", data.len()));
    client.on_close(|code, reason| log::info!("close: {code} {reason:?}"));
    client.on_error(|err| log::warn!("error: {err}"));

    client.connect(&host, port, protocol.as_deref(), &path);
    log::info!("driving ws://{host}:{port}{path}");

    loop {
        if let Err(e) = poll.poll(&mut events, Some(TICK)) {
            if e.kind() != std::io::ErrorKind::Interrupted {
                log::error!("mio poll: {e}");
                return ExitCode::FAILURE;
            }
        }

        // Readable events and timeouts both just mean "tick". Keep ticking
        // while frames are buffered so a burst drains without waiting.
        client.poll();
        for _ in 0..MAX_DRAIN {
            if !(client.is_connected() && client.transport().has_buffered()) {
                break;
            }
            client.poll();
        }

        if just_opened.replace(false) {
            if let Some(text) = greeting.as_deref() {
                if let Err(e) = client.send(text) {
                    log::warn!("greeting not sent: {e}");
                }
            }
        }
    }
}
