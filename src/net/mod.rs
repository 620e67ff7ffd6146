pub mod framing;
pub mod handshake;
pub mod reassembly;
pub mod tcp_opt;
pub mod transport;
pub mod ws_client;
