use std::io::{self, Write};
use std::net::TcpStream;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use log::*;

use crate::client::Outbound;
use crate::protocol::framing::FrameReader;
use crate::protocol::{is_disconnection_error, Protocol, StopHandle};

/// Spawns the thread reading frames from a peer.
pub fn spawn_receiver(name: String, protocol: Protocol, stream: TcpStream) -> io::Result<JoinHandle<()>> {
    let reader = FrameReader::new(stream).map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    thread::Builder::new()
        .name(format!("{} reader", name))
        .spawn(move || protocol.run(reader))
}

/// Spawns the thread writing queued packets to a peer, in order.
///
/// The thread ends once every sender is gone, on `Outbound::Close`
/// or on the first failed write.
pub fn spawn_writer(name: String, mut stream: TcpStream, rx: Receiver<Outbound>, stop: StopHandle)
        -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("{} writer", name))
        .spawn(move || {
            for out in rx {
                let packet = match out {
                    Outbound::Packet(packet) => packet,
                    Outbound::Close => break
                };

                if let Err(e) = stream.write_all(&packet.encode()) {
                    if !stop.is_stopped() && !is_disconnection_error(e.kind()) {
                        warn!("Error while writing to {}: {}", name, e);
                    }

                    break;
                }
            }

            stop.stop();
        })
}
