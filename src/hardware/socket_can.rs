//! Linux SocketCAN transport.
//!
//! The socket is blocking with bounded read/write timeouts; every call on it
//! returns within the I/O timeout the port configured.

use async_trait::async_trait;
use crate::core::Frame;
use crate::hardware::can_interface::{CanInterface, CanResult};
use socketcan::{CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Id, Socket, StandardId};
use std::io::ErrorKind;
use std::time::Duration;
use tracing::info;

pub struct SocketCanInterface {
    name: String,
    socket: CanSocket,
    /// Channel stamped on received frames
    channel: u8,
}

impl SocketCanInterface {
    /// Open a raw CAN socket bound to `name`
    pub fn open(name: &str, channel: u8, io_timeout: Duration) -> CanResult<Self> {
        let socket = CanSocket::open(name)
            .map_err(|e| format!("Failed to open SocketCAN interface {}: {}", name, e))?;
        socket.set_write_timeout(io_timeout)?;

        info!("Opened SocketCAN interface {}", name);
        Ok(Self {
            name: name.to_string(),
            socket,
            channel,
        })
    }
}

fn to_can_frame(frame: &Frame) -> CanResult<CanFrame> {
    let id: Id = if frame.is_extended() {
        ExtendedId::new(frame.id).map(Id::Extended)
    } else {
        StandardId::new(frame.id as u16).map(Id::Standard)
    }
    .ok_or_else(|| format!("CAN id {:X} out of range", frame.id))?;

    let can_frame = if frame.remote {
        CanFrame::new_remote(id, frame.data.len())
    } else {
        CanFrame::new(id, &frame.data)
    };
    can_frame.ok_or_else(|| format!("cannot build frame {}", frame).into())
}

fn from_can_frame(can_frame: &CanFrame, channel: u8) -> Frame {
    let (id, extended) = match can_frame.id() {
        Id::Standard(id) => (id.as_raw() as u32, false),
        Id::Extended(id) => (id.as_raw(), true),
    };
    Frame {
        timestamp: 0.0,
        channel,
        id,
        extended,
        remote: can_frame.is_remote_frame(),
        data: can_frame.data().to_vec(),
    }
}

#[async_trait]
impl CanInterface for SocketCanInterface {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&mut self, frame: &Frame) -> CanResult<()> {
        let can_frame = to_can_frame(frame)?;
        self.socket.write_frame(&can_frame)?;
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> CanResult<Option<Frame>> {
        match self.socket.read_frame_timeout(timeout) {
            Ok(can_frame) => Ok(Some(from_can_frame(&can_frame, self.channel))),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
