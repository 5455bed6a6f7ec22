//! Shared frame I/O helpers for the server link and the client connection.

use std::io::IoSlice;
use std::mem::MaybeUninit;

use socket2::{SockAddr, Socket};

use wirecall_core::error::{ErrorKind, Result};
use wirecall_wire::frame::{Descriptor, FrameHeader, ParamKind, DESCRIPTOR_SIZE, HEADER_SIZE};

pub(crate) fn recv_with(socket: &Socket, buf: &mut [u8], flags: i32) -> std::io::Result<usize> {
    // socket2 takes an uninit view; the buffer is already initialized and the
    // kernel only writes into it, so the cast is sound.
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    socket.recv_with_flags(uninit, flags)
}

pub(crate) fn recv_from_with(
    socket: &Socket,
    buf: &mut [u8],
    flags: i32,
) -> std::io::Result<(usize, SockAddr)> {
    let uninit = unsafe { &mut *(buf as *mut [u8] as *mut [MaybeUninit<u8>]) };
    socket.recv_from_with_flags(uninit, flags)
}

/// Receives one stream frame into `buf`.
///
/// Phase 1 reads the fixed header; zero bytes there means no message
/// (`NoData` when non-blocking, peer shutdown otherwise surfaces as
/// `DISCONNECT` through the reactor first). Phase 2 reads the declared
/// remainder with wait-all semantics; any shortfall is a broken frame and
/// fatal for the connection.
pub(crate) fn recv_stream_frame(
    socket: &Socket,
    buf: &mut [u8],
    max_message_size: usize,
    blocking: bool,
) -> Result<usize> {
    let first_flags = if blocking { libc::MSG_WAITALL } else { libc::MSG_DONTWAIT };
    let got = recv_with(socket, &mut buf[..HEADER_SIZE], first_flags).map_err(ErrorKind::from)?;
    if got == 0 {
        return Err(ErrorKind::NoData);
    }
    if got < HEADER_SIZE {
        let rest = recv_with(socket, &mut buf[got..HEADER_SIZE], libc::MSG_WAITALL)
            .map_err(ErrorKind::from)?;
        if got + rest != HEADER_SIZE {
            return Err(ErrorKind::BrokenFrame);
        }
    }

    let header = FrameHeader::decode(&buf[..HEADER_SIZE])?;
    header.validate_length(max_message_size)?;

    let remainder = header.length as usize - HEADER_SIZE;
    if remainder > 0 {
        let got = recv_with(socket, &mut buf[HEADER_SIZE..HEADER_SIZE + remainder], libc::MSG_WAITALL)
            .map_err(ErrorKind::from)?;
        if got != remainder {
            // Do not process incomplete requests.
            return Err(ErrorKind::BrokenFrame);
        }
    }
    Ok(header.length as usize)
}

/// Splits `frame` into gather-write slices: header + descriptor table first,
/// then one slice per inline buffer payload, in declaration order.
///
/// Rejects shared-memory descriptors and any frame whose declared layout
/// does not add up to its length.
pub(crate) fn frame_io_slices<'a>(frame: &'a [u8]) -> Result<Vec<IoSlice<'a>>> {
    let header = FrameHeader::decode(frame)?;
    if frame.len() != header.length as usize {
        return Err(ErrorKind::InvalidArgument("frame buffer does not match declared length"));
    }
    let table = header.table_span();
    if frame.len() < table {
        return Err(ErrorKind::BrokenFrame);
    }

    let mut slices = Vec::with_capacity(1 + header.param_count());
    slices.push(IoSlice::new(&frame[..table]));

    let mut covered = table;
    for index in 0..header.param_count() {
        let at = HEADER_SIZE + index * DESCRIPTOR_SIZE;
        let descriptor = Descriptor::decode(&frame[at..at + DESCRIPTOR_SIZE])?;
        match descriptor.kind {
            ParamKind::Scalar => {}
            ParamKind::Buffer => {
                let offset = descriptor.extra as usize;
                let len = descriptor.value as usize;
                let end = offset.checked_add(len).ok_or(ErrorKind::BrokenFrame)?;
                if offset < table || end > frame.len() {
                    return Err(ErrorKind::BrokenFrame);
                }
                slices.push(IoSlice::new(&frame[offset..end]));
                covered += len;
            }
            ParamKind::Shm => return Err(ErrorKind::Unsupported),
        }
    }
    if covered != frame.len() {
        return Err(ErrorKind::InvalidArgument("frame payload layout does not add up"));
    }
    Ok(slices)
}

/// Performs the gathered write of one frame, optionally to a datagram
/// address. Short writes are broken frames: nothing is retried.
pub(crate) fn send_frame(
    socket: &Socket,
    target: Option<&SockAddr>,
    frame: &[u8],
    max_message_size: usize,
    blocking: bool,
) -> Result<()> {
    if frame.len() > max_message_size {
        return Err(ErrorKind::TooLarge { length: frame.len(), max: max_message_size });
    }
    let slices = frame_io_slices(frame)?;
    let flags = if blocking { 0 } else { libc::MSG_DONTWAIT };
    let sent = match target {
        Some(addr) => socket.send_to_vectored_with_flags(&slices, addr, flags),
        None => socket.send_vectored_with_flags(&slices, flags),
    }
    .map_err(ErrorKind::from)?;
    if sent != frame.len() {
        tracing::error!("short send: {} of {} bytes", sent, frame.len());
        return Err(ErrorKind::BrokenFrame);
    }
    Ok(())
}
