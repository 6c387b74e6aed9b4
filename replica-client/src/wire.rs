//! Framing for the replica connection.
//!
//! Outbound: `[tag: u8][len: u32 BE][bincode(Propose)]`.
//! Inbound: `[len: u32 BE][command_id: i32 BE][bincode(ProposeReply)]`, with
//! `len` covering the command id and body. Keeping the command id outside the
//! body lets a reply whose body is garbled still be matched to its request.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    command::{CommandId, Propose, ProposeReply},
    error::{ClientError, Result},
};

pub const PROPOSE: u8 = 0;

pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

const COMMAND_ID_LEN: u32 = 4;

/// A reply frame whose body may or may not have decoded.
#[derive(Debug)]
pub struct ReplyFrame {
    pub command_id: CommandId,
    pub reply: Result<ProposeReply>,
}

/// Encodes a complete outbound frame.
///
/// Frames are built whole so they can be written in one piece by a task
/// that callers cannot cancel halfway through.
pub fn encode_propose(propose: &Propose) -> Result<Vec<u8>> {
    let body = propose.encode()?;
    let len = frame_len(body.len())?;

    let mut frame = Vec::with_capacity(5 + body.len());
    frame.push(PROPOSE);
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Reads the next proposal, or `None` once the peer has hung up.
pub async fn read_propose<R>(reader: &mut R) -> Result<Option<Propose>>
where
    R: AsyncRead + Unpin,
{
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if tag != PROPOSE {
        return Err(invalid_data(format!("unknown message tag {tag}")).into());
    }

    let len = reader.read_u32().await?;
    check_len(len)?;
    let mut body = vec![0; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(Propose::decode(&body)?))
}

pub async fn write_reply<W>(writer: &mut W, reply: &ProposeReply) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = reply.encode()?;
    write_reply_frame(writer, reply.command_id, &body).await
}

/// Writes a reply frame around an already-encoded body.
pub async fn write_reply_frame<W>(writer: &mut W, command_id: CommandId, body: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = frame_len(body.len() + COMMAND_ID_LEN as usize)?;
    writer.write_u32(len).await?;
    writer.write_i32(command_id).await?;
    writer.write_all(body).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the next reply frame.
///
/// Transport and framing problems are returned as `Err` and leave the stream
/// unusable. A body that fails to decode only poisons its own frame and is
/// reported through [`ReplyFrame::reply`].
pub async fn read_reply<R>(reader: &mut R) -> io::Result<Option<ReplyFrame>>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err),
    };
    check_len(len)?;
    if len < COMMAND_ID_LEN {
        return Err(invalid_data(format!("reply frame of {len} bytes has no command id")));
    }

    let command_id = reader.read_i32().await?;
    let mut body = vec![0; (len - COMMAND_ID_LEN) as usize];
    reader.read_exact(&mut body).await?;

    let reply = ProposeReply::decode(&body).and_then(|reply| {
        if reply.command_id == command_id {
            Ok(reply)
        } else {
            Err(ClientError::Protocol(format!(
                "reply body names command {} inside frame for {command_id}",
                reply.command_id
            )))
        }
    });
    Ok(Some(ReplyFrame { command_id, reply }))
}

fn frame_len(len: usize) -> io::Result<u32> {
    let len = u32::try_from(len).map_err(|_| invalid_data(format!("frame of {len} bytes")))?;
    check_len(len)?;
    Ok(len)
}

fn check_len(len: u32) -> io::Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(invalid_data(format!(
            "frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit"
        )));
    }
    Ok(())
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
