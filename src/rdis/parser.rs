use super::protocol::RespFrame;
use super::types::{CommandError, ResultT};
use bytes::Bytes;
use nom::{
    branch::alt,
    bytes::streaming::{take, take_until},
    character::streaming::{char, crlf, digit1},
    combinator::{map, opt},
    error::{Error as NomError, ErrorKind},
    multi::count,
    sequence::{preceded, terminated, tuple},
    Err as NomErr, IResult,
};
use std::convert::TryInto;

fn read_positive_decimal(bytes: &[u8]) -> IResult<&[u8], u64> {
    let (rem, int_bytes) = digit1(bytes)?;
    let int: u64 = std::str::from_utf8(int_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| NomErr::Failure(NomError::new(bytes, ErrorKind::Digit)))?;
    Ok((rem, int))
}

fn read_decimal(bytes: &[u8]) -> IResult<&[u8], i64> {
    let (rem, (minus, int)) = tuple((opt(char('-')), read_positive_decimal))(bytes)?;
    Ok((rem, if minus.is_some() { -(int as i64) } else { int as i64 }))
}

fn read_line(bytes: &[u8]) -> IResult<&[u8], String> {
    let (rem, text) = take_until("\r\n")(bytes)?;
    let (rem, _) = crlf(rem)?;
    Ok((rem, String::from_utf8_lossy(text).into_owned()))
}

/// `$`-tagged bulk string. `$-1\r\n` decodes to the null sentinel;
/// `$0\r\n\r\n` decodes to an empty (non-null) bulk string. Any other
/// negative length is a malformed frame, not a "need more data" signal.
fn read_bulk(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    let (rem, size) = preceded(char('$'), terminated(read_decimal, crlf))(bytes)?;
    if size == -1 {
        Ok((rem, RespFrame::NullBulk))
    } else if size < -1 {
        Err(NomErr::Failure(NomError::new(bytes, ErrorKind::Verify)))
    } else {
        let n: u64 = size.try_into().unwrap();
        terminated(
            map(take(n), |b: &[u8]| RespFrame::Bulk(Bytes::copy_from_slice(b))),
            crlf,
        )(rem)
    }
}

fn read_simple(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    let (rem, s) = preceded(char('+'), read_line)(bytes)?;
    Ok((rem, RespFrame::Simple(s.into_bytes())))
}

fn read_error(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    let (rem, s) = preceded(char('-'), read_line)(bytes)?;
    match s.split_once(' ') {
        Some((prefix, msg)) => Ok((rem, RespFrame::Error(prefix.to_string(), msg.to_string()))),
        None => Ok((rem, RespFrame::Error(s, String::new()))),
    }
}

fn read_integer(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    map(preceded(char(':'), terminated(read_decimal, crlf)), RespFrame::Integer)(bytes)
}

fn read_primitive(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    alt((read_integer, read_bulk, read_simple, read_error, read_array))(bytes)
}

/// `*`-tagged array. `*-1\r\n` is the null array sentinel; `*0\r\n` is an
/// empty (non-null) array. Elements may themselves be any frame kind,
/// recursively, matching spec's "recursive aggregate types".
fn read_array(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    let (rem, size) = preceded(char('*'), terminated(read_decimal, crlf))(bytes)?;
    if size == -1 {
        Ok((rem, RespFrame::NullArray))
    } else if size < -1 {
        Err(NomErr::Failure(NomError::new(bytes, ErrorKind::Verify)))
    } else {
        map(count(read_primitive, size as usize), RespFrame::Array)(rem)
    }
}

/// Parses one top-level frame out of `bytes`. Returns `Ok` with the
/// remaining unconsumed suffix, `Err(Incomplete)` when more bytes are
/// needed, or `Err(other)` for a genuinely malformed frame.
pub fn read(bytes: &[u8]) -> IResult<&[u8], RespFrame> {
    read_primitive(bytes)
}

/// Drains every fully-decoded top-level frame out of `buf`. Returns the
/// decoded frames plus the number of leading bytes they consumed; any
/// partial trailing frame is left for the next read. The caller owns
/// splitting the consumed prefix off its buffer.
pub fn decode_all(buf: &[u8]) -> ResultT<(Vec<RespFrame>, usize)> {
    let mut offset = 0;
    let mut frames = Vec::new();
    loop {
        if offset >= buf.len() {
            break;
        }
        match read(&buf[offset..]) {
            Ok((rem, frame)) => {
                let consumed = buf.len() - offset - rem.len();
                offset += consumed;
                frames.push(frame);
            }
            Err(NomErr::Incomplete(_)) => break,
            Err(err) => return Err(format!("malformed RESP frame: {:?}", err).into()),
        }
    }
    Ok((frames, offset))
}

/// Flattens a top-level command array of bulk strings into an argv vector.
/// The first element is the command name (matched case-insensitively by
/// the dispatcher); everything else is a positional argument.
pub fn extract_argv(frame: RespFrame) -> Result<Vec<Bytes>, CommandError> {
    match frame {
        RespFrame::Array(items) => {
            let mut argv = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    RespFrame::Bulk(b) => argv.push(b),
                    RespFrame::Simple(s) => argv.push(Bytes::from(s)),
                    _ => {
                        return Err(CommandError::InvalidArgument(
                            "expected bulk string array element".into(),
                        ))
                    }
                }
            }
            Ok(argv)
        }
        _ => Err(CommandError::InvalidArgument(
            "expected command as a RESP array".into(),
        )),
    }
}
