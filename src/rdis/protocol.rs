use async_recursion::async_recursion;
use bytes::Bytes;
use tokio::io::{AsyncWriteExt, BufWriter};

use super::types::{CommandError, ResultT};

/// One decoded or to-be-encoded RESP frame (spec §4.1). `NullBulk`/`NullArray`
/// are kept distinct so the decoder can round-trip both `$-1` and `*-1`
/// sentinels even though the command layer only ever emits `NullBulk`.
#[derive(PartialEq, Eq, Debug, Clone)]
pub enum RespFrame {
    Simple(Vec<u8>),
    Error(String, String),
    Integer(i64),
    Bulk(Bytes),
    Array(Vec<RespFrame>),
    NullBulk,
    NullArray,
}

const CRLF: [u8; 2] = [b'\r', b'\n'];

impl RespFrame {
    pub fn ok() -> RespFrame {
        RespFrame::Simple(b"OK".to_vec())
    }

    pub fn error(prefix: &str, msg: &str) -> RespFrame {
        RespFrame::Error(prefix.to_string(), msg.to_string())
    }

    pub fn bulk(b: impl Into<Bytes>) -> RespFrame {
        RespFrame::Bulk(b.into())
    }

    /// Flattens a key-ordered sequence of pairs into an interleaved
    /// `[k1, v1, k2, v2, ...]` array, as used by XRANGE's field/value lists.
    pub fn flatten_pairs(pairs: Vec<(RespFrame, RespFrame)>) -> RespFrame {
        let mut out = Vec::with_capacity(pairs.len() * 2);
        for (k, v) in pairs {
            out.push(k);
            out.push(v);
        }
        RespFrame::Array(out)
    }

    async fn write_end<W>(w: &mut W) -> ResultT<()>
    where
        W: AsyncWriteExt + Unpin,
    {
        w.write_all(&CRLF).await?;
        Ok(())
    }

    #[async_recursion]
    pub async fn write_async<W>(self, writer: &mut W, flush: bool) -> ResultT<()>
    where
        W: AsyncWriteExt + Unpin + Send,
    {
        match self {
            RespFrame::Simple(s) => {
                writer.write_u8(b'+').await?;
                writer.write_all(&s).await?;
                RespFrame::write_end(writer).await?;
            }
            RespFrame::Error(prefix, msg) => {
                writer.write_u8(b'-').await?;
                writer.write_all(prefix.as_bytes()).await?;
                writer.write_u8(b' ').await?;
                writer.write_all(msg.as_bytes()).await?;
                RespFrame::write_end(writer).await?;
            }
            RespFrame::Integer(n) => {
                writer.write_u8(b':').await?;
                writer.write_all(n.to_string().as_bytes()).await?;
                RespFrame::write_end(writer).await?;
            }
            RespFrame::Bulk(b) => {
                writer.write_u8(b'$').await?;
                writer.write_all(b.len().to_string().as_bytes()).await?;
                RespFrame::write_end(writer).await?;
                writer.write_all(&b).await?;
                RespFrame::write_end(writer).await?;
            }
            RespFrame::Array(items) => {
                writer.write_u8(b'*').await?;
                writer.write_all(items.len().to_string().as_bytes()).await?;
                RespFrame::write_end(writer).await?;
                for item in items {
                    item.write_async(writer, false).await?;
                }
            }
            RespFrame::NullBulk => writer.write_all(b"$-1\r\n").await?,
            RespFrame::NullArray => writer.write_all(b"*-1\r\n").await?,
        }
        if flush {
            writer.flush().await?;
        }
        Ok(())
    }
}

pub type Writer = BufWriter<tokio::net::tcp::OwnedWriteHalf>;

/// A `CommandError` always becomes a `-<PREFIX> <message>` reply rather than
/// closing the connection (spec §7). `WRONGTYPE` is the one prefix real
/// clients pattern-match on; everything else collapses to `ERR`.
impl From<CommandError> for RespFrame {
    fn from(err: CommandError) -> RespFrame {
        let prefix = match &err {
            CommandError::WrongType => "WRONGTYPE",
            _ => "ERR",
        };
        RespFrame::error(prefix, &err.to_string())
    }
}
