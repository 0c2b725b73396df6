//! RESP wire codec for the Redis-compatible routing store.
//!
//! Only the fragment of the protocol the middleware speaks: simple strings,
//! errors, integers, bulk strings (with `-1` null), and arrays. Inline
//! commands and RESP3 types are out.

use bytes::Bytes;
use std::io;
use tokio::io::{AsyncBufReadExt, AsyncReadExt};

/// A single RESP reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR ...\r\n`
    Error(String),
    /// `:42\r\n`
    Int(i64),
    /// `$5\r\nhello\r\n`
    Bulk(Bytes),
    /// `$-1\r\n`
    Null,
    /// `*2\r\n...`
    Array(Vec<Value>),
}

impl Value {
    /// Bulk or simple-string payload as bytes, if this value carries one.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            Value::Bulk(b) => Some(b),
            Value::Simple(s) => Some(Bytes::from(s)),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Value::Simple(s) if s == "OK")
    }
}

/// Encode one command as a RESP array of bulk strings.
pub fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

fn protocol_error(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

async fn read_line<R>(reader: &mut R) -> io::Result<String>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed mid-reply",
        ));
    }
    if !line.ends_with("\r\n") {
        return Err(protocol_error("reply line missing CRLF terminator"));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

/// Read one complete reply. Arrays recurse; `Box::pin` keeps the future
/// sized for the async recursion.
pub async fn read_value<R>(reader: &mut R) -> io::Result<Value>
where
    R: AsyncBufReadExt + Unpin + Send,
{
    let line = read_line(reader).await?;
    let (kind, rest) = match line.split_at_checked(1) {
        Some(split) => split,
        None => return Err(protocol_error("empty reply line")),
    };

    match kind {
        "+" => Ok(Value::Simple(rest.to_string())),
        "-" => Ok(Value::Error(rest.to_string())),
        ":" => rest
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| protocol_error(format!("bad integer reply: {rest:?}"))),
        "$" => {
            let len: i64 = rest
                .parse()
                .map_err(|_| protocol_error(format!("bad bulk length: {rest:?}")))?;
            if len < 0 {
                return Ok(Value::Null);
            }
            let mut buf = vec![0u8; len as usize + 2];
            reader.read_exact(&mut buf).await?;
            if &buf[len as usize..] != b"\r\n" {
                return Err(protocol_error("bulk string missing CRLF terminator"));
            }
            buf.truncate(len as usize);
            Ok(Value::Bulk(Bytes::from(buf)))
        }
        "*" => {
            let count: i64 = rest
                .parse()
                .map_err(|_| protocol_error(format!("bad array length: {rest:?}")))?;
            if count < 0 {
                return Ok(Value::Null);
            }
            let mut items = Vec::with_capacity(count as usize);
            for _ in 0..count {
                items.push(Box::pin(read_value(reader)).await?);
            }
            Ok(Value::Array(items))
        }
        other => Err(protocol_error(format!("unknown reply type {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    async fn parse(input: &[u8]) -> io::Result<Value> {
        let mut reader = BufReader::new(Cursor::new(input.to_vec()));
        read_value(&mut reader).await
    }

    #[test]
    fn test_encode_get() {
        let encoded = encode_command(&[b"GET", b"key"]);
        assert_eq!(encoded, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn test_encode_setex_with_binary_value() {
        let encoded = encode_command(&[b"SETEX", b"k", b"60", b"\x00\xff"]);
        assert_eq!(
            encoded,
            b"*4\r\n$5\r\nSETEX\r\n$1\r\nk\r\n$2\r\n60\r\n$2\r\n\x00\xff\r\n"
        );
    }

    #[tokio::test]
    async fn test_parse_simple_string() {
        assert_eq!(parse(b"+OK\r\n").await.unwrap(), Value::Simple("OK".into()));
        assert!(parse(b"+OK\r\n").await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_parse_error() {
        assert_eq!(
            parse(b"-ERR unknown command\r\n").await.unwrap(),
            Value::Error("ERR unknown command".into())
        );
    }

    #[tokio::test]
    async fn test_parse_integer() {
        assert_eq!(parse(b":42\r\n").await.unwrap(), Value::Int(42));
        assert_eq!(parse(b":-1\r\n").await.unwrap(), Value::Int(-1));
    }

    #[tokio::test]
    async fn test_parse_bulk_string() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await.unwrap(),
            Value::Bulk(Bytes::from_static(b"hello"))
        );
    }

    #[tokio::test]
    async fn test_parse_empty_bulk_string() {
        assert_eq!(
            parse(b"$0\r\n\r\n").await.unwrap(),
            Value::Bulk(Bytes::new())
        );
    }

    #[tokio::test]
    async fn test_parse_null_bulk() {
        assert_eq!(parse(b"$-1\r\n").await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_parse_bulk_with_embedded_crlf() {
        assert_eq!(
            parse(b"$7\r\na\r\nb\r\nc\r\n").await.unwrap(),
            Value::Bulk(Bytes::from_static(b"a\r\nb\r\nc"))
        );
    }

    #[tokio::test]
    async fn test_parse_array() {
        let input = b"*2\r\n$1\r\na\r\n:7\r\n";
        assert_eq!(
            parse(input).await.unwrap(),
            Value::Array(vec![Value::Bulk(Bytes::from_static(b"a")), Value::Int(7)])
        );
    }

    #[tokio::test]
    async fn test_parse_nested_array() {
        let input = b"*1\r\n*1\r\n+PONG\r\n";
        assert_eq!(
            parse(input).await.unwrap(),
            Value::Array(vec![Value::Array(vec![Value::Simple("PONG".into())])])
        );
    }

    #[tokio::test]
    async fn test_truncated_reply_is_eof() {
        let err = parse(b"$5\r\nhel").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn test_missing_crlf_is_protocol_error() {
        let err = parse(b"$2\r\nab!!").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_garbage_type_byte() {
        let err = parse(b"?what\r\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_into_bytes() {
        assert_eq!(
            Value::Bulk(Bytes::from_static(b"x")).into_bytes(),
            Some(Bytes::from_static(b"x"))
        );
        assert_eq!(
            Value::Simple("PONG".into()).into_bytes(),
            Some(Bytes::from_static(b"PONG"))
        );
        assert_eq!(Value::Null.into_bytes(), None);
        assert_eq!(Value::Int(1).into_bytes(), None);
    }
}
