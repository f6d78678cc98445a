/// RESP (REdis Serialization Protocol) framing for the remote context store

use bytes::{BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n)
    BulkString(Option<Bytes>), // None represents NULL
    /// Array (*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n)
    Array(Option<Vec<RespValue>>), // None represents NULL array
}

/// RESP parser for reading replies
pub struct RespParser;

/// RESP encoder for writing commands
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(#[from] btoi::ParseIntegerError),
}

impl RespParser {
    /// Parse one value from the front of `buf`
    ///
    /// Returns the value and the number of bytes it used, or `None` when the
    /// buffer does not hold a complete value yet. Nothing is consumed.
    pub fn parse(buf: &[u8]) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some(&first_byte) = buf.first() else {
            return Ok(None);
        };

        match first_byte {
            b'+' | b'-' | b':' => {
                let Some((line, used)) = Self::read_line(buf) else {
                    return Ok(None);
                };
                let body = &line[1..];
                let value = match first_byte {
                    b'+' => RespValue::SimpleString(str::from_utf8(body)?.to_string()),
                    b'-' => RespValue::Error(str::from_utf8(body)?.to_string()),
                    _ => RespValue::Integer(btoi::btoi::<i64>(body)?),
                };
                Ok(Some((value, used)))
            }
            b'$' => Self::parse_bulk_string(buf),
            b'*' => Self::parse_array(buf),
            _ => Err(RespParseError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                first_byte as char
            ))),
        }
    }

    /// Parse and consume one value from a read buffer
    pub fn parse_from(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::parse(buf)? {
            Some((value, used)) => {
                let _ = buf.split_to(used);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn parse_bulk_string(buf: &[u8]) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some((line, header)) = Self::read_line(buf) else {
            return Ok(None);
        };
        let size: i64 = btoi::btoi(&line[1..])?;

        if size == -1 {
            return Ok(Some((RespValue::BulkString(None), header)));
        }
        if size < 0 {
            return Err(RespParseError::InvalidFormat(
                "Invalid bulk string size".to_string(),
            ));
        }

        let size = size as usize;
        let end = header + size;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RespParseError::InvalidFormat(
                "Missing \\r\\n after bulk string".to_string(),
            ));
        }

        let content = Bytes::copy_from_slice(&buf[header..end]);
        Ok(Some((RespValue::BulkString(Some(content)), end + 2)))
    }

    fn parse_array(buf: &[u8]) -> Result<Option<(RespValue, usize)>, RespParseError> {
        let Some((line, header)) = Self::read_line(buf) else {
            return Ok(None);
        };
        let size: i64 = btoi::btoi(&line[1..])?;

        if size == -1 {
            return Ok(Some((RespValue::Array(None), header)));
        }
        if size < 0 {
            return Err(RespParseError::InvalidFormat(
                "Invalid array size".to_string(),
            ));
        }

        let mut used = header;
        let mut elements = Vec::with_capacity(size as usize);
        for _ in 0..size {
            match Self::parse(&buf[used..])? {
                Some((element, n)) => {
                    elements.push(element);
                    used += n;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(Some(elements)), used)))
    }

    /// Line without its \r\n, and the bytes used including the terminator
    fn read_line(buf: &[u8]) -> Option<(&[u8], usize)> {
        buf.windows(2)
            .position(|w| w == b"\r\n")
            .map(|pos| (&buf[..pos], pos + 2))
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => {
                buf.put_u8(b'$');
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                buf.extend_from_slice(data);
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Create a command from its name and arguments
    pub fn create_command(command: &str, args: &[&str]) -> RespValue {
        let mut elements = vec![RespValue::BulkString(Some(Bytes::from(command.to_string())))];

        for arg in args {
            elements.push(RespValue::BulkString(Some(Bytes::from(arg.to_string()))));
        }

        RespValue::Array(Some(elements))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &str) -> RespValue {
        let (value, used) = RespParser::parse(input.as_bytes()).unwrap().unwrap();
        assert_eq!(used, input.len());
        value
    }

    #[test]
    fn test_parse_scalars() {
        assert_eq!(parse_all("+OK\r\n"), RespValue::SimpleString("OK".to_string()));
        assert_eq!(
            parse_all("-ERR unknown command\r\n"),
            RespValue::Error("ERR unknown command".to_string())
        );
        assert_eq!(parse_all(":1000\r\n"), RespValue::Integer(1000));
        assert_eq!(parse_all("$-1\r\n"), RespValue::BulkString(None));
    }

    #[test]
    fn test_parse_bulk_string_with_crlf_inside() {
        let value = parse_all("$7\r\nab\r\ncde\r\n");
        assert_eq!(value, RespValue::BulkString(Some(Bytes::from("ab\r\ncde"))));
    }

    #[test]
    fn test_parse_array() {
        let value = parse_all("*3\r\n$3\r\nGET\r\n$3\r\nkey\r\n:7\r\n");
        assert_eq!(
            value,
            RespValue::Array(Some(vec![
                RespValue::BulkString(Some(Bytes::from("GET"))),
                RespValue::BulkString(Some(Bytes::from("key"))),
                RespValue::Integer(7),
            ]))
        );
    }

    #[test]
    fn test_incomplete_data() {
        for partial in ["+OK\r", "$5\r\nhel", "*2\r\n$3\r\nGET\r\n", ""] {
            assert!(RespParser::parse(partial.as_bytes()).unwrap().is_none(), "{:?}", partial);
        }
    }

    #[test]
    fn test_parse_from_consumes_one_value() {
        let mut buf = BytesMut::from("+OK\r\n$-1\r\n");
        assert_eq!(
            RespParser::parse_from(&mut buf).unwrap(),
            Some(RespValue::SimpleString("OK".to_string()))
        );
        assert_eq!(RespParser::parse_from(&mut buf).unwrap(), Some(RespValue::BulkString(None)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_input() {
        assert!(RespParser::parse(b"?what\r\n").is_err());
        assert!(RespParser::parse(b":12x\r\n").is_err());
        assert!(RespParser::parse(b"$3\r\nabcd\r\n").is_err());
    }

    #[test]
    fn test_encode_command() {
        let command = RespEncoder::create_command("SET", &["key", "value"]);
        let encoded = RespEncoder::encode(&command);
        let expected = "*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n";
        assert_eq!(encoded, Bytes::from(expected));
        assert_eq!(parse_all(expected), command);
    }
}
