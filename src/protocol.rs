//! Header parsing
//!
//! Every connection starts with a single ASCII line of whitespace-separated
//! tokens: `DATA dir name group size` announces `size` payload bytes to
//! append, `ROTATE dir name group` requests a rotation. The parser owns its
//! output: no sub-slice aliasing of the connection buffer survives it.

use crate::error::{CarrierError, Result};
use crate::registry::DestKey;

/// Parsed header command
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Data { key: DestKey, size: u64 },
    Rotate { key: DestKey },
}

/// Parses one header line
///
/// Strict arity: missing or trailing tokens are malformed, as is anything
/// but a decimal byte count in the size field.
pub fn parse_header(line: &str) -> Result<Command> {
    let mut tokens = line.split_whitespace();
    let command = tokens.next().ok_or_else(|| CarrierError::HeaderMalformed {
        line: line.to_string(),
        reason: "empty header",
    })?;

    let malformed = |reason: &'static str| CarrierError::HeaderMalformed {
        line: line.to_string(),
        reason,
    };

    match command {
        "DATA" => {
            let dir = tokens.next().ok_or_else(|| malformed("DATA needs dir name group size"))?;
            let name = tokens.next().ok_or_else(|| malformed("DATA needs dir name group size"))?;
            let group = tokens.next().ok_or_else(|| malformed("DATA needs dir name group size"))?;
            let size = tokens.next().ok_or_else(|| malformed("DATA needs dir name group size"))?;
            if tokens.next().is_some() {
                return Err(malformed("trailing tokens after size"));
            }
            let size: u64 = size.parse().map_err(|_| malformed("size is not a decimal byte count"))?;
            Ok(Command::Data {
                key: DestKey::new(dir, name, group),
                size,
            })
        }
        "ROTATE" => {
            let dir = tokens.next().ok_or_else(|| malformed("ROTATE needs dir name group"))?;
            let name = tokens.next().ok_or_else(|| malformed("ROTATE needs dir name group"))?;
            let group = tokens.next().ok_or_else(|| malformed("ROTATE needs dir name group"))?;
            if tokens.next().is_some() {
                return Err(malformed("trailing tokens after group"));
            }
            Ok(Command::Rotate {
                key: DestKey::new(dir, name, group),
            })
        }
        _ => Err(malformed("unknown command")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_data() {
        let cmd = parse_header("DATA web access.log frontend 1234\n").unwrap();
        assert_eq!(
            cmd,
            Command::Data {
                key: DestKey::new("web", "access.log", "frontend"),
                size: 1234,
            }
        );
    }

    #[test]
    fn test_parse_rotate() {
        let cmd = parse_header("ROTATE web access.log frontend\n").unwrap();
        assert_eq!(
            cmd,
            Command::Rotate {
                key: DestKey::new("web", "access.log", "frontend"),
            }
        );
    }

    #[test]
    fn test_parse_tolerates_extra_whitespace() {
        let cmd = parse_header("DATA  a\t b  c   7 \r\n").unwrap();
        assert_eq!(
            cmd,
            Command::Data {
                key: DestKey::new("a", "b", "c"),
                size: 7,
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert!(parse_header("FLUSH a b c\n").is_err());
        assert!(parse_header("data a b c 5\n").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_arity() {
        assert!(parse_header("DATA a b c\n").is_err());
        assert!(parse_header("DATA a b c 5 extra\n").is_err());
        assert!(parse_header("ROTATE a b\n").is_err());
        assert!(parse_header("ROTATE a b c d\n").is_err());
        assert!(parse_header("\n").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_size() {
        assert!(parse_header("DATA a b c five\n").is_err());
        assert!(parse_header("DATA a b c -5\n").is_err());
        assert!(parse_header("DATA a b c 5.0\n").is_err());
    }

    proptest! {
        #[test]
        fn parse_never_panics(line in "\\PC*") {
            let _ = parse_header(&line);
        }
    }
}
