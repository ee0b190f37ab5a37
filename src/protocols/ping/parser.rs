//! Ping protocol parser.

use crate::error::MessageError;
use crate::runtime::Message;

pub const OP_PING: u8 = 0x01;
pub const OP_PONG: u8 = 0x02;
pub const OP_QUIT: u8 = 0x03;

/// Parsed ping command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Ping { seq: u32 },
    Quit,
}

/// Parse result.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseResult {
    Complete(Command),
    /// Opcode present but its operands were cut short.
    Truncated,
    UnknownOpcode(u8),
}

/// Parse one command at the message's read cursor.
///
/// On failure the cursor is left at the offending opcode.
pub fn parse(msg: &mut Message) -> ParseResult {
    let start = msg.read_pos();
    let opcode = match msg.get_byte() {
        Ok(opcode) => opcode,
        Err(_) => return ParseResult::Truncated,
    };

    let result = match opcode {
        OP_PING => match msg.get_u32() {
            Ok(seq) => ParseResult::Complete(Command::Ping { seq }),
            Err(_) => ParseResult::Truncated,
        },
        OP_QUIT => ParseResult::Complete(Command::Quit),
        other => ParseResult::UnknownOpcode(other),
    };

    if !matches!(result, ParseResult::Complete(_)) {
        // start was a valid position before the read above
        let _ = msg.set_read_pos(start);
    }
    result
}

/// Parse every command in the message.
///
/// Commands before a bad one are still returned, along with the failure.
pub fn parse_all(msg: &mut Message) -> (Vec<Command>, Option<ParseResult>) {
    let mut commands = Vec::new();
    while msg.remaining() > 0 {
        match parse(msg) {
            ParseResult::Complete(command) => commands.push(command),
            failure => return (commands, Some(failure)),
        }
    }
    (commands, None)
}

/// Append a PONG reply.
pub fn write_pong(msg: &mut Message, seq: u32, millis: u64) -> Result<(), MessageError> {
    if !msg.can_add(13) {
        return Err(MessageError::Overflow {
            needed: 13,
            available: msg.capacity() - msg.message_length(),
        });
    }
    msg.add_byte(OP_PONG)?.add_u32(seq)?.add_u64(millis)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(bytes: &[u8]) -> Message {
        let mut msg = Message::new();
        msg.add_bytes(bytes).unwrap();
        msg
    }

    #[test]
    fn test_parse_ping() {
        let mut msg = message(&[OP_PING, 7, 0, 0, 0]);
        assert_eq!(parse(&mut msg), ParseResult::Complete(Command::Ping { seq: 7 }));
        assert_eq!(msg.remaining(), 0);
    }

    #[test]
    fn test_parse_quit() {
        let mut msg = message(&[OP_QUIT]);
        assert_eq!(parse(&mut msg), ParseResult::Complete(Command::Quit));
    }

    #[test]
    fn test_truncated_ping() {
        let mut msg = message(&[OP_PING, 1, 2]);
        assert_eq!(parse(&mut msg), ParseResult::Truncated);
        assert_eq!(msg.read_pos(), 0);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut msg = message(&[0x42]);
        assert_eq!(parse(&mut msg), ParseResult::UnknownOpcode(0x42));
        assert_eq!(msg.read_pos(), 0);
    }

    #[test]
    fn test_parse_all_stops_at_failure() {
        let mut msg = message(&[OP_PING, 1, 0, 0, 0, OP_PING, 2, 0, 0, 0, 0x99, OP_QUIT]);
        let (commands, failure) = parse_all(&mut msg);
        assert_eq!(
            commands,
            vec![Command::Ping { seq: 1 }, Command::Ping { seq: 2 }]
        );
        assert_eq!(failure, Some(ParseResult::UnknownOpcode(0x99)));
    }

    #[test]
    fn test_write_pong() {
        let mut msg = Message::new();
        write_pong(&mut msg, 0x0102_0304, 5).unwrap();
        assert_eq!(
            msg.as_bytes(),
            &[OP_PONG, 4, 3, 2, 1, 5, 0, 0, 0, 0, 0, 0, 0]
        );

        let mut small = Message::with_capacity(12);
        assert!(matches!(
            write_pong(&mut small, 1, 1),
            Err(MessageError::Overflow { needed: 13, .. })
        ));
        assert_eq!(small.message_length(), 0);
    }
}
