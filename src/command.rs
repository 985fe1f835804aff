//! Decodes a RESP command frame (array of bulk strings) into a `Command`:
//! the command name plus its raw argument bytes. Arity/semantic validation
//! happens in the handlers, not here.

use bytes::Bytes;

#[derive(Debug, Clone)]
pub struct Command {
    pub name: String,
    pub args: Vec<Bytes>,
}

impl Command {
    /// `frame_args` is the full command array, including the command name as
    /// element 0.
    pub fn from_args(frame_args: Vec<Bytes>) -> Option<Command> {
        let (first, rest) = frame_args.split_first()?;
        let name = String::from_utf8_lossy(first).to_ascii_uppercase();
        Some(Command { name, args: rest.to_vec() })
    }

    pub fn arg_str(&self, index: usize) -> Option<String> {
        self.args.get(index).map(|b| String::from_utf8_lossy(b).to_string())
    }

    pub fn is_write_command(&self) -> bool {
        crate::protocol_constants::WRITE_COMMANDS.contains(&self.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_args() {
        let cmd = Command::from_args(vec![
            Bytes::from_static(b"set"),
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
        ])
        .unwrap();
        assert_eq!(cmd.name, "SET");
        assert_eq!(cmd.arg_str(0), Some("k".to_string()));
        assert_eq!(cmd.arg_str(1), Some("v".to_string()));
    }

    #[test]
    fn empty_array_yields_none() {
        assert!(Command::from_args(vec![]).is_none());
    }

    #[test]
    fn write_commands_are_flagged() {
        let set = Command::from_args(vec![Bytes::from_static(b"SET")]).unwrap();
        let get = Command::from_args(vec![Bytes::from_static(b"GET")]).unwrap();
        assert!(set.is_write_command());
        assert!(!get.is_write_command());
    }
}
