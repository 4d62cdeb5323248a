use crate::error::{KResult, KernelError};
use crate::memory::layout::{MAX_COMMAND_LEN, MAX_NAME_LEN};

/// Argument string stored for `getargs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arguments {
    bytes: [u8; MAX_COMMAND_LEN],
    len: usize,
}

impl Arguments {
    pub const fn empty() -> Self {
        Arguments { bytes: [0; MAX_COMMAND_LEN], len: 0 }
    }

    pub fn new(args: &[u8]) -> KResult<Self> {
        if args.len() > MAX_COMMAND_LEN {
            return Err(KernelError::CommandTooLong);
        }
        let mut bytes = [0; MAX_COMMAND_LEN];
        bytes[..args.len()].copy_from_slice(args);
        Ok(Arguments { bytes, len: args.len() })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// A command line split into program name and arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    name: [u8; MAX_NAME_LEN],
    name_len: usize,
    pub args: Arguments,
}

impl Command {
    /// The name runs up to the first space; everything after that space is
    /// the argument string, kept as typed. A NUL ends the line early.
    pub fn parse(line: &[u8]) -> KResult<Self> {
        let line = match line.iter().position(|&b| b == 0) {
            Some(end) => &line[..end],
            None => line,
        };
        if line.len() > MAX_COMMAND_LEN {
            return Err(KernelError::CommandTooLong);
        }
        let (name, rest) = match line.iter().position(|&b| b == b' ') {
            Some(space) => (&line[..space], &line[space + 1..]),
            None => (line, &[][..]),
        };
        if name.is_empty() {
            return Err(KernelError::EmptyCommand);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(KernelError::NameTooLong);
        }
        let mut stored = [0; MAX_NAME_LEN];
        stored[..name.len()].copy_from_slice(name);
        Ok(Command {
            name: stored,
            name_len: name.len(),
            args: Arguments::new(rest)?,
        })
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }

    pub fn display_name(&self) -> &str {
        core::str::from_utf8(self.name()).unwrap_or("<non-utf8>")
    }
}
