//! Command to run on the PTY
//!
//! Everything the child needs after `fork` is converted to C strings here,
//! ahead of time, so the forked child never has to allocate.

use std::env;
use std::ffi::{CStr, CString, OsStr, OsString};
use std::fs;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use crate::error::{RelayError, RelayResult};

/// TERM given to the child when neither the config nor our own environment sets one
pub const DEFAULT_TERM: &str = "xterm-256color";

/// Search path `execvp` falls back to when PATH is unset
const DEFAULT_PATH: &str = "/bin:/usr/bin";

/// A validated command line plus the environment it runs with
#[derive(Debug, Clone)]
pub struct Command {
    /// Resolved path passed to `execve`
    program: CString,
    /// Arguments, with the program name as given in argv[0]
    argv: Vec<CString>,
    /// `KEY=VALUE` pairs
    env: Vec<CString>,
}

impl Command {
    /// Build a command from a sequence whose first element is the program
    ///
    /// The child inherits our environment. Fails with [`RelayError::Usage`]
    /// when the sequence is empty.
    pub fn from_args<I, S>(args: I) -> RelayResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let argv = args
            .into_iter()
            .enumerate()
            .map(|(index, arg)| {
                CString::new(arg.as_ref().as_bytes())
                    .map_err(|_| RelayError::InvalidArgument { index })
            })
            .collect::<RelayResult<Vec<_>>>()?;

        let name = argv.first().ok_or(RelayError::Usage)?;
        let search_path = env::var_os("PATH");
        let resolved = resolve_program(OsStr::from_bytes(name.as_bytes()), search_path.as_deref());
        let program = CString::new(resolved.into_os_string().into_vec())
            .map_err(|_| RelayError::InvalidArgument { index: 0 })?;

        Ok(Command {
            program,
            argv,
            env: inherited_env(),
        })
    }

    /// Set the child's TERM
    ///
    /// `None` keeps an inherited TERM and falls back to [`DEFAULT_TERM`].
    pub fn term(mut self, term: Option<&str>) -> RelayResult<Self> {
        let inherited = self.env.iter().any(|var| var.as_bytes().starts_with(b"TERM="));
        let value = match term {
            Some(value) => value,
            None if inherited => return Ok(self),
            None => DEFAULT_TERM,
        };

        let var = CString::new(format!("TERM={}", value))
            .map_err(|_| RelayError::InvalidArgument { index: 0 })?;
        self.env.retain(|var| !var.as_bytes().starts_with(b"TERM="));
        self.env.push(var);
        Ok(self)
    }

    /// Path handed to `execve`
    pub fn program(&self) -> &CStr {
        &self.program
    }

    /// The program name as the caller typed it
    pub fn name(&self) -> &CStr {
        &self.argv[0]
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn env(&self) -> &[CString] {
        &self.env
    }

    /// Value of an environment variable as the child will see it
    pub fn env_var(&self, key: &str) -> Option<&[u8]> {
        self.env.iter().find_map(|var| {
            var.as_bytes()
                .strip_prefix(key.as_bytes())
                .and_then(|rest| rest.strip_prefix(b"="))
        })
    }
}

/// Locate `program` the way `execvp` does
///
/// A name containing a slash is used as-is. Otherwise the first executable
/// regular file found along `search_path` wins. If nothing matches the bare
/// name is returned and `execve` reports the failure in the child.
pub fn resolve_program(program: &OsStr, search_path: Option<&OsStr>) -> PathBuf {
    if program.is_empty() || program.as_bytes().contains(&b'/') {
        return PathBuf::from(program);
    }

    let search_path = search_path.unwrap_or_else(|| OsStr::new(DEFAULT_PATH));
    env::split_paths(search_path)
        .map(|dir| {
            if dir.as_os_str().is_empty() {
                Path::new(".").join(program)
            } else {
                dir.join(program)
            }
        })
        .find(|candidate| is_executable(candidate))
        .unwrap_or_else(|| PathBuf::from(program))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

fn inherited_env() -> Vec<CString> {
    env::vars_os()
        .filter_map(|(key, value)| {
            let mut var: OsString = key;
            var.push("=");
            var.push(value);
            CString::new(var.into_vec()).ok()
        })
        .collect()
}
