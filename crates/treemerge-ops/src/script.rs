//! Shell directives printed instead of performing disabled steps.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use treemerge_core::MergeError;

/// One action that would have been taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    Copy { from: PathBuf, to: PathBuf },
    Remove(PathBuf),
    RemoveDir(PathBuf),
    MakeDir(PathBuf),
    RemoveDuplicate { path: PathBuf, keeper: PathBuf },
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Copy { from, to } => write!(f, "cp {} {}", quote(from), quote(to)),
            Self::Remove(path) => write!(f, "rm {}", quote(path)),
            Self::RemoveDir(path) => write!(f, "rm -r {}", quote(path)),
            Self::MakeDir(path) => write!(f, "mkdir -p {}", quote(path)),
            Self::RemoveDuplicate { path, keeper } => {
                // Comment text is not parsed by the shell, so newlines are the only hazard.
                let keeper = keeper.to_string_lossy().replace('\n', "?");
                write!(f, "rm {} # duplicate of {keeper}", quote(path))
            }
        }
    }
}

fn is_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-' | '+' | ',' | ':' | '@' | '%' | '=')
}

/// POSIX shell quoting: bare when every character is safe, otherwise
/// single-quoted with `'` written as `'\''`.
pub fn quote(path: &Path) -> String {
    let s = path.to_string_lossy();
    if !s.is_empty() && s.chars().all(is_safe) {
        return s.into_owned();
    }
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// Where dry-run directives go.
pub enum DirectiveSink {
    /// One line per directive on standard output.
    Stdout,
    /// One line per directive on an arbitrary writer.
    Writer(Box<dyn Write + Send>),
    /// Kept in memory.
    Collect(Vec<Directive>),
    /// Dropped.
    Silent,
}

impl fmt::Debug for DirectiveSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdout => f.write_str("Stdout"),
            Self::Writer(_) => f.write_str("Writer"),
            Self::Collect(items) => f.debug_tuple("Collect").field(&items.len()).finish(),
            Self::Silent => f.write_str("Silent"),
        }
    }
}

impl DirectiveSink {
    pub fn collect() -> Self {
        Self::Collect(Vec::new())
    }

    pub fn emit(&mut self, directive: Directive) -> Result<(), MergeError> {
        let written = match self {
            Self::Stdout => writeln!(io::stdout().lock(), "{directive}"),
            Self::Writer(w) => writeln!(w, "{directive}").and_then(|()| w.flush()),
            Self::Collect(items) => {
                items.push(directive);
                Ok(())
            }
            Self::Silent => Ok(()),
        };
        written.map_err(|source| MergeError::Io {
            path: PathBuf::from("<directives>"),
            source,
        })
    }

    /// Directives kept by a [`DirectiveSink::Collect`] sink.
    pub fn directives(&self) -> &[Directive] {
        match self {
            Self::Collect(items) => items,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote() {
        assert_eq!(quote(Path::new("/plain/path-1.txt")), "/plain/path-1.txt");
        assert_eq!(quote(Path::new("/with space/a")), "'/with space/a'");
        assert_eq!(quote(Path::new("/it's")), "'/it'\\''s'");
        assert_eq!(quote(Path::new("/$HOME/`x`")), "'/$HOME/`x`'");
        assert_eq!(quote(Path::new("")), "''");
    }

    #[test]
    fn test_directive_text() {
        let copy = Directive::Copy {
            from: PathBuf::from("/src/a b"),
            to: PathBuf::from("/dst/a b"),
        };
        assert_eq!(copy.to_string(), "cp '/src/a b' '/dst/a b'");
        assert_eq!(Directive::Remove(PathBuf::from("/src/f")).to_string(), "rm /src/f");
        assert_eq!(Directive::RemoveDir(PathBuf::from("/src/d")).to_string(), "rm -r /src/d");
        assert_eq!(Directive::MakeDir(PathBuf::from("/dst/d")).to_string(), "mkdir -p /dst/d");
        assert_eq!(
            Directive::RemoveDuplicate {
                path: PathBuf::from("/b/x"),
                keeper: PathBuf::from("/a/x"),
            }
            .to_string(),
            "rm /b/x # duplicate of /a/x"
        );
    }

    #[test]
    fn test_writer_sink() {
        let mut sink = DirectiveSink::Writer(Box::new(Vec::new()));
        sink.emit(Directive::Remove(PathBuf::from("/x"))).unwrap();
        assert!(sink.directives().is_empty());

        let mut sink = DirectiveSink::collect();
        sink.emit(Directive::MakeDir(PathBuf::from("/d"))).unwrap();
        assert_eq!(sink.directives(), &[Directive::MakeDir(PathBuf::from("/d"))]);
    }
}
