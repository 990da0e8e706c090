//! Pure command builders.
//!
//! Every remote command is assembled as a [`CommandLine`]: a program, an
//! optional privilege escalation, and an ordered argument list. Fixed words
//! render verbatim; caller-supplied values are quoted for the client shell
//! at render time. Nothing here executes anything, so the injection-prone
//! string assembly stays unit-testable on its own.

use crate::config::ClientOs;
use crate::registry::NfsVersion;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Arg {
    Word(String),
    Value(String),
}

/// A structured command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    privileged: bool,
    program: String,
    args: Vec<Arg>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        CommandLine {
            privileged: false,
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// A command run through `sudo` on POSIX clients.
    pub fn privileged(program: impl Into<String>) -> Self {
        CommandLine {
            privileged: true,
            ..CommandLine::new(program)
        }
    }

    /// Append a fixed word, rendered verbatim.
    pub fn arg(mut self, word: impl Into<String>) -> Self {
        self.args.push(Arg::Word(word.into()));
        self
    }

    /// Append a caller-supplied value, quoted on render when needed.
    pub fn value(mut self, value: impl Into<String>) -> Self {
        self.args.push(Arg::Value(value.into()));
        self
    }

    /// Render for the client's shell.
    pub fn render(&self, os: ClientOs) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 2);
        if self.privileged && os.is_posix() {
            parts.push("sudo".to_string());
        }
        parts.push(self.program.clone());
        for arg in &self.args {
            parts.push(match arg {
                Arg::Word(word) => word.clone(),
                Arg::Value(value) => quote(value, os),
            });
        }
        parts.join(" ")
    }
}

/// Quote a value for a POSIX shell or PowerShell. Values made only of
/// characters that are inert in the target shell are returned unchanged.
pub fn quote(value: &str, os: ClientOs) -> String {
    let inert = |c: char| {
        c.is_ascii_alphanumeric()
            || matches!(c, '_' | '-' | '.' | '/' | ':' | '=' | ',' | '@' | '%' | '+')
            || (!os.is_posix() && c == '\\')
    };
    if !value.is_empty() && value.chars().all(inert) {
        return value.to_string();
    }
    match os {
        ClientOs::Linux => format!("'{}'", value.replace('\'', r"'\''")),
        ClientOs::Windows => format!("'{}'", value.replace('\'', "''")),
    }
}

/// Join a child name onto a client-side directory.
pub fn join(os: ClientOs, dir: &str, name: &str) -> String {
    let sep = match os {
        ClientOs::Linux => '/',
        ClientOs::Windows => '\\',
    };
    if dir.ends_with(sep) {
        format!("{}{}", dir, name)
    } else {
        format!("{}{}{}", dir, sep, name)
    }
}

/// Fixed NFS mount options: 64 KiB transfers, hard mount, TCP.
pub fn nfs_mount_options(version: NfsVersion) -> String {
    format!("rw,hard,rsize=65536,wsize=65536,vers={},tcp", version.as_str())
}

pub fn make_dir(path: &str) -> CommandLine {
    CommandLine::privileged("mkdir").arg("-p").value(path)
}

pub fn dir_exists(path: &str) -> CommandLine {
    CommandLine::new("test").arg("-d").value(path)
}

pub fn open_permissions(path: &str) -> CommandLine {
    CommandLine::privileged("chmod").arg("777").value(path)
}

pub fn nfs_mount(server: &str, volume: &str, path: &str, version: NfsVersion) -> CommandLine {
    CommandLine::privileged("mount")
        .arg("-t")
        .arg("nfs")
        .arg("-o")
        .arg(nfs_mount_options(version))
        .value(format!("{}:/{}", server, volume))
        .value(path)
}

pub fn nfs_unmount(path: &str) -> CommandLine {
    CommandLine::privileged("umount").arg("-f").value(path)
}

pub fn is_mountpoint(path: &str) -> CommandLine {
    CommandLine::new("mountpoint").arg("-q").value(path)
}

pub fn remove_dir(path: &str) -> CommandLine {
    CommandLine::privileged("rmdir").value(path)
}

pub fn disk_usage() -> CommandLine {
    CommandLine::new("df").arg("-h")
}

fn drive_spec(drive: char) -> String {
    format!("{}:", drive)
}

fn unc_path(server: &str, volume: &str) -> String {
    format!("\\\\{}\\{}", server, volume)
}

/// `net use` with an explicit letter, or `*` to let Windows pick one.
pub fn smb_mount(server: &str, volume: &str, drive: Option<char>) -> CommandLine {
    let letter = drive.map_or_else(|| "*".to_string(), drive_spec);
    CommandLine::new("net")
        .arg("use")
        .arg(letter)
        .value(unc_path(server, volume))
}

pub fn smb_unmount(drive: char) -> CommandLine {
    CommandLine::new("net")
        .arg("use")
        .arg(drive_spec(drive))
        .arg("/delete")
        .arg("/y")
}

pub fn smb_show(drive: char) -> CommandLine {
    CommandLine::new("net").arg("use").arg(drive_spec(drive))
}

pub fn smb_list() -> CommandLine {
    CommandLine::new("net").arg("use")
}

pub fn drive_listing(drive: char) -> CommandLine {
    CommandLine::new("dir").arg(format!("{}:\\", drive))
}

/// Directory listing of a client-side path.
pub fn list_dir(os: ClientOs, path: &str) -> CommandLine {
    match os {
        ClientOs::Linux => CommandLine::new("ls").arg("-l").value(path),
        ClientOs::Windows => CommandLine::new("dir").value(path),
    }
}

/// Parse the letter Windows assigned from `net use *` output
/// (`Drive Z: is now connected to \\server\share.`).
pub fn parse_assigned_drive<'a>(lines: impl IntoIterator<Item = &'a str>) -> Option<char> {
    lines.into_iter().find_map(|line| {
        let rest = line.trim().strip_prefix("Drive ")?;
        let mut chars = rest.chars();
        let letter = chars.next()?;
        let tail = chars.as_str();
        if letter.is_ascii_alphabetic() && tail.starts_with(": is now connected") {
            Some(letter.to_ascii_uppercase())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_leaves_plain_values() {
        assert_eq!(quote("/tmp/vol1-17", ClientOs::Linux), "/tmp/vol1-17");
        assert_eq!(quote("10.0.0.5:/vol1", ClientOs::Linux), "10.0.0.5:/vol1");
        assert_eq!(quote("\\\\srv\\share", ClientOs::Windows), "\\\\srv\\share");
    }

    #[test]
    fn test_quote_escapes_shell_syntax() {
        assert_eq!(quote("a b", ClientOs::Linux), "'a b'");
        assert_eq!(quote("x; rm -rf /", ClientOs::Linux), "'x; rm -rf /'");
        assert_eq!(quote("it's", ClientOs::Linux), r"'it'\''s'");
        assert_eq!(quote("it's", ClientOs::Windows), "'it''s'");
        assert_eq!(quote("", ClientOs::Linux), "''");
        assert_eq!(quote("a\\b", ClientOs::Linux), "'a\\b'");
    }

    #[test]
    fn test_privileged_only_on_posix() {
        let cmd = make_dir("/tmp/v");
        assert_eq!(cmd.render(ClientOs::Linux), "sudo mkdir -p /tmp/v");
        assert_eq!(cmd.render(ClientOs::Windows), "mkdir -p /tmp/v");
        assert_eq!(
            CommandLine::new("mkdir").value("a b").render(ClientOs::Linux),
            "mkdir 'a b'"
        );
    }

    #[test]
    fn test_nfs_mount_command() {
        let cmd = nfs_mount("10.0.0.5", "vol1", "/tmp/vol1-1700000000", NfsVersion::V3);
        assert_eq!(
            cmd.render(ClientOs::Linux),
            "sudo mount -t nfs -o rw,hard,rsize=65536,wsize=65536,vers=3,tcp \
             10.0.0.5:/vol1 /tmp/vol1-1700000000"
        );
        assert!(nfs_mount_options(NfsVersion::V4_1).contains("vers=4.1"));
    }

    #[test]
    fn test_smb_commands() {
        assert_eq!(
            smb_mount("10.0.0.5", "vol1", None).render(ClientOs::Windows),
            "net use * \\\\10.0.0.5\\vol1"
        );
        assert_eq!(
            smb_mount("10.0.0.5", "vol1", Some('Y')).render(ClientOs::Windows),
            "net use Y: \\\\10.0.0.5\\vol1"
        );
        assert_eq!(smb_unmount('Z').render(ClientOs::Windows), "net use Z: /delete /y");
        assert_eq!(drive_listing('Z').render(ClientOs::Windows), "dir Z:\\");
    }

    #[test]
    fn test_parse_assigned_drive() {
        let lines = ["Drive Z: is now connected to \\\\10.0.0.5\\vol1.", "", "The command completed successfully."];
        assert_eq!(parse_assigned_drive(lines), Some('Z'));
        assert_eq!(parse_assigned_drive(["Drive z: is now connected"]), Some('Z'));
        assert_eq!(parse_assigned_drive(["System error 53 has occurred."]), None);
    }

    #[test]
    fn test_join_per_os() {
        assert_eq!(join(ClientOs::Linux, "/tmp/v", "f"), "/tmp/v/f");
        assert_eq!(join(ClientOs::Windows, "Z:\\", "f"), "Z:\\f");
        assert_eq!(join(ClientOs::Windows, "Z:\\dir", "f"), "Z:\\dir\\f");
    }
}
