//! Per-worker session state and the command dispatcher.
//!
//! A session owns a cwd inode, an open-file table keyed by filename, and a
//! handle on the shared [`Filesystem`]. Sessions are not shared between
//! workers; the image itself is, and every command body runs under the
//! filesystem gate.

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use blockfs_disk::SuperBlock;

use crate::device::BlockDevice;
use crate::dir;
use crate::error::FsError;
use crate::file::{OpenFile, OpenMode};
use crate::inode::read_inode;
use crate::{alloc, Filesystem};

pub struct Session {
    fs: Arc<Filesystem>,
    cwd: u32,
    files: HashMap<String, OpenFile>,
}

impl Session {
    pub fn new(fs: Arc<Filesystem>) -> Self {
        let cwd = fs.superblock().root_dir_inode;
        Self {
            fs,
            cwd,
            files: HashMap::new(),
        }
    }

    /// Inode of the session's current working directory.
    pub fn cwd(&self) -> u32 {
        self.cwd
    }

    /// Executes one line of command input and returns its status line.
    /// Errors never escape: every failure is rendered into the status.
    pub fn execute_command(&mut self, line: &str) -> String {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(&cmd) = parts.first() else {
            return "Empty command.".to_string();
        };

        let result = match (cmd.to_ascii_lowercase().as_str(), parts.len()) {
            ("create", 2) => self.cmd_create(parts[1]),
            ("delete", 2) => self.cmd_delete(parts[1]),
            ("mkdir", 2) => self.cmd_mkdir(parts[1]),
            ("chdir", 2) => self.cmd_chdir(parts[1]),
            ("move", 3) => self.cmd_move(parts[1], parts[2]),
            ("open", 3) => self.cmd_open(parts[1], parts[2]),
            ("close", 2) => Ok(self.close(parts[1])),
            ("write_to_file", n) if n >= 3 => match quoted(line) {
                Some(data) => self.cmd_write(parts[1], parts[2], data),
                None => return "Invalid or malformed command.".to_string(),
            },
            ("read_from_file", 2) => self.cmd_read(parts[1], None),
            ("read_from_file", 4) => {
                self.cmd_read_range(parts[1], parts[2], parts[3])
            }
            ("move_within_file", 5) => {
                self.cmd_move_within(parts[1], parts[2], parts[3], parts[4])
            }
            ("truncate_file", 3) => self.cmd_truncate(parts[1], parts[2]),
            ("show_memory_map", 1) => Ok(self.memory_map()),
            _ => return "Invalid or malformed command.".to_string(),
        };

        match result {
            Ok(status) => status,
            Err(e) => format!("Error: {e}"),
        }
    }

    fn cmd_create(&mut self, name: &str) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        let mut dev = self.fs.lock();
        alloc::create_file(&mut dev, &sb, self.cwd, name, b"")?;
        Ok(format!("File {name} created."))
    }

    fn cmd_delete(&mut self, name: &str) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        let mut dev = self.fs.lock();
        alloc::delete_file(&mut dev, &sb, self.cwd, name)?;
        Ok(format!("File {name} deleted."))
    }

    fn cmd_mkdir(&mut self, name: &str) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        let mut dev = self.fs.lock();
        alloc::create_dir(&mut dev, &sb, self.cwd, name)?;
        Ok(format!("Directory {name} created."))
    }

    /// Changes cwd to the named child directory. On failure cwd is left
    /// unchanged. `..` returns the session to the root directory.
    fn cmd_chdir(&mut self, name: &str) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        if name == ".." {
            self.cwd = sb.root_dir_inode;
            return Ok("Changed directory to ..".to_string());
        }
        let mut dev = self.fs.lock();
        let cwd_inode = read_inode(&mut dev, &sb, self.cwd)?;
        let target = dir::lookup(&mut dev, &cwd_inode, name)?;
        if !read_inode(&mut dev, &sb, target)?.is_directory {
            return Err(FsError::NotADirectory(name.to_string()));
        }
        self.cwd = target;
        Ok(format!("Changed directory to {name}."))
    }

    /// Moves the entry `src` into the directory `dst`, both resolved in the
    /// session cwd. `dst` of `..` means the root directory.
    fn cmd_move(&mut self, src: &str, dst: &str) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        let mut dev = self.fs.lock();
        let cwd_inode = read_inode(&mut dev, &sb, self.cwd)?;
        let entries = dir::load(&mut dev, &cwd_inode)?;
        let entry = entries
            .iter()
            .find(|e| e.name == src)
            .ok_or_else(|| FsError::NotFound(src.to_string()))?
            .clone();

        let target_num = if dst == ".." {
            sb.root_dir_inode
        } else {
            entries
                .iter()
                .find(|e| e.name == dst)
                .map(|e| e.inode)
                .ok_or_else(|| FsError::NotFound(dst.to_string()))?
        };
        let target = read_inode(&mut dev, &sb, target_num)?;
        if !target.is_directory {
            return Err(FsError::NotADirectory(dst.to_string()));
        }
        if entry.inode == target_num {
            // A directory cannot contain itself.
            return Ok(format!("Cannot move {src} into itself."));
        }

        dir::remove(&mut dev, &cwd_inode, src)?;
        if let Err(e) = dir::add(&mut dev, &target, &entry.name, entry.inode) {
            // Put the source entry back so the object stays reachable.
            dir::add(&mut dev, &cwd_inode, &entry.name, entry.inode)?;
            return Err(e);
        }
        Ok(format!("Moved {src} to {dst}."))
    }

    fn cmd_open(&mut self, name: &str, mode: &str) -> Result<String, FsError> {
        let mode: OpenMode = mode.parse()?;
        self.open(name, mode)?;
        Ok(format!("File {name} opened in {} mode.", mode.as_str()))
    }

    /// Resolves `name` in the cwd and installs a handle in the session's
    /// open-file table. Re-opening a name replaces (and closes) the previous
    /// handle.
    pub fn open(&mut self, name: &str, mode: OpenMode) -> Result<(), FsError> {
        let sb = *self.fs.superblock();
        let (inode_num, inode) = {
            let mut dev = self.fs.lock();
            let cwd_inode = read_inode(&mut dev, &sb, self.cwd)?;
            let inode_num = dir::lookup(&mut dev, &cwd_inode, name)?;
            let inode = read_inode(&mut dev, &sb, inode_num)?;
            if inode.is_directory {
                return Err(FsError::IsADirectory(name.to_string()));
            }
            (inode_num, inode)
        };
        let dev = BlockDevice::open(self.fs.path(), mode.writable())?;
        self.files
            .insert(name.to_string(), OpenFile::new(dev, inode_num, mode, inode));
        Ok(())
    }

    /// Removes `name` from the open-file table, closing its descriptor.
    /// Closing an unopened name is a no-op with an informational status.
    pub fn close(&mut self, name: &str) -> String {
        match self.files.remove(name) {
            Some(_) => format!("File {name} closed."),
            None => format!("File {name} is not open."),
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    fn cmd_write(
        &mut self,
        name: &str,
        pos_token: &str,
        data: &str,
    ) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        let _gate = self.fs.lock();
        let file = self
            .files
            .get_mut(name)
            .ok_or_else(|| FsError::NotOpen(name.to_string()))?;
        match parse_position(pos_token) {
            Some(pos) => {
                file.write_at(&sb, pos, data.as_bytes())?;
                Ok(format!("Wrote to {name} at position {pos}: {data}"))
            }
            None => {
                file.append(&sb, data.as_bytes())?;
                Ok(format!("Wrote to {name}: {data}"))
            }
        }
    }

    fn cmd_read(
        &mut self,
        name: &str,
        range: Option<(u64, u64)>,
    ) -> Result<String, FsError> {
        let sb = *self.fs.superblock();
        let _gate = self.fs.lock();
        let file = self
            .files
            .get_mut(name)
            .ok_or_else(|| FsError::NotOpen(name.to_string()))?;
        let data = file.read_range(&sb, range)?;
        match range {
            Some((start, size)) => {
                Ok(format!("Data from {name} (from {start} for {size}): {data}"))
            }
            None => Ok(format!("Data from {name}: {data}")),
        }
    }

    fn cmd_read_range(
        &mut self,
        name: &str,
        start: &str,
        size: &str,
    ) -> Result<String, FsError> {
        let start = parse_arg(start)?;
        let size = parse_arg(size)?;
        self.cmd_read(name, Some((start, size)))
    }

    fn cmd_move_within(
        &mut self,
        name: &str,
        start: &str,
        size: &str,
        target: &str,
    ) -> Result<String, FsError> {
        let start = parse_arg(start)?;
        let size = parse_arg(size)?;
        let target = parse_arg(target)?;
        let sb = *self.fs.superblock();
        let _gate = self.fs.lock();
        let file = self
            .files
            .get_mut(name)
            .ok_or_else(|| FsError::NotOpen(name.to_string()))?;
        file.move_within(&sb, start, size, target)?;
        Ok(format!("Moved {size} bytes in {name} from {start} to {target}."))
    }

    fn cmd_truncate(&mut self, name: &str, max_size: &str) -> Result<String, FsError> {
        let max_size = parse_arg(max_size)?;
        let sb = *self.fs.superblock();
        let _gate = self.fs.lock();
        let file = self
            .files
            .get_mut(name)
            .ok_or_else(|| FsError::NotOpen(name.to_string()))?;
        file.truncate(&sb, max_size)?;
        Ok(format!("Truncated {name} to max size {max_size}."))
    }

    /// Depth-first render of the directory tree, entries sorted by name,
    /// directories suffixed with `/`. An unreadable directory block is
    /// annotated and the traversal continues.
    pub fn memory_map(&self) -> String {
        let sb = *self.fs.superblock();
        let mut dev = self.fs.lock();
        let mut out = String::from("Filesystem memory map\n");
        let mut visited = HashSet::new();
        render_tree(
            &mut dev,
            &sb,
            sb.root_dir_inode,
            "/",
            0,
            &mut visited,
            &mut out,
        );
        out.truncate(out.trim_end().len());
        out
    }
}

fn render_tree(
    dev: &mut BlockDevice,
    sb: &SuperBlock,
    inode_num: u32,
    name: &str,
    depth: usize,
    visited: &mut HashSet<u32>,
    out: &mut String,
) {
    let indent = "    ".repeat(depth);
    let inode = match read_inode(dev, sb, inode_num) {
        Ok(inode) => inode,
        Err(_) => {
            let _ = writeln!(out, "{indent}{name} [unreadable inode]");
            return;
        }
    };
    if !inode.is_directory {
        let _ = writeln!(out, "{indent}{name}");
        return;
    }

    if depth == 0 {
        let _ = writeln!(out, "/");
    } else {
        let _ = writeln!(out, "{indent}{name}/");
    }
    if !visited.insert(inode_num) {
        let _ = writeln!(out, "{indent}    [cycle]");
        return;
    }
    match dir::load(dev, &inode) {
        Err(_) => {
            let _ = writeln!(out, "{indent}    [unreadable directory]");
        }
        Ok(mut entries) => {
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            for entry in &entries {
                render_tree(dev, sb, entry.inode, &entry.name, depth + 1, visited, out);
            }
        }
    }
}

/// Decimal position token, per the dispatcher contract: only an unsigned
/// run of digits counts as a position; anything else means "no position".
fn parse_position(token: &str) -> Option<u64> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    token.parse().ok()
}

/// Numeric argument where one is required; negative or non-numeric input is
/// a range error.
fn parse_arg(token: &str) -> Result<u64, FsError> {
    let value: i64 = token.parse().map_err(|_| FsError::InvalidRange)?;
    u64::try_from(value).map_err(|_| FsError::InvalidRange)
}

/// The text between the first and last double quote of the line.
fn quoted(line: &str) -> Option<&str> {
    let first = line.find('"')?;
    let last = line.rfind('"')?;
    (last > first).then(|| &line[first + 1..last])
}
