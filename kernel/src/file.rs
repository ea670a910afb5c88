//! Per-process file table and capability dispatch
//!
//! Every open file carries a capability set selected by the directory
//! entry's type when it was opened: terminal input (stdin), terminal
//! output (stdout), the RTC, the directory, or a regular file.  Absent
//! operations answer -1.  Slots 0 and 1 are pinned to stdin/stdout at
//! process creation; slots 2..7 are allocated first-fit by `open`.

use crate::error::{KernelError, Result};
use crate::fs::{FileSystem, TYPE_DIR, TYPE_FILE, TYPE_RTC};
use crate::rtc;
use crate::terminal;

pub const NUM_FILES: usize = 8;
pub const FIRST_USER_FD: usize = 2;

pub const FD_FREE: u32 = 0;
pub const FD_IN_USE: u32 = 1;

/// Which capability set an open file dispatches through.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Stdin,
    Stdout,
    Rtc,
    Dir,
    File,
}

impl FileKind {
    /// Capability set for a directory entry type.
    pub fn for_file_type(ftype: u32) -> Result<FileKind> {
        match ftype {
            TYPE_RTC => Ok(FileKind::Rtc),
            TYPE_DIR => Ok(FileKind::Dir),
            TYPE_FILE => Ok(FileKind::File),
            _ => Err(KernelError::BadArgument),
        }
    }

    /// True when the set carries a read operation.
    pub fn can_read(self) -> bool {
        !matches!(self, FileKind::Stdout)
    }

    /// True when the set carries a write operation.
    pub fn can_write(self) -> bool {
        matches!(self, FileKind::Stdout | FileKind::Rtc)
    }
}

/// One file table slot.
#[derive(Clone, Copy, Debug)]
pub struct FileDescriptor {
    pub kind: FileKind,
    pub inode: u32,
    pub fpos: u32,
    pub flags: u32,
}

impl FileDescriptor {
    pub const fn closed() -> Self {
        Self { kind: FileKind::File, inode: 0, fpos: 0, flags: FD_FREE }
    }

    pub fn is_open(&self) -> bool {
        self.flags != FD_FREE
    }
}

pub type FileTable = [FileDescriptor; NUM_FILES];

/// A fresh table: stdin and stdout pinned, the rest free.
pub fn new_table() -> FileTable {
    let mut table = [FileDescriptor::closed(); NUM_FILES];
    table[0] = FileDescriptor { kind: FileKind::Stdin, inode: 0, fpos: 0, flags: FD_IN_USE };
    table[1] = FileDescriptor { kind: FileKind::Stdout, inode: 0, fpos: 0, flags: FD_IN_USE };
    table
}

/// Copies the next directory entry's name, advancing `fpos`.  EOF reads
/// return 0.  The name is NUL-terminated when the buffer has room, and
/// the NUL counts toward the returned length.
fn dir_read(fs: &FileSystem, fd: &mut FileDescriptor, buf: &mut [u8]) -> isize {
    let entry = match fs.lookup_by_index(fd.fpos) {
        Ok(entry) => entry,
        Err(_) => return 0,
    };
    fd.fpos += 1;

    let name = entry.name_bytes();
    let mut count = 0;
    while count < buf.len() && count < name.len() {
        buf[count] = name[count];
        count += 1;
    }
    if count < buf.len() {
        buf[count] = 0;
        count += 1;
    }
    count as isize
}

/// Read dispatch for one open slot.
pub fn fd_read(fs: &FileSystem, fd: &mut FileDescriptor, buf: &mut [u8]) -> isize {
    match fd.kind {
        FileKind::Stdin => terminal::read(buf),
        FileKind::Stdout => KernelError::NotSupported.as_isize(),
        FileKind::Rtc => rtc::rtc_read(),
        FileKind::Dir => dir_read(fs, fd, buf),
        FileKind::File => match fs.read_data(fd.inode, fd.fpos, buf) {
            Ok(count) => {
                fd.fpos += count as u32;
                count as isize
            }
            Err(err) => err.as_isize(),
        },
    }
}

/// Write dispatch for one open slot.
pub fn fd_write(fd: &mut FileDescriptor, buf: &[u8]) -> isize {
    match fd.kind {
        FileKind::Stdout => terminal::write(buf),
        FileKind::Rtc => rtc::rtc_write(buf),
        // stdin, directories, and files have no write path
        _ => KernelError::NotSupported.as_isize(),
    }
}

/// Open-time hook for the capability set.
pub fn fd_open(kind: FileKind) {
    if kind == FileKind::Rtc {
        rtc::rtc_open();
    }
}

/// Close-time hook for the capability set.
pub fn fd_close(fd: &mut FileDescriptor) {
    if fd.kind == FileKind::Rtc {
        rtc::rtc_close();
    }
    *fd = FileDescriptor::closed();
}

/// Opens `name` in `table`, returning the allocated fd.
pub fn open_in_table(fs: &FileSystem, table: &mut FileTable, name: &[u8]) -> Result<usize> {
    let entry = fs.lookup_by_name(name)?;
    let kind = FileKind::for_file_type(entry.ftype)?;

    let slot = table[FIRST_USER_FD..]
        .iter()
        .position(|fd| !fd.is_open())
        .map(|i| i + FIRST_USER_FD)
        .ok_or(KernelError::Exhausted)?;

    table[slot] = FileDescriptor {
        kind,
        inode: if kind == FileKind::File { entry.inode } else { 0 },
        fpos: 0,
        flags: FD_IN_USE,
    };
    fd_open(kind);
    Ok(slot)
}

/// Closes `fd` in `table`.  Stdin/stdout and free slots refuse.
pub fn close_in_table(table: &mut FileTable, fd: usize) -> Result<()> {
    if !(FIRST_USER_FD..NUM_FILES).contains(&fd) {
        return Err(KernelError::NotSupported);
    }
    if !table[fd].is_open() {
        return Err(KernelError::BadArgument);
    }
    fd_close(&mut table[fd]);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::tests::build_image;
    use crate::fs::FileSystem;

    #[test]
    fn every_capability_set_has_an_operation() {
        for kind in [FileKind::Stdin, FileKind::Stdout, FileKind::Rtc, FileKind::Dir, FileKind::File]
        {
            assert!(kind.can_read() || kind.can_write());
        }
    }

    #[test]
    fn open_allocates_first_fit_from_slot_two() {
        let image = build_image(&[(b"a", TYPE_FILE, b"aa"), (b"b", TYPE_FILE, b"bb")]);
        let fs = FileSystem::new(&image).unwrap();
        let mut table = new_table();

        assert_eq!(open_in_table(&fs, &mut table, b"a").unwrap(), 2);
        assert_eq!(open_in_table(&fs, &mut table, b"b").unwrap(), 3);
        close_in_table(&mut table, 2).unwrap();
        // The freed slot is reused before higher ones.
        assert_eq!(open_in_table(&fs, &mut table, b"b").unwrap(), 2);
    }

    #[test]
    fn open_exhausts_at_six_user_slots() {
        let image = build_image(&[(b"a", TYPE_FILE, b"aa")]);
        let fs = FileSystem::new(&image).unwrap();
        let mut table = new_table();

        for _ in 0..NUM_FILES - FIRST_USER_FD {
            open_in_table(&fs, &mut table, b"a").unwrap();
        }
        assert_eq!(
            open_in_table(&fs, &mut table, b"a"),
            Err(KernelError::Exhausted)
        );
    }

    #[test]
    fn stdin_and_stdout_cannot_be_closed() {
        let mut table = new_table();
        assert_eq!(close_in_table(&mut table, 0), Err(KernelError::NotSupported));
        assert_eq!(close_in_table(&mut table, 1), Err(KernelError::NotSupported));
        assert_eq!(close_in_table(&mut table, 5), Err(KernelError::BadArgument));
        assert_eq!(close_in_table(&mut table, 9), Err(KernelError::NotSupported));
    }

    #[test]
    fn directory_reads_walk_the_entries_then_hit_eof() {
        let image = build_image(&[(b"hello", TYPE_FILE, b"..."), (b"world", TYPE_FILE, b"...")]);
        let fs = FileSystem::new(&image).unwrap();
        let mut table = new_table();
        let fd = open_in_table(&fs, &mut table, b".").unwrap();
        assert_eq!(table[fd].kind, FileKind::Dir);

        let mut buf = [0u8; 33];
        // ".", "hello", "world", then EOF.  Each count includes the NUL.
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 2);
        assert_eq!(&buf[..1], b".");
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 6);
        assert_eq!(&buf[..5], b"hello");
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 6);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 0);
    }

    #[test]
    fn file_reads_advance_the_position() {
        let image = build_image(&[(b"seq", TYPE_FILE, b"abcdefgh")]);
        let fs = FileSystem::new(&image).unwrap();
        let mut table = new_table();
        let fd = open_in_table(&fs, &mut table, b"seq").unwrap();

        let mut buf = [0u8; 3];
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 3);
        assert_eq!(&buf, b"abc");
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 2);
        assert_eq!(&buf[..2], b"gh");
        assert_eq!(fd_read(&fs, &mut table[fd], &mut buf), 0);
        // Files reject writes.
        assert_eq!(fd_write(&mut table[fd], b"nope"), -1);
    }
}
