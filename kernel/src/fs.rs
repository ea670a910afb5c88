//! Read-only flat filesystem
//!
//! The boot loader hands the kernel a single in-memory image: block 0 is
//! the boot block (entry counts plus up to 63 directory entries), the next
//! `num_inodes` blocks are inodes, and everything after is data.  All
//! blocks are 4096 bytes and all integers little-endian.
//!
//! The filesystem borrows the image and never writes it; reads translate a
//! byte offset through the inode's block list.

use crate::error::{KernelError, Result};

pub const BLOCK_SIZE: usize = 4096;
pub const NAME_LEN: usize = 32;
pub const MAX_DENTRIES: usize = 63;

/// Directory entry file types.
pub const TYPE_RTC: u32 = 0;
pub const TYPE_DIR: u32 = 1;
pub const TYPE_FILE: u32 = 2;

const DENTRY_SIZE: usize = 64;
const DENTRIES_OFFSET: usize = 64;
const INODE_BLOCK_LIST_OFFSET: usize = 4;

/// A decoded directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; NAME_LEN],
    pub ftype: u32,
    pub inode: u32,
}

impl DirEntry {
    /// Length of the stored name: bytes before the first NUL, or the full
    /// 32 when no NUL appears.
    pub fn name_len(&self) -> usize {
        self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN)
    }

    pub fn name_bytes(&self) -> &[u8] {
        &self.name[..self.name_len()]
    }
}

/// A read-only view over one filesystem image.
pub struct FileSystem<'a> {
    image: &'a [u8],
    num_dentries: u32,
    num_inodes: u32,
    num_data_blocks: u32,
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    let raw = bytes
        .get(offset..offset + 4)
        .ok_or(KernelError::OutOfRange)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

impl<'a> FileSystem<'a> {
    /// Parses the boot block.  The image must hold at least one block.
    pub fn new(image: &'a [u8]) -> Result<Self> {
        if image.len() < BLOCK_SIZE {
            return Err(KernelError::BadArgument);
        }
        let num_dentries = read_u32(image, 0)?;
        let num_inodes = read_u32(image, 4)?;
        let num_data_blocks = read_u32(image, 8)?;
        if num_dentries as usize > MAX_DENTRIES {
            return Err(KernelError::BadArgument);
        }
        Ok(Self { image, num_dentries, num_inodes, num_data_blocks })
    }

    pub fn num_dentries(&self) -> u32 {
        self.num_dentries
    }

    pub fn num_inodes(&self) -> u32 {
        self.num_inodes
    }

    pub fn num_data_blocks(&self) -> u32 {
        self.num_data_blocks
    }

    fn dentry_at(&self, index: usize) -> Result<DirEntry> {
        let base = DENTRIES_OFFSET + index * DENTRY_SIZE;
        let raw = self
            .image
            .get(base..base + DENTRY_SIZE)
            .ok_or(KernelError::OutOfRange)?;
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&raw[..NAME_LEN]);
        Ok(DirEntry {
            name,
            ftype: read_u32(raw, NAME_LEN)?,
            inode: read_u32(raw, NAME_LEN + 4)?,
        })
    }

    /// Finds the directory entry whose name matches `name` exactly.
    ///
    /// Both lengths clamp to 32 bytes; a name that fills all 32 bytes has
    /// no terminating NUL on disk and still matches a 32-byte query.
    /// Empty or oversize queries never match.
    pub fn lookup_by_name(&self, name: &[u8]) -> Result<DirEntry> {
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(KernelError::NotFound);
        }
        for i in 0..self.num_dentries as usize {
            let entry = self.dentry_at(i)?;
            if entry.name_bytes() == name {
                return Ok(entry);
            }
        }
        Err(KernelError::NotFound)
    }

    /// Returns directory entry `index`, bounds-checked against the entry
    /// count.
    pub fn lookup_by_index(&self, index: u32) -> Result<DirEntry> {
        if index >= self.num_dentries {
            return Err(KernelError::OutOfRange);
        }
        self.dentry_at(index as usize)
    }

    fn inode_offset(&self, inode: u32) -> usize {
        (inode as usize + 1) * BLOCK_SIZE
    }

    /// Length in bytes of the file behind `inode`.
    pub fn inode_len(&self, inode: u32) -> Result<u32> {
        if inode > self.num_inodes {
            return Err(KernelError::OutOfRange);
        }
        read_u32(self.image, self.inode_offset(inode))
    }

    /// Reads up to `dst.len()` bytes of the file behind `inode`, starting
    /// at byte `offset`.  Returns the number of bytes copied: 0 at or past
    /// end of file, otherwise `min(dst.len(), file_len - offset)`.
    pub fn read_data(&self, inode: u32, offset: u32, dst: &mut [u8]) -> Result<usize> {
        if inode > self.num_inodes {
            return Err(KernelError::OutOfRange);
        }
        let inode_base = self.inode_offset(inode);
        let file_len = read_u32(self.image, inode_base)?;
        if offset >= file_len {
            return Ok(0);
        }

        let data_base = (self.num_inodes as usize + 1) * BLOCK_SIZE;
        let count = dst.len().min((file_len - offset) as usize);

        for i in 0..count {
            let pos = offset as usize + i;
            let block_slot = inode_base + INODE_BLOCK_LIST_OFFSET + (pos / BLOCK_SIZE) * 4;
            let block = read_u32(self.image, block_slot)? as usize;
            let src = data_base + block * BLOCK_SIZE + pos % BLOCK_SIZE;
            dst[i] = *self.image.get(src).ok_or(KernelError::OutOfRange)?;
        }
        Ok(count)
    }
}

/// The mounted boot image.
static FILESYSTEM: spin::Once<FileSystem<'static>> = spin::Once::new();

/// Mounts the boot module as the filesystem.
pub fn init(image: &'static [u8]) -> Result<()> {
    let fs = FileSystem::new(image)?;
    crate::log!(
        "filesystem: {} entries, {} inodes, {} data blocks",
        fs.num_dentries(),
        fs.num_inodes(),
        fs.num_data_blocks()
    );
    FILESYSTEM.call_once(|| fs);
    Ok(())
}

/// The mounted filesystem.  Panics before `init`, which cannot happen
/// after boot completes.
pub fn get() -> &'static FileSystem<'static> {
    FILESYSTEM.get().expect("filesystem not mounted")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds a synthetic image: one directory plus the given files, each
    /// with content spanning as many data blocks as needed.
    pub(crate) fn build_image(files: &[(&[u8], u32, &[u8])]) -> std::vec::Vec<u8> {
        let num_inodes = files.len() as u32;
        let total_data_blocks: usize = files
            .iter()
            .map(|(_, _, data)| data.len().div_ceil(BLOCK_SIZE).max(1))
            .sum();

        let blocks = 1 + num_inodes as usize + total_data_blocks;
        let mut image = vec![0u8; blocks * BLOCK_SIZE];

        image[0..4].copy_from_slice(&(files.len() as u32 + 1).to_le_bytes());
        image[4..8].copy_from_slice(&num_inodes.to_le_bytes());
        image[8..12].copy_from_slice(&(total_data_blocks as u32).to_le_bytes());

        // Entry 0 is the directory itself.
        let dir = &mut image[DENTRIES_OFFSET..DENTRIES_OFFSET + DENTRY_SIZE];
        dir[..1].copy_from_slice(b".");
        dir[NAME_LEN..NAME_LEN + 4].copy_from_slice(&TYPE_DIR.to_le_bytes());

        let mut next_block = 0u32;
        for (i, (name, ftype, data)) in files.iter().enumerate() {
            let base = DENTRIES_OFFSET + (i + 1) * DENTRY_SIZE;
            image[base..base + name.len()].copy_from_slice(name);
            image[base + NAME_LEN..base + NAME_LEN + 4].copy_from_slice(&ftype.to_le_bytes());
            image[base + NAME_LEN + 4..base + NAME_LEN + 8]
                .copy_from_slice(&(i as u32).to_le_bytes());

            let inode_base = (i + 1) * BLOCK_SIZE;
            image[inode_base..inode_base + 4].copy_from_slice(&(data.len() as u32).to_le_bytes());

            let data_base = (1 + num_inodes as usize) * BLOCK_SIZE;
            for (chunk_idx, chunk) in data.chunks(BLOCK_SIZE).enumerate() {
                let slot = inode_base + INODE_BLOCK_LIST_OFFSET + chunk_idx * 4;
                image[slot..slot + 4].copy_from_slice(&next_block.to_le_bytes());
                let dst = data_base + next_block as usize * BLOCK_SIZE;
                image[dst..dst + chunk.len()].copy_from_slice(chunk);
                next_block += 1;
            }
            if data.is_empty() {
                next_block += 1;
            }
        }

        image
    }

    #[test]
    fn lookup_by_name_matches_exact_names() {
        let image = build_image(&[
            (b"frame0.txt", TYPE_FILE, b"fishy contents"),
            (b"rtc", TYPE_RTC, b""),
        ]);
        let fs = FileSystem::new(&image).unwrap();

        let entry = fs.lookup_by_name(b"frame0.txt").unwrap();
        assert_eq!(entry.ftype, TYPE_FILE);
        assert_eq!(entry.inode, 0);

        assert_eq!(fs.lookup_by_name(b"rtc").unwrap().ftype, TYPE_RTC);
        // Prefixes are not matches.
        assert_eq!(fs.lookup_by_name(b"frame0"), Err(KernelError::NotFound));
        assert_eq!(fs.lookup_by_name(b""), Err(KernelError::NotFound));
    }

    #[test]
    fn thirty_two_byte_names_have_no_nul_and_still_match() {
        let long = [b'x'; NAME_LEN];
        let image = build_image(&[(&long, TYPE_FILE, b"data")]);
        let fs = FileSystem::new(&image).unwrap();

        let entry = fs.lookup_by_name(&long).unwrap();
        assert_eq!(entry.name_len(), NAME_LEN);
        // 33 bytes is oversize, never a match.
        let oversize = [b'x'; NAME_LEN + 1];
        assert_eq!(fs.lookup_by_name(&oversize), Err(KernelError::NotFound));
    }

    #[test]
    fn lookup_by_index_is_bounds_checked() {
        let image = build_image(&[(b"a", TYPE_FILE, b"1")]);
        let fs = FileSystem::new(&image).unwrap();
        assert_eq!(fs.num_dentries(), 2);
        assert!(fs.lookup_by_index(0).is_ok());
        assert!(fs.lookup_by_index(1).is_ok());
        assert_eq!(fs.lookup_by_index(2), Err(KernelError::OutOfRange));
    }

    #[test]
    fn read_data_round_trips_across_block_boundaries() {
        let mut content = std::vec::Vec::new();
        for i in 0..(BLOCK_SIZE * 2 + 100) {
            content.push((i % 251) as u8);
        }
        let image = build_image(&[(b"big", TYPE_FILE, &content)]);
        let fs = FileSystem::new(&image).unwrap();
        let entry = fs.lookup_by_name(b"big").unwrap();

        // Whole file.
        let mut buf = vec![0u8; content.len()];
        assert_eq!(fs.read_data(entry.inode, 0, &mut buf).unwrap(), content.len());
        assert_eq!(buf, content);

        // A window straddling the first block boundary.
        let mut window = [0u8; 64];
        let offset = BLOCK_SIZE - 32;
        assert_eq!(fs.read_data(entry.inode, offset as u32, &mut window).unwrap(), 64);
        assert_eq!(&window[..], &content[offset..offset + 64]);
    }

    #[test]
    fn read_data_clamps_at_end_of_file() {
        let image = build_image(&[(b"tiny", TYPE_FILE, b"hello")]);
        let fs = FileSystem::new(&image).unwrap();
        let entry = fs.lookup_by_name(b"tiny").unwrap();

        let mut buf = [0u8; 16];
        // Reads past the end return 0.
        assert_eq!(fs.read_data(entry.inode, 5, &mut buf).unwrap(), 0);
        assert_eq!(fs.read_data(entry.inode, 99, &mut buf).unwrap(), 0);
        // A long read is clamped to the remaining bytes.
        assert_eq!(fs.read_data(entry.inode, 2, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"llo");
        // Bad inode index.
        assert_eq!(
            fs.read_data(99, 0, &mut buf),
            Err(KernelError::OutOfRange)
        );
    }
}
