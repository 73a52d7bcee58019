// SPDX-License-Identifier: MIT
#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::string::String;
#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use flashio::FlashIO;

use crate::constant::*;
use crate::errors::*;
use crate::log::{FileRef, LogCore};
use crate::types::{ClusterHeader, FileClusterHeader};
use crate::utils::time_utils::now_unix;
use crate::{bail, ensure};

fn validate_name(name: &str) -> FsResult<&[u8]> {
    let bytes = name.as_bytes();
    ensure!(
        !bytes.is_empty(),
        FsError::ArgumentOutOfRange("empty file name")
    );
    ensure!(
        bytes.len() <= MAX_FILENAME_LENGTH,
        FsError::ArgumentOutOfRange("file name longer than 16 bytes")
    );
    Ok(bytes)
}

/// File operations over the append log.
///
/// Every mutation follows the same crash discipline: the replacement cluster
/// is appended and committed first, and only then is the superseded cluster
/// invalidated. Cluster ids taken from a FileRef are re-resolved after any
/// append, because the append path may compact and relocate them.
impl<IO: FlashIO> LogCore<IO> {
    pub(crate) fn file_ref(&self, obj_id: u16) -> FsResult<&FileRef> {
        self.files.get(&obj_id).ok_or(FsError::FileNotFound)
    }

    pub(crate) fn file_mut(&mut self, obj_id: u16) -> FsResult<&mut FileRef> {
        self.files.get_mut(&obj_id).ok_or(FsError::FileNotFound)
    }

    fn next_obj_id(&mut self) -> FsResult<u16> {
        self.last_obj_id = self
            .last_obj_id
            .checked_add(1)
            .ok_or(FsError::Other("object id space exhausted"))?;
        Ok(self.last_obj_id)
    }

    /// Reads the name region of a block-0 cluster straight from the device.
    fn read_name_region(&mut self, block0: u16) -> FsResult<([u8; MAX_FILENAME_LENGTH], usize)> {
        let mut raw = [0u8; 2 + MAX_FILENAME_LENGTH];
        let offset = self.meta.cluster_offset(block0) + FILENAME_LENGTH_OFFSET as u64;
        self.io.read_at(offset, &mut raw)?;

        let len = u16::from_le_bytes([raw[0], raw[1]]) as usize;
        let len = len.min(MAX_FILENAME_LENGTH);
        let mut name = [0u8; MAX_FILENAME_LENGTH];
        name[..len].copy_from_slice(&raw[2..2 + len]);
        Ok((name, len))
    }

    /// Name lookup. There is no name cache: each candidate's name is read
    /// from its block 0. Comparison is ASCII case-insensitive.
    pub(crate) fn find_file(&mut self, name: &str) -> FsResult<Option<u16>> {
        self.ensure_mounted()?;
        if name.is_empty() || name.len() > MAX_FILENAME_LENGTH {
            return Ok(None);
        }
        let candidates: Vec<(u16, u16)> = self
            .files
            .values()
            .map(|f| (f.obj_id, f.blocks[0]))
            .collect();
        for (obj_id, block0) in candidates {
            let (raw, len) = self.read_name_region(block0)?;
            if raw[..len].eq_ignore_ascii_case(name.as_bytes()) {
                return Ok(Some(obj_id));
            }
        }
        Ok(None)
    }

    /// Creates an empty file, replacing any same-named one.
    pub(crate) fn create_file(&mut self, name: &str) -> FsResult<u16> {
        self.ensure_mounted()?;
        let bytes = validate_name(name)?;
        if let Some(existing) = self.find_file(name)? {
            self.delete_file(existing)?;
        }

        let obj_id = self.next_obj_id()?;
        self.cluster_buf.reset();
        self.cluster_buf.set_file_header(&FileClusterHeader::new(
            MARKER_PENDING,
            obj_id,
            bytes,
            now_unix(),
        ));
        self.cluster_buf.set_max_write(FILE_CLUSTER_HEADER_SIZE);

        let cluster = self.append()?;
        self.mark_allocated(cluster)?;
        self.files.insert(
            obj_id,
            FileRef {
                obj_id,
                blocks: [cluster].into(),
                size: 0,
                open_count: 0,
            },
        );
        Ok(obj_id)
    }

    pub(crate) fn delete_file(&mut self, obj_id: u16) -> FsResult {
        self.ensure_mounted()?;
        ensure!(self.file_ref(obj_id)?.open_count == 0, FsError::FileInUse);
        if let Some(f) = self.files.remove(&obj_id) {
            for cluster in f.blocks {
                self.mark_orphaned(cluster)?;
            }
        }
        Ok(())
    }

    /// Positional read. Reading at or past the end returns 0 bytes.
    pub(crate) fn read_file_at(
        &mut self,
        obj_id: u16,
        position: u32,
        buf: &mut [u8],
    ) -> FsResult<usize> {
        self.ensure_mounted()?;
        let size = self.file_ref(obj_id)?.size;
        if position >= size {
            return Ok(0);
        }

        let mut remaining = (buf.len() as u64).min((size - position) as u64) as usize;
        let (mut block_id, mut block_offset) = self.meta.locate(position);
        let mut copied = 0usize;

        while remaining > 0 {
            let blocks = &self.file_ref(obj_id)?.blocks;
            if block_id as usize >= blocks.len() {
                break;
            }
            let cluster = blocks[block_id as usize];
            self.load_cluster(cluster)?;

            let data_length = self.cluster_buf.data_length() as u32;
            if block_offset >= data_length {
                break;
            }
            let n = remaining.min((data_length - block_offset) as usize);
            let start = self.meta.block_data_start(block_id) + block_offset as usize;
            buf[copied..copied + n].copy_from_slice(&self.cluster_buf.as_slice()[start..start + n]);

            copied += n;
            remaining -= n;
            block_offset = 0;
            block_id += 1;
        }
        Ok(copied)
    }

    /// Positional write. Holes are disallowed: `position` may be at most the
    /// current size. Each touched block is rewritten copy-on-write.
    pub(crate) fn write_file_at(&mut self, obj_id: u16, position: u32, data: &[u8]) -> FsResult {
        self.ensure_mounted()?;
        let size = self.file_ref(obj_id)?.size;
        ensure!(position <= size, FsError::WritePastEnd);

        let mut pos = position;
        let mut remaining = data;
        while !remaining.is_empty() {
            let (block_id, block_offset) = self.meta.locate(pos);
            let capacity = self.meta.block_capacity(block_id);
            let chunk = remaining.len().min((capacity - block_offset) as usize);
            let data_start = self.meta.block_data_start(block_id);

            if (block_id as usize) < self.file_ref(obj_id)?.blocks.len() {
                let old = self.file_ref(obj_id)?.blocks[block_id as usize];
                self.load_cluster(old)?;

                let current = self.cluster_buf.data_length() as u32;
                let new_length = current.max(block_offset + chunk as u32);
                self.cluster_buf.set_marker(MARKER_PENDING);
                self.cluster_buf.set_data_length(new_length as u16);
                let at = data_start + block_offset as usize;
                self.cluster_buf.as_mut_slice()[at..at + chunk]
                    .copy_from_slice(&remaining[..chunk]);
                self.cluster_buf.set_max_write(data_start + new_length as usize);

                let new = self.append()?;
                self.mark_allocated(new)?;
                let old = self.file_ref(obj_id)?.blocks[block_id as usize];
                self.mark_orphaned(old)?;

                let f = self.file_mut(obj_id)?;
                f.blocks[block_id as usize] = new;
                f.size += new_length - current;
            } else {
                debug_assert_eq!(block_offset, 0);
                self.cluster_buf.reset();
                self.cluster_buf.set_header(&ClusterHeader::new(
                    MARKER_PENDING,
                    obj_id,
                    block_id,
                    chunk as u16,
                ));
                self.cluster_buf.as_mut_slice()[data_start..data_start + chunk]
                    .copy_from_slice(&remaining[..chunk]);
                self.cluster_buf.set_max_write(data_start + chunk);

                let new = self.append()?;
                self.mark_allocated(new)?;

                let f = self.file_mut(obj_id)?;
                f.blocks.push(new);
                f.size += chunk as u32;
            }

            pos += chunk as u32;
            remaining = &remaining[chunk..];
        }
        Ok(())
    }

    /// Shrinks the file to `position` bytes. Truncating to the current size
    /// is a no-op; growing is rejected.
    pub(crate) fn truncate_file(&mut self, obj_id: u16, position: u32) -> FsResult {
        self.ensure_mounted()?;
        let size = self.file_ref(obj_id)?.size;
        ensure!(position <= size, FsError::WritePastEnd);
        if position == size {
            return Ok(());
        }

        let (block_id, block_offset) = self.meta.locate(position);
        let mut first_removed = block_id;

        // Block 0 always survives (it carries the name); a mid-block cut
        // rewrites the split block with the shortened length.
        if block_offset > 0 || block_id == 0 {
            let old = self.file_ref(obj_id)?.blocks[block_id as usize];
            self.load_cluster(old)?;
            self.cluster_buf.set_marker(MARKER_PENDING);
            self.cluster_buf.set_data_length(block_offset as u16);
            self.cluster_buf
                .set_max_write(self.meta.block_data_start(block_id) + block_offset as usize);

            let new = self.append()?;
            self.mark_allocated(new)?;
            let old = self.file_ref(obj_id)?.blocks[block_id as usize];
            self.mark_orphaned(old)?;
            self.file_mut(obj_id)?.blocks[block_id as usize] = new;
            first_removed = block_id + 1;
        }

        let doomed: Vec<u16> = self.file_ref(obj_id)?.blocks[first_removed as usize..].to_vec();
        for cluster in doomed {
            self.mark_orphaned(cluster)?;
        }
        let f = self.file_mut(obj_id)?;
        f.blocks.truncate(first_removed as usize);
        f.size = position;
        Ok(())
    }

    /// Renames a file by rewriting its block 0 with the new name.
    pub(crate) fn rename_file(&mut self, src: &str, dst: &str) -> FsResult {
        self.ensure_mounted()?;
        let dst_bytes = validate_name(dst)?;
        ensure!(self.find_file(dst)?.is_none(), FsError::PathAlreadyExists);
        let Some(obj_id) = self.find_file(src)? else {
            bail!(FsError::FileNotFound);
        };

        let block0 = self.file_ref(obj_id)?.blocks[0];
        self.load_cluster(block0)?;
        self.cluster_buf.set_marker(MARKER_PENDING);
        self.cluster_buf.set_name(dst_bytes);
        self.cluster_buf
            .set_max_write(FILE_CLUSTER_HEADER_SIZE + self.cluster_buf.data_length() as usize);

        let new = self.append()?;
        self.mark_allocated(new)?;
        let old = self.file_ref(obj_id)?.blocks[0];
        self.mark_orphaned(old)?;
        self.file_mut(obj_id)?.blocks[0] = new;
        Ok(())
    }

    /// Copies `src` to `dst` under a fresh object id, block by block.
    pub(crate) fn copy_file(&mut self, src: &str, dst: &str, overwrite: bool) -> FsResult {
        self.ensure_mounted()?;
        let dst_bytes = validate_name(dst)?;
        let Some(src_obj) = self.find_file(src)? else {
            bail!(FsError::FileNotFound);
        };
        if let Some(existing) = self.find_file(dst)? {
            ensure!(overwrite, FsError::PathAlreadyExists);
            // Overwriting deletes the destination first; a self-copy would
            // delete the source with it.
            ensure!(existing != src_obj, FsError::PathAlreadyExists);
            self.delete_file(existing)?;
        }

        let new_obj = self.next_obj_id()?;
        // The ref is registered up front and grown block by block, so a
        // compaction triggered by one of the appends can relocate the blocks
        // copied so far.
        self.files.insert(
            new_obj,
            FileRef {
                obj_id: new_obj,
                blocks: Vec::new(),
                size: 0,
                open_count: 0,
            },
        );

        let created = now_unix();
        let block_count = self.file_ref(src_obj)?.blocks.len();
        let result = self.copy_blocks(src_obj, new_obj, block_count, dst_bytes, created);
        if result.is_err() {
            // Drop the partial destination; the original error wins.
            let _ = self.delete_file(new_obj);
        }
        result
    }

    fn copy_blocks(
        &mut self,
        src_obj: u16,
        new_obj: u16,
        block_count: usize,
        dst_name: &[u8],
        created: u64,
    ) -> FsResult {
        for block in 0..block_count {
            let src_cluster = self.file_ref(src_obj)?.blocks[block];
            self.load_cluster(src_cluster)?;

            self.cluster_buf.set_marker(MARKER_PENDING);
            self.cluster_buf.set_obj_id(new_obj);
            if block == 0 {
                self.cluster_buf.set_name(dst_name);
                self.cluster_buf.set_created(created);
            }
            let data_length = self.cluster_buf.data_length() as usize;
            self.cluster_buf
                .set_max_write(self.meta.block_data_start(block as u16) + data_length);

            let cluster = self.append()?;
            self.mark_allocated(cluster)?;

            let f = self.file_mut(new_obj)?;
            f.blocks.push(cluster);
            f.size += data_length as u32;
        }
        Ok(())
    }

    /// Sorted list of all file names.
    pub(crate) fn file_names(&mut self) -> FsResult<Vec<String>> {
        self.ensure_mounted()?;
        let block0s: Vec<u16> = self.files.values().map(|f| f.blocks[0]).collect();
        let mut names = Vec::with_capacity(block0s.len());
        for block0 in block0s {
            let (raw, len) = self.read_name_region(block0)?;
            names.push(String::from_utf8_lossy(&raw[..len]).into_owned());
        }
        names.sort();
        Ok(names)
    }

    /// Creation timestamp (UNIX seconds) read from block 0.
    pub(crate) fn creation_time(&mut self, obj_id: u16) -> FsResult<u64> {
        self.ensure_mounted()?;
        let block0 = self.file_ref(obj_id)?.blocks[0];
        let mut raw = [0u8; 8];
        let offset = self.meta.cluster_offset(block0) + CREATED_OFFSET as u64;
        self.io.read_at(offset, &mut raw)?;
        Ok(u64::from_le_bytes(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashio::prelude::*;

    const GEO: FlashGeometry = FlashGeometry {
        device_size: 64 * 1024,
        sector_size: 4096,
        cluster_size: 512,
    };

    fn core(img: &mut [u8]) -> LogCore<MemFlashIO<'_>> {
        let mut core = LogCore::new(MemFlashIO::new_erased(img, GEO)).unwrap();
        core.format().unwrap();
        core
    }

    #[test]
    fn test_create_find_delete() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        let obj = c.create_file("boot.cfg").unwrap();
        assert_eq!(c.find_file("boot.cfg").unwrap(), Some(obj));
        assert_eq!(c.find_file("BOOT.CFG").unwrap(), Some(obj), "lookup is case-insensitive");
        assert_eq!(c.find_file("other").unwrap(), None);

        c.delete_file(obj).unwrap();
        assert_eq!(c.find_file("boot.cfg").unwrap(), None);
        assert_eq!(c.orphaned_clusters(), 1);
    }

    #[test]
    fn test_create_replaces_same_name() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        let first = c.create_file("a").unwrap();
        c.write_file_at(first, 0, b"old contents").unwrap();
        let second = c.create_file("A").unwrap();

        assert_ne!(first, second);
        assert_eq!(c.find_file("a").unwrap(), Some(second));
        assert_eq!(c.file_ref(second).unwrap().size, 0);
    }

    #[test]
    fn test_name_validation() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        assert!(matches!(
            c.create_file("seventeen-chars-x"),
            Err(FsError::ArgumentOutOfRange(_))
        ));
        assert!(matches!(
            c.create_file(""),
            Err(FsError::ArgumentOutOfRange(_))
        ));
        c.create_file("sixteen-chars-xx").unwrap();
    }

    #[test]
    fn test_write_read_across_blocks() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);
        let f = c.meta().file_cluster_capacity as usize;
        let d = c.meta().data_cluster_capacity as usize;

        let obj = c.create_file("big").unwrap();
        let payload: Vec<u8> = (0..(f + d + 100)).map(|i| (i % 251) as u8).collect();
        c.write_file_at(obj, 0, &payload).unwrap();

        assert_eq!(c.file_ref(obj).unwrap().size as usize, payload.len());
        assert_eq!(c.file_ref(obj).unwrap().blocks.len(), 3);

        let mut back = vec![0u8; payload.len() + 32];
        let n = c.read_file_at(obj, 0, &mut back).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(&back[..n], &payload[..]);

        // Unaligned positional read across the block-0 boundary.
        let mut mid = vec![0u8; 64];
        let n = c.read_file_at(obj, (f - 10) as u32, &mut mid).unwrap();
        assert_eq!(n, 64);
        assert_eq!(&mid[..], &payload[f - 10..f + 54]);
    }

    #[test]
    fn test_overwrite_middle_keeps_rest() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        let obj = c.create_file("notes").unwrap();
        c.write_file_at(obj, 0, b"hello world").unwrap();
        c.write_file_at(obj, 6, b"flash").unwrap();

        let mut back = [0u8; 16];
        let n = c.read_file_at(obj, 0, &mut back).unwrap();
        assert_eq!(&back[..n], b"hello flash");
        assert_eq!(c.file_ref(obj).unwrap().size, 11);
    }

    #[test]
    fn test_write_past_end_rejected() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        let obj = c.create_file("f").unwrap();
        assert_eq!(
            c.write_file_at(obj, 1, b"x"),
            Err(FsError::WritePastEnd),
            "holes are disallowed"
        );
        c.write_file_at(obj, 0, b"ab").unwrap();
        c.write_file_at(obj, 2, b"cd").unwrap();
        assert_eq!(c.file_ref(obj).unwrap().size, 4);
    }

    #[test]
    fn test_truncate_mid_block_and_boundary() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);
        let f = c.meta().file_cluster_capacity;
        let d = c.meta().data_cluster_capacity;

        let obj = c.create_file("t").unwrap();
        let payload: Vec<u8> = (0..(f + 2 * d) as usize).map(|i| i as u8).collect();
        c.write_file_at(obj, 0, &payload).unwrap();
        assert_eq!(c.file_ref(obj).unwrap().blocks.len(), 3);

        // Truncate inside block 1: block 2 goes away, block 1 is split.
        c.truncate_file(obj, f + 10).unwrap();
        assert_eq!(c.file_ref(obj).unwrap().size, f + 10);
        assert_eq!(c.file_ref(obj).unwrap().blocks.len(), 2);

        let mut back = vec![0u8; (f + 64) as usize];
        let n = c.read_file_at(obj, 0, &mut back).unwrap();
        assert_eq!(n as u32, f + 10);
        assert_eq!(&back[..n], &payload[..n]);

        // Truncate to the exact end is a no-op.
        let orphans = c.orphaned_clusters();
        c.truncate_file(obj, f + 10).unwrap();
        assert_eq!(c.orphaned_clusters(), orphans);

        // Truncate to zero keeps block 0 only.
        c.truncate_file(obj, 0).unwrap();
        assert_eq!(c.file_ref(obj).unwrap().size, 0);
        assert_eq!(c.file_ref(obj).unwrap().blocks.len(), 1);

        assert_eq!(c.truncate_file(obj, 1), Err(FsError::WritePastEnd));
    }

    #[test]
    fn test_rename_keeps_contents_and_timestamp() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        let obj = c.create_file("old.txt").unwrap();
        c.write_file_at(obj, 0, b"payload").unwrap();
        let created = c.creation_time(obj).unwrap();

        c.rename_file("old.txt", "new.txt").unwrap();
        assert_eq!(c.find_file("old.txt").unwrap(), None);
        assert_eq!(c.find_file("new.txt").unwrap(), Some(obj));
        assert_eq!(c.creation_time(obj).unwrap(), created);

        let mut back = [0u8; 8];
        let n = c.read_file_at(obj, 0, &mut back).unwrap();
        assert_eq!(&back[..n], b"payload");

        let other = c.create_file("taken").unwrap();
        let _ = other;
        assert_eq!(
            c.rename_file("new.txt", "TAKEN"),
            Err(FsError::PathAlreadyExists)
        );
        assert_eq!(c.rename_file("ghost", "x"), Err(FsError::FileNotFound));
    }

    #[test]
    fn test_copy_semantics() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        let src = c.create_file("src").unwrap();
        let payload: Vec<u8> = (0..900).map(|i| (i * 7 % 256) as u8).collect();
        c.write_file_at(src, 0, &payload).unwrap();

        c.create_file("dst").unwrap();
        assert_eq!(
            c.copy_file("src", "dst", false),
            Err(FsError::PathAlreadyExists)
        );

        c.copy_file("src", "dst", true).unwrap();
        let dst = c.find_file("dst").unwrap().unwrap();
        assert_ne!(dst, src);

        let mut back = vec![0u8; payload.len()];
        let n = c.read_file_at(dst, 0, &mut back).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(back, payload);

        // Source is untouched.
        let n = c.read_file_at(src, 0, &mut back).unwrap();
        assert_eq!(n, payload.len());
        assert_eq!(back, payload);

        assert_eq!(
            c.copy_file("src", "SRC", true),
            Err(FsError::PathAlreadyExists),
            "self-copy is rejected"
        );
    }

    #[test]
    fn test_file_names_sorted() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = core(&mut img);

        for name in ["zeta", "alpha", "mid"] {
            c.create_file(name).unwrap();
        }
        assert_eq!(c.file_names().unwrap(), vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_not_mounted_guard() {
        let mut img = vec![0u8; GEO.device_size as usize];
        let mut c = LogCore::new(MemFlashIO::new_erased(&mut img, GEO)).unwrap();
        assert_eq!(c.create_file("x"), Err(FsError::NotMounted));
        assert_eq!(c.find_file("x"), Err(FsError::NotMounted));
        assert_eq!(c.file_names(), Err(FsError::NotMounted));
    }
}
