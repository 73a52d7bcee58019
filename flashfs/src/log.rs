// SPDX-License-Identifier: MIT
#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec;
#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::collections::BTreeMap;
#[cfg(feature = "std")]
use std::collections::BTreeMap;

use flashio::{FlashIO, FlashIOExt, FlashIOStructExt};

use crate::constant::*;
use crate::errors::*;
use crate::meta::LogMeta;
use crate::types::{ClusterBuffer, ClusterHeader};
use crate::{bail, ensure};

/// In-memory handle of one file: ordered block → cluster mapping plus the
/// accumulated size. Reconstructed from the medium at mount.
#[derive(Debug, Clone)]
pub struct FileRef {
    pub obj_id: u16,
    pub blocks: Vec<u16>,
    pub size: u32,
    pub open_count: u32,
}

/// Head/tail detection over one in-order pass of the cluster markers.
///
/// The log is a ring with at most one wrap point: the head is the first
/// in-use cluster of the active region, the tail the first free cluster
/// following it. A free hole after in-use data re-arms the head candidate
/// (the data before the hole is the wrapped tail end); in-use data after the
/// tail candidate re-arms the tail.
#[derive(Debug, Default)]
struct ScanState {
    head: Option<u32>,
    tail: Option<u32>,
    first_free: Option<u32>,
    head_stale: bool,
    tail_stale: bool,
}

impl ScanState {
    fn on_free(&mut self, cluster: u32) {
        if self.first_free.is_none() {
            self.first_free = Some(cluster);
        }
        if self.head.is_some() && self.tail.is_none() {
            self.tail = Some(cluster);
        } else if self.tail_stale {
            self.tail = Some(cluster);
            self.tail_stale = false;
        }
        if self.head.is_some() {
            self.head_stale = true;
        }
    }

    fn on_data(&mut self, cluster: u32) {
        if self.head.is_none() || self.head_stale {
            self.head = Some(cluster);
            self.head_stale = false;
        }
        if self.tail.is_some() {
            self.tail_stale = true;
        }
    }

    fn head_cluster(&self) -> u16 {
        self.head.unwrap_or(0) as u16
    }

    fn tail_cluster(&self) -> u16 {
        self.tail.or(self.first_free).unwrap_or(0) as u16
    }
}

/// Partially reconstructed file during the mount scan. Blocks may arrive in
/// any order and with holes; each slot records `(cluster, data_length)`.
#[derive(Debug, Default)]
struct ScanFile {
    blocks: Vec<Option<(u16, u16)>>,
}

/// The append-only log over a flash device: mount-time reconstruction,
/// tail allocation, the pending/allocated/orphaned marker protocol and
/// sector compaction.
pub struct LogCore<IO: FlashIO> {
    pub(crate) io: IO,
    pub(crate) meta: LogMeta,

    pub(crate) files: BTreeMap<u16, FileRef>,
    pub(crate) last_obj_id: u16,

    head_sector: u32,
    tail_cluster: u16,
    free_clusters: u32,
    orphaned_clusters: u32,
    orphaned_per_sector: Vec<u32>,

    mounted: bool,
    compacting: bool,

    /// Operation scratch: every public operation encodes/decodes through it.
    pub(crate) cluster_buf: ClusterBuffer,
    /// Migration scratch, so compaction triggered mid-operation cannot
    /// clobber the operation's own buffer.
    migrate_buf: ClusterBuffer,
}

impl<IO: FlashIO> LogCore<IO> {
    pub fn new(io: IO) -> FsResult<Self> {
        let meta = LogMeta::from_geometry(&io.geometry())?;
        let cluster_size = meta.cluster_size as usize;
        Ok(Self {
            io,
            meta,
            files: BTreeMap::new(),
            last_obj_id: 0,
            head_sector: 0,
            tail_cluster: 0,
            free_clusters: 0,
            orphaned_clusters: 0,
            orphaned_per_sector: vec![0; meta.total_sectors as usize],
            mounted: false,
            compacting: false,
            cluster_buf: ClusterBuffer::new(cluster_size),
            migrate_buf: ClusterBuffer::new(cluster_size),
        })
    }

    // === Accessors ===

    #[inline]
    pub fn meta(&self) -> &LogMeta {
        &self.meta
    }

    #[inline]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    #[inline]
    pub fn head_sector(&self) -> u32 {
        self.head_sector
    }

    #[inline]
    pub fn tail_cluster(&self) -> u16 {
        self.tail_cluster
    }

    #[inline]
    pub fn free_clusters(&self) -> u32 {
        self.free_clusters
    }

    #[inline]
    pub fn orphaned_clusters(&self) -> u32 {
        self.orphaned_clusters
    }

    #[inline]
    pub fn orphaned_per_sector(&self) -> &[u32] {
        &self.orphaned_per_sector
    }

    #[inline]
    pub(crate) fn ensure_mounted(&self) -> FsResult {
        ensure!(self.mounted, FsError::NotMounted);
        Ok(())
    }

    pub fn flush(&mut self) -> FsResult {
        self.io.flush()?;
        Ok(())
    }

    fn clear_state(&mut self) {
        self.files.clear();
        self.last_obj_id = 0;
        self.head_sector = 0;
        self.tail_cluster = 0;
        self.free_clusters = 0;
        self.orphaned_clusters = 0;
        self.orphaned_per_sector.fill(0);
        self.mounted = false;
        self.compacting = false;
    }

    // === Format / mount ===

    /// True when every sector-head marker belongs to a formatted log.
    pub fn check_if_formatted(&mut self) -> FsResult<bool> {
        for sector in 0..self.meta.total_sectors {
            let offset = self.meta.cluster_offset(self.meta.first_cluster_of_sector(sector));
            let marker = self.io.read_u8_at(offset)?;
            match marker {
                MARKER_FORMATTED | MARKER_ALLOCATED | MARKER_ORPHANED | MARKER_PENDING => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// Erases the chip and claims every sector for the log. Leaves the file
    /// system mounted and empty.
    pub fn format(&mut self) -> FsResult {
        ensure!(
            self.files.values().all(|f| f.open_count == 0),
            FsError::FileInUse
        );

        self.io.erase_chip()?;
        for sector in 0..self.meta.total_sectors {
            let offset = self.meta.cluster_offset(self.meta.first_cluster_of_sector(sector));
            self.io.write_u8_at(offset, MARKER_FORMATTED)?;
        }

        self.clear_state();
        self.free_clusters = self.meta.total_clusters;
        self.mounted = true;
        Ok(())
    }

    /// Reconstructs the in-memory state from the markers. Idempotent once
    /// mounted; on failure every partial result is dropped.
    pub fn mount(&mut self) -> FsResult {
        if self.mounted {
            return Ok(());
        }
        self.clear_state();
        match self.scan() {
            Ok(()) => {
                self.mounted = true;
                Ok(())
            }
            Err(e) => {
                self.clear_state();
                Err(e)
            }
        }
    }

    fn scan(&mut self) -> FsResult {
        let cps = self.meta.clusters_per_sector;
        let total = self.meta.total_clusters;

        let mut state = ScanState::default();
        let mut scan_files: BTreeMap<u16, ScanFile> = BTreeMap::new();
        let mut superseded: Vec<u16> = Vec::new();

        let mut cluster: u32 = 0;
        while cluster < total {
            let offset = self.meta.cluster_offset(cluster as u16);
            let marker = self.io.read_u8_at(offset)?;

            if cluster % cps == 0 {
                match marker {
                    // Freshly claimed sector: every cluster in it is free,
                    // skip the rest without reading.
                    MARKER_FORMATTED => {
                        self.free_clusters += cps;
                        state.on_free(cluster);
                        cluster += cps;
                        continue;
                    }
                    MARKER_ALLOCATED | MARKER_ORPHANED | MARKER_PENDING => {}
                    _ => bail!(FsError::NotFormatted),
                }
            }

            match marker {
                MARKER_ERASED | MARKER_FORMATTED => {
                    self.free_clusters += 1;
                    state.on_free(cluster);
                }
                MARKER_ALLOCATED => {
                    state.on_data(cluster);
                    if !self.scan_allocated(cluster as u16, &mut scan_files, &mut superseded)? {
                        self.count_orphan(cluster as u16);
                    }
                }
                // Orphaned, pending, or a marker program that lost power
                // mid-byte: all reclaimable.
                _ => {
                    state.on_data(cluster);
                    self.count_orphan(cluster as u16);
                }
            }
            cluster += 1;
        }

        // Install the reachable prefix of every file. Committed states only
        // ever carry a partial block as their last block, so anything after
        // the first short block (or after a hole) is an interrupted
        // operation's leftovers; a file without block 0 has no identity at
        // all. Such stragglers go back to the reclaim pool.
        let mut stragglers = superseded;
        for (obj_id, sf) in scan_files {
            let mut blocks: Vec<u16> = Vec::with_capacity(sf.blocks.len());
            let mut size = 0u32;
            let mut reachable = sf.blocks.first().is_some_and(|b| b.is_some());
            for (block_id, slot) in sf.blocks.into_iter().enumerate() {
                match slot {
                    Some((cluster, data_length)) if reachable => {
                        blocks.push(cluster);
                        size += data_length as u32;
                        if (data_length as u32) < self.meta.block_capacity(block_id as u16) {
                            reachable = false;
                        }
                    }
                    Some((cluster, _)) => stragglers.push(cluster),
                    None => reachable = false,
                }
            }
            if !blocks.is_empty() {
                self.files.insert(
                    obj_id,
                    FileRef {
                        obj_id,
                        blocks,
                        size,
                        open_count: 0,
                    },
                );
            }
        }
        for cid in stragglers {
            self.mark_orphaned(cid)?;
        }

        self.head_sector = state.head_cluster() as u32 / cps;
        self.tail_cluster = state.tail_cluster();
        Ok(())
    }

    /// Reads the header of an allocated cluster and records it into the scan
    /// index. Returns false when the header fails validation, in which case
    /// the cluster is treated as reclaimable instead.
    fn scan_allocated(
        &mut self,
        cluster: u16,
        scan_files: &mut BTreeMap<u16, ScanFile>,
        superseded: &mut Vec<u16>,
    ) -> FsResult<bool> {
        let header: ClusterHeader = self.io.read_struct(self.meta.cluster_offset(cluster))?;
        let obj_id = header.obj_id;
        let block_id = header.block_id;
        let data_length = header.data_length;

        if data_length as u32 > self.meta.block_capacity(block_id) {
            return Ok(false);
        }

        self.last_obj_id = self.last_obj_id.max(obj_id);

        let sf = scan_files.entry(obj_id).or_default();
        let slot = block_id as usize;
        if sf.blocks.len() <= slot {
            sf.blocks.resize(slot + 1, None);
        }
        if let Some((previous, _)) = sf.blocks[slot].replace((cluster, data_length)) {
            // Two committed copies of the same block: an interrupted
            // rewrite or migration left the older one behind. Last scanned
            // wins.
            superseded.push(previous);
        }
        Ok(true)
    }

    fn count_orphan(&mut self, cluster: u16) {
        self.orphaned_clusters += 1;
        self.orphaned_per_sector[self.meta.sector_of_cluster(cluster) as usize] += 1;
    }

    // === Append log ===

    /// Writes the operation buffer to the tail cluster and advances the
    /// tail. The buffer must carry a pending marker; the caller commits it
    /// with [`LogCore::mark_allocated`] once the referent bookkeeping is
    /// durable.
    pub(crate) fn append(&mut self) -> FsResult<u16> {
        debug_assert_eq!(self.cluster_buf.marker(), MARKER_PENDING);
        debug_assert!(self.cluster_buf.max_write() >= COMMON_HEADER_SIZE);

        if !self.compacting && self.free_clusters <= self.meta.min_free_clusters {
            self.partial_compact()?;
            ensure!(
                self.free_clusters > self.meta.min_free_clusters,
                FsError::DiskFull
            );
        }

        let cluster = self.tail_cluster;
        let offset = self.meta.cluster_offset(cluster);
        self.io.write_at(offset, self.cluster_buf.log_slice())?;
        self.tail_cluster = self.meta.next_cluster(cluster);
        self.free_clusters -= 1;
        Ok(cluster)
    }

    /// Commits a pending cluster.
    pub(crate) fn mark_allocated(&mut self, cluster: u16) -> FsResult {
        let offset = self.meta.cluster_offset(cluster);
        self.io.write_u8_at(offset, MARKER_ALLOCATED)?;
        Ok(())
    }

    /// Invalidates a superseded or deleted cluster.
    pub(crate) fn mark_orphaned(&mut self, cluster: u16) -> FsResult {
        let offset = self.meta.cluster_offset(cluster);
        self.io.write_u8_at(offset, MARKER_ORPHANED)?;
        self.count_orphan(cluster);
        Ok(())
    }

    /// Reads a whole cluster into the operation scratch buffer.
    pub(crate) fn load_cluster(&mut self, cluster: u16) -> FsResult {
        let offset = self.meta.cluster_offset(cluster);
        self.io.read_at(offset, self.cluster_buf.as_mut_slice())?;
        Ok(())
    }

    // === Compaction ===

    /// Picks the sector to reclaim next: the head sector whenever it holds
    /// orphans (keeps the log contiguous), otherwise the sector with the
    /// most orphans, excluding the tail's sector. Ties resolve toward the
    /// first encountered.
    fn sector_to_compact(&self) -> Option<u32> {
        if self.orphaned_per_sector[self.head_sector as usize] > 0 {
            return Some(self.head_sector);
        }
        let tail_sector = self.meta.sector_of_cluster(self.tail_cluster);
        let mut best: Option<(u32, u32)> = None;
        for (sector, &count) in self.orphaned_per_sector.iter().enumerate() {
            let sector = sector as u32;
            if sector == tail_sector || count == 0 {
                continue;
            }
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((sector, count));
            }
        }
        best.map(|(sector, _)| sector)
    }

    /// Moves every live cluster of `from_sector` to the write cursor
    /// `to_cluster`, then erases and re-claims the source sector.
    ///
    /// Live clusters are re-pointed in their FileRef; a copy whose file (or
    /// block slot) vanished is orphaned instead of resurrected. Reclaimed
    /// orphan/pending clusters move from the orphan pool to the free pool;
    /// migrated live clusters are accounting-neutral (the destination leaves
    /// the free pool, the erased source re-enters it).
    fn migrate_sector(&mut self, from_sector: u32, to_cluster: u16) -> FsResult {
        ensure!(
            self.meta.sector_of_cluster(to_cluster) != from_sector,
            FsError::Other("compaction source and destination overlap")
        );

        let cps = self.meta.clusters_per_sector;
        let started_at_tail = to_cluster == self.tail_cluster;
        let mut to = to_cluster;
        let mut freed: u32 = 0;

        let first = self.meta.first_cluster_of_sector(from_sector);
        for cluster in first..first + cps as u16 {
            let marker = self.io.read_u8_at(self.meta.cluster_offset(cluster))?;
            match marker {
                MARKER_ALLOCATED => {
                    self.io.read_at(
                        self.meta.cluster_offset(cluster),
                        self.migrate_buf.as_mut_slice(),
                    )?;
                    let block_id = self.migrate_buf.block_id();
                    let obj_id = self.migrate_buf.obj_id();
                    let length = self.meta.block_data_start(block_id)
                        + self.migrate_buf.data_length() as usize;
                    self.migrate_buf.set_max_write(length);

                    self.io
                        .write_at(self.meta.cluster_offset(to), self.migrate_buf.log_slice())?;

                    let repointed = {
                        let slot = self
                            .files
                            .get_mut(&obj_id)
                            .and_then(|f| f.blocks.get_mut(block_id as usize))
                            .filter(|slot| **slot == cluster);
                        match slot {
                            Some(slot) => {
                                *slot = to;
                                true
                            }
                            None => false,
                        }
                    };
                    if !repointed {
                        // The file vanished under the migration; the fresh
                        // copy is stale the moment it is written.
                        self.mark_orphaned(to)?;
                    }
                    to = self.meta.next_cluster(to);
                }
                MARKER_ERASED | MARKER_FORMATTED => {}
                _ => freed += 1,
            }
        }

        self.io.erase_sector(from_sector)?;
        self.io.write_u8_at(
            self.meta.cluster_offset(self.meta.first_cluster_of_sector(from_sector)),
            MARKER_FORMATTED,
        )?;

        self.orphaned_per_sector[from_sector as usize] = 0;
        self.free_clusters += freed;
        self.orphaned_clusters = self.orphaned_clusters.saturating_sub(freed);

        if started_at_tail {
            self.tail_cluster = to;
        }
        Ok(())
    }

    /// One compaction round: reclaim the best victim, then slide the head
    /// sector into the freed slot so erase wear spreads around the ring.
    /// Returns false when no further round is possible.
    fn compact_round(&mut self) -> FsResult<bool> {
        let Some(victim) = self.sector_to_compact() else {
            return Ok(false);
        };
        if self.meta.sector_of_cluster(self.tail_cluster) == victim {
            return Ok(false);
        }

        self.migrate_sector(victim, self.tail_cluster)?;
        if victim != self.head_sector {
            let slot = self.meta.first_cluster_of_sector(victim);
            self.migrate_sector(self.head_sector, slot)?;
        }
        self.head_sector = (self.head_sector + 1) % self.meta.total_sectors;
        Ok(true)
    }

    /// Reclaims every orphaned cluster the ring allows.
    pub fn compact(&mut self) -> FsResult {
        self.ensure_mounted()?;
        if self.compacting {
            return Ok(());
        }
        self.compacting = true;
        let result = (|| {
            while self.orphaned_clusters > 0 {
                if !self.compact_round()? {
                    break;
                }
            }
            Ok(())
        })();
        self.compacting = false;
        result
    }

    /// Lazy variant invoked from the append path: runs rounds only while
    /// the log is actually starved and a whole sector's worth of orphans
    /// exists to be reclaimed.
    fn partial_compact(&mut self) -> FsResult {
        if self.compacting {
            return Ok(());
        }
        self.compacting = true;
        let result = (|| {
            while self.free_clusters <= self.meta.min_free_clusters
                && self.orphaned_clusters >= self.meta.clusters_per_sector
            {
                if !self.compact_round()? {
                    break;
                }
            }
            Ok(())
        })();
        self.compacting = false;
        result
    }
}
