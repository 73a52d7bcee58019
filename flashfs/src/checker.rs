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
use crate::log::LogCore;
use crate::types::ClusterHeader;
use crate::{bail, ensure};

/// Ground-truth totals recounted from the raw medium.
#[derive(Debug, Default, Clone)]
pub struct CheckStats {
    pub free_clusters: u32,
    pub allocated_clusters: u32,
    pub orphaned_clusters: u32,
    pub formatted_sectors: u32,
    pub files: usize,
    pub orphaned_per_sector: Vec<u32>,
}

/// Validates the mounted state against a full recount of the device.
///
/// Checks, in order: marker legality of every sector head, the three-way
/// cluster count partition, the per-sector orphan table, and that the set of
/// allocated clusters is exactly the union of all file block lists.
pub struct LogChecker<'a, IO: FlashIO> {
    core: &'a mut LogCore<IO>,
}

impl<'a, IO: FlashIO> LogChecker<'a, IO> {
    pub fn new(core: &'a mut LogCore<IO>) -> Self {
        Self { core }
    }

    pub fn check_all(&mut self) -> FsResult<CheckStats> {
        self.core.ensure_mounted()?;

        let meta = *self.core.meta();
        let mut stats = CheckStats {
            orphaned_per_sector: vec![0; meta.total_sectors as usize],
            ..CheckStats::default()
        };
        // cluster -> (obj_id, block_id, data_length) of every allocated cluster
        let mut allocated: BTreeMap<u16, (u16, u16, u16)> = BTreeMap::new();

        for cluster in 0..meta.total_clusters as u16 {
            let offset = meta.cluster_offset(cluster);
            let marker = self.core.io.read_u8_at(offset)?;
            let sector = meta.sector_of_cluster(cluster);
            let sector_head = cluster == meta.first_cluster_of_sector(sector);

            if sector_head {
                match marker {
                    MARKER_FORMATTED => stats.formatted_sectors += 1,
                    MARKER_ALLOCATED | MARKER_ORPHANED | MARKER_PENDING => {}
                    _ => bail!(FsError::Corrupted("illegal sector-head marker")),
                }
            }

            match marker {
                MARKER_ERASED | MARKER_FORMATTED => stats.free_clusters += 1,
                MARKER_ALLOCATED => {
                    let header: ClusterHeader = self.core.io.read_struct(offset)?;
                    let obj_id = header.obj_id;
                    let block_id = header.block_id;
                    let data_length = header.data_length;
                    ensure!(
                        (data_length as u32) <= meta.block_capacity(block_id),
                        FsError::Corrupted("allocated cluster with oversized payload")
                    );
                    allocated.insert(cluster, (obj_id, block_id, data_length));
                    stats.allocated_clusters += 1;
                }
                _ => {
                    stats.orphaned_clusters += 1;
                    stats.orphaned_per_sector[sector as usize] += 1;
                }
            }
        }

        ensure!(
            stats.free_clusters + stats.allocated_clusters + stats.orphaned_clusters
                == meta.total_clusters,
            FsError::Corrupted("cluster partition does not cover the device")
        );
        ensure!(
            stats.free_clusters == self.core.free_clusters(),
            FsError::Corrupted("free-cluster accounting diverged")
        );
        ensure!(
            stats.orphaned_clusters == self.core.orphaned_clusters(),
            FsError::Corrupted("orphan accounting diverged")
        );
        ensure!(
            stats.orphaned_per_sector == self.core.orphaned_per_sector(),
            FsError::Corrupted("per-sector orphan table diverged")
        );

        // The allocated set must be exactly ⋃ file.blocks, with matching ids
        // and sizes.
        let mut referenced = 0u32;
        for file in self.core.files.values() {
            let mut accumulated = 0u32;
            for (block_id, &cluster) in file.blocks.iter().enumerate() {
                let Some(&(obj_id, on_disk_block, data_length)) = allocated.get(&cluster) else {
                    bail!(FsError::Corrupted("file block points at a non-allocated cluster"));
                };
                ensure!(
                    obj_id == file.obj_id && on_disk_block == block_id as u16,
                    FsError::Corrupted("file block identity mismatch")
                );
                accumulated += data_length as u32;
                referenced += 1;
            }
            ensure!(
                accumulated == file.size,
                FsError::Corrupted("file size does not match its clusters")
            );
        }
        ensure!(
            referenced == stats.allocated_clusters,
            FsError::Corrupted("allocated cluster not referenced by any file")
        );

        stats.files = self.core.files.len();
        Ok(stats)
    }
}
