use std::fs::File;

use flashfs::constant::*;
use flashio::prelude::*;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        println!(
            "Usage: {} <image_file> [sector_size] [cluster_size]",
            args[0]
        );
        return;
    }

    let image_path = &args[1];
    let sector_size: u32 = args
        .get(2)
        .map(|s| s.parse().expect("invalid sector size"))
        .unwrap_or(4096);
    let cluster_size: u32 = args
        .get(3)
        .map(|s| s.parse().expect("invalid cluster size"))
        .unwrap_or(512);

    let file = File::open(image_path).expect("Failed to open image file");
    let device_size = file.metadata().expect("Failed to stat image").len();

    let geo = FlashGeometry::new(device_size, sector_size, cluster_size);
    if !geo.is_valid() {
        println!(
            "Invalid geometry: device {} / sector {} / cluster {}",
            device_size, sector_size, cluster_size
        );
        return;
    }

    println!("Analyzing image: {}", image_path);
    println!(
        "Geometry: {} bytes, {} sectors x {} bytes, {} clusters x {} bytes",
        device_size,
        geo.total_sectors(),
        sector_size,
        geo.total_clusters(),
        cluster_size
    );
    println!("Legend: . erased  F formatted  P pending  A allocated  O orphaned  ? unknown\n");

    let mut io = StdFlashIO::new(file, geo);
    let cps = geo.clusters_per_sector();

    let mut totals = [0u64; 6]; // erased, formatted, pending, allocated, orphaned, unknown
    let mut bad_heads = 0u32;

    for sector in 0..geo.total_sectors() {
        let mut line = String::with_capacity(cps as usize);
        let mut orphans = 0u32;

        for i in 0..cps {
            let cluster = sector * cps + i;
            let marker = io
                .read_u8_at(geo.cluster_offset(cluster))
                .expect("Failed to read marker");

            let (glyph, slot) = match marker {
                MARKER_ERASED => ('.', 0),
                MARKER_FORMATTED => ('F', 1),
                MARKER_PENDING => ('P', 2),
                MARKER_ALLOCATED => ('A', 3),
                MARKER_ORPHANED => ('O', 4),
                _ => ('?', 5),
            };
            totals[slot] += 1;
            if matches!(glyph, 'P' | 'O' | '?') {
                orphans += 1;
            }

            if i == 0 && !matches!(marker, MARKER_FORMATTED | MARKER_ALLOCATED | MARKER_ORPHANED | MARKER_PENDING) {
                bad_heads += 1;
                line.push('!');
            }
            line.push(glyph);
        }

        println!("sector {:3}: {}  (reclaimable: {})", sector, line, orphans);
    }

    println!();
    println!(
        "Totals: erased {}, formatted {}, pending {}, allocated {}, orphaned {}, unknown {}",
        totals[0], totals[1], totals[2], totals[3], totals[4], totals[5]
    );
    if bad_heads > 0 {
        println!(
            "WARNING: {} sector head(s) carry an illegal marker; the volume will not mount",
            bad_heads
        );
    } else {
        println!("All sector heads are legal; the volume is mountable");
    }
}
