// SPDX-License-Identifier: MIT

//! Power-loss and remount behavior.
//!
//! The remount tests drive an operation sequence, drop the file system and
//! rebuild it from the raw image, expecting the identical visible state. The
//! crash tests cut power on every single device write an operation issues
//! and verify that remounting yields the pre- or post-operation state.

use flashfs::prelude::*;
use flashio::prelude::*;

const GEO: FlashGeometry = FlashGeometry {
    device_size: 64 * 1024,
    sector_size: 4096,
    cluster_size: 512,
};

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed)).collect()
}

/// Visible state: every file name with its contents.
fn snapshot(fs: &FlashFs<impl FlashIO>) -> Vec<(String, Vec<u8>)> {
    fs.files()
        .unwrap()
        .into_iter()
        .map(|name| {
            let data = fs.read_all_bytes(&name).unwrap();
            (name, data)
        })
        .collect()
}

#[test]
fn test_remount_restores_visible_state() {
    let mut img = vec![0u8; GEO.device_size as usize];
    let before;
    {
        let fs = FlashFs::new(MemFlashIO::new(&mut img, GEO)).unwrap();
        fs.format().unwrap();
        fs.write_all_bytes("a", &pattern(1500, 1)).unwrap();
        fs.write_all_bytes("b", &pattern(40, 2)).unwrap();
        fs.write_all_bytes("c", &pattern(700, 3)).unwrap();
        fs.delete("b").unwrap();
        fs.rename("c", "c2").unwrap();
        fs.copy("a", "a2", true).unwrap();
        let mut s = fs.open("a", OpenMode::Open).unwrap();
        s.seek_to(100);
        s.write(&pattern(50, 9)).unwrap();
        drop(s);
        fs.compact().unwrap();
        before = snapshot(&fs);
    }

    let fs = FlashFs::new(MemFlashIO::new(&mut img, GEO)).unwrap();
    fs.mount().unwrap();
    assert_eq!(snapshot(&fs), before);
    fs.check_consistency().unwrap();
}

#[test]
fn test_mount_is_idempotent_and_format_resets() {
    let mut img = vec![0u8; GEO.device_size as usize];
    let fs = FlashFs::new(MemFlashIO::new(&mut img, GEO)).unwrap();
    fs.format().unwrap();
    fs.write_all_bytes("f", b"contents").unwrap();

    fs.mount().unwrap();
    fs.mount().unwrap();
    assert_eq!(fs.read_all_bytes("f").unwrap(), b"contents");

    fs.format().unwrap();
    assert!(fs.files().unwrap().is_empty());
    assert_eq!(fs.stats().unwrap().free_bytes, GEO.device_size);

    fs.format().unwrap();
    assert!(fs.files().unwrap().is_empty());
    fs.check_consistency().unwrap();
}

/// Builds the shared baseline image: two files plus some history so the log
/// is not trivially empty.
fn baseline() -> Vec<u8> {
    let mut img = vec![0u8; GEO.device_size as usize];
    {
        let fs = FlashFs::new(MemFlashIO::new(&mut img, GEO)).unwrap();
        fs.format().unwrap();
        fs.write_all_bytes("alpha", &pattern(1200, 1)).unwrap();
        fs.write_all_bytes("beta", &pattern(300, 2)).unwrap();
        fs.write_all_bytes("alpha", &pattern(1200, 7)).unwrap();
    }
    img
}

/// Runs `op` against a baseline image with power cut on the `nth` device
/// write. Returns false once `nth` exceeds the writes the operation issues
/// (i.e. the run completed without a cut).
fn run_with_cut(
    img: &mut [u8],
    nth: u64,
    op: &dyn Fn(&FlashFs<FaultFlashIO<MemFlashIO<'_>>>) -> FsResult,
) -> bool {
    let plan = FaultPlan::new();
    let fs = FlashFs::new(FaultFlashIO::new(MemFlashIO::new(img, GEO), plan.clone())).unwrap();
    fs.mount().unwrap();
    plan.arm(nth);
    let result = op(&fs);
    let tripped = plan.tripped();
    if tripped {
        assert!(result.is_err(), "a cut write must surface an error");
    }
    tripped
}

fn crash_everywhere(
    op: &dyn Fn(&FlashFs<FaultFlashIO<MemFlashIO<'_>>>) -> FsResult,
    accept: &dyn Fn(&[(String, Vec<u8>)]) -> bool,
) {
    let base = baseline();
    for nth in 0..200 {
        let mut img = base.clone();
        let tripped = run_with_cut(&mut img, nth, op);

        let fs = FlashFs::new(MemFlashIO::new(&mut img, GEO)).unwrap();
        fs.mount().unwrap();
        fs.check_consistency().unwrap();
        let state = snapshot(&fs);
        assert!(
            accept(&state),
            "unacceptable post-crash state after cutting write {nth}: {:?}",
            state.iter().map(|(n, d)| (n.clone(), d.len())).collect::<Vec<_>>()
        );

        if !tripped {
            return; // the operation ran out of writes to cut
        }
    }
    panic!("operation issued more writes than the harness explored");
}

fn entry<'a>(state: &'a [(String, Vec<u8>)], name: &str) -> Option<&'a [u8]> {
    state
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, d)| d.as_slice())
}

#[test]
fn test_crash_during_create() {
    crash_everywhere(
        &|fs| fs.open("gamma", OpenMode::CreateNew).map(drop),
        &|state| {
            // Pre: no gamma. Post: empty gamma. Both keep alpha and beta.
            entry(state, "alpha").map(|d| d.to_vec()) == Some(pattern(1200, 7))
                && entry(state, "beta").map(|d| d.to_vec()) == Some(pattern(300, 2))
                && matches!(entry(state, "gamma"), None | Some(&[]))
        },
    );
}

#[test]
fn test_crash_during_overwrite() {
    let old = pattern(300, 2);
    let new = pattern(300, 11);
    crash_everywhere(
        &|fs| {
            let mut s = fs.open("beta", OpenMode::Open)?;
            s.write(&new)?;
            Ok(())
        },
        &|state| {
            // beta is one block; its rewrite is all-or-nothing.
            entry(state, "beta") == Some(&old[..]) || entry(state, "beta") == Some(&new[..])
        },
    );
}

#[test]
fn test_crash_during_append_write() {
    let old = pattern(1200, 7);
    crash_everywhere(
        &|fs| {
            let mut s = fs.open("alpha", OpenMode::Append)?;
            s.write(&pattern(600, 12))?;
            Ok(())
        },
        &|state| {
            let Some(alpha) = entry(state, "alpha") else {
                return false;
            };
            // The extension lands block by block: the old prefix is always
            // intact and whatever grew matches the new data.
            alpha.len() >= old.len()
                && alpha[..old.len()] == old[..]
                && {
                    let expected = pattern(600, 12);
                    alpha[old.len()..] == expected[..alpha.len() - old.len()]
                }
        },
    );
}

#[test]
fn test_crash_during_truncate() {
    let old = pattern(1200, 7);
    crash_everywhere(
        &|fs| {
            let mut s = fs.open("alpha", OpenMode::Open)?;
            s.set_len(200)
        },
        &|state| {
            entry(state, "alpha") == Some(&old[..]) || entry(state, "alpha") == Some(&old[..200])
        },
    );
}

#[test]
fn test_crash_during_delete() {
    crash_everywhere(
        &|fs| fs.delete("beta"),
        &|state| {
            let beta = entry(state, "beta");
            beta.is_none() || beta == Some(&pattern(300, 2)[..])
        },
    );
}

#[test]
fn test_crash_during_rename() {
    let contents = pattern(300, 2);
    crash_everywhere(
        &|fs| fs.rename("beta", "omega"),
        &|state| {
            let before = entry(state, "beta") == Some(&contents[..]) && entry(state, "omega").is_none();
            let after = entry(state, "beta").is_none() && entry(state, "omega") == Some(&contents[..]);
            before || after
        },
    );
}

#[test]
fn test_crash_during_copy() {
    let src = pattern(1200, 7);
    crash_everywhere(
        &|fs| fs.copy("alpha", "copy", false),
        &|state| {
            // The source never changes. The copy commits block by block, so
            // a crash may leave a shorter prefix of it.
            entry(state, "alpha") == Some(&src[..])
                && match entry(state, "copy") {
                    None => true,
                    Some(copy) => copy.len() <= src.len() && copy[..] == src[..copy.len()],
                }
        },
    );
}
