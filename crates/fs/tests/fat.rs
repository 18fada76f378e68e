//! FAT backend exercised over an in-memory block device.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use device::{CardDetect, RamDisk};
use fs::FatFs;
use vfs::{FileSystem, FsError, OpenMode, StMode};

struct FakeDetect {
    present: AtomicBool,
}

impl CardDetect for FakeDetect {
    fn card_inserted(&self) -> bool {
        self.present.load(Ordering::Relaxed)
    }
}

fn formatted_card() -> Arc<FatFs> {
    let disk = RamDisk::new(1024 * 1024, 512);
    let fat = FatFs::new(disk, None);
    fat.format().unwrap();
    assert!(fat.mounted());
    fat
}

#[test]
fn write_then_read_back() {
    let fat = formatted_card();
    let f = fat
        .open("/job.nc", OpenMode::parse("w"))
        .unwrap();
    f.write(b"G0 X10\nG1 Y5 F100\n").unwrap();
    f.close().unwrap();

    let f = fat.open("/job.nc", OpenMode::parse("r")).unwrap();
    assert_eq!(f.size(), 18);
    let mut buf = [0u8; 32];
    let n = f.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"G0 X10\nG1 Y5 F100\n");
    assert_eq!(f.read(&mut buf).unwrap(), 0);
    assert!(f.eof());
}

#[test]
fn seek_and_tell() {
    let fat = formatted_card();
    let f = fat.open("/a.nc", OpenMode::parse("w")).unwrap();
    f.write(b"0123456789").unwrap();

    let f = fat.open("/a.nc", OpenMode::parse("r")).unwrap();
    f.seek(4).unwrap();
    assert_eq!(f.tell(), 4);
    let mut buf = [0u8; 3];
    f.read(&mut buf).unwrap();
    assert_eq!(&buf, b"456");
    assert_eq!(f.tell(), 7);
    // seeking past the end is rejected
    assert_eq!(f.seek(11).unwrap_err(), FsError::InvalidArgument);
}

#[test]
fn stat_reports_size_and_dir_bit() {
    let fat = formatted_card();
    let f = fat.open("/part.nc", OpenMode::parse("w")).unwrap();
    f.write(b"M3 S1000\n").unwrap();
    fat.mkdir("/jobs").unwrap();

    let info = fat.stat("/part.nc").unwrap();
    assert_eq!(info.size, 9);
    assert!(!info.mode.contains(StMode::DIRECTORY));

    let info = fat.stat("/jobs").unwrap();
    assert!(info.mode.contains(StMode::DIRECTORY));

    // FAT name matching is case-insensitive
    assert!(fat.stat("/PART.NC").is_ok());
    assert_eq!(fat.stat("/absent.nc").unwrap_err(), FsError::NotFound);
}

#[test]
fn listing_skips_dot_entries() {
    let fat = formatted_card();
    fat.mkdir("/sub").unwrap();
    let f = fat.open("/sub/inner.nc", OpenMode::parse("w")).unwrap();
    f.write(b"G4 P1\n").unwrap();

    let mut names = Vec::new();
    let mut dir = fat.opendir("/sub").unwrap();
    while let Some(entry) = dir.next_entry().unwrap() {
        names.push(entry.name);
    }
    assert_eq!(names, vec!["inner.nc"]);
}

#[test]
fn rename_and_unlink() {
    let fat = formatted_card();
    let f = fat.open("/old.nc", OpenMode::parse("w")).unwrap();
    f.write(b"G0\n").unwrap();

    fat.rename("/old.nc", "/new.nc").unwrap();
    assert!(fat.stat("/old.nc").is_err());
    assert_eq!(fat.stat("/new.nc").unwrap().size, 3);

    fat.unlink("/new.nc").unwrap();
    assert_eq!(fat.stat("/new.nc").unwrap_err(), FsError::NotFound);
}

#[test]
fn unmounted_card_rejects_ops() {
    let fat = formatted_card();
    fat.umount().unwrap();
    assert!(!fat.mounted());
    assert_eq!(
        fat.open("/a.nc", OpenMode::parse("r")).err().unwrap(),
        FsError::NotMounted
    );
    assert_eq!(fat.stat("/a.nc").unwrap_err(), FsError::NotMounted);

    // and a fresh mount brings it back
    fat.mount_volume().unwrap();
    assert!(fat.mounted());
}

#[test]
fn open_handle_survives_unmount_but_fails() {
    let fat = formatted_card();
    let f = fat.open("/a.nc", OpenMode::parse("w")).unwrap();
    f.write(b"data").unwrap();
    fat.umount().unwrap();
    let mut buf = [0u8; 4];
    assert_eq!(f.read(&mut buf).unwrap_err(), FsError::NotMounted);
}

#[test]
fn mount_status_integer() {
    let disk = RamDisk::new(1024 * 1024, 512);
    let detect = Arc::new(FakeDetect {
        present: AtomicBool::new(false),
    });
    let fat = FatFs::new(disk, Some(detect.clone()));

    // bit1 reports the detect line itself, not the card
    assert_eq!(fat.mount_status(), 2);

    detect.present.store(true, Ordering::Relaxed);
    fat.format().unwrap();
    assert_eq!(fat.mount_status(), 3);

    fat.umount().unwrap();
    assert_eq!(fat.mount_status(), 2);

    // no detect line wired at all
    let fat = FatFs::new(RamDisk::new(1024 * 1024, 512), None);
    assert_eq!(fat.mount_status(), 0);
}

#[test]
fn getfree_tracks_usage() {
    let fat = formatted_card();
    let before = fat.getfree().unwrap();
    assert!(before.total > 0);

    let f = fat.open("/big.nc", OpenMode::parse("w")).unwrap();
    f.write(&vec![b'X'; 8192]).unwrap();
    f.close().unwrap();

    let after = fat.getfree().unwrap();
    assert!(after.used > before.used);
}
