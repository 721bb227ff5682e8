//! End-to-end persistence across process restarts: the slab and id log are
//! reopened from disk and must reproduce the pre-shutdown state exactly.

use slabdb::idslab::TOMBSTONE;
use slabdb::{probe, IdSlab, MatrixSlab};
use tempfile::tempdir;

#[test]
fn test_create_insert_two_reopen_lookup() {
    let dir = tempdir().unwrap();
    let slab_path = dir.path().join("db.slab");
    let wal_path = dir.path().join("db.wal");

    {
        let mut slab = MatrixSlab::open(&slab_path, 4).unwrap();
        let mut ids = IdSlab::open(&wal_path).unwrap();

        let row = slab.append(&[1.0, 0.0, 0.0, 0.0]).unwrap();
        assert_eq!(ids.insert(7, row as i64).unwrap(), Some(0));

        let row = slab.append(&[0.0, 1.0, 0.0, 0.0]).unwrap();
        assert_eq!(ids.insert(9, row as i64).unwrap(), Some(1));

        slab.flush().unwrap();
    }

    // Discover the stored dimension before the full open.
    let dim = probe(&slab_path).unwrap().dim as usize;
    assert_eq!(dim, 4);

    let slab = MatrixSlab::open(&slab_path, dim).unwrap();
    let ids = IdSlab::open(&wal_path).unwrap();

    assert_eq!(ids.row_for_user(7), 0);
    assert_eq!(ids.row_for_user(9), 1);
    assert_eq!(slab.count(), 2);
    assert_eq!(slab.row(0).unwrap(), &[1.0, 0.0, 0.0, 0.0]);
    assert_eq!(slab.row(1).unwrap(), &[0.0, 1.0, 0.0, 0.0]);
}

#[test]
fn test_delete_and_reinsert_survive_restart() {
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join("db.wal");

    {
        let mut ids = IdSlab::open(&wal_path).unwrap();
        ids.insert(7, 0).unwrap();
        ids.insert(9, 1).unwrap();
        ids.remove(7).unwrap();
        assert_eq!(ids.insert(7, 2).unwrap(), Some(2));
    }

    let ids = IdSlab::open(&wal_path).unwrap();
    assert_eq!(ids.row_for_user(7), 2);
    assert_eq!(ids.row_for_user(9), 1);
    assert_eq!(ids.row_for_auto(0), TOMBSTONE);
    assert_eq!(ids.next_auto_id(), 3);
}

#[test]
fn test_recovery_clamps_uncommitted_matrix_rows() {
    let dir = tempdir().unwrap();
    let slab_path = dir.path().join("db.slab");
    let wal_path = dir.path().join("db.wal");

    {
        let mut slab = MatrixSlab::open(&slab_path, 2).unwrap();
        let mut ids = IdSlab::open(&wal_path).unwrap();

        // Three matrix rows, but the log record for the third never made it
        // out before the crash.
        for (user, v) in [(10u64, [1.0f32, 0.0]), (20, [0.0, 1.0]), (30, [1.0, 1.0])] {
            let row = slab.append(&v).unwrap();
            if user != 30 {
                ids.insert(user, row as i64).unwrap();
            }
        }
        slab.flush().unwrap();
    }

    let mut slab = MatrixSlab::open(&slab_path, 2).unwrap();
    let mut ids = IdSlab::open(&wal_path).unwrap();
    assert_eq!(slab.count(), 3);

    // The log is the authority on liveness: rows past its high-water mark
    // are uncommitted.
    let committed = ids.max_live_row().map_or(0, |row| row as u64 + 1);
    slab.clamp_count(committed);
    assert_eq!(slab.count(), 2);

    // The reclaimed slot is reused by the next write.
    let row = slab.append(&[9.0, 9.0]).unwrap();
    assert_eq!(row, 2);
    assert_eq!(ids.insert(30, row as i64).unwrap(), Some(2));
    assert_eq!(ids.row_for_user(30), 2);
    assert_eq!(slab.row(2).unwrap(), &[9.0, 9.0]);
}
