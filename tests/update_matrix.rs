//! Update-path coverage: the full width-transition matrix on a sparse
//! column, metrics accounting, and the lock-free reader contract.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use slotpack::{compress, ExpandArena, Reader, UpdateOutcome};

/// Values spanning every delta width: Bit1/Bit2/Bit4/U8/U16/U32 plus the
/// full-width extreme.
const WIDTH_STEPS: [u32; 7] = [0, 2, 4, 16, 256, 65536, u32::MAX];

#[test]
fn sparse_column_width_transition_matrix() {
    for &init in &WIDTH_STEPS {
        for &update in &WIDTH_STEPS {
            let mut data = vec![0u32; 128];
            data[100] = init;
            let bytes = compress(&data, 6).unwrap();

            let arena = Arc::new(ExpandArena::default());
            let reader = Reader::<u32>::with_arena(&bytes, arena).unwrap();

            // Updating an untouched constant slot with its own value is a
            // successful no-op.
            assert_eq!(
                reader.update(0, 0).unwrap(),
                UpdateOutcome::Unchanged,
                "init={init} update={update}"
            );

            reader.update(100, update).unwrap();

            for pos in 0..128u32 {
                let expect = if pos == 100 { update } else { 0 };
                assert_eq!(
                    reader.get(pos).unwrap(),
                    expect,
                    "init={init} update={update} pos={pos}"
                );
            }
        }
    }
}

#[test]
fn narrowing_updates_run_in_place() {
    let mut data = vec![0u32; 128];
    data[100] = 65536; // slot 1 packs at U32 width
    let bytes = compress(&data, 6).unwrap();

    let arena = Arc::new(ExpandArena::default());
    let reader = Reader::<u32>::with_arena(&bytes, arena.clone()).unwrap();

    let before = arena.len();
    assert_eq!(reader.update(100, 3).unwrap(), UpdateOutcome::InPlace);
    assert_eq!(reader.get(100).unwrap(), 3);
    // Metrics materialization aside, no block was allocated.
    let metrics = reader.update_metrics().unwrap();
    assert_eq!(metrics.inplace_update_count, 1);
    assert_eq!(metrics.expand_update_count, 0);
    assert_eq!(metrics.no_used_bytes_size, 0);
    assert!(arena.len() >= before);
}

#[test]
fn metrics_accumulate_across_repeated_expands() {
    let data = vec![0u32; 64];
    let bytes = compress(&data, 6).unwrap();
    let arena = Arc::new(ExpandArena::default());
    let reader = Reader::<u32>::with_arena(&bytes, arena.clone()).unwrap();

    // Each update widens past the previous block: every one expands.
    reader.update(1, 3).unwrap(); // Equal -> Bit2
    reader.update(2, 200).unwrap(); // Bit2 -> U8
    reader.update(3, 70000).unwrap(); // U8 -> U32

    let metrics = reader.update_metrics().unwrap();
    assert_eq!(metrics.expand_update_count, 3);
    // The first expand abandons no block (constant slots own none); the
    // later two abandon the Bit2 then the U8 block.
    let bit2 = 4 + 16;
    let u8_block = 4 + 64;
    assert_eq!(metrics.no_used_bytes_size, (bit2 + u8_block) as u64);

    assert_eq!(reader.get(1).unwrap(), 3);
    assert_eq!(reader.get(2).unwrap(), 200);
    assert_eq!(reader.get(3).unwrap(), 70000);
    assert_eq!(reader.get(0).unwrap(), 0);
}

#[test]
fn metrics_survive_arena_reuse() {
    let data = vec![0u32; 64];
    let bytes = compress(&data, 6).unwrap();
    let arena = Arc::new(ExpandArena::default());

    {
        let reader = Reader::<u32>::with_arena(&bytes, arena.clone()).unwrap();
        reader.update(0, 500).unwrap();
        assert_eq!(reader.update_metrics().unwrap().expand_update_count, 1);
    }

    // A fresh reader over the same arena adopts the existing record.
    let reader = Reader::<u32>::with_arena(&bytes, arena).unwrap();
    assert_eq!(reader.update_metrics().unwrap().expand_update_count, 1);
}

#[test]
fn quota_exhaustion_fails_update_without_corruption() {
    let data = vec![0u32; 64];
    let bytes = compress(&data, 6).unwrap();
    // Room for the metrics record and one small chunk, nothing more.
    let arena = Arc::new(ExpandArena::new(64, 64));
    let reader = Reader::<u32>::with_arena(&bytes, arena).unwrap();

    // Metrics (24B) fit the first chunk; the expand block does not fit the
    // quota, so the update must fail and leave the column readable.
    assert!(reader.update(0, u32::MAX).is_err());
    for pos in 0..64u32 {
        assert_eq!(reader.get(pos).unwrap(), 0);
    }
}

/// Raises the stop flag when dropped, so reader threads terminate even if
/// an assertion on the updating side panics mid-ladder.
struct StopOnDrop<'a>(&'a AtomicBool);

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[test]
fn concurrent_readers_see_consistent_values_during_expands() {
    // Every update drops one below the slot's current base. The spread
    // stays far under full width (no rebase to zero), so the new value is
    // always below the published base and every step takes the expand
    // path: a fully written replacement block published by one
    // release-ordered header store. Readers must therefore only ever see
    // the initial value or one of the published ladder values, never a
    // torn mix.
    let data = vec![1_000_000u32; 1024];
    let bytes = compress(&data, 6).unwrap();
    let arena = Arc::new(ExpandArena::default());
    let reader = Arc::new(Reader::<u32>::with_arena(&bytes, arena).unwrap());

    const STEPS: u32 = 300;
    let done = AtomicBool::new(false);

    std::thread::scope(|scope| {
        for _ in 0..4 {
            let reader = Arc::clone(&reader);
            let done = &done;
            scope.spawn(move || {
                while !done.load(Ordering::Relaxed) {
                    let seen = reader.get(5).unwrap();
                    assert!(
                        (1_000_000 - STEPS..=1_000_000).contains(&seen),
                        "torn read: {seen}"
                    );
                    // Neighbors in the same slot stay untouched throughout.
                    assert_eq!(reader.get(4).unwrap(), 1_000_000);
                    assert_eq!(reader.get(6).unwrap(), 1_000_000);
                }
            });
        }

        let _stop = StopOnDrop(&done);
        for step in 0..STEPS {
            let value = 1_000_000 - 1 - step;
            assert_eq!(
                reader.update(5, value).unwrap(),
                UpdateOutcome::Expanded,
                "step {step} must drop below the base and expand"
            );
        }
    });

    assert_eq!(reader.get(5).unwrap(), 1_000_000 - STEPS);
}

#[test]
fn rebased_to_zero_block_takes_lower_values_in_place() {
    // A drop from a large constant selects full U32 width, which rebases
    // the block to zero. From then on any smaller value is a valid delta
    // off base 0 and must run in place, not expand again.
    let data = vec![1_000_000u32; 64];
    let bytes = compress(&data, 6).unwrap();
    let arena = Arc::new(ExpandArena::default());
    let reader = Reader::<u32>::with_arena(&bytes, arena.clone()).unwrap();

    assert_eq!(reader.update(5, 500_000).unwrap(), UpdateOutcome::Expanded);
    let len = arena.len();
    assert_eq!(reader.update(5, 499_999).unwrap(), UpdateOutcome::InPlace);
    assert_eq!(arena.len(), len, "in-place write must not allocate");
    assert_eq!(reader.get(5).unwrap(), 499_999);
    assert_eq!(reader.get(4).unwrap(), 1_000_000);
}
