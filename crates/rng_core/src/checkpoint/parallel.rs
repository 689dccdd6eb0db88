use anyhow::Result;

use super::{
    load_local, local_states, mismatch, restored, CheckpointShape, Opened, Restore, CHILD_GROUP,
    MASTER_GROUP, SHAPE_TAG, STATE_GROUP,
};
use crate::comm::Communicator;
use crate::engine::StreamEngine;
use crate::error::StoreError;
use crate::pool::StreamPool;
use crate::store::{Hyperslab, StructuredStore};

/// Each rank writes its own rows; the root also records the job shape.
pub(super) fn write<E: StreamEngine>(
    pool: &StreamPool<E>,
    comm: &dyn Communicator,
    created: Opened,
) -> Result<()> {
    let mut store = created?;
    let shape = CheckpointShape::live(pool, comm);
    let (children, master) = local_states(pool);
    let rank = comm.rank();

    store.push(STATE_GROUP);
    if comm.is_root() {
        store.write(SHAPE_TAG, &Hyperslab::full(&[3]), &shape.to_words())?;
    }

    store.push(CHILD_GROUP);
    let rows = Hyperslab::rows(shape.child_shape(), rank * shape.threads, shape.threads);
    store.write(E::NAME, &rows, &children)?;
    store.pop()?;

    store.push(MASTER_GROUP);
    store.write(E::NAME, &Hyperslab::rows(shape.master_shape(), rank, 1), &master)?;
    store.close()?;
    Ok(())
}

fn read_shape(store: &mut dyn StructuredStore) -> Result<CheckpointShape, StoreError> {
    let mut words = [0u64; 3];
    store.push(STATE_GROUP);
    store.read(SHAPE_TAG, &Hyperslab::full(&[3]), &mut words)?;
    Ok(CheckpointShape::from_words(&words))
}

/// Each rank checks the stored shape on its own, the ranks agree on the
/// verdict, then each rank reads its own rows.
pub(super) fn read<E: StreamEngine>(
    pool: &mut StreamPool<E>,
    comm: &dyn Communicator,
    opened: Opened,
) -> Result<Restore> {
    let live = CheckpointShape::live(pool, comm);

    let header = opened.and_then(|mut store| {
        let shape = read_shape(store.as_mut())?;
        Ok((store, shape))
    });
    let matches = matches!(&header, Ok((_, shape)) if *shape == live);
    let agreed = comm.all_agree(matches)?;
    let (mut store, stored) = header?;
    if !agreed {
        store.close()?;
        return Ok(mismatch(stored, live));
    }

    let rank = comm.rank();
    let mut children = vec![0u64; live.threads * live.state_size];
    let mut master = vec![0u64; live.state_size];

    store.push(CHILD_GROUP);
    let rows = Hyperslab::rows(live.child_shape(), rank * live.threads, live.threads);
    store.read(E::NAME, &rows, &mut children)?;
    store.pop()?;

    store.push(MASTER_GROUP);
    store.read(E::NAME, &Hyperslab::rows(live.master_shape(), rank, 1), &mut master)?;
    store.close()?;

    load_local(pool, &children, &master)?;
    Ok(restored())
}
