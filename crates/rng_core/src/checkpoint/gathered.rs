use anyhow::Result;

use super::{
    load_local, local_states, mismatch, restored, root_status, CheckpointShape, Opened, Restore,
    CHILD_GROUP, MASTER_GROUP, SHAPE_TAG, STATE_GROUP,
};
use crate::comm::Communicator;
use crate::engine::StreamEngine;
use crate::error::StoreError;
use crate::pool::StreamPool;
use crate::store::{Hyperslab, StructuredStore};

/// Gather every rank's states at the root, which alone writes the archive.
pub(super) fn write<E: StreamEngine>(
    pool: &StreamPool<E>,
    comm: &dyn Communicator,
    created: Opened,
) -> Result<()> {
    let shape = CheckpointShape::live(pool, comm);
    let (children, master) = local_states(pool);
    let all_children = comm.gather(&children)?;
    let all_master = comm.gather(&master)?;

    let mut store = created?;
    if let (Some(all_children), Some(all_master)) = (all_children, all_master) {
        store.push(STATE_GROUP);
        store.write(SHAPE_TAG, &Hyperslab::full(&[3]), &shape.to_words())?;

        store.push(CHILD_GROUP);
        store.write(E::NAME, &Hyperslab::full(&shape.child_shape()), &all_children)?;
        store.pop()?;

        store.push(MASTER_GROUP);
        store.write(E::NAME, &Hyperslab::full(&shape.master_shape()), &all_master)?;
    }
    store.close()?;
    Ok(())
}

fn read_shape(store: &mut dyn StructuredStore) -> Result<[u64; 3], StoreError> {
    let mut words = [0u64; 3];
    store.push(STATE_GROUP);
    store.read(SHAPE_TAG, &Hyperslab::full(&[3]), &mut words)?;
    Ok(words)
}

fn read_all(
    store: &mut dyn StructuredStore,
    name: &str,
    shape: &CheckpointShape,
) -> Result<(Vec<u64>, Vec<u64>), StoreError> {
    let child_shape = shape.child_shape();
    let master_shape = shape.master_shape();
    let mut children = vec![0u64; child_shape[0] * child_shape[1]];
    let mut master = vec![0u64; master_shape[0] * master_shape[1]];

    store.push(CHILD_GROUP);
    store.read(name, &Hyperslab::full(&child_shape), &mut children)?;
    store.pop()?;

    store.push(MASTER_GROUP);
    store.read(name, &Hyperslab::full(&master_shape), &mut master)?;
    Ok((children, master))
}

/// The root reads and broadcasts the job shape, so every rank reaches the
/// same verdict; then the root reads everything and scatters each rank's rows.
pub(super) fn read<E: StreamEngine>(
    pool: &mut StreamPool<E>,
    comm: &dyn Communicator,
    opened: Opened,
) -> Result<Restore> {
    let live = CheckpointShape::live(pool, comm);

    let header = opened.and_then(|mut store| {
        let words = if comm.is_root() {
            read_shape(store.as_mut())?
        } else {
            [0; 3]
        };
        Ok((store, words))
    });
    let (mut store, mut words) = root_status(comm, header)?;
    comm.broadcast(&mut words)?;
    let stored = CheckpointShape::from_words(&words);
    if stored != live {
        store.close()?;
        return Ok(mismatch(stored, live));
    }

    let loaded = if comm.is_root() {
        read_all(store.as_mut(), E::NAME, &live).map(Some)
    } else {
        Ok(None)
    };
    let loaded = root_status(comm, loaded)?;
    store.close()?;

    let (all_children, all_master) = match loaded {
        Some((children, master)) => (Some(children), Some(master)),
        None => (None, None),
    };
    let children = comm.scatter(all_children.as_deref(), live.threads * live.state_size)?;
    let master = comm.scatter(all_master.as_deref(), live.state_size)?;

    load_local(pool, &children, &master)?;
    Ok(restored())
}
