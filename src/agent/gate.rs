//! Concurrency gate
//!
//! Slicing may only overlap with physical backups. Any other lock in the
//! regular table pauses the slicer election for this tick.

use crate::common::{Cmd, Error, Result};
use crate::lock::{LockFilter, LockService};
use crate::meta::MetaStore;

/// Returns `Error::ConcurrentOp` with the blocking lock's header if some
/// parallel operation forbids slicing right now.
pub(crate) async fn can_slice_now(meta: &dyn MetaStore, locks: &dyn LockService) -> Result<()> {
    let all = locks.get_locks(&LockFilter::default()).await?;

    for lk in all {
        if lk.header.cmd != Cmd::Backup {
            return Err(Error::ConcurrentOp(lk.header));
        }

        let bcp = meta
            .get_backup_by_opid(lk.header.opid)
            .await?
            .ok_or_else(|| Error::Meta(format!("backup not found for opid {}", lk.header.opid)))?;

        if !bcp.kind.is_physical() {
            return Err(Error::ConcurrentOp(lk.header));
        }
    }

    Ok(())
}
